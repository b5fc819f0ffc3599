//-
// Copyright (c) 2020, Jason Lingle
//
// This file is part of Crymap.
//
// Crymap is free software: you can  redistribute it and/or modify it under the
// terms of  the GNU General Public  License as published by  the Free Software
// Foundation, either version  3 of the License, or (at  your option) any later
// version.
//
// Crymap is distributed  in the hope that  it will be useful,  but WITHOUT ANY
// WARRANTY; without  even the implied  warranty of MERCHANTABILITY  or FITNESS
// FOR  A PARTICULAR  PURPOSE.  See the  GNU General  Public  License for  more
// details.
//
// You should have received a copy of the GNU General Public License along with
// Crymap. If not, see <http://www.gnu.org/licenses/>.

use std::sync::Arc;

use super::*;
use crate::store::mapper::MessageStore;
use crate::store::model::{FetchType, MessageRange};
use crate::support::error::Error;

/// Reads limits and usage together.
#[derive(Clone)]
pub struct QuotaManager {
    max: Arc<dyn MaxQuotaManager>,
    current: Arc<dyn CurrentQuotaStore>,
}

impl QuotaManager {
    pub fn new(
        max: Arc<dyn MaxQuotaManager>,
        current: Arc<dyn CurrentQuotaStore>,
    ) -> Self {
        Self { max, current }
    }

    pub fn max(&self) -> &dyn MaxQuotaManager {
        &*self.max
    }

    pub fn current(&self) -> &dyn CurrentQuotaStore {
        &*self.current
    }

    pub fn get_message_quota(&self, root: &QuotaRoot) -> Result<Quota, Error> {
        Ok(Quota {
            limit: self.max.effective_limit(root, QuotaKind::Count)?,
            used: self.current.current(root)?.count,
        })
    }

    pub fn get_storage_quota(&self, root: &QuotaRoot) -> Result<Quota, Error> {
        Ok(Quota {
            limit: self.max.effective_limit(root, QuotaKind::Size)?,
            used: self.current.current(root)?.size,
        })
    }

    /// Snapshot both quotas of `root` into a checker.
    pub fn checker(&self, root: &QuotaRoot) -> Result<QuotaChecker, Error> {
        let usage = self.current.current(root)?;
        Ok(QuotaChecker {
            count: Quota {
                limit: self.max.effective_limit(root, QuotaKind::Count)?,
                used: usage.count,
            },
            size: Quota {
                limit: self.max.effective_limit(root, QuotaKind::Size)?,
                used: usage.size,
            },
        })
    }

    /// Rebuild the usage of `root` by scanning every mailbox resolved to it.
    pub fn recompute(
        &self,
        root: &QuotaRoot,
        resolver: &dyn QuotaRootResolver,
        messages: &dyn MessageStore,
    ) -> Result<QuotaUsage, Error> {
        let mut usage = QuotaUsage::default();
        for mailbox in resolver.associated_mailboxes(root)? {
            for message in messages.find_in_mailbox(
                &mailbox,
                MessageRange::All,
                FetchType::Metadata,
                0,
            )? {
                usage = usage.plus(QuotaUsage::new(1, message.size));
            }
        }

        self.current.set(root, usage)?;
        Ok(usage)
    }
}

/// Pre-flight check for a mutation that adds messages to one root.
///
/// Additions accepted by `try_addition` accumulate, so a checker used
/// across one multi-message request rejects the first message that would
/// cross a limit.
#[derive(Clone, Copy, Debug)]
pub struct QuotaChecker {
    count: Quota,
    size: Quota,
}

impl QuotaChecker {
    pub fn try_addition(&mut self, count: u64, size: u64) -> Result<(), Error> {
        if self.count.is_over_with(count) {
            return Err(Error::OverQuota(QuotaKind::Count));
        }
        if self.size.is_over_with(size) {
            return Err(Error::OverQuota(QuotaKind::Size));
        }

        self.count.used = self.count.used.saturating_add(count);
        self.size.used = self.size.used.saturating_add(size);
        Ok(())
    }

    pub fn message_quota(&self) -> Quota {
        self.count
    }

    pub fn storage_quota(&self) -> Quota {
        self.size
    }
}
