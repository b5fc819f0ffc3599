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

use std::collections::HashMap;
use std::sync::Mutex;

use super::{QuotaRoot, QuotaUsage};
use crate::support::error::Error;

/// Running usage totals per quota root.
///
/// Decrements saturate at zero; usage never goes negative.
pub trait CurrentQuotaStore: Send + Sync {
    fn increase(&self, root: &QuotaRoot, delta: QuotaUsage)
        -> Result<(), Error>;
    fn decrease(&self, root: &QuotaRoot, delta: QuotaUsage)
        -> Result<(), Error>;
    fn current(&self, root: &QuotaRoot) -> Result<QuotaUsage, Error>;
    /// Overwrite the usage of `root`, as when rebuilding it from a scan.
    fn set(&self, root: &QuotaRoot, usage: QuotaUsage) -> Result<(), Error>;
}

#[derive(Default)]
pub struct MemoryCurrentQuotaStore {
    usage: Mutex<HashMap<QuotaRoot, QuotaUsage>>,
}

impl MemoryCurrentQuotaStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn modify(
        &self,
        root: &QuotaRoot,
        f: impl FnOnce(QuotaUsage) -> QuotaUsage,
    ) {
        let mut usage = self.usage.lock().expect("quota usage poisoned");
        let entry = usage.entry(root.clone()).or_default();
        *entry = f(*entry);
    }
}

impl CurrentQuotaStore for MemoryCurrentQuotaStore {
    fn increase(
        &self,
        root: &QuotaRoot,
        delta: QuotaUsage,
    ) -> Result<(), Error> {
        self.modify(root, |u| u.plus(delta));
        Ok(())
    }

    fn decrease(
        &self,
        root: &QuotaRoot,
        delta: QuotaUsage,
    ) -> Result<(), Error> {
        self.modify(root, |u| u.minus(delta));
        Ok(())
    }

    fn current(&self, root: &QuotaRoot) -> Result<QuotaUsage, Error> {
        Ok(self
            .usage
            .lock()
            .expect("quota usage poisoned")
            .get(root)
            .copied()
            .unwrap_or_default())
    }

    fn set(&self, root: &QuotaRoot, usage: QuotaUsage) -> Result<(), Error> {
        self.modify(root, |_| usage);
        Ok(())
    }
}
