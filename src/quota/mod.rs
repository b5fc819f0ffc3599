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

//! Quota accounting.
//!
//! A `QuotaRoot` aggregates the usage of every mailbox resolved to it. The
//! ceilings live in a `MaxQuotaManager`, the running totals in a
//! `CurrentQuotaStore`, and `QuotaManager` puts the two together.

mod current;
mod manager;
mod max;
mod root;

use std::fmt;

use serde::{Deserialize, Serialize};

pub use self::current::{CurrentQuotaStore, MemoryCurrentQuotaStore};
pub use self::manager::{QuotaChecker, QuotaManager};
pub use self::max::{MaxQuotaManager, MemoryMaxQuotaManager, QuotaScope};
pub use self::root::{MailboxQuotaRootResolver, QuotaRoot, QuotaRootResolver};

/// The two dimensions a quota limits.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum QuotaKind {
    /// The number of messages.
    Count,
    /// The total size of messages, in bytes.
    Size,
}

impl fmt::Display for QuotaKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            QuotaKind::Count => write!(f, "message count"),
            QuotaKind::Size => write!(f, "storage"),
        }
    }
}

/// A limit and the usage measured against it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Quota {
    /// `None` means unlimited.
    pub limit: Option<u64>,
    pub used: u64,
}

impl Quota {
    pub fn unlimited(used: u64) -> Self {
        Self { limit: None, used }
    }

    /// Whether `additional` more units would take usage beyond the limit.
    pub fn is_over_with(&self, additional: u64) -> bool {
        self.limit
            .map_or(false, |limit| self.used.saturating_add(additional) > limit)
    }

    pub fn is_exceeded(&self) -> bool {
        self.is_over_with(0)
    }
}

impl fmt::Display for Quota {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self.limit {
            Some(limit) => write!(f, "{}/{}", self.used, limit),
            None => write!(f, "{}/unlimited", self.used),
        }
    }
}

/// The usage of one quota root, or a change to it.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize,
)]
pub struct QuotaUsage {
    pub count: u64,
    pub size: u64,
}

impl QuotaUsage {
    pub fn new(count: u64, size: u64) -> Self {
        Self { count, size }
    }

    pub fn is_zero(&self) -> bool {
        0 == self.count && 0 == self.size
    }

    pub fn plus(self, other: QuotaUsage) -> Self {
        Self {
            count: self.count.saturating_add(other.count),
            size: self.size.saturating_add(other.size),
        }
    }

    pub fn minus(self, other: QuotaUsage) -> Self {
        Self {
            count: self.count.saturating_sub(other.count),
            size: self.size.saturating_sub(other.size),
        }
    }
}
