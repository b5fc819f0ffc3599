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

use std::fmt;

use thiserror::Error;

use super::Event;
use crate::store::model::MailboxId;

/// Stable identity of a listener subscription.
///
/// At most one listener is active per group, and dead letters are filed
/// under the group whose delivery failed.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Group(String);

impl Group {
    pub fn new(name: impl Into<String>) -> Self {
        Group(name.into())
    }

    pub fn name(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Group {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Debug for Group {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Group({})", self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExecutionMode {
    /// The dispatching operation waits for the listener and fails if it
    /// fails.
    Synchronous,
    /// Delivery happens on a worker; the dispatching operation never sees
    /// the outcome.
    Asynchronous,
}

impl Default for ExecutionMode {
    fn default() -> Self {
        ExecutionMode::Synchronous
    }
}

/// The failure of one delivery attempt.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ListenerError {
    /// The delivery may succeed if attempted again.
    #[error("Transient failure: {0}")]
    Transient(String),
    /// Retrying cannot help.
    #[error("Terminal failure: {0}")]
    Terminal(String),
}

pub trait EventListener: Send + Sync {
    fn execution_mode(&self) -> ExecutionMode {
        ExecutionMode::default()
    }

    /// Whether this listener wants to see `event` at all.
    fn is_handling(&self, _event: &Event) -> bool {
        true
    }

    fn handle(&self, event: &Event) -> Result<(), ListenerError>;

    /// The group this listener subscribes under when registered through
    /// `EventBus::register_default`.
    fn default_group(&self) -> Option<Group> {
        None
    }
}

/// A routing key for listeners interested in one entity only.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum RegistrationKey {
    Mailbox(MailboxId),
}

/// Handle to one key registration, used to undo it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Registration(pub(super) u64);
