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

use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};

use super::{Event, Group};
use crate::support::error::Error;

/// Identifies one parked event within its group.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct InsertionId(pub u64);

impl fmt::Display for InsertionId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Debug for InsertionId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "InsertionId({})", self.0)
    }
}

/// Storage for events whose delivery to a group failed for good.
pub trait EventDeadLetters: Send + Sync {
    fn store(&self, group: &Group, event: Event) -> Result<InsertionId, Error>;
    fn remove(&self, group: &Group, id: InsertionId) -> Result<(), Error>;
    fn remove_all(&self, group: &Group) -> Result<(), Error>;
    fn failed_event(
        &self,
        group: &Group,
        id: InsertionId,
    ) -> Result<Option<Event>, Error>;
    /// The ids parked under `group`, oldest first.
    fn failed_ids(&self, group: &Group) -> Result<Vec<InsertionId>, Error>;
    fn groups_with_failed_events(&self) -> Result<Vec<Group>, Error>;
    fn contains_events(&self) -> Result<bool, Error>;
}

type Parked = BTreeMap<Group, BTreeMap<InsertionId, Event>>;

#[derive(Default)]
pub struct MemoryEventDeadLetters {
    parked: Mutex<Parked>,
    next_id: AtomicU64,
}

impl MemoryEventDeadLetters {
    pub fn new() -> Self {
        Self::default()
    }

    fn parked(&self) -> MutexGuard<'_, Parked> {
        self.parked.lock().expect("dead letters poisoned")
    }
}

impl EventDeadLetters for MemoryEventDeadLetters {
    fn store(&self, group: &Group, event: Event) -> Result<InsertionId, Error> {
        let id = InsertionId(self.next_id.fetch_add(1, Ordering::SeqCst));
        self.parked()
            .entry(group.clone())
            .or_default()
            .insert(id, event);
        Ok(id)
    }

    fn remove(&self, group: &Group, id: InsertionId) -> Result<(), Error> {
        let mut parked = self.parked();
        if let Some(events) = parked.get_mut(group) {
            events.remove(&id);
            if events.is_empty() {
                parked.remove(group);
            }
        }
        Ok(())
    }

    fn remove_all(&self, group: &Group) -> Result<(), Error> {
        self.parked().remove(group);
        Ok(())
    }

    fn failed_event(
        &self,
        group: &Group,
        id: InsertionId,
    ) -> Result<Option<Event>, Error> {
        Ok(self
            .parked()
            .get(group)
            .and_then(|events| events.get(&id))
            .cloned())
    }

    fn failed_ids(&self, group: &Group) -> Result<Vec<InsertionId>, Error> {
        Ok(self
            .parked()
            .get(group)
            .map(|events| events.keys().copied().collect())
            .unwrap_or_default())
    }

    fn groups_with_failed_events(&self) -> Result<Vec<Group>, Error> {
        Ok(self.parked().keys().cloned().collect())
    }

    fn contains_events(&self) -> Result<bool, Error> {
        Ok(!self.parked().is_empty())
    }
}
