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

//! Mutation notifications and their delivery.

mod bus;
mod dead_letters;
mod event;
mod listener;
mod logging;
mod retry;

pub use self::bus::EventBus;
pub use self::dead_letters::{
    EventDeadLetters, InsertionId, MemoryEventDeadLetters,
};
pub use self::event::{Event, EventId, EventKind, MailboxRef};
pub use self::listener::{
    EventListener, ExecutionMode, Group, ListenerError, Registration,
    RegistrationKey,
};
pub use self::logging::LoggingListener;
pub use self::retry::RetryBackoff;
