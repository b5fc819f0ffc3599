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

//! The orchestrating mail store.
//!
//! `Engine` ties the mappers, the quota machinery and the event bus
//! together. Its methods are spread over several files by concern, all of
//! them `impl Engine` blocks over the state defined in `defs`.

mod acl;
mod annotations;
mod defs;
mod flags;
mod mailboxes;
mod message_ids;
mod messages;

pub use self::defs::{AppendOptions, Engine, ListedMailbox};
