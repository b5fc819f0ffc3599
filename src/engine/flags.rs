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

use super::defs::*;
use crate::events::{EventKind, MailboxRef};
use crate::store::model::*;
use crate::support::error::Error;

/// `\Recent` belongs to the store; requests can neither set nor clear it.
pub(super) fn client_flags(flags: &Flags) -> Flags {
    flags.iter().filter(|f| Flag::Recent != **f).cloned().collect()
}

impl Engine {
    /// Update the flags of every message of `path` within `range`.
    ///
    /// Returns only the messages whose flags actually changed; the others
    /// keep their ModSeq.
    pub fn set_flags(
        &self,
        session: &MailboxSession,
        path: &MailboxPath,
        range: MessageRange,
        mode: FlagsUpdateMode,
        flags: &Flags,
    ) -> Result<Vec<UpdatedFlags>, Error> {
        let mailbox = self.find_mailbox(path)?;
        let updated = self.backend.messages.update_flags(
            &mailbox,
            mode,
            &client_flags(flags),
            range,
        )?;

        self.dispatch(
            session,
            EventKind::FlagsUpdated {
                mailbox: MailboxRef::from(&mailbox),
                updated: updated.clone(),
            },
        )?;
        Ok(updated)
    }
}
