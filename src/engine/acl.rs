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
use crate::store::acl::{AclCommand, AclDiff, MailboxAcl, Rights};
use crate::store::model::*;
use crate::support::error::Error;

impl Engine {
    /// Edit one entry of the ACL of the mailbox at `path`.
    pub fn apply_acl_command(
        &self,
        session: &MailboxSession,
        path: &MailboxPath,
        command: &AclCommand,
    ) -> Result<AclDiff, Error> {
        let mailbox = self.find_mailbox(path)?;
        let diff = self.backend.mailboxes.update_acl(&mailbox, command)?;
        self.acl_updated(session, &mailbox, &diff)?;
        Ok(diff)
    }

    /// Replace the whole ACL of the mailbox at `path`.
    pub fn set_acl(
        &self,
        session: &MailboxSession,
        path: &MailboxPath,
        acl: MailboxAcl,
    ) -> Result<AclDiff, Error> {
        let mailbox = self.find_mailbox(path)?;
        let diff = self.backend.mailboxes.set_acl(&mailbox, acl)?;
        self.acl_updated(session, &mailbox, &diff)?;
        Ok(diff)
    }

    pub fn get_acl(&self, path: &MailboxPath) -> Result<MailboxAcl, Error> {
        Ok(self.find_mailbox(path)?.acl)
    }

    /// Mailboxes of other users where the session user has been granted
    /// `right`.
    pub fn delegated_mailboxes(
        &self,
        session: &MailboxSession,
        right: Rights,
    ) -> Result<Vec<Mailbox>, Error> {
        self.backend
            .mailboxes
            .find_non_personal_mailboxes(&session.user, right)
    }

    fn acl_updated(
        &self,
        session: &MailboxSession,
        mailbox: &Mailbox,
        diff: &AclDiff,
    ) -> Result<(), Error> {
        self.dispatch(
            session,
            EventKind::AclUpdated {
                mailbox: MailboxRef::from(mailbox),
                diff: diff.clone(),
            },
        )
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::store::acl::EntryKey;

    #[test]
    fn acl_edits_dispatch_diffs() {
        let fixture = TestFixture::new();
        fixture.create("Shared");
        fixture.take_events();

        let path = fixture.path("Shared");
        let diff = fixture
            .engine
            .apply_acl_command(
                &fixture.session,
                &path,
                &AclCommand::add(EntryKey::user("bob"), "lr".parse().unwrap()),
            )
            .unwrap();
        assert_eq!(
            vec![(EntryKey::user("bob"), Rights::LOOKUP | Rights::READ)],
            diff.added_entries()
        );
        assert_eq!(vec!["AclUpdated"], fixture.take_events());

        // Removing rights nobody holds changes nothing and says nothing
        let diff = fixture
            .engine
            .apply_acl_command(
                &fixture.session,
                &path,
                &AclCommand::remove(EntryKey::user("carol"), Rights::READ),
            )
            .unwrap();
        assert!(diff.is_empty());
        assert!(fixture.take_events().is_empty());

        let bob = MailboxSession::new("bob");
        let delegated = fixture
            .engine
            .delegated_mailboxes(&bob, Rights::READ)
            .unwrap();
        assert_eq!(
            vec![path.clone()],
            delegated.into_iter().map(|mb| mb.path).collect::<Vec<_>>()
        );
        assert!(fixture
            .engine
            .delegated_mailboxes(&fixture.session, Rights::READ)
            .unwrap()
            .is_empty());

        let diff = fixture
            .engine
            .set_acl(&fixture.session, &path, MailboxAcl::owner_full_rights())
            .unwrap();
        assert_eq!(
            vec![(EntryKey::user("bob"), Rights::LOOKUP | Rights::READ)],
            diff.removed_entries()
        );
        assert_eq!(
            MailboxAcl::owner_full_rights(),
            fixture.engine.get_acl(&path).unwrap()
        );
        assert!(fixture
            .engine
            .delegated_mailboxes(&bob, Rights::READ)
            .unwrap()
            .is_empty());
    }

    #[test]
    fn acl_of_missing_mailbox() {
        let fixture = TestFixture::new();
        assert_matches!(
            Err(Error::NxMailbox),
            fixture.engine.set_acl(
                &fixture.session,
                &fixture.path("nowhere"),
                MailboxAcl::new()
            )
        );
    }
}
