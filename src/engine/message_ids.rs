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

//! Operations addressing a message by its `MessageId` rather than by its
//! place in one mailbox.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::convert::TryFrom;

use log::info;

use super::defs::*;
use super::flags::client_flags;
use crate::events::{EventKind, MailboxRef};
use crate::quota::{QuotaRoot, QuotaUsage};
use crate::store::model::*;
use crate::support::error::Error;

impl Engine {
    /// Every placement of each of `ids`.
    pub fn get_messages(
        &self,
        ids: &[MessageId],
        fetch: FetchType,
    ) -> Result<Vec<MailboxMessage>, Error> {
        self.backend.message_ids.find(ids, fetch)
    }

    /// Update the flags of the placements of `id` within `mailboxes`.
    pub fn set_flags_by_id(
        &self,
        session: &MailboxSession,
        id: MessageId,
        mailboxes: &[MailboxId],
        mode: FlagsUpdateMode,
        flags: &Flags,
    ) -> Result<BTreeMap<MailboxId, Vec<UpdatedFlags>>, Error> {
        if self.backend.message_ids.find_mailboxes(id)?.is_empty() {
            return Err(Error::NxMessage);
        }

        let updated = self.backend.message_ids.set_flags(
            id,
            mailboxes,
            &client_flags(flags),
            mode,
        )?;

        for (&mailbox_id, changes) in &updated {
            let mailbox = self.backend.mailboxes.find_by_id(mailbox_id)?;
            self.dispatch(
                session,
                EventKind::FlagsUpdated {
                    mailbox: MailboxRef::from(&mailbox),
                    updated: changes.clone(),
                },
            )?;
        }

        Ok(updated)
    }

    /// Remove every placement of `id` within `mailboxes`.
    ///
    /// The quota of all removed rows is released before any event goes
    /// out, so a failing listener cannot leave usage behind the store.
    pub fn delete_by_id(
        &self,
        session: &MailboxSession,
        id: MessageId,
        mailboxes: &[MailboxId],
    ) -> Result<BTreeMap<MailboxId, BTreeMap<Uid, MessageMetaData>>, Error> {
        let deleted = self.backend.message_ids.delete(id, mailboxes)?;
        let released = self.release_removals(deleted.clone())?;
        for root in self.announce_removals(session, released)? {
            self.dispatch_quota_update(session, &root)?;
        }
        Ok(deleted)
    }

    /// Make `targets` exactly the set of mailboxes in which `id` is placed.
    ///
    /// New placements get fresh UIDs and `\Recent`; placements outside
    /// `targets` are removed. Quota is checked for every root whose usage
    /// grows on balance, before anything changes.
    pub fn set_in_mailboxes(
        &self,
        session: &MailboxSession,
        id: MessageId,
        targets: &[MailboxId],
    ) -> Result<(), Error> {
        let placements = self
            .backend
            .message_ids
            .find(&[id], FetchType::Full)?;
        let template = placements.first().cloned().ok_or(Error::NxMessage)?;

        let current = placements
            .iter()
            .map(|m| m.mailbox_id)
            .collect::<BTreeSet<_>>();
        let wanted = targets.iter().copied().collect::<BTreeSet<_>>();

        let mut additions = Vec::new();
        for &mailbox_id in wanted.difference(&current) {
            additions.push(self.backend.mailboxes.find_by_id(mailbox_id)?);
        }
        let removals = current.difference(&wanted).copied().collect::<Vec<_>>();

        if additions.is_empty() && removals.is_empty() {
            return Ok(());
        }

        self.check_net_growth(session, &template, &additions, &removals)?;

        let mut added = Vec::new();
        for mailbox in &additions {
            let mut copy = template.copy_to(mailbox.id);
            copy.mod_seq = self.backend.mod_seqs.next_mod_seq(mailbox.id)?;
            copy.uid = self.backend.uids.next_uid(mailbox.id)?;
            copy.flags.insert(Flag::Recent);

            if let Some(meta) =
                self.backend.message_ids.copy_in_mailbox(copy, mailbox)?
            {
                let root = self.resolver.quota_root(&mailbox.path)?;
                self.quota
                    .current()
                    .increase(&root, QuotaUsage::new(1, meta.size))?;
                added.push((mailbox, root, meta));
            }
        }

        let deleted = self.backend.message_ids.delete(id, &removals)?;
        let released = self.release_removals(deleted)?;

        let mut touched = Vec::<QuotaRoot>::new();
        for (mailbox, root, meta) in added {
            let mut map = BTreeMap::new();
            map.insert(meta.uid, meta);
            self.dispatch(
                session,
                EventKind::Added {
                    mailbox: MailboxRef::from(mailbox),
                    added: map,
                    is_delivery: false,
                    is_appended: false,
                    moved_from: None,
                },
            )?;
            if !touched.contains(&root) {
                touched.push(root);
            }
        }

        for root in self.announce_removals(session, released)? {
            if !touched.contains(&root) {
                touched.push(root);
            }
        }

        self.dispatch(
            session,
            EventKind::MessageMoved {
                message_ids: vec![id],
                previous: current.into_iter().collect(),
                current: wanted.into_iter().collect(),
            },
        )?;

        for root in &touched {
            self.dispatch_quota_update(session, root)?;
        }
        Ok(())
    }

    fn check_net_growth(
        &self,
        session: &MailboxSession,
        template: &MailboxMessage,
        additions: &[Mailbox],
        removals: &[MailboxId],
    ) -> Result<(), Error> {
        let size = i64::try_from(template.size).unwrap_or(i64::MAX);
        let mut deltas = HashMap::<QuotaRoot, (i64, i64)>::new();
        for mailbox in additions {
            let delta = deltas
                .entry(self.resolver.quota_root(&mailbox.path)?)
                .or_default();
            delta.0 += 1;
            delta.1 = delta.1.saturating_add(size);
        }
        for &mailbox_id in removals {
            let mailbox = self.backend.mailboxes.find_by_id(mailbox_id)?;
            let delta = deltas
                .entry(self.resolver.quota_root(&mailbox.path)?)
                .or_default();
            delta.0 -= 1;
            delta.1 = delta.1.saturating_sub(size);
        }

        for (root, (count, size)) in deltas {
            if count <= 0 && size <= 0 {
                continue;
            }

            let mut checker = self.quota.checker(&root)?;
            if let Err(e) =
                checker.try_addition(count.max(0) as u64, size.max(0) as u64)
            {
                info!(
                    "{} Rejected placement of {} in root {}: {}",
                    session.log_prefix, template.message_id, root, e
                );
                return Err(e);
            }
        }

        Ok(())
    }

    /// Release the quota held by removed placements, pairing each mailbox
    /// which lost rows with its quota root.
    fn release_removals(
        &self,
        deleted: BTreeMap<MailboxId, BTreeMap<Uid, MessageMetaData>>,
    ) -> Result<Vec<Removal>, Error> {
        let mut removals = Vec::with_capacity(deleted.len());
        for (mailbox_id, expunged) in deleted {
            let mailbox = self.backend.mailboxes.find_by_id(mailbox_id)?;
            let root = self.resolver.quota_root(&mailbox.path)?;
            removals.push(Removal {
                mailbox,
                root,
                expunged,
            });
        }

        for removal in &removals {
            self.release(&removal.root, removal.expunged.values())?;
        }
        Ok(removals)
    }

    /// Dispatch `Expunged` for each mailbox of `removals`, returning the
    /// distinct roots whose usage changed.
    fn announce_removals(
        &self,
        session: &MailboxSession,
        removals: Vec<Removal>,
    ) -> Result<Vec<QuotaRoot>, Error> {
        let mut touched = Vec::<QuotaRoot>::new();
        for removal in removals {
            self.dispatch(
                session,
                EventKind::Expunged {
                    mailbox: MailboxRef::from(&removal.mailbox),
                    expunged: removal.expunged,
                    moved_to: None,
                },
            )?;

            if !touched.contains(&removal.root) {
                touched.push(removal.root);
            }
        }

        Ok(touched)
    }
}

/// The rows one mailbox lost, already released from its quota root.
struct Removal {
    mailbox: Mailbox,
    root: QuotaRoot,
    expunged: BTreeMap<Uid, MessageMetaData>,
}

#[cfg(test)]
mod test {
    use std::sync::Arc;

    use super::*;
    use crate::events::Group;
    use crate::quota::{QuotaKind, QuotaScope};

    struct Placed {
        fixture: TestFixture,
        id: MessageId,
        inbox: Mailbox,
        archive: Mailbox,
        trash: Mailbox,
    }

    fn placed() -> Placed {
        let fixture = TestFixture::new();
        let inbox = fixture.create("INBOX");
        let archive = fixture.create("Archive");
        let trash = fixture.create("Trash");
        let id = fixture
            .append_flagged(
                "INBOX",
                "Subject: x\r\n\r\n",
                Flags::new().with(Flag::Seen),
            )
            .message_id;
        fixture.take_events();

        Placed {
            fixture,
            id,
            inbox,
            archive,
            trash,
        }
    }

    #[test]
    fn set_in_mailboxes_adds_and_removes() {
        let p = placed();
        p.fixture
            .engine
            .set_in_mailboxes(
                &p.fixture.session,
                p.id,
                &[p.archive.id, p.trash.id],
            )
            .unwrap();

        assert!(p.fixture.uids("INBOX").is_empty());
        assert_eq!(vec![1], p.fixture.uids("Archive"));
        assert_eq!(vec![1], p.fixture.uids("Trash"));
        assert_eq!(QuotaUsage::new(2, 28), p.fixture.usage());

        let placements = p
            .fixture
            .engine
            .get_messages(&[p.id], FetchType::Metadata)
            .unwrap();
        assert_eq!(2, placements.len());
        assert!(placements.iter().all(|m| m.flags.contains(&Flag::Recent)
            && m.flags.contains(&Flag::Seen)));

        assert_eq!(
            vec![
                "Added",
                "Added",
                "Expunged",
                "MessageMoved",
                "QuotaUsageUpdated"
            ],
            p.fixture.take_events()
        );

        // Asking for the current state again is a no-op
        p.fixture
            .engine
            .set_in_mailboxes(
                &p.fixture.session,
                p.id,
                &[p.trash.id, p.archive.id],
            )
            .unwrap();
        assert!(p.fixture.take_events().is_empty());
    }

    #[test]
    fn set_in_mailboxes_checks_net_growth() {
        let p = placed();
        let root = p.fixture.root();
        p.fixture
            .engine
            .quota()
            .max()
            .set_limit(QuotaScope::Root(&root), QuotaKind::Count, Some(1))
            .unwrap();

        // Moving within the root is fine even though the root is full
        p.fixture
            .engine
            .set_in_mailboxes(&p.fixture.session, p.id, &[p.archive.id])
            .unwrap();
        assert_eq!(vec![1], p.fixture.uids("Archive"));

        assert_matches!(
            Err(Error::OverQuota(QuotaKind::Count)),
            p.fixture.engine.set_in_mailboxes(
                &p.fixture.session,
                p.id,
                &[p.archive.id, p.inbox.id],
            )
        );
        assert!(p.fixture.uids("INBOX").is_empty());
        assert_eq!(QuotaUsage::new(1, 14), p.fixture.usage());
    }

    #[test]
    fn unknown_message() {
        let p = placed();
        let nobody = MessageId(0x1234);
        assert_matches!(
            Err(Error::NxMessage),
            p.fixture
                .engine
                .set_in_mailboxes(&p.fixture.session, nobody, &[p.inbox.id])
        );
        assert_matches!(
            Err(Error::NxMessage),
            p.fixture.engine.set_flags_by_id(
                &p.fixture.session,
                nobody,
                &[p.inbox.id],
                FlagsUpdateMode::Add,
                &Flags::new().with(Flag::Seen),
            )
        );
    }

    #[test]
    fn flags_by_id_only_report_changes() {
        let p = placed();
        p.fixture
            .engine
            .set_in_mailboxes(
                &p.fixture.session,
                p.id,
                &[p.inbox.id, p.archive.id],
            )
            .unwrap();
        p.fixture
            .engine
            .set_flags(
                &p.fixture.session,
                &p.fixture.path("Archive"),
                MessageRange::All,
                FlagsUpdateMode::Add,
                &Flags::new().with(Flag::Flagged),
            )
            .unwrap();
        p.fixture.take_events();

        let updated = p
            .fixture
            .engine
            .set_flags_by_id(
                &p.fixture.session,
                p.id,
                &[p.inbox.id, p.archive.id],
                FlagsUpdateMode::Add,
                &Flags::new().with(Flag::Flagged),
            )
            .unwrap();
        assert_eq!(
            vec![p.inbox.id],
            updated.keys().copied().collect::<Vec<_>>()
        );
        assert_eq!(vec!["FlagsUpdated"], p.fixture.take_events());
    }

    #[test]
    fn delete_by_id_releases_quota() {
        let p = placed();
        p.fixture
            .engine
            .set_in_mailboxes(
                &p.fixture.session,
                p.id,
                &[p.inbox.id, p.trash.id],
            )
            .unwrap();
        p.fixture.take_events();

        let deleted = p
            .fixture
            .engine
            .delete_by_id(&p.fixture.session, p.id, &[p.trash.id])
            .unwrap();
        assert_eq!(
            vec![p.trash.id],
            deleted.keys().copied().collect::<Vec<_>>()
        );
        assert_eq!(QuotaUsage::new(1, 14), p.fixture.usage());
        assert_eq!(
            vec!["Expunged", "QuotaUsageUpdated"],
            p.fixture.take_events()
        );
        assert_eq!(
            vec![p.inbox.id],
            p.fixture
                .engine
                .get_messages(&[p.id], FetchType::Metadata)
                .unwrap()
                .into_iter()
                .map(|m| m.mailbox_id)
                .collect::<Vec<_>>()
        );
    }

    #[test]
    fn failing_listener_leaves_quota_in_step() {
        let p = placed();
        p.fixture
            .engine
            .set_in_mailboxes(
                &p.fixture.session,
                p.id,
                &[p.inbox.id, p.archive.id],
            )
            .unwrap();
        assert_eq!(QuotaUsage::new(2, 28), p.fixture.usage());
        p.fixture.engine.events().register(
            Arc::new(test_support::FailOn("Expunged")),
            Group::new("audit"),
        );
        p.fixture.take_events();

        assert_matches!(
            Err(Error::ListenerFailed(_)),
            p.fixture.engine.delete_by_id(
                &p.fixture.session,
                p.id,
                &[p.inbox.id, p.archive.id],
            )
        );
        // The rows are gone and so is every byte they held
        assert!(p
            .fixture
            .engine
            .get_messages(&[p.id], FetchType::Metadata)
            .unwrap()
            .is_empty());
        assert_eq!(QuotaUsage::new(0, 0), p.fixture.usage());
        assert_eq!(
            QuotaUsage::new(0, 0),
            p.fixture
                .engine
                .recompute_quota(&p.fixture.session, &p.fixture.root())
                .unwrap()
        );
    }

    #[test]
    fn delete_by_id_removes_every_copy_in_a_mailbox() {
        let p = placed();
        p.fixture
            .engine
            .copy_messages(
                &p.fixture.session,
                &p.fixture.path("INBOX"),
                MessageRange::All,
                &p.fixture.path("INBOX"),
            )
            .unwrap();
        assert_eq!(vec![1, 2], p.fixture.uids("INBOX"));
        assert_eq!(QuotaUsage::new(2, 28), p.fixture.usage());
        p.fixture.take_events();

        let deleted = p
            .fixture
            .engine
            .delete_by_id(&p.fixture.session, p.id, &[p.inbox.id])
            .unwrap();
        assert_eq!(
            vec![Uid::u(1), Uid::u(2)],
            deleted[&p.inbox.id].keys().copied().collect::<Vec<_>>()
        );
        assert!(p.fixture.uids("INBOX").is_empty());
        assert_eq!(QuotaUsage::new(0, 0), p.fixture.usage());

        let events = p.fixture.recorder.take();
        assert_eq!(
            vec!["Expunged", "QuotaUsageUpdated"],
            events.iter().map(|e| e.name()).collect::<Vec<_>>()
        );
        match events[0].kind {
            EventKind::Expunged { ref expunged, .. } => {
                assert_eq!(2, expunged.len());
            },
            ref other => panic!("Unexpected event {:?}", other),
        }
    }
}
