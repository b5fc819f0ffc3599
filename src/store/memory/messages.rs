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

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Arc, Mutex, RwLock};

use crate::store::mapper::{
    MessageIdentityIndex, MessageStore, ModSeqProvider, UidProvider,
};
use crate::store::model::*;
use crate::support::error::Error;

type Rows = BTreeMap<Uid, MailboxMessage>;
type Placements = HashMap<MessageId, BTreeSet<(MailboxId, Uid)>>;

/// Message rows of every mailbox, plus the placement index by `MessageId`.
///
/// Each mailbox's rows have their own lock. When both are held, the rows
/// lock of exactly one mailbox is taken before the placement lock.
pub struct MemoryMessageStore {
    uids: Arc<dyn UidProvider>,
    mod_seqs: Arc<dyn ModSeqProvider>,
    mailboxes: RwLock<HashMap<MailboxId, Arc<Mutex<Rows>>>>,
    placements: Mutex<Placements>,
}

impl MemoryMessageStore {
    pub fn new(
        uids: Arc<dyn UidProvider>,
        mod_seqs: Arc<dyn ModSeqProvider>,
    ) -> Self {
        Self {
            uids,
            mod_seqs,
            mailboxes: RwLock::new(HashMap::new()),
            placements: Mutex::new(HashMap::new()),
        }
    }

    fn rows(&self, mailbox: MailboxId) -> Arc<Mutex<Rows>> {
        if let Some(rows) = self
            .mailboxes
            .read()
            .expect("message table poisoned")
            .get(&mailbox)
        {
            return Arc::clone(rows);
        }

        Arc::clone(
            self.mailboxes
                .write()
                .expect("message table poisoned")
                .entry(mailbox)
                .or_default(),
        )
    }

    fn with_rows<R>(
        &self,
        mailbox: MailboxId,
        f: impl FnOnce(&mut Rows) -> R,
    ) -> R {
        let rows = self.rows(mailbox);
        let mut rows = rows.lock().expect("mailbox rows poisoned");
        f(&mut rows)
    }

    fn placements(&self) -> std::sync::MutexGuard<'_, Placements> {
        self.placements.lock().expect("placement index poisoned")
    }

    fn placements_of(&self, id: MessageId) -> Vec<(MailboxId, Uid)> {
        self.placements()
            .get(&id)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Insert `message` into `rows`, keeping the placement index in step.
    /// Must be called with the rows lock of `message.mailbox_id` held.
    fn insert_row(
        &self,
        rows: &mut Rows,
        message: MailboxMessage,
    ) -> MessageMetaData {
        let meta = message.metadata();
        let key = (message.mailbox_id, message.uid);
        let message_id = message.message_id;

        let mut placements = self.placements();
        if let Some(displaced) = rows.insert(message.uid, message) {
            unplace(&mut placements, displaced.message_id, key);
        }
        placements.entry(message_id).or_default().insert(key);
        meta
    }

    /// Remove the row at `uid`. Must be called with the rows lock of
    /// `mailbox` held.
    ///
    /// An expunge is a visible mutation, so the mailbox's ModSeq advances
    /// and the returned row carries the new value.
    fn remove_row(
        &self,
        rows: &mut Rows,
        mailbox: MailboxId,
        uid: Uid,
    ) -> Result<Option<MailboxMessage>, Error> {
        let mut removed = match rows.remove(&uid) {
            Some(removed) => removed,
            None => return Ok(None),
        };
        unplace(&mut self.placements(), removed.message_id, (mailbox, uid));
        removed.mod_seq = self.mod_seqs.next_mod_seq(mailbox)?;
        Ok(Some(removed))
    }

    fn assign(
        &self,
        mailbox: &Mailbox,
        mut message: MailboxMessage,
    ) -> Result<MailboxMessage, Error> {
        message.mailbox_id = mailbox.id;
        message.uid = self.uids.next_uid(mailbox.id)?;
        message.mod_seq = self.mod_seqs.next_mod_seq(mailbox.id)?;
        Ok(message)
    }

    /// Apply `mode` to the row at `uid`, allocating a ModSeq only if its
    /// flags actually change.
    fn update_row_flags(
        &self,
        mailbox: MailboxId,
        row: &mut MailboxMessage,
        flags: &Flags,
        mode: FlagsUpdateMode,
    ) -> Result<Option<UpdatedFlags>, Error> {
        let new_flags = mode.apply(&row.flags, flags);
        if new_flags == row.flags {
            return Ok(None);
        }

        let mod_seq = self.mod_seqs.next_mod_seq(mailbox)?;
        let old_flags = std::mem::replace(&mut row.flags, new_flags.clone());
        row.mod_seq = mod_seq;
        Ok(Some(UpdatedFlags {
            uid: row.uid,
            message_id: row.message_id,
            mod_seq,
            old_flags,
            new_flags,
        }))
    }
}

fn unplace(
    placements: &mut Placements,
    message_id: MessageId,
    key: (MailboxId, Uid),
) {
    if let Some(set) = placements.get_mut(&message_id) {
        set.remove(&key);
        if set.is_empty() {
            placements.remove(&message_id);
        }
    }
}

fn in_range(
    rows: &Rows,
    range: MessageRange,
) -> impl Iterator<Item = (&Uid, &MailboxMessage)> + '_ {
    let (lo, hi) = range.bounds();
    rows.range(lo..=hi)
}

impl MessageStore for MemoryMessageStore {
    fn save(
        &self,
        mailbox: &Mailbox,
        mut message: MailboxMessage,
    ) -> Result<MessageMetaData, Error> {
        message.mailbox_id = mailbox.id;
        Ok(self.with_rows(mailbox.id, |rows| self.insert_row(rows, message)))
    }

    fn add(
        &self,
        mailbox: &Mailbox,
        message: MailboxMessage,
    ) -> Result<MessageMetaData, Error> {
        let message = self.assign(mailbox, message)?;
        self.save(mailbox, message)
    }

    fn copy(
        &self,
        mailbox: &Mailbox,
        original: &MailboxMessage,
    ) -> Result<MessageMetaData, Error> {
        let mut copy = original.copy_to(mailbox.id);
        copy.flags.insert(Flag::Recent);
        self.add(mailbox, copy)
    }

    fn move_message(
        &self,
        mailbox: &Mailbox,
        original: &MailboxMessage,
    ) -> Result<(MessageMetaData, Option<MessageMetaData>), Error> {
        let meta = self.copy(mailbox, original)?;
        let removed = self.with_rows(original.mailbox_id, |rows| {
            self.remove_row(rows, original.mailbox_id, original.uid)
        })?;
        Ok((meta, removed.map(|m| m.metadata())))
    }

    fn find_in_mailbox(
        &self,
        mailbox: &Mailbox,
        range: MessageRange,
        fetch: FetchType,
        limit: usize,
    ) -> Result<Vec<MailboxMessage>, Error> {
        let limit = if 0 == limit { usize::MAX } else { limit };
        Ok(self.with_rows(mailbox.id, |rows| {
            in_range(rows, range)
                .take(limit)
                .map(|(_, m)| m.projected(fetch))
                .collect()
        }))
    }

    fn find_recent_message_uids_in_mailbox(
        &self,
        mailbox: &Mailbox,
    ) -> Result<Vec<Uid>, Error> {
        Ok(self.with_rows(mailbox.id, |rows| {
            rows.values()
                .filter(|m| m.flags.contains(&Flag::Recent))
                .map(|m| m.uid)
                .collect()
        }))
    }

    fn find_first_unseen_message_uid(
        &self,
        mailbox: &Mailbox,
    ) -> Result<Option<Uid>, Error> {
        Ok(self.with_rows(mailbox.id, |rows| {
            rows.values()
                .find(|m| !m.flags.contains(&Flag::Seen))
                .map(|m| m.uid)
        }))
    }

    fn retrieve_messages_marked_for_deletion(
        &self,
        mailbox: &Mailbox,
        range: MessageRange,
    ) -> Result<Vec<Uid>, Error> {
        Ok(self.with_rows(mailbox.id, |rows| {
            in_range(rows, range)
                .filter(|(_, m)| m.flags.contains(&Flag::Deleted))
                .map(|(&uid, _)| uid)
                .collect()
        }))
    }

    fn delete_messages(
        &self,
        mailbox: &Mailbox,
        uids: &[Uid],
    ) -> Result<BTreeMap<Uid, MessageMetaData>, Error> {
        self.with_rows(mailbox.id, |rows| {
            let mut deleted = BTreeMap::new();
            for &uid in uids {
                if let Some(m) = self.remove_row(rows, mailbox.id, uid)? {
                    deleted.insert(m.uid, m.metadata());
                }
            }
            Ok(deleted)
        })
    }

    fn purge_mailbox(
        &self,
        mailbox: &Mailbox,
    ) -> Result<BTreeMap<Uid, MessageMetaData>, Error> {
        let rows = match self
            .mailboxes
            .write()
            .expect("message table poisoned")
            .remove(&mailbox.id)
        {
            Some(rows) => rows,
            None => return Ok(BTreeMap::new()),
        };

        let rows =
            std::mem::take(&mut *rows.lock().expect("mailbox rows poisoned"));
        let mut placements = self.placements();
        Ok(rows
            .into_iter()
            .map(|(uid, row)| {
                unplace(&mut placements, row.message_id, (mailbox.id, uid));
                (uid, row.metadata())
            })
            .collect())
    }

    fn update_flags(
        &self,
        mailbox: &Mailbox,
        mode: FlagsUpdateMode,
        flags: &Flags,
        range: MessageRange,
    ) -> Result<Vec<UpdatedFlags>, Error> {
        let (lo, hi) = range.bounds();
        self.with_rows(mailbox.id, |rows| -> Result<_, Error> {
            let mut updated = Vec::new();
            for row in rows.range_mut(lo..=hi).map(|(_, row)| row) {
                if let Some(u) =
                    self.update_row_flags(mailbox.id, row, flags, mode)?
                {
                    updated.push(u);
                }
            }
            Ok(updated)
        })
    }

    fn count_messages_in_mailbox(
        &self,
        mailbox: &Mailbox,
    ) -> Result<u64, Error> {
        Ok(self.with_rows(mailbox.id, |rows| rows.len() as u64))
    }

    fn count_unseen_messages_in_mailbox(
        &self,
        mailbox: &Mailbox,
    ) -> Result<u64, Error> {
        Ok(self.with_rows(mailbox.id, |rows| {
            rows.values()
                .filter(|m| !m.flags.contains(&Flag::Seen))
                .count() as u64
        }))
    }

    fn mailbox_counters(
        &self,
        mailbox: &Mailbox,
    ) -> Result<MailboxCounters, Error> {
        Ok(self.with_rows(mailbox.id, |rows| MailboxCounters {
            mailbox_id: mailbox.id,
            count: rows.len() as u64,
            unseen: rows
                .values()
                .filter(|m| !m.flags.contains(&Flag::Seen))
                .count() as u64,
        }))
    }

    fn get_applicable_flag(&self, mailbox: &Mailbox) -> Result<Flags, Error> {
        Ok(self.with_rows(mailbox.id, |rows| {
            let mut flags = Flags::new();
            for row in rows.values() {
                flags.extend(&row.flags);
            }
            flags
        }))
    }
}

impl MessageIdentityIndex for MemoryMessageStore {
    fn find(
        &self,
        ids: &[MessageId],
        fetch: FetchType,
    ) -> Result<Vec<MailboxMessage>, Error> {
        let mut found = Vec::new();
        for &id in ids {
            for (mailbox, uid) in self.placements_of(id) {
                // The row may have been removed since the snapshot
                if let Some(m) = self.with_rows(mailbox, |rows| {
                    rows.get(&uid)
                        .filter(|m| m.message_id == id)
                        .map(|m| m.projected(fetch))
                }) {
                    found.push(m);
                }
            }
        }
        Ok(found)
    }

    fn find_mailboxes(&self, id: MessageId) -> Result<Vec<MailboxId>, Error> {
        let mailboxes = self
            .placements_of(id)
            .into_iter()
            .map(|(mailbox, _)| mailbox)
            .collect::<BTreeSet<_>>();
        Ok(mailboxes.into_iter().collect())
    }

    fn copy_in_mailbox(
        &self,
        mut message: MailboxMessage,
        mailbox: &Mailbox,
    ) -> Result<Option<MessageMetaData>, Error> {
        message.mailbox_id = mailbox.id;
        Ok(self.with_rows(mailbox.id, |rows| {
            let already_placed = self
                .placements()
                .get(&message.message_id)
                .map_or(false, |set| set.iter().any(|&(m, _)| m == mailbox.id));
            if already_placed {
                None
            } else {
                Some(self.insert_row(rows, message))
            }
        }))
    }

    fn delete(
        &self,
        id: MessageId,
        mailboxes: &[MailboxId],
    ) -> Result<BTreeMap<MailboxId, BTreeMap<Uid, MessageMetaData>>, Error> {
        let mut deleted = BTreeMap::<_, BTreeMap<_, _>>::new();
        for (mailbox, uid) in self.placements_of(id) {
            if !mailboxes.contains(&mailbox) {
                continue;
            }

            let removed = self.with_rows(mailbox, |rows| {
                if rows.get(&uid).map_or(false, |m| m.message_id == id) {
                    self.remove_row(rows, mailbox, uid)
                } else {
                    Ok(None)
                }
            })?;
            if let Some(removed) = removed {
                deleted
                    .entry(mailbox)
                    .or_default()
                    .insert(uid, removed.metadata());
            }
        }
        Ok(deleted)
    }

    fn set_flags(
        &self,
        id: MessageId,
        mailboxes: &[MailboxId],
        flags: &Flags,
        mode: FlagsUpdateMode,
    ) -> Result<BTreeMap<MailboxId, Vec<UpdatedFlags>>, Error> {
        let mut result = BTreeMap::<MailboxId, Vec<UpdatedFlags>>::new();
        for (mailbox, uid) in self.placements_of(id) {
            if !mailboxes.contains(&mailbox) {
                continue;
            }

            let updated = self.with_rows(mailbox, |rows| {
                match rows.get_mut(&uid).filter(|m| m.message_id == id) {
                    Some(row) => {
                        self.update_row_flags(mailbox, row, flags, mode)
                    },
                    None => Ok(None),
                }
            })?;
            if let Some(updated) = updated {
                result.entry(mailbox).or_default().push(updated);
            }
        }
        Ok(result)
    }
}

#[cfg(test)]
mod test {
    use chrono::prelude::*;

    use super::*;
    use crate::store::acl::MailboxAcl;
    use crate::store::memory::identifiers::{
        MemoryModSeqProvider, MemoryUidProvider,
    };

    struct Setup {
        store: MemoryMessageStore,
        mod_seqs: Arc<MemoryModSeqProvider>,
        a: Mailbox,
        b: Mailbox,
    }

    fn mailbox(id: u64, name: &str) -> Mailbox {
        Mailbox {
            id: MailboxId(id),
            path: MailboxPath::for_user("alice", name),
            uid_validity: UidValidity(1),
            acl: MailboxAcl::owner_full_rights(),
        }
    }

    fn set_up() -> Setup {
        let mod_seqs = Arc::new(MemoryModSeqProvider::new());
        Setup {
            store: MemoryMessageStore::new(
                Arc::new(MemoryUidProvider::new()),
                Arc::clone(&mod_seqs) as Arc<dyn ModSeqProvider>,
            ),
            mod_seqs,
            a: mailbox(1, "INBOX"),
            b: mailbox(2, "Archive"),
        }
    }

    fn message(
        mailbox: &Mailbox,
        content: &str,
        flags: Flags,
    ) -> MailboxMessage {
        MailboxMessage::new(
            mailbox.id,
            content.as_bytes().to_vec(),
            flags,
            Utc.ymd(2020, 1, 2).and_hms(3, 4, 5),
        )
    }

    #[test]
    fn save_and_find_round_trip() {
        let setup = set_up();
        let mut m = message(&setup.a, "Subject: x\r\n\r\nhello", Flags::new());
        m.uid = Uid::u(7);
        m.mod_seq = ModSeq(3);
        let saved = setup.store.save(&setup.a, m.clone()).unwrap();
        assert_eq!(m.metadata(), saved);

        let found = setup
            .store
            .find_in_mailbox(
                &setup.a,
                MessageRange::One(Uid::u(7)),
                FetchType::Full,
                0,
            )
            .unwrap();
        assert_eq!(1, found.len());
        let found = &found[0];
        assert_eq!(Uid::u(7), found.uid);
        assert_eq!(ModSeq(3), found.mod_seq);
        assert_eq!(m.message_id, found.message_id);
        assert_eq!(m.internal_date, found.internal_date);
        assert_eq!(&m.content[..], &found.content[..]);
        assert_eq!(
            vec![setup.a.id],
            setup.store.find_mailboxes(m.message_id).unwrap()
        );

        let headers = setup
            .store
            .find_in_mailbox(&setup.a, MessageRange::All, FetchType::Headers, 0)
            .unwrap();
        assert_eq!(b"Subject: x\r\n\r\n", &headers[0].content[..]);
    }

    #[test]
    fn add_range_and_limit() {
        let setup = set_up();
        for i in 0..5 {
            let flags = if i % 2 == 0 {
                Flags::new().with(Flag::Seen)
            } else {
                Flags::new().with(Flag::Deleted)
            };
            let meta = setup
                .store
                .add(&setup.a, message(&setup.a, "x", flags))
                .unwrap();
            assert_eq!(Uid::u(i + 1), meta.uid);
            assert_eq!(ModSeq(u64::from(i) + 1), meta.mod_seq);
        }

        let uids = |range, limit| {
            setup
                .store
                .find_in_mailbox(&setup.a, range, FetchType::Metadata, limit)
                .unwrap()
                .into_iter()
                .map(|m| m.uid.get())
                .collect::<Vec<_>>()
        };
        assert_eq!(vec![1, 2, 3, 4, 5], uids(MessageRange::All, 0));
        assert_eq!(vec![1, 2], uids(MessageRange::All, 2));
        assert_eq!(vec![4, 5], uids(MessageRange::From(Uid::u(4)), 0));
        assert_eq!(
            vec![2, 3],
            uids(MessageRange::Range(Uid::u(2), Uid::u(3)), 0)
        );
        assert!(uids(MessageRange::From(Uid::u(6)), 0).is_empty());

        assert_eq!(5, setup.store.count_messages_in_mailbox(&setup.a).unwrap());
        assert_eq!(
            2,
            setup.store.count_unseen_messages_in_mailbox(&setup.a).unwrap()
        );
        assert_eq!(
            MailboxCounters {
                mailbox_id: setup.a.id,
                count: 5,
                unseen: 2,
            },
            setup.store.mailbox_counters(&setup.a).unwrap()
        );
        assert_eq!(
            Some(Uid::u(2)),
            setup.store.find_first_unseen_message_uid(&setup.a).unwrap()
        );
        assert_eq!(
            vec![Uid::u(2), Uid::u(4)],
            setup
                .store
                .retrieve_messages_marked_for_deletion(
                    &setup.a,
                    MessageRange::All,
                )
                .unwrap()
        );
        assert_eq!(
            vec![Uid::u(4)],
            setup
                .store
                .retrieve_messages_marked_for_deletion(
                    &setup.a,
                    MessageRange::From(Uid::u(3))
                )
                .unwrap()
        );
        assert_eq!(
            Flags::new().with(Flag::Seen).with(Flag::Deleted),
            setup.store.get_applicable_flag(&setup.a).unwrap()
        );

        // Nothing leaked into the other mailbox
        assert_eq!(0, setup.store.count_messages_in_mailbox(&setup.b).unwrap());
        assert_eq!(
            None,
            setup.store.find_first_unseen_message_uid(&setup.b).unwrap()
        );
    }

    #[test]
    fn copy_and_move() {
        let setup = set_up();
        let original = setup
            .store
            .add(
                &setup.a,
                message(&setup.a, "x", Flags::new().with(Flag::Seen)),
            )
            .unwrap();
        let original = setup
            .store
            .find_in_mailbox(
                &setup.a,
                MessageRange::One(original.uid),
                FetchType::Full,
                0,
            )
            .unwrap()
            .remove(0);

        let copied = setup.store.copy(&setup.b, &original).unwrap();
        assert_eq!(Uid::MIN, copied.uid);
        assert_eq!(original.message_id, copied.message_id);
        assert!(copied.flags.contains(&Flag::Recent));
        assert!(copied.flags.contains(&Flag::Seen));
        assert_eq!(
            vec![Uid::MIN],
            setup.store.find_recent_message_uids_in_mailbox(&setup.b).unwrap()
        );
        assert_eq!(
            vec![setup.a.id, setup.b.id],
            setup.store.find_mailboxes(original.message_id).unwrap()
        );

        let (moved, removed) =
            setup.store.move_message(&setup.b, &original).unwrap();
        assert_eq!(Uid::u(2), moved.uid);
        assert_eq!(original.message_id, moved.message_id);
        let removed = removed.unwrap();
        assert_eq!(original.uid, removed.uid);
        // The removal is tagged with a fresh ModSeq of the source
        assert!(removed.mod_seq > original.mod_seq);
        assert_eq!(
            removed.mod_seq,
            setup.mod_seqs.highest_mod_seq(setup.a.id).unwrap()
        );

        // Moving a row that is already gone only copies it
        let (again, removed) =
            setup.store.move_message(&setup.b, &original).unwrap();
        assert_eq!(Uid::u(3), again.uid);
        assert_eq!(None, removed);
        assert_eq!(0, setup.store.count_messages_in_mailbox(&setup.a).unwrap());
        assert_eq!(2, setup.store.count_messages_in_mailbox(&setup.b).unwrap());
        assert_eq!(
            vec![setup.b.id],
            setup.store.find_mailboxes(original.message_id).unwrap()
        );
    }

    #[test]
    fn delete_only_reports_existing_rows() {
        let setup = set_up();
        let first = setup
            .store
            .add(&setup.a, message(&setup.a, "x", Flags::new()))
            .unwrap();
        setup
            .store
            .add(&setup.a, message(&setup.a, "y", Flags::new()))
            .unwrap();

        let deleted = setup
            .store
            .delete_messages(&setup.a, &[Uid::u(1), Uid::u(9)])
            .unwrap();
        assert_eq!(
            vec![Uid::u(1)],
            deleted.keys().copied().collect::<Vec<_>>()
        );
        assert_eq!(first.message_id, deleted[&Uid::u(1)].message_id);
        // The expunge itself is tagged with a fresh ModSeq
        assert!(deleted[&Uid::u(1)].mod_seq > first.mod_seq);
        assert_eq!(
            deleted[&Uid::u(1)].mod_seq,
            setup.mod_seqs.highest_mod_seq(setup.a.id).unwrap()
        );
        assert!(setup
            .store
            .find_mailboxes(first.message_id)
            .unwrap()
            .is_empty());
        assert!(setup
            .store
            .delete_messages(&setup.a, &[Uid::u(1)])
            .unwrap()
            .is_empty());
        assert_eq!(1, setup.store.count_messages_in_mailbox(&setup.a).unwrap());
    }

    #[test]
    fn flag_updates_only_touch_changed_rows() {
        let setup = set_up();
        setup
            .store
            .add(
                &setup.a,
                message(&setup.a, "x", Flags::new().with(Flag::Seen)),
            )
            .unwrap();
        setup
            .store
            .add(&setup.a, message(&setup.a, "y", Flags::new()))
            .unwrap();
        let before = setup.mod_seqs.highest_mod_seq(setup.a.id).unwrap();

        let updated = setup
            .store
            .update_flags(
                &setup.a,
                FlagsUpdateMode::Add,
                &Flags::new().with(Flag::Seen),
                MessageRange::All,
            )
            .unwrap();
        assert_eq!(1, updated.len());
        assert_eq!(Uid::u(2), updated[0].uid);
        assert_eq!(Flags::new(), updated[0].old_flags);
        assert_eq!(Flags::new().with(Flag::Seen), updated[0].new_flags);
        assert!(updated[0].mod_seq > before);
        assert_eq!(
            updated[0].mod_seq,
            setup.mod_seqs.highest_mod_seq(setup.a.id).unwrap()
        );

        // Repeating the request changes nothing and allocates nothing
        let after = setup.mod_seqs.highest_mod_seq(setup.a.id).unwrap();
        assert!(setup
            .store
            .update_flags(
                &setup.a,
                FlagsUpdateMode::Add,
                &Flags::new().with(Flag::Seen),
                MessageRange::All,
            )
            .unwrap()
            .is_empty());
        assert_eq!(after, setup.mod_seqs.highest_mod_seq(setup.a.id).unwrap());
    }

    #[test]
    fn identity_index_operations() {
        let setup = set_up();
        let meta = setup
            .store
            .add(&setup.a, message(&setup.a, "x", Flags::new()))
            .unwrap();
        let original = setup
            .store
            .find(&[meta.message_id], FetchType::Full)
            .unwrap()
            .remove(0);

        let mut placed = original.copy_to(setup.b.id);
        placed.uid = Uid::u(10);
        placed.mod_seq = ModSeq(10);
        let copied = setup
            .store
            .copy_in_mailbox(placed.clone(), &setup.b)
            .unwrap()
            .unwrap();
        assert_eq!(Uid::u(10), copied.uid);

        // A second placement in the same mailbox is refused
        placed.uid = Uid::u(11);
        assert_eq!(
            None,
            setup.store.copy_in_mailbox(placed, &setup.b).unwrap()
        );
        assert_eq!(1, setup.store.count_messages_in_mailbox(&setup.b).unwrap());

        let found =
            setup.store.find(&[meta.message_id], FetchType::Metadata).unwrap();
        assert_eq!(2, found.len());
        assert!(found.iter().all(|m| m.content.is_empty()));

        let updated = setup
            .store
            .set_flags(
                meta.message_id,
                &[setup.a.id],
                &Flags::new().with(Flag::Flagged),
                FlagsUpdateMode::Add,
            )
            .unwrap();
        assert_eq!(
            vec![setup.a.id],
            updated.keys().copied().collect::<Vec<_>>()
        );

        // No-op updates leave the map empty
        assert!(setup
            .store
            .set_flags(
                meta.message_id,
                &[setup.a.id, setup.b.id],
                &Flags::new(),
                FlagsUpdateMode::Add,
            )
            .unwrap()
            .is_empty());

        let deleted = setup
            .store
            .delete(meta.message_id, &[setup.b.id, MailboxId(99)])
            .unwrap();
        assert_eq!(
            vec![setup.b.id],
            deleted.keys().copied().collect::<Vec<_>>()
        );
        assert_eq!(
            vec![setup.a.id],
            setup.store.find_mailboxes(meta.message_id).unwrap()
        );
        assert!(setup
            .store
            .find(&[MessageId(12345)], FetchType::Full)
            .unwrap()
            .is_empty());
    }

    #[test]
    fn delete_reports_every_placement_in_a_mailbox() {
        let setup = set_up();
        let first = setup
            .store
            .add(&setup.a, message(&setup.a, "x", Flags::new()))
            .unwrap();
        let original = setup
            .store
            .find_in_mailbox(
                &setup.a,
                MessageRange::One(first.uid),
                FetchType::Full,
                0,
            )
            .unwrap()
            .remove(0);
        let second = setup.store.copy(&setup.a, &original).unwrap();
        setup.store.copy(&setup.b, &original).unwrap();

        let deleted = setup
            .store
            .delete(first.message_id, &[setup.a.id])
            .unwrap();
        assert_eq!(
            vec![setup.a.id],
            deleted.keys().copied().collect::<Vec<_>>()
        );
        assert_eq!(
            vec![first.uid, second.uid],
            deleted[&setup.a.id].keys().copied().collect::<Vec<_>>()
        );
        assert_eq!(0, setup.store.count_messages_in_mailbox(&setup.a).unwrap());
        assert_eq!(
            vec![setup.b.id],
            setup.store.find_mailboxes(first.message_id).unwrap()
        );
    }

    #[test]
    fn purge_drops_the_row_table() {
        let setup = set_up();
        let first = setup
            .store
            .add(&setup.a, message(&setup.a, "x", Flags::new()))
            .unwrap();
        setup
            .store
            .add(&setup.a, message(&setup.a, "yy", Flags::new()))
            .unwrap();
        let highest = setup.mod_seqs.highest_mod_seq(setup.a.id).unwrap();

        let purged = setup.store.purge_mailbox(&setup.a).unwrap();
        assert_eq!(
            vec![Uid::u(1), Uid::u(2)],
            purged.keys().copied().collect::<Vec<_>>()
        );
        assert_eq!(3, purged.values().map(|m| m.size).sum::<u64>());
        assert_eq!(
            highest,
            setup.mod_seqs.highest_mod_seq(setup.a.id).unwrap()
        );
        assert!(!setup
            .store
            .mailboxes
            .read()
            .unwrap()
            .contains_key(&setup.a.id));
        assert!(setup
            .store
            .find_mailboxes(first.message_id)
            .unwrap()
            .is_empty());

        assert!(setup.store.purge_mailbox(&setup.a).unwrap().is_empty());
    }
}
