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

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;

use crate::store::acl::{AclCommand, AclDiff, MailboxAcl, Rights};
use crate::store::mapper::{MailboxQuery, MailboxRepository};
use crate::store::model::*;
use crate::support::{error::Error, mailbox_paths::mailbox_path_matcher};

/// Mailbox metadata indexed by path and by id.
///
/// Both indices live under one lock so that a path is never visible without
/// its mailbox or vice versa.
pub struct MemoryMailboxRepository {
    tables: RwLock<Tables>,
    next_id: AtomicU64,
}

#[derive(Default)]
struct Tables {
    by_path: HashMap<MailboxPath, MailboxId>,
    by_id: HashMap<MailboxId, Mailbox>,
}

impl Default for MemoryMailboxRepository {
    fn default() -> Self {
        Self {
            tables: RwLock::new(Tables::default()),
            next_id: AtomicU64::new(1),
        }
    }
}

impl MemoryMailboxRepository {
    pub fn new() -> Self {
        Self::default()
    }

    fn modify_acl(
        &self,
        mailbox: &Mailbox,
        f: impl FnOnce(&MailboxAcl) -> MailboxAcl,
    ) -> Result<AclDiff, Error> {
        let mut tables = self.tables.write().expect("mailbox table poisoned");
        let stored = tables.by_id.get_mut(&mailbox.id).ok_or(Error::NxMailbox)?;
        let new = f(&stored.acl);
        let old = std::mem::replace(&mut stored.acl, new.clone());
        Ok(AclDiff::compute(old, new))
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, Tables> {
        self.tables.read().expect("mailbox table poisoned")
    }
}

impl MailboxRepository for MemoryMailboxRepository {
    fn create(
        &self,
        path: MailboxPath,
        uid_validity: UidValidity,
    ) -> Result<Mailbox, Error> {
        let mut tables = self.tables.write().expect("mailbox table poisoned");
        let tables = &mut *tables;
        match tables.by_path.entry(path.clone()) {
            Entry::Occupied(_) => Err(Error::MailboxExists),
            Entry::Vacant(vacant) => {
                let id = MailboxId(self.next_id.fetch_add(1, Ordering::SeqCst));
                let mailbox = Mailbox {
                    id,
                    path,
                    uid_validity,
                    acl: MailboxAcl::owner_full_rights(),
                };
                vacant.insert(id);
                tables.by_id.insert(id, mailbox.clone());
                Ok(mailbox)
            },
        }
    }

    fn find_by_path(&self, path: &MailboxPath) -> Result<Mailbox, Error> {
        let tables = self.read();
        tables
            .by_path
            .get(path)
            .and_then(|id| tables.by_id.get(id))
            .cloned()
            .ok_or(Error::NxMailbox)
    }

    fn find_by_id(&self, id: MailboxId) -> Result<Mailbox, Error> {
        self.read().by_id.get(&id).cloned().ok_or(Error::NxMailbox)
    }

    fn find_with_path_like(
        &self,
        query: &MailboxQuery,
    ) -> Result<Vec<Mailbox>, Error> {
        let matcher = mailbox_path_matcher(
            std::iter::once(query.pattern.as_str()),
            query.delimiter,
        );

        let mut found = self
            .read()
            .by_id
            .values()
            .filter(|mb| {
                mb.path.namespace == query.namespace
                    && mb.path.user == query.user
                    && matcher(&mb.path.name)
            })
            .cloned()
            .collect::<Vec<_>>();
        found.sort_by(|a, b| a.path.name.cmp(&b.path.name));
        Ok(found)
    }

    fn rename(&self, mailbox: &Mailbox) -> Result<Mailbox, Error> {
        let mut tables = self.tables.write().expect("mailbox table poisoned");
        let old_path = tables
            .by_id
            .get(&mailbox.id)
            .map(|mb| mb.path.clone())
            .ok_or(Error::NxMailbox)?;

        if old_path == mailbox.path {
            return tables
                .by_id
                .get(&mailbox.id)
                .cloned()
                .ok_or(Error::NxMailbox);
        }

        if tables.by_path.contains_key(&mailbox.path) {
            return Err(Error::MailboxExists);
        }

        tables.by_path.remove(&old_path);
        tables.by_path.insert(mailbox.path.clone(), mailbox.id);
        let stored = tables
            .by_id
            .get_mut(&mailbox.id)
            .ok_or(Error::NxMailbox)?;
        stored.path = mailbox.path.clone();
        Ok(stored.clone())
    }

    fn delete(&self, mailbox: &Mailbox) -> Result<(), Error> {
        let mut tables = self.tables.write().expect("mailbox table poisoned");
        let removed = tables.by_id.remove(&mailbox.id).ok_or(Error::NxMailbox)?;
        tables.by_path.remove(&removed.path);
        Ok(())
    }

    fn has_children(
        &self,
        mailbox: &Mailbox,
        delimiter: char,
    ) -> Result<bool, Error> {
        Ok(self
            .read()
            .by_id
            .values()
            .any(|mb| mb.path.is_descendant_of(&mailbox.path, delimiter)))
    }

    fn update_acl(
        &self,
        mailbox: &Mailbox,
        command: &AclCommand,
    ) -> Result<AclDiff, Error> {
        self.modify_acl(mailbox, |acl| acl.apply(command))
    }

    fn set_acl(
        &self,
        mailbox: &Mailbox,
        acl: MailboxAcl,
    ) -> Result<AclDiff, Error> {
        self.modify_acl(mailbox, |_| acl)
    }

    fn find_non_personal_mailboxes(
        &self,
        user: &str,
        right: Rights,
    ) -> Result<Vec<Mailbox>, Error> {
        let mut found = self
            .read()
            .by_id
            .values()
            .filter(|mb| {
                Some(user) != mb.path.user.as_deref()
                    && mb.acl.user_holds(user, right)
            })
            .cloned()
            .collect::<Vec<_>>();
        found.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(found)
    }

    fn list(&self) -> Result<Vec<Mailbox>, Error> {
        let mut all = self.read().by_id.values().cloned().collect::<Vec<_>>();
        all.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(all)
    }
}

#[cfg(test)]
mod test {
    use std::sync::Arc;

    use rayon::prelude::*;

    use super::*;
    use crate::store::acl::EntryKey;

    fn create(
        repo: &MemoryMailboxRepository,
        user: &str,
        name: &str,
    ) -> Mailbox {
        repo.create(MailboxPath::for_user(user, name), UidValidity(1))
            .unwrap()
    }

    #[test]
    fn test_mailbox_crud() {
        let repo = MemoryMailboxRepository::new();
        let inbox = create(&repo, "alice", "INBOX");
        let archive = create(&repo, "alice", "Archive");
        assert_ne!(inbox.id, archive.id);
        assert_eq!(MailboxAcl::owner_full_rights(), inbox.acl);

        assert_eq!(inbox, repo.find_by_id(inbox.id).unwrap());
        assert_eq!(
            archive,
            repo.find_by_path(&MailboxPath::for_user("alice", "Archive"))
                .unwrap()
        );
        assert_matches!(
            Err(Error::NxMailbox),
            repo.find_by_path(&MailboxPath::for_user("bob", "Archive"))
        );
        assert_matches!(Err(Error::NxMailbox), repo.find_by_id(MailboxId(99)));

        assert_matches!(
            Err(Error::MailboxExists),
            repo.create(MailboxPath::for_user("alice", "INBOX"), UidValidity(2))
        );
        // The original is untouched
        assert_eq!(inbox, repo.find_by_id(inbox.id).unwrap());

        // Same name, different owner, is a different path
        create(&repo, "bob", "INBOX");
        assert_eq!(3, repo.list().unwrap().len());

        repo.delete(&archive).unwrap();
        assert_matches!(Err(Error::NxMailbox), repo.find_by_id(archive.id));
        assert_matches!(Err(Error::NxMailbox), repo.delete(&archive));

        // The path is free again, and gets a new id
        let archive2 = create(&repo, "alice", "Archive");
        assert_ne!(archive.id, archive2.id);
    }

    #[test]
    fn concurrent_create_of_one_path() {
        let repo = Arc::new(MemoryMailboxRepository::new());
        let successes = (0..64)
            .into_par_iter()
            .filter(|_| {
                repo.create(
                    MailboxPath::for_user("alice", "foo"),
                    UidValidity(1),
                )
                    .is_ok()
            })
            .count();
        assert_eq!(1, successes);
    }

    #[test]
    fn test_rename() {
        let repo = MemoryMailboxRepository::new();
        let foo = create(&repo, "alice", "foo");
        create(&repo, "alice", "bar");

        let mut moved = foo.clone();
        moved.path = MailboxPath::for_user("alice", "bar");
        assert_matches!(Err(Error::MailboxExists), repo.rename(&moved));

        moved.path = MailboxPath::for_user("alice", "baz");
        let renamed = repo.rename(&moved).unwrap();
        assert_eq!(foo.id, renamed.id);
        assert_eq!(foo.uid_validity, renamed.uid_validity);
        assert_eq!("baz", renamed.path.name);
        assert_matches!(
            Err(Error::NxMailbox),
            repo.find_by_path(&MailboxPath::for_user("alice", "foo"))
        );
        assert_eq!(
            foo.id,
            repo.find_by_path(&MailboxPath::for_user("alice", "baz"))
                .unwrap()
                .id
        );

        let mut ghost = moved.clone();
        ghost.id = MailboxId(1000);
        assert_matches!(Err(Error::NxMailbox), repo.rename(&ghost));
    }

    #[test]
    fn test_path_like_and_children() {
        let repo = MemoryMailboxRepository::new();
        let archive = create(&repo, "alice", "Archive");
        create(&repo, "alice", "Archive.2019");
        create(&repo, "alice", "Archive.2020");
        create(&repo, "alice", "Archive.2020.01");
        let archived = create(&repo, "alice", "Archived");
        create(&repo, "bob", "Archive.2021");

        let names = |pattern: &str| {
            repo.find_with_path_like(&MailboxQuery::private(
                "alice", pattern, '.',
            ))
            .unwrap()
            .into_iter()
            .map(|mb| mb.path.name)
            .collect::<Vec<_>>()
        };

        assert_eq!(
            vec!["Archive.2019", "Archive.2020", "Archive.2020.01"],
            names("Archive.*")
        );
        assert_eq!(vec!["Archive.2019", "Archive.2020"], names("Archive.%"));
        assert_eq!(vec!["Archive", "Archived"], names("Arch%"));
        assert!(names("Nothing*").is_empty());

        assert!(repo.has_children(&archive, '.').unwrap());
        assert!(!repo.has_children(&archived, '.').unwrap());
    }

    #[test]
    fn test_acl() {
        let repo = MemoryMailboxRepository::new();
        let shared = create(&repo, "alice", "Shared");
        create(&repo, "alice", "Private");
        let bob_own = create(&repo, "bob", "INBOX");

        let bob = EntryKey::user("bob");
        let diff = repo
            .update_acl(
                &shared,
                &AclCommand::add(bob.clone(), Rights::LOOKUP | Rights::READ),
            )
            .unwrap();
        assert_eq!(
            vec![(bob.clone(), Rights::LOOKUP | Rights::READ)],
            diff.added_entries()
        );
        assert_eq!(
            Rights::LOOKUP | Rights::READ,
            repo.find_by_id(shared.id).unwrap().acl.get(&bob)
        );

        // A redundant edit produces an empty diff
        let diff = repo
            .update_acl(&shared, &AclCommand::add(bob.clone(), Rights::READ))
            .unwrap();
        assert!(diff.is_empty());

        let delegated = repo
            .find_non_personal_mailboxes("bob", Rights::READ)
            .unwrap();
        assert_eq!(
            vec![shared.id],
            delegated.iter().map(|m| m.id).collect::<Vec<_>>()
        );

        // Bob's own mailbox never counts as delegated, whatever its ACL says
        repo.update_acl(&bob_own, &AclCommand::add(bob.clone(), Rights::READ))
            .unwrap();
        assert_eq!(
            1,
            repo.find_non_personal_mailboxes("bob", Rights::READ)
                .unwrap()
                .len()
        );

        let diff = repo.set_acl(&shared, MailboxAcl::new()).unwrap();
        assert_eq!(2, diff.removed_entries().len());
        assert!(repo
            .find_non_personal_mailboxes("bob", Rights::READ)
            .unwrap()
            .is_empty());

        let mut ghost = shared.clone();
        ghost.id = MailboxId(1000);
        assert_matches!(
            Err(Error::NxMailbox),
            repo.set_acl(&ghost, MailboxAcl::new())
        );
    }
}
