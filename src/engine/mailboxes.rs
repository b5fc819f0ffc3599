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

use log::info;

use super::defs::*;
use crate::events::{EventKind, MailboxRef};
use crate::quota::QuotaUsage;
use crate::store::mapper::MailboxQuery;
use crate::store::model::*;
use crate::support::error::Error;
use crate::support::mailbox_paths::{ancestor_names, normalise_mailbox_name};

impl Engine {
    /// Create the mailbox at `path`, along with any of its ancestors which
    /// do not exist yet.
    ///
    /// Fails with `MailboxExists` if `path` itself is already taken, in
    /// which case the existing mailbox is left alone.
    pub fn create_mailbox(
        &self,
        session: &MailboxSession,
        path: &MailboxPath,
    ) -> Result<Mailbox, Error> {
        let path = self.normalise(path)?;
        self.create_missing_ancestors(session, &path)?;

        let mailbox = self
            .backend
            .mailboxes
            .create(path, UidValidity::random())?;
        info!(
            "{} Created mailbox {} with id {}",
            session.log_prefix, mailbox.path, mailbox.id
        );

        self.dispatch(
            session,
            EventKind::MailboxAdded {
                mailbox: MailboxRef::from(&mailbox),
            },
        )?;
        Ok(mailbox)
    }

    fn create_missing_ancestors(
        &self,
        session: &MailboxSession,
        path: &MailboxPath,
    ) -> Result<(), Error> {
        for name in ancestor_names(&path.name, self.delimiter) {
            let ancestor = path.with_name(name);
            match self.backend.mailboxes.find_by_path(&ancestor) {
                Ok(_) => continue,
                Err(Error::NxMailbox) => (),
                Err(e) => return Err(e),
            }

            match self
                .backend
                .mailboxes
                .create(ancestor, UidValidity::random())
            {
                Ok(mailbox) => {
                    info!(
                        "{} Created intermediate mailbox {} with id {}",
                        session.log_prefix, mailbox.path, mailbox.id
                    );
                    self.dispatch(
                        session,
                        EventKind::MailboxAdded {
                            mailbox: MailboxRef::from(&mailbox),
                        },
                    )?;
                },
                // Created concurrently
                Err(Error::MailboxExists) => (),
                Err(e) => return Err(e),
            }
        }

        Ok(())
    }

    /// Delete the mailbox at `path` and every message in it.
    ///
    /// Only the named mailbox goes away; any children remain.
    pub fn delete_mailbox(
        &self,
        session: &MailboxSession,
        path: &MailboxPath,
    ) -> Result<(), Error> {
        let mailbox = self.find_mailbox(path)?;
        let root = self.resolver.quota_root(&mailbox.path)?;

        // Unlinked first, so the purge sees every row that made it in
        self.backend.mailboxes.delete(&mailbox)?;
        let deleted = self.backend.messages.purge_mailbox(&mailbox)?;
        let freed = deleted
            .values()
            .fold(QuotaUsage::default(), |acc, m| {
                acc.plus(QuotaUsage::new(1, m.size))
            });

        self.quota.current().decrease(&root, freed)?;
        self.backend.annotations.purge(mailbox.id)?;
        self.backend.uids.forget(mailbox.id)?;
        self.backend.mod_seqs.forget(mailbox.id)?;
        info!(
            "{} Deleted mailbox {} ({} messages, {} bytes)",
            session.log_prefix, mailbox.path, freed.count, freed.size
        );

        self.dispatch(
            session,
            EventKind::MailboxDeletion {
                mailbox: MailboxRef::from(&mailbox),
                acl: mailbox.acl.clone(),
                quota_root: root.clone(),
                deleted_message_count: freed.count,
                total_deleted_size: freed.size,
            },
        )?;
        self.dispatch_quota_update(session, &root)
    }

    /// Rename the mailbox at `from` to `to`, carrying its sub-mailboxes
    /// along.
    ///
    /// Mailbox ids and UID validity are unchanged; only paths move.
    pub fn rename_mailbox(
        &self,
        session: &MailboxSession,
        from: &MailboxPath,
        to: &MailboxPath,
    ) -> Result<Mailbox, Error> {
        let to = self.normalise(to)?;
        let mailbox = self.find_mailbox(from)?;

        if mailbox.path == to {
            return Err(Error::RenameToSelf);
        }
        if to.is_descendant_of(&mailbox.path, self.delimiter) {
            return Err(Error::RenameIntoSelf);
        }

        // Work out every move up front so a collision anywhere fails before
        // anything is renamed.
        let mut moves = vec![(mailbox.clone(), to.clone())];
        for child in self.backend.mailboxes.find_with_path_like(&MailboxQuery {
            namespace: mailbox.path.namespace.clone(),
            user: mailbox.path.user.clone(),
            pattern: format!("{}{}*", mailbox.path.name, self.delimiter),
            delimiter: self.delimiter,
        })? {
            let suffix = child.path.name[mailbox.path.name.len()..].to_owned();
            let target = to.with_name(&format!("{}{}", to.name, suffix));
            moves.push((child, target));
        }

        for &(_, ref target) in &moves {
            match self.backend.mailboxes.find_by_path(target) {
                Ok(_) => return Err(Error::MailboxExists),
                Err(Error::NxMailbox) => (),
                Err(e) => return Err(e),
            }
        }

        self.create_missing_ancestors(session, &to)?;

        let mut renamed_root = None;
        for (original, target) in moves {
            let renamed = self.backend.mailboxes.rename(&Mailbox {
                path: target.clone(),
                ..original.clone()
            })?;
            info!(
                "{} Renamed mailbox {} to {}",
                session.log_prefix, original.path, renamed.path
            );
            self.dispatch(
                session,
                EventKind::MailboxRenamed {
                    mailbox: MailboxRef::from(&original),
                    new_path: target,
                },
            )?;

            renamed_root.get_or_insert(renamed);
        }

        renamed_root.ok_or(Error::NxMailbox)
    }

    /// List the session user's mailboxes whose names match `pattern`.
    pub fn list_mailboxes(
        &self,
        session: &MailboxSession,
        pattern: &str,
    ) -> Result<Vec<ListedMailbox>, Error> {
        let query =
            MailboxQuery::private(&session.user, pattern, self.delimiter);
        self.backend
            .mailboxes
            .find_with_path_like(&query)?
            .into_iter()
            .map(|mailbox| {
                let has_children = self
                    .backend
                    .mailboxes
                    .has_children(&mailbox, self.delimiter)?;
                Ok(ListedMailbox {
                    mailbox,
                    has_children,
                })
            })
            .collect()
    }

    pub fn get_mailbox(&self, path: &MailboxPath) -> Result<Mailbox, Error> {
        self.find_mailbox(path)
    }

    pub fn mailbox_exists(&self, path: &MailboxPath) -> Result<bool, Error> {
        match self.find_mailbox(path) {
            Ok(_) => Ok(true),
            Err(Error::NxMailbox) => Ok(false),
            Err(e) => Err(e),
        }
    }

    pub fn mailbox_counters(
        &self,
        path: &MailboxPath,
    ) -> Result<MailboxCounters, Error> {
        let mailbox = self.find_mailbox(path)?;
        self.backend.messages.mailbox_counters(&mailbox)
    }

    /// The flags a client may expect to see on messages in `path`.
    pub fn applicable_flags(&self, path: &MailboxPath) -> Result<Flags, Error> {
        let mailbox = self.find_mailbox(path)?;
        self.backend.messages.get_applicable_flag(&mailbox)
    }

    fn normalise(&self, path: &MailboxPath) -> Result<MailboxPath, Error> {
        Ok(path.with_name(&normalise_mailbox_name(&path.name, self.delimiter)?))
    }
}
