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
use std::sync::Arc;

use chrono::prelude::*;
use log::{info, warn};

use super::defs::*;
use crate::events::{EventKind, MailboxRef};
use crate::quota::{QuotaRoot, QuotaUsage};
use crate::store::model::*;
use crate::support::error::Error;

impl Engine {
    /// Append a new message to the mailbox at `path`.
    ///
    /// The quota is checked before any identifier is allocated, so a
    /// rejected append leaves no trace.
    pub fn append(
        &self,
        session: &MailboxSession,
        path: &MailboxPath,
        content: Vec<u8>,
        options: AppendOptions,
    ) -> Result<MessageMetaData, Error> {
        let mailbox = self.find_mailbox(path)?;
        let root = self.resolver.quota_root(&mailbox.path)?;
        let size = content.len() as u64;

        if let Err(e) = self.quota.checker(&root)?.try_addition(1, size) {
            info!(
                "{} Rejected {}-byte append to {}: {}",
                session.log_prefix, size, mailbox.path, e
            );
            return Err(e);
        }

        let mut flags = options.flags;
        flags.remove(&Flag::Recent);
        if options.is_recent {
            flags.insert(Flag::Recent);
        }

        let mut message = MailboxMessage::new(
            mailbox.id,
            content,
            flags,
            options.internal_date.unwrap_or_else(Utc::now),
        );
        for attachment in &options.attachments {
            let stored = self.backend.attachments.store(
                &attachment.content_type,
                &attachment.content,
                message.message_id,
            )?;
            message.attachments.push(stored.id);
        }

        let meta = self.backend.messages.add(&mailbox, message)?;
        self.quota
            .current()
            .increase(&root, QuotaUsage::new(1, size))?;

        let mut added = BTreeMap::new();
        added.insert(meta.uid, meta.clone());
        self.dispatch(
            session,
            EventKind::Added {
                mailbox: MailboxRef::from(&mailbox),
                added,
                is_delivery: options.is_delivery,
                is_appended: true,
                moved_from: None,
            },
        )?;
        self.dispatch_quota_update(session, &root)?;
        Ok(meta)
    }

    /// Return the messages in `range` of the mailbox at `path`.
    ///
    /// A `limit` of 0 means no limit.
    pub fn fetch(
        &self,
        path: &MailboxPath,
        range: MessageRange,
        fetch: FetchType,
        limit: usize,
    ) -> Result<Vec<MailboxMessage>, Error> {
        let mailbox = self.find_mailbox(path)?;
        self.backend
            .messages
            .find_in_mailbox(&mailbox, range, fetch, limit)
    }

    pub fn recent_uids(&self, path: &MailboxPath) -> Result<Vec<Uid>, Error> {
        let mailbox = self.find_mailbox(path)?;
        self.backend
            .messages
            .find_recent_message_uids_in_mailbox(&mailbox)
    }

    pub fn first_unseen(
        &self,
        path: &MailboxPath,
    ) -> Result<Option<Uid>, Error> {
        let mailbox = self.find_mailbox(path)?;
        self.backend.messages.find_first_unseen_message_uid(&mailbox)
    }

    /// Copy the messages in `range` of `src` into `dst`, returning the UIDs
    /// they got there.
    ///
    /// Every message is checked against the destination quota before the
    /// first is copied, so the quota never stops a copy halfway. If the
    /// store fails partway, the copies already made are still accounted
    /// and announced before the error is returned.
    pub fn copy_messages(
        &self,
        session: &MailboxSession,
        src: &MailboxPath,
        range: MessageRange,
        dst: &MailboxPath,
    ) -> Result<Vec<MessageRange>, Error> {
        let src = self.find_mailbox(src)?;
        let dst = self.find_mailbox(dst)?;
        let root = self.resolver.quota_root(&dst.path)?;

        let originals = self.backend.messages.find_in_mailbox(
            &src,
            range,
            FetchType::Full,
            0,
        )?;

        let mut checker = self.quota.checker(&root)?;
        for original in &originals {
            if let Err(e) = checker.try_addition(1, original.size) {
                info!(
                    "{} Rejected copy of {} messages to {}: {}",
                    session.log_prefix,
                    originals.len(),
                    dst.path,
                    e
                );
                return Err(e);
            }
        }

        let mut added = BTreeMap::new();
        let mut failure = None;
        for original in &originals {
            match self.backend.messages.copy(&dst, original) {
                Ok(meta) => {
                    added.insert(meta.uid, meta);
                },
                Err(e) => {
                    warn!(
                        "{} Copy to {} failed after {} of {} messages: {}",
                        session.log_prefix,
                        dst.path,
                        added.len(),
                        originals.len(),
                        e
                    );
                    failure = Some(e);
                    break;
                },
            }
        }

        let uids = MessageRange::to_ranges(added.keys().copied());
        let published = self.publish_copies(session, &dst, &root, added);
        match failure {
            Some(e) => Err(e),
            None => published.map(|()| uids),
        }
    }

    fn publish_copies(
        &self,
        session: &MailboxSession,
        dst: &Mailbox,
        root: &QuotaRoot,
        added: BTreeMap<Uid, MessageMetaData>,
    ) -> Result<(), Error> {
        if added.is_empty() {
            return Ok(());
        }

        let usage = added.values().fold(QuotaUsage::default(), |acc, m| {
            acc.plus(QuotaUsage::new(1, m.size))
        });
        self.quota.current().increase(root, usage)?;
        self.dispatch(
            session,
            EventKind::Added {
                mailbox: MailboxRef::from(dst),
                added,
                is_delivery: false,
                is_appended: false,
                moved_from: None,
            },
        )?;
        self.dispatch_quota_update(session, root)
    }

    /// Move the messages in `range` of `src` into `dst`, returning the UIDs
    /// they got there.
    ///
    /// Messages get new UIDs in the destination. The quota is only checked
    /// when the two mailboxes count against different roots. As with
    /// `copy_messages`, a store failure partway still accounts and announces
    /// whatever was moved before it.
    pub fn move_messages(
        &self,
        session: &MailboxSession,
        src: &MailboxPath,
        range: MessageRange,
        dst: &MailboxPath,
    ) -> Result<Vec<MessageRange>, Error> {
        let src = self.find_mailbox(src)?;
        let dst = self.find_mailbox(dst)?;
        let src_root = self.resolver.quota_root(&src.path)?;
        let dst_root = self.resolver.quota_root(&dst.path)?;
        let crosses_roots = src_root != dst_root;

        let originals = self.backend.messages.find_in_mailbox(
            &src,
            range,
            FetchType::Full,
            0,
        )?;

        if crosses_roots {
            let mut checker = self.quota.checker(&dst_root)?;
            for original in &originals {
                if let Err(e) = checker.try_addition(1, original.size) {
                    info!(
                        "{} Rejected move of {} messages to {}: {}",
                        session.log_prefix,
                        originals.len(),
                        dst.path,
                        e
                    );
                    return Err(e);
                }
            }
        }

        let mut batch = MovedBatch::default();
        let mut failure = None;
        for original in &originals {
            match self.backend.messages.move_message(&dst, original) {
                Ok((meta, removed)) => {
                    batch.message_ids.push(meta.message_id);
                    batch.added.insert(meta.uid, meta);
                    if let Some(removed) = removed {
                        batch.expunged.insert(removed.uid, removed);
                    }
                },
                Err(e) => {
                    warn!(
                        "{} Move to {} failed after {} of {} messages: {}",
                        session.log_prefix,
                        dst.path,
                        batch.added.len(),
                        originals.len(),
                        e
                    );
                    failure = Some(e);
                    break;
                },
            }
        }

        let uids = MessageRange::to_ranges(batch.added.keys().copied());
        let published = self.publish_moves(
            session,
            (&src, &src_root),
            (&dst, &dst_root),
            batch,
        );
        match failure {
            Some(e) => Err(e),
            None => published.map(|()| uids),
        }
    }

    fn publish_moves(
        &self,
        session: &MailboxSession,
        (src, src_root): (&Mailbox, &QuotaRoot),
        (dst, dst_root): (&Mailbox, &QuotaRoot),
        batch: MovedBatch,
    ) -> Result<(), Error> {
        if batch.added.is_empty() {
            return Ok(());
        }

        let crosses_roots = src_root != dst_root;
        if crosses_roots {
            let usage = batch
                .added
                .values()
                .fold(QuotaUsage::default(), |acc, m| {
                    acc.plus(QuotaUsage::new(1, m.size))
                });
            self.quota.current().increase(dst_root, usage)?;
            self.release(src_root, batch.expunged.values())?;
        }

        self.dispatch(
            session,
            EventKind::Added {
                mailbox: MailboxRef::from(dst),
                added: batch.added,
                is_delivery: false,
                is_appended: false,
                moved_from: Some(src.id),
            },
        )?;
        self.dispatch(
            session,
            EventKind::Expunged {
                mailbox: MailboxRef::from(src),
                expunged: batch.expunged,
                moved_to: Some(dst.id),
            },
        )?;
        self.dispatch(
            session,
            EventKind::MessageMoved {
                message_ids: batch.message_ids,
                previous: vec![src.id],
                current: vec![dst.id],
            },
        )?;

        if crosses_roots {
            self.dispatch_quota_update(session, dst_root)?;
            self.dispatch_quota_update(session, src_root)?;
        }
        Ok(())
    }

    /// Remove every message in `range` of `path` which carries `\Deleted`.
    pub fn expunge(
        &self,
        session: &MailboxSession,
        path: &MailboxPath,
        range: MessageRange,
    ) -> Result<BTreeMap<Uid, MessageMetaData>, Error> {
        let mailbox = self.find_mailbox(path)?;
        let uids = self
            .backend
            .messages
            .retrieve_messages_marked_for_deletion(&mailbox, range)?;
        let expunged = self.backend.messages.delete_messages(&mailbox, &uids)?;
        if expunged.is_empty() {
            return Ok(expunged);
        }

        let root = self.resolver.quota_root(&mailbox.path)?;
        self.release(&root, expunged.values())?;
        self.dispatch(
            session,
            EventKind::Expunged {
                mailbox: MailboxRef::from(&mailbox),
                expunged: expunged.clone(),
                moved_to: None,
            },
        )?;
        self.dispatch_quota_update(session, &root)?;
        Ok(expunged)
    }

    /// Clear `\Recent` from every message in the mailbox at `path`.
    pub fn reset_recent(
        &self,
        session: &MailboxSession,
        path: &MailboxPath,
    ) -> Result<Vec<UpdatedFlags>, Error> {
        let mailbox = self.find_mailbox(path)?;
        let updated = self.backend.messages.update_flags(
            &mailbox,
            FlagsUpdateMode::Remove,
            &Flags::new().with(Flag::Recent),
            MessageRange::All,
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

    /// Take messages which have been removed out of the usage of `root`.
    pub(super) fn release<'a>(
        &self,
        root: &QuotaRoot,
        removed: impl IntoIterator<Item = &'a MessageMetaData>,
    ) -> Result<(), Error> {
        let usage = removed.into_iter().fold(QuotaUsage::default(), |acc, m| {
            acc.plus(QuotaUsage::new(1, m.size))
        });
        if usage.is_zero() {
            return Ok(());
        }

        self.quota.current().decrease(root, usage)
    }

    pub fn get_attachment(
        &self,
        id: &AttachmentId,
    ) -> Result<AttachmentMetadata, Error> {
        self.backend.attachments.get(id)
    }

    /// The metadata of whichever of `ids` exist.
    pub fn get_attachments(
        &self,
        ids: &[AttachmentId],
    ) -> Result<Vec<AttachmentMetadata>, Error> {
        self.backend.attachments.get_attachments(ids)
    }

    pub fn load_attachment(
        &self,
        id: &AttachmentId,
    ) -> Result<Arc<[u8]>, Error> {
        self.backend.attachments.load(id)
    }

    /// The messages which carry the attachment `id`.
    pub fn attachment_messages(
        &self,
        id: &AttachmentId,
    ) -> Result<Vec<MessageId>, Error> {
        self.backend.attachments.related_messages(id)
    }
}

/// What one `move_messages` call has moved so far.
#[derive(Default)]
struct MovedBatch {
    added: BTreeMap<Uid, MessageMetaData>,
    expunged: BTreeMap<Uid, MessageMetaData>,
    message_ids: Vec<MessageId>,
}
