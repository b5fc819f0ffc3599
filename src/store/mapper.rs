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

//! The contracts a storage backend implements.
//!
//! One backend implements all of these consistently for a deployment. The
//! reference implementation lives in `store::memory`.

use std::collections::BTreeMap;
use std::num::NonZeroUsize;
use std::sync::Arc;

use super::acl::{AclCommand, AclDiff, MailboxAcl, Rights};
use super::model::*;
use crate::support::error::Error;

/// Allocates UIDs, per mailbox.
pub trait UidProvider: Send + Sync {
    /// Return a UID strictly greater than any previously issued for
    /// `mailbox`. The first call for a mailbox returns `Uid::MIN`.
    fn next_uid(&self, mailbox: MailboxId) -> Result<Uid, Error>;

    /// Allocate `count` consecutive UIDs in one step, returning them in
    /// ascending order.
    fn next_uids(
        &self,
        mailbox: MailboxId,
        count: NonZeroUsize,
    ) -> Result<Vec<Uid>, Error>;

    /// The highest UID issued so far for `mailbox`, if any.
    fn last_uid(&self, mailbox: MailboxId) -> Result<Option<Uid>, Error>;

    /// Drop the counter of a deleted mailbox. Mailbox ids are never reused.
    fn forget(&self, mailbox: MailboxId) -> Result<(), Error>;
}

/// Allocates modification sequence numbers, per mailbox.
pub trait ModSeqProvider: Send + Sync {
    /// Return a value strictly greater than any previously issued for
    /// `mailbox`.
    fn next_mod_seq(&self, mailbox: MailboxId) -> Result<ModSeq, Error>;

    /// The last value issued for `mailbox`, or `ModSeq::ZERO`.
    fn highest_mod_seq(&self, mailbox: MailboxId) -> Result<ModSeq, Error>;

    /// Drop the counter of a deleted mailbox.
    fn forget(&self, mailbox: MailboxId) -> Result<(), Error>;
}

/// A mailbox name query, resolved within one namespace of one owner.
#[derive(Clone, Debug)]
pub struct MailboxQuery {
    pub namespace: String,
    pub user: Option<String>,
    /// RFC 3501 pattern over the mailbox name; `*` and `%` are wildcards.
    pub pattern: String,
    pub delimiter: char,
}

impl MailboxQuery {
    pub fn private(user: &str, pattern: &str, delimiter: char) -> Self {
        Self {
            namespace: PRIVATE_NAMESPACE.to_owned(),
            user: Some(user.to_owned()),
            pattern: pattern.to_owned(),
            delimiter,
        }
    }
}

pub trait MailboxRepository: Send + Sync {
    /// Create a mailbox at `path`.
    ///
    /// Fails with `MailboxExists` if a live mailbox already occupies `path`.
    fn create(
        &self,
        path: MailboxPath,
        uid_validity: UidValidity,
    ) -> Result<Mailbox, Error>;

    fn find_by_path(&self, path: &MailboxPath) -> Result<Mailbox, Error>;
    fn find_by_id(&self, id: MailboxId) -> Result<Mailbox, Error>;

    /// All mailboxes owned like the query whose name matches its pattern,
    /// sorted by name.
    fn find_with_path_like(
        &self,
        query: &MailboxQuery,
    ) -> Result<Vec<Mailbox>, Error>;

    /// Move the mailbox identified by `mailbox.id` to `mailbox.path`.
    fn rename(&self, mailbox: &Mailbox) -> Result<Mailbox, Error>;

    fn delete(&self, mailbox: &Mailbox) -> Result<(), Error>;

    /// Whether any other live mailbox's name starts with `mailbox`'s name
    /// followed by `delimiter`.
    fn has_children(
        &self,
        mailbox: &Mailbox,
        delimiter: char,
    ) -> Result<bool, Error>;

    fn update_acl(
        &self,
        mailbox: &Mailbox,
        command: &AclCommand,
    ) -> Result<AclDiff, Error>;

    fn set_acl(
        &self,
        mailbox: &Mailbox,
        acl: MailboxAcl,
    ) -> Result<AclDiff, Error>;

    /// Mailboxes not owned by `user` where `user` holds `right` through an
    /// ACL entry.
    fn find_non_personal_mailboxes(
        &self,
        user: &str,
        right: Rights,
    ) -> Result<Vec<Mailbox>, Error>;

    fn list(&self) -> Result<Vec<Mailbox>, Error>;
}

/// Per-mailbox message rows keyed by UID.
pub trait MessageStore: Send + Sync {
    /// Insert or overwrite the row at `message.uid` in `mailbox`.
    fn save(
        &self,
        mailbox: &Mailbox,
        message: MailboxMessage,
    ) -> Result<MessageMetaData, Error>;

    /// Allocate a UID and ModSeq for `message` in `mailbox`, then save it.
    fn add(
        &self,
        mailbox: &Mailbox,
        message: MailboxMessage,
    ) -> Result<MessageMetaData, Error>;

    /// Place a copy of `original` in `mailbox` under a fresh UID and ModSeq,
    /// with `\Recent` set.
    fn copy(
        &self,
        mailbox: &Mailbox,
        original: &MailboxMessage,
    ) -> Result<MessageMetaData, Error>;

    /// `copy` into `mailbox`, then remove `original` from its mailbox.
    ///
    /// Returns the metadata of the copy and, if `original` was still
    /// present, that of its removal, which carries the removal's ModSeq.
    fn move_message(
        &self,
        mailbox: &Mailbox,
        original: &MailboxMessage,
    ) -> Result<(MessageMetaData, Option<MessageMetaData>), Error>;

    /// Rows within `range` in ascending UID order, truncated to `limit`
    /// entries when `limit` is non-zero.
    fn find_in_mailbox(
        &self,
        mailbox: &Mailbox,
        range: MessageRange,
        fetch: FetchType,
        limit: usize,
    ) -> Result<Vec<MailboxMessage>, Error>;

    fn find_recent_message_uids_in_mailbox(
        &self,
        mailbox: &Mailbox,
    ) -> Result<Vec<Uid>, Error>;

    fn find_first_unseen_message_uid(
        &self,
        mailbox: &Mailbox,
    ) -> Result<Option<Uid>, Error>;

    fn retrieve_messages_marked_for_deletion(
        &self,
        mailbox: &Mailbox,
        range: MessageRange,
    ) -> Result<Vec<Uid>, Error>;

    /// Remove the rows at `uids`, returning the metadata of those which
    /// actually existed.
    ///
    /// Each removal advances the mailbox's ModSeq; the returned metadata
    /// carries the ModSeq of the removal.
    fn delete_messages(
        &self,
        mailbox: &Mailbox,
        uids: &[Uid],
    ) -> Result<BTreeMap<Uid, MessageMetaData>, Error>;

    /// Drop every row of a deleted mailbox along with its row table,
    /// returning the metadata of the rows dropped.
    ///
    /// The mailbox's ModSeq does not advance.
    fn purge_mailbox(
        &self,
        mailbox: &Mailbox,
    ) -> Result<BTreeMap<Uid, MessageMetaData>, Error>;

    /// Apply a flag update to every row in `range`.
    ///
    /// Only rows whose flags change get a new ModSeq; the result lists only
    /// those rows.
    fn update_flags(
        &self,
        mailbox: &Mailbox,
        mode: FlagsUpdateMode,
        flags: &Flags,
        range: MessageRange,
    ) -> Result<Vec<UpdatedFlags>, Error>;

    fn count_messages_in_mailbox(&self, mailbox: &Mailbox)
        -> Result<u64, Error>;

    fn count_unseen_messages_in_mailbox(
        &self,
        mailbox: &Mailbox,
    ) -> Result<u64, Error>;

    fn mailbox_counters(
        &self,
        mailbox: &Mailbox,
    ) -> Result<MailboxCounters, Error>;

    /// The union of the flags of every row in `mailbox`.
    fn get_applicable_flag(&self, mailbox: &Mailbox) -> Result<Flags, Error>;
}

/// Cross-mailbox index of message placements by `MessageId`.
pub trait MessageIdentityIndex: Send + Sync {
    fn find(
        &self,
        ids: &[MessageId],
        fetch: FetchType,
    ) -> Result<Vec<MailboxMessage>, Error>;

    fn find_mailboxes(&self, id: MessageId) -> Result<Vec<MailboxId>, Error>;

    /// Save `message`, whose UID and ModSeq are already assigned, unless the
    /// same message is already placed in `mailbox`.
    ///
    /// Returns `None` if a placement already existed.
    fn copy_in_mailbox(
        &self,
        message: MailboxMessage,
        mailbox: &Mailbox,
    ) -> Result<Option<MessageMetaData>, Error>;

    /// Remove every placement of `id` within `mailboxes`.
    ///
    /// A mailbox may hold several placements of the same message; each
    /// removed row is reported under its mailbox and UID.
    fn delete(
        &self,
        id: MessageId,
        mailboxes: &[MailboxId],
    ) -> Result<BTreeMap<MailboxId, BTreeMap<Uid, MessageMetaData>>, Error>;

    /// Apply a flag update to every placement of `id` within `mailboxes`.
    ///
    /// Placements whose flags would not change are left alone entirely and
    /// are absent from the result.
    fn set_flags(
        &self,
        id: MessageId,
        mailboxes: &[MailboxId],
        flags: &Flags,
        mode: FlagsUpdateMode,
    ) -> Result<BTreeMap<MailboxId, Vec<UpdatedFlags>>, Error>;
}

pub trait AnnotationStore: Send + Sync {
    fn get_all_annotations(
        &self,
        mailbox: MailboxId,
    ) -> Result<Vec<MailboxAnnotation>, Error>;

    fn get_annotations_by_keys(
        &self,
        mailbox: MailboxId,
        keys: &[AnnotationKey],
    ) -> Result<Vec<MailboxAnnotation>, Error>;

    /// Annotations whose key is one of `keys` or a child at most one segment
    /// below one of them.
    fn get_annotations_by_keys_with_one_depth(
        &self,
        mailbox: MailboxId,
        keys: &[AnnotationKey],
    ) -> Result<Vec<MailboxAnnotation>, Error>;

    /// Annotations whose key is one of `keys` or any descendant of one.
    fn get_annotations_by_keys_with_all_depth(
        &self,
        mailbox: MailboxId,
        keys: &[AnnotationKey],
    ) -> Result<Vec<MailboxAnnotation>, Error>;

    /// Insert or overwrite an annotation. Nil values are rejected.
    fn insert_annotation(
        &self,
        mailbox: MailboxId,
        annotation: MailboxAnnotation,
    ) -> Result<(), Error>;

    fn delete_annotation(
        &self,
        mailbox: MailboxId,
        key: &AnnotationKey,
    ) -> Result<(), Error>;

    fn exists(
        &self,
        mailbox: MailboxId,
        key: &AnnotationKey,
    ) -> Result<bool, Error>;

    fn count_annotations(&self, mailbox: MailboxId) -> Result<usize, Error>;

    /// Remove every annotation of `mailbox`.
    fn purge(&self, mailbox: MailboxId) -> Result<(), Error>;
}

pub trait AttachmentStore: Send + Sync {
    /// Store an attachment of `message_id`, returning its metadata.
    ///
    /// Identical content is stored once; the new message is added to the
    /// attachment's references.
    fn store(
        &self,
        content_type: &str,
        content: &[u8],
        message_id: MessageId,
    ) -> Result<AttachmentMetadata, Error>;

    fn get(&self, id: &AttachmentId) -> Result<AttachmentMetadata, Error>;

    fn load(&self, id: &AttachmentId) -> Result<Arc<[u8]>, Error>;

    /// Metadata of every attachment of `ids` that exists.
    fn get_attachments(
        &self,
        ids: &[AttachmentId],
    ) -> Result<Vec<AttachmentMetadata>, Error>;

    fn related_messages(
        &self,
        id: &AttachmentId,
    ) -> Result<Vec<MessageId>, Error>;
}
