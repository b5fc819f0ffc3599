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

use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::convert::TryFrom;
use std::fmt::{self, Write as _};
use std::iter::FromIterator;
use std::num::NonZeroU32;
use std::str::FromStr;
use std::sync::Arc;

use chrono::prelude::*;
use rand::Rng;
use serde::{Deserialize, Serialize};
use tiny_keccak::{Hasher, Sha3};

use super::acl::MailboxAcl;
use crate::support::{error::Error, log_prefix::LogPrefix};

/// The namespace of mailboxes owned by a single user.
pub const PRIVATE_NAMESPACE: &str = "#private";

/// Identifies a mailbox for its whole lifetime.
///
/// Mailbox IDs are assigned by the backend when the mailbox is created and
/// never change, even across renames.
#[derive(
    Deserialize,
    Serialize,
    Clone,
    Copy,
    Debug,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
)]
#[serde(transparent)]
pub struct MailboxId(pub u64);

impl fmt::Display for MailboxId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for MailboxId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Error> {
        if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
            return Err(Error::BadMailboxId(s.to_owned()));
        }

        s.parse::<u64>()
            .map(MailboxId)
            .map_err(|_| Error::BadMailboxId(s.to_owned()))
    }
}

/// Uniquely identifies a message within a single mailbox.
///
/// UIDs start at 1 and increase monotonically as messages are added to the
/// mailbox. UIDs are never reused, but gaps are permitted.
#[derive(
    Deserialize, Serialize, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash,
)]
#[serde(transparent)]
pub struct Uid(pub NonZeroU32);

impl fmt::Debug for Uid {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Uid({})", self.0.get())
    }
}

impl fmt::Display for Uid {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0.get())
    }
}

impl Uid {
    // Unsafe because new() isn't const for some reason
    pub const MIN: Self = unsafe { Uid(NonZeroU32::new_unchecked(1)) };
    pub const MAX: Self = unsafe { Uid(NonZeroU32::new_unchecked(u32::MAX)) };

    pub fn of(uid: u32) -> Option<Self> {
        NonZeroU32::new(uid).map(Uid)
    }

    pub fn next(self) -> Option<Self> {
        self.0.get().checked_add(1).and_then(Uid::of)
    }

    pub fn get(self) -> u32 {
        self.0.get()
    }

    #[cfg(test)]
    pub fn u(uid: u32) -> Self {
        Uid::of(uid).unwrap()
    }
}

impl TryFrom<u32> for Uid {
    type Error = ();

    fn try_from(v: u32) -> Result<Self, ()> {
        Self::of(v).ok_or(())
    }
}

/// A per-mailbox modification sequence number.
///
/// Every visible mutation of a mailbox's messages is tagged with a fresh
/// `ModSeq` greater than all before it. `ZERO` is never assigned to any
/// mutation and stands for "nothing has happened yet".
#[derive(
    Deserialize,
    Serialize,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
)]
#[serde(transparent)]
pub struct ModSeq(pub u64);

impl fmt::Debug for ModSeq {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "ModSeq({})", self.0)
    }
}

impl ModSeq {
    pub const ZERO: Self = ModSeq(0);

    pub fn next(self) -> Option<Self> {
        self.0.checked_add(1).map(ModSeq)
    }
}

/// The epoch of a mailbox's UIDs.
///
/// A mailbox keeps the same value for its whole life. A mailbox later
/// created at the same path gets a different value, which tells clients
/// their cached UIDs no longer mean anything.
#[derive(
    Deserialize, Serialize, Clone, Copy, Debug, PartialEq, Eq, Hash,
)]
#[serde(transparent)]
pub struct UidValidity(pub u32);

impl UidValidity {
    pub fn random() -> Self {
        UidValidity(rand::thread_rng().gen_range(1, u32::MAX))
    }
}

/// The global identity of a logical message, shared by all its placements.
#[derive(
    Deserialize,
    Serialize,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
)]
#[serde(transparent)]
pub struct MessageId(pub u64);

impl MessageId {
    pub fn generate() -> Self {
        MessageId(rand::random())
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

impl fmt::Debug for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "MessageId({})", self)
    }
}

/// Identifies the conversation a message belongs to.
///
/// A message which starts a thread uses its own `MessageId`.
#[derive(
    Deserialize,
    Serialize,
    Clone,
    Copy,
    Debug,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
)]
#[serde(transparent)]
pub struct ThreadId(pub MessageId);

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SessionId(pub u64);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:x}", self.0)
    }
}

/// The principal on whose behalf an operation is performed.
#[derive(Clone, Debug)]
pub struct MailboxSession {
    pub id: SessionId,
    pub user: String,
    pub log_prefix: LogPrefix,
}

impl MailboxSession {
    pub fn new(user: &str) -> Self {
        let id = SessionId(rand::random::<u32>().into());
        let log_prefix = LogPrefix::new(format!("session-{}", id));
        log_prefix.set_user(user.to_owned());
        Self {
            id,
            user: user.to_owned(),
            log_prefix,
        }
    }
}

/// A message flag.
///
/// System flags are represented as top-level enum values. Keywords are in the
/// `Keyword` case.
///
/// The `Display` format of this type is the exact string value that would be
/// sent over the wire. `FromStr` does the reverse conversion, and also
/// understands non-standard casing of the system flags.
///
/// Keywords compare ASCII case-insensitively, and the ordering agrees with
/// that equality so that `Flags` can hold them in a `BTreeSet`.
#[derive(Clone, Serialize, Deserialize)]
pub enum Flag {
    Answered,
    Deleted,
    Draft,
    Flagged,
    Recent,
    Seen,
    Keyword(String),
}

impl Flag {
    fn rank(&self) -> u8 {
        match *self {
            Flag::Answered => 0,
            Flag::Deleted => 1,
            Flag::Draft => 2,
            Flag::Flagged => 3,
            Flag::Recent => 4,
            Flag::Seen => 5,
            Flag::Keyword(_) => 6,
        }
    }

    pub fn is_system(&self) -> bool {
        !matches!(*self, Flag::Keyword(_))
    }
}

impl fmt::Display for Flag {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            &Flag::Answered => write!(f, "\\Answered"),
            &Flag::Deleted => write!(f, "\\Deleted"),
            &Flag::Draft => write!(f, "\\Draft"),
            &Flag::Flagged => write!(f, "\\Flagged"),
            &Flag::Recent => write!(f, "\\Recent"),
            &Flag::Seen => write!(f, "\\Seen"),
            &Flag::Keyword(ref kw) => write!(f, "{}", kw),
        }
    }
}

impl fmt::Debug for Flag {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        <Flag as fmt::Display>::fmt(self, f)
    }
}

impl FromStr for Flag {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Error> {
        if s.eq_ignore_ascii_case("\\answered") {
            Ok(Flag::Answered)
        } else if s.eq_ignore_ascii_case("\\deleted") {
            Ok(Flag::Deleted)
        } else if s.eq_ignore_ascii_case("\\draft") {
            Ok(Flag::Draft)
        } else if s.eq_ignore_ascii_case("\\flagged") {
            Ok(Flag::Flagged)
        } else if s.eq_ignore_ascii_case("\\recent") {
            Ok(Flag::Recent)
        } else if s.eq_ignore_ascii_case("\\seen") {
            Ok(Flag::Seen)
        } else if s.starts_with('\\') {
            Err(Error::NxFlag)
        } else if !s.is_empty()
            && s.as_bytes().iter().copied().all(is_atom_char)
        {
            Ok(Flag::Keyword(s.to_owned()))
        } else {
            Err(Error::UnsafeName)
        }
    }
}

fn is_atom_char(ch: u8) -> bool {
    match ch {
        0..=b' ' => false,
        127..=255 => false,
        b'(' | b')' | b'{' | b'*' | b'%' | b'\\' | b'"' | b']' => false,
        _ => true,
    }
}

impl PartialEq for Flag {
    fn eq(&self, other: &Flag) -> bool {
        Ordering::Equal == self.cmp(other)
    }
}

impl Eq for Flag {}

impl PartialOrd for Flag {
    fn partial_cmp(&self, other: &Flag) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Flag {
    fn cmp(&self, other: &Flag) -> Ordering {
        match (self, other) {
            // Apparently the expectation is that keywords are
            // case-insensitive, despite RFC 3501 not requiring that. We only
            // do ASCII case-insensitivity to limit the insanity.
            (&Flag::Keyword(ref a), &Flag::Keyword(ref b)) => a
                .bytes()
                .map(|c| c.to_ascii_lowercase())
                .cmp(b.bytes().map(|c| c.to_ascii_lowercase())),
            _ => self.rank().cmp(&other.rank()),
        }
    }
}

/// A set of flags carried by a message.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Flags(BTreeSet<Flag>);

impl Flags {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, flag: Flag) -> Self {
        self.0.insert(flag);
        self
    }

    pub fn contains(&self, flag: &Flag) -> bool {
        self.0.contains(flag)
    }

    pub fn insert(&mut self, flag: Flag) -> bool {
        self.0.insert(flag)
    }

    pub fn remove(&mut self, flag: &Flag) -> bool {
        self.0.remove(flag)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Flag> + '_ {
        self.0.iter()
    }

    pub fn union(&self, other: &Flags) -> Flags {
        Flags(self.0.union(&other.0).cloned().collect())
    }

    pub fn difference(&self, other: &Flags) -> Flags {
        Flags(self.0.difference(&other.0).cloned().collect())
    }

    pub fn extend(&mut self, other: &Flags) {
        self.0.extend(other.0.iter().cloned());
    }
}

impl FromIterator<Flag> for Flags {
    fn from_iter<I: IntoIterator<Item = Flag>>(it: I) -> Self {
        Flags(it.into_iter().collect())
    }
}

impl<'a> IntoIterator for &'a Flags {
    type Item = &'a Flag;
    type IntoIter = std::collections::btree_set::Iter<'a, Flag>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

impl fmt::Debug for Flags {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "(")?;
        for (ix, flag) in self.0.iter().enumerate() {
            if ix > 0 {
                write!(f, " ")?;
            }
            write!(f, "{}", flag)?;
        }
        write!(f, ")")
    }
}

/// How a flag update combines the requested flags with the current ones.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FlagsUpdateMode {
    Add,
    Remove,
    Replace,
}

impl FlagsUpdateMode {
    /// Compute the flags a message carries after applying `requested` to
    /// `current` under this mode.
    ///
    /// `Replace` does not touch `\Recent`, which is controlled by the store
    /// rather than by clients.
    pub fn apply(self, current: &Flags, requested: &Flags) -> Flags {
        match self {
            FlagsUpdateMode::Add => current.union(requested),
            FlagsUpdateMode::Remove => current.difference(requested),
            FlagsUpdateMode::Replace => {
                let mut new = requested.clone();
                if current.contains(&Flag::Recent) {
                    new.insert(Flag::Recent);
                } else {
                    new.remove(&Flag::Recent);
                }
                new
            },
        }
    }
}

/// The before and after states of one message whose flags were updated.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UpdatedFlags {
    pub uid: Uid,
    pub message_id: MessageId,
    pub mod_seq: ModSeq,
    pub old_flags: Flags,
    pub new_flags: Flags,
}

impl UpdatedFlags {
    pub fn flags_changed(&self) -> bool {
        self.old_flags != self.new_flags
    }

    pub fn added_flags(&self) -> Flags {
        self.new_flags.difference(&self.old_flags)
    }

    pub fn removed_flags(&self) -> Flags {
        self.old_flags.difference(&self.new_flags)
    }
}

/// A set of UIDs within a mailbox.
///
/// `From` and `All` are open-ended, so they also cover messages added after
/// the range was built.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MessageRange {
    One(Uid),
    From(Uid),
    Range(Uid, Uid),
    All,
}

impl MessageRange {
    /// A closed range, normalised so that single-message ranges are `One`
    /// and reversed bounds are swapped.
    pub fn range(a: Uid, b: Uid) -> Self {
        match a.cmp(&b) {
            Ordering::Equal => MessageRange::One(a),
            Ordering::Less => MessageRange::Range(a, b),
            Ordering::Greater => MessageRange::Range(b, a),
        }
    }

    /// The inclusive bounds of this range, low end first.
    ///
    /// A `Range` built directly with its ends reversed covers the same UIDs
    /// as the ordered one, as in IMAP where `5:2` means `2:5`.
    pub fn bounds(&self) -> (Uid, Uid) {
        match *self {
            MessageRange::One(uid) => (uid, uid),
            MessageRange::From(uid) => (uid, Uid::MAX),
            MessageRange::Range(a, b) => (a.min(b), a.max(b)),
            MessageRange::All => (Uid::MIN, Uid::MAX),
        }
    }

    pub fn contains(&self, uid: Uid) -> bool {
        let (lo, hi) = self.bounds();
        uid >= lo && uid <= hi
    }

    /// Condense `uids` into the smallest list of ranges covering exactly
    /// those UIDs, in ascending order.
    pub fn to_ranges(uids: impl IntoIterator<Item = Uid>) -> Vec<Self> {
        let uids = uids.into_iter().collect::<BTreeSet<_>>();
        let mut ranges = Vec::new();
        let mut current: Option<(Uid, Uid)> = None;

        for uid in uids {
            current = match current {
                Some((start, end)) if end.next() == Some(uid) => {
                    Some((start, uid))
                },
                Some((start, end)) => {
                    ranges.push(MessageRange::range(start, end));
                    Some((uid, uid))
                },
                None => Some((uid, uid)),
            };
        }

        if let Some((start, end)) = current {
            ranges.push(MessageRange::range(start, end));
        }

        ranges
    }
}

impl fmt::Display for MessageRange {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            MessageRange::One(uid) => write!(f, "{}", uid),
            MessageRange::From(uid) => write!(f, "{}:*", uid),
            MessageRange::Range(lo, hi) => write!(f, "{}:{}", lo, hi),
            MessageRange::All => write!(f, "1:*"),
        }
    }
}

/// How much of a message a query needs to load.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FetchType {
    /// Only the metadata; content is left empty.
    Metadata,
    /// Metadata and the header section.
    Headers,
    /// Everything.
    Full,
}

/// An immutable snapshot of a message's metadata, returned by mutating
/// calls.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MessageMetaData {
    pub uid: Uid,
    pub mod_seq: ModSeq,
    pub flags: Flags,
    pub size: u64,
    pub internal_date: DateTime<Utc>,
    pub message_id: MessageId,
    pub thread_id: ThreadId,
}

/// One placement of a message in a mailbox.
#[derive(Clone, Debug)]
pub struct MailboxMessage {
    pub mailbox_id: MailboxId,
    pub uid: Uid,
    pub mod_seq: ModSeq,
    pub flags: Flags,
    /// The full size of the message in bytes, regardless of how much of
    /// `content` was fetched.
    pub size: u64,
    pub internal_date: DateTime<Utc>,
    pub message_id: MessageId,
    pub thread_id: ThreadId,
    /// The offset of the first byte of the body within the content.
    pub body_start: u64,
    pub content: Arc<[u8]>,
    pub attachments: Vec<AttachmentId>,
}

impl MailboxMessage {
    /// Build a new message, not yet placed, for `mailbox_id`.
    ///
    /// The UID and ModSeq are placeholders until the message is stored.
    pub fn new(
        mailbox_id: MailboxId,
        content: Vec<u8>,
        flags: Flags,
        internal_date: DateTime<Utc>,
    ) -> Self {
        let message_id = MessageId::generate();
        let body_start = find_body_start(&content) as u64;
        Self {
            mailbox_id,
            uid: Uid::MIN,
            mod_seq: ModSeq::ZERO,
            flags,
            size: content.len() as u64,
            internal_date,
            message_id,
            thread_id: ThreadId(message_id),
            body_start,
            content: content.into(),
            attachments: Vec::new(),
        }
    }

    /// Make a copy of this message for placement in `mailbox_id`.
    ///
    /// The copy shares the message identity and content of the original.
    pub fn copy_to(&self, mailbox_id: MailboxId) -> Self {
        Self {
            mailbox_id,
            ..self.clone()
        }
    }

    pub fn metadata(&self) -> MessageMetaData {
        MessageMetaData {
            uid: self.uid,
            mod_seq: self.mod_seq,
            flags: self.flags.clone(),
            size: self.size,
            internal_date: self.internal_date,
            message_id: self.message_id,
            thread_id: self.thread_id,
        }
    }

    pub fn headers(&self) -> &[u8] {
        let end = (self.body_start as usize).min(self.content.len());
        &self.content[..end]
    }

    pub fn body(&self) -> &[u8] {
        let start = (self.body_start as usize).min(self.content.len());
        &self.content[start..]
    }

    /// Return a copy of this message carrying only what `fetch` asks for.
    pub fn projected(&self, fetch: FetchType) -> Self {
        let content: Arc<[u8]> = match fetch {
            FetchType::Full => Arc::clone(&self.content),
            FetchType::Headers => self.headers().into(),
            FetchType::Metadata => Arc::from(&[][..]),
        };

        Self {
            content,
            ..self.clone()
        }
    }
}

fn find_body_start(content: &[u8]) -> usize {
    if let Some(ix) = content.windows(4).position(|w| w == b"\r\n\r\n") {
        return ix + 4;
    }

    content
        .windows(2)
        .position(|w| w == b"\n\n")
        .map(|ix| ix + 2)
        .unwrap_or(content.len())
}

/// The full path of a mailbox.
///
/// `name` is the hierarchical name within the owner's namespace, using the
/// configured delimiter. `user` is `None` for shared namespaces.
#[derive(
    Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct MailboxPath {
    pub namespace: String,
    pub user: Option<String>,
    pub name: String,
}

impl MailboxPath {
    pub fn new(namespace: &str, user: Option<&str>, name: &str) -> Self {
        Self {
            namespace: namespace.to_owned(),
            user: user.map(str::to_owned),
            name: name.to_owned(),
        }
    }

    /// A mailbox in `user`'s private namespace.
    pub fn for_user(user: &str, name: &str) -> Self {
        Self::new(PRIVATE_NAMESPACE, Some(user), name)
    }

    pub fn inbox(user: &str) -> Self {
        Self::for_user(user, "INBOX")
    }

    pub fn with_name(&self, name: &str) -> Self {
        Self {
            name: name.to_owned(),
            ..self.clone()
        }
    }

    pub fn child(&self, segment: &str, delimiter: char) -> Self {
        self.with_name(&format!("{}{}{}", self.name, delimiter, segment))
    }

    /// Whether `self` and `other` live in the same namespace of the same
    /// owner.
    pub fn same_owner(&self, other: &MailboxPath) -> bool {
        self.namespace == other.namespace && self.user == other.user
    }

    pub fn is_descendant_of(
        &self,
        other: &MailboxPath,
        delimiter: char,
    ) -> bool {
        self.same_owner(other)
            && crate::support::mailbox_paths::is_descendant(
                &other.name,
                &self.name,
                delimiter,
            )
    }

    pub fn belongs_to(&self, session: &MailboxSession) -> bool {
        Some(session.user.as_str()) == self.user.as_deref()
    }
}

impl fmt::Display for MailboxPath {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{}:{}:{}",
            self.namespace,
            self.user.as_deref().unwrap_or(""),
            self.name
        )
    }
}

impl fmt::Debug for MailboxPath {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        <MailboxPath as fmt::Display>::fmt(self, f)
    }
}

/// Mailbox metadata as held by the `MailboxRepository`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Mailbox {
    pub id: MailboxId,
    pub path: MailboxPath,
    pub uid_validity: UidValidity,
    pub acl: MailboxAcl,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MailboxCounters {
    pub mailbox_id: MailboxId,
    pub count: u64,
    pub unseen: u64,
}

/// The key of a mailbox annotation (RFC 5464 entry name).
///
/// Keys are `/`-delimited paths such as `/private/comment`. Comparison is
/// ASCII case-insensitive.
#[derive(Clone, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AnnotationKey(String);

impl AnnotationKey {
    pub fn new(key: &str) -> Result<Self, Error> {
        if !key.starts_with('/')
            || key.ends_with('/')
            || key.contains("//")
            || !key
                .bytes()
                .all(|b| b > b' ' && b < 127 && b != b'*' && b != b'%')
        {
            return Err(Error::BadAnnotationKey);
        }

        Ok(AnnotationKey(key.to_owned()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The number of `/`-separated segments in this key.
    pub fn component_count(&self) -> usize {
        self.0.split('/').filter(|s| !s.is_empty()).count()
    }

    /// Whether `other` is this key or lies below it.
    pub fn is_self_or_ancestor_of(&self, other: &AnnotationKey) -> bool {
        let (me, them) = (self.0.as_bytes(), other.0.as_bytes());
        if them.len() < me.len() || !them[..me.len()].eq_ignore_ascii_case(me)
        {
            return false;
        }

        them.len() == me.len() || b'/' == them[me.len()]
    }

    fn folded(&self) -> impl Iterator<Item = u8> + '_ {
        self.0.bytes().map(|b| b.to_ascii_lowercase())
    }
}

impl PartialEq for AnnotationKey {
    fn eq(&self, other: &Self) -> bool {
        self.0.eq_ignore_ascii_case(&other.0)
    }
}

impl Eq for AnnotationKey {}

impl PartialOrd for AnnotationKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for AnnotationKey {
    fn cmp(&self, other: &Self) -> Ordering {
        self.folded().cmp(other.folded())
    }
}

impl fmt::Display for AnnotationKey {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Debug for AnnotationKey {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "AnnotationKey({})", self.0)
    }
}

/// A mailbox annotation. A `None` value means "no such entry" and is never
/// stored.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MailboxAnnotation {
    pub key: AnnotationKey,
    pub value: Option<String>,
}

impl MailboxAnnotation {
    pub fn new(key: AnnotationKey, value: impl Into<String>) -> Self {
        Self {
            key,
            value: Some(value.into()),
        }
    }

    pub fn nil(key: AnnotationKey) -> Self {
        Self { key, value: None }
    }

    pub fn is_nil(&self) -> bool {
        self.value.is_none()
    }

    pub fn size(&self) -> usize {
        self.value.as_ref().map_or(0, String::len)
    }
}

/// The `DEPTH` selector of an annotation query.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AnnotationDepth {
    Zero,
    One,
    Infinity,
}

/// Content-addressed identity of an attachment: the lowercase hex SHA3-256
/// of its content.
#[derive(
    Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct AttachmentId(String);

impl AttachmentId {
    pub fn for_content(content: &[u8]) -> Self {
        let mut sha3 = Sha3::v256();
        sha3.update(content);
        let mut hash = [0u8; 32];
        sha3.finalize(&mut hash);

        let mut id = String::with_capacity(2 * hash.len());
        for &b in &hash {
            let _ = write!(id, "{:02x}", b);
        }

        AttachmentId(id)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for AttachmentId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Error> {
        if 64 == s.len() && s.bytes().all(|b| b.is_ascii_hexdigit()) {
            Ok(AttachmentId(s.to_ascii_lowercase()))
        } else {
            Err(Error::NxAttachment)
        }
    }
}

impl fmt::Display for AttachmentId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Debug for AttachmentId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "AttachmentId({})", self.0)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AttachmentMetadata {
    pub id: AttachmentId,
    pub content_type: String,
    pub size: u64,
}

/// An attachment submitted along with a new message.
#[derive(Clone, Debug)]
pub struct NewAttachment {
    pub content_type: String,
    pub content: Vec<u8>,
}
