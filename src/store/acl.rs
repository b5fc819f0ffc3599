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

//! Mailbox access control lists, as defined by RFC 4314.
//!
//! This module only stores and edits ACLs. Deciding whether an operation is
//! permitted is the business of the protocol front ends.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use bitflags::bitflags;

use crate::support::error::Error;

bitflags! {
    #[derive(Default)]
    pub struct Rights: u16 {
        /// `l`: the mailbox is visible to `LIST`.
        const LOOKUP = 1 << 0;
        /// `r`: the mailbox may be selected and its messages read.
        const READ = 1 << 1;
        /// `s`: `\Seen` may be kept across sessions.
        const WRITE_SEEN = 1 << 2;
        /// `w`: flags other than `\Seen` and `\Deleted` may be written.
        const WRITE = 1 << 3;
        /// `i`: messages may be appended or copied in.
        const INSERT = 1 << 4;
        /// `p`: mail may be submitted to the mailbox.
        const POST = 1 << 5;
        /// `k`: child mailboxes may be created.
        const CREATE_MAILBOX = 1 << 6;
        /// `x`: the mailbox may be deleted or renamed.
        const DELETE_MAILBOX = 1 << 7;
        /// `t`: `\Deleted` may be set or cleared.
        const DELETE_MESSAGES = 1 << 8;
        /// `e`: the mailbox may be expunged.
        const PERFORM_EXPUNGE = 1 << 9;
        /// `a`: the ACL itself may be administered.
        const ADMINISTER = 1 << 10;
    }
}

const RIGHT_LETTERS: &[(char, Rights)] = &[
    ('l', Rights::LOOKUP),
    ('r', Rights::READ),
    ('s', Rights::WRITE_SEEN),
    ('w', Rights::WRITE),
    ('i', Rights::INSERT),
    ('p', Rights::POST),
    ('k', Rights::CREATE_MAILBOX),
    ('x', Rights::DELETE_MAILBOX),
    ('t', Rights::DELETE_MESSAGES),
    ('e', Rights::PERFORM_EXPUNGE),
    ('a', Rights::ADMINISTER),
];

impl FromStr for Rights {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Error> {
        let mut rights = Rights::empty();
        for ch in s.chars() {
            let (_, right) = RIGHT_LETTERS
                .iter()
                .find(|&&(letter, _)| letter == ch)
                .ok_or(Error::BadAcl)?;
            rights |= *right;
        }

        Ok(rights)
    }
}

impl fmt::Display for Rights {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        for &(letter, right) in RIGHT_LETTERS {
            if self.contains(right) {
                write!(f, "{}", letter)?;
            }
        }
        Ok(())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum NameType {
    User,
    Group,
    /// One of `owner`, `anyone`, `authenticated`.
    Special,
}

/// Identifies an ACL entry.
///
/// A negative key is a separate entry from the positive key of the same
/// name; likewise user and group keys never collide.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EntryKey {
    pub name: String,
    pub name_type: NameType,
    pub negative: bool,
}

const SPECIAL_NAMES: &[&str] = &["owner", "anyone", "authenticated"];

impl EntryKey {
    pub fn user(name: &str) -> Self {
        Self {
            name: name.to_owned(),
            name_type: NameType::User,
            negative: false,
        }
    }

    pub fn group(name: &str) -> Self {
        Self {
            name: name.to_owned(),
            name_type: NameType::Group,
            negative: false,
        }
    }

    pub fn owner() -> Self {
        Self {
            name: "owner".to_owned(),
            name_type: NameType::Special,
            negative: false,
        }
    }

    pub fn negated(self) -> Self {
        Self {
            negative: true,
            ..self
        }
    }
}

impl FromStr for EntryKey {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Error> {
        let (negative, s) = match s.strip_prefix('-') {
            Some(rest) => (true, rest),
            None => (false, s),
        };

        let (name_type, name) = if let Some(group) = s.strip_prefix('$') {
            (NameType::Group, group)
        } else if SPECIAL_NAMES.contains(&s) {
            (NameType::Special, s)
        } else {
            (NameType::User, s)
        };

        if name.is_empty() || name.chars().any(char::is_control) {
            return Err(Error::BadAcl);
        }

        Ok(Self {
            name: name.to_owned(),
            name_type,
            negative,
        })
    }
}

impl fmt::Display for EntryKey {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if self.negative {
            write!(f, "-")?;
        }
        if NameType::Group == self.name_type {
            write!(f, "$")?;
        }
        write!(f, "{}", self.name)
    }
}

impl fmt::Debug for EntryKey {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        <EntryKey as fmt::Display>::fmt(self, f)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EditMode {
    Add,
    Remove,
    Replace,
}

/// A single edit to one entry of an ACL.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AclCommand {
    pub key: EntryKey,
    pub mode: EditMode,
    pub rights: Rights,
}

impl AclCommand {
    pub fn add(key: EntryKey, rights: Rights) -> Self {
        Self {
            key,
            mode: EditMode::Add,
            rights,
        }
    }

    pub fn remove(key: EntryKey, rights: Rights) -> Self {
        Self {
            key,
            mode: EditMode::Remove,
            rights,
        }
    }

    pub fn replace(key: EntryKey, rights: Rights) -> Self {
        Self {
            key,
            mode: EditMode::Replace,
            rights,
        }
    }
}

/// An ACL. Entries never carry empty rights.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct MailboxAcl {
    entries: BTreeMap<EntryKey, Rights>,
}

impl MailboxAcl {
    pub fn new() -> Self {
        Self::default()
    }

    /// The ACL given to a newly created mailbox.
    pub fn owner_full_rights() -> Self {
        Self::new().with(EntryKey::owner(), Rights::all())
    }

    pub fn with(mut self, key: EntryKey, rights: Rights) -> Self {
        self.set(key, rights);
        self
    }

    fn set(&mut self, key: EntryKey, rights: Rights) {
        if rights.is_empty() {
            self.entries.remove(&key);
        } else {
            self.entries.insert(key, rights);
        }
    }

    pub fn entries(&self) -> &BTreeMap<EntryKey, Rights> {
        &self.entries
    }

    pub fn get(&self, key: &EntryKey) -> Rights {
        self.entries.get(key).copied().unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Return the ACL that results from applying `command` to this one.
    pub fn apply(&self, command: &AclCommand) -> MailboxAcl {
        let current = self.get(&command.key);
        let new = match command.mode {
            EditMode::Add => current | command.rights,
            EditMode::Remove => current - command.rights,
            EditMode::Replace => command.rights,
        };

        let mut acl = self.clone();
        acl.set(command.key.clone(), new);
        acl
    }

    /// Whether `user` holds `right` through their own user entry, without
    /// it being revoked by the corresponding negative entry.
    pub fn user_holds(&self, user: &str, right: Rights) -> bool {
        let key = EntryKey::user(user);
        self.get(&key).contains(right)
            && !self.get(&key.negated()).contains(right)
    }
}

impl fmt::Debug for MailboxAcl {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_map()
            .entries(
                self.entries
                    .iter()
                    .map(|(k, v)| (k.to_string(), v.to_string())),
            )
            .finish()
    }
}

/// The difference between two states of an ACL.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AclDiff {
    pub old: MailboxAcl,
    pub new: MailboxAcl,
}

impl AclDiff {
    pub fn compute(old: MailboxAcl, new: MailboxAcl) -> Self {
        Self { old, new }
    }

    pub fn is_empty(&self) -> bool {
        self.old == self.new
    }

    /// Entries present only after the change.
    pub fn added_entries(&self) -> Vec<(EntryKey, Rights)> {
        self.new
            .entries
            .iter()
            .filter(|(k, _)| !self.old.entries.contains_key(k))
            .map(|(k, &v)| (k.clone(), v))
            .collect()
    }

    /// Entries present only before the change.
    pub fn removed_entries(&self) -> Vec<(EntryKey, Rights)> {
        self.old
            .entries
            .iter()
            .filter(|(k, _)| !self.new.entries.contains_key(k))
            .map(|(k, &v)| (k.clone(), v))
            .collect()
    }

    /// Entries whose rights changed, as `(key, before, after)`.
    pub fn changed_entries(&self) -> Vec<(EntryKey, Rights, Rights)> {
        self.old
            .entries
            .iter()
            .filter_map(|(k, &before)| {
                self.new
                    .entries
                    .get(k)
                    .filter(|&&after| after != before)
                    .map(|&after| (k.clone(), before, after))
            })
            .collect()
    }
}
