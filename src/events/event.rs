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
use std::fmt;

use chrono::prelude::*;

use crate::quota::{Quota, QuotaRoot};
use crate::store::acl::{AclDiff, MailboxAcl};
use crate::store::model::*;

#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EventId(pub u64);

impl EventId {
    pub fn random() -> Self {
        EventId(rand::random())
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

impl fmt::Debug for EventId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "EventId({})", self)
    }
}

/// The mailbox an event is about, as it was when the event was built.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MailboxRef {
    pub id: MailboxId,
    pub path: MailboxPath,
}

impl From<&Mailbox> for MailboxRef {
    fn from(mailbox: &Mailbox) -> Self {
        Self {
            id: mailbox.id,
            path: mailbox.path.clone(),
        }
    }
}

/// A notification of one committed mutation.
#[derive(Clone, Debug)]
pub struct Event {
    pub id: EventId,
    pub session_id: SessionId,
    pub user: String,
    pub kind: EventKind,
}

#[derive(Clone, Debug)]
pub enum EventKind {
    Added {
        mailbox: MailboxRef,
        added: BTreeMap<Uid, MessageMetaData>,
        is_delivery: bool,
        is_appended: bool,
        /// Set when the messages arrived as part of a move.
        moved_from: Option<MailboxId>,
    },
    Expunged {
        mailbox: MailboxRef,
        expunged: BTreeMap<Uid, MessageMetaData>,
        /// Set when the messages left as part of a move.
        moved_to: Option<MailboxId>,
    },
    FlagsUpdated {
        mailbox: MailboxRef,
        updated: Vec<UpdatedFlags>,
    },
    MailboxAdded {
        mailbox: MailboxRef,
    },
    MailboxDeletion {
        mailbox: MailboxRef,
        acl: MailboxAcl,
        quota_root: QuotaRoot,
        deleted_message_count: u64,
        total_deleted_size: u64,
    },
    MailboxRenamed {
        mailbox: MailboxRef,
        new_path: MailboxPath,
    },
    MessageMoved {
        message_ids: Vec<MessageId>,
        previous: Vec<MailboxId>,
        current: Vec<MailboxId>,
    },
    AnnotationChanged {
        mailbox: MailboxRef,
        keys: Vec<AnnotationKey>,
    },
    AclUpdated {
        mailbox: MailboxRef,
        diff: AclDiff,
    },
    QuotaUsageUpdated {
        root: QuotaRoot,
        count_quota: Quota,
        size_quota: Quota,
        instant: DateTime<Utc>,
    },
}

impl Event {
    pub fn new(session: &MailboxSession, kind: EventKind) -> Self {
        Self {
            id: EventId::random(),
            session_id: session.id,
            user: session.user.clone(),
            kind,
        }
    }

    /// Whether this event describes no change at all.
    ///
    /// Noop events are never delivered.
    pub fn is_noop(&self) -> bool {
        match self.kind {
            EventKind::Added { ref added, .. } => added.is_empty(),
            EventKind::Expunged { ref expunged, .. } => expunged.is_empty(),
            EventKind::FlagsUpdated { ref updated, .. } => {
                updated.iter().all(|u| !u.flags_changed())
            },
            EventKind::MailboxRenamed {
                ref mailbox,
                ref new_path,
            } => mailbox.path == *new_path,
            EventKind::MessageMoved {
                ref message_ids,
                ref previous,
                ref current,
            } => message_ids.is_empty() || previous == current,
            EventKind::AnnotationChanged { ref keys, .. } => keys.is_empty(),
            EventKind::AclUpdated { ref diff, .. } => diff.is_empty(),
            EventKind::MailboxAdded { .. }
            | EventKind::MailboxDeletion { .. }
            | EventKind::QuotaUsageUpdated { .. } => false,
        }
    }

    /// The mailbox whose registration key this event is routed to.
    pub fn mailbox_id(&self) -> Option<MailboxId> {
        match self.kind {
            EventKind::Added { ref mailbox, .. }
            | EventKind::Expunged { ref mailbox, .. }
            | EventKind::FlagsUpdated { ref mailbox, .. }
            | EventKind::MailboxAdded { ref mailbox }
            | EventKind::MailboxDeletion { ref mailbox, .. }
            | EventKind::MailboxRenamed { ref mailbox, .. }
            | EventKind::AnnotationChanged { ref mailbox, .. }
            | EventKind::AclUpdated { ref mailbox, .. } => Some(mailbox.id),
            EventKind::MessageMoved { .. }
            | EventKind::QuotaUsageUpdated { .. } => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self.kind {
            EventKind::Added { .. } => "Added",
            EventKind::Expunged { .. } => "Expunged",
            EventKind::FlagsUpdated { .. } => "FlagsUpdated",
            EventKind::MailboxAdded { .. } => "MailboxAdded",
            EventKind::MailboxDeletion { .. } => "MailboxDeletion",
            EventKind::MailboxRenamed { .. } => "MailboxRenamed",
            EventKind::MessageMoved { .. } => "MessageMoved",
            EventKind::AnnotationChanged { .. } => "AnnotationChanged",
            EventKind::AclUpdated { .. } => "AclUpdated",
            EventKind::QuotaUsageUpdated { .. } => "QuotaUsageUpdated",
        }
    }
}
