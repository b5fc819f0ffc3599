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

use log::debug;

use super::{Event, EventKind, EventListener, ExecutionMode, ListenerError};

/// A global listener which logs a one-line summary of every event at debug
/// level.
#[derive(Clone, Copy, Debug, Default)]
pub struct LoggingListener;

impl EventListener for LoggingListener {
    fn execution_mode(&self) -> ExecutionMode {
        ExecutionMode::Asynchronous
    }

    fn handle(&self, event: &Event) -> Result<(), ListenerError> {
        debug!("{}", summarise(event));
        Ok(())
    }
}

fn summarise(event: &Event) -> String {
    let detail = match event.kind {
        EventKind::Added {
            ref mailbox,
            ref added,
            ..
        } => format!("{} message(s) into {}", added.len(), mailbox.path),
        EventKind::Expunged {
            ref mailbox,
            ref expunged,
            ..
        } => format!("{} message(s) from {}", expunged.len(), mailbox.path),
        EventKind::FlagsUpdated {
            ref mailbox,
            ref updated,
        } => format!("{} message(s) in {}", updated.len(), mailbox.path),
        EventKind::MailboxAdded { ref mailbox } => mailbox.path.to_string(),
        EventKind::MailboxDeletion {
            ref mailbox,
            deleted_message_count,
            total_deleted_size,
            ..
        } => format!(
            "{} with {} message(s), {} byte(s)",
            mailbox.path, deleted_message_count, total_deleted_size
        ),
        EventKind::MailboxRenamed {
            ref mailbox,
            ref new_path,
        } => format!("{} -> {}", mailbox.path, new_path),
        EventKind::MessageMoved {
            ref message_ids,
            ref previous,
            ref current,
        } => format!(
            "{} message(s) {:?} -> {:?}",
            message_ids.len(),
            previous,
            current
        ),
        EventKind::AnnotationChanged {
            ref mailbox,
            ref keys,
        } => format!("{:?} on {}", keys, mailbox.path),
        EventKind::AclUpdated {
            ref mailbox,
            ref diff,
        } => format!(
            "{} entries changed on {}",
            diff.added_entries().len()
                + diff.removed_entries().len()
                + diff.changed_entries().len(),
            mailbox.path
        ),
        EventKind::QuotaUsageUpdated {
            ref root,
            count_quota,
            size_quota,
            ..
        } => format!("{} count {} size {}", root, count_quota, size_quota),
    };

    format!(
        "session-{}[{}] {} {}: {}",
        event.session_id,
        event.user,
        event.name(),
        event.id,
        detail
    )
}
