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

//! The in-memory backend.
//!
//! Everything lives in process memory behind fine-grained locks. This is the
//! reference implementation of the contracts in `store::mapper`, and what the
//! engine's tests run against.

mod annotations;
mod attachments;
mod identifiers;
mod mailboxes;
mod messages;

use std::sync::Arc;

pub use self::annotations::MemoryAnnotationStore;
pub use self::attachments::MemoryAttachmentStore;
pub use self::identifiers::{MemoryModSeqProvider, MemoryUidProvider};
pub use self::mailboxes::MemoryMailboxRepository;
pub use self::messages::MemoryMessageStore;

use super::Backend;

/// Build a complete, empty in-memory backend.
pub fn backend() -> Backend {
    let uids = Arc::new(MemoryUidProvider::new());
    let mod_seqs = Arc::new(MemoryModSeqProvider::new());
    let messages = Arc::new(MemoryMessageStore::new(
        Arc::clone(&uids) as _,
        Arc::clone(&mod_seqs) as _,
    ));

    Backend {
        uids,
        mod_seqs,
        mailboxes: Arc::new(MemoryMailboxRepository::new()),
        messages: Arc::clone(&messages) as _,
        message_ids: messages,
        annotations: Arc::new(MemoryAnnotationStore::new()),
        attachments: Arc::new(MemoryAttachmentStore::new()),
    }
}
