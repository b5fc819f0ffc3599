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

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, RwLock};

use crate::store::mapper::AttachmentStore;
use crate::store::model::*;
use crate::support::error::Error;

struct StoredAttachment {
    metadata: AttachmentMetadata,
    content: Arc<[u8]>,
    messages: BTreeSet<MessageId>,
}

/// Content-addressed attachment blobs, deduplicated by `AttachmentId`.
#[derive(Default)]
pub struct MemoryAttachmentStore {
    attachments: RwLock<HashMap<AttachmentId, StoredAttachment>>,
}

impl MemoryAttachmentStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn with<R>(
        &self,
        id: &AttachmentId,
        f: impl FnOnce(&StoredAttachment) -> R,
    ) -> Result<R, Error> {
        self.attachments
            .read()
            .expect("attachment table poisoned")
            .get(id)
            .map(f)
            .ok_or(Error::NxAttachment)
    }
}

impl AttachmentStore for MemoryAttachmentStore {
    fn store(
        &self,
        content_type: &str,
        content: &[u8],
        message_id: MessageId,
    ) -> Result<AttachmentMetadata, Error> {
        let id = AttachmentId::for_content(content);
        let mut attachments =
            self.attachments.write().expect("attachment table poisoned");
        let stored =
            attachments
                .entry(id.clone())
                .or_insert_with(|| StoredAttachment {
                    metadata: AttachmentMetadata {
                        id,
                        content_type: content_type.to_owned(),
                        size: content.len() as u64,
                    },
                    content: content.into(),
                    messages: BTreeSet::new(),
                });
        stored.messages.insert(message_id);
        Ok(stored.metadata.clone())
    }

    fn get(&self, id: &AttachmentId) -> Result<AttachmentMetadata, Error> {
        self.with(id, |a| a.metadata.clone())
    }

    fn load(&self, id: &AttachmentId) -> Result<Arc<[u8]>, Error> {
        self.with(id, |a| Arc::clone(&a.content))
    }

    fn get_attachments(
        &self,
        ids: &[AttachmentId],
    ) -> Result<Vec<AttachmentMetadata>, Error> {
        let attachments =
            self.attachments.read().expect("attachment table poisoned");
        Ok(ids
            .iter()
            .filter_map(|id| attachments.get(id))
            .map(|a| a.metadata.clone())
            .collect())
    }

    fn related_messages(
        &self,
        id: &AttachmentId,
    ) -> Result<Vec<MessageId>, Error> {
        self.with(id, |a| a.messages.iter().copied().collect())
    }
}
