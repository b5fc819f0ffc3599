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

use std::sync::Arc;

pub mod acl;
pub mod mapper;
pub mod memory;
pub mod model;

use self::mapper::*;

/// One consistent set of storage implementations.
#[derive(Clone)]
pub struct Backend {
    pub uids: Arc<dyn UidProvider>,
    pub mod_seqs: Arc<dyn ModSeqProvider>,
    pub mailboxes: Arc<dyn MailboxRepository>,
    pub messages: Arc<dyn MessageStore>,
    pub message_ids: Arc<dyn MessageIdentityIndex>,
    pub annotations: Arc<dyn AnnotationStore>,
    pub attachments: Arc<dyn AttachmentStore>,
}
