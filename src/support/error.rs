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

use std::io;

use thiserror::Error;

use crate::quota::QuotaKind;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Mailbox already exists")]
    MailboxExists,
    #[error("No such mailbox")]
    NxMailbox,
    #[error("No such message")]
    NxMessage,
    #[error("No such attachment")]
    NxAttachment,
    #[error("Quota exceeded ({0})")]
    OverQuota(QuotaKind),
    #[error("Malformed mailbox id: {0:?}")]
    BadMailboxId(String),
    #[error("Unsafe key or mailbox name")]
    UnsafeName,
    #[error("Non-existent system flag")]
    NxFlag,
    #[error("Mailbox renamed to itself")]
    RenameToSelf,
    #[error("Mailbox renamed into its own hierarchy")]
    RenameIntoSelf,
    #[error("Mailbox full")]
    MailboxFull,
    #[error("Malformed annotation key")]
    BadAnnotationKey,
    #[error("Nil annotation values cannot be stored")]
    NilAnnotation,
    #[error("Too many annotations on mailbox")]
    AnnotationLimit,
    #[error("Annotation value too large")]
    AnnotationTooLarge,
    #[error("Malformed quota root")]
    BadQuotaRoot,
    #[error("Malformed ACL entry")]
    BadAcl,
    #[error("Listener group not registered: {0}")]
    GroupNotRegistered(String),
    #[error("Listener declares no group")]
    NoDefaultGroup,
    #[error("Synchronous listener failed: {0}")]
    ListenerFailed(String),
    #[error(transparent)]
    Io(#[from] io::Error),
}
