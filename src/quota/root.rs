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

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::store::mapper::MailboxRepository;
use crate::store::model::{Mailbox, MailboxPath};
use crate::support::error::Error;

/// The scope over which usage is aggregated.
///
/// The string form is `namespace&user`, for example
/// `#private&alice@example.com`. Shared mailboxes have an empty user.
#[derive(
    Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct QuotaRoot {
    namespace: String,
    user: String,
}

impl QuotaRoot {
    pub fn new(namespace: &str, user: &str) -> Self {
        Self {
            namespace: namespace.to_owned(),
            user: user.to_owned(),
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn user(&self) -> &str {
        &self.user
    }

    /// The lower-cased part of the user after the last `@`, if any.
    pub fn domain(&self) -> Option<String> {
        self.user
            .rfind('@')
            .map(|ix| &self.user[ix + 1..])
            .filter(|d| !d.is_empty())
            .map(str::to_ascii_lowercase)
    }

    /// Whether `path` is aggregated under this root by the default
    /// one-root-per-user policy.
    fn covers(&self, path: &MailboxPath) -> bool {
        path.namespace == self.namespace
            && path.user.as_deref().unwrap_or("") == self.user
    }
}

impl fmt::Display for QuotaRoot {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}&{}", self.namespace, self.user)
    }
}

impl fmt::Debug for QuotaRoot {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "QuotaRoot({})", self)
    }
}

impl FromStr for QuotaRoot {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Error> {
        let ix = s.find('&').ok_or(Error::BadQuotaRoot)?;
        let (namespace, user) = (&s[..ix], &s[ix + 1..]);
        if namespace.is_empty() || user.contains('&') {
            return Err(Error::BadQuotaRoot);
        }

        Ok(QuotaRoot::new(namespace, user))
    }
}

/// Maps mailboxes onto the root their usage counts against.
pub trait QuotaRootResolver: Send + Sync {
    fn quota_root(&self, path: &MailboxPath) -> Result<QuotaRoot, Error>;

    /// Every live mailbox whose usage counts against `root`.
    fn associated_mailboxes(
        &self,
        root: &QuotaRoot,
    ) -> Result<Vec<Mailbox>, Error>;
}

/// One root per namespace and owner.
pub struct MailboxQuotaRootResolver {
    mailboxes: Arc<dyn MailboxRepository>,
}

impl MailboxQuotaRootResolver {
    pub fn new(mailboxes: Arc<dyn MailboxRepository>) -> Self {
        Self { mailboxes }
    }
}

impl QuotaRootResolver for MailboxQuotaRootResolver {
    fn quota_root(&self, path: &MailboxPath) -> Result<QuotaRoot, Error> {
        Ok(QuotaRoot::new(
            &path.namespace,
            path.user.as_deref().unwrap_or(""),
        ))
    }

    fn associated_mailboxes(
        &self,
        root: &QuotaRoot,
    ) -> Result<Vec<Mailbox>, Error> {
        Ok(self
            .mailboxes
            .list()?
            .into_iter()
            .filter(|mb| root.covers(&mb.path))
            .collect())
    }
}
