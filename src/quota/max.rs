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

use std::collections::HashMap;
use std::sync::Mutex;

use super::{QuotaKind, QuotaRoot};
use crate::support::error::Error;
use crate::support::system_config::{QuotaConfig, QuotaLimits};

/// The level at which a quota ceiling is configured.
#[derive(Clone, Copy, Debug)]
pub enum QuotaScope<'a> {
    Root(&'a QuotaRoot),
    Domain(&'a str),
    Global,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
enum ScopeKey {
    Root(QuotaRoot),
    Domain(String),
    Global,
}

impl<'a> From<QuotaScope<'a>> for ScopeKey {
    fn from(scope: QuotaScope<'a>) -> Self {
        match scope {
            QuotaScope::Root(root) => ScopeKey::Root(root.clone()),
            QuotaScope::Domain(domain) => {
                ScopeKey::Domain(domain.to_ascii_lowercase())
            },
            QuotaScope::Global => ScopeKey::Global,
        }
    }
}

impl QuotaLimits {
    pub fn get(&self, kind: QuotaKind) -> Option<u64> {
        match kind {
            QuotaKind::Count => self.max_messages,
            QuotaKind::Size => self.max_storage,
        }
    }

    pub fn set(&mut self, kind: QuotaKind, limit: Option<u64>) {
        match kind {
            QuotaKind::Count => self.max_messages = limit,
            QuotaKind::Size => self.max_storage = limit,
        }
    }
}

/// Storage of configured quota ceilings.
pub trait MaxQuotaManager: Send + Sync {
    /// Set the ceiling of `kind` at exactly `scope`. `None` removes it.
    fn set_limit(
        &self,
        scope: QuotaScope<'_>,
        kind: QuotaKind,
        limit: Option<u64>,
    ) -> Result<(), Error>;

    /// The ceiling configured at exactly `scope`, ignoring other levels.
    fn get_limit(
        &self,
        scope: QuotaScope<'_>,
        kind: QuotaKind,
    ) -> Result<Option<u64>, Error>;

    /// The ceiling that applies to `root`: its own, else its domain's, else
    /// the global one.
    fn effective_limit(
        &self,
        root: &QuotaRoot,
        kind: QuotaKind,
    ) -> Result<Option<u64>, Error> {
        if let Some(limit) = self.get_limit(QuotaScope::Root(root), kind)? {
            return Ok(Some(limit));
        }

        if let Some(domain) = root.domain() {
            if let Some(limit) =
                self.get_limit(QuotaScope::Domain(&domain), kind)?
            {
                return Ok(Some(limit));
            }
        }

        self.get_limit(QuotaScope::Global, kind)
    }
}

#[derive(Default)]
pub struct MemoryMaxQuotaManager {
    limits: Mutex<HashMap<ScopeKey, QuotaLimits>>,
}

impl MemoryMaxQuotaManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a manager pre-loaded with the global and per-domain defaults of
    /// `config`.
    pub fn from_config(config: &QuotaConfig) -> Self {
        let mut limits = HashMap::new();
        limits.insert(ScopeKey::Global, config.global());
        for (domain, domain_limits) in &config.domains {
            limits.insert(
                ScopeKey::Domain(domain.to_ascii_lowercase()),
                *domain_limits,
            );
        }

        Self {
            limits: Mutex::new(limits),
        }
    }
}

impl MaxQuotaManager for MemoryMaxQuotaManager {
    fn set_limit(
        &self,
        scope: QuotaScope<'_>,
        kind: QuotaKind,
        limit: Option<u64>,
    ) -> Result<(), Error> {
        let mut limits = self.limits.lock().expect("quota limits poisoned");
        let key = ScopeKey::from(scope);
        let entry = limits.entry(key.clone()).or_default();
        entry.set(kind, limit);
        if QuotaLimits::default() == *entry {
            limits.remove(&key);
        }
        Ok(())
    }

    fn get_limit(
        &self,
        scope: QuotaScope<'_>,
        kind: QuotaKind,
    ) -> Result<Option<u64>, Error> {
        Ok(self
            .limits
            .lock()
            .expect("quota limits poisoned")
            .get(&ScopeKey::from(scope))
            .and_then(|l| l.get(kind)))
    }
}

#[cfg(test)]
mod test {
    use std::collections::BTreeMap;

    use super::*;

    #[test]
    fn resolution_order() {
        let max = MemoryMaxQuotaManager::new();
        let root = QuotaRoot::new("#private", "alice@example.com");
        let other = QuotaRoot::new("#private", "bob@example.org");

        assert_eq!(None, max.effective_limit(&root, QuotaKind::Count).unwrap());

        max.set_limit(QuotaScope::Global, QuotaKind::Count, Some(100))
            .unwrap();
        assert_eq!(
            Some(100),
            max.effective_limit(&root, QuotaKind::Count).unwrap()
        );
        assert_eq!(None, max.effective_limit(&root, QuotaKind::Size).unwrap());

        max.set_limit(
            QuotaScope::Domain("Example.com"),
            QuotaKind::Count,
            Some(50),
        )
        .unwrap();
        assert_eq!(
            Some(50),
            max.effective_limit(&root, QuotaKind::Count).unwrap()
        );
        assert_eq!(
            Some(100),
            max.effective_limit(&other, QuotaKind::Count).unwrap()
        );

        max.set_limit(QuotaScope::Root(&root), QuotaKind::Count, Some(7))
            .unwrap();
        assert_eq!(
            Some(7),
            max.effective_limit(&root, QuotaKind::Count).unwrap()
        );

        // Removing a level falls back to the next one
        max.set_limit(QuotaScope::Root(&root), QuotaKind::Count, None)
            .unwrap();
        assert_eq!(
            Some(50),
            max.effective_limit(&root, QuotaKind::Count).unwrap()
        );
        assert_eq!(
            None,
            max.get_limit(QuotaScope::Root(&root), QuotaKind::Count)
                .unwrap()
        );
    }

    #[test]
    fn config_defaults() {
        let mut domains = BTreeMap::new();
        domains.insert(
            "example.com".to_owned(),
            QuotaLimits {
                max_messages: None,
                max_storage: Some(1024),
            },
        );
        let max = MemoryMaxQuotaManager::from_config(&QuotaConfig {
            max_messages: Some(10),
            max_storage: Some(4096),
            domains,
        });

        let root = QuotaRoot::new("#private", "alice@EXAMPLE.com");
        assert_eq!(
            Some(10),
            max.effective_limit(&root, QuotaKind::Count).unwrap()
        );
        assert_eq!(
            Some(1024),
            max.effective_limit(&root, QuotaKind::Size).unwrap()
        );
        assert_eq!(
            Some(4096),
            max.effective_limit(
                &QuotaRoot::new("#private", "bob"),
                QuotaKind::Size
            )
            .unwrap()
        );
    }
}
