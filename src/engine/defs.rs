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

use chrono::prelude::*;

use crate::events::{
    Event, EventBus, EventKind, MemoryEventDeadLetters, RegistrationKey,
};
use crate::quota::*;
use crate::store::model::*;
use crate::store::{memory, Backend};
use crate::support::error::Error;
use crate::support::mailbox_paths::normalise_mailbox_name;
use crate::support::system_config::{AnnotationConfig, SystemConfig};

/// The mail store.
///
/// Every mutating operation runs the same sequence: quota pre-check where
/// relevant, identifier allocation, the store mutation, the quota update,
/// and finally event dispatch. Nothing here is global; two engines share
/// nothing unless built over the same backend.
#[derive(Clone)]
pub struct Engine {
    pub(super) backend: Backend,
    pub(super) resolver: Arc<dyn QuotaRootResolver>,
    pub(super) quota: QuotaManager,
    pub(super) events: Arc<EventBus>,
    pub(super) delimiter: char,
    pub(super) annotation_limits: AnnotationConfig,
}

/// Options for `Engine::append`.
#[derive(Clone, Debug, Default)]
pub struct AppendOptions {
    pub flags: Flags,
    /// Defaults to the time of the append.
    pub internal_date: Option<DateTime<Utc>>,
    /// Whether the message arrives through mail delivery rather than a
    /// client upload.
    pub is_delivery: bool,
    /// Whether the new message carries `\Recent`.
    pub is_recent: bool,
    pub attachments: Vec<NewAttachment>,
}

/// One entry of a mailbox listing.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ListedMailbox {
    pub mailbox: Mailbox,
    pub has_children: bool,
}

impl Engine {
    /// Build an engine over `backend`, keeping quota limits, quota usage
    /// and dead letters in memory.
    pub fn new(backend: Backend, config: &SystemConfig) -> Self {
        let resolver = Arc::new(MailboxQuotaRootResolver::new(Arc::clone(
            &backend.mailboxes,
        )));
        let quota = QuotaManager::new(
            Arc::new(MemoryMaxQuotaManager::from_config(&config.quota)),
            Arc::new(MemoryCurrentQuotaStore::new()),
        );
        let events = Arc::new(EventBus::new(
            &config.event_bus,
            Arc::new(MemoryEventDeadLetters::new()),
        ));

        Self::with_components(backend, resolver, quota, events, config)
    }

    pub fn with_components(
        backend: Backend,
        resolver: Arc<dyn QuotaRootResolver>,
        quota: QuotaManager,
        events: Arc<EventBus>,
        config: &SystemConfig,
    ) -> Self {
        Self {
            backend,
            resolver,
            quota,
            events,
            delimiter: config.mailbox.delimiter,
            annotation_limits: config.annotations.clone(),
        }
    }

    /// An engine over a fresh in-memory backend.
    pub fn in_memory(config: &SystemConfig) -> Self {
        Self::new(memory::backend(), config)
    }

    pub fn backend(&self) -> &Backend {
        &self.backend
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn quota(&self) -> &QuotaManager {
        &self.quota
    }

    pub fn delimiter(&self) -> char {
        self.delimiter
    }

    /// The path of the mailbox `name` in the session user's own namespace.
    pub fn personal_path(
        &self,
        session: &MailboxSession,
        name: &str,
    ) -> Result<MailboxPath, Error> {
        Ok(MailboxPath::for_user(
            &session.user,
            &normalise_mailbox_name(name, self.delimiter)?,
        ))
    }

    pub fn quota_root(&self, path: &MailboxPath) -> Result<QuotaRoot, Error> {
        self.resolver.quota_root(path)
    }

    /// Return the message and storage quotas of `root`.
    pub fn get_quotas(
        &self,
        root: &QuotaRoot,
    ) -> Result<(Quota, Quota), Error> {
        Ok((
            self.quota.get_message_quota(root)?,
            self.quota.get_storage_quota(root)?,
        ))
    }

    /// Rebuild the usage of `root` from the messages actually stored.
    pub fn recompute_quota(
        &self,
        session: &MailboxSession,
        root: &QuotaRoot,
    ) -> Result<QuotaUsage, Error> {
        let usage = self.quota.recompute(
            root,
            &*self.resolver,
            &*self.backend.messages,
        )?;
        self.dispatch_quota_update(session, root)?;
        Ok(usage)
    }

    pub(super) fn find_mailbox(
        &self,
        path: &MailboxPath,
    ) -> Result<Mailbox, Error> {
        self.backend.mailboxes.find_by_path(path)
    }

    pub(super) fn dispatch(
        &self,
        session: &MailboxSession,
        kind: EventKind,
    ) -> Result<(), Error> {
        let event = Event::new(session, kind);
        let keys = event
            .mailbox_id()
            .map(RegistrationKey::Mailbox)
            .into_iter()
            .collect::<Vec<_>>();
        self.events.dispatch(event, &keys)
    }

    pub(super) fn dispatch_quota_update(
        &self,
        session: &MailboxSession,
        root: &QuotaRoot,
    ) -> Result<(), Error> {
        let (count_quota, size_quota) = self.get_quotas(root)?;
        self.dispatch(
            session,
            EventKind::QuotaUsageUpdated {
                root: root.clone(),
                count_quota,
                size_quota,
                instant: Utc::now(),
            },
        )
    }
}

#[cfg(test)]
pub(super) struct TestFixture {
    pub(super) engine: Engine,
    pub(super) session: MailboxSession,
    pub(super) recorder: Arc<test_support::Recorder>,
}

#[cfg(test)]
impl TestFixture {
    pub(super) fn new() -> Self {
        Self::with_config(SystemConfig::default())
    }

    pub(super) fn with_config(config: SystemConfig) -> Self {
        Self::with_engine(Engine::in_memory(&config))
    }

    pub(super) fn with_engine(engine: Engine) -> Self {
        crate::init_test_log();

        let recorder = Arc::new(test_support::Recorder::default());
        engine.events().register_global(recorder.clone());

        Self {
            engine,
            session: MailboxSession::new("alice"),
            recorder,
        }
    }

    pub(super) fn path(&self, name: &str) -> MailboxPath {
        MailboxPath::for_user(&self.session.user, name)
    }

    pub(super) fn create(&self, name: &str) -> Mailbox {
        self.engine
            .create_mailbox(&self.session, &self.path(name))
            .unwrap()
    }

    pub(super) fn append(&self, name: &str, content: &str) -> MessageMetaData {
        self.engine
            .append(
                &self.session,
                &self.path(name),
                content.as_bytes().to_vec(),
                AppendOptions::default(),
            )
            .unwrap()
    }

    pub(super) fn append_flagged(
        &self,
        name: &str,
        content: &str,
        flags: Flags,
    ) -> MessageMetaData {
        self.engine
            .append(
                &self.session,
                &self.path(name),
                content.as_bytes().to_vec(),
                AppendOptions {
                    flags,
                    ..AppendOptions::default()
                },
            )
            .unwrap()
    }

    pub(super) fn uids(&self, name: &str) -> Vec<u32> {
        let mailbox = self.engine.get_mailbox(&self.path(name)).unwrap();
        self.engine
            .backend()
            .messages
            .find_in_mailbox(
                &mailbox,
                MessageRange::All,
                FetchType::Metadata,
                0,
            )
            .unwrap()
            .into_iter()
            .map(|m| m.uid.get())
            .collect()
    }

    pub(super) fn root(&self) -> QuotaRoot {
        self.engine.quota_root(&self.path("INBOX")).unwrap()
    }

    pub(super) fn usage(&self) -> QuotaUsage {
        self.engine.quota().current().current(&self.root()).unwrap()
    }

    /// The names of the events seen so far, clearing the record.
    pub(super) fn take_events(&self) -> Vec<&'static str> {
        self.recorder.take().iter().map(Event::name).collect()
    }
}

#[cfg(test)]
pub(super) mod test_support {
    use std::sync::Mutex;

    use crate::events::{Event, EventListener, ListenerError};

    /// A synchronous global listener which remembers every event.
    #[derive(Default)]
    pub struct Recorder {
        events: Mutex<Vec<Event>>,
    }

    impl Recorder {
        pub fn take(&self) -> Vec<Event> {
            std::mem::take(&mut *self.events.lock().unwrap())
        }
    }

    impl EventListener for Recorder {
        fn handle(&self, event: &Event) -> Result<(), ListenerError> {
            self.events.lock().unwrap().push(event.clone());
            Ok(())
        }
    }

    /// A synchronous listener which rejects every event of one kind.
    pub struct FailOn(pub &'static str);

    impl EventListener for FailOn {
        fn is_handling(&self, event: &Event) -> bool {
            event.name() == self.0
        }

        fn handle(&self, event: &Event) -> Result<(), ListenerError> {
            Err(ListenerError::Terminal(format!("refused {}", event.name())))
        }
    }
}
