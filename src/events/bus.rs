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

//! Fan-out of events to registered listeners.
//!
//! Every asynchronous group gets its own bounded queue served by one thread,
//! so queued deliveries to a group happen in dispatch order. Asynchronous
//! global and key listeners share a small pool. When a queue is full, the
//! delivery is run on the dispatching thread instead, which gives
//! back-pressure without ever dropping an event.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, RwLock};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crossbeam::channel::{self, Receiver, Sender, TrySendError};
use log::{debug, error, warn};

use super::{
    Event, EventDeadLetters, EventListener, ExecutionMode, Group,
    ListenerError, Registration, RegistrationKey, RetryBackoff,
};
use crate::support::error::Error;
use crate::support::system_config::EventBusConfig;

type Listener = Arc<dyn EventListener>;

enum Job {
    /// Deliver to whichever listener holds `group` when the job runs.
    Group { group: Group, event: Arc<Event> },
    Ungrouped { listener: Listener, event: Arc<Event> },
}

struct Queue {
    sender: Sender<Job>,
    threads: Vec<JoinHandle<()>>,
}

/// State shared between the bus and its worker threads.
struct Shared {
    groups: RwLock<HashMap<Group, Listener>>,
    globals: RwLock<Vec<Listener>>,
    keyed: RwLock<HashMap<RegistrationKey, Vec<(Registration, Listener)>>>,
    dead_letters: Arc<dyn EventDeadLetters>,
    backoff: RetryBackoff,
    in_flight: Mutex<usize>,
    idle: Condvar,
}

pub struct EventBus {
    shared: Arc<Shared>,
    group_queues: Mutex<HashMap<Group, Queue>>,
    pool: Mutex<Option<Queue>>,
    queue_size: usize,
    workers: usize,
    next_registration: AtomicU64,
}

impl EventBus {
    pub fn new(
        config: &EventBusConfig,
        dead_letters: Arc<dyn EventDeadLetters>,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                groups: RwLock::new(HashMap::new()),
                globals: RwLock::new(Vec::new()),
                keyed: RwLock::new(HashMap::new()),
                dead_letters,
                backoff: RetryBackoff::new(&config.retry),
                in_flight: Mutex::new(0),
                idle: Condvar::new(),
            }),
            group_queues: Mutex::new(HashMap::new()),
            pool: Mutex::new(None),
            queue_size: config.queue_size.max(1),
            workers: config.effective_workers(),
            next_registration: AtomicU64::new(1),
        }
    }

    pub fn dead_letters(&self) -> &dyn EventDeadLetters {
        &*self.shared.dead_letters
    }

    /// Register `listener` as the one listener of `group`.
    ///
    /// A later registration of the same group replaces the earlier one,
    /// including for events already queued but not yet delivered.
    pub fn register(&self, listener: Listener, group: Group) {
        if ExecutionMode::Asynchronous == listener.execution_mode() {
            self.ensure_group_queue(&group);
        }

        let replaced = self
            .shared
            .groups
            .write()
            .expect("listener registry poisoned")
            .insert(group.clone(), listener);
        if replaced.is_some() {
            debug!("Replaced listener of group {}", group);
        }
    }

    /// Register `listener` under the group it declares itself, returning
    /// that group.
    pub fn register_default(&self, listener: Listener) -> Result<Group, Error> {
        let group = listener.default_group().ok_or(Error::NoDefaultGroup)?;
        self.register(listener, group.clone());
        Ok(group)
    }

    pub fn unregister(&self, group: &Group) {
        self.shared
            .groups
            .write()
            .expect("listener registry poisoned")
            .remove(group);
    }

    /// Register a listener which receives every event.
    pub fn register_global(&self, listener: Listener) {
        if ExecutionMode::Asynchronous == listener.execution_mode() {
            self.ensure_pool();
        }

        self.shared
            .globals
            .write()
            .expect("listener registry poisoned")
            .push(listener);
    }

    /// Register a listener for events dispatched with `key`.
    pub fn register_key(
        &self,
        listener: Listener,
        key: RegistrationKey,
    ) -> Registration {
        if ExecutionMode::Asynchronous == listener.execution_mode() {
            self.ensure_pool();
        }

        let registration = Registration(
            self.next_registration.fetch_add(1, Ordering::Relaxed),
        );
        self.shared
            .keyed
            .write()
            .expect("listener registry poisoned")
            .entry(key)
            .or_default()
            .push((registration, listener));
        registration
    }

    pub fn unregister_key(&self, registration: Registration) {
        let mut keyed =
            self.shared.keyed.write().expect("listener registry poisoned");
        for listeners in keyed.values_mut() {
            listeners.retain(|&(r, _)| r != registration);
        }
        keyed.retain(|_, listeners| !listeners.is_empty());
    }

    /// Deliver `event` to every group, every global listener, and every
    /// listener registered under one of `keys`.
    ///
    /// Asynchronous deliveries are only queued. Synchronous ones run before
    /// this returns; if any of them fails, the first failure is returned
    /// after all the others have run.
    pub fn dispatch(
        &self,
        event: Event,
        keys: &[RegistrationKey],
    ) -> Result<(), Error> {
        if event.is_noop() {
            return Ok(());
        }

        let event = Arc::new(event);
        let mut failure: Option<String> = None;

        let groups = self
            .shared
            .groups
            .read()
            .expect("listener registry poisoned")
            .iter()
            .map(|(g, l)| (g.clone(), Arc::clone(l)))
            .collect::<Vec<_>>();
        for (group, listener) in groups {
            if !listener.is_handling(&event) {
                continue;
            }

            match listener.execution_mode() {
                ExecutionMode::Synchronous => {
                    if let Err(e) = listener.handle(&event) {
                        error!(
                            "Listener group {} failed on {} event {}: {}",
                            group,
                            event.name(),
                            event.id,
                            e
                        );
                        failure
                            .get_or_insert_with(|| format!("{}: {}", group, e));
                    }
                },
                ExecutionMode::Asynchronous => self.submit(Job::Group {
                    group,
                    event: Arc::clone(&event),
                }),
            }
        }

        let mut ungrouped = self
            .shared
            .globals
            .read()
            .expect("listener registry poisoned")
            .clone();
        {
            let keyed =
                self.shared.keyed.read().expect("listener registry poisoned");
            for key in keys {
                if let Some(listeners) = keyed.get(key) {
                    ungrouped
                        .extend(listeners.iter().map(|(_, l)| Arc::clone(l)));
                }
            }
        }

        for listener in ungrouped {
            if !listener.is_handling(&event) {
                continue;
            }

            match listener.execution_mode() {
                ExecutionMode::Synchronous => {
                    if let Err(e) = listener.handle(&event) {
                        error!(
                            "Ungrouped listener failed on {} event {}: {}",
                            event.name(),
                            event.id,
                            e
                        );
                        failure.get_or_insert_with(|| e.to_string());
                    }
                },
                ExecutionMode::Asynchronous => self.submit(Job::Ungrouped {
                    listener,
                    event: Arc::clone(&event),
                }),
            }
        }

        match failure {
            None => Ok(()),
            Some(failure) => Err(Error::ListenerFailed(failure)),
        }
    }

    /// Deliver `event` again to the current listener of `group` only.
    pub fn redeliver(&self, group: &Group, event: Event) -> Result<(), Error> {
        if event.is_noop() {
            return Ok(());
        }

        let listener = self
            .shared
            .groups
            .read()
            .expect("listener registry poisoned")
            .get(group)
            .cloned()
            .ok_or_else(|| Error::GroupNotRegistered(group.to_string()))?;

        if !listener.is_handling(&event) {
            return Ok(());
        }

        match listener.execution_mode() {
            ExecutionMode::Synchronous => listener
                .handle(&event)
                .map_err(|e| {
                    Error::ListenerFailed(format!("{}: {}", group, e))
                }),
            ExecutionMode::Asynchronous => {
                self.submit(Job::Group {
                    group: group.clone(),
                    event: Arc::new(event),
                });
                Ok(())
            },
        }
    }

    /// Take every event parked under `group` out of the dead-letter store
    /// and redeliver it. Returns the number of events replayed.
    pub fn replay_dead_letters(&self, group: &Group) -> Result<usize, Error> {
        let dead_letters = &self.shared.dead_letters;
        let mut replayed = 0;
        for id in dead_letters.failed_ids(group)? {
            if let Some(event) = dead_letters.failed_event(group, id)? {
                self.redeliver(group, event)?;
                dead_letters.remove(group, id)?;
                replayed += 1;
            }
        }

        Ok(replayed)
    }

    /// Block until no asynchronous delivery is queued or running, or until
    /// `timeout` passes. Returns whether the bus became idle.
    pub fn wait_idle(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut in_flight =
            self.shared.in_flight.lock().expect("in-flight count poisoned");
        while *in_flight > 0 {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }

            in_flight = self
                .shared
                .idle
                .wait_timeout(in_flight, deadline - now)
                .expect("in-flight count poisoned")
                .0;
        }

        true
    }

    fn ensure_group_queue(&self, group: &Group) {
        let mut queues =
            self.group_queues.lock().expect("queue table poisoned");
        if queues.contains_key(group) {
            return;
        }

        if let Some(queue) =
            self.spawn_queue(&format!("events-{}", group), 1)
        {
            queues.insert(group.clone(), queue);
        }
    }

    fn ensure_pool(&self) {
        let mut pool = self.pool.lock().expect("worker pool poisoned");
        if pool.is_none() {
            *pool = self.spawn_queue("events-pool", self.workers);
        }
    }

    /// Start `threads` workers on a new bounded queue.
    ///
    /// If no thread at all can be started, returns `None`, and jobs for the
    /// queue are run on the dispatching thread.
    fn spawn_queue(&self, name: &str, threads: usize) -> Option<Queue> {
        let (sender, receiver) = channel::bounded(self.queue_size);
        let mut handles = Vec::with_capacity(threads);
        for ix in 0..threads.max(1) {
            let receiver: Receiver<Job> = receiver.clone();
            let shared = Arc::clone(&self.shared);
            match std::thread::Builder::new()
                .name(format!("{}-{}", name, ix))
                .spawn(move || {
                    for job in receiver.iter() {
                        shared.run(job);
                    }
                }) {
                Ok(handle) => handles.push(handle),
                Err(e) => {
                    error!("Failed to start event worker {}: {}", name, e);
                    break;
                },
            }
        }

        if handles.is_empty() {
            None
        } else {
            Some(Queue {
                sender,
                threads: handles,
            })
        }
    }

    fn submit(&self, job: Job) {
        *self.shared.in_flight.lock().expect("in-flight count poisoned") += 1;

        let sender = match job {
            Job::Group { ref group, .. } => self
                .group_queues
                .lock()
                .expect("queue table poisoned")
                .get(group)
                .map(|q| q.sender.clone()),
            Job::Ungrouped { .. } => self
                .pool
                .lock()
                .expect("worker pool poisoned")
                .as_ref()
                .map(|q| q.sender.clone()),
        };

        let job = match sender {
            None => job,
            Some(sender) => match sender.try_send(job) {
                Ok(()) => return,
                Err(TrySendError::Full(job)) => {
                    warn!("Event queue full, delivering inline");
                    job
                },
                Err(TrySendError::Disconnected(job)) => job,
            },
        };

        // No queue could take the job, so it runs here
        self.shared.run(job);
    }
}

impl Drop for EventBus {
    fn drop(&mut self) {
        let mut queues = self
            .group_queues
            .get_mut()
            .map(std::mem::take)
            .unwrap_or_default()
            .into_iter()
            .map(|(_, q)| q)
            .collect::<Vec<_>>();
        if let Ok(pool) = self.pool.get_mut() {
            queues.extend(pool.take());
        }

        for queue in queues {
            // Closing the channel makes the workers exit once it drains
            drop(queue.sender);
            for thread in queue.threads {
                let _ = thread.join();
            }
        }
    }
}

impl Shared {
    fn run(&self, job: Job) {
        match job {
            Job::Group { group, event } => {
                let listener = self
                    .groups
                    .read()
                    .expect("listener registry poisoned")
                    .get(&group)
                    .cloned();
                match listener {
                    Some(listener) => {
                        self.deliver(&*listener, &event, Some(&group))
                    },
                    None => debug!(
                        "Group {} unregistered, dropping event {}",
                        group, event.id
                    ),
                }
            },
            Job::Ungrouped { listener, event } => {
                self.deliver(&*listener, &event, None)
            },
        }

        let mut in_flight =
            self.in_flight.lock().expect("in-flight count poisoned");
        *in_flight = in_flight.saturating_sub(1);
        if 0 == *in_flight {
            self.idle.notify_all();
        }
    }

    /// Run one asynchronous delivery to completion, retrying transient
    /// failures and parking the event if it cannot be delivered.
    fn deliver(
        &self,
        listener: &dyn EventListener,
        event: &Event,
        group: Option<&Group>,
    ) {
        let label = group.map_or("(ungrouped)", Group::name);
        let mut attempt = 0;
        let failure = loop {
            match listener.handle(event) {
                Ok(()) => return,
                Err(e @ ListenerError::Terminal(_)) => break e,
                Err(e) if attempt >= self.backoff.max_retries => break e,
                Err(e) => {
                    let delay = self.backoff.delay(attempt);
                    warn!(
                        "Listener {} failed on {} event {} (attempt {}), \
                         retrying in {:?}: {}",
                        label,
                        event.name(),
                        event.id,
                        attempt + 1,
                        delay,
                        e
                    );
                    std::thread::sleep(delay);
                    attempt += 1;
                },
            }
        };

        match group {
            Some(group) => {
                match self.dead_letters.store(group, event.clone()) {
                    Ok(id) => error!(
                        "Listener {} gave up on {} event {}, parked as {}: {}",
                        group,
                        event.name(),
                        event.id,
                        id,
                        failure
                    ),
                    Err(e) => error!(
                        "Listener {} gave up on {} event {}, and it could \
                         not be parked ({}): {}",
                        group,
                        event.name(),
                        event.id,
                        e,
                        failure
                    ),
                }
            },
            None => error!(
                "Ungrouped listener gave up on {} event {}: {}",
                event.name(),
                event.id,
                failure
            ),
        }
    }
}
