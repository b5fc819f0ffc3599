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
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// The system-wide configuration for the mail store.
///
/// This is typically stored in a file named `crymap-store.toml`. Every
/// section is optional.
#[derive(Clone, Debug, Deserialize, Serialize, Default)]
pub struct SystemConfig {
    /// Options relating to mailbox naming.
    #[serde(default)]
    pub mailbox: MailboxConfig,

    /// Default quota limits applied to every quota root.
    #[serde(default)]
    pub quota: QuotaConfig,

    /// Limits on mailbox annotations (RFC 5464).
    #[serde(default)]
    pub annotations: AnnotationConfig,

    /// Tuning for the event bus.
    #[serde(default)]
    pub event_bus: EventBusConfig,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct MailboxConfig {
    /// The character separating levels of the mailbox hierarchy.
    pub delimiter: char,
}

impl Default for MailboxConfig {
    fn default() -> Self {
        Self { delimiter: '.' }
    }
}

/// A pair of optional quota ceilings. An absent value means unlimited.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct QuotaLimits {
    pub max_messages: Option<u64>,
    pub max_storage: Option<u64>,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct QuotaConfig {
    /// The global default count limit, used for any root which has neither
    /// its own limit nor a limit configured on its domain.
    pub max_messages: Option<u64>,
    /// The global default storage limit, in bytes.
    pub max_storage: Option<u64>,

    /// Per-domain defaults, keyed by lower-case domain name.
    pub domains: BTreeMap<String, QuotaLimits>,
}

impl QuotaConfig {
    pub fn global(&self) -> QuotaLimits {
        QuotaLimits {
            max_messages: self.max_messages,
            max_storage: self.max_storage,
        }
    }
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct AnnotationConfig {
    /// The maximum number of annotations a single mailbox may carry.
    pub max_entries: usize,
    /// The maximum size, in bytes, of a single annotation value.
    pub max_value_size: usize,
}

impl Default for AnnotationConfig {
    fn default() -> Self {
        Self {
            max_entries: 30,
            max_value_size: 1024,
        }
    }
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct EventBusConfig {
    /// The number of threads serving asynchronous listeners which are not
    /// bound to a group. 0 means one per CPU.
    pub workers: usize,
    /// The capacity of every asynchronous delivery queue.
    ///
    /// When a queue is full, the delivery is performed on the thread that
    /// dispatched the event instead.
    pub queue_size: usize,
    /// Retry policy for asynchronous deliveries.
    pub retry: RetryConfig,
}

impl Default for EventBusConfig {
    fn default() -> Self {
        Self {
            workers: 0,
            queue_size: 256,
            retry: RetryConfig::default(),
        }
    }
}

impl EventBusConfig {
    pub fn effective_workers(&self) -> usize {
        if 0 == self.workers {
            num_cpus::get().max(1)
        } else {
            self.workers
        }
    }
}

#[derive(Clone, Copy, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct RetryConfig {
    /// How many times a failed delivery is retried before the event is
    /// parked in the dead-letter store.
    pub max_retries: u32,
    /// The delay before the first retry, in milliseconds. Each further retry
    /// doubles the delay.
    pub first_backoff_ms: u64,
    /// The fraction of each delay which is randomised, between 0 and 1.
    pub jitter_factor: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 8,
            first_backoff_ms: 100,
            jitter_factor: 0.5,
        }
    }
}

impl RetryConfig {
    pub fn first_backoff(&self) -> Duration {
        Duration::from_millis(self.first_backoff_ms)
    }
}
