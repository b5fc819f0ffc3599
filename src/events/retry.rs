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

use std::time::Duration;

use rand::Rng;

use crate::support::system_config::RetryConfig;

/// Exponential backoff with jitter.
///
/// The delay before retry `n` (counting from 0) is `first * 2^n`, of which
/// the fraction `jitter_factor` is randomised.
#[derive(Clone, Copy, Debug)]
pub struct RetryBackoff {
    pub max_retries: u32,
    first: Duration,
    jitter_factor: f64,
}

impl RetryBackoff {
    pub fn new(config: &RetryConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            first: config.first_backoff(),
            jitter_factor: config.jitter_factor.max(0.0).min(1.0),
        }
    }

    /// No retries at all.
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            first: Duration::from_millis(0),
            jitter_factor: 0.0,
        }
    }

    pub fn delay(&self, attempt: u32) -> Duration {
        let base =
            self.first.as_millis() as f64 * 2f64.powi(attempt.min(30) as i32);
        let jitter = if self.jitter_factor > 0.0 && base > 0.0 {
            let spread = base * self.jitter_factor;
            rand::thread_rng().gen_range(-spread, spread)
        } else {
            0.0
        };

        Duration::from_millis((base + jitter).max(0.0) as u64)
    }
}
