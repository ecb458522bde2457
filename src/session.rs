// Copyright 2026 BadCompany
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Session access counting.
//!
//! Stateful Streamable-HTTP sessions are reclaimed after an idle window. A
//! session is idle when no request or stream currently references it, so each
//! key carries a reference count and a single-shot timer armed on the 1→0
//! transition. Expiry is always delivered through the channel, never
//! synchronously from `inc`/`dec`.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

struct Entry {
    count: u64,
    timer: Option<JoinHandle<()>>,
}

/// Per-key reference counter with idle timers.
pub struct AccessCounter {
    timeout: Option<Duration>,
    entries: Mutex<HashMap<String, Entry>>,
    expire_tx: mpsc::UnboundedSender<String>,
}

impl AccessCounter {
    /// The receiver yields keys whose idle window elapsed. With no timeout
    /// configured, keys live until `clear`.
    pub fn new(timeout: Option<Duration>) -> (Self, mpsc::UnboundedReceiver<String>) {
        let (expire_tx, expire_rx) = mpsc::unbounded_channel();
        (
            Self {
                timeout,
                entries: Mutex::new(HashMap::new()),
                expire_tx,
            },
            expire_rx,
        )
    }

    pub fn inc(&self, key: &str, reason: &str) {
        let mut entries = self.entries.lock().unwrap();
        let entry = entries.entry(key.to_string()).or_insert(Entry {
            count: 0,
            timer: None,
        });
        entry.count += 1;
        if let Some(timer) = entry.timer.take() {
            timer.abort();
        }
        debug!(key, count = entry.count, reason, "session access inc");
    }

    pub fn dec(&self, key: &str, reason: &str) {
        let mut entries = self.entries.lock().unwrap();
        let Some(entry) = entries.get_mut(key) else {
            return;
        };
        entry.count = entry.count.saturating_sub(1);
        debug!(key, count = entry.count, reason, "session access dec");
        if entry.count == 0 {
            if let Some(timer) = entry.timer.take() {
                timer.abort();
            }
            if let Some(timeout) = self.timeout {
                let tx = self.expire_tx.clone();
                let key = key.to_string();
                entry.timer = Some(tokio::spawn(async move {
                    tokio::time::sleep(timeout).await;
                    let _ = tx.send(key);
                }));
            }
        }
    }

    /// Drop the key entirely. With `fire`, the expiry is still delivered so
    /// the owner runs its usual teardown path.
    pub fn clear(&self, key: &str, fire: bool, reason: &str) {
        let removed = self.entries.lock().unwrap().remove(key);
        if let Some(entry) = removed {
            if let Some(timer) = entry.timer {
                timer.abort();
            }
            debug!(key, fire, reason, "session access cleared");
        }
        if fire {
            let _ = self.expire_tx.send(key.to_string());
        }
    }
}

/// Decrements exactly once when dropped. Response lifecycles attach one of
/// these so every exit path (finish, error, disconnect) pays its single `dec`.
pub struct OwnedAccessGuard {
    counter: std::sync::Arc<AccessCounter>,
    key: String,
    reason: &'static str,
}

impl OwnedAccessGuard {
    pub fn new(
        counter: std::sync::Arc<AccessCounter>,
        key: impl Into<String>,
        reason: &'static str,
    ) -> Self {
        Self {
            counter,
            key: key.into(),
            reason,
        }
    }
}

impl Drop for OwnedAccessGuard {
    fn drop(&mut self) {
        self.counter.dec(&self.key, self.reason);
    }
}
