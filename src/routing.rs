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

//! Path routing for multi-server mode.
//!
//! Each configured server is a `(url-prefix, child-command)` binding. Routes
//! are composed as `normalize(prefix) ++ suffix` and matched exactly; there
//! are no wildcards, and unmatched paths fall through to the framework 404.

/// One `(url-prefix, child-command)` pair, immutable after startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerBinding {
    /// Path prefix, always starting with `/`. `/` means the root binding.
    pub prefix: String,
    /// Shell command line that starts the stdio MCP server.
    pub command: String,
}

impl ServerBinding {
    pub fn new(prefix: impl Into<String>, command: impl Into<String>) -> Self {
        let mut prefix = prefix.into();
        if !prefix.starts_with('/') {
            prefix.insert(0, '/');
        }
        Self {
            prefix,
            command: command.into(),
        }
    }

    /// Full route for one of this binding's endpoints.
    pub fn route(&self, suffix: &str) -> String {
        join_route(&self.prefix, suffix)
    }
}

/// `normalize("/") == ""`, otherwise strip a single trailing `/`.
fn normalize_prefix(prefix: &str) -> &str {
    if prefix == "/" {
        ""
    } else {
        prefix.strip_suffix('/').unwrap_or(prefix)
    }
}

/// Compose a full path from a binding prefix and an endpoint suffix. An empty
/// composition collapses to `/`.
pub fn join_route(prefix: &str, suffix: &str) -> String {
    let head = normalize_prefix(prefix);
    let tail = if suffix.starts_with('/') {
        suffix.to_string()
    } else {
        format!("/{suffix}")
    };
    let full = format!("{head}{tail}");
    if full.is_empty() {
        "/".to_string()
    } else {
        full
    }
}
