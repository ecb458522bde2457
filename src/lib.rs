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

//! mcp-bridge: a transport bridge for the Model Context Protocol.
//!
//! Spawns stdio MCP servers and serves them over SSE, Streamable HTTP or
//! WebSocket, or conversely connects to a remote network MCP endpoint and
//! exposes it on local stdio.

pub mod child;
pub mod client;
pub mod config;
pub mod error;
pub mod framing;
pub mod gateway;
pub mod jsonrpc;
pub mod routing;
pub mod session;
