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

//! Command-line surface and resolved configuration.
//!
//! `Cli` is the raw clap parse; `Config::from_cli` applies the validation
//! rules and produces the immutable configuration the engine runs on. Any
//! validation failure surfaces as a `BridgeError::Config`, which the binary
//! turns into exit code 1.

use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, ValueEnum};
use regex::Regex;
use serde::Deserialize;

use crate::error::BridgeError;
use crate::routing::ServerBinding;

pub const DEFAULT_SSE_PATH: &str = "/sse";
pub const DEFAULT_MESSAGE_PATH: &str = "/message";
pub const DEFAULT_STREAMABLE_HTTP_PATH: &str = "/mcp";
pub const DEFAULT_PROTOCOL_VERSION: &str = "2024-11-05";

#[derive(Parser, Debug)]
#[command(name = "mcp-bridge", version, about = "Bridge stdio MCP servers to network transports")]
pub struct Cli {
    /// Stdio MCP server command; repeat `name=command` pairs for multi-binding
    #[arg(long = "stdio", num_args = 1)]
    pub stdio: Vec<String>,

    /// Remote SSE MCP endpoint to expose on local stdio
    #[arg(long = "sse")]
    pub sse: Option<String>,

    /// Remote Streamable-HTTP MCP endpoint to expose on local stdio
    #[arg(long = "streamableHttp")]
    pub streamable_http: Option<String>,

    /// JSON file with `{"servers":[{"path":...,"stdio":...}]}`
    #[arg(long = "multiServerConfig")]
    pub multi_server_config: Option<PathBuf>,

    /// Network transport for forward modes
    #[arg(long = "outputTransport", value_enum)]
    pub output_transport: Option<OutputTransport>,

    #[arg(long = "port", default_value_t = 8000)]
    pub port: u16,

    /// Absolute base URL advertised in the SSE endpoint event
    #[arg(long = "baseUrl")]
    pub base_url: Option<String>,

    #[arg(long = "ssePath", default_value = DEFAULT_SSE_PATH)]
    pub sse_path: String,

    #[arg(long = "messagePath", default_value = DEFAULT_MESSAGE_PATH)]
    pub message_path: String,

    #[arg(long = "streamableHttpPath", default_value = DEFAULT_STREAMABLE_HTTP_PATH)]
    pub streamable_http_path: String,

    #[arg(long = "logLevel", value_enum, default_value = "info")]
    pub log_level: LogLevel,

    /// Allowed CORS origins; no values allows every origin, `/re/` matches by regex
    #[arg(long = "cors", num_args = 0..)]
    pub cors: Option<Vec<String>>,

    /// Paths answering `200 ok` while the bridge is healthy
    #[arg(long = "healthEndpoint")]
    pub health_endpoints: Vec<String>,

    /// Extra `Key: Value` headers for outbound responses (forward) or requests (reverse)
    #[arg(long = "header")]
    pub headers: Vec<String>,

    /// Shorthand for `Authorization: Bearer <token>`
    #[arg(long = "oauth2Bearer")]
    pub oauth2_bearer: Option<String>,

    /// Keep per-session state in Streamable-HTTP mode
    #[arg(long = "stateful", default_value_t = false)]
    pub stateful: bool,

    /// Idle session timeout in milliseconds (stateful only)
    #[arg(long = "sessionTimeout", allow_negative_numbers = true)]
    pub session_timeout: Option<i64>,

    /// Protocol version used when the bridge initializes on a client's behalf
    #[arg(long = "protocolVersion", default_value = DEFAULT_PROTOCOL_VERSION)]
    pub protocol_version: String,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum OutputTransport {
    #[value(name = "stdio")]
    Stdio,
    #[value(name = "sse")]
    Sse,
    #[value(name = "ws")]
    Ws,
    #[value(name = "streamableHttp")]
    StreamableHttp,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum LogLevel {
    #[value(name = "debug")]
    Debug,
    #[value(name = "info")]
    Info,
    #[value(name = "none")]
    None,
}

impl LogLevel {
    /// Directive for the tracing `EnvFilter`.
    pub fn directive(self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::None => "off",
        }
    }
}

/// Network-facing transport for the forward (stdio in) direction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ForwardTransport {
    Sse,
    Ws,
    StreamableHttp { stateful: bool },
}

/// Which bridge the process runs.
#[derive(Debug, Clone)]
pub enum Mode {
    /// Serve one or more stdio children over a network transport.
    Forward {
        bindings: Vec<ServerBinding>,
        transport: ForwardTransport,
    },
    /// Connect out to a remote SSE MCP endpoint, speak stdio locally.
    SseToStdio { url: String },
    /// Connect out to a remote Streamable-HTTP MCP endpoint, speak stdio locally.
    StreamableToStdio { url: String },
}

/// One allowed origin: literal match or `/regex/`.
#[derive(Debug, Clone)]
pub enum OriginMatcher {
    Exact(String),
    Pattern(Regex),
}

impl OriginMatcher {
    fn parse(raw: &str) -> Result<Self, BridgeError> {
        if raw.len() >= 2 && raw.starts_with('/') && raw.ends_with('/') {
            let pattern = &raw[1..raw.len() - 1];
            let re = Regex::new(pattern)
                .map_err(|e| BridgeError::Config(format!("Invalid CORS origin regex '{raw}': {e}")))?;
            Ok(OriginMatcher::Pattern(re))
        } else {
            Ok(OriginMatcher::Exact(raw.to_string()))
        }
    }

    pub fn matches(&self, origin: &str) -> bool {
        match self {
            OriginMatcher::Exact(s) => s == origin,
            OriginMatcher::Pattern(re) => re.is_match(origin),
        }
    }
}

#[derive(Debug, Clone)]
pub enum CorsPolicy {
    AllowAll,
    Origins(Vec<OriginMatcher>),
}

impl CorsPolicy {
    pub fn allows(&self, origin: &str) -> bool {
        match self {
            CorsPolicy::AllowAll => true,
            CorsPolicy::Origins(matchers) => matchers.iter().any(|m| m.matches(origin)),
        }
    }
}

/// Resolved, validated configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub mode: Mode,
    pub port: u16,
    pub base_url: Option<String>,
    pub sse_path: String,
    pub message_path: String,
    pub streamable_http_path: String,
    pub log_level: LogLevel,
    pub cors: Option<CorsPolicy>,
    pub health_endpoints: Vec<String>,
    /// Parsed `Key: Value` pairs, already syntax-checked.
    pub headers: Vec<(String, String)>,
    pub session_timeout: Option<Duration>,
    pub protocol_version: String,
}

#[derive(Debug, Deserialize)]
struct MultiServerFile {
    servers: Vec<MultiServerEntry>,
}

#[derive(Debug, Deserialize)]
struct MultiServerEntry {
    path: String,
    stdio: String,
}

impl Config {
    pub fn from_cli(cli: Cli) -> Result<Self, BridgeError> {
        let active_inputs = [
            !cli.stdio.is_empty(),
            cli.sse.is_some(),
            cli.streamable_http.is_some(),
            cli.multi_server_config.is_some(),
        ]
        .iter()
        .filter(|v| **v)
        .count();
        if active_inputs != 1 {
            return Err(BridgeError::Config(
                "Exactly one of --stdio, --sse, --streamableHttp or --multiServerConfig is required"
                    .to_string(),
            ));
        }

        let session_timeout = match cli.session_timeout {
            Some(ms) if ms <= 0 => {
                return Err(BridgeError::Config(format!(
                    "--sessionTimeout must be a positive number of milliseconds, got {ms}"
                )))
            }
            Some(ms) => Some(Duration::from_millis(ms as u64)),
            None => None,
        };

        let mut headers = Vec::new();
        for raw in &cli.headers {
            let (name, value) = raw.split_once(':').ok_or_else(|| {
                BridgeError::Config(format!("Invalid --header '{raw}', expected 'Key: Value'"))
            })?;
            let (name, value) = (name.trim(), value.trim());
            if name.is_empty() {
                return Err(BridgeError::Config(format!(
                    "Invalid --header '{raw}', empty header name"
                )));
            }
            headers.push((name.to_string(), value.to_string()));
        }
        if let Some(token) = &cli.oauth2_bearer {
            headers.push(("Authorization".to_string(), format!("Bearer {token}")));
        }

        let cors = match &cli.cors {
            None => None,
            Some(values) if values.is_empty() => Some(CorsPolicy::AllowAll),
            Some(values) => {
                let matchers = values
                    .iter()
                    .map(|v| OriginMatcher::parse(v))
                    .collect::<Result<Vec<_>, _>>()?;
                Some(CorsPolicy::Origins(matchers))
            }
        };

        let mode = if let Some(url) = cli.sse {
            Self::require_stdio_output(cli.output_transport, "--sse")?;
            Mode::SseToStdio { url }
        } else if let Some(url) = cli.streamable_http {
            Self::require_stdio_output(cli.output_transport, "--streamableHttp")?;
            Mode::StreamableToStdio { url }
        } else {
            let bindings = if let Some(path) = &cli.multi_server_config {
                load_multi_server_config(path)?
            } else {
                parse_stdio_bindings(&cli.stdio)?
            };
            let transport = match cli.output_transport.unwrap_or(OutputTransport::Sse) {
                OutputTransport::Stdio => {
                    return Err(BridgeError::Config(
                        "--outputTransport stdio requires --sse or --streamableHttp".to_string(),
                    ))
                }
                OutputTransport::Sse => ForwardTransport::Sse,
                OutputTransport::Ws => ForwardTransport::Ws,
                OutputTransport::StreamableHttp => ForwardTransport::StreamableHttp {
                    stateful: cli.stateful,
                },
            };
            if cli.stateful && !matches!(transport, ForwardTransport::StreamableHttp { .. }) {
                return Err(BridgeError::Config(
                    "--stateful is only valid with --outputTransport streamableHttp".to_string(),
                ));
            }
            Mode::Forward {
                bindings,
                transport,
            }
        };

        Ok(Self {
            mode,
            port: cli.port,
            base_url: cli.base_url,
            sse_path: cli.sse_path,
            message_path: cli.message_path,
            streamable_http_path: cli.streamable_http_path,
            log_level: cli.log_level,
            cors,
            health_endpoints: cli.health_endpoints,
            headers,
            session_timeout,
            protocol_version: cli.protocol_version,
        })
    }

    fn require_stdio_output(
        output: Option<OutputTransport>,
        flag: &str,
    ) -> Result<(), BridgeError> {
        match output {
            None | Some(OutputTransport::Stdio) => Ok(()),
            Some(_) => Err(BridgeError::Config(format!(
                "{flag} only supports --outputTransport stdio"
            ))),
        }
    }
}

/// `--stdio` values: every value `name=command` means multi-binding;
/// a single plain command means the root binding.
fn parse_stdio_bindings(values: &[String]) -> Result<Vec<ServerBinding>, BridgeError> {
    let all_named = values.iter().all(|v| v.contains('='));
    if all_named {
        let mut bindings = Vec::with_capacity(values.len());
        for value in values {
            let (name, command) = value.split_once('=').unwrap();
            let (name, command) = (name.trim(), command.trim());
            if name.is_empty() || command.is_empty() {
                return Err(BridgeError::Config(format!(
                    "Invalid --stdio binding '{value}', expected 'name=command'"
                )));
            }
            bindings.push(ServerBinding::new(name, command));
        }
        return Ok(bindings);
    }
    if values.len() > 1 {
        return Err(BridgeError::Config(
            "Multiple --stdio values must all be 'name=command' bindings".to_string(),
        ));
    }
    let command = values[0].trim();
    if command.is_empty() {
        return Err(BridgeError::Config("--stdio command is empty".to_string()));
    }
    Ok(vec![ServerBinding::new("/", command)])
}

fn load_multi_server_config(path: &std::path::Path) -> Result<Vec<ServerBinding>, BridgeError> {
    let raw = std::fs::read_to_string(path).map_err(|e| {
        BridgeError::Config(format!("Cannot read {}: {e}", path.display()))
    })?;
    let file: MultiServerFile = serde_json::from_str(&raw).map_err(|e| {
        BridgeError::Config(format!("Invalid multi-server config {}: {e}", path.display()))
    })?;
    if file.servers.is_empty() {
        return Err(BridgeError::Config(
            "Multi-server config has no servers".to_string(),
        ));
    }
    let mut bindings = Vec::with_capacity(file.servers.len());
    for entry in file.servers {
        if entry.path.trim().is_empty() || entry.stdio.trim().is_empty() {
            return Err(BridgeError::Config(
                "Multi-server entries require non-empty 'path' and 'stdio'".to_string(),
            ));
        }
        bindings.push(ServerBinding::new(entry.path.trim(), entry.stdio.trim()));
    }
    Ok(bindings)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Result<Config, BridgeError> {
        let mut argv = vec!["mcp-bridge"];
        argv.extend_from_slice(args);
        Config::from_cli(Cli::parse_from(argv))
    }

    #[test]
    fn stdio_defaults_to_sse_transport() {
        let cfg = parse(&["--stdio", "my-server"]).unwrap();
        match cfg.mode {
            Mode::Forward {
                bindings,
                transport,
            } => {
                assert_eq!(bindings, vec![ServerBinding::new("/", "my-server")]);
                assert_eq!(transport, ForwardTransport::Sse);
            }
            other => panic!("unexpected mode {other:?}"),
        }
        assert_eq!(cfg.port, 8000);
        assert_eq!(cfg.sse_path, "/sse");
    }

    #[test]
    fn reverse_modes_default_to_stdio_output() {
        assert!(matches!(
            parse(&["--sse", "http://x/sse"]).unwrap().mode,
            Mode::SseToStdio { .. }
        ));
        assert!(matches!(
            parse(&["--streamableHttp", "http://x/mcp"]).unwrap().mode,
            Mode::StreamableToStdio { .. }
        ));
        assert!(parse(&["--sse", "http://x/sse", "--outputTransport", "ws"]).is_err());
    }

    #[test]
    fn exactly_one_input_required() {
        assert!(parse(&[]).is_err());
        assert!(parse(&["--stdio", "a", "--sse", "http://x"]).is_err());
    }

    #[test]
    fn named_stdio_values_build_multi_bindings() {
        let cfg = parse(&["--stdio", "git=git-mcp", "--stdio", "docker=docker-mcp"]).unwrap();
        match cfg.mode {
            Mode::Forward { bindings, .. } => {
                assert_eq!(bindings[0], ServerBinding::new("/git", "git-mcp"));
                assert_eq!(bindings[1], ServerBinding::new("/docker", "docker-mcp"));
            }
            other => panic!("unexpected mode {other:?}"),
        }
    }

    #[test]
    fn mixed_unnamed_stdio_values_rejected() {
        assert!(parse(&["--stdio", "git=git-mcp", "--stdio", "plain-cmd"]).is_err());
    }

    #[test]
    fn stateful_requires_streamable_http() {
        assert!(parse(&["--stdio", "a", "--stateful"]).is_err());
        assert!(parse(&[
            "--stdio",
            "a",
            "--outputTransport",
            "ws",
            "--stateful"
        ])
        .is_err());
        let cfg = parse(&[
            "--stdio",
            "a",
            "--outputTransport",
            "streamableHttp",
            "--stateful",
        ])
        .unwrap();
        assert!(matches!(
            cfg.mode,
            Mode::Forward {
                transport: ForwardTransport::StreamableHttp { stateful: true },
                ..
            }
        ));
    }

    #[test]
    fn session_timeout_must_be_positive() {
        assert!(parse(&["--stdio", "a", "--sessionTimeout", "0"]).is_err());
        assert!(parse(&["--stdio", "a", "--sessionTimeout", "-5"]).is_err());
        let cfg = parse(&["--stdio", "a", "--sessionTimeout", "250"]).unwrap();
        assert_eq!(cfg.session_timeout, Some(Duration::from_millis(250)));
    }

    #[test]
    fn headers_and_bearer_parse() {
        let cfg = parse(&[
            "--stdio",
            "a",
            "--header",
            "X-Test: one",
            "--oauth2Bearer",
            "tok",
        ])
        .unwrap();
        assert_eq!(cfg.headers[0], ("X-Test".to_string(), "one".to_string()));
        assert_eq!(
            cfg.headers[1],
            ("Authorization".to_string(), "Bearer tok".to_string())
        );
        assert!(parse(&["--stdio", "a", "--header", "no-colon"]).is_err());
    }

    #[test]
    fn cors_flag_variants() {
        assert!(parse(&["--stdio", "a"]).unwrap().cors.is_none());
        assert!(matches!(
            parse(&["--stdio", "a", "--cors"]).unwrap().cors,
            Some(CorsPolicy::AllowAll)
        ));

        let cfg = parse(&[
            "--stdio",
            "a",
            "--cors",
            "https://app.example",
            "/^https://.*[.]example$/",
        ])
        .unwrap();
        let policy = cfg.cors.unwrap();
        assert!(policy.allows("https://app.example"));
        assert!(policy.allows("https://other.example"));
        assert!(!policy.allows("https://evil.test"));
    }

    #[test]
    fn multi_server_config_loads_and_validates() {
        let dir = std::env::temp_dir();
        let path = dir.join("mcp-bridge-test-servers.json");
        std::fs::write(
            &path,
            r#"{"servers":[{"path":"git","stdio":"git-mcp"},{"path":"/docker","stdio":"docker-mcp"}]}"#,
        )
        .unwrap();
        let cfg = parse(&["--multiServerConfig", path.to_str().unwrap()]).unwrap();
        match cfg.mode {
            Mode::Forward { bindings, .. } => {
                assert_eq!(bindings[0].prefix, "/git");
                assert_eq!(bindings[1].prefix, "/docker");
            }
            other => panic!("unexpected mode {other:?}"),
        }

        let empty = dir.join("mcp-bridge-test-empty.json");
        std::fs::write(&empty, r#"{"servers":[]}"#).unwrap();
        assert!(parse(&["--multiServerConfig", empty.to_str().unwrap()]).is_err());
    }
}
