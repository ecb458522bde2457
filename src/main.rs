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

// Main entry point for the mcp-bridge binary.

use clap::Parser;
use tracing::info;

use mcp_bridge::config::{Cli, Config, Mode};
use mcp_bridge::{client, gateway};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let config = match Config::from_cli(cli) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("{e}");
            std::process::exit(1);
        }
    };

    init_tracing(&config);

    let result: anyhow::Result<()> = match config.mode.clone() {
        Mode::Forward { .. } => {
            info!(port = config.port, "Starting forward gateway");
            gateway::serve(config).await.map_err(Into::into)
        }
        Mode::SseToStdio { url } => client::sse::run(&url, &config.headers).await,
        Mode::StreamableToStdio { url } => {
            client::streamable::run(&url, &config.protocol_version, &config.headers).await
        }
    };

    if let Err(e) = result {
        eprintln!("{e:#}");
        std::process::exit(1);
    }
}

/// Logs go to stderr: in reverse modes stdout is the MCP transport itself
/// and must stay clean.
fn init_tracing(config: &Config) {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.log_level.directive()));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}
