//! HTTP control server command: `repobot serve`.

use anyhow::Result;
use std::path::Path;

use repobot::bots::server::{ServerConfig, start_server};

use super::super::Cli;
use super::{build_orchestrator, load_config, open_db};

pub async fn cmd_serve(cli: &Cli, project_dir: &Path, port: u16, dev: bool) -> Result<()> {
    let config = load_config(cli, project_dir)?;
    let db = open_db(&config)?;
    let orchestrator = build_orchestrator(&config, db)?;

    start_server(
        ServerConfig {
            port,
            dev_mode: dev,
            shutdown_grace: config.shutdown_grace(),
        },
        orchestrator,
    )
    .await
}
