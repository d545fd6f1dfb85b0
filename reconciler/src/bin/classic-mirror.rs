// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Run the reconciler against a simulated directory loaded from a file
//!
//! This is a development tool: it exercises the same pipeline the real
//! service runs, but all groups and instances live in a JSON state file.

use anyhow::{bail, Context, Result};
use camino::{Utf8Path, Utf8PathBuf};
use clap::{Parser, Subcommand};
use classic_mirror::config::Config;
use classic_mirror::event_filter::{is_relevant, ConfiguredRole};
use classic_mirror::sim::{SimDirectory, SimState};
use classic_mirror::Reconciler;
use slog::info;
use std::sync::Arc;

#[derive(Debug, Parser)]
#[clap(name = "classic-mirror", about = "Mirror legacy security groups")]
struct Args {
    #[clap(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run one reconciliation against a simulated directory
    Run {
        /// path to the TOML configuration file
        #[clap(long)]
        config: Utf8PathBuf,
        /// path to the JSON file holding the simulated directory's state
        #[clap(long)]
        state: Utf8PathBuf,
        /// only run if this JSON change notification is relevant
        #[clap(long)]
        event: Option<Utf8PathBuf>,
        /// write the resulting state back to the state file
        #[clap(long)]
        write_state: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    match args.command {
        Command::Run { config, state, event, write_state } => {
            run(&config, &state, event.as_deref(), write_state).await
        }
    }
}

async fn run(
    config_path: &Utf8Path,
    state_path: &Utf8Path,
    event_path: Option<&Utf8Path>,
    write_state: bool,
) -> Result<()> {
    let config = Config::from_file(config_path)
        .with_context(|| format!("loading config {:?}", config_path))?;
    let log = config
        .log
        .to_logger("classic-mirror")
        .context("initializing logger")?;

    if let Some(event_path) = event_path {
        let event: serde_json::Value = read_json(event_path)?;
        let roles = ConfiguredRole(config.own_role.clone());
        if !is_relevant(&event, &roles, &log)
            .await
            .context("filtering event")?
        {
            info!(log, "event is not relevant; nothing to do");
            return Ok(());
        }
    }

    let state: SimState = read_json(state_path)?;
    let sim =
        Arc::new(SimDirectory::with_page_size(state, config.sim.page_size));
    let reconciler = Reconciler::new(sim.clone(), sim.clone(), &log);
    let report = reconciler.run().await.context("reconciling")?;

    println!(
        "{}",
        serde_json::to_string_pretty(&report).context("serializing report")?
    );

    if write_state {
        let contents = serde_json::to_string_pretty(&sim.snapshot().await)
            .context("serializing state")?;
        std::fs::write(state_path, contents)
            .with_context(|| format!("writing {:?}", state_path))?;
    }

    if !report.is_clean() {
        bail!("{} entities failed to reconcile", report.errors.len());
    }
    Ok(())
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Utf8Path) -> Result<T> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("reading {:?}", path))?;
    serde_json::from_str(&contents)
        .with_context(|| format!("parsing {:?}", path))
}
