mod astar;
mod battle;
mod bot;
mod collision;
mod config;
mod geometry;
mod grid;
mod net_client;
mod net_packet;
mod net_structs;
mod sync_loop;
mod tiled;
mod walk;
mod wall_follow;

use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::sync::oneshot;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use bot::Bot;
use config::Cli;
use sync_loop::run_session;
use tiled::MapResources;

#[tokio::main]
async fn main() -> ExitCode {
    init_tracing();
    let cli = Cli::parse();
    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("{err:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<()> {
    let resources = MapResources::load(&cli.map_dir, &cli.map_file, &cli.tileset_file)
        .with_context(|| format!("loading map resources from {}", cli.map_dir.display()))?;
    info!(
        map = %cli.map_file,
        width = resources.map.width,
        height = resources.map.height,
        fingerprint = %resources.fingerprint,
        "map loaded"
    );

    let client = net_client::connect(&cli.connect_params(&resources.fingerprint))
        .await
        .with_context(|| format!("connecting to {}", cli.addr))?;
    let mut bot = Bot::new(cli.bot_config(), resources);
    if let Some(policy) = cli.replan_policy() {
        info!(max_jump = policy.max_jump, "re-planning after position jumps");
        bot = bot.with_replan_policy(policy);
    }

    let (stop_tx, stop_rx) = oneshot::channel();
    let mut session = tokio::spawn(run_session(client, bot, cli.session_config(), stop_rx));

    let summary = tokio::select! {
        joined = &mut session => joined.context("session task failed")??,
        signal = tokio::signal::ctrl_c() => {
            signal.context("listening for interrupt")?;
            info!("interrupted, closing connection");
            if stop_tx.send(()).is_err() {
                debug!("session already finished");
            }
            // one grace period for the close handshake, one for the tick in flight
            match tokio::time::timeout(cli.close_grace() * 2, &mut session).await {
                Ok(joined) => joined.context("session task failed")??,
                Err(_) => {
                    warn!("session did not shut down in time, forcing exit");
                    session.abort();
                    return Ok(());
                }
            }
        }
    };

    info!(
        end = ?summary.end,
        battle = ?summary.battle,
        battle_over = summary.battle.is_terminal(),
        frames = summary.frames,
        sent = summary.commands_sent,
        dropped = summary.commands_dropped,
        "bot finished"
    );
    Ok(())
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();
}
