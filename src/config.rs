use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, ValueEnum};

use crate::bot::{BotConfig, ReplanOnJump, Strategy};
use crate::grid::Cell;
use crate::net_client::ConnectParams;
use crate::sync_loop::SessionConfig;

#[derive(Parser, Debug)]
#[command(name = "treasure-bot")]
#[command(about = "Autonomous treasure-hunter client that walks a planned route or follows walls")]
pub struct Cli {
    /// Room server address (host:port)
    #[arg(long, default_value = "localhost:9992")]
    pub addr: String,
    /// Resource path announced in the handshake
    #[arg(long, default_value = "/tsrht")]
    pub path: String,
    #[arg(long)]
    pub auth_token: String,
    #[arg(long, default_value_t = 10)]
    pub player_id: i32,
    /// Directory holding the map and tileset files
    #[arg(long, default_value = "./map/map")]
    pub map_dir: PathBuf,
    #[arg(long, default_value = "treasurehunter.tmx")]
    pub map_file: String,
    #[arg(long, default_value = "tile_1.tsx")]
    pub tileset_file: String,
    #[arg(long, value_enum, default_value_t = CliStrategy::Path)]
    pub strategy: CliStrategy,
    /// Distance moved per tick, in map pixels
    #[arg(long, default_value_t = 16.0, value_parser = parse_positive)]
    pub step: f64,
    #[arg(long, default_value_t = 20)]
    pub tick_delay_ms: u64,
    /// Goal as COL,ROW; overrides --goal-object
    #[arg(long, value_parser = parse_cell)]
    pub goal_cell: Option<Cell>,
    /// Map object (by name or type) whose cell is the goal
    #[arg(long, default_value = "Goal")]
    pub goal_object: String,
    #[arg(long, default_value_t = 32.0, value_parser = parse_positive)]
    pub collider_radius: f64,
    /// Re-plan when the server moves the player further than this between frames
    #[arg(long, value_parser = parse_positive)]
    pub replan_jump: Option<f64>,
    /// Starting heading for wall-following, degrees clockwise from +x
    #[arg(long, default_value_t = 90.0)]
    pub initial_heading_deg: f64,
    #[arg(long, default_value_t = 5_000)]
    pub connect_timeout_ms: u64,
    /// How long to wait for the server to acknowledge a close
    #[arg(long, default_value_t = 1_000)]
    pub close_grace_ms: u64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum CliStrategy {
    Path,
    Roam,
    Reactive,
}

impl From<CliStrategy> for Strategy {
    fn from(value: CliStrategy) -> Self {
        match value {
            CliStrategy::Path => Strategy::Path,
            CliStrategy::Roam => Strategy::Roam,
            CliStrategy::Reactive => Strategy::Reactive,
        }
    }
}

impl Cli {
    pub fn bot_config(&self) -> BotConfig {
        BotConfig {
            player_id: self.player_id,
            strategy: self.strategy.into(),
            step: self.step,
            goal_cell: self.goal_cell,
            goal_object: self.goal_object.clone(),
            collider_radius: self.collider_radius,
            initial_heading: self.initial_heading_deg.to_radians(),
        }
    }

    pub fn replan_policy(&self) -> Option<ReplanOnJump> {
        self.replan_jump.map(|max_jump| ReplanOnJump {
            player_id: self.player_id,
            max_jump,
        })
    }

    pub fn connect_params(&self, map_sha1: &str) -> ConnectParams {
        ConnectParams {
            addr: self.addr.clone(),
            path: self.path.clone(),
            auth_token: self.auth_token.clone(),
            player_id: self.player_id,
            map_sha1: map_sha1.to_string(),
            connect_timeout: Duration::from_millis(self.connect_timeout_ms),
        }
    }

    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            tick_delay: Duration::from_millis(self.tick_delay_ms),
            close_grace: self.close_grace(),
        }
    }

    pub fn close_grace(&self) -> Duration {
        Duration::from_millis(self.close_grace_ms)
    }
}

fn parse_cell(raw: &str) -> Result<Cell, String> {
    let (col, row) = raw
        .split_once(',')
        .ok_or_else(|| format!("expected COL,ROW, got {raw:?}"))?;
    let col = col
        .trim()
        .parse::<u32>()
        .map_err(|err| format!("bad column {col:?}: {err}"))?;
    let row = row
        .trim()
        .parse::<u32>()
        .map_err(|err| format!("bad row {row:?}: {err}"))?;
    Ok(Cell::new(col, row))
}

fn parse_positive(raw: &str) -> Result<f64, String> {
    let value = raw
        .trim()
        .parse::<f64>()
        .map_err(|err| format!("bad number {raw:?}: {err}"))?;
    if !(value.is_finite() && value > 0.0) {
        return Err(format!("expected a positive finite number, got {raw:?}"));
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use std::f64::consts::FRAC_PI_2;

    use super::*;

    #[test]
    fn defaults_match_the_stock_server() {
        let cli = Cli::try_parse_from(["treasure-bot", "--auth-token", "t"]).expect("cli");
        assert_eq!(cli.addr, "localhost:9992");
        assert_eq!(cli.map_dir, PathBuf::from("./map/map"));

        let bot = cli.bot_config();
        assert_eq!(bot.player_id, 10);
        assert_eq!(bot.strategy, Strategy::Path);
        assert_eq!(bot.goal_cell, None);
        assert_eq!(bot.step, 16.0);
        assert_eq!(bot.collider_radius, 32.0);
        assert_eq!(cli.replan_policy(), None);
        assert!((bot.initial_heading - FRAC_PI_2).abs() < 1e-12);

        let session = cli.session_config();
        assert_eq!(session.tick_delay, Duration::from_millis(20));
        assert_eq!(session.close_grace, Duration::from_secs(1));

        let connect = cli.connect_params("beef");
        assert_eq!(connect.map_sha1, "beef");
        assert_eq!(connect.connect_timeout, Duration::from_secs(5));
    }

    #[test]
    fn auth_token_is_required() {
        assert!(Cli::try_parse_from(["treasure-bot"]).is_err());
    }

    #[test]
    fn goal_cell_and_strategy_parse() {
        let cli = Cli::try_parse_from([
            "treasure-bot",
            "--auth-token",
            "t",
            "--goal-cell",
            "3, 7",
            "--strategy",
            "reactive",
        ])
        .expect("cli");
        let bot = cli.bot_config();
        assert_eq!(bot.goal_cell, Some(Cell::new(3, 7)));
        assert_eq!(bot.strategy, Strategy::Reactive);

        assert!(parse_cell("3").is_err());
        assert!(parse_cell("-1,2").is_err());
    }

    #[test]
    fn tuning_flags_must_be_positive_and_finite() {
        for flag in ["--step", "--collider-radius", "--replan-jump"] {
            for bad in ["0", "-4", "NaN", "inf", "fast"] {
                let parsed = Cli::try_parse_from(["treasure-bot", "--auth-token", "t", flag, bad]);
                assert!(parsed.is_err(), "{flag} {bad} was accepted");
            }
        }

        let cli = Cli::try_parse_from([
            "treasure-bot",
            "--auth-token",
            "t",
            "--step",
            "8.5",
            "--collider-radius",
            "12",
            "--replan-jump",
            "96",
            "--strategy",
            "roam",
        ])
        .expect("cli");
        let bot = cli.bot_config();
        assert_eq!((bot.step, bot.collider_radius), (8.5, 12.0));
        assert_eq!(bot.strategy, Strategy::Roam);
        assert_eq!(
            cli.replan_policy(),
            Some(ReplanOnJump {
                player_id: 10,
                max_jump: 96.0
            })
        );
    }
}
