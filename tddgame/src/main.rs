//! TDD kata tracker CLI.
//!
//! Runs the polling loop and the administrative commands against the game
//! store configured in `tddgame.toml`.

use std::path::{Path, PathBuf};
use std::sync::mpsc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;

use tddgame::admin::{self, AdminError, JoinRequest};
use tddgame::core::types::GameStatus;
use tddgame::exit_codes;
use tddgame::io::config::{DEFAULT_CONFIG_FILE, TrackerConfig, load_config, write_config};
use tddgame::io::store::{FileStore, GameStore};
use tddgame::logging;
use tddgame::poll::{Tracker, TrackerSettings, run_polling};
use tddgame::replay::analyze_repository;

#[derive(Parser)]
#[command(name = "tddgame", version, about = "Track and score TDD kata commits")]
struct Cli {
    /// Path to the TOML config file.
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Write a config file with default settings.
    Init {
        /// Overwrite an existing config file.
        #[arg(short, long)]
        force: bool,
    },
    /// Poll every running game until interrupted.
    Poll {
        /// Run a single cycle and exit.
        #[arg(long)]
        once: bool,
    },
    /// Manage games.
    #[command(subcommand)]
    Game(GameCommand),
    /// Register a participant in a running game.
    Join {
        game_id: String,
        name: String,
        /// GitHub repository URL to clone.
        #[arg(long, conflicts_with = "local", required_unless_present = "local")]
        repo: Option<String>,
        /// Existing working copy to track in place.
        #[arg(long)]
        local: Option<PathBuf>,
    },
    /// Inspect and maintain participants.
    #[command(subcommand)]
    Player(PlayerCommand),
    /// Classify and score every commit of a working copy without a game.
    Analyze {
        path: PathBuf,
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand)]
enum GameCommand {
    Create { name: String },
    List {
        #[arg(long)]
        json: bool,
    },
    Pause { game_id: String },
    Resume { game_id: String },
    Stop { game_id: String },
    /// Participants ordered by score.
    Scores {
        game_id: String,
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand)]
enum PlayerCommand {
    /// Score breakdown and per-commit feedback.
    Show {
        game_id: String,
        participant_id: String,
        #[arg(long)]
        json: bool,
    },
    /// Toggle whether polling skips this participant.
    Pause {
        game_id: String,
        participant_id: String,
    },
    /// Forget history so the next cycle reprocesses everything.
    Reset {
        game_id: String,
        participant_id: String,
    },
}

fn main() {
    let code = match run() {
        Ok(code) => code,
        Err(err) => {
            eprintln!("{:#}", err);
            match err.downcast_ref::<AdminError>() {
                Some(AdminError::Storage(_)) | None => exit_codes::INVALID,
                Some(_) => exit_codes::REJECTED,
            }
        }
    };
    std::process::exit(code);
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    let filter = match cli.command {
        Command::Poll { once: false } => logging::DAEMON_FILTER,
        _ => logging::COMMAND_FILTER,
    };
    logging::init(filter);

    let config_path = cli.config;
    match cli.command {
        Command::Init { force } => cmd_init(&config_path, force),
        Command::Poll { once } => {
            let (cfg, store) = open(&config_path)?;
            cmd_poll(&cfg, store, once)
        }
        Command::Game(command) => {
            let (_, store) = open(&config_path)?;
            cmd_game(&store, command)
        }
        Command::Join {
            game_id,
            name,
            repo,
            local,
        } => {
            let (cfg, store) = open(&config_path)?;
            cmd_join(&cfg, &store, game_id, name, repo, local)
        }
        Command::Player(command) => {
            let (_, store) = open(&config_path)?;
            cmd_player(&store, command)
        }
        Command::Analyze { path, json } => {
            let cfg = load_config(&config_path)?;
            cmd_analyze(&cfg, &path, json)
        }
    }
}

fn open(config_path: &Path) -> Result<(TrackerConfig, FileStore)> {
    let cfg = load_config(config_path)?;
    let store = FileStore::new(&cfg.state_dir);
    Ok((cfg, store))
}

fn cmd_init(path: &Path, force: bool) -> Result<i32> {
    if !force && path.exists() {
        println!("{} already exists", path.display());
        return Ok(exit_codes::OK);
    }
    write_config(path, &TrackerConfig::default())?;
    println!("wrote {}", path.display());
    Ok(exit_codes::OK)
}

fn cmd_poll(cfg: &TrackerConfig, store: FileStore, once: bool) -> Result<i32> {
    let tracker = Tracker::new(
        store,
        cfg.test_runner(),
        cfg.feedback_generator()?,
        TrackerSettings::from(cfg),
    );
    if once {
        let report = tracker.run_cycle()?;
        for entry in &report.participants {
            println!("{}/{}: {}", entry.game_id, entry.participant_id, entry.outcome);
        }
        let degraded = report.participants.iter().any(|entry| entry.outcome.is_degraded());
        return Ok(if degraded {
            exit_codes::DEGRADED
        } else {
            exit_codes::OK
        });
    }

    let (shutdown_tx, shutdown_rx) = mpsc::channel();
    ctrlc::set_handler(move || {
        let _ = shutdown_tx.send(());
    })
    .context("install interrupt handler")?;
    run_polling(&tracker, cfg.poll_interval(), &shutdown_rx);
    Ok(exit_codes::OK)
}

fn cmd_game(store: &FileStore, command: GameCommand) -> Result<i32> {
    match command {
        GameCommand::Create { name } => {
            let game = admin::create_game(store, &name)?;
            println!("{}", game.id);
        }
        GameCommand::List { json } => {
            let games = store.list_games()?;
            if json {
                print_json(&games)?;
            } else {
                for game in games {
                    println!("{}  {:<8} {}", game.id, game.status.as_str(), game.name);
                }
            }
        }
        GameCommand::Pause { game_id } => change_status(store, &game_id, GameStatus::Paused)?,
        GameCommand::Resume { game_id } => change_status(store, &game_id, GameStatus::Running)?,
        GameCommand::Stop { game_id } => change_status(store, &game_id, GameStatus::Stopped)?,
        GameCommand::Scores { game_id, json } => {
            let board = admin::scoreboard(store, &game_id)?;
            if json {
                print_json(&board)?;
            } else {
                for (rank, player) in board.iter().enumerate() {
                    let summary = player.feedback.lines().next().unwrap_or_default();
                    println!(
                        "{:>2}. {}  {:<20} {:>7.2}  {}",
                        rank + 1,
                        player.id,
                        player.name,
                        player.score,
                        summary
                    );
                }
            }
        }
    }
    Ok(exit_codes::OK)
}

fn change_status(store: &FileStore, game_id: &str, to: GameStatus) -> Result<()> {
    let game = admin::set_game_status(store, game_id, to)?;
    println!("{} is {}", game.id, game.status);
    Ok(())
}

fn cmd_join(
    cfg: &TrackerConfig,
    store: &FileStore,
    game_id: String,
    name: String,
    repo: Option<String>,
    local: Option<PathBuf>,
) -> Result<i32> {
    let participant = match (repo, local) {
        (_, Some(path)) => admin::join_local(store, &game_id, &name, &path)?,
        (Some(repo_url), None) => admin::join_game(
            store,
            &cfg.clone_root,
            &JoinRequest {
                game_id,
                name,
                repo_url,
            },
        )?,
        (None, None) => return Err(AdminError::MissingField("repo").into()),
    };
    println!("{}", participant.id);
    Ok(exit_codes::OK)
}

fn cmd_player(store: &FileStore, command: PlayerCommand) -> Result<i32> {
    match command {
        PlayerCommand::Show {
            game_id,
            participant_id,
            json,
        } => {
            let view = admin::participant_view(store, &game_id, &participant_id)?;
            if json {
                print_json(&view)?;
                return Ok(exit_codes::OK);
            }
            let player = &view.participant;
            println!("{} {} ({})", player.id, player.name, player.locator);
            println!("score {:.2}{}", player.score, if player.paused { " [paused]" } else { "" });
            for (entry, breakdown) in view.history.iter().zip(&view.report.per_commit) {
                println!(
                    "{:>3} {:.8} {:<8} {:>6.2}  {}",
                    entry.record.position,
                    entry.record.sha,
                    entry.record.classification.as_str(),
                    breakdown.total,
                    entry.record.message.lines().next().unwrap_or_default()
                );
                if !entry.feedback.is_empty() {
                    println!("      {}", entry.feedback);
                }
            }
            if !player.feedback.is_empty() {
                println!();
                println!("{}", player.feedback);
            }
        }
        PlayerCommand::Pause {
            game_id,
            participant_id,
        } => {
            let paused = admin::toggle_participant_pause(store, &game_id, &participant_id)?;
            println!("{participant_id} {}", if paused { "paused" } else { "active" });
        }
        PlayerCommand::Reset {
            game_id,
            participant_id,
        } => {
            let player = admin::reset_participant(store, &game_id, &participant_id)?;
            println!("{} reset", player.id);
        }
    }
    Ok(exit_codes::OK)
}

fn cmd_analyze(cfg: &TrackerConfig, path: &Path, json: bool) -> Result<i32> {
    let analysis = analyze_repository(path, &cfg.test_runner(), &TrackerSettings::from(cfg))?;
    if json {
        print_json(&analysis)?;
        return Ok(exit_codes::OK);
    }
    for (record, breakdown) in analysis.history.iter().zip(&analysis.report.per_commit) {
        println!(
            "{:>3} {:.8} {:<8} {:>6.2}  {}",
            record.position,
            record.sha,
            record.classification.as_str(),
            breakdown.total,
            record.message.lines().next().unwrap_or_default()
        );
    }
    println!("overall {:.2}", analysis.report.overall);
    Ok(exit_codes::OK)
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let payload = serde_json::to_string_pretty(value).context("serialize json")?;
    println!("{payload}");
    Ok(())
}
