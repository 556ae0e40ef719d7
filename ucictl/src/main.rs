//! ucictl - drive a UCI chess engine from the command line.
//!
//! Launches the engine, performs the handshake and either prints what the
//! engine advertises (`info`) or runs a single search (`think`). The engine
//! is always shut down before exiting, even when a command fails.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context};
use clap::{Args, Parser, Subcommand};
use uci_client::{
    EngineConfig, EngineOption, GoParameters, GoReply, OptionKind, Score, ScoreBound,
    TimeControl, UciEngine, Variant,
};

mod config;

#[derive(Parser)]
#[command(name = "ucictl", about = "Talk to a UCI chess engine")]
struct Cli {
    /// Engine executable (defaults to `UCICTL_ENGINE`, then `stockfish`).
    #[arg(short, long)]
    engine: Option<PathBuf>,

    /// Extra argument passed to the engine. Repeatable.
    #[arg(long = "arg", allow_hyphen_values = true)]
    args: Vec<String>,

    /// Seconds the engine is given to exit after `quit` before it is killed.
    #[arg(long)]
    close_timeout: Option<u64>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the engine name, variant support and options.
    Info {
        /// Print as JSON.
        #[arg(long)]
        json: bool,
    },
    /// Search a position and print the best move.
    Think(ThinkArgs),
}

#[derive(Args)]
struct ThinkArgs {
    /// Starting position; the standard one when omitted.
    #[arg(long)]
    fen: Option<String>,

    /// Moves played from the starting position, in long algebraic notation.
    #[arg(long, num_args = 1..)]
    moves: Vec<String>,

    /// Remaining clock time of the side to move, in milliseconds.
    #[arg(long)]
    time: Option<u64>,

    /// Increment per move, in milliseconds.
    #[arg(long, default_value_t = 0, requires = "time")]
    inc: u64,

    /// Moves until the next time control.
    #[arg(long, default_value_t = 0, requires = "time")]
    movestogo: u32,

    #[arg(long)]
    depth: Option<u32>,

    #[arg(long)]
    nodes: Option<u64>,

    /// Fixed search time, in milliseconds.
    #[arg(long)]
    movetime: Option<u64>,

    /// Play Fischer random chess.
    #[arg(long)]
    chess960: bool,

    /// Set an engine option before searching. Repeatable.
    #[arg(long = "set", value_name = "NAME=VALUE", value_parser = parse_assignment)]
    set: Vec<(String, String)>,

    /// Press a button option before searching. Repeatable.
    #[arg(long = "press", value_name = "NAME")]
    press: Vec<String>,
}

impl ThinkArgs {
    fn variant(&self) -> Variant {
        if self.chess960 {
            Variant::Chess960
        } else {
            Variant::Standard
        }
    }

    fn go_parameters(&self) -> GoParameters {
        let mut params = GoParameters {
            depth: self.depth,
            nodes: self.nodes,
            move_time_ms: self.movetime,
            ..Default::default()
        };
        params.time_control = self.time.map(|remaining_ms| TimeControl {
            remaining_ms,
            increment_ms: self.inc,
            moves_to_go: self.movestogo,
        });
        params
    }
}

fn parse_assignment(s: &str) -> Result<(String, String), String> {
    let (name, value) = s
        .split_once('=')
        .ok_or_else(|| format!("expected NAME=VALUE, got '{}'", s))?;
    let name = name.trim();
    if name.is_empty() {
        return Err(format!("missing option name in '{}'", s));
    }
    Ok((name.to_string(), value.to_string()))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = engine_config(&cli);
    let mut engine = UciEngine::launch(config.clone())
        .await
        .with_context(|| format!("failed to start engine {}", config.command_line()))?;

    let result = match &cli.command {
        Commands::Info { json } => print_info(&engine, *json),
        Commands::Think(args) => think(&mut engine, args).await,
    };

    engine
        .close()
        .await
        .with_context(|| format!("failed to close engine {}", engine.name()))?;
    result
}

fn engine_config(cli: &Cli) -> EngineConfig {
    let program = cli.engine.clone().unwrap_or_else(config::get_engine_path);
    let close_timeout = cli
        .close_timeout
        .map_or_else(config::get_close_timeout, Duration::from_secs);
    EngineConfig::new(program)
        .args(cli.args.iter().cloned())
        .close_timeout(close_timeout)
}

fn print_info(engine: &UciEngine, json: bool) -> anyhow::Result<()> {
    let options = engine.options()?;
    let chess960 = engine.is_supported(Variant::Chess960)?;

    if json {
        let report = serde_json::json!({
            "name": engine.name(),
            "chess960": chess960,
            "options": options,
        });
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    println!("name {}", engine.name());
    println!("chess960 {}", if chess960 { "yes" } else { "no" });
    for option in options {
        println!("{}", describe_option(option));
    }
    Ok(())
}

fn describe_option(option: &EngineOption) -> String {
    let details = match option.kind() {
        OptionKind::Check { default, .. } => format!("default {}", default),
        OptionKind::Spin { default, min, max, .. } => {
            format!("default {} min {} max {}", default, min, max)
        }
        OptionKind::Combo {
            default, choices, ..
        } => format!("default {} var {}", default, choices.join(" var ")),
        OptionKind::Button => String::new(),
        OptionKind::String { default, .. } if default.is_empty() => "default <empty>".to_string(),
        OptionKind::String { default, .. } => format!("default {}", default),
    };
    let line = format!("option {} ({})", option.name(), option.option_type());
    if details.is_empty() {
        line
    } else {
        format!("{} {}", line, details)
    }
}

async fn think(engine: &mut UciEngine, args: &ThinkArgs) -> anyhow::Result<()> {
    let variant = args.variant();
    if !engine
        .new_game(variant)
        .await
        .context("failed to start a new game")?
    {
        bail!("{} does not support {:?}", engine.name(), variant);
    }
    for (name, value) in &args.set {
        engine
            .set_option(name, value.as_str())
            .await
            .with_context(|| format!("failed to set option {}", name))?;
    }
    for name in &args.press {
        engine
            .press_button(name)
            .await
            .with_context(|| format!("failed to press {}", name))?;
    }
    engine
        .set_position(args.fen.as_deref(), args.moves.as_slice())
        .await
        .context("failed to set position")?;

    // Ctrl-C ends the search early; the engine still answers with a move.
    let stop = engine.stop_handle();
    let interrupt = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Interrupted, asking the engine to stop");
            if let Err(e) = stop.stop().await {
                tracing::warn!("Failed to stop the search: {}", e);
            }
        }
    });
    let reply = engine.go(&args.go_parameters()).await;
    interrupt.abort();

    match reply.context("search failed")? {
        Some(reply) => {
            print_reply(&reply);
            Ok(())
        }
        None => bail!("{} exited before answering", engine.name()),
    }
}

fn print_reply(reply: &GoReply) {
    println!(
        "bestmove {}",
        reply.best_move.as_deref().unwrap_or("(none)")
    );
    if let Some(ponder) = &reply.ponder_move {
        println!("ponder {}", ponder);
    }
    if let Some(info) = reply.main_line() {
        if let Some(score) = info.score {
            println!("score {}", format_score(score, info.bound));
        }
        if let Some(depth) = info.depth {
            println!("depth {}", depth);
        }
        if !info.pv.is_empty() {
            println!("pv {}", info.pv.join(" "));
        }
    }
}

fn format_score(score: Score, bound: Option<ScoreBound>) -> String {
    let value = match score {
        Score::Centipawns(cp) => format!("cp {}", cp),
        Score::Mate(moves) => format!("mate {}", moves),
    };
    match bound {
        Some(ScoreBound::Lower) => format!("{} lowerbound", value),
        Some(ScoreBound::Upper) => format!("{} upperbound", value),
        None => value,
    }
}
