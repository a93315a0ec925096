mod commands;
mod render;
mod singleton;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use modeswitch_core::config::{ModesConfig, Settings};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "modeswitch")]
#[command(about = "Calendar-driven mode switches with timers, overrides and linked modes")]
struct Cli {
    /// Use this config file instead of ~/.config/modeswitch/config.toml
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the reconciliation daemon
    Run,
    /// List every known mode
    Modes,
    /// Show switch, override and calendar state.
    ///
    /// Reads the state files directly, so it cannot run while `modeswitch run`
    /// holds the data directory.
    Status {
        /// Only show this mode
        mode: Option<String>,

        /// Print JSON instead of text
        #[arg(long)]
        json: bool,
    },
    /// Turn a mode on. Not available while `modeswitch run` is active.
    On {
        mode: String,

        /// Minutes until it turns off again (0 = until turned off)
        #[arg(short, long)]
        minutes: Option<u32>,
    },
    /// Turn a mode off. Not available while `modeswitch run` is active.
    Off { mode: String },
    /// Engage or release the calendar override of a mode. Not available while
    /// `modeswitch run` is active.
    Override { mode: String, state: Toggle },
    /// Show tracked and archived calendar events. Not available while
    /// `modeswitch run` is active.
    Ledger {
        /// Print JSON instead of text
        #[arg(long)]
        json: bool,
    },
    /// Manage calendar events. Not available while `modeswitch run` is active.
    Event {
        #[command(subcommand)]
        command: EventCommands,
    },
}

#[derive(Subcommand)]
enum EventCommands {
    Add {
        mode: String,
        title: String,

        /// Start (e.g. "2025-03-20T15:00", or "2025-03-20" for all day)
        #[arg(short, long)]
        start: String,

        /// End (defaults to the end of the start day for all-day events)
        #[arg(short, long)]
        end: Option<String>,

        #[arg(short, long)]
        description: Option<String>,
    },
    List {
        mode: String,

        /// Show events from this date (YYYY-MM-DD)
        #[arg(long)]
        from: Option<String>,

        /// Show events until this date (YYYY-MM-DD)
        #[arg(long)]
        to: Option<String>,
    },
    Update {
        mode: String,
        uid: String,

        #[arg(short, long)]
        title: Option<String>,

        #[arg(short, long)]
        start: Option<String>,

        #[arg(short, long)]
        end: Option<String>,

        /// New description ("" clears it)
        #[arg(short, long)]
        description: Option<String>,
    },
    Delete { mode: String, uid: String },
}

#[derive(Clone, Copy, ValueEnum)]
enum Toggle {
    On,
    Off,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Logs go to stderr so command output stays clean.
    // Override with RUST_LOG=debug to see everything.
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("modeswitch=info,modeswitch_core=info")),
        )
        .init();

    let cli = Cli::parse();
    let settings = load_settings(cli.config.as_deref())?;

    match cli.command {
        Commands::Run => commands::run::run(settings).await,
        Commands::Modes => commands::modes::run(&settings),
        Commands::Status { mode, json } => commands::status::run(&settings, mode.as_deref(), json),
        Commands::On { mode, minutes } => commands::switch::turn_on(&settings, &mode, minutes),
        Commands::Off { mode } => commands::switch::turn_off(&settings, &mode),
        Commands::Override { mode, state } => {
            commands::switch::set_override(&settings, &mode, matches!(state, Toggle::On))
        }
        Commands::Ledger { json } => commands::ledger::run(&settings, json),
        Commands::Event { command } => match command {
            EventCommands::Add {
                mode,
                title,
                start,
                end,
                description,
            } => commands::event::add(
                &settings,
                &mode,
                &title,
                &start,
                end.as_deref(),
                description.as_deref(),
            ),
            EventCommands::List { mode, from, to } => {
                commands::event::list(&settings, &mode, from.as_deref(), to.as_deref())
            }
            EventCommands::Update {
                mode,
                uid,
                title,
                start,
                end,
                description,
            } => commands::event::update(
                &settings,
                &mode,
                &uid,
                commands::event::EventEdits {
                    title,
                    start,
                    end,
                    description,
                },
            ),
            EventCommands::Delete { mode, uid } => commands::event::delete(&settings, &mode, &uid),
        },
    }
}

fn load_settings(path: Option<&std::path::Path>) -> Result<Settings> {
    let config = match path {
        Some(path) => ModesConfig::load_from(path)?,
        None => ModesConfig::load()?,
    };
    Ok(config.resolve()?)
}
