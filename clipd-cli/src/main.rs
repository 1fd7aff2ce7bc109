//! clipd: selection and clipboard manager
//!
//! One binary covering both the persistent daemon and the one-shot
//! actions (history listing, live fetch, store-and-serve, liveness
//! query). Selection flags pick which selections an action touches.

mod commands;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use clipd_core::config::Config;
use clipd_utils::{init_logging, init_logging_with_config, LogConfig, Result};

#[derive(Parser)]
#[command(name = "clipd", version, about = "Selection and clipboard manager")]
struct Cli {
    /// Operate on the PRIMARY selection
    #[arg(short = 'p', long, global = true)]
    primary: bool,

    /// Operate on the SECONDARY selection
    #[arg(short = 's', long, global = true)]
    secondary: bool,

    /// Operate on the CLIPBOARD selection
    #[arg(short = 'c', long, global = true)]
    clipboard: bool,

    /// Alternate configuration file
    #[arg(long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the persistent daemon
    Daemon,
    /// Print the live content of the selected selections
    Out,
    /// Print one history record, by index or by 0x-prefixed hash
    Get { what: String },
    /// Print every history record of the selected selections
    List,
    /// Print history formatted for a dmenu pipe
    Dmenu,
    /// Delete the history of the selected selections
    Clear,
    /// Exit zero when a daemon is running, nonzero otherwise
    Query,
    /// Print the raw bytes of a conversion target, e.g. image/jpeg
    Binary { target: String },
    /// Take a selection and serve DATA (or stdin) until another
    /// client replaces it
    Store { data: Vec<String> },
}

impl Cli {
    /// Selections picked by flags; all configured ones when no flag given
    fn selected(&self, config: &Config) -> Vec<String> {
        let mut names = Vec::new();
        if self.primary {
            names.push("PRIMARY".to_string());
        }
        if self.secondary {
            names.push("SECONDARY".to_string());
        }
        if self.clipboard {
            names.push("CLIPBOARD".to_string());
        }
        if names.is_empty() {
            names = config.selections.iter().map(|s| s.name.clone()).collect();
        }
        names
    }

    /// Single selection for store/binary; CLIPBOARD when no flag given
    fn selected_one(&self) -> String {
        if self.primary {
            "PRIMARY"
        } else if self.secondary {
            "SECONDARY"
        } else {
            "CLIPBOARD"
        }
        .to_string()
    }
}

fn main() {
    if let Err(e) = run() {
        eprintln!("clipd: {e}");
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Command::Daemon => init_logging_with_config(LogConfig::daemon())?,
        _ => init_logging()?,
    }

    let config = match &cli.config {
        Some(path) => Config::load(path)?,
        None => Config::load_default()?,
    };

    match &cli.command {
        Command::Daemon => commands::daemon(&config),
        Command::Out => commands::out(&config, &cli.selected(&config)),
        Command::Get { what } => commands::get(&config, &cli.selected(&config), what),
        Command::List => commands::list(&config, &cli.selected(&config)),
        Command::Dmenu => commands::dmenu(&config, &cli.selected(&config)),
        Command::Clear => commands::clear(&config, &cli.selected(&config)),
        Command::Query => commands::query(),
        Command::Binary { target } => commands::binary(&config, &cli.selected_one(), target),
        Command::Store { data } => commands::store(&config, &cli.selected_one(), data),
    }
}
