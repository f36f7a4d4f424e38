mod commands;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use postbox_core::CoreConfig;

#[derive(Parser)]
#[command(name = "postbox-cli")]
#[command(about = "Inspect and run a postbox store")]
struct Cli {
    /// Data directory holding the database and media
    #[arg(long, short = 'd')]
    data_dir: Option<PathBuf>,

    /// Pretty-print JSON output
    #[arg(long, short)]
    pretty: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Counts, schedule heads and transaction stats
    Inspect,

    /// List recorded holes of one message history
    Holes {
        #[arg(long)]
        peer_namespace: i32,
        #[arg(long)]
        peer_id: i64,
        /// Message namespace
        #[arg(long, default_value_t = 0)]
        namespace: i32,
    },

    /// Run the background managers until Ctrl-C
    Run,
}

fn main() {
    let cli = Cli::parse();
    postbox_core::tracing_setup::init_tracing();

    let data_dir = cli.data_dir.clone().unwrap_or_else(default_data_dir);
    let config = match CoreConfig::load(&data_dir) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    };

    let result = match cli.command {
        Some(Commands::Inspect) => commands::inspect(&config, cli.pretty),
        Some(Commands::Holes {
            peer_namespace,
            peer_id,
            namespace,
        }) => commands::holes(&config, peer_namespace, peer_id, namespace, cli.pretty),
        Some(Commands::Run) => commands::run(config),
        None => {
            eprintln!("No command specified. Use --help for usage.");
            std::process::exit(1);
        }
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn default_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("postbox")
}
