use std::path::PathBuf;

use clap::{Parser, Subcommand};
use perp_keeper_core::Direction;
use rust_decimal::Decimal;

mod commands;

#[derive(Parser)]
#[command(name = "perp-keeper")]
#[command(about = "Keeps one leveraged Binance futures position protected and reconciled", long_about = None)]
struct Cli {
    /// Config file path
    #[arg(
        short,
        long,
        global = true,
        env = "PERP_KEEPER_CONFIG",
        default_value = "config/Keeper.toml"
    )]
    config: PathBuf,

    /// Use the in-memory paper exchange instead of Binance
    #[arg(long, global = true)]
    paper: bool,

    /// Starting price for the paper exchange
    #[arg(long, global = true, default_value = "0.25")]
    paper_price: Decimal,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the keeper until ctrl-c or the stop file appears
    Run {
        /// Append logs to this file instead of stderr
        #[arg(long)]
        log_file: Option<PathBuf>,
    },
    /// Open a position, closing any existing one first
    Open {
        /// long or short
        #[arg(short, long)]
        direction: Direction,
        /// Margin to commit, in the margin asset
        #[arg(long)]
        margin: Option<Decimal>,
        /// Leverage for this entry
        #[arg(long)]
        leverage: Option<u32>,
    },
    /// Close the position (through the running keeper when there is one)
    Close,
    /// Show the local snapshot, remote position and open orders
    Status,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match &cli.command {
        Commands::Run {
            log_file: Some(path),
        } => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)?;
            tracing_subscriber::fmt()
                .with_env_filter(env_filter())
                .with_writer(std::sync::Mutex::new(file))
                .with_ansi(false)
                .init();
        }
        _ => {
            tracing_subscriber::fmt().with_env_filter(env_filter()).init();
        }
    }

    let options = commands::Options {
        config_path: cli.config,
        paper: cli.paper,
        paper_price: cli.paper_price,
    };

    match cli.command {
        Commands::Run { .. } => commands::run::execute(&options).await?,
        Commands::Open {
            direction,
            margin,
            leverage,
        } => commands::trade::open(&options, direction, margin, leverage).await?,
        Commands::Close => commands::trade::close(&options).await?,
        Commands::Status => commands::status::execute(&options).await?,
    }

    Ok(())
}

fn env_filter() -> tracing_subscriber::EnvFilter {
    tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_parse_open() {
        let cli = Cli::try_parse_from([
            "perp-keeper",
            "open",
            "--direction",
            "short",
            "--margin",
            "7.5",
            "--leverage",
            "3",
        ])
        .unwrap();
        match cli.command {
            Commands::Open {
                direction,
                margin,
                leverage,
            } => {
                assert_eq!(direction, Direction::Short);
                assert_eq!(margin, Some(dec!(7.5)));
                assert_eq!(leverage, Some(3));
            }
            _ => panic!("expected open"),
        }
        assert_eq!(cli.config, PathBuf::from("config/Keeper.toml"));
    }

    #[test]
    fn test_parse_run_with_globals() {
        let cli = Cli::try_parse_from([
            "perp-keeper",
            "run",
            "--paper",
            "--config",
            "/etc/keeper.toml",
            "--log-file",
            "keeper.log",
        ])
        .unwrap();
        assert!(cli.paper);
        assert_eq!(cli.config, PathBuf::from("/etc/keeper.toml"));
        assert!(matches!(
            cli.command,
            Commands::Run { log_file: Some(ref p) } if p == &PathBuf::from("keeper.log")
        ));
    }

    #[test]
    fn test_config_path_reads_environment() {
        use clap::CommandFactory;

        let command = Cli::command();
        let config = command
            .get_arguments()
            .find(|arg| arg.get_id() == "config")
            .unwrap();
        assert_eq!(
            config.get_env(),
            Some(std::ffi::OsStr::new("PERP_KEEPER_CONFIG"))
        );
    }

    #[test]
    fn test_rejects_unknown_direction() {
        assert!(Cli::try_parse_from(["perp-keeper", "open", "--direction", "up"]).is_err());
    }
}
