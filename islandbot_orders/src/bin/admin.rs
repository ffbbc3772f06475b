// Operator CLI for the coordinator's configuration and durable stores.
//
// Works directly on the files named in the config, so it can be used while
// the coordinator is stopped (ban edits made while it runs are overwritten by
// the coordinator's next rewrite).
//
// Usage:
//   islandbot-admin [--config <PATH>] [--log-level <FILTER>] <COMMAND>
//     check-config          Load the config and print it as JSON
//     bans                  List banned identities
//     ban <IDENTITY>        Add an identity to the ban list
//     unban <IDENTITY>      Remove an identity from the ban list
//     temp-users            List temporary access records

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use islandbot_orders::abuse::BanRegistry;
use islandbot_orders::config::BotConfig;
use islandbot_orders::temp_access::read_records;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "islandbot-admin", about = "Inspect and edit islandbot state")]
struct Cli {
    /// Coordinator config file.
    #[arg(long, default_value = "config.json")]
    config: PathBuf,

    /// Log filter, e.g. `info` or `islandbot_orders=debug`.
    #[arg(long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Load the config and print the effective values as JSON.
    CheckConfig,
    /// List banned identities.
    Bans,
    /// Ban an identity.
    Ban { identity: String },
    /// Lift a ban.
    Unban { identity: String },
    /// List temporary access records.
    TempUsers,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let filter = EnvFilter::try_new(&cli.log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    let config = BotConfig::load(&cli.config)?;

    match cli.command {
        Command::CheckConfig => {
            println!("{}", serde_json::to_string_pretty(&config)?);
        }
        Command::Bans => {
            let bans = BanRegistry::load(&config.ban_list_path)?;
            for identity in bans.identities() {
                println!("{identity}");
            }
            eprintln!("{} banned", bans.len());
        }
        Command::Ban { identity } => {
            let bans = BanRegistry::load(&config.ban_list_path)?;
            if bans.add(&identity) {
                println!("banned {}", identity.trim());
            } else {
                println!("{} was already banned", identity.trim());
            }
        }
        Command::Unban { identity } => {
            let bans = BanRegistry::load(&config.ban_list_path)?;
            if bans.remove(&identity) {
                println!("unbanned {}", identity.trim());
            } else {
                println!("{} was not banned", identity.trim());
            }
        }
        Command::TempUsers => {
            for record in read_records(&config.temp_access_path)? {
                println!(
                    "{}\t{}\t{} order(s)\tfirst {}\tlast {}{}",
                    record.user,
                    record.username,
                    record.travel_count,
                    record.first_order.format("%Y-%m-%d %H:%M"),
                    record.last_order.format("%Y-%m-%d %H:%M"),
                    if record.expired { "\texpired" } else { "" }
                );
            }
        }
    }
    Ok(())
}
