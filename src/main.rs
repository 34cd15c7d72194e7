/*!
 * Tango - command-line client for the Tango autograding job server
 */

use anyhow::Context;
use clap::Parser;
use tango_cli::client::TangoClient;
use tango_cli::commands::{self, Command};
use tango_cli::logging;

#[derive(Debug, Parser)]
#[command(name = "tango", about = "Command-line client for the Tango job server", version)]
struct Cli {
    /// Server hostname
    #[arg(short = 's', long, default_value = "localhost", global = true)]
    server: String,

    /// Server port
    #[arg(short = 'P', long, default_value_t = 3000, global = true)]
    port: u16,

    /// Use https instead of http
    #[arg(short = 'S', long, global = true)]
    ssl: bool,

    /// Access key identifying the caller to the server
    #[arg(short = 'k', long, default_value = "default", global = true)]
    key: String,

    /// Verbose logging
    #[arg(short = 'v', long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    logging::init_logging(cli.verbose);

    let port = if cli.ssl && cli.port == 3000 { 443 } else { cli.port };
    let client = TangoClient::new(&cli.server, port, cli.ssl, &cli.key);

    client
        .ping()
        .with_context(|| format!("server unreachable at {}:{}", cli.server, port))?;

    commands::run(&client, cli.command).context("command failed")?;
    Ok(())
}
