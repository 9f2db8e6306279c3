use std::net::SocketAddr;
use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Parser)]
#[command(name = "orders", about = "Order service: REST API over a key-value store", version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Configuration file (TOML)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[arg(long, global = true, default_value = "text")]
    pub format: OutputFormat,
}

#[derive(Clone, Debug, clap::ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
pub enum Command {
    /// Start the HTTP server
    Serve(ServeArgs),
    /// Print the effective configuration
    Config,
    /// List the orders held in a log file
    List(DataArgs),
    /// Show one order from a log file
    Show(ShowArgs),
    /// Rewrite a log file down to its live records
    Compact(DataArgs),
}

#[derive(Args)]
pub struct ServeArgs {
    /// Address to listen on (overrides the config file)
    #[arg(long)]
    pub bind: Option<SocketAddr>,
    /// Log file to persist orders in (overrides the config file)
    #[arg(long)]
    pub data: Option<PathBuf>,
}

#[derive(Args)]
pub struct DataArgs {
    /// Log file holding the orders
    #[arg(long)]
    pub data: PathBuf,
}

#[derive(Args)]
pub struct ShowArgs {
    pub id: String,
    /// Log file holding the orders
    #[arg(long)]
    pub data: PathBuf,
}
