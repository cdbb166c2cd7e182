use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "taskboard")]
#[command(about = "Collaborative task boards with real-time WebSocket sync", long_about = None)]
#[command(version)]
pub struct Cli {
    /// Path to config file (or set TASKBOARD_CONFIG env var)
    #[arg(long, value_name = "FILE", env = "TASKBOARD_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// HS256 secret for connection tokens, overrides the config file
    #[arg(long, env = "TASKBOARD_JWT_SECRET", hide_env_values = true, global = true)]
    pub jwt_secret: Option<String>,

    /// Write debug logs to this file instead of stderr
    #[arg(long, value_name = "FILE", env = "TASKBOARD_LOG_FILE", global = true)]
    pub log_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the WebSocket server (default)
    Serve(ServeArgs),
    /// Issue a connection token for a user
    IssueToken(IssueTokenArgs),
}

#[derive(Args, Default)]
pub struct ServeArgs {
    /// Address to listen on, overrides the config file
    #[arg(long, env = "TASKBOARD_BIND")]
    pub bind: Option<String>,

    /// JSON file with users and boards to load at startup
    #[arg(long, value_name = "FILE", env = "TASKBOARD_SEED")]
    pub seed: Option<PathBuf>,
}

#[derive(Args)]
pub struct IssueTokenArgs {
    #[arg(long)]
    pub user: Uuid,

    /// Token lifetime in minutes
    #[arg(long, default_value_t = 60 * 24)]
    pub ttl_minutes: i64,
}
