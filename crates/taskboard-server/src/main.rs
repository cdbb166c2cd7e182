mod cli;
mod logging;
mod server;

use anyhow::Context;
use clap::Parser;
use cli::{Cli, Commands, IssueTokenArgs};
use taskboard_core::AppConfig;
use taskboard_sync::JwtAuthService;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    logging::init(cli.log_file.as_deref())?;

    let mut config = match &cli.config {
        Some(path) => AppConfig::load_from(path)
            .with_context(|| format!("failed to load config {}", path.display()))?,
        None => AppConfig::load(),
    };
    if let Some(secret) = cli.jwt_secret {
        config.auth.jwt_secret = Some(secret);
    }

    match cli.command {
        None => server::run(config, Default::default()).await,
        Some(Commands::Serve(args)) => server::run(config, args).await,
        Some(Commands::IssueToken(args)) => issue_token(&config, args),
    }
}

fn issue_token(config: &AppConfig, args: IssueTokenArgs) -> anyhow::Result<()> {
    let secret = config
        .auth
        .jwt_secret
        .as_deref()
        .ok_or_else(|| anyhow::anyhow!("no JWT secret configured"))?;
    let expires_at = chrono::Duration::try_minutes(args.ttl_minutes)
        .and_then(|ttl| chrono::Utc::now().checked_add_signed(ttl))
        .ok_or_else(|| anyhow::anyhow!("--ttl-minutes {} is out of range", args.ttl_minutes))?;
    let token = JwtAuthService::new(secret).issue_until(args.user, expires_at)?;

    let output = serde_json::json!({
        "user_id": args.user,
        "token": token,
        "expires_at": expires_at,
    });
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}
