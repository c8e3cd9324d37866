// SPDX-License-Identifier: AGPL-3.0-only
// Minimal bootstrap; handlers and wiring live in the library.
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::net::SocketAddr;
use std::path::PathBuf;
use tracing::{info, warn};

use qa_composer::auth::JwtVerifier;
use qa_composer::{build_router, AppConfig, AppState};

#[derive(Parser, Debug, Clone)]
#[command(name = "qa-composer", about = "Worked-problem Q&A composer service")]
struct Cli {
    #[command(subcommand)]
    cmd: Option<Command>,
}

#[derive(Subcommand, Debug, Clone)]
enum Command {
    /// Run the HTTP service (default).
    Serve {
        #[arg(long)]
        config: Option<PathBuf>,
    },

    /// Print the resolved configuration with secrets redacted.
    CheckConfig {
        #[arg(long)]
        config: Option<PathBuf>,
    },

    /// Mint a bearer token signed with the configured secret, for local use.
    Token {
        #[arg(long)]
        email: String,

        #[arg(long, default_value = "local-dev")]
        sub: String,

        #[arg(long, default_value_t = 12)]
        hours: i64,

        #[arg(long)]
        config: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .init();
    let cli = Cli::parse();
    match cli.cmd.unwrap_or(Command::Serve { config: None }) {
        Command::Serve { config } => run_server(config).await,
        Command::CheckConfig { config } => check_config(config),
        Command::Token {
            email,
            sub,
            hours,
            config,
        } => mint_token(config, &sub, &email, hours),
    }
}

fn check_config(path: Option<PathBuf>) -> Result<()> {
    let config = AppConfig::load(path.as_deref())?;
    let rendered = toml::to_string_pretty(&config.redacted())
        .context("failed to render configuration")?;
    println!("{rendered}");
    Ok(())
}

fn mint_token(path: Option<PathBuf>, sub: &str, email: &str, hours: i64) -> Result<()> {
    let config = AppConfig::load(path.as_deref())?;
    let secret = config
        .auth
        .jwt_secret
        .as_deref()
        .filter(|s| !s.trim().is_empty())
        .context("auth.jwt_secret is not configured")?;
    let jwt = JwtVerifier::new(secret, config.auth.issuer.clone(), config.auth.audience.clone());
    let token = jwt.create_token(sub, email, hours)?;
    println!("{token}");
    Ok(())
}

async fn run_server(path: Option<PathBuf>) -> Result<()> {
    info!("qa-composer starting");
    let config = AppConfig::load(path.as_deref())?;
    let addr: SocketAddr = config
        .server
        .http_addr
        .parse()
        .with_context(|| format!("invalid server.http_addr '{}'", config.server.http_addr))?;

    let state = AppState::from_config(config).await?;
    let app = build_router(state);

    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(l) => l,
        Err(e) => {
            warn!(error=%e, %addr, "bind failed, using ephemeral");
            tokio::net::TcpListener::bind("127.0.0.1:0").await?
        }
    };
    let local = listener.local_addr()?;
    info!(%local, "qa-composer listening");

    tokio::select! { _ = axum::serve(listener, app) => {} _ = tokio::signal::ctrl_c() => {} }
    info!("qa-composer shutting down");
    Ok(())
}
