use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use tracing::warn;
use tracing_subscriber::{fmt, EnvFilter};

use pluto_hub::ids::ExternalAuthId;
use pluto_hub::server::{run_server, ServerConfig};

const LOG_TARGET: &str = "bin::pluto_hub_server";
const DEFAULT_BIND: &str = "127.0.0.1:4100";
const DEFAULT_TOKEN_SECRET_ENV: &str = "PLUTO_TOKEN_SECRET";

#[derive(Debug, Parser)]
#[command(name = "pluto_hub_server")]
#[command(about = "Launch the Pluto Hub bank-and-lobby API server", long_about = None)]
struct Args {
    /// Address to bind the HTTP server to (host:port)
    #[arg(long, env = "PLUTO_BIND", default_value = DEFAULT_BIND)]
    bind: SocketAddr,

    /// Environment variable holding the session-token secret
    #[arg(long, env = "PLUTO_TOKEN_SECRET_SOURCE", default_value = DEFAULT_TOKEN_SECRET_ENV)]
    token_secret_source: String,

    /// Environment label (development, staging, production)
    #[arg(long, env = "PLUTO_ENVIRONMENT", default_value = "development")]
    environment: String,

    /// Expiry sweep cadence in seconds
    #[arg(long, env = "PLUTO_SWEEP_INTERVAL_SECS", default_value_t = 15)]
    sweep_interval_secs: u64,

    /// Inline JSON array of bearer-token mappings for the local identity
    /// provider: [{"token":"...","subject":"..."}]
    #[arg(long, env = "PLUTO_IDENTITY_TOKENS")]
    identity_tokens: Option<String>,

    /// Seed a sample game, contract and funded accounts on startup
    #[arg(long, env = "PLUTO_SEED_DEV", default_value_t = false)]
    seed_dev: bool,

    /// Toggle structured (JSON) logs
    #[arg(long, env = "PLUTO_LOG_JSON", default_value_t = false)]
    json: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    load_dotenv();
    let args = Args::parse();
    init_tracing(args.json);
    let config = build_config(args).context("failed to build server config")?;
    run_server(config).await
}

fn load_dotenv() {
    let manifest_env = env!("CARGO_MANIFEST_DIR");
    let manifest_env_path = PathBuf::from(manifest_env).join(".env");
    dotenv::from_filename(manifest_env_path).ok();
    dotenv::dotenv().ok();
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = fmt::fmt().with_env_filter(filter).with_target(false);

    if json {
        builder.json().flatten_event(true).init();
    } else {
        builder.compact().init();
    }
}

fn build_config(args: Args) -> Result<ServerConfig> {
    let token_secret = match env::var(&args.token_secret_source) {
        Ok(secret) if !secret.is_empty() => secret,
        _ if args.environment == "production" => {
            return Err(anyhow!(
                "{} must be set in production",
                args.token_secret_source
            ));
        }
        _ => {
            warn!(
                target = LOG_TARGET,
                source = %args.token_secret_source,
                "no session-token secret configured; using an ephemeral one"
            );
            uuid::Uuid::new_v4().to_string()
        }
    };

    let identity_tokens = match &args.identity_tokens {
        Some(raw) => parse_identity_tokens(raw)?,
        None => Vec::new(),
    };

    let mut config = ServerConfig::new(args.bind, token_secret, args.environment);
    config.sweep_interval = Duration::from_secs(args.sweep_interval_secs.max(1));
    config.identity_tokens = identity_tokens;
    config.seed_dev_fixtures = args.seed_dev;
    Ok(config)
}

fn parse_identity_tokens(raw: &str) -> Result<Vec<(String, ExternalAuthId)>> {
    let entries: Vec<serde_json::Value> =
        serde_json::from_str(raw).context("invalid PLUTO_IDENTITY_TOKENS JSON")?;
    let mut tokens = Vec::with_capacity(entries.len());
    for entry in entries {
        let token = entry
            .get("token")
            .and_then(|v| v.as_str())
            .ok_or_else(|| anyhow!("identity token entry missing token string"))?;
        let subject = entry
            .get("subject")
            .and_then(|v| v.as_str())
            .ok_or_else(|| anyhow!("identity token entry missing subject string"))?;
        tokens.push((token.to_owned(), ExternalAuthId::from(subject)));
    }
    Ok(tokens)
}
