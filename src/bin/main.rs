use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use oauth_gatekeeper::auth::{ChallengeBuilder, SessionStore};
use oauth_gatekeeper::types::{ClientId, RedirectUri};
use oauth_gatekeeper::{GatekeeperConfig, InMemorySessionStore, create_app};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{Level, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "oauth-gatekeeper")]
#[command(about = "OAuth 2.0 / OpenID Connect login gate for HTTP applications")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

/// Settings shared by every subcommand; each overrides the config file.
#[derive(Args)]
struct ConfigArgs {
    /// Path to gatekeeper.json (default: GATEKEEPER_CONFIG, XDG config dir, ./gatekeeper.json)
    #[arg(long)]
    config: Option<PathBuf>,
    #[arg(long, env = "GATEKEEPER_CLIENT_ID")]
    client_id: Option<String>,
    #[arg(long, env = "GATEKEEPER_CLIENT_SECRET", hide_env_values = true)]
    client_secret: Option<String>,
    #[arg(long, env = "GATEKEEPER_REDIRECT_URI")]
    redirect_uri: Option<String>,
    /// Page to redirect to when a login fails
    #[arg(long, env = "GATEKEEPER_ERROR_PAGE")]
    error_page: Option<String>,
    /// Remember every challenged URI instead of only the first one
    #[arg(long)]
    always_save_uri: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the gatekeeper HTTP server
    Serve {
        /// Bind address, e.g. 0.0.0.0:8080
        #[arg(long, default_value = "127.0.0.1:8080")]
        bind: String,
        #[command(flatten)]
        config: ConfigArgs,
    },
    /// Print a challenge URL for a throwaway session (checks provider registration)
    ChallengeUrl {
        #[command(flatten)]
        config: ConfigArgs,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env().add_directive("oauth_gatekeeper=info".parse()?),
        )
        .with_max_level(Level::INFO)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Serve { bind, config } => {
            let config = build_config(config)?;
            info!(
                "Protecting {:?} under context '{}'",
                config.protected_paths, config.context_path
            );

            let purge_interval = Duration::from_secs(config.session_ttl_seconds.clamp(60, 600));
            let (app, sessions) = create_app(config)?;

            // Reclaim sessions that are never looked up again
            tokio::spawn(async move {
                let mut ticker = tokio::time::interval(purge_interval);
                loop {
                    ticker.tick().await;
                    sessions.purge_expired().await;
                }
            });

            let listener = tokio::net::TcpListener::bind(&bind).await?;
            info!("Gatekeeper listening on http://{}", bind);
            axum::serve(listener, app).await?;
        }
        Commands::ChallengeUrl { config } => {
            let config = build_config(config)?;

            let store = InMemorySessionStore::new(config.session_ttl_seconds);
            let session = store.create().await;
            let builder = ChallengeBuilder::new(
                ClientId::new(config.client_id.as_str()),
                RedirectUri::new(config.redirect_uri.as_str()),
            )
            .with_endpoint(config.authorization_endpoint.clone());

            let url = builder.challenge_uri(&session).await?;
            println!("{}", url);
        }
    }

    Ok(())
}

/// Load the config file (if any) and apply command-line overrides.
fn build_config(args: ConfigArgs) -> Result<GatekeeperConfig> {
    let path = match args.config {
        Some(path) => Some(path),
        None => oauth_gatekeeper::config::resolve_config_path().ok(),
    };

    let mut config = match path {
        Some(path) => {
            info!("Loading configuration from {}", path.display());
            GatekeeperConfig::from_file(&path)?
        }
        None => {
            let (Some(client_id), Some(redirect_uri)) = (&args.client_id, &args.redirect_uri)
            else {
                return Err(anyhow::anyhow!(
                    "No gatekeeper.json found; pass --client-id and --redirect-uri"
                ));
            };
            GatekeeperConfig::new(client_id.as_str(), redirect_uri.as_str())
        }
    };

    if let Some(client_id) = args.client_id {
        config.client_id = client_id;
    }
    if let Some(secret) = args.client_secret {
        config.client_secret = secret;
    }
    if let Some(redirect_uri) = args.redirect_uri {
        config.redirect_uri = redirect_uri;
    }
    if let Some(error_page) = args.error_page {
        config.error_page = Some(error_page);
    }
    if args.always_save_uri {
        config.always_save_uri = true;
    }

    config.validate()?;
    if config.client_secret.is_empty() {
        tracing::warn!("No client secret configured - code exchanges will be rejected");
    }
    Ok(config)
}
