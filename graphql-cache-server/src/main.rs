use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use graphql_cache::{CacheManager, ManagerSettings};
use graphql_cache_server::api::auth::DEFAULT_TOKEN_HOURS;
use graphql_cache_server::api::server::{ApiServer, ApiServerConfig, DEFAULT_UPSTREAM};
use graphql_cache_server::{HttpExecutor, JwtAuth, RuleFile};

#[derive(Parser)]
#[command(name = "graphql-cache")]
#[command(about = "Read-through response cache for GraphQL", long_about = None)]
struct Cli {
    /// Cache rule file (YAML)
    #[arg(short, long, env = "GRAPHQL_CACHE_RULES")]
    rules: Option<PathBuf>,

    /// GraphQL engine executing cache misses
    #[arg(short, long, env = "GRAPHQL_UPSTREAM", default_value = DEFAULT_UPSTREAM)]
    upstream: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the caching GraphQL endpoint
    Serve {
        /// Host to bind to
        #[arg(long, default_value = "127.0.0.1")]
        host: String,

        /// Port to bind to
        #[arg(short, long, default_value = "8080")]
        port: u16,

        /// JWT secret key
        #[arg(long, env = "JWT_SECRET")]
        jwt_secret: Option<String>,

        /// Upstream request timeout in seconds
        #[arg(long, default_value = "30")]
        timeout: u64,
    },

    /// Remove every cached entry in a zone
    ClearZone {
        /// Zone to clear
        zone: String,
    },

    /// Remove every cached entry
    Clear,

    /// Issue an identity token for a user
    Token {
        /// User identifier (token subject)
        user: String,

        /// Lifetime in hours
        #[arg(long, default_value_t = DEFAULT_TOKEN_HOURS)]
        hours: i64,

        /// JWT secret key
        #[arg(long, env = "JWT_SECRET")]
        jwt_secret: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();

    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG")
                .unwrap_or_else(|_| "graphql_cache=info,graphql_cache_server=info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let settings = ManagerSettings::from_env().context("Invalid GRAPHQL_CACHE_* settings")?;

    match cli.command {
        Commands::Serve {
            ref host,
            port,
            ref jwt_secret,
            timeout,
        } => {
            let secret = jwt_secret.clone().unwrap_or_else(|| {
                println!("Warning: Using default JWT secret. Set JWT_SECRET env var or --jwt-secret for production.");
                "default_secret_change_in_production".to_string()
            });

            let config = ApiServerConfig {
                host: host.clone(),
                port,
                jwt_secret: secret,
                upstream: cli.upstream.clone(),
                upstream_timeout: Duration::from_secs(timeout),
                rules_file: cli.rules.clone(),
                cache: settings,
            };

            println!("Starting GraphQL cache on {}:{}", host, port);
            ApiServer::new(config).start().await?;
        }

        Commands::ClearZone { ref zone } => {
            let manager = admin_manager(&cli, settings).await?;
            if manager.clear_zone(zone).await {
                println!("Cleared zone '{}'", zone);
            } else {
                anyhow::bail!("Zone '{}' could not be fully cleared", zone);
            }
        }

        Commands::Clear => {
            let manager = admin_manager(&cli, settings).await?;
            if manager.clear().await {
                println!("Cache cleared");
            } else {
                anyhow::bail!("Cache could not be fully cleared");
            }
        }

        Commands::Token {
            ref user,
            hours,
            ref jwt_secret,
        } => {
            let token = JwtAuth::new(jwt_secret).issue(user, hours)?;
            println!("{}", token);
        }
    }

    Ok(())
}

/// Manager used only for invalidation; it is never activated
async fn admin_manager(cli: &Cli, settings: ManagerSettings) -> Result<CacheManager> {
    let executor = HttpExecutor::new(&cli.upstream, Duration::from_secs(5))?;
    let manager = CacheManager::new(settings, Arc::new(executor));
    manager.init().await;

    if let Some(path) = &cli.rules {
        RuleFile::load(path)?.apply(&manager).await?;
    }

    Ok(manager)
}
