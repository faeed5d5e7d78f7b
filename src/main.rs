//! tunnl - session control plane for tunnl.live
//!
//! Serves the session registry API and mints the JWTs the dashboard and
//! node daemons authenticate with.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use tunnl_api::{ApiServer, ApiServerConfig};
use tunnl_auth::{JwtClaims, JwtValidator};
use tunnl_policy::PolicyStore;
use tunnl_registry::{DbStore, MemoryStore, SessionRegistry, SessionStore};

const DEV_SECRET: &str = "tunnl-dev-secret";

const VERSION: &str = concat!(
    env!("CARGO_PKG_VERSION"),
    " (",
    env!("GIT_HASH"),
    ", built ",
    env!("BUILD_TIME"),
    ")"
);

/// tunnl - session control plane for tunnl.live
#[derive(Parser, Debug)]
#[command(name = "tunnl")]
#[command(about = "tunnl - session control plane for tunnl.live")]
#[command(version = VERSION)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Commands>,

    /// Serve options used when no subcommand is given
    #[command(flatten)]
    serve: ServeArgs,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the control plane server (the default)
    Serve(ServeArgs),

    /// Mint a session or node JWT for ops and testing
    #[command(long_about = r#"
Mint a bearer token signed with the control plane's secret.

EXAMPLES:
  # Dashboard session token for a user
  tunnl generate-token --secret $TUNNL_JWT_SECRET \
    --token-type session --user-id alice

  # Daemon token for the Singapore node, valid a week
  tunnl generate-token --secret $TUNNL_JWT_SECRET \
    --token-type node --node-id sgp --hours 168
    "#)]
    GenerateToken {
        /// Signing secret (must match the server's)
        #[arg(long, env = "TUNNL_JWT_SECRET")]
        secret: String,

        /// Kind of token to mint
        #[arg(long, value_enum, default_value = "session")]
        token_type: TokenType,

        /// User the token acts for (session tokens)
        #[arg(long)]
        user_id: Option<String>,

        /// Node the token acts for (node tokens)
        #[arg(long)]
        node_id: Option<String>,

        /// Validity in hours
        #[arg(long, default_value = "24")]
        hours: i64,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum TokenType {
    Session,
    Node,
}

#[derive(clap::Args, Debug)]
struct ServeArgs {
    /// Address to bind the API server
    #[arg(long, env = "TUNNL_BIND", default_value = "127.0.0.1:8080")]
    bind: SocketAddr,

    /// Database connection URL (SQLite or Postgres)
    #[arg(long, env = "DATABASE_URL", default_value = "sqlite::memory:")]
    database_url: String,

    /// Keep sessions in process memory instead of a database
    #[arg(long)]
    in_memory: bool,

    /// Secret for signing and validating bearer tokens
    #[arg(long, env = "TUNNL_JWT_SECRET", default_value = DEV_SECRET)]
    jwt_secret: String,

    /// JSON roster file overriding the built-in node list
    #[arg(long, env = "TUNNL_NODES_FILE")]
    nodes_file: Option<PathBuf>,

    /// Allowed CORS origin (repeatable; defaults to localhost)
    #[arg(long = "cors-origin")]
    cors_origins: Vec<String>,

    /// Log level filter (overrides RUST_LOG)
    #[arg(long)]
    log_level: Option<String>,
}

/// Setup logging with the specified log level
fn setup_logging(verbose: bool, log_level: Option<&str>) {
    let default_level = if verbose { "debug" } else { "info" };

    let filter = match log_level {
        Some(level) => EnvFilter::try_new(level),
        None => EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(default_level)),
    }
    .unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true).with_thread_ids(false))
        .with(filter)
        .init();
}

async fn serve(args: ServeArgs) -> Result<()> {
    info!("tunnl control plane starting...");

    if args.jwt_secret == DEV_SECRET {
        warn!("Using the built-in development JWT secret (set --jwt-secret in production)");
    }

    let policy = match &args.nodes_file {
        Some(path) => Arc::new(
            PolicyStore::from_file(path).context("Failed to load node roster")?,
        ),
        None => {
            info!("Using built-in node roster");
            Arc::new(PolicyStore::builtin())
        }
    };

    let store: Arc<dyn SessionStore> = if args.in_memory {
        info!("Using in-memory session store");
        Arc::new(MemoryStore::new())
    } else {
        let db = tunnl_relay_db::connect(&args.database_url)
            .await
            .context("Failed to connect to database")?;
        tunnl_relay_db::migrate(&db)
            .await
            .context("Failed to run migrations")?;
        info!(database_url = %args.database_url, "Database ready");
        Arc::new(DbStore::new(db))
    };

    let registry = Arc::new(SessionRegistry::new(store, policy.clone()));

    let config = ApiServerConfig {
        bind_addr: args.bind,
        enable_cors: true,
        cors_origins: if args.cors_origins.is_empty() {
            None
        } else {
            Some(args.cors_origins)
        },
        jwt_secret: args.jwt_secret,
    };

    let server = ApiServer::new(config, registry, policy);

    // Setup Ctrl+C handler
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    let server_task = tokio::spawn(server.start());

    tokio::select! {
        _ = &mut ctrl_c => {
            info!("Received Ctrl+C, shutting down...");
        }
        result = server_task => {
            match result {
                Ok(Ok(())) => {
                    info!("Server stopped normally");
                }
                Ok(Err(e)) => {
                    error!("Server error: {:#}", e);
                    return Err(e);
                }
                Err(e) => {
                    error!("Server task panicked: {}", e);
                    return Err(e.into());
                }
            }
        }
    }

    info!("tunnl stopped");
    Ok(())
}

fn generate_token(
    secret: &str,
    token_type: TokenType,
    user_id: Option<String>,
    node_id: Option<String>,
    hours: i64,
) -> Result<()> {
    let validity = chrono::Duration::hours(hours);

    let claims = match token_type {
        TokenType::Session => {
            let user_id = user_id.context("--user-id is required for session tokens")?;
            JwtClaims::session(user_id, validity)
        }
        TokenType::Node => {
            let node_id = node_id.context("--node-id is required for node tokens")?;
            JwtClaims::node(node_id, validity)
        }
    };

    let token = JwtValidator::encode(secret.as_bytes(), &claims)
        .context("Failed to sign token")?;

    println!("{}", token);
    eprintln!("Expires: {}", claims.exp_formatted());

    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Serve(args)) => {
            setup_logging(cli.verbose, args.log_level.as_deref());
            serve(args).await
        }
        Some(Commands::GenerateToken {
            secret,
            token_type,
            user_id,
            node_id,
            hours,
        }) => {
            setup_logging(cli.verbose, None);
            generate_token(&secret, token_type, user_id, node_id, hours)
        }
        None => {
            setup_logging(cli.verbose, cli.serve.log_level.as_deref());
            serve(cli.serve).await
        }
    }
}
