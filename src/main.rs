mod auth;
mod collectors;
mod config;
mod credentials;
mod http;
mod metrics;
mod prompt;
mod report;

use axum::serve;
use clap::{Parser, Subcommand};
use collectors::system::Sampler;
use config::Config;
use credentials::CredentialStore;
use http::HttpAppState;
use metrics::Metrics;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "proxreport")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Serve the authenticated snapshot API.
    Serve {
        #[arg(long, default_value = "/etc/proxreport/config.yaml")]
        config: String,
    },
    /// Print a users file line for the given credentials.
    HashPassword {
        #[arg(long)]
        username: String,
        /// Prompted for without echo when omitted; piped stdin is read as-is.
        #[arg(long)]
        password: Option<String>,
        /// Random 16 bytes when omitted.
        #[arg(long)]
        salt_hex: Option<String>,
    },
    /// Print an example configuration file.
    PrintDefaultConfig,
}

#[tokio::main]
async fn main() {
    init_tracing();

    let cli = Cli::parse();
    match cli.command {
        Command::PrintDefaultConfig => println!("{}", Config::example_yaml()),
        Command::HashPassword {
            username,
            password,
            salt_hex,
        } => hash_password(&username, password, salt_hex),
        Command::Serve { config } => run(&config).await,
    }
}

fn hash_password(username: &str, password: Option<String>, salt_hex: Option<String>) {
    if username.is_empty() || username.contains(':') {
        error!("username must be non-empty and must not contain ':'");
        std::process::exit(2);
    }

    let salt = match salt_hex {
        Some(hex_str) => match hex::decode(hex_str.trim()) {
            Ok(salt) if !salt.is_empty() => salt,
            Ok(_) => {
                error!("salt must not be empty");
                std::process::exit(2);
            }
            Err(err) => {
                error!(error = %err, "salt is not valid hex");
                std::process::exit(2);
            }
        },
        None => credentials::random_salt().to_vec(),
    };

    let password = match password {
        Some(p) => p,
        None => match prompt::read_password("Password: ") {
            Ok(p) => p,
            Err(err) => {
                error!(error = %err, "failed to read password");
                std::process::exit(1);
            }
        },
    };

    println!("{}", credentials::credential_line(username, &salt, &password));
}

async fn run(config_path: &str) {
    let cfg = match Config::load_from_file(config_path) {
        Ok(cfg) => cfg,
        Err(err) => {
            error!(error = %err, "failed to load configuration");
            std::process::exit(1);
        }
    };

    info!(
        listen = %cfg.listen,
        users_file = %cfg.users_file,
        mountpoints = ?cfg.mountpoints,
        "starting proxreport"
    );

    let metrics = match Metrics::new() {
        Ok(m) => m,
        Err(err) => {
            error!(error = %err, "failed to initialise metrics");
            std::process::exit(1);
        }
    };

    let credentials = Arc::new(CredentialStore::new(&cfg.users_file));
    if let Err(err) = credentials.get() {
        warn!(
            path = %credentials.path().display(),
            error = %err,
            "credential file not readable yet, requests will get 503 until it is"
        );
    }

    let sampler = Arc::new(Sampler::new());
    // Prime the CPU baseline so the first request already has an interval.
    let _ = sampler.sample_cpu();

    let state = HttpAppState {
        metrics,
        sampler,
        credentials,
        realm: Arc::from(cfg.realm.as_str()),
        mountpoints: Arc::from(cfg.mountpoints.clone()),
        thresholds: Arc::new(cfg.thresholds.clone()),
        capacity: Arc::new(cfg.capacity.clone()),
    };

    let addr: SocketAddr = match cfg.listen.parse() {
        Ok(addr) => addr,
        Err(err) => {
            error!(error = %err, listen = %cfg.listen, "invalid listen address");
            std::process::exit(1);
        }
    };
    let listener = match TcpListener::bind(addr).await {
        Ok(l) => l,
        Err(err) => {
            error!(error = %err, "failed to bind HTTP listener");
            std::process::exit(1);
        }
    };

    let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
    let http_task = tokio::spawn(async move {
        let app = http::build_router(state);
        let server = serve(listener, app).with_graceful_shutdown(async move {
            let _ = shutdown_rx.changed().await;
        });
        if let Err(err) = server.await {
            error!(error = %err, "HTTP server error");
        }
    });

    if let Err(err) = tokio::signal::ctrl_c().await {
        error!(error = %err, "failed to wait for Ctrl+C");
    }
    info!("received Ctrl+C, shutting down");
    let _ = shutdown_tx.send(true);
    let _ = http_task.await;
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}
