use anyhow::Result;
use clap::Parser;
use pumphouse_server::{alarms, api, config, db, ws};
use std::net::SocketAddr;
use tracing::info;

/// Pumphouse — remote watering controller backend.
#[derive(Parser, Debug)]
#[command(name = "pumphouse-server", version, about)]
struct Cli {
    /// Address to bind.
    #[arg(short, long, default_value = "0.0.0.0")]
    bind: String,

    /// Port to listen on.
    #[arg(short, long, env = "PORT", default_value_t = 3000)]
    port: u16,

    /// Path to the SQLite database file.
    #[arg(short, long, env = "DATABASE_URL", default_value = "pumphouse.db")]
    db: String,

    /// Path to a TOML configuration file (optional).
    #[arg(short, long)]
    config: Option<String>,
}

const BANNER: &str = r#"
  ____                        _
 |  _ \ _   _ _ __ ___  _ __ | |__   ___  _   _ ___  ___
 | |_) | | | | '_ ` _ \| '_ \| '_ \ / _ \| | | / __|/ _ \
 |  __/| |_| | | | | | | |_) | | | | (_) | |_| \__ \  __/
 |_|    \__,_|_| |_| |_| .__/|_| |_|\___/ \__,_|___/\___|
                       |_|
"#;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing (logs).
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "pumphouse_server=debug,tower_http=debug".into()),
        )
        .init();

    let cli = Cli::parse();

    println!("{BANNER}");
    info!(
        version = env!("CARGO_PKG_VERSION"),
        "Starting Pumphouse server"
    );

    // Load optional config file.
    let app_config = if let Some(ref path) = cli.config {
        config::AppConfig::from_file(path)?
    } else {
        config::AppConfig::default()
    };

    // Initialize database and run migrations.
    let pool = db::init(&cli.db).await?;
    info!(path = %cli.db, "Database initialized");

    // Build shared application state (session hub, command router, store).
    let state = api::AppState::new(pool, app_config);

    // Start the stale-session sweeper.
    ws::hub::start_sweeper_task(state.clone());

    // Start the recurring alarm engine (single process-wide tick).
    alarms::start_alarm_engine(state.clone());

    // Build the application router.
    let app = api::router(state);

    // Start listening.
    let listen = format!("{}:{}", cli.bind, cli.port);
    let listener = tokio::net::TcpListener::bind(&listen).await?;
    info!(addr = %listen, "Listening");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}
