use anyhow::Result;
use clap::Parser;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

mod cli;
mod config;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("grapevine=info,tower_http=debug")),
        )
        .init();

    let args = cli::Args::parse();
    let config = config::Config::load(&args.config)?;

    ensure_data_dirs(&config);

    let db =
        grapevine_db::create_pool(&config.database.url, config.database.max_connections).await?;
    grapevine_db::run_migrations(&db).await?;

    let broker = grapevine_core::broker::GroupBroker::default();
    let dispatcher = grapevine_core::dispatch::EventDispatcher::new(db.clone(), broker.clone());
    let shutdown_notify = Arc::new(tokio::sync::Notify::new());

    let state = grapevine_core::AppState {
        db,
        broker,
        dispatcher,
        config: grapevine_core::AppConfig {
            jwt_secret: config.auth.jwt_secret.clone(),
            jwt_expiry_seconds: config.auth.jwt_expiry_seconds,
        },
        shutdown: shutdown_notify.clone(),
    };

    let app = grapevine_api::build_router()
        .merge(grapevine_ws::feed_router())
        .with_state(state);

    let listener = tokio::net::TcpListener::bind(&config.server.bind_address).await?;

    print_startup_banner(&config.server.bind_address, &config.database.url);

    let shutdown_signal = async move {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                println!();
                tracing::info!("Shutting down (ctrl-c)...");
            }
            _ = shutdown_notify.notified() => {
                tracing::info!("Shutting down (requested)...");
            }
        }
    };

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal)
        .await?;

    Ok(())
}

/// Ensure the database directory exists before the pool opens the file.
fn ensure_data_dirs(config: &config::Config) {
    if let Some(db_path) = config
        .database
        .url
        .strip_prefix("sqlite://")
        .and_then(|s| s.split('?').next())
    {
        if let Some(parent) = std::path::Path::new(db_path).parent() {
            if !parent.as_os_str().is_empty() {
                if let Err(e) = std::fs::create_dir_all(parent) {
                    tracing::warn!("Could not create directory '{}': {}", parent.display(), e);
                }
            }
        }
    }
}

fn print_startup_banner(bind_address: &str, db_url: &str) {
    println!();
    println!("   ____                                   _ ");
    println!("  / ___| _ __   __ _  _ __    ___ __   __(_) _ __    ___ ");
    println!(" | |  _ | '__| / _` || '_ \\  / _ \\\\ \\ / /| || '_ \\  / _ \\");
    println!(" | |_| || |   | (_| || |_) ||  __/ \\ V / | || | | ||  __/");
    println!("  \\____||_|    \\__,_|| .__/  \\___|  \\_/  |_||_| |_| \\___|");
    println!("                     |_|");
    println!();
    println!("  Listening:   http://{}", bind_address);
    println!("  Database:    {}", db_url);
    println!("  API base:    /api/v1");
    println!("  Feeds:       /ws/notifications/<user_id>  /ws/conversations/<conversation_id>");
    println!();
}
