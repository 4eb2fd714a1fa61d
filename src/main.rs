use anyhow::Context;
use clap::Parser;

use stresser::config::CliArgs;
use stresser::database as db;
use stresser::web_server::{AppState, build_server};

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    // Secrets may come from a .env file next to the binary
    if let Err(e) = dotenvy::dotenv() {
        if !e.not_found() {
            eprintln!("Unable to load .env: {e}");
        }
    }
    env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));

    let cli = CliArgs::parse();
    let config = cli.to_config().context("Failed to load configuration")?;

    let db_path = match &cli.database {
        Some(path) => path.clone(),
        None => db::get_db_path()?,
    };

    if cli.flush_data {
        db::remove_db(&db_path);
    }

    let db_pool = db::init_db(&db_path)
        .await
        .context("Failed to initialize database")?;

    let state = AppState::from_config(&config, db_pool.clone())?;

    // ======= PREPARATION END, EXECUTION START =======

    let server = build_server(&config.server, state).context("Failed to build server")?;
    let server_handle = server.handle();
    let server_task = actix_web::rt::spawn(server);

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            log::info!("Ctrl-c received, shutting down...");
        }
        res_server = server_task => {
            log::error!("Server terminated unexpectedly: {:?}", res_server);
        }
    }

    // In-flight stress sessions finish before the workers go away
    server_handle.stop(true).await;
    db_pool.close().await;

    log::info!("Shutdown complete");
    Ok(())
}
