use tracing::{error, info};

use cabinet::{Cabinet, Config};

#[tokio::main]
async fn main() {
    // Load configuration
    let config = match Config::load_with_env("config.toml") {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load config.toml: {e}");
            eprintln!("Using default configuration.");
            let mut config = Config::default();
            config.apply_env_overrides();
            config
        }
    };

    // Initialize logging
    if let Err(e) = cabinet::logging::init(&config.logging) {
        eprintln!("Failed to initialize logging: {e}");
        // Fall back to console-only logging
        cabinet::logging::init_console_only(&config.logging.level);
    }

    info!("Cabinet - file tree and object storage");

    let cabinet = match Cabinet::open(&config).await {
        Ok(cabinet) => cabinet,
        Err(e) => {
            error!("Failed to open cabinet: {}", e);
            std::process::exit(1);
        }
    };

    match cabinet.sweep().await {
        Ok(report) => info!(
            "Orphan sweep: scanned {}, removed {}, expired sessions {}",
            report.scanned, report.removed, report.expired_sessions
        ),
        Err(e) => {
            error!("Orphan sweep failed: {}", e);
            std::process::exit(1);
        }
    }
}
