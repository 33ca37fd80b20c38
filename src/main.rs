use rgen_media::{logger, Config, McpServer, ToolDispatcher};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let dotenv_loaded = dotenv::dotenv().is_ok();

    logger::init_with_config(logger::LoggerConfig::from_env())?;
    logger::log_startup_info(env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"));
    if dotenv_loaded {
        log::info!("✅ .env file loaded successfully");
    } else {
        log::debug!("No .env file found, using system environment variables");
    }

    let config = Config::from_env();
    logger::log_config_info(&config);

    if let Err(e) = config.validate() {
        log::error!("❌ {}", e);
        std::process::exit(1);
    }

    let dispatcher = match ToolDispatcher::from_config(&config) {
        Ok(dispatcher) => dispatcher,
        Err(e) => {
            log::error!("❌ Failed to initialize providers: {}", e);
            std::process::exit(1);
        }
    };
    log::info!(
        "✅ Providers ready: {}",
        dispatcher
            .available_providers()
            .iter()
            .map(|p| p.display_name())
            .collect::<Vec<_>>()
            .join(", ")
    );

    McpServer::new(dispatcher).serve().await?;
    Ok(())
}
