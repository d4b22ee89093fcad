use coral_db::cli::Cli;
use coral_db::config::Config;
use coral_db::error::AppError;
use coral_db::telemetry::{init_telemetry, TelemetryConfig};
use coral_db::{Handler, PersistenceManager, ServerContext};
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{debug, error, info};

#[tokio::main]
async fn main() -> Result<(), AppError> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_max_level(cli.log_level())
        .init();

    let telemetry = init_telemetry(TelemetryConfig::default())?;
    let config = Config::from_sources(&cli)?;

    let server = Arc::new(ServerContext::new());
    server.set_keyspace_events(config.server.notify_keyspace_events);
    server.start();

    let persistence = if config.persistence.enabled {
        let manager = PersistenceManager::new(Arc::clone(&server), config.persistence.clone());
        let stats = manager.start()?;
        info!(
            snapshot_entries = stats.snapshot_entries,
            replayed = stats.replayed_commands,
            "state recovered"
        );
        Some(manager)
    } else {
        info!("persistence disabled, serving from memory only");
        None
    };

    let listener = TcpListener::bind(config.server.bind_addr()).await?;
    info!("coral-db listening on {}", config.server.bind_addr());

    let result = tokio::select! {
        result = accept_loop(listener, Arc::clone(&server)) => result,
        _ = tokio::signal::ctrl_c() => {
            info!("shutdown requested");
            Ok(())
        }
    };

    if let Some(manager) = persistence {
        manager.stop().await;
    }
    match telemetry.render() {
        Ok(metrics) => debug!("final metrics:\n{}", metrics),
        Err(e) => error!("failed to render metrics: {}", e),
    }
    telemetry.shutdown();

    result
}

async fn accept_loop(listener: TcpListener, server: Arc<ServerContext>) -> Result<(), AppError> {
    loop {
        let (mut socket, addr) = listener.accept().await?;
        let handler = Handler::new(Arc::clone(&server));

        tokio::spawn(async move {
            info!("New connection from {}", addr);
            if let Err(e) = handler.handle_stream(&mut socket, &addr.to_string()).await {
                error!("Error handling connection: {}", e);
            }
        });
    }
}
