use std::sync::Arc;

use catalog::api::start_admin_api;
use catalog::config::ServerConfig;
use catalog::server::CatalogServer;
use catalog::{DiskImageStore, InMemoryLaptopStore, LaptopService};
use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

fn main() {
    let config = ServerConfig::parse();

    let filter = EnvFilter::try_from_default_env()
    .or_else(|_| EnvFilter::try_new(&config.log_level))
    .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
    .with_env_filter(filter)
    .with_target(false)
    .with_level(true)
    .init();

    let worker_threads = config.worker_threads();
    info!("--- [Catalog Server] ---");
    info!("Worker Threads: {}", worker_threads);
    info!("Image Folder:   {}", config.image_dir.display());

    let runtime = match tokio::runtime::Builder::new_multi_thread()
    .worker_threads(worker_threads)
    .enable_all()
    .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            error!("failed to start runtime: {}", e);
            std::process::exit(1);
        }
    };

    if let Err(e) = runtime.block_on(async_main(config)) {
        error!("server failed: {}", e);
        std::process::exit(1);
    }
}

async fn async_main(config: ServerConfig) -> std::io::Result<()> {
    let laptop_store = Arc::new(InMemoryLaptopStore::new());
    let image_store = Arc::new(DiskImageStore::new(config.image_dir.clone()));
    let service = Arc::new(LaptopService::new(laptop_store, image_store));

    if let Some(port) = config.api_port {
        let api_service = service.clone();
        tokio::spawn(async move {
            start_admin_api(api_service, port).await;
        });
    }

    let server = CatalogServer::new(service);
    tokio::select! {
        res = server.run(&config.addr) => res?,
        res = tokio::signal::ctrl_c() => {
            res?;
            info!("Shutting down.");
        }
    }
    Ok(())
}
