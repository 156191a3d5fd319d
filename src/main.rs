use imagegate::cache::{DiskStore, DurableStore, MemoryEdgeCache, MemoryStore, SledStore};
use imagegate::config::{GatewayConfig, StoreKind};
use imagegate::fetch::HttpTransformer;
use imagegate::pipeline::Gateway;
use imagegate::router;
use std::net::SocketAddr;
use std::sync::Arc;

/// imagegate server entry point.
///
/// Initializes tracing, loads configuration from the environment, wires
/// the cache tiers and the transformation client, and serves until Ctrl-C.
/// Pending cache writes are awaited before exit.
///
/// # Configuration
/// See `GatewayConfig::from_env` for the `GATEWAY_*` variables; `PORT`
/// sets the listen port (default: 8080) and `RUST_LOG` the log filter
/// (default: "imagegate=debug,tower_http=debug").
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "imagegate=debug,tower_http=debug".into()),
        )
        .init();

    tracing::info!("Starting imagegate");

    let cfg = GatewayConfig::from_env()?;
    tracing::info!(
        "Allowed hosts: {:?}, transformation service: {}, store: {:?}",
        cfg.allowed_hosts,
        cfg.transform_url,
        cfg.store
    );

    let store: Arc<dyn DurableStore> = match cfg.store {
        StoreKind::Sled => Arc::new(SledStore::open(&cfg.store_dir, cfg.max_store_size)?),
        StoreKind::Disk => Arc::new(DiskStore::new(cfg.store_dir.clone())),
        StoreKind::Memory => Arc::new(MemoryStore::new()),
    };
    let edge = Arc::new(MemoryEdgeCache::new(cfg.edge_capacity));
    let transformer = Arc::new(HttpTransformer::new(
        &cfg.transform_url,
        cfg.transform_timeout,
        cfg.max_upstream_bytes,
    )?);

    let gateway = Arc::new(Gateway::new(&cfg, edge, store, transformer));
    let app = router(gateway.clone(), &cfg);

    let port = std::env::var("PORT")
        .unwrap_or_else(|_| "8080".to_string())
        .parse::<u16>()
        .unwrap_or(8080);

    // Bind to 0.0.0.0 for external access (required for containerized deployment)
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    tracing::info!("Server listening on {}", addr);

    // peer addresses feed the per-IP rate limiter
    axum::serve(
        tokio::net::TcpListener::bind(addr).await?,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async {
        let _ = tokio::signal::ctrl_c().await;
        tracing::info!("Shutdown requested");
    })
    .await?;

    gateway.shutdown().await;
    Ok(())
}
