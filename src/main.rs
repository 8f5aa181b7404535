//! Postedor - reconciliation service for ledger-mirrored pole assets

use clap::Parser;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use postedor::{
    cache::{FileStore, LayeredCache},
    config::Args,
    dataset::LocalDataset,
    hash::{hash_image_uri, hash_ubicacion},
    ledger::{ContractReader, LedgerClient, MemoryLedger, RawPoste, RpcLedger},
    resolver::Resolver,
    server::{self, AppState},
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file if present
    let _ = dotenvy::dotenv();

    // Parse command line arguments
    let args = Args::parse();

    // Initialize tracing/logging
    let log_level = args.log_level.clone();
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("postedor={},info", log_level).into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Validate configuration
    if let Err(e) = args.validate() {
        error!("Configuration error: {}", e);
        std::process::exit(1);
    }

    // Print startup banner
    info!("======================================");
    info!("  Postedor - Pole Asset Reconciliation");
    info!("======================================");
    info!("Listen: {}", args.listen);
    info!("Mode: {}", if args.dev_mode { "DEVELOPMENT" } else { "PRODUCTION" });
    match &args.ledger_rpc_url {
        Some(url) => info!("Ledger RPC: {}", url),
        None => info!("Ledger RPC: in-process (dev)"),
    }
    info!("Data dir: {}", args.data_dir.display());
    info!("Cache dir: {}", args.cache_dir.display());
    info!("Cache TTL: {}s (SWR: {})", args.cache_ttl_secs, args.stale_while_revalidate);
    info!("======================================");

    let ledger: Arc<dyn LedgerClient> = match &args.ledger_rpc_url {
        Some(url) => Arc::new(RpcLedger::new(url)),
        None => Arc::new(seeded_dev_ledger()),
    };

    let dataset = LocalDataset::new(&args.data_dir);
    let durable = Arc::new(FileStore::new(&args.cache_dir));
    let cache = Arc::new(LayeredCache::new(durable));

    let resolver = Resolver::new(
        ContractReader::new(ledger),
        dataset,
        cache,
        args.cache_ttl(),
        args.stale_while_revalidate,
    );

    let state = Arc::new(AppState::new(resolver));
    let router = server::create_router(state);

    let listener = tokio::net::TcpListener::bind(args.listen).await?;
    info!("API listening on {}", args.listen);
    axum::serve(listener, router).await?;

    Ok(())
}

/// In-process ledger seeded so the dev server answers real lookups.
fn seeded_dev_ledger() -> MemoryLedger {
    let ledger = MemoryLedger::new();
    ledger.record_update(
        1,
        RawPoste {
            ubicacion_hash: hash_ubicacion("Medellín - Comuna 13, CLL 50 #80-12"),
            capacidad_kw: 60,
            consumo_entregado: 12500,
            consumo_restante: 3500,
            seguridad: 3,
            last_attestation_uid: String::new(),
            image_uri_hash: hash_image_uri("/postes/poste-134.jpg"),
        },
        10,
        "0xdev-tx-1",
        0,
        "0xdev-operator",
    );
    ledger.register_tag("POSTE-MDE-000134", 1);
    ledger
}
