//! # Rusty-Stay Binary
//!
//! The entry point that assembles the application based on compile-time features.

mod settings;

use std::sync::Arc;

use actix_web::{web, App, HttpServer};
use anyhow::Context;
use log::info;

use stay_api::{configure_routes, middleware, AppState};
use stay_core::{
    AvailabilityLedger, BookingRepo, BookingWorkflow, LedgerStore, PropertyDirectory,
    PropertyListing, SystemClock, WorkflowDeps,
};
use stay_notify_log::LogNotifier;

use crate::settings::Settings;

#[cfg(not(any(feature = "db-sqlite", feature = "store-memory")))]
compile_error!("enable a storage backend: `db-sqlite` or `store-memory`");

struct Backend {
    ledger: Arc<dyn LedgerStore>,
    bookings: Arc<dyn BookingRepo>,
    properties: Arc<dyn PropertyDirectory>,
}

fn read_seed(path: Option<&str>) -> anyhow::Result<Vec<PropertyListing>> {
    let Some(path) = path else {
        return Ok(Vec::new());
    };
    let raw = std::fs::read_to_string(path).with_context(|| format!("reading {path}"))?;
    serde_json::from_str(&raw).with_context(|| format!("parsing listings in {path}"))
}

#[cfg(feature = "db-sqlite")]
async fn backend(settings: &Settings) -> anyhow::Result<Backend> {
    use stay_db_sqlite::SqliteStayRepo;

    let repo = Arc::new(SqliteStayRepo::connect(&settings.storage.url).await?);
    for listing in read_seed(settings.storage.seed_listings.as_deref())? {
        repo.upsert_listing(&listing).await?;
    }
    Ok(Backend {
        ledger: repo.clone(),
        bookings: repo.clone(),
        properties: repo,
    })
}

#[cfg(all(feature = "store-memory", not(feature = "db-sqlite")))]
async fn backend(settings: &Settings) -> anyhow::Result<Backend> {
    use stay_store_memory::MemoryStore;

    log::warn!("using the in-memory store; bookings are lost on restart");
    let store = Arc::new(MemoryStore::new());
    for listing in read_seed(settings.storage.seed_listings.as_deref())? {
        store.upsert_listing(listing);
    }
    Ok(Backend {
        ledger: store.clone(),
        bookings: store.clone(),
        properties: store,
    })
}

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let settings = Settings::load()?;
    env_logger::init_from_env(env_logger::Env::new().default_filter_or(&settings.log.level));

    // 1. Storage implementation chosen by feature
    let backend = backend(&settings).await?;

    // 2. Workflow over the ports (dynamic dispatch for swappable plugins)
    stay_notify_log::announce();
    let workflow = BookingWorkflow::new(
        WorkflowDeps {
            ledger: AvailabilityLedger::new(backend.ledger)
                .with_max_nights(settings.limits.max_nights),
            bookings: backend.bookings,
            properties: backend.properties,
            notifier: Arc::new(LogNotifier::default()),
            clock: Arc::new(SystemClock),
        },
        settings.fee_schedule()?,
    );
    let state = web::Data::new(AppState { workflow });

    let (host, port) = settings.bind_addr();
    info!("Rusty-Stay starting on http://{host}:{port}");

    let mut server = HttpServer::new(move || {
        App::new()
            .app_data(state.clone())
            .wrap(middleware::standard_middleware())
            .wrap(middleware::cors_policy())
            .configure(configure_routes)
    });
    if let Some(workers) = settings.server.workers {
        server = server.workers(workers);
    }

    server.bind((host, port))?.run().await?;
    Ok(())
}
