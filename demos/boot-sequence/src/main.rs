use cadence::prelude::*;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// Logs every phase change and container event.
struct PhaseLogger;

impl LifecycleListener for PhaseLogger {
    fn on_state_changed(&self, instance: &ManagedInstance, phase: LifecyclePhase) {
        tracing::info!(%instance, %phase, "phase change");
    }

    fn on_started(&self) {
        tracing::info!("✅ container started");
    }

    fn on_start_failed(&self, cause: &LifecycleError) {
        tracing::error!(error = %cause, "container failed to start");
    }

    fn on_stopped(&self, cause: Option<&LifecycleError>) {
        tracing::info!(failed = cause.is_some(), "container stopped");
    }
}

pub struct Database {
    url: String,
    connections: AtomicUsize,
}

#[cadence::lifecycle]
impl Database {
    #[configuration]
    fn configure(&self) {
        tracing::info!(url = %self.url, "database configured");
    }

    #[post_construct]
    async fn connect(&self) -> anyhow::Result<()> {
        tokio::time::sleep(Duration::from_millis(50)).await;
        self.connections.store(4, Ordering::SeqCst);
        tracing::info!(pool = 4, "database connected");
        Ok(())
    }

    #[pre_destroy]
    async fn disconnect(&self) {
        self.connections.store(0, Ordering::SeqCst);
        tracing::info!("database disconnected");
    }
}

#[derive(Injectable)]
pub struct CatalogCache {
    database: Arc<Database>,
}

#[cadence::lifecycle]
impl CatalogCache {
    #[warm_up(parallel)]
    async fn load_products(&self) -> anyhow::Result<()> {
        tokio::time::sleep(Duration::from_millis(200)).await;
        tracing::info!(
            connections = self.database.connections.load(Ordering::SeqCst),
            "products cached"
        );
        Ok(())
    }

    #[warm_up(parallel)]
    async fn load_prices(&self) -> anyhow::Result<()> {
        tokio::time::sleep(Duration::from_millis(150)).await;
        tracing::info!("prices cached");
        Ok(())
    }

    #[pre_destroy]
    fn evict(&self) {
        tracing::info!("catalog cache evicted");
    }
}

#[derive(Injectable)]
pub struct ReportService {
    database: Arc<Database>,
}

#[cadence::lifecycle]
impl ReportService {
    #[warm_up]
    async fn compile_templates(&self) -> anyhow::Result<()> {
        anyhow::ensure!(
            self.database.connections.load(Ordering::SeqCst) > 0,
            "database is not connected"
        );
        tracing::info!("report templates compiled");
        Ok(())
    }

    #[pre_destroy]
    async fn flush(&self) {
        tracing::info!("pending reports flushed");
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    tracing::info!("🚀 Starting boot sequence demo...");

    let config = LifecycleConfig::from_env().warm_up_timeout(Duration::from_secs(5));
    let app = Application::builder()
        .config(config)
        .listener(Arc::new(PhaseLogger))
        .build();

    app.provide(Database {
        url: std::env::var("DATABASE_URL").unwrap_or_else(|_| "postgres://localhost/demo".into()),
        connections: AtomicUsize::new(0),
    })
    .await?;
    app.construct::<CatalogCache>().await?;
    app.construct::<ReportService>().await?;

    let completed = app.start().await?;
    tracing::info!(completed, "warm-up finished");

    let snapshot = app.lifecycle_manager().snapshot();
    println!("{}", serde_json::to_string_pretty(&snapshot)?);

    tracing::info!("Press Ctrl+C to stop");
    app.spawn_shutdown_handler();
    app.await_termination().await;

    Ok(())
}
