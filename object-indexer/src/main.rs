use std::env;
use std::process::ExitCode;
use std::time::Duration;

use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use object_indexer::{Dependencies, IndexerError, LineNotificationSource, Settings};

/// How long the stdin reader gets to finish once the orchestrator stopped.
const SOURCE_GRACE_PERIOD: Duration = Duration::from_secs(1);

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let json = env::var("LOG_FORMAT").is_ok_and(|f| f.eq_ignore_ascii_case("json"));

    if json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

async fn run() -> Result<(), IndexerError> {
    let settings = Settings::from_env()?;
    let deps = Dependencies::new(&settings).await?;
    let orchestrator = deps.orchestrator;

    let (tx, rx) = orchestrator.channel();
    let mut source = tokio::spawn(LineNotificationSource::new(tokio::io::stdin()).run(tx));

    orchestrator.run(rx).await?;

    match tokio::time::timeout(SOURCE_GRACE_PERIOD, &mut source).await {
        Ok(Ok(result)) => result?,
        Ok(Err(e)) => error!(error = %e, "Notification source task failed"),
        Err(_) => {
            warn!("Notification source still reading, abandoning it");
            source.abort();
        }
    }

    let stats = orchestrator.stats();
    info!(
        received = stats.received,
        admitted = stats.admitted,
        duplicates = stats.duplicates,
        ignored = stats.ignored,
        rejected = stats.rejected,
        completed = stats.completed,
        short_circuited = stats.short_circuited,
        absorbed = stats.absorbed,
        superseded = stats.superseded,
        stale = stats.stale,
        failed = stats.failed,
        errors = stats.errors,
        indexed_documents = deps.search_index.len(),
        "Object indexer finished"
    );
    Ok(())
}

fn main() -> ExitCode {
    dotenv::dotenv().ok();
    init_tracing();

    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(e) => {
            error!(error = %e, "Failed to start tokio runtime");
            return ExitCode::FAILURE;
        }
    };

    info!("Starting object indexer");
    let result = runtime.block_on(run());
    // A blocked stdin read would otherwise hold the runtime open.
    runtime.shutdown_timeout(SOURCE_GRACE_PERIOD);

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "Object indexer failed");
            ExitCode::FAILURE
        }
    }
}
