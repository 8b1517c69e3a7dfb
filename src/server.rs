//! HTTP/WebSocket server setup and lifecycle.
//!
//! Configures the axum server with:
//! - WebSocket endpoint for change notifications
//! - JSON write and lookup API for the watched tables
//! - Health and readiness endpoints
//! - Graceful shutdown that stops the poller, closes sockets and flushes
//!   the writer

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::watch;

use crate::config::Config;
use crate::notify::{ChangeNotifier, Compaction, PollSettings};
use crate::records::{RecordQueries, RecordStore};
use crate::service::create_router;
use crate::storage::{CommitLimits, ReaderPool, Writer};

/// Server state shared across handlers.
pub struct ServerState {
    pub records: RecordStore,
    pub queries: RecordQueries,
    pub notifier: ChangeNotifier,
    pub send_timeout: Duration,
}

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Run the Gradecast server on the configured address.
///
/// Returns when the server has shut down.
pub async fn run_server(config: Config, shutdown_rx: watch::Receiver<bool>) -> Result<(), BoxError> {
    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;
    let listener = TcpListener::bind(addr).await?;
    serve(listener, config, shutdown_rx).await
}

/// Serve on an already bound listener.
///
/// Tests bind port 0 and read the address back from the listener.
pub async fn serve(
    listener: TcpListener,
    config: Config,
    mut shutdown_rx: watch::Receiver<bool>,
) -> Result<(), BoxError> {
    let addr = listener.local_addr()?;
    let db_path = config.db_path();

    // Writer first: it creates the schema the readers depend on
    let writer = Writer::spawn(
        &db_path,
        config.write_channel_size,
        CommitLimits::from_config(config.batch_size, config.batch_delay_ms),
    )?;
    let writer_handle = writer.handle();

    let reader_pool = ReaderPool::new(&db_path, config.reader_pool_size)?;

    let notifier = ChangeNotifier::new(config.client_buffer);
    let settings = PollSettings {
        interval: config.poll_interval(),
        seed: config.cursor_seed(),
        max_batch: config.max_batch,
        compaction: config.retention().map(|retention| Compaction {
            writer: writer_handle.clone(),
            retention,
        }),
    };
    notifier.start(Arc::new(reader_pool.clone()), settings).await?;

    let state = Arc::new(ServerState {
        records: RecordStore::new(writer_handle),
        queries: RecordQueries::new(reader_pool),
        notifier,
        send_timeout: config.send_timeout(),
    });
    let app = create_router(Arc::clone(&state));

    tracing::info!(address = %addr, "Starting Gradecast server");

    let shutdown_state = Arc::clone(&state);
    let served = axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = shutdown_rx.changed().await;
            tracing::info!("Shutdown signal received, stopping server");
            // Upgraded sockets are not tracked by the HTTP server; end them here
            shutdown_state.notifier.shutdown().await;
        })
        .await;
    if let Err(e) = &served {
        tracing::error!(error = %e, "Server failed, stopping background tasks");
    }

    let stopped = stop_background(&state, writer).await;
    served?;
    stopped?;

    tracing::info!("Server stopped");
    Ok(())
}

/// Stop the poller, close subscribers and flush the writer.
///
/// Runs after the HTTP server returns, whether it stopped cleanly or not.
async fn stop_background(state: &ServerState, writer: Writer) -> Result<(), BoxError> {
    state.notifier.shutdown().await;

    tracing::info!("Shutting down writer thread");
    writer.handle().shutdown().await?;
    tokio::task::spawn_blocking(move || writer.join()).await??;
    Ok(())
}
