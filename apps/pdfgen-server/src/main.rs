//! pdfgen Server
//!
//! Renders HTML bundles or remote pages to PDF with headless Chromium.
//!
//! ## Architecture
//!
//! Two listeners share one process:
//!
//! - the public listener accepts `POST /process` uploads, stages each bundle
//!   into its own workdir and submits a render job to the scheduler
//! - the internal listener serves staged workdirs back to the browser by key
//!   and only ever binds a loopback address
//!
//! Workdirs are released as soon as their render finishes; anything a crash
//! leaves behind is reclaimed by the orphan sweep at startup and on a timer.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn, Level};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use url::Url;

use pdfgen_core::{
    default_concurrency, ChromiumBackend, ChromiumOptions, LayoutNormalizer, Margins, Scheduler,
    WorkdirHandle, WorkdirManager,
};

mod api;
mod error;
#[cfg(test)]
mod tests;

use error::ServerError;

/// Command-line arguments for the pdfgen server
#[derive(Parser, Debug)]
#[command(name = "pdfgen-server")]
#[command(about = "Render HTML bundles and web pages to PDF")]
struct Args {
    /// Public address accepting generation requests
    #[arg(long, env = "PDFGEN_LISTEN_ADDR", default_value = "0.0.0.0:5000")]
    listen_addr: SocketAddr,

    /// Loopback address serving staged workdirs to the browser
    #[arg(long, env = "PDFGEN_INTERNAL_ADDR", default_value = "127.0.0.1:5001")]
    internal_addr: SocketAddr,

    /// Render timeout in milliseconds, measured from submission
    #[arg(long, env = "PDFGEN_RENDER_TIMEOUT_MS", default_value = "30000")]
    render_timeout_ms: u64,

    /// Renders allowed at once (0 = unbounded, default = available parallelism)
    #[arg(long, env = "PDFGEN_MAX_CONCURRENT_RENDERS")]
    max_concurrent_renders: Option<usize>,

    /// Enable verbose logging
    #[arg(short = 'v', long, env = "PDFGEN_DEBUG")]
    debug: bool,

    /// Launch Chromium with --no-sandbox
    #[arg(long, env = "PDFGEN_NO_CHROME_SANDBOX")]
    no_chrome_sandbox: bool,

    /// Chromium executable (auto-detected when unset)
    #[arg(long, env = "PDFGEN_CHROME_PATH")]
    chrome_path: Option<PathBuf>,

    /// Root directory for staged workdirs
    #[arg(long, env = "PDFGEN_STAGING_DIR")]
    staging_dir: Option<PathBuf>,

    /// Age after which unreferenced workdirs are deleted
    #[arg(long, env = "PDFGEN_ORPHAN_TTL_SECS", default_value = "900")]
    orphan_ttl_secs: u64,

    /// Margin applied when a request does not specify one
    #[arg(long, env = "PDFGEN_DEFAULT_MARGIN_MM", default_value = "10")]
    default_margin_mm: f64,

    /// Maximum accepted request body size
    #[arg(long, env = "PDFGEN_MAX_BODY_BYTES", default_value = "67108864")]
    max_body_bytes: usize,
}

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub scheduler: Arc<Scheduler>,
    pub workdirs: WorkdirManager,
    pub normalizer: LayoutNormalizer,
    pub render_timeout: Duration,
    /// Root URL of the internal content listener
    pub content_base: Url,
}

impl AppState {
    /// URL under which the browser fetches the main file of `workdir`
    pub fn content_url(&self, workdir: &WorkdirHandle) -> Result<Url, ServerError> {
        let mut url = self.content_base.clone();
        url.path_segments_mut()
            .map_err(|_| ServerError::Internal(format!("bad content base '{}'", self.content_base)))?
            .pop_if_empty()
            .push(&workdir.key)
            .push(&workdir.main_file);
        Ok(url)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let args = Args::parse();

    // Initialize logging
    let log_level = if args.debug { Level::DEBUG } else { Level::INFO };

    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env().add_directive(log_level.into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    if !args.internal_addr.ip().is_loopback() {
        anyhow::bail!(
            "internal address {} must be a loopback address",
            args.internal_addr
        );
    }
    if !args.default_margin_mm.is_finite() || args.default_margin_mm < 0.0 {
        anyhow::bail!("default margin must be a non-negative number of millimeters");
    }

    let shutdown = CancellationToken::new();

    // Staging, with crash leftovers reclaimed before serving
    let workdirs =
        WorkdirManager::new(args.staging_dir.unwrap_or_else(WorkdirManager::default_root));
    let orphan_ttl = Duration::from_secs(args.orphan_ttl_secs);
    match workdirs.sweep_orphans(orphan_ttl).await {
        Ok(removed) => info!(removed, root = %workdirs.root().display(), "startup sweep done"),
        Err(e) => warn!(error = %e, "startup sweep failed"),
    }
    let reaper = workdirs.spawn_reaper(
        (orphan_ttl / 3).max(Duration::from_secs(1)),
        orphan_ttl,
        shutdown.clone(),
    );

    // Rendering
    let backend = ChromiumBackend::new(ChromiumOptions {
        no_sandbox: args.no_chrome_sandbox,
        executable: args.chrome_path,
        debug: args.debug,
    });
    let concurrency = args.max_concurrent_renders.unwrap_or_else(default_concurrency);
    let scheduler = Arc::new(Scheduler::new(Arc::new(backend), concurrency));

    // Listeners
    let internal = tokio::net::TcpListener::bind(args.internal_addr)
        .await
        .with_context(|| format!("failed to bind internal address {}", args.internal_addr))?;
    let content_addr = internal.local_addr()?;
    let content_base = Url::parse(&format!("http://{}/", content_addr))?;

    let public = tokio::net::TcpListener::bind(args.listen_addr)
        .await
        .with_context(|| format!("failed to bind listen address {}", args.listen_addr))?;

    let state = AppState {
        scheduler: Arc::clone(&scheduler),
        workdirs: workdirs.clone(),
        normalizer: LayoutNormalizer::new(Margins::uniform(args.default_margin_mm)),
        render_timeout: Duration::from_millis(args.render_timeout_ms),
        content_base,
    };

    info!("Server listening on http://{}", public.local_addr()?);
    info!("Serving workdirs on http://{}", content_addr);
    info!("Render timeout: {}ms", args.render_timeout_ms);
    info!("Max concurrent renders: {}", concurrency);

    tokio::spawn(shutdown_on_signal(shutdown.clone()));

    // Either listener stopping takes the other one down with it
    let content_server = async {
        let result = axum::serve(internal, api::content_router(workdirs))
            .with_graceful_shutdown(shutdown.clone().cancelled_owned())
            .await;
        shutdown.cancel();
        result
    };
    let public_server = async {
        let result = axum::serve(public, api::public_router(state, args.max_body_bytes))
            .with_graceful_shutdown(shutdown.clone().cancelled_owned())
            .await;
        shutdown.cancel();
        result
    };

    let (public_result, content_result) = tokio::join!(public_server, content_server);

    scheduler.close();
    if let Err(e) = reaper.await {
        warn!(error = %e, "workdir reaper did not stop cleanly");
    }

    public_result.context("public listener failed")?;
    content_result.context("internal listener failed")?;

    info!("Server stopped");
    Ok(())
}

async fn shutdown_on_signal(shutdown: CancellationToken) {
    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            if let Err(e) = result {
                warn!(error = %e, "failed to listen for shutdown signal");
                return;
            }
            info!("Shutdown signal received");
            shutdown.cancel();
        }
        _ = shutdown.cancelled() => {}
    }
}
