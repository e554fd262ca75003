//! facegated - Face attendance server.
//!
//! Exposes enrollment, verification, and kiosk streaming over HTTP and
//! WebSocket. Descriptor extraction is delegated to an inference
//! sidecar reached through `--embedder-url`.

mod server;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use facegate_enroll::{EnrollmentCoordinator, HttpEmbedder};
use facegate_gallery::{GalleryStore, Matcher};
use facegate_kv::{KvStore, MemoryStore, RedbStore};
use facegate_stream::registry::DEFAULT_FRAME_INTERVAL;
use facegate_stream::{ConnectionRegistry, FrameCache, FramePipeline, PipelineConfig};

/// Face attendance server.
#[derive(Parser, Debug)]
#[command(name = "facegated")]
#[command(about = "Face attendance server: enrollment, verification, streaming")]
struct Args {
    /// Listen address
    #[arg(long, default_value = "0.0.0.0:8000")]
    addr: String,

    /// Gallery database file; in-memory (non-durable) when omitted
    #[arg(long)]
    db: Option<PathBuf>,

    /// Base URL of the descriptor-extraction sidecar
    #[arg(long, default_value = "http://127.0.0.1:8001")]
    embedder_url: String,

    /// Descriptor dimensionality agreed with the sidecar
    #[arg(long, default_value_t = 512)]
    dim: usize,

    /// Minimum spacing between processed stream frames per device (ms)
    #[arg(long, default_value_t = DEFAULT_FRAME_INTERVAL.as_millis() as u64)]
    frame_interval_ms: u64,

    /// Lifetime of cached frame resolutions (seconds)
    #[arg(long, default_value_t = 86_400)]
    cache_ttl_secs: u64,

    /// Minimum cosine similarity for a stream match
    #[arg(long, default_value_t = 0.7)]
    match_threshold: f32,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    let kv: Box<dyn KvStore> = match &args.db {
        Some(path) => {
            info!(path = %path.display(), "opening gallery database");
            Box::new(RedbStore::open(path)?)
        }
        None => {
            info!("no --db given, using in-memory gallery");
            Box::new(MemoryStore::new())
        }
    };

    let store = Arc::new(GalleryStore::new(kv));
    let matcher = Arc::new(Matcher::new(store.clone()));
    let embedder = Arc::new(HttpEmbedder::new(&args.embedder_url, args.dim));
    let coordinator = Arc::new(EnrollmentCoordinator::new(
        store.clone(),
        matcher.clone(),
        embedder.clone(),
    ));

    let registry = Arc::new(ConnectionRegistry::new(Duration::from_millis(
        args.frame_interval_ms,
    )));
    let pipeline = Arc::new(FramePipeline::new(
        matcher.clone(),
        embedder.clone(),
        Arc::new(FrameCache::new()),
        registry,
        PipelineConfig {
            match_threshold: args.match_threshold,
            cache_ttl: Duration::from_secs(args.cache_ttl_secs),
        },
    ));

    let state = server::AppState {
        matcher,
        coordinator,
        embedder,
        pipeline,
        match_threshold: args.match_threshold,
    };

    server::serve(&args.addr, state).await
}
