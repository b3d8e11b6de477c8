//! Larch node binary - GHS engine entry point.
//!
//! Runs the distributed minimum-spanning-tree protocol over TCP in one of
//! two modes:
//!
//! - Single vertex: `larch-node --neighbours node-1.toml`. One engine,
//!   one listener; the process prints the vertex's contribution (the
//!   weight of its parent edge) when the protocol terminates. Start one
//!   process per vertex, each with its own neighbour table.
//! - Whole cluster: `larch-node --cluster-dir ./nodes`. Loads every
//!   `*.toml` in the directory and runs one engine per vertex inside
//!   this process, each with its own listener address. Prints the full
//!   tree with the core root marked.
//!
//! Every vertex listens on the same well-known port; the
//! `(address, port)` pair is unique per vertex. Configuration errors,
//! transport errors and protocol anomalies are fatal: they indicate a
//! broken deployment, not a runtime condition the protocol can ride out.

use std::path::Path;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use anyhow::Result;
use anyhow::bail;
use clap::Parser;
use larch::Engine;
use larch::NodeConfig;
use larch::harness;
use larch::transport::DEFAULT_PORT;
use larch::transport::TcpSubstrate;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "larch-node")]
struct Args {
    /// Path to this vertex's neighbour table (TOML).
    #[arg(long, conflicts_with = "cluster_dir")]
    neighbours: Option<PathBuf>,

    /// Directory of neighbour tables; run every vertex in this process.
    #[arg(long)]
    cluster_dir: Option<PathBuf>,

    /// TCP port shared by every vertex.
    #[arg(long, default_value_t = DEFAULT_PORT)]
    port: u16,

    /// Milliseconds to wait after binding before waking the engine, so
    /// peer processes can bind their listeners too. Single-vertex mode
    /// only; a cluster run binds every listener up front instead.
    #[arg(long, default_value_t = 1000)]
    startup_delay_ms: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let args = Args::parse();

    if let Some(dir) = &args.cluster_dir {
        run_cluster_in_process(dir, args.port).await
    } else if let Some(path) = &args.neighbours {
        run_single(path, args.port, args.startup_delay_ms).await
    } else {
        bail!("either --neighbours or --cluster-dir is required");
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();
}

async fn run_single(path: &Path, port: u16, startup_delay_ms: u64) -> Result<()> {
    let config = NodeConfig::load(path)
        .with_context(|| format!("loading neighbour table {}", path.display()))?;
    let table = config.table();
    let substrate = TcpSubstrate::bind(&table, port)
        .await
        .context("binding vertex listener")?;

    if startup_delay_ms > 0 {
        tokio::time::sleep(Duration::from_millis(startup_delay_ms)).await;
    }

    let mut engine = Engine::new(table, substrate);
    let contribution = engine.run().await.context("protocol run failed")?;
    info!(
        vertex = contribution.vertex,
        weight = contribution.weight,
        "engine terminated"
    );
    println!(
        "vertex {}: parent edge weight {}",
        contribution.vertex, contribution.weight
    );
    Ok(())
}

async fn run_cluster_in_process(dir: &Path, port: u16) -> Result<()> {
    let mut paths: Vec<PathBuf> = std::fs::read_dir(dir)
        .with_context(|| format!("reading cluster directory {}", dir.display()))?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| path.extension().is_some_and(|ext| ext == "toml"))
        .collect();
    paths.sort();
    if paths.is_empty() {
        bail!("no neighbour tables (*.toml) in {}", dir.display());
    }

    // Bind every listener before any engine wakes so no Connect can
    // race a missing peer.
    let mut engines = Vec::with_capacity(paths.len());
    for path in &paths {
        let config = NodeConfig::load(path)
            .with_context(|| format!("loading neighbour table {}", path.display()))?;
        let table = config.table();
        let substrate = TcpSubstrate::bind(&table, port)
            .await
            .with_context(|| format!("binding listener for vertex {}", table.id()))?;
        engines.push(Engine::new(table, substrate));
    }
    info!(vertices = engines.len(), "cluster listeners bound");

    let summary = harness::run_cluster(engines).await?;
    print!("{}", summary.render());
    Ok(())
}
