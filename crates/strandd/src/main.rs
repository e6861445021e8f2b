//! `strandd`: the Strand storage node daemon.
//!
//! # Usage
//!
//! ```text
//! strandd start                                  # start a one-node cluster
//! strandd start -c strand.toml                   # start with a config file
//! strandd start -l 127.0.0.1:4831 -r 2           # override address and replication
//! strandd describe --peers a,b,c                 # dump a ketama ring
//! strandd describe --peers a,b,c --add d         # and what adding d would move
//! ```

mod config;
mod telemetry;

use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Write as _;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use strand_distributor::{Distributor, NodeServices, ReplicationRebalancer};
use strand_meta::MemoryMetadataService;
use strand_ring::{Ketama, Ring, SingleRing, diff};
use strand_store::{MemoryBlockStore, MemoryINodeStore};
use strand_types::{BlockRef, INodeRef, PeerList};
use tracing::info;

use config::NodeConfig;

/// Keys sampled by `describe --add` to estimate migration.
const SAMPLE_KEYS: u64 = 10_000;

// -----------------------------------------------------------------------
// CLI definition
// -----------------------------------------------------------------------

#[derive(Parser)]
#[command(name = "strandd", version, about = "Strand storage node daemon")]
struct Cli {
    /// Path to TOML config file.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start a storage node.
    Start {
        /// Override the storage service address (e.g. "127.0.0.1:4831").
        #[arg(short, long)]
        listen_addr: Option<String>,

        /// Override the block replication factor.
        #[arg(short, long)]
        replication: Option<usize>,
    },

    /// Print the layout of a ketama ring.
    Describe {
        /// Ring members, comma separated.
        #[arg(long, value_delimiter = ',', required = true)]
        peers: Vec<String>,

        /// Replication factor of the ring.
        #[arg(short, long, default_value = "2")]
        replication: usize,

        /// Peers to add, showing how much data would move.
        #[arg(long, value_delimiter = ',')]
        add: Vec<String>,
    },
}

// -----------------------------------------------------------------------
// Entrypoint
// -----------------------------------------------------------------------

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut config = NodeConfig::load(cli.config.as_deref()).context("failed to load config")?;

    match cli.command {
        Commands::Start {
            listen_addr,
            replication,
        } => {
            telemetry::init(&config.log.level);
            // CLI args override config file values.
            if let Some(addr) = listen_addr {
                config.distributor.listen_addr = addr;
            }
            if let Some(r) = replication {
                config.cluster.replication = r;
            }
            cmd_start(config).await
        }
        Commands::Describe {
            peers,
            replication,
            add,
        } => {
            print!("{}", describe_report(&peers, replication, &add)?);
            Ok(())
        }
    }
}

// -----------------------------------------------------------------------
// strandd start
// -----------------------------------------------------------------------

/// The ring a fresh node bootstraps with: itself only.
fn bootstrap_ring(uuid: &str, replication: usize) -> Box<dyn Ring> {
    if replication <= 1 {
        Box::new(SingleRing::new(1, uuid))
    } else {
        Box::new(Ketama::new(1, replication, PeerList::new([uuid])))
    }
}

async fn cmd_start(config: NodeConfig) -> Result<()> {
    let uuid = config
        .node
        .uuid
        .clone()
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
    let ring = bootstrap_ring(&uuid, config.cluster.replication);
    info!(
        %uuid,
        listen_addr = %config.distributor.listen_addr,
        ring = %ring.ring_type(),
        replication = ring.replication(),
        write_level = ?config.distributor.write_level,
        "starting strandd"
    );

    let meta = MemoryMetadataService::new(uuid.clone(), ring.to_model()?)
        .context("failed to seed coordination service")?;
    meta.set_global_metadata(config.global_metadata());

    let distributor = Distributor::start(
        config.distributor,
        NodeServices {
            meta: Arc::new(meta),
            blocks: Arc::new(MemoryBlockStore::new()),
            inodes: Arc::new(MemoryINodeStore::new()),
            rebalancer: Arc::new(ReplicationRebalancer::new()),
            registry: None,
        },
    )
    .await
    .context("failed to start distributor")?;

    if let Some(addr) = distributor.local_addr() {
        info!(%addr, "storage service listening");
    }
    info!("strandd ready, press Ctrl-C to stop");

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for Ctrl-C")?;
    info!("shutting down");

    distributor.close().await.context("failed to close distributor")?;
    Ok(())
}

// -----------------------------------------------------------------------
// strandd describe
// -----------------------------------------------------------------------

/// Render a ring and, if `add` is non-empty, the ring grown by `add` with
/// the share of sample keys that would migrate.
fn describe_report(peers: &[String], replication: usize, add: &[String]) -> Result<String> {
    let members = PeerList::new(peers.iter().map(|p| p.trim()).filter(|p| !p.is_empty()));
    if members.is_empty() {
        bail!("--peers must name at least one peer");
    }

    let ring = Ketama::new(1, replication.max(1), members);
    let mut out = String::new();
    writeln!(out, "{}", ring.describe())?;

    let joining = PeerList::new(add.iter().map(|p| p.trim()).filter(|p| !p.is_empty()));
    if joining.is_empty() {
        return Ok(out);
    }

    let grown = ring.add_peers(&joining, &[])?;
    writeln!(out, "\nAfter adding {}:", joining.as_slice().join(", "))?;
    writeln!(out, "{}", grown.describe())?;

    let keys: Vec<BlockRef> = (0..SAMPLE_KEYS)
        .map(|i| BlockRef::data(INodeRef::new(0, i / 64), i % 64))
        .collect();
    let migrations = diff(&ring, grown.as_ref(), &keys)?;

    let mut by_destination: BTreeMap<&str, usize> = BTreeMap::new();
    let mut moved: BTreeSet<BlockRef> = BTreeSet::new();
    for m in &migrations {
        *by_destination.entry(m.to.as_str()).or_default() += 1;
        moved.insert(m.key);
    }

    writeln!(
        out,
        "\nKeys migrating: {} of {} sampled ({:.1}%)",
        moved.len(),
        keys.len(),
        moved.len() as f64 * 100.0 / keys.len() as f64
    )?;
    writeln!(out, "Copies to move: {}", migrations.len())?;
    for (peer, count) in by_destination {
        writeln!(out, "\t-> {peer}: {count}")?;
    }
    Ok(out)
}
