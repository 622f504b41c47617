//! Entry point: parse arguments, load the hosts and run-configuration
//! files, build the layer stack for the selected mode, and run until a
//! termination signal arrives.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;

use anyhow::Context;
use bytes::Bytes;
use clap::Parser;

use da_broadcast::{Fifo, Urb};
use da_common::config::{FifoConfig, LatticeConfig, PlConfig};
use da_common::hosts::HostSet;
use da_common::OutputWriter;
use da_io::{ReadinessLoop, WorkerPool};
use da_lattice::LatticeAgreement;
use da_link::PerfectLink;
use da_wire::Packet;

/// `read_event_loop_workers` — readiness-loop dispatch threads.
const READ_EVENT_LOOP_WORKERS: usize = 5;
/// `write_event_loop_workers` — stubborn-link retransmit workers.
const WRITE_EVENT_LOOP_WORKERS: usize = 3;

#[derive(Parser, Debug)]
#[command(
    name = "da-node",
    about = "Perfect links, FIFO uniform reliable broadcast, and lattice agreement over unreliable datagrams"
)]
struct Cli {
    /// This process's id, as it appears in the hosts file.
    #[arg(long)]
    id: u64,

    /// Path to the hosts file.
    #[arg(long)]
    hosts: PathBuf,

    /// Path to the output file; truncated and created on startup.
    #[arg(long)]
    output: PathBuf,

    /// Which layer stack to build.
    #[arg(long, value_enum)]
    mode: Mode,

    /// Path to the mode's run-configuration file.
    config: PathBuf,
}

#[derive(Clone, Copy, Debug, clap::ValueEnum)]
enum Mode {
    Pl,
    Fifo,
    Lattice,
}

fn main() {
    da_common::logging::init();
    let cli = Cli::parse();
    if let Err(err) = run(cli) {
        tracing::error!(error = format!("{err:#}"), "fatal startup error");
        eprintln!("error: {err:#}");
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> anyhow::Result<()> {
    let hosts = HostSet::load(&cli.hosts).context("failed to load hosts file")?;
    let output = Arc::new(OutputWriter::create(&cli.output).context("failed to create output file")?);
    let readiness = Arc::new(ReadinessLoop::new().context("failed to create readiness loop")?);
    let write_pool = Arc::new(WorkerPool::new("write-loop", WRITE_EVENT_LOOP_WORKERS));

    tracing::info!(id = cli.id, mode = ?cli.mode, "starting da-node");

    let read_workers: Vec<_> = (0..READ_EVENT_LOOP_WORKERS)
        .map(|_| {
            let readiness = readiness.clone();
            thread::spawn(move || readiness.run())
        })
        .collect();

    let stop_layers: Box<dyn Fn() + Send> = match cli.mode {
        Mode::Pl => run_pl(cli.id, &hosts, &readiness, write_pool.clone(), output.clone(), &cli.config)?,
        Mode::Fifo => run_fifo(cli.id, &hosts, &readiness, write_pool.clone(), output.clone(), &cli.config)?,
        Mode::Lattice => {
            run_lattice(cli.id, &hosts, &readiness, write_pool.clone(), output.clone(), &cli.config)?
        }
    };

    let readiness_for_signal = readiness.clone();
    ctrlc::set_handler(move || {
        tracing::info!("shutdown signal received");
        stop_layers();
        readiness_for_signal.stop(READ_EVENT_LOOP_WORKERS);
    })
    .context("failed to install signal handler")?;

    for worker in read_workers {
        let _ = worker.join();
    }

    output.flush();
    tracing::info!("da-node shut down cleanly");
    Ok(())
}

fn run_pl(
    id: u64,
    hosts: &HostSet,
    readiness: &ReadinessLoop,
    write_pool: Arc<WorkerPool>,
    output: Arc<OutputWriter>,
    config_path: &Path,
) -> anyhow::Result<Box<dyn Fn() + Send>> {
    let config = PlConfig::load(config_path).context("failed to load perfect-link run config")?;

    let output_for_deliver = output.clone();
    let perfect = PerfectLink::new(
        id,
        hosts,
        readiness,
        write_pool,
        Arc::new(move |pkt: Packet| {
            let (origin, seq) = pkt.key();
            output_for_deliver.write_delivery(origin, seq);
        }),
    )?;

    if id != config.receiver_id {
        for _ in 0..config.num_messages {
            let pkt = Packet::new_data(id, Bytes::new());
            let seq = pkt.seq_id;
            if let Err(err) = perfect.send(config.receiver_id, pkt) {
                tracing::warn!(?err, "failed to send perfect-link message");
                continue;
            }
            output.write_broadcast(seq);
        }
    }

    let perfect_for_stop = perfect.clone();
    Ok(Box::new(move || perfect_for_stop.stop()))
}

fn run_fifo(
    id: u64,
    hosts: &HostSet,
    readiness: &ReadinessLoop,
    write_pool: Arc<WorkerPool>,
    output: Arc<OutputWriter>,
    config_path: &Path,
) -> anyhow::Result<Box<dyn Fn() + Send>> {
    let config = FifoConfig::load(config_path).context("failed to load fifo run config")?;

    let fifo = Arc::new(Fifo::new(hosts, output.clone()));
    let hosts_for_deliver = hosts.clone();
    let fifo_for_deliver = fifo.clone();
    let urb = Urb::new(
        id,
        hosts,
        readiness,
        write_pool,
        Arc::new(move |pkt: Packet| {
            fifo_for_deliver.on_urb_deliver(&hosts_for_deliver, pkt);
        }),
    )?;

    for _ in 0..config.num_messages {
        let pkt = Packet::new_data(id, Bytes::new());
        let seq = pkt.seq_id;
        urb.broadcast(vec![pkt]);
        output.write_broadcast(seq);
    }

    let urb_for_stop = urb.clone();
    Ok(Box::new(move || urb_for_stop.stop()))
}

fn run_lattice(
    id: u64,
    hosts: &HostSet,
    readiness: &ReadinessLoop,
    write_pool: Arc<WorkerPool>,
    output: Arc<OutputWriter>,
    config_path: &Path,
) -> anyhow::Result<Box<dyn Fn() + Send>> {
    let config = LatticeConfig::load(config_path).context("failed to load lattice run config")?;

    let lattice = LatticeAgreement::new(id, hosts, readiness, write_pool, config.proposals.len(), output)?;

    let proposals: Vec<(u32, Vec<u32>)> = config
        .proposals
        .into_iter()
        .enumerate()
        .map(|(round, values)| (round as u32, values))
        .collect();
    lattice.propose_many(proposals);

    let lattice_for_stop = lattice.clone();
    Ok(Box::new(move || lattice_for_stop.stop()))
}
