//! l3lbd drives the load balancing core with synthetic traffic
//!
//! Each worker thread fills a burst of receive buffers, hands the burst to a
//! shared Dispatcher and counts the decisions. Transmitted frames are not put
//! on the wire; there is no NIC behind this process.
//! Worker 0 can play control plane and rotate the backend table while the
//! others keep dispatching.

mod config;
mod traffic;

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use crossbeam::thread;
use l3lblib::{BackendTable, Counters, Dispatcher, ForwardingDecision, LogObserver};
use std::sync::{
	atomic::{AtomicBool, Ordering},
	Arc,
};
use tracing_subscriber::EnvFilter;

use config::{Cli, Config};
use traffic::TrafficGen;

const MTU: usize = 1536;

type LbDispatcher = Dispatcher<(LogObserver, Arc<Counters>)>;

#[derive(Debug, Default, Clone, Copy)]
struct WorkerStats {
	bursts: u64,
	frames: u64,
	transmitted: u64,
}

/// Handle Ctrl+C
fn handle_signal(kr: Arc<AtomicBool>) -> Result<()> {
	ctrlc::set_handler(move || {
		kr.store(false, Ordering::SeqCst);
	})
	.context("setting Ctrl-C handler")
}

fn run_worker(
	id: usize,
	cfg: &Config,
	dispatcher: &LbDispatcher,
	keep_running: &AtomicBool,
) -> WorkerStats {
	let mut gen = TrafficGen::new(id, cfg.sources, cfg.arp_every, cfg.local);
	let mut bufs = vec![[0u8; MTU]; cfg.burst];
	let mut lens = vec![0usize; cfg.burst];
	let mut decisions = vec![ForwardingDecision::Pass; cfg.burst];
	let mut rotation = cfg.backends.clone();
	let mut stats = WorkerStats::default();

	while keep_running.load(Ordering::SeqCst) && (cfg.rounds == 0 || stats.bursts < cfg.rounds) {
		for (buf, len) in bufs.iter_mut().zip(lens.iter_mut()) {
			*len = gen.fill(buf);
		}
		let mut frames: Vec<&mut [u8]> = bufs
			.iter_mut()
			.zip(lens.iter())
			.map(|(buf, &len)| &mut buf[..len])
			.collect();

		let n = dispatcher.process_burst(&mut frames, &mut decisions);
		stats.frames += n as u64;
		stats.transmitted += decisions[..n]
			.iter()
			.filter(|&&d| d == ForwardingDecision::Transmit)
			.count() as u64;
		stats.bursts += 1;

		#[cfg(feature = "debug")]
		println!("worker {}: burst {} done, {} frames", id, stats.bursts, n);

		if id == 0 && cfg.reload_every > 0 && stats.bursts % cfg.reload_every == 0 && rotation.len() > 1 {
			rotation.rotate_left(1);
			match dispatcher.table().replace(&rotation) {
				Ok(generation) => log::debug!("worker 0 rotated backends, generation {}", generation),
				Err(e) => log::error!("failed to rotate backends: {}", e),
			}
		}
	}
	stats
}

fn main() -> Result<()> {
	let cli = Cli::parse();

	tracing_subscriber::fmt()
		.with_env_filter(
			EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level)),
		)
		.with_target(false)
		.init();

	let cfg = cli.into_config().context("invalid configuration")?;
	log::info!(
		"starting l3lbd: {} backends, {} workers, burst {}, vip {}",
		cfg.backends.len(),
		cfg.workers,
		cfg.burst,
		cfg.local.ip
	);

	let table = Arc::new(BackendTable::new());
	if cfg.backends.is_empty() {
		log::warn!("no backends configured, all traffic will be passed through");
	} else {
		table
			.replace(&cfg.backends)
			.context("installing backend table")?;
	}
	for (i, b) in cfg.backends.iter().enumerate() {
		log::info!("backend {}: {}", i, b);
	}

	let counters = Arc::new(Counters::new());
	let dispatcher: LbDispatcher = Dispatcher::new(table.clone(), (LogObserver, counters.clone()));

	// handling Ctrl+C
	let keep_running = Arc::new(AtomicBool::new(true));
	handle_signal(keep_running.clone())?;

	let per_worker = thread::scope(|s| {
		let handles: Vec<_> = (0..cfg.workers)
			.map(|id| {
				let (cfg, dispatcher, keep_running) = (&cfg, &dispatcher, &*keep_running);
				s.spawn(move |_| run_worker(id, cfg, dispatcher, keep_running))
			})
			.collect();
		handles
			.into_iter()
			.map(|h| h.join().map_err(|_| anyhow!("worker thread panicked")))
			.collect::<Result<Vec<_>>>()
	})
	.map_err(|_| anyhow!("worker scope panicked"))??;

	for (id, st) in per_worker.iter().enumerate() {
		log::info!(
			"worker {}: {} bursts, {} frames, {} transmitted",
			id,
			st.bursts,
			st.frames,
			st.transmitted
		);
	}

	let totals = counters.snapshot();
	log::info!(
		"{} frames: {} transmitted, {} passed ({} unclassified, {} without backends, {} failed lookups)",
		totals.total(),
		totals.forwarded,
		totals.passed(),
		totals.not_classified,
		totals.no_backends,
		totals.lookup_failed
	);
	let active = table.active_count();
	for (i, n) in totals.per_index.iter().enumerate().take(active) {
		log::info!("index {}: {} frames", i, n);
	}
	log::info!("l3lbd stopped at table generation {}", table.generation());
	Ok(())
}
