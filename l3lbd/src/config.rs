//! Command line configuration of the demo driver

use anyhow::{bail, Result};
use clap::Parser;
use l3lblib::{Backend, MAX_BACKENDS};
use pnet::datalink::MacAddr;
use std::{collections::HashSet, net::Ipv4Addr};

use crate::traffic::LocalIPMac;

const BURST_MAX: usize = 512;
// synthetic clients live in 172.16.0.0/12
const CLIENT_SPACE: usize = 1 << 20;

#[derive(Parser, Debug)]
#[command(
	name = "l3lbd",
	about = "Source-hash L3 load balancer driven by synthetic traffic",
	version
)]
pub(crate) struct Cli {
	/// Backend as IP=MAC, e.g. 10.0.0.1=aa:bb:cc:dd:ee:01. Repeat for up to 8 backends.
	#[arg(short, long = "backend", value_name = "IP=MAC")]
	backends: Vec<Backend>,

	/// Distinct client source addresses per worker.
	#[arg(short, long, default_value_t = 64)]
	sources: usize,

	/// Dispatcher threads.
	#[arg(short, long, default_value_t = 2)]
	workers: usize,

	/// Bursts per worker before exiting; 0 runs until Ctrl+C.
	#[arg(short, long, default_value_t = 0)]
	rounds: u64,

	/// Frames per burst.
	#[arg(long, default_value_t = 32)]
	burst: usize,

	/// Rotate the backend table every N bursts of worker 0; 0 never rotates.
	#[arg(long, default_value_t = 0)]
	reload_every: u64,

	/// Make every Nth synthetic frame an ARP request; 0 disables ARP.
	#[arg(long, default_value_t = 16)]
	arp_every: usize,

	/// Address the load balancer receives traffic on.
	#[arg(long, default_value = "10.10.1.1")]
	vip: Ipv4Addr,

	/// MAC the load balancer receives traffic on.
	#[arg(long, default_value = "90:e2:ba:b2:98:48")]
	vip_mac: MacAddr,

	/// Log level (trace, debug, info, warn, error). RUST_LOG takes precedence.
	#[arg(short, long, default_value = "info")]
	pub(crate) log_level: String,
}

#[derive(Debug, Clone)]
pub(crate) struct Config {
	pub(crate) backends: Vec<Backend>,
	pub(crate) sources: usize,
	pub(crate) workers: usize,
	pub(crate) rounds: u64,
	pub(crate) burst: usize,
	pub(crate) reload_every: u64,
	pub(crate) arp_every: usize,
	pub(crate) local: LocalIPMac,
}

impl Cli {
	pub(crate) fn into_config(self) -> Result<Config> {
		let config = Config {
			backends: self.backends,
			sources: self.sources,
			workers: self.workers,
			rounds: self.rounds,
			burst: self.burst,
			reload_every: self.reload_every,
			arp_every: self.arp_every,
			local: LocalIPMac::new(self.vip, self.vip_mac),
		};
		config.validate()?;
		Ok(config)
	}
}

impl Config {
	pub(crate) fn validate(&self) -> Result<()> {
		if self.workers == 0 {
			bail!("at least one worker is required");
		}
		if self.burst == 0 || self.burst > BURST_MAX {
			bail!("burst must be between 1 and {}, got {}", BURST_MAX, self.burst);
		}
		if self.sources == 0 {
			bail!("at least one source address is required");
		}
		if self.sources.saturating_mul(self.workers) > CLIENT_SPACE {
			bail!(
				"{} workers x {} sources exceed the {} synthetic client addresses",
				self.workers,
				self.sources,
				CLIENT_SPACE
			);
		}
		if self.backends.len() > MAX_BACKENDS {
			bail!(
				"{} backends configured, at most {} are supported",
				self.backends.len(),
				MAX_BACKENDS
			);
		}

		let mut seen = HashSet::new();
		for b in &self.backends {
			if let Err(reason) = b.validate() {
				bail!("backend {}: {}", b, reason);
			}
			if !seen.insert(b.address) {
				bail!("backend address {} configured twice", b.address);
			}
		}
		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn parse(args: &[&str]) -> Result<Config> {
		let cli = Cli::try_parse_from(std::iter::once("l3lbd").chain(args.iter().copied()))?;
		cli.into_config()
	}

	#[test]
	fn defaults() {
		let c = parse(&[]).unwrap();
		assert!(c.backends.is_empty());
		assert_eq!(c.workers, 2);
		assert_eq!(c.burst, 32);
		assert_eq!(c.rounds, 0);
		assert_eq!(c.local.ip, Ipv4Addr::new(10, 10, 1, 1));
		assert_eq!(c.local.mac, MacAddr::new(0x90, 0xe2, 0xba, 0xb2, 0x98, 0x48));
	}

	#[test]
	fn backends_in_order() {
		let c = parse(&["-b", "10.0.0.1=aa:bb:cc:dd:ee:01", "--backend", "10.0.0.2=aa:bb:cc:dd:ee:02"]).unwrap();
		assert_eq!(c.backends.len(), 2);
		assert_eq!(c.backends[1].address, Ipv4Addr::new(10, 0, 0, 2));
	}

	#[test]
	fn rejects_bad_backends() {
		assert!(parse(&["-b", "10.0.0.1"]).is_err());
		assert!(parse(&["-b", "10.0.0.1=ff:ff:ff:ff:ff:ff"]).is_err());
		assert!(parse(&["-b", "10.0.0.1=02:00:00:00:00:01", "-b", "10.0.0.1=02:00:00:00:00:02"]).is_err());

		let mut args = Vec::new();
		let specs: Vec<String> = (1..=9)
			.map(|i| format!("10.0.0.{}=02:00:00:00:00:{:02x}", i, i))
			.collect();
		for s in &specs {
			args.push("-b");
			args.push(s.as_str());
		}
		assert!(parse(&args).is_err());
	}

	#[test]
	fn rejects_bad_sizes() {
		assert!(parse(&["-w", "0"]).is_err());
		assert!(parse(&["--burst", "0"]).is_err());
		assert!(parse(&["--burst", "513"]).is_err());
		assert!(parse(&["-s", "0"]).is_err());
	}

	#[test]
	fn vip_mac_is_parsed_by_clap() {
		let err = Cli::try_parse_from(["l3lbd", "--vip-mac", "nope"]).unwrap_err();
		assert_eq!(err.kind(), clap::error::ErrorKind::ValueValidation);

		let c = parse(&["--vip-mac", "02:00:00:00:00:0a"]).unwrap();
		assert_eq!(c.local.mac, MacAddr::new(0x02, 0, 0, 0, 0, 0x0a));
	}
}
