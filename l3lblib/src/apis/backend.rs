//! The backend table holds the servers traffic can be spread across
//!
//! The table is read for every packet and written rarely, by the control plane.
//! Every `replace` builds a complete new `TableSnapshot` and publishes it with a
//! single atomic pointer swap, so readers never take a lock and always see
//! either the old table or the new one, never a mix of both

use arc_swap::{ArcSwap, Guard};
use pnet::datalink::MacAddr;
use std::{fmt, net::Ipv4Addr, str::FromStr, sync::Arc};

use super::{ParseBackendError, TableError, MAX_BACKENDS};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
/// A downstream server: its IPv4 address and its MAC
pub struct Backend {
	pub address: Ipv4Addr,
	pub link_address: [u8; 6],
}

impl Backend {
	/// Filler for the unused slots of a table
	pub const UNSPECIFIED: Backend = Backend {
		address: Ipv4Addr::UNSPECIFIED,
		link_address: [0u8; 6],
	};

	pub fn new(address: Ipv4Addr, link_address: [u8; 6]) -> Self {
		Self {
			address,
			link_address,
		}
	}

	/// Check that packets can actually be steered to this backend
	pub fn validate(&self) -> Result<(), &'static str> {
		let ip = self.address;
		if ip.is_unspecified() {
			return Err("unspecified address");
		}
		if ip.is_broadcast() {
			return Err("broadcast address");
		}
		if ip.is_multicast() {
			return Err("multicast address");
		}

		let mac = self.link_address;
		if mac == [0u8; 6] {
			return Err("zero link address");
		}
		// covers broadcast as well
		if mac[0] & 0x01 != 0 {
			return Err("group link address");
		}
		Ok(())
	}

	pub fn mac(&self) -> MacAddr {
		arr_to_macaddr(self.link_address)
	}
}

pub(crate) fn arr_to_macaddr(mac: [u8; 6]) -> MacAddr {
	MacAddr::new(mac[0], mac[1], mac[2], mac[3], mac[4], mac[5])
}

impl fmt::Display for Backend {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{} ({})", self.address, self.mac())
	}
}

/// Parses `IP=MAC`, e.g. `10.0.0.1=aa:bb:cc:dd:ee:01`
impl FromStr for Backend {
	type Err = ParseBackendError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		let mut parts = s.trim().splitn(2, '=');
		let (ip, mac) = match (parts.next(), parts.next()) {
			(Some(ip), Some(mac)) => (ip.trim(), mac.trim()),
			_ => return Err(ParseBackendError::Format(s.to_owned())),
		};
		let address = ip.parse::<Ipv4Addr>()?;
		let mac = mac
			.parse::<MacAddr>()
			.map_err(|_| ParseBackendError::LinkAddress(mac.to_owned()))?;
		Ok(Self::new(address, [mac.0, mac.1, mac.2, mac.3, mac.4, mac.5]))
	}
}

/// One published version of the backend table
///
/// Slots at and beyond `count` hold `Backend::UNSPECIFIED`
#[derive(Clone, Copy, Debug)]
pub struct TableSnapshot {
	entries: [Backend; MAX_BACKENDS],
	count: usize,
	generation: u64,
}

impl TableSnapshot {
	const EMPTY: TableSnapshot = TableSnapshot {
		entries: [Backend::UNSPECIFIED; MAX_BACKENDS],
		count: 0,
		generation: 0,
	};

	/// Number of active backends
	#[inline]
	pub fn active_count(&self) -> usize {
		self.count
	}

	#[inline]
	pub fn get(&self, index: usize) -> Result<Backend, TableError> {
		if index >= self.count {
			return Err(TableError::IndexOutOfRange {
				index,
				count: self.count,
			});
		}
		Ok(self.entries[index])
	}

	/// The active backends, in table order
	pub fn backends(&self) -> &[Backend] {
		&self.entries[..self.count]
	}

	/// Increases by one with every published table
	pub fn generation(&self) -> u64 {
		self.generation
	}

	pub fn is_empty(&self) -> bool {
		self.count == 0
	}
}

/// A loaded snapshot. Keep it for the duration of one packet or one burst
pub type Snapshot = Guard<Arc<TableSnapshot>>;

pub struct BackendTable {
	current: ArcSwap<TableSnapshot>,
}

impl BackendTable {
	/// An empty table: every packet is passed through
	pub fn new() -> Self {
		Self {
			current: ArcSwap::from_pointee(TableSnapshot::EMPTY),
		}
	}

	pub fn with_backends(entries: &[Backend]) -> Result<Self, TableError> {
		let table = Self::new();
		table.replace(entries)?;
		Ok(table)
	}

	/// Atomically install `entries` as the new table
	///
	/// All entries are checked before anything is published; on error the
	/// current table is left untouched. Returns the generation of the new table
	pub fn replace(&self, entries: &[Backend]) -> Result<u64, TableError> {
		if entries.len() > MAX_BACKENDS {
			log::warn!(
				"rejecting backend table: {} entries, capacity {}",
				entries.len(),
				MAX_BACKENDS
			);
			return Err(TableError::CapacityExceeded {
				requested: entries.len(),
				capacity: MAX_BACKENDS,
			});
		}
		for (index, backend) in entries.iter().enumerate() {
			if let Err(reason) = backend.validate() {
				log::warn!("rejecting backend table: {} is {}", backend, reason);
				return Err(TableError::InvalidEntry { index, reason });
			}
		}

		let mut next = TableSnapshot::EMPTY;
		next.entries[..entries.len()].copy_from_slice(entries);
		next.count = entries.len();

		let generation = self.publish(next);
		log::info!(
			"installed backend table generation {} with {} backends",
			generation,
			entries.len()
		);
		Ok(generation)
	}

	/// Install an empty table. Traffic is passed through until the next `replace`
	pub fn clear(&self) -> u64 {
		let generation = self.publish(TableSnapshot::EMPTY);
		log::info!("cleared backend table, generation {}", generation);
		generation
	}

	/// Publish `next` with the generation following the one it replaces.
	/// Concurrent writers are serialized by the compare-and-swap loop
	fn publish(&self, next: TableSnapshot) -> u64 {
		let prev = self.current.rcu(|cur| {
			let mut t = next;
			t.generation = cur.generation + 1;
			t
		});
		prev.generation + 1
	}

	/// Load the current table. The snapshot stays consistent even if a
	/// `replace` lands while it is held
	#[inline]
	pub fn snapshot(&self) -> Snapshot {
		self.current.load()
	}

	#[inline]
	pub fn get(&self, index: usize) -> Result<Backend, TableError> {
		self.current.load().get(index)
	}

	#[inline]
	pub fn active_count(&self) -> usize {
		self.current.load().active_count()
	}

	pub fn generation(&self) -> u64 {
		self.current.load().generation()
	}
}

impl Default for BackendTable {
	fn default() -> Self {
		Self::new()
	}
}

impl fmt::Debug for BackendTable {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let cur = self.current.load();
		f.debug_struct("BackendTable")
			.field("generation", &cur.generation)
			.field("backends", &cur.backends())
			.finish()
	}
}
