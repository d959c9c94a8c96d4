//! Every packet the Dispatcher looks at produces exactly one `DecisionEvent`
//!
//! Observers run on the packet path: they must not block and must not allocate.
//! `LogObserver` goes through the `log` facade, `Counters` keeps lock-free totals
//! and `ChannelObserver` hands events to another thread over a bounded
//! crossbeam channel, dropping them when the consumer falls behind

use crossbeam::channel::{bounded, Receiver, Sender, TrySendError};
use std::{
	fmt,
	net::Ipv4Addr,
	sync::{
		atomic::{AtomicU64, Ordering},
		Arc,
	},
	time::{SystemTime, UNIX_EPOCH},
};

use super::{Backend, ClassifyError, ForwardingDecision, MAX_BACKENDS};

/// Why a packet got its decision
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Reason {
	Forwarded,
	/// The table had no active backends
	NoBackends,
	NotClassified(ClassifyError),
	/// The selected index was not in the table
	LookupFailed,
}

impl fmt::Display for Reason {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Reason::Forwarded => write!(f, "forwarded"),
			Reason::NoBackends => write!(f, "no backends configured"),
			Reason::NotClassified(e) => write!(f, "not classified: {}", e),
			Reason::LookupFailed => write!(f, "backend lookup failed"),
		}
	}
}

#[derive(Clone, Copy, Debug)]
pub struct DecisionEvent {
	pub timestamp: SystemTime,
	pub decision: ForwardingDecision,
	pub reason: Reason,
	/// Absent when the frame could not be classified
	pub source: Option<Ipv4Addr>,
	pub index: Option<usize>,
	pub backend: Option<Backend>,
	/// Generation of the table the decision was taken against
	pub generation: u64,
}

impl DecisionEvent {
	pub(crate) fn new(
		decision: ForwardingDecision,
		reason: Reason,
		source: Option<Ipv4Addr>,
		index: Option<usize>,
		backend: Option<Backend>,
		generation: u64,
	) -> Self {
		Self {
			timestamp: SystemTime::now(),
			decision,
			reason,
			source,
			index,
			backend,
			generation,
		}
	}

	/// Microseconds since the Unix epoch
	pub fn unix_micros(&self) -> u128 {
		self.timestamp
			.duration_since(UNIX_EPOCH)
			.map(|d| d.as_micros())
			.unwrap_or(0)
	}
}

/// Prints "-" for missing fields
struct Opt<T>(Option<T>);

impl<T: fmt::Display> fmt::Display for Opt<T> {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match &self.0 {
			Some(v) => fmt::Display::fmt(v, f),
			None => f.write_str("-"),
		}
	}
}

impl fmt::Display for DecisionEvent {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(
			f,
			"ts={} decision={} src={} index={} backend={} gen={} reason=\"{}\"",
			self.unix_micros(),
			self.decision,
			Opt(self.source),
			Opt(self.index),
			Opt(self.backend),
			self.generation,
			self.reason
		)
	}
}

pub trait Observer: Send + Sync {
	fn observe(&self, event: &DecisionEvent);
}

impl Observer for () {
	#[inline]
	fn observe(&self, _: &DecisionEvent) {}
}

impl<T: Observer + ?Sized> Observer for Arc<T> {
	#[inline]
	fn observe(&self, event: &DecisionEvent) {
		(**self).observe(event)
	}
}

impl<A: Observer, B: Observer> Observer for (A, B) {
	#[inline]
	fn observe(&self, event: &DecisionEvent) {
		self.0.observe(event);
		self.1.observe(event);
	}
}

/// Writes decisions to the `log` facade
///
/// Forwards are logged at trace level since there is one per packet, passes at debug
#[derive(Clone, Copy, Debug, Default)]
pub struct LogObserver;

impl Observer for LogObserver {
	fn observe(&self, event: &DecisionEvent) {
		match event.reason {
			Reason::Forwarded => log::trace!("{}", event),
			_ => log::debug!("{}", event),
		}
	}
}

/// Running totals per reason and per backend index
#[derive(Debug, Default)]
pub struct Counters {
	forwarded: AtomicU64,
	no_backends: AtomicU64,
	not_classified: AtomicU64,
	lookup_failed: AtomicU64,
	per_index: [AtomicU64; MAX_BACKENDS],
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CounterSnapshot {
	pub forwarded: u64,
	pub no_backends: u64,
	pub not_classified: u64,
	pub lookup_failed: u64,
	pub per_index: [u64; MAX_BACKENDS],
}

impl CounterSnapshot {
	pub fn passed(&self) -> u64 {
		self.no_backends + self.not_classified + self.lookup_failed
	}

	pub fn total(&self) -> u64 {
		self.forwarded + self.passed()
	}
}

impl Counters {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn snapshot(&self) -> CounterSnapshot {
		let mut per_index = [0u64; MAX_BACKENDS];
		for (out, c) in per_index.iter_mut().zip(self.per_index.iter()) {
			*out = c.load(Ordering::Relaxed);
		}
		CounterSnapshot {
			forwarded: self.forwarded.load(Ordering::Relaxed),
			no_backends: self.no_backends.load(Ordering::Relaxed),
			not_classified: self.not_classified.load(Ordering::Relaxed),
			lookup_failed: self.lookup_failed.load(Ordering::Relaxed),
			per_index,
		}
	}
}

impl Observer for Counters {
	#[inline]
	fn observe(&self, event: &DecisionEvent) {
		let c = match event.reason {
			Reason::Forwarded => {
				if let Some(slot) = event.index.and_then(|i| self.per_index.get(i)) {
					slot.fetch_add(1, Ordering::Relaxed);
				}
				&self.forwarded
			}
			Reason::NoBackends => &self.no_backends,
			Reason::NotClassified(_) => &self.not_classified,
			Reason::LookupFailed => &self.lookup_failed,
		};
		c.fetch_add(1, Ordering::Relaxed);
	}
}

/// Hands events to a consumer thread
pub struct ChannelObserver {
	sender: Sender<DecisionEvent>,
	dropped: AtomicU64,
}

impl ChannelObserver {
	/// Observer plus the receiving end, buffering up to `cap` events
	pub fn bounded(cap: usize) -> (Self, Receiver<DecisionEvent>) {
		let (sender, receiver) = bounded(cap);
		(
			Self {
				sender,
				dropped: AtomicU64::new(0),
			},
			receiver,
		)
	}

	/// Events lost because the channel was full or the receiver was gone
	pub fn dropped(&self) -> u64 {
		self.dropped.load(Ordering::Relaxed)
	}
}

impl Observer for ChannelObserver {
	fn observe(&self, event: &DecisionEvent) {
		match self.sender.try_send(*event) {
			Ok(()) => {}
			Err(TrySendError::Full(_)) | Err(TrySendError::Disconnected(_)) => {
				self.dropped.fetch_add(1, Ordering::Relaxed);
			}
		}
	}
}
