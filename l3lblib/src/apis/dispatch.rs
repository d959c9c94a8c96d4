//! The Dispatcher is the single entry point of the packet path
//!
//! For every frame it
//! 	classifies it
//! 	hashes the source address onto an index of the current backend table
//! 	rewrites the destination MAC and destination IPv4 address to that backend
//!
//! Anything that does not work out on the way passes the frame through
//! untouched. Nothing is ever dropped. IPv4 and L4 checksums are not
//! recomputed after the rewrite, so receivers of a transmitted frame see a
//! stale header checksum

use std::{fmt, net::Ipv4Addr, sync::Arc};

use super::{
	classify, select_index, BackendTable, DecisionEvent, LogObserver, Observer, Reason,
	TableSnapshot,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ForwardingDecision {
	/// Leave the frame alone and let normal delivery have it
	Pass,
	/// Reserved. Never returned by the dispatcher
	Drop,
	/// The frame was rewritten; send it back out of the interface it came in on
	Transmit,
}

impl ForwardingDecision {
	pub const XDP_DROP: u32 = 1;
	pub const XDP_PASS: u32 = 2;
	pub const XDP_TX: u32 = 3;

	/// The matching XDP program return code
	pub const fn xdp_action(self) -> u32 {
		match self {
			ForwardingDecision::Pass => Self::XDP_PASS,
			ForwardingDecision::Drop => Self::XDP_DROP,
			ForwardingDecision::Transmit => Self::XDP_TX,
		}
	}
}

impl fmt::Display for ForwardingDecision {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let s = match self {
			ForwardingDecision::Pass => "pass",
			ForwardingDecision::Drop => "drop",
			ForwardingDecision::Transmit => "transmit",
		};
		f.write_str(s)
	}
}

pub struct Dispatcher<O = LogObserver> {
	table: Arc<BackendTable>,
	observer: O,
}

impl Dispatcher<LogObserver> {
	/// Dispatcher that reports decisions through the `log` facade
	pub fn with_logging(table: Arc<BackendTable>) -> Self {
		Self::new(table, LogObserver)
	}
}

impl<O: Observer> Dispatcher<O> {
	pub fn new(table: Arc<BackendTable>, observer: O) -> Self {
		Self { table, observer }
	}

	pub fn table(&self) -> &Arc<BackendTable> {
		&self.table
	}

	pub fn observer(&self) -> &O {
		&self.observer
	}

	/// Decide what happens to one frame, rewriting it in place on `Transmit`
	///
	/// The frame is left byte for byte unchanged on `Pass`
	pub fn process(&self, frame: &mut [u8]) -> ForwardingDecision {
		let table = self.table.snapshot();
		self.dispatch(&table, frame)
	}

	/// Process a burst of frames against a single load of the table
	///
	/// Decisions are written to the matching slot of `decisions`. Handles
	/// as many frames as there are slots and returns that number
	pub fn process_burst(
		&self,
		frames: &mut [&mut [u8]],
		decisions: &mut [ForwardingDecision],
	) -> usize {
		let table = self.table.snapshot();
		let mut n = 0;
		for (frame, decision) in frames.iter_mut().zip(decisions.iter_mut()) {
			*decision = self.dispatch(&table, frame);
			n += 1;
		}
		n
	}

	fn dispatch(&self, table: &TableSnapshot, frame: &mut [u8]) -> ForwardingDecision {
		let generation = table.generation();

		let parsed = match classify::parse(frame) {
			Ok(p) => p,
			Err(e) => {
				return self.pass(Reason::NotClassified(e), None, None, generation);
			}
		};
		let src = parsed.source_address();

		let index = match select_index(src, table.active_count()) {
			Some(i) => i,
			None => return self.pass(Reason::NoBackends, Some(src), None, generation),
		};

		let backend = match table.get(index) {
			Ok(b) => b,
			Err(_) => return self.pass(Reason::LookupFailed, Some(src), Some(index), generation),
		};

		if let Err(e) = parsed.rewrite_destination(frame, &backend) {
			return self.pass(Reason::NotClassified(e), Some(src), Some(index), generation);
		}

		self.emit(DecisionEvent::new(
			ForwardingDecision::Transmit,
			Reason::Forwarded,
			Some(src),
			Some(index),
			Some(backend),
			generation,
		))
	}

	#[inline]
	fn pass(
		&self,
		reason: Reason,
		src: Option<Ipv4Addr>,
		index: Option<usize>,
		generation: u64,
	) -> ForwardingDecision {
		self.emit(DecisionEvent::new(
			ForwardingDecision::Pass,
			reason,
			src,
			index,
			None,
			generation,
		))
	}

	#[inline]
	fn emit(&self, event: DecisionEvent) -> ForwardingDecision {
		#[cfg(feature = "debug")]
		println!("{}", event);
		self.observer.observe(&event);
		event.decision
	}
}
