//! This module defines the structures that make up the load balancing data plane

mod backend;
pub mod classify;
mod dispatch;
mod hash;
mod observe;

pub use backend::*;
pub use classify::{ParsedPacket, ETH_HLEN, IPV4_HLEN};
pub use dispatch::*;
pub use hash::*;
pub use observe::*;

use std::net::AddrParseError;
use thiserror::Error;

/// Hard limit on the number of backends a table can hold
pub const MAX_BACKENDS: usize = 8;

/// Errors raised by the control plane facing operations
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableError {
	#[error("{} backends requested, table capacity is {}", requested, capacity)]
	CapacityExceeded { requested: usize, capacity: usize },
	#[error("backend {} rejected: {}", index, reason)]
	InvalidEntry { index: usize, reason: &'static str },
	#[error("index {} out of range, {} backends active", index, count)]
	IndexOutOfRange { index: usize, count: usize },
}

/// Errors produced while classifying frames. These never leave the packet path:
/// the Dispatcher turns every one of them into `ForwardingDecision::Pass`
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClassifyError {
	/// The frame cannot hold an Ethernet header
	#[error("truncated frame: {} bytes", len)]
	TruncatedFrame { len: usize },
	#[error("not IPv4: ethertype {:#06x}", ethertype)]
	NotIpv4 { ethertype: u16 },
	/// The frame cannot hold the fixed IPv4 header
	#[error("truncated IPv4 header: {} bytes", len)]
	TruncatedIpv4 { len: usize },
}

#[derive(Error, Debug)]
pub enum ParseBackendError {
	#[error("expected IP=MAC, got {:?}", _0)]
	Format(String),
	#[error("bad address: {}", _0)]
	Address(AddrParseError),
	#[error("bad link address {:?}", _0)]
	LinkAddress(String),
}

impl From<AddrParseError> for ParseBackendError {
	fn from(e: AddrParseError) -> Self {
		Self::Address(e)
	}
}
