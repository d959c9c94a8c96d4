//! Source address hashing for backend selection
//!
//! The mix is a fixed xorshift-multiply avalanche with no key. It only has to
//! spread addresses evenly over a handful of indices; it makes no claim of
//! collision resistance.
//!
//! A source keeps its backend for as long as the table size does not change.
//! Any change in size reshuffles every flow.

use byteorder::{ByteOrder, LittleEndian};
use std::net::Ipv4Addr;

#[inline]
pub const fn mix(mut x: u32) -> u32 {
	x ^= x >> 16;
	x = x.wrapping_mul(0x7feb_352d);
	x ^= x >> 15;
	x = x.wrapping_mul(0x846c_a68b);
	x ^= x >> 16;
	x
}

/// The hash input for an address: its network order bytes read as a
/// little-endian word, the value an XDP program sees when it loads `saddr`
/// on x86-64 or arm64. Flows land on the same index as they would there,
/// whatever the byte order of this host.
#[inline]
pub fn source_key(addr: Ipv4Addr) -> u32 {
	LittleEndian::read_u32(&addr.octets())
}

/// Backend index for `addr` in a table of `count` entries
#[inline]
pub fn select_index(addr: Ipv4Addr, count: usize) -> Option<usize> {
	if count == 0 {
		return None;
	}
	Some(mix(source_key(addr)) as usize % count)
}
