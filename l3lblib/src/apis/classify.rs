//! The classifier decides whether a frame is eligible for load balancing
//! and records where the fields rewritten by the Dispatcher live
//!
//! Only the fixed part of the headers is checked:
//! 	frame long enough for an Ethernet header
//! 	EtherType is IPv4
//! 	frame long enough for a 20 byte IPv4 header
//!
//! IHL, version and total length are not looked at, so frames carrying IP
//! options are accepted as they are

use pnet::packet::{
	ethernet::{EtherTypes, EthernetPacket},
	ipv4::Ipv4Packet,
};
use std::net::Ipv4Addr;

use super::{Backend, ClassifyError};

/// Size of an untagged Ethernet header
pub const ETH_HLEN: usize = 14;
/// Size of an IPv4 header without options
pub const IPV4_HLEN: usize = 20;

// offset of the destination address inside the IPv4 header
const IPV4_DST_OFFSET: usize = 16;
const IPV4_ALEN: usize = 4;
const ETH_ALEN: usize = 6;

/// Per-frame view produced by `parse`
///
/// Offsets are relative to the start of the frame it was parsed from
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ParsedPacket {
	eth_offset: usize,
	ip_offset: usize,
	source_address: Ipv4Addr,
	destination_address: Ipv4Addr,
	dst_addr_offset: usize,
	dst_mac_offset: usize,
}

pub fn parse(frame: &[u8]) -> Result<ParsedPacket, ClassifyError> {
	let len = frame.len();
	let eth = EthernetPacket::new(frame).ok_or(ClassifyError::TruncatedFrame { len })?;

	let ethertype = eth.get_ethertype();
	if ethertype != EtherTypes::Ipv4 {
		return Err(ClassifyError::NotIpv4 {
			ethertype: ethertype.0,
		});
	}

	let ip = Ipv4Packet::new(&frame[ETH_HLEN..]).ok_or(ClassifyError::TruncatedIpv4 { len })?;

	Ok(ParsedPacket {
		eth_offset: 0,
		ip_offset: ETH_HLEN,
		source_address: ip.get_source(),
		destination_address: ip.get_destination(),
		dst_addr_offset: ETH_HLEN + IPV4_DST_OFFSET,
		dst_mac_offset: 0,
	})
}

impl ParsedPacket {
	pub fn eth_offset(&self) -> usize {
		self.eth_offset
	}

	pub fn ip_offset(&self) -> usize {
		self.ip_offset
	}

	pub fn source_address(&self) -> Ipv4Addr {
		self.source_address
	}

	pub fn destination_address(&self) -> Ipv4Addr {
		self.destination_address
	}

	/// Destination address field of the IPv4 header
	pub fn dst_addr_offset(&self) -> usize {
		self.dst_addr_offset
	}

	/// Destination field of the Ethernet header
	pub fn dst_mac_offset(&self) -> usize {
		self.dst_mac_offset
	}

	/// Point the frame at `backend`: overwrite the Ethernet destination and
	/// the IPv4 destination address in place, at the recorded offsets
	///
	/// Nothing else is touched, the IPv4 header checksum included. Both fields
	/// are bounds checked before the first write, so a failed call leaves the
	/// frame as it was
	pub fn rewrite_destination(
		&self,
		frame: &mut [u8],
		backend: &Backend,
	) -> Result<(), ClassifyError> {
		let len = frame.len();
		let mac_end =
			field_end(self.dst_mac_offset, ETH_ALEN, len).ok_or(ClassifyError::TruncatedFrame { len })?;
		let addr_end =
			field_end(self.dst_addr_offset, IPV4_ALEN, len).ok_or(ClassifyError::TruncatedIpv4 { len })?;

		let mac = frame
			.get_mut(self.dst_mac_offset..mac_end)
			.ok_or(ClassifyError::TruncatedFrame { len })?;
		mac.copy_from_slice(&backend.link_address);

		let addr = frame
			.get_mut(self.dst_addr_offset..addr_end)
			.ok_or(ClassifyError::TruncatedIpv4 { len })?;
		addr.copy_from_slice(&backend.address.octets());
		Ok(())
	}
}

// end of a `size` byte field at `offset`, if it fits in `len`
fn field_end(offset: usize, size: usize, len: usize) -> Option<usize> {
	offset.checked_add(size).filter(|&end| end <= len)
}

#[cfg(test)]
mod tests {
	use super::*;

	/// 14 byte Ethernet header followed by a 20 byte IPv4 header
	fn frame(ethertype: [u8; 2]) -> Vec<u8> {
		let mut f = vec![
			0x02, 0x00, 0x00, 0x00, 0x00, 0x01, // dst mac
			0x02, 0x00, 0x00, 0x00, 0x00, 0x02, // src mac
		];
		f.extend_from_slice(&ethertype);
		f.extend_from_slice(&[
			0x45, 0x00, 0x00, 0x1c, 0x00, 0x00, 0x40, 0x00, 0x40, 0x11, 0xbe, 0xef, // ..checksum
			192, 168, 1, 5, // src
			10, 10, 1, 1, // dst
		]);
		f
	}

	#[test]
	fn parses_minimal_ipv4() {
		let f = frame([0x08, 0x00]);
		let p = parse(&f).unwrap();
		assert_eq!(p.source_address, Ipv4Addr::new(192, 168, 1, 5));
		assert_eq!(p.destination_address, Ipv4Addr::new(10, 10, 1, 1));
		assert_eq!(p.ip_offset, 14);
		assert_eq!(p.dst_addr_offset, 30);
		assert_eq!(&f[p.dst_addr_offset..p.dst_addr_offset + 4], &[10, 10, 1, 1]);
		assert_eq!(p.dst_mac_offset, 0);
	}

	#[test]
	fn rejects_short_frames() {
		let f = frame([0x08, 0x00]);
		assert_eq!(parse(&f[..0]), Err(ClassifyError::TruncatedFrame { len: 0 }));
		assert_eq!(parse(&f[..13]), Err(ClassifyError::TruncatedFrame { len: 13 }));
		assert_eq!(parse(&f[..14]), Err(ClassifyError::TruncatedIpv4 { len: 14 }));
		assert_eq!(parse(&f[..33]), Err(ClassifyError::TruncatedIpv4 { len: 33 }));
		assert!(parse(&f[..34]).is_ok());
	}

	#[test]
	fn rejects_other_ethertypes() {
		assert_eq!(
			parse(&frame([0x08, 0x06])),
			Err(ClassifyError::NotIpv4 { ethertype: 0x0806 })
		);
		assert_eq!(
			parse(&frame([0x86, 0xdd])),
			Err(ClassifyError::NotIpv4 { ethertype: 0x86dd })
		);
		// VLAN tagged frames are not unwrapped
		assert_eq!(
			parse(&frame([0x81, 0x00])),
			Err(ClassifyError::NotIpv4 { ethertype: 0x8100 })
		);
	}

	#[test]
	fn header_length_is_not_validated() {
		let mut f = frame([0x08, 0x00]);
		// IHL of 15 words, far past the end of the frame
		f[14] = 0x4f;
		assert!(parse(&f).is_ok());
		// not even the version
		f[14] = 0x60;
		assert!(parse(&f).is_ok());
	}

	#[test]
	fn rewrite_touches_only_destinations() {
		let mut f = frame([0x08, 0x00]);
		let orig = f.clone();
		let p = parse(&f).unwrap();
		let b = Backend::new(Ipv4Addr::new(10, 0, 0, 2), [0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0x02]);
		p.rewrite_destination(&mut f, &b).unwrap();

		assert_eq!(&f[0..6], &[0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0x02]);
		assert_eq!(&f[30..34], &[10, 0, 0, 2]);
		assert_eq!(&f[6..30], &orig[6..30]);
		// checksum left stale
		assert_eq!(&f[24..26], &[0xbe, 0xef]);
	}

	#[test]
	fn rewrite_refuses_short_buffer() {
		let f = frame([0x08, 0x00]);
		let p = parse(&f).unwrap();
		let mut short = f[..20].to_vec();
		let b = Backend::new(Ipv4Addr::new(10, 0, 0, 2), [0x02, 0, 0, 0, 0, 2]);
		assert_eq!(
			p.rewrite_destination(&mut short, &b),
			Err(ClassifyError::TruncatedIpv4 { len: 20 })
		);
		assert_eq!(short, &f[..20]);
	}

	#[test]
	fn rewrite_uses_recorded_offsets() {
		let mut f = frame([0x08, 0x00]);
		f.resize(50, 0);
		let orig = f.clone();
		let mut p = parse(&f).unwrap();
		p.dst_addr_offset = 40;
		let b = Backend::new(Ipv4Addr::new(10, 0, 0, 2), [0x02, 0, 0, 0, 0, 2]);
		p.rewrite_destination(&mut f, &b).unwrap();

		assert_eq!(&f[40..44], &[10, 0, 0, 2]);
		assert_eq!(&f[30..34], &orig[30..34]);
	}

	#[test]
	fn rewrite_rejects_offsets_past_the_frame() {
		let f = frame([0x08, 0x00]);
		let b = Backend::new(Ipv4Addr::new(10, 0, 0, 2), [0x02, 0, 0, 0, 0, 2]);

		let mut p = parse(&f).unwrap();
		p.dst_addr_offset = 40;
		let mut g = f.clone();
		assert_eq!(
			p.rewrite_destination(&mut g, &b),
			Err(ClassifyError::TruncatedIpv4 { len: 34 })
		);
		assert_eq!(g, f);

		let mut p = parse(&f).unwrap();
		p.dst_mac_offset = usize::MAX - 2;
		let mut g = f.clone();
		assert_eq!(
			p.rewrite_destination(&mut g, &b),
			Err(ClassifyError::TruncatedFrame { len: 34 })
		);
		assert_eq!(g, f);
	}
}
