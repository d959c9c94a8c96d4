//! Synthetic traffic standing in for a NIC
//!
//! Every worker owns a generator that cycles through its own range of client
//! addresses and writes, into the caller's receive buffers:
//! 	UDP over IPv4 frames addressed to the load balancer
//! 	now and then an ARP request for the load balancer address, which the
//! 	dispatcher must leave alone

use pnet::{
	datalink::MacAddr,
	packet::{
		arp::{ArpHardwareTypes, ArpOperations, MutableArpPacket},
		ethernet::{EtherTypes, MutableEthernetPacket},
		ip::IpNextHeaderProtocols,
		ipv4::{self, MutableIpv4Packet},
		udp::MutableUdpPacket,
		MutablePacket,
	},
};
use std::net::Ipv4Addr;

use l3lblib::{ETH_HLEN, IPV4_HLEN};

const UDP_HLEN: usize = 8;
const ARP_LEN: usize = 28;
const PAYLOAD: &[u8] = b"l3lb synthetic payload";

/// First address handed out to synthetic clients
const CLIENT_BASE: Ipv4Addr = Ipv4Addr::new(172, 16, 0, 0);

#[derive(Clone, Copy, Debug)]
/// The address and MAC the load balancer receives traffic on
pub(crate) struct LocalIPMac {
	pub(crate) ip: Ipv4Addr,
	pub(crate) mac: MacAddr,
}

impl LocalIPMac {
	pub(crate) fn new(ip: Ipv4Addr, mac: MacAddr) -> Self {
		Self { ip, mac }
	}
}

pub(crate) struct TrafficGen {
	local: LocalIPMac,
	first: u32,
	sources: u32,
	arp_every: usize,
	seq: usize,
}

impl TrafficGen {
	/// Worker `id` uses `sources` consecutive client addresses of its own
	pub(crate) fn new(id: usize, sources: usize, arp_every: usize, local: LocalIPMac) -> Self {
		let first = u32::from(CLIENT_BASE) + (id * sources) as u32;
		Self {
			local,
			first,
			sources: sources as u32,
			arp_every,
			seq: 0,
		}
	}

	/// Write the next frame into `buf` and return its length
	///
	/// Returns 0 if `buf` cannot hold the frame
	pub(crate) fn fill(&mut self, buf: &mut [u8]) -> usize {
		let src = Ipv4Addr::from(self.first + (self.seq as u32 % self.sources));
		let arp = self.arp_every > 0 && self.seq % self.arp_every == self.arp_every - 1;
		self.seq = self.seq.wrapping_add(1);

		let written = if arp {
			self.write_arp(buf, src)
		} else {
			self.write_udp(buf, src)
		};
		written.unwrap_or(0)
	}

	fn write_udp(&self, buf: &mut [u8], src: Ipv4Addr) -> Option<usize> {
		let len = ETH_HLEN + IPV4_HLEN + UDP_HLEN + PAYLOAD.len();
		let (eth_buf, ip_buf) = buf.get_mut(..len)?.split_at_mut(ETH_HLEN);

		let mut eth_pkt = MutableEthernetPacket::new(eth_buf)?;
		eth_pkt.set_destination(self.local.mac);
		eth_pkt.set_source(client_mac(src));
		eth_pkt.set_ethertype(EtherTypes::Ipv4);

		let mut ip_pkt = MutableIpv4Packet::new(ip_buf)?;
		ip_pkt.set_version(4);
		ip_pkt.set_header_length((IPV4_HLEN / 4) as u8);
		ip_pkt.set_total_length((len - ETH_HLEN) as u16);
		ip_pkt.set_ttl(64);
		ip_pkt.set_next_level_protocol(IpNextHeaderProtocols::Udp);
		ip_pkt.set_source(src);
		ip_pkt.set_destination(self.local.ip);
		let csum = ipv4::checksum(&ip_pkt.to_immutable());
		ip_pkt.set_checksum(csum);

		let mut udp_pkt = MutableUdpPacket::new(ip_pkt.payload_mut())?;
		udp_pkt.set_source(40000 + (self.seq % 1000) as u16);
		udp_pkt.set_destination(8080);
		udp_pkt.set_length((UDP_HLEN + PAYLOAD.len()) as u16);
		// zero checksum: not computed
		udp_pkt.set_checksum(0);
		udp_pkt.set_payload(PAYLOAD);
		Some(len)
	}

	/// Who-has for the load balancer address, broadcast by a client
	fn write_arp(&self, buf: &mut [u8], src: Ipv4Addr) -> Option<usize> {
		let len = ETH_HLEN + ARP_LEN;
		let (eth_buf, arp_buf) = buf.get_mut(..len)?.split_at_mut(ETH_HLEN);
		let source_mac = client_mac(src);

		let mut eth_pkt = MutableEthernetPacket::new(eth_buf)?;
		eth_pkt.set_destination(MacAddr::broadcast());
		eth_pkt.set_source(source_mac);
		eth_pkt.set_ethertype(EtherTypes::Arp);

		let mut arp_packet = MutableArpPacket::new(arp_buf)?;
		arp_packet.set_hardware_type(ArpHardwareTypes::Ethernet);
		arp_packet.set_protocol_type(EtherTypes::Ipv4);
		arp_packet.set_hw_addr_len(6);
		arp_packet.set_proto_addr_len(4);
		arp_packet.set_operation(ArpOperations::Request);
		arp_packet.set_sender_hw_addr(source_mac);
		arp_packet.set_sender_proto_addr(src);
		arp_packet.set_target_hw_addr(MacAddr::zero());
		arp_packet.set_target_proto_addr(self.local.ip);
		Some(len)
	}
}

/// Locally administered MAC derived from the client address
fn client_mac(ip: Ipv4Addr) -> MacAddr {
	let o = ip.octets();
	MacAddr::new(0x02, 0x00, o[0], o[1], o[2], o[3])
}
