//! Link-layer correlation over ARP.
//!
//! Broadcasts one ARP request per host of the subnet on the interface that
//! owns it, collects replies for a fixed window, and maps each replying
//! address to its hardware address and vendor.

use std::collections::HashMap;
use std::io;
use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use ipnet::{IpNet, Ipv4Net};
use pnet::datalink::{self, Channel, NetworkInterface};
use pnet::ipnetwork::IpNetwork;
use pnet::packet::arp::{ArpHardwareTypes, ArpOperations, ArpPacket, MutableArpPacket};
use pnet::packet::ethernet::{EtherTypes, EthernetPacket, MutableEthernetPacket};
use pnet::packet::Packet;
use pnet::util::MacAddr;

use netwatch_core::MacAddress;

use crate::error::{DiscoverError, Result};
use crate::vendor::VendorTable;

const ETH_HDR_LEN: usize = 14;
const ARP_LEN: usize = 28;
const READ_TIMEOUT: Duration = Duration::from_millis(100);

/// Broadcast resolution transport.
#[async_trait]
pub trait LinkLayer: Send + Sync {
    /// Resolve hardware addresses of every host in `subnet` that answers
    /// within `window`.
    async fn resolve(&self, subnet: IpNet, window: Duration) -> Result<Vec<(IpAddr, MacAddress)>>;
}

/// Link-layer identity of one responding address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkEntry {
    pub mac: MacAddress,
    pub vendor: String,
}

pub struct LinkLayerCorrelator {
    link: Arc<dyn LinkLayer>,
    vendors: Arc<VendorTable>,
    window: Duration,
}

impl LinkLayerCorrelator {
    pub fn new(link: Arc<dyn LinkLayer>, vendors: Arc<VendorTable>, window: Duration) -> Self {
        Self {
            link,
            vendors,
            window,
        }
    }

    /// Address → hardware id and vendor. Transport failures degrade to an
    /// empty map.
    pub async fn correlate(&self, subnet: IpNet) -> HashMap<IpAddr, LinkEntry> {
        let replies = match self.link.resolve(subnet, self.window).await {
            Ok(replies) => replies,
            Err(e) => {
                tracing::warn!(subnet = %subnet, error = %e, "Link-layer resolution failed");
                return HashMap::new();
            }
        };

        let entries: HashMap<IpAddr, LinkEntry> = replies
            .into_iter()
            .map(|(address, mac)| {
                let vendor = self.vendors.vendor_or_unknown(&mac);
                (address, LinkEntry { mac, vendor })
            })
            .collect();

        tracing::debug!(subnet = %subnet, resolved = entries.len(), "Link-layer resolution finished");
        entries
    }
}

/// ARP over a raw datalink channel. Needs CAP_NET_RAW or root.
#[derive(Debug, Default, Clone)]
pub struct ArpTransport;

#[async_trait]
impl LinkLayer for ArpTransport {
    async fn resolve(&self, subnet: IpNet, window: Duration) -> Result<Vec<(IpAddr, MacAddress)>> {
        let IpNet::V4(net) = subnet else {
            tracing::debug!(subnet = %subnet, "ARP does not apply to IPv6 subnets");
            return Ok(Vec::new());
        };

        tokio::task::spawn_blocking(move || arp_sweep(net, window))
            .await
            .map_err(|e| DiscoverError::Link(e.to_string()))?
    }
}

fn arp_sweep(net: Ipv4Net, window: Duration) -> Result<Vec<(IpAddr, MacAddress)>> {
    let (iface, src_ip) = interface_for(net)?;
    let src_mac = iface
        .mac
        .ok_or_else(|| DiscoverError::Link(format!("{} has no hardware address", iface.name)))?;

    let config = datalink::Config {
        read_timeout: Some(READ_TIMEOUT),
        ..Default::default()
    };
    let (mut tx, mut rx) = match datalink::channel(&iface, config)? {
        Channel::Ethernet(tx, rx) => (tx, rx),
        _ => return Err(DiscoverError::Link("unsupported datalink channel".to_string())),
    };

    for target in net.hosts() {
        let frame = build_arp_request(src_mac, src_ip, target);
        if let Some(Err(e)) = tx.send_to(&frame, None) {
            tracing::debug!(target = %target, error = %e, "ARP request not sent");
        }
    }

    let deadline = Instant::now() + window;
    let mut found: HashMap<Ipv4Addr, MacAddress> = HashMap::new();
    while Instant::now() < deadline {
        match rx.next() {
            Ok(frame) => {
                if let Some((ip, mac)) = parse_arp_reply(frame) {
                    if net.contains(&ip) {
                        found.insert(ip, mac);
                    }
                }
            }
            Err(e) if matches!(e.kind(), io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock) => {}
            Err(e) => return Err(e.into()),
        }
    }

    Ok(found
        .into_iter()
        .map(|(ip, mac)| (IpAddr::V4(ip), mac))
        .collect())
}

/// The up, non-loopback interface whose IPv4 network covers `net`, with its
/// own address on that network.
fn interface_for(net: Ipv4Net) -> Result<(NetworkInterface, Ipv4Addr)> {
    datalink::interfaces()
        .into_iter()
        .filter(|iface| iface.is_up() && !iface.is_loopback())
        .find_map(|iface| {
            let src = iface.ips.iter().find_map(|ip| match ip {
                IpNetwork::V4(v4) if v4.contains(net.network()) => Some(v4.ip()),
                _ => None,
            })?;
            Some((iface, src))
        })
        .ok_or_else(|| DiscoverError::NoInterface {
            subnet: net.to_string(),
        })
}

/// Broadcast Ethernet frame carrying an ARP who-has for `target`.
pub fn build_arp_request(src_mac: MacAddr, src_ip: Ipv4Addr, target: Ipv4Addr) -> Vec<u8> {
    let mut buffer = vec![0u8; ETH_HDR_LEN + ARP_LEN];
    if let Some(mut eth) = MutableEthernetPacket::new(&mut buffer) {
        eth.set_destination(MacAddr::broadcast());
        eth.set_source(src_mac);
        eth.set_ethertype(EtherTypes::Arp);
    }
    if let Some(mut arp) = MutableArpPacket::new(&mut buffer[ETH_HDR_LEN..]) {
        arp.set_hardware_type(ArpHardwareTypes::Ethernet);
        arp.set_protocol_type(EtherTypes::Ipv4);
        arp.set_hw_addr_len(6);
        arp.set_proto_addr_len(4);
        arp.set_operation(ArpOperations::Request);
        arp.set_sender_hw_addr(src_mac);
        arp.set_sender_proto_addr(src_ip);
        arp.set_target_hw_addr(MacAddr::zero());
        arp.set_target_proto_addr(target);
    }
    buffer
}

/// Sender address and hardware id of an ARP reply frame, if it is one.
pub fn parse_arp_reply(frame: &[u8]) -> Option<(Ipv4Addr, MacAddress)> {
    let eth = EthernetPacket::new(frame)?;
    if eth.get_ethertype() != EtherTypes::Arp {
        return None;
    }
    let arp = ArpPacket::new(eth.payload())?;
    if arp.get_operation() != ArpOperations::Reply {
        return None;
    }
    let MacAddr(a, b, c, d, e, f) = arp.get_sender_hw_addr();
    Some((arp.get_sender_proto_addr(), MacAddress([a, b, c, d, e, f])))
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedLink(Vec<(IpAddr, MacAddress)>);

    #[async_trait]
    impl LinkLayer for FixedLink {
        async fn resolve(&self, _: IpNet, _: Duration) -> Result<Vec<(IpAddr, MacAddress)>> {
            Ok(self.0.clone())
        }
    }

    struct BrokenLink;

    #[async_trait]
    impl LinkLayer for BrokenLink {
        async fn resolve(&self, subnet: IpNet, _: Duration) -> Result<Vec<(IpAddr, MacAddress)>> {
            Err(DiscoverError::NoInterface {
                subnet: subnet.to_string(),
            })
        }
    }

    fn reply_frame(sender_ip: Ipv4Addr, sender_mac: MacAddr) -> Vec<u8> {
        let mut frame = build_arp_request(sender_mac, sender_ip, Ipv4Addr::new(10, 0, 0, 100));
        let mut arp = MutableArpPacket::new(&mut frame[ETH_HDR_LEN..]).unwrap();
        arp.set_operation(ArpOperations::Reply);
        frame
    }

    #[test]
    fn test_build_arp_request() {
        let src_mac = MacAddr::new(0x02, 0x00, 0x00, 0x00, 0x00, 0x01);
        let frame = build_arp_request(src_mac, Ipv4Addr::new(10, 0, 0, 100), Ipv4Addr::new(10, 0, 0, 1));

        let eth = EthernetPacket::new(&frame).unwrap();
        assert_eq!(eth.get_destination(), MacAddr::broadcast());
        assert_eq!(eth.get_source(), src_mac);
        assert_eq!(eth.get_ethertype(), EtherTypes::Arp);

        let arp = ArpPacket::new(eth.payload()).unwrap();
        assert_eq!(arp.get_operation(), ArpOperations::Request);
        assert_eq!(arp.get_target_proto_addr(), Ipv4Addr::new(10, 0, 0, 1));
        assert_eq!(arp.get_sender_proto_addr(), Ipv4Addr::new(10, 0, 0, 100));
    }

    #[test]
    fn test_parse_arp_reply() {
        let frame = reply_frame(
            Ipv4Addr::new(10, 0, 0, 1),
            MacAddr::new(0xaa, 0xbb, 0xcc, 0x00, 0x11, 0x22),
        );
        let (ip, mac) = parse_arp_reply(&frame).unwrap();
        assert_eq!(ip, Ipv4Addr::new(10, 0, 0, 1));
        assert_eq!(mac.to_string(), "aa:bb:cc:00:11:22");
    }

    #[test]
    fn test_parse_ignores_requests_and_runts() {
        let request = build_arp_request(
            MacAddr::new(0xaa, 0xbb, 0xcc, 0x00, 0x11, 0x22),
            Ipv4Addr::new(10, 0, 0, 1),
            Ipv4Addr::new(10, 0, 0, 2),
        );
        assert!(parse_arp_reply(&request).is_none());
        assert!(parse_arp_reply(&request[..ETH_HDR_LEN + 4]).is_none());
    }

    #[tokio::test]
    async fn test_correlate_resolves_vendors() {
        let link = FixedLink(vec![
            ("10.0.0.1".parse().unwrap(), "00:50:56:01:02:03".parse().unwrap()),
            ("10.0.0.2".parse().unwrap(), "aa:bb:cc:00:11:22".parse().unwrap()),
        ]);
        let correlator = LinkLayerCorrelator::new(
            Arc::new(link),
            Arc::new(VendorTable::builtin()),
            Duration::from_millis(10),
        );
        let entries = correlator.correlate("10.0.0.0/30".parse().unwrap()).await;

        let first: IpAddr = "10.0.0.1".parse().unwrap();
        let second: IpAddr = "10.0.0.2".parse().unwrap();
        assert_eq!(entries[&first].vendor, "VMware");
        assert_eq!(entries[&second].vendor, "Unknown");
    }

    #[tokio::test]
    async fn test_correlate_degrades_to_empty() {
        let correlator = LinkLayerCorrelator::new(
            Arc::new(BrokenLink),
            Arc::new(VendorTable::builtin()),
            Duration::from_millis(10),
        );
        assert!(correlator.correlate("10.0.0.0/30".parse().unwrap()).await.is_empty());
    }
}
