//! Outbound interface and LAN address selection.

use anyhow::{anyhow, Result};
use if_addrs::get_if_addrs;
use local_ip_address::local_ip;
use log::{debug, warn};
use std::net::IpAddr;

/// Resolve the address the server binds and advertises.
///
/// When `interface` names an interface, the first usable address on it wins.
/// Otherwise a private IPv4 address is preferred, then any non-loopback IPv4,
/// with the system default-route address as a last resort.
pub fn lan_ip(interface: Option<&str>) -> Result<IpAddr> {
    let mut candidates = Vec::new();
    match get_if_addrs() {
        Ok(ifaces) => {
            for ifa in ifaces {
                let ip = ifa.ip();
                if ip.is_unspecified() || ip.is_multicast() {
                    continue;
                }
                debug!("interface {}: {}", ifa.name, ip);
                candidates.push((ifa.name.clone(), ip));
            }
        }
        Err(e) => warn!("failed to enumerate network interfaces: {}", e),
    }

    match pick_lan_ip(&candidates, interface) {
        Ok(ip) => Ok(ip),
        // No named interface requested: let the OS routing table decide.
        Err(e) if interface.is_none() => local_ip()
            .map_err(|route_err| anyhow!("no usable LAN address: {}; {}", e, route_err)),
        Err(e) => Err(e),
    }
}

/// Pure selection over enumerated `(name, address)` pairs.
fn pick_lan_ip(candidates: &[(String, IpAddr)], interface: Option<&str>) -> Result<IpAddr> {
    if let Some(name) = interface {
        let on_iface: Vec<IpAddr> = candidates
            .iter()
            .filter(|(n, _)| n == name)
            .map(|(_, ip)| *ip)
            .collect();
        return on_iface
            .iter()
            .find(|ip| ip.is_ipv4())
            .or_else(|| on_iface.first())
            .copied()
            .ok_or_else(|| anyhow!("interface '{}' has no usable address", name));
    }

    let ipv4s: Vec<IpAddr> = candidates
        .iter()
        .map(|(_, ip)| *ip)
        .filter(|ip| !ip.is_loopback())
        .filter(|ip| ip.is_ipv4())
        .collect();

    ipv4s
        .iter()
        .find(|ip| match ip {
            IpAddr::V4(v4) => v4.is_private(),
            IpAddr::V6(_) => false,
        })
        .or_else(|| ipv4s.first())
        .copied()
        .ok_or_else(|| anyhow!("no non-loopback IPv4 address found"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addrs(pairs: &[(&str, &str)]) -> Vec<(String, IpAddr)> {
        pairs
            .iter()
            .map(|(name, ip)| (name.to_string(), ip.parse().unwrap()))
            .collect()
    }

    #[test]
    fn prefers_private_ipv4() {
        let candidates = addrs(&[("eth0", "8.8.8.8"), ("eth1", "192.168.1.5")]);
        assert_eq!(
            pick_lan_ip(&candidates, None).unwrap(),
            "192.168.1.5".parse::<IpAddr>().unwrap()
        );
    }

    #[test]
    fn skips_loopback() {
        let candidates = addrs(&[("lo", "127.0.0.1"), ("wlan0", "10.0.0.12")]);
        assert_eq!(
            pick_lan_ip(&candidates, None).unwrap(),
            "10.0.0.12".parse::<IpAddr>().unwrap()
        );
    }

    #[test]
    fn named_interface_wins() {
        let candidates = addrs(&[("eth0", "192.168.1.5"), ("eth1", "172.20.3.4")]);
        assert_eq!(
            pick_lan_ip(&candidates, Some("eth1")).unwrap(),
            "172.20.3.4".parse::<IpAddr>().unwrap()
        );
    }

    #[test]
    fn named_interface_prefers_ipv4() {
        let candidates = addrs(&[("eth0", "fe80::1"), ("eth0", "10.0.0.7")]);
        assert_eq!(
            pick_lan_ip(&candidates, Some("eth0")).unwrap(),
            "10.0.0.7".parse::<IpAddr>().unwrap()
        );
    }

    #[test]
    fn unknown_interface_is_an_error() {
        let candidates = addrs(&[("eth0", "192.168.1.5")]);
        assert!(pick_lan_ip(&candidates, Some("tun9")).is_err());
    }

    #[test]
    fn no_candidates_is_an_error() {
        assert!(pick_lan_ip(&[], None).is_err());
    }
}
