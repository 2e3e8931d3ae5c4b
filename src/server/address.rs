//! Private/public classification of the connecting peer, grounded on
//! `server/Address.cpp`. An IPv4 peer is classified against the configured
//! CIDR list directly; an IPv4-mapped IPv6 peer is unwrapped first.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

#[derive(Debug, Clone)]
pub struct CidrBlock {
    addr: IpAddr,
    prefix: u8,
}

impl CidrBlock {
    pub fn parse(s: &str) -> Result<Self, String> {
        let (addr_part, prefix_part) = s
            .split_once('/')
            .ok_or_else(|| format!("missing prefix length in {s:?}"))?;
        let addr: IpAddr = addr_part.parse().map_err(|_| format!("bad address in {s:?}"))?;
        let prefix: u8 = prefix_part.parse().map_err(|_| format!("bad prefix in {s:?}"))?;
        Ok(CidrBlock { addr, prefix })
    }

    pub fn contains(&self, ip: &IpAddr) -> bool {
        match (self.addr, normalize(ip)) {
            (IpAddr::V4(net), IpAddr::V4(ip)) => {
                let mask = v4_mask(self.prefix);
                (u32::from(net) & mask) == (u32::from(ip) & mask)
            }
            (IpAddr::V6(net), IpAddr::V6(ip)) => {
                let mask = v6_mask(self.prefix);
                (u128::from(net) & mask) == (u128::from(ip) & mask)
            }
            _ => false,
        }
    }
}

fn normalize(ip: &IpAddr) -> IpAddr {
    match ip {
        IpAddr::V6(v6) => v6.to_ipv4_mapped().map(IpAddr::V4).unwrap_or(*ip),
        other => *other,
    }
}

fn v4_mask(prefix: u8) -> u32 {
    if prefix == 0 {
        0
    } else {
        u32::MAX << (32 - prefix as u32)
    }
}

fn v6_mask(prefix: u8) -> u128 {
    if prefix == 0 {
        0
    } else {
        u128::MAX << (128 - prefix as u32)
    }
}

/// RFC1918 + loopback + link-local + unique-local defaults.
pub fn default_private_networks() -> Vec<CidrBlock> {
    [
        "10.0.0.0/8",
        "172.16.0.0/12",
        "192.168.0.0/16",
        "127.0.0.0/8",
        "169.254.0.0/16",
        "::1/128",
        "fc00::/7",
        "fe80::/10",
    ]
    .iter()
    .map(|s| CidrBlock::parse(s).unwrap())
    .collect()
}

pub fn is_private(ip: &IpAddr, networks: &[CidrBlock]) -> bool {
    networks.iter().any(|n| n.contains(ip))
}

#[allow(dead_code)]
pub const LOOPBACK_V4: Ipv4Addr = Ipv4Addr::LOCALHOST;
#[allow(dead_code)]
pub const LOOPBACK_V6: Ipv6Addr = Ipv6Addr::LOCALHOST;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_rfc1918() {
        let nets = default_private_networks();
        assert!(is_private(&"192.168.1.5".parse().unwrap(), &nets));
        assert!(is_private(&"10.1.2.3".parse().unwrap(), &nets));
        assert!(!is_private(&"8.8.8.8".parse().unwrap(), &nets));
    }

    #[test]
    fn classifies_ipv4_mapped_v6() {
        let nets = default_private_networks();
        let ip: IpAddr = "::ffff:192.168.1.5".parse().unwrap();
        assert!(is_private(&ip, &nets));
    }

    #[test]
    fn classifies_loopback() {
        let nets = default_private_networks();
        assert!(is_private(&"127.0.0.1".parse().unwrap(), &nets));
        assert!(is_private(&"::1".parse().unwrap(), &nets));
    }
}
