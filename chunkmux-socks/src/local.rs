use std::net::IpAddr;

/// Addresses reachable without the relay: loopback, private ranges and
/// link-local.
pub fn is_local(ip: IpAddr) -> bool {
    match ip.to_canonical() {
        IpAddr::V4(v4) => v4.is_loopback() || v4.is_private() || v4.is_link_local(),
        IpAddr::V6(v6) => v6.is_loopback() || v6.is_unicast_link_local() || v6.is_unique_local(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ip(s: &str) -> IpAddr {
        s.parse().unwrap()
    }

    #[test]
    fn test_local_ranges() {
        for local in [
            "127.0.0.1",
            "127.255.0.9",
            "10.1.2.3",
            "172.16.0.1",
            "172.31.255.254",
            "192.168.1.1",
            "169.254.10.10",
            "::1",
            "fe80::1",
            "fd12:3456::1",
            "::ffff:192.168.0.5",
        ] {
            assert!(is_local(ip(local)), "{local} should be local");
        }
    }

    #[test]
    fn test_public_addresses() {
        for public in ["8.8.8.8", "172.32.0.1", "203.0.113.5", "2001:db8::1", "::ffff:1.1.1.1"] {
            assert!(!is_local(ip(public)), "{public} should not be local");
        }
    }
}
