//! Tests for subnet arithmetic

#[cfg(test)]
mod tests {
    use super::super::*;
    use std::net::Ipv4Addr;

    fn ip(s: &str) -> Ipv4Addr {
        s.parse().unwrap()
    }

    #[test]
    fn test_network_of_normalises_host_bits() {
        let net = network_of(ip("192.168.1.77"), ip("255.255.255.0")).unwrap();
        assert_eq!(net.to_string(), "192.168.1.0/24");
    }

    #[test]
    fn test_network_of_rejects_non_contiguous_mask() {
        assert!(network_of(ip("10.0.0.1"), ip("255.0.255.0")).is_err());
    }

    #[test]
    fn test_cidr_string_default_route() {
        assert_eq!(
            cidr_string(ip("0.0.0.0"), ip("0.0.0.0")).unwrap(),
            "0.0.0.0/0"
        );
    }

    #[test]
    fn test_shared_network_excludes_host_routes_and_loopback() {
        assert!(shared_network(ip("10.0.0.1"), ip("255.255.255.255")).is_none());
        assert!(shared_network(ip("127.0.0.1"), ip("255.0.0.0")).is_none());
        assert_eq!(
            shared_network(ip("10.0.0.1"), ip("255.255.255.252"))
                .unwrap()
                .to_string(),
            "10.0.0.0/30"
        );
    }

    #[test]
    fn test_is_ignored_address() {
        assert!(is_ignored_address(ip("0.0.0.0")));
        assert!(is_ignored_address(ip("127.0.0.5")));
        assert!(!is_ignored_address(ip("10.0.0.2")));
    }

    #[test]
    fn test_parse_root_address() {
        assert_eq!(parse_root_address(" 10.0.0.1 "), Some(ip("10.0.0.1")));
        assert_eq!(parse_root_address("0.0.0.0"), None);
        assert_eq!(parse_root_address("224.0.0.5"), None);
        assert_eq!(parse_root_address("10.0.0.256"), None);
        assert_eq!(parse_root_address("router1"), None);
    }
}
