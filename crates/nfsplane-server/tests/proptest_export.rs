//! Property-based tests for net rule matching.

use std::net::{IpAddr, Ipv4Addr};

use nfsplane_server::NetRule;
use proptest::prelude::*;

fn mask_of(prefix: u32) -> u32 {
    if prefix == 0 {
        0
    } else {
        u32::MAX << (32 - prefix)
    }
}

fn rule(base: u32, prefix: u32) -> NetRule {
    NetRule::new(
        IpAddr::V4(Ipv4Addr::from(base)),
        IpAddr::V4(Ipv4Addr::from(mask_of(prefix))),
    )
}

proptest! {
    #[test]
    fn test_network_address_matches(base in any::<u32>(), prefix in 0u32..=32) {
        let r = rule(base, prefix);
        prop_assert!(r.validate().is_ok());
        let network = base & mask_of(prefix);
        prop_assert!(r.matches(IpAddr::V4(Ipv4Addr::from(network))));
    }

    #[test]
    fn test_host_bits_ignored(base in any::<u32>(), prefix in 0u32..=32, host in any::<u32>()) {
        let mask = mask_of(prefix);
        let client = (base & mask) | (host & !mask);
        prop_assert!(rule(base, prefix).matches(IpAddr::V4(Ipv4Addr::from(client))));
    }

    #[test]
    fn test_network_bit_flip_rejected(base in any::<u32>(), prefix in 1u32..=32, bit in 0u32..32) {
        let mask = mask_of(prefix);
        prop_assume!(mask & (1 << bit) != 0);
        let client = (base & mask) ^ (1 << bit);
        prop_assert!(!rule(base, prefix).matches(IpAddr::V4(Ipv4Addr::from(client))));
    }

    #[test]
    fn test_parse_cidr_agrees(a in any::<u32>(), prefix in 0u32..=32) {
        let text = format!("{}/{}", Ipv4Addr::from(a), prefix);
        let parsed = NetRule::parse_cidr(&text).unwrap();
        prop_assert_eq!(parsed.prefix_len(), prefix);
        prop_assert_eq!(parsed.mask, IpAddr::V4(Ipv4Addr::from(mask_of(prefix))));
    }
}
