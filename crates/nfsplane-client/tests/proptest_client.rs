//! Property-based tests for nfsplane-client.
//!
//! Covers retry timeout bounds, mount flag bitmaps and lock record decoding.

use std::time::Duration;

use nfsplane_client::lockd::{LockAnswer, LockNotify};
use nfsplane_client::mount_config::{MountConfig, MountFlag, MountFlags};
use nfsplane_client::RetryPolicy;
use proptest::prelude::*;

fn any_policy() -> impl Strategy<Value = RetryPolicy> {
    (1u64..=60, 1u64..=10, 10u64..=120, 0u32..=20).prop_map(|(initial, min, max, retries)| {
        RetryPolicy {
            initial_timeout: Duration::from_secs(initial),
            min_timeout: Duration::from_secs(min),
            max_timeout: Duration::from_secs(max),
            retry_count: retries,
            ..RetryPolicy::default()
        }
    })
}

fn any_flag() -> impl Strategy<Value = MountFlag> {
    (0usize..MountFlag::ALL.len()).prop_map(|i| MountFlag::ALL[i])
}

proptest! {
    #[test]
    fn attempt_timeout_stays_in_bounds(policy in any_policy(), attempt in 0u32..64, idem in any::<bool>()) {
        let t = policy.attempt_timeout(attempt, idem);
        let floor = if idem {
            policy.min_timeout
        } else {
            policy.min_timeout.max(policy.non_idempotent_min_timeout)
        };
        prop_assert!(t >= floor);
        prop_assert!(t <= policy.max_timeout.max(floor));
    }

    #[test]
    fn attempt_timeout_never_shrinks(policy in any_policy(), attempt in 0u32..63, idem in any::<bool>()) {
        prop_assert!(policy.attempt_timeout(attempt + 1, idem) >= policy.attempt_timeout(attempt, idem));
    }

    #[test]
    fn jukebox_delay_capped(policy in any_policy(), n in 0u32..64) {
        prop_assert!(policy.jukebox_delay(n) <= policy.jukebox_max);
    }

    #[test]
    fn defined_flags_survive_bitmap(flags in proptest::collection::vec(any_flag(), 0..8)) {
        let set = flags.iter().fold(MountFlags::empty(), |acc, f| acc.with(*f));
        let back = MountFlags::from_bitmap(set.to_bitmap()).unwrap();
        for f in &flags {
            prop_assert!(back.contains(*f));
        }
        prop_assert_eq!(back, set);
    }

    #[test]
    fn unknown_flag_bits_rejected(bit in prop_oneof![Just(18u32), 21u32..32]) {
        prop_assert!(MountFlags::from_bitmap(1 << bit).is_err());
    }

    #[test]
    fn attribute_bitmap_only_marks_set_fields(retries in proptest::option::of(0u32..100), ra in proptest::option::of(0u32..200)) {
        let config = MountConfig {
            soft_retry_count: retries,
            readahead: ra,
            ..Default::default()
        };
        let bitmap = config.attribute_bitmap();
        prop_assert_eq!(bitmap[0] & (1 << 18) != 0, retries.is_some());
        prop_assert_eq!(bitmap[0] & (1 << 6) != 0, ra.is_some());
        prop_assert_eq!(bitmap[0] & !((1 << 18) | (1 << 6)), 0);
        prop_assert_eq!(bitmap[1], 0);
    }

    #[test]
    fn readahead_bound_enforced(ra in 0u32..1000) {
        let config = MountConfig {
            readahead: Some(ra),
            ..Default::default()
        };
        prop_assert_eq!(config.resolve().is_ok(), ra <= 128);
    }

    #[test]
    fn lock_records_decode_never_panics(data in proptest::collection::vec(any::<u8>(), 0..256)) {
        let _ = LockAnswer::decode(&data);
        let _ = LockNotify::decode(&data);
    }
}
