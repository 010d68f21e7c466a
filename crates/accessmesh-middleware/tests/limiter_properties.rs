//! Token bucket properties.

use accessmesh_core::Timestamp;
use accessmesh_middleware::{LimiterConfig, RateLimiter};
use chrono::{TimeZone, Utc};
use proptest::prelude::*;
use std::time::Duration;

fn t0() -> Timestamp {
    Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
}

proptest! {
    #[test]
    fn capacity_then_one_per_refill_interval(
        capacity in 1u32..64,
        // Powers of two keep 1/R exact in binary floating point.
        rate in prop::sample::select(vec![0.25f64, 0.5, 1.0, 2.0, 4.0, 8.0]),
        key in "[a-z]{1,8}",
    ) {
        let limiter = RateLimiter::new(LimiterConfig {
            capacity,
            refill_per_second: rate,
            idle_timeout: Duration::from_secs(3600),
        })
        .unwrap();

        for _ in 0..capacity {
            prop_assert!(limiter.admit(&key, t0()));
        }
        prop_assert!(!limiter.admit(&key, t0()));

        let interval = chrono::Duration::from_std(Duration::from_secs_f64(1.0 / rate)).unwrap();
        let later = t0() + interval;
        prop_assert!(limiter.admit(&key, later));
        prop_assert!(!limiter.admit(&key, later));
    }

    #[test]
    fn remaining_never_exceeds_capacity(
        capacity in 1u32..32,
        gaps_ms in prop::collection::vec(0i64..5_000, 1..40),
    ) {
        let limiter = RateLimiter::new(LimiterConfig {
            capacity,
            refill_per_second: 1.0,
            idle_timeout: Duration::from_secs(3600),
        })
        .unwrap();

        let mut now = t0();
        for gap in gaps_ms {
            now += chrono::Duration::milliseconds(gap);
            let admission = limiter.check("k", now);
            prop_assert!(admission.remaining < capacity);
            if !admission.allowed {
                prop_assert!(admission.retry_after > Duration::ZERO);
            }
        }
    }
}
