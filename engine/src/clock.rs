//! Hybrid logical clock for causal ordering across devices with skewed wall clocks.
//!
//! Combines physical time with a logical counter so that two events with the
//! same physical millisecond still get a total, tie-broken order, and so that
//! an event that causally follows another always compares greater even if the
//! follower's wall clock is briefly behind.

use crate::DeviceId;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// A hybrid logical clock reading, scoped to the device that produced it.
///
/// Ordering rules:
/// 1. Higher physical time wins.
/// 2. If physical time is equal, higher logical counter wins.
/// 3. If both are equal, lexicographically higher `device_id` wins.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Hlc {
    /// Device-local or server-local physical time, milliseconds since epoch.
    pub physical: u64,
    /// Logical counter, broken ties within the same physical millisecond.
    pub logical: u32,
    /// The device (or server node) that stamped this reading.
    pub device_id: DeviceId,
}

impl Hlc {
    /// Create a reading at the given physical time, logical counter zero.
    pub fn new(device_id: impl Into<DeviceId>, physical: u64) -> Self {
        Self {
            physical,
            logical: 0,
            device_id: device_id.into(),
        }
    }

    /// Construct an explicit reading; used by tests and wire deserialization.
    pub fn with_logical(device_id: impl Into<DeviceId>, physical: u64, logical: u32) -> Self {
        Self {
            physical,
            logical,
            device_id: device_id.into(),
        }
    }

    /// Advance this clock given the current physical time, preserving
    /// monotonicity even if `physical_now` regresses relative to the last
    /// reading (a clock that went backwards due to NTP skew).
    pub fn tick(&mut self, physical_now: u64) {
        if physical_now > self.physical {
            self.physical = physical_now;
            self.logical = 0;
        } else {
            self.logical += 1;
        }
    }

    /// Merge in a remote reading, the way a device does on receiving a
    /// causally-prior event: the result is always >= both inputs.
    pub fn merge(&mut self, other: &Hlc, physical_now: u64) {
        let max_physical = physical_now.max(self.physical).max(other.physical);
        let logical = if max_physical == self.physical && max_physical == other.physical {
            self.logical.max(other.logical) + 1
        } else if max_physical == self.physical {
            self.logical + 1
        } else if max_physical == other.physical {
            other.logical + 1
        } else {
            0
        };
        self.physical = max_physical;
        self.logical = logical;
    }

    /// True if `self` strictly precedes `other` in the total order.
    pub fn happened_before(&self, other: &Self) -> bool {
        self < other
    }
}

impl Ord for Hlc {
    fn cmp(&self, other: &Self) -> Ordering {
        match self.physical.cmp(&other.physical) {
            Ordering::Equal => match self.logical.cmp(&other.logical) {
                Ordering::Equal => self.device_id.cmp(&other.device_id),
                other => other,
            },
            other => other,
        }
    }
}

impl PartialOrd for Hlc {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_starts_at_logical_zero() {
        let hlc = Hlc::new("device-1", 1000);
        assert_eq!(hlc.logical, 0);
        assert_eq!(hlc.physical, 1000);
    }

    #[test]
    fn tick_advances_physical_and_resets_logical() {
        let mut hlc = Hlc::new("device-1", 1000);
        hlc.tick(1001);
        assert_eq!(hlc.physical, 1001);
        assert_eq!(hlc.logical, 0);
    }

    #[test]
    fn tick_bumps_logical_when_physical_does_not_advance() {
        let mut hlc = Hlc::new("device-1", 1000);
        hlc.tick(1000);
        assert_eq!(hlc.physical, 1000);
        assert_eq!(hlc.logical, 1);
        hlc.tick(999); // clock regression, still bumps logical
        assert_eq!(hlc.physical, 1000);
        assert_eq!(hlc.logical, 2);
    }

    #[test]
    fn merge_takes_max_physical_and_bumps_logical() {
        let mut local = Hlc::new("device-1", 1000);
        let remote = Hlc::with_logical("device-2", 1005, 3);
        local.merge(&remote, 999);
        assert_eq!(local.physical, 1005);
        assert_eq!(local.logical, 4);
    }

    #[test]
    fn merge_prefers_physical_now_when_it_leads_both() {
        let mut local = Hlc::new("device-1", 1000);
        let remote = Hlc::new("device-2", 1000);
        local.merge(&remote, 2000);
        assert_eq!(local.physical, 2000);
        assert_eq!(local.logical, 0);
    }

    #[test]
    fn ordering_by_physical_time() {
        let a = Hlc::new("device-a", 100);
        let b = Hlc::new("device-b", 200);
        assert!(a < b);
    }

    #[test]
    fn ordering_by_logical_when_physical_equal() {
        let a = Hlc::with_logical("device-a", 100, 1);
        let b = Hlc::with_logical("device-a", 100, 2);
        assert!(a < b);
    }

    #[test]
    fn ordering_by_device_id_when_physical_and_logical_equal() {
        let a = Hlc::with_logical("device-a", 100, 1);
        let b = Hlc::with_logical("device-b", 100, 1);
        assert!(a < b);
    }

    #[test]
    fn happened_before() {
        let a = Hlc::new("device-a", 100);
        let b = Hlc::new("device-b", 200);
        assert!(a.happened_before(&b));
        assert!(!b.happened_before(&a));
    }

    #[test]
    fn serialization_roundtrip() {
        let hlc = Hlc::with_logical("device-123", 42, 7);
        let json = serde_json::to_string(&hlc).unwrap();
        let parsed: Hlc = serde_json::from_str(&json).unwrap();
        assert_eq!(hlc, parsed);
    }

    #[test]
    fn serialization_format() {
        let hlc = Hlc::new("device-1", 10);
        let json = serde_json::to_string(&hlc).unwrap();
        assert!(json.contains("deviceId")); // camelCase
        assert!(json.contains("physical"));
        assert!(json.contains("logical"));
    }
}
