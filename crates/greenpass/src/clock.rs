//! Clock deviation between the device and the servers it talks to.
//!
//! Every server response that carries a reference time is fed to
//! [`ClockDeviationDetector::observe`]. The detector is advisory: it drives
//! a dashboard banner and, when correction is enabled, shifts the "now"
//! used for validity checks. It never blocks issuance.

use std::sync::{Mutex, MutexGuard};

use greenpass_core::Timestamp;
use tracing::{info, warn};

use crate::config::ClockConfig;

pub struct ClockDeviationDetector {
    tolerance_seconds: u64,
    correct_deviation: bool,
    /// `server - local` in seconds from the latest observation.
    offset: Mutex<Option<i64>>,
}

impl ClockDeviationDetector {
    pub fn new(tolerance_seconds: u64, correct_deviation: bool) -> Self {
        Self {
            tolerance_seconds,
            correct_deviation,
            offset: Mutex::new(None),
        }
    }

    pub fn from_config(config: &ClockConfig) -> Self {
        Self::new(config.deviation_tolerance_seconds, config.correct_deviation)
    }

    fn offset(&self) -> MutexGuard<'_, Option<i64>> {
        // Single Option<i64>; a poisoned guard still holds a whole value.
        self.offset.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Record a server-asserted time next to the local time it was received at.
    pub fn observe(&self, server_time: Timestamp, local_time: Timestamp) {
        let offset = local_time.seconds_until(&server_time);
        let deviates = offset.unsigned_abs() > self.tolerance_seconds;
        let previous = self.offset().replace(offset);
        let deviated_before = previous
            .map(|p| p.unsigned_abs() > self.tolerance_seconds)
            .unwrap_or(false);

        if deviates && !deviated_before {
            warn!(
                offset_seconds = offset,
                tolerance_seconds = self.tolerance_seconds,
                "clock deviation detected"
            );
        } else if !deviates && deviated_before {
            info!(offset_seconds = offset, "clock deviation resolved");
        }
    }

    /// `|local - server| > tolerance` for the latest observation.
    pub fn has_deviation(&self) -> bool {
        self.offset()
            .map(|o| o.unsigned_abs() > self.tolerance_seconds)
            .unwrap_or(false)
    }

    /// Latest `server - local` offset, 0 before any observation.
    pub fn server_offset_seconds(&self) -> i64 {
        self.offset().unwrap_or(0)
    }

    pub fn tolerance_seconds(&self) -> u64 {
        self.tolerance_seconds
    }

    /// The instant validity windows are evaluated at.
    pub fn validity_now(&self, local_now: Timestamp) -> Timestamp {
        if self.correct_deviation {
            local_now.plus_seconds(self.server_offset_seconds())
        } else {
            local_now
        }
    }
}
