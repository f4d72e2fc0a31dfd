use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use log::debug;

/// Most recent distance reading for one area.
#[derive(Debug, Clone, PartialEq)]
pub struct AreaSample {
    pub area_id: String,
    pub distance: f64,
    pub observed_at: Instant,
    /// Older than the soft timeout but still used for resolution.
    pub expired: bool,
}

impl AreaSample {
    pub fn age(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.observed_at)
    }
}

/// Latest reading per area for a single tracked device. Keyed by area id so
/// iteration order is stable.
#[derive(Debug, Default)]
pub struct SampleStore {
    samples: BTreeMap<String, AreaSample>,
    changed: bool,
    purge_on_update: bool,
}

impl SampleStore {
    pub fn new(purge_on_update: bool) -> Self {
        SampleStore {
            samples: BTreeMap::new(),
            changed: false,
            purge_on_update,
        }
    }

    pub fn record(&mut self, area_id: &str, distance: f64, now: Instant) {
        self.samples.insert(
            area_id.to_string(),
            AreaSample {
                area_id: area_id.to_string(),
                distance,
                observed_at: now,
                expired: false,
            },
        );
        self.changed = true;
    }

    /// Samples usable for resolution at `now`.
    ///
    /// Anything older than `soft_timeout` is marked expired. An expired sample
    /// is purged once it is older than `hard_timeout`, or, when purging on
    /// update is enabled, as soon as a new reading has been recorded since the
    /// last call. Clears the changed flag.
    pub fn valid_samples(
        &mut self,
        now: Instant,
        soft_timeout: Duration,
        hard_timeout: Duration,
    ) -> Vec<AreaSample> {
        let purge_expired = self.purge_on_update && self.changed;

        self.samples.retain(|area_id, sample| {
            let age = sample.age(now);
            if age > hard_timeout {
                debug!("Dropping sample for {area_id}, older than {hard_timeout:?}");
                return false;
            }
            if age <= soft_timeout {
                return true;
            }
            sample.expired = true;
            if purge_expired {
                debug!("Invalidating expired sample for {area_id} (age {age:?}) after update");
                return false;
            }
            true
        });
        self.changed = false;

        self.samples.values().cloned().collect()
    }

    pub fn clear(&mut self) {
        self.samples.clear();
        self.changed = false;
    }
}
