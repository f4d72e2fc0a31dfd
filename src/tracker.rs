use std::collections::{BTreeMap, HashMap};
use std::time::Instant;

use log::{debug, warn};

use crate::config::{AreaConfig, TrackerConfig};
use crate::error::RoomError;
use crate::geometry::AreaGeometry;
use crate::hysteresis::HysteresisTracker;
use crate::messages::{DistanceMessage, RoomAttributes, RoomState};
use crate::resolver;
use crate::samples::{AreaSample, SampleStore};

/// All state for one tracked device. Owned by a single task; every mutation
/// goes through `handle_message` or `recompute`.
pub struct RoomTracker {
    config: TrackerConfig,
    geometries: BTreeMap<String, AreaGeometry>,
    icons: HashMap<String, String>,
    samples: SampleStore,
    hysteresis: HysteresisTracker,
}

impl RoomTracker {
    pub fn new(config: TrackerConfig, areas: &[AreaConfig]) -> Self {
        let mut geometries = BTreeMap::new();
        let mut icons = HashMap::new();

        for area in areas {
            if let Some(icon) = &area.icon {
                icons.insert(area.id.clone(), icon.clone());
            }
            match AreaGeometry::from_config(area) {
                Ok(Some(geometry)) => {
                    geometries.insert(area.id.clone(), geometry);
                }
                Ok(None) => {}
                Err(err) => warn!(
                    "Ignoring geometry of {}: {err}",
                    area.name.as_deref().unwrap_or(&area.id)
                ),
            }
        }
        debug!(
            "Tracker {} with {} areas, {} with geometry",
            config.name,
            areas.len(),
            geometries.len()
        );

        RoomTracker {
            samples: SampleStore::new(config.purge_on_update()),
            hysteresis: HysteresisTracker::new(config.room_change(), config.room_away()),
            config,
            geometries,
            icons,
        }
    }

    pub fn config(&self) -> &TrackerConfig {
        &self.config
    }

    /// Records a distance message and recomputes. Returns `None` when the
    /// area is filtered out. Errors leave the state untouched.
    pub fn handle_message(
        &mut self,
        topic: &str,
        payload: &[u8],
        now: Instant,
    ) -> Result<Option<RoomState>, RoomError> {
        let area_id = self.area_from_topic(topic)?;

        if !self.config.accepts_area(area_id) {
            debug!("Skipping area {area_id}, not in {:?}", self.config.area_ids);
            return Ok(None);
        }

        let message: DistanceMessage = serde_json::from_slice(payload)
            .map_err(|err| RoomError::input(topic, err.to_string()))?;
        if !message.distance.is_finite() || message.distance < 0.0 {
            return Err(RoomError::input(
                topic,
                format!("invalid distance {}", message.distance),
            ));
        }

        debug!("Distance to {area_id}: {}", message.distance);
        self.samples.record(area_id, message.distance, now);

        Ok(Some(self.recompute(now)))
    }

    pub fn recompute(&mut self, now: Instant) -> RoomState {
        let room_away = self.config.room_away();
        let samples: Vec<AreaSample> = self
            .samples
            .valid_samples(
                now,
                self.config.sample_timeout(),
                self.config.sample_hard_timeout(),
            )
            .into_iter()
            .filter(|s| s.age(now) <= room_away)
            .collect();

        let decision = resolver::resolve(&samples, &self.geometries, now);
        debug!(
            "Resolved {:?} ({:?}) from {} samples, {} expired",
            decision.area_id,
            decision.distance,
            samples.len(),
            samples.iter().filter(|s| s.expired).count()
        );
        if !self.hysteresis.advance(decision, now) {
            debug!("Hysteresis: {:?}", self.hysteresis.phase());
        }

        self.state(now)
    }

    pub fn state(&self, now: Instant) -> RoomState {
        let current = self.hysteresis.current(now);
        let area_id = current.and_then(|c| c.area_id.clone());
        let distance = current.and_then(|c| c.distance);

        let mut attributes = RoomAttributes {
            distance,
            area_id: area_id.clone(),
            ..Default::default()
        };
        if let Some(geometry) = area_id.as_ref().and_then(|id| self.geometries.get(id)) {
            attributes.x_coordinates = Some(geometry.point());
            attributes.x_radius = distance;
        }

        let icon = if self.config.set_icon {
            area_id.as_ref().and_then(|id| self.icons.get(id)).cloned()
        } else {
            None
        };

        RoomState {
            state: self.hysteresis.project(now, self.config.home_away_mode),
            attributes,
            icon,
        }
    }

    /// Drops every sample and decision, as on a fresh subscription.
    pub fn reset(&mut self) {
        self.samples.clear();
        self.hysteresis.reset();
    }

    fn area_from_topic<'a>(&self, topic: &'a str) -> Result<&'a str, RoomError> {
        topic
            .strip_prefix(self.config.device_id.as_str())
            .and_then(|rest| rest.strip_prefix('/'))
            .filter(|area_id| !area_id.is_empty() && !area_id.contains('/'))
            .ok_or_else(|| RoomError::input(topic, "topic is not <device_id>/<area_id>"))
    }
}
