use std::time::{Duration, Instant};

use log::{debug, info};

use crate::messages::StateValue;
use crate::resolver::AreaDecision;

/// Debounces raw area decisions.
///
/// A new candidate has to stay the best one for `room_change` before it
/// replaces the current area, and the current area is only reported while it
/// was confirmed within `room_away`.
#[derive(Debug)]
pub struct HysteresisTracker {
    current: Option<AreaDecision>,
    pending: Option<AreaDecision>,
    room_change: Duration,
    room_away: Duration,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Phase<'a> {
    NoArea,
    Stable(&'a str),
    Pending {
        stable: Option<&'a str>,
        candidate: Option<&'a str>,
        since: Instant,
    },
}

impl HysteresisTracker {
    pub fn new(room_change: Duration, room_away: Duration) -> Self {
        HysteresisTracker {
            current: None,
            pending: None,
            room_change,
            room_away,
        }
    }

    pub fn phase(&self) -> Phase<'_> {
        let stable = self.current.as_ref().and_then(|c| c.area_id.as_deref());
        match (&self.pending, stable) {
            (Some(p), _) => Phase::Pending {
                stable,
                candidate: p.area_id.as_deref(),
                since: p.decided_at,
            },
            (None, Some(area_id)) => Phase::Stable(area_id),
            (None, None) => Phase::NoArea,
        }
    }

    /// Feeds one candidate. Returns true when the committed area changed.
    pub fn advance(&mut self, candidate: AreaDecision, now: Instant) -> bool {
        let current_id = self.current.as_ref().and_then(|c| c.area_id.as_deref());

        if candidate.area_id.as_deref() == current_id {
            self.pending = None;
            if let Some(current) = self.current.as_mut() {
                current.distance = candidate.distance;
                current.decided_at = now;
            }
            return false;
        }

        match self.pending.as_mut() {
            Some(pending) if pending.area_id == candidate.area_id => {
                pending.distance = candidate.distance;
            }
            _ => {
                debug!(
                    "New candidate area {:?} (current {:?})",
                    candidate.area_id, current_id
                );
                self.pending = Some(AreaDecision {
                    decided_at: now,
                    ..candidate
                });
            }
        }

        self.promote(now)
    }

    fn promote(&mut self, now: Instant) -> bool {
        let due = self
            .pending
            .as_ref()
            .is_some_and(|p| now.saturating_duration_since(p.decided_at) >= self.room_change);
        if !due {
            return false;
        }

        let Some(mut next) = self.pending.take() else {
            return false;
        };
        info!(
            "Area changed from {:?} to {:?}",
            self.current.as_ref().and_then(|c| c.area_id.as_deref()),
            next.area_id
        );
        next.decided_at = now;
        self.current = next.area_id.is_some().then_some(next);
        true
    }

    /// The committed area, unless it has not been confirmed within the
    /// away timeout.
    pub fn current(&self, now: Instant) -> Option<&AreaDecision> {
        self.current
            .as_ref()
            .filter(|c| c.area_id.is_some())
            .filter(|c| now.saturating_duration_since(c.decided_at) <= self.room_away)
    }

    pub fn project(&self, now: Instant, home_away_mode: bool) -> StateValue {
        let area_id = self.current(now).and_then(|c| c.area_id.as_deref());
        match (area_id, home_away_mode) {
            (Some(_), true) => StateValue::Home,
            (None, true) => StateValue::NotHome,
            (Some(area_id), false) => StateValue::Area(area_id.to_string()),
            (None, false) => StateValue::Unknown,
        }
    }

    pub fn reset(&mut self) {
        self.current = None;
        self.pending = None;
    }
}
