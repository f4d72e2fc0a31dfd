use std::fmt;

use serde::Serializer;
use serde_derive::{Deserialize, Serialize};

use crate::geometry::Point;

/// Body of a `<device_id>/<area_id>` message. Other fields are ignored.
#[derive(Deserialize, Debug, Clone, PartialEq)]
pub struct DistanceMessage {
    pub distance: f64,
}

/// Events forwarded from the MQTT event loop to the tracker task.
#[derive(Clone, Debug)]
pub enum BusEvent {
    /// The distance subscription was (re)issued after a connection.
    Subscribed,
    Message {
        topic: String,
        payload: Vec<u8>,
    },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StateValue {
    Area(String),
    Unknown,
    Home,
    NotHome,
}

impl fmt::Display for StateValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StateValue::Area(area_id) => f.write_str(area_id),
            StateValue::Unknown => f.write_str("unknown"),
            StateValue::Home => f.write_str("home"),
            StateValue::NotHome => f.write_str("not_home"),
        }
    }
}

impl serde::Serialize for StateValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

#[derive(Serialize, Debug, Clone, PartialEq, Default)]
pub struct RoomAttributes {
    pub distance: Option<f64>,
    pub area_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub x_coordinates: Option<Point>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub x_radius: Option<f64>,
}

/// Externally visible state of one tracked device.
#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct RoomState {
    pub state: StateValue,
    pub attributes: RoomAttributes,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_distance_message() {
        let msg: DistanceMessage =
            serde_json::from_str(r#"{"id":"phone","distance":2.41,"rssi":-71}"#).unwrap();
        assert_eq!(msg.distance, 2.41);

        assert!(serde_json::from_str::<DistanceMessage>(r#"{"distance":"near"}"#).is_err());
        assert!(serde_json::from_str::<DistanceMessage>(r#"{"rssi":-71}"#).is_err());
    }

    #[test]
    fn test_room_state_json() {
        let state = RoomState {
            state: StateValue::Area("kitchen".to_string()),
            attributes: RoomAttributes {
                distance: Some(1.5),
                area_id: Some("kitchen".to_string()),
                x_coordinates: Some([1.0, 2.0, 0.0]),
                x_radius: Some(1.5),
            },
            icon: None,
        };
        assert_eq!(
            serde_json::to_value(&state).unwrap(),
            serde_json::json!({
                "state": "kitchen",
                "attributes": {
                    "distance": 1.5,
                    "area_id": "kitchen",
                    "x_coordinates": [1.0, 2.0, 0.0],
                    "x_radius": 1.5,
                },
            })
        );

        let away = RoomState {
            state: StateValue::NotHome,
            attributes: RoomAttributes::default(),
            icon: Some("mdi:home".to_string()),
        };
        assert_eq!(
            serde_json::to_string(&away).unwrap(),
            r#"{"state":"not_home","attributes":{"distance":null,"area_id":null},"icon":"mdi:home"}"#
        );
    }
}
