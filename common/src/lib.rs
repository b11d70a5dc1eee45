use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Humidity shown for every device. There is no humidity channel, the
/// number only fills the dashboard card.
pub const PLACEHOLDER_HUMIDITY: f64 = 50.0;

/// Supply voltage shown for every device, same caveat as humidity.
pub const PLACEHOLDER_VOLTAGE: f64 = 3.3;

/// Display projection of a device's current reading.
///
/// Only `value` and `timestamp` come from a real measurement; `humidity` and
/// `voltage` are placeholders and must not be read as telemetry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorView {
    pub id: i32,
    pub name: String,
    pub value: f64,
    pub humidity: f64,
    pub voltage: f64,
    pub timestamp: DateTime<Utc>,
}

impl SensorView {
    pub fn new(id: i32, value: f64, timestamp: DateTime<Utc>) -> Self {
        SensorView {
            id,
            name: display_name(id),
            value,
            humidity: PLACEHOLDER_HUMIDITY,
            voltage: PLACEHOLDER_VOLTAGE,
            timestamp,
        }
    }
}

pub fn display_name(id: i32) -> String {
    format!("Sensor {id}")
}

/// Body of a successful `POST /sensor/{id}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InsertAck {
    pub message: String,
    pub sensor_id: i32,
    pub value: f64,
}

impl InsertAck {
    pub fn new(sensor_id: i32, value: f64) -> Self {
        InsertAck {
            message: "Sensor value inserted successfully".to_owned(),
            sensor_id,
            value,
        }
    }
}

/// Body of every JSON error response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
}

impl ErrorBody {
    pub fn new(error: impl Into<String>) -> Self {
        ErrorBody {
            error: error.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn view_fills_placeholders() {
        let at = Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap();
        let view = SensorView::new(7, 21.5, at);

        assert_eq!(view.name, "Sensor 7");
        assert_eq!(view.humidity, PLACEHOLDER_HUMIDITY);
        assert_eq!(view.voltage, PLACEHOLDER_VOLTAGE);
    }

    #[test]
    fn view_serializes_exact_fields() {
        let at = Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap();
        let json = serde_json::to_value(SensorView::new(1, 23.0, at)).unwrap();
        let object = json.as_object().unwrap();

        let mut keys: Vec<&str> = object.keys().map(String::as_str).collect();
        keys.sort();
        assert_eq!(
            keys,
            ["humidity", "id", "name", "timestamp", "value", "voltage"]
        );
        assert_eq!(object["value"], 23.0);
    }
}
