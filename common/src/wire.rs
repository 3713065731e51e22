use serde::{ser::Error as _, Deserialize, Serialize, Serializer};
use serde_json::value::RawValue;

use crate::types::Reading;

pub const CONTENT_TYPE_JSON: &str = "application/json";
pub const INGEST_PATH: &str = "/api/brain";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetryData {
    #[serde(serialize_with = "two_decimals")]
    pub temp: f32,
    #[serde(serialize_with = "two_decimals")]
    pub hum: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetryPayload {
    #[serde(rename = "machineID")]
    pub machine_id: String,
    pub data: TelemetryData,
}

impl TelemetryPayload {
    pub fn new(device_id: &str, reading: &Reading) -> Self {
        Self {
            machine_id: device_id.to_string(),
            data: TelemetryData {
                temp: reading.temperature_c,
                hum: reading.humidity,
            },
        }
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

fn two_decimals<S: Serializer>(value: &f32, serializer: S) -> Result<S::Ok, S::Error> {
    if !value.is_finite() {
        return Err(S::Error::custom("non-finite telemetry value"));
    }
    let raw = RawValue::from_string(format!("{value:.2}")).map_err(S::Error::custom)?;
    raw.serialize(serializer)
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn reading(temperature_c: f32, humidity: f32) -> Reading {
        Reading {
            temperature_c,
            humidity,
            taken_at_ms: 5_000,
        }
    }

    #[test]
    fn renders_fixed_shape() {
        let body = TelemetryPayload::new("envBot_01", &reading(23.45, 60.12))
            .to_json()
            .unwrap();
        assert_eq!(
            body,
            r#"{"machineID":"envBot_01","data":{"temp":23.45,"hum":60.12}}"#
        );
    }

    #[test]
    fn always_two_decimals() {
        let body = TelemetryPayload::new("envBot_01", &reading(23.0, 5.5))
            .to_json()
            .unwrap();
        assert_eq!(
            body,
            r#"{"machineID":"envBot_01","data":{"temp":23.00,"hum":5.50}}"#
        );

        let body = TelemetryPayload::new("x", &reading(-4.256, 99.999))
            .to_json()
            .unwrap();
        assert!(body.contains(r#""temp":-4.26"#), "{body}");
        assert!(body.contains(r#""hum":100.00"#), "{body}");
    }

    #[test]
    fn escapes_device_id() {
        let body = TelemetryPayload::new("bot \"7\"", &reading(1.0, 2.0))
            .to_json()
            .unwrap();
        assert!(body.starts_with(r#"{"machineID":"bot \"7\"","#), "{body}");
    }

    #[test]
    fn refuses_nan() {
        let payload = TelemetryPayload::new("envBot_01", &reading(f32::NAN, 40.0));
        assert!(payload.to_json().is_err());
    }

    #[test]
    fn parses_incoming_body() {
        let payload: TelemetryPayload =
            serde_json::from_str(r#"{"machineID":"envBot_01","data":{"temp":23.45,"hum":60.12}}"#)
                .unwrap();
        assert_eq!(payload.machine_id, "envBot_01");
        assert!((payload.data.temp - 23.45).abs() < 1e-4);
        assert!((payload.data.hum - 60.12).abs() < 1e-4);
    }
}
