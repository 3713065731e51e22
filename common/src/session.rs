use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::wire::TelemetryPayload;

/// Logs needed in a day's session before it gets a summary.
pub const SUMMARY_MIN_LOGS: usize = 4;
pub const MAX_MACHINE_ID_LEN: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct SessionKey {
    pub machine_id: String,
    pub date: String,
}

impl SessionKey {
    pub fn for_day(machine_id: &str, now: DateTime<Utc>) -> Self {
        Self {
            machine_id: machine_id.to_string(),
            date: now.format("%Y-%m-%d").to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionLogEntry {
    pub temp: f32,
    pub hum: f32,
    /// Epoch milliseconds at ingestion.
    pub timestamp: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MachineSession {
    #[serde(rename = "startTime")]
    pub start_time: DateTime<Utc>,
    pub logs: Vec<SessionLogEntry>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
}

impl MachineSession {
    pub fn new(start_time: DateTime<Utc>) -> Self {
        Self {
            start_time,
            logs: Vec::new(),
            summary: None,
        }
    }

    /// Mean temperature and humidity, `None` for an empty session.
    pub fn averages(&self) -> Option<(f32, f32)> {
        if self.logs.is_empty() {
            return None;
        }
        let count = self.logs.len() as f32;
        let temp = self.logs.iter().map(|log| log.temp).sum::<f32>() / count;
        let hum = self.logs.iter().map(|log| log.hum).sum::<f32>() / count;
        Some((temp, hum))
    }
}

pub trait Summarizer {
    fn summarize(&self, avg_temp: f32, avg_hum: f32, session: &MachineSession) -> String;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct AverageSummarizer;

impl Summarizer for AverageSummarizer {
    fn summarize(&self, avg_temp: f32, avg_hum: f32, _session: &MachineSession) -> String {
        format!("Average Temperature: {avg_temp:.1}°C, Average Humidity: {avg_hum:.1}%.")
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordOutcome {
    pub key: SessionKey,
    pub log_count: usize,
    pub summarized: bool,
}

/// Per-device, per-day ingestion log keyed `machine id -> YYYY-MM-DD`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionLog {
    #[serde(rename = "machineLogs")]
    machines: BTreeMap<String, BTreeMap<String, MachineSession>>,
}

impl SessionLog {
    pub fn record(
        &mut self,
        payload: &TelemetryPayload,
        now: DateTime<Utc>,
        summarizer: &dyn Summarizer,
    ) -> RecordOutcome {
        let key = SessionKey::for_day(&payload.machine_id, now);
        let session = self
            .machines
            .entry(key.machine_id.clone())
            .or_default()
            .entry(key.date.clone())
            .or_insert_with(|| MachineSession::new(now));

        session.logs.push(SessionLogEntry {
            temp: payload.data.temp,
            hum: payload.data.hum,
            timestamp: now.timestamp_millis(),
        });

        let mut summarized = false;
        if session.logs.len() >= SUMMARY_MIN_LOGS && session.summary.is_none() {
            if let Some((avg_temp, avg_hum)) = session.averages() {
                session.summary = Some(summarizer.summarize(avg_temp, avg_hum, session));
                summarized = true;
            }
        }

        RecordOutcome {
            log_count: session.logs.len(),
            key,
            summarized,
        }
    }

    pub fn get(&self, key: &SessionKey) -> Option<&MachineSession> {
        self.machines.get(&key.machine_id)?.get(&key.date)
    }

    /// Sessions of one machine, oldest day first.
    pub fn sessions_for(&self, machine_id: &str) -> Vec<(&str, &MachineSession)> {
        self.machines
            .get(machine_id)
            .map(|days| {
                days.iter()
                    .map(|(date, session)| (date.as_str(), session))
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn machine_ids(&self) -> impl Iterator<Item = &str> {
        self.machines.keys().map(String::as_str)
    }
}

pub fn validate_payload(payload: &TelemetryPayload) -> Result<(), &'static str> {
    let machine_id = payload.machine_id.as_str();
    if machine_id.trim().is_empty() {
        return Err("machineID must not be empty");
    }
    if machine_id.trim() != machine_id {
        return Err("machineID must not have surrounding whitespace");
    }
    if machine_id.len() > MAX_MACHINE_ID_LEN {
        return Err("machineID is too long");
    }
    if machine_id.contains('/') {
        return Err("machineID must not contain '/'");
    }
    if !payload.data.temp.is_finite() || !payload.data.hum.is_finite() {
        return Err("data.temp and data.hum must be numbers");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::wire::TelemetryData;

    fn at(day: u32, hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, day, hour, 0, 0).unwrap()
    }

    fn payload(machine_id: &str, temp: f32, hum: f32) -> TelemetryPayload {
        TelemetryPayload {
            machine_id: machine_id.to_string(),
            data: TelemetryData { temp, hum },
        }
    }

    #[test]
    fn first_log_opens_session() {
        let mut log = SessionLog::default();
        let outcome = log.record(&payload("envBot_01", 23.0, 60.0), at(2, 9), &AverageSummarizer);

        assert_eq!(
            outcome,
            RecordOutcome {
                key: SessionKey {
                    machine_id: "envBot_01".to_string(),
                    date: "2026-03-02".to_string(),
                },
                log_count: 1,
                summarized: false,
            }
        );
        let session = log.get(&outcome.key).unwrap();
        assert_eq!(session.start_time, at(2, 9));
        assert_eq!(session.logs[0].timestamp, at(2, 9).timestamp_millis());
        assert_eq!(session.summary, None);
    }

    #[test]
    fn summary_written_once_at_fourth_log() {
        let mut log = SessionLog::default();
        let readings = [(20.0, 50.0), (22.0, 52.0), (24.0, 54.0), (26.0, 56.0), (40.0, 90.0)];

        let mut outcomes = Vec::new();
        for (hour, (temp, hum)) in readings.into_iter().enumerate() {
            outcomes.push(log.record(
                &payload("envBot_01", temp, hum),
                at(2, hour as u32),
                &AverageSummarizer,
            ));
        }

        let flags: Vec<bool> = outcomes.iter().map(|o| o.summarized).collect();
        assert_eq!(flags, vec![false, false, false, true, false]);

        let session = log.get(&outcomes[0].key).unwrap();
        assert_eq!(session.logs.len(), 5);
        assert_eq!(
            session.summary.as_deref(),
            Some("Average Temperature: 23.0°C, Average Humidity: 53.0%.")
        );
        assert_eq!(session.start_time, at(2, 0));
    }

    #[test]
    fn days_and_machines_are_separate() {
        let mut log = SessionLog::default();
        log.record(&payload("a", 1.0, 1.0), at(2, 23), &AverageSummarizer);
        log.record(&payload("a", 2.0, 2.0), at(3, 0), &AverageSummarizer);
        log.record(&payload("b", 3.0, 3.0), at(3, 1), &AverageSummarizer);

        let days: Vec<&str> = log.sessions_for("a").into_iter().map(|(d, _)| d).collect();
        assert_eq!(days, vec!["2026-03-02", "2026-03-03"]);
        assert_eq!(log.sessions_for("b").len(), 1);
        assert!(log.sessions_for("c").is_empty());
        assert_eq!(log.machine_ids().collect::<Vec<_>>(), vec!["a", "b"]);
    }

    #[test]
    fn custom_summarizer_is_used() {
        struct Fixed;
        impl Summarizer for Fixed {
            fn summarize(&self, _: f32, _: f32, session: &MachineSession) -> String {
                format!("{} logs", session.logs.len())
            }
        }

        let mut log = SessionLog::default();
        let mut last = None;
        for hour in 0..4 {
            last = Some(log.record(&payload("envBot_01", 20.0, 50.0), at(5, hour), &Fixed));
        }
        let key = last.unwrap().key;
        assert_eq!(log.get(&key).unwrap().summary.as_deref(), Some("4 logs"));
    }

    #[test]
    fn store_shape_survives_json() {
        let mut log = SessionLog::default();
        log.record(&payload("envBot_01", 21.5, 45.25), at(2, 9), &AverageSummarizer);

        let json = serde_json::to_value(&log).unwrap();
        let session = &json["machineLogs"]["envBot_01"]["2026-03-02"];
        assert_eq!(session["startTime"], "2026-03-02T09:00:00Z");
        assert_eq!(session["logs"][0]["temp"], 21.5);
        assert!(session.get("summary").is_none());

        let back: SessionLog = serde_json::from_value(json).unwrap();
        assert_eq!(back, log);
    }

    #[test]
    fn rejects_bad_payloads() {
        assert_eq!(validate_payload(&payload("envBot_01", 20.0, 40.0)), Ok(()));
        assert!(validate_payload(&payload("  ", 20.0, 40.0)).is_err());
        assert!(validate_payload(&payload("a/b", 20.0, 40.0)).is_err());
        assert!(validate_payload(&payload(&"x".repeat(65), 20.0, 40.0)).is_err());
        assert!(validate_payload(&payload("envBot_01", f32::INFINITY, 40.0)).is_err());
    }

    #[test]
    fn padded_machine_id_never_opens_a_second_session() {
        assert_eq!(
            validate_payload(&payload(" envBot_01 ", 20.0, 40.0)),
            Err("machineID must not have surrounding whitespace")
        );
        assert!(validate_payload(&payload("envBot_01\n", 20.0, 40.0)).is_err());

        let mut log = SessionLog::default();
        for machine_id in ["envBot_01", " envBot_01 "] {
            let candidate = payload(machine_id, 20.0, 40.0);
            if validate_payload(&candidate).is_ok() {
                log.record(&candidate, at(2, 9), &AverageSummarizer);
            }
        }
        assert_eq!(log.machine_ids().collect::<Vec<_>>(), vec!["envBot_01"]);
        assert_eq!(log.sessions_for("envBot_01")[0].1.logs.len(), 1);
    }
}
