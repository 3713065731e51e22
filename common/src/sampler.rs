use std::time::Duration;

use log::{info, warn};

use crate::{
    error::{NetworkError, SensorError, TransportError},
    network::NetworkSession,
    sensor::{SensorDriver, SensorReader},
    telemetry::{HttpTransport, TelemetryClient},
    types::{HttpResponse, Reading},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerState {
    Waiting,
    Due,
}

/// Fixed-period timer measured from the last reset point.
#[derive(Debug, Clone, Copy)]
pub struct SampleTimer {
    period_ms: u64,
    last_reset_ms: u64,
}

impl SampleTimer {
    pub fn new(period_ms: u64, start_ms: u64) -> Self {
        Self {
            period_ms,
            last_reset_ms: start_ms,
        }
    }

    pub fn last_reset_ms(&self) -> u64 {
        self.last_reset_ms
    }

    /// `Due` resets the reference to `now_ms` before any work happens, so a slow
    /// tick never shortens the following period.
    pub fn poll(&mut self, now_ms: u64) -> TimerState {
        if now_ms.saturating_sub(self.last_reset_ms) < self.period_ms {
            return TimerState::Waiting;
        }
        self.last_reset_ms = now_ms;
        TimerState::Due
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum TickOutcome {
    Waiting,
    SensorFailed(SensorError),
    Delivered {
        reading: Reading,
        response: HttpResponse,
    },
    DeliveryFailed {
        reading: Reading,
        error: TransportError,
    },
    Disconnected {
        reading: Reading,
        error: NetworkError,
    },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoopStats {
    pub samples: u64,
    pub sensor_failures: u64,
    pub delivered: u64,
    pub transport_failures: u64,
    pub skipped_offline: u64,
}

/// Everything one sampling cycle touches, owned in one place.
pub struct SamplingLoop<D, N, T> {
    device_id: String,
    timer: SampleTimer,
    reader: SensorReader<D>,
    session: N,
    client: TelemetryClient<T>,
    stats: LoopStats,
}

impl<D, N, T> SamplingLoop<D, N, T>
where
    D: SensorDriver,
    N: NetworkSession,
    T: HttpTransport,
{
    pub fn new(
        device_id: impl Into<String>,
        timer: SampleTimer,
        reader: SensorReader<D>,
        session: N,
        client: TelemetryClient<T>,
    ) -> Self {
        Self {
            device_id: device_id.into(),
            timer,
            reader,
            session,
            client,
            stats: LoopStats::default(),
        }
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    pub fn stats(&self) -> LoopStats {
        self.stats
    }

    pub fn session(&self) -> &N {
        &self.session
    }

    pub fn session_mut(&mut self) -> &mut N {
        &mut self.session
    }

    pub fn client(&self) -> &TelemetryClient<T> {
        &self.client
    }

    pub fn tick(&mut self, now_ms: u64) -> TickOutcome {
        if self.timer.poll(now_ms) == TimerState::Waiting {
            return TickOutcome::Waiting;
        }

        let reading = match self.reader.sample(now_ms) {
            Ok(reading) => reading,
            Err(err) => {
                self.stats.sensor_failures = self.stats.sensor_failures.saturating_add(1);
                warn!("[DHT] Failed to read sensor data!");
                return TickOutcome::SensorFailed(err);
            }
        };
        self.stats.samples = self.stats.samples.saturating_add(1);

        info!(
            "[DHT] Temp: {:.2} °C | Hum: {:.2} %",
            reading.temperature_c, reading.humidity
        );

        if !self.session.status().is_connected() {
            self.stats.skipped_offline = self.stats.skipped_offline.saturating_add(1);
            warn!("[WiFi] Disconnected, retrying...");
            self.session.reconnect();
            return TickOutcome::Disconnected {
                reading,
                error: NetworkError::Disconnected,
            };
        }

        match self.client.deliver(&self.device_id, &reading) {
            Ok(response) => {
                self.stats.delivered = self.stats.delivered.saturating_add(1);
                info!("[HTTP] POST {}", response.status);
                info!("{}", response.body);
                TickOutcome::Delivered { reading, response }
            }
            Err(error) => {
                self.stats.transport_failures = self.stats.transport_failures.saturating_add(1);
                warn!("[HTTP] Failed, error: {error}");
                TickOutcome::DeliveryFailed { reading, error }
            }
        }
    }

    /// Poll `tick` forever, idling `idle_for` between polls.
    pub fn run<C, S>(&mut self, mut now_ms: C, idle_for: Duration, mut idle: S) -> !
    where
        C: FnMut() -> u64,
        S: FnMut(Duration),
    {
        loop {
            let _ = self.tick(now_ms());
            idle(idle_for);
        }
    }
}
