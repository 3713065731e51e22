use std::{thread, time::Duration};

use anyhow::Context;
use tracing::{info, warn};

use envbot_common::{
    connect, AgentConfig, ConnectionState, Credentials, NetworkError, NetworkSession,
    SampleTimer, SamplingLoop, SensorDriver, SensorReader, TelemetryClient,
};

use crate::{clock::monotonic_ms, http::HostHttpTransport};

/// Stand-in for the DHT on a workstation: a slow sawtooth with a dropped read
/// every seventh sample.
#[derive(Debug, Default)]
pub struct SimulatedDht {
    tick: u64,
}

impl SensorDriver for SimulatedDht {
    fn read_temperature(&mut self) -> f32 {
        self.tick = self.tick.saturating_add(1);
        if self.tick % 7 == 0 {
            return f32::NAN;
        }
        21.0 + (self.tick % 8) as f32 * 0.25
    }

    fn read_humidity(&mut self) -> f32 {
        45.0 + (self.tick % 6) as f32 * 0.5
    }
}

/// The workstation's own network stack is assumed up once started.
#[derive(Debug)]
pub struct HostSession {
    state: ConnectionState,
    reconnects: u32,
}

impl HostSession {
    pub fn new() -> Self {
        Self {
            state: ConnectionState::Disconnected,
            reconnects: 0,
        }
    }
}

impl NetworkSession for HostSession {
    fn begin(&mut self, credentials: &Credentials) -> Result<(), NetworkError> {
        info!("host network in use; ignoring ssid `{}`", credentials.ssid);
        self.state = ConnectionState::Connected;
        Ok(())
    }

    fn status(&mut self) -> ConnectionState {
        self.state
    }

    fn reconnect(&mut self) {
        self.reconnects = self.reconnects.saturating_add(1);
        info!("reconnect requested ({} so far)", self.reconnects);
        self.state = ConnectionState::Connected;
    }
}

fn apply_env_overrides(config: &mut AgentConfig, var: impl Fn(&str) -> Option<String>) {
    if let Some(url) = var("ENDPOINT_URL") {
        config.endpoint_url = url;
    }
    if let Some(device_id) = var("DEVICE_ID") {
        config.device_id = device_id;
    }
    if let Some(timeout) = var("HTTP_TIMEOUT_MS").and_then(|value| value.parse::<u64>().ok()) {
        config.http_timeout_ms = Some(timeout);
    }
    config.sanitize();
}

pub fn run() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let mut config = AgentConfig::from_build_env();
    apply_env_overrides(&mut config, |name| std::env::var(name).ok());

    if config.endpoint_url.starts_with("https://") {
        warn!(
            "endpoint {} needs TLS; host builds speak plain http, set ENDPOINT_URL to the collector",
            config.endpoint_url
        );
    }

    let mut session = HostSession::new();
    connect(
        &mut session,
        &Credentials::from(&config.network),
        config.network.connect_policy,
        Duration::from_millis(config.network.connect_poll_ms),
        thread::sleep,
    )
    .context("network startup failed")?;

    let transport = HostHttpTransport::new(config.http_timeout_ms.map(Duration::from_millis));
    let mut sampler = SamplingLoop::new(
        config.device_id.clone(),
        SampleTimer::new(config.sample_period_ms, monotonic_ms()),
        SensorReader::new(SimulatedDht::default()),
        session,
        TelemetryClient::new(transport, config.endpoint_url.clone()),
    );

    info!(
        "agent `{}` sampling every {} ms, posting to {}",
        sampler.device_id(),
        config.sample_period_ms,
        sampler.client().endpoint_url()
    );

    sampler.run(
        monotonic_ms,
        Duration::from_millis(config.loop_idle_ms),
        thread::sleep,
    )
}
