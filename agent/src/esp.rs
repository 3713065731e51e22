use core::convert::TryInto;
use std::{
    thread,
    time::{Duration, Instant},
};

use anyhow::{anyhow, Context};
use dht_sensor::{dht11, dht22};
use embedded_svc::{
    http::{client::Client as HttpClient, Method, Status},
    io::{Read, Write},
    wifi::{AuthMethod, ClientConfiguration, Configuration},
};
use esp_idf_hal::{
    delay::Ets,
    gpio::{AnyIOPin, IOPin, InputOutput, PinDriver, Pins, Pull},
};
use esp_idf_svc::{
    eventloop::EspSystemEventLoop,
    hal::prelude::Peripherals,
    http::client::{Configuration as HttpClientConfiguration, EspHttpConnection},
    log::EspLogger,
    nvs::EspDefaultNvsPartition,
    sys::EspError,
    wifi::EspWifi,
};
use log::{info, warn};

use envbot_common::{
    connect, AgentConfig, ConnectionState, Credentials, HttpResponse, HttpTransport,
    NetworkError, NetworkSession, SampleTimer, SamplingLoop, SensorDriver, SensorHardwareConfig,
    SensorModel, SensorReader, TelemetryClient, TransportError,
};

use crate::clock::monotonic_ms;

/// DHT parts refuse to be read faster than this; both channels come from one frame.
const DHT_MIN_INTERVAL: Duration = Duration::from_millis(2_000);
const MAX_RESPONSE_BODY: usize = 4096;
const WATCHDOG_TIMEOUT_SEC: u32 = 90;

struct DhtDriver {
    pin: PinDriver<'static, AnyIOPin, InputOutput>,
    delay: Ets,
    hardware: SensorHardwareConfig,
    last_frame: Option<(Instant, Option<(f32, f32)>)>,
}

impl DhtDriver {
    fn new(pin: AnyIOPin, hardware: SensorHardwareConfig) -> anyhow::Result<Self> {
        let mut pin = PinDriver::input_output_od(pin)?;
        pin.set_pull(Pull::Up)?;
        pin.set_high()?;

        info!(
            "[DHT] {} on GPIO{}",
            hardware.model.as_str(),
            hardware.data_pin
        );

        Ok(Self {
            pin,
            delay: Ets,
            hardware,
            last_frame: None,
        })
    }

    fn frame(&mut self) -> Option<(f32, f32)> {
        if let Some((read_at, frame)) = self.last_frame {
            if read_at.elapsed() < DHT_MIN_INTERVAL {
                return frame;
            }
        }

        let frame = self.read_frame();
        self.last_frame = Some((Instant::now(), frame));
        frame
    }

    fn read_frame(&mut self) -> Option<(f32, f32)> {
        if let Err(err) = self.pin.set_high() {
            warn!("failed to set DHT line high before read: {err:?}");
            return None;
        }

        let result = match self.hardware.model {
            SensorModel::Dht11 => dht11::blocking::read(&mut self.delay, &mut self.pin)
                .map(|frame| (frame.temperature as f32, frame.relative_humidity as f32)),
            SensorModel::Dht22 => dht22::blocking::read(&mut self.delay, &mut self.pin)
                .map(|frame| (frame.temperature, frame.relative_humidity)),
        };

        match result {
            Ok(frame) => Some(frame),
            Err(err) => {
                warn!(
                    "failed to read {} on GPIO{}: {err:?}",
                    self.hardware.model.as_str(),
                    self.hardware.data_pin
                );
                None
            }
        }
    }
}

impl SensorDriver for DhtDriver {
    fn read_temperature(&mut self) -> f32 {
        self.frame().map_or(f32::NAN, |(temp, _)| temp)
    }

    fn read_humidity(&mut self) -> f32 {
        self.frame().map_or(f32::NAN, |(_, hum)| hum)
    }
}

struct EspWifiSession {
    wifi: EspWifi<'static>,
}

impl EspWifiSession {
    fn log_ip(&self) {
        match self.wifi.sta_netif().get_ip_info() {
            Ok(ip_info) => info!("[WiFi] IP: {}", ip_info.ip),
            Err(err) => warn!("failed to read station IP: {err:?}"),
        }
    }
}

fn radio_error(err: EspError) -> NetworkError {
    NetworkError::Radio(format!("{err:?}"))
}

impl NetworkSession for EspWifiSession {
    fn begin(&mut self, credentials: &Credentials) -> Result<(), NetworkError> {
        let auth_method = if credentials.is_open_network() {
            AuthMethod::None
        } else {
            AuthMethod::WPAWPA2Personal
        };

        self.wifi
            .set_configuration(&Configuration::Client(ClientConfiguration {
                ssid: credentials
                    .ssid
                    .as_str()
                    .try_into()
                    .map_err(|_| NetworkError::Radio("wifi ssid too long".to_string()))?,
                password: credentials
                    .password
                    .as_str()
                    .try_into()
                    .map_err(|_| NetworkError::Radio("wifi password too long".to_string()))?,
                auth_method,
                ..Default::default()
            }))
            .map_err(radio_error)?;

        self.wifi.start().map_err(radio_error)?;
        self.wifi.connect().map_err(radio_error)
    }

    fn status(&mut self) -> ConnectionState {
        match self.wifi.is_up() {
            Ok(true) => ConnectionState::Connected,
            Ok(false) => ConnectionState::Disconnected,
            Err(err) => {
                warn!("wifi status check failed: {err:?}");
                ConnectionState::Disconnected
            }
        }
    }

    fn reconnect(&mut self) {
        if let Err(err) = self.wifi.connect() {
            warn!("[WiFi] reconnect request failed: {err:?}");
        }
    }
}

struct EspHttpTransport {
    timeout: Option<Duration>,
}

fn transport_error<E: core::fmt::Debug>(err: E) -> TransportError {
    TransportError::new(format!("{err:?}"))
}

impl HttpTransport for EspHttpTransport {
    fn post(
        &mut self,
        url: &str,
        headers: &[(&str, &str)],
        body: &[u8],
    ) -> Result<HttpResponse, TransportError> {
        let conf = HttpClientConfiguration {
            timeout: self.timeout,
            crt_bundle_attach: Some(esp_idf_svc::sys::esp_crt_bundle_attach),
            ..Default::default()
        };
        let mut client = HttpClient::wrap(EspHttpConnection::new(&conf).map_err(transport_error)?);

        let content_length = body.len().to_string();
        let mut request_headers = headers.to_vec();
        request_headers.push(("Content-Length", content_length.as_str()));

        let mut request = client
            .request(Method::Post, url, &request_headers)
            .map_err(transport_error)?;
        request.write_all(body).map_err(transport_error)?;
        request.flush().map_err(transport_error)?;

        let mut response = request.submit().map_err(transport_error)?;
        let status = response.status();

        let mut received = Vec::new();
        let mut chunk = [0_u8; 512];
        loop {
            match response.read(&mut chunk) {
                Ok(0) => break,
                Ok(read) => {
                    let room = MAX_RESPONSE_BODY.saturating_sub(received.len());
                    received.extend_from_slice(&chunk[..read.min(room)]);
                    if read >= room {
                        break;
                    }
                }
                Err(err) => {
                    warn!("[HTTP] response body read failed: {err:?}");
                    break;
                }
            }
        }

        Ok(HttpResponse {
            status,
            body: String::from_utf8_lossy(&received).into_owned(),
        })
    }
}

fn dht_data_pin(pins: Pins, number: i32) -> anyhow::Result<AnyIOPin> {
    let pin = match number {
        4 => pins.gpio4.downgrade(),
        5 => pins.gpio5.downgrade(),
        16 => pins.gpio16.downgrade(),
        17 => pins.gpio17.downgrade(),
        other => anyhow::bail!("GPIO{other} cannot drive the DHT data line"),
    };
    Ok(pin)
}

pub fn run() -> anyhow::Result<()> {
    esp_idf_svc::sys::link_patches();
    EspLogger::initialize_default();

    let config = AgentConfig::from_build_env();
    if !config.network.has_station_credentials() {
        warn!("wifi credentials missing; build with WIFI_SSID and WIFI_PASS set");
    }

    let sys_loop = EspSystemEventLoop::take()?;
    let nvs_partition = EspDefaultNvsPartition::take()?;
    let Peripherals { modem, pins, .. } = Peripherals::take()?;

    let data_pin = dht_data_pin(pins, config.sensor.data_pin)?;
    let driver = DhtDriver::new(data_pin, config.sensor.clone())
        .context("failed to initialize DHT sensor")?;

    let mut session = EspWifiSession {
        wifi: EspWifi::new(modem, sys_loop, Some(nvs_partition))?,
    };

    connect(
        &mut session,
        &Credentials::from(&config.network),
        config.network.connect_policy,
        Duration::from_millis(config.network.connect_poll_ms),
        thread::sleep,
    )
    .context("wifi startup failed")?;
    session.log_ip();
    disable_wifi_power_save();

    init_watchdog(WATCHDOG_TIMEOUT_SEC)?;
    add_current_task_to_watchdog()?;

    let transport = EspHttpTransport {
        timeout: config.http_timeout_ms.map(Duration::from_millis),
    };
    let mut sampler = SamplingLoop::new(
        config.device_id.clone(),
        SampleTimer::new(config.sample_period_ms, monotonic_ms()),
        SensorReader::new(driver),
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
        |idle| {
            feed_watchdog();
            thread::sleep(idle);
        },
    )
}

fn init_watchdog(timeout_sec: u32) -> anyhow::Result<()> {
    let config = esp_idf_svc::sys::esp_task_wdt_config_t {
        timeout_ms: timeout_sec.saturating_mul(1000),
        idle_core_mask: 0,
        trigger_panic: true,
    };
    let rc = unsafe { esp_idf_svc::sys::esp_task_wdt_init(&config) };
    if rc == esp_idf_svc::sys::ESP_OK || rc == esp_idf_svc::sys::ESP_ERR_INVALID_STATE {
        return Ok(());
    }
    Err(anyhow!("esp_task_wdt_init failed with code {}", rc))
}

fn add_current_task_to_watchdog() -> anyhow::Result<()> {
    let rc = unsafe { esp_idf_svc::sys::esp_task_wdt_add(core::ptr::null_mut()) };
    if rc == esp_idf_svc::sys::ESP_OK || rc == esp_idf_svc::sys::ESP_ERR_INVALID_STATE {
        return Ok(());
    }
    Err(anyhow!("esp_task_wdt_add failed with code {}", rc))
}

fn feed_watchdog() {
    let _ = unsafe { esp_idf_svc::sys::esp_task_wdt_reset() };
}

fn disable_wifi_power_save() {
    let rc = unsafe { esp_idf_svc::sys::esp_wifi_set_ps(0) };
    if rc == esp_idf_svc::sys::ESP_OK {
        info!("wifi power save disabled");
    } else {
        warn!("failed to disable wifi power save: esp_err_t={rc}");
    }
}
