use serde::{Deserialize, Serialize};

pub const DEFAULT_DEVICE_ID: &str = "envBot_01";
pub const DEFAULT_ENDPOINT_URL: &str = "https://prs-tech-project-portal/api/brain";
pub const UNSET_CREDENTIAL: &str = "CHANGE_ME";
/// GPIOs the firmware can hand to the DHT driver.
pub const DHT_DATA_PINS: [i32; 4] = [4, 5, 16, 17];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SensorModel {
    Dht11,
    Dht22,
}

impl SensorModel {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Dht11 => "DHT11",
            Self::Dht22 => "DHT22",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_uppercase().as_str() {
            "DHT11" => Some(Self::Dht11),
            "DHT22" | "AM2302" => Some(Self::Dht22),
            _ => None,
        }
    }
}

/// How long start-up keeps polling for a WiFi association.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "attempts", rename_all = "camelCase")]
pub enum ConnectPolicy {
    Forever,
    MaxAttempts(u32),
}

impl ConnectPolicy {
    pub fn allows(self, attempt: u32) -> bool {
        match self {
            Self::Forever => true,
            Self::MaxAttempts(max) => attempt <= max,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    pub wifi_ssid: String,
    pub wifi_pass: String,
    pub connect_policy: ConnectPolicy,
    pub connect_poll_ms: u64,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            wifi_ssid: String::new(),
            wifi_pass: String::new(),
            connect_policy: ConnectPolicy::Forever,
            connect_poll_ms: 500,
        }
    }
}

impl NetworkConfig {
    pub fn has_station_credentials(&self) -> bool {
        let ssid = self.wifi_ssid.trim();
        !ssid.is_empty() && ssid != UNSET_CREDENTIAL
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SensorHardwareConfig {
    pub data_pin: i32,
    pub model: SensorModel,
}

impl Default for SensorHardwareConfig {
    fn default() -> Self {
        Self {
            data_pin: 4,
            model: SensorModel::Dht11,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    pub device_id: String,
    pub endpoint_url: String,
    pub sample_period_ms: u64,
    pub loop_idle_ms: u64,
    #[serde(default)]
    pub http_timeout_ms: Option<u64>,
    pub network: NetworkConfig,
    #[serde(default)]
    pub sensor: SensorHardwareConfig,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            device_id: DEFAULT_DEVICE_ID.to_string(),
            endpoint_url: DEFAULT_ENDPOINT_URL.to_string(),
            sample_period_ms: 5_000,
            loop_idle_ms: 100,
            http_timeout_ms: None,
            network: NetworkConfig::default(),
            sensor: SensorHardwareConfig::default(),
        }
    }
}

impl AgentConfig {
    /// Defaults overlaid with the values baked in at compile time.
    pub fn from_build_env() -> Self {
        let mut config = Self::default();

        if let Some(device_id) = option_env!("DEVICE_ID") {
            config.device_id = device_id.to_string();
        }
        if let Some(url) = option_env!("ENDPOINT_URL") {
            config.endpoint_url = url.to_string();
        }
        if let Some(pin) = option_env!("SENSOR_PIN").and_then(|v| v.parse::<i32>().ok()) {
            config.sensor.data_pin = pin;
        }
        if let Some(model) = option_env!("SENSOR_MODEL").and_then(SensorModel::parse) {
            config.sensor.model = model;
        }

        config.network.wifi_ssid = option_env!("WIFI_SSID")
            .unwrap_or(UNSET_CREDENTIAL)
            .to_string();
        config.network.wifi_pass = option_env!("WIFI_PASS")
            .unwrap_or(UNSET_CREDENTIAL)
            .to_string();

        config.sanitize();
        config
    }

    pub fn sanitize(&mut self) {
        if self.device_id.trim().is_empty() {
            self.device_id = DEFAULT_DEVICE_ID.to_string();
        }
        if self.endpoint_url.trim().is_empty() {
            self.endpoint_url = DEFAULT_ENDPOINT_URL.to_string();
        }
        if self.sample_period_ms == 0 {
            self.sample_period_ms = 5_000;
        }
        self.loop_idle_ms = self.loop_idle_ms.clamp(10, self.sample_period_ms.max(10));
        self.network.connect_poll_ms = self.network.connect_poll_ms.clamp(50, 60_000);
        if !DHT_DATA_PINS.contains(&self.sensor.data_pin) {
            self.sensor.data_pin = 4;
        }
        if let ConnectPolicy::MaxAttempts(0) = self.network.connect_policy {
            self.network.connect_policy = ConnectPolicy::MaxAttempts(1);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_device_constants() {
        let config = AgentConfig::default();
        assert_eq!(config.device_id, "envBot_01");
        assert_eq!(config.sample_period_ms, 5_000);
        assert_eq!(config.network.connect_poll_ms, 500);
        assert_eq!(config.network.connect_policy, ConnectPolicy::Forever);
        assert_eq!(config.sensor.data_pin, 4);
        assert_eq!(config.sensor.model, SensorModel::Dht11);
    }

    #[test]
    fn placeholder_ssid_is_not_a_credential() {
        let mut network = NetworkConfig::default();
        assert!(!network.has_station_credentials());

        network.wifi_ssid = "CHANGE_ME".to_string();
        assert!(!network.has_station_credentials());

        network.wifi_ssid = "lab-2g".to_string();
        assert!(network.has_station_credentials());
    }

    #[test]
    fn sanitize_repairs_unusable_values() {
        let mut config = AgentConfig {
            device_id: "  ".to_string(),
            sample_period_ms: 0,
            loop_idle_ms: 0,
            ..AgentConfig::default()
        };
        config.network.connect_policy = ConnectPolicy::MaxAttempts(0);
        config.sensor.data_pin = -3;
        config.sanitize();

        assert_eq!(config.device_id, DEFAULT_DEVICE_ID);
        assert_eq!(config.sample_period_ms, 5_000);
        assert_eq!(config.loop_idle_ms, 10);
        assert_eq!(config.network.connect_policy, ConnectPolicy::MaxAttempts(1));
        assert_eq!(config.sensor.data_pin, 4);
    }

    #[test]
    fn data_pin_stays_on_a_usable_gpio() {
        let mut config = AgentConfig::default();
        config.sensor.data_pin = 16;
        config.sanitize();
        assert_eq!(config.sensor.data_pin, 16);

        config.sensor.data_pin = 34;
        config.sanitize();
        assert_eq!(config.sensor.data_pin, 4);
    }

    #[test]
    fn connect_policy_bounds_attempts() {
        assert!(ConnectPolicy::Forever.allows(u32::MAX));
        assert!(ConnectPolicy::MaxAttempts(3).allows(3));
        assert!(!ConnectPolicy::MaxAttempts(3).allows(4));
    }

    #[test]
    fn sensor_model_parses_aliases() {
        assert_eq!(SensorModel::parse("dht11"), Some(SensorModel::Dht11));
        assert_eq!(SensorModel::parse(" AM2302 "), Some(SensorModel::Dht22));
        assert_eq!(SensorModel::parse("bme280"), None);
    }
}
