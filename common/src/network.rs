use std::time::Duration;

use log::{info, warn};

use crate::{
    config::{ConnectPolicy, NetworkConfig},
    error::NetworkError,
    types::ConnectionState,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub ssid: String,
    pub password: String,
}

impl Credentials {
    pub fn new(ssid: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            ssid: ssid.into(),
            password: password.into(),
        }
    }

    pub fn is_open_network(&self) -> bool {
        self.password.is_empty()
    }
}

impl From<&NetworkConfig> for Credentials {
    fn from(network: &NetworkConfig) -> Self {
        Self::new(network.wifi_ssid.clone(), network.wifi_pass.clone())
    }
}

/// The WiFi association as seen by the sampling loop.
pub trait NetworkSession {
    /// Start associating with `credentials`. Returns without waiting for the link.
    fn begin(&mut self, credentials: &Credentials) -> Result<(), NetworkError>;

    /// Observe the radio. Never changes the association.
    fn status(&mut self) -> ConnectionState;

    /// Ask the radio to re-associate. Fire-and-forget: the outcome is seen on a
    /// later `status()`.
    fn reconnect(&mut self);
}

impl<N: NetworkSession + ?Sized> NetworkSession for &mut N {
    fn begin(&mut self, credentials: &Credentials) -> Result<(), NetworkError> {
        (**self).begin(credentials)
    }

    fn status(&mut self) -> ConnectionState {
        (**self).status()
    }

    fn reconnect(&mut self) {
        (**self).reconnect()
    }
}

/// Begin association and poll `status()` every `poll` until connected.
///
/// With [`ConnectPolicy::Forever`] this stalls start-up until the access point
/// answers. Returns the number of status checks it took.
pub fn connect<N, F>(
    session: &mut N,
    credentials: &Credentials,
    policy: ConnectPolicy,
    poll: Duration,
    mut sleep: F,
) -> Result<u32, NetworkError>
where
    N: NetworkSession + ?Sized,
    F: FnMut(Duration),
{
    info!("[WiFi] Connecting to `{}`...", credentials.ssid);
    session.begin(credentials)?;

    let mut attempt: u32 = 0;
    loop {
        attempt = attempt.saturating_add(1);
        if session.status().is_connected() {
            info!("[WiFi] Connected after {attempt} status check(s)");
            return Ok(attempt);
        }

        if !policy.allows(attempt.saturating_add(1)) {
            warn!("[WiFi] gave up after {attempt} status check(s)");
            return Err(NetworkError::AssociationTimeout { attempts: attempt });
        }

        if attempt % 20 == 0 {
            info!("[WiFi] still waiting for association ({attempt} checks)");
        }
        sleep(poll);
    }
}
