use log::debug;

use crate::{
    error::TransportError,
    types::{HttpResponse, Reading},
    wire::{TelemetryPayload, CONTENT_TYPE_JSON},
};

/// One blocking HTTP exchange. Any response that arrives, whatever its status,
/// is `Ok`; only an exchange that could not complete is an error.
pub trait HttpTransport {
    fn post(
        &mut self,
        url: &str,
        headers: &[(&str, &str)],
        body: &[u8],
    ) -> Result<HttpResponse, TransportError>;
}

impl<T: HttpTransport + ?Sized> HttpTransport for &mut T {
    fn post(
        &mut self,
        url: &str,
        headers: &[(&str, &str)],
        body: &[u8],
    ) -> Result<HttpResponse, TransportError> {
        (**self).post(url, headers, body)
    }
}

#[derive(Debug)]
pub struct TelemetryClient<T> {
    transport: T,
    endpoint_url: String,
}

impl<T: HttpTransport> TelemetryClient<T> {
    pub fn new(transport: T, endpoint_url: impl Into<String>) -> Self {
        Self {
            transport,
            endpoint_url: endpoint_url.into(),
        }
    }

    pub fn endpoint_url(&self) -> &str {
        &self.endpoint_url
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    /// Serialize `reading` and POST it once. A failed or rejected delivery is lost.
    pub fn deliver(
        &mut self,
        device_id: &str,
        reading: &Reading,
    ) -> Result<HttpResponse, TransportError> {
        let body = TelemetryPayload::new(device_id, reading)
            .to_json()
            .map_err(|err| TransportError::new(format!("payload serialization failed: {err}")))?;
        debug!("[HTTP] POST {} {}", self.endpoint_url, body);

        self.transport.post(
            &self.endpoint_url,
            &[("Content-Type", CONTENT_TYPE_JSON)],
            body.as_bytes(),
        )
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[derive(Default)]
    struct Recorder {
        requests: Vec<(String, Vec<(String, String)>, String)>,
        reply: Option<Result<HttpResponse, TransportError>>,
    }

    impl HttpTransport for Recorder {
        fn post(
            &mut self,
            url: &str,
            headers: &[(&str, &str)],
            body: &[u8],
        ) -> Result<HttpResponse, TransportError> {
            self.requests.push((
                url.to_string(),
                headers
                    .iter()
                    .map(|(k, v)| (k.to_string(), v.to_string()))
                    .collect(),
                String::from_utf8(body.to_vec()).unwrap(),
            ));
            self.reply.clone().unwrap_or(Ok(HttpResponse {
                status: 200,
                body: r#"{"ok":true}"#.to_string(),
            }))
        }
    }

    fn reading() -> Reading {
        Reading {
            temperature_c: 23.45,
            humidity: 60.12,
            taken_at_ms: 5_000,
        }
    }

    #[test]
    fn posts_json_once() {
        let mut client = TelemetryClient::new(Recorder::default(), "http://collector/api/brain");
        let response = client.deliver("envBot_01", &reading()).unwrap();

        assert_eq!(response.status, 200);
        let requests = &client.transport().requests;
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].0, "http://collector/api/brain");
        assert_eq!(
            requests[0].1,
            vec![("Content-Type".to_string(), "application/json".to_string())]
        );
        assert_eq!(
            requests[0].2,
            r#"{"machineID":"envBot_01","data":{"temp":23.45,"hum":60.12}}"#
        );
    }

    #[test]
    fn server_errors_are_responses() {
        let mut client = TelemetryClient::new(
            Recorder {
                reply: Some(Ok(HttpResponse {
                    status: 503,
                    body: "busy".to_string(),
                })),
                ..Recorder::default()
            },
            "http://collector/api/brain",
        );

        let response = client.deliver("envBot_01", &reading()).unwrap();
        assert_eq!(response.status, 503);
        assert!(!response.is_success());
    }

    #[test]
    fn transport_failure_is_not_retried() {
        let mut client = TelemetryClient::new(
            Recorder {
                reply: Some(Err(TransportError::new("connection refused"))),
                ..Recorder::default()
            },
            "http://collector/api/brain",
        );

        let err = client.deliver("envBot_01", &reading()).unwrap_err();
        assert_eq!(err.message, "connection refused");
        assert_eq!(client.transport().requests.len(), 1);
    }
}
