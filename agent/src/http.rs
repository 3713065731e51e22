use std::{
    io::{ErrorKind, Read, Write},
    net::{TcpStream, ToSocketAddrs},
    time::Duration,
};

use envbot_common::{HttpResponse, HttpTransport, TransportError};
use tracing::debug;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);
const MAX_RESPONSE_BYTES: usize = 16 * 1024;
const READ_CHUNK: usize = 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
struct Target {
    host: String,
    port: u16,
    path: String,
}

impl Target {
    fn parse(url: &str) -> Result<Self, TransportError> {
        if url.starts_with("https://") {
            return Err(TransportError::new(
                "https endpoints are only reachable from the esp32 build",
            ));
        }

        let rest = url
            .strip_prefix("http://")
            .ok_or_else(|| TransportError::new(format!("unsupported url `{url}`")))?;
        let (authority, path) = match rest.find('/') {
            Some(index) => rest.split_at(index),
            None => (rest, "/"),
        };

        let (host, port) = match authority.rsplit_once(':') {
            Some((host, port)) => {
                let port = port
                    .parse::<u16>()
                    .map_err(|_| TransportError::new(format!("invalid port in `{url}`")))?;
                (host, port)
            }
            None => (authority, 80),
        };

        if host.is_empty() {
            return Err(TransportError::new(format!("missing host in `{url}`")));
        }

        Ok(Self {
            host: host.to_string(),
            port,
            path: path.to_string(),
        })
    }

    fn host_header(&self) -> String {
        if self.port == 80 {
            self.host.clone()
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }
}

/// Blocking HTTP/1.1 over a plain TCP socket, one connection per request.
#[derive(Debug, Clone)]
pub struct HostHttpTransport {
    timeout: Duration,
}

impl HostHttpTransport {
    pub fn new(timeout: Option<Duration>) -> Self {
        Self {
            timeout: timeout.unwrap_or(DEFAULT_TIMEOUT),
        }
    }
}

impl HttpTransport for HostHttpTransport {
    fn post(
        &mut self,
        url: &str,
        headers: &[(&str, &str)],
        body: &[u8],
    ) -> Result<HttpResponse, TransportError> {
        let target = Target::parse(url)?;

        let addr = (target.host.as_str(), target.port)
            .to_socket_addrs()
            .map_err(|err| TransportError::new(format!("dns lookup for {} failed: {err}", target.host)))?
            .next()
            .ok_or_else(|| TransportError::new(format!("no address for {}", target.host)))?;

        let mut stream = TcpStream::connect_timeout(&addr, self.timeout)
            .map_err(|err| TransportError::new(format!("connect to {addr} failed: {err}")))?;
        stream
            .set_read_timeout(Some(self.timeout))
            .and_then(|()| stream.set_write_timeout(Some(self.timeout)))
            .map_err(|err| TransportError::new(format!("socket setup failed: {err}")))?;

        let request = build_request(&target, headers, body);
        debug!("sending {} byte request to {addr}", request.len());
        stream
            .write_all(&request)
            .and_then(|()| stream.flush())
            .map_err(|err| TransportError::new(format!("send failed: {err}")))?;

        let raw = read_response(&mut stream)?;
        parse_response(&raw)
    }
}

fn build_request(target: &Target, headers: &[(&str, &str)], body: &[u8]) -> Vec<u8> {
    let mut head = format!(
        "POST {} HTTP/1.1\r\nHost: {}\r\n",
        target.path,
        target.host_header()
    );
    for (name, value) in headers {
        head.push_str(name);
        head.push_str(": ");
        head.push_str(value);
        head.push_str("\r\n");
    }
    head.push_str(&format!(
        "Content-Length: {}\r\nConnection: close\r\n\r\n",
        body.len()
    ));

    let mut request = head.into_bytes();
    request.extend_from_slice(body);
    request
}

fn read_response(stream: &mut impl Read) -> Result<Vec<u8>, TransportError> {
    let mut raw = Vec::new();
    let mut chunk = [0_u8; READ_CHUNK];

    loop {
        match stream.read(&mut chunk) {
            Ok(0) => break,
            Ok(read) => {
                raw.extend_from_slice(&chunk[..read]);
                if raw.len() >= MAX_RESPONSE_BYTES || is_complete(&raw) {
                    break;
                }
            }
            Err(err) if err.kind() == ErrorKind::Interrupted => continue,
            Err(err) if head_end(&raw).is_some() => {
                debug!("response read stopped early: {err}");
                break;
            }
            Err(err) => return Err(TransportError::new(format!("receive failed: {err}"))),
        }
    }

    if raw.is_empty() {
        return Err(TransportError::new("connection closed without a response"));
    }
    Ok(raw)
}

fn head_end(raw: &[u8]) -> Option<usize> {
    raw.windows(4).position(|w| w == b"\r\n\r\n").map(|i| i + 4)
}

struct Head {
    status: u16,
    content_length: Option<usize>,
    chunked: bool,
}

fn parse_head(head: &[u8]) -> Result<Head, TransportError> {
    let text = String::from_utf8_lossy(head);
    let mut lines = text.split("\r\n");

    let status_line = lines.next().unwrap_or_default();
    let mut parts = status_line.split_whitespace();
    let version = parts.next().unwrap_or_default();
    if !version.starts_with("HTTP/") {
        return Err(TransportError::new(format!(
            "malformed status line `{status_line}`"
        )));
    }
    let status = parts
        .next()
        .and_then(|code| code.parse::<u16>().ok())
        .ok_or_else(|| TransportError::new(format!("malformed status line `{status_line}`")))?;

    let mut content_length = None;
    let mut chunked = false;
    for line in lines {
        let Some((name, value)) = line.split_once(':') else {
            continue;
        };
        let value = value.trim();
        if name.eq_ignore_ascii_case("content-length") {
            content_length = value.parse::<usize>().ok();
        } else if name.eq_ignore_ascii_case("transfer-encoding") {
            chunked = value.to_ascii_lowercase().contains("chunked");
        }
    }

    Ok(Head {
        status,
        content_length,
        chunked,
    })
}

fn is_complete(raw: &[u8]) -> bool {
    let Some(end) = head_end(raw) else {
        return false;
    };
    let Ok(head) = parse_head(&raw[..end]) else {
        return true;
    };
    let body = &raw[end..];
    if head.chunked {
        return decode_chunked(body).is_some();
    }
    match head.content_length {
        Some(len) => body.len() >= len,
        None => false,
    }
}

fn decode_chunked(mut data: &[u8]) -> Option<Vec<u8>> {
    let mut body = Vec::new();
    loop {
        let line_end = data.windows(2).position(|w| w == b"\r\n")?;
        let size_field = std::str::from_utf8(&data[..line_end]).ok()?;
        let size_hex = size_field.split(';').next()?.trim();
        let size = usize::from_str_radix(size_hex, 16).ok()?;
        data = &data[line_end + 2..];

        if size == 0 {
            return Some(body);
        }
        let framed = size.checked_add(2)?;
        let chunk = data.get(..size)?;
        if data.get(size..framed)? != b"\r\n" {
            return None;
        }
        body.extend_from_slice(chunk);
        data = &data[framed..];
    }
}

fn parse_response(raw: &[u8]) -> Result<HttpResponse, TransportError> {
    let end = head_end(raw).ok_or_else(|| TransportError::new("truncated response headers"))?;
    let head = parse_head(&raw[..end])?;
    let rest = &raw[end..];

    let body = if head.chunked {
        decode_chunked(rest).ok_or_else(|| TransportError::new("truncated chunked body"))?
    } else {
        match head.content_length {
            Some(len) => rest[..len.min(rest.len())].to_vec(),
            None => rest.to_vec(),
        }
    };

    Ok(HttpResponse {
        status: head.status,
        body: String::from_utf8_lossy(&body).into_owned(),
    })
}
