//! Blocking HTTP helpers shared by the network providers
//!
//! Generation submits are sent exactly once: they spend remote credits, so a
//! failure goes back to the user rather than being resubmitted. Idempotent
//! reads (status polls, downloads) are retried with exponential backoff.

use crate::cancel::CancelProbe;
use loom_core::{ProviderError, ProviderErrorKind};
use serde_json::Value;
use std::io::{Read, Write};
use std::path::Path;
use std::time::Duration;
use tracing::debug;

/// Upper bound on a JSON response body (inline base64 images can be large)
const MAX_JSON_BYTES: u64 = 64 * 1024 * 1024;
const DOWNLOAD_CHUNK: usize = 64 * 1024;

/// Backoff schedule for idempotent requests
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base: Duration,
    pub factor: u32,
    pub cap: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base: Duration::from_secs(1),
            factor: 2,
            cap: Duration::from_secs(8),
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `attempt` (0-based)
    pub fn delay(&self, attempt: u32) -> Duration {
        let multiplier = self.factor.saturating_pow(attempt);
        self.base.saturating_mul(multiplier).min(self.cap)
    }

    /// Run `op` until it succeeds, fails permanently, or retries run out.
    ///
    /// Only transient failures are retried. Backoff sleeps observe cancellation.
    pub fn run<T>(
        &self,
        cancel: &CancelProbe,
        what: &str,
        mut op: impl FnMut() -> Result<T, ProviderError>,
    ) -> Result<T, ProviderError> {
        let mut attempt = 0;
        loop {
            cancel.check()?;
            match op() {
                Ok(value) => return Ok(value),
                Err(e) if e.kind.is_transient() && attempt < self.max_retries => {
                    let delay = self.delay(attempt);
                    debug!(what, attempt, delay_ms = delay.as_millis() as u64, error = %e, "retrying");
                    cancel.sleep(delay)?;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

fn build_agent(timeout: Duration) -> ureq::Agent {
    let config = ureq::Agent::config_builder()
        .timeout_global(Some(timeout))
        .build();
    config.into()
}

/// Map a transport or status error onto the provider error taxonomy
pub fn map_ureq_error(e: ureq::Error) -> ProviderError {
    match e {
        ureq::Error::StatusCode(code) => map_status(code),
        ureq::Error::Timeout(t) => {
            ProviderError::new(ProviderErrorKind::Timeout, format!("request timed out ({})", t))
        }
        ureq::Error::Io(io) => ProviderError::network(io.to_string()),
        ureq::Error::ConnectionFailed => ProviderError::network("connection failed"),
        ureq::Error::HostNotFound => ProviderError::network("host not found"),
        ureq::Error::BodyExceedsLimit(limit) => {
            ProviderError::bad_response(format!("response larger than {} bytes", limit))
        }
        other => ProviderError::bad_response(other.to_string()),
    }
}

/// Map a non-2xx HTTP status onto the provider error taxonomy
pub fn map_status(code: u16) -> ProviderError {
    match code {
        401 | 403 => ProviderError::new(
            ProviderErrorKind::AuthMissing,
            format!("HTTP {}: credential rejected", code),
        ),
        429 => ProviderError::new(ProviderErrorKind::RateLimited, "HTTP 429: rate limited"),
        500..=599 => ProviderError::network(format!("HTTP {}: server error", code)),
        _ => ProviderError::bad_response(format!("HTTP {}", code)),
    }
}

/// POST a JSON payload once and parse the JSON answer
pub fn post_json(
    url: &str,
    headers: &[(&str, String)],
    payload: &Value,
    timeout: Duration,
    cancel: &CancelProbe,
) -> Result<Value, ProviderError> {
    cancel.check()?;
    let agent = build_agent(timeout);
    let mut request = agent.post(url);
    for (name, value) in headers {
        request = request.header(*name, value.as_str());
    }
    let mut response = request.send_json(payload).map_err(map_ureq_error)?;
    cancel.check()?;
    response
        .body_mut()
        .with_config()
        .limit(MAX_JSON_BYTES)
        .read_json::<Value>()
        .map_err(|e| ProviderError::bad_response(format!("invalid JSON response: {}", e)))
}

/// GET a JSON document, retrying transient failures
pub fn get_json_with_retry(
    url: &str,
    headers: &[(&str, String)],
    timeout: Duration,
    cancel: &CancelProbe,
    policy: &RetryPolicy,
) -> Result<Value, ProviderError> {
    policy.run(cancel, url, || {
        let agent = build_agent(timeout);
        let mut request = agent.get(url);
        for (name, value) in headers {
            request = request.header(*name, value.as_str());
        }
        let mut response = request.call().map_err(map_ureq_error)?;
        response
            .body_mut()
            .with_config()
            .limit(MAX_JSON_BYTES)
            .read_json::<Value>()
            .map_err(|e| ProviderError::bad_response(format!("invalid JSON response: {}", e)))
    })
}

/// Download `url` into `dest` in chunks, checking cancellation between chunks.
/// Retries transient failures from the start. Returns the byte count.
pub fn download_to(
    url: &str,
    dest: &Path,
    timeout: Duration,
    cancel: &CancelProbe,
    policy: &RetryPolicy,
) -> Result<u64, ProviderError> {
    policy.run(cancel, url, || {
        let agent = build_agent(timeout);
        let response = agent.get(url).call().map_err(map_ureq_error)?;
        let mut reader = response.into_body().into_reader();
        let mut file = std::fs::File::create(dest).map_err(|e| write_error(dest, e))?;

        let mut buf = vec![0u8; DOWNLOAD_CHUNK];
        let mut total = 0u64;
        loop {
            cancel.check()?;
            let n = reader
                .read(&mut buf)
                .map_err(|e| ProviderError::network(format!("download interrupted: {}", e)))?;
            if n == 0 {
                break;
            }
            file.write_all(&buf[..n]).map_err(|e| write_error(dest, e))?;
            total += n as u64;
        }
        file.flush().map_err(|e| write_error(dest, e))?;
        Ok(total)
    })
}

/// Write provider-supplied bytes into a scratch artifact
pub fn write_artifact(dest: &Path, bytes: &[u8]) -> Result<(), ProviderError> {
    std::fs::write(dest, bytes).map_err(|e| write_error(dest, e))
}

fn write_error(dest: &Path, e: std::io::Error) -> ProviderError {
    ProviderError::bad_response(format!("failed to write {}: {}", dest.display(), e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cancel::CancellationToken;
    use std::cell::Cell;
    use std::net::{TcpListener, TcpStream};
    use std::sync::Arc;
    use std::time::Instant;

    fn fast_policy() -> RetryPolicy {
        RetryPolicy {
            max_retries: 3,
            base: Duration::from_millis(1),
            factor: 2,
            cap: Duration::from_millis(4),
        }
    }

    #[test]
    fn test_default_backoff_schedule() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay(0), Duration::from_secs(1));
        assert_eq!(policy.delay(1), Duration::from_secs(2));
        assert_eq!(policy.delay(2), Duration::from_secs(4));
        assert_eq!(policy.delay(3), Duration::from_secs(8));
        assert_eq!(policy.delay(10), Duration::from_secs(8));
    }

    #[test]
    fn test_status_mapping() {
        assert_eq!(map_status(401).kind, ProviderErrorKind::AuthMissing);
        assert_eq!(map_status(403).kind, ProviderErrorKind::AuthMissing);
        assert_eq!(map_status(429).kind, ProviderErrorKind::RateLimited);
        assert_eq!(map_status(503).kind, ProviderErrorKind::Network);
        assert_eq!(map_status(404).kind, ProviderErrorKind::BadResponse);
    }

    #[test]
    fn test_retry_transient_then_succeed() {
        let token = CancellationToken::new();
        let probe = CancelProbe::detached(&token);
        let calls = Cell::new(0);
        let result = fast_policy().run(&probe, "poll", || {
            calls.set(calls.get() + 1);
            if calls.get() < 3 {
                Err(ProviderError::network("reset"))
            } else {
                Ok(42)
            }
        });
        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.get(), 3);
    }

    #[test]
    fn test_retry_gives_up_after_max() {
        let token = CancellationToken::new();
        let probe = CancelProbe::detached(&token);
        let calls = Cell::new(0);
        let result: Result<(), _> = fast_policy().run(&probe, "poll", || {
            calls.set(calls.get() + 1);
            Err(ProviderError::network("down"))
        });
        assert_eq!(result.unwrap_err().kind, ProviderErrorKind::Network);
        assert_eq!(calls.get(), 4);
    }

    #[test]
    fn test_permanent_errors_not_retried() {
        let token = CancellationToken::new();
        let probe = CancelProbe::detached(&token);
        let calls = Cell::new(0);
        let result: Result<(), _> = fast_policy().run(&probe, "poll", || {
            calls.set(calls.get() + 1);
            Err(map_status(429))
        });
        assert_eq!(result.unwrap_err().kind, ProviderErrorKind::RateLimited);
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn test_retry_stops_on_cancel() {
        let token = CancellationToken::new();
        let probe = CancelProbe::detached(&token);
        let calls = Cell::new(0);
        let result: Result<(), _> = fast_policy().run(&probe, "poll", || {
            calls.set(calls.get() + 1);
            token.cancel_all();
            Err(ProviderError::network("down"))
        });
        assert!(result.unwrap_err().is_cancelled());
        assert_eq!(calls.get(), 1);
    }

    /// Consume one request head from `stream`
    fn read_request(stream: &mut TcpStream) {
        let mut buf = [0u8; 1024];
        let mut seen = Vec::new();
        while !seen.windows(4).any(|w| w == b"\r\n\r\n") {
            match stream.read(&mut buf) {
                Ok(0) | Err(_) => return,
                Ok(n) => seen.extend_from_slice(&buf[..n]),
            }
        }
    }

    fn local_server() -> (TcpListener, String) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let url = format!("http://{}/model.glb", listener.local_addr().unwrap());
        (listener, url)
    }

    #[test]
    fn test_download_stops_between_chunks_on_cancel() {
        let (listener, url) = local_server();
        let server = std::thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            read_request(&mut stream);
            let head = "HTTP/1.1 200 OK\r\nContent-Length: 1048576\r\nConnection: close\r\n\r\n";
            if stream.write_all(head.as_bytes()).is_err() {
                return;
            }
            let chunk = [7u8; 1024];
            for _ in 0..1024 {
                if stream.write_all(&chunk).and_then(|_| stream.flush()).is_err() {
                    return;
                }
                std::thread::sleep(Duration::from_millis(20));
            }
        });

        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("model.glb");
        let token = CancellationToken::new();
        let probe = CancelProbe::detached(&token);
        let canceller = Arc::clone(&token);
        let trigger = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(150));
            canceller.cancel_all();
        });

        let started = Instant::now();
        let err = download_to(&url, &dest, Duration::from_secs(30), &probe, &fast_policy())
            .unwrap_err();
        assert!(err.is_cancelled());
        assert!(started.elapsed() < Duration::from_secs(5));

        trigger.join().unwrap();
        server.join().unwrap();
    }

    #[test]
    fn test_download_retries_server_error_and_rewrites_file() {
        let body = b"glTF binary payload".to_vec();
        let (listener, url) = local_server();
        let served = body.clone();
        let server = std::thread::spawn(move || {
            let (mut first, _) = listener.accept().unwrap();
            read_request(&mut first);
            first
                .write_all(
                    b"HTTP/1.1 503 Service Unavailable\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
                )
                .unwrap();
            drop(first);

            let (mut second, _) = listener.accept().unwrap();
            read_request(&mut second);
            let head = format!(
                "HTTP/1.1 200 OK\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                served.len()
            );
            second.write_all(head.as_bytes()).unwrap();
            second.write_all(&served).unwrap();
        });

        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("model.glb");
        std::fs::write(&dest, vec![0u8; 4096]).unwrap();
        let token = CancellationToken::new();
        let probe = CancelProbe::detached(&token);

        let written = download_to(&url, &dest, Duration::from_secs(10), &probe, &fast_policy())
            .unwrap();
        assert_eq!(written, body.len() as u64);
        assert_eq!(std::fs::read(&dest).unwrap(), body);
        server.join().unwrap();
    }
}
