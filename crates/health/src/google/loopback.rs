//! Loopback redirect handler for the OAuth consent flow
//!
//! Binds a local port, opens the consent URL in the browser and waits for
//! Google to redirect back with `?code=...` or `?error=...`.

use log::{debug, info, warn};
use std::io::{BufRead, BufReader, ErrorKind, Write};
use std::net::{TcpListener, TcpStream};
use std::thread;
use std::time::{Duration, Instant};
use url::Url;

use super::{AuthorizationCode, ConsentRequest, RedirectHandler};
use crate::error::AuthError;

/// Result of one request hitting the loopback listener
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallbackOutcome {
    Code(String),
    Error(String),
    /// Unrelated request such as `/favicon.ico`
    Ignored,
}

/// Parse an HTTP request line (`GET /?code=... HTTP/1.1`)
pub fn parse_callback(request_line: &str) -> CallbackOutcome {
    let Some(target) = request_line.split_whitespace().nth(1) else {
        return CallbackOutcome::Ignored;
    };
    let Ok(url) = Url::parse(&format!("http://localhost{}", target)) else {
        return CallbackOutcome::Ignored;
    };

    let mut code = None;
    let mut error = None;
    for (key, value) in url.query_pairs() {
        match key.as_ref() {
            "code" => code = Some(value.into_owned()),
            "error" => error = Some(value.into_owned()),
            _ => {}
        }
    }

    match (error, code) {
        (Some(error), _) => CallbackOutcome::Error(error),
        (None, Some(code)) => CallbackOutcome::Code(code),
        (None, None) => CallbackOutcome::Ignored,
    }
}

/// Consent via the system browser and a local HTTP listener
#[derive(Debug, Clone)]
pub struct LoopbackRedirect {
    /// Ports tried in order; `0` lets the OS pick
    pub ports: Vec<u16>,
    pub open_browser: bool,
    /// How long to wait for the user to finish consent
    pub timeout: Duration,
}

impl Default for LoopbackRedirect {
    fn default() -> Self {
        Self {
            ports: Self::DEFAULT_PORTS.to_vec(),
            open_browser: true,
            timeout: Duration::from_secs(300),
        }
    }
}

impl LoopbackRedirect {
    pub const DEFAULT_PORTS: [u16; 5] = [8080, 8081, 8082, 8083, 0];
    const POLL_INTERVAL: Duration = Duration::from_millis(100);
    const READ_TIMEOUT: Duration = Duration::from_secs(5);

    /// Bind the first free port
    pub fn bind(&self) -> Result<(TcpListener, u16), AuthError> {
        for &port in &self.ports {
            match TcpListener::bind(("127.0.0.1", port)) {
                Ok(listener) => {
                    let bound = listener.local_addr().map(|a| a.port()).unwrap_or(port);
                    debug!("OAuth redirect listener on port {}", bound);
                    return Ok((listener, bound));
                }
                Err(e) => debug!("Port {} unavailable: {}", port, e),
            }
        }

        Err(AuthError::NoLoopbackPort {
            tried: self
                .ports
                .iter()
                .map(|p| p.to_string())
                .collect::<Vec<_>>()
                .join(", "),
        })
    }

    /// Serve requests until one carries a code or an error
    pub fn wait_for_code(&self, listener: &TcpListener) -> Result<String, AuthError> {
        listener
            .set_nonblocking(true)
            .map_err(|e| AuthError::Rejected(format!("Failed to configure listener: {}", e)))?;
        let deadline = Instant::now() + self.timeout;

        loop {
            match listener.accept() {
                Ok((stream, _)) => match Self::handle_connection(stream) {
                    CallbackOutcome::Code(code) => return Ok(code),
                    CallbackOutcome::Error(error) => return Err(AuthError::Rejected(error)),
                    CallbackOutcome::Ignored => continue,
                },
                Err(e) if e.kind() == ErrorKind::WouldBlock => {
                    if Instant::now() >= deadline {
                        return Err(AuthError::Rejected(
                            "Timed out waiting for the authorization redirect".to_string(),
                        ));
                    }
                    thread::sleep(Self::POLL_INTERVAL);
                }
                Err(e) => {
                    return Err(AuthError::Rejected(format!(
                        "Failed to accept redirect: {}",
                        e
                    )));
                }
            }
        }
    }

    fn handle_connection(mut stream: TcpStream) -> CallbackOutcome {
        if stream.set_nonblocking(false).is_err()
            || stream.set_read_timeout(Some(Self::READ_TIMEOUT)).is_err()
        {
            return CallbackOutcome::Ignored;
        }

        let mut request_line = String::new();
        if let Err(e) = BufReader::new(&stream).read_line(&mut request_line) {
            debug!("Dropping unreadable redirect request: {}", e);
            return CallbackOutcome::Ignored;
        }

        let outcome = parse_callback(&request_line);
        let (status, body) = match &outcome {
            CallbackOutcome::Code(_) => (
                "200 OK",
                "Authorization successful! You can close this window.",
            ),
            CallbackOutcome::Error(_) => {
                ("400 Bad Request", "Authorization failed. Please try again.")
            }
            CallbackOutcome::Ignored => ("404 Not Found", ""),
        };

        let response = format!(
            "HTTP/1.1 {}\r\nContent-Type: text/html\r\nConnection: close\r\n\r\n<html><body><h1>{}</h1></body></html>",
            status, body
        );
        stream.write_all(response.as_bytes()).ok();

        outcome
    }
}

impl RedirectHandler for LoopbackRedirect {
    fn authorize(&self, request: &ConsentRequest) -> Result<AuthorizationCode, AuthError> {
        let (listener, port) = self.bind()?;
        let redirect_uri = format!("http://127.0.0.1:{}", port);
        let url = request.authorization_url(&redirect_uri);

        info!("Authorize access in your browser: {}", url);
        if self.open_browser {
            if let Err(e) = open::that(&url) {
                warn!("Failed to open browser: {}", e);
            }
        }

        let code = self.wait_for_code(&listener)?;
        Ok(AuthorizationCode { code, redirect_uri })
    }
}
