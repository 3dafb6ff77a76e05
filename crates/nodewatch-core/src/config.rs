//! Connection configuration for a btcd-compatible node.
//!
//! [`ConnectionConfig`] is built once through [`ConnectionConfigBuilder`],
//! validated in `build()`, and never mutated afterwards. Both the websocket
//! session and the HTTP POST client read from it.

use std::path::{Path, PathBuf};
use std::time::Duration;

use url::Url;

use crate::error::CoreError;

/// Default websocket endpoint path exposed by btcd.
pub const DEFAULT_ENDPOINT: &str = "ws";

const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

// ==============================================================================
// Reconnect Policy
// ==============================================================================

/// Bounded exponential backoff applied after an unexpected disconnect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub enabled: bool,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    /// `None` retries until shutdown.
    pub max_attempts: Option<u32>,
}

impl ReconnectPolicy {
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }

    /// Delay before reconnect attempt `attempt` (1-based). Doubles from
    /// `initial_delay` and saturates at `max_delay`.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let shift = attempt.saturating_sub(1).min(31);
        self.initial_delay
            .checked_mul(1u32 << shift)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }

    /// Whether attempt number `attempt` (1-based) is still allowed.
    pub fn allows_attempt(&self, attempt: u32) -> bool {
        self.enabled && self.max_attempts.map_or(true, |max| attempt <= max)
    }
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            enabled: true,
            initial_delay: Duration::from_secs(5),
            max_delay: Duration::from_secs(60),
            max_attempts: None,
        }
    }
}

// ==============================================================================
// Connection Config
// ==============================================================================

#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    host: String,
    endpoint: String,
    auth: Option<(String, String)>,
    certificates: Option<Vec<u8>>,
    disable_tls: bool,
    reconnect: ReconnectPolicy,
    request_timeout: Duration,
    http_post_mode: bool,
    requests_per_second: Option<u32>,
}

impl ConnectionConfig {
    pub fn builder(host: impl Into<String>) -> ConnectionConfigBuilder {
        ConnectionConfigBuilder {
            host: host.into(),
            endpoint: DEFAULT_ENDPOINT.to_owned(),
            user: None,
            pass: None,
            cookie_file: None,
            certificates: None,
            disable_tls: false,
            reconnect: ReconnectPolicy::default(),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            http_post_mode: false,
            requests_per_second: None,
        }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn auth(&self) -> Option<(&str, &str)> {
        self.auth.as_ref().map(|(u, p)| (u.as_str(), p.as_str()))
    }

    /// PEM-encoded certificates trusted for the TLS handshake.
    pub fn certificates(&self) -> Option<&[u8]> {
        self.certificates.as_deref()
    }

    pub fn tls_enabled(&self) -> bool {
        !self.disable_tls
    }

    pub fn reconnect(&self) -> &ReconnectPolicy {
        &self.reconnect
    }

    pub fn request_timeout(&self) -> Duration {
        self.request_timeout
    }

    pub fn http_post_mode(&self) -> bool {
        self.http_post_mode
    }

    pub fn requests_per_second(&self) -> Option<u32> {
        self.requests_per_second
    }

    /// `ws[s]://host/endpoint`
    pub fn websocket_url(&self) -> Result<Url, CoreError> {
        let scheme = if self.disable_tls { "ws" } else { "wss" };
        let raw = format!(
            "{scheme}://{}/{}",
            self.host,
            self.endpoint.trim_start_matches('/')
        );
        Url::parse(&raw)
            .map_err(|e| CoreError::InvalidConfig(format!("invalid websocket url `{raw}`: {e}")))
    }

    /// `http[s]://host`, the target of HTTP POST mode.
    pub fn http_url(&self) -> Result<Url, CoreError> {
        let scheme = if self.disable_tls { "http" } else { "https" };
        let raw = format!("{scheme}://{}", self.host);
        Url::parse(&raw)
            .map_err(|e| CoreError::InvalidConfig(format!("invalid http url `{raw}`: {e}")))
    }
}

pub struct ConnectionConfigBuilder {
    host: String,
    endpoint: String,
    user: Option<String>,
    pass: Option<String>,
    cookie_file: Option<PathBuf>,
    certificates: Option<Vec<u8>>,
    disable_tls: bool,
    reconnect: ReconnectPolicy,
    request_timeout: Duration,
    http_post_mode: bool,
    requests_per_second: Option<u32>,
}

impl ConnectionConfigBuilder {
    pub fn endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    pub fn credentials(mut self, user: impl Into<String>, pass: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self.pass = Some(pass.into());
        self
    }

    pub fn user(mut self, user: Option<String>) -> Self {
        self.user = user;
        self
    }

    pub fn pass(mut self, pass: Option<String>) -> Self {
        self.pass = pass;
        self
    }

    pub fn cookie_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.cookie_file = Some(path.into());
        self
    }

    pub fn certificates(mut self, pem: Vec<u8>) -> Self {
        self.certificates = Some(pem);
        self
    }

    pub fn disable_tls(mut self, disable: bool) -> Self {
        self.disable_tls = disable;
        self
    }

    pub fn reconnect(mut self, policy: ReconnectPolicy) -> Self {
        self.reconnect = policy;
        self
    }

    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn http_post_mode(mut self, enabled: bool) -> Self {
        self.http_post_mode = enabled;
        self
    }

    /// Only honoured in HTTP POST mode; batched calls count as one request.
    pub fn requests_per_second(mut self, limit: Option<u32>) -> Self {
        self.requests_per_second = limit;
        self
    }

    pub fn build(self) -> Result<ConnectionConfig, CoreError> {
        let host = self.host.trim().to_owned();
        if host.is_empty() {
            return Err(CoreError::InvalidConfig("host must not be empty".to_owned()));
        }
        if host.contains("://") {
            return Err(CoreError::InvalidConfig(format!(
                "host `{host}` must be `address:port` without a scheme"
            )));
        }
        if self.request_timeout.is_zero() {
            return Err(CoreError::InvalidConfig(
                "request timeout must be greater than zero".to_owned(),
            ));
        }
        if self.reconnect.enabled && self.reconnect.initial_delay > self.reconnect.max_delay {
            return Err(CoreError::InvalidConfig(
                "reconnect initial delay must not exceed max delay".to_owned(),
            ));
        }
        if self.disable_tls && self.certificates.is_some() {
            return Err(CoreError::InvalidConfig(
                "certificates were supplied but TLS is disabled".to_owned(),
            ));
        }
        if self.requests_per_second == Some(0) {
            return Err(CoreError::InvalidConfig(
                "requests_per_second must be at least 1".to_owned(),
            ));
        }

        let auth = resolve_auth(
            self.user.as_deref(),
            self.pass.as_deref(),
            self.cookie_file.as_deref(),
        )?;

        Ok(ConnectionConfig {
            host,
            endpoint: self.endpoint,
            auth,
            certificates: self.certificates,
            disable_tls: self.disable_tls,
            reconnect: self.reconnect,
            request_timeout: self.request_timeout,
            http_post_mode: self.http_post_mode,
            requests_per_second: self.requests_per_second,
        })
    }
}

// ==============================================================================
// Credentials and Certificates
// ==============================================================================

/// Authentication precedence:
/// 1. explicit `user` + `pass`
/// 2. cookie file (`username:password`) from `cookie_file`
/// 3. no auth
fn resolve_auth(
    user: Option<&str>,
    pass: Option<&str>,
    cookie_file: Option<&Path>,
) -> Result<Option<(String, String)>, CoreError> {
    match (user, pass) {
        (Some(u), Some(p)) => return Ok(Some((u.to_owned(), p.to_owned()))),
        (Some(_), None) | (None, Some(_)) => {
            return Err(CoreError::InvalidConfig(
                "both rpc user and rpc pass must be set together".to_owned(),
            ));
        }
        (None, None) => {}
    }

    let Some(cookie_file) = cookie_file else {
        return Ok(None);
    };

    let content = std::fs::read_to_string(cookie_file).map_err(|e| {
        CoreError::InvalidConfig(format!(
            "failed to read rpc cookie file {}: {e}",
            cookie_file.display()
        ))
    })?;
    let line = content
        .lines()
        .next()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .ok_or_else(|| {
            CoreError::InvalidConfig(format!("rpc cookie file {} is empty", cookie_file.display()))
        })?;

    let (cookie_user, cookie_pass) = line.split_once(':').ok_or_else(|| {
        CoreError::InvalidConfig(format!(
            "rpc cookie file {} must contain `username:password`",
            cookie_file.display()
        ))
    })?;
    if cookie_user.is_empty() || cookie_pass.is_empty() {
        return Err(CoreError::InvalidConfig(format!(
            "rpc cookie file {} must contain non-empty `username:password`",
            cookie_file.display()
        )));
    }

    Ok(Some((cookie_user.to_owned(), cookie_pass.to_owned())))
}

/// Read a PEM certificate bundle from disk.
pub fn load_certificates(path: &Path) -> Result<Vec<u8>, CoreError> {
    std::fs::read(path).map_err(|e| {
        CoreError::InvalidConfig(format!(
            "failed to read rpc certificate {}: {e}",
            path.display()
        ))
    })
}

/// Application data directory btcd uses for `app` on this platform:
/// `~/.app` on Unix, `<local data dir>/App` on Windows and macOS.
pub fn app_data_dir(app: &str) -> Option<PathBuf> {
    let app = app.trim_start_matches('.');
    if app.is_empty() {
        return None;
    }

    if cfg!(any(windows, target_os = "macos")) {
        let mut chars = app.chars();
        let first = chars.next()?;
        let capitalized: String = first.to_uppercase().chain(chars).collect();
        dirs::data_local_dir().map(|dir| dir.join(capitalized))
    } else {
        dirs::home_dir().map(|home| home.join(format!(".{}", app.to_lowercase())))
    }
}

/// Default location of btcd's self-signed RPC certificate.
pub fn default_cert_path() -> Option<PathBuf> {
    app_data_dir("btcd").map(|dir| dir.join("rpc.cert"))
}
