use std::time::Duration;

use url::Url;

use crate::error::ProxyError;

pub const DEFAULT_BACKEND_URL: &str = "http://localhost:3001";
pub const DEFAULT_MAX_UPLOAD_BYTES: u64 = 500 * 1024 * 1024;

/// What the upload relay does when the backend stream goes quiet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SilencePolicy {
    /// Emit a terminal error record once the idle timeout elapses
    #[default]
    Fail,
    /// Keep waiting for the backend indefinitely
    Wait,
}

impl std::str::FromStr for SilencePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "fail" => Ok(SilencePolicy::Fail),
            "wait" => Ok(SilencePolicy::Wait),
            _ => Err(format!("Unknown silence policy: {}", s)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ProxyConfig {
    /// Base URL of the release backend, always ending in `/`
    pub backend_url: Url,
    pub upload_idle_timeout: Duration,
    pub silence_policy: SilencePolicy,
    pub max_upload_bytes: u64,
    pub connect_timeout: Duration,
    /// Total timeout for the small JSON calls. Streaming calls only use the
    /// connect timeout.
    pub request_timeout: Duration,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            backend_url: normalize_base(
                Url::parse(DEFAULT_BACKEND_URL).expect("default backend URL is valid"),
            ),
            upload_idle_timeout: Duration::from_secs(300),
            silence_policy: SilencePolicy::Fail,
            max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
            connect_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(30),
        }
    }
}

impl ProxyConfig {
    pub fn from_env() -> Result<Self, ProxyError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup; unset keys fall back to the defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ProxyError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let backend_url = match get("BACKEND_URL") {
            Some(raw) => {
                let url = Url::parse(raw.trim()).map_err(|e| {
                    ProxyError::Config(format!("BACKEND_URL '{raw}' is not a valid URL: {e}"))
                })?;
                normalize_base(url)
            }
            None => defaults.backend_url,
        };

        let silence_policy = match get("UPLOAD_SILENCE_POLICY") {
            Some(raw) => raw.parse().map_err(ProxyError::Config)?,
            None => defaults.silence_policy,
        };

        Ok(Self {
            backend_url,
            upload_idle_timeout: seconds(&get, "UPLOAD_IDLE_TIMEOUT_SECS")?
                .unwrap_or(defaults.upload_idle_timeout),
            silence_policy,
            max_upload_bytes: parse_number(&get, "MAX_UPLOAD_BYTES")?
                .unwrap_or(defaults.max_upload_bytes),
            connect_timeout: seconds(&get, "BACKEND_CONNECT_TIMEOUT_SECS")?
                .unwrap_or(defaults.connect_timeout),
            request_timeout: seconds(&get, "BACKEND_REQUEST_TIMEOUT_SECS")?
                .unwrap_or(defaults.request_timeout),
        })
    }
}

/// `Url::join` drops the last segment of a base without a trailing slash.
fn normalize_base(mut url: Url) -> Url {
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    url
}

fn parse_number<F>(get: &F, key: &str) -> Result<Option<u64>, ProxyError>
where
    F: Fn(&str) -> Option<String>,
{
    get(key)
        .map(|raw| {
            raw.trim().parse::<u64>().map_err(|e| {
                ProxyError::Config(format!("{key} '{raw}' is not a positive integer: {e}"))
            })
        })
        .transpose()
}

/// Durations must be at least one second; zero would fail every call at once.
fn seconds<F>(get: &F, key: &str) -> Result<Option<Duration>, ProxyError>
where
    F: Fn(&str) -> Option<String>,
{
    match parse_number(get, key)? {
        Some(0) => Err(ProxyError::Config(format!("{key} must be at least 1 second"))),
        other => Ok(other.map(Duration::from_secs)),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_when_unset() {
        let config = ProxyConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config.backend_url.as_str(), "http://localhost:3001/");
        assert_eq!(config.silence_policy, SilencePolicy::Fail);
        assert_eq!(config.max_upload_bytes, DEFAULT_MAX_UPLOAD_BYTES);
        assert_eq!(config.upload_idle_timeout, Duration::from_secs(300));
    }

    #[test]
    fn reads_overrides() {
        let config = ProxyConfig::from_lookup(lookup(&[
            ("BACKEND_URL", "https://api.example.com/booth"),
            ("UPLOAD_SILENCE_POLICY", "WAIT"),
            ("UPLOAD_IDLE_TIMEOUT_SECS", "12"),
            ("MAX_UPLOAD_BYTES", "1024"),
        ]))
        .unwrap();

        assert_eq!(config.backend_url.as_str(), "https://api.example.com/booth/");
        assert_eq!(config.silence_policy, SilencePolicy::Wait);
        assert_eq!(config.upload_idle_timeout, Duration::from_secs(12));
        assert_eq!(config.max_upload_bytes, 1024);
    }

    #[test]
    fn rejects_invalid_values() {
        assert!(ProxyConfig::from_lookup(lookup(&[("BACKEND_URL", "not a url")])).is_err());
        assert!(
            ProxyConfig::from_lookup(lookup(&[("UPLOAD_SILENCE_POLICY", "retry")])).is_err()
        );
        assert!(ProxyConfig::from_lookup(lookup(&[("MAX_UPLOAD_BYTES", "-5")])).is_err());
    }

    #[test]
    fn rejects_zero_durations() {
        for key in [
            "UPLOAD_IDLE_TIMEOUT_SECS",
            "BACKEND_CONNECT_TIMEOUT_SECS",
            "BACKEND_REQUEST_TIMEOUT_SECS",
        ] {
            assert!(
                matches!(
                    ProxyConfig::from_lookup(lookup(&[(key, "0")])),
                    Err(ProxyError::Config(_))
                ),
                "{key}=0 accepted"
            );
        }
        let config = ProxyConfig::from_lookup(lookup(&[("UPLOAD_IDLE_TIMEOUT_SECS", "1")])).unwrap();
        assert_eq!(config.upload_idle_timeout, Duration::from_secs(1));
    }

    #[test]
    fn blank_values_fall_back() {
        let config = ProxyConfig::from_lookup(lookup(&[("BACKEND_URL", "  ")])).unwrap();
        assert_eq!(config.backend_url.as_str(), "http://localhost:3001/");
    }
}
