use crate::error::ConfigError;
use crate::protocol::Location;
use crate::swap::FadeStrategy;
use std::time::Duration;

const DEFAULT_LOCATION: &str = "http://localhost/";
const DEFAULT_OUTBOUND_QUEUE_CAP: usize = 256;
const DEFAULT_FRAME_INTERVAL_MS: u64 = 16;
const DEFAULT_FADE_MS: u64 = 150;
const DEFAULT_UPLOAD_PREFIX: &str = "/uploaded-files";
const DEFAULT_DOWNLOAD_PREFIX: &str = "/_download";

#[derive(Debug, Clone, PartialEq)]
pub struct ClientConfig {
    pub location: Location,
    pub outbound_queue_cap: usize,
    pub frame_interval: Duration,
    pub fade: FadeStrategy,
    pub upload_prefix: String,
    pub download_prefix: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            location: default_location(),
            outbound_queue_cap: DEFAULT_OUTBOUND_QUEUE_CAP,
            frame_interval: Duration::from_millis(DEFAULT_FRAME_INTERVAL_MS),
            fade: FadeStrategy::from_duration(Duration::from_millis(DEFAULT_FADE_MS)),
            upload_prefix: DEFAULT_UPLOAD_PREFIX.to_string(),
            download_prefix: DEFAULT_DOWNLOAD_PREFIX.to_string(),
        }
    }
}

fn default_location() -> Location {
    Location {
        href: DEFAULT_LOCATION.to_string(),
        pathname: "/".to_string(),
        host: "localhost".to_string(),
        hostname: "localhost".to_string(),
        search: String::new(),
    }
}

impl ClientConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Builds a config from any variable source. Numeric variables that are
    /// missing, unparsable or out of range fall back to their defaults; an
    /// unparsable location is an error.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let raw_location = lookup("UI_CLIENT_LOCATION").unwrap_or_else(|| DEFAULT_LOCATION.to_string());
        let location = Location::parse(&raw_location).map_err(|source| ConfigError::InvalidLocation {
            value: raw_location.clone(),
            source,
        })?;

        let number = |name: &str| lookup(name).and_then(|raw| raw.trim().parse::<u64>().ok());

        let outbound_queue_cap = number("UI_CLIENT_OUTBOUND_QUEUE_CAP")
            .and_then(|value| usize::try_from(value).ok())
            .filter(|value| *value > 0)
            .unwrap_or(DEFAULT_OUTBOUND_QUEUE_CAP);
        let frame_interval_ms = number("UI_CLIENT_FRAME_INTERVAL_MS")
            .filter(|value| *value > 0)
            .unwrap_or(DEFAULT_FRAME_INTERVAL_MS);
        let fade_ms = number("UI_CLIENT_FADE_MS").unwrap_or(DEFAULT_FADE_MS);

        Ok(Self {
            location,
            outbound_queue_cap,
            frame_interval: Duration::from_millis(frame_interval_ms),
            fade: FadeStrategy::from_duration(Duration::from_millis(fade_ms)),
            upload_prefix: lookup("UI_CLIENT_UPLOAD_PREFIX")
                .unwrap_or_else(|| DEFAULT_UPLOAD_PREFIX.to_string()),
            download_prefix: lookup("UI_CLIENT_DOWNLOAD_PREFIX")
                .unwrap_or_else(|| DEFAULT_DOWNLOAD_PREFIX.to_string()),
        })
    }
}
