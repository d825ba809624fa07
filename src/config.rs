//! Runtime settings, read from the environment (and `.env`).

use crate::core::postprocess::TrimMode;
use crate::core::prompt::MODEL_NAME;
use di::inject;
use di::injectable;
use log::warn;
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

pub const DEFAULT_API_URL: &str = "https://api.replicate.com";
pub const DEFAULT_BIND_ADDRESS: &str = "0.0.0.0:3000";
pub const DEFAULT_LANGUAGE: &str = "en_US";
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 300;
const DEFAULT_SESSION_IDLE_SECS: u64 = 3600;
const DEFAULT_MAX_UPLOAD_BYTES: usize = 10 * 1024 * 1024;

#[derive(Debug, Clone)]
pub struct Settings {
    /// Bearer token for the inference provider. Checked lazily, on the first call.
    pub api_token: Option<String>,
    pub api_url: String,
    pub model: String,
    pub bind_address: String,
    pub locales_dir: PathBuf,
    pub language: String,
    pub trim_mode: TrimMode,
    pub request_timeout: Duration,
    pub session_idle: Duration,
    pub max_upload_bytes: usize,
}

#[injectable]
impl Settings {
    #[inject]
    pub fn create() -> Settings {
        Settings::from_env()
    }
}

impl Settings {
    pub fn from_env() -> Settings {
        dotenvy::dotenv().ok();
        Settings::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Settings {
        let api_token = lookup("REPLICATE_API_TOKEN")
            .map(|token| token.trim().to_owned())
            .filter(|token| !token.is_empty());

        Settings {
            api_token,
            api_url: lookup("REPLICATE_API_URL")
                .map(|url| url.trim_end_matches('/').to_owned())
                .unwrap_or_else(|| DEFAULT_API_URL.to_owned()),
            model: lookup("MODEL_NAME").unwrap_or_else(|| MODEL_NAME.to_owned()),
            bind_address: lookup("BIND_ADDRESS").unwrap_or_else(|| DEFAULT_BIND_ADDRESS.to_owned()),
            locales_dir: lookup("LOCALES_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("locales")),
            language: lookup("APP_LANGUAGE").unwrap_or_else(|| DEFAULT_LANGUAGE.to_owned()),
            trim_mode: parse_or_default(&lookup, "SENTINEL_TRIM", TrimMode::default()),
            request_timeout: Duration::from_secs(parse_or_default(
                &lookup,
                "REQUEST_TIMEOUT_SECS",
                DEFAULT_REQUEST_TIMEOUT_SECS,
            )),
            session_idle: Duration::from_secs(parse_or_default(
                &lookup,
                "SESSION_IDLE_SECS",
                DEFAULT_SESSION_IDLE_SECS,
            )),
            max_upload_bytes: parse_or_default(&lookup, "MAX_UPLOAD_BYTES", DEFAULT_MAX_UPLOAD_BYTES),
        }
    }
}

impl Default for Settings {
    fn default() -> Self {
        Settings::from_lookup(|_| None)
    }
}

fn parse_or_default<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: T,
) -> T {
    match lookup(key) {
        None => default,
        Some(raw) => match raw.trim().parse() {
            Ok(value) => value,
            Err(_) => {
                warn!("ignoring invalid value {raw:?} for {key}, using default");
                default
            }
        },
    }
}
