// Client-side defaults and tuning knobs.
use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::sync::OnceLock;
use std::time::Duration;

/// Capacity of the request submission queue. Submitting while the queue is
/// full blocks the caller until the sender task drains a slot.
pub(crate) const DEFAULT_REQ_QUEUE_SIZE: usize = 256;

/// Maximum time a request may sit in the buffered writer before the client
/// injects a `Flush` on its own.
pub(crate) const DEFAULT_FLUSH_INTERVAL_MS: u64 = 20;

/// Delay between connect attempts when the client is allowed to retry.
pub(crate) const DEFAULT_CONNECT_RETRY_MS: u64 = 3_000;

/// Hard safety cap for any single keel frame.
///
/// Rationale:
/// - `read_frame_into` allocates a buffer sized by `header.length`.
/// - Without a cap, a malicious / buggy peer can advertise an enormous length
///   and trigger OOM or allocator churn (DoS).
///
/// Override with `KEEL_MAX_FRAME_BYTES`.
pub(crate) const DEFAULT_MAX_FRAME_BYTES: usize = 16 * 1024 * 1024; // 16 MiB

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub req_queue_size: usize,
    pub flush_interval: Duration,
    pub connect_retry: Duration,
    pub max_frame_bytes: usize,
}

#[derive(Clone)]
pub(crate) struct ClientRuntimeConfig {
    pub(crate) max_frame_bytes: usize,
}

static CLIENT_RUNTIME_CONFIG: OnceLock<ClientRuntimeConfig> = OnceLock::new();

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
struct ClientConfigOverride {
    req_queue_size: Option<usize>,
    flush_interval_ms: Option<u64>,
    connect_retry_ms: Option<u64>,
    max_frame_bytes: Option<usize>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            req_queue_size: DEFAULT_REQ_QUEUE_SIZE,
            flush_interval: Duration::from_millis(DEFAULT_FLUSH_INTERVAL_MS),
            connect_retry: Duration::from_millis(DEFAULT_CONNECT_RETRY_MS),
            max_frame_bytes: DEFAULT_MAX_FRAME_BYTES,
        }
    }
}

impl ClientConfig {
    pub fn from_env_or_yaml(config_path: Option<&str>) -> Result<Self> {
        let mut config = Self::from_env();
        let override_path = config_path
            .map(|value| value.to_string())
            .or_else(|| std::env::var("KEEL_CLIENT_CONFIG").ok());
        let contents = match override_path.as_deref() {
            Some(path) => match fs::read_to_string(path) {
                Ok(contents) => Some(contents),
                Err(err) => {
                    return Err(err).with_context(|| format!("read client config: {path}"));
                }
            },
            None => None,
        };
        if let Some(contents) = contents {
            let override_cfg: ClientConfigOverride =
                serde_yaml::from_str(&contents).context("parse client config yaml")?;
            override_cfg.apply(&mut config);
        }
        Ok(config)
    }

    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(value) = read_usize_env("KEEL_REQ_QUEUE_SIZE") {
            config.req_queue_size = value;
        }
        if let Some(value) = read_u64_env("KEEL_FLUSH_INTERVAL_MS") {
            config.flush_interval = Duration::from_millis(value);
        }
        if let Some(value) = read_u64_env("KEEL_CONNECT_RETRY_MS") {
            config.connect_retry = Duration::from_millis(value);
        }
        if let Some(value) = read_usize_env("KEEL_MAX_FRAME_BYTES") {
            config.max_frame_bytes = value;
        }
        config
    }

    pub(crate) fn install(&self) {
        let _ = CLIENT_RUNTIME_CONFIG.set(ClientRuntimeConfig {
            max_frame_bytes: self.max_frame_bytes,
        });
    }
}

impl ClientConfigOverride {
    fn apply(&self, config: &mut ClientConfig) {
        if let Some(value) = self.req_queue_size {
            if value > 0 {
                config.req_queue_size = value;
            }
        }
        if let Some(value) = self.flush_interval_ms {
            if value > 0 {
                config.flush_interval = Duration::from_millis(value);
            }
        }
        if let Some(value) = self.connect_retry_ms {
            if value > 0 {
                config.connect_retry = Duration::from_millis(value);
            }
        }
        if let Some(value) = self.max_frame_bytes {
            if value > 0 {
                config.max_frame_bytes = value;
            }
        }
    }
}

pub(crate) fn runtime_config() -> &'static ClientRuntimeConfig {
    CLIENT_RUNTIME_CONFIG.get_or_init(|| ClientRuntimeConfig {
        max_frame_bytes: DEFAULT_MAX_FRAME_BYTES,
    })
}

fn read_u64_env(key: &str) -> Option<u64> {
    std::env::var(key)
        .ok()
        .and_then(|value| value.parse::<u64>().ok())
        .filter(|value| *value > 0)
}

fn read_usize_env(key: &str) -> Option<usize> {
    std::env::var(key)
        .ok()
        .and_then(|value| value.parse::<usize>().ok())
        .filter(|value| *value > 0)
}
