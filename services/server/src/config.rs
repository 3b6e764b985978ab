// Runtime configuration, assembled once at startup from the environment.
//
// Every variable here mirrors `std::env::var(...).unwrap_or_else(...)` the
// way `main.rs` has always read `LOG_LEVEL`/`DATABASE_URL`/`BIND_ADDR` — no
// config-file layer, no builder, just one struct built once.

use std::env;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct Config {
    pub instance_id: String,
    pub redis_url: String,
    pub bind_addr: String,
    pub heartbeat_interval: Duration,
    pub client_timeout_multiplier: u32,
    pub message_ttl_hours: i64,
    pub max_pending_messages: usize,
    pub pending_retry_interval: Duration,
    pub max_message_size: usize,
    pub enable_debug: bool,
    pub max_attempts: u32,
    pub max_reconnect_attempts: u32,
    pub redis_retry_delay: Duration,
}

impl Config {
    #[must_use]
    pub fn from_env() -> Self {
        let redis_host = env::var("REDIS_HOST").unwrap_or_else(|_| "127.0.0.1".to_owned());
        let redis_port = env::var("REDIS_PORT").unwrap_or_else(|_| "6379".to_owned());

        Self {
            instance_id: env::var("INSTANCE_ID").unwrap_or_else(|_| default_instance_id()),
            redis_url: format!("redis://{redis_host}:{redis_port}"),
            bind_addr: env::var("BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:8080".to_owned()),
            heartbeat_interval: Duration::from_secs(env_u64("HEARTBEAT_INTERVAL", 30)),
            client_timeout_multiplier: env_u64("CLIENT_TIMEOUT_MULTIPLIER", 3) as u32,
            message_ttl_hours: env_u64("MESSAGE_TTL_HOURS", 24) as i64,
            max_pending_messages: env_u64("MAX_PENDING_MESSAGES", 100) as usize,
            pending_retry_interval: Duration::from_secs(env_u64("PENDING_RETRY_INTERVAL", 300)),
            max_message_size: env_u64("MAX_MESSAGE_SIZE", 1024 * 1024) as usize,
            enable_debug: env::var("ENABLE_DEBUG")
                .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
                .unwrap_or(false),
            max_attempts: 3,
            max_reconnect_attempts: 10,
            redis_retry_delay: Duration::from_millis(500),
        }
    }

    #[must_use]
    pub fn client_timeout(&self) -> Duration {
        self.heartbeat_interval * self.client_timeout_multiplier
    }
}

fn env_u64(name: &str, default: u64) -> u64 {
    env::var(name).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn default_instance_id() -> String {
    let host = hostname();
    let suffix: u32 = rand::random();
    format!("{host}-{suffix:08x}")
}

fn hostname() -> String {
    env::var("HOSTNAME").unwrap_or_else(|_| "instance".to_owned())
}
