use crate::error::AppError;
use dotenvy::dotenv;
use std::env;
use std::str::FromStr;
use std::time::Duration;

/// Which persistence backend the service runs against
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackend {
    Postgres,
    Memory,
}

impl FromStr for StoreBackend {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "postgres" | "pg" => Ok(StoreBackend::Postgres),
            "memory" | "mem" => Ok(StoreBackend::Memory),
            other => Err(AppError::Config(format!(
                "CHAT_STORE must be `postgres` or `memory`, got `{other}`"
            ))),
        }
    }
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: usize,
    /// Applied to pool wait, create and recycle
    pub timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct WebSocketConfig {
    pub heartbeat_interval: Duration,
    pub client_timeout: Duration,
    pub outbound_buffer: usize,
    pub send_timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct NotifyConfig {
    pub queue_capacity: usize,
    pub workers: usize,
}

#[derive(Clone)]
pub struct Config {
    pub store: StoreBackend,
    pub database: Option<DatabaseConfig>,
    pub jwt_secret: String,
    pub port: u16,
    pub ws: WebSocketConfig,
    pub notify: NotifyConfig,
}

// Keeps the JWT secret out of logs.
impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("store", &self.store)
            .field("database", &self.database.as_ref().map(|d| d.max_connections))
            .field("jwt_secret", &"<redacted>")
            .field("port", &self.port)
            .field("ws", &self.ws)
            .field("notify", &self.notify)
            .finish()
    }
}

const MIN_JWT_SECRET_LEN: usize = 32;

fn parse_var<T: FromStr>(name: &str, default: T) -> Result<T, AppError> {
    match env::var(name) {
        Ok(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse()
            .map_err(|_| AppError::Config(format!("{name} has an invalid value: `{raw}`"))),
        _ => Ok(default),
    }
}

fn positive(name: &str, value: u64) -> Result<u64, AppError> {
    if value == 0 {
        return Err(AppError::Config(format!("{name} must be greater than zero")));
    }
    Ok(value)
}

impl Config {
    pub fn from_env() -> Result<Self, AppError> {
        dotenv().ok();

        let store = parse_var("CHAT_STORE", StoreBackend::Postgres)?;

        let database = match store {
            StoreBackend::Postgres => {
                let url = env::var("DATABASE_URL")
                    .map_err(|_| AppError::Config("DATABASE_URL missing".into()))?;
                let max_connections =
                    positive("DB_MAX_CONNECTIONS", parse_var("DB_MAX_CONNECTIONS", 16)?)?;
                let timeout_ms = positive("DB_TIMEOUT_MS", parse_var("DB_TIMEOUT_MS", 5000)?)?;
                Some(DatabaseConfig {
                    url,
                    max_connections: max_connections as usize,
                    timeout: Duration::from_millis(timeout_ms),
                })
            }
            StoreBackend::Memory => None,
        };

        let jwt_secret =
            env::var("JWT_SECRET").map_err(|_| AppError::Config("JWT_SECRET missing".into()))?;
        if jwt_secret.len() < MIN_JWT_SECRET_LEN {
            return Err(AppError::Config(format!(
                "JWT_SECRET must be at least {MIN_JWT_SECRET_LEN} bytes"
            )));
        }

        let port = parse_var("PORT", 8000u16)?;

        let heartbeat = positive(
            "WS_HEARTBEAT_INTERVAL_SECS",
            parse_var("WS_HEARTBEAT_INTERVAL_SECS", 5)?,
        )?;
        let client_timeout = positive(
            "WS_CLIENT_TIMEOUT_SECS",
            parse_var("WS_CLIENT_TIMEOUT_SECS", 30)?,
        )?;
        if client_timeout <= heartbeat {
            return Err(AppError::Config(
                "WS_CLIENT_TIMEOUT_SECS must exceed WS_HEARTBEAT_INTERVAL_SECS".into(),
            ));
        }
        let ws = WebSocketConfig {
            heartbeat_interval: Duration::from_secs(heartbeat),
            client_timeout: Duration::from_secs(client_timeout),
            outbound_buffer: positive("WS_OUTBOUND_BUFFER", parse_var("WS_OUTBOUND_BUFFER", 256)?)?
                as usize,
            send_timeout: Duration::from_millis(positive(
                "WS_SEND_TIMEOUT_MS",
                parse_var("WS_SEND_TIMEOUT_MS", 1000)?,
            )?),
        };

        let notify = NotifyConfig {
            queue_capacity: positive(
                "NOTIFY_QUEUE_CAPACITY",
                parse_var("NOTIFY_QUEUE_CAPACITY", 1024)?,
            )? as usize,
            workers: positive("NOTIFY_WORKERS", parse_var("NOTIFY_WORKERS", 2)?)? as usize,
        };

        Ok(Self {
            store,
            database,
            jwt_secret,
            port,
            ws,
            notify,
        })
    }

    /// In-memory configuration with short timeouts
    pub fn for_tests() -> Self {
        Self {
            store: StoreBackend::Memory,
            database: None,
            jwt_secret: "test-secret-that-is-at-least-32-bytes-long".to_string(),
            port: 0,
            ws: WebSocketConfig {
                heartbeat_interval: Duration::from_secs(5),
                client_timeout: Duration::from_secs(30),
                outbound_buffer: 64,
                send_timeout: Duration::from_millis(200),
            },
            notify: NotifyConfig {
                queue_capacity: 64,
                workers: 1,
            },
        }
    }
}
