//! 进程配置：先加载可选的 `.env`，再从环境变量读取。

use std::time::Duration;

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("missing environment variable {0}")]
    Missing(&'static str),
    #[error("invalid value for {name}: {value:?} ({reason})")]
    Invalid {
        name: &'static str,
        value: String,
        reason: String,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub enum ObjectStoreConfig {
    Local {
        root: String,
    },
    S3 {
        bucket: String,
        region: Option<String>,
        endpoint_url: Option<String>,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub database_url: String,
    pub db_max_connections: u32,
    pub server_host: String,
    pub server_port: u16,
    pub object_store: ObjectStoreConfig,
    pub upstream_base_url: Option<String>,
    pub upstream_api_key: Option<String>,
    pub upstream_timeout: Duration,
    pub cluster_worker_enabled: bool,
    pub cluster_worker_interval: Duration,
    pub cluster_worker_batch_size: u64,
    pub request_timeout: Duration,
}

impl Config {
    /// 读取 `.env`（存在时）与进程环境变量
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenv::dotenv().ok();
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Env { lookup };

        let database_url = match env.get("DATABASE_URL") {
            Some(url) => url,
            None => postgres_url(&env)?,
        };

        let object_store = match env.get("OBJECT_STORE_BACKEND").as_deref() {
            None | Some("local") => ObjectStoreConfig::Local {
                root: env.get("OBJECT_STORE_ROOT").unwrap_or_else(|| "./data".to_string()),
            },
            Some("s3") => ObjectStoreConfig::S3 {
                bucket: env.require("S3_BUCKET")?,
                region: env.get("S3_REGION"),
                endpoint_url: env.get("S3_ENDPOINT_URL"),
            },
            Some(other) => {
                return Err(ConfigError::Invalid {
                    name: "OBJECT_STORE_BACKEND",
                    value: other.to_string(),
                    reason: "expected `local` or `s3`".to_string(),
                })
            }
        };

        Ok(Self {
            database_url,
            db_max_connections: env.parse("DB_MAX_CONNECTIONS", 10)?,
            server_host: env.get("SERVER_HOST").unwrap_or_else(|| "0.0.0.0".to_string()),
            server_port: env.parse("SERVER_PORT", 8080)?,
            object_store,
            upstream_base_url: env.get("UPSTREAM_BASE_URL"),
            upstream_api_key: env.get("UPSTREAM_API_KEY"),
            upstream_timeout: Duration::from_secs(env.parse("UPSTREAM_TIMEOUT_SECS", 600)?),
            cluster_worker_enabled: env.parse_bool("CLUSTER_WORKER_ENABLED", true)?,
            cluster_worker_interval: Duration::from_millis(
                env.parse("CLUSTER_WORKER_INTERVAL_MS", 5000)?,
            ),
            cluster_worker_batch_size: env.parse("CLUSTER_WORKER_BATCH_SIZE", 10)?,
            request_timeout: Duration::from_secs(env.parse("REQUEST_TIMEOUT_SECS", 30)?),
        })
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.server_host, self.server_port)
    }
}

/// `DB_*` 拼出的 Postgres 连接串
fn postgres_url<F: Fn(&str) -> Option<String>>(env: &Env<F>) -> Result<String, ConfigError> {
    let host = env.require("DB_HOST")?;
    let port: u16 = env.parse("DB_PORT", 5432)?;
    let user = env.require("DB_USER")?;
    let password = env.get("DB_PASSWORD").unwrap_or_default();
    let name = env.require("DB_NAME")?;
    let ssl_mode = env.get("DB_SSL_MODE").unwrap_or_else(|| "disable".to_string());
    Ok(format!(
        "postgres://{}:{}@{}:{}/{}?sslmode={}",
        user, password, host, port, name, ssl_mode
    ))
}

struct Env<F> {
    lookup: F,
}

impl<F: Fn(&str) -> Option<String>> Env<F> {
    /// 空字符串按未设置处理
    fn get(&self, name: &str) -> Option<String> {
        (self.lookup)(name)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn require(&self, name: &'static str) -> Result<String, ConfigError> {
        self.get(name).ok_or(ConfigError::Missing(name))
    }

    fn parse<T>(&self, name: &'static str, default: T) -> Result<T, ConfigError>
    where
        T: std::str::FromStr,
        T::Err: std::fmt::Display,
    {
        match self.get(name) {
            None => Ok(default),
            Some(raw) => raw.parse().map_err(|e: T::Err| ConfigError::Invalid {
                name,
                value: raw.clone(),
                reason: e.to_string(),
            }),
        }
    }

    fn parse_bool(&self, name: &'static str, default: bool) -> Result<bool, ConfigError> {
        match self.get(name).map(|v| v.to_ascii_lowercase()).as_deref() {
            None => Ok(default),
            Some("1" | "true" | "yes" | "on") => Ok(true),
            Some("0" | "false" | "no" | "off") => Ok(false),
            Some(other) => Err(ConfigError::Invalid {
                name,
                value: other.to_string(),
                reason: "expected a boolean".to_string(),
            }),
        }
    }
}
