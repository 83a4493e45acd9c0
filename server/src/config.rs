use std::{env, time::Duration};

use crate::error::ConfigError;

const DEFAULT_PORT: u16 = 4000;
const DEFAULT_PARTNER_ID: i64 = 1;
const DEFAULT_TIMEOUT_MS: u64 = 10_000;
const DEFAULT_GRAPH_API_BASE: &str = "https://graph.facebook.com";
const DEFAULT_GRAPH_API_VERSION: &str = "v21.0";

#[derive(Clone)]
pub enum StoreConfig {
    Rest { url: String, api_key: String },
    Postgres { database_url: String },
    Memory,
}

impl StoreConfig {
    pub fn backend_name(&self) -> &'static str {
        match self {
            StoreConfig::Rest { .. } => "rest",
            StoreConfig::Postgres { .. } => "postgres",
            StoreConfig::Memory => "memory",
        }
    }
}

#[derive(Clone)]
pub struct NotifierConfig {
    pub access_token: String,
    pub phone_number_id: String,
    pub api_base: String,
    pub api_version: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AutoReply {
    Off,
    Text,
    Menu,
}

#[derive(Clone)]
pub struct Config {
    pub port: u16,
    pub verify_token: String,
    /// Empty disables `X-Hub-Signature-256` verification.
    pub app_secret: String,
    /// Bearer token for operator routes; `None` disables them.
    pub admin_token: Option<String>,
    pub partner_id: i64,
    pub store: StoreConfig,
    pub request_timeout: Duration,
    pub notifier: Option<NotifierConfig>,
    pub auto_reply: AutoReply,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds the configuration from an arbitrary key lookup so tests do not
    /// have to mutate the process environment.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let port = parse_or(&get, "PORT", DEFAULT_PORT)?;
        let partner_id = parse_or(&get, "PARTNER_ID", DEFAULT_PARTNER_ID)?;
        let timeout_ms = parse_or(&get, "REQUEST_TIMEOUT_MS", DEFAULT_TIMEOUT_MS)?;
        if timeout_ms == 0 {
            return Err(ConfigError::Invalid {
                var: "REQUEST_TIMEOUT_MS",
                value: "0".to_string(),
            });
        }

        let verify_token =
            get("WEBHOOK_VERIFY_TOKEN").ok_or(ConfigError::Missing("WEBHOOK_VERIFY_TOKEN"))?;
        let app_secret = get("WHATSAPP_APP_SECRET").unwrap_or_default();
        let admin_token = get("ADMIN_TOKEN");

        let store = match get("STORE_BACKEND").as_deref().unwrap_or("rest") {
            "rest" | "supabase" => StoreConfig::Rest {
                url: get("SUPABASE_URL")
                    .ok_or(ConfigError::Missing("SUPABASE_URL"))?
                    .trim_end_matches('/')
                    .to_string(),
                api_key: get("SUPABASE_ANON_KEY")
                    .or_else(|| get("SUPABASE_KEY"))
                    .ok_or(ConfigError::Missing("SUPABASE_ANON_KEY"))?,
            },
            "postgres" => StoreConfig::Postgres {
                database_url: resolve_database_url(&get)?,
            },
            "memory" => StoreConfig::Memory,
            other => {
                return Err(ConfigError::Invalid {
                    var: "STORE_BACKEND",
                    value: other.to_string(),
                })
            }
        };

        let notifier = match (get("WHATSAPP_ACCESS_TOKEN"), get("WHATSAPP_PHONE_NUMBER_ID")) {
            (Some(access_token), Some(phone_number_id)) => Some(NotifierConfig {
                access_token,
                phone_number_id,
                api_base: get("WHATSAPP_API_BASE")
                    .unwrap_or_else(|| DEFAULT_GRAPH_API_BASE.to_string())
                    .trim_end_matches('/')
                    .to_string(),
                api_version: get("WHATSAPP_API_VERSION")
                    .unwrap_or_else(|| DEFAULT_GRAPH_API_VERSION.to_string()),
            }),
            _ => None,
        };

        let auto_reply = match get("AUTO_REPLY").as_deref().unwrap_or("off") {
            "off" | "false" | "0" => AutoReply::Off,
            "text" => AutoReply::Text,
            "menu" => AutoReply::Menu,
            other => {
                return Err(ConfigError::Invalid {
                    var: "AUTO_REPLY",
                    value: other.to_string(),
                })
            }
        };

        Ok(Self {
            port,
            verify_token,
            app_secret,
            admin_token,
            partner_id,
            store,
            request_timeout: Duration::from_millis(timeout_ms),
            notifier,
            auto_reply,
        })
    }
}

fn parse_or<G, T>(get: &G, var: &'static str, default: T) -> Result<T, ConfigError>
where
    G: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    match get(var) {
        None => Ok(default),
        Some(raw) => raw
            .parse::<T>()
            .map_err(|_| ConfigError::Invalid { var, value: raw }),
    }
}

fn resolve_database_url<G>(get: &G) -> Result<String, ConfigError>
where
    G: Fn(&str) -> Option<String>,
{
    if let Some(url) = get("DATABASE_URL") {
        return Ok(url);
    }
    let host = get("POSTGRES_HOST")
        .or_else(|| get("PGHOST"))
        .unwrap_or_else(|| "localhost".to_string());
    let port = get("POSTGRES_PORT")
        .or_else(|| get("PGPORT"))
        .unwrap_or_else(|| "5432".to_string());
    let user = get("POSTGRES_USER")
        .or_else(|| get("PGUSER"))
        .unwrap_or_else(|| "postgres".to_string());
    let password = get("POSTGRES_PASSWORD")
        .or_else(|| get("PGPASSWORD"))
        .ok_or(ConfigError::Missing("DATABASE_URL"))?;
    let db = get("POSTGRES_DB")
        .or_else(|| get("PGDATABASE"))
        .unwrap_or_else(|| "postgres".to_string());
    Ok(format!("postgres://{user}:{password}@{host}:{port}/{db}"))
}
