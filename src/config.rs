//! Runtime configuration.
//!
//! Defaults match a local development setup; every value can be overridden
//! through a `PLANTOPS_*` environment variable (see [`AppConfig::from_env`]).

use serde::Serialize;
use std::env;
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_CHAT_URL: &str = "https://api.groq.com/openai/v1/chat/completions";
pub const DEFAULT_CHAT_MODEL: &str = "llama-3.3-70b-versatile";

/// SMTP relay used for confirmation codes and payment challenges.
#[derive(Debug, Clone, Serialize)]
pub struct SmtpConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    #[serde(skip_serializing)]
    pub password: String,
    pub from: String,
}

/// OpenAI-compatible chat-completions endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct ChatConfig {
    pub endpoint: String,
    pub model: String,
    #[serde(skip_serializing)]
    pub api_key: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct AppConfig {
    pub bind_addr: String,
    /// `None` keeps every table in memory.
    pub database_dir: Option<PathBuf>,
    pub static_dir: PathBuf,
    pub session_ttl: Duration,
    /// Simulated gateway latency before a charge is authorized.
    pub payment_delay: Duration,
    /// Simulated latency before a challenge code is checked.
    pub otp_delay: Duration,
    pub otp_ttl: Duration,
    /// Rows returned by the production list.
    pub production_limit: usize,
    #[serde(skip_serializing)]
    pub webhook_secret: Option<String>,
    pub smtp: Option<SmtpConfig>,
    pub chat: Option<ChatConfig>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:3000".to_string(),
            database_dir: Some(PathBuf::from("database")),
            static_dir: PathBuf::from("static"),
            session_ttl: Duration::from_secs(24 * 60 * 60),
            payment_delay: Duration::from_millis(2000),
            otp_delay: Duration::from_millis(1500),
            otp_ttl: Duration::from_secs(10 * 60),
            production_limit: 30,
            webhook_secret: None,
            smtp: None,
            chat: None,
        }
    }
}

fn env_string(name: &str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn env_u64(name: &str, default: u64) -> u64 {
    env::var(name)
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .unwrap_or(default)
}

fn env_duration_ms(name: &str, default: Duration) -> Duration {
    Duration::from_millis(env_u64(name, default.as_millis() as u64))
}

fn env_duration_secs(name: &str, default: Duration) -> Duration {
    Duration::from_secs(env_u64(name, default.as_secs()))
}

impl AppConfig {
    /// Defaults overridden by whatever `PLANTOPS_*` variables are set.
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let database_dir = match env_string("PLANTOPS_DATABASE_DIR") {
            Some(dir) if dir == ":memory:" => None,
            Some(dir) => Some(PathBuf::from(dir)),
            None => defaults.database_dir,
        };

        let smtp = env_string("PLANTOPS_SMTP_HOST").map(|host| SmtpConfig {
            port: env_u64("PLANTOPS_SMTP_PORT", 465) as u16,
            username: env_string("PLANTOPS_SMTP_USER").unwrap_or_default(),
            password: env_string("PLANTOPS_SMTP_PASSWORD").unwrap_or_default(),
            from: env_string("PLANTOPS_SMTP_FROM")
                .unwrap_or_else(|| format!("RINL Operations <noreply@{}>", host)),
            host,
        });

        let chat = env_string("PLANTOPS_CHAT_API_KEY")
            .or_else(|| env_string("GROQ_API_KEY"))
            .map(|api_key| ChatConfig {
                endpoint: env_string("PLANTOPS_CHAT_URL")
                    .unwrap_or_else(|| DEFAULT_CHAT_URL.to_string()),
                model: env_string("PLANTOPS_CHAT_MODEL")
                    .unwrap_or_else(|| DEFAULT_CHAT_MODEL.to_string()),
                api_key,
            });

        Self {
            bind_addr: env_string("PLANTOPS_BIND").unwrap_or(defaults.bind_addr),
            database_dir,
            static_dir: env_string("PLANTOPS_STATIC_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.static_dir),
            session_ttl: env_duration_secs("PLANTOPS_SESSION_TTL_SECS", defaults.session_ttl),
            payment_delay: env_duration_ms("PLANTOPS_PAYMENT_DELAY_MS", defaults.payment_delay),
            otp_delay: env_duration_ms("PLANTOPS_OTP_DELAY_MS", defaults.otp_delay),
            otp_ttl: env_duration_secs("PLANTOPS_OTP_TTL_SECS", defaults.otp_ttl),
            production_limit: env_u64(
                "PLANTOPS_PRODUCTION_LIMIT",
                defaults.production_limit as u64,
            ) as usize,
            webhook_secret: env_string("PLANTOPS_WEBHOOK_SECRET"),
            smtp,
            chat,
        }
    }

    /// In-memory tables and no artificial latency.
    pub fn ephemeral() -> Self {
        Self {
            database_dir: None,
            payment_delay: Duration::ZERO,
            otp_delay: Duration::ZERO,
            ..Self::default()
        }
    }
}
