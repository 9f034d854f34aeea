use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use thiserror::Error;

use porchlight_core::domain::email_content::EmailTemplate;
use porchlight_core::services::gatekeeper::GatekeeperLimits;
use porchlight_infra::kit::client::DEFAULT_API_BASE;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub http_addr: SocketAddr,
    pub request_timeout: Duration,
    pub db_acquire_timeout: Duration,
    pub database_url: Option<String>,
    pub cors_allow_origins: Vec<String>,
    pub admin_password_hash: Option<String>,
    pub admin_token_secret: Option<String>,
    pub kit_api_key: Option<String>,
    pub kit_api_base: String,
    pub kit_email_template_id: Option<i64>,
    pub site_url: String,
    pub newsletter_cta_label: String,
    pub newsletter_tagline: String,
    pub comment_limits: GatekeeperLimits,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid socket address: {0}")]
    InvalidSocket(String),
    #[error("invalid integer for {0}: {1}")]
    InvalidNumber(&'static str, String),
    #[error("invalid value for {0}: {1}")]
    InvalidValue(&'static str, String),
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let http_addr_raw = read_string("PORCHLIGHT_HTTP_ADDR", "127.0.0.1:8080");
        let http_addr = http_addr_raw
            .parse()
            .map_err(|_| ConfigError::InvalidSocket(http_addr_raw.clone()))?;
        let request_timeout_secs = read_u64("PORCHLIGHT_REQUEST_TIMEOUT_SECS", 15)?;
        let db_acquire_timeout_secs = read_u64("PORCHLIGHT_DB_ACQUIRE_TIMEOUT_SECS", 5)?;
        let database_url = read_optional_string("PORCHLIGHT_DATABASE_URL");
        let cors_allow_origins = read_list("PORCHLIGHT_CORS_ALLOW_ORIGINS", "*");
        let admin_password_hash = read_optional_string("PORCHLIGHT_ADMIN_PASSWORD_HASH");
        let admin_token_secret = read_optional_string("PORCHLIGHT_ADMIN_TOKEN_SECRET");
        let kit_api_key = read_optional_string("PORCHLIGHT_KIT_API_KEY");
        let kit_api_base = read_string("PORCHLIGHT_KIT_API_BASE", DEFAULT_API_BASE);
        let kit_email_template_id = read_optional_i64("PORCHLIGHT_KIT_EMAIL_TEMPLATE_ID")?;
        let site_url = read_string("PORCHLIGHT_SITE_URL", "http://localhost:3000");
        if !site_url.starts_with("http://") && !site_url.starts_with("https://") {
            return Err(ConfigError::InvalidValue("PORCHLIGHT_SITE_URL", site_url));
        }
        let newsletter_cta_label =
            read_string("PORCHLIGHT_NEWSLETTER_CTA_LABEL", "Read the full article");
        let newsletter_tagline = read_string(
            "PORCHLIGHT_NEWSLETTER_TAGLINE",
            "You're receiving this because you subscribed to our newsletter.",
        );

        let defaults = GatekeeperLimits::default();
        let max_per_ip = read_i64("PORCHLIGHT_COMMENT_MAX_PER_IP", defaults.max_per_ip)?;
        if max_per_ip < 1 {
            return Err(ConfigError::InvalidValue(
                "PORCHLIGHT_COMMENT_MAX_PER_IP",
                max_per_ip.to_string(),
            ));
        }
        let rate_window = positive_window(
            "PORCHLIGHT_COMMENT_RATE_WINDOW_MINS",
            read_i64(
                "PORCHLIGHT_COMMENT_RATE_WINDOW_MINS",
                defaults.rate_window.num_minutes(),
            )?,
            chrono::Duration::try_minutes,
        )?;
        let duplicate_window = positive_window(
            "PORCHLIGHT_COMMENT_DUPLICATE_WINDOW_HOURS",
            read_i64(
                "PORCHLIGHT_COMMENT_DUPLICATE_WINDOW_HOURS",
                defaults.duplicate_window.num_hours(),
            )?,
            chrono::Duration::try_hours,
        )?;

        Ok(Self {
            http_addr,
            request_timeout: Duration::from_secs(request_timeout_secs),
            db_acquire_timeout: Duration::from_secs(db_acquire_timeout_secs),
            database_url,
            cors_allow_origins,
            admin_password_hash,
            admin_token_secret,
            kit_api_key,
            kit_api_base,
            kit_email_template_id,
            site_url,
            newsletter_cta_label,
            newsletter_tagline,
            comment_limits: GatekeeperLimits {
                max_per_ip,
                rate_window,
                duplicate_window,
            },
        })
    }

    pub fn email_template(&self) -> EmailTemplate {
        EmailTemplate {
            site_url: self.site_url.clone(),
            cta_label: self.newsletter_cta_label.clone(),
            tagline: self.newsletter_tagline.clone(),
        }
    }
}

pub fn load_dotenv() -> Result<(), std::io::Error> {
    let path = Path::new(".env");
    if !path.exists() {
        return Ok(());
    }
    let contents = std::fs::read_to_string(path)?;
    for (key, value) in parse_dotenv(&contents) {
        if std::env::var_os(&key).is_none() {
            // Safety: called from `main` before the tokio runtime exists, while
            // the process has a single thread.
            unsafe {
                std::env::set_var(key, value);
            }
        }
    }
    Ok(())
}

fn read_string(key: &'static str, default: &'static str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn read_u64(key: &'static str, default: u64) -> Result<u64, ConfigError> {
    let raw = std::env::var(key).unwrap_or_else(|_| default.to_string());
    raw.parse()
        .map_err(|_| ConfigError::InvalidNumber(key, raw))
}

fn read_i64(key: &'static str, default: i64) -> Result<i64, ConfigError> {
    let raw = std::env::var(key).unwrap_or_else(|_| default.to_string());
    raw.parse()
        .map_err(|_| ConfigError::InvalidNumber(key, raw))
}

/// At least one unit, and small enough for chrono to represent.
fn positive_window(
    key: &'static str,
    value: i64,
    to_duration: fn(i64) -> Option<chrono::Duration>,
) -> Result<chrono::Duration, ConfigError> {
    if value < 1 {
        return Err(ConfigError::InvalidValue(key, value.to_string()));
    }
    to_duration(value).ok_or_else(|| ConfigError::InvalidValue(key, value.to_string()))
}

fn read_optional_i64(key: &'static str) -> Result<Option<i64>, ConfigError> {
    match read_optional_string(key) {
        Some(raw) => raw
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::InvalidNumber(key, raw)),
        None => Ok(None),
    }
}

fn read_optional_string(key: &'static str) -> Option<String> {
    let value = std::env::var(key).unwrap_or_default();
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

fn read_list(key: &'static str, default: &'static str) -> Vec<String> {
    split_list(&read_string(key, default))
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(str::to_string)
        .collect()
}

fn parse_dotenv(contents: &str) -> Vec<(String, String)> {
    contents.lines().filter_map(parse_dotenv_line).collect()
}

/// `KEY=value`, optionally prefixed with `export`. Single quotes are literal,
/// double quotes understand `\n`, `\t`, `\"` and `\\`.
fn parse_dotenv_line(line: &str) -> Option<(String, String)> {
    let line = line.trim();
    if line.starts_with('#') {
        return None;
    }
    let line = line.strip_prefix("export ").unwrap_or(line);
    let (key, raw) = line.split_once('=')?;
    let key = key.trim();
    if key.is_empty() {
        return None;
    }
    let raw = raw.trim();
    let value = if let Some(inner) = quoted(raw, '\'') {
        inner.to_string()
    } else if let Some(inner) = quoted(raw, '"') {
        unescape(inner)
    } else {
        raw.to_string()
    };
    Some((key.to_string(), value))
}

fn quoted(raw: &str, quote: char) -> Option<&str> {
    raw.strip_prefix(quote)?.strip_suffix(quote)
}

fn unescape(inner: &str) -> String {
    let mut output = String::with_capacity(inner.len());
    let mut escaped = false;
    for ch in inner.chars() {
        if !escaped {
            if ch == '\\' {
                escaped = true;
            } else {
                output.push(ch);
            }
            continue;
        }
        escaped = false;
        match ch {
            'n' => output.push('\n'),
            't' => output.push('\t'),
            'r' => output.push('\r'),
            '"' | '\\' => output.push(ch),
            other => {
                output.push('\\');
                output.push(other);
            }
        }
    }
    if escaped {
        output.push('\\');
    }
    output
}

#[cfg(test)]
mod tests {
    use super::{parse_dotenv_line, positive_window, split_list, ConfigError};

    #[test]
    fn parse_dotenv_line_export() {
        let (key, value) = parse_dotenv_line("export PORCHLIGHT_SITE_URL=https://example.com").unwrap();
        assert_eq!(key, "PORCHLIGHT_SITE_URL");
        assert_eq!(value, "https://example.com");
    }

    #[test]
    fn parse_dotenv_line_quoted_secret() {
        let (key, value) =
            parse_dotenv_line(r#"PORCHLIGHT_ADMIN_PASSWORD_HASH='$argon2id$v=19$m=19456'"#).unwrap();
        assert_eq!(key, "PORCHLIGHT_ADMIN_PASSWORD_HASH");
        assert_eq!(value, "$argon2id$v=19$m=19456");
    }

    #[test]
    fn parse_dotenv_line_escaped() {
        let (_, value) = parse_dotenv_line(r#"TAGLINE="See you\nnext week""#).unwrap();
        assert_eq!(value, "See you\nnext week");
    }

    #[test]
    fn parse_dotenv_line_comment() {
        assert!(parse_dotenv_line("# comment").is_none());
        assert!(parse_dotenv_line("=value").is_none());
    }

    #[test]
    fn split_list_trims_and_drops_empty() {
        assert_eq!(
            split_list(" https://a.com, ,https://b.com "),
            vec!["https://a.com".to_string(), "https://b.com".to_string()]
        );
        assert_eq!(split_list("*"), vec!["*".to_string()]);
    }

    #[test]
    fn windows_must_be_positive_and_representable() {
        let window = positive_window("MINS", 10, chrono::Duration::try_minutes).unwrap();
        assert_eq!(window.num_minutes(), 10);
        for value in [0, -5] {
            assert!(matches!(
                positive_window("MINS", value, chrono::Duration::try_minutes),
                Err(ConfigError::InvalidValue("MINS", _))
            ));
        }
        assert!(matches!(
            positive_window("HOURS", i64::MAX, chrono::Duration::try_hours),
            Err(ConfigError::InvalidValue("HOURS", _))
        ));
    }
}
