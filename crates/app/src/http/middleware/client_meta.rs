use axum::http::header::USER_AGENT;
use axum::http::HeaderMap;

pub const UNKNOWN_CLIENT_IP: &str = "unknown";
const MAX_USER_AGENT_LEN: usize = 512;

/// First hop of `x-forwarded-for`, then `x-real-ip`.
pub fn client_ip(headers: &HeaderMap) -> String {
    if let Some(value) = header_value(headers, "x-forwarded-for") {
        let first = value.split(',').next().unwrap_or(value).trim();
        if !first.is_empty() {
            return first.to_string();
        }
    }
    if let Some(value) = header_value(headers, "x-real-ip") {
        return value.to_string();
    }
    UNKNOWN_CLIENT_IP.to_string()
}

pub fn user_agent(headers: &HeaderMap) -> Option<String> {
    let value = header_value(headers, USER_AGENT.as_str())?;
    Some(value.chars().take(MAX_USER_AGENT_LEN).collect())
}

fn header_value<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(|value| value.trim())
        .filter(|value| !value.is_empty())
}
