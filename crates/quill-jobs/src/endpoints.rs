use thiserror::Error;

pub const DEFAULT_API_BASE_URL: &str = "http://127.0.0.1:8000";

const HTTP_SCHEMES: [&str; 2] = ["http://", "https://"];
const WS_SCHEMES: [&str; 2] = ["ws://", "wss://"];

/// Enumerates supported `EndpointError` values.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum EndpointError {
    #[error("{which} base url cannot be empty")]
    Empty { which: &'static str },
    #[error("{which} base url '{url}' must start with {expected}")]
    UnsupportedScheme {
        which: &'static str,
        url: String,
        expected: &'static str,
    },
    #[error("{which} base url '{url}' has no host")]
    MissingHost { which: &'static str, url: String },
}

/// Resolved service base URLs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceEndpoints {
    api_base: String,
    ws_base: String,
}

impl Default for ServiceEndpoints {
    fn default() -> Self {
        Self {
            api_base: DEFAULT_API_BASE_URL.to_string(),
            ws_base: derive_ws_base(DEFAULT_API_BASE_URL),
        }
    }
}

impl ServiceEndpoints {
    /// Uses `ws_base` when given; otherwise derives it from `api_base` by
    /// swapping http for ws and https for wss.
    pub fn resolve(api_base: &str, ws_base: Option<&str>) -> Result<Self, EndpointError> {
        let api_base = normalize_base("api", api_base, &HTTP_SCHEMES, "http:// or https://")?;
        let ws_base = match ws_base.map(str::trim).filter(|raw| !raw.is_empty()) {
            Some(explicit) => normalize_base("websocket", explicit, &WS_SCHEMES, "ws:// or wss://")?,
            None => derive_ws_base(&api_base),
        };
        Ok(Self { api_base, ws_base })
    }

    pub fn api_base(&self) -> &str {
        &self.api_base
    }

    pub fn ws_base(&self) -> &str {
        &self.ws_base
    }

    pub fn ws_url(&self, path: &str) -> String {
        format!("{}/{}", self.ws_base, path.trim_start_matches('/'))
    }
}

fn normalize_base(
    which: &'static str,
    raw: &str,
    schemes: &[&str],
    expected: &'static str,
) -> Result<String, EndpointError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(EndpointError::Empty { which });
    }
    let lowered = trimmed.to_ascii_lowercase();
    let Some(scheme) = schemes.iter().find(|scheme| lowered.starts_with(**scheme)) else {
        return Err(EndpointError::UnsupportedScheme {
            which,
            url: trimmed.to_string(),
            expected,
        });
    };
    let rest = trimmed[scheme.len()..].trim_end_matches('/');
    if rest.is_empty() {
        return Err(EndpointError::MissingHost {
            which,
            url: trimmed.to_string(),
        });
    }
    Ok(format!("{scheme}{rest}"))
}

fn derive_ws_base(api_base: &str) -> String {
    match api_base.strip_prefix("https://") {
        Some(rest) => format!("wss://{rest}"),
        None => format!(
            "ws://{}",
            api_base.strip_prefix("http://").unwrap_or(api_base)
        ),
    }
}
