use std::time::Duration;

use crate::errors::ClientError;

const DEFAULT_BASE_URL: &str = "http://127.0.0.1:8000";

/// Configuration for the HTTP conversation transport.
#[derive(Clone, Debug)]
pub struct ClientConfig {
    /// Base URL of the Sense backend.
    pub base_url: String,
    /// Bearer token; requests go out unauthenticated when unset.
    pub token: Option<String>,
    /// Timeout for establishing the connection.
    pub connect_timeout: Duration,
    /// Optional end-to-end timeout, body streaming included.
    ///
    /// Unset by default since replies may stream for a long time.
    pub timeout: Option<Duration>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self::new(DEFAULT_BASE_URL)
    }
}

impl ClientConfig {
    /// Creates a config for the given backend with default timeouts.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            token: None,
            connect_timeout: Duration::from_secs(10),
            timeout: None,
        }
    }

    /// Builds a config from `SENSE_API_BASE_URL`, `SENSE_API_TOKEN` and
    /// `SENSE_API_TIMEOUT_SECS`.
    pub fn from_env() -> Result<Self, ClientError> {
        let base_url = std::env::var("SENSE_API_BASE_URL")
            .ok()
            .filter(|v| !v.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
        let mut config = Self::new(base_url);
        if let Ok(token) = std::env::var("SENSE_API_TOKEN") {
            config = config.token(token);
        }
        if let Ok(raw) = std::env::var("SENSE_API_TIMEOUT_SECS") {
            let secs = raw.trim().parse::<u64>().map_err(|e| {
                ClientError::Config(format!("invalid SENSE_API_TIMEOUT_SECS {raw:?}: {e}"))
            })?;
            config = config.timeout(Duration::from_secs(secs));
        }
        Ok(config)
    }

    /// Overrides the backend base URL.
    pub fn base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Sets the bearer token. Blank tokens are treated as absent.
    pub fn token(mut self, token: impl Into<String>) -> Self {
        let token = token.into();
        self.token = Some(token).filter(|t| !t.trim().is_empty());
        self
    }

    /// Overrides the connect timeout.
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Sets an end-to-end request timeout.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub(crate) fn endpoint(&self, segments: &[&str]) -> Result<reqwest::Url, ClientError> {
        let mut url = reqwest::Url::parse(&self.base_url).map_err(|e| {
            ClientError::Config(format!("invalid base_url {:?}: {e}", self.base_url))
        })?;
        url.path_segments_mut()
            .map_err(|_| {
                ClientError::Config(format!("base_url {:?} cannot be a base", self.base_url))
            })?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    pub(crate) fn messages_url(&self, conversation_id: &str) -> Result<reqwest::Url, ClientError> {
        self.endpoint(&["api", "v1", "conversations", conversation_id, "messages"])
    }

    pub(crate) fn chat_url(&self, conversation_id: &str) -> Result<reqwest::Url, ClientError> {
        self.endpoint(&["api", "v1", "chats", conversation_id])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_url_appends_segments() {
        let config = ClientConfig::new("https://sense.example.com/");
        let url = config.messages_url("chat-1").expect("url");
        assert_eq!(
            url.as_str(),
            "https://sense.example.com/api/v1/conversations/chat-1/messages"
        );
    }

    #[test]
    fn conversation_id_is_percent_encoded() {
        let config = ClientConfig::new("http://localhost:8000/base");
        let url = config.chat_url("a/b c").expect("url");
        assert_eq!(url.as_str(), "http://localhost:8000/base/api/v1/chats/a%2Fb%20c");
    }

    #[test]
    fn invalid_base_url_is_config_error() {
        let err = ClientConfig::new("not a url").messages_url("c").expect_err("invalid");
        assert!(matches!(err, ClientError::Config(_)));
    }

    #[test]
    fn blank_token_is_ignored() {
        assert_eq!(ClientConfig::default().token("  ").token, None);
        assert_eq!(
            ClientConfig::default().token("abc").token.as_deref(),
            Some("abc")
        );
    }
}
