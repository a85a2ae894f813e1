//! Authentication Token Exchange
//!
//! Resolves the token sent with `set_auth_token` once the server handshake
//! arrives.
//!
//! # Token Sources
//!
//! - **Anonymous**: the fixed token `unauthorized_user_token` (delayed data tier)
//! - **Account**: the browser `sessionid` cookie is traded for a token by
//!   fetching the disclaimer page with that cookie and extracting
//!   `"auth_token":"..."` from the returned HTML
//!
//! The exchange happens once per connect; the token is immutable afterwards.

use std::sync::OnceLock;
use std::time::Duration;

use regex::Regex;
use thiserror::Error;

// =============================================================================
// Constants
// =============================================================================

/// Token used when no account session is configured.
pub const ANONYMOUS_TOKEN: &str = "unauthorized_user_token";

/// Page whose HTML embeds the account's auth token.
pub const DEFAULT_DISCLAIMER_URL: &str = "https://www.tradingview.com/disclaimer/";

/// Default timeout for the token request.
pub const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(30);

// =============================================================================
// Error Types
// =============================================================================

/// Errors that can occur while resolving the auth token.
#[derive(Debug, Clone, Error)]
pub enum AuthError {
    /// The HTTP client could not be built.
    #[error("HTTP client setup failed: {0}")]
    Client(String),

    /// The token request could not be sent or its body could not be read.
    #[error("token request failed: {0}")]
    Request(String),

    /// The token endpoint answered with a non-success status.
    #[error("token endpoint returned HTTP {status}")]
    Status {
        /// HTTP status code.
        status: u16,
    },

    /// The response did not contain an auth token.
    #[error("auth token not found in response")]
    TokenNotFound,

    /// The session cookie value is empty.
    #[error("session id cannot be empty")]
    EmptySessionId,
}

impl From<reqwest::Error> for AuthError {
    fn from(err: reqwest::Error) -> Self {
        Self::Request(err.to_string())
    }
}

// =============================================================================
// Session Cookie
// =============================================================================

/// Browser `sessionid` cookie of a logged-in account.
///
/// The `Debug` implementation redacts the value for safe logging.
#[derive(Clone, PartialEq, Eq)]
pub struct SessionCookie(String);

impl SessionCookie {
    /// Wrap a cookie value.
    ///
    /// # Errors
    ///
    /// Returns an error if the value is empty or whitespace.
    pub fn new(value: impl Into<String>) -> Result<Self, AuthError> {
        let value = value.into();
        if value.trim().is_empty() {
            return Err(AuthError::EmptySessionId);
        }
        Ok(Self(value))
    }

    /// Get the raw cookie value.
    #[must_use]
    pub fn value(&self) -> &str {
        &self.0
    }

    fn header(&self) -> String {
        format!("sessionid={}", self.0)
    }
}

impl std::fmt::Debug for SessionCookie {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("SessionCookie").field(&"[REDACTED]").finish()
    }
}

// =============================================================================
// Token Exchange
// =============================================================================

/// Trades an account session cookie for a protocol auth token.
#[derive(Debug, Clone)]
pub struct TokenExchange {
    client: reqwest::Client,
    disclaimer_url: String,
}

impl TokenExchange {
    /// Create an exchange against `disclaimer_url`.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(disclaimer_url: impl Into<String>, timeout: Duration) -> Result<Self, AuthError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AuthError::Client(e.to_string()))?;

        Ok(Self {
            client,
            disclaimer_url: disclaimer_url.into(),
        })
    }

    /// Resolve the token for an optional account session.
    ///
    /// # Errors
    ///
    /// Returns an error if an account session is given and the exchange fails.
    pub async fn resolve(&self, cookie: Option<&SessionCookie>) -> Result<String, AuthError> {
        match cookie {
            Some(cookie) => self.exchange(cookie).await,
            None => {
                tracing::debug!("No session id configured, using anonymous token");
                Ok(ANONYMOUS_TOKEN.to_string())
            }
        }
    }

    /// Fetch the disclaimer page with the session cookie and extract the token.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails, the status is not a success,
    /// or no token is present in the body.
    pub async fn exchange(&self, cookie: &SessionCookie) -> Result<String, AuthError> {
        tracing::debug!(url = %self.disclaimer_url, "Exchanging session id for auth token");

        let response = self
            .client
            .get(&self.disclaimer_url)
            .header(reqwest::header::COOKIE, cookie.header())
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(AuthError::Status {
                status: status.as_u16(),
            });
        }

        let body = response.text().await?;
        let token = extract_token(&body).ok_or(AuthError::TokenNotFound)?;

        tracing::info!("Auth token obtained for account session");
        Ok(token.to_string())
    }
}

/// Extract the first `"auth_token":"..."` value from a response body.
#[must_use]
pub fn extract_token(body: &str) -> Option<&str> {
    token_pattern()
        .captures(body)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str())
}

#[allow(clippy::expect_used)] // Regex is a compile-time constant
fn token_pattern() -> &'static Regex {
    static TOKEN: OnceLock<Regex> = OnceLock::new();
    TOKEN.get_or_init(|| Regex::new(r#""auth_token":"(.+?)""#).expect("auth token regex is valid"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extract_token_from_html() {
        let body = r#"<script>window.user = {"id":1,"auth_token":"eyJhbGciOi.abc","plan":"pro"};</script>"#;
        assert_eq!(extract_token(body), Some("eyJhbGciOi.abc"));
    }

    #[test]
    fn extract_token_takes_first_match() {
        let body = r#""auth_token":"first" ... "auth_token":"second""#;
        assert_eq!(extract_token(body), Some("first"));
    }

    #[test]
    fn extract_token_absent() {
        assert_eq!(extract_token("<html>logged out</html>"), None);
    }

    #[test]
    fn session_cookie_rejects_empty() {
        assert!(matches!(
            SessionCookie::new("  "),
            Err(AuthError::EmptySessionId)
        ));
    }

    #[test]
    fn session_cookie_debug_redacts_value() {
        let cookie = SessionCookie::new("abc123secret").unwrap();
        let debug = format!("{cookie:?}");
        assert!(debug.contains("[REDACTED]"));
        assert!(!debug.contains("abc123secret"));
        assert_eq!(cookie.header(), "sessionid=abc123secret");
    }

    #[tokio::test]
    async fn resolve_without_cookie_is_anonymous() {
        let exchange = TokenExchange::new("http://127.0.0.1:9/unused", DEFAULT_HTTP_TIMEOUT).unwrap();
        assert_eq!(exchange.resolve(None).await.unwrap(), ANONYMOUS_TOKEN);
    }
}
