//! Device Authorization Grant (RFC 8628) and refresh token exchange
//!
//! One `DeviceAuthorizer` is built per token attempt from a `Configuration`.
//! `authorize` runs discovery, requests a device code, presents it, then polls
//! the token endpoint until the user approves, the provider refuses, or the
//! code expires. `refresh` trades a refresh token for a new bearer token.

use std::sync::Arc;
use std::time::Duration;

use reqwest::StatusCode;
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use serde::de::Error as _;
use serde::{Deserialize, Deserializer};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::{Configuration, TokenType};
use crate::constants::{DEVICE_CODE_GRANT_TYPE, SLOW_DOWN_INCREMENT};
use crate::discovery::{Endpoints, discover};
use crate::error::{Error, Result};
use crate::form;
use crate::notify::{ConsolePresenter, DeviceCodePresenter, DevicePrompt, presenter_for};
use crate::options::ConnectOptions;
use crate::token::Token;

/// Device authorization response (RFC 8628 §3.2). Fields are optional here
/// so a missing one is reported by name.
#[derive(Debug, Deserialize)]
struct DeviceAuthorizationResponse {
    device_code: Option<String>,
    user_code: Option<String>,
    verification_uri: Option<String>,
    verification_uri_complete: Option<String>,
    #[serde(default, deserialize_with = "lenient_seconds")]
    expires_in: Option<u64>,
    #[serde(default, deserialize_with = "lenient_seconds")]
    interval: Option<u64>,
}

/// Seconds as an integer, a float or a numeric string. Fractions are
/// truncated.
fn lenient_seconds<'de, D>(deserializer: D) -> std::result::Result<Option<u64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    let seconds = match &value {
        None | Some(serde_json::Value::Null) => return Ok(None),
        Some(serde_json::Value::Number(n)) => {
            n.as_u64().or_else(|| n.as_f64().and_then(whole_seconds))
        }
        Some(serde_json::Value::String(s)) => {
            s.trim().parse::<f64>().ok().and_then(whole_seconds)
        }
        Some(_) => None,
    };
    seconds.map(Some).ok_or_else(|| {
        D::Error::custom(format!(
            "expected a number of seconds, found {}",
            value.unwrap_or_default()
        ))
    })
}

fn whole_seconds(f: f64) -> Option<u64> {
    (f.is_finite() && f >= 0.0).then(|| f as u64)
}

/// Validated device code grant.
#[derive(Debug)]
struct DeviceCode {
    device_code: String,
    prompt: DevicePrompt,
    expires_in: u64,
    interval: u64,
}

/// Successful token endpoint response.
#[derive(Debug, Deserialize)]
struct TokenResponse {
    #[serde(default)]
    id_token: Option<String>,
    #[serde(default)]
    access_token: Option<String>,
    #[serde(default)]
    refresh_token: Option<String>,
}

/// OAuth error body (RFC 6749 §5.2).
#[derive(Debug, Deserialize)]
struct ErrorResponse {
    error: String,
    #[serde(default)]
    error_description: Option<String>,
}

enum PollOutcome {
    Granted(TokenResponse),
    Pending,
    SlowDown,
}

/// Drives the device flow and refresh exchange against one issuer.
pub struct DeviceAuthorizer {
    config: Configuration,
    issuer: String,
    client_id: String,
    client: reqwest::Client,
    presenter: Arc<dyn DeviceCodePresenter>,
}

impl DeviceAuthorizer {
    /// Validate the configuration and build the HTTP client.
    ///
    /// Fails before any network call when the issuer or client id is missing
    /// or the CA file cannot be loaded.
    pub fn new(config: Configuration) -> Result<Self> {
        let client_id = config
            .client_id
            .clone()
            .ok_or_else(|| Error::Config("client id is required".into()))?;
        let issuer = config
            .issuer
            .clone()
            .ok_or_else(|| Error::Config("issuer is required".into()))?;
        let client = config.trust.build_client(config.request_timeout)?;
        let presenter = presenter_for(&config);

        Ok(Self {
            config,
            issuer,
            client_id,
            client,
            presenter,
        })
    }

    /// Replace the presenter chosen from the configuration.
    pub fn with_presenter(mut self, presenter: Arc<dyn DeviceCodePresenter>) -> Self {
        self.presenter = presenter;
        self
    }

    pub fn config(&self) -> &Configuration {
        &self.config
    }

    /// Run the full device flow for `connection` (a normalized connection
    /// identity) and `options`.
    ///
    /// Returns `Ok(None)` when the provider rejects the device code request
    /// with 400, which is how a disabled grant shows up.
    pub async fn authorize(
        &self,
        connection: &str,
        options: &ConnectOptions,
    ) -> Result<Option<Token>> {
        let endpoints = discover(&self.client, &self.issuer, self.config.discovery_timeout).await?;

        let Some(code) = self.request_device_code(&endpoints).await? else {
            return Ok(None);
        };

        info!(
            issuer = %self.issuer,
            expires_in = code.expires_in,
            interval = code.interval,
            "waiting for device authorization"
        );
        // Torn down on every exit path, including the caller dropping us
        let presentation = match self.presenter.present(&code.prompt).await {
            Ok(presentation) => presentation,
            Err(e) => {
                warn!(error = %e, "device code presenter failed, printing code instead");
                ConsolePresenter.present(&code.prompt).await?
            }
        };

        let granted = self.poll(&endpoints.token_endpoint, &code).await;
        presentation.stop();

        let response = granted?;
        let bearer = self.bearer_from(&response, &endpoints.token_endpoint)?;
        let token = Token::from_bearer(
            bearer,
            response.refresh_token,
            connection.to_string(),
            options,
        )?;

        info!(
            issuer = %self.issuer,
            expires_at = token.expires_at(),
            refreshable = token.refresh_token().is_some(),
            "device authorization complete"
        );
        Ok(Some(token))
    }

    /// Exchange `token`'s refresh token for a new token. The old refresh
    /// token is carried forward when the response omits one.
    pub async fn refresh(&self, token: &Token) -> Result<Token> {
        let refresh_token = token
            .refresh_token()
            .ok_or_else(|| Error::Refresh("token has no refresh token".into()))?;
        let endpoints = discover(&self.client, &self.issuer, self.config.discovery_timeout).await?;

        let mut pairs = vec![
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
            ("client_id", self.client_id.as_str()),
        ];
        if let Some(secret) = &self.config.client_secret {
            pairs.push(("client_secret", secret.expose().as_str()));
        }

        let (status, body) = self
            .post_form(&endpoints.token_endpoint, form::encode(pairs))
            .await?;
        if status != StatusCode::OK {
            return Err(Error::Refresh(format!(
                "{} returned {status}: {body}",
                endpoints.token_endpoint
            )));
        }

        let response: TokenResponse = serde_json::from_str(&body).map_err(|e| {
            Error::Refresh(format!(
                "invalid token response from {}: {e}",
                endpoints.token_endpoint
            ))
        })?;
        let bearer = self.bearer_from(&response, &endpoints.token_endpoint)?;
        let refreshed = Token::from_bearer(
            bearer,
            response
                .refresh_token
                .or_else(|| Some(refresh_token.to_string())),
            token.connection().to_string(),
            token.options(),
        )?;

        debug!(
            issuer = %self.issuer,
            expires_at = refreshed.expires_at(),
            "token refreshed"
        );
        Ok(refreshed)
    }

    async fn request_device_code(&self, endpoints: &Endpoints) -> Result<Option<DeviceCode>> {
        let endpoint = &endpoints.device_authorization_endpoint;
        let mut pairs = vec![
            ("client_id", self.client_id.as_str()),
            ("scope", self.config.scopes.as_str()),
        ];
        if let Some(hint) = &self.config.login_hint {
            pairs.push(("login_hint", hint.as_str()));
        }

        let (status, body) = self.post_form(endpoint, form::encode(pairs)).await?;
        match status {
            StatusCode::OK => {}
            StatusCode::BAD_REQUEST => {
                warn!(
                    endpoint = %endpoint,
                    "device authorization rejected, device flow may be disabled by the administrator"
                );
                return Ok(None);
            }
            _ => {
                return Err(Error::Protocol(format!(
                    "device authorization request to {endpoint} failed ({status}): {body}"
                )));
            }
        }

        let response: DeviceAuthorizationResponse = serde_json::from_str(&body).map_err(|e| {
            Error::Protocol(format!("invalid device authorization response from {endpoint}: {e}"))
        })?;
        let missing =
            |field: &str| Error::Protocol(format!("{endpoint} response is missing {field}"));

        let device_code = response.device_code.ok_or_else(|| missing("device_code"))?;
        let user_code = response.user_code.ok_or_else(|| missing("user_code"))?;
        let verification_uri = response
            .verification_uri_complete
            .or(response.verification_uri)
            .ok_or_else(|| missing("verification_uri"))?;
        let expires_in = response.expires_in.ok_or_else(|| missing("expires_in"))?;
        let interval = response.interval.ok_or_else(|| missing("interval"))?;

        Ok(Some(DeviceCode {
            device_code,
            prompt: DevicePrompt {
                verification_uri,
                user_code,
                expires_in,
            },
            expires_in,
            interval,
        }))
    }

    async fn poll(&self, token_endpoint: &str, code: &DeviceCode) -> Result<TokenResponse> {
        let deadline = Instant::now() + Duration::from_secs(code.expires_in);
        let mut interval = Duration::from_secs(code.interval);
        let mut polls = 0u32;

        loop {
            tokio::time::sleep(interval + self.config.poll_buffer).await;
            if Instant::now() >= deadline {
                return Err(Error::Expired {
                    seconds: code.expires_in,
                });
            }

            polls += 1;
            match self.poll_once(token_endpoint, code).await? {
                PollOutcome::Granted(response) => {
                    debug!(polls, "device code approved");
                    return Ok(response);
                }
                PollOutcome::Pending => {}
                PollOutcome::SlowDown => {
                    interval = slowed_down(interval);
                    debug!(interval_secs = interval.as_secs(), "provider asked to slow down");
                }
            }
        }
    }

    async fn poll_once(&self, token_endpoint: &str, code: &DeviceCode) -> Result<PollOutcome> {
        let mut pairs = vec![
            ("grant_type", DEVICE_CODE_GRANT_TYPE),
            ("device_code", code.device_code.as_str()),
            ("client_id", self.client_id.as_str()),
        ];
        if let Some(secret) = &self.config.client_secret {
            pairs.push(("client_secret", secret.expose().as_str()));
        }

        let (status, body) = self.post_form(token_endpoint, form::encode(pairs)).await?;
        if status == StatusCode::OK {
            let response = serde_json::from_str(&body).map_err(|e| {
                Error::Protocol(format!("invalid token response from {token_endpoint}: {e}"))
            })?;
            return Ok(PollOutcome::Granted(response));
        }

        let error: ErrorResponse = serde_json::from_str(&body).map_err(|_| {
            Error::Protocol(format!(
                "unexpected response from {token_endpoint} ({status}): {body}"
            ))
        })?;
        match error.error.as_str() {
            "authorization_pending" => Ok(PollOutcome::Pending),
            "slow_down" => Ok(PollOutcome::SlowDown),
            _ => Err(Error::Denied {
                endpoint: token_endpoint.to_string(),
                status: status.as_u16(),
                error: error.error,
                description: error.error_description,
            }),
        }
    }

    fn bearer_from(&self, response: &TokenResponse, endpoint: &str) -> Result<String> {
        let bearer = match self.config.token_type {
            TokenType::IdToken => response.id_token.clone(),
            TokenType::AccessToken => response.access_token.clone(),
        };
        bearer.ok_or_else(|| {
            Error::Protocol(format!(
                "{endpoint} response is missing {}",
                self.config.token_type.response_field()
            ))
        })
    }

    async fn post_form(&self, url: &str, body: String) -> Result<(StatusCode, String)> {
        let response = self
            .client
            .post(url)
            .header(CONTENT_TYPE, "application/x-www-form-urlencoded")
            .header(ACCEPT, "application/json")
            .body(body)
            .send()
            .await
            .map_err(|e| Error::Http(format!("request to {url} failed: {e}")))?;
        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| Error::Http(format!("reading response from {url} failed: {e}")))?;
        Ok((status, text))
    }
}

fn slowed_down(interval: Duration) -> Duration {
    interval + SLOW_DOWN_INCREMENT
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::Presentation;
    use crate::testing::{DEVICE_CODE, MockIdp, PollScenario, USER_CODE};
    use crate::token::jwt_expiry;
    use std::future::Future;
    use std::pin::Pin;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const CONNECTION: &str = "postgres:db.example.com:5433";

    /// Records prompts and counts teardowns.
    #[derive(Default)]
    struct RecordingPresenter {
        prompts: Mutex<Vec<DevicePrompt>>,
        stopped: Arc<AtomicUsize>,
    }

    impl DeviceCodePresenter for RecordingPresenter {
        fn present<'a>(
            &'a self,
            prompt: &'a DevicePrompt,
        ) -> Pin<Box<dyn Future<Output = Result<Presentation>> + Send + 'a>> {
            Box::pin(async move {
                self.prompts.lock().unwrap().push(prompt.clone());
                let stopped = self.stopped.clone();
                Ok(Presentation::on_stop(move || {
                    stopped.fetch_add(1, Ordering::SeqCst);
                }))
            })
        }
    }

    fn authorizer(idp: &MockIdp) -> DeviceAuthorizer {
        let config = Configuration::from_options(&idp.options()).unwrap();
        DeviceAuthorizer::new(config).unwrap()
    }

    #[test]
    fn missing_client_id_fails_before_network() {
        let config = Configuration {
            issuer: Some("http://127.0.0.1:1".into()),
            ..Configuration::default()
        };
        let err = DeviceAuthorizer::new(config).err().unwrap();
        assert!(matches!(err, Error::Config(_)), "got: {err:?}");
        assert!(err.to_string().contains("client id"));
    }

    #[test]
    fn missing_issuer_fails_before_network() {
        let config = Configuration {
            client_id: Some("id".into()),
            ..Configuration::default()
        };
        assert!(matches!(
            DeviceAuthorizer::new(config),
            Err(Error::Config(_))
        ));
    }

    /// Always fails, as a loopback page does when it cannot bind.
    struct FailingPresenter;

    impl DeviceCodePresenter for FailingPresenter {
        fn present<'a>(
            &'a self,
            _prompt: &'a DevicePrompt,
        ) -> Pin<Box<dyn Future<Output = Result<Presentation>> + Send + 'a>> {
            Box::pin(async { Err(Error::Presenter("no loopback address".into())) })
        }
    }

    fn device_response(expires_in: &str, interval: &str) -> DeviceAuthorizationResponse {
        serde_json::from_str(&format!(
            r#"{{"device_code":"abc","user_code":"123","verification_uri":"https://idp/device",
                "expires_in":{expires_in},"interval":{interval}}}"#
        ))
        .unwrap()
    }

    #[test]
    fn device_response_accepts_integer_seconds() {
        let response = device_response("900", "5");
        assert_eq!(response.expires_in, Some(900));
        assert_eq!(response.interval, Some(5));
    }

    #[test]
    fn device_response_accepts_float_seconds() {
        let response = device_response("900.0", "5.7");
        assert_eq!(response.expires_in, Some(900));
        assert_eq!(response.interval, Some(5));
    }

    #[test]
    fn device_response_accepts_string_seconds() {
        let response = device_response(r#""900""#, r#"" 5 ""#);
        assert_eq!(response.expires_in, Some(900));
        assert_eq!(response.interval, Some(5));
    }

    #[test]
    fn device_response_rejects_non_numeric_seconds() {
        let result: std::result::Result<DeviceAuthorizationResponse, _> = serde_json::from_str(
            r#"{"device_code":"abc","expires_in":"soon","interval":-1}"#,
        );
        assert!(result.is_err());
    }

    #[test]
    fn device_response_missing_seconds_are_none() {
        let response: DeviceAuthorizationResponse =
            serde_json::from_str(r#"{"device_code":"abc","expires_in":null}"#).unwrap();
        assert_eq!(response.expires_in, None);
        assert_eq!(response.interval, None);
    }

    #[test]
    fn slow_down_adds_five_seconds() {
        assert_eq!(slowed_down(Duration::from_secs(1)), Duration::from_secs(6));
    }

    #[tokio::test]
    async fn immediate_approval_yields_id_token() {
        let idp = MockIdp::start().await;
        let presenter = Arc::new(RecordingPresenter::default());
        let authorizer = authorizer(&idp).with_presenter(presenter.clone());

        let token = authorizer
            .authorize(CONNECTION, &idp.options())
            .await
            .unwrap()
            .expect("token");

        assert_eq!(token.connection(), CONNECTION);
        assert_eq!(token.refresh_token(), Some("refresh-1"));
        assert_eq!(jwt_expiry(token.auth_token()).unwrap(), token.expires_at());
        assert!(!token.is_expired());
        assert_eq!(idp.counters.device_flows(), 1);
        assert_eq!(idp.counters.token_polls.load(Ordering::SeqCst), 1);

        let prompts = presenter.prompts.lock().unwrap();
        assert_eq!(prompts.len(), 1);
        assert_eq!(prompts[0].user_code, USER_CODE);
        assert!(
            prompts[0].verification_uri.ends_with("/device?user_code=123"),
            "complete uri preferred: {}",
            prompts[0].verification_uri
        );
        assert_eq!(presenter.stopped.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn access_token_type_selects_access_token() {
        let idp = MockIdp::start().await;
        let mut config = Configuration::from_options(&idp.options()).unwrap();
        config.token_type = TokenType::AccessToken;
        let authorizer = DeviceAuthorizer::new(config).unwrap();

        let token = authorizer
            .authorize(CONNECTION, &idp.options())
            .await
            .unwrap()
            .unwrap();

        let payload = token.auth_token().split('.').nth(1).unwrap();
        let decoded = base64::Engine::decode(
            &base64::engine::general_purpose::URL_SAFE_NO_PAD,
            payload,
        )
        .unwrap();
        assert!(String::from_utf8(decoded).unwrap().contains("\"access\""));
    }

    #[tokio::test]
    async fn request_forms_carry_expected_fields() {
        let idp = MockIdp::start().await;
        let mut options = idp.options();
        options.insert(crate::constants::OPT_LOGIN_HINT, "alice@example.com");
        options.insert(crate::constants::OPT_CLIENT_SECRET, "shh");
        let authorizer = DeviceAuthorizer::new(Configuration::from_options(&options).unwrap()).unwrap();

        authorizer.authorize(CONNECTION, &options).await.unwrap().unwrap();

        let device_form = &idp.device_code_forms()[0];
        assert_eq!(device_form["client_id"], "test-client");
        assert_eq!(device_form["scope"], crate::constants::DEFAULT_SCOPES);
        assert_eq!(device_form["login_hint"], "alice@example.com");

        let token_form = &idp.token_forms()[0];
        assert_eq!(token_form["grant_type"], DEVICE_CODE_GRANT_TYPE);
        assert_eq!(token_form["device_code"], DEVICE_CODE);
        assert_eq!(token_form["client_secret"], "shh");
    }

    #[tokio::test]
    async fn pending_polls_are_silent_until_approval() {
        let idp = MockIdp::start().await;
        idp.set_poll_scenario(PollScenario::Success { pending_polls: 2 });

        let token = authorizer(&idp)
            .authorize(CONNECTION, &idp.options())
            .await
            .unwrap();

        assert!(token.is_some());
        assert_eq!(idp.counters.token_polls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn slow_down_widens_interval_then_succeeds() {
        let idp = MockIdp::start().await;
        idp.set_poll_scenario(PollScenario::SlowDown);
        idp.set_timing(30, 1);
        let started = std::time::Instant::now();

        let token = authorizer(&idp)
            .authorize(CONNECTION, &idp.options())
            .await
            .unwrap();

        assert!(token.is_some());
        assert_eq!(idp.counters.token_polls.load(Ordering::SeqCst), 2);
        // 1 s before the first poll, then 1 s + 5 s before the second
        assert!(
            started.elapsed() >= Duration::from_secs(7),
            "second poll came after {:?}",
            started.elapsed()
        );
    }

    #[tokio::test]
    async fn failing_presenter_falls_back_to_console() {
        let idp = MockIdp::start().await;

        let token = authorizer(&idp)
            .with_presenter(Arc::new(FailingPresenter))
            .authorize(CONNECTION, &idp.options())
            .await
            .unwrap();

        assert!(token.is_some());
        assert_eq!(idp.counters.token_polls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn denial_fails_on_first_poll_with_provider_message() {
        let idp = MockIdp::start().await;
        idp.set_poll_scenario(PollScenario::Deny);
        let presenter = Arc::new(RecordingPresenter::default());

        let err = authorizer(&idp)
            .with_presenter(presenter.clone())
            .authorize(CONNECTION, &idp.options())
            .await
            .unwrap_err();

        let msg = err.to_string();
        assert!(msg.contains("not_authorized"), "got: {msg}");
        assert!(msg.contains("a descriptive error"), "got: {msg}");
        assert_eq!(idp.counters.token_polls.load(Ordering::SeqCst), 1);
        assert_eq!(presenter.stopped.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn expiry_after_window_elapses() {
        let idp = MockIdp::start().await;
        idp.set_poll_scenario(PollScenario::Pending);
        idp.set_timing(4, 1);
        let presenter = Arc::new(RecordingPresenter::default());

        let err = authorizer(&idp)
            .with_presenter(presenter.clone())
            .authorize(CONNECTION, &idp.options())
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Expired { seconds: 4 }), "got: {err:?}");
        assert!(idp.counters.token_polls.load(Ordering::SeqCst) > 1);
        assert_eq!(presenter.stopped.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn disabled_device_flow_returns_none() {
        let idp = MockIdp::start().await;
        idp.disable_device_flow();

        let token = authorizer(&idp)
            .authorize(CONNECTION, &idp.options())
            .await
            .unwrap();

        assert!(token.is_none());
        assert_eq!(idp.counters.token_polls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn unexpected_device_code_status_is_protocol_error() {
        let idp = MockIdp::start().await;
        idp.set_device_code_status(500);

        let err = authorizer(&idp)
            .authorize(CONNECTION, &idp.options())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Protocol(_)), "got: {err:?}");
        assert!(err.to_string().contains("500"));
    }

    #[tokio::test]
    async fn success_without_bearer_field_is_protocol_error() {
        let idp = MockIdp::start().await;
        idp.omit_bearer_tokens();

        let err = authorizer(&idp)
            .authorize(CONNECTION, &idp.options())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Protocol(_)), "got: {err:?}");
        assert!(err.to_string().contains("id_token"));
    }

    #[tokio::test]
    async fn dropped_future_tears_down_presentation() {
        let idp = MockIdp::start().await;
        idp.set_poll_scenario(PollScenario::Pending);
        idp.set_timing(30, 1);
        let presenter = Arc::new(RecordingPresenter::default());
        let authorizer = authorizer(&idp).with_presenter(presenter.clone());
        let options = idp.options();

        let result = tokio::time::timeout(
            Duration::from_millis(1500),
            authorizer.authorize(CONNECTION, &options),
        )
        .await;

        assert!(result.is_err(), "should still be polling");
        assert_eq!(presenter.prompts.lock().unwrap().len(), 1);
        assert_eq!(presenter.stopped.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn refresh_issues_later_token_and_rotates_refresh_token() {
        let idp = MockIdp::start().await;
        idp.set_token_ttl(-10);
        idp.set_refresh_ttl(120);
        let authorizer = authorizer(&idp);
        let token = authorizer
            .authorize(CONNECTION, &idp.options())
            .await
            .unwrap()
            .unwrap();
        assert!(token.is_expired());

        let before = crate::token::now_secs();
        let refreshed = authorizer.refresh(&token).await.unwrap();

        assert!(refreshed.expires_at() > token.expires_at());
        // Expiry comes from the new token's exp claim
        let expected = before + 120;
        assert!(
            (expected..=expected + 2).contains(&refreshed.expires_at()),
            "expires_at {} not near {expected}",
            refreshed.expires_at()
        );
        assert!(!refreshed.is_expired());
        assert_eq!(refreshed.refresh_token(), Some("refresh-2"));
        assert_eq!(refreshed.connection(), CONNECTION);
        assert_eq!(refreshed.options(), token.options());
        assert_eq!(idp.counters.refreshes(), 1);
        assert_eq!(idp.token_forms()[1]["refresh_token"], "refresh-1");
    }

    #[tokio::test]
    async fn refresh_carries_forward_refresh_token_when_omitted() {
        let idp = MockIdp::start().await;
        idp.keep_refresh_token();
        let authorizer = authorizer(&idp);
        let token = authorizer
            .authorize(CONNECTION, &idp.options())
            .await
            .unwrap()
            .unwrap();

        let refreshed = authorizer.refresh(&token).await.unwrap();
        assert_eq!(refreshed.refresh_token(), Some("refresh-1"));
    }

    #[tokio::test]
    async fn rejected_refresh_is_refresh_error() {
        let idp = MockIdp::start().await;
        idp.fail_refresh();
        let authorizer = authorizer(&idp);
        let token = authorizer
            .authorize(CONNECTION, &idp.options())
            .await
            .unwrap()
            .unwrap();

        let err = authorizer.refresh(&token).await.unwrap_err();
        assert!(matches!(err, Error::Refresh(_)), "got: {err:?}");
        assert!(err.to_string().contains("invalid_grant"));
    }

    #[tokio::test]
    async fn refresh_without_refresh_token_fails_without_network() {
        let idp = MockIdp::start().await;
        let token = Token::new("a.b.c".into(), None, 0, CONNECTION.into(), &idp.options());

        let err = authorizer(&idp).refresh(&token).await.unwrap_err();
        assert!(matches!(err, Error::Refresh(_)));
        assert_eq!(idp.counters.discovery.load(Ordering::SeqCst), 0);
    }
}
