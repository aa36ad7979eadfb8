//! Remote record connector.
//!
//! Every fetch is preceded by [`Connector::preflight`]: the endpoint must be
//! HTTPS (plain HTTP only with `allow_http`) and the bearer token read from
//! `token_env` must be non-empty and at least eight characters. Mock mode
//! runs the same checks, then returns `mock_records` without a network call.

use std::sync::Arc;
use std::time::Duration;

use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info};
use url::Url;

use super::source::default_inline_records;
use crate::error::ConnectorError;

pub const DEFAULT_ENDPOINT: &str = "https://mock.mendix.local/api/v1/records";
pub const DEFAULT_TOKEN_ENV: &str = "MENDIX_CONNECTOR_TOKEN";
pub const MIN_TOKEN_LEN: usize = 8;

/// Looks up an environment variable. Injected so tests need not touch the
/// process environment.
pub type EnvLookup = Arc<dyn Fn(&str) -> Option<String> + Send + Sync>;

pub fn process_env() -> EnvLookup {
    Arc::new(|key| std::env::var(key).ok())
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectorSettings {
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_token_env")]
    pub token_env: String,
    #[serde(default = "default_true")]
    pub use_mock: bool,
    #[serde(default)]
    pub allow_http: bool,
    #[serde(default = "default_timeout")]
    pub timeout_seconds: u64,
    #[serde(default)]
    pub mock_records: Option<Vec<Value>>,
}

fn default_endpoint() -> String {
    DEFAULT_ENDPOINT.to_string()
}

fn default_token_env() -> String {
    DEFAULT_TOKEN_ENV.to_string()
}

fn default_true() -> bool {
    true
}

fn default_timeout() -> u64 {
    10
}

impl Default for ConnectorSettings {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            token_env: default_token_env(),
            use_mock: true,
            allow_http: false,
            timeout_seconds: default_timeout(),
            mock_records: None,
        }
    }
}

/// A connector whose endpoint and token have been checked.
#[derive(Debug, Clone)]
pub struct Connector {
    settings: ConnectorSettings,
    endpoint: Url,
    token: String,
}

impl Connector {
    /// Check the endpoint protocol and resolve the bearer token.
    pub fn preflight(settings: &ConnectorSettings, env: &EnvLookup) -> Result<Self, ConnectorError> {
        let endpoint = Url::parse(&settings.endpoint)
            .map_err(|_| ConnectorError::InvalidEndpoint(settings.endpoint.clone()))?;
        match endpoint.scheme() {
            "https" => {}
            "http" if settings.allow_http => {
                debug!(endpoint = %endpoint, "plain http allowed for local development");
            }
            scheme => {
                return Err(ConnectorError::DisallowedProtocol {
                    scheme: scheme.to_string(),
                    endpoint: settings.endpoint.clone(),
                });
            }
        }

        let token = env(&settings.token_env)
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .ok_or_else(|| ConnectorError::TokenMissing(settings.token_env.clone()))?;
        if token.chars().count() < MIN_TOKEN_LEN {
            return Err(ConnectorError::TokenTooShort {
                env: settings.token_env.clone(),
                len: token.chars().count(),
            });
        }

        Ok(Self {
            settings: settings.clone(),
            endpoint,
            token,
        })
    }

    pub fn is_mock(&self) -> bool {
        self.settings.use_mock
    }

    /// Fetch raw rows; either a JSON array or an object with a `records` array.
    pub async fn fetch(&self) -> Result<Vec<Value>, ConnectorError> {
        if self.settings.use_mock {
            let records = self
                .settings
                .mock_records
                .clone()
                .unwrap_or_else(default_inline_records);
            info!(count = records.len(), "connector returning mock records");
            return Ok(records);
        }

        let client = Client::builder()
            .timeout(Duration::from_secs(self.settings.timeout_seconds.max(1)))
            .build()?;
        let response = client
            .get(self.endpoint.clone())
            .bearer_auth(&self.token)
            .header("accept", "application/json")
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(ConnectorError::Status {
                status: status.as_u16(),
                message,
            });
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| ConnectorError::MalformedResponse(e.to_string()))?;
        let records = records_from_body(body)?;
        info!(endpoint = %self.endpoint, count = records.len(), "connector fetch complete");
        Ok(records)
    }
}

pub(crate) fn records_from_body(body: Value) -> Result<Vec<Value>, ConnectorError> {
    match body {
        Value::Array(items) => Ok(items),
        Value::Object(mut obj) => match obj.remove("records") {
            Some(Value::Array(items)) => Ok(items),
            _ => Err(ConnectorError::MalformedResponse(
                "object response has no records array".into(),
            )),
        },
        other => Err(ConnectorError::MalformedResponse(format!(
            "expected array or object, got {}",
            kind_of(&other)
        ))),
    }
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn env_with(token: &'static str) -> EnvLookup {
        Arc::new(move |key| (key == DEFAULT_TOKEN_ENV).then(|| token.to_string()))
    }

    fn live(endpoint: String) -> ConnectorSettings {
        ConnectorSettings {
            endpoint,
            use_mock: false,
            allow_http: true,
            timeout_seconds: 2,
            ..ConnectorSettings::default()
        }
    }

    #[test]
    fn empty_token_is_missing() {
        let err = Connector::preflight(&ConnectorSettings::default(), &env_with("")).unwrap_err();
        assert!(matches!(err, ConnectorError::TokenMissing(env) if env == DEFAULT_TOKEN_ENV));
    }

    #[test]
    fn unset_token_is_missing() {
        let env: EnvLookup = Arc::new(|_| None);
        let err = Connector::preflight(&ConnectorSettings::default(), &env).unwrap_err();
        assert!(matches!(err, ConnectorError::TokenMissing(_)));
    }

    #[test]
    fn short_token_is_rejected() {
        let err =
            Connector::preflight(&ConnectorSettings::default(), &env_with("abc")).unwrap_err();
        assert!(matches!(err, ConnectorError::TokenTooShort { len: 3, .. }));
    }

    #[test]
    fn http_requires_override() {
        let settings = ConnectorSettings {
            endpoint: "http://localhost:8080/records".into(),
            ..ConnectorSettings::default()
        };
        let err = Connector::preflight(&settings, &env_with("secret-token")).unwrap_err();
        assert!(matches!(err, ConnectorError::DisallowedProtocol { scheme, .. } if scheme == "http"));

        let allowed = ConnectorSettings {
            allow_http: true,
            ..settings
        };
        assert!(Connector::preflight(&allowed, &env_with("secret-token")).is_ok());
    }

    #[test]
    fn other_schemes_are_rejected_even_with_override() {
        let settings = ConnectorSettings {
            endpoint: "ftp://files.local/records".into(),
            allow_http: true,
            ..ConnectorSettings::default()
        };
        let err = Connector::preflight(&settings, &env_with("secret-token")).unwrap_err();
        assert!(matches!(err, ConnectorError::DisallowedProtocol { .. }));
    }

    #[test]
    fn garbage_endpoint_is_invalid() {
        let settings = ConnectorSettings {
            endpoint: "not a url".into(),
            ..ConnectorSettings::default()
        };
        let err = Connector::preflight(&settings, &env_with("secret-token")).unwrap_err();
        assert!(matches!(err, ConnectorError::InvalidEndpoint(_)));
    }

    #[tokio::test]
    async fn mock_mode_returns_supplied_records() {
        let settings = ConnectorSettings {
            mock_records: Some(vec![json!({"source_id": "m-1"})]),
            ..ConnectorSettings::default()
        };
        let connector = Connector::preflight(&settings, &env_with("secret-token")).unwrap();
        assert!(connector.is_mock());
        let records = connector.fetch().await.unwrap();
        assert_eq!(records, vec![json!({"source_id": "m-1"})]);
    }

    #[tokio::test]
    async fn live_fetch_sends_bearer_token() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v1/records"))
            .and(header("authorization", "Bearer secret-token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "records": [{"source_id": "r-1"}, {"source_id": "r-2"}]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let settings = live(format!("{}/api/v1/records", server.uri()));
        let connector = Connector::preflight(&settings, &env_with("secret-token")).unwrap();
        let records = connector.fetch().await.unwrap();
        assert_eq!(records.len(), 2);
    }

    #[tokio::test]
    async fn live_fetch_accepts_bare_array() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([{"source_id": "r-1"}])))
            .mount(&server)
            .await;

        let connector =
            Connector::preflight(&live(server.uri()), &env_with("secret-token")).unwrap();
        assert_eq!(connector.fetch().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn malformed_body_is_rejected() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"items": []})))
            .mount(&server)
            .await;

        let connector =
            Connector::preflight(&live(server.uri()), &env_with("secret-token")).unwrap();
        let err = connector.fetch().await.unwrap_err();
        assert!(matches!(err, ConnectorError::MalformedResponse(_)));
    }

    #[tokio::test]
    async fn error_status_is_surfaced() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(401).set_body_string("bad token"))
            .mount(&server)
            .await;

        let connector =
            Connector::preflight(&live(server.uri()), &env_with("secret-token")).unwrap();
        let err = connector.fetch().await.unwrap_err();
        assert!(matches!(err, ConnectorError::Status { status: 401, ref message } if message == "bad token"));
    }

    #[test]
    fn scalar_body_is_malformed() {
        let err = records_from_body(json!(42)).unwrap_err();
        assert_eq!(
            err.to_string(),
            "malformed connector response: expected array or object, got number"
        );
    }
}
