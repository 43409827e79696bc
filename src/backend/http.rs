//! REST client for the agenda backend
//!
//! Feature-gated behind `http`.

use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use super::SyncBackend;
use crate::error::{AgendaSyncError, Result};
use crate::types::{
    AnalyzeResponse, BackupInfo, ClearChoicesResult, NewPatient, Patient, RollbackResult,
    SavedChoice, SyncRequest, SyncResponse,
};

const DEFAULT_BASE_URL: &str = "http://localhost:8001/api";
const DEFAULT_TIMEOUT_SECS: u64 = 120;

/// Connection settings for the agenda backend
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    /// API root, e.g. `https://host/api`
    pub base_url: String,
    /// Bearer token obtained at login
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
}

fn default_timeout() -> u64 {
    DEFAULT_TIMEOUT_SECS
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            token: None,
            timeout_secs: DEFAULT_TIMEOUT_SECS,
        }
    }
}

impl BackendConfig {
    /// Create config from environment variables
    pub fn from_env() -> Result<Self> {
        let base_url =
            std::env::var("AGENDA_API_URL").unwrap_or_else(|_| DEFAULT_BASE_URL.to_string());
        let token = std::env::var("AGENDA_API_TOKEN").ok().filter(|t| !t.is_empty());
        let timeout_secs = match std::env::var("AGENDA_API_TIMEOUT_SECS") {
            Ok(value) => value.parse().map_err(|_| {
                AgendaSyncError::Config(format!("AGENDA_API_TIMEOUT_SECS is not a number: {}", value))
            })?,
            Err(_) => DEFAULT_TIMEOUT_SECS,
        };
        Ok(Self {
            base_url,
            token,
            timeout_secs,
        })
    }

    fn url(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }
}

/// Error body returned by the backend on non-2xx responses
#[derive(Debug, Deserialize)]
struct ErrorBody {
    detail: Option<serde_json::Value>,
}

/// Envelope of `GET sync/choices/{ambulatorio}`
#[derive(Debug, Deserialize)]
struct ChoicesResponse {
    #[serde(default)]
    choices: Vec<SavedChoice>,
}

#[derive(Serialize)]
struct AnalyzeBody<'a> {
    ambulatorio: &'a str,
    year: i32,
}

/// `SyncBackend` over HTTP/JSON
pub struct HttpBackend {
    client: reqwest::Client,
    config: BackendConfig,
}

impl HttpBackend {
    pub fn new(config: BackendConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self { client, config })
    }

    pub fn from_env() -> Result<Self> {
        Self::new(BackendConfig::from_env()?)
    }

    pub fn config(&self) -> &BackendConfig {
        &self.config
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        let builder = self.client.request(method, self.config.url(path));
        match &self.config.token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    /// Send a request and return the body of a 2xx response
    async fn execute(&self, builder: reqwest::RequestBuilder) -> Result<String> {
        let response = builder.send().await.map_err(|e| {
            tracing::error!("Agenda backend unreachable: {}", e);
            if e.is_connect() || e.is_timeout() {
                AgendaSyncError::Connection(e.to_string())
            } else {
                AgendaSyncError::Http(e)
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            let detail = parse_detail(&text).unwrap_or_else(|| status.to_string());
            tracing::error!(status = status.as_u16(), %detail, "Agenda backend rejected request");
            return Err(AgendaSyncError::Rejected {
                status: status.as_u16(),
                detail,
            });
        }

        Ok(response.text().await?)
    }

    async fn send<T: DeserializeOwned>(&self, builder: reqwest::RequestBuilder) -> Result<T> {
        let body = self.execute(builder).await?;
        decode(&body)
    }
}

/// Parse a 2xx body; a shape mismatch is a contract error, not a network one
fn decode<T: DeserializeOwned>(body: &str) -> Result<T> {
    serde_json::from_str(body).map_err(|e| {
        tracing::error!("Unexpected response body from agenda backend: {}", e);
        AgendaSyncError::Serialization(e)
    })
}

/// Extract `detail` from a FastAPI-style error body
fn parse_detail(text: &str) -> Option<String> {
    let body: ErrorBody = serde_json::from_str(text).ok()?;
    match body.detail? {
        serde_json::Value::String(s) => Some(s),
        other => Some(other.to_string()),
    }
}

#[async_trait]
impl SyncBackend for HttpBackend {
    async fn analyze(&self, ambulatorio: &str, year: i32) -> Result<AnalyzeResponse> {
        let builder = self
            .request(reqwest::Method::POST, "sync/google-sheets/analyze")
            .json(&AnalyzeBody { ambulatorio, year });
        self.send(builder).await
    }

    async fn sync(&self, request: &SyncRequest) -> Result<SyncResponse> {
        let builder = self
            .request(reqwest::Method::POST, "sync/google-sheets")
            .json(request);
        self.send(builder).await
    }

    async fn create_patient(&self, patient: &NewPatient) -> Result<Patient> {
        let builder = self.request(reqwest::Method::POST, "patients").json(patient);
        self.send(builder).await
    }

    async fn list_patients(&self, ambulatorio: &str) -> Result<Vec<Patient>> {
        let builder = self
            .request(reqwest::Method::GET, "patients")
            .query(&[("ambulatorio", ambulatorio)]);
        self.send(builder).await
    }

    async fn backup_info(&self, ambulatorio: &str) -> Result<BackupInfo> {
        let builder = self.request(reqwest::Method::GET, &format!("sync/backup/{}", ambulatorio));
        self.send(builder).await
    }

    async fn rollback(&self, ambulatorio: &str) -> Result<RollbackResult> {
        let builder = self.request(reqwest::Method::POST, &format!("sync/rollback/{}", ambulatorio));
        self.send(builder).await
    }

    async fn list_choices(&self, ambulatorio: &str) -> Result<Vec<SavedChoice>> {
        let builder = self.request(reqwest::Method::GET, &format!("sync/choices/{}", ambulatorio));
        let response: ChoicesResponse = self.send(builder).await?;
        Ok(response.choices)
    }

    async fn delete_choice(&self, choice_id: &str) -> Result<()> {
        let builder = self.request(reqwest::Method::DELETE, &format!("sync/choices/{}", choice_id));
        self.execute(builder).await?;
        Ok(())
    }

    async fn clear_choices(&self, ambulatorio: &str) -> Result<ClearChoicesResult> {
        let builder = self.request(
            reqwest::Method::DELETE,
            &format!("sync/choices/clear/{}", ambulatorio),
        );
        self.send(builder).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn test_url_joining() {
        let config = BackendConfig {
            base_url: "https://example.org/api/".into(),
            ..Default::default()
        };
        assert_eq!(
            config.url("/sync/google-sheets"),
            "https://example.org/api/sync/google-sheets"
        );
    }

    #[test]
    fn test_parse_detail() {
        assert_eq!(
            parse_detail(r#"{"detail": "Foglio non accessibile"}"#).as_deref(),
            Some("Foglio non accessibile")
        );
        assert_eq!(
            parse_detail(r#"{"detail": [{"loc": ["body"], "msg": "field required"}]}"#)
                .map(|d| d.contains("field required")),
            Some(true)
        );
        assert_eq!(parse_detail("<html>502</html>"), None);
    }

    #[test]
    fn test_config_deserialize_defaults() {
        let config: BackendConfig =
            serde_json::from_str(r#"{"base_url": "http://10.0.0.2/api"}"#).unwrap();
        assert_eq!(config.timeout_secs, DEFAULT_TIMEOUT_SECS);
        assert!(config.token.is_none());
    }

    #[test]
    fn test_choices_envelope() {
        let body = r#"{"choices": [
            {"id": "s1", "name": "Mario Rosi", "action": "not_selected",
             "dates": ["2025-03-04", "2025-03-11"], "created_by": "infermiere1",
             "created_at": "2025-03-20T10:15:00Z"},
            {"id": "s2", "name": "Bianci Anna", "action": "replace", "replace_with": "Bianchi Anna"}
        ]}"#;
        let response: ChoicesResponse = decode(body).unwrap();
        assert_eq!(response.choices.len(), 2);
        assert_eq!(response.choices[0].dates.len(), 2);
        assert_eq!(response.choices[0].created_by.as_deref(), Some("infermiere1"));
        assert!(response.choices[1].dates.is_empty());
        assert_eq!(response.choices[1].replace_with.as_deref(), Some("Bianchi Anna"));

        let empty: ChoicesResponse = decode("{}").unwrap();
        assert!(empty.choices.is_empty());
    }

    #[test]
    fn test_malformed_choices_is_a_contract_error() {
        let err = decode::<ChoicesResponse>(r#"{"choices": "none"}"#).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Internal);
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_undecodable_body_is_not_a_network_error() {
        let err = decode::<SyncResponse>("<html>Bad gateway</html>").unwrap_err();
        assert!(matches!(err, AgendaSyncError::Serialization(_)));
        assert_ne!(err.kind(), ErrorKind::Network);
        assert!(!err.is_retryable());
        assert_ne!(err.user_message(), "Connection error");
    }

    #[test]
    fn test_analyze_body_shape() {
        let body = serde_json::to_value(AnalyzeBody {
            ambulatorio: "pta_centro",
            year: 2025,
        })
        .unwrap();
        assert_eq!(body, serde_json::json!({"ambulatorio": "pta_centro", "year": 2025}));
    }
}
