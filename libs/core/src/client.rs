use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Response, StatusCode};
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use crate::config::BackendConfig;
use crate::dispatch::{MessageBackend, SendAck, SendRequest};
use crate::error::{BackendError, RegistryError};
use crate::registry::TemplateRegistry;
use crate::template::{Template, TemplateSummary, normalize_template_content};

const SEND_PATH: &str = "/api/v1/whatsapp/send";
const TEMPLATES_PATH: &str = "/api/v1/whatsapp/templates";
const TEMPLATE_CONTENT_PATH: &str = "/api/v1/whatsapp/template-content";

/// Client for the messaging backend's WhatsApp endpoints.
///
/// Every request carries the caller's bearer token; the token is never
/// logged.
#[derive(Clone, Debug)]
pub struct HttpBackend {
    http: reqwest::Client,
    api_base: String,
    timeout: Duration,
}

impl HttpBackend {
    pub fn new(cfg: &BackendConfig) -> Result<Self, BackendError> {
        let http = reqwest::Client::builder()
            .timeout(cfg.request_timeout)
            .build()
            .map_err(|err| BackendError::Unavailable(err.to_string()))?;
        Ok(Self::with_client(http, cfg))
    }

    pub fn with_client(http: reqwest::Client, cfg: &BackendConfig) -> Self {
        Self {
            http,
            api_base: cfg.api_base.trim_end_matches('/').to_string(),
            timeout: cfg.request_timeout,
        }
    }

    pub fn api_base(&self) -> &str {
        &self.api_base
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.api_base, path)
    }

    fn transport(&self, err: reqwest::Error) -> BackendError {
        if err.is_timeout() {
            BackendError::Timeout(self.timeout)
        } else {
            BackendError::Unavailable(err.to_string())
        }
    }
}

#[derive(Deserialize)]
struct TemplateListing {
    #[serde(default)]
    templates: BTreeMap<String, TemplateSummary>,
}

/// Pulls the human-readable failure out of a backend error body.
///
/// The backend answers `{"error": ..}` or `{"detail": ..}`; the error may be
/// a string or a provider object with a `message`.
fn error_detail(status: StatusCode, body: &str) -> String {
    let parsed = serde_json::from_str::<Value>(body).ok();
    let detail = parsed.as_ref().and_then(|value| {
        ["error", "detail"].iter().find_map(|key| match value.get(key)? {
            Value::String(s) => Some(s.clone()),
            Value::Object(obj) => obj
                .get("message")
                .and_then(Value::as_str)
                .map(str::to_string),
            Value::Null => None,
            other => Some(other.to_string()),
        })
    });
    match detail {
        Some(detail) => detail,
        None if !body.trim().is_empty() => body.trim().to_string(),
        None => status
            .canonical_reason()
            .unwrap_or("request failed")
            .to_string(),
    }
}

async fn read_failure(response: Response) -> (StatusCode, String) {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    (status, error_detail(status, &body))
}

#[async_trait]
impl MessageBackend for HttpBackend {
    async fn send(&self, token: &str, request: &SendRequest) -> Result<SendAck, BackendError> {
        let response = self
            .http
            .post(self.url(SEND_PATH))
            .bearer_auth(token)
            .json(request)
            .send()
            .await
            .map_err(|err| self.transport(err))?;

        if !response.status().is_success() {
            let (status, detail) = read_failure(response).await;
            return Err(BackendError::Rejected {
                status: status.as_u16(),
                detail,
            });
        }

        let raw: Value = response.json().await.unwrap_or(Value::Null);
        // A 2xx with `success: false` is still a rejection.
        if raw.get("success").and_then(Value::as_bool) == Some(false) {
            return Err(BackendError::Rejected {
                status: StatusCode::OK.as_u16(),
                detail: error_detail(StatusCode::OK, &raw.to_string()),
            });
        }

        let message_id = raw
            .get("data")
            .unwrap_or(&raw)
            .get("messages")
            .and_then(|v| v.get(0))
            .and_then(|v| v.get("id"))
            .and_then(Value::as_str)
            .map(str::to_string);
        debug!(recipient = %request.phone_number, ?message_id, "backend accepted send");

        Ok(SendAck {
            message_id,
            raw: Some(raw),
        })
    }
}

#[async_trait]
impl TemplateRegistry for HttpBackend {
    async fn list_templates(
        &self,
        token: &str,
    ) -> Result<BTreeMap<String, TemplateSummary>, RegistryError> {
        let response = self
            .http
            .get(self.url(TEMPLATES_PATH))
            .bearer_auth(token)
            .send()
            .await
            .map_err(|err| RegistryError::Unavailable(self.transport(err).to_string()))?;

        if !response.status().is_success() {
            let (status, detail) = read_failure(response).await;
            return Err(RegistryError::Backend {
                status: status.as_u16(),
                detail,
            });
        }

        let listing: TemplateListing = response
            .json()
            .await
            .map_err(|err| RegistryError::Decode(err.to_string()))?;
        Ok(listing
            .templates
            .into_iter()
            .map(|(name, mut summary)| {
                if summary.name.is_empty() {
                    summary.name = name.clone();
                }
                (name, summary)
            })
            .collect())
    }

    async fn template_content(
        &self,
        token: &str,
        phone_number_id: &str,
        template_name: &str,
    ) -> Result<Template, RegistryError> {
        let response = self
            .http
            .get(self.url(TEMPLATE_CONTENT_PATH))
            .bearer_auth(token)
            .query(&[
                ("phone_number_id", phone_number_id),
                ("template_name", template_name),
            ])
            .send()
            .await
            .map_err(|err| RegistryError::Unavailable(self.transport(err).to_string()))?;

        match response.status() {
            StatusCode::NOT_FOUND => Err(RegistryError::NotFound(template_name.to_string())),
            status if !status.is_success() => {
                let (status, detail) = read_failure(response).await;
                Err(RegistryError::Backend {
                    status: status.as_u16(),
                    detail,
                })
            }
            _ => {
                let body: Value = response
                    .json()
                    .await
                    .map_err(|err| RegistryError::Decode(err.to_string()))?;
                normalize_template_content(body)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_detail_prefers_backend_fields() {
        assert_eq!(
            error_detail(
                StatusCode::BAD_REQUEST,
                r#"{"detail": "Template 'promo' not found in language 'en'"}"#
            ),
            "Template 'promo' not found in language 'en'"
        );
        assert_eq!(
            error_detail(
                StatusCode::BAD_REQUEST,
                r#"{"error": {"message": "(#131030) Recipient not in allowed list"}}"#
            ),
            "(#131030) Recipient not in allowed list"
        );
        assert_eq!(
            error_detail(StatusCode::BAD_GATEWAY, "upstream exploded"),
            "upstream exploded"
        );
        assert_eq!(
            error_detail(StatusCode::SERVICE_UNAVAILABLE, ""),
            "Service Unavailable"
        );
    }

    #[test]
    fn trims_trailing_slash_from_base() {
        let cfg = BackendConfig {
            api_base: "http://backend.local/".into(),
            ..BackendConfig::default()
        };
        let backend = HttpBackend::new(&cfg).unwrap();
        assert_eq!(backend.api_base(), "http://backend.local");
        assert_eq!(
            backend.url(SEND_PATH),
            "http://backend.local/api/v1/whatsapp/send"
        );
    }
}
