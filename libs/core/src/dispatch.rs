use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::task::JoinHandle;
use tracing::{Instrument, debug, info, warn};
use uuid::Uuid;
use wa_campaign_backpressure::BackpressureLimiter;
use wa_campaign_telemetry::{TelemetryLabels, record_counter, record_gauge, record_histogram};

use crate::compose::ComposedMessage;
use crate::config::{BackendConfig, DEFAULT_MAX_IN_FLIGHT, DEFAULT_REQUEST_TIMEOUT_MS};
use crate::error::{BackendError, CampaignError, ProviderErrorKind};
use crate::recipients::RecipientSet;
use crate::session::SessionProvider;

/// Identity shared by every send of one campaign batch.
///
/// The id is minted here, before the first recipient is dispatched, so
/// delivery updates for any recipient can be correlated back to the batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CampaignContext {
    pub campaign_id: Uuid,
    pub campaign_name: String,
    pub from_number: String,
}

impl CampaignContext {
    pub fn new(campaign_name: impl Into<String>, from_number: impl Into<String>) -> Self {
        Self {
            campaign_id: Uuid::new_v4(),
            campaign_name: campaign_name.into(),
            from_number: from_number.into(),
        }
    }
}

/// Body of `POST /api/v1/whatsapp/send` for one recipient.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendRequest {
    pub campaign_id: Uuid,
    pub campaign_name: String,
    pub from_number: String,
    pub phone_number: String,
    pub recipients: Vec<String>,
    pub template_name: String,
    pub use_template: bool,
    pub template: ComposedMessage,
}

impl SendRequest {
    pub fn for_recipient(ctx: &CampaignContext, recipient: &str, message: &ComposedMessage) -> Self {
        Self {
            campaign_id: ctx.campaign_id,
            campaign_name: ctx.campaign_name.clone(),
            from_number: ctx.from_number.clone(),
            phone_number: recipient.to_string(),
            recipients: vec![recipient.to_string()],
            template_name: message.template_name.clone(),
            use_template: true,
            template: message.clone(),
        }
    }
}

/// What the backend acknowledged for a successful send.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SendAck {
    pub message_id: Option<String>,
    pub raw: Option<Value>,
}

/// The send endpoint of the messaging backend.
#[async_trait]
pub trait MessageBackend: Send + Sync {
    async fn send(&self, token: &str, request: &SendRequest) -> Result<SendAck, BackendError>;
}

/// Result of one send attempt. Built once by the dispatcher and never
/// changed afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchOutcome {
    recipient: String,
    success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    provider_error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    status: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    message_id: Option<String>,
}

impl DispatchOutcome {
    pub fn succeeded(recipient: impl Into<String>, message_id: Option<String>) -> Self {
        Self {
            recipient: recipient.into(),
            success: true,
            provider_error: None,
            status: None,
            message_id,
        }
    }

    pub fn failed(recipient: impl Into<String>, error: &BackendError) -> Self {
        Self {
            recipient: recipient.into(),
            success: false,
            provider_error: Some(error.to_string()),
            status: error.status(),
            message_id: None,
        }
    }

    pub fn recipient(&self) -> &str {
        &self.recipient
    }

    pub fn success(&self) -> bool {
        self.success
    }

    /// Backend error detail, verbatim.
    pub fn provider_error(&self) -> Option<&str> {
        self.provider_error.as_deref()
    }

    pub fn status(&self) -> Option<u16> {
        self.status
    }

    pub fn message_id(&self) -> Option<&str> {
        self.message_id.as_deref()
    }

    pub fn error_kind(&self) -> Option<ProviderErrorKind> {
        self.provider_error
            .as_deref()
            .map(|detail| ProviderErrorKind::classify(self.status, detail))
    }
}

/// One recipient with the message composed for it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    pub recipient: String,
    pub message: ComposedMessage,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatchSettings {
    pub max_in_flight: usize,
    pub request_timeout: Duration,
}

impl Default for DispatchSettings {
    fn default() -> Self {
        Self {
            max_in_flight: DEFAULT_MAX_IN_FLIGHT,
            request_timeout: Duration::from_millis(DEFAULT_REQUEST_TIMEOUT_MS),
        }
    }
}

impl From<&BackendConfig> for DispatchSettings {
    fn from(cfg: &BackendConfig) -> Self {
        Self {
            max_in_flight: cfg.max_in_flight.max(1),
            request_timeout: cfg.request_timeout,
        }
    }
}

/// Sends composed messages one recipient at a time with bounded concurrency.
///
/// Outcomes come back in recipient order whatever order the sends complete
/// in. A failed or timed-out send is recorded and the rest of the batch
/// carries on; nothing is retried.
pub struct Dispatcher {
    backend: Arc<dyn MessageBackend>,
    session: Arc<dyn SessionProvider>,
    limiter: Arc<dyn BackpressureLimiter>,
    settings: DispatchSettings,
}

impl Dispatcher {
    pub fn new(
        backend: Arc<dyn MessageBackend>,
        session: Arc<dyn SessionProvider>,
        limiter: Arc<dyn BackpressureLimiter>,
        settings: DispatchSettings,
    ) -> Self {
        Self {
            backend,
            session,
            limiter,
            settings,
        }
    }

    pub fn settings(&self) -> DispatchSettings {
        self.settings
    }

    /// Sends the same message to every recipient.
    pub async fn dispatch(
        &self,
        ctx: &CampaignContext,
        message: &ComposedMessage,
        recipients: &RecipientSet,
    ) -> Result<Vec<DispatchOutcome>, CampaignError> {
        let envelopes = recipients
            .iter()
            .map(|recipient| Envelope {
                recipient: recipient.to_string(),
                message: message.clone(),
            })
            .collect();
        self.dispatch_each(ctx, envelopes).await
    }

    /// Sends each envelope's own message to its recipient.
    pub async fn dispatch_each(
        &self,
        ctx: &CampaignContext,
        envelopes: Vec<Envelope>,
    ) -> Result<Vec<DispatchOutcome>, CampaignError> {
        let token = self
            .session
            .access_token()
            .ok_or(CampaignError::Unauthorized)?;

        info!(
            campaign_id = %ctx.campaign_id,
            campaign = %ctx.campaign_name,
            recipients = envelopes.len(),
            max_in_flight = self.settings.max_in_flight,
            "dispatching campaign"
        );

        let token = token.as_str();
        let in_flight = AtomicUsize::new(0);
        let outcomes: Vec<DispatchOutcome> = stream::iter(envelopes)
            .map(|envelope| self.send_one(ctx, token, &in_flight, envelope))
            .buffered(self.settings.max_in_flight.max(1))
            .collect()
            .await;

        let failed = outcomes.iter().filter(|o| !o.success()).count();
        info!(
            campaign_id = %ctx.campaign_id,
            sent = outcomes.len() - failed,
            failed,
            "campaign dispatch finished"
        );
        Ok(outcomes)
    }

    /// Detaches the batch onto the runtime so in-flight sends finish even if
    /// the caller stops waiting.
    pub fn spawn(
        self: Arc<Self>,
        ctx: CampaignContext,
        envelopes: Vec<Envelope>,
    ) -> JoinHandle<Result<Vec<DispatchOutcome>, CampaignError>> {
        tokio::spawn(
            async move { self.dispatch_each(&ctx, envelopes).await }.in_current_span(),
        )
    }

    async fn send_one(
        &self,
        ctx: &CampaignContext,
        token: &str,
        in_flight: &AtomicUsize,
        envelope: Envelope,
    ) -> DispatchOutcome {
        let Envelope { recipient, message } = envelope;
        let labels = TelemetryLabels::new(message.template_name.clone())
            .with_campaign(ctx.campaign_id.to_string());
        let span = tracing::info_span!(
            "campaign.send",
            campaign_id = %ctx.campaign_id,
            template = %message.template_name,
            recipient = %recipient
        );

        async {
            if let Err(err) = self.limiter.acquire(&ctx.from_number).await {
                let err = BackendError::Unavailable(format!("rate limiter: {err}"));
                warn!(error = %err, "failed to acquire send permit");
                record_counter("campaign_messages_failed", 1, &labels);
                return DispatchOutcome::failed(recipient, &err);
            }

            let request = SendRequest::for_recipient(ctx, &recipient, &message);
            debug!(payload = ?request.template, "sending template message");

            let _in_flight = InFlight::enter(in_flight, &labels);
            let started = Instant::now();
            let result = match tokio::time::timeout(
                self.settings.request_timeout,
                self.backend.send(token, &request),
            )
            .await
            {
                Ok(result) => result,
                Err(_) => Err(BackendError::Timeout(self.settings.request_timeout)),
            };
            record_histogram(
                "campaign_send_latency_ms",
                started.elapsed().as_secs_f64() * 1000.0,
                &labels,
            );

            match result {
                Ok(ack) => {
                    record_counter("campaign_messages_sent", 1, &labels);
                    DispatchOutcome::succeeded(recipient, ack.message_id)
                }
                Err(err) => {
                    warn!(error = %err, status = ?err.status(), "send failed");
                    record_counter("campaign_messages_failed", 1, &labels);
                    DispatchOutcome::failed(recipient, &err)
                }
            }
        }
        .instrument(span)
        .await
    }
}

/// Keeps the `campaign_sends_in_flight` gauge in step with a batch's sends,
/// including sends dropped before they finish.
struct InFlight<'a> {
    count: &'a AtomicUsize,
    labels: &'a TelemetryLabels,
}

impl<'a> InFlight<'a> {
    fn enter(count: &'a AtomicUsize, labels: &'a TelemetryLabels) -> Self {
        let now = count.fetch_add(1, Ordering::SeqCst) + 1;
        record_gauge("campaign_sends_in_flight", now as f64, labels);
        Self { count, labels }
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        let now = self.count.fetch_sub(1, Ordering::SeqCst).saturating_sub(1);
        record_gauge("campaign_sends_in_flight", now as f64, self.labels);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failed_outcome_keeps_detail_and_status() {
        let err = BackendError::Rejected {
            status: 429,
            detail: "WhatsApp API error: rate limit hit".into(),
        };
        let outcome = DispatchOutcome::failed("+15550001111", &err);
        assert!(!outcome.success());
        assert_eq!(
            outcome.provider_error(),
            Some("WhatsApp API error: rate limit hit")
        );
        assert_eq!(outcome.status(), Some(429));
        assert_eq!(outcome.error_kind(), Some(ProviderErrorKind::RateLimited));
    }

    #[test]
    fn send_request_targets_one_recipient() {
        let ctx = CampaignContext::new("Spring promo", "+15550000000");
        let message = ComposedMessage {
            template_name: "promo".into(),
            language: crate::compose::TemplateLanguage {
                code: "en_US".into(),
            },
            components: Vec::new(),
        };
        let request = SendRequest::for_recipient(&ctx, "+919876543210", &message);
        let body = serde_json::to_value(&request).unwrap();
        assert_eq!(body["phone_number"], "+919876543210");
        assert_eq!(body["recipients"], serde_json::json!(["+919876543210"]));
        assert_eq!(body["template_name"], "promo");
        assert_eq!(body["template"]["language"]["code"], "en_US");
        assert_eq!(body["campaign_id"], ctx.campaign_id.to_string());
        assert_eq!(body["use_template"], true);
    }

    #[test]
    fn settings_never_allow_zero_in_flight() {
        let cfg = BackendConfig {
            max_in_flight: 0,
            ..BackendConfig::default()
        };
        assert_eq!(DispatchSettings::from(&cfg).max_in_flight, 1);
    }

    #[test]
    fn in_flight_guard_tracks_nested_sends() {
        let count = AtomicUsize::new(0);
        let labels = TelemetryLabels::new("promo");
        let first = InFlight::enter(&count, &labels);
        let second = InFlight::enter(&count, &labels);
        assert_eq!(count.load(Ordering::SeqCst), 2);
        drop(first);
        assert_eq!(count.load(Ordering::SeqCst), 1);
        drop(second);
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }
}
