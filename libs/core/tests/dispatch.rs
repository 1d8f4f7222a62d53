use std::{
    collections::HashMap,
    sync::{
        Arc, Mutex,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use wa_campaign_backpressure::Unlimited;
use wa_campaign_core::{
    BackendError, CampaignContext, CampaignError, ComposedMessage, DispatchSettings, Dispatcher,
    Envelope, MessageBackend, ProviderErrorKind, RecipientInput, RecipientPlan, SendAck,
    SendRequest, StaticSession, TemplateLanguage, UserPreferences, resolve,
};

/// Backend whose behaviour is scripted per recipient.
#[derive(Default)]
struct ScriptedBackend {
    delays: HashMap<String, Duration>,
    rejects: HashMap<String, BackendError>,
    requests: Mutex<Vec<SendRequest>>,
    tokens: Mutex<Vec<String>>,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
}

impl ScriptedBackend {
    fn delay(mut self, recipient: &str, delay: Duration) -> Self {
        self.delays.insert(recipient.to_string(), delay);
        self
    }

    fn reject(mut self, recipient: &str, err: BackendError) -> Self {
        self.rejects.insert(recipient.to_string(), err);
        self
    }

    fn calls(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

#[async_trait]
impl MessageBackend for ScriptedBackend {
    async fn send(&self, token: &str, request: &SendRequest) -> Result<SendAck, BackendError> {
        self.requests.lock().unwrap().push(request.clone());
        self.tokens.lock().unwrap().push(token.to_string());
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);

        let delay = self
            .delays
            .get(&request.phone_number)
            .copied()
            .unwrap_or(Duration::from_millis(10));
        tokio::time::sleep(delay).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        match self.rejects.get(&request.phone_number) {
            Some(err) => Err(err.clone()),
            None => Ok(SendAck {
                message_id: Some(format!("wamid.{}", request.phone_number)),
                raw: None,
            }),
        }
    }
}

fn message() -> ComposedMessage {
    ComposedMessage {
        template_name: "promo".into(),
        language: TemplateLanguage {
            code: "en_US".into(),
        },
        components: Vec::new(),
    }
}

fn dispatcher(backend: Arc<ScriptedBackend>, session: StaticSession, max_in_flight: usize) -> Dispatcher {
    Dispatcher::new(
        backend,
        Arc::new(session),
        Arc::new(Unlimited),
        DispatchSettings {
            max_in_flight,
            request_timeout: Duration::from_secs(30),
        },
    )
}

fn three_recipients() -> wa_campaign_core::RecipientSet {
    let plan = resolve(
        RecipientInput::Multiple {
            text: "9876543210\n9876543211\n9876543212\n".into(),
        },
        &UserPreferences::default(),
    )
    .unwrap();
    match plan {
        RecipientPlan::Uniform(set) => set,
        RecipientPlan::PerRow(_) => panic!("bulk input resolves uniformly"),
    }
}

#[tokio::test(start_paused = true)]
async fn timeout_fails_only_that_recipient() {
    let backend = Arc::new(
        ScriptedBackend::default().delay("+919876543211", Duration::from_secs(120)),
    );
    let dispatcher = dispatcher(backend.clone(), StaticSession::new("tok"), 4);
    let ctx = CampaignContext::new("April promo", "+15550000000");

    let outcomes = dispatcher
        .dispatch(&ctx, &message(), &three_recipients())
        .await
        .unwrap();

    assert_eq!(outcomes.len(), 3);
    assert!(outcomes[0].success());
    assert!(!outcomes[1].success());
    assert!(outcomes[2].success());
    assert_eq!(outcomes[1].recipient(), "+919876543211");
    assert_eq!(outcomes[1].error_kind(), Some(ProviderErrorKind::Timeout));
    assert_eq!(outcomes[0].message_id(), Some("wamid.+919876543210"));
    assert_eq!(backend.calls(), 3);
}

#[tokio::test(start_paused = true)]
async fn rejection_detail_is_kept_verbatim() {
    let detail = "WhatsApp API error: (#132001) Template name does not exist in the translation";
    let backend = Arc::new(ScriptedBackend::default().reject(
        "+919876543210",
        BackendError::Rejected {
            status: 404,
            detail: detail.into(),
        },
    ));
    let dispatcher = dispatcher(backend, StaticSession::new("tok"), 2);
    let ctx = CampaignContext::new("April promo", "+15550000000");

    let outcomes = dispatcher
        .dispatch(&ctx, &message(), &three_recipients())
        .await
        .unwrap();

    assert_eq!(outcomes[0].provider_error(), Some(detail));
    assert_eq!(outcomes[0].status(), Some(404));
    assert_eq!(
        outcomes[0].error_kind(),
        Some(ProviderErrorKind::TemplateNotFound)
    );
    assert!(outcomes[1].success() && outcomes[2].success());
}

#[tokio::test(start_paused = true)]
async fn every_request_carries_the_same_campaign_id_and_token() {
    let backend = Arc::new(ScriptedBackend::default());
    let dispatcher = dispatcher(backend.clone(), StaticSession::new("tok-1"), 4);
    let ctx = CampaignContext::new("April promo", "+15550000000");

    dispatcher
        .dispatch(&ctx, &message(), &three_recipients())
        .await
        .unwrap();

    let requests = backend.requests.lock().unwrap();
    assert_eq!(requests.len(), 3);
    assert!(requests.iter().all(|r| r.campaign_id == ctx.campaign_id));
    assert!(requests.iter().all(|r| r.from_number == "+15550000000"));
    assert!(requests.iter().all(|r| r.recipients == vec![r.phone_number.clone()]));
    assert!(backend.tokens.lock().unwrap().iter().all(|t| t == "tok-1"));
}

#[tokio::test]
async fn missing_session_never_reaches_the_backend() {
    let backend = Arc::new(ScriptedBackend::default());
    let dispatcher = dispatcher(backend.clone(), StaticSession::anonymous(), 4);
    let ctx = CampaignContext::new("April promo", "+15550000000");

    let err = dispatcher
        .dispatch(&ctx, &message(), &three_recipients())
        .await
        .unwrap_err();

    assert_eq!(err, CampaignError::Unauthorized);
    assert_eq!(backend.calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn concurrency_is_bounded_and_order_is_kept() {
    let recipients: Vec<String> = (0..6).map(|i| format!("+91987654321{i}")).collect();
    let mut backend = ScriptedBackend::default();
    for (i, recipient) in recipients.iter().enumerate() {
        // Earlier recipients finish last.
        backend = backend.delay(recipient, Duration::from_millis(100 * (6 - i as u64)));
    }
    let backend = Arc::new(backend);
    let dispatcher = dispatcher(backend.clone(), StaticSession::new("tok"), 2);
    let ctx = CampaignContext::new("April promo", "+15550000000");

    let envelopes = recipients
        .iter()
        .map(|recipient| Envelope {
            recipient: recipient.clone(),
            message: message(),
        })
        .collect();
    let outcomes = dispatcher.dispatch_each(&ctx, envelopes).await.unwrap();

    let order: Vec<&str> = outcomes.iter().map(|o| o.recipient()).collect();
    assert_eq!(order, recipients.iter().map(String::as_str).collect::<Vec<_>>());
    assert!(backend.peak.load(Ordering::SeqCst) <= 2);
    assert!(outcomes.iter().all(|o| o.success()));
}

#[tokio::test(start_paused = true)]
async fn spawned_batch_finishes_when_the_handle_is_dropped() {
    let backend = Arc::new(
        ScriptedBackend::default().delay("+919876543212", Duration::from_secs(5)),
    );
    let dispatcher = Arc::new(dispatcher(backend.clone(), StaticSession::new("tok"), 4));
    let ctx = CampaignContext::new("April promo", "+15550000000");
    let envelopes = three_recipients()
        .iter()
        .map(|recipient| Envelope {
            recipient: recipient.to_string(),
            message: message(),
        })
        .collect();

    drop(dispatcher.spawn(ctx, envelopes));
    tokio::time::sleep(Duration::from_secs(10)).await;

    assert_eq!(backend.calls(), 3);
    assert_eq!(backend.in_flight.load(Ordering::SeqCst), 0);
}
