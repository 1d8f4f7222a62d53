//! Campaign record and the status derived from its outcomes.
//!
//! Counts are always recomputed from the immutable outcome list (and,
//! optionally, the delivery events reported for it); nothing is patched in
//! place.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::dispatch::{CampaignContext, DispatchOutcome};
use crate::recipients::RowError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CampaignStatus {
    /// Nothing has been dispatched yet.
    Pending,
    Completed,
    PartialError,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CampaignStats {
    pub total: usize,
    pub sent_count: usize,
    pub error_count: usize,
    pub skipped_count: usize,
    pub delivered_count: usize,
    pub open_count: usize,
    pub response_count: usize,
    pub status: CampaignStatus,
}

/// Counts successes and failures and derives the campaign status.
///
/// All succeeded gives `completed`, none succeeded gives `failed`, anything
/// in between is `partial_error`. An empty list is still `pending`.
pub fn aggregate(outcomes: &[DispatchOutcome]) -> CampaignStats {
    let sent_count = outcomes.iter().filter(|o| o.success()).count();
    let error_count = outcomes.len() - sent_count;
    let status = match (sent_count, error_count) {
        (0, 0) => CampaignStatus::Pending,
        (_, 0) => CampaignStatus::Completed,
        (0, _) => CampaignStatus::Failed,
        _ => CampaignStatus::PartialError,
    };
    CampaignStats {
        total: outcomes.len(),
        sent_count,
        error_count,
        skipped_count: 0,
        delivered_count: 0,
        open_count: 0,
        response_count: 0,
        status,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryStatus {
    Sent,
    Delivered,
    Read,
    Failed,
    Replied,
}

/// Status update reported by the provider webhook for one message id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryEvent {
    pub message_id: String,
    pub status: DeliveryStatus,
}

#[derive(Default)]
struct Progress {
    delivered: bool,
    read: bool,
    replied: bool,
}

/// [`aggregate`] plus delivery, read and reply counts from webhook events.
///
/// Events for message ids that no successful outcome carries are ignored. A
/// read or a reply implies delivery; a message counts at most once per
/// column however many events arrive, in whatever order.
pub fn aggregate_with_events(
    outcomes: &[DispatchOutcome],
    events: &[DeliveryEvent],
) -> CampaignStats {
    let mut stats = aggregate(outcomes);
    let mut progress: HashMap<&str, Progress> = outcomes
        .iter()
        .filter(|o| o.success())
        .filter_map(|o| o.message_id())
        .map(|id| (id, Progress::default()))
        .collect();

    for event in events {
        let Some(entry) = progress.get_mut(event.message_id.as_str()) else {
            continue;
        };
        match event.status {
            DeliveryStatus::Delivered => entry.delivered = true,
            DeliveryStatus::Read => {
                entry.delivered = true;
                entry.read = true;
            }
            DeliveryStatus::Replied => {
                entry.delivered = true;
                entry.replied = true;
            }
            DeliveryStatus::Sent | DeliveryStatus::Failed => {}
        }
    }

    stats.delivered_count = progress.values().filter(|p| p.delivered).count();
    stats.open_count = progress.values().filter(|p| p.read).count();
    stats.response_count = progress.values().filter(|p| p.replied).count();
    stats
}

/// One logical batch: a template sent to a set of recipients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Campaign {
    pub id: Uuid,
    pub name: String,
    pub template_name: String,
    pub language: String,
    pub from_number: String,
    pub recipients: Vec<String>,
    pub outcomes: Vec<DispatchOutcome>,
    pub skipped: Vec<RowError>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub completed_at: Option<OffsetDateTime>,
}

impl Campaign {
    pub fn new(
        ctx: &CampaignContext,
        template_name: impl Into<String>,
        language: impl Into<String>,
        recipients: Vec<String>,
        skipped: Vec<RowError>,
    ) -> Self {
        Self {
            id: ctx.campaign_id,
            name: ctx.campaign_name.clone(),
            template_name: template_name.into(),
            language: language.into(),
            from_number: ctx.from_number.clone(),
            recipients,
            outcomes: Vec::new(),
            skipped,
            created_at: OffsetDateTime::now_utc(),
            completed_at: None,
        }
    }

    /// Records the outcomes of the dispatch and stamps completion.
    pub fn complete(mut self, outcomes: Vec<DispatchOutcome>) -> Self {
        self.outcomes = outcomes;
        self.completed_at = Some(OffsetDateTime::now_utc());
        self
    }

    pub fn stats(&self) -> CampaignStats {
        self.with_skipped(aggregate(&self.outcomes))
    }

    pub fn stats_with_events(&self, events: &[DeliveryEvent]) -> CampaignStats {
        self.with_skipped(aggregate_with_events(&self.outcomes, events))
    }

    fn with_skipped(&self, mut stats: CampaignStats) -> CampaignStats {
        stats.skipped_count = self.skipped.len();
        stats
    }
}
