use dashmap::DashMap;
use uuid::Uuid;

use crate::campaign::Campaign;

/// Where campaign records are kept once dispatch starts.
///
/// The record is written from the dispatch task itself, so it survives a
/// caller that stopped waiting.
pub trait CampaignStore: Send + Sync {
    fn lookup(&self, id: &Uuid) -> Option<Campaign>;
    fn persist(&self, campaign: Campaign);
}

#[derive(Default)]
pub struct InMemoryCampaigns {
    inner: DashMap<Uuid, Campaign>,
}

impl InMemoryCampaigns {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

impl CampaignStore for InMemoryCampaigns {
    fn lookup(&self, id: &Uuid) -> Option<Campaign> {
        self.inner.get(id).map(|entry| entry.clone())
    }

    fn persist(&self, campaign: Campaign) {
        self.inner.insert(campaign.id, campaign);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::{CampaignContext, DispatchOutcome};

    #[test]
    fn persist_replaces_the_pending_record() {
        let store = InMemoryCampaigns::new();
        let ctx = CampaignContext::new("April", "+15550000000");
        let pending = Campaign::new(
            &ctx,
            "promo",
            "en_US",
            vec!["+919876543210".into()],
            Vec::new(),
        );
        store.persist(pending.clone());
        assert!(store.lookup(&ctx.campaign_id).unwrap().completed_at.is_none());

        store.persist(pending.complete(vec![DispatchOutcome::succeeded(
            "+919876543210",
            None,
        )]));
        let stored = store.lookup(&ctx.campaign_id).unwrap();
        assert_eq!(store.len(), 1);
        assert!(stored.completed_at.is_some());
        assert_eq!(stored.stats().sent_count, 1);
        assert!(store.lookup(&Uuid::new_v4()).is_none());
    }
}
