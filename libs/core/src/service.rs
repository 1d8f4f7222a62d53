use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{Instrument, info, warn};
use uuid::Uuid;
use wa_campaign_telemetry::{TelemetryLabels, record_counter};

use crate::campaign::Campaign;
use crate::compose::{compose, split_values};
use crate::dispatch::{CampaignContext, Dispatcher, Envelope};
use crate::error::CampaignError;
use crate::prefs::UserPreferences;
use crate::recipients::{RecipientInput, RecipientPlan, RowError, resolve};
use crate::registry::TemplateRegistry;
use crate::session::SessionProvider;
use crate::store::{CampaignStore, InMemoryCampaigns};
use crate::template::{Template, TemplateSummary};
use crate::variables::extract_slots;

/// What the operator submitted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CampaignRequest {
    /// Falls back to `Campaign <template>` when blank.
    #[serde(default)]
    pub name: String,
    pub template_name: String,
    pub recipients: RecipientInput,
    /// `;`-delimited values for single and bulk modes. Ignored in file mode.
    #[serde(default)]
    pub values: String,
}

/// A campaign that passed validation and is ready to dispatch.
#[derive(Debug, Clone)]
pub struct PreparedCampaign {
    pub context: CampaignContext,
    pub template: Template,
    pub envelopes: Vec<Envelope>,
    pub skipped: Vec<RowError>,
}

impl PreparedCampaign {
    pub fn recipients(&self) -> Vec<String> {
        self.envelopes.iter().map(|e| e.recipient.clone()).collect()
    }
}

/// Runs the whole pipeline: template fetch, slot extraction, recipient
/// resolution, composition and dispatch.
pub struct CampaignService {
    registry: Arc<dyn TemplateRegistry>,
    dispatcher: Arc<Dispatcher>,
    session: Arc<dyn SessionProvider>,
    store: Arc<dyn CampaignStore>,
    phone_number_id: String,
}

impl CampaignService {
    pub fn new(
        registry: Arc<dyn TemplateRegistry>,
        dispatcher: Arc<Dispatcher>,
        session: Arc<dyn SessionProvider>,
        phone_number_id: impl Into<String>,
    ) -> Self {
        Self {
            registry,
            dispatcher,
            session,
            store: Arc::new(InMemoryCampaigns::new()),
            phone_number_id: phone_number_id.into(),
        }
    }

    /// Replaces the default in-memory campaign store.
    pub fn with_store(mut self, store: Arc<dyn CampaignStore>) -> Self {
        self.store = store;
        self
    }

    fn token(&self) -> Result<String, CampaignError> {
        self.session
            .access_token()
            .ok_or(CampaignError::Unauthorized)
    }

    pub async fn templates(&self) -> Result<BTreeMap<String, TemplateSummary>, CampaignError> {
        let token = self.token()?;
        Ok(self.registry.list_templates(&token).await?)
    }

    pub async fn template(&self, template_name: &str) -> Result<Template, CampaignError> {
        let token = self.token()?;
        Ok(self
            .registry
            .template_content(&token, &self.phone_number_id, template_name)
            .await?)
    }

    /// Validates `request` and composes one envelope per recipient. Nothing
    /// is sent.
    ///
    /// In file mode a row whose values break a composition rule is skipped
    /// and reported like a row with a missing cell.
    pub async fn prepare(
        &self,
        request: CampaignRequest,
        prefs: &UserPreferences,
    ) -> Result<PreparedCampaign, CampaignError> {
        let template = self.template(&request.template_name).await?;
        let from_number = prefs.from_number().ok_or(CampaignError::MissingSender)?;
        let slots = extract_slots(&template)?;

        let (envelopes, skipped) = match resolve(request.recipients, prefs)? {
            RecipientPlan::Uniform(recipients) => {
                let message = compose(&template, &slots, &split_values(&request.values))?;
                let envelopes = recipients
                    .iter()
                    .map(|recipient| Envelope {
                        recipient: recipient.to_string(),
                        message: message.clone(),
                    })
                    .collect::<Vec<_>>();
                (envelopes, Vec::new())
            }
            RecipientPlan::PerRow(binding) => {
                let rows = binding.bind(&slots)?;
                let mut skipped = rows.skipped;
                let mut envelopes = Vec::with_capacity(rows.bound.len());
                for row in rows.bound {
                    match compose(&template, &slots, &row.values) {
                        Ok(message) => envelopes.push(Envelope {
                            recipient: row.recipient,
                            message,
                        }),
                        Err(err) => skipped.push(RowError {
                            row: row.row,
                            reason: err.to_string(),
                        }),
                    }
                }
                skipped.sort_by_key(|e| e.row);
                if envelopes.is_empty() {
                    return Err(if skipped.is_empty() {
                        CampaignError::NoRecipients
                    } else {
                        CampaignError::AllRowsRejected(skipped)
                    });
                }
                (envelopes, skipped)
            }
        };

        if !skipped.is_empty() {
            warn!(
                template = %template.name,
                skipped = skipped.len(),
                "rows skipped before dispatch"
            );
            record_counter(
                "campaign_rows_skipped",
                skipped.len() as u64,
                &TelemetryLabels::new(template.name.clone()),
            );
        }

        let name = match request.name.trim() {
            "" => format!("Campaign {}", template.name),
            name => name.to_string(),
        };
        Ok(PreparedCampaign {
            context: CampaignContext::new(name, from_number),
            template,
            envelopes,
            skipped,
        })
    }

    /// Dispatches a prepared campaign.
    ///
    /// The record is persisted as pending before the first send and
    /// replaced with the completed record by the dispatch task. Dropping
    /// this future neither cancels in-flight sends nor loses the record:
    /// it stays readable through [`CampaignService::campaign`] under
    /// `prepared.context.campaign_id`.
    pub async fn run(&self, prepared: PreparedCampaign) -> Result<Campaign, CampaignError> {
        let PreparedCampaign {
            context,
            template,
            envelopes,
            skipped,
        } = prepared;
        let campaign = Campaign::new(
            &context,
            template.name.clone(),
            template.language.clone(),
            envelopes.iter().map(|e| e.recipient.clone()).collect(),
            skipped,
        );
        self.store.persist(campaign.clone());

        let dispatcher = Arc::clone(&self.dispatcher);
        let store = Arc::clone(&self.store);
        let task = async move {
            let outcomes = dispatcher.dispatch_each(&context, envelopes).await?;
            let campaign = campaign.complete(outcomes);
            store.persist(campaign.clone());

            let stats = campaign.stats();
            info!(
                campaign_id = %campaign.id,
                status = ?stats.status,
                sent = stats.sent_count,
                errors = stats.error_count,
                skipped = stats.skipped_count,
                "campaign finished"
            );
            Ok::<_, CampaignError>(campaign)
        };

        tokio::spawn(task.in_current_span())
            .await
            .map_err(|err| CampaignError::DispatchAborted(err.to_string()))?
    }

    /// Last persisted record for `id`: pending while the batch is in flight,
    /// completed once every outcome is in.
    pub fn campaign(&self, id: &Uuid) -> Option<Campaign> {
        self.store.lookup(id)
    }

    pub async fn launch(
        &self,
        request: CampaignRequest,
        prefs: &UserPreferences,
    ) -> Result<Campaign, CampaignError> {
        let prepared = self.prepare(request, prefs).await?;
        self.run(prepared).await
    }
}
