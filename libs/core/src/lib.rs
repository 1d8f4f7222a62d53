//! WhatsApp campaign pipeline.
//!
//! Fetches a template from the messaging backend, extracts its positional
//! variable slots, resolves recipients from one of three input modes, binds
//! operator values into the provider's `components` payload and dispatches
//! one send per recipient. Outcomes are aggregated into campaign stats that
//! are recomputed on every read.
pub mod campaign;
pub mod client;
pub mod compose;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod prefs;
pub mod recipients;
pub mod registry;
pub mod service;
pub mod session;
pub mod store;
pub mod template;
pub mod variables;

pub use campaign::{
    Campaign, CampaignStats, CampaignStatus, DeliveryEvent, DeliveryStatus, aggregate,
    aggregate_with_events,
};
pub use client::HttpBackend;
pub use compose::{
    ComponentParameters, ComposedMessage, HEADER_TEXT_LIMIT, ParameterKind, TemplateLanguage,
    TextParameter, VALUE_DELIMITER, compose, split_values,
};
pub use config::BackendConfig;
pub use dispatch::{
    CampaignContext, DispatchOutcome, DispatchSettings, Dispatcher, Envelope, MessageBackend,
    SendAck, SendRequest,
};
pub use error::{BackendError, CampaignError, ProviderErrorKind, RegistryError};
pub use prefs::{DEFAULT_COUNTRY_CODE, UserPreferences, normalize_country_code};
pub use recipients::{
    BoundRow, ColumnMapping, FileBinding, FileMapping, FileRows, FileTable, RecipientInput,
    RecipientPlan, RecipientSet, RowError, resolve,
};
pub use registry::{StaticTemplates, TemplateRegistry};
pub use service::{CampaignRequest, CampaignService, PreparedCampaign};
pub use session::{SessionProvider, StaticSession};
pub use store::{CampaignStore, InMemoryCampaigns};
pub use template::{
    ComponentType, HeaderFormat, ParameterPreview, Template, TemplateCategory, TemplateComponent,
    TemplateSummary, normalize_template_content,
};
pub use variables::{VariableSlot, extract_placeholders, extract_slots};
