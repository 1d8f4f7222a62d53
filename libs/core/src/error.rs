use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::recipients::RowError;
use crate::template::ComponentType;

/// Failures that stop a campaign before any message leaves the process.
///
/// Everything except [`CampaignError::Unauthorized`] and
/// [`CampaignError::Registry`] is an input problem the operator can fix and
/// resubmit.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CampaignError {
    #[error("template malformed in {component}: {reason}")]
    TemplateMalformed {
        component: ComponentType,
        reason: String,
    },
    #[error("template requires exactly {expected} value(s), {provided} provided")]
    VariableArityMismatch { expected: usize, provided: usize },
    #[error("header text is {length} characters, the limit is {max}")]
    HeaderTooLong { length: usize, max: usize },
    #[error("invalid phone number {input:?}: {reason}")]
    InvalidPhoneNumber { input: String, reason: String },
    #[error("invalid country code {0:?}: expected 1-3 digits")]
    InvalidCountryCode(String),
    #[error("no recipients to send to")]
    NoRecipients,
    #[error("every uploaded row was rejected ({} row(s))", .0.len())]
    AllRowsRejected(Vec<RowError>),
    #[error("column mapping does not cover variable(s) {missing:?}")]
    IncompleteColumnMapping { missing: Vec<usize> },
    #[error("column {0:?} is not present in the uploaded file")]
    UnknownColumn(String),
    #[error("variable {0} is mapped to more than one column")]
    DuplicateColumnMapping(usize),
    #[error("no sending number selected")]
    MissingSender,
    #[error("not authenticated")]
    Unauthorized,
    #[error(transparent)]
    Registry(#[from] RegistryError),
    #[error("dispatch task aborted: {0}")]
    DispatchAborted(String),
}

impl CampaignError {
    /// Returns true for errors caused by operator input rather than the
    /// template data, the session or the backend.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            CampaignError::VariableArityMismatch { .. }
                | CampaignError::HeaderTooLong { .. }
                | CampaignError::InvalidPhoneNumber { .. }
                | CampaignError::InvalidCountryCode(_)
                | CampaignError::NoRecipients
                | CampaignError::AllRowsRejected(_)
                | CampaignError::IncompleteColumnMapping { .. }
                | CampaignError::UnknownColumn(_)
                | CampaignError::DuplicateColumnMapping(_)
                | CampaignError::MissingSender
        )
    }
}

/// Errors from the template registry endpoints.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("template {0:?} not found")]
    NotFound(String),
    #[error("registry unavailable: {0}")]
    Unavailable(String),
    #[error("registry returned {status}: {detail}")]
    Backend { status: u16, detail: String },
    #[error("unexpected template payload: {0}")]
    Decode(String),
}

/// Per-recipient failure of a single send call.
///
/// `Rejected` displays the backend detail verbatim so operators see exactly
/// what the provider said.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BackendError {
    #[error("backend request timed out after {}ms", .0.as_millis())]
    Timeout(Duration),
    #[error("backend unavailable: {0}")]
    Unavailable(String),
    #[error("{detail}")]
    Rejected { status: u16, detail: String },
}

impl BackendError {
    pub fn status(&self) -> Option<u16> {
        match self {
            BackendError::Rejected { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// Coarse classification of a provider failure for display purposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderErrorKind {
    TemplateNotFound,
    RateLimited,
    Unauthorized,
    ProviderApi,
    Timeout,
    Unavailable,
    Other,
}

impl ProviderErrorKind {
    /// Classifies a failure from its HTTP status and verbatim detail.
    ///
    /// ```
    /// use wa_campaign_core::ProviderErrorKind;
    ///
    /// let kind = ProviderErrorKind::classify(Some(404), "Template 'promo' not found in language 'en'");
    /// assert_eq!(kind, ProviderErrorKind::TemplateNotFound);
    /// ```
    pub fn classify(status: Option<u16>, detail: &str) -> Self {
        let lowered = detail.to_ascii_lowercase();
        if matches!(status, Some(401 | 403)) {
            return ProviderErrorKind::Unauthorized;
        }
        if status == Some(429) || lowered.contains("rate limit") {
            return ProviderErrorKind::RateLimited;
        }
        if lowered.contains("template")
            && (lowered.contains("not found") || lowered.contains("does not exist"))
        {
            return ProviderErrorKind::TemplateNotFound;
        }
        if lowered.contains("timed out") {
            return ProviderErrorKind::Timeout;
        }
        if lowered.contains("backend unavailable") {
            return ProviderErrorKind::Unavailable;
        }
        if lowered.contains("whatsapp api error") {
            return ProviderErrorKind::ProviderApi;
        }
        ProviderErrorKind::Other
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejected_displays_detail_verbatim() {
        let err = BackendError::Rejected {
            status: 400,
            detail: "WhatsApp API error: (#132001) Template name does not exist".into(),
        };
        assert_eq!(
            err.to_string(),
            "WhatsApp API error: (#132001) Template name does not exist"
        );
        assert_eq!(err.status(), Some(400));
    }

    #[test]
    fn classifies_common_provider_failures() {
        assert_eq!(
            ProviderErrorKind::classify(Some(429), "slow down"),
            ProviderErrorKind::RateLimited
        );
        assert_eq!(
            ProviderErrorKind::classify(Some(401), "Not authenticated"),
            ProviderErrorKind::Unauthorized
        );
        assert_eq!(
            ProviderErrorKind::classify(Some(500), "WhatsApp API error: (#131047) Re-engagement"),
            ProviderErrorKind::ProviderApi
        );
        assert_eq!(
            ProviderErrorKind::classify(
                None,
                &BackendError::Timeout(Duration::from_secs(30)).to_string()
            ),
            ProviderErrorKind::Timeout
        );
        assert_eq!(
            ProviderErrorKind::classify(Some(500), "boom"),
            ProviderErrorKind::Other
        );
    }

    #[test]
    fn validation_errors_are_flagged() {
        assert!(CampaignError::NoRecipients.is_validation());
        assert!(
            CampaignError::VariableArityMismatch {
                expected: 2,
                provided: 1
            }
            .is_validation()
        );
        assert!(!CampaignError::Unauthorized.is_validation());
        assert!(
            !CampaignError::TemplateMalformed {
                component: ComponentType::Body,
                reason: "gap".into()
            }
            .is_validation()
        );
    }
}
