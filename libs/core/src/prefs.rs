use serde::{Deserialize, Serialize};

use crate::error::CampaignError;

pub const DEFAULT_COUNTRY_CODE: &str = "91";

/// Operator preferences carried from the calling shell into recipient
/// resolution and dispatch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawPreferences")]
pub struct UserPreferences {
    country_code: String,
    from_number: Option<String>,
}

#[derive(Deserialize)]
struct RawPreferences {
    country_code: String,
    #[serde(default)]
    from_number: Option<String>,
}

impl TryFrom<RawPreferences> for UserPreferences {
    type Error = CampaignError;

    fn try_from(raw: RawPreferences) -> Result<Self, Self::Error> {
        let prefs = UserPreferences::new(&raw.country_code)?;
        Ok(match raw.from_number {
            Some(from_number) => prefs.with_from_number(from_number),
            None => prefs,
        })
    }
}

impl UserPreferences {
    /// Builds preferences for `country_code`, given with or without `+`.
    pub fn new(country_code: &str) -> Result<Self, CampaignError> {
        Ok(Self {
            country_code: normalize_country_code(country_code)?,
            from_number: None,
        })
    }

    pub fn with_from_number(mut self, from_number: impl Into<String>) -> Self {
        let from_number = from_number.into();
        self.from_number = (!from_number.trim().is_empty()).then(|| from_number.trim().to_string());
        self
    }

    /// Active country code as digits, without the leading `+`.
    pub fn country_code(&self) -> &str {
        &self.country_code
    }

    pub fn from_number(&self) -> Option<&str> {
        self.from_number.as_deref()
    }
}

impl Default for UserPreferences {
    fn default() -> Self {
        Self {
            country_code: DEFAULT_COUNTRY_CODE.to_string(),
            from_number: None,
        }
    }
}

/// Validates a 1–3 digit calling code and strips an optional leading `+`.
///
/// ```
/// use wa_campaign_core::normalize_country_code;
///
/// assert_eq!(normalize_country_code("+44").unwrap(), "44");
/// assert!(normalize_country_code("1234").is_err());
/// ```
pub fn normalize_country_code(raw: &str) -> Result<String, CampaignError> {
    let trimmed = raw.trim();
    let digits = trimmed.strip_prefix('+').unwrap_or(trimmed);
    let valid = (1..=3).contains(&digits.len()) && digits.chars().all(|c| c.is_ascii_digit());
    if valid {
        Ok(digits.to_string())
    } else {
        Err(CampaignError::InvalidCountryCode(raw.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_to_india() {
        assert_eq!(UserPreferences::default().country_code(), "91");
    }

    #[test]
    fn rejects_non_numeric_codes() {
        assert_eq!(
            UserPreferences::new("+4a"),
            Err(CampaignError::InvalidCountryCode("+4a".into()))
        );
        assert!(UserPreferences::new("").is_err());
        assert!(UserPreferences::new("+").is_err());
    }

    #[test]
    fn blank_from_number_is_unset() {
        let prefs = UserPreferences::new("1").unwrap().with_from_number("  ");
        assert_eq!(prefs.from_number(), None);
        let prefs = prefs.with_from_number(" 15550001111 ");
        assert_eq!(prefs.from_number(), Some("15550001111"));
    }

    #[test]
    fn deserialization_validates_country_code() {
        let err = serde_json::from_str::<UserPreferences>(r#"{"country_code":"abc"}"#).unwrap_err();
        assert!(err.to_string().contains("abc"));

        let prefs: UserPreferences =
            serde_json::from_str(r#"{"country_code":"+44","from_number":" +15550001111 "}"#)
                .unwrap();
        assert_eq!(prefs.country_code(), "44");
        assert_eq!(prefs.from_number(), Some("+15550001111"));

        let json = serde_json::to_string(&prefs).unwrap();
        assert_eq!(serde_json::from_str::<UserPreferences>(&json).unwrap(), prefs);
    }
}
