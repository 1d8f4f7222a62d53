use serde::{Deserialize, Serialize};

use crate::error::CampaignError;
use crate::template::{ComponentType, HeaderFormat, Template};
use crate::variables::VariableSlot;

/// Longest value a text header accepts.
pub const HEADER_TEXT_LIMIT: usize = 60;
/// Separator between values when all of them arrive in one string.
pub const VALUE_DELIMITER: char = ';';

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParameterKind {
    Text,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextParameter {
    #[serde(rename = "type")]
    pub kind: ParameterKind,
    pub text: String,
}

impl TextParameter {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            kind: ParameterKind::Text,
            text: text.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComponentParameters {
    #[serde(rename = "type")]
    pub kind: ComponentType,
    pub parameters: Vec<TextParameter>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TemplateLanguage {
    pub code: String,
}

/// Provider-shaped template object: `{name, language: {code}, components}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComposedMessage {
    #[serde(rename = "name")]
    pub template_name: String,
    pub language: TemplateLanguage,
    pub components: Vec<ComponentParameters>,
}

impl ComposedMessage {
    pub fn language_code(&self) -> &str {
        &self.language.code
    }
}

/// Splits the operator's value string on `;`, trimming each value.
///
/// A blank string carries no values. A trailing delimiter produces an extra
/// empty value, which later fails the arity check.
///
/// ```
/// use wa_campaign_core::split_values;
///
/// assert_eq!(split_values(" Ana ; 25% "), vec!["Ana", "25%"]);
/// assert!(split_values("   ").is_empty());
/// assert_eq!(split_values("Ana;").len(), 2);
/// ```
pub fn split_values(raw: &str) -> Vec<String> {
    if raw.trim().is_empty() {
        return Vec::new();
    }
    raw.split(VALUE_DELIMITER)
        .map(|v| v.trim().to_string())
        .collect()
}

/// Binds `values` to `slots` and builds the provider payload for `template`.
///
/// Values are positional: the n-th value fills the n-th slot. Parameters are
/// grouped by component in order of first appearance.
pub fn compose<S: AsRef<str>>(
    template: &Template,
    slots: &[VariableSlot],
    values: &[S],
) -> Result<ComposedMessage, CampaignError> {
    if values.len() != slots.len() {
        return Err(CampaignError::VariableArityMismatch {
            expected: slots.len(),
            provided: values.len(),
        });
    }

    let text_header = template.header_format() == Some(HeaderFormat::Text);
    let mut components: Vec<ComponentParameters> = Vec::new();
    for (slot, value) in slots.iter().zip(values) {
        let value = value.as_ref();
        if slot.component == ComponentType::Header && text_header {
            let length = value.chars().count();
            if length > HEADER_TEXT_LIMIT {
                return Err(CampaignError::HeaderTooLong {
                    length,
                    max: HEADER_TEXT_LIMIT,
                });
            }
        }
        let parameter = TextParameter::new(value);
        match components.iter_mut().find(|c| c.kind == slot.component) {
            Some(group) => group.parameters.push(parameter),
            None => components.push(ComponentParameters {
                kind: slot.component,
                parameters: vec![parameter],
            }),
        }
    }

    Ok(ComposedMessage {
        template_name: template.name.clone(),
        language: TemplateLanguage {
            code: template.language.clone(),
        },
        components,
    })
}
