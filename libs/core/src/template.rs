//! Template model and the normalization applied at the registry boundary.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::error::RegistryError;

/// Section of a WhatsApp template.
///
/// Parsing is case-insensitive; serialization uses the uppercase provider
/// names.
///
/// ```
/// use wa_campaign_core::ComponentType;
///
/// let kind: ComponentType = "body".parse().unwrap();
/// assert_eq!(kind.as_str(), "BODY");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum ComponentType {
    Header,
    Body,
    Footer,
    Buttons,
}

impl ComponentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ComponentType::Header => "HEADER",
            ComponentType::Body => "BODY",
            ComponentType::Footer => "FOOTER",
            ComponentType::Buttons => "BUTTONS",
        }
    }
}

impl fmt::Display for ComponentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ComponentType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "HEADER" => Ok(ComponentType::Header),
            "BODY" => Ok(ComponentType::Body),
            "FOOTER" => Ok(ComponentType::Footer),
            "BUTTONS" | "BUTTON" => Ok(ComponentType::Buttons),
            other => Err(format!("unknown template component {other:?}")),
        }
    }
}

impl TryFrom<String> for ComponentType {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ComponentType> for String {
    fn from(value: ComponentType) -> Self {
        value.as_str().to_string()
    }
}

/// Media format of a header component.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum HeaderFormat {
    Text,
    Image,
    Video,
    Document,
    Location,
}

impl HeaderFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            HeaderFormat::Text => "TEXT",
            HeaderFormat::Image => "IMAGE",
            HeaderFormat::Video => "VIDEO",
            HeaderFormat::Document => "DOCUMENT",
            HeaderFormat::Location => "LOCATION",
        }
    }
}

impl FromStr for HeaderFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "TEXT" => Ok(HeaderFormat::Text),
            "IMAGE" => Ok(HeaderFormat::Image),
            "VIDEO" => Ok(HeaderFormat::Video),
            "DOCUMENT" => Ok(HeaderFormat::Document),
            "LOCATION" => Ok(HeaderFormat::Location),
            other => Err(format!("unknown header format {other:?}")),
        }
    }
}

impl TryFrom<String> for HeaderFormat {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<HeaderFormat> for String {
    fn from(value: HeaderFormat) -> Self {
        value.as_str().to_string()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum TemplateCategory {
    Marketing,
    Utility,
    Authentication,
}

impl TemplateCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            TemplateCategory::Marketing => "MARKETING",
            TemplateCategory::Utility => "UTILITY",
            TemplateCategory::Authentication => "AUTHENTICATION",
        }
    }
}

impl FromStr for TemplateCategory {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "MARKETING" => Ok(TemplateCategory::Marketing),
            "UTILITY" => Ok(TemplateCategory::Utility),
            "AUTHENTICATION" => Ok(TemplateCategory::Authentication),
            other => Err(format!("unknown template category {other:?}")),
        }
    }
}

impl TryFrom<String> for TemplateCategory {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<TemplateCategory> for String {
    fn from(value: TemplateCategory) -> Self {
        value.as_str().to_string()
    }
}

/// One section of a template as reported by the provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TemplateComponent {
    #[serde(rename = "type")]
    pub kind: ComponentType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<HeaderFormat>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub example: Option<Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub buttons: Vec<Value>,
}

impl TemplateComponent {
    pub fn text(kind: ComponentType, text: impl Into<String>) -> Self {
        Self {
            kind,
            format: (kind == ComponentType::Header).then_some(HeaderFormat::Text),
            text: Some(text.into()),
            example: None,
            buttons: Vec::new(),
        }
    }
}

/// Canonical template shape used by every component downstream of the
/// registry client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Template {
    pub name: String,
    #[serde(deserialize_with = "language_code")]
    pub language: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<TemplateCategory>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(default, deserialize_with = "supported_components")]
    pub components: Vec<TemplateComponent>,
}

impl Template {
    /// First component of the given type, if the template has one.
    pub fn component(&self, kind: ComponentType) -> Option<&TemplateComponent> {
        self.components.iter().find(|c| c.kind == kind)
    }

    /// Format of the header; a header without an explicit format is text.
    pub fn header_format(&self) -> Option<HeaderFormat> {
        self.component(ComponentType::Header)
            .map(|c| c.format.unwrap_or(HeaderFormat::Text))
    }

    /// Listing entry derived from the components. A malformed template
    /// reports zero variables here; composition rejects it later.
    pub fn summary(&self) -> TemplateSummary {
        let variables_count = crate::variables::extract_slots(self)
            .map(|slots| slots.len())
            .unwrap_or(0);
        let parameters = self
            .components
            .iter()
            .filter(|c| c.text.as_deref().is_some_and(|t| t.contains("{{")))
            .map(|c| ParameterPreview {
                kind: c.kind.as_str().to_string(),
                format: c.format.map(|f| f.as_str().to_string()),
                text: c.text.clone(),
                example: c.example.clone(),
            })
            .collect();
        TemplateSummary {
            name: self.name.clone(),
            description: self.category.map(|c| title_case(c.as_str())),
            language: self.language.clone(),
            category: self.category.map(|c| c.as_str().to_string()),
            variables_count,
            requires_message: variables_count > 0,
            parameters,
        }
    }
}

fn title_case(raw: &str) -> String {
    let lower = raw.to_lowercase();
    let mut chars = lower.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum LanguageRepr {
    Code(String),
    Object { code: String },
}

fn language_code<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match LanguageRepr::deserialize(deserializer)? {
        LanguageRepr::Code(code) | LanguageRepr::Object { code } => code,
    })
}

/// Drops sections this pipeline does not bind (carousels, limited-time
/// offers and the like) so the rest of the template still loads.
fn supported_components<'de, D>(deserializer: D) -> Result<Vec<TemplateComponent>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Vec::<Value>::deserialize(deserializer)?;
    let mut components = Vec::with_capacity(raw.len());
    for value in raw {
        if let Some(kind) = value.get("type").and_then(Value::as_str) {
            if kind.parse::<ComponentType>().is_err() {
                tracing::debug!(component = kind, "ignoring unsupported template component");
                continue;
            }
        }
        components.push(serde_json::from_value(value).map_err(serde::de::Error::custom)?);
    }
    Ok(components)
}

/// Preview of one parameterised section, as listed by the templates endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterPreview {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub format: Option<String>,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub example: Option<Value>,
}

/// Entry of `GET /api/v1/whatsapp/templates`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TemplateSummary {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub language: String,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub variables_count: usize,
    #[serde(default, rename = "requiresMessage")]
    pub requires_message: bool,
    #[serde(default)]
    pub parameters: Vec<ParameterPreview>,
}

/// Collapses every known template-content response shape into a [`Template`].
///
/// The backend and the proxy in front of it wrap the template differently:
/// `{"template": {"template": T}}`, `{"success": true, "template": T}` and a
/// bare `T` are all accepted.
///
/// ```
/// use serde_json::json;
/// use wa_campaign_core::normalize_template_content;
///
/// let body = json!({
///     "success": true,
///     "template": {"template": {"name": "promo", "language": "en_US", "components": []}}
/// });
/// let template = normalize_template_content(body).unwrap();
/// assert_eq!(template.name, "promo");
/// ```
pub fn normalize_template_content(body: Value) -> Result<Template, RegistryError> {
    let mut current = body;
    loop {
        let Value::Object(map) = &mut current else {
            return Err(RegistryError::Decode(
                "template content is not a JSON object".into(),
            ));
        };
        if map.contains_key("components") || map.contains_key("name") {
            break;
        }
        match map.remove("template") {
            Some(inner) => current = inner,
            None => {
                let detail = map
                    .get("error")
                    .or_else(|| map.get("detail"))
                    .and_then(Value::as_str)
                    .map(str::to_string);
                return Err(match detail {
                    Some(detail) => RegistryError::Backend {
                        status: 200,
                        detail,
                    },
                    None => RegistryError::Decode("template content missing".into()),
                });
            }
        }
    }
    serde_json::from_value(current).map_err(|err| RegistryError::Decode(err.to_string()))
}
