use std::collections::BTreeSet;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::CampaignError;
use crate::template::{ComponentType, HeaderFormat, Template};

static PLACEHOLDER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\{\{(\d+)\}\}").expect("placeholder pattern compiles"));

/// Positional substitution point `{{index}}` inside one template component.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VariableSlot {
    pub index: usize,
    pub component: ComponentType,
}

/// Extracts the distinct placeholders of `text`, sorted by index.
///
/// Indices must run from `{{1}}` without gaps; repeated occurrences of the
/// same index bind the same slot.
///
/// ```
/// use wa_campaign_core::{extract_placeholders, ComponentType};
///
/// let slots = extract_placeholders("Hi {{1}}, see you {{2}}. Bye {{1}}", ComponentType::Body).unwrap();
/// assert_eq!(slots.iter().map(|s| s.index).collect::<Vec<_>>(), vec![1, 2]);
/// ```
pub fn extract_placeholders(
    text: &str,
    component: ComponentType,
) -> Result<Vec<VariableSlot>, CampaignError> {
    let mut indices = BTreeSet::new();
    for caps in PLACEHOLDER.captures_iter(text) {
        let raw = &caps[1];
        let index: usize = raw
            .parse()
            .map_err(|_| malformed(component, format!("{} is out of range", placeholder(raw))))?;
        if index == 0 {
            return Err(malformed(
                component,
                format!("{} is not allowed, indices start at {}", placeholder(0), placeholder(1)),
            ));
        }
        indices.insert(index);
    }

    for (expected, index) in (1..).zip(indices.iter()) {
        if *index != expected {
            return Err(malformed(
                component,
                format!(
                    "{} is used but {} is missing",
                    placeholder(index),
                    placeholder(expected)
                ),
            ));
        }
    }

    Ok(indices
        .into_iter()
        .map(|index| VariableSlot { index, component })
        .collect())
}

/// Slots of a whole template: text-header slots first, then body slots.
///
/// The 1-based position of a slot in the returned list is the variable number
/// operators refer to when binding values or mapping file columns.
pub fn extract_slots(template: &Template) -> Result<Vec<VariableSlot>, CampaignError> {
    let mut slots = Vec::new();
    if let Some(header) = template.component(ComponentType::Header) {
        let is_text = header.format.unwrap_or(HeaderFormat::Text) == HeaderFormat::Text;
        if let (true, Some(text)) = (is_text, header.text.as_deref()) {
            slots.extend(extract_placeholders(text, ComponentType::Header)?);
        }
    }
    if let Some(body) = template.component(ComponentType::Body) {
        if let Some(text) = body.text.as_deref() {
            slots.extend(extract_placeholders(text, ComponentType::Body)?);
        }
    }
    Ok(slots)
}

fn placeholder(index: impl std::fmt::Display) -> String {
    format!("{{{{{index}}}}}")
}

fn malformed(component: ComponentType, reason: String) -> CampaignError {
    CampaignError::TemplateMalformed { component, reason }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::template::TemplateComponent;

    fn template(components: Vec<TemplateComponent>) -> Template {
        Template {
            name: "t".into(),
            language: "en".into(),
            category: None,
            status: None,
            components,
        }
    }

    #[test]
    fn contiguous_placeholders_yield_ordered_slots() {
        for n in 1..=6 {
            let body: String = (1..=n).rev().map(|i| format!("v{{{{{i}}}}} ")).collect();
            let slots = extract_placeholders(&body, ComponentType::Body).unwrap();
            assert_eq!(slots.len(), n);
            assert!(slots.windows(2).all(|w| w[0].index < w[1].index));
            assert_eq!(slots[0].index, 1);
        }
    }

    #[test]
    fn gap_is_malformed() {
        let err = extract_placeholders("{{1}}{{3}}", ComponentType::Body).unwrap_err();
        assert_eq!(
            err,
            CampaignError::TemplateMalformed {
                component: ComponentType::Body,
                reason: "{{3}} is used but {{2}} is missing".into()
            }
        );
    }

    #[test]
    fn zero_index_is_malformed() {
        assert!(matches!(
            extract_placeholders("{{0}}", ComponentType::Header),
            Err(CampaignError::TemplateMalformed { component: ComponentType::Header, .. })
        ));
    }

    #[test]
    fn no_placeholders_means_no_slots() {
        assert!(
            extract_placeholders("Thanks for shopping with us!", ComponentType::Body)
                .unwrap()
                .is_empty()
        );
        assert!(extract_placeholders("{{ 1 }} {{x}}", ComponentType::Body)
            .unwrap()
            .is_empty());
    }

    #[test]
    fn header_slots_precede_body_slots() {
        let t = template(vec![
            TemplateComponent::text(ComponentType::Body, "Hi {{1}}, code {{2}}"),
            TemplateComponent::text(ComponentType::Header, "Order {{1}}"),
            TemplateComponent::text(ComponentType::Footer, "{{9}} ignored"),
        ]);
        let slots = extract_slots(&t).unwrap();
        assert_eq!(
            slots,
            vec![
                VariableSlot { index: 1, component: ComponentType::Header },
                VariableSlot { index: 1, component: ComponentType::Body },
                VariableSlot { index: 2, component: ComponentType::Body },
            ]
        );
    }

    #[test]
    fn media_header_contributes_no_slots() {
        let mut header = TemplateComponent::text(ComponentType::Header, "{{1}}");
        header.format = Some(HeaderFormat::Image);
        let t = template(vec![header, TemplateComponent::text(ComponentType::Body, "Hello")]);
        assert!(extract_slots(&t).unwrap().is_empty());
    }
}
