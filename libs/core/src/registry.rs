use std::collections::BTreeMap;

use async_trait::async_trait;

use crate::error::RegistryError;
use crate::template::{Template, TemplateSummary};

/// Source of approved templates.
///
/// Implementations return templates already normalized into [`Template`]
/// whatever envelope the backend wrapped them in.
#[async_trait]
pub trait TemplateRegistry: Send + Sync {
    /// Approved templates keyed by name.
    async fn list_templates(
        &self,
        token: &str,
    ) -> Result<BTreeMap<String, TemplateSummary>, RegistryError>;

    async fn template_content(
        &self,
        token: &str,
        phone_number_id: &str,
        template_name: &str,
    ) -> Result<Template, RegistryError>;
}

/// Registry over a fixed set of templates, for tests and offline runs.
#[derive(Debug, Clone, Default)]
pub struct StaticTemplates {
    templates: BTreeMap<String, Template>,
}

impl StaticTemplates {
    pub fn new(templates: impl IntoIterator<Item = Template>) -> Self {
        Self {
            templates: templates
                .into_iter()
                .map(|t| (t.name.clone(), t))
                .collect(),
        }
    }
}

#[async_trait]
impl TemplateRegistry for StaticTemplates {
    async fn list_templates(
        &self,
        _token: &str,
    ) -> Result<BTreeMap<String, TemplateSummary>, RegistryError> {
        Ok(self
            .templates
            .values()
            .map(|t| (t.name.clone(), t.summary()))
            .collect())
    }

    async fn template_content(
        &self,
        _token: &str,
        _phone_number_id: &str,
        template_name: &str,
    ) -> Result<Template, RegistryError> {
        self.templates
            .get(template_name)
            .cloned()
            .ok_or_else(|| RegistryError::NotFound(template_name.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::template::{ComponentType, TemplateComponent};

    #[tokio::test]
    async fn static_registry_serves_known_templates() {
        let registry = StaticTemplates::new([Template {
            name: "promo".into(),
            language: "en_US".into(),
            category: None,
            status: Some("APPROVED".into()),
            components: vec![TemplateComponent::text(
                ComponentType::Body,
                "Hi {{1}}, save {{2}}",
            )],
        }]);

        let listing = registry.list_templates("token").await.unwrap();
        assert_eq!(listing["promo"].variables_count, 2);
        assert!(listing["promo"].requires_message);

        let template = registry
            .template_content("token", "123", "promo")
            .await
            .unwrap();
        assert_eq!(template.language, "en_US");

        assert_eq!(
            registry
                .template_content("token", "123", "missing")
                .await
                .unwrap_err(),
            RegistryError::NotFound("missing".into())
        );
    }
}
