/// Labels attached to every campaign metric.
#[derive(Debug, Clone)]
pub struct TelemetryLabels {
    pub template: String,
    pub campaign_id: Option<String>,
    pub extra: Vec<(String, String)>,
}

impl TelemetryLabels {
    pub fn new(template: impl Into<String>) -> Self {
        Self {
            template: template.into(),
            campaign_id: None,
            extra: Vec::new(),
        }
    }

    pub fn with_campaign(mut self, campaign_id: impl Into<String>) -> Self {
        self.campaign_id = Some(campaign_id.into());
        self
    }

    pub fn tags(&self) -> Vec<(String, String)> {
        let mut tags = Vec::with_capacity(2 + self.extra.len());
        tags.push(("template".into(), self.template.clone()));
        if let Some(campaign) = &self.campaign_id {
            tags.push(("campaign_id".into(), campaign.clone()));
        }
        for (key, value) in &self.extra {
            tags.push((key.clone(), value.clone()));
        }
        tags
    }
}
