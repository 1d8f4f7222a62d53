use std::time::Duration;

/// Default per-request bound on backend calls.
pub const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 30_000;
/// Default number of sends allowed in flight for one campaign.
pub const DEFAULT_MAX_IN_FLIGHT: usize = 4;
pub const DEFAULT_API_URL: &str = "http://127.0.0.1:8000";

/// Where the backend lives and how hard to push it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BackendConfig {
    pub api_base: String,
    pub phone_number_id: String,
    pub request_timeout: Duration,
    pub max_in_flight: usize,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            api_base: DEFAULT_API_URL.to_string(),
            phone_number_id: String::new(),
            request_timeout: Duration::from_millis(DEFAULT_REQUEST_TIMEOUT_MS),
            max_in_flight: DEFAULT_MAX_IN_FLIGHT,
        }
    }
}

impl BackendConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let api_base = non_empty("CAMPAIGN_API_URL")
            .unwrap_or_else(|| DEFAULT_API_URL.to_string())
            .trim_end_matches('/')
            .to_string();
        let phone_number_id = non_empty("CAMPAIGN_PHONE_NUMBER_ID").unwrap_or_default();
        let request_timeout = non_empty("CAMPAIGN_REQUEST_TIMEOUT_MS")
            .and_then(|v| v.trim().parse::<u64>().ok())
            .filter(|ms| *ms > 0)
            .map(Duration::from_millis)
            .unwrap_or(Duration::from_millis(DEFAULT_REQUEST_TIMEOUT_MS));
        let max_in_flight = non_empty("CAMPAIGN_MAX_IN_FLIGHT")
            .and_then(|v| v.trim().parse::<usize>().ok())
            .unwrap_or(DEFAULT_MAX_IN_FLIGHT)
            .max(1);

        Self {
            api_base,
            phone_number_id,
            request_timeout,
            max_in_flight,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_when_unset() {
        assert_eq!(BackendConfig::from_lookup(lookup(&[])), BackendConfig::default());
    }

    #[test]
    fn reads_overrides() {
        let cfg = BackendConfig::from_lookup(lookup(&[
            ("CAMPAIGN_API_URL", "https://api.example.com/"),
            ("CAMPAIGN_PHONE_NUMBER_ID", "602154019636453"),
            ("CAMPAIGN_REQUEST_TIMEOUT_MS", "2500"),
            ("CAMPAIGN_MAX_IN_FLIGHT", "0"),
        ]));
        assert_eq!(cfg.api_base, "https://api.example.com");
        assert_eq!(cfg.phone_number_id, "602154019636453");
        assert_eq!(cfg.request_timeout, Duration::from_millis(2500));
        assert_eq!(cfg.max_in_flight, 1);
    }

    #[test]
    fn ignores_unparseable_numbers() {
        let cfg = BackendConfig::from_lookup(lookup(&[
            ("CAMPAIGN_REQUEST_TIMEOUT_MS", "soon"),
            ("CAMPAIGN_MAX_IN_FLIGHT", "many"),
        ]));
        assert_eq!(cfg.request_timeout, Duration::from_millis(DEFAULT_REQUEST_TIMEOUT_MS));
        assert_eq!(cfg.max_in_flight, DEFAULT_MAX_IN_FLIGHT);
    }
}
