/// Source of the bearer token attached to every backend call.
///
/// `None` means there is no valid session; callers abort with
/// [`crate::CampaignError::Unauthorized`] before touching the network.
pub trait SessionProvider: Send + Sync {
    fn access_token(&self) -> Option<String>;
}

/// Session with a token fixed at construction, e.g. read from the environment.
#[derive(Clone, Default)]
pub struct StaticSession {
    token: Option<String>,
}

impl StaticSession {
    pub fn new(token: impl Into<String>) -> Self {
        let token = token.into();
        Self {
            token: (!token.trim().is_empty()).then_some(token),
        }
    }

    pub fn anonymous() -> Self {
        Self { token: None }
    }
}

impl std::fmt::Debug for StaticSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StaticSession")
            .field("authenticated", &self.token.is_some())
            .finish()
    }
}

impl SessionProvider for StaticSession {
    fn access_token(&self) -> Option<String> {
        self.token.clone()
    }
}
