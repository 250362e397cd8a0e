/// Opaque access check in front of the desk. Billing lives elsewhere.
#[async_trait::async_trait]
pub trait EntitlementGate: Send + Sync {
    async fn is_entitled(&self, user_id: &str) -> anyhow::Result<bool>;
}

/// Admits every user.
#[derive(Debug, Clone, Copy, Default)]
pub struct OpenAccess;

#[async_trait::async_trait]
impl EntitlementGate for OpenAccess {
    async fn is_entitled(&self, _user_id: &str) -> anyhow::Result<bool> {
        Ok(true)
    }
}

/// Admits only the listed users.
#[derive(Debug, Clone, Default)]
pub struct AllowList {
    users: std::collections::HashSet<String>,
}

impl AllowList {
    pub fn new<I, S>(users: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            users: users.into_iter().map(Into::into).collect(),
        }
    }
}

#[async_trait::async_trait]
impl EntitlementGate for AllowList {
    async fn is_entitled(&self, user_id: &str) -> anyhow::Result<bool> {
        Ok(self.users.contains(user_id))
    }
}
