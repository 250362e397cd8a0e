pub mod desk;
pub mod domain;
pub mod entitlement;
pub mod ingest;
pub mod ledger;
pub mod scoring;
pub mod storage;
pub mod time;

pub mod config {
    use anyhow::Context;

    #[derive(Debug, Clone, Default)]
    pub struct Settings {
        pub database_url: Option<String>,
        pub sentry_dsn: Option<String>,
        pub data_provider_base_url: Option<String>,
        pub data_provider_api_key: Option<String>,
        /// Comma-separated user ids admitted by the API. Unset admits everyone.
        pub allowed_users: Option<String>,
    }

    impl Settings {
        pub fn from_env() -> anyhow::Result<Self> {
            Ok(Self {
                database_url: non_empty_var("DATABASE_URL"),
                sentry_dsn: non_empty_var("SENTRY_DSN"),
                data_provider_base_url: non_empty_var("DATA_PROVIDER_BASE_URL"),
                data_provider_api_key: non_empty_var("DATA_PROVIDER_API_KEY"),
                allowed_users: non_empty_var("ALLOWED_USERS"),
            })
        }

        pub fn require_database_url(&self) -> anyhow::Result<&str> {
            self.database_url
                .as_deref()
                .context("DATABASE_URL is required")
        }

        pub fn require_data_provider_base_url(&self) -> anyhow::Result<&str> {
            self.data_provider_base_url
                .as_deref()
                .context("DATA_PROVIDER_BASE_URL is required")
        }

        pub fn allowed_users(&self) -> Option<Vec<String>> {
            let users: Vec<String> = self
                .allowed_users
                .as_deref()?
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect();
            (!users.is_empty()).then_some(users)
        }
    }

    fn non_empty_var(key: &str) -> Option<String> {
        std::env::var(key).ok().filter(|v| !v.trim().is_empty())
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn missing_values_are_reported_by_name() {
            let s = Settings::default();
            let err = s.require_database_url().unwrap_err();
            assert!(err.to_string().contains("DATABASE_URL"));
            assert!(s.require_data_provider_base_url().is_err());
        }

        #[test]
        fn allowed_users_splits_and_trims() {
            let s = Settings {
                allowed_users: Some(" alice, ,bob ".to_string()),
                ..Settings::default()
            };
            assert_eq!(s.allowed_users(), Some(vec!["alice".to_string(), "bob".to_string()]));

            let blank = Settings {
                allowed_users: Some(" , ".to_string()),
                ..Settings::default()
            };
            assert_eq!(blank.allowed_users(), None);
        }
    }
}
