use std::time::Duration;

/// Configuration for the API client
#[derive(Debug, Clone)]
pub struct ApiConfig {
    pub user_agent: String,
    pub connect_timeout: Duration,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            user_agent: concat!("software-bundle-installer/", env!("CARGO_PKG_VERSION")).to_string(),
            connect_timeout: Duration::from_secs(10),
        }
    }
}
