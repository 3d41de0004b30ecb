use reqwest::Client;

use crate::config::UptickConfig;

pub const USER_AGENT: &str = concat!("uptick/", env!("CARGO_PKG_VERSION"));

/// Builds the process-wide HTTP client. Every request made through it carries
/// the configured timeout.
pub fn build_client(config: &UptickConfig) -> reqwest::Result<Client> {
    Client::builder()
        .user_agent(USER_AGENT)
        .timeout(config.request_timeout())
        .pool_max_idle_per_host(config.max_connections_per_host)
        .build()
}
