use thiserror::Error;

/// Why a DNS provider could not be selected from configuration.
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("dns provider '{provider}' selected but the {section} section is missing")]
    MissingConfig {
        provider: &'static str,
        section: &'static str,
    },

    #[error("invalid {section} section: '{field}' must not be empty")]
    InvalidConfig {
        section: &'static str,
        field: &'static str,
    },

    #[error("no valid provider selected (got '{name}', expected one of: cloudflare, gcp, route53)")]
    NoValidProvider { name: String },

    #[error("failed to create HTTP client")]
    HttpClient(#[from] reqwest::Error),
}
