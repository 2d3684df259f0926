mod settings;

pub use settings::{
    CloudflareConfig, DeployConfig, DnsConfig, GcpConfig, LoadedConfig, LoggingConfig, Route53Config,
    ENV_API_TOKEN, ENV_DNS_PROVIDER,
};
