use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use deploy_dns::{
    config::{DeployConfig, LoadedConfig},
    dns::{create_provider, TxtRecord, DEFAULT_TXT_TTL},
};

#[derive(Parser)]
#[command(name = "deploy-dns")]
#[command(about = "Select a DNS provider and manage ACME DNS-01 challenge records")]
#[command(version)]
struct Cli {
    /// Configuration file (defaults to the system location)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate the configuration and report the selected provider
    Check,

    /// Publish the _acme-challenge TXT record for a domain
    Present {
        /// Domain being validated (e.g., www.example.com)
        #[arg(long)]
        domain: String,
        /// DNS zone holding the domain (e.g., example.com)
        #[arg(long)]
        zone: String,
        /// Challenge value from the ACME server
        #[arg(long)]
        value: String,
        #[arg(long, default_value_t = DEFAULT_TXT_TTL)]
        ttl: u32,
    },

    /// Remove the _acme-challenge TXT record for a domain
    Cleanup {
        #[arg(long)]
        domain: String,
        #[arg(long)]
        zone: String,
        #[arg(long)]
        value: String,
    },

    /// Show configuration file location and contents
    Config,
}

fn init_logging(log_level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(log_level));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // An explicit --config that cannot be read is fatal.
    let LoadedConfig {
        config,
        path: config_path,
        from_file,
    } = DeployConfig::resolve(cli.config.as_deref(), |key| std::env::var(key).ok())?;

    init_logging(&config.logging.log_level);

    if !from_file {
        warn!(
            "Configuration file {} not found, using environment only",
            config_path.display()
        );
    }

    match cli.command {
        Commands::Check => {
            let provider = create_provider(&config.dns)?;
            println!("DNS provider: {}", provider.provider_name());
        }

        Commands::Present {
            domain,
            zone,
            value,
            ttl,
        } => {
            let provider = create_provider(&config.dns)?;
            let mut record = TxtRecord::challenge(&domain, &zone, &value)?;
            record.ttl = ttl;

            info!(
                "Presenting {} via {}",
                record.fqdn(&zone),
                provider.provider_name()
            );
            provider
                .append_txt_record(&zone, &record)
                .await
                .with_context(|| format!("Failed to present challenge for {}", domain))?;
            println!("Challenge record {} created", record.fqdn(&zone));
        }

        Commands::Cleanup {
            domain,
            zone,
            value,
        } => {
            let provider = create_provider(&config.dns)?;
            let record = TxtRecord::challenge(&domain, &zone, &value)?;

            provider
                .delete_txt_record(&zone, &record)
                .await
                .with_context(|| format!("Failed to clean up challenge for {}", domain))?;
            println!("Challenge record {} removed", record.fqdn(&zone));
        }

        Commands::Config => {
            show_config(&config_path, from_file, &config)?;
        }
    }

    Ok(())
}

fn show_config(config_path: &Path, from_file: bool, config: &DeployConfig) -> Result<()> {
    println!("Configuration file location: {}\n", config_path.display());

    if !from_file {
        println!("Configuration file not found; values below come from the environment.\n");
    }
    println!("Effective configuration (with environment overrides):\n");
    println!("{}", toml::to_string_pretty(&config.redacted())?);

    if !from_file {
        println!("Create a configuration file at the location above,");
        println!("or set D_DNS_PROVIDER and D_API_TOKEN.");
        println!("Example configuration:\n");
        println!(
            r#"[logging]
log_level = "info"

[dns]
provider = "cloudflare"

[dns.cloudflare]
api_key = "your-api-token"
"#
        );
    }

    Ok(())
}
