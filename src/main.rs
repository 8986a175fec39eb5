//! Auth Gateway - CLI Application
//!
//! An API gateway service with:
//! - Service routing via YAML configuration
//! - Per-path authentication policy
//! - Token validation through an authorization service
//! - Prometheus metrics

use auth_gateway::config::GatewayConfig;
use auth_gateway::registry::ServiceRegistry;
use clap::{Parser, Subcommand};
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

/// Auth Gateway - routes requests to backend services with per-path authentication
#[derive(Parser)]
#[command(name = "auth-gateway")]
#[command(version, about = "API gateway with per-path authentication", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the gateway server
    Start {
        /// Configuration file path
        #[arg(short, long, default_value = "services.yaml")]
        config: String,
    },
    /// Validate the configuration file
    Validate {
        /// Configuration file path
        #[arg(short, long, default_value = "services.yaml")]
        config: String,
    },
    /// Generate a sample configuration file
    Init {
        /// Output file path
        #[arg(short, long, default_value = "services.yaml")]
        output: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Start { config } => start_server(&config).await?,
        Commands::Validate { config } => validate_config(&config)?,
        Commands::Init { output } => generate_sample_config(&output)?,
    }

    Ok(())
}

/// Start the gateway server
async fn start_server(config_path: &str) -> anyhow::Result<()> {
    // Setup logging
    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    // Load configuration with environment overrides
    let config = GatewayConfig::load(config_path)?;
    tracing::info!("loaded configuration from {}", config_path);

    auth_gateway::server::run(config).await
}

/// Validate configuration file
///
/// Applies the same environment overrides as `start`, so what is checked
/// here is what the server would actually run with.
fn validate_config(config_path: &str) -> anyhow::Result<()> {
    let result = GatewayConfig::load(config_path)
        .and_then(|config| ServiceRegistry::from_config(&config).map_err(Into::into).map(|r| (config, r)));

    match result {
        Ok((config, registry)) => {
            println!("✓ Configuration is valid!");
            println!();
            println!("Server: {}:{}", config.server.host, config.server.port);
            println!("Services: {}", registry.routes().len());
            println!();
            for route in registry.routes() {
                let policy = if route.fully_protected {
                    "fully protected"
                } else if !route.protected_paths.is_empty() {
                    "partially protected"
                } else {
                    "open"
                };
                println!("  {} {} → {} ({})", route.name, route.prefix, route.base_url, policy);
            }
            Ok(())
        }
        Err(e) => {
            eprintln!("✗ Configuration is invalid:");
            eprintln!("  {}", e);
            std::process::exit(1);
        }
    }
}

/// Generate sample configuration file
fn generate_sample_config(output_path: &str) -> anyhow::Result<()> {
    let sample_config = r#"# Auth Gateway Configuration

server:
  host: 0.0.0.0
  port: 8080
  timeout: 30

# Service definitions. Each service owns one URL prefix; the full original
# path is forwarded, so backends must be prefix-aware. A service URL can be
# overridden with <UPPERCASED_NAME>_SERVICE_URL.
services:
  authentication:
    url: http://authentication:3001
    prefix: /api/auth

  # Looked up by the gateway itself for token validation
  authorization:
    url: http://authorization:3002
    prefix: /api/authorize
    internal: true

  user:
    url: http://user:3003
    prefix: /api/users
    fully_protected: true
"#;

    std::fs::write(output_path, sample_config)?;
    println!("Sample configuration written to {}", output_path);
    Ok(())
}
