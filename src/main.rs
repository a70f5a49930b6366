use std::{path::Path, sync::Arc};

use clap::Parser;
use color_eyre::{
    Result,
    eyre::{WrapErr, eyre},
};
use rampart::{
    config::{GatewayConfig, GatewayConfigValidator, loader::load_config},
    core::{registry::PluginRegistry, router::Router},
    server, tracing_setup,
};

#[derive(Parser, Debug)]
#[clap(author, version, about)]
struct Args {
    #[clap(subcommand)]
    command: Option<Commands>,

    #[clap(short, long, default_value = "rampart.yaml")]
    config: String,
}

#[derive(Parser, Debug)]
enum Commands {
    /// Validate the configuration and dry-build every namespace
    Validate {
        /// Configuration file to validate
        #[clap(short, long, default_value = "rampart.yaml")]
        config: String,
    },
    /// Start the gateway (default)
    Serve {
        /// Configuration file to use
        #[clap(short, long, default_value = "rampart.yaml")]
        config: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;

    let args = Args::parse();

    match args.command {
        Some(Commands::Validate { config }) => validate_config_command(&config).await,
        Some(Commands::Serve { config }) => serve_command(&config).await,
        None => serve_command(&args.config).await,
    }
}

async fn load_and_validate(config_path: &str) -> Result<GatewayConfig> {
    let config = load_config(config_path)
        .await
        .wrap_err_with(|| format!("Failed to load config from {config_path}"))?;
    GatewayConfigValidator::validate(&config)
        .map_err(|e| eyre!("Invalid configuration in {}: {}", config_path, e))?;
    Ok(config)
}

async fn serve_command(config_path: &str) -> Result<()> {
    let config = load_and_validate(config_path).await?;

    tracing_setup::init_from_config(&config.gateway.logger)
        .wrap_err("Failed to initialize tracing")?;

    let provider = rustls::crypto::aws_lc_rs::default_provider();
    if let Err(e) = rustls::crypto::CryptoProvider::install_default(provider) {
        tracing::warn!(
            "CryptoProvider::install_default for aws-lc-rs reported an error: {:?}",
            e
        );
    }

    tracing::info!(
        "Starting Rampart with {} namespaces on {} listeners",
        config.namespaces.len(),
        config.servers.len()
    );

    server::run(
        config,
        PluginRegistry::with_builtins(),
        server::shutdown_signal(),
    )
    .await?;

    tracing_setup::shutdown_tracing();
    Ok(())
}

/// Validate configuration file and exit
async fn validate_config_command(config_path: &str) -> Result<()> {
    println!("🔍 Validating configuration file: {config_path}");

    if !Path::new(config_path).exists() {
        eprintln!("❌ Error: Configuration file '{config_path}' not found");
        std::process::exit(1);
    }

    let config = match load_config(config_path).await {
        Ok(config) => {
            println!("✅ Configuration parsing: OK");
            config
        }
        Err(e) => {
            eprintln!("❌ Configuration parsing failed:");
            eprintln!("   {e:#}");
            std::process::exit(1);
        }
    };

    if let Err(e) = GatewayConfigValidator::validate(&config) {
        eprintln!("❌ Configuration validation failed:");
        eprintln!("{e}");
        println!();
        println!("💡 Common fixes:");
        println!("   • Verify listen address format (e.g., '127.0.0.1:8080')");
        println!("   • Keep path variables out of namespace mounts");
        println!("   • Check that a mount and its routes agree on method and host");
        std::process::exit(1);
    }
    println!("✅ Configuration validation: OK");

    // building runs every plugin's setup, which catches plugin config errors
    let router = match Router::build(
        &config.namespaces,
        Arc::new(PluginRegistry::with_builtins()),
    )
    .await
    {
        Ok(router) => router,
        Err(e) => {
            eprintln!("❌ Router build failed:");
            eprintln!("   {e}");
            std::process::exit(1);
        }
    };
    let patterns = router.mux().len();
    if let Err(e) = router.shutdown().await {
        eprintln!("⚠️  Plugin teardown reported errors:");
        eprintln!("   {e}");
    }
    println!("✅ Router build: OK");

    println!();
    println!("📋 Configuration Summary:");
    for server in &config.servers {
        println!("   • Listen Address: {}", server.addr);
    }
    println!("   • Namespaces: {}", config.namespaces.len());
    println!("   • Registered Patterns: {patterns}");
    println!(
        "   • Graceful Shutdown Timeout: {}",
        humantime::format_duration(config.gateway.graceful_shutdown_timeout)
    );
    println!();
    println!("🎉 Configuration is valid and ready to use!");
    Ok(())
}
