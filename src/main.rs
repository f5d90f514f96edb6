use clap::Parser;
use std::path::PathBuf;
use torii::config::Config;

/// Torii BFF Gateway - admission control, failure isolation, OAuth SSO and
/// audited proxying for frontend traffic
#[derive(Parser, Debug)]
#[command(name = "torii")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "config.yaml")]
    config: PathBuf,

    /// Emit JSON logs for log aggregation
    #[arg(long)]
    json_logs: bool,

    /// Test configuration and exit
    #[arg(long)]
    test: bool,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    torii::logging::init_subscriber(args.json_logs)
        .expect("Failed to initialize logging subsystem");

    let config = Config::from_file(&args.config).unwrap_or_else(|e| {
        eprintln!("Failed to load configuration: {}", e);
        std::process::exit(1);
    });

    if let Err(e) = config.validate() {
        eprintln!("Invalid configuration: {}", e);
        std::process::exit(1);
    }

    tracing::info!(
        config_file = %args.config.display(),
        server_address = config.server.address.as_str(),
        server_port = config.server.port,
        upstreams = config.upstreams.len(),
        oauth_providers = config.oauth.providers.len(),
        "Configuration loaded successfully"
    );

    if args.test {
        println!("Configuration OK");
        return;
    }

    if let Err(e) = torii::server::serve(config).await {
        tracing::error!(error = %e, "Gateway exited with error");
        std::process::exit(1);
    }
}
