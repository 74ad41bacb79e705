use classify_batching_proxy::{
    build_rocket,
    config::{AppConfig, Args},
};
use clap::Parser;
use log::info;
use rocket::{Build, Rocket, launch};

#[launch]
async fn rocket() -> Rocket<Build> {
    let args = Args::parse();
    let config = AppConfig::build(Some(args)).unwrap_or_else(|err| {
        eprintln!("Configuration error: {err}");
        std::process::exit(1);
    });

    // Initialize logging and get effective log level
    let _effective_log_level = config.init_logging();

    info!("🚀 Starting classify batching proxy...");

    println!("Server Configuration:");
    println!("  port: {}", config.port);
    println!("  Batching:");
    println!("    max_batch_size: {}", config.max_batch_size);
    println!("    throttle_backoff_ms: {}", config.throttle_backoff_ms);
    println!("  Backend:");
    println!("    backend_url: {}", config.backend_url);
    println!("    backend_timeout_secs: {}", config.backend_timeout_secs);
    println!("  Options:");
    println!("    log_level: {}", config.log_level);
    println!("    quiet_mode: {}", config.quiet_mode);
    println!();

    build_rocket(config).await
}
