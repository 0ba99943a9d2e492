//! crmdeploy - Entry Point
//!
//! Runs the deployment engine behind the operator HTTP API.

use std::collections::HashMap;
use std::env;

use colored::Colorize;
use crmdeploy::app::options::AppOptions;
use crmdeploy::app::run::run;
use crmdeploy::filesys::file::File;
use crmdeploy::logs::{init_logging, LogLevel, LogOptions};
use crmdeploy::storage::layout::StorageLayout;
use crmdeploy::storage::settings::Settings;
use crmdeploy::utils::version_info;

use tracing::{error, info};

#[tokio::main]
async fn main() {
    // Parse command line arguments
    let args: Vec<String> = env::args().collect();
    let mut cli_args: HashMap<String, String> = HashMap::new();

    for arg in args.iter().skip(1) {
        if let Some((key, value)) = arg.split_once('=') {
            // Handle --key=value format
            let clean_key = key.trim_start_matches('-');
            cli_args.insert(clean_key.to_string(), value.to_string());
        } else if arg.starts_with("--") {
            // Handle standalone flags like --version
            let clean_key = arg.trim_start_matches('-');
            cli_args.insert(clean_key.to_string(), "true".to_string());
        }
    }

    // Print version and exit
    let version = version_info();
    if cli_args.contains_key("version") {
        match serde_json::to_string_pretty(&version) {
            Ok(json) => println!("{json}"),
            Err(e) => eprintln!("{} {e}", "error:".red().bold()),
        }
        return;
    }

    let layout = match cli_args.get("base-dir") {
        Some(dir) => StorageLayout::new(dir),
        None => StorageLayout::default(),
    };

    // Retrieve the settings file
    let settings_file = match cli_args.get("settings") {
        Some(path) => File::new(path),
        None => layout.settings_file(),
    };
    let mut settings = match Settings::load_or_default(&settings_file).await {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!(
                "{} unable to read settings file {}: {e}",
                "error:".red().bold(),
                settings_file.path().display()
            );
            return;
        }
    };

    if let Some(level) = cli_args.get("log-level") {
        match level.parse::<LogLevel>() {
            Ok(level) => settings.log_level = level,
            Err(e) => {
                eprintln!("{} {e}", "error:".red().bold());
                return;
            }
        }
    }
    if let Some(port) = cli_args.get("port") {
        match port.parse::<u16>() {
            Ok(port) => settings.server.port = port,
            Err(_) => {
                eprintln!("{} invalid port: {port}", "error:".red().bold());
                return;
            }
        }
    }
    let dry_run = cli_args.contains_key("dry-run");

    // Initialize logging; the guard flushes the log file on exit
    let log_options = LogOptions {
        log_level: settings.log_level.clone(),
        json_format: settings.log_json,
        log_dir: settings
            .log_to_file
            .then(|| layout.logs_dir().path().to_path_buf()),
        ..Default::default()
    };
    let _log_guard = match init_logging(log_options) {
        Ok(guard) => guard,
        Err(e) => {
            println!("Failed to initialize logging: {e}");
            None
        }
    };

    // Run the server
    let mut options = AppOptions::from_settings(&settings, layout);
    if dry_run {
        options.crm.dry_run = true;
        options.storage.in_memory = true;
        println!(
            "{}",
            "dry run: nothing is sent to the CRM and nothing is persisted".yellow()
        );
    }

    println!(
        "{} {} listening on {}:{}",
        "crmdeploy".green().bold(),
        version.version,
        options.server.host,
        options.server.port
    );
    info!("Running crmdeploy with options: {:?}", options);
    let result = run(version.version, options, await_shutdown_signal()).await;
    if let Err(e) = result {
        error!("Failed to run crmdeploy: {e}");
        eprintln!("{} {e}", "error:".red().bold());
        std::process::exit(1);
    }
}

async fn await_shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let (mut sigterm, mut sigint) =
            match (signal(SignalKind::terminate()), signal(SignalKind::interrupt())) {
                (Ok(sigterm), Ok(sigint)) => (sigterm, sigint),
                _ => {
                    error!("Unable to install signal handlers, waiting for Ctrl+C only");
                    let _ = tokio::signal::ctrl_c().await;
                    return;
                }
            };

        tokio::select! {
            _ = sigterm.recv() => {
                info!("SIGTERM received, shutting down...");
            }
            _ = sigint.recv() => {
                info!("SIGINT received, shutting down...");
            }
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {e}");
        }
        info!("Ctrl+C received, shutting down...");
    }
}
