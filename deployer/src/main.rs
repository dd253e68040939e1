//! Site deployer - entry point
//!
//! Runs the deployment queue workers and the local ops server.

use std::collections::HashMap;
use std::env;
use std::path::Path;

use anyhow::Context;
use site_deployer::app::options::AppOptions;
use site_deployer::app::run::run;
use site_deployer::filesys::file::File;
use site_deployer::logs::{init_logging, LogOptions};
use site_deployer::site::load_dir_files;
use site_deployer::storage::layout::StorageLayout;
use site_deployer::storage::settings::Settings;
use site_deployer::utils::version_info;
use site_deployer::validate::preflight::{PreflightOptions, PreflightValidator};

use tracing::{error, info, warn};

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
    if cli_args.contains_key("version") {
        match serde_json::to_string_pretty(&version_info()) {
            Ok(json) => println!("{}", json),
            Err(e) => eprintln!("Failed to render version: {e}"),
        }
        return;
    }

    let layout = match cli_args.get("home") {
        Some(home) => StorageLayout::new(home),
        None => StorageLayout::default(),
    };

    // Retrieve the settings file
    let settings_file = match cli_args.get("config") {
        Some(path) => File::new(path),
        None => layout.settings_file(),
    };
    let settings = match read_settings(&settings_file).await {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("Unable to read settings file: {e:#}");
            std::process::exit(1);
        }
    };

    // Validate a local directory and exit
    if let Some(dir) = cli_args.get("validate") {
        let preflight = PreflightOptions {
            entry_file: settings.validation.entry_file.clone(),
            max_file_size: settings.validation.max_file_size_bytes,
        };
        match validate_dir(Path::new(dir), preflight).await {
            Ok(true) => return,
            Ok(false) => std::process::exit(1),
            Err(e) => {
                eprintln!("Validation could not run: {e:#}");
                std::process::exit(2);
            }
        }
    }

    // Initialize logging; the guard flushes file output on drop
    let log_options = LogOptions {
        log_level: settings.log_level.clone(),
        to_file: settings.log_to_file,
        log_dir: layout.logs_dir().path().to_path_buf(),
        json_format: settings.log_json,
        ..Default::default()
    };
    let _log_guard = match init_logging(log_options) {
        Ok(guard) => guard,
        Err(e) => {
            println!("Failed to initialize logging: {e}");
            None
        }
    };

    if let Err(e) = layout.setup().await {
        error!("Unable to prepare storage at {}: {}", layout.base_dir.display(), e);
        return;
    }

    let options = match AppOptions::from_settings(&settings, layout) {
        Ok(options) => options,
        Err(e) => {
            error!("Invalid settings: {}", e);
            return;
        }
    };
    if options.providers.is_empty() {
        warn!("No hosting providers configured, every deployment will fail");
    }

    info!("Running site deployer {} with options: {:?}", version_info().version, options);
    if let Err(e) = run(options, await_shutdown_signal()).await {
        error!("Failed to run the deployer: {e}");
    }
}

/// Settings from `file`, or defaults when it does not exist
async fn read_settings(file: &File) -> anyhow::Result<Settings> {
    if !file.exists().await {
        return Ok(Settings::default());
    }
    file.read_json::<Settings>()
        .await
        .with_context(|| format!("reading {}", file.path().display()))
}

/// Print the pre-flight result for `dir` as JSON; true when valid
async fn validate_dir(dir: &Path, options: PreflightOptions) -> anyhow::Result<bool> {
    let files = load_dir_files(dir)
        .await
        .with_context(|| format!("loading files from {}", dir.display()))?;
    let result = PreflightValidator::new(options).validate_deployment(&files);
    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(result.valid)
}

async fn await_shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let (mut sigterm, mut sigint) =
            match (signal(SignalKind::terminate()), signal(SignalKind::interrupt())) {
                (Ok(sigterm), Ok(sigint)) => (sigterm, sigint),
                _ => {
                    error!("Failed to install signal handlers, falling back to Ctrl+C");
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
            error!("Failed to listen for Ctrl+C: {}", e);
        }
        info!("Ctrl+C received, shutting down...");
    }
}
