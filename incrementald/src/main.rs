//! # Incremental Storage Daemon
//!
//! Main entry point for the incremental storage daemon.

use incrementald::{Daemon, DaemonConfig};
use services_incremental::IncrementalConfig;
use std::env;
use std::fs;
use std::io;
use std::path::PathBuf;
use std::process;
use tracing_subscriber::EnvFilter;

fn main() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();

    let args: Vec<String> = env::args().collect();
    let program = args.first().map(String::as_str).unwrap_or("incrementald");

    let config = parse_args(&args).unwrap_or_else(|e| {
        eprintln!("Error: {}", e);
        print_usage(program);
        process::exit(1);
    });

    let mut daemon = Daemon::new(config).unwrap_or_else(|e| {
        eprintln!("Failed to start daemon: {}", e);
        process::exit(1);
    });

    let stdout = io::stdout();
    match daemon.run(&mut stdout.lock()) {
        Ok(summary) if summary.failed > 0 => process::exit(2),
        Ok(_) => {}
        Err(e) => {
            eprintln!("Runtime error: {}", e);
            process::exit(1);
        }
    }
}

fn parse_args(args: &[String]) -> Result<DaemonConfig, String> {
    let mut config_file: Option<PathBuf> = None;
    let mut mount_root: Option<PathBuf> = None;
    let mut state_dir: Option<PathBuf> = None;
    let mut script: Option<String> = None;
    let mut json = false;
    let mut i = 1;

    while i < args.len() {
        match args[i].as_str() {
            "--config" | "-c" => {
                i += 1;
                let value = args.get(i).ok_or("Missing value for --config")?;
                config_file = Some(PathBuf::from(value));
            }
            "--mount-root" => {
                i += 1;
                let value = args.get(i).ok_or("Missing value for --mount-root")?;
                mount_root = Some(PathBuf::from(value));
            }
            "--state-dir" => {
                i += 1;
                let value = args.get(i).ok_or("Missing value for --state-dir")?;
                state_dir = Some(PathBuf::from(value));
            }
            "--script" | "-s" => {
                i += 1;
                let value = args.get(i).ok_or("Missing value for --script")?;
                let text = fs::read_to_string(value)
                    .map_err(|e| format!("Failed to read script file: {}", e))?;
                script = Some(text);
            }
            "--json" => {
                json = true;
            }
            "--help" | "-h" => {
                print_usage(&args[0]);
                process::exit(0);
            }
            other => {
                return Err(format!("Unknown option: {}", other));
            }
        }
        i += 1;
    }

    // Flags override the config file.
    let mut service = match config_file {
        Some(path) => IncrementalConfig::from_json_file(&path).map_err(|e| e.to_string())?,
        None => IncrementalConfig::default(),
    };
    if let Some(root) = mount_root {
        service.mount_root = root;
    }
    if state_dir.is_some() {
        service.state_dir = state_dir;
    }
    service.validate().map_err(|e| e.to_string())?;

    Ok(DaemonConfig {
        service,
        script,
        json,
    })
}

fn print_usage(program: &str) {
    eprintln!("Usage: {} [OPTIONS]", program);
    eprintln!();
    eprintln!("Options:");
    eprintln!("  -c, --config <FILE>      JSON service configuration");
    eprintln!("  --mount-root <DIR>       Directory for storage roots");
    eprintln!("  --state-dir <DIR>        Persist permanent mounts under DIR");
    eprintln!("  -s, --script <FILE>      Command script to execute");
    eprintln!("  --json                   Print the final dump as JSON");
    eprintln!("  -h, --help               Show this help message");
    eprintln!();
    eprintln!("Examples:");
    eprintln!("  {} --script demos/install.incscript", program);
    eprintln!("  RUST_LOG=debug {} --state-dir /tmp/inc --json", program);
}
