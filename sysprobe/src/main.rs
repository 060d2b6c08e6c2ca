use clap::Parser;
use std::env;
use std::path::PathBuf;
use sysprobe::config::AppConfig;
use sysprobe::{core_logic, logger};

/// Command line options for sysprobe
#[derive(Debug, Parser)]
#[command(author, version, about = "Logs every read/write syscall entry via kprobes", long_about = None)]
struct Cli {
    /// Path to configuration file (YAML). If not provided, search order applies.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Enable verbose logging inside the kernel program
    #[arg(short, long)]
    verbose: bool,

    /// Custom message passed to the kernel program (max 63 bytes)
    #[arg(short, long)]
    message: Option<String>,

    /// Append events to this file instead of the configured one
    #[arg(long)]
    log_file: Option<PathBuf>,

    /// Compiled eBPF object to load
    #[arg(long)]
    object: Option<PathBuf>,

    /// Print the path that was selected for configuration and exit
    #[arg(long)]
    print_config_path: bool,
}

fn candidate_config_paths() -> Vec<PathBuf> {
    let mut cands = Vec::new();
    // 1. Current working directory
    cands.push(PathBuf::from("./sysprobe.yaml"));
    // 2. /etc/sysprobe/
    cands.push(PathBuf::from("/etc/sysprobe/config.yaml"));
    // 3. XDG config home if set
    if let Ok(home) = env::var("XDG_CONFIG_HOME") {
        cands.push(PathBuf::from(home).join("sysprobe/config.yaml"));
    }
    // 4. ~/.config/sysprobe/config.yaml
    if let Some(home_dir) = dirs_next::home_dir() {
        cands.push(home_dir.join(".config/sysprobe/config.yaml"));
    }
    cands
}

/// Explicit paths (flag or env) are returned as-is and must be readable;
/// searched paths are only used when they exist.
fn resolve_config_path(cli: &Cli) -> Option<PathBuf> {
    if let Some(explicit) = &cli.config {
        return Some(explicit.clone());
    }
    if let Ok(env_path) = env::var("SYSPROBE_CONFIG") {
        return Some(PathBuf::from(env_path));
    }
    candidate_config_paths()
        .into_iter()
        .find(|cand| cand.exists())
}

fn load_config(cli: &Cli) -> Result<AppConfig, String> {
    let mut config = match resolve_config_path(cli) {
        Some(path) => AppConfig::load_from_file(&path)
            .map_err(|e| format!("cannot load config {:?}: {}", path, e))?,
        None => AppConfig::default(),
    };

    if cli.verbose {
        config.verbose = true;
    }
    if let Some(message) = &cli.message {
        config.message = message.clone();
    }
    if let Some(log_file) = &cli.log_file {
        config.log_file = Some(log_file.clone());
    }
    if let Some(object) = &cli.object {
        config.object_path = object.clone();
    }
    Ok(config)
}

fn main() {
    let cli = Cli::parse();

    if cli.print_config_path {
        match resolve_config_path(&cli) {
            Some(path) => println!("{:?}", path),
            None => println!("<defaults>"),
        }
        return;
    }

    let config = match load_config(&cli) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    };

    let log_guard = match &config.diagnostics_directory {
        Some(dir) => match logger::init_file_logging(dir) {
            Ok(guard) => Some(guard),
            Err(e) => {
                eprintln!("Error: failed to initialize logging: {}", e);
                std::process::exit(1);
            }
        },
        None => {
            if let Err(e) = logger::init_console_logging() {
                eprintln!("Error: failed to initialize logging: {}", e);
                std::process::exit(1);
            }
            None
        }
    };

    let code = core_logic::async_runtime(config);

    // 在进程退出前，显式地等待日志系统完成
    drop(log_guard);
    std::process::exit(code);
}
