#[cfg(not(unix))]
compile_error!("Only unix is currently supported");

use std::path::PathBuf;

use clap::Parser;

#[derive(Debug, Parser)]
#[command(name = "missive", version, about = "Transactional mail delivery queue")]
struct Args {
    /// Configuration file; falls back to `MISSIVE_CONFIG`, then the default locations
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Validate the configuration and build every transport, then exit
    #[arg(long)]
    check: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let config_path = find_config_file(args.config)?;
    let config_content = std::fs::read_to_string(&config_path).map_err(|e| {
        anyhow::anyhow!(
            "Failed to read config from {}: {}",
            config_path.display(),
            e
        )
    })?;
    let missive = missive::Missive::from_ron(&config_content)?;

    if args.check {
        let transports = missive.check()?;
        println!(
            "{}: OK ({transports} transports)",
            config_path.display()
        );
        return Ok(());
    }

    missive.run().await
}

/// Find the configuration file using the following precedence:
/// 1. `--config` on the command line
/// 2. `MISSIVE_CONFIG` environment variable
/// 3. ./missive.config.ron (current working directory)
/// 4. /etc/missive/missive.config.ron (system-wide config)
fn find_config_file(explicit: Option<PathBuf>) -> anyhow::Result<PathBuf> {
    if let Some(path) = explicit {
        if path.exists() {
            return Ok(path);
        }
        anyhow::bail!("--config points to non-existent file: {}", path.display());
    }

    if let Ok(env_path) = std::env::var("MISSIVE_CONFIG") {
        let path = PathBuf::from(env_path);
        if path.exists() {
            return Ok(path);
        }
        anyhow::bail!(
            "MISSIVE_CONFIG points to non-existent file: {}",
            path.display()
        );
    }

    let default_paths = [
        PathBuf::from("./missive.config.ron"),
        PathBuf::from("/etc/missive/missive.config.ron"),
    ];

    for path in &default_paths {
        if path.exists() {
            return Ok(path.clone());
        }
    }

    let paths_tried = default_paths
        .iter()
        .map(|p| format!("  - {}", p.display()))
        .collect::<Vec<_>>()
        .join("\n");

    anyhow::bail!(
        "No configuration file found. Tried:\n  - --config\n  - MISSIVE_CONFIG environment variable\n{paths_tried}"
    )
}
