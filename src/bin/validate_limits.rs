//! Validate limit-settings YAML files. Used by CI before deploying new quotas.
//!
//! Usage: validate_limits <settings.yaml>...

use anyhow::{bail, Context};
use gcp_ratelimit::LimitSettings;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let paths: Vec<String> = std::env::args().skip(1).collect();
    if paths.is_empty() {
        bail!("usage: validate_limits <settings.yaml>...");
    }

    let mut errors = Vec::new();
    for path in &paths {
        print!("Validating {}... ", path);
        let result = LimitSettings::from_file(path)
            .with_context(|| format!("failed to load {}", path))
            .and_then(|settings| {
                let configs = settings.configs()?;
                Ok((settings, configs))
            });

        match result {
            Ok((settings, configs)) => {
                println!("✅");
                for (idx, (spec, cfg)) in settings.limits.iter().zip(&configs).enumerate() {
                    println!(
                        "  {:<20} {:>10.3} tokens/s  capacity {:>8}  max wait {}",
                        spec.label(idx),
                        cfg.refill_rate_per_second,
                        cfg.capacity,
                        cfg.max_wait_time
                            .map(|d| format!("{}ms", d.as_millis()))
                            .unwrap_or_else(|| "unbounded".to_string())
                    );
                }
                debug!(path = path.as_str(), limits = configs.len(), "settings valid");
            }
            Err(e) => {
                println!("❌");
                errors.push(format!("  {}: {:#}", path, e));
            }
        }
    }

    if !errors.is_empty() {
        eprintln!("\n{} file(s) failed validation:", errors.len());
        for e in &errors {
            eprintln!("{}", e);
        }
        std::process::exit(1);
    }

    info!(files = paths.len(), "all limit settings valid");
    Ok(())
}
