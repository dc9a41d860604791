//! `cadence config` — Configuration management commands.

use std::path::{Path, PathBuf};

use cadence_config::AppConfig;

pub fn default_path() -> PathBuf {
    AppConfig::config_dir().join("config.toml")
}

/// Load a config file with the `CADENCE_*` environment overrides applied.
pub fn load(path: &Path) -> Result<AppConfig, Box<dyn std::error::Error>> {
    let mut config = AppConfig::load_from(path).map_err(|e| format!("Failed to load config: {e}"))?;
    config.apply_overrides(|key| std::env::var(key).ok())?;
    config.validate()?;
    Ok(config)
}

pub async fn show(path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let config = load(path)?;
    let toml_str = toml::to_string_pretty(&config)?;
    println!("{toml_str}");
    Ok(())
}

pub async fn init(path: &Path, force: bool) -> Result<(), Box<dyn std::error::Error>> {
    if path.exists() && !force {
        println!("⚠️  {} already exists. Use --force to overwrite.", path.display());
        return Ok(());
    }
    write_default(path)?;
    println!("✅ Wrote default config to {}", path.display());
    Ok(())
}

fn write_default(path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    std::fs::write(path, AppConfig::default_toml())?;
    Ok(())
}

/// Non-fatal observations about a valid config.
fn warnings(config: &AppConfig) -> Vec<String> {
    let mut warnings = Vec::new();
    if config.sub_agents.max_iterations > config.agent.max_iterations {
        warnings.push(format!(
            "sub_agents.max_iterations ({}) exceeds agent.max_iterations ({}); sub-agents are capped at the parent's limit",
            config.sub_agents.max_iterations, config.agent.max_iterations
        ));
    }
    if config.sub_agents.max_parallel > config.sub_agents.max_parallel_tasks {
        warnings.push("sub_agents.max_parallel is larger than max_parallel_tasks".into());
    }
    if let Some(floor) = config.validation.force_gate_at {
        if floor < config.validation.auto_approve_below {
            warnings.push(format!(
                "validation.force_gate_at ({floor}) is below auto_approve_below ({}); the force gate wins",
                config.validation.auto_approve_below
            ));
        }
    }
    warnings
}

pub async fn validate(path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    println!("🔍 Validating {}...", path.display());

    match load(path) {
        Ok(config) => {
            println!("   ✅ Config parsed successfully");

            let warnings = warnings(&config);
            if warnings.is_empty() {
                println!("   ✅ All checks passed");
            } else {
                println!();
                for w in &warnings {
                    println!("   ⚠️  {w}");
                }
            }

            println!();
            println!("   Model:       {}", config.agent.model);
            println!("   Iterations:  {}", config.agent.max_iterations);
            println!("   Memory:      {:?}", config.memory.backend);
            println!("   Validation:  {:?}", config.validation.mode);
            println!("   Max depth:   {}", config.sub_agents.max_depth);
        }
        Err(e) => {
            println!("   ❌ Config error: {e}");
            return Err(e);
        }
    }

    Ok(())
}
