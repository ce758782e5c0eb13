use config::load_config;
use config::shared::LoaderConfig;

/// Loads the loader configuration and validates it before anything else runs.
pub fn load_loader_config() -> anyhow::Result<LoaderConfig> {
    let config = load_config::<LoaderConfig>()?;
    config.validate()?;

    Ok(config)
}
