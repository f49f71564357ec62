use ferrous_gate_domain::{CliOverrides, Config};
use tracing::info;

pub fn load_config(
    config_path: Option<&str>,
    cli_overrides: CliOverrides,
) -> anyhow::Result<Config> {
    let config = Config::load(config_path, cli_overrides)?;
    config.validate()?;

    info!(
        config_file = config_path.unwrap_or("default"),
        servers = config.servers.len(),
        local_records = config.local_records.len(),
        cache_enabled = config.cache.enabled,
        "Configuration loaded"
    );

    Ok(config)
}
