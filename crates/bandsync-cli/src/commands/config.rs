use std::path::Path;

use bandsync_core::util::normalize_text_option;
use bandsync_core::ClientConfig;
use uuid::Uuid;

use crate::cli::ConfigCommands;
use crate::commands::common::{load_config, CliPaths};
use crate::error::CliError;

pub fn run_config(command: ConfigCommands, paths: &CliPaths) -> Result<(), CliError> {
    match command {
        ConfigCommands::Init {
            api_url,
            tenant,
            device_id,
            token,
            force,
        } => run_config_init(&paths.config, api_url, tenant, device_id, token, force),
        ConfigCommands::Show => run_config_show(&paths.config),
    }
}

#[allow(clippy::needless_pass_by_value)]
pub fn run_config_init(
    path: &Path,
    api_url: String,
    tenant: String,
    device_id: Option<String>,
    token: Option<String>,
    force: bool,
) -> Result<(), CliError> {
    if path.exists() && !force {
        return Err(CliError::ConfigExists(path.to_path_buf()));
    }

    let config = build_config(api_url, tenant, device_id, token)?;
    config.save(path)?;

    println!("Wrote {}", path.display());
    println!("Device id: {}", config.device_id);
    Ok(())
}

/// Validated config for `config init`, generating a device id when absent
pub fn build_config(
    api_url: String,
    tenant: String,
    device_id: Option<String>,
    token: Option<String>,
) -> Result<ClientConfig, CliError> {
    let device_id =
        normalize_text_option(device_id).unwrap_or_else(|| Uuid::now_v7().to_string());
    let mut config = ClientConfig::new(api_url, device_id, tenant);
    config.auth_token = token;
    Ok(config.validate()?)
}

fn run_config_show(path: &Path) -> Result<(), CliError> {
    let mut config = load_config(path)?;
    if config.auth_token.is_some() {
        config.auth_token = Some("[REDACTED]".to_string());
    }
    println!("{}", serde_json::to_string_pretty(&config)?);
    Ok(())
}
