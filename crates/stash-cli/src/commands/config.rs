use crate::cli::ConfigCommands;
use crate::config::{default_config_path, load_settings, load_stored_settings, save_settings};
use crate::error::CliError;

pub fn run_config(command: ConfigCommands) -> Result<(), CliError> {
    match command {
        ConfigCommands::Init {
            api_base_url,
            realtime_url,
            sync_interval_secs,
        } => run_config_init(api_base_url, realtime_url, sync_interval_secs),
        ConfigCommands::Show => run_config_show(),
    }
}

pub fn run_config_init(
    api_base_url: Option<String>,
    realtime_url: Option<String>,
    sync_interval_secs: Option<u64>,
) -> Result<(), CliError> {
    let path = default_config_path();
    let mut settings = load_stored_settings(&path).map_err(CliError::Config)?;
    if api_base_url.is_some() {
        settings.api_base_url = api_base_url;
    }
    if realtime_url.is_some() {
        settings.realtime_url = realtime_url;
    }
    if let Some(secs) = sync_interval_secs {
        settings.sync_interval_secs = secs;
    }
    let settings = settings.normalized().map_err(CliError::Config)?;

    save_settings(&settings, &path).map_err(CliError::Config)?;
    println!("Saved config to {}", path.display());
    Ok(())
}

pub fn run_config_show() -> Result<(), CliError> {
    let settings = load_settings().map_err(CliError::Config)?;
    println!("{}", serde_json::to_string_pretty(&settings)?);
    if let Some(url) = settings.resolved_realtime_url() {
        println!("Realtime endpoint: {url}");
    }
    println!("Config file: {}", default_config_path().display());
    Ok(())
}
