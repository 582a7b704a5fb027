pub mod builder;
pub mod types;


pub use builder::{ConfigBuilder, env_input};
pub use types::*;

use anyhow::Result;
use std::path::Path;

/// Load the YAML config file if present; a missing file is an empty layer.
pub fn load_config(config_file: &str) -> Result<ConfigInput> {
    if !Path::new(config_file).exists() {
        return Ok(ConfigInput::default());
    }
    let contents = std::fs::read_to_string(config_file)?;
    Ok(serde_yaml::from_str(&contents)?)
}
