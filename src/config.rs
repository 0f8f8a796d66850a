use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::Path;

#[derive(Deserialize, Debug, Clone)]
pub struct Conf {
    pub redis: RedisConfig,
}

#[derive(Deserialize, Debug, Clone)]
pub struct RedisConfig {
    pub addr: String,
    #[serde(default)]
    pub password: String,
}

impl RedisConfig {
    pub fn url(&self) -> String {
        if self.password.is_empty() {
            format!("redis://{}/0", self.addr)
        } else {
            format!("redis://:{}@{}/0", self.password, self.addr)
        }
    }
}

pub fn load_config(path: &Path) -> Result<Conf> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("config file not found: {}", path.display()))?;
    let config: Conf = serde_yaml::from_str(&content)
        .with_context(|| format!("unable to parse config file: {}", path.display()))?;
    Ok(config)
}
