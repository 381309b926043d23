use serde::{Deserialize, Serialize};

/// quotad configuration file (YAML).
///
/// Example `config.yaml`:
/// ```yaml
/// port: 6444
/// data-dir: /var/lib/quotad/data
/// token: my-secret-token
/// controller-token: my-controller-token
/// resync-secs: 30
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QuotadConfigFile {
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default, alias = "data-dir")]
    pub data_dir: Option<String>,
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default, alias = "controller-token")]
    pub controller_token: Option<String>,
    #[serde(default, alias = "resync-secs")]
    pub resync_secs: Option<u64>,
    #[serde(default, alias = "fanout-limit")]
    pub fanout_limit: Option<usize>,
}

/// Load a YAML config file, returning the default if the file doesn't exist.
pub fn load_config_file<T: serde::de::DeserializeOwned + Default>(path: &str) -> anyhow::Result<T> {
    let content = match std::fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Ok(T::default());
        }
        Err(e) => return Err(e.into()),
    };
    let config: T = serde_yaml::from_str(&content)?;
    Ok(config)
}
