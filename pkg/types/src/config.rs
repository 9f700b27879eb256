use serde::{Deserialize, Serialize};

/// Cleaner configuration file (YAML).
///
/// Example `config.yaml`:
/// ```yaml
/// data-dir: /var/lib/token-cleaner/data
/// namespace: kube-system
/// resync-interval-secs: 30
/// server-id: cleaner-1
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CleanerConfigFile {
    #[serde(default, alias = "data-dir")]
    pub data_dir: Option<String>,
    #[serde(default)]
    pub namespace: Option<String>,
    #[serde(default, alias = "resync-interval-secs")]
    pub resync_interval_secs: Option<u64>,
    #[serde(default, alias = "server-id")]
    pub server_id: Option<String>,
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kebab_case_aliases() {
        let yaml = "data-dir: /data\nresync-interval-secs: 60\n";
        let cfg: CleanerConfigFile = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(cfg.data_dir.as_deref(), Some("/data"));
        assert_eq!(cfg.resync_interval_secs, Some(60));
        assert_eq!(cfg.namespace, None);
    }

    #[test]
    fn missing_file_yields_defaults() {
        let cfg: CleanerConfigFile =
            load_config_file("/nonexistent/token-cleaner-config.yaml").unwrap();
        assert!(cfg.data_dir.is_none());
    }
}
