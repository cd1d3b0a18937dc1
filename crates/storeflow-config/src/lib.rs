pub mod error;
pub mod settings;

pub use error::*;
pub use settings::{FeatureFlags, PollerSettings, ProviderConfig, TimeoutSettings};

use std::path::PathBuf;

const CANDIDATES: [&str; 2] = ["storeflow.local.yaml", "storeflow.yaml"];

/// Global config directory (`~/.config/storeflow`), created on first use
pub fn get_config_dir() -> Result<PathBuf> {
    let config_dir = dirs::config_dir()
        .ok_or(ConfigError::ConfigDirNotFound)?
        .join("storeflow");

    if !config_dir.exists() {
        std::fs::create_dir_all(&config_dir)?;
    }

    Ok(config_dir)
}

/// Locate the provider config file
///
/// Search order:
/// 1. `STOREFLOW_CONFIG_PATH` (direct path)
/// 2. current directory: storeflow.local.yaml, storeflow.yaml
/// 3. `./.storeflow/` with the same order
/// 4. `~/.config/storeflow/storeflow.yaml`
pub fn find_config_file() -> Result<PathBuf> {
    if let Ok(config_path) = std::env::var("STOREFLOW_CONFIG_PATH") {
        let path = PathBuf::from(config_path);
        if path.exists() {
            return Ok(path);
        }
    }

    let current_dir = std::env::current_dir()?;

    for filename in &CANDIDATES {
        let path = current_dir.join(filename);
        if path.exists() {
            return Ok(path);
        }
    }

    let local_dir = current_dir.join(".storeflow");
    if local_dir.is_dir() {
        for filename in &CANDIDATES {
            let path = local_dir.join(filename);
            if path.exists() {
                return Ok(path);
            }
        }
    }

    if let Some(config_dir) = dirs::config_dir() {
        let global_config = config_dir.join("storeflow").join("storeflow.yaml");
        if global_config.exists() {
            return Ok(global_config);
        }
    }

    Err(ConfigError::NotFound)
}

/// Find and parse the config file, then apply environment overrides and
/// validate. Falls back to defaults when no file exists anywhere.
pub fn load() -> Result<ProviderConfig> {
    let mut config = match find_config_file() {
        Ok(path) => {
            tracing::debug!("loading provider config from {}", path.display());
            ProviderConfig::from_file(&path)?
        }
        Err(ConfigError::NotFound) => {
            tracing::debug!("no provider config file found, using defaults");
            ProviderConfig::default()
        }
        Err(e) => return Err(e),
    };

    config.apply_env_overrides();
    config.validate()?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::fs;

    #[test]
    fn test_get_config_dir() {
        let result = get_config_dir();
        assert!(result.is_ok());

        let config_dir = result.unwrap();
        assert!(config_dir.ends_with("storeflow"));
        assert!(config_dir.exists());
    }

    #[test]
    #[serial]
    fn test_find_config_file_in_current_dir() {
        let temp_dir = tempfile::tempdir().unwrap();
        let original_dir = std::env::current_dir().unwrap();

        fs::write(temp_dir.path().join("storeflow.yaml"), "# test").unwrap();
        std::env::set_current_dir(&temp_dir).unwrap();

        let result = find_config_file();
        assert!(result.is_ok());
        assert!(result.unwrap().ends_with("storeflow.yaml"));

        std::env::set_current_dir(original_dir).unwrap();
    }

    #[test]
    #[serial]
    fn test_find_config_file_local_priority() {
        let temp_dir = tempfile::tempdir().unwrap();
        let original_dir = std::env::current_dir().unwrap();

        fs::write(temp_dir.path().join("storeflow.yaml"), "# shared").unwrap();
        fs::write(temp_dir.path().join("storeflow.local.yaml"), "# local").unwrap();
        std::env::set_current_dir(&temp_dir).unwrap();

        let result = find_config_file().unwrap();
        assert!(result.ends_with("storeflow.local.yaml"));

        std::env::set_current_dir(original_dir).unwrap();
    }

    #[test]
    #[serial]
    fn test_find_config_file_in_dot_dir() {
        let temp_dir = tempfile::tempdir().unwrap();
        let original_dir = std::env::current_dir().unwrap();

        let dot_dir = temp_dir.path().join(".storeflow");
        fs::create_dir(&dot_dir).unwrap();
        fs::write(dot_dir.join("storeflow.yaml"), "# in dot dir").unwrap();
        std::env::set_current_dir(&temp_dir).unwrap();

        let result = find_config_file().unwrap();
        assert!(result.ends_with(".storeflow/storeflow.yaml"));

        std::env::set_current_dir(original_dir).unwrap();
    }

    #[test]
    #[serial]
    fn test_find_config_file_env_var() {
        let temp_dir = tempfile::tempdir().unwrap();
        let config_path = temp_dir.path().join("custom.yaml");
        fs::write(&config_path, "# custom").unwrap();

        unsafe {
            std::env::set_var("STOREFLOW_CONFIG_PATH", config_path.to_str().unwrap());
        }

        let result = find_config_file().unwrap();
        assert_eq!(result, config_path);

        unsafe {
            std::env::remove_var("STOREFLOW_CONFIG_PATH");
        }
    }

    #[test]
    #[serial]
    fn test_find_config_file_not_found() {
        let temp_dir = tempfile::tempdir().unwrap();
        let original_dir = std::env::current_dir().unwrap();
        std::env::set_current_dir(&temp_dir).unwrap();

        let result = find_config_file();
        // A global config on the machine running the tests is still a valid hit
        match result {
            Err(ConfigError::NotFound) => {}
            Ok(path) => assert!(path.ends_with("storeflow/storeflow.yaml")),
            Err(e) => panic!("unexpected error: {}", e),
        }

        std::env::set_current_dir(original_dir).unwrap();
    }

    #[test]
    #[serial]
    fn test_load_with_env_overrides() {
        let temp_dir = tempfile::tempdir().unwrap();
        let config_path = temp_dir.path().join("storeflow.yaml");
        fs::write(
            &config_path,
            "subscription_id: from-file\nfeatures:\n  data_plane_available: true\n",
        )
        .unwrap();

        unsafe {
            std::env::set_var("STOREFLOW_CONFIG_PATH", config_path.to_str().unwrap());
            std::env::set_var("ARM_SUBSCRIPTION_ID", "from-env");
            std::env::set_var("STOREFLOW_DATA_PLANE_AVAILABLE", "false");
        }

        let config = load().unwrap();
        assert_eq!(config.subscription_id.as_deref(), Some("from-env"));
        assert!(!config.features.data_plane_available);

        unsafe {
            std::env::remove_var("STOREFLOW_CONFIG_PATH");
            std::env::remove_var("ARM_SUBSCRIPTION_ID");
            std::env::remove_var("STOREFLOW_DATA_PLANE_AVAILABLE");
        }
    }

    #[test]
    #[serial]
    fn test_load_rejects_invalid_file() {
        let temp_dir = tempfile::tempdir().unwrap();
        let config_path = temp_dir.path().join("storeflow.yaml");
        fs::write(&config_path, "timeouts:\n  create: 0\n").unwrap();

        unsafe {
            std::env::set_var("STOREFLOW_CONFIG_PATH", config_path.to_str().unwrap());
        }

        let result = load();
        assert!(matches!(result, Err(ConfigError::Invalid(_))));

        unsafe {
            std::env::remove_var("STOREFLOW_CONFIG_PATH");
        }
    }
}
