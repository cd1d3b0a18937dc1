use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Config directory not found")]
    ConfigDirNotFound,

    #[error(
        "Provider config file not found. Looked in:\n\
        - current directory: storeflow.local.yaml, storeflow.yaml\n\
        - ./.storeflow/ directory\n\
        - ~/.config/storeflow/storeflow.yaml\n\
        Set STOREFLOW_CONFIG_PATH to point at a file directly"
    )]
    NotFound,

    #[error("Invalid provider config: {0}")]
    Invalid(String),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, ConfigError>;
