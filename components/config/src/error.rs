use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigurationError {
    #[error("`{0}` must be positive")]
    NotPositive(&'static str),

    #[error("Repair override `{0}` exceeds the largest supported piece count")]
    RepairOverrideTooLarge(usize),

    #[error("An IO error raised")]
    Io(#[from] std::io::Error),

    #[error("Malformed YAML configuration")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Malformed environment override")]
    Env(#[from] envy::Error),
}
