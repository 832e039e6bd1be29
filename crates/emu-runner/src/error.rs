use emu_device::DeviceError;

#[derive(Debug, thiserror::Error)]
pub enum RunnerError {
    #[error("config: {0}")]
    Config(String),

    #[error(transparent)]
    Device(#[from] DeviceError),

    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    #[error("yaml: {0}")]
    Yaml(#[from] serde_yaml_ng::Error),

    #[error("json: {0}")]
    Json(#[from] serde_json::Error),

    #[error("internal: {0}")]
    Internal(String),
}

impl RunnerError {
    /// Whether retrying the whole command may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Device(e) if e.is_transient())
    }
}

pub type RunnerResult<T> = Result<T, RunnerError>;
