use camino::Utf8PathBuf;
use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum DescError {
    #[error("no {prefix}*.json collections found in {dir}")]
    #[diagnostic(help("point --data-dir at the directory holding the brand files"))]
    NoCollections { dir: Utf8PathBuf, prefix: String },

    #[error("ANTHROPIC_API_KEY is not set")]
    #[diagnostic(help("add it to .env or export it: export ANTHROPIC_API_KEY=sk-ant-..."))]
    MissingApiKey,

    #[error("pipeline state not found: {0}")]
    #[diagnostic(help("run `descgen prepare` first"))]
    NotInitialized(Utf8PathBuf),

    #[error("pipeline state already exists: {0}")]
    #[diagnostic(help("use --force to regenerate it"))]
    StateExists(Utf8PathBuf),

    #[error("pipeline state is corrupt: {0}")]
    StateCorrupt(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("failed to read config file at {0}")]
    ConfigRead(Utf8PathBuf),

    #[error("failed to parse JSON config: {0}")]
    ConfigParse(String),

    #[error("failed to parse collection {path}: {message}")]
    CollectionParse { path: Utf8PathBuf, message: String },

    #[error("failed to read request file {path}: {message}")]
    RequestFile { path: Utf8PathBuf, message: String },

    #[error("batch service request failed: {0}")]
    ServiceHttp(String),

    #[error("batch service returned status {status}: {message}")]
    ServiceStatus { status: u16, message: String },

    #[error("unexpected batch service response: {0}")]
    ServiceDecode(String),

    #[error("filesystem error: {0}")]
    Filesystem(String),
}

impl DescError {
    /// Errors that stop a command before it touches anything.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            DescError::NoCollections { .. }
                | DescError::MissingApiKey
                | DescError::NotInitialized(_)
                | DescError::InvalidConfig(_)
                | DescError::ConfigRead(_)
                | DescError::ConfigParse(_)
        )
    }

    pub fn is_remote(&self) -> bool {
        matches!(
            self,
            DescError::ServiceHttp(_) | DescError::ServiceStatus { .. } | DescError::ServiceDecode(_)
        )
    }
}
