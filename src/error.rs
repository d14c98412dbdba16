use thiserror::Error;

#[derive(Error, Debug)]
pub enum HarnessError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("XML parse error at position {position}: {source}")]
    Xml {
        source: quick_xml::Error,
        position: usize,
    },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Unknown profile: '{0}'. Supported: retestall, ekstazi, ijacoco, bjacoco")]
    UnknownProfile(String),

    #[error("Checkout of '{revision}' failed: {detail}")]
    Checkout { revision: String, detail: String },

    #[error("Build failed ({status}): {detail}")]
    Build {
        status: String,
        detail: String,
        stdout: String,
        stderr: String,
    },

    #[error("Project not found: {0}")]
    ProjectNotFound(String),

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, HarnessError>;
