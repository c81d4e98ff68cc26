use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("unsupported or malformed video url: {0}")]
    InvalidUrl(String),

    #[error("metadata probe failed: {0}")]
    Probe(String),

    #[error("external tool is missing: {tool}")]
    ToolMissing { tool: String },

    #[error("external tool failed: {tool} (code={code:?}) {stderr}")]
    ToolFailed {
        tool: String,
        code: Option<i32>,
        stderr: String,
    },

    #[error("external tool timed out after {seconds}s: {tool}")]
    ToolTimeout { tool: String, seconds: u64 },

    #[error("job canceled")]
    Canceled,

    #[error("http fetch failed: {0}")]
    Http(String),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl EngineError {
    /// Message surfaced on a job's terminal error event. Prefers the tool's
    /// own diagnostic line over the generic variant text.
    pub fn user_message(&self) -> String {
        match self {
            EngineError::ToolFailed { tool, stderr, .. } if !stderr.is_empty() => {
                format!("{tool}: {stderr}")
            }
            other => other.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;
