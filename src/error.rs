//! Error types for replystream.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ReplyError {
    // Configuration errors
    #[error("Configuration file not found at {path}")]
    ConfigFileNotFound { path: String },

    #[error("Failed to parse configuration: {message}")]
    ConfigParse { message: String },

    #[error("Invalid configuration value for {key}: {message}")]
    ConfigInvalidValue { key: String, message: String },

    #[error("Configuration error: {0}")]
    Config(#[from] toml::de::Error),

    // Upstream model stream errors
    #[error("Fragment source failed: {message}")]
    FragmentSource { message: String },

    // Enrichment errors (recovered per unit)
    #[error("Emotion classification failed: {message}")]
    Classification { message: String },

    #[error("Translation failed: {message}")]
    Translation { message: String },

    #[error("Voice synthesis failed: {message}")]
    Synthesis { message: String },

    // Collaborator sinks
    #[error("Conversation memory error: {message}")]
    Memory { message: String },

    // Supervision errors
    #[error("Pipeline task '{task}' failed: {message}")]
    TaskFailed { task: String, message: String },

    #[error("Turn was cancelled")]
    Cancelled,

    // General I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // Generic error for cases not covered above
    #[error("{0}")]
    Other(String),
}

impl ReplyError {
    /// Client-facing error code for this error.
    ///
    /// The transport layer shows a localized message per code, so only a
    /// handful of buckets exist: `401`, `404`, `network_error` and
    /// `default_error`.
    pub fn code(&self) -> &'static str {
        let message = self.to_string();
        let lowered = message.to_lowercase();
        if message.contains("401")
            || lowered.contains("api key is invalid")
            || lowered.contains("authentication")
        {
            "401"
        } else if message.contains("404") {
            "404"
        } else if message.contains("网络") || lowered.contains("connection") {
            "network_error"
        } else {
            "default_error"
        }
    }
}

// Type alias for convenience
pub type Result<T> = std::result::Result<T, ReplyError>;
