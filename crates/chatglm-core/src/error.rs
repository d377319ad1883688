use thiserror::Error;

#[derive(Error, Debug)]
pub enum ChatGlmError {
    #[error("Failed to load model from '{path}': {reason}")]
    ModelLoadFailed { path: String, reason: String },

    #[error("Generation failed: {0}")]
    GenerationFailed(String),

    #[error("Tokenization failed: {0}")]
    TokenizationFailed(String),

    #[error("Embedding extraction failed: {0}")]
    EmbeddingFailed(String),

    #[error("Null pointer from FFI call")]
    NullPointer,

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, ChatGlmError>;
