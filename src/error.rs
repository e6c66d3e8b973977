use thiserror::Error;

/// Errors raised while converting a tokenizer into graph artifacts.
///
/// The first two variants belong to the dispatcher itself. Everything else is
/// raised by a converter collaborator and handed back to the caller untouched.
#[derive(Debug, Error)]
pub enum ConvertError {
    #[error("Tokenizers with more than one input are not supported yet (got {number_of_inputs} inputs)")]
    UnsupportedConfiguration { number_of_inputs: usize },

    #[error("Tokenizer type is not supported: {type_name}")]
    UnsupportedTokenizerType { type_name: String },

    #[error("{type_name} does not provide the {resource} resource")]
    MissingResource {
        type_name: String,
        resource: &'static str,
    },

    #[error("Unsupported {stage} step in tokenizer pipeline: {kind}")]
    UnsupportedPipelineStep { stage: &'static str, kind: String },

    #[error("Malformed tokenizer pipeline: {0}")]
    MalformedPipeline(String),

    #[error("Malformed artifact: {0}")]
    Artifact(String),

    #[error("SentencePiece model error: {0}")]
    SentencePiece(#[from] sentencepiece::SentencePieceError),

    #[error("Tokenizers error: {0}")]
    Tokenizers(String),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl ConvertError {
    pub(crate) fn tokenizers(err: impl std::fmt::Display) -> Self {
        ConvertError::Tokenizers(err.to_string())
    }

    pub(crate) fn malformed(message: impl Into<String>) -> Self {
        ConvertError::MalformedPipeline(message.into())
    }
}
