//! Converts Hugging Face tokenizers into portable tokenizer/detokenizer graph
//! artifacts.
//!
//! A tokenizer handle is routed either to the SentencePiece path, when it
//! carries a serialized `.model` proto, or to the fast-pipeline path, when it
//! carries a `tokenizer.json` pipeline. See [`TokenizerConverter`].

pub mod convert;
pub mod core;
pub mod error;
pub mod tokenizer;

#[cfg(test)]
mod test_fixtures;

pub use convert::{
    Conversion, ConversionOptions, FastPipelineConverter, FastTokenizerConverter, SentencePieceConverter,
    SentencePieceModelConverter, TokenizerConverter, convert_tokenizer,
};
pub use crate::core::ModelArtifact;
pub use error::ConvertError;
pub use tokenizer::{HfTokenizer, TokenizerHandle};
