/// Tokenizer handles and their classification
///
/// A handle is any value passed to the converter. The classifier decides
/// whether it is a SentencePiece-backed Hugging Face tokenizer, a fast
/// `tokenizer.json` pipeline, or something the converter cannot handle.
pub mod classify;
pub mod handle;
pub mod hf;

pub use classify::{AbsentLibrary, HfClassifier, TokenizerClassifier, TokenizerKind};
pub use handle::TokenizerHandle;
pub use hf::{HfTokenizer, SpecialToken, TokenizerConfig};
