use tokenizers::Tokenizer;

use super::handle::{TokenizerHandle, short_type_name};
use super::hf::HfTokenizer;

/// Which conversion path a tokenizer handle belongs to.
#[derive(Clone, Copy)]
pub enum TokenizerKind<'a> {
    /// Base HF tokenizer exposing a serialized SentencePiece model
    SentencePieceBacked(&'a dyn TokenizerHandle),
    /// Fast `tokenizer.json` pipeline without a SentencePiece model
    FastPipeline(&'a dyn TokenizerHandle),
    Unrecognized(&'a dyn TokenizerHandle),
}

impl<'a> TokenizerKind<'a> {
    pub fn handle(&self) -> &'a dyn TokenizerHandle {
        match *self {
            TokenizerKind::SentencePieceBacked(handle)
            | TokenizerKind::FastPipeline(handle)
            | TokenizerKind::Unrecognized(handle) => handle,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            TokenizerKind::SentencePieceBacked(_) => "sentencepiece",
            TokenizerKind::FastPipeline(_) => "fast",
            TokenizerKind::Unrecognized(_) => "unrecognized",
        }
    }
}

impl std::fmt::Debug for TokenizerKind<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}({})", self.label(), short_type_name(self.handle()))
    }
}

/// Decides which conversion path applies to a handle.
///
/// Whether the tokenizer library is usable at all is expressed by which
/// classifier gets injected: [`HfClassifier`] when it is, [`AbsentLibrary`]
/// when it is not.
pub trait TokenizerClassifier: Send + Sync {
    fn classify<'a>(&self, handle: &'a dyn TokenizerHandle) -> TokenizerKind<'a>;
}

/// Classifier for a process without the tokenizer library.
#[derive(Debug, Default, Clone, Copy)]
pub struct AbsentLibrary;

impl TokenizerClassifier for AbsentLibrary {
    fn classify<'a>(&self, handle: &'a dyn TokenizerHandle) -> TokenizerKind<'a> {
        TokenizerKind::Unrecognized(handle)
    }
}

/// Recognizes [`HfTokenizer`] and bare `tokenizers::Tokenizer` handles.
#[derive(Debug, Default, Clone, Copy)]
pub struct HfClassifier;

impl TokenizerClassifier for HfClassifier {
    fn classify<'a>(&self, handle: &'a dyn TokenizerHandle) -> TokenizerKind<'a> {
        let any = handle.as_any();
        if let Some(tokenizer) = any.downcast_ref::<HfTokenizer>() {
            if tokenizer.is_sentencepiece_model() {
                return TokenizerKind::SentencePieceBacked(handle);
            }
            if tokenizer.is_fast() {
                return TokenizerKind::FastPipeline(handle);
            }
        } else if any.is::<Tokenizer>() {
            return TokenizerKind::FastPipeline(handle);
        }
        TokenizerKind::Unrecognized(handle)
    }
}
