use std::collections::BTreeMap;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::core::{AttributeValue, ModelArtifact};
use crate::error::ConvertError;
use crate::tokenizer::{AbsentLibrary, HfClassifier, TokenizerClassifier, TokenizerHandle, TokenizerKind};

// Default collaborators
pub mod fast;
pub mod spm;

pub use fast::FastPipelineConverter;
pub use spm::SentencePieceModelConverter;

pub const ENCODER_NAME: &str = "tokenizer";
pub const DECODER_NAME: &str = "detokenizer";

pub const STRING_INPUT: &str = "string_input";
pub const STRING_OUTPUT: &str = "string_output";
pub const INPUT_IDS: &str = "input_ids";
pub const ATTENTION_MASK: &str = "attention_mask";
pub const TOKEN_TYPE_IDS: &str = "token_type_ids";

/// Options accepted by [`TokenizerConverter::convert`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConversionOptions {
    /// Number of string inputs of the encoder. Only 1 is supported.
    pub number_of_inputs: usize,
    /// Also produce a decoder artifact
    pub with_decoder: bool,
    /// Build the incremental decoder variant (SentencePiece path only)
    pub streaming_decoder: bool,
}

impl Default for ConversionOptions {
    fn default() -> Self {
        Self {
            number_of_inputs: 1,
            with_decoder: false,
            streaming_decoder: false,
        }
    }
}

impl ConversionOptions {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConvertError> {
        let reader = BufReader::new(File::open(path)?);
        Ok(serde_json::from_reader(reader)?)
    }

    pub fn with_decoder(mut self, with_decoder: bool) -> Self {
        self.with_decoder = with_decoder;
        self
    }

    pub fn streaming_decoder(mut self, streaming_decoder: bool) -> Self {
        self.streaming_decoder = streaming_decoder;
        self
    }

    pub fn number_of_inputs(mut self, number_of_inputs: usize) -> Self {
        self.number_of_inputs = number_of_inputs;
        self
    }
}

/// Result of a conversion: the encoder, optionally paired with a decoder.
#[derive(Debug, Clone, PartialEq)]
pub enum Conversion {
    Encoder(ModelArtifact),
    WithDecoder(ModelArtifact, ModelArtifact),
}

impl Conversion {
    pub fn encoder(&self) -> &ModelArtifact {
        match self {
            Conversion::Encoder(encoder) | Conversion::WithDecoder(encoder, _) => encoder,
        }
    }

    pub fn decoder(&self) -> Option<&ModelArtifact> {
        match self {
            Conversion::Encoder(_) => None,
            Conversion::WithDecoder(_, decoder) => Some(decoder),
        }
    }

    /// Add the same rt_info entries to every artifact
    pub fn extend_rt_info(&mut self, info: &BTreeMap<String, AttributeValue>) {
        match self {
            Conversion::Encoder(encoder) => encoder.rt_info.extend(info.clone()),
            Conversion::WithDecoder(encoder, decoder) => {
                encoder.rt_info.extend(info.clone());
                decoder.rt_info.extend(info.clone());
            }
        }
    }

    pub fn into_parts(self) -> (ModelArtifact, Option<ModelArtifact>) {
        match self {
            Conversion::Encoder(encoder) => (encoder, None),
            Conversion::WithDecoder(encoder, decoder) => (encoder, Some(decoder)),
        }
    }
}

/// Converts tokenizers backed by a serialized SentencePiece model.
pub trait SentencePieceConverter: Send + Sync {
    fn convert(
        &self,
        handle: &dyn TokenizerHandle,
        add_attention_mask: bool,
        with_decoder: bool,
        streaming_decoder: bool,
    ) -> Result<Conversion, ConvertError>;
}

/// Converts fast `tokenizer.json` pipelines. There is no streaming decoder
/// option on this path.
pub trait FastTokenizerConverter: Send + Sync {
    fn convert(
        &self,
        handle: &dyn TokenizerHandle,
        number_of_inputs: usize,
        with_decoder: bool,
    ) -> Result<Conversion, ConvertError>;
}

/// Picks the conversion path for a tokenizer handle and delegates to it.
pub struct TokenizerConverter {
    classifier: Box<dyn TokenizerClassifier>,
    sentencepiece: Box<dyn SentencePieceConverter>,
    fast: Box<dyn FastTokenizerConverter>,
}

impl TokenizerConverter {
    pub fn new(
        classifier: impl TokenizerClassifier + 'static,
        sentencepiece: impl SentencePieceConverter + 'static,
        fast: impl FastTokenizerConverter + 'static,
    ) -> Self {
        Self {
            classifier: Box::new(classifier),
            sentencepiece: Box::new(sentencepiece),
            fast: Box::new(fast),
        }
    }

    /// Hugging Face classifier with the default converters
    pub fn hf() -> Self {
        Self::new(HfClassifier, SentencePieceModelConverter, FastPipelineConverter)
    }

    /// Converter for a process where the tokenizer library is unavailable.
    /// Every handle is rejected as unsupported.
    pub fn without_library() -> Self {
        Self::new(AbsentLibrary, SentencePieceModelConverter, FastPipelineConverter)
    }

    /// Convert `handle` into an encoder artifact, plus a decoder artifact when
    /// `options.with_decoder` is set.
    ///
    /// # Errors
    /// - `UnsupportedConfiguration` when `number_of_inputs != 1`, checked before
    ///   the handle is looked at
    /// - `UnsupportedTokenizerType` when the handle matches neither path
    /// - any error raised by the selected converter, unchanged
    pub fn convert(
        &self,
        handle: &dyn TokenizerHandle,
        options: &ConversionOptions,
    ) -> Result<Conversion, ConvertError> {
        if options.number_of_inputs != 1 {
            return Err(ConvertError::UnsupportedConfiguration {
                number_of_inputs: options.number_of_inputs,
            });
        }

        let kind = self.classifier.classify(handle);
        debug!("Classified tokenizer as {:?}", kind);
        match kind {
            TokenizerKind::SentencePieceBacked(handle) => {
                info!("Convert tokenizer using SentencePiece .model file.");
                self.sentencepiece.convert(
                    handle,
                    true,
                    options.with_decoder,
                    options.streaming_decoder,
                )
            }
            TokenizerKind::FastPipeline(handle) => {
                info!("Convert Huggingface Fast tokenizer pipeline.");
                self.fast.convert(handle, options.number_of_inputs, options.with_decoder)
            }
            TokenizerKind::Unrecognized(handle) => Err(ConvertError::UnsupportedTokenizerType {
                type_name: handle.type_name().to_string(),
            }),
        }
    }
}

impl Default for TokenizerConverter {
    fn default() -> Self {
        Self::hf()
    }
}

/// Convert with the default Hugging Face wiring.
pub fn convert_tokenizer(
    handle: &dyn TokenizerHandle,
    options: &ConversionOptions,
) -> Result<Conversion, ConvertError> {
    TokenizerConverter::hf().convert(handle, options)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::GraphBuilder;
    use crate::test_fixtures::{bpe_pipeline, init_logger, sentencepiece_proto};
    use crate::tokenizer::HfTokenizer;
    use std::sync::{Arc, Mutex};

    struct PlainObject;

    fn artifact(name: &str) -> ModelArtifact {
        let mut builder = GraphBuilder::new(name);
        builder.rt_info("marker", name);
        builder.build()
    }

    #[derive(Default)]
    struct Calls {
        sentencepiece: Vec<(bool, bool, bool)>,
        fast: Vec<(usize, bool)>,
    }

    struct RecordingSentencePiece {
        calls: Arc<Mutex<Calls>>,
        reply: fn() -> Result<Conversion, ConvertError>,
    }

    impl SentencePieceConverter for RecordingSentencePiece {
        fn convert(
            &self,
            _handle: &dyn TokenizerHandle,
            add_attention_mask: bool,
            with_decoder: bool,
            streaming_decoder: bool,
        ) -> Result<Conversion, ConvertError> {
            self.calls.lock().unwrap().sentencepiece.push((add_attention_mask, with_decoder, streaming_decoder));
            (self.reply)()
        }
    }

    struct RecordingFast {
        calls: Arc<Mutex<Calls>>,
        reply: fn() -> Result<Conversion, ConvertError>,
    }

    impl FastTokenizerConverter for RecordingFast {
        fn convert(
            &self,
            _handle: &dyn TokenizerHandle,
            number_of_inputs: usize,
            with_decoder: bool,
        ) -> Result<Conversion, ConvertError> {
            self.calls.lock().unwrap().fast.push((number_of_inputs, with_decoder));
            (self.reply)()
        }
    }

    fn sp_pair() -> Result<Conversion, ConvertError> {
        Ok(Conversion::WithDecoder(artifact("sp_encoder"), artifact("sp_decoder")))
    }

    fn fast_single() -> Result<Conversion, ConvertError> {
        Ok(Conversion::Encoder(artifact("fast_encoder")))
    }

    fn failing() -> Result<Conversion, ConvertError> {
        Err(ConvertError::MalformedPipeline("vocab is missing".into()))
    }

    fn recording_converter(
        classifier: impl TokenizerClassifier + 'static,
        sp_reply: fn() -> Result<Conversion, ConvertError>,
        fast_reply: fn() -> Result<Conversion, ConvertError>,
    ) -> (TokenizerConverter, Arc<Mutex<Calls>>) {
        let calls = Arc::new(Mutex::new(Calls::default()));
        let converter = TokenizerConverter::new(
            classifier,
            RecordingSentencePiece { calls: calls.clone(), reply: sp_reply },
            RecordingFast { calls: calls.clone(), reply: fast_reply },
        );
        (converter, calls)
    }

    fn sp_handle() -> HfTokenizer {
        HfTokenizer::from_sentencepiece_proto("sp", sentencepiece_proto()).unwrap()
    }

    fn fast_handle() -> HfTokenizer {
        HfTokenizer::from_pipeline("fast", bpe_pipeline())
    }

    #[test]
    fn test_rejects_input_count_before_dispatch() {
        let (converter, calls) = recording_converter(HfClassifier, sp_pair, fast_single);
        let sp = sp_handle();
        let fast = fast_handle();
        let handles: [&dyn TokenizerHandle; 3] = [&sp, &fast, &PlainObject];

        for n in [0usize, 2, 3, 16] {
            for handle in handles {
                for (with_decoder, streaming_decoder) in [(false, false), (true, true)] {
                    let options = ConversionOptions::default()
                        .number_of_inputs(n)
                        .with_decoder(with_decoder)
                        .streaming_decoder(streaming_decoder);
                    let result = converter.convert(handle, &options);
                    assert!(matches!(
                        result,
                        Err(ConvertError::UnsupportedConfiguration { number_of_inputs }) if number_of_inputs == n
                    ));
                }
            }
        }
        let calls = calls.lock().unwrap();
        assert!(calls.sentencepiece.is_empty());
        assert!(calls.fast.is_empty());
    }

    #[test]
    fn test_sentencepiece_path_forwards_all_flags() {
        init_logger();
        let (converter, calls) = recording_converter(HfClassifier, sp_pair, fast_single);
        let options = ConversionOptions::default().with_decoder(true).streaming_decoder(true);

        let result = converter.convert(&sp_handle(), &options).unwrap();

        assert_eq!(result, sp_pair().unwrap());
        let calls = calls.lock().unwrap();
        assert_eq!(calls.sentencepiece, vec![(true, true, true)]);
        assert!(calls.fast.is_empty());
    }

    #[test]
    fn test_sentencepiece_path_always_adds_attention_mask() {
        let (converter, calls) = recording_converter(HfClassifier, sp_pair, fast_single);
        for (with_decoder, streaming_decoder) in [(false, false), (false, true), (true, false)] {
            let options = ConversionOptions::default()
                .with_decoder(with_decoder)
                .streaming_decoder(streaming_decoder);
            converter.convert(&sp_handle(), &options).unwrap();
        }
        assert_eq!(
            calls.lock().unwrap().sentencepiece,
            vec![(true, false, false), (true, false, true), (true, true, false)]
        );
    }

    #[test]
    fn test_fast_path_drops_streaming_flag() {
        let (converter, calls) = recording_converter(HfClassifier, sp_pair, fast_single);
        let plain = ConversionOptions::default().with_decoder(true);
        let streaming = plain.streaming_decoder(true);

        let first = converter.convert(&fast_handle(), &plain).unwrap();
        let second = converter.convert(&bpe_pipeline(), &streaming).unwrap();

        assert_eq!(first, fast_single().unwrap());
        assert_eq!(second, first);
        let calls = calls.lock().unwrap();
        assert_eq!(calls.fast, vec![(1, true), (1, true)]);
        assert!(calls.sentencepiece.is_empty());
    }

    #[test]
    fn test_fast_handle_with_two_inputs() {
        let (converter, calls) = recording_converter(HfClassifier, sp_pair, fast_single);
        let options = ConversionOptions::default().number_of_inputs(2);
        let result = converter.convert(&fast_handle(), &options);
        assert!(matches!(result, Err(ConvertError::UnsupportedConfiguration { number_of_inputs: 2 })));
        assert!(calls.lock().unwrap().fast.is_empty());
    }

    #[test]
    fn test_unrecognized_handle() {
        let (converter, calls) = recording_converter(HfClassifier, sp_pair, fast_single);
        let options = ConversionOptions::default().with_decoder(true);

        match converter.convert(&PlainObject, &options) {
            Err(ConvertError::UnsupportedTokenizerType { type_name }) => {
                assert!(type_name.ends_with("PlainObject"), "{}", type_name)
            }
            other => panic!("unexpected result {:?}", other),
        }
        let calls = calls.lock().unwrap();
        assert!(calls.sentencepiece.is_empty());
        assert!(calls.fast.is_empty());
    }

    #[test]
    fn test_library_absent() {
        // recognizable handles are rejected too
        let (converter, calls) = recording_converter(AbsentLibrary, sp_pair, fast_single);
        let sp = sp_handle();
        let fast = fast_handle();
        let handles: [&dyn TokenizerHandle; 3] = [&PlainObject, &sp, &fast];

        for handle in handles {
            let result = converter.convert(handle, &ConversionOptions::default());
            match result {
                Err(ConvertError::UnsupportedTokenizerType { type_name }) => {
                    assert_eq!(type_name, handle.type_name())
                }
                other => panic!("unexpected result {:?}", other),
            }
        }
        let err = converter.convert(&PlainObject, &ConversionOptions::default()).unwrap_err();
        assert!(err.to_string().contains("PlainObject"));

        let calls = calls.lock().unwrap();
        assert!(calls.sentencepiece.is_empty());
        assert!(calls.fast.is_empty());
    }

    #[test]
    fn test_collaborator_errors_pass_through() {
        let (converter, _) = recording_converter(HfClassifier, failing, failing);

        let sp = converter.convert(&sp_handle(), &ConversionOptions::default());
        assert!(matches!(sp, Err(ConvertError::MalformedPipeline(ref m)) if m == "vocab is missing"));

        let fast = converter.convert(&fast_handle(), &ConversionOptions::default());
        assert!(matches!(fast, Err(ConvertError::MalformedPipeline(ref m)) if m == "vocab is missing"));
    }

    #[test]
    fn test_options_from_file_defaults() {
        let dir = crate::test_fixtures::temp_dir("options");
        let path = dir.join("options.json");
        std::fs::write(&path, r#"{"with_decoder": true}"#).unwrap();

        let options = ConversionOptions::from_file(&path).unwrap();
        assert_eq!(options, ConversionOptions::default().with_decoder(true));
        std::fs::remove_dir_all(&dir).unwrap();
    }
}
