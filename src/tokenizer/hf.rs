use std::collections::BTreeMap;
use std::fmt;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use log::{debug, info};
use sentencepiece::SentencePieceProcessor;
use serde::Deserialize;
use tokenizers::Tokenizer;

use crate::core::AttributeValue;
use crate::error::ConvertError;

pub const SENTENCEPIECE_MODEL_FILE: &str = "tokenizer.model";
pub const PIPELINE_FILE: &str = "tokenizer.json";
pub const CONFIG_FILE: &str = "tokenizer_config.json";

/// Special token entry of `tokenizer_config.json`: either a bare string or an
/// added-token object.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum SpecialToken {
    Text(String),
    Added { content: String },
}

impl SpecialToken {
    pub fn content(&self) -> &str {
        match self {
            SpecialToken::Text(text) => text,
            SpecialToken::Added { content } => content,
        }
    }
}

/// The subset of `tokenizer_config.json` the converters look at
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct TokenizerConfig {
    pub tokenizer_class: Option<String>,
    pub add_bos_token: Option<bool>,
    pub add_eos_token: Option<bool>,
    pub bos_token: Option<SpecialToken>,
    pub eos_token: Option<SpecialToken>,
    pub pad_token: Option<SpecialToken>,
    pub unk_token: Option<SpecialToken>,
    pub model_max_length: Option<f64>,
    pub clean_up_tokenization_spaces: Option<bool>,
}

/// Values of `model_max_length` at or above this mean "no limit"
const UNBOUNDED_LENGTH: f64 = 1e15;

impl TokenizerConfig {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConvertError> {
        let reader = BufReader::new(File::open(path)?);
        Ok(serde_json::from_reader(reader)?)
    }

    /// Config entries carried into artifact rt_info
    pub fn rt_info(&self) -> BTreeMap<String, AttributeValue> {
        let mut info = BTreeMap::new();
        if let Some(class) = &self.tokenizer_class {
            info.insert("tokenizer_class".to_string(), class.as_str().into());
        }
        let tokens = [
            ("bos_token", &self.bos_token),
            ("eos_token", &self.eos_token),
            ("pad_token", &self.pad_token),
            ("unk_token", &self.unk_token),
        ];
        for (key, token) in tokens {
            if let Some(token) = token {
                info.insert(key.to_string(), token.content().into());
            }
        }
        if let Some(max) = self.model_max_length.filter(|max| *max >= 0.0 && *max < UNBOUNDED_LENGTH) {
            info.insert("model_max_length".to_string(), (max as i64).into());
        }
        if let Some(clean_up) = self.clean_up_tokenization_spaces {
            info.insert("clean_up_tokenization_spaces".to_string(), clean_up.into());
        }
        info
    }
}

/// A Hugging Face tokenizer as found in a model directory.
///
/// It may carry a serialized SentencePiece model (`tokenizer.model`), a fast
/// pipeline (`tokenizer.json`), or both. A tokenizer that exposes the
/// SentencePiece resource is converted through it even when a fast pipeline
/// is also present.
pub struct HfTokenizer {
    name_or_path: String,
    config: TokenizerConfig,
    sentencepiece_model: Option<Vec<u8>>,
    pipeline: Option<Tokenizer>,
}

impl HfTokenizer {
    /// Load whatever tokenizer files exist in `dir`
    ///
    /// # Errors
    /// - `MissingResource` if neither `tokenizer.model` nor `tokenizer.json` exists
    /// - `SentencePiece` if `tokenizer.model` is not a valid model proto
    /// - `Tokenizers` if `tokenizer.json` cannot be parsed
    pub fn from_pretrained<P: AsRef<Path>>(dir: P) -> Result<Self, ConvertError> {
        let dir = dir.as_ref();
        if !dir.is_dir() {
            return Err(ConvertError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("Tokenizer directory {} does not exist", dir.display()),
            )));
        }

        let config_path = dir.join(CONFIG_FILE);
        let config = if config_path.exists() {
            TokenizerConfig::from_file(&config_path)?
        } else {
            debug!("No {} in {}", CONFIG_FILE, dir.display());
            TokenizerConfig::default()
        };

        let sp_path = dir.join(SENTENCEPIECE_MODEL_FILE);
        let sentencepiece_model = if sp_path.exists() {
            let bytes = std::fs::read(&sp_path)?;
            let processor = SentencePieceProcessor::from_serialized_proto(&bytes)?;
            info!("Loaded SentencePiece model with {} pieces", processor.len());
            Some(bytes)
        } else {
            None
        };

        let pipeline_path = dir.join(PIPELINE_FILE);
        let pipeline = if pipeline_path.exists() {
            let tokenizer = Tokenizer::from_file(&pipeline_path).map_err(ConvertError::tokenizers)?;
            info!("Loaded fast tokenizer pipeline with {} tokens", tokenizer.get_vocab_size(true));
            Some(tokenizer)
        } else {
            None
        };

        if sentencepiece_model.is_none() && pipeline.is_none() {
            return Err(ConvertError::MissingResource {
                type_name: format!("HfTokenizer({})", dir.display()),
                resource: "tokenizer.model or tokenizer.json",
            });
        }

        Ok(Self {
            name_or_path: dir.display().to_string(),
            config,
            sentencepiece_model,
            pipeline,
        })
    }

    /// Wrap serialized SentencePiece model bytes, validating them first.
    pub fn from_sentencepiece_proto(name_or_path: impl Into<String>, proto: Vec<u8>) -> Result<Self, ConvertError> {
        SentencePieceProcessor::from_serialized_proto(&proto)?;
        Ok(Self {
            name_or_path: name_or_path.into(),
            config: TokenizerConfig::default(),
            sentencepiece_model: Some(proto),
            pipeline: None,
        })
    }

    pub fn from_pipeline(name_or_path: impl Into<String>, pipeline: Tokenizer) -> Self {
        Self {
            name_or_path: name_or_path.into(),
            config: TokenizerConfig::default(),
            sentencepiece_model: None,
            pipeline: Some(pipeline),
        }
    }

    pub fn with_config(mut self, config: TokenizerConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_pipeline(mut self, pipeline: Tokenizer) -> Self {
        self.pipeline = Some(pipeline);
        self
    }

    pub fn name_or_path(&self) -> &str {
        &self.name_or_path
    }

    pub fn config(&self) -> &TokenizerConfig {
        &self.config
    }

    pub fn is_sentencepiece_model(&self) -> bool {
        self.sentencepiece_model.is_some()
    }

    pub fn is_fast(&self) -> bool {
        self.pipeline.is_some()
    }

    pub fn sentencepiece_proto(&self) -> Option<&[u8]> {
        self.sentencepiece_model.as_deref()
    }

    pub fn sentencepiece_processor(&self) -> Result<SentencePieceProcessor, ConvertError> {
        let proto = self.sentencepiece_proto().ok_or_else(|| ConvertError::MissingResource {
            type_name: format!("HfTokenizer({})", self.name_or_path),
            resource: SENTENCEPIECE_MODEL_FILE,
        })?;
        Ok(SentencePieceProcessor::from_serialized_proto(proto)?)
    }

    pub fn pipeline(&self) -> Option<&Tokenizer> {
        self.pipeline.as_ref()
    }
}

impl fmt::Debug for HfTokenizer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HfTokenizer")
            .field("name_or_path", &self.name_or_path)
            .field("tokenizer_class", &self.config.tokenizer_class)
            .field("sentencepiece_model_bytes", &self.sentencepiece_model.as_ref().map(Vec::len))
            .field("fast", &self.pipeline.is_some())
            .finish()
    }
}
