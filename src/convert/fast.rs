//! Translation of a serialized `tokenizer.json` pipeline into encoder and
//! decoder graphs.
//!
//! The pipeline is walked in its serialized form so that every component the
//! `tokenizers` crate can load is visible here, including the ones it keeps
//! private. Each component maps onto one or more graph steps; a component
//! without a mapping fails the conversion with `UnsupportedPipelineStep`.

use log::{debug, info};
use serde_json::Value;
use tokenizers::Tokenizer;

use super::{
    ATTENTION_MASK, Conversion, DECODER_NAME, ENCODER_NAME, FastTokenizerConverter, INPUT_IDS,
    STRING_INPUT, STRING_OUTPUT, TOKEN_TYPE_IDS,
};
use crate::core::{Attributes, ElementType, GraphBuilder, ModelArtifact, Output, attrs};
use crate::error::ConvertError;
use crate::tokenizer::TokenizerHandle;
use crate::tokenizer::hf::{HfTokenizer, PIPELINE_FILE};

/// Pre-tokenization regex of GPT-2 style byte-level BPE tokenizers
pub const BYTE_LEVEL_SPLIT_PATTERN: &str =
    r"'s|'t|'re|'ve|'m|'ll|'d| ?\p{L}+| ?\p{N}+| ?[^\s\p{L}\p{N}]+|\s+(?!\S)|\s+";

const WHITESPACE_SPLIT_PATTERN: &str = r"\w+|[^\w\s]+";
const PUNCTUATION_PATTERN: &str = r"\p{P}";
const CJK_PATTERN: &str = r"([\x{4E00}-\x{9FFF}\x{3400}-\x{4DBF}\x{20000}-\x{2A6DF}\x{F900}-\x{FAFF}])";

/// Converts `HfTokenizer` fast pipelines and bare `tokenizers::Tokenizer` values.
#[derive(Debug, Default, Clone, Copy)]
pub struct FastPipelineConverter;

impl FastTokenizerConverter for FastPipelineConverter {
    fn convert(
        &self,
        handle: &dyn TokenizerHandle,
        number_of_inputs: usize,
        with_decoder: bool,
    ) -> Result<Conversion, ConvertError> {
        let tokenizer = pipeline_of(handle)?;
        let serialized = tokenizer.to_string(false).map_err(ConvertError::tokenizers)?;
        let pipeline: Value = serde_json::from_str(&serialized)?;
        let mut conversion = convert_pipeline(&pipeline, number_of_inputs, with_decoder)?;
        if let Some(tokenizer) = handle.as_any().downcast_ref::<HfTokenizer>() {
            conversion.extend_rt_info(&tokenizer.config().rt_info());
        }
        Ok(conversion)
    }
}

fn pipeline_of(handle: &dyn TokenizerHandle) -> Result<&Tokenizer, ConvertError> {
    let any = handle.as_any();
    let pipeline = match any.downcast_ref::<HfTokenizer>() {
        Some(tokenizer) => tokenizer.pipeline(),
        None => any.downcast_ref::<Tokenizer>(),
    };
    pipeline.ok_or_else(|| ConvertError::MissingResource {
        type_name: handle.type_name().to_string(),
        resource: PIPELINE_FILE,
    })
}

/// Convert a `tokenizer.json` document.
pub fn convert_pipeline(
    pipeline: &Value,
    number_of_inputs: usize,
    with_decoder: bool,
) -> Result<Conversion, ConvertError> {
    if number_of_inputs == 0 || number_of_inputs > 2 {
        return Err(ConvertError::UnsupportedConfiguration { number_of_inputs });
    }
    let model = component(pipeline, "model")
        .ok_or_else(|| ConvertError::malformed("pipeline has no model"))?;
    let added = AddedTokens::from_pipeline(pipeline, vocab_len(model))?;

    let encoder = build_encoder(pipeline, model, &added, number_of_inputs)?;
    info!("Built encoder with {} nodes", encoder.nodes.len());
    if !with_decoder {
        return Ok(Conversion::Encoder(encoder));
    }
    let decoder = build_decoder(pipeline, model, &added)?;
    info!("Built decoder with {} nodes", decoder.nodes.len());
    Ok(Conversion::WithDecoder(encoder, decoder))
}

/// One graph step applied to a string bundle.
#[derive(Debug, Clone, PartialEq)]
enum Step {
    NormalizeUnicode(&'static str),
    CaseFold,
    Replace { search: String, replace: String },
    Split { pattern: String, behaviour: &'static str, invert: bool },
    BytesToChars,
    CharsToBytes,
    ByteFallback,
}

impl Step {
    fn replace(search: impl Into<String>, replace: impl Into<String>) -> Self {
        Step::Replace { search: search.into(), replace: replace.into() }
    }

    fn split(pattern: impl Into<String>, behaviour: &'static str, invert: bool) -> Self {
        Step::Split { pattern: pattern.into(), behaviour, invert }
    }

    fn op_name(&self) -> &'static str {
        match self {
            Step::NormalizeUnicode(_) => "NormalizeUnicode",
            Step::CaseFold => "CaseFold",
            Step::Replace { .. } => "RegexNormalization",
            Step::Split { .. } => "RegexSplit",
            Step::BytesToChars => "BytesToChars",
            Step::CharsToBytes => "CharsToBytes",
            Step::ByteFallback => "ByteFallback",
        }
    }

    fn attributes(&self) -> Attributes {
        match self {
            Step::NormalizeUnicode(form) => attrs([("normalization_form", (*form).into())]),
            Step::CaseFold => attrs([("encoding", "utf-8".into())]),
            Step::Replace { search, replace } => attrs([
                ("search_pattern", search.clone().into()),
                ("replace_pattern", replace.clone().into()),
                ("global_replace", true.into()),
            ]),
            Step::Split { pattern, behaviour, invert } => attrs([
                ("split_pattern", pattern.clone().into()),
                ("behaviour", (*behaviour).into()),
                ("invert", (*invert).into()),
            ]),
            Step::BytesToChars | Step::CharsToBytes | Step::ByteFallback => Attributes::new(),
        }
    }

    /// Only splits change the bundle width. Skip flags pass through every step.
    fn emit(&self, builder: &mut GraphBuilder, strings: &Strings) -> Strings {
        let width = match self {
            Step::Split { .. } => 5,
            _ => strings.ports.len(),
        };
        strings.apply(builder, self.op_name(), width, self.attributes())
    }
}

/// String tensors flowing between steps: `begins, ends, chars`, with two
/// extra ragged dimensions in front once split. `skips` flags the special
/// token spans that steps after the special-token split leave untouched.
#[derive(Debug, Clone)]
struct Strings {
    ports: Vec<Output>,
    skips: Option<Output>,
}

impl Strings {
    fn plain(ports: Vec<Output>) -> Self {
        Strings { ports, skips: None }
    }

    fn inputs(&self) -> Vec<Output> {
        self.ports.iter().copied().chain(self.skips).collect()
    }

    fn apply(&self, builder: &mut GraphBuilder, op: &str, width: usize, attributes: Attributes) -> Strings {
        let extra = usize::from(self.skips.is_some());
        let mut ports = builder.op(op, &self.inputs(), width + extra, attributes);
        let skips = if self.skips.is_some() { ports.pop() } else { None };
        Strings { ports, skips }
    }
}

// JSON helpers

fn component<'a>(value: &'a Value, key: &str) -> Option<&'a Value> {
    value.get(key).filter(|v| !v.is_null())
}

fn kind(value: &Value) -> Result<&str, ConvertError> {
    value
        .get("type")
        .and_then(Value::as_str)
        .ok_or_else(|| ConvertError::malformed(format!("component without a type: {}", value)))
}

fn str_field<'a>(value: &'a Value, key: &str) -> Option<&'a str> {
    value.get(key).and_then(Value::as_str)
}

fn bool_field(value: &Value, key: &str, default: bool) -> bool {
    value.get(key).and_then(Value::as_bool).unwrap_or(default)
}

fn array_field<'a>(value: &'a Value, key: &str) -> Result<&'a Vec<Value>, ConvertError> {
    value
        .get(key)
        .and_then(Value::as_array)
        .ok_or_else(|| ConvertError::malformed(format!("expected an array in '{}'", key)))
}

/// `{"String": ...}` patterns are literal, `{"Regex": ...}` patterns are used as is
fn pattern(value: &Value) -> Result<String, ConvertError> {
    if let Some(literal) = str_field(value, "String") {
        return Ok(regex::escape(literal));
    }
    if let Some(regex) = str_field(value, "Regex") {
        return Ok(regex.to_string());
    }
    Err(ConvertError::malformed(format!("unknown pattern {}", value)))
}

fn split_behaviour(value: Option<&str>) -> Result<&'static str, ConvertError> {
    match value.unwrap_or("Isolated") {
        "Removed" => Ok("remove"),
        "Isolated" => Ok("isolate"),
        "MergedWithPrevious" => Ok("merge_with_previous"),
        "MergedWithNext" => Ok("merge_with_next"),
        "Contiguous" => Ok("contiguous"),
        other => Err(ConvertError::malformed(format!("unknown split behaviour {}", other))),
    }
}

/// Whether a Metaspace component prepends the replacement to the first word
fn metaspace_prepends(value: &Value) -> bool {
    match str_field(value, "prepend_scheme") {
        Some(scheme) => scheme != "never",
        None => bool_field(value, "add_prefix_space", true),
    }
}

fn normalizer_steps(normalizer: &Value, steps: &mut Vec<Step>) -> Result<(), ConvertError> {
    match kind(normalizer)? {
        "Sequence" => {
            for inner in array_field(normalizer, "normalizers")? {
                normalizer_steps(inner, steps)?;
            }
        }
        "NFC" => steps.push(Step::NormalizeUnicode("NFC")),
        "NFD" => steps.push(Step::NormalizeUnicode("NFD")),
        "NFKC" => steps.push(Step::NormalizeUnicode("NFKC")),
        "NFKD" => steps.push(Step::NormalizeUnicode("NFKD")),
        "Lowercase" => steps.push(Step::CaseFold),
        "Strip" => {
            if bool_field(normalizer, "strip_left", true) {
                steps.push(Step::replace(r"^\s+", ""));
            }
            if bool_field(normalizer, "strip_right", true) {
                steps.push(Step::replace(r"\s+$", ""));
            }
        }
        "StripAccents" => steps.push(Step::replace(r"\p{Mn}", "")),
        "Replace" => {
            let search = pattern(normalizer.get("pattern").unwrap_or(&Value::Null))?;
            let content = str_field(normalizer, "content").unwrap_or("");
            steps.push(Step::replace(search, content));
        }
        "Prepend" => {
            let prepend = str_field(normalizer, "prepend").unwrap_or("");
            steps.push(Step::replace(r"(?s)^(.)", format!("{}$1", prepend.replace('$', "$$"))));
        }
        "BertNormalizer" => {
            if bool_field(normalizer, "clean_text", true) {
                steps.push(Step::replace(r"[\x{0000}\x{FFFD}\p{Cc}--\s]", ""));
                steps.push(Step::replace(r"\s", " "));
            }
            if bool_field(normalizer, "handle_chinese_chars", true) {
                steps.push(Step::replace(CJK_PATTERN, " $1 "));
            }
            let lowercase = bool_field(normalizer, "lowercase", true);
            let strip_accents = normalizer
                .get("strip_accents")
                .and_then(Value::as_bool)
                .unwrap_or(lowercase);
            if strip_accents {
                steps.push(Step::NormalizeUnicode("NFD"));
                steps.push(Step::replace(r"\p{Mn}", ""));
            }
            if lowercase {
                steps.push(Step::CaseFold);
            }
        }
        other => {
            return Err(ConvertError::UnsupportedPipelineStep {
                stage: "normalizer",
                kind: other.to_string(),
            });
        }
    }
    Ok(())
}

fn pre_tokenizer_steps(pre_tokenizer: &Value, steps: &mut Vec<Step>) -> Result<(), ConvertError> {
    match kind(pre_tokenizer)? {
        "Sequence" => {
            for inner in array_field(pre_tokenizer, "pretokenizers")? {
                pre_tokenizer_steps(inner, steps)?;
            }
        }
        "BertPreTokenizer" => {
            steps.push(Step::split(r"\s+", "remove", false));
            steps.push(Step::split(PUNCTUATION_PATTERN, "isolate", false));
        }
        "Whitespace" => steps.push(Step::split(WHITESPACE_SPLIT_PATTERN, "isolate", true)),
        "WhitespaceSplit" => steps.push(Step::split(r"\s+", "remove", false)),
        "Punctuation" => {
            let behaviour = split_behaviour(str_field(pre_tokenizer, "behavior"))?;
            steps.push(Step::split(PUNCTUATION_PATTERN, behaviour, false));
        }
        "Digits" => {
            let pattern = if bool_field(pre_tokenizer, "individual_digits", false) {
                r"\p{Nd}"
            } else {
                r"\p{Nd}+"
            };
            steps.push(Step::split(pattern, "isolate", false));
        }
        "Split" => {
            let split_pattern = pattern(pre_tokenizer.get("pattern").unwrap_or(&Value::Null))?;
            let behaviour = split_behaviour(str_field(pre_tokenizer, "behavior"))?;
            let invert = bool_field(pre_tokenizer, "invert", false);
            steps.push(Step::split(split_pattern, behaviour, invert));
        }
        "CharDelimiterSplit" => {
            let delimiter = str_field(pre_tokenizer, "delimiter")
                .ok_or_else(|| ConvertError::malformed("CharDelimiterSplit without a delimiter"))?;
            steps.push(Step::split(regex::escape(delimiter), "remove", false));
        }
        "ByteLevel" => {
            if bool_field(pre_tokenizer, "add_prefix_space", true) {
                steps.push(Step::replace(r"^(\S)", " $1"));
            }
            if bool_field(pre_tokenizer, "use_regex", true) {
                steps.push(Step::split(BYTE_LEVEL_SPLIT_PATTERN, "isolate", false));
            }
            steps.push(Step::BytesToChars);
        }
        "Metaspace" => {
            let replacement = str_field(pre_tokenizer, "replacement").unwrap_or("▁");
            let escaped = regex::escape(replacement);
            steps.push(Step::replace(" ", replacement));
            if metaspace_prepends(pre_tokenizer) {
                steps.push(Step::replace(format!("^([^{}])", escaped), format!("{}$1", replacement)));
            }
            if bool_field(pre_tokenizer, "split", true) {
                steps.push(Step::split(escaped, "merge_with_next", false));
            }
        }
        other => {
            return Err(ConvertError::UnsupportedPipelineStep {
                stage: "pre_tokenizer",
                kind: other.to_string(),
            });
        }
    }
    Ok(())
}

/// Number of entries in the model vocab; 0 for models without a vocab map.
fn vocab_len(model: &Value) -> usize {
    model.get("vocab").and_then(Value::as_object).map_or(0, |vocab| vocab.len())
}

/// Table slot of a token id. Ids must stay below the number of tokens the
/// pipeline defines, which bounds the id-ordered tables built from them.
fn token_slot(id: u64, limit: usize, token: &str) -> Result<usize, ConvertError> {
    usize::try_from(id)
        .ok()
        .filter(|slot| *slot < limit)
        .ok_or_else(|| ConvertError::malformed(format!("token '{}' has id {} outside 0..{}", token, id, limit)))
}

/// Model vocabulary ordered by token id; ids without a token map to "".
/// `added_count` widens the valid id range by the pipeline's added tokens.
fn model_vocab(model: &Value, added_count: usize) -> Result<Vec<String>, ConvertError> {
    let vocab = model
        .get("vocab")
        .and_then(Value::as_object)
        .ok_or_else(|| ConvertError::malformed("model has no vocab"))?;
    let limit = vocab.len().saturating_add(added_count);
    let mut tokens: Vec<String> = Vec::with_capacity(vocab.len());
    for (token, id) in vocab {
        let id = id
            .as_u64()
            .ok_or_else(|| ConvertError::malformed(format!("token '{}' has no integer id", token)))?;
        let slot = token_slot(id, limit, token)?;
        if tokens.len() <= slot {
            tokens.resize(slot + 1, String::new());
        }
        tokens[slot] = token.clone();
    }
    Ok(tokens)
}

fn token_id(model: &Value, token: &str) -> Result<i32, ConvertError> {
    model
        .get("vocab")
        .and_then(|v| v.get(token))
        .and_then(Value::as_i64)
        .map(|id| id as i32)
        .ok_or_else(|| ConvertError::malformed(format!("token '{}' is not in the vocab", token)))
}

/// BPE merges as `"left right"` strings; accepts both serialized forms.
fn bpe_merges(model: &Value) -> Result<Vec<String>, ConvertError> {
    array_field(model, "merges")?
        .iter()
        .map(|merge| match merge {
            Value::String(pair) => Ok(pair.clone()),
            Value::Array(pair) => match pair.as_slice() {
                [Value::String(left), Value::String(right)] => Ok(format!("{} {}", left, right)),
                _ => Err(ConvertError::malformed(format!("bad merge {}", merge))),
            },
            _ => Err(ConvertError::malformed(format!("bad merge {}", merge))),
        })
        .collect()
}

fn emit_model(
    builder: &mut GraphBuilder,
    model: &Value,
    added: &AddedTokens,
    strings: &Strings,
) -> Result<Vec<Output>, ConvertError> {
    let mut inputs = strings.inputs();
    match kind(model)? {
        "BPE" => {
            let vocab = builder.constant_strings("vocab", &model_vocab(model, added.tokens.len())?);
            let merges = builder.constant_strings("merges", &bpe_merges(model)?);
            inputs.extend([vocab, merges]);
            Ok(builder.op(
                "BPETokenizer",
                &inputs,
                3,
                attrs([
                    ("unk_token", str_field(model, "unk_token").unwrap_or("").into()),
                    ("fuse_unk", bool_field(model, "fuse_unk", false).into()),
                    ("suffix_indicator", str_field(model, "continuing_subword_prefix").unwrap_or("").into()),
                    ("end_suffix", str_field(model, "end_of_word_suffix").unwrap_or("").into()),
                    ("byte_fallback", bool_field(model, "byte_fallback", false).into()),
                ]),
            ))
        }
        "WordPiece" => {
            let unk_token = str_field(model, "unk_token").unwrap_or("[UNK]");
            let unk_id = token_id(model, unk_token)?;
            let vocab = builder.constant_strings("vocab", &model_vocab(model, added.tokens.len())?);
            let unk = builder.constant_i32("unk_token_id", &[unk_id]);
            inputs.extend([vocab, unk]);
            let max_bytes = model.get("max_input_chars_per_word").and_then(Value::as_i64).unwrap_or(100);
            Ok(builder.op(
                "WordpieceTokenizer",
                &inputs,
                3,
                attrs([
                    ("suffix_indicator", str_field(model, "continuing_subword_prefix").unwrap_or("##").into()),
                    ("max_bytes_per_word", max_bytes.into()),
                ]),
            ))
        }
        "WordLevel" => {
            let tokens = model_vocab(model, added.tokens.len())?;
            let unk_id = match str_field(model, "unk_token") {
                Some(unk) => token_id(model, unk)?,
                None => -1,
            };
            let ids: Vec<i32> = (0..tokens.len() as i32).collect();
            let keys = builder.constant_strings("vocab_keys", &tokens);
            let values = builder.constant_i32("vocab_values", &ids);
            let default = builder.constant_i32("default_value", &[unk_id]);
            inputs.extend([keys, values, default]);
            Ok(builder.op("VocabEncoder", &inputs, 3, Attributes::new()))
        }
        other => Err(ConvertError::UnsupportedPipelineStep {
            stage: "model",
            kind: other.to_string(),
        }),
    }
}

/// Added tokens of the pipeline
#[derive(Debug, Default)]
struct AddedTokens {
    tokens: Vec<(usize, String)>,
    special: Vec<(usize, String)>,
}

impl AddedTokens {
    /// `vocab_len` is the size of the model vocab the added ids extend.
    fn from_pipeline(pipeline: &Value, vocab_len: usize) -> Result<Self, ConvertError> {
        let mut added = AddedTokens::default();
        let Some(entries) = component(pipeline, "added_tokens") else {
            return Ok(added);
        };
        let entries = entries
            .as_array()
            .ok_or_else(|| ConvertError::malformed("added_tokens is not an array"))?;
        let limit = vocab_len.saturating_add(entries.len());
        for entry in entries {
            let id = entry.get("id").and_then(Value::as_u64);
            let content = str_field(entry, "content");
            let (Some(id), Some(content)) = (id, content) else {
                return Err(ConvertError::malformed(format!("bad added token {}", entry)));
            };
            let token = (token_slot(id, limit, content)?, content.to_string());
            if bool_field(entry, "special", false) {
                added.special.push(token.clone());
            }
            added.tokens.push(token);
        }
        Ok(added)
    }

    fn special_ids(&self) -> Vec<i64> {
        self.special.iter().map(|(id, _)| *id as i64).collect()
    }

    /// Alternation matching any special token literally, longest first
    fn special_pattern(&self) -> Option<String> {
        if self.special.is_empty() {
            return None;
        }
        let mut contents: Vec<&str> = self.special.iter().map(|(_, c)| c.as_str()).collect();
        contents.sort_by(|a, b| b.len().cmp(&a.len()).then(a.cmp(b)));
        contents.dedup();
        Some(contents.iter().map(|c| regex::escape(c)).collect::<Vec<_>>().join("|"))
    }
}

/// One piece of a post-processing template
#[derive(Debug, Clone, PartialEq)]
enum Segment {
    Sequence { input: usize, type_id: i64 },
    Special { ids: Vec<i32>, type_id: i64 },
}

fn template(post_processor: &Value, number_of_inputs: usize) -> Result<Option<Vec<Segment>>, ConvertError> {
    let pair = number_of_inputs > 1;
    match kind(post_processor)? {
        "TemplateProcessing" => {
            let items = array_field(post_processor, if pair { "pair" } else { "single" })?;
            let mut segments = Vec::with_capacity(items.len());
            for item in items {
                if let Some(sequence) = item.get("Sequence") {
                    let input = match str_field(sequence, "id") {
                        Some("A") => 0,
                        Some("B") => 1,
                        _ => return Err(ConvertError::malformed(format!("bad template sequence {}", item))),
                    };
                    let type_id = sequence.get("type_id").and_then(Value::as_i64).unwrap_or(0);
                    segments.push(Segment::Sequence { input, type_id });
                } else if let Some(special) = item.get("SpecialToken") {
                    let name = str_field(special, "id")
                        .ok_or_else(|| ConvertError::malformed(format!("bad template token {}", item)))?;
                    let ids = post_processor
                        .get("special_tokens")
                        .and_then(|tokens| tokens.get(name))
                        .and_then(|token| token.get("ids"))
                        .and_then(Value::as_array)
                        .ok_or_else(|| ConvertError::malformed(format!("special token '{}' has no ids", name)))?
                        .iter()
                        .map(|id| id.as_i64().map(|id| id as i32))
                        .collect::<Option<Vec<i32>>>()
                        .ok_or_else(|| ConvertError::malformed(format!("special token '{}' has bad ids", name)))?;
                    let type_id = special.get("type_id").and_then(Value::as_i64).unwrap_or(0);
                    segments.push(Segment::Special { ids, type_id });
                } else {
                    return Err(ConvertError::malformed(format!("bad template item {}", item)));
                }
            }
            Ok(Some(segments))
        }
        "BertProcessing" => {
            let cls = special_pair(post_processor, "cls")?;
            let sep = special_pair(post_processor, "sep")?;
            let mut segments = vec![
                Segment::Special { ids: vec![cls], type_id: 0 },
                Segment::Sequence { input: 0, type_id: 0 },
                Segment::Special { ids: vec![sep], type_id: 0 },
            ];
            if pair {
                segments.push(Segment::Sequence { input: 1, type_id: 1 });
                segments.push(Segment::Special { ids: vec![sep], type_id: 1 });
            }
            Ok(Some(segments))
        }
        "RobertaProcessing" => {
            let cls = special_pair(post_processor, "cls")?;
            let sep = special_pair(post_processor, "sep")?;
            let mut segments = vec![
                Segment::Special { ids: vec![cls], type_id: 0 },
                Segment::Sequence { input: 0, type_id: 0 },
                Segment::Special { ids: vec![sep], type_id: 0 },
            ];
            if pair {
                segments.push(Segment::Special { ids: vec![sep], type_id: 0 });
                segments.push(Segment::Sequence { input: 1, type_id: 0 });
                segments.push(Segment::Special { ids: vec![sep], type_id: 0 });
            }
            Ok(Some(segments))
        }
        "ByteLevel" => Ok(None),
        "Sequence" => {
            let mut result = None;
            for inner in array_field(post_processor, "processors")? {
                if let Some(segments) = template(inner, number_of_inputs)? {
                    result = Some(segments);
                }
            }
            Ok(result)
        }
        other => Err(ConvertError::UnsupportedPipelineStep {
            stage: "post_processor",
            kind: other.to_string(),
        }),
    }
}

/// `["[CLS]", 101]` entries of Bert/Roberta processors
fn special_pair(post_processor: &Value, key: &str) -> Result<i32, ConvertError> {
    post_processor
        .get(key)
        .and_then(Value::as_array)
        .and_then(|pair| pair.get(1))
        .and_then(Value::as_i64)
        .map(|id| id as i32)
        .ok_or_else(|| ConvertError::malformed(format!("post processor has no '{}' token", key)))
}

fn added_token_count(segments: &[Segment]) -> usize {
    segments
        .iter()
        .map(|segment| match segment {
            Segment::Special { ids, .. } => ids.len(),
            Segment::Sequence { .. } => 0,
        })
        .sum()
}

fn build_encoder(
    pipeline: &Value,
    model: &Value,
    added: &AddedTokens,
    number_of_inputs: usize,
) -> Result<ModelArtifact, ConvertError> {
    let mut string_steps = Vec::new();
    if let Some(normalizer) = component(pipeline, "normalizer") {
        normalizer_steps(normalizer, &mut string_steps)?;
    }
    if let Some(pre_tokenizer) = component(pipeline, "pre_tokenizer") {
        pre_tokenizer_steps(pre_tokenizer, &mut string_steps)?;
    }
    let segments = match component(pipeline, "post_processor") {
        Some(post_processor) => template(post_processor, number_of_inputs)?,
        None => None,
    };
    if segments.is_none() && number_of_inputs > 1 {
        return Err(ConvertError::UnsupportedConfiguration { number_of_inputs });
    }
    debug!("Encoder pipeline: {} string steps, template {:?}", string_steps.len(), segments);

    let padding = component(pipeline, "padding");
    let pad_id = padding
        .and_then(|p| p.get("pad_id"))
        .and_then(Value::as_i64)
        .unwrap_or(0) as i32;
    let pad_right = padding.and_then(|p| str_field(p, "direction")) != Some("Left");

    let truncation = component(pipeline, "truncation");
    let max_length = truncation
        .and_then(|t| t.get("max_length"))
        .and_then(Value::as_i64)
        .map(|max| {
            let reserved = segments.as_deref().map(added_token_count).unwrap_or(0) as i64;
            (max - reserved).max(0) as i32
        });
    let truncate_left = truncation.and_then(|t| str_field(t, "direction")) == Some("Left");
    let truncation_strategy = match truncation.and_then(|t| str_field(t, "strategy")) {
        None | Some("LongestFirst") => "longest_first",
        Some("OnlyFirst") => "only_first",
        Some("OnlySecond") => "only_second",
        Some(other) => return Err(ConvertError::malformed(format!("unknown truncation strategy {}", other))),
    };

    let mut builder = GraphBuilder::new(ENCODER_NAME);
    let mut ragged_ids = Vec::with_capacity(number_of_inputs);
    for i in 0..number_of_inputs {
        let name = if number_of_inputs == 1 {
            STRING_INPUT.to_string()
        } else {
            format!("{}_{}", STRING_INPUT, i)
        };
        let input = builder.parameter(&name, ElementType::String, &[-1]);
        let unpacked = builder.op("StringTensorUnpack", &[input], 3, attrs([("mode", "begins_ends".into())]));
        let mut strings = Strings::plain(unpacked);

        if let Some(special) = added.special_pattern() {
            // split ports plus the skip flags
            let mut ports = builder.op(
                "SpecialTokensSplit",
                &strings.ports,
                6,
                attrs([("split_pattern", special.into())]),
            );
            let skips = ports.pop();
            strings = Strings { ports, skips };
        }
        for step in &string_steps {
            strings = step.emit(&mut builder, &strings);
        }
        ragged_ids.push(emit_model(&mut builder, model, added, &strings)?);
    }

    // One shared budget for all inputs, so a pair never exceeds max_length
    if let Some(max_length) = max_length {
        let direction = if truncate_left { "left" } else { "right" };
        let limit = builder.constant_i32("max_length", &[max_length]);
        let mut inputs: Vec<Output> = ragged_ids.concat();
        inputs.push(limit);
        let truncated = builder.op(
            "Truncate",
            &inputs,
            3 * number_of_inputs,
            attrs([("direction", direction.into()), ("strategy", truncation_strategy.into())]),
        );
        ragged_ids = truncated.chunks(3).map(<[Output]>::to_vec).collect();
    }

    let (ids, type_ids) = match &segments {
        Some(segments) => {
            let mut inputs = Vec::new();
            let mut segment_types = Vec::with_capacity(segments.len());
            for segment in segments {
                match segment {
                    Segment::Sequence { input, type_id } => {
                        let ragged = ragged_ids.get(*input).ok_or_else(|| {
                            ConvertError::malformed(format!("template uses input {} of {}", input, number_of_inputs))
                        })?;
                        inputs.extend_from_slice(ragged);
                        segment_types.push(*type_id as i32);
                    }
                    Segment::Special { ids, type_id } => {
                        let begins = builder.constant_i32("special_begins", &[0]);
                        let ends = builder.constant_i32("special_ends", &[ids.len() as i32]);
                        let data = builder.constant_i32("special_ids", ids);
                        inputs.extend([begins, ends, data]);
                        segment_types.push(*type_id as i32);
                    }
                }
            }
            let types = builder.constant_i32("segment_types", &segment_types);
            inputs.push(types);
            let combined = builder.op("CombineSegments", &inputs, 6, Attributes::new());
            let uses_types = segment_types.iter().any(|t| *t != 0);
            (combined[..3].to_vec(), uses_types.then(|| combined[3..].to_vec()))
        }
        None => (ragged_ids.swap_remove(0), None),
    };

    let lengths = builder.op1("Subtract", &[ids[1], ids[0]], Attributes::new());
    let max_len = builder.op1("ReduceMax", &[lengths], attrs([("keep_dims", false.into())]));
    let pad_value = builder.constant_i32("pad_value", &[pad_id]);
    let dense = builder.op(
        "RaggedToDense",
        &[ids[0], ids[1], ids[2], max_len, pad_value],
        2,
        attrs([("pad_right", pad_right.into())]),
    );
    let input_ids = builder.op1("Convert", &[dense[0]], attrs([("destination_type", "i64".into())]));
    let mask = builder.op1("Convert", &[dense[1]], attrs([("destination_type", "i64".into())]));
    builder.result(INPUT_IDS, input_ids, ElementType::I64);
    builder.result(ATTENTION_MASK, mask, ElementType::I64);

    if let Some(types) = type_ids {
        let zero = builder.constant_i32("type_pad_value", &[0]);
        let dense_types = builder.op(
            "RaggedToDense",
            &[types[0], types[1], types[2], max_len, zero],
            2,
            attrs([("pad_right", pad_right.into())]),
        );
        let token_types = builder.op1("Convert", &[dense_types[0]], attrs([("destination_type", "i64".into())]));
        builder.result(TOKEN_TYPE_IDS, token_types, ElementType::I64);
    }

    builder.rt_info("pad_token_id", pad_id as i64);
    builder.rt_info("number_of_inputs", number_of_inputs as i64);
    if let Some(max_length) = max_length {
        builder.rt_info("max_length", max_length as i64);
    }
    Ok(builder.build())
}

/// Decoder steps, split into the ones applied to single tokens and the ones
/// applied to the fused text.
#[derive(Debug, Default)]
struct DecoderSteps {
    tokens: Vec<Step>,
    text: Vec<Step>,
}

fn decoder_steps(decoder: &Value, steps: &mut DecoderSteps) -> Result<(), ConvertError> {
    match kind(decoder)? {
        "Sequence" => {
            for inner in array_field(decoder, "decoders")? {
                decoder_steps(inner, steps)?;
            }
        }
        "ByteLevel" => steps.tokens.push(Step::CharsToBytes),
        "ByteFallback" => steps.tokens.push(Step::ByteFallback),
        "Fuse" => {}
        "WordPiece" => {
            let prefix = str_field(decoder, "prefix").unwrap_or("##");
            steps.tokens.push(Step::replace("^", " "));
            steps.tokens.push(Step::replace(format!("^ {}", regex::escape(prefix)), ""));
            steps.text.push(Step::replace("^ ", ""));
            if bool_field(decoder, "cleanup", true) {
                steps.text.push(Step::replace(r" ([.,!?])", "$1"));
                steps.text.push(Step::replace(r" ('s|'m|'ve|'re|n't)", "$1"));
            }
        }
        "Metaspace" => {
            let replacement = str_field(decoder, "replacement").unwrap_or("▁");
            steps.text.push(Step::replace(regex::escape(replacement), " "));
            if metaspace_prepends(decoder) {
                steps.text.push(Step::replace("^ ", ""));
            }
        }
        "BPEDecoder" => {
            let suffix = str_field(decoder, "suffix").unwrap_or("</w>");
            steps.tokens.push(Step::replace(format!("{}$", regex::escape(suffix)), " "));
            steps.text.push(Step::replace(" $", ""));
        }
        "Replace" => {
            let search = pattern(decoder.get("pattern").unwrap_or(&Value::Null))?;
            let content = str_field(decoder, "content").unwrap_or("");
            steps.tokens.push(Step::replace(search, content));
        }
        "Strip" => {
            let content = regex::escape(str_field(decoder, "content").unwrap_or(" "));
            let start = decoder.get("start").and_then(Value::as_u64).unwrap_or(0);
            let stop = decoder.get("stop").and_then(Value::as_u64).unwrap_or(0);
            if start > 0 {
                steps.tokens.push(Step::replace(format!("^(?:{}){{1,{}}}", content, start), ""));
            }
            if stop > 0 {
                steps.tokens.push(Step::replace(format!("(?:{}){{1,{}}}$", content, stop), ""));
            }
        }
        other => {
            return Err(ConvertError::UnsupportedPipelineStep {
                stage: "decoder",
                kind: other.to_string(),
            });
        }
    }
    Ok(())
}

fn build_decoder(pipeline: &Value, model: &Value, added: &AddedTokens) -> Result<ModelArtifact, ConvertError> {
    let mut steps = DecoderSteps::default();
    if let Some(decoder) = component(pipeline, "decoder") {
        decoder_steps(decoder, &mut steps)?;
    }

    let mut tokens = model_vocab(model, added.tokens.len())?;
    for (id, content) in &added.tokens {
        if tokens.len() <= *id {
            tokens.resize(id + 1, String::new());
        }
        tokens[*id] = content.clone();
    }

    let mut builder = GraphBuilder::new(DECODER_NAME);
    let input_ids = builder.parameter(INPUT_IDS, ElementType::I64, &[-1, -1]);
    let vocab = builder.constant_strings("vocab", &tokens);
    let mut strings = Strings::plain(builder.op(
        "VocabDecoder",
        &[input_ids, vocab],
        5,
        attrs([("skip_tokens", added.special_ids().into())]),
    ));
    for step in &steps.tokens {
        strings = step.emit(&mut builder, &strings);
    }
    strings = Strings::plain(builder.op("FuseRagged", &strings.ports, 3, Attributes::new()));
    for step in &steps.text {
        strings = step.emit(&mut builder, &strings);
    }
    let packed = builder.op1("StringTensorPack", &strings.ports, attrs([("mode", "begins_ends".into())]));
    builder.result(STRING_OUTPUT, packed, ElementType::String);

    builder.rt_info("vocab_size", tokens.len() as i64);
    Ok(builder.build())
}
