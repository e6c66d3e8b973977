use log::{debug, warn};
use sentencepiece::SentencePieceProcessor;

use super::{
    ATTENTION_MASK, Conversion, DECODER_NAME, ENCODER_NAME, INPUT_IDS, STRING_INPUT, STRING_OUTPUT,
    SentencePieceConverter,
};
use crate::core::{ElementType, GraphBuilder, ModelArtifact, attrs};
use crate::error::ConvertError;
use crate::tokenizer::TokenizerHandle;
use crate::tokenizer::hf::{HfTokenizer, SENTENCEPIECE_MODEL_FILE};

/// Builds graphs around the serialized SentencePiece model of an [`HfTokenizer`].
#[derive(Debug, Default, Clone, Copy)]
pub struct SentencePieceModelConverter;

/// Special token ids read from the model itself
#[derive(Debug, Clone, Copy, PartialEq)]
struct ModelIds {
    vocab_size: usize,
    unk: u32,
    bos: Option<u32>,
    eos: Option<u32>,
    pad: Option<u32>,
}

impl ModelIds {
    fn read(processor: &SentencePieceProcessor) -> Self {
        Self {
            vocab_size: processor.len(),
            unk: processor.unk_id(),
            bos: processor.bos_id(),
            eos: processor.eos_id(),
            pad: processor.pad_id(),
        }
    }

    fn annotate(&self, builder: &mut GraphBuilder) {
        builder.rt_info("vocab_size", self.vocab_size as i64);
        builder.rt_info("unk_token_id", self.unk as i64);
        if let Some(bos) = self.bos {
            builder.rt_info("bos_token_id", bos as i64);
        }
        if let Some(eos) = self.eos {
            builder.rt_info("eos_token_id", eos as i64);
        }
        if let Some(pad) = self.pad {
            builder.rt_info("pad_token_id", pad as i64);
        }
    }
}

impl SentencePieceConverter for SentencePieceModelConverter {
    fn convert(
        &self,
        handle: &dyn TokenizerHandle,
        add_attention_mask: bool,
        with_decoder: bool,
        streaming_decoder: bool,
    ) -> Result<Conversion, ConvertError> {
        let missing = || ConvertError::MissingResource {
            type_name: handle.type_name().to_string(),
            resource: SENTENCEPIECE_MODEL_FILE,
        };
        let tokenizer = handle.as_any().downcast_ref::<HfTokenizer>().ok_or_else(missing)?;
        let proto = tokenizer.sentencepiece_proto().ok_or_else(missing)?;
        let ids = ModelIds::read(&SentencePieceProcessor::from_serialized_proto(proto)?);

        let config = tokenizer.config();
        let add_bos = config.add_bos_token.unwrap_or(false);
        let add_eos = config.add_eos_token.unwrap_or(false);
        if add_bos && ids.bos.is_none() {
            warn!("add_bos_token is set but the SentencePiece model defines no BOS piece");
        }
        if add_eos && ids.eos.is_none() {
            warn!("add_eos_token is set but the SentencePiece model defines no EOS piece");
        }
        debug!(
            "SentencePiece model: {} pieces, add_bos={}, add_eos={}",
            ids.vocab_size, add_bos, add_eos
        );

        let mut encoder = build_encoder(proto, &ids, add_bos, add_eos, add_attention_mask);
        encoder.rt_info.extend(config.rt_info());
        if !with_decoder {
            if streaming_decoder {
                debug!("streaming_decoder has no effect without with_decoder");
            }
            return Ok(Conversion::Encoder(encoder));
        }
        let mut decoder = build_decoder(proto, &ids, streaming_decoder);
        decoder.rt_info.extend(config.rt_info());
        Ok(Conversion::WithDecoder(encoder, decoder))
    }
}

fn build_encoder(
    proto: &[u8],
    ids: &ModelIds,
    add_bos: bool,
    add_eos: bool,
    add_attention_mask: bool,
) -> ModelArtifact {
    let mut builder = GraphBuilder::new(ENCODER_NAME);
    let input = builder.parameter(STRING_INPUT, ElementType::String, &[-1]);
    let sp_model = builder.constant("sp_model", ElementType::U8, &[proto.len() as i64], proto.to_vec());

    // sparse indices, sparse values, dense shape
    let sparse = builder.op(
        "SentencepieceTokenizer",
        &[sp_model, input],
        3,
        attrs([
            ("nbest_size", 0i64.into()),
            ("alpha", 0.0f64.into()),
            ("add_bos", add_bos.into()),
            ("add_eos", add_eos.into()),
            ("reverse", false.into()),
        ]),
    );

    let pad_value = builder.constant_i32("pad_value", &[ids.pad.unwrap_or(0) as i32]);
    let dense = builder.op1("SparseToDense", &[sparse[0], sparse[2], sparse[1], pad_value], attrs([]));
    let input_ids = builder.op1("Convert", &[dense], attrs([("destination_type", "i64".into())]));
    builder.result(INPUT_IDS, input_ids, ElementType::I64);

    if add_attention_mask {
        let one = builder.constant_i32("mask_value", &[1]);
        let zero = builder.constant_i32("mask_padding", &[0]);
        let mask = builder.op1(
            "SparseToDense",
            &[sparse[0], sparse[2], one, zero],
            attrs([("broadcast_values", true.into())]),
        );
        let mask = builder.op1("Convert", &[mask], attrs([("destination_type", "i64".into())]));
        builder.result(ATTENTION_MASK, mask, ElementType::I64);
    }

    ids.annotate(&mut builder);
    builder.rt_info("add_bos_token", add_bos);
    builder.rt_info("add_eos_token", add_eos);
    builder.build()
}

fn build_decoder(proto: &[u8], ids: &ModelIds, streaming: bool) -> ModelArtifact {
    let mut builder = GraphBuilder::new(DECODER_NAME);
    let input_ids = builder.parameter(INPUT_IDS, ElementType::I64, &[-1, -1]);
    let sp_model = builder.constant("sp_model", ElementType::U8, &[proto.len() as i64], proto.to_vec());
    let ids32 = builder.op1("Convert", &[input_ids], attrs([("destination_type", "i32".into())]));

    let op = if streaming {
        "SentencepieceStreamDetokenizer"
    } else {
        "SentencepieceDetokenizer"
    };
    let strings = builder.op(op, &[sp_model, ids32], 3, attrs([]));
    let packed = builder.op1("StringTensorPack", &strings, attrs([("mode", "begins_ends".into())]));
    builder.result(STRING_OUTPUT, packed, ElementType::String);

    ids.annotate(&mut builder);
    builder.rt_info("streaming_decoder", streaming);
    builder.build()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::convert::{ConversionOptions, convert_tokenizer};
    use crate::core::AttributeValue;
    use crate::test_fixtures::{bpe_pipeline, sentencepiece_proto};
    use crate::tokenizer::TokenizerConfig;

    fn sp_tokenizer() -> HfTokenizer {
        HfTokenizer::from_sentencepiece_proto("fixture", sentencepiece_proto()).unwrap()
    }

    #[test]
    fn test_encoder_graph() {
        let result = SentencePieceModelConverter
            .convert(&sp_tokenizer(), true, false, false)
            .unwrap();
        let encoder = match result {
            Conversion::Encoder(encoder) => encoder,
            other => panic!("expected a single artifact, got {:?}", other),
        };

        assert_eq!(encoder.name, ENCODER_NAME);
        assert_eq!(encoder.input_names(), vec![STRING_INPUT]);
        assert_eq!(encoder.output_names(), vec![INPUT_IDS, ATTENTION_MASK]);
        assert_eq!(
            encoder.op_sequence(),
            vec!["SentencepieceTokenizer", "SparseToDense", "Convert", "SparseToDense", "Convert"]
        );

        let tokenizer_node = encoder.find_node("SentencepieceTokenizer").unwrap();
        assert_eq!(tokenizer_node.attribute("add_bos"), Some(&AttributeValue::Bool(false)));
        assert_eq!(tokenizer_node.attribute("nbest_size"), Some(&AttributeValue::Int(0)));
        let model = encoder.constant_input(tokenizer_node, 0).unwrap();
        assert_eq!(model.data, sentencepiece_proto());

        assert_eq!(encoder.rt_info.get("vocab_size"), Some(&AttributeValue::Int(13)));
        assert_eq!(encoder.rt_info.get("bos_token_id"), Some(&AttributeValue::Int(1)));
        assert_eq!(encoder.rt_info.get("eos_token_id"), Some(&AttributeValue::Int(2)));
        assert_eq!(encoder.rt_info.get("unk_token_id"), Some(&AttributeValue::Int(0)));
    }

    #[test]
    fn test_attention_mask_is_optional() {
        let result = SentencePieceModelConverter
            .convert(&sp_tokenizer(), false, false, false)
            .unwrap();
        assert_eq!(result.encoder().output_names(), vec![INPUT_IDS]);
    }

    #[test]
    fn test_bos_eos_follow_config() {
        let config = TokenizerConfig {
            add_bos_token: Some(true),
            add_eos_token: Some(true),
            ..TokenizerConfig::default()
        };
        let tokenizer = sp_tokenizer().with_config(config);
        let result = SentencePieceModelConverter.convert(&tokenizer, true, false, false).unwrap();

        let node = result.encoder().find_node("SentencepieceTokenizer").unwrap();
        assert_eq!(node.attribute("add_bos"), Some(&AttributeValue::Bool(true)));
        assert_eq!(node.attribute("add_eos"), Some(&AttributeValue::Bool(true)));
    }

    #[test]
    fn test_config_tokens_reach_rt_info() {
        let config: TokenizerConfig = serde_json::from_str(
            r#"{"pad_token": "<unk>", "unk_token": {"content": "<unk>"}, "model_max_length": 2048}"#,
        )
        .unwrap();
        let tokenizer = sp_tokenizer().with_config(config);
        let result = SentencePieceModelConverter.convert(&tokenizer, true, true, false).unwrap();

        for artifact in [result.encoder(), result.decoder().unwrap()] {
            assert_eq!(artifact.rt_info.get("pad_token"), Some(&AttributeValue::String("<unk>".into())));
            assert_eq!(artifact.rt_info.get("unk_token"), Some(&AttributeValue::String("<unk>".into())));
            assert_eq!(artifact.rt_info.get("model_max_length"), Some(&AttributeValue::Int(2048)));
        }
        // ids read from the model stay alongside
        assert_eq!(result.encoder().rt_info.get("unk_token_id"), Some(&AttributeValue::Int(0)));
    }

    #[test]
    fn test_decoder_variants() {
        let tokenizer = sp_tokenizer();

        let regular = SentencePieceModelConverter.convert(&tokenizer, true, true, false).unwrap();
        let decoder = regular.decoder().unwrap();
        assert_eq!(decoder.name, DECODER_NAME);
        assert_eq!(decoder.input_names(), vec![INPUT_IDS]);
        assert_eq!(decoder.output_names(), vec![STRING_OUTPUT]);
        assert_eq!(decoder.op_sequence(), vec!["Convert", "SentencepieceDetokenizer", "StringTensorPack"]);

        let streaming = SentencePieceModelConverter.convert(&tokenizer, true, true, true).unwrap();
        let decoder = streaming.decoder().unwrap();
        assert!(decoder.find_node("SentencepieceStreamDetokenizer").is_some());
        assert!(decoder.find_node("SentencepieceDetokenizer").is_none());
        assert_eq!(decoder.rt_info.get("streaming_decoder"), Some(&AttributeValue::Bool(true)));
    }

    #[test]
    fn test_streaming_without_decoder_is_ignored() {
        let result = SentencePieceModelConverter
            .convert(&sp_tokenizer(), true, false, true)
            .unwrap();
        assert!(matches!(result, Conversion::Encoder(_)));
    }

    #[test]
    fn test_handles_without_model_are_rejected() {
        let fast_only = HfTokenizer::from_pipeline("fast", bpe_pipeline());
        let result = SentencePieceModelConverter.convert(&fast_only, true, false, false);
        assert!(matches!(result, Err(ConvertError::MissingResource { resource: SENTENCEPIECE_MODEL_FILE, .. })));

        let result = SentencePieceModelConverter.convert(&42u32, true, false, false);
        match result {
            Err(ConvertError::MissingResource { type_name, .. }) => assert_eq!(type_name, "u32"),
            other => panic!("unexpected result {:?}", other),
        }
    }

    #[test]
    fn test_default_wiring_end_to_end() {
        let options = ConversionOptions::default().with_decoder(true).streaming_decoder(true);
        let result = convert_tokenizer(&sp_tokenizer(), &options).unwrap();

        let (encoder, decoder) = result.into_parts();
        assert_eq!(encoder.output_names(), vec![INPUT_IDS, ATTENTION_MASK]);
        assert!(decoder.unwrap().find_node("SentencepieceStreamDetokenizer").is_some());
    }
}
