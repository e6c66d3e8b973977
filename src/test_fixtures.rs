//! Shared test fixtures: a hand-encoded SentencePiece model proto and a small
//! BPE fast pipeline.

use std::path::PathBuf;
use std::str::FromStr;

use tokenizers::Tokenizer;

const NORMAL: u64 = 1;
const UNKNOWN: u64 = 2;
const CONTROL: u64 = 3;

fn varint(mut value: u64, out: &mut Vec<u8>) {
    while value >= 0x80 {
        out.push((value as u8 & 0x7f) | 0x80);
        value >>= 7;
    }
    out.push(value as u8);
}

fn length_delimited(field: u64, payload: &[u8], out: &mut Vec<u8>) {
    varint((field << 3) | 2, out);
    varint(payload.len() as u64, out);
    out.extend_from_slice(payload);
}

fn piece(text: &str, score: f32, kind: u64) -> Vec<u8> {
    let mut msg = Vec::new();
    length_delimited(1, text.as_bytes(), &mut msg);
    varint((2 << 3) | 5, &mut msg);
    msg.extend_from_slice(&score.to_le_bytes());
    varint(3 << 3, &mut msg);
    varint(kind, &mut msg);
    msg
}

/// Unigram model with `<unk>`, `<s>`, `</s>` at ids 0, 1, 2.
pub fn sentencepiece_proto() -> Vec<u8> {
    let mut pieces = vec![
        piece("<unk>", 0.0, UNKNOWN),
        piece("<s>", 0.0, CONTROL),
        piece("</s>", 0.0, CONTROL),
        piece("▁hello", -1.0, NORMAL),
        piece("▁world", -2.0, NORMAL),
        piece("▁", -3.0, NORMAL),
    ];
    for (idx, ch) in ["h", "e", "l", "o", "w", "r", "d"].iter().enumerate() {
        pieces.push(piece(ch, -5.0 - idx as f32, NORMAL));
    }

    let mut proto = Vec::new();
    for p in &pieces {
        length_delimited(1, p, &mut proto);
    }

    // trainer_spec { model_type: UNIGRAM }
    let mut trainer = Vec::new();
    varint(3 << 3, &mut trainer);
    varint(1, &mut trainer);
    length_delimited(2, &trainer, &mut proto);

    // normalizer_spec { name: "identity" }
    let mut normalizer = Vec::new();
    length_delimited(1, b"identity", &mut normalizer);
    length_delimited(3, &normalizer, &mut proto);

    proto
}

/// Lowercase + Whitespace + BPE + BertProcessing, `[CLS]` = 9, `[SEP]` = 10.
pub fn bpe_pipeline() -> Tokenizer {
    let pipeline = r#"{
        "version": "1.0",
        "truncation": null,
        "padding": null,
        "added_tokens": [],
        "normalizer": {"type": "Lowercase"},
        "pre_tokenizer": {"type": "Whitespace"},
        "post_processor": {"type": "BertProcessing", "sep": ["[SEP]", 10], "cls": ["[CLS]", 9]},
        "decoder": null,
        "model": {
            "type": "BPE",
            "dropout": null,
            "unk_token": "[UNK]",
            "continuing_subword_prefix": null,
            "end_of_word_suffix": null,
            "fuse_unk": false,
            "byte_fallback": false,
            "vocab": {
                "[UNK]": 0, "h": 1, "e": 2, "l": 3, "o": 4, "he": 5,
                "ll": 6, "hell": 7, "hello": 8, "[CLS]": 9, "[SEP]": 10
            },
            "merges": ["h e", "l l", "he ll", "hell o"]
        }
    }"#;
    Tokenizer::from_str(pipeline).unwrap()
}

pub fn temp_dir(tag: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("tokenizer_converter_{}_{}", tag, std::process::id()));
    if dir.exists() {
        std::fs::remove_dir_all(&dir).unwrap();
    }
    std::fs::create_dir_all(&dir).unwrap();
    dir
}

pub fn init_logger() {
    let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("debug"))
        .is_test(true)
        .try_init();
}
