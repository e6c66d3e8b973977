use std::path::PathBuf;

use clap::Parser;
use log::info;

use tokenizer_converter::{ConversionOptions, ConvertError, HfTokenizer, convert_tokenizer};

/// Convert a Hugging Face tokenizer directory into tokenizer/detokenizer artifacts
#[derive(Parser, Debug)]
#[command(version, about)]
struct Args {
    /// Directory holding tokenizer.model and/or tokenizer.json
    tokenizer_dir: PathBuf,

    /// Where the .json/.bin artifacts are written
    #[arg(short, long, default_value = ".")]
    output_dir: PathBuf,

    /// JSON file with conversion options; flags below override it
    #[arg(long)]
    options: Option<PathBuf>,

    #[arg(long)]
    with_decoder: bool,

    /// Incremental decoder (SentencePiece tokenizers only)
    #[arg(long)]
    streaming_decoder: bool,

    #[arg(long)]
    number_of_inputs: Option<usize>,
}

/// Options file values, overridden by any flag given on the command line
fn resolve_options(args: &Args) -> Result<ConversionOptions, ConvertError> {
    let mut options = match &args.options {
        Some(path) => ConversionOptions::from_file(path)?,
        None => ConversionOptions::default(),
    };
    if args.with_decoder {
        options.with_decoder = true;
    }
    if args.streaming_decoder {
        options.streaming_decoder = true;
    }
    if let Some(n) = args.number_of_inputs {
        options.number_of_inputs = n;
    }
    Ok(options)
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();
    let options = resolve_options(&args)?;

    let tokenizer = HfTokenizer::from_pretrained(&args.tokenizer_dir)?;
    let (encoder, decoder) = convert_tokenizer(&tokenizer, &options)?.into_parts();

    std::fs::create_dir_all(&args.output_dir)?;
    let path = encoder.save(&args.output_dir)?;
    info!("Saved encoder to {}", path.display());
    if let Some(decoder) = decoder {
        let path = decoder.save(&args.output_dir)?;
        info!("Saved decoder to {}", path.display());
    }
    Ok(())
}
