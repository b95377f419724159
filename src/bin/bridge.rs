use clap::{Parser, Subcommand};
use piper_bridge::phonemes::*;
use piper_bridge::phonemize::*;
use std::collections::BTreeMap;
use std::time::Duration;

/// Phonemize text and look up phoneme IDs the same way piper_train will
#[derive(Parser, Debug)]
pub struct Args {
    #[clap(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the phonemes for some text, one sentence per line
    Phonemize(PhonemizeArgs),
    /// Print the phoneme IDs for some text
    Ids(PhonemizeArgs),
    /// Print the phoneme table as JSON
    Map,
}

#[derive(clap::Args, Debug)]
struct PhonemizeArgs {
    /// Text to phonemize
    text: String,
    /// espeak-ng voice
    #[clap(long, short, default_value = "es")]
    voice: String,
    #[clap(long, value_enum, default_value_t = PhonemeType::Espeak)]
    phoneme_type: PhonemeType,
    /// Phonemizer program, i.e. espeak on systems without espeak-ng
    #[clap(long, default_value = ESPEAK_PROGRAM)]
    program: String,
    #[clap(long, default_value_t = 10_000)]
    timeout_ms: u64,
}

impl PhonemizeArgs {
    fn phonemize(&self) -> Vec<Sentence> {
        let text = tashkeel_run(&self.text);
        match self.phoneme_type {
            PhonemeType::Espeak => EspeakPhonemizer::new(&self.voice)
                .with_program(&self.program)
                .with_timeout(Duration::from_millis(self.timeout_ms))
                .phonemize(&text),
            PhonemeType::Text => phonemize_codepoints(&text),
        }
    }
}

fn main() -> anyhow::Result<()> {
    piper_bridge::setup_logging();
    let args = Args::parse();

    match args.command {
        Command::Phonemize(args) => {
            for sentence in args.phonemize() {
                println!("{}", sentence.iter().collect::<String>());
            }
        }
        Command::Ids(args) => {
            let sentences = args.phonemize();
            let mut missing = MissingPhonemes::new();
            let ids = match args.phoneme_type {
                PhonemeType::Espeak => {
                    phoneme_ids_espeak(&sentences, Some(&mut missing), DEFAULT_PAD)
                }
                PhonemeType::Text => {
                    phoneme_ids_codepoints(&sentences, Some(&mut missing), DEFAULT_PAD)
                }
            };
            println!("{}", serde_json::to_string(&ids)?);
            if !missing.is_empty() {
                eprintln!("Missing: {:?}", missing);
            }
        }
        Command::Map => {
            let map = get_espeak_map()
                .iter()
                .map(|(k, v)| (k.to_string(), *v))
                .collect::<BTreeMap<_, _>>();
            println!("{}", serde_json::to_string_pretty(&map)?);
            eprintln!("max phonemes: {}", get_max_phonemes());
        }
    }
    Ok(())
}
