//! Checks how well the phoneme table covers a dataset before spending GPU hours on it. Anything
//! reported as missing is silently dropped by preprocessing.
use super::Utterance;
use crate::phonemes::*;
use crate::phonemize::Phonemizer;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::info;

#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoverageReport {
    pub utterances: usize,
    /// How often each table symbol was used
    pub symbols: BTreeMap<String, usize>,
    /// Symbols that aren't in the table and will be dropped
    pub missing: BTreeMap<String, usize>,
    /// Number of IDs per utterance -> number of utterances with that length
    pub lengths: BTreeMap<usize, usize>,
    /// Utterances with more IDs than the model allocates for
    pub too_long: Vec<String>,
}

impl CoverageReport {
    /// Fraction of phonemes that made it through to IDs
    pub fn coverage(&self) -> f64 {
        let found: usize = self.symbols.values().sum();
        let missing: usize = self.missing.values().sum();
        if found + missing == 0 {
            1.0
        } else {
            found as f64 / (found + missing) as f64
        }
    }
}

pub struct CoverageAnalytics {
    phonemizer: Box<dyn Phonemizer>,
    utterances: usize,
    symbols: BTreeMap<char, usize>,
    missing: MissingPhonemes,
    lengths: BTreeMap<usize, usize>,
    too_long: Vec<String>,
}

impl CoverageAnalytics {
    pub fn new(phonemizer: Box<dyn Phonemizer>) -> Self {
        Self {
            phonemizer,
            utterances: 0,
            symbols: BTreeMap::new(),
            missing: MissingPhonemes::new(),
            lengths: BTreeMap::new(),
            too_long: vec![],
        }
    }

    pub fn push_utterance(&mut self, utterance: &Utterance) {
        let phonemes = self.phonemizer.phonemize(&utterance.text);
        let table = PhonemeTable::espeak();
        for symbol in phonemes.iter().flatten() {
            if table.id(*symbol).is_some() {
                *self.symbols.entry(*symbol).or_default() += 1;
            }
        }
        let ids = phoneme_ids_espeak(&phonemes, Some(&mut self.missing), DEFAULT_PAD);
        *self.lengths.entry(ids.len()).or_default() += 1;
        if ids.len() > get_max_phonemes() {
            info!("Very long utterance found: {} ({} ids)", utterance.id, ids.len());
            self.too_long.push(utterance.id.clone());
        }
        self.utterances += 1;
    }

    pub fn generate_report(&self) -> CoverageReport {
        CoverageReport {
            utterances: self.utterances,
            symbols: self
                .symbols
                .iter()
                .map(|(k, v)| (k.to_string(), *v))
                .collect(),
            missing: self
                .missing
                .iter()
                .map(|(k, v)| (k.to_string(), *v))
                .collect(),
            lengths: self.lengths.clone(),
            too_long: self.too_long.clone(),
        }
    }
}
