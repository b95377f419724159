//! The phoneme table and the ID lookups the training framework calls. The framework embeds the
//! IDs into checkpoints so once a model has been trained against this table the position of every
//! symbol is fixed forever. New symbols can only ever be appended.
//!
//! Piper traditionally had two tables, one for espeak phonemes and one for raw codepoints. We only
//! ship one and both lookups resolve to it.
use once_cell::sync::Lazy;
use std::collections::BTreeMap;
use tracing::trace;

/// The integer ID type the framework feeds into its embedding layer
pub type PhonemeId = i64;

/// Tally of symbols seen during ID lookup that aren't in the table. The caller creates one per
/// preprocessing run and reports it once done.
pub type MissingPhonemes = BTreeMap<char, usize>;

/// Pad symbol the framework passes through by default.
pub const DEFAULT_PAD: char = '_';

/// The vocabulary size the framework should allocate its embedding for. Larger than the table so
/// models keep working if the table grows.
pub const MAX_PHONEMES: usize = 600;

/// Declaration order is the ID assignment. Don't reorder!
const ESPEAK_SYMBOLS: [char; 105] = [
    // Padding, sentence start/end and punctuation
    '_', '^', '$', ' ', '!', '\'', '(', ')', ',', '-', '.', ':', ';', '?',
    // Latin letters (g lives at the end of the table)
    'a', 'b', 'c', 'd', 'e', 'f', 'h', 'i', 'j', 'k', 'l', 'm', 'n', 'o', 'p', 'q', 'r', 's',
    't', 'u', 'v', 'w', 'x', 'y', 'z',
    // IPA
    '\u{00e6}', '\u{00e7}', '\u{00f0}', '\u{00f8}', '\u{014b}', '\u{0153}', '\u{0250}',
    '\u{0251}', '\u{0252}', '\u{0254}', '\u{0255}', '\u{0256}', '\u{0259}', '\u{025a}',
    '\u{025b}', '\u{025c}', '\u{025d}', '\u{025f}', '\u{0261}', '\u{0263}', '\u{026a}',
    '\u{026b}', '\u{026c}', '\u{026d}', '\u{026f}', '\u{0272}', '\u{0273}', '\u{0274}',
    '\u{0279}', '\u{027b}', '\u{027e}', '\u{0280}', '\u{0281}', '\u{0283}', '\u{0288}',
    '\u{0289}', '\u{028a}', '\u{028b}', '\u{028c}', '\u{028e}', '\u{028f}', '\u{0291}',
    '\u{0292}', '\u{0294}', '\u{0295}', '\u{0299}', '\u{029d}', '\u{03b2}', '\u{03b8}',
    '\u{03c7}', '\u{1d7b}', '\u{2c71}', '\u{0264}', '\u{0275}', '\u{0278}',
    // Stress and length marks
    '\u{02c8}', '\u{02cc}', '\u{02d0}',
    // Combining diacritics
    '\u{0303}', '\u{0329}', '\u{032a}', '\u{032f}', '\u{033a}', '\u{033b}',
    // Appended after the initial release
    '\u{02d1}', 'g',
];

static ESPEAK_TABLE: Lazy<PhonemeTable> = Lazy::new(|| PhonemeTable::new(&ESPEAK_SYMBOLS));

/// An ordered list of symbols where the index of each symbol is its ID.
#[derive(Debug)]
pub struct PhonemeTable {
    symbols: &'static [char],
    ids: BTreeMap<char, PhonemeId>,
}

impl PhonemeTable {
    fn new(symbols: &'static [char]) -> Self {
        let ids = symbols
            .iter()
            .enumerate()
            .map(|(i, s)| (*s, i as PhonemeId))
            .collect();
        Self { symbols, ids }
    }

    /// The process-wide espeak table, built on first use.
    pub fn espeak() -> &'static Self {
        &ESPEAK_TABLE
    }

    /// Symbols in ID order
    pub fn symbols(&self) -> &[char] {
        self.symbols
    }

    pub fn len(&self) -> usize {
        self.symbols.len()
    }

    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }

    pub fn id(&self, symbol: char) -> Option<PhonemeId> {
        self.ids.get(&symbol).copied()
    }

    pub fn map(&self) -> &BTreeMap<char, PhonemeId> {
        &self.ids
    }

    /// Maps every symbol in order. Symbols missing from the table are tallied in `missing` if a
    /// counter is given and never appear in the output.
    pub fn to_ids<'a>(
        &self,
        symbols: impl IntoIterator<Item = &'a char>,
        mut missing: Option<&mut MissingPhonemes>,
    ) -> Vec<PhonemeId> {
        let mut ids = vec![];
        for symbol in symbols {
            match self.id(*symbol) {
                Some(id) => ids.push(id),
                None => {
                    trace!("No ID for {:?}", symbol);
                    if let Some(missing) = missing.as_deref_mut() {
                        *missing.entry(*symbol).or_insert(0) += 1;
                    }
                }
            }
        }
        ids
    }
}

/// Converts phonemes into IDs with the espeak table.
///
/// `_pad` is part of the interface the framework calls but unknown symbols are dropped rather
/// than replaced with it. Existing checkpoints were preprocessed with the dropping behaviour so
/// it stays.
pub fn phoneme_ids_espeak(
    phonemes: &[Vec<char>],
    missing: Option<&mut MissingPhonemes>,
    _pad: char,
) -> Vec<PhonemeId> {
    PhonemeTable::espeak().to_ids(phonemes.iter().flatten(), missing)
}

/// Converts codepoints into IDs. Behaves exactly like [`phoneme_ids_espeak`], including ignoring
/// `_pad`.
pub fn phoneme_ids_codepoints(
    codepoints: &[Vec<char>],
    missing: Option<&mut MissingPhonemes>,
    _pad: char,
) -> Vec<PhonemeId> {
    let table = PhonemeTable::espeak();
    table.to_ids(codepoints.iter().flatten(), missing)
}

pub fn get_espeak_map() -> &'static BTreeMap<char, PhonemeId> {
    PhonemeTable::espeak().map()
}

/// There's no separate codepoint table, this is the espeak map.
pub fn get_codepoints_map() -> &'static BTreeMap<char, PhonemeId> {
    get_espeak_map()
}

pub fn get_max_phonemes() -> usize {
    MAX_PHONEMES
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn map_matches_declaration_order() {
        let map = get_espeak_map();
        assert_eq!(map.len(), ESPEAK_SYMBOLS.len());
        for (i, symbol) in ESPEAK_SYMBOLS.iter().enumerate() {
            assert_eq!(map[symbol], i as PhonemeId);
        }

        // Fixed points that trained models rely on
        assert_eq!(map[&'_'], 0);
        assert_eq!(map[&' '], 3);
        assert_eq!(map[&'a'], 14);
        assert_eq!(map[&'\u{02c8}'], 94);
        assert_eq!(map[&'g'], 104);

        assert!(std::ptr::eq(get_espeak_map(), map));
    }

    #[test]
    fn codepoints_map_is_espeak_map() {
        assert_eq!(get_codepoints_map(), get_espeak_map());
    }

    #[test]
    fn known_symbols_are_never_dropped() {
        let phonemes = vec!["ola ".chars().collect(), "ˈmundo.".chars().collect::<Vec<_>>()];
        let mut missing = MissingPhonemes::new();
        let ids = phoneme_ids_espeak(&phonemes, Some(&mut missing), DEFAULT_PAD);

        assert_eq!(ids.len(), 11);
        assert!(missing.is_empty());
        assert_eq!(&ids[..4], &[27, 24, 14, 3]);
    }

    #[test]
    fn unknown_symbols_are_counted_and_dropped() {
        let phonemes = vec![vec!['a', '∅', 'b']];
        let mut missing = MissingPhonemes::new();
        let ids = phoneme_ids_espeak(&phonemes, Some(&mut missing), DEFAULT_PAD);

        assert_eq!(ids, vec![14, 15]);
        assert_eq!(missing.get(&'∅'), Some(&1));

        let ids = phoneme_ids_codepoints(&phonemes, Some(&mut missing), DEFAULT_PAD);
        assert_eq!(ids, vec![14, 15]);
        assert_eq!(missing.get(&'∅'), Some(&2));

        // Without a counter they're still dropped
        let ids = phoneme_ids_espeak(&phonemes, None, DEFAULT_PAD);
        assert_eq!(ids, vec![14, 15]);
    }

    #[test]
    fn pad_is_not_inserted() {
        let phonemes = vec![vec!['∅']];
        assert!(phoneme_ids_espeak(&phonemes, None, 'a').is_empty());
    }

    #[test]
    fn empty_input() {
        assert!(phoneme_ids_espeak(&[], None, DEFAULT_PAD).is_empty());
        assert!(phoneme_ids_codepoints(&[vec![]], None, DEFAULT_PAD).is_empty());
    }

    #[test]
    fn max_phonemes_fits_table() {
        assert_eq!(get_max_phonemes(), 600);
        assert!(PhonemeTable::espeak().len() < get_max_phonemes());
    }
}
