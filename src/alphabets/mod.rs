use std::fmt::Display;

use lazy_static::lazy_static;

pub static NUCLEOTIDES: &[u8] = b"ACGT";
pub static AMB_NUCLEOTIDES: &[u8] = b"RYSWKMBDHVNZX";
pub static POSSIBLE_GAPS: &[u8] = b"-.";
pub static GAP: u8 = b'-';

/// Number of symbols every node of a network is distributed over.
pub const ALPHABET_SIZE: usize = 4;

/// Symbol index marking a node as unobserved. Any index at or above the alphabet size
/// is treated the same way.
pub const GAP_INDEX: usize = ALPHABET_SIZE;

#[derive(Debug, PartialEq)]
pub struct Alphabet {
    symbols: &'static [u8],
    ambiguous: &'static [u8],
    index: &'static [usize; 256],
}

impl Display for Alphabet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "DNA alphabet: {}",
            String::from_utf8_lossy(self.symbols)
        )
    }
}

impl Alphabet {
    pub fn is_word(&self, word: &[u8]) -> bool {
        word.to_ascii_uppercase().iter().all(|c| {
            self.symbols.contains(c) | self.ambiguous.contains(c) | POSSIBLE_GAPS.contains(c)
        })
    }

    pub fn size(&self) -> usize {
        self.symbols.len()
    }

    pub fn symbols(&self) -> &[u8] {
        self.symbols
    }

    /// Index of the character in the alphabet, or [`GAP_INDEX`] for gaps, ambiguity codes
    /// and anything else that is not a plain nucleotide.
    pub fn symbol_index(&self, char: u8) -> usize {
        self.index[char as usize]
    }

    pub fn symbol(&self, index: usize) -> u8 {
        if index < self.symbols.len() {
            self.symbols[index]
        } else {
            GAP
        }
    }

    pub fn encode(&self, word: &[u8]) -> Vec<usize> {
        word.iter().map(|&c| self.symbol_index(c)).collect()
    }

    pub fn decode(&self, indices: &[usize]) -> Vec<u8> {
        indices.iter().map(|&i| self.symbol(i)).collect()
    }
}

pub fn dna_alphabet() -> Alphabet {
    Alphabet {
        symbols: NUCLEOTIDES,
        ambiguous: AMB_NUCLEOTIDES,
        index: &NUCLEOTIDE_INDEX,
    }
}

pub fn is_observed(symbol: usize, alphabet_size: usize) -> bool {
    symbol < alphabet_size
}

lazy_static! {
    pub static ref NUCLEOTIDE_INDEX: [usize; 256] = {
        let mut index = [GAP_INDEX; 256];
        for (i, char) in NUCLEOTIDES.iter().enumerate() {
            index[*char as usize] = i;
            index[(*char).to_ascii_lowercase() as usize] = i;
        }
        index
    };
}
