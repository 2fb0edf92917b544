//! Fixed-width sets of column bit positions.
//!
//! Every column of a star is addressed by a stable bit position derived
//! from schema column order. A `BitKey` is a set of such positions; two
//! bit keys of the same star are comparable. Trailing zero words are
//! ignored by equality, ordering, and hashing, so keys built with
//! different capacities still compare structurally.

use std::fmt;
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};

const BITS_PER_WORD: usize = 64;

/// A fixed-width set of column bit positions.
///
/// Supports the set algebra the batching pipeline needs: `and`, `or`,
/// `intersects`, `is_superset_of`, emptiness, and copying.
///
/// # Example
///
/// ```
/// use lattice_common::types::BitKey;
///
/// let mut a = BitKey::with_capacity(70);
/// a.set(1);
/// a.set(65);
/// let mut b = BitKey::with_capacity(70);
/// b.set(65);
/// assert!(a.is_superset_of(&b));
/// assert!(a.intersects(&b));
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BitKey {
    words: Vec<u64>,
}

impl BitKey {
    /// Creates an empty bit key able to hold positions `0..nbits`
    /// without reallocating.
    #[must_use]
    pub fn with_capacity(nbits: usize) -> Self {
        Self {
            words: vec![0; nbits.div_ceil(BITS_PER_WORD).max(1)],
        }
    }

    /// Creates an empty bit key.
    #[must_use]
    pub fn empty() -> Self {
        Self { words: vec![0] }
    }

    /// Creates a bit key from an iterator of set positions.
    #[must_use]
    pub fn from_positions<I: IntoIterator<Item = usize>>(positions: I) -> Self {
        let mut key = Self::empty();
        for pos in positions {
            key.set(pos);
        }
        key
    }

    /// Returns an empty bit key of the same width, for accumulating a
    /// related set of positions.
    #[must_use]
    pub fn empty_copy(&self) -> Self {
        Self {
            words: vec![0; self.words.len()],
        }
    }

    /// Sets the bit at `position`.
    pub fn set(&mut self, position: usize) {
        let word = position / BITS_PER_WORD;
        if word >= self.words.len() {
            self.words.resize(word + 1, 0);
        }
        self.words[word] |= 1u64 << (position % BITS_PER_WORD);
    }

    /// Clears the bit at `position`.
    pub fn clear(&mut self, position: usize) {
        let word = position / BITS_PER_WORD;
        if word < self.words.len() {
            self.words[word] &= !(1u64 << (position % BITS_PER_WORD));
        }
    }

    /// Returns whether the bit at `position` is set.
    #[must_use]
    pub fn get(&self, position: usize) -> bool {
        let word = position / BITS_PER_WORD;
        word < self.words.len() && self.words[word] & (1u64 << (position % BITS_PER_WORD)) != 0
    }

    /// Returns whether no bit is set.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.words.iter().all(|&w| w == 0)
    }

    /// Returns the number of set bits.
    #[must_use]
    pub fn cardinality(&self) -> usize {
        self.words.iter().map(|w| w.count_ones() as usize).sum()
    }

    /// Returns the intersection of two bit keys.
    #[must_use]
    pub fn and(&self, other: &Self) -> Self {
        let len = self.words.len().min(other.words.len());
        let words = (0..len).map(|i| self.words[i] & other.words[i]).collect();
        Self { words }
    }

    /// Returns the union of two bit keys.
    #[must_use]
    pub fn or(&self, other: &Self) -> Self {
        let len = self.words.len().max(other.words.len());
        let words = (0..len)
            .map(|i| {
                self.words.get(i).copied().unwrap_or(0) | other.words.get(i).copied().unwrap_or(0)
            })
            .collect();
        Self { words }
    }

    /// Returns whether the two keys share at least one set bit.
    #[must_use]
    pub fn intersects(&self, other: &Self) -> bool {
        self.words
            .iter()
            .zip(other.words.iter())
            .any(|(a, b)| a & b != 0)
    }

    /// Returns whether every bit set in `other` is also set in `self`.
    #[must_use]
    pub fn is_superset_of(&self, other: &Self) -> bool {
        for (i, &word) in other.words.iter().enumerate() {
            if self.words.get(i).copied().unwrap_or(0) & word != word {
                return false;
            }
        }
        true
    }

    /// Iterates over the set bit positions in ascending order.
    pub fn iter(&self) -> impl Iterator<Item = usize> + '_ {
        self.words.iter().enumerate().flat_map(|(wi, &word)| {
            (0..BITS_PER_WORD)
                .filter(move |bit| word & (1u64 << bit) != 0)
                .map(move |bit| wi * BITS_PER_WORD + bit)
        })
    }

    /// Index of the last non-zero word, used to ignore trailing zeros in
    /// comparisons.
    fn effective_len(&self) -> usize {
        self.words
            .iter()
            .rposition(|&w| w != 0)
            .map_or(0, |i| i + 1)
    }
}

impl PartialEq for BitKey {
    fn eq(&self, other: &Self) -> bool {
        let len = self.effective_len();
        len == other.effective_len() && self.words[..len] == other.words[..len]
    }
}

impl Eq for BitKey {}

impl Hash for BitKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        let len = self.effective_len();
        self.words[..len].hash(state);
    }
}

impl PartialOrd for BitKey {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for BitKey {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        let a_len = self.effective_len();
        let b_len = other.effective_len();
        a_len.cmp(&b_len).then_with(|| {
            for i in (0..a_len).rev() {
                let ord = self.words[i].cmp(&other.words[i]);
                if ord != std::cmp::Ordering::Equal {
                    return ord;
                }
            }
            std::cmp::Ordering::Equal
        })
    }
}

impl fmt::Display for BitKey {
    /// Displays the ascending list of set positions, e.g. `{1, 65}`.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{")?;
        for (i, pos) in self.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", pos)?;
        }
        write!(f, "}}")
    }
}
