//! Fixed-capacity bit sets used as type signatures.
//!
//! Every signature comparison on the hot path (chunk lookup, query
//! filtering) goes through a [`BitMask`], so all operations work on whole
//! 64-bit words.

use std::fmt;

/// Number of distinct indices a [`BitMask`] can hold.
pub const MASK_CAPACITY: usize = 256;

const WORDS: usize = MASK_CAPACITY / 64;

/// A set of small integer indices in `0..MASK_CAPACITY`.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default, PartialOrd, Ord)]
pub struct BitMask {
    words: [u64; WORDS],
}

impl BitMask {
    /// The empty mask.
    pub const EMPTY: Self = Self { words: [0; WORDS] };

    /// Create an empty mask.
    #[must_use]
    pub const fn new() -> Self {
        Self::EMPTY
    }

    /// Build a mask from a list of indices.
    ///
    /// # Panics
    ///
    /// Panics if any index is `>= MASK_CAPACITY`.
    #[must_use]
    pub fn from_indices(indices: impl IntoIterator<Item = usize>) -> Self {
        let mut mask = Self::new();
        for index in indices {
            mask.set(index);
        }
        mask
    }

    #[inline]
    const fn split(index: usize) -> (usize, u64) {
        (index / 64, 1u64 << (index % 64))
    }

    /// Insert `index`.
    ///
    /// # Panics
    ///
    /// Panics if `index >= MASK_CAPACITY`.
    #[inline]
    pub fn set(&mut self, index: usize) {
        assert!(index < MASK_CAPACITY, "bit index {index} out of range");
        let (word, bit) = Self::split(index);
        self.words[word] |= bit;
    }

    /// Remove `index`. Out-of-range indices are ignored.
    #[inline]
    pub fn clear(&mut self, index: usize) {
        if index < MASK_CAPACITY {
            let (word, bit) = Self::split(index);
            self.words[word] &= !bit;
        }
    }

    /// Remove every index.
    #[inline]
    pub fn clear_all(&mut self) {
        self.words = [0; WORDS];
    }

    /// Copy of `self` with `index` inserted.
    #[must_use]
    pub fn with(mut self, index: usize) -> Self {
        self.set(index);
        self
    }

    /// Copy of `self` with `index` removed.
    #[must_use]
    pub fn without(mut self, index: usize) -> Self {
        self.clear(index);
        self
    }

    #[inline]
    #[must_use]
    pub const fn contains(&self, index: usize) -> bool {
        if index >= MASK_CAPACITY {
            return false;
        }
        let (word, bit) = Self::split(index);
        self.words[word] & bit != 0
    }

    /// `true` if every index in `other` is also in `self`.
    #[inline]
    #[must_use]
    pub fn contains_all(&self, other: &Self) -> bool {
        self.words
            .iter()
            .zip(other.words.iter())
            .all(|(a, b)| a & b == *b)
    }

    /// `true` if `self` and `other` share at least one index.
    #[inline]
    #[must_use]
    pub fn intersects(&self, other: &Self) -> bool {
        self.words
            .iter()
            .zip(other.words.iter())
            .any(|(a, b)| a & b != 0)
    }

    #[must_use]
    pub fn union(&self, other: &Self) -> Self {
        let mut out = *self;
        for (a, b) in out.words.iter_mut().zip(other.words.iter()) {
            *a |= b;
        }
        out
    }

    /// Indices in `self` that are not in `other`.
    #[must_use]
    pub fn difference(&self, other: &Self) -> Self {
        let mut out = *self;
        for (a, b) in out.words.iter_mut().zip(other.words.iter()) {
            *a &= !b;
        }
        out
    }

    #[inline]
    #[must_use]
    pub fn count(&self) -> usize {
        self.words.iter().map(|w| w.count_ones() as usize).sum()
    }

    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.words.iter().all(|&w| w == 0)
    }

    /// Iterate over the set indices in ascending order.
    pub fn iter(&self) -> Iter {
        Iter {
            words: self.words,
            word: 0,
        }
    }
}

/// Ascending iterator over the indices of a [`BitMask`].
#[derive(Clone, Debug)]
pub struct Iter {
    words: [u64; WORDS],
    word: usize,
}

impl Iterator for Iter {
    type Item = usize;

    fn next(&mut self) -> Option<usize> {
        while self.word < WORDS {
            let bits = self.words[self.word];
            if bits == 0 {
                self.word += 1;
                continue;
            }
            let offset = bits.trailing_zeros() as usize;
            // Drop the lowest set bit.
            self.words[self.word] = bits & (bits - 1);
            return Some(self.word * 64 + offset);
        }
        None
    }
}

impl IntoIterator for &BitMask {
    type Item = usize;
    type IntoIter = Iter;

    fn into_iter(self) -> Iter {
        self.iter()
    }
}

impl FromIterator<usize> for BitMask {
    fn from_iter<I: IntoIterator<Item = usize>>(iter: I) -> Self {
        Self::from_indices(iter)
    }
}

impl fmt::Debug for BitMask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.iter()).finish()
    }
}
