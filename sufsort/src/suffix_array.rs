// Copyright 2023 Logan Magee
//
// SPDX-License-Identifier: LicenseRef-Proprietary

use std::cmp::Ordering;

use crate::qsufsort;

/// A suffix array for a byte string.
pub struct SuffixArray<'a> {
    data: &'a [u8],
    inner: Vec<u32>,
}

/// A region of the indexed data matching a prefix of a search pattern.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct Match {
    position: usize,
    len: usize,
}

impl Match {
    /// The offset in the indexed data at which the match starts
    #[must_use]
    pub fn position(&self) -> usize {
        self.position
    }

    /// The number of bytes matched
    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Returns `true` if no bytes matched
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl<'a> SuffixArray<'a> {
    /// The default number of suffixes on each side of the binary search result to consider in
    /// [`longest_match()`](Self::longest_match)
    pub const DEFAULT_CANDIDATE_WINDOW: usize = 4;

    /// Creates a new `SuffixArray` for `data`.
    ///
    /// This operation is *O*(*n* log *n*).
    ///
    /// # Panics
    ///
    /// Panics if `data.len() > u32::MAX`.
    ///
    /// # Examples
    ///
    /// ```
    /// use sufsort::SuffixArray;
    ///
    /// let data = b"Hello, world!";
    /// let sa = SuffixArray::new(data);
    /// ```
    #[must_use]
    pub fn new(data: &'a [u8]) -> Self {
        let inner = qsufsort::qsufsort(data);

        Self { data, inner }
    }

    /// The indexed data
    #[must_use]
    pub fn data(&self) -> &'a [u8] {
        self.data
    }

    /// The sorted suffix offsets
    #[must_use]
    pub fn as_slice(&self) -> &[u32] {
        &self.inner
    }

    /// The number of suffixes, which is the length of the indexed data
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    /// Returns `true` if the indexed data is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// Returns `true` if and only if `pattern` is contained in the associated data.
    ///
    /// This operation is *O*(*m* \* log(*n*)), where `m` is `pattern.len()`.
    ///
    /// # Examples
    ///
    /// ```
    /// use sufsort::SuffixArray;
    ///
    /// let data = b"Hello, world!";
    /// let sa = SuffixArray::new(data);
    /// assert!(sa.contains(b"world"));
    /// ```
    #[must_use]
    pub fn contains(&self, pattern: &[u8]) -> bool {
        self.inner
            .binary_search_by(|&suffix| {
                self.data[suffix as usize..]
                    .iter()
                    .take(pattern.len())
                    .cmp(pattern.iter())
            })
            .is_ok()
    }

    /// Finds the longest prefix of `pattern` occurring in the associated data.
    ///
    /// This is a shorthand for [`longest_match_within()`](Self::longest_match_within) with
    /// [`DEFAULT_CANDIDATE_WINDOW`](Self::DEFAULT_CANDIDATE_WINDOW).
    ///
    /// # Examples
    ///
    /// ```
    /// use sufsort::SuffixArray;
    ///
    /// let data = b"The quick brown fox";
    /// let sa = SuffixArray::new(data);
    /// let m = sa.longest_match(b"brown cow").unwrap();
    ///
    /// assert_eq!(m.position(), 10);
    /// assert_eq!(m.len(), 6);
    /// ```
    #[must_use]
    pub fn longest_match(&self, pattern: &[u8]) -> Option<Match> {
        self.longest_match_within(pattern, Self::DEFAULT_CANDIDATE_WINDOW)
    }

    /// Finds the longest prefix of `pattern` occurring in the associated data.
    ///
    /// A binary search locates where `pattern` would be inserted among the sorted suffixes. The
    /// `window` suffixes on each side of that point are then extended against `pattern` byte by
    /// byte, and the longest extension wins. Ties go to the smallest position.
    ///
    /// Returns `None` only if the associated data is empty. A returned match may have a length of
    /// 0 if no byte of `pattern` occurs in the data.
    ///
    /// This operation is *O*((*m* \* log(*n*)) + (*window* \* *m*)), where `m` is
    /// `pattern.len()`.
    #[must_use]
    pub fn longest_match_within(&self, pattern: &[u8], window: usize) -> Option<Match> {
        if self.inner.is_empty() {
            return None;
        }

        let insertion = self
            .inner
            .partition_point(|&suffix| self.data[suffix as usize..].cmp(pattern) == Ordering::Less);

        // The longest match is always adjacent to the insertion point, so at least one suffix on
        // each side is examined regardless of `window`
        let window = window.max(1);
        let start = insertion.saturating_sub(window);
        let end = insertion.saturating_add(window).min(self.inner.len());

        self.inner[start..end]
            .iter()
            .map(|&suffix| {
                let position = suffix as usize;
                Match {
                    position,
                    len: match_len(&self.data[position..], pattern),
                }
            })
            .min_by(|a, b| b.len.cmp(&a.len).then(a.position.cmp(&b.position)))
    }
}

fn match_len(a: &[u8], b: &[u8]) -> usize {
    a.iter().zip(b).take_while(|(x, y)| x == y).count()
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    #[test]
    fn contains_one_match() {
        let data = b"Hello, world!";
        let sa = SuffixArray::new(data);

        assert!(sa.contains(b"world"));
    }

    #[test]
    fn contains_two_matches() {
        let data = b"The quick brown fox jumped over the lazy dog because the fox was quick";
        let sa = SuffixArray::new(data);

        assert!(sa.contains(b"fox"));
        assert!(sa.contains(b"quick"));
    }

    #[test]
    fn contains_no_matches() {
        let data = b"Now is the time for all good men to come to the aid of the party";
        let sa = SuffixArray::new(data);

        assert!(!sa.contains(b"times"));
    }

    #[test]
    fn empty_data() {
        let sa = SuffixArray::new(b"");

        assert!(sa.is_empty());
        assert!(!sa.contains(b"a"));
        assert_eq!(sa.longest_match(b"a"), None);
    }

    #[test]
    fn longest_match_full_pattern() {
        let sa = SuffixArray::new(b"abcXYZabcdef");
        let m = sa.longest_match(b"abcd").unwrap();

        assert_eq!((m.position(), m.len()), (6, 4));
    }

    #[test]
    fn longest_match_no_common_byte() {
        let sa = SuffixArray::new(b"abc");
        let m = sa.longest_match(b"xyz").unwrap();

        assert!(m.is_empty());
    }

    #[test]
    fn longest_match_prefers_smallest_position() {
        let sa = SuffixArray::new(b"abcabcabc");
        let m = sa.longest_match(b"abcX").unwrap();

        assert_eq!((m.position(), m.len()), (0, 3));
    }

    #[test]
    fn longest_match_pattern_past_end_of_data() {
        let sa = SuffixArray::new(b"xxabc");
        let m = sa.longest_match(b"abcdef").unwrap();

        assert_eq!((m.position(), m.len()), (2, 3));
    }

    proptest! {
        #[test]
        fn adjacent_suffixes_are_ordered(data in proptest::collection::vec(any::<u8>(), 0..2048)) {
            let sa = SuffixArray::new(&data);
            prop_assert_eq!(sa.len(), data.len());
            for pair in sa.as_slice().windows(2) {
                prop_assert!(data[pair[0] as usize..] <= data[pair[1] as usize..]);
            }
        }

        #[test]
        fn longest_match_is_longest(
            data in proptest::collection::vec(0u8..4, 1..512),
            pattern in proptest::collection::vec(0u8..4, 0..32),
        ) {
            let sa = SuffixArray::new(&data);
            let m = sa.longest_match(&pattern).unwrap();
            let best = (0..data.len())
                .map(|i| match_len(&data[i..], &pattern))
                .max()
                .unwrap_or(0);

            prop_assert_eq!(m.len(), best);
            prop_assert_eq!(&data[m.position()..m.position() + m.len()], &pattern[..m.len()]);
        }
    }
}
