// Copyright 2023-2024 Logan Magee
//
// SPDX-License-Identifier: LicenseRef-Proprietary

/// The size of the alphabet
const ALPHABET_SIZE: usize = 256;

/// Groups at most this long are refined with a selection sort instead of a ternary split
const SMALL_GROUP_LEN: usize = 16;

/// Marks a sorted run in the group array
const SORTED: isize = -1;

/// Computes the suffix array of `data` by prefix doubling.
///
/// This is the Larsson-Sadakane algorithm: suffixes are first bucketed by their leading byte, then
/// each unsorted bucket is repeatedly refined by the rank of the suffix `h` bytes further along,
/// doubling `h` every pass. Because the ranks from the previous pass already order suffixes by
/// their first `h` bytes, every comparison is *O*(1) and the whole construction runs in
/// *O*(*n* log *n*).
///
/// The end of `data` sorts before every byte value, so a suffix that is a proper prefix of another
/// sorts first. The returned array holds every offset in `0..data.len()` exactly once.
///
/// # Panics
///
/// Panics if `data.len() > u32::MAX`.
pub(crate) fn qsufsort(data: &[u8]) -> Vec<u32> {
    assert!(
        u32::try_from(data.len()).is_ok(),
        "data longer than u32::MAX cannot be indexed",
    );

    if data.is_empty() {
        return Vec::new();
    }

    // `groups[0]` always holds the empty suffix at offset `data.len()`, which is the least suffix.
    // Both arrays hold one more entry than `data` to make room for it.
    let n = data.len();
    let mut groups = vec![0isize; n + 1];
    let mut ranks = vec![0isize; n + 1];

    bucket_by_first_byte(data, &mut groups, &mut ranks);

    let mut h = 1;
    while groups[0] != -(n as isize + 1) {
        let mut sorted_len = 0;
        let mut i = 0;
        while i <= n {
            if groups[i] < 0 {
                // Skip over a run of already sorted suffixes, merging it with the previous one
                sorted_len -= groups[i];
                i = (i as isize - groups[i]) as usize;
            } else {
                if sorted_len != 0 {
                    groups[i - sorted_len as usize] = -sorted_len;
                }
                let group_len = (ranks[groups[i] as usize] + 1) as usize - i;
                split(&mut groups, &mut ranks, i, group_len, h);
                i += group_len;
                sorted_len = 0;
            }
        }
        if sorted_len != 0 {
            groups[i - sorted_len as usize] = -sorted_len;
        }

        h += h;
    }

    // Every rank is now final, so invert the rank array into the suffix array
    for (suffix, &rank) in ranks.iter().enumerate() {
        groups[rank as usize] = suffix as isize;
    }

    groups[1..].iter().map(|&suffix| suffix as u32).collect()
}

/// Places each suffix into the bucket of its first byte.
///
/// The rank of a suffix is the index of the last slot of its bucket. Buckets holding a single
/// suffix are marked as sorted.
fn bucket_by_first_byte(data: &[u8], groups: &mut [isize], ranks: &mut [isize]) {
    let mut buckets = [0isize; ALPHABET_SIZE];

    for &byte in data {
        buckets[byte as usize] += 1;
    }
    for i in 1..ALPHABET_SIZE {
        buckets[i] += buckets[i - 1];
    }
    // Shift so each bucket holds the number of bytes less than its own, i.e., the slot before its
    // first entry once the empty suffix takes slot 0
    for i in (1..ALPHABET_SIZE).rev() {
        buckets[i] = buckets[i - 1];
    }
    buckets[0] = 0;

    for (i, &byte) in data.iter().enumerate() {
        buckets[byte as usize] += 1;
        groups[buckets[byte as usize] as usize] = i as isize;
    }
    groups[0] = data.len() as isize;

    for (i, &byte) in data.iter().enumerate() {
        ranks[i] = buckets[byte as usize];
    }
    ranks[data.len()] = 0;

    if buckets[0] == 1 {
        groups[1] = SORTED;
    }
    for i in 1..ALPHABET_SIZE {
        if buckets[i] == buckets[i - 1] + 1 {
            groups[buckets[i] as usize] = SORTED;
        }
    }
    groups[0] = SORTED;
}

/// Refines the group `groups[start..start + len]` by the rank `h` bytes ahead.
fn split(groups: &mut [isize], ranks: &mut [isize], mut start: usize, mut len: usize, h: usize) {
    loop {
        if len < SMALL_GROUP_LEN {
            select_sort(groups, ranks, start, len, h);
            return;
        }

        let key = |groups: &[isize], ranks: &[isize], i: usize| ranks[groups[i] as usize + h];
        let pivot = key(groups, ranks, start + len / 2);

        let mut less = 0;
        let mut equal = 0;
        for i in start..start + len {
            let k = key(groups, ranks, i);
            if k < pivot {
                less += 1;
            } else if k == pivot {
                equal += 1;
            }
        }
        let equal_start = start + less;
        let greater_start = equal_start + equal;

        // Three-way partition in place
        let mut i = start;
        let mut j = 0;
        let mut k = 0;
        while i < equal_start {
            let v = key(groups, ranks, i);
            if v < pivot {
                i += 1;
            } else if v == pivot {
                groups.swap(i, equal_start + j);
                j += 1;
            } else {
                groups.swap(i, greater_start + k);
                k += 1;
            }
        }
        while equal_start + j < greater_start {
            if key(groups, ranks, equal_start + j) == pivot {
                j += 1;
            } else {
                groups.swap(equal_start + j, greater_start + k);
                k += 1;
            }
        }

        if equal_start > start {
            split(groups, ranks, start, equal_start - start, h);
        }

        let rank = greater_start as isize - 1;
        for &suffix in &groups[equal_start..greater_start] {
            ranks[suffix as usize] = rank;
        }
        if equal_start == greater_start - 1 {
            groups[equal_start] = SORTED;
        }

        if start + len > greater_start {
            len = start + len - greater_start;
            start = greater_start;
        } else {
            return;
        }
    }
}

fn select_sort(groups: &mut [isize], ranks: &mut [isize], start: usize, len: usize, h: usize) {
    let end = start + len;
    let mut k = start;

    while k < end {
        // Gather every suffix with the least key to the front of the remaining range
        let mut least = ranks[groups[k] as usize + h];
        let mut least_len = 1;
        for i in k + 1..end {
            let v = ranks[groups[i] as usize + h];
            if v < least {
                least = v;
                least_len = 0;
            }
            if v == least {
                groups.swap(k + least_len, i);
                least_len += 1;
            }
        }

        let rank = (k + least_len) as isize - 1;
        for &suffix in &groups[k..k + least_len] {
            ranks[suffix as usize] = rank;
        }
        if least_len == 1 {
            groups[k] = SORTED;
        }

        k += least_len;
    }
}

#[cfg(test)]
mod tests {
    use std::mem;

    use super::*;

    fn naive(data: &[u8]) -> Vec<u32> {
        let mut suffixes: Vec<u32> = (0..data.len() as u32).collect();
        suffixes.sort_by(|&a, &b| data[a as usize..].cmp(&data[b as usize..]));
        suffixes
    }

    #[test]
    fn empty() {
        assert!(qsufsort(b"").is_empty());
    }

    #[test]
    fn single_byte() {
        assert_eq!(qsufsort(b"x"), vec![0]);
    }

    #[test]
    fn banana() {
        assert_eq!(qsufsort(b"banana"), vec![5, 3, 1, 0, 4, 2]);
    }

    #[test]
    fn shorter_suffix_sorts_first() {
        assert_eq!(qsufsort(b"aaaa"), vec![3, 2, 1, 0]);
    }

    #[test]
    fn zero_bytes_are_ordinary() {
        let data = b"\0a\0\0b\0";
        assert_eq!(qsufsort(data), naive(data));
    }

    #[test]
    fn matches_naive_on_repetitive_input() {
        // Long runs force several doubling passes and ternary splits of large groups
        let data: Vec<u8> = b"abcabcabcabxabcabcabcabcabcabcabcabcabyabc"
            .iter()
            .cycle()
            .take(2000)
            .copied()
            .collect();
        assert_eq!(qsufsort(&data), naive(&data));
    }

    #[test]
    fn matches_naive_on_mixed_input() {
        let mut state = 0x2545_f491_u32;
        let data: Vec<u8> = (0..5000)
            .map(|_| {
                state ^= state << 13;
                state ^= state >> 17;
                state ^= state << 5;
                // A small alphabet keeps groups large
                (state % 4) as u8
            })
            .collect();
        assert_eq!(qsufsort(&data), naive(&data));
    }

    #[test]
    fn result_is_a_permutation() {
        let data = b"mississippi";
        let sa = qsufsort(data);
        let mut seen = vec![false; data.len()];
        for &i in &sa {
            assert!(!mem::replace(&mut seen[i as usize], true), "offset {i} appears twice");
        }
    }
}
