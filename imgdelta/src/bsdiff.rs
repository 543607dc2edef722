// Copyright 2024 Logan Magee
//
// SPDX-License-Identifier: LicenseRef-Proprietary

use sufsort::SuffixArray;

use crate::control::{ControlTriple, PatchStreams};

/// Tuning knobs for the match search.
#[derive(Clone, Copy, Debug)]
pub(crate) struct SearchParams {
    /// Suffixes examined on each side of the binary search result
    pub(crate) candidate_window: usize,
    /// How many more bytes a fresh match must cover than the current alignment already does
    /// before a new control is started for it
    pub(crate) mismatch_threshold: usize,
}

/// A source region paired with a target region, followed by literal target bytes.
///
/// `target[target_start..target_start + len]` is encoded as a difference against
/// `source[source_start..source_start + len]`, and `target[target_start + len..extra_end]` is
/// encoded literally.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) struct MatchRun {
    source_start: usize,
    target_start: usize,
    len: usize,
    extra_end: usize,
}

impl MatchRun {
    fn extra_start(&self) -> usize {
        self.target_start + self.len
    }
}

/// Walks `target` left to right, producing the match runs that encode it against the source.
pub(crate) struct MatchMaker<'a> {
    scan: usize,
    len: usize,
    pos: usize,
    last_scan: usize,
    last_pos: usize,
    last_offset: isize,
    // Agreements minus disagreements of the current alignment over `last_scan..aligned_to`
    aligned_score: isize,
    aligned_to: usize,
    source: &'a [u8],
    target: &'a [u8],
    index: &'a SuffixArray<'a>,
    params: SearchParams,
}

impl<'a> MatchMaker<'a> {
    pub(crate) fn new(index: &'a SuffixArray<'a>, target: &'a [u8], params: SearchParams) -> Self {
        Self {
            scan: 0,
            len: 0,
            pos: 0,
            last_scan: 0,
            last_pos: 0,
            last_offset: 0,
            aligned_score: 0,
            aligned_to: 0,
            source: index.data(),
            target,
            index,
            params,
        }
    }

    /// Returns `true` if `target[i]` agrees with the source under the current alignment
    fn agrees(&self, i: usize) -> bool {
        let j = i as isize + self.last_offset;
        j >= 0 && (j as usize) < self.source.len() && self.source[j as usize] == self.target[i]
    }

    /// Returns whether the current alignment has paid for itself since the last control.
    ///
    /// Each agreeing byte scores +1 and each disagreeing byte -1. A match that merely continues
    /// the current alignment is normally folded into the running control, but once the bytes in
    /// between score no better than zero they are cheaper to emit as extra bytes.
    fn alignment_exhausted(&mut self) -> bool {
        while self.aligned_to < self.scan {
            self.aligned_score += if self.agrees(self.aligned_to) { 1 } else { -1 };
            self.aligned_to += 1;
        }

        self.scan > self.last_scan && self.aligned_score <= 0
    }

    fn find_match(&self, at: usize) -> (usize, usize) {
        self.index
            .longest_match_within(&self.target[at..], self.params.candidate_window)
            .map_or((0, 0), |m| (m.position(), m.len()))
    }
}

impl Iterator for MatchMaker<'_> {
    type Item = MatchRun;

    fn next(&mut self) -> Option<Self::Item> {
        while self.scan < self.target.len() {
            let mut old_score: isize = 0;
            let mut restart = false;
            self.scan += self.len;
            let mut scsc = self.scan;
            while self.scan < self.target.len() {
                (self.pos, self.len) = self.find_match(self.scan);

                while scsc < self.scan + self.len {
                    if self.agrees(scsc) {
                        old_score += 1;
                    }
                    scsc += 1;
                }

                let len = self.len as isize;
                if len == old_score && len != 0 {
                    restart = self.alignment_exhausted();
                    break;
                }
                if len > old_score + self.params.mismatch_threshold as isize {
                    break;
                }

                if self.agrees(self.scan) {
                    old_score -= 1;
                }

                self.scan += 1;
            }

            if self.len as isize != old_score || restart || self.scan == self.target.len() {
                // Extend the previous match forward as long as it keeps scoring
                let mut s = 0;
                let mut s_f = 0;
                let mut len_forward: usize = 0;
                let mut i = 0;
                while self.last_scan + i < self.scan && self.last_pos + i < self.source.len() {
                    if self.source[self.last_pos + i] == self.target[self.last_scan + i] {
                        s += 1;
                    }
                    i += 1;
                    if s * 2 - i as isize > s_f * 2 - len_forward as isize {
                        s_f = s;
                        len_forward = i;
                    }
                }

                // Extend the new match backward the same way
                let mut len_back = 0;
                if self.scan < self.target.len() {
                    let mut s = 0;
                    let mut s_b = 0;
                    let mut i = 1;
                    while self.scan >= self.last_scan + i && self.pos >= i {
                        if self.source[self.pos - i] == self.target[self.scan - i] {
                            s += 1;
                        }
                        if s * 2 - i as isize > s_b * 2 - len_back as isize {
                            s_b = s;
                            len_back = i;
                        }
                        i += 1;
                    }
                }

                // If the extensions overlap, split the overlap where the combined score peaks
                if self.last_scan + len_forward > self.scan - len_back {
                    let overlap = (self.last_scan + len_forward) - (self.scan - len_back);
                    let mut s = 0;
                    let mut s_s = 0;
                    let mut lens = 0;
                    for i in 0..overlap {
                        if self.target[self.last_scan + len_forward - overlap + i]
                            == self.source[self.last_pos + len_forward - overlap + i]
                        {
                            s += 1;
                        }
                        if self.target[self.scan - len_back + i]
                            == self.source[self.pos - len_back + i]
                        {
                            s -= 1;
                        }
                        if s > s_s {
                            s_s = s;
                            lens = i + 1;
                        }
                    }

                    len_forward += lens;
                    len_forward -= overlap;
                    len_back -= lens;
                }

                let run = MatchRun {
                    source_start: self.last_pos,
                    target_start: self.last_scan,
                    len: len_forward,
                    extra_end: self.scan - len_back,
                };

                self.last_scan = self.scan - len_back;
                self.last_pos = self.pos - len_back;
                self.last_offset = self.pos as isize - self.scan as isize;
                self.aligned_score = 0;
                self.aligned_to = self.last_scan;

                return Some(run);
            }
        }

        None
    }
}

/// Turns match runs into control triples and the diff and extra streams.
pub(crate) struct ControlProducer<'a, I>
where
    I: Iterator<Item = MatchRun>,
{
    match_iter: I,
    prev_match: Option<MatchRun>,
    source: &'a [u8],
    target: &'a [u8],
}

impl<'a> ControlProducer<'a, MatchMaker<'a>> {
    pub(crate) fn new(index: &'a SuffixArray<'a>, target: &'a [u8], params: SearchParams) -> Self {
        let mut match_iter = MatchMaker::new(index, target, params);
        let prev_match = match_iter.next();

        Self {
            match_iter,
            prev_match,
            source: index.data(),
            target,
        }
    }
}

impl<I> ControlProducer<'_, I>
where
    I: Iterator<Item = MatchRun>,
{
    /// Consumes every match run, appending to `streams`.
    pub(crate) fn encode_into(mut self, streams: &mut PatchStreams) {
        while let Some(run) = self.prev_match {
            streams.diff.extend(
                self.target[run.target_start..run.extra_start()]
                    .iter()
                    .zip(&self.source[run.source_start..run.source_start + run.len])
                    .map(|(new, old)| new.wrapping_sub(*old)),
            );
            streams
                .extra
                .extend_from_slice(&self.target[run.extra_start()..run.extra_end]);

            self.prev_match = self.match_iter.next();

            // The last control never seeks
            let seek = self.prev_match.map_or(0, |next| {
                next.source_start as i64 - (run.source_start + run.len) as i64
            });

            streams.controls.push(ControlTriple {
                copy_len: run.len as u64,
                extra_len: (run.extra_end - run.extra_start()) as u64,
                seek,
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PARAMS: SearchParams = SearchParams {
        candidate_window: 4,
        mismatch_threshold: 8,
    };

    fn runs(source: &[u8], target: &[u8]) -> Vec<MatchRun> {
        let index = SuffixArray::new(source);
        MatchMaker::new(&index, target, PARAMS).collect()
    }

    #[test]
    fn identical_is_one_run() {
        let data = b"The quick brown fox jumped over the lazy dog";

        assert_eq!(
            runs(data, data),
            [MatchRun {
                source_start: 0,
                target_start: 0,
                len: data.len(),
                extra_end: data.len(),
            }],
        );
    }

    #[test]
    fn empty_target_has_no_runs() {
        assert!(runs(b"abc", b"").is_empty());
    }

    #[test]
    fn empty_source_is_all_extra() {
        assert_eq!(
            runs(b"", b"hello"),
            [MatchRun {
                source_start: 0,
                target_start: 0,
                len: 0,
                extra_end: 5,
            }],
        );
    }

    #[test]
    fn runs_tile_the_target() {
        let source = b"0123456789abcdefghijklmnopqrstuvwxyz".repeat(4);
        let mut target = source.clone();
        target.splice(30..30, b"INSERTED".iter().copied());
        target.drain(90..100);
        target[10] = b'!';

        let mut expected_start = 0;
        for run in runs(&source, &target) {
            assert_eq!(run.target_start, expected_start);
            assert!(run.extra_start() <= run.extra_end);
            assert!(run.source_start + run.len <= source.len());
            expected_start = run.extra_end;
        }
        assert_eq!(expected_start, target.len());
    }

    #[test]
    fn gap_in_alignment_starts_new_run() {
        let matched: Vec<_> = runs(b"abcabcabc", b"abcXYZabc")
            .iter()
            .map(|run| (run.target_start, run.len, run.extra_end))
            .collect();

        assert_eq!(matched, [(0, 3, 6), (6, 3, 9)]);
    }

    #[test]
    fn single_byte_change_stays_in_one_run() {
        let source = b"abcdefghijklmnopqrstuvwxyz";
        let mut target = *source;
        target[12] = b'#';

        let runs = runs(source, &target);
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].len, source.len());
    }
}
