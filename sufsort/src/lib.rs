// Copyright 2023 Logan Magee
//
// SPDX-License-Identifier: LicenseRef-Proprietary

//! Suffix array construction and longest-match search for byte strings.

mod qsufsort;
mod suffix_array;

pub use suffix_array::{Match, SuffixArray};
