// Copyright 2023-2024 Logan Magee
//
// SPDX-License-Identifier: LicenseRef-Proprietary

#![allow(missing_docs)]

use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use sufsort::SuffixArray;

const CHUNK_SIZE: usize = 64 * 1024;
const CHUNKS: usize = 8;

/// Generates text-like data with plenty of repeats so doubling passes have work to do
fn generate(len: usize) -> Vec<u8> {
    const WORDS: [&[u8]; 8] = [
        b"firmware ", b"update ", b"partition ", b"\x7fELF\x02\x01", b"system ", b"\0\0\0\0",
        b"boot ", b"vendor ",
    ];

    let mut state = 0x9e37_79b9_u32;
    let mut data = Vec::with_capacity(len + 16);
    while data.len() < len {
        state ^= state << 13;
        state ^= state >> 17;
        state ^= state << 5;
        data.extend_from_slice(WORDS[(state % 8) as usize]);
        data.push((state >> 24) as u8);
    }
    data.truncate(len);
    data
}

fn construct(c: &mut Criterion) {
    let mut group = c.benchmark_group("construct");

    for chunks in 1..=CHUNKS {
        let size = chunks * CHUNK_SIZE;
        let data = generate(size);

        group
            .throughput(Throughput::Bytes(size as u64))
            .bench_with_input(BenchmarkId::from_parameter(size), &data, |b, data| {
                b.iter(|| SuffixArray::new(data));
            });
    }

    group.finish();
}

fn longest_match(c: &mut Criterion) {
    let data = generate(CHUNKS * CHUNK_SIZE);
    let sa = SuffixArray::new(&data);
    let pattern = &data[CHUNK_SIZE..CHUNK_SIZE + 4096];

    c.bench_function("longest_match", |b| b.iter(|| sa.longest_match(pattern)));
}

criterion_group!(benches, construct, longest_match);
criterion_main!(benches);
