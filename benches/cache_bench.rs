//! Benchmarks for the frame cache hot paths.

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use tempfile::TempDir;

use frame_cache::cache::compressor::{xor_in_place, Codec, DeltaCompressor};
use frame_cache::cache::identity::{CacheIdentity, LiveTime};
use frame_cache::cache::store::FrameStore;

/// One 512x512 RGBA frame.
const FRAME_SIZE: usize = 512 * 512 * 4;

/// Two consecutive frames that differ in a 64-row band.
fn frame_pair() -> (Vec<u8>, Vec<u8>) {
    let previous: Vec<u8> = (0..FRAME_SIZE).map(|i| (i / 4 % 251) as u8).collect();
    let mut current = previous.clone();
    let band = 512 * 4 * 64;
    for byte in &mut current[band..2 * band] {
        *byte = byte.wrapping_add(17);
    }
    (previous, current)
}

fn bench_xor(c: &mut Criterion) {
    let (previous, current) = frame_pair();

    c.bench_function("xor_delta_1mb", |b| {
        let mut scratch = current.clone();
        b.iter(|| {
            xor_in_place(black_box(&mut scratch), black_box(&previous));
        })
    });
}

fn bench_encode(c: &mut Criterion) {
    let (previous, current) = frame_pair();

    for codec in [Codec::Lz4, Codec::Zstd] {
        let mut compressor = DeltaCompressor::new(codec, 1, FRAME_SIZE).unwrap();

        c.bench_function(&format!("{codec}_encode_keyframe_1mb"), |b| {
            b.iter(|| black_box(compressor.encode(None, black_box(&current)).unwrap()))
        });
        c.bench_function(&format!("{codec}_encode_delta_1mb"), |b| {
            b.iter(|| {
                black_box(
                    compressor
                        .encode(Some(previous.as_slice()), black_box(&current))
                        .unwrap(),
                )
            })
        });
    }
}

fn bench_decode(c: &mut Criterion) {
    let (previous, current) = frame_pair();

    for codec in [Codec::Lz4, Codec::Zstd] {
        let mut compressor = DeltaCompressor::new(codec, 1, FRAME_SIZE).unwrap();
        let blob = compressor.encode(Some(previous.as_slice()), &current).unwrap();

        c.bench_function(&format!("{codec}_decode_delta_1mb"), |b| {
            b.iter(|| black_box(compressor.decode(Some(previous.as_slice()), black_box(&blob)).unwrap()))
        });
    }
}

fn bench_store_read(c: &mut Criterion) {
    let tmp = TempDir::new().unwrap();
    let id = CacheIdentity::new("bench", FRAME_SIZE, LiveTime::Chat, Codec::Lz4);
    let mut store = FrameStore::open(id.index_path(tmp.path()), id.data_path(tmp.path())).unwrap();

    let blob = vec![7u8; 64 * 1024];
    for frame in 0..60 {
        store.write(frame, &blob).unwrap();
    }
    store.mark_finalized(true);

    c.bench_function("store_read_64kb_blob", |b| {
        let mut frame = 0;
        b.iter(|| {
            frame = (frame + 1) % 60;
            black_box(store.read(frame).unwrap());
        })
    });
}

criterion_group!(benches, bench_xor, bench_encode, bench_decode, bench_store_read);
criterion_main!(benches);
