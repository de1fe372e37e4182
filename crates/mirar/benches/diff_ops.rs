//! Pixel Diff Benchmarks
//!
//! Benchmarks for image decode, pairwise comparison, and diff rendering.
//!
//! Run with: `cargo bench --bench diff_ops`

#![allow(missing_docs)]
#![allow(clippy::unwrap_used)]

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use mirar::{encode_png, MaskRegion, PixelCompareOptions, PixelDiffEngine};

const SIZES: &[(u32, u32, &str)] = &[
    (200, 200, "200x200"),
    (800, 600, "800x600"),
    (1280, 720, "1280x720"),
];

fn solid_png(width: u32, height: u32, rgba: [u8; 4]) -> Vec<u8> {
    let mut pixels = Vec::with_capacity((width * height * 4) as usize);
    for _ in 0..width * height {
        pixels.extend_from_slice(&rgba);
    }
    encode_png(width, height, &pixels).unwrap()
}

/// A copy of `solid_png` with a centered rectangle repainted, so roughly a
/// quarter of the pixels differ.
fn patched_png(width: u32, height: u32, rgba: [u8; 4], patch: [u8; 4]) -> Vec<u8> {
    let mut pixels = Vec::with_capacity((width * height * 4) as usize);
    for y in 0..height {
        for x in 0..width {
            let inside = x >= width / 4 && x < 3 * width / 4 && y >= height / 4 && y < height / 2;
            pixels.extend_from_slice(if inside { &patch } else { &rgba });
        }
    }
    encode_png(width, height, &pixels).unwrap()
}

fn bench_compare_identical(c: &mut Criterion) {
    let mut group = c.benchmark_group("pixel_compare_identical");
    let engine = PixelDiffEngine::new();
    let options = PixelCompareOptions::default();

    for &(width, height, name) in SIZES {
        let png = solid_png(width, height, [40, 90, 160, 255]);
        group.bench_with_input(BenchmarkId::from_parameter(name), &png, |bench, png| {
            bench.iter(|| {
                let result = engine.compare(black_box(png), black_box(png), &options);
                black_box(result).unwrap();
            });
        });
    }

    group.finish();
}

fn bench_compare_changed(c: &mut Criterion) {
    let mut group = c.benchmark_group("pixel_compare_changed");
    let engine = PixelDiffEngine::new();
    let options = PixelCompareOptions::default();

    for &(width, height, name) in SIZES {
        let baseline = solid_png(width, height, [40, 90, 160, 255]);
        let current = patched_png(width, height, [40, 90, 160, 255], [220, 40, 40, 255]);
        group.bench_with_input(
            BenchmarkId::from_parameter(name),
            &(baseline, current),
            |bench, (baseline, current)| {
                bench.iter(|| {
                    // Changed inputs also exercise the diff-image render path
                    let result = engine.compare(black_box(baseline), black_box(current), &options);
                    black_box(result).unwrap();
                });
            },
        );
    }

    group.finish();
}

fn bench_compare_masked(c: &mut Criterion) {
    let mut group = c.benchmark_group("pixel_compare_masked");
    let engine = PixelDiffEngine::new();

    for &(width, height, name) in SIZES {
        let baseline = solid_png(width, height, [40, 90, 160, 255]);
        let current = patched_png(width, height, [40, 90, 160, 255], [220, 40, 40, 255]);
        let options = PixelCompareOptions {
            mask_regions: vec![MaskRegion {
                x: 0,
                y: 0,
                width,
                height,
            }],
            ..Default::default()
        };
        group.bench_with_input(
            BenchmarkId::from_parameter(name),
            &(baseline, current),
            |bench, (baseline, current)| {
                bench.iter(|| {
                    let result = engine.compare(black_box(baseline), black_box(current), &options);
                    black_box(result).unwrap();
                });
            },
        );
    }

    group.finish();
}

fn bench_compare_resized(c: &mut Criterion) {
    let mut group = c.benchmark_group("pixel_compare_resized");
    let engine = PixelDiffEngine::new();
    let options = PixelCompareOptions::default();

    // Dimension mismatch forces the resample-to-common-size path
    let baseline = solid_png(640, 360, [40, 90, 160, 255]);
    let current = solid_png(800, 450, [40, 90, 160, 255]);
    group.bench_with_input(
        BenchmarkId::from_parameter("640x360_vs_800x450"),
        &(baseline, current),
        |bench, (baseline, current)| {
            bench.iter(|| {
                let result = engine.compare(black_box(baseline), black_box(current), &options);
                black_box(result).unwrap();
            });
        },
    );

    group.finish();
}

fn bench_png_encode(c: &mut Criterion) {
    let mut group = c.benchmark_group("png_encode");

    for &(width, height, name) in SIZES {
        let pixels: Vec<u8> = (0..width * height)
            .flat_map(|i| [(i % 256) as u8, ((i * 7) % 256) as u8, ((i * 13) % 256) as u8, 255])
            .collect();
        group.bench_with_input(
            BenchmarkId::from_parameter(name),
            &pixels,
            |bench, pixels| {
                bench.iter(|| {
                    let png = encode_png(black_box(width), black_box(height), black_box(pixels));
                    black_box(png).unwrap();
                });
            },
        );
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_compare_identical,
    bench_compare_changed,
    bench_compare_masked,
    bench_compare_resized,
    bench_png_encode
);
criterion_main!(benches);
