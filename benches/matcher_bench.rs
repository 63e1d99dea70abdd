//! Template-matching throughput, since the pipeline calls this once per
//! tick and the whole adaptive-interval design assumes a match is cheap
//! relative to a screen-capture frame.

use std::path::{Path, PathBuf};

use approve_agent::matcher::{MatchInput, TemplateSet};
use criterion::{black_box, criterion_group, criterion_main, Criterion};

fn write_template_png(dir: &Path, name: &str, size: u32) -> PathBuf {
    let path = dir.join(name);
    let pixels = vec![128u8; (size * size * 3) as usize];
    image::save_buffer(&path, &pixels, size, size, image::ColorType::Rgb8).unwrap();
    path
}

fn synthetic_frame(width: u32, height: u32) -> Vec<u8> {
    (0..(width * height * 3)).map(|i| (i % 256) as u8).collect()
}

fn bench_single_template_in_1080p_roi(c: &mut Criterion) {
    let dir = std::env::temp_dir().join(format!("approve-agent-bench-{}", std::process::id()));
    std::fs::create_dir_all(&dir).unwrap();
    let template_path = write_template_png(&dir, "button.png", 48);

    let mut templates = TemplateSet::default();
    templates
        .reload_if_changed(&[template_path], false, false, &[1.0])
        .unwrap();

    let frame = synthetic_frame(1920, 1080);
    let input = MatchInput {
        pixels: &frame,
        width: 1920,
        height: 1080,
        channels: 3,
    };

    c.bench_function("best_match_single_48px_template_in_1080p_roi", |b| {
        b.iter(|| templates.best_match(black_box(&input)));
    });

    let _ = std::fs::remove_dir_all(&dir);
}

fn bench_multi_scale_in_480p_roi(c: &mut Criterion) {
    let dir = std::env::temp_dir().join(format!(
        "approve-agent-bench-multiscale-{}",
        std::process::id()
    ));
    std::fs::create_dir_all(&dir).unwrap();
    let template_path = write_template_png(&dir, "button.png", 48);

    let mut templates = TemplateSet::default();
    templates
        .reload_if_changed(&[template_path], false, true, &[0.8, 1.0, 1.2, 1.5])
        .unwrap();

    let frame = synthetic_frame(640, 480);
    let input = MatchInput {
        pixels: &frame,
        width: 640,
        height: 480,
        channels: 3,
    };

    c.bench_function("best_match_four_scales_in_480p_roi", |b| {
        b.iter(|| templates.best_match(black_box(&input)));
    });

    let _ = std::fs::remove_dir_all(&dir);
}

criterion_group!(
    benches,
    bench_single_template_in_1080p_roi,
    bench_multi_scale_in_480p_roi
);
criterion_main!(benches);
