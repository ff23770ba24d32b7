//! Color Conversion Benchmarks
//!
//! Measures the software conversion device turning a captured BGRA image into
//! NV12 and P010 frames, with and without aspect-fit padding.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use lamco_capture_sync::device::{ColorRange, Colorspace, ConversionDevice, SoftwareDevice};
use lamco_capture_sync::frame::{Image, PixelFormat, VideoFrame};

/// Generate a test image with a gradient pattern
fn generate_image(width: u32, height: u32) -> Image {
    let mut image = Image::new(width, height);
    for y in 0..height {
        for x in 0..width {
            let r = 128;
            let g = ((y * 255) / height) as u8;
            let b = ((x * 255) / width) as u8;
            image.set_rgb(x, y, (r, g, b));
        }
    }
    image
}

fn bound_device(src: &Image, dst: (u32, u32), format: PixelFormat) -> SoftwareDevice {
    let mut device = SoftwareDevice::bind(
        src.width,
        src.height,
        format,
        Image::new(src.width, src.height),
    )
    .expect("bind");
    device
        .set_source_frame(VideoFrame::new(dst.0, dst.1, format))
        .expect("source frame");
    device
}

/// Same-size conversion at various resolutions
fn bench_convert_nv12(c: &mut Criterion) {
    let mut group = c.benchmark_group("convert_nv12");

    // Test resolutions: SD, 720p, 1080p
    let resolutions = [(640, 480, "480p"), (1280, 720, "720p"), (1920, 1080, "1080p")];

    for (width, height, name) in resolutions {
        let image = generate_image(width, height);
        group.throughput(Throughput::Elements(u64::from(width * height)));

        let mut device = bound_device(&image, (width, height), PixelFormat::Nv12);
        device.set_colorspace(Colorspace::Rec709, ColorRange::Limited);
        group.bench_with_input(BenchmarkId::new("Rec709", name), &image, |b, image| {
            b.iter(|| device.convert(black_box(image)).expect("convert"))
        });

        let mut device = bound_device(&image, (width, height), PixelFormat::Nv12);
        device.set_colorspace(Colorspace::Rec601, ColorRange::Limited);
        group.bench_with_input(BenchmarkId::new("Rec601", name), &image, |b, image| {
            b.iter(|| device.convert(black_box(image)).expect("convert"))
        });
    }

    group.finish();
}

/// 10-bit output for HDR sessions
fn bench_convert_p010(c: &mut Criterion) {
    let mut group = c.benchmark_group("convert_p010");

    let image = generate_image(1920, 1080);
    group.throughput(Throughput::Elements(1920 * 1080));

    let mut device = bound_device(&image, (1920, 1080), PixelFormat::P010);
    device.set_colorspace(Colorspace::Rec2020, ColorRange::Limited);
    group.bench_function("Rec2020/1080p", |b| {
        b.iter(|| device.convert(black_box(&image)).expect("convert"))
    });

    group.finish();
}

/// Scaled conversion into a differently shaped frame (pillarbox)
fn bench_convert_scaled(c: &mut Criterion) {
    let mut group = c.benchmark_group("convert_scaled");

    let image = generate_image(1280, 1024);
    group.throughput(Throughput::Elements(1920 * 1080));

    let mut device = bound_device(&image, (1920, 1080), PixelFormat::Nv12);
    group.bench_function("1280x1024_to_1080p", |b| {
        b.iter(|| device.convert(black_box(&image)).expect("convert"))
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_convert_nv12,
    bench_convert_p010,
    bench_convert_scaled
);
criterion_main!(benches);
