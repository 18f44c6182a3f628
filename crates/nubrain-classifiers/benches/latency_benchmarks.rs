//! Latency benchmarks for the inference path
//!
//! Measures preprocessing, the KNN vote over a realistically sized training
//! matrix, a small convolutional network and the complete pipeline.
//!
//! Run with: cargo bench -p nubrain-classifiers

use candle_core::{DType, Device, Tensor};
use candle_nn::VarBuilder;
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
use nubrain_classifiers::{
    ClassifierArtifact, DenseClassifier, InferencePipeline, KnnClassifier, NetworkSpec,
    PreprocessConfig, Preprocessor, SequentialNetwork, StandardScaler,
};
use nubrain_core::LabelSpace;
use std::collections::HashMap;
use std::io::Cursor;
use std::sync::Arc;

fn scan_png(width: u32, height: u32) -> Vec<u8> {
    let mut image = RgbImage::new(width, height);
    for (x, y, pixel) in image.enumerate_pixels_mut() {
        let v = ((x * 7 + y * 13) % 256) as u8;
        *pixel = Rgb([v, v, v]);
    }
    let mut buf = Cursor::new(Vec::new());
    DynamicImage::ImageRgb8(image)
        .write_to(&mut buf, ImageFormat::Png)
        .unwrap();
    buf.into_inner()
}

fn labels() -> LabelSpace {
    LabelSpace::new(["glioma", "meningioma", "no", "pituitary"]).unwrap()
}

fn raw_pixel_knn(rows: usize) -> KnnClassifier {
    let dim = 64 * 64;
    let train_x: Vec<f32> = (0..rows * dim).map(|i| ((i * 31) % 255) as f32 / 255.0).collect();
    let train_x = Tensor::from_vec(train_x, (rows, dim), &Device::Cpu).unwrap();
    let train_y = (0..rows).map(|i| i % 4).collect();
    KnnClassifier::new("knn", train_x, train_y, 5, Some(4)).unwrap()
}

fn small_cnn() -> DenseClassifier {
    let spec: NetworkSpec = serde_yaml::from_str(
        r#"
input_shape: [224, 224, 3]
layers:
  - {type: conv2d, name: conv1, in_channels: 3, out_channels: 8, kernel: 3, stride: 2, padding: 1}
  - {type: relu}
  - {type: max-pool, size: 2}
  - {type: conv2d, name: conv2, in_channels: 8, out_channels: 16, kernel: 3, padding: 1}
  - {type: relu}
  - {type: global-avg-pool}
  - {type: linear, name: head, in_features: 16, out_features: 4}
  - {type: softmax}
"#,
    )
    .unwrap();

    let dev = Device::Cpu;
    let ones = |shape: &[usize]| Tensor::ones(shape, DType::F32, &dev).unwrap();
    let zeros = |len: usize| Tensor::zeros(len, DType::F32, &dev).unwrap();

    let mut weights = HashMap::new();
    weights.insert("conv1.weight".to_string(), ones(&[8, 3, 3, 3]));
    weights.insert("conv1.bias".to_string(), zeros(8));
    weights.insert("conv2.weight".to_string(), ones(&[16, 8, 3, 3]));
    weights.insert("conv2.bias".to_string(), zeros(16));
    weights.insert("head.weight".to_string(), ones(&[4, 16]));
    weights.insert("head.bias".to_string(), zeros(4));

    let vb = VarBuilder::from_tensors(weights, DType::F32, &dev);
    DenseClassifier::new(SequentialNetwork::from_var_builder("cnn", &spec, vb, &dev).unwrap())
}

/// Decode, resize and normalize for both preprocessing modes
fn benchmark_preprocessing(c: &mut Criterion) {
    let mut group = c.benchmark_group("Preprocessing");
    group.sample_size(50);

    for (width, height) in [(224, 224), (512, 512), (1024, 768)] {
        let bytes = scan_png(width, height);
        let id = format!("{}x{}", width, height);

        let color = Preprocessor::new(PreprocessConfig::color_224()).unwrap();
        group.bench_with_input(BenchmarkId::new("color_224", &id), &bytes, |b, bytes| {
            b.iter(|| color.prepare(black_box(bytes), &Device::Cpu).unwrap())
        });

        let gray = Preprocessor::new(PreprocessConfig::grayscale_64()).unwrap();
        group.bench_with_input(BenchmarkId::new("grayscale_64", &id), &bytes, |b, bytes| {
            b.iter(|| gray.prepare(black_box(bytes), &Device::Cpu).unwrap())
        });
    }

    group.finish();
}

/// KNN vote over growing training sets
fn benchmark_knn(c: &mut Criterion) {
    let mut group = c.benchmark_group("KNN_Raw_Pixels");
    group.sample_size(50);

    let query = Tensor::ones((1, 64 * 64), DType::F32, &Device::Cpu).unwrap();
    for rows in [100, 1000, 3000] {
        let knn = raw_pixel_knn(rows);
        group.bench_with_input(BenchmarkId::new("predict", rows), &query, |b, query| {
            b.iter(|| knn.predict(black_box(query)).unwrap())
        });
    }

    group.finish();
}

/// Forward pass of a small convolutional classifier
fn benchmark_network(c: &mut Criterion) {
    let mut group = c.benchmark_group("Sequential_Network");
    group.sample_size(20);

    let cnn = small_cnn();
    let input = Tensor::zeros((1, 224, 224, 3), DType::F32, &Device::Cpu).unwrap();
    group.bench_function("small_cnn_224", |b| {
        b.iter(|| cnn.predict(black_box(&input)).unwrap())
    });

    group.finish();
}

/// Bytes-to-label latency of complete pipelines
fn benchmark_pipeline(c: &mut Criterion) {
    let mut group = c.benchmark_group("Pipeline");
    group.sample_size(20);

    let bytes = scan_png(512, 512);

    let cnn = InferencePipeline::builder("end-to-end-cnn")
        .classifier(Arc::new(small_cnn()))
        .labels(labels())
        .build()
        .unwrap();
    group.bench_function("end_to_end_cnn", |b| {
        b.iter(|| cnn.classify(black_box(&bytes)).unwrap())
    });

    let scaler =
        StandardScaler::new(vec![127.5; 64 * 64], vec![64.0; 64 * 64], &Device::Cpu).unwrap();
    let knn = InferencePipeline::builder("knn-raw-pixels")
        .preprocessing(PreprocessConfig::grayscale_64())
        .scaler(scaler)
        .classifier(Arc::new(raw_pixel_knn(1000)))
        .labels(labels())
        .build()
        .unwrap();
    group.bench_function("knn_raw_pixels", |b| {
        b.iter(|| knn.classify(black_box(&bytes)).unwrap())
    });

    group.finish();
}

criterion_group!(
    benches,
    benchmark_preprocessing,
    benchmark_knn,
    benchmark_network,
    benchmark_pipeline
);

criterion_main!(benches);
