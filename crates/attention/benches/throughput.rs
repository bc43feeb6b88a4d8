//! Throughput of `attend` across scorers and sequence lengths.
//! Run with: `cargo bench -p attention --bench throughput`

use attention::masks::build_causal_mask;
use attention::{
    AdditiveAttention, AttentionScorer, Config, DotProductAttention, LocationAwareAttention,
    LocationAwareConfig, MultiHeadAttention, MultiHeadConfig, ScaledDotProductAttention,
};
use candle_core::{DType, Device, Tensor};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

const BATCH: usize = 4;
const HIDDEN: usize = 128;

fn inputs(device: &Device, q_len: usize, k_len: usize) -> (Tensor, Tensor, Tensor) {
    let sample = |len: usize| Tensor::randn(0f32, 1.0, (BATCH, len, HIDDEN), device).expect("inputs");
    (sample(q_len), sample(k_len), sample(k_len))
}

fn bench_scorers(c: &mut Criterion) {
    let device = Device::Cpu;
    let scorers: Vec<Box<dyn AttentionScorer>> = vec![
        Box::new(DotProductAttention::new()),
        Box::new(ScaledDotProductAttention::new()),
        Box::new(AdditiveAttention::new(HIDDEN, &device, DType::F32).expect("additive")),
        Box::new(
            LocationAwareAttention::new(LocationAwareConfig::new(HIDDEN), &device, DType::F32)
                .expect("location aware"),
        ),
        Box::new(
            MultiHeadAttention::new(MultiHeadConfig::new(HIDDEN, 8), &device, DType::F32)
                .expect("multi head"),
        ),
    ];
    let config = Config::default();

    for scorer in &scorers {
        let mut group = c.benchmark_group(format!("attend/{}", scorer.name()));
        for &k_len in &[32usize, 128, 512] {
            // Decoder-style step: one query against the whole encoder output.
            let (query, keys, values) = inputs(&device, 1, k_len);
            group.throughput(Throughput::Elements((BATCH * k_len) as u64));
            group.bench_with_input(BenchmarkId::from_parameter(k_len), &k_len, |b, _| {
                b.iter(|| {
                    black_box(
                        scorer
                            .attend(&query, &keys, &values, None, &config)
                            .expect("attend"),
                    )
                });
            });
        }
        group.finish();
    }
}

fn bench_causal_self_attention(c: &mut Criterion) {
    let device = Device::Cpu;
    let scorer = ScaledDotProductAttention::new();
    let config = Config::default();
    let mut group = c.benchmark_group("self_attention/causal");
    for &seq_len in &[64usize, 256] {
        let (query, keys, values) = inputs(&device, seq_len, seq_len);
        let mask = build_causal_mask(&device, BATCH, seq_len, seq_len).expect("mask");
        group.throughput(Throughput::Elements((BATCH * seq_len * seq_len) as u64));
        group.bench_with_input(BenchmarkId::from_parameter(seq_len), &seq_len, |b, _| {
            b.iter(|| {
                black_box(
                    scorer
                        .attend(&query, &keys, &values, Some(&mask), &config)
                        .expect("attend"),
                )
            });
        });
    }
    group.finish();
}

criterion_group!(benches, bench_scorers, bench_causal_self_attention);
criterion_main!(benches);
