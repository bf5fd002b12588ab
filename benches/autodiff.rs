//! Autodiff benchmarks
//!
//! - Linear layer forward vs predict
//! - Full training step (forward, loss, backward, update) on an MLP stack
//! - Backward through a wide fan-out graph

use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};
use tidegrad::{
    Function, FunctionStack, Graph, Linear, MeanSquaredError, OptimizerConfig, ReLU, Sgd, Sum,
};

fn input_data(batch: usize, features: usize) -> Vec<f32> {
    (0..batch * features).map(|i| (i as f32 * 0.01).sin()).collect()
}

fn mlp(graph: &mut Graph, width: usize) -> FunctionStack {
    FunctionStack::builder()
        .add(Linear::layer(64, width, true, Some(1)).expect("layer"))
        .add(Function::from(ReLU))
        .add(Linear::layer(width, width, true, Some(2)).expect("layer"))
        .add(Function::from(ReLU))
        .add(Linear::layer(width, 10, true, Some(3)).expect("layer"))
        .build(graph)
}

fn bench_linear(c: &mut Criterion) {
    let mut group = c.benchmark_group("linear_256x256");
    for batch in [1, 16, 64] {
        let mut graph = Graph::new();
        let f = graph.add_function(Linear::layer(256, 256, true, Some(0)).expect("layer"));
        let data = input_data(batch, 256);

        group.bench_with_input(BenchmarkId::new("forward", batch), &batch, |b, &batch| {
            b.iter(|| {
                let x = graph.input(data.clone(), &[256], batch).expect("input");
                black_box(graph.forward_one(f, &[x]).expect("forward"));
                graph.release_activations();
            });
        });
        group.bench_with_input(BenchmarkId::new("predict", batch), &batch, |b, &batch| {
            b.iter(|| {
                let x = graph.input(data.clone(), &[256], batch).expect("input");
                black_box(graph.predict_one(f, &[x]).expect("predict"));
                graph.release_activations();
            });
        });
    }
    group.finish();
}

fn bench_training_step(c: &mut Criterion) {
    let mut group = c.benchmark_group("mlp_train_step");
    for batch in [8, 32, 128] {
        let mut graph = Graph::new();
        let mut stack = mlp(&mut graph, 128);
        stack
            .set_optimizer(&graph, &OptimizerConfig::Sgd(Sgd::new(0.01)))
            .expect("optimizer");
        let data = input_data(batch, 64);
        let target = vec![0.5; batch * 10];

        group.bench_with_input(BenchmarkId::from_parameter(batch), &batch, |b, &batch| {
            b.iter(|| {
                let x = graph.input(data.clone(), &[64], batch).expect("input");
                let y = stack.forward(&mut graph, x).expect("forward");
                let loss = MeanSquaredError.evaluate(&mut graph, y, &target).expect("loss");
                stack.backward(&mut graph, y).expect("backward");
                stack.update(&mut graph).expect("update");
                graph.release_activations();
                black_box(loss)
            });
        });
    }
    group.finish();
}

fn bench_fan_out(c: &mut Criterion) {
    let mut group = c.benchmark_group("fan_out_backward");
    for uses in [4, 32, 256] {
        let mut graph = Graph::new();
        let sum = graph.add_function(Function::from(Sum));
        let data = input_data(1, 1024);

        group.bench_with_input(BenchmarkId::from_parameter(uses), &uses, |b, &uses| {
            b.iter(|| {
                let x = graph.input(data.clone(), &[1024], 1).expect("input");
                let y = graph.forward_one(sum, &vec![x; uses]).expect("forward");
                graph.seed_ones(y).expect("seed");
                graph.backward(y).expect("backward");
                black_box(graph.grad(x).expect("grad").map(<[f32]>::len));
                graph.release_activations();
            });
        });
    }
    group.finish();
}

criterion_group!(benches, bench_linear, bench_training_step, bench_fan_out);
criterion_main!(benches);
