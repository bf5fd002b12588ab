//! Behaviour of the consumer-count backward scheduler across whole graphs.

use approx::assert_relative_eq;
use tidegrad::{
    Add, Function, FunctionId, Graph, InvocationState, Linear, Mul, Split, Tanh, TensorId,
    TideError,
};

fn scale(graph: &mut Graph, w: f32) -> FunctionId {
    graph.add_function(Linear::from_weights(vec![w], None, 1, 1).unwrap())
}

fn weight_grad(graph: &Graph, f: FunctionId) -> Vec<f32> {
    let w = graph.params_of(f).unwrap()[0];
    graph.param(w).unwrap().grad_or_zeros()
}

#[test]
fn diamond_fan_out_sums_both_paths() {
    let _ = env_logger::builder().is_test(true).try_init();
    let mut graph = Graph::new();
    let m = scale(&mut graph, 1.5);
    let a = scale(&mut graph, 2.0);
    let b = scale(&mut graph, 3.0);
    let add = graph.add_function(Function::from(Add));

    let x = graph.input(vec![2.0], &[1], 1).unwrap();
    let h = graph.forward_one(m, &[x]).unwrap();
    let ya = graph.forward_one(a, &[h]).unwrap();
    let yb = graph.forward_one(b, &[h]).unwrap();
    let y = graph.forward_one(add, &[ya, yb]).unwrap();
    assert_eq!(graph.tensor(h).unwrap().consumer_count(), 2);

    graph.seed_ones(y).unwrap();
    graph.backward(y).unwrap();

    assert_eq!(graph.grad(h).unwrap(), Some(&[5.0][..]));
    assert_eq!(graph.grad(x).unwrap(), Some(&[7.5][..]));
    assert_eq!(weight_grad(&graph, m), vec![10.0]);
    let w = graph.params_of(m).unwrap()[0];
    assert_eq!(graph.param(w).unwrap().pending_update_count(), 1);
}

#[test]
fn consumer_counts_return_to_zero_after_backward() {
    let mut graph = Graph::new();
    let m = scale(&mut graph, 0.5);
    let mul = graph.add_function(Function::from(Mul));
    let add = graph.add_function(Function::from(Add));

    let x = graph.input(vec![1.0, -2.0], &[1], 2).unwrap();
    let h = graph.forward_one(m, &[x]).unwrap();
    let sq = graph.forward_one(mul, &[h, h]).unwrap();
    let y = graph.forward_one(add, &[sq, x]).unwrap();
    graph.seed_ones(y).unwrap();
    graph.backward(y).unwrap();

    for id in graph.tensor_ids() {
        assert_eq!(graph.tensor(id).unwrap().consumer_count(), 0, "{id:?}");
    }
    for f in [m, mul, add] {
        assert!(graph.function(f).unwrap().pending().is_empty());
    }
    // d/dx (0.25 x^2 + x) = 0.5 x + 1
    assert_eq!(graph.grad(x).unwrap(), Some(&[1.5, 0.0][..]));
}

#[test]
fn second_backward_on_same_output_is_stale() {
    let mut graph = Graph::new();
    let f = scale(&mut graph, 2.0);
    let x = graph.input(vec![1.0], &[1], 1).unwrap();
    let y = graph.forward_one(f, &[x]).unwrap();
    graph.seed_ones(y).unwrap();
    graph.backward(y).unwrap();

    let err = graph.backward(y).unwrap_err();
    assert!(matches!(err, TideError::StaleBackward { .. }));
    assert_eq!(weight_grad(&graph, f), vec![1.0]);
}

#[test]
fn unseeded_output_is_rejected_and_leaves_are_noops() {
    let mut graph = Graph::new();
    let f = scale(&mut graph, 2.0);
    let x = graph.input(vec![1.0], &[1], 1).unwrap();
    let y = graph.forward_one(f, &[x]).unwrap();

    assert!(matches!(
        graph.backward(y).unwrap_err(),
        TideError::UnseededGradient
    ));
    graph.backward(x).unwrap();
    assert!(graph.grad(x).unwrap().is_none());
}

#[test]
fn arity_violation_records_nothing() {
    let mut graph = Graph::new();
    let add = graph.add_function(Function::from(Add));
    let x = graph.input(vec![1.0], &[1], 1).unwrap();

    let err = graph.forward(add, &[x]).unwrap_err();
    assert!(matches!(err, TideError::Arity { .. }));
    assert_eq!(graph.tensor(x).unwrap().consumer_count(), 0);
    assert!(graph.function(add).unwrap().pending().is_empty());
}

#[test]
fn repeated_passes_accumulate_parameter_gradients() {
    let mut graph = Graph::new();
    let f = scale(&mut graph, 1.0);
    for v in [1.0, 2.0, 3.0] {
        let x = graph.input(vec![v], &[1], 1).unwrap();
        let y = graph.forward_one(f, &[x]).unwrap();
        graph.seed_ones(y).unwrap();
        graph.backward(y).unwrap();
    }
    let w = graph.params_of(f).unwrap()[0];
    let param = graph.param(w).unwrap();
    assert_eq!(param.grad.as_deref(), Some(&[6.0][..]));
    assert_eq!(param.pending_update_count(), 3);
}

#[test]
fn recurrent_weight_pairs_each_call_with_its_inputs() {
    let mut graph = Graph::new();
    let f = scale(&mut graph, 0.5);
    let x = graph.input(vec![1.0], &[1], 1).unwrap();
    let h1 = graph.forward_one(f, &[x]).unwrap();
    let h2 = graph.forward_one(f, &[h1]).unwrap();
    assert_eq!(graph.function(f).unwrap().pending().len(), 2);

    graph.seed_ones(h2).unwrap();
    graph.backward(h2).unwrap();

    // y = w^2 x: dy/dw = h1 + w x = 1.0, dy/dx = w^2
    assert_relative_eq!(weight_grad(&graph, f)[0], 1.0);
    assert_relative_eq!(graph.grad(x).unwrap().unwrap()[0], 0.25);
    assert!(graph.function(f).unwrap().pending().is_empty());
}

#[test]
fn backward_through_older_call_takes_buried_entry() {
    let mut graph = Graph::new();
    let f = scale(&mut graph, 1.0);
    let x1 = graph.input(vec![1.0], &[1], 1).unwrap();
    let x2 = graph.input(vec![10.0], &[1], 1).unwrap();
    let y1 = graph.forward_one(f, &[x1]).unwrap();
    let y2 = graph.forward_one(f, &[x2]).unwrap();

    graph.seed_ones(y1).unwrap();
    graph.backward(y1).unwrap();
    assert_eq!(weight_grad(&graph, f), vec![1.0]);
    let left = graph.tensor(y2).unwrap().producer().unwrap();
    assert_eq!(
        graph.function(f).unwrap().pending().latest(),
        Some(left)
    );
    assert_eq!(
        graph.invocation(left).unwrap().state(),
        InvocationState::Pending
    );

    graph.seed_ones(y2).unwrap();
    graph.backward(y2).unwrap();
    assert_eq!(weight_grad(&graph, f), vec![11.0]);
    assert!(graph.function(f).unwrap().pending().is_empty());
}

#[test]
fn multi_output_waits_for_every_output() {
    let mut graph = Graph::new();
    let split = graph.add_function(Function::from(Split::new(vec![1, 1])));
    let a = scale(&mut graph, 2.0);
    let b = scale(&mut graph, 3.0);
    let add = graph.add_function(Function::from(Add));

    let x = graph.input(vec![3.0, 4.0], &[2], 1).unwrap();
    let parts = graph.forward(split, &[x]).unwrap();
    let ya = graph.forward_one(a, &[parts[0]]).unwrap();
    let yb = graph.forward_one(b, &[parts[1]]).unwrap();
    let y = graph.forward_one(add, &[ya, yb]).unwrap();

    graph.seed_ones(y).unwrap();
    graph.backward(y).unwrap();
    assert_eq!(graph.grad(x).unwrap(), Some(&[2.0, 3.0][..]));
    assert!(graph.function(split).unwrap().pending().is_empty());
}

#[test]
fn multi_output_partial_backward_defers_producer() {
    let mut graph = Graph::new();
    let split = graph.add_function(Function::from(Split::new(vec![1, 1])));
    let a = scale(&mut graph, 2.0);
    let b = scale(&mut graph, 3.0);

    let x = graph.input(vec![3.0, 4.0], &[2], 1).unwrap();
    let parts = graph.forward(split, &[x]).unwrap();
    let ya = graph.forward_one(a, &[parts[0]]).unwrap();
    let yb = graph.forward_one(b, &[parts[1]]).unwrap();

    graph.seed_ones(ya).unwrap();
    graph.backward(ya).unwrap();
    assert!(graph.grad(x).unwrap().is_none());
    assert_eq!(graph.function(split).unwrap().pending().len(), 1);

    graph.seed_ones(yb).unwrap();
    graph.backward(yb).unwrap();
    assert_eq!(graph.grad(x).unwrap(), Some(&[2.0, 3.0][..]));
}

#[test]
fn predict_matches_forward_without_history() {
    let mut graph = Graph::new();
    let f = graph.add_function(
        Linear::layer(3, 2, true, Some(3))
            .unwrap()
            .with_activation(Box::new(Tanh))
            .unwrap(),
    );
    let x = graph.input(vec![0.1, 0.2, 0.3, -0.1, -0.2, -0.3], &[3], 2).unwrap();

    let inferred = graph.predict_one(f, &[x]).unwrap();
    assert!(graph.tensor(inferred).unwrap().is_leaf());
    assert!(graph.function(f).unwrap().pending().is_empty());
    assert_eq!(graph.tensor(x).unwrap().consumer_count(), 0);

    let trained = graph.forward_one(f, &[x]).unwrap();
    assert_eq!(graph.data(inferred).unwrap(), graph.data(trained).unwrap());
}

#[test]
fn released_ids_are_unknown() {
    let mut graph = Graph::new();
    let f = scale(&mut graph, 2.0);
    let x = graph.input(vec![1.0], &[1], 1).unwrap();
    let y = graph.forward_one(f, &[x]).unwrap();
    graph.release_activations();

    assert!(matches!(graph.data(y).unwrap_err(), TideError::UnknownTensor(_)));
    assert!(graph.function(f).unwrap().pending().is_empty());
    assert_eq!(graph.tensor_count(), 0);
}

#[test]
fn reset_history_abandons_pending_calls() {
    let mut graph = Graph::new();
    let f = scale(&mut graph, 2.0);
    let x = graph.input(vec![1.0], &[1], 1).unwrap();
    let y = graph.forward_one(f, &[x]).unwrap();
    graph.reset_history(f).unwrap();
    let call = graph.tensor(y).unwrap().producer().unwrap();
    assert_eq!(
        graph.invocation(call).unwrap().state(),
        InvocationState::Abandoned
    );

    graph.seed_ones(y).unwrap();
    assert!(matches!(
        graph.backward(y).unwrap_err(),
        TideError::StaleBackward { .. }
    ));
}

fn split_then_add(direct_first: bool) -> (Graph, TensorId, TensorId) {
    let mut graph = Graph::new();
    let split = graph.add_function(Function::from(Split::new(vec![1, 1])));
    let f = scale(&mut graph, 3.0);
    let add = graph.add_function(Function::from(Add));

    let x = graph.input(vec![1.0, 2.0], &[2], 1).unwrap();
    let parts = graph.forward(split, &[x]).unwrap();
    let u = graph.forward_one(f, &[parts[1]]).unwrap();
    let inputs = if direct_first {
        [parts[0], u]
    } else {
        [u, parts[0]]
    };
    let z = graph.forward_one(add, &inputs).unwrap();
    (graph, x, z)
}

#[test]
fn multi_output_reached_twice_in_one_pass_runs_once() {
    for direct_first in [true, false] {
        let (mut graph, x, z) = split_then_add(direct_first);
        graph.seed_ones(z).unwrap();
        graph.backward(z).unwrap();
        assert_eq!(graph.grad(x).unwrap(), Some(&[1.0, 3.0][..]), "{direct_first}");
        for id in graph.tensor_ids() {
            assert_eq!(graph.tensor(id).unwrap().consumer_count(), 0);
        }
    }
}
