use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tensorcost::ops::{
    AllGather, AllReduce, BatchNorm, Broadcast, Conv2d, Elementwise, Expand, Flatten, Identity,
    MatMul, Pool, Recv, Reduce, Reshape, Send, Slice, Softmax, Squeeze, Transpose, Unary,
    Unsqueeze, Where,
};
use tensorcost::{
    CostModelConfig, CostRuntime, DType, Graph, GraphError, MemoryUnit, OpDef, OpId, OpKind,
    PerfMetrics, Shape,
};

fn close(a: f64, b: f64) -> bool {
    (a - b).abs() <= 1e-12 * a.abs().max(b.abs()).max(1.0)
}

/// Registers `def` over fresh float32 inputs and returns its metrics.
fn metrics_of(runtime: &CostRuntime, def: impl Into<OpDef>, inputs: &[&[usize]]) -> PerfMetrics {
    let mut graph = Graph::new();
    let ids: Vec<_> = inputs
        .iter()
        .map(|dims| graph.add_tensor(*dims, DType::Float32))
        .collect();
    let op = graph.add_op(def, &ids).expect("valid operator");
    runtime.op_metrics(&graph, op).expect("metrics")
}

#[test]
fn matmul_scenario() {
    let mut graph = Graph::new();
    let a = graph.add_tensor([64, 128], DType::Float32);
    let b = graph.add_tensor([128, 64], DType::Float32);
    let op = graph.add_op(MatMul::new(), &[a, b]).expect("matmul");
    let out = graph.output(op).expect("output");
    assert_eq!(graph.tensor(out).expect("tensor").dims(), &[64, 64]);

    let metrics = CostRuntime::default().op_metrics(&graph, op).expect("metrics");
    assert!(close(metrics.compute_time, 2.0 * 64.0 * 64.0 * 128.0 / 5e9));
    assert!(metrics.parallelism <= 4096.0);
    assert!(metrics.parallelism > 0.0);
}

#[test]
fn conv_scenario() {
    let mut graph = Graph::new();
    let x = graph.add_tensor([1, 3, 32, 32], DType::Float32);
    let w = graph.add_tensor([16, 3, 3, 3], DType::Float32);
    let op = graph.add_op(Conv2d::new(), &[x, w]).expect("conv");
    let out = graph.output(op).expect("output");
    assert_eq!(graph.tensor(out).expect("tensor").dims(), &[1, 16, 30, 30]);

    let metrics = CostRuntime::default().op_metrics(&graph, op).expect("metrics");
    assert_eq!(metrics.memory_cost, (3 * 32 * 32 + 16 * 3 * 3 * 3 + 16 * 30 * 30) as f64);
    assert!(close(metrics.compute_time, 16.0 * 30.0 * 30.0 * 27.0 / 1e9));
    assert!(metrics.parallelism <= 10240.0);
}

#[test]
fn bytes_unit_scales_by_dtype() {
    let elements = CostRuntime::default();
    let bytes = CostRuntime::new(CostModelConfig::default().with_memory_unit(MemoryUnit::Bytes));
    let relu_elements = metrics_of(&elements, Unary::relu(), &[&[8, 8]]);
    let relu_bytes = metrics_of(&bytes, Unary::relu(), &[&[8, 8]]);
    assert!(close(relu_bytes.memory_cost, 4.0 * relu_elements.memory_cost));
    assert_eq!(relu_bytes.compute_time, relu_elements.compute_time);
}

#[test]
fn degenerate_layout_changes_are_free() {
    let runtime = CostRuntime::default();
    let cases: Vec<(OpDef, Vec<usize>)> = vec![
        (Reshape::new(vec![2, 3, 4]).into(), vec![2, 3, 4]),
        (Reshape::new(vec![2, 0, -1]).into(), vec![2, 3, 4]),
        (Flatten::new(1).into(), vec![6, 4]),
        (Squeeze::new(vec![0]).into(), vec![1, 6, 4]),
        (Unsqueeze::new(vec![0]).into(), vec![6, 4]),
        (Transpose::new(vec![0, 1, 2]).into(), vec![2, 3, 4]),
        (Transpose::new(Vec::new()).into(), vec![2, 3, 4]),
    ];
    for (def, dims) in cases {
        let label = format!("{def:?}");
        let metrics = metrics_of(&runtime, def, &[dims.as_slice()]);
        assert!(metrics.compute_time <= 1e-6, "{label}: {metrics:?}");
        assert_eq!(metrics.memory_cost, 0.0, "{label}");
    }

    let moved = metrics_of(&runtime, Transpose::new(vec![2, 1, 0]), &[&[2, 3, 4]]);
    assert!(moved.memory_cost > 0.0);
    // identity still streams its input once
    let copy = metrics_of(&runtime, Identity, &[&[2, 3, 4]]);
    assert_eq!(copy.memory_cost, 48.0);
}

fn grow(dims: &[usize], axis: usize, by: usize) -> Vec<usize> {
    let mut out = dims.to_vec();
    out[axis] += by;
    out
}

fn assert_monotone(label: &str, small: PerfMetrics, large: PerfMetrics) {
    assert!(
        large.compute_time >= small.compute_time,
        "{label}: compute {small:?} -> {large:?}"
    );
    assert!(
        large.memory_cost >= small.memory_cost,
        "{label}: memory {small:?} -> {large:?}"
    );
}

#[test]
fn costs_never_shrink_when_a_dimension_grows() {
    let runtime = CostRuntime::default();
    let mut rng = StdRng::seed_from_u64(42);
    for _ in 0..64 {
        let dims: Vec<usize> = (0..3).map(|_| rng.gen_range(1..24)).collect();
        let axis = rng.gen_range(0..3);
        let by = rng.gen_range(1..8);
        let larger = grow(&dims, axis, by);

        for (label, def) in [
            ("relu", OpDef::from(Unary::relu())),
            ("exp", OpDef::from(Unary::new(tensorcost::OpKind::Exp))),
            ("softmax", OpDef::from(Softmax::default())),
            ("reduce", OpDef::from(Reduce::sum(Some(vec![-1]), false))),
            ("transpose", OpDef::from(Transpose::new(vec![2, 0, 1]))),
            ("all-reduce", OpDef::from(AllReduce::sum())),
        ] {
            let small = metrics_of(&runtime, def.clone(), &[dims.as_slice()]);
            let large = metrics_of(&runtime, def, &[larger.as_slice()]);
            assert_monotone(label, small, large);
        }

        let small = metrics_of(&runtime, Elementwise::add(), &[&dims[..], &dims[..]]);
        let large = metrics_of(&runtime, Elementwise::add(), &[&larger[..], &larger[..]]);
        assert_monotone("add", small, large);

        // [b, m, k] x [k, n]
        let k = rng.gen_range(1..32);
        let n = rng.gen_range(1..32);
        let small = metrics_of(&runtime, MatMul::new(), &[&[dims[0], dims[1], k], &[k, n]]);
        let large = metrics_of(
            &runtime,
            MatMul::new(),
            &[&[dims[0], dims[1], k + by], &[k + by, n + by]],
        );
        assert_monotone("matmul", small, large);

        let hw = rng.gen_range(3..16);
        let c = rng.gen_range(1..8);
        let small = metrics_of(&runtime, Conv2d::new(), &[&[1, c, hw, hw], &[4, c, 3, 3]]);
        let large = metrics_of(
            &runtime,
            Conv2d::new(),
            &[&[1 + by, c, hw + by, hw], &[4, c, 3, 3]],
        );
        assert_monotone("conv", small, large);
    }
}

/// Like [`metrics_of`] with an explicit dtype per input.
fn typed_metrics_of(
    runtime: &CostRuntime,
    def: impl Into<OpDef>,
    inputs: &[(&[usize], DType)],
) -> PerfMetrics {
    let mut graph = Graph::new();
    let ids: Vec<_> = inputs
        .iter()
        .map(|(dims, dtype)| graph.add_tensor(*dims, *dtype))
        .collect();
    let op = graph.add_op(def, &ids).expect("valid operator");
    runtime.op_metrics(&graph, op).expect("metrics")
}

#[test]
fn expand_to_a_fixed_target_never_gets_cheaper() {
    let runtime = CostRuntime::default();
    let row = metrics_of(&runtime, Expand::new(vec![8, 4]), &[&[1, 4]]);
    let full = metrics_of(&runtime, Expand::new(vec![8, 4]), &[&[8, 4]]);
    assert_monotone("expand [1,4] -> [8,4]", row, full);
    assert!(close(full.compute_time, (32.0 * 1.2 + 32.0 * 0.2) / 1e9));
}

#[test]
fn where_with_a_growing_branch_never_gets_cheaper() {
    let runtime = CostRuntime::default();
    let full: &[usize] = &[8, 4];
    let narrow = typed_metrics_of(
        &runtime,
        Where,
        &[(&[1, 4], DType::Float32), (full, DType::Float32), (full, DType::Bool)],
    );
    let wide = typed_metrics_of(
        &runtime,
        Where,
        &[(full, DType::Float32), (full, DType::Float32), (full, DType::Bool)],
    );
    assert_monotone("where x [1,4] -> [8,4]", narrow, wide);
}

/// `(x, y, cond)` at the full shape except `slot`, which takes `grown`.
fn where_operands<'a>(
    full: &'a [usize],
    grown: &'a [usize],
    slot: usize,
) -> [(&'a [usize], DType); 3] {
    let mut operands = [
        (full, DType::Float32),
        (full, DType::Float32),
        (full, DType::Bool),
    ];
    operands[slot].0 = grown;
    operands
}

#[test]
fn growing_a_broadcast_operand_never_lowers_costs() {
    let runtime = CostRuntime::default();
    let bytes = CostRuntime::new(CostModelConfig::default().with_memory_unit(MemoryUnit::Bytes));
    let mut rng = StdRng::seed_from_u64(7);
    for _ in 0..64 {
        let full: Vec<usize> = (0..3).map(|_| rng.gen_range(2..12)).collect();
        let axis = rng.gen_range(0..3);
        // unit along `axis`, then a partial rank-trimmed operand, then the full shape
        let mut unit = full.clone();
        unit[axis] = 1;
        let trailing = full[1..].to_vec();
        let steps = [unit.as_slice(), trailing.as_slice(), full.as_slice()];

        for runtime in [&runtime, &bytes] {
            for pair in steps.windows(2) {
                let (small, large) = (pair[0], pair[1]);
                if small.iter().product::<usize>() > large.iter().product::<usize>() {
                    continue;
                }
                let label = format!("{small:?} -> {large:?} into {full:?}");

                let a = metrics_of(runtime, Expand::new(full.clone()), &[small]);
                let b = metrics_of(runtime, Expand::new(full.clone()), &[large]);
                assert_monotone(&format!("expand {label}"), a, b);

                let a = metrics_of(runtime, Elementwise::add(), &[small, &full[..]]);
                let b = metrics_of(runtime, Elementwise::add(), &[large, &full[..]]);
                assert_monotone(&format!("add lhs {label}"), a, b);
                let a = metrics_of(runtime, Elementwise::mul(), &[&full[..], small]);
                let b = metrics_of(runtime, Elementwise::mul(), &[&full[..], large]);
                assert_monotone(&format!("mul rhs {label}"), a, b);

                for slot in 0..3 {
                    let a = typed_metrics_of(runtime, Where, &where_operands(&full, small, slot));
                    let b = typed_metrics_of(runtime, Where, &where_operands(&full, large, slot));
                    assert_monotone(&format!("where slot {slot} {label}"), a, b);
                }
            }
        }
    }
}

#[test]
fn fixed_window_operators_never_shrink_with_their_input() {
    let runtime = CostRuntime::default();
    let mut rng = StdRng::seed_from_u64(11);
    for _ in 0..64 {
        let n = rng.gen_range(2..10);
        let c = rng.gen_range(1..8);
        let by = rng.gen_range(1..6);

        // the first two rows only, whatever the extent
        let slice = || Slice::new(vec![0], vec![2]).with_axes(vec![0]);
        let a = metrics_of(&runtime, slice(), &[&[n, c]]);
        let b = metrics_of(&runtime, slice(), &[&[n + by, c]]);
        assert_monotone("slice rows", a, b);
        let a = metrics_of(&runtime, slice(), &[&[n, c]]);
        let b = metrics_of(&runtime, slice(), &[&[n, c + by]]);
        assert_monotone("slice columns", a, b);

        let hw = rng.gen_range(2..12);
        for kind in [OpKind::MaxPool, OpKind::AveragePool] {
            let pool = || Pool::new(kind, [2, 2]);
            let a = metrics_of(&runtime, pool(), &[&[1, c, hw, hw]]);
            let b = metrics_of(&runtime, pool(), &[&[1, c, hw + by, hw]]);
            assert_monotone("pool height", a, b);
            let b = metrics_of(&runtime, pool(), &[&[1, c + by, hw, hw]]);
            assert_monotone("pool channels", a, b);
        }
    }
}

#[test]
fn batch_norm_costs_five_operations_per_element() {
    let runtime = CostRuntime::default();
    let mut graph = Graph::new();
    let x = graph.add_tensor([2, 4, 8, 8], DType::Float32);
    let c = graph.add_tensor([4], DType::Float32);
    let op = graph
        .add_op(BatchNorm::default(), &[x, c, c, c, c])
        .expect("batch norm");
    let metrics = runtime.op_metrics(&graph, op).expect("metrics");
    assert!(close(metrics.compute_time, 512.0 * 5.0 / 1e9));

    let err = graph
        .add_op(BatchNorm::default().training(), &[x, c, c, c, c])
        .expect_err("training");
    assert!(matches!(err, GraphError::Unsupported { .. }), "{err}");
}

#[test]
fn collectives_read_the_configured_world_size() {
    let narrow = CostRuntime::new(CostModelConfig::default().with_world_size(2));
    let wide = CostRuntime::new(CostModelConfig::default().with_world_size(16));
    let dims: &[usize] = &[1024];

    let a = metrics_of(&narrow, AllReduce::sum(), &[dims]);
    let b = metrics_of(&wide, AllReduce::sum(), &[dims]);
    assert!(close(a.compute_time, (1024.0 * 1.0 * 1e-7 + 1024.0 * 1e-9) * 1.0));
    assert!(close(b.compute_time, (1024.0 * 4.0 * 1e-7 + 1024.0 * 1e-9) * 1.0));
    assert!(close(a.parallelism, 1.8));
    assert!(close(b.parallelism, 14.4));

    let avg = metrics_of(&narrow, AllReduce::avg(), &[dims]);
    assert!(close(avg.compute_time, a.compute_time * 1.3));

    let bcast = metrics_of(&wide, Broadcast::new(0), &[dims]);
    assert!(close(bcast.compute_time, 1024.0 * 4.0 * 1e-7));
    assert_eq!(bcast.parallelism, 15.0);

    // AllGather keeps its own width regardless of the configuration.
    let gather = metrics_of(&narrow, AllGather::new(4), &[dims]);
    assert!(close(gather.compute_time, 1024.0 * 2.0 * 1e-7));
    assert_eq!(gather.memory_cost, 1024.0 * 5.0);
    assert!(close(gather.parallelism, 3.2));
}

#[test]
fn point_to_point_memory_follows_the_configured_unit() {
    let elements = CostRuntime::default();
    let bytes = CostRuntime::new(CostModelConfig::default().with_memory_unit(MemoryUnit::Bytes));
    let dims: &[usize] = &[256];

    let send_bytes = metrics_of(&bytes, Send::new(0, 1), &[dims]);
    // payload, send buffer, protocol overhead, mirrored output
    assert_eq!(send_bytes.memory_cost, 1024.0 * 3.0 + 256.0);
    let send_elements = metrics_of(&elements, Send::new(0, 1), &[dims]);
    assert_eq!(send_elements.memory_cost, 256.0 * 3.0 + 64.0);
    assert!(close(send_bytes.compute_time, 1024.0 / 10e9 + 0.01 / 1000.0 + 1e-4));
    assert_eq!(send_bytes.parallelism, 1.0);

    let far = metrics_of(&bytes, Send::new(0, 4), &[dims]);
    assert!(far.compute_time > send_bytes.compute_time);

    let mut graph = Graph::new();
    let recv = graph
        .add_op(Recv::new(0, 1, Shape::new(vec![256]), DType::Float32), &[])
        .expect("recv");
    let metrics = bytes.op_metrics(&graph, recv).expect("metrics");
    assert_eq!(metrics.memory_cost, 1024.0 + 256.0);
}

#[test]
fn workload_keys_separate_shapes_attr_keys_do_not() {
    let mut graph = Graph::new();
    let a = graph.add_tensor([8, 16], DType::Float32);
    let b = graph.add_tensor([16, 4], DType::Float32);
    let c = graph.add_tensor([8, 32], DType::Float32);
    let d = graph.add_tensor([32, 4], DType::Float32);
    let small: OpId = graph.add_op(MatMul::new(), &[a, b]).expect("small");
    let large: OpId = graph.add_op(MatMul::new(), &[c, d]).expect("large");
    let small = graph.op(small).expect("view");
    let large = graph.op(large).expect("view");

    assert_eq!(small.attr_vector(), large.attr_vector());
    assert_ne!(small.workload_vector(), large.workload_vector());
    assert_ne!(small.perf_key(), large.perf_key());
    assert_eq!(small.workload_vector()[0], tensorcost::OpKind::MatMul.tag());
    assert_eq!(small.perf_key().attrs, small.attr_vector());
}
