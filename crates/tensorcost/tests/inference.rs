use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tensorcost::ops::{
    AllGather, AllReduce, AttentionKvCache, BatchNorm, Cast, CastType, Concat, Conv2d,
    ConvTranspose2d, Det, DetMode, Dropout, Elementwise, Expand, Flatten, LayerNorm, MatMul,
    Pad, Pool, Recv, Reduce, Reshape, Rope, Slice, Softmax, Split, SplitSpec, Squeeze,
    Transpose, Unary, Unsqueeze, Where,
};
use tensorcost::tensor::shape::broadcast_shapes;
use tensorcost::{DType, Graph, GraphError, OpId, OpKind, Shape, TensorId};

fn dims_of(graph: &Graph, op: OpId) -> Vec<Vec<usize>> {
    graph
        .outputs(op)
        .expect("outputs")
        .iter()
        .map(|&t| graph.tensor(t).expect("tensor").dims().to_vec())
        .collect()
}

fn f32_tensor(graph: &mut Graph, dims: &[usize]) -> TensorId {
    graph.add_tensor(dims, DType::Float32)
}

#[test]
fn reinference_matches_registered_outputs() {
    let mut graph = Graph::new();
    let x = f32_tensor(&mut graph, &[2, 3, 8, 8]);
    let w = f32_tensor(&mut graph, &[4, 3, 3, 3]);
    let a = f32_tensor(&mut graph, &[2, 16, 32]);
    let b = f32_tensor(&mut graph, &[32, 8]);
    let row = f32_tensor(&mut graph, &[8]);
    let square = f32_tensor(&mut graph, &[5, 4, 4]);

    let mut ops = vec![
        graph.add_op(Conv2d::new().with_pads(1, 1), &[x, w]).expect("conv"),
        graph.add_op(Pool::max([2, 2]), &[x]).expect("pool"),
        graph.add_op(MatMul::new(), &[a, b]).expect("matmul"),
        graph.add_op(Elementwise::add(), &[a, a]).expect("add"),
        graph.add_op(Reduce::mean(Some(vec![1]), false), &[a]).expect("reduce"),
        graph.add_op(Softmax::default(), &[a]).expect("softmax"),
        graph.add_op(Transpose::new(vec![0, 2, 1]), &[a]).expect("transpose"),
        graph.add_op(Reshape::new(vec![0, -1]), &[a]).expect("reshape"),
        graph.add_op(Flatten::default(), &[x]).expect("flatten"),
        graph.add_op(Unsqueeze::new(vec![0]), &[row]).expect("unsqueeze"),
        graph
            .add_op(Split::new(1, SplitSpec::Num(3)), &[a])
            .expect("split"),
        graph
            .add_op(Slice::new(vec![1], vec![-1]).with_axes(vec![2]), &[a])
            .expect("slice"),
        graph.add_op(Pad::new(vec![0, 1, 1, 0]).with_axes(vec![1, 2]), &[a]).expect("pad"),
        graph.add_op(Det::new(DetMode::LogDet), &[square]).expect("det"),
        graph.add_op(AllGather::new(2), &[row]).expect("all-gather"),
    ];
    ops.push(graph.add_op(Unary::relu(), &[row]).expect("relu"));

    for id in ops {
        let view = graph.op(id).expect("view");
        let first: Vec<Shape> = view.infer_shapes().expect("first");
        let second: Vec<Shape> = view.infer_shapes().expect("second");
        assert_eq!(first, second, "{view}");
        let registered: Vec<Shape> = view.outputs().iter().map(|t| t.shape().clone()).collect();
        assert_eq!(first, registered, "{view}");
        assert_eq!(
            view.infer_dtypes().expect("dtypes"),
            view.outputs().iter().map(|t| t.dtype()).collect::<Vec<_>>()
        );
    }
}

#[test]
fn family_shapes() {
    let mut graph = Graph::new();
    let x = f32_tensor(&mut graph, &[1, 3, 32, 32]);
    let w = f32_tensor(&mut graph, &[16, 3, 3, 3]);
    let conv = graph
        .add_op(Conv2d::new().with_strides(2, 2), &[x, w])
        .expect("conv");
    assert_eq!(dims_of(&graph, conv), vec![vec![1, 16, 15, 15]]);

    let y = f32_tensor(&mut graph, &[1, 4, 5, 5]);
    let wt = f32_tensor(&mut graph, &[4, 2, 3, 3]);
    let deconv = graph
        .add_op(ConvTranspose2d::new().with_strides(2, 2), &[y, wt])
        .expect("conv transpose");
    // (5 - 1) * 2 + (3 - 1) + 1
    assert_eq!(dims_of(&graph, deconv), vec![vec![1, 2, 11, 11]]);

    let r = f32_tensor(&mut graph, &[2, 3, 4]);
    let all = graph.add_op(Reduce::sum(None, false), &[r]).expect("reduce");
    assert_eq!(dims_of(&graph, all), vec![vec![1]]);
    let kept = graph
        .add_op(Reduce::max(Some(vec![-1]), true), &[r])
        .expect("reduce");
    assert_eq!(dims_of(&graph, kept), vec![vec![2, 3, 1]]);

    let split = graph
        .add_op(Split::new(2, SplitSpec::Num(3)), &[r])
        .expect("split");
    assert_eq!(
        dims_of(&graph, split),
        vec![vec![2, 3, 1], vec![2, 3, 1], vec![2, 3, 2]]
    );

    let ones = f32_tensor(&mut graph, &[1, 3, 1]);
    let squeezed = graph.add_op(Squeeze::new(Vec::new()), &[ones]).expect("squeeze");
    assert_eq!(dims_of(&graph, squeezed), vec![vec![3]]);
    let expanded = graph
        .add_op(Expand::new(vec![2, 3, 4]), &[ones])
        .expect("expand");
    assert_eq!(dims_of(&graph, expanded), vec![vec![2, 3, 4]]);

    let sliced = graph
        .add_op(
            Slice::new(vec![-1], vec![i64::MIN])
                .with_axes(vec![2])
                .with_steps(vec![-2]),
            &[r],
        )
        .expect("reverse slice");
    assert_eq!(dims_of(&graph, sliced), vec![vec![2, 3, 2]]);
}

#[test]
fn dtype_rules() {
    let mut graph = Graph::new();
    let a = f32_tensor(&mut graph, &[4]);
    let b = f32_tensor(&mut graph, &[4]);
    let cmp = graph
        .add_op(Elementwise::new(OpKind::Less), &[a, b])
        .expect("less");
    let mask = graph.output(cmp).expect("mask");
    assert_eq!(graph.tensor(mask).expect("mask").dtype(), DType::Bool);

    let selected = graph.add_op(Where, &[a, b, mask]).expect("where");
    let out = graph.output(selected).expect("out");
    assert_eq!(graph.tensor(out).expect("out").dtype(), DType::Float32);

    let cast = graph
        .add_op(Cast::new(CastType::Float2Int32), &[a])
        .expect("cast");
    let out = graph.output(cast).expect("out");
    assert_eq!(graph.tensor(out).expect("out").dtype(), DType::Int32);

    let dropout = graph.add_op(Dropout::new(0.1), &[a]).expect("dropout");
    let outs = graph.outputs(dropout).expect("outs");
    assert_eq!(graph.tensor(outs[1]).expect("mask").dtype(), DType::Bool);

    let recv = graph
        .add_op(Recv::new(1, 0, Shape::new(vec![2, 2]), DType::Float16), &[])
        .expect("recv");
    let out = graph.output(recv).expect("out");
    assert_eq!(graph.tensor(out).expect("out").dims(), &[2, 2]);
    assert_eq!(graph.tensor(out).expect("out").dtype(), DType::Float16);
}

#[test]
fn broadcast_is_commutative_and_takes_max_rank() {
    let mut rng = StdRng::seed_from_u64(0x5eed);
    for _ in 0..500 {
        let rank = rng.gen_range(0..5);
        let full: Vec<usize> = (0..rank).map(|_| rng.gen_range(1..6)).collect();
        let mut pick = |rng: &mut StdRng| -> Vec<usize> {
            let keep = rng.gen_range(0..=rank);
            full[rank - keep..]
                .iter()
                .map(|&d| if rng.gen_bool(0.3) { 1 } else { d })
                .collect()
        };
        let lhs = pick(&mut rng);
        let rhs = pick(&mut rng);
        let ab = broadcast_shapes(&lhs, &rhs).expect("compatible");
        let ba = broadcast_shapes(&rhs, &lhs).expect("compatible");
        assert_eq!(ab, ba, "{lhs:?} vs {rhs:?}");
        assert_eq!(ab.len(), lhs.len().max(rhs.len()));
    }
    broadcast_shapes(&[2, 3], &[4, 3]).expect_err("2 vs 4");
}

#[test]
fn det_rejects_non_square_input() {
    let mut graph = Graph::new();
    let x = f32_tensor(&mut graph, &[2, 3]);
    let err = graph.add_op(Det::default(), &[x]).expect_err("not square");
    assert!(matches!(err, GraphError::InvalidOperator { kind: OpKind::Det, .. }));
    let vector = f32_tensor(&mut graph, &[4]);
    graph.add_op(Det::default(), &[vector]).expect_err("rank 1");

    let m = f32_tensor(&mut graph, &[3, 3]);
    let det = graph.add_op(Det::default(), &[m]).expect("square");
    assert_eq!(dims_of(&graph, det), vec![vec![1]]);
}

#[test]
fn concat_rejects_mismatched_non_axis_dims() {
    let mut graph = Graph::new();
    let a = f32_tensor(&mut graph, &[2, 3, 4]);
    let b = f32_tensor(&mut graph, &[2, 5, 4]);
    let err = graph.add_op(Concat::new(2), &[a, b]).expect_err("axis 1 differs");
    assert!(matches!(err, GraphError::InvalidOperator { kind: OpKind::Concat, .. }));
    let ok = graph.add_op(Concat::new(1), &[a, b]).expect("concat");
    assert_eq!(dims_of(&graph, ok), vec![vec![2, 8, 4]]);
}

#[test]
fn unsupported_configurations_are_distinct() {
    let mut graph = Graph::new();
    let x = f32_tensor(&mut graph, &[1, 3, 8, 8]);
    let w = f32_tensor(&mut graph, &[4, 3, 3, 3]);
    let bias = f32_tensor(&mut graph, &[4]);
    let err = graph
        .add_op(Conv2d::new(), &[x, w, bias])
        .expect_err("bias");
    assert!(matches!(err, GraphError::Unsupported { kind: OpKind::Conv, .. }));

    let c = f32_tensor(&mut graph, &[3]);
    let err = graph
        .add_op(BatchNorm::default().training(), &[x, c, c, c, c])
        .expect_err("training");
    assert!(matches!(err, GraphError::Unsupported { .. }), "{err}");

    let mut dropout = Dropout::new(0.5);
    dropout.training = true;
    let err = graph.add_op(dropout, &[x]).expect_err("training");
    assert!(matches!(err, GraphError::Unsupported { .. }));
}

#[test]
fn normalization_and_attention_shapes() {
    let mut graph = Graph::new();
    let x = f32_tensor(&mut graph, &[2, 7, 16]);
    let gamma = f32_tensor(&mut graph, &[16]);
    let ln = graph
        .add_op(LayerNorm::default(), &[x, gamma])
        .expect("layer norm");
    assert_eq!(dims_of(&graph, ln), vec![vec![2, 7, 16]]);
    let wrong = f32_tensor(&mut graph, &[7]);
    graph
        .add_op(LayerNorm::default(), &[x, wrong])
        .expect_err("scale does not broadcast");

    let cache = f32_tensor(&mut graph, &[1, 8, 32, 64]);
    let q = f32_tensor(&mut graph, &[1, 8, 1, 64]);
    let pos = graph.add_tensor([1], DType::Int64);
    let attn = graph
        .add_op(AttentionKvCache, &[cache, cache, q, q, q, pos])
        .expect("attention");
    assert_eq!(dims_of(&graph, attn), vec![vec![1, 8, 1, 64]]);
    let flat = f32_tensor(&mut graph, &[8, 64]);
    graph
        .add_op(AttentionKvCache, &[flat, flat, q, q, q, pos])
        .expect_err("rank-2 cache");

    let rope = graph.add_op(Rope, &[pos, q]).expect("rope");
    assert_eq!(dims_of(&graph, rope), vec![vec![1, 8, 1, 64]]);

    let sum = graph.add_op(AllReduce::sum(), &[x]).expect("all-reduce");
    assert_eq!(dims_of(&graph, sum), vec![vec![2, 7, 16]]);
}
