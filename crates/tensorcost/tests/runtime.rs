use tensorcost::ops::{Conv2d, Elementwise, MatMul, Unary};
use tensorcost::{
    ActType, CostModelConfig, CostRuntime, DType, FusionCriterion, Graph, GraphError, MemoryUnit,
    ParallelismReduction, PerfMetrics,
};

fn matmul_pair(act: ActType) -> Graph {
    let mut graph = Graph::new();
    let a = graph.add_tensor([128, 256], DType::Float32);
    let b = graph.add_tensor([256, 64], DType::Float32);
    let op = graph
        .add_op(MatMul::new().with_act(act), &[a, b])
        .expect("matmul");
    if act == ActType::None {
        let out = graph.output(op).expect("output");
        graph.add_op(Unary::relu(), &[out]).expect("relu");
    }
    graph
}

fn conv_pair(act: ActType) -> Graph {
    let mut graph = Graph::new();
    let x = graph.add_tensor([1, 8, 32, 32], DType::Float32);
    let w = graph.add_tensor([16, 8, 3, 3], DType::Float32);
    let op = graph
        .add_op(Conv2d::new().with_pads(1, 1).with_act(act), &[x, w])
        .expect("conv");
    if act == ActType::None {
        let out = graph.output(op).expect("output");
        graph.add_op(Unary::relu(), &[out]).expect("relu");
    }
    graph
}

fn add_pair(act: ActType) -> Graph {
    let mut graph = Graph::new();
    let a = graph.add_tensor([64, 64], DType::Float32);
    let b = graph.add_tensor([64, 64], DType::Float32);
    let op = graph
        .add_op(Elementwise::add().with_act(act), &[a, b])
        .expect("add");
    if act == ActType::None {
        let out = graph.output(op).expect("output");
        graph.add_op(Unary::relu(), &[out]).expect("relu");
    }
    graph
}

#[test]
fn fused_activations_win_on_compute_time() {
    let runtime = CostRuntime::default();
    for (label, build) in [
        ("matmul", matmul_pair as fn(ActType) -> Graph),
        ("conv", conv_pair),
        ("add", add_pair),
    ] {
        let original = build(ActType::None);
        let fused = build(ActType::Relu);
        assert_eq!(original.num_ops(), 2);
        assert_eq!(fused.num_ops(), 1);

        let decision = runtime.fusion_decision(&original, &fused).expect(label);
        assert!(decision.fuse, "{label}: {decision:?}");
        assert_eq!(decision.criterion, FusionCriterion::ComputeTime, "{label}");
        assert!(decision.fused.compute_time < decision.original.compute_time);
        assert!(runtime.should_fuse(&original, &fused).expect(label));
        // the reverse rewrite is never worth it
        assert!(!runtime.should_fuse(&fused, &original).expect(label));
    }
}

#[test]
fn identical_graphs_keep_the_original() {
    let runtime = CostRuntime::default();
    let graph = matmul_pair(ActType::None);
    let decision = runtime.fusion_decision(&graph, &graph).expect("decision");
    assert!(!decision.fuse);
    assert_eq!(decision.criterion, FusionCriterion::Tie);
    assert_eq!(decision.original, decision.fused);
}

#[test]
fn empty_graph_costs_nothing() {
    let runtime = CostRuntime::default();
    let graph = Graph::new();
    assert!(graph.is_empty());
    assert_eq!(
        runtime.perf_metrics(&graph, true).expect("metrics"),
        PerfMetrics::default()
    );
    let report = runtime.profile(&graph).expect("profile");
    assert!(report.ops.is_empty());
    assert!(report.slowest().is_none());
}

#[test]
fn graph_totals_sum_time_and_memory() {
    let runtime = CostRuntime::default();
    let graph = matmul_pair(ActType::None);
    let per_op: Vec<PerfMetrics> = graph
        .ops()
        .map(|op| runtime.op_metrics(&graph, op.id()).expect("metrics"))
        .collect();
    let total = runtime.perf_metrics(&graph, false).expect("total");

    let time: f64 = per_op.iter().map(|m| m.compute_time).sum();
    let memory: f64 = per_op.iter().map(|m| m.memory_cost).sum();
    assert!((total.compute_time - time).abs() <= 1e-15);
    assert_eq!(total.memory_cost, memory);
}

#[test]
fn parallelism_follows_the_configured_reduction() {
    let mut graph = Graph::new();
    let small = graph.add_tensor([4], DType::Float32);
    let large = graph.add_tensor([256, 256], DType::Float32);
    let a = graph.add_op(Unary::relu(), &[small]).expect("small relu");
    let b = graph.add_op(Unary::relu(), &[large]).expect("large relu");

    let base = CostRuntime::default();
    let pa = base.op_metrics(&graph, a).expect("a").parallelism;
    let pb = base.op_metrics(&graph, b).expect("b").parallelism;
    assert!(pa < pb);

    for (reduction, expected) in [
        (ParallelismReduction::Min, pa.min(pb)),
        (ParallelismReduction::Max, pa.max(pb)),
        (ParallelismReduction::Sum, pa + pb),
    ] {
        let runtime = CostRuntime::new(CostModelConfig::default().with_parallelism(reduction));
        let total = runtime.perf_metrics(&graph, false).expect("total");
        assert_eq!(total.parallelism, expected, "{reduction:?}");
    }
}

#[test]
fn profile_report_lists_operators_in_order() {
    let runtime = CostRuntime::default();
    let graph = conv_pair(ActType::None);
    let report = runtime.profile(&graph).expect("profile");

    assert_eq!(report.ops.len(), 2);
    assert_eq!(report.ops[0].kind, "Conv");
    assert_eq!(report.ops[1].kind, "Relu");
    assert_eq!(report.total, runtime.perf_metrics(&graph, false).expect("total"));
    assert_eq!(report.slowest().map(|row| row.kind), Some("Conv"));

    let json = report.to_json().expect("json");
    let value: serde_json::Value = serde_json::from_str(&json).expect("parse");
    assert_eq!(value["ops"].as_array().map(Vec::len), Some(2));
    assert_eq!(value["config"]["world_size"], 8);
    assert!(value["total"]["compute_time"].as_f64().is_some());
    assert!(value["ops"][0]["description"]
        .as_str()
        .is_some_and(|text| text.starts_with("Conv[")));
}

#[test]
fn config_round_trips_through_json() {
    let config = CostModelConfig::default()
        .with_world_size(4)
        .with_parallelism(ParallelismReduction::Sum);
    let text = config.to_json().expect("serialize");
    assert_eq!(CostModelConfig::from_json(&text).expect("parse"), config);

    let partial = CostModelConfig::from_json(r#"{"memory_unit": "bytes"}"#).expect("partial");
    assert_eq!(partial.world_size, 8);
    assert_eq!(partial.memory_unit, MemoryUnit::Bytes);
    assert_eq!(CostModelConfig::default().memory_unit, MemoryUnit::Elements);
    assert!(CostModelConfig::from_json(r#"{"world_size": 0}"#).is_err());
}

#[test]
fn cyclic_rewrites_never_reach_evaluation() {
    let mut graph = Graph::new();
    let head = graph.add_tensor([4], DType::Float32);
    let first = graph.add_op(Unary::relu(), &[head]).expect("first");
    let mid = graph.output(first).expect("mid");
    let err = graph
        .add_op_into(Unary::relu(), &[mid], &[head])
        .expect_err("closing edge");
    assert!(matches!(err, GraphError::Cycle { remaining: 2 }), "{err}");

    let runtime = CostRuntime::default();
    let total = runtime.perf_metrics(&graph, false).expect("acyclic graph");
    assert_eq!(total, runtime.op_metrics(&graph, first).expect("metrics"));
    assert_eq!(runtime.profile(&graph).expect("profile").ops.len(), 1);
}
