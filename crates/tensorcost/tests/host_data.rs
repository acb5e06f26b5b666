use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tensorcost::ops::{Gather, Resize, ResizeCoordMode, ResizeMode, ResizeRatioPolicy};
use tensorcost::{DType, Graph, GraphError, HostContext, OpKind, Tensor, TensorData};

fn out_dims(graph: &Graph, op: tensorcost::OpId) -> Vec<usize> {
    let out = graph.output(op).expect("output");
    graph.tensor(out).expect("tensor").dims().to_vec()
}

#[test]
fn gather_checks_resident_indices() {
    let mut graph = Graph::new();
    let data = graph.add_tensor([4, 5], DType::Float32);
    let good = graph
        .add_constant([3], DType::Int64, TensorData::I64(vec![0, 3, 1]))
        .expect("indices");
    let op = graph.add_op(Gather::new(0), &[data, good]).expect("gather");
    assert_eq!(out_dims(&graph, op), vec![3, 5]);

    let narrow = graph
        .add_constant([2], DType::Int32, TensorData::I32(vec![4, 0]))
        .expect("int32 indices");
    let op = graph.add_op(Gather::new(1), &[data, narrow]).expect("axis 1");
    assert_eq!(out_dims(&graph, op), vec![4, 2]);

    let bad = graph
        .add_constant([3], DType::Int64, TensorData::I64(vec![0, 9, 1]))
        .expect("indices");
    let before = graph.num_ops();
    let err = graph
        .add_op(Gather::new(0), &[data, bad])
        .expect_err("index out of range");
    assert!(
        matches!(err, GraphError::InvalidOperator { kind: OpKind::Gather, .. }),
        "{err}"
    );
    assert_eq!(graph.num_ops(), before);

    let negative = graph
        .add_constant([1], DType::Int64, TensorData::I64(vec![-1]))
        .expect("indices");
    assert!(graph.add_op(Gather::new(0), &[data, negative]).is_err());

    // run-time indices cannot be checked and are accepted
    let dynamic = graph.add_tensor([7], DType::Int64);
    assert!(graph.add_op(Gather::new(0), &[data, dynamic]).is_ok());
}

#[test]
fn constants_must_fill_their_shape() {
    let mut graph = Graph::new();
    let err = graph
        .add_constant([2, 2], DType::Int64, TensorData::I64(vec![1, 2, 3]))
        .expect_err("short payload");
    assert!(matches!(err, GraphError::InvalidConstant { found: 3, .. }), "{err}");

    let err = graph
        .add_constant([2], DType::Int64, TensorData::F32(vec![1.0, 2.0]))
        .expect_err("dtype mismatch");
    assert!(
        matches!(
            err,
            GraphError::InvalidConstant {
                found_dtype: DType::Float32,
                ..
            }
        ),
        "{err}"
    );
    assert_eq!(graph.num_tensors(), 0);
}

#[test]
fn resize_reads_sizes_and_scales() {
    let mut graph = Graph::new();
    let x = graph.add_tensor([1, 3, 8, 8], DType::Float32);

    let scales = graph
        .add_constant([4], DType::Float32, TensorData::F32(vec![1.0, 1.0, 2.0, 0.5]))
        .expect("scales");
    let op = graph
        .add_op(Resize::scales(ResizeMode::Linear), &[x, scales])
        .expect("resize by scales");
    assert_eq!(out_dims(&graph, op), vec![1, 3, 16, 4]);

    let sizes = graph
        .add_constant([2], DType::Int64, TensorData::I64(vec![4, 16]))
        .expect("sizes");
    let op = graph
        .add_op(
            Resize::sizes(ResizeMode::Nearest).with_axes(vec![2, 3]),
            &[x, sizes],
        )
        .expect("resize by sizes");
    assert_eq!(out_dims(&graph, op), vec![1, 3, 4, 16]);

    // the smaller ratio is applied to both axes
    let op = graph
        .add_op(
            Resize::sizes(ResizeMode::Nearest)
                .with_axes(vec![2, 3])
                .with_ratio_policy(ResizeRatioPolicy::NotLarger),
            &[x, sizes],
        )
        .expect("resize not larger");
    assert_eq!(out_dims(&graph, op), vec![1, 3, 4, 4]);
}

#[test]
fn resize_rejects_missing_or_malformed_parameters() {
    let mut graph = Graph::new();
    let x = graph.add_tensor([1, 3, 8, 8], DType::Float32);

    let dynamic = graph.add_tensor([4], DType::Float32);
    let err = graph
        .add_op(Resize::scales(ResizeMode::Nearest), &[x, dynamic])
        .expect_err("no host data");
    assert!(matches!(err, GraphError::InvalidOperator { .. }), "{err}");

    let sizes = graph
        .add_constant([4], DType::Int64, TensorData::I64(vec![1, 3, 4, 4]))
        .expect("sizes");
    let roi = graph.add_tensor([8], DType::Float32);
    assert!(graph
        .add_op(Resize::sizes(ResizeMode::Linear), &[x, sizes, roi])
        .is_err());
    assert!(graph
        .add_op(
            Resize::sizes(ResizeMode::Linear).with_coord_mode(ResizeCoordMode::TfCropAndResize),
            &[x, sizes],
        )
        .is_err());
    let op = graph
        .add_op(
            Resize::sizes(ResizeMode::Linear).with_coord_mode(ResizeCoordMode::TfCropAndResize),
            &[x, sizes, roi],
        )
        .expect("crop and resize");
    assert_eq!(out_dims(&graph, op), vec![1, 3, 4, 4]);

    let last = graph
        .add_constant([1], DType::Int64, TensorData::I64(vec![16]))
        .expect("size");
    let err = graph
        .add_op(
            Resize::sizes(ResizeMode::Nearest).with_axes(vec![-1]),
            &[x, last],
        )
        .expect_err("negative axes");
    assert!(matches!(err, GraphError::Unsupported { .. }), "{err}");
}

/// Serves payloads keyed by tensor guid and records every lookup.
#[derive(Default)]
struct RecordingHost {
    payloads: HashMap<u64, TensorData>,
    reads: Mutex<Vec<u64>>,
}

impl HostContext for RecordingHost {
    fn copy_to_host(&self, tensor: &Tensor) -> anyhow::Result<Option<TensorData>> {
        if let Ok(mut reads) = self.reads.lock() {
            reads.push(tensor.guid());
        }
        Ok(self.payloads.get(&tensor.guid()).cloned())
    }
}

#[test]
fn graphs_read_through_their_host_context() {
    // guids are only known once tensors exist, so the first attempt runs against an empty host
    let mut graph = Graph::new().with_host(Arc::new(RecordingHost::default()));
    let x = graph.add_tensor([2, 6], DType::Float32);
    let sizes = graph.add_tensor([2], DType::Int64);
    assert!(graph
        .add_op(Resize::sizes(ResizeMode::Nearest), &[x, sizes])
        .is_err());

    let guid = graph.tensor(sizes).expect("sizes").guid();
    let host = Arc::new(RecordingHost {
        payloads: HashMap::from([(guid, TensorData::I64(vec![4, 3]))]),
        ..RecordingHost::default()
    });
    let mut graph = graph.with_host(host.clone());
    let op = graph
        .add_op(Resize::sizes(ResizeMode::Nearest), &[x, sizes])
        .expect("resize");
    assert_eq!(out_dims(&graph, op), vec![4, 3]);
    assert!(host.reads.lock().expect("lock").contains(&guid));
}
