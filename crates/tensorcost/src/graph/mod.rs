//! Arena-backed dataflow graph.
//!
//! Tensors and operators live in two vectors addressed by [`TensorId`] and [`OpId`].
//! Operators refer to tensors by index only; a tensor's producer is a lookup handle,
//! never an owner. Registration is all-or-nothing: inference runs against borrowed
//! inputs first and the arena is only touched once every check has passed.

mod topology;

use std::fmt::{self, Write as _};
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{GraphError, Unsupported};
use crate::ops::{CostContext, KeyVector, OpDef, OpIo, OpKind, OpSemantics, PerfKey};
use crate::tensor::data::default_host;
use crate::tensor::{DType, HostContext, Shape, Tensor, TensorData, TensorId};

static NEXT_GUID: AtomicU64 = AtomicU64::new(1);

/// Process-unique identifier shared by tensors and operators.
fn next_guid() -> u64 {
    NEXT_GUID.fetch_add(1, AtomicOrdering::Relaxed)
}

/// Arena handle for an operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct OpId(pub u32);

impl OpId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for OpId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "%op{}", self.0)
    }
}

#[derive(Debug, Clone)]
struct OpNode {
    guid: u64,
    def: OpDef,
    inputs: Vec<TensorId>,
    outputs: Vec<TensorId>,
}

/// Owns every tensor and operator of one computation.
pub struct Graph {
    tensors: Vec<Tensor>,
    ops: Vec<OpNode>,
    host: Arc<dyn HostContext>,
}

impl Default for Graph {
    fn default() -> Self {
        Graph::new()
    }
}

impl fmt::Debug for Graph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Graph")
            .field("tensors", &self.tensors.len())
            .field("ops", &self.ops.len())
            .finish_non_exhaustive()
    }
}

impl Graph {
    /// Empty graph whose constant reads go to payloads attached with [`Graph::add_constant`].
    pub fn new() -> Self {
        Graph {
            tensors: Vec::new(),
            ops: Vec::new(),
            host: default_host(),
        }
    }

    /// Replaces the capability used to read host-resident tensor data.
    pub fn with_host(mut self, host: Arc<dyn HostContext>) -> Self {
        self.host = host;
        self
    }

    pub fn add_tensor(&mut self, shape: impl Into<Shape>, dtype: DType) -> TensorId {
        let id = TensorId(self.tensors.len() as u32);
        self.tensors
            .push(Tensor::new(id, next_guid(), shape.into(), dtype));
        id
    }

    /// Adds a tensor carrying a host-resident payload.
    pub fn add_constant(
        &mut self,
        shape: impl Into<Shape>,
        dtype: DType,
        data: TensorData,
    ) -> Result<TensorId, GraphError> {
        let shape = shape.into();
        if data.len() != shape.num_elements() || data.dtype() != dtype {
            return Err(GraphError::InvalidConstant {
                shape,
                dtype,
                found: data.len(),
                found_dtype: data.dtype(),
            });
        }
        let id = TensorId(self.tensors.len() as u32);
        self.tensors
            .push(Tensor::new(id, next_guid(), shape, dtype).with_data(data));
        Ok(id)
    }

    /// Registers an operator and creates its outputs from inference.
    pub fn add_op(
        &mut self,
        def: impl Into<OpDef>,
        inputs: &[TensorId],
    ) -> Result<OpId, GraphError> {
        let (def, shapes, dtypes) = self.infer(def.into(), inputs)?;
        let outputs = shapes
            .into_iter()
            .zip(dtypes)
            .map(|(shape, dtype)| self.add_tensor(shape, dtype))
            .collect();
        Ok(self.register(def, inputs.to_vec(), outputs))
    }

    /// Registers an operator writing into caller-declared output tensors.
    ///
    /// Each output must match the inferred shape and dtype, must not already have
    /// a producer and must not feed back into one of the inputs.
    pub fn add_op_into(
        &mut self,
        def: impl Into<OpDef>,
        inputs: &[TensorId],
        outputs: &[TensorId],
    ) -> Result<OpId, GraphError> {
        let (def, shapes, dtypes) = self.infer(def.into(), inputs)?;
        let kind = def.kind();
        if outputs.len() != shapes.len() {
            return Err(GraphError::Arity {
                kind,
                what: "outputs",
                expected: shapes.len().to_string(),
                found: outputs.len(),
            });
        }
        let pending = OpId(self.ops.len() as u32);
        for (idx, ((&id, shape), dtype)) in outputs.iter().zip(&shapes).zip(&dtypes).enumerate() {
            let tensor = self.tensor(id)?;
            if let Some(producer) = tensor.producer() {
                return Err(GraphError::AlreadyProduced {
                    tensor: id,
                    producer,
                });
            }
            if outputs[..idx].contains(&id) {
                return Err(GraphError::AlreadyProduced {
                    tensor: id,
                    producer: pending,
                });
            }
            if tensor.shape() != shape || tensor.dtype() != *dtype {
                return Err(GraphError::OutputMismatch {
                    kind,
                    tensor: id,
                    expected: shape.clone(),
                    expected_dtype: *dtype,
                    found: tensor.shape().clone(),
                    found_dtype: tensor.dtype(),
                });
            }
        }
        if let Some(remaining) = self.closes_cycle(inputs, outputs) {
            return Err(GraphError::Cycle { remaining });
        }
        Ok(self.register(def, inputs.to_vec(), outputs.to_vec()))
    }

    /// Validates arity, resolves attributes and runs inference without touching the arena.
    fn infer(
        &self,
        mut def: OpDef,
        inputs: &[TensorId],
    ) -> Result<(OpDef, Vec<Shape>, Vec<DType>), GraphError> {
        let kind = def.kind();
        let tensors = inputs
            .iter()
            .map(|&id| self.tensor(id))
            .collect::<Result<Vec<_>, _>>()?;
        let arity = def.arity();
        if !arity.accepts(tensors.len()) {
            return Err(GraphError::Arity {
                kind,
                what: "inputs",
                expected: arity.describe_inputs(),
                found: tensors.len(),
            });
        }
        let reject = |err: anyhow::Error| rejection(kind, &tensors, err);
        def.prepare(&tensors, self.host.as_ref()).map_err(reject)?;
        let shapes = def.infer_shapes(&tensors).map_err(reject)?;
        let dtypes = def.infer_dtypes(&tensors).map_err(reject)?;
        if shapes.len() != arity.outputs || dtypes.len() != arity.outputs {
            return Err(GraphError::Arity {
                kind,
                what: "inferred outputs",
                expected: arity.outputs.to_string(),
                found: shapes.len().min(dtypes.len()),
            });
        }
        Ok((def, shapes, dtypes))
    }

    fn register(&mut self, def: OpDef, inputs: Vec<TensorId>, outputs: Vec<TensorId>) -> OpId {
        let id = OpId(self.ops.len() as u32);
        let guid = next_guid();
        for &input in &inputs {
            let consumers = &mut self.tensors[input.index()].consumers;
            if !consumers.contains(&id) {
                consumers.push(id);
            }
        }
        for &output in &outputs {
            self.tensors[output.index()].producer = Some(id);
        }
        debug!(
            op = %id,
            kind = %def.kind(),
            guid,
            outputs = ?outputs
                .iter()
                .map(|t| self.tensors[t.index()].shape().to_string())
                .collect::<Vec<_>>(),
            "registered operator"
        );
        self.ops.push(OpNode {
            guid,
            def,
            inputs,
            outputs,
        });
        id
    }

    pub fn tensor(&self, id: TensorId) -> Result<&Tensor, GraphError> {
        self.tensors
            .get(id.index())
            .ok_or(GraphError::UnknownTensor(id))
    }

    pub fn tensors(&self) -> &[Tensor] {
        &self.tensors
    }

    pub fn op(&self, id: OpId) -> Result<OpView<'_>, GraphError> {
        let node = self.ops.get(id.index()).ok_or(GraphError::UnknownOp(id))?;
        Ok(OpView {
            graph: self,
            id,
            node,
        })
    }

    /// Operators in creation order.
    pub fn ops(&self) -> impl Iterator<Item = OpView<'_>> + '_ {
        self.ops.iter().enumerate().map(move |(idx, node)| OpView {
            graph: self,
            id: OpId(idx as u32),
            node,
        })
    }

    pub fn num_ops(&self) -> usize {
        self.ops.len()
    }

    pub fn num_tensors(&self) -> usize {
        self.tensors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn producer(&self, id: TensorId) -> Result<Option<OpId>, GraphError> {
        Ok(self.tensor(id)?.producer())
    }

    pub fn consumers(&self, id: TensorId) -> Result<&[OpId], GraphError> {
        Ok(self.tensor(id)?.consumers())
    }

    /// Output tensors of `id`, convenient for chaining single-output operators.
    pub fn outputs(&self, id: OpId) -> Result<&[TensorId], GraphError> {
        Ok(&self.ops.get(id.index()).ok_or(GraphError::UnknownOp(id))?.outputs)
    }

    /// First output of `id`.
    pub fn output(&self, id: OpId) -> Result<TensorId, GraphError> {
        self.outputs(id)?
            .first()
            .copied()
            .ok_or(GraphError::UnknownOp(id))
    }
}

fn rejection(kind: OpKind, inputs: &[&Tensor], err: anyhow::Error) -> GraphError {
    if let Some(unsupported) = err.downcast_ref::<Unsupported>() {
        return GraphError::Unsupported {
            kind,
            feature: unsupported.feature.clone(),
        };
    }
    let inputs = inputs
        .iter()
        .map(|t| format!("{}:{}", t.shape(), t.dtype()))
        .collect::<Vec<_>>()
        .join(", ");
    GraphError::InvalidOperator {
        kind,
        inputs,
        source: err,
    }
}

/// Borrowed view of one registered operator and its tensors.
#[derive(Clone, Copy)]
pub struct OpView<'g> {
    graph: &'g Graph,
    id: OpId,
    node: &'g OpNode,
}

impl<'g> OpView<'g> {
    pub fn id(&self) -> OpId {
        self.id
    }

    pub fn guid(&self) -> u64 {
        self.node.guid
    }

    pub fn kind(&self) -> OpKind {
        self.node.def.kind()
    }

    pub fn def(&self) -> &'g OpDef {
        &self.node.def
    }

    pub fn input_ids(&self) -> &'g [TensorId] {
        &self.node.inputs
    }

    pub fn output_ids(&self) -> &'g [TensorId] {
        &self.node.outputs
    }

    pub fn num_inputs(&self) -> usize {
        self.node.inputs.len()
    }

    pub fn num_outputs(&self) -> usize {
        self.node.outputs.len()
    }

    pub fn inputs(&self) -> Vec<&'g Tensor> {
        self.collect(&self.node.inputs)
    }

    pub fn outputs(&self) -> Vec<&'g Tensor> {
        self.collect(&self.node.outputs)
    }

    fn collect(&self, ids: &[TensorId]) -> Vec<&'g Tensor> {
        let tensors = &self.graph.tensors;
        ids.iter().map(|id| &tensors[id.index()]).collect()
    }

    pub fn io(&self) -> OpIo<'g> {
        OpIo::new(self.inputs(), self.outputs())
    }

    /// Re-runs shape inference on the registered inputs.
    pub fn infer_shapes(&self) -> anyhow::Result<Vec<Shape>> {
        self.node.def.infer_shapes(&self.inputs())
    }

    pub fn infer_dtypes(&self) -> anyhow::Result<Vec<DType>> {
        self.node.def.infer_dtypes(&self.inputs())
    }

    pub fn compute_time(&self, cx: &CostContext) -> f64 {
        self.node.def.compute_time(&self.io(), cx)
    }

    pub fn memory_cost(&self, cx: &CostContext) -> f64 {
        self.node.def.memory_cost(&self.io(), cx)
    }

    pub fn parallelism(&self, cx: &CostContext) -> f64 {
        self.node.def.parallelism(&self.io(), cx)
    }

    pub fn workload_vector(&self) -> KeyVector {
        self.node.def.workload_vector(&self.io())
    }

    pub fn attr_vector(&self) -> KeyVector {
        self.node.def.attr_vector()
    }

    pub fn perf_key(&self) -> PerfKey {
        PerfKey::new(&self.workload_vector(), self.attr_vector())
    }

    /// Attribute pieces of the textual form, without the surrounding name and guids.
    pub fn describe(&self) -> String {
        let mut text = String::new();
        // writing into a String cannot fail
        let _ = self.node.def.describe(&mut text);
        text
    }
}

impl fmt::Debug for OpView<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OpView")
            .field("id", &self.id)
            .field("guid", &self.node.guid)
            .field("def", &self.node.def)
            .finish()
    }
}

/// `Kind[guid](in_dims,...,attrs,input=guids,output=guids)`.
impl fmt::Display for OpView<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{}](", self.kind(), self.node.guid)?;
        for input in self.inputs() {
            write!(f, "{},", input.shape())?;
        }
        self.node.def.describe(f)?;
        write_guids(f, "input", &self.inputs())?;
        f.write_char(',')?;
        write_guids(f, "output", &self.outputs())?;
        f.write_char(')')
    }
}

fn write_guids(f: &mut fmt::Formatter<'_>, name: &str, tensors: &[&Tensor]) -> fmt::Result {
    write!(f, "{name}=")?;
    for (idx, tensor) in tensors.iter().enumerate() {
        if idx > 0 {
            f.write_char(';')?;
        }
        write!(f, "{}", tensor.guid())?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ops::{Concat, Elementwise, MatMul, Unary};

    #[test]
    fn add_op_links_producer_and_consumers() {
        let mut graph = Graph::new();
        let a = graph.add_tensor([2, 3], DType::Float32);
        let b = graph.add_tensor([3], DType::Float32);
        let add = graph.add_op(Elementwise::add(), &[a, b]).expect("add");
        let out = graph.output(add).expect("output");
        assert_eq!(graph.tensor(out).expect("tensor").dims(), &[2, 3]);
        assert_eq!(graph.producer(out).expect("producer"), Some(add));
        assert_eq!(graph.consumers(a).expect("consumers"), &[add]);
        assert_eq!(graph.producer(a).expect("producer"), None);
    }

    #[test]
    fn rejected_operator_leaves_graph_unchanged() {
        let mut graph = Graph::new();
        let a = graph.add_tensor([2, 3], DType::Float32);
        let b = graph.add_tensor([2, 4], DType::Float32);
        let err = graph.add_op(Concat::new(0), &[a, b]).expect_err("axis 1 differs");
        assert!(matches!(err, GraphError::InvalidOperator { kind: OpKind::Concat, .. }));
        assert!(err.to_string().contains("[2,3]"), "{err}");
        assert_eq!(graph.num_tensors(), 2);
        assert!(graph.is_empty());
        assert!(graph.consumers(a).expect("consumers").is_empty());
    }

    #[test]
    fn unknown_tensors_and_wrong_arity_are_reported() {
        let mut graph = Graph::new();
        let a = graph.add_tensor([4], DType::Float32);
        let err = graph
            .add_op(Unary::relu(), &[TensorId(7)])
            .expect_err("unknown tensor");
        assert!(matches!(err, GraphError::UnknownTensor(TensorId(7))));
        let err = graph.add_op(MatMul::new(), &[a]).expect_err("one input");
        assert!(matches!(err, GraphError::Arity { what: "inputs", found: 1, .. }));
    }

    #[test]
    fn declared_outputs_are_validated() {
        let mut graph = Graph::new();
        let a = graph.add_tensor([4], DType::Float32);
        let wrong = graph.add_tensor([5], DType::Float32);
        let err = graph
            .add_op_into(Unary::relu(), &[a], &[wrong])
            .expect_err("shape mismatch");
        assert!(matches!(err, GraphError::OutputMismatch { .. }));

        let out = graph.add_tensor([4], DType::Float32);
        let relu = graph.add_op_into(Unary::relu(), &[a], &[out]).expect("relu");
        let err = graph
            .add_op_into(Unary::relu(), &[a], &[out])
            .expect_err("second producer");
        assert!(matches!(err, GraphError::AlreadyProduced { producer, .. } if producer == relu));
    }

    #[test]
    fn constants_must_fill_their_shape() {
        let mut graph = Graph::new();
        graph
            .add_constant([2], DType::Int64, TensorData::I64(vec![1, 2, 3]))
            .expect_err("three values for two elements");
        graph
            .add_constant([2], DType::Int32, TensorData::I64(vec![1, 2]))
            .expect_err("payload dtype differs");
        let id = graph
            .add_constant([2], DType::Int64, TensorData::I64(vec![1, 2]))
            .expect("constant");
        assert!(graph.tensor(id).expect("tensor").data().is_some());
    }

    #[test]
    fn display_lists_shapes_attrs_and_guids() {
        let mut graph = Graph::new();
        let a = graph.add_tensor([4], DType::Float32);
        let relu = graph.add_op(Unary::relu(), &[a]).expect("relu");
        let view = graph.op(relu).expect("view");
        let text = view.to_string();
        let a_guid = graph.tensor(a).expect("tensor").guid();
        assert!(text.starts_with(&format!("Relu[{}]([4],", view.guid())), "{text}");
        assert!(text.contains(&format!("input={a_guid}")), "{text}");
    }
}
