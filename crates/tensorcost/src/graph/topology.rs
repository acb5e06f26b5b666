use std::cmp::Reverse;
use std::collections::BinaryHeap;

use super::{Graph, OpId};
use crate::error::GraphError;
use crate::tensor::TensorId;

impl Graph {
    /// Operators ordered so that every producer precedes its consumers.
    ///
    /// Ready operators are released in creation order, so a graph built front to back
    /// yields exactly its creation order.
    pub fn topological_order(&self) -> Result<Vec<OpId>, GraphError> {
        let count = self.ops.len();
        let mut pending = vec![0usize; count];
        let mut successors: Vec<Vec<usize>> = vec![Vec::new(); count];
        for (idx, node) in self.ops.iter().enumerate() {
            for input in &node.inputs {
                if let Some(producer) = self.tensors[input.index()].producer() {
                    successors[producer.index()].push(idx);
                    pending[idx] += 1;
                }
            }
        }

        let mut ready: BinaryHeap<Reverse<usize>> = pending
            .iter()
            .enumerate()
            .filter(|(_, &n)| n == 0)
            .map(|(idx, _)| Reverse(idx))
            .collect();
        let mut order = Vec::with_capacity(count);
        while let Some(Reverse(idx)) = ready.pop() {
            order.push(OpId(idx as u32));
            for &next in &successors[idx] {
                pending[next] -= 1;
                if pending[next] == 0 {
                    ready.push(Reverse(next));
                }
            }
        }

        if order.len() != count {
            return Err(GraphError::Cycle {
                remaining: count - order.len(),
            });
        }
        Ok(order)
    }

    /// Number of operators left without an order if an operator reading `inputs`
    /// started producing `outputs`, or `None` when the edge keeps the graph acyclic.
    pub(super) fn closes_cycle(&self, inputs: &[TensorId], outputs: &[TensorId]) -> Option<usize> {
        let mut seen_tensors = vec![false; self.tensors.len()];
        let mut seen_ops = vec![false; self.ops.len()];
        let mut stack: Vec<TensorId> = outputs.to_vec();
        let mut reached_input = false;
        while let Some(tensor) = stack.pop() {
            if std::mem::replace(&mut seen_tensors[tensor.index()], true) {
                continue;
            }
            reached_input |= inputs.contains(&tensor);
            for &op in self.tensors[tensor.index()].consumers() {
                if !std::mem::replace(&mut seen_ops[op.index()], true) {
                    stack.extend_from_slice(&self.ops[op.index()].outputs);
                }
            }
        }
        // the new operator itself never gets ordered either
        reached_input.then(|| seen_ops.iter().filter(|&&seen| seen).count() + 1)
    }
}

#[cfg(test)]
mod tests {
    use crate::error::GraphError;
    use crate::graph::Graph;
    use crate::ops::{Elementwise, Unary};
    use crate::tensor::DType;

    #[test]
    fn declared_outputs_can_precede_their_producer() {
        let mut graph = Graph::new();
        let x = graph.add_tensor([4], DType::Float32);
        let hidden = graph.add_tensor([4], DType::Float32);
        // consumer registered first
        let relu = graph.add_op(Unary::relu(), &[hidden]).expect("relu");
        let add = graph
            .add_op_into(Elementwise::add(), &[x, x], &[hidden])
            .expect("add");
        assert_eq!(graph.topological_order().expect("order"), vec![add, relu]);
    }

    #[test]
    fn creation_order_breaks_ties() {
        let mut graph = Graph::new();
        let x = graph.add_tensor([4], DType::Float32);
        let a = graph.add_op(Unary::relu(), &[x]).expect("a");
        let b = graph.add_op(Unary::tanh(), &[x]).expect("b");
        let a_out = graph.output(a).expect("a out");
        let b_out = graph.output(b).expect("b out");
        let c = graph.add_op(Elementwise::add(), &[b_out, a_out]).expect("c");
        assert_eq!(graph.topological_order().expect("order"), vec![a, b, c]);
    }

    #[test]
    fn closing_a_cycle_is_rejected_at_registration() {
        let mut graph = Graph::new();
        let x = graph.add_tensor([4], DType::Float32);
        let y = graph.add_tensor([4], DType::Float32);
        let relu = graph.add_op_into(Unary::relu(), &[x], &[y]).expect("x -> y");
        let err = graph
            .add_op_into(Elementwise::add(), &[y, y], &[x])
            .expect_err("y -> x");
        assert!(matches!(err, GraphError::Cycle { remaining: 2 }), "{err}");
        assert_eq!(graph.num_ops(), 1);
        assert_eq!(graph.producer(x).expect("producer"), None);
        assert!(graph.consumers(y).expect("consumers").is_empty());
        assert_eq!(graph.topological_order().expect("order"), vec![relu]);
    }

    #[test]
    fn reading_its_own_output_is_a_cycle() {
        let mut graph = Graph::new();
        let x = graph.add_tensor([4], DType::Float32);
        let err = graph
            .add_op_into(Unary::relu(), &[x], &[x])
            .expect_err("self loop");
        assert!(matches!(err, GraphError::Cycle { remaining: 1 }), "{err}");
        assert!(graph.is_empty());
    }

    #[test]
    fn longer_cycles_count_every_stranded_operator() {
        let mut graph = Graph::new();
        let head = graph.add_tensor([4], DType::Float32);
        let a = graph.add_op(Unary::relu(), &[head]).expect("a");
        let mid = graph.output(a).expect("a out");
        let b = graph.add_op(Unary::tanh(), &[mid]).expect("b");
        let tail = graph.output(b).expect("b out");
        // a side branch off the cycle stays unordered as well
        graph.add_op(Unary::relu(), &[tail]).expect("side");
        let err = graph
            .add_op_into(Unary::relu(), &[tail], &[head])
            .expect_err("tail -> head");
        assert!(matches!(err, GraphError::Cycle { remaining: 4 }), "{err}");
        assert_eq!(graph.num_ops(), 3);
    }

    #[test]
    fn empty_graph_has_an_empty_order() {
        assert!(Graph::new().topological_order().expect("empty").is_empty());
    }
}
