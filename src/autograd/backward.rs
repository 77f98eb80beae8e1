//! Reverse-topological gradient replay

use super::tensor::Tensor;
use ndarray::Array1;
use std::collections::HashSet;

/// A recorded node in the autograd tape.
///
/// `backward` reads the output gradient cell the op captured at forward time
/// and *accumulates* into its inputs' gradient cells. It must never recurse
/// into upstream ops; [`backward`](fn@backward) owns the traversal order.
pub trait BackwardOp {
    /// Propagate the output gradient one step to this op's inputs
    fn backward(&self);

    /// The input tensors this op consumed (graph edges for the traversal)
    fn inputs(&self) -> Vec<Tensor>;
}

/// Run backpropagation from a scalar-or-vector output.
///
/// Seeds the output gradient with ones (when not already set), collects the
/// reachable graph depth-first, then replays ops in reverse postorder so each
/// node fires exactly once and only after every consumer has contributed its
/// gradient.
pub fn backward(output: &Tensor) {
    if output.grad().is_none() {
        output.set_grad(Array1::ones(output.len()));
    }

    let mut order: Vec<Tensor> = Vec::new();
    let mut seen: HashSet<usize> = HashSet::new();
    collect(output, &mut seen, &mut order);

    for node in order.iter().rev() {
        if let Some(op) = node.backward_op() {
            op.backward();
        }
    }
}

// Iterative postorder DFS; deep decoder chains would overflow a recursive one.
fn collect(root: &Tensor, seen: &mut HashSet<usize>, order: &mut Vec<Tensor>) {
    if !seen.insert(root.node_id()) {
        return;
    }
    // (tensor, next child index to visit)
    let mut stack: Vec<(Tensor, usize)> = vec![(root.clone(), 0)];
    while let Some((node, child_idx)) = stack.pop() {
        let children = node
            .backward_op()
            .map(|op| op.inputs())
            .unwrap_or_default();
        if child_idx < children.len() {
            stack.push((node, child_idx + 1));
            let child = children[child_idx].clone();
            if seen.insert(child.node_id()) {
                stack.push((child, 0));
            }
        } else {
            order.push(node);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::autograd::ops::{add, mul, scale};
    use ndarray::arr1;

    #[test]
    fn test_backward_simple_chain() {
        let x = Tensor::from_vec(vec![2.0, 3.0], true);
        let y = scale(&x, 4.0);
        backward(&y);
        assert_eq!(x.grad().unwrap(), arr1(&[4.0, 4.0]));
    }

    #[test]
    fn test_backward_diamond_counts_both_paths() {
        // y = x + x: dy/dx = 2, not 1 (and not 4 from revisiting)
        let x = Tensor::from_vec(vec![1.0, 1.0], true);
        let y = add(&x, &x);
        backward(&y);
        assert_eq!(x.grad().unwrap(), arr1(&[2.0, 2.0]));
    }

    #[test]
    fn test_backward_residual_shape() {
        // y = x * x + x: dy/dx = 2x + 1
        let x = Tensor::from_vec(vec![3.0], true);
        let sq = mul(&x, &x);
        let y = add(&sq, &x);
        backward(&y);
        assert_eq!(x.grad().unwrap(), arr1(&[7.0]));
    }

    #[test]
    fn test_backward_respects_seeded_grad() {
        let x = Tensor::from_vec(vec![1.0], true);
        let y = scale(&x, 3.0);
        y.set_grad(arr1(&[2.0]));
        backward(&y);
        assert_eq!(x.grad().unwrap(), arr1(&[6.0]));
    }
}
