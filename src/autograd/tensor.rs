//! Tensor handle with shared data and gradient cells

use ndarray::Array1;
use rand::Rng;
use std::cell::{Ref, RefCell, RefMut};
use std::rc::Rc;

use super::backward::BackwardOp;

/// A flat `f32` tensor participating in the autograd graph.
///
/// Cloning a `Tensor` clones the *handle*: data and gradient storage are
/// shared. This is how overlapping optimizer parameter groups work - each
/// optimizer holds its own `Vec<Tensor>` of handles onto the same storage.
#[derive(Clone)]
pub struct Tensor {
    data: Rc<RefCell<Array1<f32>>>,
    grad: Rc<RefCell<Option<Array1<f32>>>>,
    backward_op: Rc<RefCell<Option<Rc<dyn BackwardOp>>>>,
    requires_grad: bool,
}

impl Tensor {
    /// Create a tensor from an ndarray
    pub fn new(data: Array1<f32>, requires_grad: bool) -> Self {
        Self {
            data: Rc::new(RefCell::new(data)),
            grad: Rc::new(RefCell::new(None)),
            backward_op: Rc::new(RefCell::new(None)),
            requires_grad,
        }
    }

    /// Create a tensor from a `Vec`
    pub fn from_vec(data: Vec<f32>, requires_grad: bool) -> Self {
        Self::new(Array1::from(data), requires_grad)
    }

    /// Create a zero-filled tensor
    pub fn zeros(len: usize, requires_grad: bool) -> Self {
        Self::new(Array1::zeros(len), requires_grad)
    }

    /// Create a tensor of i.i.d. N(0, std^2) samples
    pub fn randn(len: usize, std: f32, requires_grad: bool) -> Self {
        let mut rng = rand::thread_rng();
        let data: Vec<f32> = (0..len)
            .map(|_| rng.sample::<f32, _>(rand_distr::StandardNormal) * std)
            .collect();
        Self::from_vec(data, requires_grad)
    }

    /// Number of elements
    pub fn len(&self) -> usize {
        self.data.borrow().len()
    }

    /// True when the tensor holds no elements
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether gradients are tracked for this tensor
    pub fn requires_grad(&self) -> bool {
        self.requires_grad
    }

    /// Borrow the underlying data
    pub fn data(&self) -> Ref<'_, Array1<f32>> {
        self.data.borrow()
    }

    /// Mutably borrow the underlying data (optimizer updates)
    pub fn data_mut(&self) -> RefMut<'_, Array1<f32>> {
        self.data.borrow_mut()
    }

    /// Clone the underlying data out of the cell
    pub fn to_array(&self) -> Array1<f32> {
        self.data.borrow().clone()
    }

    /// Copy of the data as a `Vec`
    pub fn to_vec(&self) -> Vec<f32> {
        self.data.borrow().to_vec()
    }

    /// Current gradient, if any
    pub fn grad(&self) -> Option<Array1<f32>> {
        self.grad.borrow().clone()
    }

    /// Overwrite the gradient
    pub fn set_grad(&self, grad: Array1<f32>) {
        *self.grad.borrow_mut() = Some(grad);
    }

    /// Add into the gradient, initializing it when absent
    pub fn accumulate_grad(&self, grad: Array1<f32>) {
        let mut cell = self.grad.borrow_mut();
        match cell.as_mut() {
            Some(existing) => *existing = &*existing + &grad,
            None => *cell = Some(grad),
        }
    }

    /// Clear the gradient
    pub fn zero_grad(&self) {
        *self.grad.borrow_mut() = None;
    }

    /// Shared handle to the gradient cell (stored by backward ops)
    pub fn grad_cell(&self) -> Rc<RefCell<Option<Array1<f32>>>> {
        Rc::clone(&self.grad)
    }

    /// The op that produced this tensor, if any
    pub fn backward_op(&self) -> Option<Rc<dyn BackwardOp>> {
        self.backward_op.borrow().clone()
    }

    /// Attach the producing op
    pub fn set_backward_op(&mut self, op: Rc<dyn BackwardOp>) {
        *self.backward_op.borrow_mut() = Some(op);
    }

    /// A copy of this tensor's data cut off from the graph
    pub fn detach(&self) -> Tensor {
        Tensor::new(self.to_array(), false)
    }

    /// Stable node identity for graph traversal (the grad cell address)
    pub(crate) fn node_id(&self) -> usize {
        Rc::as_ptr(&self.grad) as usize
    }
}

impl std::fmt::Debug for Tensor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tensor")
            .field("len", &self.len())
            .field("requires_grad", &self.requires_grad)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::arr1;

    #[test]
    fn test_clone_shares_storage() {
        let a = Tensor::from_vec(vec![1.0, 2.0], true);
        let b = a.clone();
        b.data_mut()[0] = 5.0;
        assert_eq!(a.data()[0], 5.0);
    }

    #[test]
    fn test_accumulate_grad() {
        let a = Tensor::from_vec(vec![1.0, 2.0], true);
        a.accumulate_grad(arr1(&[1.0, 1.0]));
        a.accumulate_grad(arr1(&[0.5, 0.5]));
        assert_eq!(a.grad().unwrap(), arr1(&[1.5, 1.5]));
        a.zero_grad();
        assert!(a.grad().is_none());
    }

    #[test]
    fn test_detach_is_cut_off() {
        let a = Tensor::from_vec(vec![1.0, 2.0], true);
        let d = a.detach();
        assert!(!d.requires_grad());
        assert!(d.backward_op().is_none());
        assert_eq!(d.to_vec(), vec![1.0, 2.0]);
    }

    #[test]
    fn test_randn_len() {
        let t = Tensor::randn(64, 1.0, false);
        assert_eq!(t.len(), 64);
        assert!(t.data().iter().all(|v| v.is_finite()));
    }
}
