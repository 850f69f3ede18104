use crate::tensor::Tensor;
use std::fmt::Debug;

/// A trainable tensor and the gradient accumulated for it.
#[derive(Debug, Clone)]
pub struct Param<const RANK: usize> {
    pub value: Tensor<f32, RANK>,
    pub grad: Tensor<f32, RANK>,
}

impl<const RANK: usize> Param<RANK> {
    pub fn new(value: Tensor<f32, RANK>) -> Self {
        let grad = Tensor::zeros(*value.shape());
        Self { value, grad }
    }

    pub fn view_mut(&mut self) -> ParamMut<'_> {
        ParamMut {
            value: self.value.data_mut(),
            grad: self.grad.data_mut(),
        }
    }

    pub fn view(&self) -> ParamRef<'_> {
        ParamRef {
            value: self.value.data(),
            grad: self.grad.data(),
        }
    }
}

/// Flat mutable view of one parameter, handed to optimizers.
#[derive(Debug)]
pub struct ParamMut<'a> {
    pub value: &'a mut [f32],
    pub grad: &'a mut [f32],
}

/// Flat read-only view of one parameter.
#[derive(Debug, Clone, Copy)]
pub struct ParamRef<'a> {
    pub value: &'a [f32],
    pub grad: &'a [f32],
}

/// Parameter visitation shared by every layer and model.
///
/// Both methods must yield parameters in the same, stable order: optimizers key their
/// state by position and replicas exchange parameters position by position.
pub trait Module: Debug + Send {
    fn params(&self) -> Vec<ParamRef<'_>>;

    fn params_mut(&mut self) -> Vec<ParamMut<'_>>;

    /// Total number of scalar parameters.
    fn num_params(&self) -> usize {
        self.params().iter().map(|p| p.value.len()).sum()
    }

    fn zero_grad(&mut self) {
        for p in self.params_mut() {
            p.grad.fill(0.0);
        }
    }

    /// Copies all parameter values into one contiguous buffer.
    fn flatten_params(&self) -> Vec<f32> {
        let mut flat = Vec::with_capacity(self.num_params());
        for p in self.params() {
            flat.extend_from_slice(p.value);
        }
        flat
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    struct TwoParams {
        a: Param<1>,
        b: Param<2>,
    }

    impl Module for TwoParams {
        fn params(&self) -> Vec<ParamRef<'_>> {
            vec![self.a.view(), self.b.view()]
        }

        fn params_mut(&mut self) -> Vec<ParamMut<'_>> {
            vec![self.a.view_mut(), self.b.view_mut()]
        }
    }

    fn module() -> TwoParams {
        TwoParams {
            a: Param::new(Tensor::new(vec![1.0, 2.0], [2]).unwrap()),
            b: Param::new(Tensor::new(vec![3.0, 4.0, 5.0, 6.0], [2, 2]).unwrap()),
        }
    }

    #[test]
    fn test_num_params_and_flatten() {
        let m = module();
        assert_eq!(m.num_params(), 6);
        assert_eq!(m.flatten_params(), vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
    }

    #[test]
    fn test_zero_grad() {
        let mut m = module();
        for p in m.params_mut() {
            p.grad.fill(3.0);
        }
        m.zero_grad();
        assert!(m.params().iter().all(|p| p.grad.iter().all(|&g| g == 0.0)));
    }
}
