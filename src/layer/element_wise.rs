use candle_core::{Result, Tensor};

use super::{activations::{ActivationContext, ActivationType}, layer::Layer};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ElementWiseOperation {
    Add,
    Multiply,
}

impl ElementWiseOperation {
    fn name(&self) -> String {
        match self {
            ElementWiseOperation::Add => "Add".to_string(),
            ElementWiseOperation::Multiply => "Multiply".to_string(),
        }
    }

    fn apply(&self, lhs: &Tensor, rhs: &Tensor) -> Result<Tensor> {
        match self {
            ElementWiseOperation::Add => lhs.broadcast_add(rhs),
            ElementWiseOperation::Multiply => lhs.broadcast_mul(rhs),
        }
    }
}

/// `op(main(x), shortcut(x))`, optionally followed by an activation.
/// A missing shortcut is the identity.
pub struct ElementWiseLayer {
    pub operation: ElementWiseOperation,
    pub main: Box<dyn Layer>,
    pub shortcut: Option<Box<dyn Layer>>,
    pub activation: Option<ActivationType>,
}

impl ElementWiseLayer {
    pub fn new(operation: ElementWiseOperation, main: Box<dyn Layer>) -> Self {
        Self {
            operation,
            main,
            shortcut: None,
            activation: None,
        }
    }

    pub fn new_with(
        operation: ElementWiseOperation,
        main: Box<dyn Layer>,
        shortcut: Option<Box<dyn Layer>>,
        activation: Option<ActivationType>,
    ) -> Self {
        Self {
            operation,
            main,
            shortcut,
            activation,
        }
    }
}

impl Layer for ElementWiseLayer {
    fn forward(&self, xs: &Tensor, ctx: &ActivationContext) -> Result<Tensor> {
        let main = self.main.forward(xs, ctx)?;
        let other = match &self.shortcut {
            Some(shortcut) => shortcut.forward(xs, ctx)?,
            None => xs.clone(),
        };
        let ys = self.operation.apply(&main, &other)?;

        match &self.activation {
            Some(activation) => activation.apply(&ys, ctx),
            None => Ok(ys),
        }
    }

    fn name(&self) -> String {
        self.operation.name()
    }

    fn out_features(&self) -> usize {
        self.main.out_features()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layer::activations::ActivationLayer;
    use candle_core::Device;

    #[test]
    fn identity_shortcut_adds_input() {
        let layer = ElementWiseLayer::new_with(
            ElementWiseOperation::Add,
            Box::new(ActivationLayer::new(ActivationType::ReLU)),
            None,
            None,
        );
        let xs = Tensor::new(&[-1f32, 2.], &Device::Cpu).unwrap();
        let ys = layer.forward(&xs, &ActivationContext::default()).unwrap();
        assert_eq!(ys.to_vec1::<f32>().unwrap(), vec![-1., 4.]);
    }

    #[test]
    fn gating_multiplies_by_branch() {
        let layer = ElementWiseLayer::new(
            ElementWiseOperation::Multiply,
            Box::new(ActivationLayer::new(ActivationType::ReLU)),
        );
        let xs = Tensor::new(&[-1f32, 3.], &Device::Cpu).unwrap();
        let ys = layer.forward(&xs, &ActivationContext::default()).unwrap();
        assert_eq!(ys.to_vec1::<f32>().unwrap(), vec![0., 9.]);
    }
}
