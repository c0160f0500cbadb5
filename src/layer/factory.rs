use candle_core::Result;
use candle_nn::VarBuilder;

use super::{
    activations::{ActivationLayer, ActivationType},
    concat::ConcatLayer,
    conv2d::{BatchNormLayer, Conv2DLayer, ConvPadding, DepthwiseConv2DLayer},
    element_wise::{ElementWiseLayer, ElementWiseOperation},
    layer::{Layer, SequentialLayer},
    linear::LinearLayer,
    pooling::{AvgPool2DLayer, GlobalAvgPoolLayer, MaxPool2DLayer},
};

pub struct Layers;

impl Layers {
    pub fn linear(vb: VarBuilder, in_features: usize, out_features: usize) -> Result<Box<dyn Layer>> {
        Ok(Box::new(LinearLayer::new(vb, in_features, out_features)?))
    }

    pub fn conv2d(vb: VarBuilder, in_features: usize, out_features: usize, kernel: usize) -> Result<Box<dyn Layer>> {
        Ok(Box::new(Conv2DLayer::new(vb, in_features, out_features, kernel)?))
    }

    pub fn conv2d_with(
        vb: VarBuilder,
        in_features: usize,
        out_features: usize,
        kernel: (usize, usize),
        stride: usize,
        padding: ConvPadding,
        bias: bool,
    ) -> Result<Box<dyn Layer>> {
        Ok(Box::new(Conv2DLayer::new_with(
            vb,
            in_features,
            out_features,
            kernel,
            stride,
            padding,
            bias,
        )?))
    }

    /// Convolution, frozen batch norm and an activation, the usual backbone unit.
    /// Weights are read from `<prefix>.conv` and `<prefix>.bn`.
    pub fn conv2d_bn(
        vb: VarBuilder,
        in_features: usize,
        out_features: usize,
        kernel: (usize, usize),
        stride: usize,
        padding: ConvPadding,
        bias: bool,
        eps: f64,
        activation: Option<ActivationType>,
    ) -> Result<Box<dyn Layer>> {
        let mut layers: Vec<Box<dyn Layer>> = vec![
            Box::new(Conv2DLayer::new_with(
                vb.pp("conv"),
                in_features,
                out_features,
                kernel,
                stride,
                padding,
                bias,
            )?),
            Box::new(BatchNormLayer::new(vb.pp("bn"), out_features, eps)?),
        ];
        if let Some(activation) = activation {
            layers.push(Box::new(ActivationLayer::new(activation)));
        }
        Ok(Box::new(SequentialLayer::new(layers)))
    }

    pub fn depthwise_conv2d(
        vb: VarBuilder,
        features: usize,
        kernel: usize,
        stride: usize,
        padding: ConvPadding,
    ) -> Result<Box<dyn Layer>> {
        Ok(Box::new(DepthwiseConv2DLayer::new(vb, features, kernel, stride, padding)?))
    }

    pub fn batch_norm(vb: VarBuilder, features: usize, eps: f64) -> Result<Box<dyn Layer>> {
        Ok(Box::new(BatchNormLayer::new(vb, features, eps)?))
    }

    pub fn activation(activation_type: ActivationType) -> Box<dyn Layer> {
        Box::new(ActivationLayer::new(activation_type))
    }

    pub fn max_pool(kernel: usize, stride: usize) -> Box<dyn Layer> {
        Box::new(MaxPool2DLayer::new(kernel, stride))
    }

    pub fn max_pool_with(kernel: usize, stride: usize, padding: usize) -> Box<dyn Layer> {
        Box::new(MaxPool2DLayer::new_with(kernel, stride, padding))
    }

    pub fn avg_pool_same(kernel: usize) -> Box<dyn Layer> {
        Box::new(AvgPool2DLayer::new(kernel))
    }

    pub fn global_avg_pool() -> Box<dyn Layer> {
        Box::new(GlobalAvgPoolLayer::new())
    }

    pub fn global_avg_pool_keepdim() -> Box<dyn Layer> {
        Box::new(GlobalAvgPoolLayer::new_with(true))
    }

    pub fn sequential(layers: Vec<Box<dyn Layer>>) -> Box<dyn Layer> {
        Box::new(SequentialLayer::new(layers))
    }

    pub fn concat(branches: Vec<Box<dyn Layer>>) -> Box<dyn Layer> {
        Box::new(ConcatLayer::new(branches))
    }

    pub fn residual(
        main: Box<dyn Layer>,
        shortcut: Option<Box<dyn Layer>>,
        activation: Option<ActivationType>,
    ) -> Box<dyn Layer> {
        Box::new(ElementWiseLayer::new_with(ElementWiseOperation::Add, main, shortcut, activation))
    }

    pub fn gate(gate: Box<dyn Layer>) -> Box<dyn Layer> {
        Box::new(ElementWiseLayer::new(ElementWiseOperation::Multiply, gate))
    }
}
