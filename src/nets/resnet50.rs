use candle_core::Result;
use candle_nn::VarBuilder;

use crate::{
    layer::{activations::ActivationType, conv2d::ConvPadding, factory::Layers, layer::Layer},
    model::network::{LayerInfo, NetworkBuilder, NetworkSpec, SequentialNet},
};

pub const INPUT_SIZE: usize = 224;
const BN_EPS: f64 = 1.001e-5;

// (stack name, filters, blocks, first stride)
const STACKS: [(&str, usize, usize, usize); 4] = [
    ("conv2", 64, 3, 1),
    ("conv3", 128, 4, 2),
    ("conv4", 256, 6, 2),
    ("conv5", 512, 3, 2),
];

pub fn layers() -> Vec<LayerInfo> {
    let mut layers = vec![LayerInfo::new("pool1_pool", 64)];
    for &(stack, filters, blocks, _) in STACKS.iter() {
        for block in 1..=blocks {
            layers.push(LayerInfo::new(format!("{}_block{}_out", stack, block), filters * 4));
        }
    }
    layers.push(LayerInfo::new("predictions", 1000));
    layers
}

pub fn build(spec: NetworkSpec) -> Result<SequentialNet> {
    let mut net = NetworkBuilder::new(&spec.target_layer);
    let relu = spec.relu;
    let vb = spec.vb;

    net.stage("pool1_pool", 64, || stem(vb.pp("conv1"), relu))?;

    let mut in_f = 64;
    for &(stack, filters, blocks, stride) in STACKS.iter() {
        for block in 1..=blocks {
            let name = format!("{}_block{}", stack, block);
            let (block_stride, shortcut) = if block == 1 { (stride, true) } else { (1, false) };
            net.stage(&format!("{}_out", name), filters * 4, || {
                bottleneck(vb.pp(&name), in_f, filters, block_stride, shortcut, relu)
            })?;
            in_f = filters * 4;
        }
    }

    net.stage("predictions", 1000, || {
        Ok(Layers::sequential(vec![
            Layers::global_avg_pool(),
            Layers::linear(vb.pp("predictions"), 2048, 1000)?,
        ]))
    })?;

    net.finish()
}

fn conv_bn(
    vb: VarBuilder,
    in_f: usize,
    out_f: usize,
    kernel: usize,
    stride: usize,
    padding: ConvPadding,
    relu: Option<ActivationType>,
) -> Result<Box<dyn Layer>> {
    Layers::conv2d_bn(vb, in_f, out_f, (kernel, kernel), stride, padding, true, BN_EPS, relu)
}

fn stem(vb: VarBuilder, relu: ActivationType) -> Result<Box<dyn Layer>> {
    Ok(Layers::sequential(vec![
        conv_bn(vb, 3, 64, 7, 2, ConvPadding::Explicit(3), Some(relu))?,
        Layers::max_pool_with(3, 2, 1),
    ]))
}

// Residual bottleneck, stride on the first 1x1 convolution
fn bottleneck(
    vb: VarBuilder,
    in_f: usize,
    filters: usize,
    stride: usize,
    conv_shortcut: bool,
    relu: ActivationType,
) -> Result<Box<dyn Layer>> {
    let main = Layers::sequential(vec![
        conv_bn(vb.pp("1"), in_f, filters, 1, stride, ConvPadding::Valid, Some(relu))?,
        conv_bn(vb.pp("2"), filters, filters, 3, 1, ConvPadding::Same, Some(relu))?,
        conv_bn(vb.pp("3"), filters, filters * 4, 1, 1, ConvPadding::Valid, None)?,
    ]);

    let shortcut = if conv_shortcut {
        Some(conv_bn(vb.pp("0"), in_f, filters * 4, 1, stride, ConvPadding::Valid, None)?)
    } else {
        None
    };

    Ok(Layers::residual(main, shortcut, Some(relu)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layer::activations::ActivationContext;
    use crate::model::weights::WeightsSource;
    use candle_core::{DType, Device, Tensor};

    #[test]
    fn block_names_follow_stacks() {
        let layers = layers();
        assert_eq!(layers.len(), 1 + 3 + 4 + 6 + 3 + 1);
        assert!(layers.contains(&LayerInfo::new("conv4_block6_out", 1024)));
        assert!(layers.contains(&LayerInfo::new("conv5_block3_out", 2048)));
    }

    #[test]
    fn first_block_output_shape() {
        let vb = WeightsSource::RandomInit.var_builder(&Device::Cpu).unwrap();
        let net = build(NetworkSpec {
            vb,
            relu: ActivationType::ReLU,
            target_layer: "conv2_block1_out".to_string(),
        })
        .unwrap();

        let xs = Tensor::zeros((1, 3, 64, 64), DType::F32, &Device::Cpu).unwrap();
        let ys = net.forward(&xs, &ActivationContext::default()).unwrap();
        assert_eq!(ys.dims(), &[1, 256, 16, 16]);
    }

    #[test]
    fn predictions_are_raw_logits() {
        let vb = WeightsSource::RandomInit.var_builder(&Device::Cpu).unwrap();
        let net = build(NetworkSpec {
            vb,
            relu: ActivationType::ReLU,
            target_layer: "predictions".to_string(),
        })
        .unwrap();

        let xs = Tensor::rand(0f32, 1., (1, 3, 64, 64), &Device::Cpu).unwrap();
        let logits = net
            .forward(&xs, &ActivationContext::default())
            .unwrap()
            .flatten_all()
            .unwrap()
            .to_vec1::<f32>()
            .unwrap();
        assert_eq!(logits.len(), 1000);

        // A probability vector is non-negative and sums to one
        let sum: f32 = logits.iter().sum();
        let min = logits.iter().copied().fold(f32::INFINITY, f32::min);
        assert!(min < 0.0 || (sum - 1.0).abs() > 1e-3, "sum={} min={}", sum, min);
    }
}
