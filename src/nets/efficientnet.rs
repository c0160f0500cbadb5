use candle_core::{Result, Tensor};
use candle_nn::VarBuilder;

use crate::{
    layer::{
        activations::{ActivationContext, ActivationType},
        conv2d::ConvPadding,
        factory::Layers,
        layer::Layer,
    },
    model::network::{LayerInfo, NetworkBuilder, NetworkSpec, SequentialNet},
};

const BN_EPS: f64 = 1e-3;
const SE_RATIO: f64 = 0.25;
const IMAGENET_MEAN: [f32; 3] = [0.485, 0.456, 0.406];
const IMAGENET_STD: [f32; 3] = [0.229, 0.224, 0.225];

// (kernel, repeats, filters_in, filters_out, expand_ratio, stride)
const BLOCKS_ARGS: [(usize, usize, usize, usize, usize, usize); 7] = [
    (3, 1, 32, 16, 1, 1),
    (3, 2, 16, 24, 6, 2),
    (5, 2, 24, 40, 6, 2),
    (3, 3, 40, 80, 6, 2),
    (5, 3, 80, 112, 6, 1),
    (5, 4, 112, 192, 6, 2),
    (3, 1, 192, 320, 6, 1),
];

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum EfficientNetVariant {
    B0,
    B4,
}

impl EfficientNetVariant {
    fn width_coefficient(&self) -> f64 {
        match self {
            EfficientNetVariant::B0 => 1.0,
            EfficientNetVariant::B4 => 1.4,
        }
    }

    fn depth_coefficient(&self) -> f64 {
        match self {
            EfficientNetVariant::B0 => 1.0,
            EfficientNetVariant::B4 => 1.8,
        }
    }

    pub fn input_size(&self) -> usize {
        match self {
            EfficientNetVariant::B0 => 224,
            EfficientNetVariant::B4 => 380,
        }
    }

    fn round_filters(&self, filters: usize) -> usize {
        let divisor: f64 = 8.0;
        let filters = filters as f64 * self.width_coefficient();
        let mut rounded = divisor.max(((filters + divisor / 2.0) / divisor).floor() * divisor);
        if rounded < 0.9 * filters {
            rounded += divisor;
        }
        rounded as usize
    }

    fn round_repeats(&self, repeats: usize) -> usize {
        (self.depth_coefficient() * repeats as f64).ceil() as usize
    }

    fn blocks(&self) -> Vec<BlockPlan> {
        let mut blocks = Vec::new();
        for (i, &(kernel, repeats, filters_in, filters_out, expand_ratio, stride)) in BLOCKS_ARGS.iter().enumerate() {
            let filters_in = self.round_filters(filters_in);
            let filters_out = self.round_filters(filters_out);

            for j in 0..self.round_repeats(repeats) {
                let (block_in, block_stride) = if j > 0 { (filters_out, 1) } else { (filters_in, stride) };
                blocks.push(BlockPlan {
                    name: format!("block{}{}", i + 1, (b'a' + j as u8) as char),
                    kernel,
                    stride: block_stride,
                    filters_in: block_in,
                    filters_out,
                    expand_ratio,
                });
            }
        }
        blocks
    }

    pub fn layers(&self) -> Vec<LayerInfo> {
        let mut layers = vec![LayerInfo::new("stem_activation", self.round_filters(32))];
        layers.extend(self.blocks().iter().map(|b| LayerInfo::new(b.output_name(), b.filters_out)));
        layers.push(LayerInfo::new("top_activation", self.round_filters(1280)));
        layers.push(LayerInfo::new("predictions", 1000));
        layers
    }

    pub fn build(&self, spec: NetworkSpec) -> Result<SequentialNet> {
        let mut net = NetworkBuilder::new(&spec.target_layer);
        let vb = spec.vb;
        let stem_f = self.round_filters(32);
        let top_f = self.round_filters(1280);

        net.stage("stem_activation", stem_f, || {
            Ok(Layers::sequential(vec![
                Box::new(InputNormalization::new(vb.device())?) as Box<dyn Layer>,
                Layers::conv2d_bn(
                    vb.pp("stem"),
                    3,
                    stem_f,
                    (3, 3),
                    2,
                    ConvPadding::Correct,
                    false,
                    BN_EPS,
                    Some(ActivationType::SiLU),
                )?,
            ]))
        })?;

        let blocks = self.blocks();
        for block in &blocks {
            net.stage(&block.output_name(), block.filters_out, || block.build(vb.pp(&block.name)))?;
        }
        let last_f = blocks.last().map(|b| b.filters_out).unwrap_or(stem_f);

        net.stage("top_activation", top_f, || {
            Layers::conv2d_bn(
                vb.pp("top"),
                last_f,
                top_f,
                (1, 1),
                1,
                ConvPadding::Same,
                false,
                BN_EPS,
                Some(ActivationType::SiLU),
            )
        })?;

        net.stage("predictions", 1000, || {
            Ok(Layers::sequential(vec![
                Layers::global_avg_pool(),
                Layers::linear(vb.pp("predictions"), top_f, 1000)?,
            ]))
        })?;

        net.finish()
    }
}

pub fn layers_b0() -> Vec<LayerInfo> {
    EfficientNetVariant::B0.layers()
}

pub fn build_b0(spec: NetworkSpec) -> Result<SequentialNet> {
    EfficientNetVariant::B0.build(spec)
}

pub fn layers_b4() -> Vec<LayerInfo> {
    EfficientNetVariant::B4.layers()
}

pub fn build_b4(spec: NetworkSpec) -> Result<SequentialNet> {
    EfficientNetVariant::B4.build(spec)
}

struct BlockPlan {
    name: String,
    kernel: usize,
    stride: usize,
    filters_in: usize,
    filters_out: usize,
    expand_ratio: usize,
}

impl BlockPlan {
    fn has_skip(&self) -> bool {
        self.stride == 1 && self.filters_in == self.filters_out
    }

    fn output_name(&self) -> String {
        if self.has_skip() {
            format!("{}_add", self.name)
        } else {
            format!("{}_project_bn", self.name)
        }
    }

    // Inverted residual (MBConv) block with squeeze and excitation
    fn build(&self, vb: VarBuilder) -> Result<Box<dyn Layer>> {
        let filters = self.filters_in * self.expand_ratio;
        let filters_se = ((self.filters_in as f64 * SE_RATIO) as usize).max(1);
        let swish = Some(ActivationType::SiLU);
        let mut layers = Vec::new();

        if self.expand_ratio != 1 {
            layers.push(Layers::conv2d_bn(
                vb.pp("expand"),
                self.filters_in,
                filters,
                (1, 1),
                1,
                ConvPadding::Same,
                false,
                BN_EPS,
                swish,
            )?);
        }

        let padding = if self.stride == 2 { ConvPadding::Correct } else { ConvPadding::Same };
        layers.push(Layers::depthwise_conv2d(vb.pp("dwconv"), filters, self.kernel, self.stride, padding)?);
        layers.push(Layers::batch_norm(vb.pp("bn"), filters, BN_EPS)?);
        layers.push(Layers::activation(ActivationType::SiLU));

        layers.push(Layers::gate(Layers::sequential(vec![
            Layers::global_avg_pool_keepdim(),
            Layers::conv2d_with(vb.pp("se_reduce"), filters, filters_se, (1, 1), 1, ConvPadding::Same, true)?,
            Layers::activation(ActivationType::SiLU),
            Layers::conv2d_with(vb.pp("se_expand"), filters_se, filters, (1, 1), 1, ConvPadding::Same, true)?,
            Layers::activation(ActivationType::Sigmoid),
        ])));

        layers.push(Layers::conv2d_bn(
            vb.pp("project"),
            filters,
            self.filters_out,
            (1, 1),
            1,
            ConvPadding::Same,
            false,
            BN_EPS,
            None,
        )?);

        let body = Layers::sequential(layers);
        if self.has_skip() {
            Ok(Layers::residual(body, None, None))
        } else {
            Ok(body)
        }
    }
}

// Rescales [0, 255] input to ImageNet-normalized values inside the graph
struct InputNormalization {
    scale: Tensor,
    shift: Tensor,
}

impl InputNormalization {
    fn new(device: &candle_core::Device) -> Result<Self> {
        let scale: Vec<f32> = IMAGENET_STD.iter().map(|s| 1.0 / (255.0 * s)).collect();
        let shift: Vec<f32> = IMAGENET_MEAN
            .iter()
            .zip(IMAGENET_STD.iter())
            .map(|(m, s)| -m / s)
            .collect();

        Ok(Self {
            scale: Tensor::from_vec(scale, (1, 3, 1, 1), device)?,
            shift: Tensor::from_vec(shift, (1, 3, 1, 1), device)?,
        })
    }
}

impl Layer for InputNormalization {
    fn forward(&self, xs: &Tensor, _ctx: &ActivationContext) -> Result<Tensor> {
        xs.broadcast_mul(&self.scale)?.broadcast_add(&self.shift)
    }

    fn name(&self) -> String {
        "InputNormalization".to_string()
    }
}
