use candle_core::Result;
use candle_nn::VarBuilder;

use crate::{
    layer::{activations::ActivationType, conv2d::ConvPadding, factory::Layers, layer::Layer},
    model::network::{LayerInfo, NetworkBuilder, NetworkSpec, SequentialNet},
};

pub const INPUT_SIZE: usize = 299;
const BN_EPS: f64 = 1e-3;

const STAGES: [(&str, usize); 13] = [
    ("max_pooling2d_1", 192),
    ("mixed0", 256),
    ("mixed1", 288),
    ("mixed2", 288),
    ("mixed3", 768),
    ("mixed4", 768),
    ("mixed5", 768),
    ("mixed6", 768),
    ("mixed7", 768),
    ("mixed8", 1280),
    ("mixed9", 2048),
    ("mixed10", 2048),
    ("predictions", 1000),
];

pub fn layers() -> Vec<LayerInfo> {
    STAGES.iter().map(|&(name, width)| LayerInfo::new(name, width)).collect()
}

pub fn build(spec: NetworkSpec) -> Result<SequentialNet> {
    let mut net = NetworkBuilder::new(&spec.target_layer);
    let units = Units { relu: spec.relu };
    let vb = spec.vb;

    net.stage("max_pooling2d_1", 192, || units.stem(vb.pp("stem")))?;
    net.stage("mixed0", 256, || units.block_a(vb.pp("mixed0"), 192, 32))?;
    net.stage("mixed1", 288, || units.block_a(vb.pp("mixed1"), 256, 64))?;
    net.stage("mixed2", 288, || units.block_a(vb.pp("mixed2"), 288, 64))?;
    net.stage("mixed3", 768, || units.reduction_a(vb.pp("mixed3"), 288))?;
    net.stage("mixed4", 768, || units.block_c(vb.pp("mixed4"), 128))?;
    net.stage("mixed5", 768, || units.block_c(vb.pp("mixed5"), 160))?;
    net.stage("mixed6", 768, || units.block_c(vb.pp("mixed6"), 160))?;
    net.stage("mixed7", 768, || units.block_c(vb.pp("mixed7"), 192))?;
    net.stage("mixed8", 1280, || units.reduction_b(vb.pp("mixed8")))?;
    net.stage("mixed9", 2048, || units.block_e(vb.pp("mixed9"), 1280))?;
    net.stage("mixed10", 2048, || units.block_e(vb.pp("mixed10"), 2048))?;
    net.stage("predictions", 1000, || units.head(vb.pp("predictions"), 2048))?;

    net.finish()
}

struct Units {
    relu: ActivationType,
}

impl Units {
    fn conv(&self, vb: VarBuilder, in_f: usize, out_f: usize, kernel: (usize, usize)) -> Result<Box<dyn Layer>> {
        self.conv_with(vb, in_f, out_f, kernel, 1, ConvPadding::Same)
    }

    fn conv_with(
        &self,
        vb: VarBuilder,
        in_f: usize,
        out_f: usize,
        kernel: (usize, usize),
        stride: usize,
        padding: ConvPadding,
    ) -> Result<Box<dyn Layer>> {
        Layers::conv2d_bn(vb, in_f, out_f, kernel, stride, padding, false, BN_EPS, Some(self.relu))
    }

    fn stem(&self, vb: VarBuilder) -> Result<Box<dyn Layer>> {
        Ok(Layers::sequential(vec![
            self.conv_with(vb.pp("conv1"), 3, 32, (3, 3), 2, ConvPadding::Valid)?,
            self.conv_with(vb.pp("conv2"), 32, 32, (3, 3), 1, ConvPadding::Valid)?,
            self.conv(vb.pp("conv3"), 32, 64, (3, 3))?,
            Layers::max_pool(3, 2),
            self.conv_with(vb.pp("conv4"), 64, 80, (1, 1), 1, ConvPadding::Valid)?,
            self.conv_with(vb.pp("conv5"), 80, 192, (3, 3), 1, ConvPadding::Valid)?,
            Layers::max_pool(3, 2),
        ]))
    }

    // mixed0 to mixed2
    fn block_a(&self, vb: VarBuilder, in_f: usize, pool_f: usize) -> Result<Box<dyn Layer>> {
        Ok(Layers::concat(vec![
            self.conv(vb.pp("branch1x1"), in_f, 64, (1, 1))?,
            Layers::sequential(vec![
                self.conv(vb.pp("branch5x5_1"), in_f, 48, (1, 1))?,
                self.conv(vb.pp("branch5x5_2"), 48, 64, (5, 5))?,
            ]),
            Layers::sequential(vec![
                self.conv(vb.pp("branch3x3dbl_1"), in_f, 64, (1, 1))?,
                self.conv(vb.pp("branch3x3dbl_2"), 64, 96, (3, 3))?,
                self.conv(vb.pp("branch3x3dbl_3"), 96, 96, (3, 3))?,
            ]),
            Layers::sequential(vec![
                Layers::avg_pool_same(3),
                self.conv(vb.pp("branch_pool"), in_f, pool_f, (1, 1))?,
            ]),
        ]))
    }

    // mixed3
    fn reduction_a(&self, vb: VarBuilder, in_f: usize) -> Result<Box<dyn Layer>> {
        Ok(Layers::concat(vec![
            self.conv_with(vb.pp("branch3x3"), in_f, 384, (3, 3), 2, ConvPadding::Valid)?,
            Layers::sequential(vec![
                self.conv(vb.pp("branch3x3dbl_1"), in_f, 64, (1, 1))?,
                self.conv(vb.pp("branch3x3dbl_2"), 64, 96, (3, 3))?,
                self.conv_with(vb.pp("branch3x3dbl_3"), 96, 96, (3, 3), 2, ConvPadding::Valid)?,
            ]),
            Layers::max_pool(3, 2),
        ]))
    }

    // mixed4 to mixed7, factorized 7x7 convolutions
    fn block_c(&self, vb: VarBuilder, mid_f: usize) -> Result<Box<dyn Layer>> {
        Ok(Layers::concat(vec![
            self.conv(vb.pp("branch1x1"), 768, 192, (1, 1))?,
            Layers::sequential(vec![
                self.conv(vb.pp("branch7x7_1"), 768, mid_f, (1, 1))?,
                self.conv(vb.pp("branch7x7_2"), mid_f, mid_f, (1, 7))?,
                self.conv(vb.pp("branch7x7_3"), mid_f, 192, (7, 1))?,
            ]),
            Layers::sequential(vec![
                self.conv(vb.pp("branch7x7dbl_1"), 768, mid_f, (1, 1))?,
                self.conv(vb.pp("branch7x7dbl_2"), mid_f, mid_f, (7, 1))?,
                self.conv(vb.pp("branch7x7dbl_3"), mid_f, mid_f, (1, 7))?,
                self.conv(vb.pp("branch7x7dbl_4"), mid_f, mid_f, (7, 1))?,
                self.conv(vb.pp("branch7x7dbl_5"), mid_f, 192, (1, 7))?,
            ]),
            Layers::sequential(vec![
                Layers::avg_pool_same(3),
                self.conv(vb.pp("branch_pool"), 768, 192, (1, 1))?,
            ]),
        ]))
    }

    // mixed8
    fn reduction_b(&self, vb: VarBuilder) -> Result<Box<dyn Layer>> {
        Ok(Layers::concat(vec![
            Layers::sequential(vec![
                self.conv(vb.pp("branch3x3_1"), 768, 192, (1, 1))?,
                self.conv_with(vb.pp("branch3x3_2"), 192, 320, (3, 3), 2, ConvPadding::Valid)?,
            ]),
            Layers::sequential(vec![
                self.conv(vb.pp("branch7x7x3_1"), 768, 192, (1, 1))?,
                self.conv(vb.pp("branch7x7x3_2"), 192, 192, (1, 7))?,
                self.conv(vb.pp("branch7x7x3_3"), 192, 192, (7, 1))?,
                self.conv_with(vb.pp("branch7x7x3_4"), 192, 192, (3, 3), 2, ConvPadding::Valid)?,
            ]),
            Layers::max_pool(3, 2),
        ]))
    }

    // mixed9 and mixed10, expanded filter banks
    fn block_e(&self, vb: VarBuilder, in_f: usize) -> Result<Box<dyn Layer>> {
        Ok(Layers::concat(vec![
            self.conv(vb.pp("branch1x1"), in_f, 320, (1, 1))?,
            Layers::sequential(vec![
                self.conv(vb.pp("branch3x3_1"), in_f, 384, (1, 1))?,
                Layers::concat(vec![
                    self.conv(vb.pp("branch3x3_2a"), 384, 384, (1, 3))?,
                    self.conv(vb.pp("branch3x3_2b"), 384, 384, (3, 1))?,
                ]),
            ]),
            Layers::sequential(vec![
                self.conv(vb.pp("branch3x3dbl_1"), in_f, 448, (1, 1))?,
                self.conv(vb.pp("branch3x3dbl_2"), 448, 384, (3, 3))?,
                Layers::concat(vec![
                    self.conv(vb.pp("branch3x3dbl_3a"), 384, 384, (1, 3))?,
                    self.conv(vb.pp("branch3x3dbl_3b"), 384, 384, (3, 1))?,
                ]),
            ]),
            Layers::sequential(vec![
                Layers::avg_pool_same(3),
                self.conv(vb.pp("branch_pool"), in_f, 192, (1, 1))?,
            ]),
        ]))
    }

    fn head(&self, vb: VarBuilder, in_f: usize) -> Result<Box<dyn Layer>> {
        Ok(Layers::sequential(vec![
            Layers::global_avg_pool(),
            Layers::linear(vb, in_f, 1000)?,
        ]))
    }
}
