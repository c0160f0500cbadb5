use candle_core::{Result, Tensor};
use candle_nn::VarBuilder;
use tracing::debug;

use crate::layer::{activations::{ActivationContext, ActivationType}, layer::Layer};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LayerInfo {
    pub name: String,
    pub width: usize,
}

impl LayerInfo {
    pub fn new(name: impl Into<String>, width: usize) -> Self {
        Self { name: name.into(), width }
    }
}

/// Everything an architecture constructor needs.
pub struct NetworkSpec<'a> {
    pub vb: VarBuilder<'a>,
    pub relu: ActivationType,
    pub target_layer: String,
}

pub struct NamedStage {
    pub name: String,
    pub width: usize,
    pub layer: Box<dyn Layer>,
}

/// Frozen feature extractor: stages run in order, the output is the last stage.
pub struct SequentialNet {
    stages: Vec<NamedStage>,
}

impl SequentialNet {
    pub fn forward(&self, xs: &Tensor, ctx: &ActivationContext) -> Result<Tensor> {
        let mut xs = xs.clone();
        for stage in &self.stages {
            xs = stage.layer.forward(&xs, ctx)?;
        }
        Ok(xs)
    }

    pub fn output_layer(&self) -> Option<&str> {
        self.stages.last().map(|s| s.name.as_str())
    }

    pub fn output_width(&self) -> usize {
        self.stages.last().map(|s| s.width).unwrap_or(0)
    }

    pub fn stage_names(&self) -> Vec<&str> {
        self.stages.iter().map(|s| s.name.as_str()).collect()
    }
}

/// Collects stages until the target layer has been added; later stages are skipped
/// without allocating their weights.
pub struct NetworkBuilder {
    target: String,
    stages: Vec<NamedStage>,
    complete: bool,
}

impl NetworkBuilder {
    pub fn new(target: &str) -> Self {
        Self {
            target: target.to_string(),
            stages: Vec::new(),
            complete: false,
        }
    }

    pub fn is_complete(&self) -> bool {
        self.complete
    }

    pub fn stage<F>(&mut self, name: &str, width: usize, build: F) -> Result<()>
    where
        F: FnOnce() -> Result<Box<dyn Layer>>,
    {
        if self.complete {
            return Ok(());
        }

        let layer = build()?;
        debug!("built stage {} ({}{})", name, layer.name(), layer.config_string().map(|c| format!(" {}", c)).unwrap_or_default());
        self.stages.push(NamedStage {
            name: name.to_string(),
            width,
            layer,
        });
        self.complete = name == self.target;
        Ok(())
    }

    pub fn finish(self) -> Result<SequentialNet> {
        if !self.complete {
            return Err(candle_core::Error::Msg(format!("layer {} not found in network", self.target)));
        }
        Ok(SequentialNet { stages: self.stages })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layer::activations::ActivationLayer;
    use candle_core::Device;

    fn relu() -> Result<Box<dyn Layer>> {
        Ok(Box::new(ActivationLayer::new(ActivationType::ReLU)))
    }

    #[test]
    fn builder_stops_at_target() {
        let mut builder = NetworkBuilder::new("b");
        let mut built_after_target = false;
        builder.stage("a", 4, relu).unwrap();
        builder.stage("b", 8, relu).unwrap();
        builder
            .stage("c", 16, || {
                built_after_target = true;
                relu()
            })
            .unwrap();
        assert!(!built_after_target);

        let net = builder.finish().unwrap();
        assert_eq!(net.stage_names(), vec!["a", "b"]);
        assert_eq!(net.output_layer(), Some("b"));
        assert_eq!(net.output_width(), 8);
    }

    #[test]
    fn missing_target_is_an_error() {
        let mut builder = NetworkBuilder::new("zzz");
        builder.stage("a", 4, relu).unwrap();
        assert!(builder.finish().is_err());
    }

    #[test]
    fn forward_chains_stages() {
        let mut builder = NetworkBuilder::new("b");
        builder.stage("a", 1, relu).unwrap();
        builder.stage("b", 1, relu).unwrap();
        let net = builder.finish().unwrap();
        let xs = Tensor::new(&[-1f32, 1.], &Device::Cpu).unwrap();
        let ys = net.forward(&xs, &ActivationContext::default()).unwrap();
        assert_eq!(ys.to_vec1::<f32>().unwrap(), vec![0., 1.]);
    }
}
