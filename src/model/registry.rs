use std::collections::HashMap;

use candle_core::Device;
use candle_nn::VarBuilder;
use tracing::{debug, info};

use crate::{
    error::{DreamError, Result},
    layer::activations::ActivationPatch,
    nets::{efficientnet, inception_v3, resnet50},
};

use super::{
    input_type::{ChannelOrder, InputType},
    network::{LayerInfo, NetworkSpec, SequentialNet},
};

pub const PREDICTIONS_LAYER: &str = "predictions";

/// Static description of a supported architecture.
#[derive(Clone)]
pub struct ModelEntry {
    pub name: String,
    pub description: String,
    pub input_type: InputType,
    pub input_range: (f32, f32),
    pub lr_multiplier: f64,
    pub channel_order: ChannelOrder,
    /// Native input size of the classification head
    pub input_size: usize,
    pub activation_patch: ActivationPatch,
    pub layers: fn() -> Vec<LayerInfo>,
    pub build: fn(NetworkSpec) -> candle_core::Result<SequentialNet>,
}

impl ModelEntry {
    pub fn layer(&self, name: &str) -> Option<LayerInfo> {
        (self.layers)().into_iter().find(|l| l.name == name)
    }

    /// Builds the frozen graph up to `layer_name`, rectifiers patched per this entry.
    pub fn build_network(&self, vb: VarBuilder, device: &Device, layer_name: &str) -> Result<SequentialNet> {
        let layer = self.layer(layer_name).ok_or_else(|| DreamError::UnknownLayer {
            model: self.name.clone(),
            layer: layer_name.to_string(),
        })?;

        debug!("building {} up to {} ({} neurons)", self.name, layer.name, layer.width);
        let spec = NetworkSpec {
            vb,
            relu: self.activation_patch.relu(device),
            target_layer: layer.name,
        };
        Ok((self.build)(spec)?)
    }
}

pub struct ModelRegistry {
    models: HashMap<String, ModelEntry>,
}

impl ModelRegistry {
    pub fn new() -> Self {
        Self {
            models: HashMap::new(),
        }
    }

    pub fn with_defaults() -> Self {
        let mut registry = Self::new();

        registry.register(ModelEntry {
            name: "InceptionV3".to_string(),
            description: "Inception v3 trained on ImageNet, 299x299 input".to_string(),
            input_type: InputType::Tf,
            input_range: (-1.0, 1.0),
            lr_multiplier: 1.0,
            channel_order: ChannelOrder::Rgb,
            input_size: inception_v3::INPUT_SIZE,
            activation_patch: ActivationPatch::FactoryOverride,
            layers: inception_v3::layers,
            build: inception_v3::build,
        });

        registry.register(ModelEntry {
            name: "ResNet50".to_string(),
            description: "ResNet-50 trained on ImageNet, 224x224 input".to_string(),
            input_type: InputType::Caffe,
            input_range: (-176.0, 177.0),
            lr_multiplier: 128.0,
            channel_order: ChannelOrder::Bgr,
            input_size: resnet50::INPUT_SIZE,
            activation_patch: ActivationPatch::FactoryOverride,
            layers: resnet50::layers,
            build: resnet50::build,
        });

        registry.register(ModelEntry {
            name: "EfficientNetB0".to_string(),
            description: "EfficientNet-B0 trained on ImageNet, 224x224 input".to_string(),
            input_type: InputType::Raw,
            input_range: (0.0, 255.0),
            lr_multiplier: 128.0,
            channel_order: ChannelOrder::Rgb,
            input_size: efficientnet::EfficientNetVariant::B0.input_size(),
            activation_patch: ActivationPatch::None,
            layers: efficientnet::layers_b0,
            build: efficientnet::build_b0,
        });

        registry.register(ModelEntry {
            name: "EfficientNetB4".to_string(),
            description: "EfficientNet-B4 trained on ImageNet, 380x380 input".to_string(),
            input_type: InputType::Raw,
            input_range: (0.0, 255.0),
            lr_multiplier: 128.0,
            channel_order: ChannelOrder::Rgb,
            input_size: efficientnet::EfficientNetVariant::B4.input_size(),
            activation_patch: ActivationPatch::None,
            layers: efficientnet::layers_b4,
            build: efficientnet::build_b4,
        });

        registry
    }

    pub fn register(&mut self, entry: ModelEntry) {
        info!("registering model {}", entry.name);
        self.models.insert(entry.name.clone(), entry);
    }

    pub fn get(&self, name: &str) -> Result<&ModelEntry> {
        self.models
            .get(name)
            .ok_or_else(|| DreamError::UnknownModel(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.models.contains_key(name)
    }

    pub fn list_models(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.models.keys().map(|k| k.as_str()).collect();
        names.sort_unstable();
        names
    }
}

impl Default for ModelRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_registered() {
        let registry = ModelRegistry::with_defaults();
        assert_eq!(
            registry.list_models(),
            vec!["EfficientNetB0", "EfficientNetB4", "InceptionV3", "ResNet50"]
        );
    }

    #[test]
    fn unknown_model_is_an_error() {
        let registry = ModelRegistry::with_defaults();
        assert!(matches!(registry.get("VGG16"), Err(DreamError::UnknownModel(_))));
    }

    #[test]
    fn entry_metadata() {
        let registry = ModelRegistry::with_defaults();
        let resnet = registry.get("ResNet50").unwrap();
        assert_eq!(resnet.input_type, InputType::Caffe);
        assert_eq!(resnet.channel_order, ChannelOrder::Bgr);
        assert_eq!(resnet.input_range, (-176.0, 177.0));
        assert_eq!(resnet.layer(PREDICTIONS_LAYER).map(|l| l.width), Some(1000));

        let inception = registry.get("InceptionV3").unwrap();
        assert_eq!(inception.activation_patch, ActivationPatch::FactoryOverride);
        assert_eq!(inception.input_size, 299);
    }

    #[test]
    fn unknown_layer_is_rejected_before_building() {
        let registry = ModelRegistry::with_defaults();
        let entry = registry.get("InceptionV3").unwrap();
        let vb = crate::model::weights::WeightsSource::RandomInit
            .var_builder(&Device::Cpu)
            .unwrap();
        assert!(matches!(
            entry.build_network(vb, &Device::Cpu, "conv5_block3_out"),
            Err(DreamError::UnknownLayer { .. })
        ));
    }
}
