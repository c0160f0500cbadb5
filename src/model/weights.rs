use std::path::{Path, PathBuf};

use candle_core::{DType, Device, Shape, Tensor};
use candle_nn::{Init, VarBuilder, VarMap};
use tracing::{info, warn};

use crate::error::Result;

pub const RESOURCES_DIR_ENV: &str = "DEEP_DREAM_RESOURCES_DIR";
pub const WEIGHTS_SUBDIR: &str = "weights";

pub const CONV_INIT: Init = candle_nn::init::DEFAULT_KAIMING_NORMAL;

/// Loads a parameter and detaches it so backward passes never accumulate into it.
pub fn frozen<S: Into<Shape>>(vb: &VarBuilder, shape: S, name: &str, init: Init) -> candle_core::Result<Tensor> {
    Ok(vb.get_with_hints(shape, name, init)?.detach())
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum WeightsSource {
    Pretrained(PathBuf),
    RandomInit,
}

impl WeightsSource {
    /// Explicit path first, then `$DEEP_DREAM_RESOURCES_DIR/weights/<model>.safetensors`.
    pub fn resolve(model_name: &str, explicit: Option<&Path>) -> Self {
        if let Some(path) = explicit {
            return WeightsSource::Pretrained(path.to_path_buf());
        }

        if let Ok(dir) = std::env::var(RESOURCES_DIR_ENV) {
            let path = PathBuf::from(dir)
                .join(WEIGHTS_SUBDIR)
                .join(format!("{}.safetensors", model_name));
            if path.is_file() {
                return WeightsSource::Pretrained(path);
            }
        }

        warn!("no pretrained weights found for {}, using random initialization", model_name);
        WeightsSource::RandomInit
    }

    pub fn var_builder(&self, device: &Device) -> Result<VarBuilder<'static>> {
        match self {
            WeightsSource::Pretrained(path) => {
                info!("loading weights from {}", path.display());
                // Safety: the weight file is not expected to change while mapped
                let vb = unsafe { VarBuilder::from_mmaped_safetensors(&[path], DType::F32, device)? };
                Ok(vb)
            }
            WeightsSource::RandomInit => {
                let varmap = VarMap::new();
                Ok(VarBuilder::from_varmap(&varmap, DType::F32, device))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn explicit_path_wins() {
        let source = WeightsSource::resolve("InceptionV3", Some(Path::new("/tmp/custom.safetensors")));
        assert_eq!(source, WeightsSource::Pretrained(PathBuf::from("/tmp/custom.safetensors")));
    }

    #[test]
    fn missing_weights_fall_back_to_random() {
        let source = WeightsSource::resolve("NoSuchModelAnywhere", None);
        assert_eq!(source, WeightsSource::RandomInit);
    }

    #[test]
    fn random_builder_produces_detached_tensors() {
        let vb = WeightsSource::RandomInit.var_builder(&Device::Cpu).unwrap();
        let w = frozen(&vb, (4, 3), "w", CONV_INIT).unwrap();
        assert_eq!(w.dims(), &[4, 3]);
        assert!(!w.is_variable());
    }
}
