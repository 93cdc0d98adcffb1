//! TorchScript-backed predictor.
//!
//! The scripted module must take a `[batch, channels, 8, 8]` float tensor and return a tuple
//! `(value, policy)` where `value` is `[batch]` or `[batch, 1]` and `policy` holds raw logits
//! `[batch, policy_len]`.

use std::path::Path;
use std::sync::{Mutex, PoisonError};

use tch::{CModule, Device, IValue, Kind, Tensor};

use crate::neural::predictor::{Prediction, Predictor};
use crate::{EngineError, Result};

pub struct TorchScriptPredictor {
    module: Mutex<CModule>,
    device: Device,
}

impl TorchScriptPredictor {
    pub fn load(path: impl AsRef<Path>, device: Device) -> Result<Self> {
        let path = path.as_ref();
        log::info!("Loading TorchScript model from {}", path.display());
        let mut module = CModule::load_on_device(path, device)?;
        module.set_eval();
        Ok(Self {
            module: Mutex::new(module),
            device,
        })
    }

    fn split_output(output: IValue) -> Result<(Tensor, Tensor)> {
        match output {
            IValue::Tuple(mut items) if items.len() == 2 => {
                let policy = items.pop();
                let value = items.pop();
                match (value, policy) {
                    (Some(IValue::Tensor(value)), Some(IValue::Tensor(policy))) => Ok((value, policy)),
                    _ => Err(EngineError::Prediction(
                        "model output tuple must contain two tensors".to_string(),
                    )),
                }
            }
            other => Err(EngineError::Prediction(format!(
                "expected (value, policy) tuple, got {:?}",
                other
            ))),
        }
    }
}

impl Predictor for TorchScriptPredictor {
    fn predict_single(&self, planes: &Tensor) -> Result<Prediction> {
        self.predict_batch(&planes.unsqueeze(0))?
            .into_iter()
            .next()
            .ok_or_else(|| EngineError::Prediction("model returned an empty batch".to_string()))
    }

    fn predict_batch(&self, batch: &Tensor) -> Result<Vec<Prediction>> {
        let input = batch.to_device(self.device).to_kind(Kind::Float);
        let output = {
            let module = self.module.lock().unwrap_or_else(PoisonError::into_inner);
            tch::no_grad(|| module.forward_is(&[IValue::Tensor(input)]))?
        };
        let (value, policy) = Self::split_output(output)?;

        let values = Vec::<f32>::try_from(value.to_device(Device::Cpu).to_kind(Kind::Float).flatten(0, -1))?;
        let policy = policy
            .softmax(-1, Kind::Float)
            .to_device(Device::Cpu)
            .contiguous();

        let rows = values.len();
        if policy.size().first().copied().unwrap_or(0) as usize != rows {
            return Err(EngineError::Prediction(format!(
                "value head returned {} rows but policy head returned {:?}",
                rows,
                policy.size()
            )));
        }

        values
            .into_iter()
            .enumerate()
            .map(|(i, value)| -> Result<Prediction> {
                let row = Vec::<f32>::try_from(policy.get(i as i64))?;
                Ok(Prediction { value, policy: row })
            })
            .collect()
    }
}
