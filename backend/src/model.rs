use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};

use ndarray::{Array4, Axis};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tch::{CModule, Device, Kind, Tensor};

use crate::config::Settings;
use crate::error::InferenceError;
use shared::{ModelInfoResponse, PredictionResponse};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelStatus {
    NotLoaded,
    Loaded,
    Stubbed,
}

impl ModelStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ModelStatus::NotLoaded => "not_loaded",
            ModelStatus::Loaded => "loaded",
            ModelStatus::Stubbed => "stubbed",
        }
    }
}

/// How the raw output vector is interpreted, fixed once at load time from
/// the model's output width.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OutputHead {
    /// Width-1 output: sigmoid probability of the malignant class.
    Binary,
    /// Probability vector over the configured class list.
    MultiClass,
}

/// Untrained fallback so the service still answers when no artifact is
/// deployed: a seeded-random linear head over per-channel means, softmaxed
/// over the configured class count.
pub struct StubNet {
    weights: Vec<[f32; 3]>,
    bias: Vec<f32>,
}

impl StubNet {
    fn new(num_classes: usize) -> Self {
        let mut rng = StdRng::seed_from_u64(0x0ca1);
        let weights = (0..num_classes)
            .map(|_| {
                [
                    rng.random_range(-1.0..1.0),
                    rng.random_range(-1.0..1.0),
                    rng.random_range(-1.0..1.0),
                ]
            })
            .collect();
        let bias = (0..num_classes).map(|_| rng.random_range(-0.5..0.5)).collect();
        Self { weights, bias }
    }

    fn forward(&self, input: &Array4<f32>) -> Vec<f32> {
        let view = input.index_axis(Axis(0), 0);
        let count = (view.len() / 3).max(1) as f32;
        let mut pooled = [0f32; 3];
        for ((_, _, c), value) in view.indexed_iter() {
            pooled[c] += value;
        }
        for p in pooled.iter_mut() {
            *p /= count;
        }

        let logits: Vec<f32> = self
            .weights
            .iter()
            .zip(&self.bias)
            .map(|(w, b)| w[0] * pooled[0] + w[1] * pooled[1] + w[2] * pooled[2] + b)
            .collect();
        softmax(&logits)
    }
}

pub enum ModelHandle {
    Loaded {
        module: Arc<Mutex<CModule>>,
        device: Device,
        output_width: usize,
    },
    Stubbed(StubNet),
}

/// Owns the loaded model for the process lifetime. Immutable after `load`,
/// shared read-only across requests; the only lock is around the tch module,
/// which is not `Sync`.
pub struct ModelService {
    handle: Option<ModelHandle>,
    head: OutputHead,
    class_names: Vec<String>,
    input_size: (u32, u32, u32),
    model_path: String,
    model_format: String,
}

impl ModelService {
    pub fn new(settings: &Settings) -> Self {
        Self {
            handle: None,
            head: OutputHead::MultiClass,
            class_names: settings.class_names.clone(),
            input_size: (
                settings.image_size[1],
                settings.image_size[0],
                settings.image_channels,
            ),
            model_path: settings.model_path.clone(),
            model_format: settings.model_format.clone(),
        }
    }

    /// Loads the configured artifact, or falls back to the stub so startup
    /// never fails on a missing model. Idempotent.
    pub fn load(&mut self) {
        if self.handle.is_some() {
            return;
        }

        let handle = match self.try_load_module() {
            Ok((module, device, output_width)) => {
                log::info!(
                    "Loaded model from {} (output width {})",
                    self.model_path,
                    output_width
                );
                ModelHandle::Loaded {
                    module: Arc::new(Mutex::new(module)),
                    device,
                    output_width,
                }
            }
            Err(e) => {
                log::warn!("{}", e);
                log::warn!("Falling back to an untrained stub model");
                ModelHandle::Stubbed(StubNet::new(self.class_names.len()))
            }
        };

        self.head = match &handle {
            ModelHandle::Loaded { output_width: 1, .. } => OutputHead::Binary,
            _ => OutputHead::MultiClass,
        };
        self.handle = Some(handle);
    }

    fn try_load_module(&self) -> Result<(CModule, Device, usize), InferenceError> {
        if self.model_format != "torchscript" {
            return Err(InferenceError::Load(format!(
                "unsupported model format: {}",
                self.model_format
            )));
        }
        if !Path::new(&self.model_path).exists() {
            return Err(InferenceError::Load(format!(
                "model file not found at {}",
                self.model_path
            )));
        }

        let device = Device::cuda_if_available();
        let module = CModule::load_on_device(&self.model_path, device)?;

        // Probe with a zero tensor to fix the output head once, up front.
        let (h, w, c) = self.input_size;
        let probe = Tensor::zeros(
            [1, c as i64, h as i64, w as i64],
            (Kind::Float, device),
        );
        let output = module.forward_ts(&[probe])?;
        let output_width = output.view([-1]).size()[0] as usize;

        Ok((module, device, output_width))
    }

    pub fn status(&self) -> ModelStatus {
        match &self.handle {
            None => ModelStatus::NotLoaded,
            Some(ModelHandle::Loaded { .. }) => ModelStatus::Loaded,
            Some(ModelHandle::Stubbed(_)) => ModelStatus::Stubbed,
        }
    }

    pub fn is_loaded(&self) -> bool {
        self.status() == ModelStatus::Loaded
    }

    pub fn predict(&self, input: &Array4<f32>) -> Result<PredictionResponse, InferenceError> {
        let handle = self.handle.as_ref().ok_or(InferenceError::NotLoaded)?;

        let probs = match handle {
            ModelHandle::Loaded {
                module,
                device,
                output_width,
            } => {
                let raw = self.forward_module(module, *device, input)?;
                if raw.is_empty() {
                    return Err(InferenceError::Output(
                        "model produced an empty output".to_string(),
                    ));
                }
                // TorchScript artifacts emit logits; squash them here.
                if *output_width == 1 {
                    vec![sigmoid(raw[0])]
                } else {
                    softmax(&raw)
                }
            }
            ModelHandle::Stubbed(stub) => stub.forward(input),
        };

        match self.head {
            OutputHead::Binary => Ok(interpret_binary(probs[0])),
            OutputHead::MultiClass => interpret_multiclass(&self.class_names, &probs),
        }
    }

    fn forward_module(
        &self,
        module: &Arc<Mutex<CModule>>,
        device: Device,
        input: &Array4<f32>,
    ) -> Result<Vec<f32>, InferenceError> {
        let (n, h, w, c) = input.dim();
        let data: Vec<f32> = input.iter().copied().collect();
        let tensor = Tensor::from_slice(&data)
            .view([n as i64, h as i64, w as i64, c as i64])
            .permute([0, 3, 1, 2])
            .to_device(device);

        let module = module.lock().unwrap();
        let output = module.forward_ts(&[tensor])?;
        let flat = output.to_kind(Kind::Float).view([-1]);
        let len = flat.size()[0] as usize;
        let mut raw = vec![0f32; len];
        flat.copy_data(&mut raw, len);
        Ok(raw)
    }

    pub fn model_info(&self) -> ModelInfoResponse {
        let (h, w, c) = self.input_size;
        let output_width = match &self.handle {
            Some(ModelHandle::Loaded { output_width, .. }) => *output_width,
            Some(ModelHandle::Stubbed(_)) => self.class_names.len(),
            None => 0,
        };
        ModelInfoResponse {
            status: self.status().as_str().to_string(),
            input_shape: vec![1, h as usize, w as usize, c as usize],
            output_width,
            num_classes: self.class_names.len(),
            classes: self.class_names.clone(),
        }
    }

    pub fn class_names(&self) -> &[String] {
        &self.class_names
    }
}

fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}

fn softmax(xs: &[f32]) -> Vec<f32> {
    let max = xs.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let exps: Vec<f32> = xs.iter().map(|&x| (x - max).exp()).collect();
    let sum: f32 = exps.iter().sum();
    exps.into_iter().map(|e| e / sum).collect()
}

fn interpret_binary(malignant: f32) -> PredictionResponse {
    let malignant = malignant.clamp(0.0, 1.0);
    let benign = 1.0 - malignant;
    let (prediction, confidence) = if malignant > 0.5 {
        ("Malignant", malignant)
    } else {
        ("Benign", benign)
    };
    let probabilities = HashMap::from([
        ("Benign".to_string(), benign),
        ("Malignant".to_string(), malignant),
    ]);
    PredictionResponse {
        prediction: prediction.to_string(),
        confidence,
        probabilities,
    }
}

fn interpret_multiclass(
    class_names: &[String],
    probs: &[f32],
) -> Result<PredictionResponse, InferenceError> {
    // Truncate to the shorter of label count and output width.
    let width = probs.len().min(class_names.len());
    if width == 0 {
        return Err(InferenceError::Output(
            "no class probabilities to interpret".to_string(),
        ));
    }
    let probs = &probs[..width];

    // Strictly-greater comparison: ties resolve to the lowest index.
    let mut best_idx = 0;
    let mut best = probs[0];
    for (i, &p) in probs.iter().enumerate().skip(1) {
        if p > best {
            best = p;
            best_idx = i;
        }
    }

    let probabilities: HashMap<String, f32> = class_names
        .iter()
        .cloned()
        .zip(probs.iter().copied())
        .collect();

    Ok(PredictionResponse {
        prediction: class_names[best_idx].clone(),
        confidence: best,
        probabilities,
    })
}
