use std::path::Path;

use anyhow::{anyhow, Context, Result};
use image::RgbImage;
use tract_onnx::prelude::*;

use super::{Classifier, Recognition};

const DEFAULT_TOP_K: usize = 3;

/// Tract-based ONNX image classifier.
///
/// Loads a local model file plus a labels file (one label per line) and runs
/// inference on the fixed-size RGB crop. No network I/O; disk is touched only
/// at load time.
pub struct TractClassifier {
    model: SimplePlan<TypedFact, Box<dyn TypedOp>, TypedModel>,
    labels: Vec<String>,
    input_size: u32,
    top_k: usize,
}

impl TractClassifier {
    /// Load an ONNX model and its labels and prepare the runnable plan.
    pub fn new<P: AsRef<Path>>(model_path: P, labels_path: P, input_size: u32) -> Result<Self> {
        let model_path = model_path.as_ref();
        let model = tract_onnx::onnx()
            .model_for_path(model_path)
            .with_context(|| format!("failed to load ONNX model from {}", model_path.display()))?
            .with_input_fact(
                0,
                InferenceFact::dt_shape(
                    f32::datum_type(),
                    tvec!(1, 3, input_size as usize, input_size as usize),
                ),
            )
            .context("failed to set input fact")?
            .into_optimized()
            .context("failed to optimize ONNX model")?
            .into_runnable()
            .context("failed to build runnable ONNX model")?;

        let labels_path = labels_path.as_ref();
        let labels: Vec<String> = std::fs::read_to_string(labels_path)
            .with_context(|| format!("failed to read labels from {}", labels_path.display()))?
            .lines()
            .map(|line| line.trim().to_string())
            .filter(|line| !line.is_empty())
            .collect();
        if labels.is_empty() {
            return Err(anyhow!("labels file {} is empty", labels_path.display()));
        }

        Ok(Self {
            model,
            labels,
            input_size,
            top_k: DEFAULT_TOP_K,
        })
    }

    /// Override how many ranked results each classification returns.
    pub fn with_top_k(mut self, top_k: usize) -> Self {
        self.top_k = top_k.max(1);
        self
    }

    fn build_input(&self, image: &RgbImage) -> Result<Tensor> {
        if image.width() != self.input_size || image.height() != self.input_size {
            return Err(anyhow!(
                "image is {}x{} but model expects {}x{}",
                image.width(),
                image.height(),
                self.input_size,
                self.input_size
            ));
        }
        let size = self.input_size as usize;
        let input = tract_ndarray::Array4::from_shape_fn((1, 3, size, size), |(_, channel, y, x)| {
            image.get_pixel(x as u32, y as u32).0[channel] as f32 / 255.0
        });
        Ok(input.into_tensor())
    }

    fn rank_outputs(&self, outputs: TVec<TValue>) -> Result<Vec<Recognition>> {
        let output = outputs
            .first()
            .ok_or_else(|| anyhow!("model produced no outputs"))?;
        let scores = output
            .to_array_view::<f32>()
            .context("model output tensor was not f32")?;

        let logits: Vec<f32> = scores.iter().copied().collect();
        if logits.is_empty() {
            return Err(anyhow!("model produced an empty score vector"));
        }

        // Softmax so confidences are comparable across models.
        let max_logit = logits.iter().cloned().fold(f32::NEG_INFINITY, f32::max);
        let exps: Vec<f32> = logits.iter().map(|l| (l - max_logit).exp()).collect();
        let denom: f32 = exps.iter().sum();

        let mut ranked: Vec<(usize, f32)> = exps
            .iter()
            .enumerate()
            .map(|(index, exp)| (index, exp / denom))
            .collect();
        ranked.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        ranked.truncate(self.top_k);

        Ok(ranked
            .into_iter()
            .map(|(index, confidence)| Recognition {
                title: self
                    .labels
                    .get(index)
                    .cloned()
                    .unwrap_or_else(|| format!("class {}", index)),
                confidence,
            })
            .collect())
    }
}

impl Classifier for TractClassifier {
    fn name(&self) -> &'static str {
        "tract"
    }

    fn classify(&mut self, image: &RgbImage) -> Result<Vec<Recognition>> {
        let input = self.build_input(image)?;
        let outputs = self
            .model
            .run(tvec!(input.into()))
            .context("ONNX inference failed")?;
        self.rank_outputs(outputs)
    }
}
