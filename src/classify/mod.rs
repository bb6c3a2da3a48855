//! Classifier seam and result types.
//!
//! The classifier is an external collaborator: a synchronous, possibly slow
//! "image in, ranked labels out" call. The pipeline only depends on the
//! `Classifier` trait; concrete backends live behind it (`StubClassifier`
//! in-tree, `TractClassifier` behind the `backend-tract` feature).

#[cfg(feature = "backend-tract")]
mod tract;

#[cfg(feature = "backend-tract")]
pub use tract::TractClassifier;

use anyhow::Result;
use image::RgbImage;
use serde::Serialize;

/// One ranked classification, as delivered to the result sink.
#[derive(Clone, Debug, Serialize)]
pub struct Recognition {
    pub title: String,
    pub confidence: f32,
}

/// Serialize results for the sink: a JSON array of {title, confidence}
/// objects in the classifier's own ranking order.
pub fn to_result_json(results: &[Recognition]) -> Result<String> {
    Ok(serde_json::to_string(results)?)
}

/// Image classifier backend.
///
/// Implementations may take significant wall-clock time per call; they run
/// on the dedicated inference worker, never on the frame-delivery context.
/// Failures are returned, not panicked — the dispatcher contains them either
/// way, but a returned error keeps the backend usable for the next frame.
pub trait Classifier: Send {
    /// Backend identifier.
    fn name(&self) -> &'static str;

    /// Classify one fixed-size RGB image into ranked (label, score) pairs.
    fn classify(&mut self, image: &RgbImage) -> Result<Vec<Recognition>>;

    /// Optional warm-up hook, called once before the first frame.
    fn warm_up(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Receiver for serialized classification results.
pub trait ResultSink: Send + Sync {
    fn on_result(&self, json: &str);
}

impl<F> ResultSink for F
where
    F: Fn(&str) + Send + Sync,
{
    fn on_result(&self, json: &str) {
        self(json)
    }
}

/// Deterministic model-free classifier for demos and tests: ranks the crop's
/// mean channel intensities.
pub struct StubClassifier;

impl StubClassifier {
    pub fn new() -> Self {
        Self
    }
}

impl Default for StubClassifier {
    fn default() -> Self {
        Self::new()
    }
}

impl Classifier for StubClassifier {
    fn name(&self) -> &'static str {
        "stub"
    }

    fn classify(&mut self, image: &RgbImage) -> Result<Vec<Recognition>> {
        let mut sums = [0u64; 3];
        for pixel in image.pixels() {
            sums[0] += pixel.0[0] as u64;
            sums[1] += pixel.0[1] as u64;
            sums[2] += pixel.0[2] as u64;
        }
        let count = (image.width() as u64 * image.height() as u64).max(1);

        let mut results: Vec<Recognition> = ["red", "green", "blue"]
            .iter()
            .zip(sums.iter())
            .map(|(title, sum)| Recognition {
                title: (*title).to_string(),
                confidence: (*sum as f32 / count as f32) / 255.0,
            })
            .collect();
        // Stable sort keeps channel order on ties, so output is deterministic.
        results.sort_by(|a, b| {
            b.confidence
                .partial_cmp(&a.confidence)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stub_ranks_dominant_channel_first() {
        let mut image = RgbImage::new(4, 4);
        for pixel in image.pixels_mut() {
            *pixel = image::Rgb([10, 200, 50]);
        }
        let mut classifier = StubClassifier::new();
        let results = classifier.classify(&image).unwrap();
        assert_eq!(results.len(), 3);
        assert_eq!(results[0].title, "green");
        assert!((results[0].confidence - 200.0 / 255.0).abs() < 1e-4);
        assert_eq!(results[2].title, "red");
    }

    #[test]
    fn stub_is_deterministic() {
        let mut image = RgbImage::new(8, 8);
        for (i, pixel) in image.pixels_mut().enumerate() {
            *pixel = image::Rgb([(i % 256) as u8, (i * 3 % 256) as u8, (i * 7 % 256) as u8]);
        }
        let mut classifier = StubClassifier::new();
        let a = classifier.classify(&image).unwrap();
        let b = classifier.classify(&image).unwrap();
        let flat = |r: &[Recognition]| {
            r.iter()
                .map(|x| (x.title.clone(), x.confidence.to_bits()))
                .collect::<Vec<_>>()
        };
        assert_eq!(flat(&a), flat(&b));
    }

    #[test]
    fn result_json_carries_title_and_confidence() {
        let results = vec![
            Recognition {
                title: "tabby".to_string(),
                confidence: 0.92,
            },
            Recognition {
                title: "tiger cat".to_string(),
                confidence: 0.05,
            },
        ];
        let json = to_result_json(&results).unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&json).unwrap();
        let array = parsed.as_array().unwrap();
        assert_eq!(array.len(), 2);
        assert_eq!(array[0]["title"], "tabby");
        assert!(array[0]["confidence"].is_number());
        // Order is the classifier's ranking, untouched.
        assert_eq!(array[1]["title"], "tiger cat");
    }
}
