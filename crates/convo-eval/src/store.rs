//! Prediction output file: resume, in-place updates, atomic flush.
//!
//! The output has the same shape as the input dataset, with predictions added
//! to QA records under their prediction key. An existing output file is the
//! resume point: its records keep their predictions, and samples it lacks are
//! seeded from the input.

use crate::dataset::{Sample, load_samples};
use crate::error::{EvalError, Result};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// In-memory copy of the output file.
#[derive(Debug)]
pub struct PredictionStore {
    path: PathBuf,
    samples: Vec<Sample>,
}

impl PredictionStore {
    /// Open `path` against `inputs`.
    ///
    /// Output samples are ordered like the inputs; stored samples whose id is
    /// not in the input are kept after them. A stored sample with a different
    /// number of questions than its input is a dataset error.
    pub fn open(path: &Path, inputs: &[Sample]) -> Result<Self> {
        let mut stored = if path.exists() {
            let samples = load_samples(path)?;
            info!(
                "Resuming from {} ({} sample(s))",
                path.display(),
                samples.len()
            );
            samples
        } else {
            Vec::new()
        };

        let mut samples = Vec::with_capacity(inputs.len().max(stored.len()));
        for input in inputs {
            match stored.iter().position(|s| s.sample_id == input.sample_id) {
                Some(pos) => {
                    let existing = stored.remove(pos);
                    if existing.qa.len() != input.qa.len() {
                        return Err(EvalError::Dataset(format!(
                            "{}: output has {} questions, input has {}",
                            input.sample_id,
                            existing.qa.len(),
                            input.qa.len()
                        )));
                    }
                    samples.push(existing);
                }
                None => samples.push(input.clone()),
            }
        }
        samples.append(&mut stored);

        Ok(Self {
            path: path.to_path_buf(),
            samples,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn samples(&self) -> &[Sample] {
        &self.samples
    }

    pub fn sample(&self, sample_id: &str) -> Option<&Sample> {
        self.samples.iter().find(|s| s.sample_id == sample_id)
    }

    fn sample_mut(&mut self, sample_id: &str) -> Result<&mut Sample> {
        self.samples
            .iter_mut()
            .find(|s| s.sample_id == sample_id)
            .ok_or_else(|| EvalError::Dataset(format!("unknown sample '{sample_id}'")))
    }

    /// Write `answer` under `key` on one QA record, plus the ids of the
    /// context shown to the model when given.
    pub fn set_prediction(
        &mut self,
        sample_id: &str,
        qa_index: usize,
        key: &str,
        answer: &str,
        context_ids: Option<&[String]>,
    ) -> Result<()> {
        let sample = self.sample_mut(sample_id)?;
        let total = sample.qa.len();
        let qa = sample.qa.get_mut(qa_index).ok_or_else(|| {
            EvalError::Dataset(format!(
                "{sample_id}: question {qa_index} out of range ({total} questions)"
            ))
        })?;
        qa.set_prediction(key, answer);
        if let Some(ids) = context_ids {
            qa.set_context_ids(key, ids);
        }
        Ok(())
    }

    /// Atomic write: serialize to a temp file, then rename into place.
    pub fn flush(&self) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let file_name = self
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "predictions.json".into());
        let tmp_path = self.path.with_file_name(format!(".{file_name}.tmp"));

        let json = serde_json::to_string_pretty(&self.samples)?;
        std::fs::write(&tmp_path, json)?;
        std::fs::rename(&tmp_path, &self.path)?;
        debug!("Flushed {} sample(s) to {}", self.samples.len(), self.path.display());
        Ok(())
    }
}
