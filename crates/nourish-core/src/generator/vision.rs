//! Image-to-nutrition analysis for the food diary.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::json::extract_object;
use super::process::run_client;

/// What the vision model believes a photographed meal contains.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NutritionEstimate {
    pub food: String,
    pub calories: f64,
    #[serde(default)]
    pub protein_g: f64,
    #[serde(default)]
    pub carbs_g: f64,
    #[serde(default)]
    pub fat_g: f64,
    #[serde(default)]
    pub notes: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum VisionError {
    #[error("image {path:?} is not readable: {source}")]
    Unreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("vision analysis failed: {0}")]
    Analysis(String),

    #[error("vision analysis timed out after {0:?}")]
    Timeout(Duration),

    #[error("no vision analyzer is configured")]
    NotConfigured,
}

/// Turns a food photo into a nutrition estimate.
#[async_trait]
pub trait VisionAnalyzer: Send + Sync {
    async fn analyze(&self, image: &Path) -> Result<NutritionEstimate, VisionError>;
}

const _: () = {
    fn _assert_object_safe(_: &dyn VisionAnalyzer) {}
};

const VISION_PROMPT: &str = "Identify the food in this image and estimate its calories and \
macros. Answer with one JSON object: {\"food\": string, \"calories\": number, \
\"protein_g\": number, \"carbs_g\": number, \"fat_g\": number, \"notes\": string}.";

/// Runs `program args... <image-path>` with the instruction on stdin.
#[derive(Debug, Clone)]
pub struct ProcessVisionAnalyzer {
    program: String,
    args: Vec<String>,
}

impl ProcessVisionAnalyzer {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }
}

#[async_trait]
impl VisionAnalyzer for ProcessVisionAnalyzer {
    async fn analyze(&self, image: &Path) -> Result<NutritionEstimate, VisionError> {
        tokio::fs::metadata(image)
            .await
            .map_err(|source| VisionError::Unreadable {
                path: image.to_path_buf(),
                source,
            })?;

        let mut args = self.args.clone();
        args.push(image.display().to_string());
        let stdout = run_client(&self.program, &args, VISION_PROMPT.as_bytes())
            .await
            .map_err(|e| VisionError::Analysis(e.to_string()))?;

        let value = extract_object(&stdout)
            .ok_or_else(|| VisionError::Analysis("no JSON object in output".to_owned()))?;
        let estimate: NutritionEstimate = serde_json::from_value(value)
            .map_err(|e| VisionError::Analysis(format!("unexpected estimate shape: {e}")))?;
        if !estimate.calories.is_finite() || estimate.calories < 0.0 {
            return Err(VisionError::Analysis(format!(
                "implausible calorie estimate {}",
                estimate.calories
            )));
        }
        Ok(estimate)
    }
}
