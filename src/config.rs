//! Pipeline configuration.
//!
//! Every field has a default, so a TOML file only needs to name what it
//! overrides:
//!
//! ```toml
//! scores_path = "rawdata/sushi3-2016/sushi3b.5000.10.score"
//! items_path = "rawdata/sushi3-2016/sushi3_2.idata"
//! output_dir = "data"
//! top_n = 5
//! models = ["svd", "nmf"]
//!
//! [trainer]
//! seed = 42
//!
//! [trainer.svd]
//! latent_dim = 50
//! ```
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

use failure::ResultExt;

use super::data::RatingScale;
use super::models::{ModelKind, TrainerConfig};
use super::reshape::{DegenerateUsers, ReshapeOptions};
use super::{PipelineError, Rating, Stage};

/// Settings for a full pipeline run.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Whitespace-delimited survey score matrix.
    pub scores_path: PathBuf,
    /// Tab-delimited item metadata.
    pub items_path: PathBuf,
    /// Directory receiving the output tables.
    pub output_dir: PathBuf,
    /// Expected number of item columns in the score matrix.
    pub num_items: usize,
    /// Score marking an unrated cell.
    pub sentinel: Rating,
    /// Scale of the survey scores.
    pub score_scale: RatingScale,
    /// Scale handed to the trainer. Wider than the survey scale so that
    /// estimates are not pinned to its upper bound.
    pub rating_scale: RatingScale,
    pub degenerate_users: DegenerateUsers,
    /// Recommendations per user.
    pub top_n: usize,
    /// Model kinds to fit; one output table is written per kind.
    pub models: Vec<ModelKind>,
    /// Fit the model kinds concurrently.
    pub parallel_training: bool,
    pub trainer: TrainerConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        PipelineConfig {
            scores_path: PathBuf::from("rawdata/sushi3-2016/sushi3b.5000.10.score"),
            items_path: PathBuf::from("rawdata/sushi3-2016/sushi3_2.idata"),
            output_dir: PathBuf::from("data"),
            num_items: 100,
            sentinel: -1.0,
            score_scale: RatingScale::new(0.0, 4.0),
            rating_scale: RatingScale::new(0.0, 10.0),
            degenerate_users: DegenerateUsers::Reject,
            top_n: 5,
            models: vec![ModelKind::Svd, ModelKind::Nmf],
            parallel_training: true,
            trainer: TrainerConfig::default(),
        }
    }
}

impl PipelineConfig {
    /// Parse a TOML configuration.
    pub fn from_toml(source: &str) -> Result<Self, failure::Error> {
        let config: PipelineConfig = toml::from_str(source)?;

        Ok(config)
    }

    /// Load a TOML configuration file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, failure::Error> {
        let path = path.as_ref();
        let source = fs::read_to_string(path)
            .with_context(|_| format!("cannot read config {}", path.display()))?;

        let config = PipelineConfig::from_toml(&source)
            .with_context(|_| format!("cannot parse config {}", path.display()))?;

        Ok(config)
    }

    /// Reshape settings derived from this configuration.
    pub fn reshape_options(&self) -> ReshapeOptions {
        ReshapeOptions::new(self.num_items)
            .sentinel(self.sentinel)
            .scale(self.score_scale)
            .degenerate_users(self.degenerate_users)
    }

    /// Check settings that would otherwise only fail midway through a run.
    pub fn validate(&self) -> Result<(), PipelineError> {
        if self.num_items == 0 {
            return Err(PipelineError::configuration(
                Stage::Config,
                "num_items must be positive",
            ));
        }

        if self.top_n == 0 {
            return Err(PipelineError::configuration(
                Stage::Config,
                "top_n must be positive",
            ));
        }

        if self.models.is_empty() {
            return Err(PipelineError::configuration(
                Stage::Config,
                "at least one model kind is required",
            ));
        }

        let mut seen = BTreeSet::new();
        for kind in &self.models {
            if !seen.insert(kind) {
                return Err(PipelineError::configuration(
                    Stage::Config,
                    format!("model kind {} is listed more than once", kind),
                ));
            }
        }

        self.score_scale.validate(Stage::Config)?;
        self.rating_scale.validate(Stage::Config)?;

        if self.score_scale.min < self.rating_scale.min
            || self.score_scale.max > self.rating_scale.max
        {
            return Err(PipelineError::configuration(
                Stage::Config,
                "score_scale must lie within rating_scale",
            ));
        }

        self.trainer.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_toml_gives_defaults() {
        let config = PipelineConfig::from_toml("").unwrap();

        assert_eq!(config.num_items, 100);
        assert_eq!(config.top_n, 5);
        assert_eq!(config.models, vec![ModelKind::Svd, ModelKind::Nmf]);
        assert_eq!(config.degenerate_users, DegenerateUsers::Reject);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn parses_overrides() {
        let config = PipelineConfig::from_toml(
            r#"
            output_dir = "out"
            top_n = 3
            models = ["nmf"]
            degenerate_users = "drop"
            rating_scale = { min = 0, max = 5 }

            [trainer]
            seed = 7
            hold_out = false

            [trainer.svd]
            latent_dim = 8
            "#,
        )
        .unwrap();

        assert_eq!(config.output_dir, PathBuf::from("out"));
        assert_eq!(config.top_n, 3);
        assert_eq!(config.models, vec![ModelKind::Nmf]);
        assert_eq!(config.degenerate_users, DegenerateUsers::Drop);
        assert_eq!(config.rating_scale, RatingScale::new(0.0, 5.0));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn rejects_unknown_model_kind() {
        assert!(PipelineConfig::from_toml("models = [\"als\"]").is_err());
    }

    #[test]
    fn rejects_duplicate_model_kinds() {
        let config = PipelineConfig::from_toml("models = [\"svd\", \"nmf\", \"svd\"]").unwrap();

        match config.validate() {
            Err(PipelineError::Configuration { stage, details }) => {
                assert_eq!(stage, Stage::Config);
                assert!(details.contains("svd"));
            }
            other => panic!("unexpected result {:?}", other),
        }
    }

    #[test]
    fn validation_catches_bad_settings() {
        let mut config = PipelineConfig::default();
        config.top_n = 0;
        assert!(config.validate().is_err());

        let mut config = PipelineConfig::default();
        config.rating_scale = RatingScale::new(0.0, 3.0);
        assert!(config.validate().is_err());

        let mut config = PipelineConfig::default();
        config.models.clear();
        assert!(config.validate().is_err());
    }
}
