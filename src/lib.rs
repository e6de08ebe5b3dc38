//! # sushirec
//!
//! `sushirec` turns a ranked sushi-preference survey into per-user
//! recommendations: the wide score matrix is reshaped into a long table of
//! ranked ratings, latent-factor models are fitted on those ratings, and
//! every user receives the top-N items they have not rated yet.
//!
//! ## Example
//!
//! ```rust
//! # extern crate sushirec;
//! use sushirec::catalog::ItemCatalog;
//! use sushirec::data::RatingScale;
//! use sushirec::models::{self, ModelKind, TrainerConfig};
//! use sushirec::recommend::recommend;
//! use sushirec::reshape::{reshape, RawRatingMatrix, ReshapeOptions};
//!
//! let catalog = ItemCatalog::from_reader("0\tebi\n1\tanago\n2\tmaguro\n".as_bytes()).unwrap();
//! let matrix = RawRatingMatrix::from_reader("4 -1 2\n-1 3 1\n".as_bytes()).unwrap();
//! let records = reshape(&matrix, &catalog, &ReshapeOptions::new(3)).unwrap();
//!
//! let config = TrainerConfig::default().hold_out(false);
//! let model = models::train(&records, ModelKind::Svd, RatingScale::new(0.0, 10.0), &config).unwrap();
//!
//! let item_ids = catalog.item_ids();
//! let recommendations = recommend(&model, &records, &catalog, &item_ids, 1).unwrap();
//! assert_eq!(recommendations[&0][0].item_id, 1);
//! ```
#[macro_use]
extern crate serde_derive;

#[macro_use]
extern crate itertools;

#[macro_use]
extern crate failure;
extern crate csv;
extern crate ndarray;
extern crate rand;
extern crate rand_distr;
extern crate rand_xorshift;
extern crate rayon;
extern crate serde;
extern crate toml;
extern crate tracing;

use std::fmt;

pub mod catalog;
pub mod config;
pub mod data;
pub mod export;
pub mod models;
pub mod pipeline;
pub mod recommend;
pub mod reshape;

/// Alias for user indices.
pub type UserId = usize;
/// Alias for item indices.
pub type ItemId = usize;
/// Alias for rating values.
pub type Rating = f32;

/// The pipeline stage an error originated in.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Stage {
    /// Wide-to-long reshaping of the score matrix.
    Reshape,
    /// Loading item metadata.
    Catalog,
    /// Fitting a latent-factor model.
    Train,
    /// Top-N scoring.
    Recommend,
    /// Serializing output tables.
    Export,
    /// Validating pipeline configuration.
    Config,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match *self {
            Stage::Reshape => "reshape",
            Stage::Catalog => "catalog",
            Stage::Train => "train",
            Stage::Recommend => "recommend",
            Stage::Export => "export",
            Stage::Config => "config",
        };

        f.write_str(name)
    }
}

/// Pipeline error types.
///
/// Every variant names the stage that failed; `details` identifies the
/// offending record or field.
#[derive(Debug, Fail, PartialEq)]
pub enum PipelineError {
    /// Malformed or mismatched-shape input.
    #[fail(display = "schema error during {}: {}", stage, details)]
    Schema {
        /// Stage that rejected the input.
        stage: Stage,
        /// What was wrong.
        details: String,
    },
    /// Empty or degenerate data.
    #[fail(display = "data error during {}: {}", stage, details)]
    Data {
        /// Stage that rejected the data.
        stage: Stage,
        /// What was wrong.
        details: String,
    },
    /// Invalid settings such as inverted rating bounds or `n == 0`.
    #[fail(display = "configuration error during {}: {}", stage, details)]
    Configuration {
        /// Stage that rejected the setting.
        stage: Stage,
        /// What was wrong.
        details: String,
    },
    /// Catalog and item id space disagree.
    #[fail(display = "lookup error during {}: {}", stage, details)]
    Lookup {
        /// Stage that performed the lookup.
        stage: Stage,
        /// What was missing.
        details: String,
    },
}

impl PipelineError {
    pub(crate) fn schema<S: Into<String>>(stage: Stage, details: S) -> Self {
        PipelineError::Schema {
            stage,
            details: details.into(),
        }
    }

    pub(crate) fn data<S: Into<String>>(stage: Stage, details: S) -> Self {
        PipelineError::Data {
            stage,
            details: details.into(),
        }
    }

    pub(crate) fn configuration<S: Into<String>>(stage: Stage, details: S) -> Self {
        PipelineError::Configuration {
            stage,
            details: details.into(),
        }
    }

    pub(crate) fn lookup<S: Into<String>>(stage: Stage, details: S) -> Self {
        PipelineError::Lookup {
            stage,
            details: details.into(),
        }
    }

    /// The stage the error originated in.
    pub fn stage(&self) -> Stage {
        match *self {
            PipelineError::Schema { stage, .. }
            | PipelineError::Data { stage, .. }
            | PipelineError::Configuration { stage, .. }
            | PipelineError::Lookup { stage, .. } => stage,
        }
    }
}

/// Trait describing fitted models that can estimate how a user
/// would rate an item.
///
/// Estimates are not clipped to the training rating scale.
pub trait RatingModel {
    /// Estimate the rating `user_id` would give `item_id`. Ids never
    /// seen while fitting yield a deterministic fallback estimate.
    fn predict(&self, user_id: UserId, item_id: ItemId) -> Rating;
}
