//! Models module.
//!
//! Both model kinds are fitted through [`train`], which validates the input,
//! performs the seeded train/held-out split and dispatches to the chosen
//! factorization.
use std::fmt;

use rand::SeedableRng;
use rand_xorshift::XorShiftRng;
use tracing::info;

use super::data::{train_test_split, RatingRecord, RatingScale, Ratings};
use super::{ItemId, PipelineError, Rating, RatingModel, Stage, UserId};

pub mod nmf;
pub mod svd;

/// The latent-factor model variants.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelKind {
    /// Unconstrained factorization with biases, fitted by SGD.
    Svd,
    /// Non-negative factorization, fitted by multiplicative updates.
    Nmf,
}

impl ModelKind {
    /// Short lowercase name, used to name output files.
    pub fn name(&self) -> &'static str {
        match *self {
            ModelKind::Svd => "svd",
            ModelKind::Nmf => "nmf",
        }
    }
}

impl fmt::Display for ModelKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Settings shared by all model kinds plus the per-kind hyperparameters.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainerConfig {
    test_fraction: f32,
    seed: u64,
    hold_out: bool,
    svd: svd::Hyperparameters,
    nmf: nmf::Hyperparameters,
}

impl Default for TrainerConfig {
    fn default() -> Self {
        TrainerConfig {
            test_fraction: 0.2,
            seed: 42,
            hold_out: true,
            svd: svd::Hyperparameters::new(),
            nmf: nmf::Hyperparameters::new(),
        }
    }
}

impl TrainerConfig {
    /// Set the fraction of ratings held out from fitting.
    pub fn test_fraction(mut self, test_fraction: f32) -> Self {
        self.test_fraction = test_fraction;
        self
    }

    /// Set the seed used to shuffle ratings before the split.
    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Whether to hold out `test_fraction` of the ratings at all.
    pub fn hold_out(mut self, hold_out: bool) -> Self {
        self.hold_out = hold_out;
        self
    }

    /// Set the SVD hyperparameters.
    pub fn svd(mut self, hyper: svd::Hyperparameters) -> Self {
        self.svd = hyper;
        self
    }

    /// Set the NMF hyperparameters.
    pub fn nmf(mut self, hyper: nmf::Hyperparameters) -> Self {
        self.nmf = hyper;
        self
    }

    /// Fails with a configuration error on settings `train` cannot use.
    pub fn validate(&self) -> Result<(), PipelineError> {
        if !(self.test_fraction >= 0.0 && self.test_fraction < 1.0) {
            return Err(PipelineError::configuration(
                Stage::Train,
                format!("test fraction {} outside [0, 1)", self.test_fraction),
            ));
        }

        self.svd.validate()?;
        self.nmf.validate()
    }
}

/// A fitted model of either kind.
#[derive(Clone, Debug)]
pub enum TrainedModel {
    Svd(svd::SvdModel),
    Nmf(nmf::NmfModel),
}

impl TrainedModel {
    pub fn kind(&self) -> ModelKind {
        match *self {
            TrainedModel::Svd(_) => ModelKind::Svd,
            TrainedModel::Nmf(_) => ModelKind::Nmf,
        }
    }
}

impl RatingModel for TrainedModel {
    fn predict(&self, user_id: UserId, item_id: ItemId) -> Rating {
        match *self {
            TrainedModel::Svd(ref model) => model.predict(user_id, item_id),
            TrainedModel::Nmf(ref model) => model.predict(user_id, item_id),
        }
    }
}

/// Fit a model of `kind` on `records`.
///
/// Every rating must lie within `scale`. Unless hold-out is disabled, a
/// seeded shuffle sets aside `test_fraction` of the ratings before fitting.
pub fn train(
    records: &[RatingRecord],
    kind: ModelKind,
    scale: RatingScale,
    config: &TrainerConfig,
) -> Result<TrainedModel, PipelineError> {
    scale.validate(Stage::Train)?;
    config.validate()?;

    if records.is_empty() {
        return Err(PipelineError::data(Stage::Train, "no ratings to train on"));
    }

    if let Some(record) = records.iter().find(|x| !scale.contains(x.rating)) {
        return Err(PipelineError::data(
            Stage::Train,
            format!(
                "user {} item {}: rating {} outside [{}, {}]",
                record.user_id, record.item_id, record.rating, scale.min, scale.max
            ),
        ));
    }

    let mut ratings = Ratings::from_records(records);

    let (train, test) = if config.hold_out {
        let mut rng = XorShiftRng::seed_from_u64(config.seed);
        train_test_split(&mut ratings, &mut rng, config.test_fraction)
    } else {
        let empty = Ratings::new(ratings.num_users(), ratings.num_items());
        (ratings, empty)
    };

    if train.is_empty() {
        return Err(PipelineError::data(
            Stage::Train,
            "no ratings left after holding out the test split",
        ));
    }

    info!(
        model = kind.name(),
        num_train = train.len(),
        num_held_out = test.len(),
        "training model"
    );

    let model = match kind {
        ModelKind::Svd => TrainedModel::Svd(config.svd.fit(&train)?),
        ModelKind::Nmf => TrainedModel::Nmf(config.nmf.fit(&train)?),
    };

    info!(model = kind.name(), "training model done");

    Ok(model)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(user_id: UserId, item_id: ItemId, rating: Rating) -> RatingRecord {
        RatingRecord {
            user_id,
            item_id,
            rating,
            rank: 1,
            name: format!("item_{}", item_id),
            localized_name: None,
        }
    }

    fn synthetic_records(num_users: usize, num_items: usize) -> Vec<RatingRecord> {
        let mut records = Vec::new();

        for user_id in 0..num_users {
            for item_id in 0..num_items {
                if (user_id * 7 + item_id * 3) % 4 != 0 {
                    let rating = ((user_id % 3) + (item_id % 2) * 2) as Rating;
                    records.push(record(user_id, item_id, rating));
                }
            }
        }

        records
    }

    #[test]
    fn rejects_invalid_scale() {
        let records = synthetic_records(5, 5);
        let config = TrainerConfig::default();

        for &(min, max) in &[(4.0, 4.0), (10.0, 0.0)] {
            match train(&records, ModelKind::Svd, RatingScale::new(min, max), &config) {
                Err(PipelineError::Configuration { stage, .. }) => assert_eq!(stage, Stage::Train),
                other => panic!("unexpected result {:?}", other),
            }
        }
    }

    #[test]
    fn rejects_empty_records() {
        let config = TrainerConfig::default();

        match train(&[], ModelKind::Nmf, RatingScale::new(0.0, 10.0), &config) {
            Err(PipelineError::Data { .. }) => {}
            other => panic!("unexpected result {:?}", other),
        }
    }

    #[test]
    fn rejects_out_of_scale_records() {
        let mut records = synthetic_records(5, 5);
        records.push(record(6, 1, 11.0));

        let result = train(
            &records,
            ModelKind::Svd,
            RatingScale::new(0.0, 10.0),
            &TrainerConfig::default(),
        );

        match result {
            Err(PipelineError::Data { details, .. }) => assert!(details.contains("user 6 item 1")),
            other => panic!("unexpected result {:?}", other),
        }
    }

    #[test]
    fn rejects_invalid_test_fraction() {
        let config = TrainerConfig::default().test_fraction(1.0);

        assert!(train(
            &synthetic_records(5, 5),
            ModelKind::Svd,
            RatingScale::new(0.0, 10.0),
            &config
        )
        .is_err());
    }

    #[test]
    fn fixed_seed_gives_identical_predictions() {
        let records = synthetic_records(20, 12);
        let scale = RatingScale::new(0.0, 10.0);
        let config = TrainerConfig::default();

        for &kind in &[ModelKind::Svd, ModelKind::Nmf] {
            let first = train(&records, kind, scale, &config).unwrap();
            let second = train(&records, kind, scale, &config).unwrap();

            assert_eq!(first.kind(), kind);

            for user_id in 0..20 {
                for item_id in 0..12 {
                    assert_eq!(
                        first.predict(user_id, item_id).to_bits(),
                        second.predict(user_id, item_id).to_bits()
                    );
                }
            }
        }
    }

    #[test]
    fn predictions_may_leave_the_rating_scale() {
        let mut records = Vec::new();

        for user_id in 0..20 {
            for item_id in 0..9 {
                let level = (item_id % 3) as Rating;

                if user_id % 2 == 0 {
                    records.push(record(user_id, item_id, 2.0 * level));
                } else if level < 2.0 {
                    records.push(record(user_id, item_id, 2.0 + 2.0 * level));
                }
            }
        }

        let scale = RatingScale::new(0.0, 4.0);
        let config = TrainerConfig::default()
            .hold_out(false)
            .svd(svd::Hyperparameters::new().learning_rate(0.02).num_epochs(200));

        let model = train(&records, ModelKind::Svd, scale, &config).unwrap();
        let prediction = model.predict(1, 2);

        assert!(!scale.contains(prediction), "{} within scale", prediction);
    }

    #[test]
    fn unseen_ids_fall_back_deterministically() {
        let records = synthetic_records(10, 6);
        let config = TrainerConfig::default().hold_out(false);
        let mean = Ratings::from_records(&records).mean().unwrap();

        for &kind in &[ModelKind::Svd, ModelKind::Nmf] {
            let model = train(&records, kind, RatingScale::new(0.0, 10.0), &config).unwrap();

            assert_eq!(model.predict(1000, 2000), mean);
            assert_eq!(model.predict(1000, 2000), model.predict(1000, 2000));
            assert!(model.predict(3, 4).is_finite());
        }
    }
}
