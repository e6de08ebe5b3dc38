//! Non-negative matrix factorization.
//!
//! Ratings are estimated as `q_i . p_u` with every factor constrained to be
//! non-negative and no bias terms. Factors start uniformly distributed in
//! `[init_low, init_high)` and are refined with regularized multiplicative
//! updates, which keep them non-negative throughout.
use ndarray::Array2;
use rand::distributions::{Distribution, Uniform};
use rand::SeedableRng;
use rand_xorshift::XorShiftRng;
use tracing::debug;

use crate::data::Ratings;
use crate::{ItemId, PipelineError, Rating, RatingModel, Stage, UserId};

/// Hyperparameters describing the NMF model.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct Hyperparameters {
    latent_dim: usize,
    user_l2_penalty: f32,
    item_l2_penalty: f32,
    num_epochs: usize,
    init_low: f32,
    init_high: f32,
    seed: u64,
}

impl Default for Hyperparameters {
    fn default() -> Self {
        Hyperparameters::new()
    }
}

impl Hyperparameters {
    /// Build new hyperparameters with the conventional defaults:
    /// 15 factors, 50 epochs, penalties of 0.06, init on `[0, 1)`.
    pub fn new() -> Self {
        Hyperparameters {
            latent_dim: 15,
            user_l2_penalty: 0.06,
            item_l2_penalty: 0.06,
            num_epochs: 50,
            init_low: 0.0,
            init_high: 1.0,
            seed: 42,
        }
    }

    /// Set the number of latent factors.
    pub fn latent_dim(mut self, latent_dim: usize) -> Self {
        self.latent_dim = latent_dim;
        self
    }

    /// Set the same L2 penalty for user and item factors.
    pub fn l2_penalty(mut self, l2_penalty: f32) -> Self {
        self.user_l2_penalty = l2_penalty;
        self.item_l2_penalty = l2_penalty;
        self
    }

    /// Set the L2 penalty on user factors.
    pub fn user_l2_penalty(mut self, l2_penalty: f32) -> Self {
        self.user_l2_penalty = l2_penalty;
        self
    }

    /// Set the L2 penalty on item factors.
    pub fn item_l2_penalty(mut self, l2_penalty: f32) -> Self {
        self.item_l2_penalty = l2_penalty;
        self
    }

    /// Set the number of update rounds.
    pub fn num_epochs(mut self, num_epochs: usize) -> Self {
        self.num_epochs = num_epochs;
        self
    }

    /// Set the range factors are initialised from.
    pub fn init_range(mut self, low: f32, high: f32) -> Self {
        self.init_low = low;
        self.init_high = high;
        self
    }

    /// Set the seed of the initialisation RNG.
    pub fn from_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub(crate) fn validate(&self) -> Result<(), PipelineError> {
        if self.latent_dim == 0 {
            return Err(PipelineError::configuration(
                Stage::Train,
                "nmf latent_dim must be positive",
            ));
        }

        if !(self.user_l2_penalty >= 0.0 && self.item_l2_penalty >= 0.0) {
            return Err(PipelineError::configuration(
                Stage::Train,
                "nmf penalties must be non-negative",
            ));
        }

        if !(self.init_low >= 0.0 && self.init_low < self.init_high && self.init_high.is_finite())
        {
            return Err(PipelineError::configuration(
                Stage::Train,
                format!(
                    "nmf init range [{}, {}) must be non-negative and non-empty",
                    self.init_low, self.init_high
                ),
            ));
        }

        Ok(())
    }

    /// Fit the model on `ratings`.
    pub fn fit(&self, ratings: &Ratings) -> Result<NmfModel, PipelineError> {
        self.validate()?;

        let global_mean = ratings
            .mean()
            .ok_or_else(|| PipelineError::data(Stage::Train, "no ratings to fit"))?;

        let mut rng = XorShiftRng::seed_from_u64(self.seed);
        let (num_users, num_items) = ratings.shape();
        let k = self.latent_dim;

        let uniform = Uniform::new(self.init_low, self.init_high);
        let mut user_factors = Array2::from_shape_fn((num_users, k), |_| uniform.sample(&mut rng));
        let mut item_factors = Array2::from_shape_fn((num_items, k), |_| uniform.sample(&mut rng));

        let user_counts = ratings.user_counts();
        let item_counts = ratings.item_counts();

        for epoch in 0..self.num_epochs {
            let mut user_num = Array2::<f32>::zeros((num_users, k));
            let mut user_denom = Array2::<f32>::zeros((num_users, k));
            let mut item_num = Array2::<f32>::zeros((num_items, k));
            let mut item_denom = Array2::<f32>::zeros((num_items, k));

            let mut squared_error = 0.0;

            for observation in ratings.data() {
                let (u, i, r) = (
                    observation.user_id(),
                    observation.item_id(),
                    observation.rating(),
                );

                let user_vector = user_factors.row(u);
                let item_vector = item_factors.row(i);
                let estimate = user_vector.dot(&item_vector);

                for (q, unum, udenom) in izip!(
                    item_vector.iter(),
                    user_num.row_mut(u),
                    user_denom.row_mut(u)
                ) {
                    *unum += q * r;
                    *udenom += q * estimate;
                }

                for (p, inum, idenom) in izip!(
                    user_vector.iter(),
                    item_num.row_mut(i),
                    item_denom.row_mut(i)
                ) {
                    *inum += p * r;
                    *idenom += p * estimate;
                }

                squared_error += (r - estimate) * (r - estimate);
            }

            multiplicative_update(
                &mut user_factors,
                &user_num,
                &mut user_denom,
                &user_counts,
                self.user_l2_penalty,
            );
            multiplicative_update(
                &mut item_factors,
                &item_num,
                &mut item_denom,
                &item_counts,
                self.item_l2_penalty,
            );

            debug!(
                epoch,
                rmse = (squared_error / ratings.len() as f32).sqrt(),
                "nmf epoch"
            );
        }

        Ok(NmfModel {
            global_mean,
            user_factors,
            item_factors,
            known_users: user_counts.iter().map(|&x| x > 0).collect(),
            known_items: item_counts.iter().map(|&x| x > 0).collect(),
        })
    }
}

/// Scale each non-zero factor by its accumulated numerator over its
/// regularized denominator. Factors with a zero denominator are kept.
fn multiplicative_update(
    factors: &mut Array2<f32>,
    numerator: &Array2<f32>,
    denominator: &mut Array2<f32>,
    counts: &[usize],
    l2_penalty: f32,
) {
    for (((mut row, num_row), mut denom_row), &count) in factors
        .outer_iter_mut()
        .zip(numerator.outer_iter())
        .zip(denominator.outer_iter_mut())
        .zip(counts)
    {
        for (factor, num, denom) in izip!(row.iter_mut(), num_row.iter(), denom_row.iter_mut()) {
            if *factor != 0.0 {
                *denom += count as f32 * l2_penalty * *factor;

                if *denom > 0.0 {
                    *factor *= num / *denom;
                }
            }
        }
    }
}

/// A fitted NMF model.
#[derive(Clone, Debug)]
pub struct NmfModel {
    global_mean: Rating,
    user_factors: Array2<f32>,
    item_factors: Array2<f32>,
    known_users: Vec<bool>,
    known_items: Vec<bool>,
}

impl NmfModel {
    pub fn global_mean(&self) -> Rating {
        self.global_mean
    }

    pub fn latent_dim(&self) -> usize {
        self.user_factors.ncols()
    }
}

impl RatingModel for NmfModel {
    /// Pairs involving an unknown user or item estimate the global mean.
    fn predict(&self, user_id: UserId, item_id: ItemId) -> Rating {
        let user_known = self.known_users.get(user_id).cloned().unwrap_or(false);
        let item_known = self.known_items.get(item_id).cloned().unwrap_or(false);

        if user_known && item_known {
            self.user_factors
                .row(user_id)
                .dot(&self.item_factors.row(item_id))
        } else {
            self.global_mean
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::Observation;

    fn ratings() -> Ratings {
        let mut observations = Vec::new();

        for user_id in 0..30 {
            for item_id in 0..10 {
                if (user_id + item_id) % 3 != 0 {
                    let rating = if item_id % 2 == 0 { 4.0 } else { 1.0 };
                    observations.push(Observation::new(user_id, item_id, rating));
                }
            }
        }

        Ratings::from(observations)
    }

    #[test]
    fn factors_stay_non_negative() {
        let model = Hyperparameters::new().latent_dim(5).fit(&ratings()).unwrap();

        assert!(model.user_factors.iter().all(|&x| x >= 0.0));
        assert!(model.item_factors.iter().all(|&x| x >= 0.0));
        assert_eq!(model.latent_dim(), 5);
    }

    #[test]
    fn learns_item_preferences() {
        let model = Hyperparameters::new()
            .latent_dim(4)
            .num_epochs(100)
            .fit(&ratings())
            .unwrap();

        // User 0 never rated items 0, 3, 6 or 9.
        assert!(model.predict(0, 0) > model.predict(0, 3));
        assert!(model.predict(0, 6) > model.predict(0, 9));
    }

    #[test]
    fn unknown_pairs_estimate_the_mean() {
        let data = ratings();
        let model = Hyperparameters::new().fit(&data).unwrap();

        assert_eq!(model.predict(0, 99), data.mean().unwrap());
        assert_eq!(model.predict(99, 0), model.global_mean());
    }

    #[test]
    fn rejects_invalid_init_range() {
        let hyper = Hyperparameters::new().init_range(1.0, 1.0);

        assert!(hyper.fit(&ratings()).is_err());
    }
}
