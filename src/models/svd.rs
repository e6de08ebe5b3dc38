//! Unconstrained (SVD-style) matrix factorization.
//!
//! The model estimates a rating as
//! ```text
//! r_ui = mu + b_u + b_i + q_i . p_u
//! ```
//! where `mu` is the global mean, `b_u` and `b_i` are user and item biases,
//! and `p_u`, `q_i` are latent vectors. Parameters are fitted by stochastic
//! gradient descent on the squared error of observed ratings with an L2
//! penalty on every parameter.
use ndarray::{Array1, Array2};
use rand::SeedableRng;
use rand_distr::{Distribution, Normal};
use rand_xorshift::XorShiftRng;
use tracing::debug;

use crate::data::Ratings;
use crate::{ItemId, PipelineError, Rating, RatingModel, Stage, UserId};

/// Hyperparameters describing the SVD model.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct Hyperparameters {
    latent_dim: usize,
    learning_rate: f32,
    l2_penalty: f32,
    num_epochs: usize,
    init_std_dev: f32,
    seed: u64,
}

impl Default for Hyperparameters {
    fn default() -> Self {
        Hyperparameters::new()
    }
}

impl Hyperparameters {
    /// Build new hyperparameters with the conventional defaults:
    /// 100 factors, 20 epochs, learning rate 0.005, penalty 0.02.
    pub fn new() -> Self {
        Hyperparameters {
            latent_dim: 100,
            learning_rate: 0.005,
            l2_penalty: 0.02,
            num_epochs: 20,
            init_std_dev: 0.1,
            seed: 42,
        }
    }

    /// Set the number of latent factors.
    pub fn latent_dim(mut self, latent_dim: usize) -> Self {
        self.latent_dim = latent_dim;
        self
    }

    /// Set the learning rate.
    pub fn learning_rate(mut self, learning_rate: f32) -> Self {
        self.learning_rate = learning_rate;
        self
    }

    /// Set the L2 penalty.
    pub fn l2_penalty(mut self, l2_penalty: f32) -> Self {
        self.l2_penalty = l2_penalty;
        self
    }

    /// Set the number of passes over the ratings.
    pub fn num_epochs(mut self, num_epochs: usize) -> Self {
        self.num_epochs = num_epochs;
        self
    }

    /// Set the standard deviation of the factor initialisation.
    pub fn init_std_dev(mut self, init_std_dev: f32) -> Self {
        self.init_std_dev = init_std_dev;
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
                "svd latent_dim must be positive",
            ));
        }

        if !(self.learning_rate > 0.0 && self.learning_rate.is_finite()) {
            return Err(PipelineError::configuration(
                Stage::Train,
                format!("svd learning_rate {} must be positive", self.learning_rate),
            ));
        }

        if !(self.l2_penalty >= 0.0 && self.init_std_dev >= 0.0) {
            return Err(PipelineError::configuration(
                Stage::Train,
                "svd l2_penalty and init_std_dev must be non-negative",
            ));
        }

        Ok(())
    }

    fn embedding_init(
        &self,
        rows: usize,
        rng: &mut XorShiftRng,
    ) -> Result<Array2<f32>, PipelineError> {
        let normal = Normal::new(0.0, self.init_std_dev).map_err(|err| {
            PipelineError::configuration(Stage::Train, format!("svd init: {}", err))
        })?;

        Ok(Array2::from_shape_fn((rows, self.latent_dim), |_| {
            normal.sample(&mut *rng)
        }))
    }

    /// Fit the model on `ratings`.
    pub fn fit(&self, ratings: &Ratings) -> Result<SvdModel, PipelineError> {
        self.validate()?;

        let global_mean = ratings
            .mean()
            .ok_or_else(|| PipelineError::data(Stage::Train, "no ratings to fit"))?;

        let mut rng = XorShiftRng::seed_from_u64(self.seed);
        let (num_users, num_items) = ratings.shape();

        let mut user_biases = Array1::<f32>::zeros(num_users);
        let mut item_biases = Array1::<f32>::zeros(num_items);
        let mut user_factors = self.embedding_init(num_users, &mut rng)?;
        let mut item_factors = self.embedding_init(num_items, &mut rng)?;

        let lr = self.learning_rate;
        let reg = self.l2_penalty;

        for epoch in 0..self.num_epochs {
            let mut squared_error = 0.0;

            for observation in ratings.data() {
                let (u, i) = (observation.user_id(), observation.item_id());

                let mut user_vector = user_factors.row_mut(u);
                let mut item_vector = item_factors.row_mut(i);

                let dot = user_vector.dot(&item_vector);
                let err =
                    observation.rating() - (global_mean + user_biases[u] + item_biases[i] + dot);

                user_biases[u] += lr * (err - reg * user_biases[u]);
                item_biases[i] += lr * (err - reg * item_biases[i]);

                for (puf, qif) in izip!(user_vector.iter_mut(), item_vector.iter_mut()) {
                    let (p, q) = (*puf, *qif);
                    *puf += lr * (err * q - reg * p);
                    *qif += lr * (err * p - reg * q);
                }

                squared_error += err * err;
            }

            debug!(
                epoch,
                rmse = (squared_error / ratings.len() as f32).sqrt(),
                "svd epoch"
            );
        }

        Ok(SvdModel {
            global_mean,
            user_biases,
            item_biases,
            user_factors,
            item_factors,
            known_users: ratings.user_counts().iter().map(|&x| x > 0).collect(),
            known_items: ratings.item_counts().iter().map(|&x| x > 0).collect(),
        })
    }
}

/// A fitted SVD model.
#[derive(Clone, Debug)]
pub struct SvdModel {
    global_mean: Rating,
    user_biases: Array1<f32>,
    item_biases: Array1<f32>,
    user_factors: Array2<f32>,
    item_factors: Array2<f32>,
    known_users: Vec<bool>,
    known_items: Vec<bool>,
}

impl SvdModel {
    pub fn global_mean(&self) -> Rating {
        self.global_mean
    }

    pub fn latent_dim(&self) -> usize {
        self.user_factors.ncols()
    }
}

impl RatingModel for SvdModel {
    /// Unknown users contribute no bias and no factors; the same holds for
    /// items, so a fully unknown pair estimates the global mean.
    fn predict(&self, user_id: UserId, item_id: ItemId) -> Rating {
        let user_known = self.known_users.get(user_id).cloned().unwrap_or(false);
        let item_known = self.known_items.get(item_id).cloned().unwrap_or(false);

        let mut estimate = self.global_mean;

        if user_known {
            estimate += self.user_biases[user_id];
        }

        if item_known {
            estimate += self.item_biases[item_id];
        }

        if user_known && item_known {
            estimate += self
                .user_factors
                .row(user_id)
                .dot(&self.item_factors.row(item_id));
        }

        estimate
    }
}
