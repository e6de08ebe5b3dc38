use std::cmp::Ordering;

use rand::seq::SliceRandom;
use rand::Rng;

use super::{ItemId, PipelineError, Rating, Stage, UserId};

/// Inclusive bounds of a rating scale.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct RatingScale {
    /// Lowest valid rating.
    pub min: Rating,
    /// Highest valid rating.
    pub max: Rating,
}

impl RatingScale {
    /// Build a new scale. Bounds are checked by `validate`.
    pub fn new(min: Rating, max: Rating) -> Self {
        RatingScale { min, max }
    }

    /// Fails with a configuration error if the bounds are inverted,
    /// equal, or not finite.
    pub fn validate(&self, stage: Stage) -> Result<(), PipelineError> {
        if !(self.min.is_finite() && self.max.is_finite()) || self.min >= self.max {
            return Err(PipelineError::configuration(
                stage,
                format!("invalid rating scale [{}, {}]", self.min, self.max),
            ));
        }

        Ok(())
    }

    /// Whether `rating` lies within the bounds.
    pub fn contains(&self, rating: Rating) -> bool {
        rating >= self.min && rating <= self.max
    }
}

/// One observed rating in the long table, with its within-user rank.
#[derive(Clone, Debug, PartialEq)]
pub struct RatingRecord {
    pub user_id: UserId,
    pub item_id: ItemId,
    pub rating: Rating,
    /// Dense 1-based rank among the user's rated items, best first.
    pub rank: usize,
    pub name: String,
    pub localized_name: Option<String>,
}

/// A bare `(user, item, rating)` triple as consumed by the trainers.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Observation {
    user_id: UserId,
    item_id: ItemId,
    rating: Rating,
}

impl Observation {
    pub fn new(user_id: UserId, item_id: ItemId, rating: Rating) -> Self {
        Observation {
            user_id,
            item_id,
            rating,
        }
    }

    pub fn user_id(&self) -> UserId {
        self.user_id
    }

    pub fn item_id(&self) -> ItemId {
        self.item_id
    }

    pub fn rating(&self) -> Rating {
        self.rating
    }
}

impl<'a> From<&'a RatingRecord> for Observation {
    fn from(record: &'a RatingRecord) -> Self {
        Observation::new(record.user_id, record.item_id, record.rating)
    }
}

/// Shuffle `ratings` and hold out the leading `test_fraction` of them,
/// rounded up to a whole rating.
///
/// Returns `(train, test)`.
pub fn train_test_split<R: Rng>(
    ratings: &mut Ratings,
    rng: &mut R,
    test_fraction: f32,
) -> (Ratings, Ratings) {
    ratings.shuffle(rng);

    let num_test = ((test_fraction * ratings.len() as f32).ceil() as usize).min(ratings.len());
    let (test, train) = ratings.split_at(num_test);

    (train, test)
}

/// A sparse user x item rating matrix in coordinate form.
#[derive(Clone, Debug)]
pub struct Ratings {
    num_users: usize,
    num_items: usize,
    observations: Vec<Observation>,
}

impl Ratings {
    pub fn new(num_users: usize, num_items: usize) -> Self {
        Ratings {
            num_users,
            num_items,
            observations: Vec::new(),
        }
    }

    /// Build the matrix from the long rating table. The id space spans
    /// `0..=max id` on both axes.
    pub fn from_records(records: &[RatingRecord]) -> Self {
        let observations: Vec<Observation> = records.iter().map(Observation::from).collect();

        Ratings::from(observations)
    }

    pub fn push(&mut self, observation: Observation) {
        self.num_users = self.num_users.max(observation.user_id() + 1);
        self.num_items = self.num_items.max(observation.item_id() + 1);
        self.observations.push(observation);
    }

    pub fn data(&self) -> &[Observation] {
        &self.observations
    }

    pub fn len(&self) -> usize {
        self.observations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.observations.is_empty()
    }

    pub fn shuffle<R: Rng>(&mut self, rng: &mut R) {
        self.observations.shuffle(rng);
    }

    pub fn split_at(&self, idx: usize) -> (Self, Self) {
        let head = Ratings {
            num_users: self.num_users,
            num_items: self.num_items,
            observations: self.observations[..idx].to_owned(),
        };
        let tail = Ratings {
            num_users: self.num_users,
            num_items: self.num_items,
            observations: self.observations[idx..].to_owned(),
        };

        (head, tail)
    }

    /// Mean of all observed ratings, `None` when empty.
    pub fn mean(&self) -> Option<Rating> {
        if self.observations.is_empty() {
            return None;
        }

        let total: f64 = self.observations.iter().map(|x| x.rating() as f64).sum();

        Some((total / self.observations.len() as f64) as Rating)
    }

    /// Number of observations per user id.
    pub fn user_counts(&self) -> Vec<usize> {
        let mut counts = vec![0; self.num_users];

        for observation in &self.observations {
            counts[observation.user_id()] += 1;
        }

        counts
    }

    /// Number of observations per item id.
    pub fn item_counts(&self) -> Vec<usize> {
        let mut counts = vec![0; self.num_items];

        for observation in &self.observations {
            counts[observation.item_id()] += 1;
        }

        counts
    }

    pub fn to_compressed(&self) -> CompressedRatings {
        CompressedRatings::from(self)
    }

    pub fn num_users(&self) -> usize {
        self.num_users
    }

    pub fn num_items(&self) -> usize {
        self.num_items
    }

    pub fn shape(&self) -> (usize, usize) {
        (self.num_users, self.num_items)
    }
}

impl From<Vec<Observation>> for Ratings {
    fn from(data: Vec<Observation>) -> Ratings {
        let num_users = data.iter().map(|x| x.user_id() + 1).max().unwrap_or(0);
        let num_items = data.iter().map(|x| x.item_id() + 1).max().unwrap_or(0);

        Ratings {
            num_users,
            num_items,
            observations: data,
        }
    }
}

fn cmp_user_item(x: &Observation, y: &Observation) -> Ordering {
    x.user_id()
        .cmp(&y.user_id())
        .then_with(|| x.item_id().cmp(&y.item_id()))
}

/// Row-compressed view of `Ratings`: each user's items are contiguous and
/// sorted by item id.
#[derive(Clone, Debug)]
pub struct CompressedRatings {
    num_users: usize,
    num_items: usize,
    user_pointers: Vec<usize>,
    item_ids: Vec<ItemId>,
    ratings: Vec<Rating>,
}

impl<'a> From<&'a Ratings> for CompressedRatings {
    fn from(ratings: &Ratings) -> CompressedRatings {
        let mut data = ratings.data().to_owned();

        data.sort_by(cmp_user_item);

        let mut user_pointers = vec![0; ratings.num_users + 1];
        let mut item_ids = Vec::with_capacity(data.len());
        let mut values = Vec::with_capacity(data.len());

        for datum in &data {
            item_ids.push(datum.item_id());
            values.push(datum.rating());

            user_pointers[datum.user_id() + 1] += 1;
        }

        for idx in 1..user_pointers.len() {
            user_pointers[idx] += user_pointers[idx - 1];
        }

        CompressedRatings {
            num_users: ratings.num_users,
            num_items: ratings.num_items,
            user_pointers,
            item_ids,
            ratings: values,
        }
    }
}

impl CompressedRatings {
    pub fn iter_users(&self) -> CompressedRatingsUserIterator {
        CompressedRatingsUserIterator {
            ratings: self,
            idx: 0,
        }
    }

    pub fn get_user(&self, user_id: UserId) -> Option<CompressedRatingsUser> {
        if user_id >= self.num_users {
            return None;
        }

        let start = self.user_pointers[user_id];
        let stop = self.user_pointers[user_id + 1];

        Some(CompressedRatingsUser {
            user_id,
            item_ids: &self.item_ids[start..stop],
            ratings: &self.ratings[start..stop],
        })
    }

    pub fn num_users(&self) -> usize {
        self.num_users
    }

    pub fn num_items(&self) -> usize {
        self.num_items
    }

    pub fn shape(&self) -> (usize, usize) {
        (self.num_users, self.num_items)
    }
}

pub struct CompressedRatingsUserIterator<'a> {
    ratings: &'a CompressedRatings,
    idx: usize,
}

#[derive(Debug)]
pub struct CompressedRatingsUser<'a> {
    pub user_id: UserId,
    pub item_ids: &'a [ItemId],
    pub ratings: &'a [Rating],
}

impl<'a> CompressedRatingsUser<'a> {
    pub fn len(&self) -> usize {
        self.item_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.item_ids.is_empty()
    }

    /// Whether the user has rated `item_id`.
    pub fn has_rated(&self, item_id: ItemId) -> bool {
        self.item_ids.binary_search(&item_id).is_ok()
    }
}

impl<'a> Iterator for CompressedRatingsUserIterator<'a> {
    type Item = CompressedRatingsUser<'a>;
    fn next(&mut self) -> Option<Self::Item> {
        let value = self.ratings.get_user(self.idx);

        self.idx += 1;

        value
    }
}

#[cfg(test)]
mod tests {
    use rand::SeedableRng;
    use rand_xorshift::XorShiftRng;

    use super::*;

    fn ratings() -> Ratings {
        Ratings::from(vec![
            Observation::new(0, 3, 9.0),
            Observation::new(0, 7, 7.0),
            Observation::new(0, 2, 7.0),
            Observation::new(2, 1, 4.0),
        ])
    }

    #[test]
    fn shape_spans_max_ids() {
        let data = ratings();

        assert_eq!(data.shape(), (3, 8));
        assert_eq!(data.user_counts(), vec![3, 0, 1]);
        assert_eq!(data.item_counts()[7], 1);
        assert_eq!(data.mean(), Some(6.75));
    }

    #[test]
    fn empty_ratings_have_no_mean() {
        let data = Ratings::from(Vec::new());

        assert!(data.is_empty());
        assert_eq!(data.shape(), (0, 0));
        assert_eq!(data.mean(), None);
    }

    #[test]
    fn compressed_rows_are_sorted_by_item() {
        let compressed = ratings().to_compressed();

        let user = compressed.get_user(0).unwrap();
        assert_eq!(user.item_ids, &[2, 3, 7]);
        assert_eq!(user.ratings, &[7.0, 9.0, 7.0]);
        assert!(user.has_rated(3));
        assert!(!user.has_rated(4));

        assert!(compressed.get_user(1).unwrap().is_empty());
        assert!(compressed.get_user(3).is_none());
        assert_eq!(compressed.iter_users().count(), 3);
    }

    #[test]
    fn split_is_deterministic_for_a_seed() {
        let mut first = ratings();
        let mut second = ratings();

        let (train_a, test_a) =
            train_test_split(&mut first, &mut XorShiftRng::seed_from_u64(42), 0.25);
        let (train_b, test_b) =
            train_test_split(&mut second, &mut XorShiftRng::seed_from_u64(42), 0.25);

        assert_eq!(test_a.len(), 1);
        assert_eq!(train_a.len(), 3);
        assert_eq!(train_a.data(), train_b.data());
        assert_eq!(test_a.data(), test_b.data());
        assert_eq!(train_a.shape(), (3, 8));
    }

    #[test]
    fn held_out_count_rounds_up() {
        let (train, test) =
            train_test_split(&mut ratings(), &mut XorShiftRng::seed_from_u64(1), 0.2);
        assert_eq!(test.len(), 1);
        assert_eq!(train.len(), 3);

        let mut seven = Ratings::from(
            (0..7)
                .map(|user_id| Observation::new(user_id, user_id % 3, 2.0))
                .collect::<Vec<_>>(),
        );
        let (train, test) =
            train_test_split(&mut seven, &mut XorShiftRng::seed_from_u64(1), 0.2);
        assert_eq!(test.len(), 2);
        assert_eq!(train.len(), 5);
    }

    #[test]
    fn scale_validation() {
        assert!(RatingScale::new(0.0, 10.0).validate(Stage::Train).is_ok());
        assert!(RatingScale::new(4.0, 4.0).validate(Stage::Train).is_err());
        assert!(RatingScale::new(5.0, 1.0).validate(Stage::Train).is_err());
        assert!(!RatingScale::new(0.0, 4.0).contains(-1.0));
    }
}
