//! Top-N recommendation over each user's unrated items.
use std::collections::{BTreeMap, BTreeSet};

use rayon::prelude::*;
use tracing::info;

use super::catalog::ItemCatalog;
use super::data::{RatingRecord, Ratings};
use super::{ItemId, PipelineError, Rating, RatingModel, Stage, UserId};

/// One recommended item for one user.
#[derive(Clone, Debug, PartialEq)]
pub struct RecommendationRow {
    pub user_id: UserId,
    /// Dense 1-based position in the user's list.
    pub rank: usize,
    pub item_id: ItemId,
    pub item_name: String,
    pub predicted_rating: Rating,
}

/// For every user in `records`, score each item of `item_ids` the user has
/// not rated and keep the `n` best.
///
/// Candidates are ordered by descending prediction, ties by ascending item
/// id. A user who rated every item gets an empty list.
pub fn recommend<T: RatingModel + Sync>(
    model: &T,
    records: &[RatingRecord],
    catalog: &ItemCatalog,
    item_ids: &BTreeSet<ItemId>,
    n: usize,
) -> Result<BTreeMap<UserId, Vec<RecommendationRow>>, PipelineError> {
    if n == 0 {
        return Err(PipelineError::configuration(
            Stage::Recommend,
            "number of recommendations must be positive",
        ));
    }

    let items = item_ids
        .iter()
        .map(|&item_id| {
            catalog
                .get(item_id)
                .map(|item| (item_id, item.name.as_str()))
                .ok_or_else(|| {
                    PipelineError::lookup(
                        Stage::Recommend,
                        format!("item {} is not in the catalog", item_id),
                    )
                })
        })
        .collect::<Result<Vec<_>, _>>()?;

    let observed = Ratings::from_records(records).to_compressed();
    let users: Vec<_> = observed.iter_users().filter(|x| !x.is_empty()).collect();

    let recommendations: BTreeMap<UserId, Vec<RecommendationRow>> = users
        .par_iter()
        .map(|user| {
            let mut candidates: Vec<(ItemId, &str, Rating)> = items
                .iter()
                .filter(|&&(item_id, _)| !user.has_rated(item_id))
                .map(|&(item_id, name)| (item_id, name, model.predict(user.user_id, item_id)))
                .collect();

            candidates.sort_by(|a, b| b.2.total_cmp(&a.2).then_with(|| a.0.cmp(&b.0)));
            candidates.truncate(n);

            let rows = candidates
                .into_iter()
                .enumerate()
                .map(|(idx, (item_id, name, predicted_rating))| RecommendationRow {
                    user_id: user.user_id,
                    rank: idx + 1,
                    item_id,
                    item_name: name.to_owned(),
                    predicted_rating,
                })
                .collect();

            (user.user_id, rows)
        })
        .collect();

    info!(
        num_users = recommendations.len(),
        n, "computed recommendations"
    );

    Ok(recommendations)
}
