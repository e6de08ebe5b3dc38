//! Wide-to-long reshaping of the survey score matrix.
//!
//! The survey stores one whitespace-delimited row per user and one column per
//! item, with a sentinel marking unrated cells. Reshaping drops the sentinel
//! cells, attaches item names from the catalog, and ranks each user's rated
//! items by descending score. Equal scores are ranked by ascending item id.
use std::fs::File;
use std::io::{BufRead, BufReader, Read};
use std::path::Path;

use failure::ResultExt;
use tracing::{info, warn};

use super::catalog::ItemCatalog;
use super::data::{RatingRecord, RatingScale};
use super::{ItemId, PipelineError, Rating, Stage};

/// What to do with users who rated nothing.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DegenerateUsers {
    /// Fail the reshape with a data error.
    Reject,
    /// Skip the user. Remaining users keep their row index as id.
    Drop,
}

impl Default for DegenerateUsers {
    fn default() -> Self {
        DegenerateUsers::Reject
    }
}

/// Settings for `reshape`.
#[derive(Clone, Debug)]
pub struct ReshapeOptions {
    num_items: usize,
    sentinel: Rating,
    scale: RatingScale,
    degenerate_users: DegenerateUsers,
}

impl ReshapeOptions {
    /// Options for a matrix with `num_items` columns, `-1` as the
    /// unrated sentinel and scores on `[0, 4]`.
    pub fn new(num_items: usize) -> Self {
        ReshapeOptions {
            num_items,
            sentinel: -1.0,
            scale: RatingScale::new(0.0, 4.0),
            degenerate_users: DegenerateUsers::Reject,
        }
    }

    /// Set the sentinel marking unrated cells.
    pub fn sentinel(mut self, sentinel: Rating) -> Self {
        self.sentinel = sentinel;
        self
    }

    /// Set the scale every observed score must fall within.
    pub fn scale(mut self, scale: RatingScale) -> Self {
        self.scale = scale;
        self
    }

    /// Set the policy for users without any rated item.
    pub fn degenerate_users(mut self, policy: DegenerateUsers) -> Self {
        self.degenerate_users = policy;
        self
    }
}

/// The raw survey matrix: one row per user, one column per item.
#[derive(Clone, Debug, PartialEq)]
pub struct RawRatingMatrix {
    rows: Vec<Vec<Rating>>,
}

impl RawRatingMatrix {
    pub fn new(rows: Vec<Vec<Rating>>) -> Self {
        RawRatingMatrix { rows }
    }

    /// Parse a whitespace-delimited numeric table. Blank lines are skipped.
    pub fn from_reader<R: Read>(reader: R) -> Result<Self, failure::Error> {
        let reader = BufReader::new(reader);
        let mut rows = Vec::new();

        for (line_no, line) in reader.lines().enumerate() {
            let line = line?;

            if line.trim().is_empty() {
                continue;
            }

            let row = line
                .split_whitespace()
                .enumerate()
                .map(|(column, value)| {
                    value.parse::<Rating>().map_err(|_| {
                        PipelineError::schema(
                            Stage::Reshape,
                            format!(
                                "line {}, column {}: {:?} is not a number",
                                line_no + 1,
                                column,
                                value
                            ),
                        )
                    })
                })
                .collect::<Result<Vec<_>, _>>()?;

            rows.push(row);
        }

        Ok(RawRatingMatrix { rows })
    }

    /// Load the score matrix from `path`.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, failure::Error> {
        let path = path.as_ref();
        let file = File::open(path)
            .with_context(|_| format!("cannot open score matrix {}", path.display()))?;

        let matrix = RawRatingMatrix::from_reader(file)
            .with_context(|_| format!("cannot load score matrix {}", path.display()))?;

        Ok(matrix)
    }

    pub fn rows(&self) -> &[Vec<Rating>] {
        &self.rows
    }

    pub fn num_users(&self) -> usize {
        self.rows.len()
    }
}

/// Reshape the wide matrix into the long rating table.
///
/// Row `u` of the matrix becomes user `u` and column `i` item `i`. The
/// result is sorted by `(user_id, rank)`.
pub fn reshape(
    matrix: &RawRatingMatrix,
    catalog: &ItemCatalog,
    options: &ReshapeOptions,
) -> Result<Vec<RatingRecord>, PipelineError> {
    options.scale.validate(Stage::Reshape)?;

    let mut records = Vec::new();
    let mut num_dropped = 0;

    for (user_id, row) in matrix.rows().iter().enumerate() {
        if row.len() != options.num_items {
            return Err(PipelineError::schema(
                Stage::Reshape,
                format!(
                    "user {} has {} columns, expected {}",
                    user_id,
                    row.len(),
                    options.num_items
                ),
            ));
        }

        let mut rated: Vec<(ItemId, Rating)> = Vec::new();

        for (item_id, &score) in row.iter().enumerate() {
            if score == options.sentinel {
                continue;
            }

            if !options.scale.contains(score) {
                return Err(PipelineError::schema(
                    Stage::Reshape,
                    format!(
                        "user {} item {}: score {} outside [{}, {}]",
                        user_id, item_id, score, options.scale.min, options.scale.max
                    ),
                ));
            }

            rated.push((item_id, score));
        }

        if rated.is_empty() {
            match options.degenerate_users {
                DegenerateUsers::Reject => {
                    return Err(PipelineError::data(
                        Stage::Reshape,
                        format!("user {} has no rated items", user_id),
                    ))
                }
                DegenerateUsers::Drop => {
                    warn!(user_id, "dropping user without rated items");
                    num_dropped += 1;
                    continue;
                }
            }
        }

        // Candidates arrive in ascending item order, and the sort is stable.
        rated.sort_by(|a, b| b.1.total_cmp(&a.1));

        for (idx, (item_id, rating)) in rated.into_iter().enumerate() {
            let item = catalog.get(item_id).ok_or_else(|| {
                PipelineError::lookup(
                    Stage::Reshape,
                    format!("item {} rated by user {} is not in the catalog", item_id, user_id),
                )
            })?;

            records.push(RatingRecord {
                user_id,
                item_id,
                rating,
                rank: idx + 1,
                name: item.name.clone(),
                localized_name: item.localized_name.clone(),
            });
        }
    }

    if records.is_empty() {
        return Err(PipelineError::data(
            Stage::Reshape,
            "score matrix contains no ratings",
        ));
    }

    info!(
        num_users = matrix.num_users() - num_dropped,
        num_dropped,
        num_ratings = records.len(),
        "reshaped score matrix"
    );

    Ok(records)
}
