//! End-to-end orchestration: reshape, train, recommend, export.
use std::collections::BTreeSet;
use std::fs::{self, File};
use std::io::BufWriter;
use std::path::{Path, PathBuf};

use failure::ResultExt;
use rayon::prelude::*;
use tracing::{info, warn};

use super::catalog::ItemCatalog;
use super::config::PipelineConfig;
use super::data::RatingRecord;
use super::export::{export, write_ratings, write_recommendations};
use super::models::{self, ModelKind};
use super::recommend::{recommend, RecommendationRow};
use super::reshape::{reshape, RawRatingMatrix};
use super::{ItemId, PipelineError};

/// File name of the normalized rating table.
pub const RATINGS_FILE: &str = "sushi_ratings.csv";
/// File name of the item table.
pub const ITEMS_FILE: &str = "sushi_items.csv";

/// File name of the recommendation table for `kind`.
pub fn results_file(kind: ModelKind) -> String {
    format!("{}_results.csv", kind.name())
}

/// What a run produced.
#[derive(Clone, Debug)]
pub struct PipelineSummary {
    pub num_users: usize,
    pub num_ratings: usize,
    pub outputs: Vec<PathBuf>,
}

/// Train every configured model kind on `records` and return the flattened
/// recommendation table of each, in configuration order.
pub fn recommend_all(
    records: &[RatingRecord],
    catalog: &ItemCatalog,
    config: &PipelineConfig,
) -> Result<Vec<(ModelKind, Vec<RecommendationRow>)>, PipelineError> {
    config.validate()?;

    let item_ids: BTreeSet<ItemId> = (0..config.num_items).collect();

    let run = |kind: ModelKind| -> Result<(ModelKind, Vec<RecommendationRow>), PipelineError> {
        let model = models::train(records, kind, config.rating_scale, &config.trainer)?;
        let per_user = recommend(&model, records, catalog, &item_ids, config.top_n)?;

        Ok((kind, export(per_user)))
    };

    if config.parallel_training {
        config.models.par_iter().map(|&kind| run(kind)).collect()
    } else {
        config.models.iter().map(|&kind| run(kind)).collect()
    }
}

fn write_atomically<F>(path: &Path, write: F) -> Result<(), failure::Error>
where
    F: FnOnce(BufWriter<File>) -> Result<(), failure::Error>,
{
    let temp_path = path.with_extension("csv.tmp");
    let file = File::create(&temp_path)
        .with_context(|_| format!("cannot create {}", temp_path.display()))?;

    let result = write(BufWriter::new(file))
        .with_context(|_| format!("cannot write {}", path.display()))
        .and_then(|_| {
            fs::rename(&temp_path, path)
                .with_context(|_| format!("cannot move output into {}", path.display()))
        });

    if let Err(err) = result {
        if let Err(cleanup) = fs::remove_file(&temp_path) {
            warn!(path = %temp_path.display(), error = %cleanup, "cannot remove partial output");
        }

        return Err(err.into());
    }

    Ok(())
}

/// Run the whole pipeline described by `config`.
///
/// All models are trained and scored before any recommendation table is
/// written, so a failing stage leaves no partial result tables behind.
pub fn run(config: &PipelineConfig) -> Result<PipelineSummary, failure::Error> {
    config.validate()?;

    let catalog = ItemCatalog::load(&config.items_path)?;
    let matrix = RawRatingMatrix::load(&config.scores_path)?;

    info!(
        num_items = catalog.len(),
        num_users = matrix.num_users(),
        "loaded inputs"
    );

    let records = reshape(&matrix, &catalog, &config.reshape_options())?;
    let results = recommend_all(&records, &catalog, config)?;

    fs::create_dir_all(&config.output_dir).with_context(|_| {
        format!("cannot create output directory {}", config.output_dir.display())
    })?;

    let mut outputs = Vec::new();

    let ratings_path = config.output_dir.join(RATINGS_FILE);
    let with_localized_names = catalog.has_localized_names();
    write_atomically(&ratings_path, |writer| {
        write_ratings(&records, writer, with_localized_names)
    })?;
    outputs.push(ratings_path);

    let items_path = config.output_dir.join(ITEMS_FILE);
    write_atomically(&items_path, |writer| catalog.write_csv(writer))?;
    outputs.push(items_path);

    for (kind, rows) in &results {
        let path = config.output_dir.join(results_file(*kind));
        write_atomically(&path, |writer| write_recommendations(rows, writer))?;

        info!(model = kind.name(), num_rows = rows.len(), path = %path.display(), "wrote recommendations");
        outputs.push(path);
    }

    let num_users = records
        .iter()
        .map(|x| x.user_id)
        .collect::<BTreeSet<_>>()
        .len();

    Ok(PipelineSummary {
        num_users,
        num_ratings: records.len(),
        outputs,
    })
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;
    use crate::catalog::ItemMeta;
    use crate::models::{nmf, svd};
    use crate::reshape::ReshapeOptions;

    fn catalog(num_items: usize) -> ItemCatalog {
        ItemCatalog::from_items((0..num_items).map(|item_id| ItemMeta {
            item_id,
            name: format!("item_{}", item_id),
            localized_name: None,
            attributes: None,
        }))
        .unwrap()
    }

    fn matrix(num_users: usize, num_items: usize) -> RawRatingMatrix {
        RawRatingMatrix::new(
            (0..num_users)
                .map(|user_id| {
                    (0..num_items)
                        .map(|item_id| {
                            if (user_id + 2 * item_id) % 3 == 0 {
                                -1.0
                            } else {
                                ((user_id + item_id) % 5) as f32
                            }
                        })
                        .collect()
                })
                .collect(),
        )
    }

    fn config(num_items: usize) -> PipelineConfig {
        let mut config = PipelineConfig::default();
        config.num_items = num_items;
        config.top_n = 3;
        config.trainer = config
            .trainer
            .svd(svd::Hyperparameters::new().latent_dim(4))
            .nmf(nmf::Hyperparameters::new().latent_dim(3));
        config
    }

    #[test]
    fn results_are_disjoint_from_rated_items() {
        let catalog = catalog(12);
        let config = config(12);
        let records = reshape(&matrix(15, 12), &catalog, &ReshapeOptions::new(12)).unwrap();

        let rated: HashSet<(usize, usize)> =
            records.iter().map(|x| (x.user_id, x.item_id)).collect();

        let results = recommend_all(&records, &catalog, &config).unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].0, ModelKind::Svd);
        assert_eq!(results[1].0, ModelKind::Nmf);

        for (_, rows) in &results {
            assert!(!rows.is_empty());
            assert!(rows.iter().all(|x| !rated.contains(&(x.user_id, x.item_id))));
            assert!(rows.iter().all(|x| x.rank >= 1 && x.rank <= 3));

            let keys: Vec<(usize, usize)> = rows.iter().map(|x| (x.user_id, x.rank)).collect();
            let mut sorted = keys.clone();
            sorted.sort();
            assert_eq!(keys, sorted);
        }
    }

    #[test]
    fn sequential_and_parallel_training_agree() {
        let catalog = catalog(12);
        let records = reshape(&matrix(15, 12), &catalog, &ReshapeOptions::new(12)).unwrap();

        let parallel = recommend_all(&records, &catalog, &config(12)).unwrap();

        let mut sequential_config = config(12);
        sequential_config.parallel_training = false;
        let sequential = recommend_all(&records, &catalog, &sequential_config).unwrap();

        assert_eq!(parallel, sequential);
    }

    #[test]
    fn failed_write_leaves_no_temporary_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("svd_results.csv");

        let result = write_atomically(&path, |_| Err(failure::err_msg("disk full")));

        assert!(result.is_err());
        assert!(!path.exists());
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn catalog_must_cover_item_space() {
        let records = reshape(&matrix(15, 12), &catalog(12), &ReshapeOptions::new(12)).unwrap();

        match recommend_all(&records, &catalog(10), &config(12)) {
            Err(PipelineError::Lookup { .. }) => {}
            other => panic!("unexpected result {:?}", other),
        }
    }
}
