//! Flattening and serialization of pipeline outputs.
use std::collections::BTreeMap;
use std::io::Write;

use super::data::RatingRecord;
use super::recommend::RecommendationRow;
use super::{ItemId, UserId};

#[derive(Serialize)]
struct RecommendationLine<'a> {
    user_id: UserId,
    rank: usize,
    item_id: ItemId,
    item_name: &'a str,
    predicted_rating: String,
}

/// Flatten per-user recommendations into one list sorted by
/// `(user_id, rank)`.
pub fn export(per_user: BTreeMap<UserId, Vec<RecommendationRow>>) -> Vec<RecommendationRow> {
    let mut rows: Vec<RecommendationRow> = per_user.into_iter().flat_map(|(_, x)| x).collect();

    rows.sort_by_key(|x| (x.user_id, x.rank));

    rows
}

/// Write recommendation rows as CSV with header
/// `user_id,rank,item_id,item_name,predicted_rating`.
///
/// Predicted ratings are written with two decimals.
pub fn write_recommendations<W: Write>(
    rows: &[RecommendationRow],
    writer: W,
) -> Result<(), failure::Error> {
    // The header is written up front so that an empty table still has one.
    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .from_writer(writer);
    writer.write_record(&["user_id", "rank", "item_id", "item_name", "predicted_rating"])?;

    for row in rows {
        writer.serialize(RecommendationLine {
            user_id: row.user_id,
            rank: row.rank,
            item_id: row.item_id,
            item_name: &row.item_name,
            predicted_rating: format!("{:.2}", row.predicted_rating),
        })?;
    }

    writer.flush()?;

    Ok(())
}

/// Write the normalized rating table as CSV with header
/// `user_id,rank,item_id,name[,name_ja],score`.
///
/// The localized name column is present when `with_localized_names` is set.
pub fn write_ratings<W: Write>(
    records: &[RatingRecord],
    writer: W,
    with_localized_names: bool,
) -> Result<(), failure::Error> {
    let mut writer = csv::Writer::from_writer(writer);

    if with_localized_names {
        writer.write_record(&["user_id", "rank", "item_id", "name", "name_ja", "score"])?;
    } else {
        writer.write_record(&["user_id", "rank", "item_id", "name", "score"])?;
    }

    for record in records {
        let mut row = vec![
            record.user_id.to_string(),
            record.rank.to_string(),
            record.item_id.to_string(),
            record.name.clone(),
        ];

        if with_localized_names {
            row.push(record.localized_name.clone().unwrap_or_default());
        }

        row.push(record.rating.to_string());

        writer.write_record(&row)?;
    }

    writer.flush()?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(user_id: UserId, rank: usize, item_id: usize, predicted_rating: f32) -> RecommendationRow {
        RecommendationRow {
            user_id,
            rank,
            item_id,
            item_name: format!("item_{}", item_id),
            predicted_rating,
        }
    }

    #[test]
    fn flattens_in_user_then_rank_order() {
        let mut per_user = BTreeMap::new();
        per_user.insert(3, vec![row(3, 1, 4, 2.0), row(3, 2, 1, 1.0)]);
        per_user.insert(0, vec![row(0, 2, 9, 1.5), row(0, 1, 8, 3.0)]);
        per_user.insert(1, Vec::new());

        let keys: Vec<(UserId, usize)> = export(per_user)
            .iter()
            .map(|x| (x.user_id, x.rank))
            .collect();

        assert_eq!(keys, vec![(0, 1), (0, 2), (3, 1), (3, 2)]);
    }

    #[test]
    fn writes_two_decimal_predictions() {
        let rows = vec![row(0, 1, 5, 3.456), row(0, 2, 7, 10.5), row(1, 1, 2, -0.25)];
        let mut buffer = Vec::new();

        write_recommendations(&rows, &mut buffer).unwrap();

        let output = String::from_utf8(buffer).unwrap();
        let lines: Vec<&str> = output.lines().collect();

        assert_eq!(lines[0], "user_id,rank,item_id,item_name,predicted_rating");
        assert_eq!(lines[1], "0,1,5,item_5,3.46");
        assert_eq!(lines[2], "0,2,7,item_7,10.50");
        assert_eq!(lines[3], "1,1,2,item_2,-0.25");
    }

    #[test]
    fn empty_table_keeps_its_header() {
        let mut buffer = Vec::new();

        write_recommendations(&[], &mut buffer).unwrap();

        assert_eq!(
            String::from_utf8(buffer).unwrap(),
            "user_id,rank,item_id,item_name,predicted_rating\n"
        );
    }

    #[test]
    fn writes_rating_table_with_optional_localized_names() {
        let records = vec![RatingRecord {
            user_id: 0,
            item_id: 3,
            rating: 4.0,
            rank: 1,
            name: "ika".to_owned(),
            localized_name: Some("いか".to_owned()),
        }];

        let mut plain = Vec::new();
        write_ratings(&records, &mut plain, false).unwrap();
        assert_eq!(
            String::from_utf8(plain).unwrap(),
            "user_id,rank,item_id,name,score\n0,1,3,ika,4\n"
        );

        let mut localized = Vec::new();
        write_ratings(&records, &mut localized, true).unwrap();
        assert_eq!(
            String::from_utf8(localized).unwrap(),
            "user_id,rank,item_id,name,name_ja,score\n0,1,3,ika,いか,4\n"
        );
    }
}
