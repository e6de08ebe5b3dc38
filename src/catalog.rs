//! Static item metadata.
//!
//! The metadata file is tab-delimited without a header. Each row holds an
//! item id and its canonical name, optionally followed by the seven
//! categorical attributes and a localized name:
//!
//! ```text
//! item_id  name  style  major_group  minor_group  oiliness  eating_frequency  price  selling_frequency  [name_ja]
//! ```
use std::collections::btree_map::{self, BTreeMap};
use std::collections::BTreeSet;
use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;
use std::str::FromStr;

use failure::ResultExt;

use super::{ItemId, PipelineError, Stage};

const NUM_ATTRIBUTE_COLUMNS: usize = 7;

/// Categorical attributes describing an item.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ItemAttributes {
    pub style: u32,
    pub major_group: u32,
    pub minor_group: u32,
    pub oiliness: f32,
    pub eating_frequency: f32,
    pub price: f32,
    pub selling_frequency: f32,
}

/// Metadata for a single item.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ItemMeta {
    pub item_id: ItemId,
    pub name: String,
    pub localized_name: Option<String>,
    pub attributes: Option<ItemAttributes>,
}

/// Read-only lookup table from item id to metadata.
#[derive(Clone, Debug, Default)]
pub struct ItemCatalog {
    items: BTreeMap<ItemId, ItemMeta>,
}

fn parse_field<T: FromStr>(
    record: &csv::StringRecord,
    row: usize,
    idx: usize,
    field: &str,
) -> Result<T, PipelineError> {
    let raw = record.get(idx).map(str::trim).unwrap_or("");

    raw.parse().map_err(|_| {
        PipelineError::schema(
            Stage::Catalog,
            format!("row {}: invalid {} value {:?}", row, field, raw),
        )
    })
}

fn parse_attributes(
    record: &csv::StringRecord,
    row: usize,
) -> Result<ItemAttributes, PipelineError> {
    Ok(ItemAttributes {
        style: parse_field(record, row, 2, "style")?,
        major_group: parse_field(record, row, 3, "major_group")?,
        minor_group: parse_field(record, row, 4, "minor_group")?,
        oiliness: parse_field(record, row, 5, "oiliness")?,
        eating_frequency: parse_field(record, row, 6, "eating_frequency")?,
        price: parse_field(record, row, 7, "price")?,
        selling_frequency: parse_field(record, row, 8, "selling_frequency")?,
    })
}

fn parse_row(record: &csv::StringRecord, row: usize) -> Result<ItemMeta, PipelineError> {
    let item_id: ItemId = parse_field(record, row, 0, "item_id")?;
    let name = record.get(1).map(str::trim).unwrap_or("");

    if name.is_empty() {
        return Err(PipelineError::schema(
            Stage::Catalog,
            format!("row {}: missing name for item {}", row, item_id),
        ));
    }

    let (attributes, localized_name) = match record.len() {
        2 => (None, None),
        9 => (Some(parse_attributes(record, row)?), None),
        10 => {
            let localized = record.get(9).map(str::trim).unwrap_or("");
            let localized = if localized.is_empty() {
                None
            } else {
                Some(localized.to_owned())
            };

            (Some(parse_attributes(record, row)?), localized)
        }
        num_fields => {
            return Err(PipelineError::schema(
                Stage::Catalog,
                format!(
                    "row {}: expected 2, {} or {} fields, found {}",
                    row,
                    2 + NUM_ATTRIBUTE_COLUMNS,
                    3 + NUM_ATTRIBUTE_COLUMNS,
                    num_fields
                ),
            ))
        }
    };

    Ok(ItemMeta {
        item_id,
        name: name.to_owned(),
        localized_name,
        attributes,
    })
}

impl ItemCatalog {
    /// Build a catalog from items, rejecting repeated ids.
    pub fn from_items<I: IntoIterator<Item = ItemMeta>>(items: I) -> Result<Self, PipelineError> {
        let mut catalog = ItemCatalog::default();

        for item in items {
            catalog.insert(item)?;
        }

        Ok(catalog)
    }

    fn insert(&mut self, item: ItemMeta) -> Result<(), PipelineError> {
        match self.items.entry(item.item_id) {
            btree_map::Entry::Occupied(_) => Err(PipelineError::schema(
                Stage::Catalog,
                format!("item id {} appears more than once", item.item_id),
            )),
            btree_map::Entry::Vacant(entry) => {
                entry.insert(item);
                Ok(())
            }
        }
    }

    /// Parse tab-delimited item metadata.
    pub fn from_reader<R: Read>(reader: R) -> Result<Self, failure::Error> {
        let mut reader = csv::ReaderBuilder::new()
            .delimiter(b'\t')
            .has_headers(false)
            .flexible(true)
            .quoting(false)
            .from_reader(reader);

        let mut catalog = ItemCatalog::default();

        for (row, record) in reader.records().enumerate() {
            let record = record?;
            catalog.insert(parse_row(&record, row + 1)?)?;
        }

        Ok(catalog)
    }

    /// Load item metadata from `path`.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, failure::Error> {
        let path = path.as_ref();
        let file = File::open(path)
            .with_context(|_| format!("cannot open item metadata {}", path.display()))?;

        let catalog = ItemCatalog::from_reader(file)
            .with_context(|_| format!("cannot load item metadata {}", path.display()))?;

        Ok(catalog)
    }

    pub fn get(&self, item_id: ItemId) -> Option<&ItemMeta> {
        self.items.get(&item_id)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// All catalogued item ids.
    pub fn item_ids(&self) -> BTreeSet<ItemId> {
        self.items.keys().cloned().collect()
    }

    /// Whether any item carries a localized name.
    pub fn has_localized_names(&self) -> bool {
        self.items.values().any(|x| x.localized_name.is_some())
    }

    /// Items in ascending id order.
    pub fn iter(&self) -> impl Iterator<Item = &ItemMeta> {
        self.items.values()
    }

    /// Write the catalog as a comma-delimited table with a header row.
    pub fn write_csv<W: Write>(&self, writer: W) -> Result<(), failure::Error> {
        let mut writer = csv::Writer::from_writer(writer);
        let localized = self.has_localized_names();

        let mut header = vec![
            "item_id",
            "name",
            "style",
            "major_group",
            "minor_group",
            "oiliness",
            "eating_frequency",
            "price",
            "selling_frequency",
        ];
        if localized {
            header.push("name_ja");
        }
        writer.write_record(&header)?;

        for item in self.iter() {
            let mut row = vec![item.item_id.to_string(), item.name.clone()];

            match item.attributes {
                Some(ref attributes) => row.extend(vec![
                    attributes.style.to_string(),
                    attributes.major_group.to_string(),
                    attributes.minor_group.to_string(),
                    attributes.oiliness.to_string(),
                    attributes.eating_frequency.to_string(),
                    attributes.price.to_string(),
                    attributes.selling_frequency.to_string(),
                ]),
                None => row.extend(vec![String::new(); NUM_ATTRIBUTE_COLUMNS]),
            }

            if localized {
                row.push(item.localized_name.clone().unwrap_or_default());
            }

            writer.write_record(&row)?;
        }

        writer.flush()?;

        Ok(())
    }
}
