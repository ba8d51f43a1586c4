//! CSV export of the harvested repositories

use crate::storage::{EntityRecord, Storage};
use crate::HarvestError;
use chrono::SecondsFormat;
use serde::Serialize;
use std::fs::File;
use std::io::Write;
use std::path::Path;

#[derive(Debug, Serialize)]
struct CsvRow<'a> {
    owner: &'a str,
    name: &'a str,
    full_name: &'a str,
    stars: u64,
    crawled_at: String,
    created_at: String,
    updated_at: String,
}

impl<'a> From<&'a EntityRecord> for CsvRow<'a> {
    fn from(record: &'a EntityRecord) -> Self {
        Self {
            owner: &record.owner,
            name: &record.name,
            full_name: &record.full_name,
            stars: record.stars,
            crawled_at: record.crawled_at.to_rfc3339_opts(SecondsFormat::Secs, true),
            created_at: record.created_at.to_rfc3339_opts(SecondsFormat::Secs, true),
            updated_at: record.updated_at.to_rfc3339_opts(SecondsFormat::Secs, true),
        }
    }
}

/// Writes every stored repository, most stars first, as CSV
///
/// # Returns
///
/// The number of rows written, excluding the header
pub fn write_csv<W: Write>(storage: &dyn Storage, writer: W) -> Result<u64, HarvestError> {
    let records = storage.all_entities()?;
    let mut csv = csv::Writer::from_writer(writer);

    for record in &records {
        csv.serialize(CsvRow::from(record))?;
    }
    if records.is_empty() {
        // serde only emits the header alongside the first row
        csv.write_record([
            "owner",
            "name",
            "full_name",
            "stars",
            "crawled_at",
            "created_at",
            "updated_at",
        ])?;
    }
    csv.flush()?;

    Ok(records.len() as u64)
}

/// Exports every stored repository to a CSV file at `path`
pub fn export_csv(storage: &dyn Storage, path: &Path) -> Result<u64, HarvestError> {
    let file = File::create(path)?;
    let rows = write_csv(storage, file)?;
    tracing::info!("Exported {} repositories to {}", rows, path.display());
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Entity;
    use crate::storage::SqliteStorage;
    use chrono::{TimeZone, Utc};

    #[test]
    fn test_write_csv_orders_by_stars() {
        let mut storage = SqliteStorage::new_in_memory().unwrap();
        let crawled = Utc.with_ymd_and_hms(2024, 3, 1, 8, 30, 0).unwrap();
        storage
            .save_batch(&[
                Entity::new("acme", "gadget", 5, crawled).unwrap(),
                Entity::new("acme", "widget", 10, crawled).unwrap(),
            ])
            .unwrap();

        let mut out = Vec::new();
        let rows = write_csv(&storage, &mut out).unwrap();
        assert_eq!(rows, 2);

        let text = String::from_utf8(out).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(
            lines[0],
            "owner,name,full_name,stars,crawled_at,created_at,updated_at"
        );
        assert!(lines[1].starts_with("acme,widget,acme/widget,10,2024-03-01T08:30:00Z,"));
        assert!(lines[2].starts_with("acme,gadget,acme/gadget,5,"));
    }

    #[test]
    fn test_write_csv_empty_has_header() {
        let storage = SqliteStorage::new_in_memory().unwrap();

        let mut out = Vec::new();
        let rows = write_csv(&storage, &mut out).unwrap();

        assert_eq!(rows, 0);
        assert_eq!(
            String::from_utf8(out).unwrap().trim_end(),
            "owner,name,full_name,stars,crawled_at,created_at,updated_at"
        );
    }

    #[test]
    fn test_export_csv_to_file() {
        let mut storage = SqliteStorage::new_in_memory().unwrap();
        storage
            .save_batch(&[Entity::new("acme", "widget", 10, Utc::now()).unwrap()])
            .unwrap();

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stars.csv");
        assert_eq!(export_csv(&storage, &path).unwrap(), 1);

        let text = std::fs::read_to_string(&path).unwrap();
        assert_eq!(text.lines().count(), 2);
    }
}
