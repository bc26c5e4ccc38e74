//! Store dumps and diffs

use anyhow::{Context, Result};
use sqlx::Row;
use std::collections::BTreeMap;
use wx_db::{tables, TimeSeriesStore};

/// Tables in dump order
pub const DUMP_TABLES: &[&str] = &[
    tables::STATION_RAW,
    tables::STATION_3H,
    tables::FORECAST,
    tables::META,
];

/// Store dump for comparison
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DbDump {
    pub tables: BTreeMap<String, TableDump>,
}

/// Single table dump; values are SQL literals as rendered by `quote()`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableDump {
    pub name: String,
    pub columns: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl TableDump {
    /// Row whose first (key) column renders as `key`
    pub fn row(&self, key: &str) -> Option<&Vec<String>> {
        self.rows.iter().find(|row| row.first().map(String::as_str) == Some(key))
    }
}

impl DbDump {
    /// Dump every table of a store, rows ordered by key
    pub async fn from_store(store: &TimeSeriesStore) -> Result<Self> {
        let mut tables = BTreeMap::new();
        for table in DUMP_TABLES {
            let dump = dump_table(store, table)
                .await
                .with_context(|| format!("Failed to dump table {}", table))?;
            tables.insert(table.to_string(), dump);
        }
        Ok(Self { tables })
    }

    pub fn table(&self, name: &str) -> &TableDump {
        &self.tables[name]
    }

    /// Render as text, one line per row
    pub fn to_text(&self) -> String {
        let mut text = String::new();

        for (table_name, table) in &self.tables {
            text.push_str(&format!("-- Table: {} ({})\n", table_name, table.columns.join(", ")));
            for row in &table.rows {
                text.push_str(&row.join(" | "));
                text.push('\n');
            }
            text.push('\n');
        }

        text
    }

    /// Compare two dumps and return differences
    pub fn diff(&self, other: &DbDump) -> Vec<String> {
        let mut differences = Vec::new();

        for table_name in self.tables.keys() {
            if !other.tables.contains_key(table_name) {
                differences.push(format!(
                    "Table '{}' exists in actual but not in expected",
                    table_name
                ));
            }
        }

        for table_name in other.tables.keys() {
            if !self.tables.contains_key(table_name) {
                differences.push(format!(
                    "Table '{}' exists in expected but not in actual",
                    table_name
                ));
            }
        }

        for (table_name, actual_table) in &self.tables {
            if let Some(expected_table) = other.tables.get(table_name) {
                differences.extend(compare_tables(actual_table, expected_table));
            }
        }

        differences
    }
}

/// Compare two table dumps row by key
fn compare_tables(actual: &TableDump, expected: &TableDump) -> Vec<String> {
    let mut differences = Vec::new();

    if actual.columns != expected.columns {
        differences.push(format!(
            "Table '{}': column mismatch (actual: {:?}, expected: {:?})",
            actual.name, actual.columns, expected.columns
        ));
        return differences;
    }

    let keyed = |table: &TableDump| -> BTreeMap<String, Vec<String>> {
        table
            .rows
            .iter()
            .map(|row| (row.first().cloned().unwrap_or_default(), row.clone()))
            .collect()
    };
    let actual_rows = keyed(actual);
    let expected_rows = keyed(expected);

    for (key, actual_row) in &actual_rows {
        match expected_rows.get(key) {
            None => differences.push(format!(
                "Table '{}', key {}: row exists in actual but not in expected",
                actual.name, key
            )),
            Some(expected_row) => {
                for (column, (a, e)) in actual
                    .columns
                    .iter()
                    .zip(actual_row.iter().zip(expected_row.iter()))
                {
                    if a != e {
                        differences.push(format!(
                            "Table '{}', key {}, column '{}': value mismatch (actual: {}, expected: {})",
                            actual.name, key, column, a, e
                        ));
                    }
                }
            }
        }
    }

    for key in expected_rows.keys() {
        if !actual_rows.contains_key(key) {
            differences.push(format!(
                "Table '{}', key {}: row exists in expected but not in actual",
                actual.name, key
            ));
        }
    }

    differences
}

async fn dump_table(store: &TimeSeriesStore, table: &str) -> Result<TableDump> {
    let columns: Vec<String> = sqlx::query(&format!("PRAGMA table_info({})", table))
        .fetch_all(store.pool())
        .await?
        .iter()
        .map(|row| row.try_get::<String, _>("name"))
        .collect::<Result<_, _>>()?;

    let select = columns
        .iter()
        .map(|c| format!("quote({})", c))
        .collect::<Vec<_>>()
        .join(", ");
    let sql = format!("SELECT {} FROM {} ORDER BY {}", select, table, columns[0]);

    let rows = sqlx::query(&sql)
        .fetch_all(store.pool())
        .await?
        .iter()
        .map(|row| {
            (0..columns.len())
                .map(|i| row.try_get::<String, _>(i))
                .collect::<Result<Vec<_>, _>>()
        })
        .collect::<Result<Vec<_>, _>>()?;

    Ok(TableDump {
        name: table.to_string(),
        columns,
        rows,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use wx_core::RawObservation;

    #[tokio::test]
    async fn test_dump_renders_sql_literals() {
        let store = TimeSeriesStore::open_memory().await.unwrap();
        store
            .upsert_raw(&[RawObservation {
                temperature_c: Some(12.5),
                ..RawObservation::new(600)
            }])
            .await
            .unwrap();

        let dump = DbDump::from_store(&store).await.unwrap();
        let raw = dump.table(tables::STATION_RAW);
        assert_eq!(raw.columns[0], "ts_utc");
        assert_eq!(raw.rows.len(), 1);
        assert_eq!(raw.rows[0][0], "600");
        assert_eq!(raw.rows[0][1], "12.5");
        assert_eq!(raw.rows[0][2], "NULL");
    }

    #[tokio::test]
    async fn test_diff_reports_changed_values() {
        let store = TimeSeriesStore::open_memory().await.unwrap();
        store.upsert_raw(&[RawObservation::new(0)]).await.unwrap();
        let before = DbDump::from_store(&store).await.unwrap();
        assert!(before.diff(&before).is_empty());

        store
            .upsert_raw(&[
                RawObservation {
                    temperature_c: Some(3.0),
                    ..RawObservation::new(0)
                },
                RawObservation::new(60),
            ])
            .await
            .unwrap();
        let after = DbDump::from_store(&store).await.unwrap();

        let diffs = after.diff(&before);
        assert_eq!(diffs.len(), 2, "{:?}", diffs);
        assert!(diffs.iter().any(|d| d.contains("column 'temp_c'")));
        assert!(diffs.iter().any(|d| d.contains("key 60")));
    }
}
