//! Parquet-backed local warehouse
//!
//! Table layout on disk:
//!
//! ```text
//! {root}/{dataset}/{table}/schema.json
//! {root}/{dataset}/{table}/part-00000.parquet
//! {root}/{dataset}/{table}/part-00001.parquet
//! ```
//!
//! Each load appends one part file; parts written before a schema
//! migration simply lack the newer columns and are null-filled when
//! read. A range delete reads everything back, filters, and rewrites a
//! single consolidated part.

use std::collections::HashMap;
use std::fs::File;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use polars::prelude::*;
use tracing::{debug, info};

use settleflow_config::QuotaConfig;

use crate::error::WarehouseError;
use crate::table::{ColumnDef, ColumnType, SchemaMigration, TableRef, TableSchema, WriteDisposition};
use crate::Warehouse;

const SCHEMA_FILE: &str = "schema.json";

/// Filesystem-backed [`Warehouse`] implementation.
#[derive(Debug)]
pub struct LocalWarehouse {
    root: PathBuf,
    quota: QuotaConfig,
}

impl LocalWarehouse {
    /// Open (and create if needed) a warehouse root directory.
    pub fn open(root: impl Into<PathBuf>, quota: QuotaConfig) -> Result<Self, WarehouseError> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;
        Ok(Self { root, quota })
    }

    fn table_dir(&self, table: &TableRef) -> PathBuf {
        self.root.join(&table.dataset).join(&table.table)
    }

    fn schema_path(&self, table: &TableRef) -> PathBuf {
        self.table_dir(table).join(SCHEMA_FILE)
    }

    fn read_schema(&self, table: &TableRef) -> Result<TableSchema, WarehouseError> {
        let path = self.schema_path(table);
        if !path.exists() {
            return Err(WarehouseError::TableNotFound {
                table: table.to_string(),
            });
        }
        let text = std::fs::read_to_string(&path)?;
        serde_json::from_str(&text).map_err(|err| WarehouseError::Storage {
            message: format!("corrupt schema file {}: {err}", path.display()),
        })
    }

    fn write_schema(&self, table: &TableRef, schema: &TableSchema) -> Result<(), WarehouseError> {
        let dir = self.table_dir(table);
        std::fs::create_dir_all(&dir)?;
        let text = serde_json::to_string_pretty(schema).map_err(|err| WarehouseError::Storage {
            message: format!("failed encoding schema: {err}"),
        })?;
        std::fs::write(self.schema_path(table), text)?;
        Ok(())
    }

    fn part_paths(&self, table: &TableRef) -> Result<Vec<PathBuf>, WarehouseError> {
        let dir = self.table_dir(table);
        if !dir.exists() {
            return Ok(Vec::new());
        }
        let mut parts: Vec<PathBuf> = std::fs::read_dir(&dir)?
            .filter_map(Result::ok)
            .map(|entry| entry.path())
            .filter(|path| is_part_file(path))
            .collect();
        parts.sort();
        Ok(parts)
    }

    fn next_part_path(&self, table: &TableRef) -> Result<PathBuf, WarehouseError> {
        let parts = self.part_paths(table)?;
        let next = parts
            .iter()
            .filter_map(|path| part_index(path))
            .max()
            .map(|max| max + 1)
            .unwrap_or(0);
        Ok(self.table_dir(table).join(format!("part-{next:05}.parquet")))
    }

    /// Project a frame onto the schema: cast present columns to their
    /// declared types, null-fill absent ones, reject extras.
    fn align_to_schema(
        &self,
        table: &TableRef,
        frame: &DataFrame,
        schema: &TableSchema,
    ) -> Result<DataFrame, WarehouseError> {
        for name in frame.get_column_names() {
            if !schema.contains(name.as_str()) {
                return Err(WarehouseError::Schema {
                    table: table.to_string(),
                    message: format!("column '{name}' is not declared in the table schema"),
                });
            }
        }

        let height = frame.height();
        let mut columns = Vec::with_capacity(schema.columns.len());
        for def in &schema.columns {
            let dtype = def.ty.to_polars();
            let column = match frame.column(def.name.as_str()) {
                Ok(present) => present.cast(&dtype).map_err(|err| WarehouseError::Schema {
                    table: table.to_string(),
                    message: format!("column '{}' does not cast to {}: {err}", def.name, def.ty),
                })?,
                Err(_) => Column::full_null(def.name.as_str().into(), height, &dtype),
            };
            columns.push(column);
        }
        Ok(DataFrame::new(columns)?)
    }

    fn read_part(&self, path: &Path) -> Result<DataFrame, WarehouseError> {
        let file = File::open(path)?;
        Ok(ParquetReader::new(file).finish()?)
    }

    fn write_part(&self, path: &Path, frame: &DataFrame) -> Result<(), WarehouseError> {
        let mut file = File::create(path)?;
        ParquetWriter::new(&mut file).finish(&mut frame.clone())?;
        Ok(())
    }

    /// Read the whole table aligned to its current schema.
    pub fn read_all(&self, table: &TableRef) -> Result<DataFrame, WarehouseError> {
        let schema = self.read_schema(table)?;
        let parts = self.part_paths(table)?;

        let mut combined: Option<DataFrame> = None;
        for path in &parts {
            let part = self.read_part(path)?;
            let aligned = self.align_to_schema(table, &part, &schema)?;
            combined = Some(match combined {
                None => aligned,
                Some(mut acc) => {
                    acc.vstack_mut(&aligned)?;
                    acc
                }
            });
        }

        match combined {
            Some(df) => Ok(df),
            None => {
                let columns = schema
                    .columns
                    .iter()
                    .map(|def| Column::full_null(def.name.as_str().into(), 0, &def.ty.to_polars()))
                    .collect();
                Ok(DataFrame::new(columns)?)
            }
        }
    }
}

fn is_part_file(path: &Path) -> bool {
    path.file_name()
        .and_then(|name| name.to_str())
        .is_some_and(|name| name.starts_with("part-") && name.ends_with(".parquet"))
}

fn part_index(path: &Path) -> Option<u32> {
    path.file_stem()
        .and_then(|stem| stem.to_str())
        .and_then(|stem| stem.strip_prefix("part-"))
        .and_then(|index| index.parse().ok())
}

impl Warehouse for LocalWarehouse {
    fn table_schema(&self, table: &TableRef) -> Result<TableSchema, WarehouseError> {
        self.read_schema(table)
    }

    fn create_table(&self, table: &TableRef, schema: &TableSchema) -> Result<(), WarehouseError> {
        if self.schema_path(table).exists() {
            return Err(WarehouseError::Schema {
                table: table.to_string(),
                message: "table already exists".to_string(),
            });
        }
        self.write_schema(table, schema)?;
        info!(
            event_type = "table_created",
            table = %table,
            column_count = schema.columns.len(),
            "Created destination table"
        );
        Ok(())
    }

    fn apply_migrations(
        &self,
        table: &TableRef,
        migrations: &[SchemaMigration],
    ) -> Result<(), WarehouseError> {
        if migrations.is_empty() {
            return Ok(());
        }
        let mut schema = self.read_schema(table)?;
        for migration in migrations {
            let SchemaMigration::AddColumn { name, ty } = migration;
            match schema.column_type(name) {
                // Re-applying the same addition is a no-op.
                Some(existing) if existing == *ty => {}
                Some(existing) => {
                    return Err(WarehouseError::Schema {
                        table: table.to_string(),
                        message: format!(
                            "column '{name}' already exists as {existing}, refusing retype to {ty}"
                        ),
                    });
                }
                None => {
                    schema.columns.push(ColumnDef {
                        name: name.clone(),
                        ty: *ty,
                    });
                    info!(
                        event_type = "schema_migrated",
                        table = %table,
                        column = %name,
                        column_type = %ty,
                        "Added nullable column"
                    );
                }
            }
        }
        self.write_schema(table, &schema)
    }

    fn load(
        &self,
        table: &TableRef,
        frame: &DataFrame,
        disposition: WriteDisposition,
    ) -> Result<usize, WarehouseError> {
        let schema = self.read_schema(table)?;
        let aligned = self.align_to_schema(table, frame, &schema)?;

        if disposition == WriteDisposition::Overwrite {
            for part in self.part_paths(table)? {
                std::fs::remove_file(part)?;
            }
        }

        let path = self.next_part_path(table)?;
        self.write_part(&path, &aligned)?;
        debug!(
            event_type = "part_written",
            table = %table,
            path = %path.display(),
            rows = aligned.height(),
            "Wrote part file"
        );
        Ok(aligned.height())
    }

    fn delete_range(
        &self,
        table: &TableRef,
        column: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<usize, WarehouseError> {
        let schema = self.read_schema(table)?;
        match schema.column_type(column) {
            Some(ColumnType::Timestamp) => {}
            Some(other) => {
                return Err(WarehouseError::Schema {
                    table: table.to_string(),
                    message: format!("delete column '{column}' is {other}, not timestamp"),
                });
            }
            None => {
                return Err(WarehouseError::Schema {
                    table: table.to_string(),
                    message: format!("delete column '{column}' does not exist"),
                });
            }
        }

        let all = self.read_all(table)?;
        let before = all.height();
        if before == 0 {
            return Ok(0);
        }

        let ca = all.column(column)?.datetime()?;
        let phys: &Int64Chunked = ca;
        let from_ms = from.timestamp_millis();
        let to_ms = to.timestamp_millis();
        // Null timestamps are kept: they were never inside the range.
        let keep: BooleanChunked = phys
            .into_iter()
            .map(|ms| !ms.is_some_and(|ms| ms >= from_ms && ms < to_ms))
            .collect();
        let kept = all.filter(&keep)?;
        let removed = before - kept.height();

        for part in self.part_paths(table)? {
            std::fs::remove_file(part)?;
        }
        if kept.height() > 0 {
            let path = self.table_dir(table).join("part-00000.parquet");
            self.write_part(&path, &kept)?;
        }

        Ok(removed)
    }

    fn usage_ratios(&self) -> Result<HashMap<String, f64>, WarehouseError> {
        let mut total_bytes = 0u64;
        let mut max_parts = 0u64;

        if self.root.exists() {
            for dataset in std::fs::read_dir(&self.root)?.filter_map(Result::ok) {
                if !dataset.path().is_dir() {
                    continue;
                }
                for table in std::fs::read_dir(dataset.path())?.filter_map(Result::ok) {
                    if !table.path().is_dir() {
                        continue;
                    }
                    let mut parts = 0u64;
                    for entry in std::fs::read_dir(table.path())?.filter_map(Result::ok) {
                        if is_part_file(&entry.path()) {
                            parts += 1;
                            total_bytes += entry.metadata().map(|m| m.len()).unwrap_or(0);
                        }
                    }
                    max_parts = max_parts.max(parts);
                }
            }
        }

        let mut ratios = HashMap::new();
        ratios.insert(
            "storage_bytes".to_string(),
            total_bytes as f64 / self.quota.storage_bytes_cap.max(1) as f64,
        );
        ratios.insert(
            "table_parts".to_string(),
            max_parts as f64 / self.quota.table_parts_cap.max(1) as f64,
        );
        Ok(ratios)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn warehouse() -> (tempfile::TempDir, LocalWarehouse) {
        let dir = tempfile::tempdir().unwrap();
        let wh = LocalWarehouse::open(dir.path().join("wh"), QuotaConfig::default()).unwrap();
        (dir, wh)
    }

    fn table() -> TableRef {
        TableRef::new("settlement", "raw_fuelhh")
    }

    fn schema() -> TableSchema {
        TableSchema {
            columns: vec![
                ColumnDef {
                    name: "settlementDate".to_string(),
                    ty: ColumnType::Timestamp,
                },
                ColumnDef {
                    name: "generation".to_string(),
                    ty: ColumnType::Float,
                },
            ],
        }
    }

    fn day_ms(day: u32) -> i64 {
        Utc.with_ymd_and_hms(2024, 1, day, 0, 0, 0)
            .unwrap()
            .timestamp_millis()
    }

    fn frame(days: &[u32], values: &[f64]) -> DataFrame {
        let dates: Vec<i64> = days.iter().map(|d| day_ms(*d)).collect();
        DataFrame::new(vec![
            Column::new("settlementDate".into(), dates)
                .cast(&ColumnType::Timestamp.to_polars())
                .unwrap(),
            Column::new("generation".into(), values.to_vec()),
        ])
        .unwrap()
    }

    #[test]
    fn test_missing_table_is_distinguishable() {
        let (_dir, wh) = warehouse();
        let result = wh.table_schema(&table());
        assert!(matches!(result, Err(WarehouseError::TableNotFound { .. })));
    }

    #[test]
    fn test_create_load_read_round_trip() {
        let (_dir, wh) = warehouse();
        wh.create_table(&table(), &schema()).unwrap();

        let rows = wh
            .load(
                &table(),
                &frame(&[1, 2], &[100.0, 200.0]),
                WriteDisposition::Append,
            )
            .unwrap();
        assert_eq!(rows, 2);

        let all = wh.read_all(&table()).unwrap();
        assert_eq!(all.height(), 2);
        assert_eq!(all.width(), 2);
    }

    #[test]
    fn test_double_create_rejected() {
        let (_dir, wh) = warehouse();
        wh.create_table(&table(), &schema()).unwrap();
        assert!(matches!(
            wh.create_table(&table(), &schema()),
            Err(WarehouseError::Schema { .. })
        ));
    }

    #[test]
    fn test_appends_accumulate_as_parts() {
        let (_dir, wh) = warehouse();
        wh.create_table(&table(), &schema()).unwrap();
        wh.load(&table(), &frame(&[1], &[1.0]), WriteDisposition::Append)
            .unwrap();
        wh.load(&table(), &frame(&[2], &[2.0]), WriteDisposition::Append)
            .unwrap();

        assert_eq!(wh.part_paths(&table()).unwrap().len(), 2);
        assert_eq!(wh.read_all(&table()).unwrap().height(), 2);
    }

    #[test]
    fn test_overwrite_replaces_contents() {
        let (_dir, wh) = warehouse();
        wh.create_table(&table(), &schema()).unwrap();
        wh.load(&table(), &frame(&[1, 2], &[1.0, 2.0]), WriteDisposition::Append)
            .unwrap();
        wh.load(&table(), &frame(&[3], &[3.0]), WriteDisposition::Overwrite)
            .unwrap();

        let all = wh.read_all(&table()).unwrap();
        assert_eq!(all.height(), 1);
    }

    #[test]
    fn test_undeclared_column_rejected() {
        let (_dir, wh) = warehouse();
        wh.create_table(&table(), &schema()).unwrap();
        let bad = DataFrame::new(vec![Column::new("mystery".into(), vec![1i64])]).unwrap();
        assert!(matches!(
            wh.load(&table(), &bad, WriteDisposition::Append),
            Err(WarehouseError::Schema { .. })
        ));
    }

    #[test]
    fn test_migration_nullfills_old_parts() {
        let (_dir, wh) = warehouse();
        wh.create_table(&table(), &schema()).unwrap();
        wh.load(&table(), &frame(&[1], &[1.0]), WriteDisposition::Append)
            .unwrap();

        wh.apply_migrations(
            &table(),
            &[SchemaMigration::AddColumn {
                name: "_dataset".to_string(),
                ty: ColumnType::String,
            }],
        )
        .unwrap();

        let all = wh.read_all(&table()).unwrap();
        assert_eq!(all.width(), 3);
        assert_eq!(all.column("_dataset").unwrap().null_count(), 1);
    }

    #[test]
    fn test_migration_is_idempotent_but_never_retypes() {
        let (_dir, wh) = warehouse();
        wh.create_table(&table(), &schema()).unwrap();

        let add = SchemaMigration::AddColumn {
            name: "_dataset".to_string(),
            ty: ColumnType::String,
        };
        wh.apply_migrations(&table(), &[add.clone()]).unwrap();
        wh.apply_migrations(&table(), &[add]).unwrap();

        let retype = SchemaMigration::AddColumn {
            name: "generation".to_string(),
            ty: ColumnType::String,
        };
        assert!(matches!(
            wh.apply_migrations(&table(), &[retype]),
            Err(WarehouseError::Schema { .. })
        ));
    }

    #[test]
    fn test_delete_range_is_half_open() {
        let (_dir, wh) = warehouse();
        wh.create_table(&table(), &schema()).unwrap();
        wh.load(
            &table(),
            &frame(&[1, 2, 3, 4], &[1.0, 2.0, 3.0, 4.0]),
            WriteDisposition::Append,
        )
        .unwrap();

        let from = Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap();
        let to = Utc.with_ymd_and_hms(2024, 1, 4, 0, 0, 0).unwrap();
        let removed = wh.delete_range(&table(), "settlementDate", from, to).unwrap();

        // Days 2 and 3 fall inside [from, to); day 4 is the open end.
        assert_eq!(removed, 2);
        let all = wh.read_all(&table()).unwrap();
        assert_eq!(all.height(), 2);
    }

    #[test]
    fn test_delete_range_refuses_non_timestamp_column() {
        let (_dir, wh) = warehouse();
        wh.create_table(&table(), &schema()).unwrap();
        let from = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let to = Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap();
        assert!(matches!(
            wh.delete_range(&table(), "generation", from, to),
            Err(WarehouseError::Schema { .. })
        ));
    }

    #[test]
    fn test_usage_ratios_reflect_parts() {
        let (_dir, wh) = warehouse();
        let ratios = wh.usage_ratios().unwrap();
        assert_eq!(ratios["table_parts"], 0.0);

        wh.create_table(&table(), &schema()).unwrap();
        wh.load(&table(), &frame(&[1], &[1.0]), WriteDisposition::Append)
            .unwrap();

        let ratios = wh.usage_ratios().unwrap();
        assert!(ratios["storage_bytes"] > 0.0);
        assert!(ratios["table_parts"] > 0.0);
    }
}
