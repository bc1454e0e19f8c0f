//! Table references, column types, schemas and migrations

use polars::prelude::{DataFrame, DataType, TimeUnit};
use serde::{Deserialize, Serialize};

/// Dataset-qualified destination table.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TableRef {
    /// Logical dataset (namespace) the table lives under.
    pub dataset: String,
    /// Table name.
    pub table: String,
}

impl TableRef {
    pub fn new(dataset: impl Into<String>, table: impl Into<String>) -> Self {
        Self {
            dataset: dataset.into(),
            table: table.into(),
        }
    }
}

impl std::fmt::Display for TableRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.dataset, self.table)
    }
}

/// Declared column type of a destination table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnType {
    String,
    Integer,
    Float,
    Boolean,
    Timestamp,
}

impl ColumnType {
    /// Polars dtype this column type maps to.
    pub fn to_polars(self) -> DataType {
        match self {
            ColumnType::String => DataType::String,
            ColumnType::Integer => DataType::Int64,
            ColumnType::Float => DataType::Float64,
            ColumnType::Boolean => DataType::Boolean,
            ColumnType::Timestamp => DataType::Datetime(TimeUnit::Milliseconds, None),
        }
    }

    /// Column type a polars dtype maps to. Exotic dtypes degrade to
    /// string, which every value can render into.
    pub fn from_polars(dtype: &DataType) -> Self {
        match dtype {
            DataType::Boolean => ColumnType::Boolean,
            DataType::Int8
            | DataType::Int16
            | DataType::Int32
            | DataType::Int64
            | DataType::UInt8
            | DataType::UInt16
            | DataType::UInt32
            | DataType::UInt64 => ColumnType::Integer,
            DataType::Float32 | DataType::Float64 => ColumnType::Float,
            DataType::Datetime(_, _) | DataType::Date => ColumnType::Timestamp,
            _ => ColumnType::String,
        }
    }
}

impl std::fmt::Display for ColumnType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ColumnType::String => "string",
            ColumnType::Integer => "integer",
            ColumnType::Float => "float",
            ColumnType::Boolean => "boolean",
            ColumnType::Timestamp => "timestamp",
        };
        write!(f, "{name}")
    }
}

/// One declared column. All columns are nullable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnDef {
    pub name: String,
    #[serde(rename = "type")]
    pub ty: ColumnType,
}

/// Ordered column set of a destination table.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableSchema {
    pub columns: Vec<ColumnDef>,
}

impl TableSchema {
    /// Infer a schema from a frame's columns, in frame order.
    pub fn from_frame(df: &DataFrame) -> Self {
        let columns = df
            .get_columns()
            .iter()
            .map(|column| ColumnDef {
                name: column.name().to_string(),
                ty: ColumnType::from_polars(column.dtype()),
            })
            .collect();
        Self { columns }
    }

    /// Declared type of a column, if present.
    pub fn column_type(&self, name: &str) -> Option<ColumnType> {
        self.columns
            .iter()
            .find(|col| col.name == name)
            .map(|col| col.ty)
    }

    /// Whether a column is declared.
    pub fn contains(&self, name: &str) -> bool {
        self.columns.iter().any(|col| col.name == name)
    }

    /// Column names in declaration order.
    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|col| col.name.as_str()).collect()
    }
}

/// How a load applies to existing table contents.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteDisposition {
    /// Append new rows.
    Append,
    /// Replace the table contents with this frame.
    Overwrite,
}

/// Additive-only schema change.
///
/// The single variant is deliberate: the type system cannot express a
/// drop or a retype, so reconciliation plans are safe by construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchemaMigration {
    /// Add a nullable column.
    AddColumn { name: String, ty: ColumnType },
}

#[cfg(test)]
mod tests {
    use super::*;
    use polars::prelude::*;

    #[test]
    fn test_table_ref_display() {
        let table = TableRef::new("settlement", "raw_fuelhh");
        assert_eq!(table.to_string(), "settlement.raw_fuelhh");
    }

    #[test]
    fn test_column_type_polars_round_trip() {
        for ty in [
            ColumnType::String,
            ColumnType::Integer,
            ColumnType::Float,
            ColumnType::Boolean,
            ColumnType::Timestamp,
        ] {
            assert_eq!(ColumnType::from_polars(&ty.to_polars()), ty);
        }
    }

    #[test]
    fn test_schema_from_frame() {
        let df = DataFrame::new(vec![
            Column::new("a".into(), vec![1i64]),
            Column::new("b".into(), vec!["x"]),
            Column::new("c".into(), vec![true]),
        ])
        .unwrap();
        let schema = TableSchema::from_frame(&df);
        assert_eq!(schema.column_type("a"), Some(ColumnType::Integer));
        assert_eq!(schema.column_type("b"), Some(ColumnType::String));
        assert_eq!(schema.column_type("c"), Some(ColumnType::Boolean));
        assert_eq!(schema.column_names(), vec!["a", "b", "c"]);
        assert!(!schema.contains("missing"));
    }

    #[test]
    fn test_schema_serde_round_trip() {
        let schema = TableSchema {
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
        };
        let json = serde_json::to_string(&schema).unwrap();
        let back: TableSchema = serde_json::from_str(&json).unwrap();
        assert_eq!(schema, back);
    }
}
