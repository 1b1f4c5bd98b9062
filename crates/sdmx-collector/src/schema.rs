//! Table schema derivation and value coercion

use crate::model::{Dsd, Record};
use sdmx_common::ident::column_name;
use serde::ser::SerializeTuple;
use serde::{Serialize, Serializer};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;

/// Width of the time column
pub const TIME_COLUMN_WIDTH: usize = 20;

/// Minimum width of the query column
pub const QUERY_COLUMN_WIDTH: usize = 255;

/// Name of the column recording which key filter produced a row
pub const QUERY_COLUMN: &str = "query";

/// Column type understood by the downstream loader
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    Text,
    Varchar(usize),
    Float,
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ColumnType::Text => write!(f, "TEXT"),
            ColumnType::Varchar(width) => write!(f, "VARCHAR({width})"),
            ColumnType::Float => write!(f, "FLOAT"),
        }
    }
}

impl Serialize for ColumnType {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Where a column takes its values from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ColumnSource {
    /// A record key (DSD component id)
    Component(String),
    /// The key filter of the fetch
    Query,
}

/// One output column; serialized as a `(name, type)` pair
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Column {
    pub name: String,
    pub column_type: ColumnType,
    pub source: ColumnSource,
}

impl Column {
    fn component(id: &str, column_type: ColumnType) -> Self {
        Self {
            name: column_name(id),
            column_type,
            source: ColumnSource::Component(id.to_string()),
        }
    }
}

impl Serialize for Column {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut tuple = serializer.serialize_tuple(2)?;
        tuple.serialize_element(&self.name)?;
        tuple.serialize_element(&self.column_type)?;
        tuple.end()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WritePolicy {
    /// Delete rows matching `delete_keys`, then bulk insert
    DeleteBulkInsert,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TableSchema {
    pub target_table: String,
    pub columns: Vec<Column>,
    pub write_policy: WritePolicy,
    pub chunk_size: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delete_keys: Option<BTreeMap<String, String>>,
}

fn codelist_type(dsd: &Dsd, list_id: &str) -> ColumnType {
    dsd.codes(list_id)
        .map(|c| c.code.chars().count())
        .max()
        .map_or(ColumnType::Text, |longest| ColumnType::Varchar(longest.max(1)))
}

/// Derive the output table of a DSD.
///
/// Coded components are sized from their longest code, uncoded ones are
/// unbounded text. The time column is fixed width, the measure a float,
/// and a trailing `query` column keys the delete-then-insert policy.
pub fn derive_schema(dsd: &Dsd, target_table: &str, query: &str, chunk_size: usize) -> TableSchema {
    let mut columns: Vec<Column> = Vec::new();

    for component in dsd.dimensions.iter().chain(&dsd.attributes) {
        let column_type = component
            .codelist
            .as_deref()
            .map_or(ColumnType::Text, |list_id| codelist_type(dsd, list_id));
        let column = Column::component(&component.id, column_type);
        if !columns.iter().any(|c| c.name == column.name) {
            columns.push(column);
        }
    }

    columns.push(Column::component(
        &dsd.time_dimension,
        ColumnType::Varchar(TIME_COLUMN_WIDTH),
    ));
    columns.push(Column::component(&dsd.primary_measure, ColumnType::Float));
    columns.push(Column {
        name: QUERY_COLUMN.to_string(),
        column_type: ColumnType::Varchar(query.chars().count().max(QUERY_COLUMN_WIDTH)),
        source: ColumnSource::Query,
    });

    TableSchema {
        target_table: target_table.to_string(),
        columns,
        write_policy: WritePolicy::DeleteBulkInsert,
        chunk_size,
        delete_keys: Some(BTreeMap::from([(QUERY_COLUMN.to_string(), query.to_string())])),
    }
}

/// Parse a float column value; anything unparseable or non-finite is null.
pub fn coerce_float(raw: &str) -> Value {
    raw.trim()
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
        .and_then(serde_json::Number::from_f64)
        .map_or(Value::Null, Value::Number)
}

impl TableSchema {
    /// Project a raw record onto the schema's columns.
    pub fn coerce_record(&self, record: &Record, query: &str) -> Map<String, Value> {
        self.columns
            .iter()
            .map(|column| {
                let value = match &column.source {
                    ColumnSource::Query => Value::String(query.to_string()),
                    ColumnSource::Component(key) => match record.get(key).and_then(Option::as_deref) {
                        None => Value::Null,
                        Some(raw) if column.column_type == ColumnType::Float => coerce_float(raw),
                        Some(raw) => Value::String(raw.to_string()),
                    },
                };
                (column.name.clone(), value)
            })
            .collect()
    }
}
