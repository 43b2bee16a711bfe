//! # Result Tables
//!
//! Typed decoding of the query API response:
//!
//! ```json
//! { "tables": [ { "name": "PrimaryResult",
//!                 "columns": [ { "name": "timestamp", "type": "datetime" }, ... ],
//!                 "rows": [ [ "2024-01-01T00:00:00Z", 12 ], ... ] } ] }
//! ```

use crate::error::StoreError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as Json;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnType {
    String,
    Long,
    Real,
    Datetime,
}

impl ColumnType {
    /// Column type named by the API. `int` decodes as long; anything
    /// unknown decodes as string.
    pub fn from_api(name: &str) -> Self {
        match name.to_ascii_lowercase().as_str() {
            "long" | "int" => Self::Long,
            "real" | "double" | "decimal" => Self::Real,
            "datetime" => Self::Datetime,
            _ => Self::String,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Column {
    pub name: String,
    #[serde(rename = "type")]
    pub column_type: ColumnType,
}

impl Column {
    pub fn new(name: impl Into<String>, column_type: ColumnType) -> Self {
        Self {
            name: name.into(),
            column_type,
        }
    }
}

/// One decoded cell.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Long(i64),
    Real(f64),
    Datetime(DateTime<Utc>),
    String(String),
}

impl Value {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Long(v) => Some(*v as f64),
            Self::Real(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_datetime(&self) -> Option<DateTime<Utc>> {
        match self {
            Self::Datetime(dt) => Some(*dt),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => Ok(()),
            Self::Long(v) => write!(f, "{v}"),
            Self::Real(v) => write!(f, "{v}"),
            Self::Datetime(dt) => write!(f, "{}", dt.to_rfc3339()),
            Self::String(s) => f.write_str(s),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TableResult {
    pub columns: Vec<Column>,
    pub rows: Vec<Vec<Value>>,
}

impl TableResult {
    /// Decode every table of a query API response body.
    pub fn from_response(body: &Json) -> Result<Vec<TableResult>, StoreError> {
        body.get("tables")
            .and_then(Json::as_array)
            .ok_or_else(|| StoreError::Decode("response has no 'tables' array".into()))?
            .iter()
            .map(Self::from_json)
            .collect()
    }

    /// Decode a single `{columns, rows}` table.
    pub fn from_json(table: &Json) -> Result<TableResult, StoreError> {
        let columns = table
            .get("columns")
            .and_then(Json::as_array)
            .ok_or_else(|| StoreError::Decode("table has no 'columns' array".into()))?
            .iter()
            .map(|column| {
                let name = column
                    .get("name")
                    .and_then(Json::as_str)
                    .ok_or_else(|| StoreError::Decode("column without name".into()))?;
                let column_type = column
                    .get("type")
                    .and_then(Json::as_str)
                    .map(ColumnType::from_api)
                    .unwrap_or(ColumnType::String);
                Ok(Column::new(name, column_type))
            })
            .collect::<Result<Vec<_>, StoreError>>()?;

        let rows = table
            .get("rows")
            .and_then(Json::as_array)
            .map(Vec::as_slice)
            .unwrap_or_default()
            .iter()
            .map(|row| {
                let cells = row
                    .as_array()
                    .ok_or_else(|| StoreError::Decode("row is not an array".into()))?;
                columns
                    .iter()
                    .zip(cells)
                    .map(|(column, cell)| decode_cell(column.column_type, cell))
                    .collect::<Result<Vec<_>, StoreError>>()
            })
            .collect::<Result<Vec<_>, StoreError>>()?;

        Ok(TableResult { columns, rows })
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

fn decode_cell(column_type: ColumnType, cell: &Json) -> Result<Value, StoreError> {
    if cell.is_null() {
        return Ok(Value::Null);
    }
    let invalid = || StoreError::Decode(format!("cannot read {cell} as {column_type:?}"));

    match column_type {
        ColumnType::String => Ok(Value::String(match cell {
            Json::String(s) => s.clone(),
            other => other.to_string(),
        })),
        ColumnType::Long => match cell {
            Json::String(s) if s == "NaN" => Ok(Value::Long(0)),
            Json::String(s) => s.trim().parse().map(Value::Long).map_err(|_| invalid()),
            Json::Number(n) => n
                .as_i64()
                .or_else(|| n.as_f64().map(|f| f as i64))
                .map(Value::Long)
                .ok_or_else(invalid),
            Json::Bool(b) => Ok(Value::Long(i64::from(*b))),
            _ => Err(invalid()),
        },
        ColumnType::Real => match cell {
            Json::String(s) if s == "NaN" => Ok(Value::Real(0.0)),
            Json::String(s) => s.trim().parse().map(Value::Real).map_err(|_| invalid()),
            Json::Number(n) => n.as_f64().map(Value::Real).ok_or_else(invalid),
            _ => Err(invalid()),
        },
        ColumnType::Datetime => cell
            .as_str()
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|dt| Value::Datetime(dt.with_timezone(&Utc)))
            .ok_or_else(invalid),
    }
}
