//! Conversion between [`Dataset`] and polars [`DataFrame`].
//!
//! Providers hand back data frames of arbitrary shape; [`Dataset::from_frame`]
//! normalizes them against an explicit [`Schema`] and rejects anything that
//! does not fit. [`Dataset::to_frame`] produces the frame the presentation
//! layer consumes.

use chrono::{DateTime, NaiveDate, Utc};
use polars::prelude::*;

use crate::{
    dataset::Dataset,
    error::{DeskError, Result},
    types::{ColumnType, Record, Schema, Symbol, Value},
};

/// Name of the security column in provider frames.
pub const SYMBOL_COLUMN: &str = "symbol";
/// Name of the date column in provider frames.
pub const DATE_COLUMN: &str = "date";

impl Dataset {
    /// Builds a dataset from a provider frame, stamped with `fetched_at`.
    ///
    /// See [`Dataset::to_frame`] for the expected layout.
    pub fn from_frame(
        name: &str,
        schema: &Schema,
        frame: &DataFrame,
        fetched_at: DateTime<Utc>,
    ) -> Result<Self> {
        dataset_from_frame(name, schema, frame, fetched_at)
    }

    /// Converts the dataset to a frame with `symbol`, `date` and schema columns.
    pub fn to_frame(&self) -> Result<DataFrame> {
        let storage = |e: PolarsError| DeskError::storage(self.name(), e);
        let records = self.records();

        let mut columns = Vec::with_capacity(self.schema().len() + 2);
        columns.push(Column::new(
            PlSmallStr::from(SYMBOL_COLUMN),
            records
                .iter()
                .map(|r| r.symbol.as_str().to_string())
                .collect::<Vec<_>>(),
        ));
        columns.push(Column::new(
            PlSmallStr::from(DATE_COLUMN),
            records
                .iter()
                .map(|r| r.date.to_string())
                .collect::<Vec<_>>(),
        ));

        for (i, spec) in self.schema().columns().iter().enumerate() {
            let name = PlSmallStr::from(spec.name.as_str());
            let column = match spec.kind {
                ColumnType::Float => Column::new(
                    name,
                    records
                        .iter()
                        .map(|r| r.values[i].as_f64())
                        .collect::<Vec<Option<f64>>>(),
                ),
                ColumnType::Int => Column::new(
                    name,
                    records
                        .iter()
                        .map(|r| r.values[i].as_i64())
                        .collect::<Vec<Option<i64>>>(),
                ),
                ColumnType::Text => Column::new(
                    name,
                    records
                        .iter()
                        .map(|r| r.values[i].as_str().map(str::to_string))
                        .collect::<Vec<Option<String>>>(),
                ),
                ColumnType::Bool => Column::new(
                    name,
                    records
                        .iter()
                        .map(|r| r.values[i].as_bool())
                        .collect::<Vec<Option<bool>>>(),
                ),
            };
            columns.push(column);
        }

        DataFrame::new(columns)
            .map_err(storage)?
            .lazy()
            .with_column(col(DATE_COLUMN).cast(DataType::Date))
            .collect()
            .map_err(storage)
    }
}

/// Normalizes a provider frame into a [`Dataset`] conforming to `schema`.
///
/// The frame must contain `symbol`, `date` and every schema column; extra
/// columns are ignored. Numeric columns are widened to the declared type,
/// anything else that does not match is a [`DeskError::SchemaViolation`].
fn dataset_from_frame(
    name: &str,
    schema: &Schema,
    frame: &DataFrame,
    fetched_at: DateTime<Utc>,
) -> Result<Dataset> {
    let violation = |reason: String| DeskError::schema(name, reason);
    let height = frame.height();

    let symbols = column_as(frame, name, SYMBOL_COLUMN, &DataType::String)?;
    let symbols = symbols.str().map_err(|e| violation(e.to_string()))?;
    let dates = read_dates(frame, name)?;

    let mut cells: Vec<Vec<Value>> = Vec::with_capacity(schema.len());
    for spec in schema.columns() {
        let source = frame
            .column(&spec.name)
            .map_err(|_| violation(format!("missing column {}", spec.name)))?;
        if !accepts(spec.kind, source.dtype()) {
            return Err(violation(format!(
                "column {} expects {}, provider sent {}",
                spec.name,
                spec.kind,
                source.dtype()
            )));
        }
        cells.push(read_values(source, spec.kind, name)?);
    }

    let mut records = Vec::with_capacity(height);
    for row in 0..height {
        let symbol = symbols
            .get(row)
            .ok_or_else(|| violation(format!("row {row} has no symbol")))?;
        let date = dates[row].ok_or_else(|| violation(format!("row {row} has no date")))?;
        let values = cells.iter().map(|column| column[row].clone()).collect();
        records.push(Record::new(Symbol::new(symbol), date, values));
    }

    Ok(Dataset::from_records(name, schema.clone(), records)?.with_last_updated(fetched_at))
}

fn accepts(kind: ColumnType, dtype: &DataType) -> bool {
    match kind {
        ColumnType::Float => dtype.is_primitive_numeric() || dtype == &DataType::Null,
        ColumnType::Int => dtype.is_integer() || dtype == &DataType::Null,
        ColumnType::Text => matches!(dtype, DataType::String | DataType::Null),
        ColumnType::Bool => matches!(dtype, DataType::Boolean | DataType::Null),
    }
}

fn column_as(frame: &DataFrame, dataset: &str, name: &str, dtype: &DataType) -> Result<Column> {
    frame
        .column(name)
        .map_err(|_| DeskError::schema(dataset, format!("missing column {name}")))?
        .cast(dtype)
        .map_err(|e| DeskError::schema(dataset, format!("column {name}: {e}")))
}

fn read_dates(frame: &DataFrame, dataset: &str) -> Result<Vec<Option<NaiveDate>>> {
    let source = frame
        .column(DATE_COLUMN)
        .map_err(|_| DeskError::schema(dataset, "missing column date"))?;
    let as_date = match source.dtype() {
        DataType::Date => source.clone(),
        DataType::Datetime(_, _) | DataType::String => source
            .cast(&DataType::Date)
            .map_err(|e| DeskError::schema(dataset, format!("column date: {e}")))?,
        other => {
            return Err(DeskError::schema(
                dataset,
                format!("column date expects a date, provider sent {other}"),
            ));
        }
    };
    let text = as_date
        .cast(&DataType::String)
        .map_err(|e| DeskError::schema(dataset, format!("column date: {e}")))?;
    let text = text
        .str()
        .map_err(|e| DeskError::schema(dataset, e.to_string()))?;

    let mut dates = Vec::with_capacity(frame.height());
    for row in 0..frame.height() {
        let parsed = match text.get(row) {
            Some(s) => Some(NaiveDate::parse_from_str(s, "%Y-%m-%d").map_err(|e| {
                DeskError::schema(dataset, format!("row {row}: bad date {s:?}: {e}"))
            })?),
            None => None,
        };
        dates.push(parsed);
    }
    Ok(dates)
}

fn read_values(source: &Column, kind: ColumnType, dataset: &str) -> Result<Vec<Value>> {
    let fail = |e: PolarsError| DeskError::schema(dataset, format!("{}: {e}", source.name()));
    let height = source.len();
    let values = match kind {
        ColumnType::Float => {
            let cast = source.cast(&DataType::Float64).map_err(fail)?;
            let ca = cast.f64().map_err(fail)?;
            (0..height).map(|i| Value::from(ca.get(i))).collect()
        }
        ColumnType::Int => {
            let cast = source.cast(&DataType::Int64).map_err(fail)?;
            let ca = cast.i64().map_err(fail)?;
            (0..height).map(|i| Value::from(ca.get(i))).collect()
        }
        ColumnType::Text => {
            let cast = source.cast(&DataType::String).map_err(fail)?;
            let ca = cast.str().map_err(fail)?;
            (0..height).map(|i| Value::from(ca.get(i))).collect()
        }
        ColumnType::Bool => {
            let cast = source.cast(&DataType::Boolean).map_err(fail)?;
            let ca = cast.bool().map_err(fail)?;
            (0..height).map(|i| Value::from(ca.get(i))).collect()
        }
    };
    Ok(values)
}
