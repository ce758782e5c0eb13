//! Newline-delimited JSON encoding of staged batches.
//!
//! The format is the one accepted by warehouse JSON load jobs: one object per line keyed by field
//! name, integers and floats as numbers, timestamps as RFC 3339 text, civil date times as
//! `YYYY-MM-DD HH:MM:SS.ffffff` and bytes as standard base64. Absent fields are omitted.

use base64::{Engine, prelude::BASE64_STANDARD};
use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};
use serde_json::{Map, Number, Value};

use crate::error::{ErrorKind, EtlResult};
use crate::types::{Cell, DestinationRecord, FieldSchema, FieldType, TableSchema};
use crate::{bail, etl_error};

const DATETIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.6f";

/// Accepted when decoding, in addition to [`DATETIME_FORMAT`].
const DATETIME_PARSE_FORMATS: [&str; 2] = ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"];

/// Encodes `records` as newline-delimited JSON.
///
/// Record entries without a field in `schema` are skipped.
pub fn encode_batch(schema: &TableSchema, records: &[DestinationRecord]) -> EtlResult<Vec<u8>> {
    let mut data = Vec::new();

    for record in records {
        let object = encode_record(schema, record)?;
        serde_json::to_writer(&mut data, &Value::Object(object))?;
        data.push(b'\n');
    }

    Ok(data)
}

/// Encodes a single record as a JSON object.
pub fn encode_record(
    schema: &TableSchema,
    record: &DestinationRecord,
) -> EtlResult<Map<String, Value>> {
    let mut object = Map::new();

    for field in &schema.fields {
        if let Some(cell) = record.get(&field.name) {
            object.insert(field.name.clone(), encode_cell(cell, field)?);
        }
    }

    Ok(object)
}

fn encode_cell(cell: &Cell, field: &FieldSchema) -> EtlResult<Value> {
    let value = match (cell, field.field_type) {
        (Cell::Null, _) => Value::Null,
        (Cell::Integer(value), FieldType::Int64) => Value::from(*value),
        (Cell::Integer(value), FieldType::Float64) => encode_float(*value as f64),
        (Cell::Float(value), FieldType::Float64) => encode_float(*value),
        (Cell::Text(value), FieldType::String) => Value::String(value.clone()),
        (Cell::Boolean(value), FieldType::Bool) => Value::Bool(*value),
        (Cell::Timestamp(value), FieldType::Timestamp) => {
            Value::String(value.to_rfc3339_opts(SecondsFormat::Micros, true))
        }
        (Cell::Timestamp(value), FieldType::Datetime) => {
            Value::String(value.format(DATETIME_FORMAT).to_string())
        }
        (Cell::Binary(value), FieldType::Bytes) => Value::String(BASE64_STANDARD.encode(value)),
        (cell, field_type) => bail!(
            ErrorKind::LoadSchemaValidationFailed,
            "Record value does not match the destination field type",
            format!(
                "field `{}`: {} value cannot be written as {field_type}",
                field.name,
                cell.value_type()
            )
        ),
    };

    Ok(value)
}

/// JSON has no representation for non-finite numbers, so they are written as the strings
/// warehouses accept for them.
fn encode_float(value: f64) -> Value {
    match Number::from_f64(value) {
        Some(number) => Value::Number(number),
        None if value.is_nan() => Value::String("NaN".to_owned()),
        None if value.is_sign_positive() => Value::String("Infinity".to_owned()),
        None => Value::String("-Infinity".to_owned()),
    }
}

/// Decodes a staged batch back into records, validating every value against `schema`.
///
/// A line that is not a JSON object fails with [`ErrorKind::LoadStagingIoFailed`]. Unknown
/// fields and values that do not fit their field fail with
/// [`ErrorKind::LoadSchemaValidationFailed`].
pub fn decode_batch(schema: &TableSchema, data: &[u8]) -> EtlResult<Vec<DestinationRecord>> {
    data.split(|byte| *byte == b'\n')
        .enumerate()
        .filter(|(_, line)| !line.iter().all(u8::is_ascii_whitespace))
        .map(|(line_number, line)| {
            let object = serde_json::from_slice::<Map<String, Value>>(line).map_err(|err| {
                etl_error!(
                    ErrorKind::LoadStagingIoFailed,
                    "Staged batch is not valid newline-delimited JSON",
                    format!("line {}", line_number + 1),
                    source: err
                )
            })?;

            decode_record(schema, object)
        })
        .collect()
}

fn decode_record(schema: &TableSchema, object: Map<String, Value>) -> EtlResult<DestinationRecord> {
    let mut record = DestinationRecord::new();

    for (name, value) in object {
        let Some(field) = schema.field(&name) else {
            bail!(
                ErrorKind::LoadSchemaValidationFailed,
                "Staged row has a field unknown to the destination table",
                name
            );
        };

        let cell = decode_value(value, field)?;
        record.insert(name, cell);
    }

    Ok(record)
}

fn decode_value(value: Value, field: &FieldSchema) -> EtlResult<Cell> {
    let cell = match (value, field.field_type) {
        (Value::Null, _) => Some(Cell::Null),
        (Value::Number(number), FieldType::Int64) => number.as_i64().map(Cell::Integer),
        (Value::Number(number), FieldType::Float64) => number.as_f64().map(Cell::Float),
        (Value::String(value), FieldType::Float64) => match value.as_str() {
            "NaN" => Some(Cell::Float(f64::NAN)),
            "Infinity" => Some(Cell::Float(f64::INFINITY)),
            "-Infinity" => Some(Cell::Float(f64::NEG_INFINITY)),
            _ => None,
        },
        (Value::String(value), FieldType::String) => Some(Cell::Text(value)),
        (Value::Bool(value), FieldType::Bool) => Some(Cell::Boolean(value)),
        (Value::String(value), FieldType::Timestamp) => DateTime::parse_from_rfc3339(&value)
            .ok()
            .map(|timestamp| Cell::Timestamp(timestamp.with_timezone(&Utc))),
        (Value::String(value), FieldType::Datetime) => DATETIME_PARSE_FORMATS
            .iter()
            .find_map(|format| NaiveDateTime::parse_from_str(&value, format).ok())
            .map(|datetime| Cell::Timestamp(datetime.and_utc())),
        (Value::String(value), FieldType::Bytes) => {
            BASE64_STANDARD.decode(value).ok().map(Cell::Binary)
        }
        _ => None,
    };

    let Some(cell) = cell else {
        bail!(
            ErrorKind::LoadSchemaValidationFailed,
            "Staged value does not fit the destination field",
            format!("field `{}` of type {}", field.name, field.field_type)
        );
    };

    Ok(cell)
}
