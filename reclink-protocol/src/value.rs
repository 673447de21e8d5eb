//! Typed decoding of raw wire strings.
//!
//! Every property travels as a bare string; its descriptor's [`DataType`]
//! says how to interpret it. Timestamp interpretation depends on the
//! negotiated version: revisions before the UTC era encode backend-local wall
//! clock time, later revisions encode UTC.

use crate::error::ProtocolError;
use crate::version::ProtocolVersion;
use chrono::{DateTime, NaiveDateTime, NaiveTime, TimeZone, Utc};

/// Wire data type of a property.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DataType {
    Integer,
    String,
    Date,
    Time,
    Boolean,
    Float,
    Bitmask,
    Blob,
}

/// A decoded property value.
#[derive(Debug, Clone, PartialEq)]
pub enum TypedValue {
    Integer(i64),
    Text(String),
    /// UTC-era timestamp.
    Date(DateTime<Utc>),
    /// Pre-UTC-era timestamp: backend-local wall clock, zone unknown to the
    /// client.
    DateLocal(NaiveDateTime),
    Time(NaiveTime),
    Boolean(bool),
    Float(f64),
    Bitmask(u64),
    Blob(Vec<u8>),
}

const DATE_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

/// Decodes a raw wire string according to `data_type` and the version era.
pub fn decode(
    raw: &str,
    data_type: DataType,
    version: ProtocolVersion,
) -> Result<TypedValue, ProtocolError> {
    match data_type {
        DataType::Integer => raw
            .parse::<i64>()
            .map(TypedValue::Integer)
            .map_err(|_| decode_err("integer", raw)),
        DataType::String => Ok(TypedValue::Text(raw.to_string())),
        DataType::Date => decode_date(raw, version),
        DataType::Time => NaiveTime::parse_from_str(raw, "%H:%M:%S")
            .map(TypedValue::Time)
            .map_err(|_| decode_err("time", raw)),
        DataType::Boolean => match raw {
            "0" => Ok(TypedValue::Boolean(false)),
            "1" => Ok(TypedValue::Boolean(true)),
            _ => Err(decode_err("boolean", raw)),
        },
        DataType::Float => raw
            .parse::<f64>()
            .map(TypedValue::Float)
            .map_err(|_| decode_err("float", raw)),
        DataType::Bitmask => raw
            .parse::<u64>()
            .or_else(|_| raw.parse::<i64>().map(|n| n as u64))
            .map(TypedValue::Bitmask)
            .map_err(|_| decode_err("bitmask", raw)),
        DataType::Blob => Ok(TypedValue::Blob(raw.as_bytes().to_vec())),
    }
}

/// Encodes a typed value back into its wire string.
pub fn encode(value: &TypedValue) -> String {
    match value {
        TypedValue::Integer(n) => n.to_string(),
        TypedValue::Text(s) => s.clone(),
        TypedValue::Date(dt) => dt.timestamp().to_string(),
        TypedValue::DateLocal(dt) => dt.format(DATE_FORMAT).to_string(),
        TypedValue::Time(t) => t.format("%H:%M:%S").to_string(),
        TypedValue::Boolean(b) => if *b { "1" } else { "0" }.to_string(),
        TypedValue::Float(f) => f.to_string(),
        TypedValue::Bitmask(m) => m.to_string(),
        TypedValue::Blob(b) => String::from_utf8_lossy(b).into_owned(),
    }
}

fn decode_date(raw: &str, version: ProtocolVersion) -> Result<TypedValue, ProtocolError> {
    if version.utc_timestamps() {
        // UTC era: epoch seconds or ISO-8601, both UTC.
        if let Ok(secs) = raw.parse::<i64>() {
            return Utc
                .timestamp_opt(secs, 0)
                .single()
                .map(TypedValue::Date)
                .ok_or_else(|| decode_err("date", raw));
        }
        NaiveDateTime::parse_from_str(raw.trim_end_matches('Z'), DATE_FORMAT)
            .map(|naive| TypedValue::Date(naive.and_utc()))
            .map_err(|_| decode_err("date", raw))
    } else {
        // Pre-UTC era: backend-local wall clock.
        NaiveDateTime::parse_from_str(raw, DATE_FORMAT)
            .or_else(|_| NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S"))
            .map(TypedValue::DateLocal)
            .map_err(|_| decode_err("date", raw))
    }
}

fn decode_err(kind: &'static str, raw: &str) -> ProtocolError {
    ProtocolError::ValueDecode {
        kind,
        raw: raw.to_string(),
    }
}
