//! Concrete response-message schemas.
//!
//! The backend describes programs and recordings as flat positional lists.
//! Recording info shares the program field block and appends its own fields;
//! composition is schema concatenation, not inheritance. Capability traits
//! (`HasChannelId`, `HasCallsign`) give callers polymorphism over "carries
//! these fields" without a type hierarchy.

use crate::error::ProtocolError;
use crate::range::VersionRange;
use crate::schema::{PropertyDescriptor, PropertyList, PropertySchema};
use crate::value::{DataType, TypedValue};
use crate::version::ProtocolVersion;
use std::sync::OnceLock;

fn v(numeric: i32) -> ProtocolVersion {
    ProtocolVersion::from_numeric(numeric)
        .expect("message schema references a version missing from the catalogue")
}

fn full() -> VersionRange<ProtocolVersion> {
    VersionRange::new(ProtocolVersion::INITIAL, ProtocolVersion::LATEST)
        .expect("full range is always valid")
}

fn since(numeric: i32) -> VersionRange<ProtocolVersion> {
    VersionRange::new(v(numeric), ProtocolVersion::LATEST)
        .expect("open range is always valid")
}

fn between(from: i32, to: i32) -> VersionRange<ProtocolVersion> {
    VersionRange::new(v(from), v(to)).expect("message schema range misdeclared")
}

/// The field block shared by every program-shaped message.
fn program_fields() -> Vec<PropertyDescriptor> {
    vec![
        PropertyDescriptor::new("title", DataType::String, full()),
        PropertyDescriptor::new("subtitle", DataType::String, full()),
        PropertyDescriptor::new("description", DataType::String, full()),
        PropertyDescriptor::new("season", DataType::Integer, since(69)).with_default("0"),
        PropertyDescriptor::new("episode", DataType::Integer, since(69)).with_default("0"),
        PropertyDescriptor::new("total_episodes", DataType::Integer, since(85))
            .with_default("0"),
        PropertyDescriptor::new("category", DataType::String, full()),
        PropertyDescriptor::new("chanid", DataType::Integer, full()).with_default("0"),
        PropertyDescriptor::new("channum", DataType::String, full()),
        PropertyDescriptor::new("callsign", DataType::String, full()),
        PropertyDescriptor::new("channel_name", DataType::String, full()),
        PropertyDescriptor::new("filename", DataType::String, full()),
        // Once transmitted as two 32-bit halves; the halves survive only as
        // a declared placeholder so old field tables still line up.
        PropertyDescriptor::new("file_size_halves", DataType::String, between(8, 66))
            .skipped(),
        PropertyDescriptor::new("file_size", DataType::Integer, since(66)).with_default("0"),
        PropertyDescriptor::new("start_ts", DataType::Date, full()),
        PropertyDescriptor::new("end_ts", DataType::Date, full()),
        PropertyDescriptor::new("find_id", DataType::Integer, full()).with_default("0"),
        PropertyDescriptor::new("hostname", DataType::String, full()),
        PropertyDescriptor::new("inetref", DataType::String, since(69)),
        PropertyDescriptor::new("program_flags", DataType::Bitmask, since(14))
            .with_default("0"),
    ]
}

/// Fields appended by recording-shaped messages.
fn recording_fields() -> Vec<PropertyDescriptor> {
    vec![
        PropertyDescriptor::new("record_id", DataType::Integer, full()).with_default("0"),
        PropertyDescriptor::new("rec_type", DataType::Integer, full()).with_default("0"),
        PropertyDescriptor::new("rec_status", DataType::Integer, full()).with_default("0"),
        PropertyDescriptor::new("rec_priority", DataType::Integer, full()).with_default("0"),
        PropertyDescriptor::new("rec_group", DataType::String, since(14))
            .with_default("Default"),
        PropertyDescriptor::new("storage_group", DataType::String, since(40))
            .with_default("Default"),
        PropertyDescriptor::new("rec_start_ts", DataType::Date, full()),
        PropertyDescriptor::new("rec_end_ts", DataType::Date, full()),
    ]
}

/// Schema for program-info replies.
pub fn program_info_schema() -> &'static PropertySchema {
    static SCHEMA: OnceLock<PropertySchema> = OnceLock::new();
    SCHEMA.get_or_init(|| {
        PropertySchema::builder("program_info", full())
            .fields(program_fields())
            .build()
            .expect("program_info schema misdeclared")
    })
}

/// Schema for recording-info replies: the program block plus recording
/// fields.
pub fn recording_info_schema() -> &'static PropertySchema {
    static SCHEMA: OnceLock<PropertySchema> = OnceLock::new();
    SCHEMA.get_or_init(|| {
        PropertySchema::builder("recording_info", full())
            .fields(program_fields())
            .fields(recording_fields())
            .build()
            .expect("recording_info schema misdeclared")
    })
}

/// Messages whose field set includes a channel id.
pub trait HasChannelId {
    fn channel_id(&self) -> Result<Option<i64>, ProtocolError>;
}

/// Messages whose field set includes a station callsign.
pub trait HasCallsign {
    fn callsign(&self) -> Result<Option<String>, ProtocolError>;
}

/// A program-info reply.
#[derive(Debug, Clone)]
pub struct ProgramInfo {
    props: PropertyList,
}

impl ProgramInfo {
    pub fn new(version: ProtocolVersion) -> Self {
        Self {
            props: PropertyList::new(program_info_schema(), version),
        }
    }

    pub fn from_wire(
        version: ProtocolVersion,
        values: Vec<String>,
    ) -> Result<Self, ProtocolError> {
        Ok(Self {
            props: PropertyList::from_wire(program_info_schema(), version, values)?,
        })
    }

    pub fn props(&self) -> &PropertyList {
        &self.props
    }

    pub fn props_mut(&mut self) -> &mut PropertyList {
        &mut self.props
    }
}

/// A recording-info reply.
#[derive(Debug, Clone)]
pub struct RecordingInfo {
    props: PropertyList,
}

impl RecordingInfo {
    pub fn new(version: ProtocolVersion) -> Self {
        Self {
            props: PropertyList::new(recording_info_schema(), version),
        }
    }

    pub fn from_wire(
        version: ProtocolVersion,
        values: Vec<String>,
    ) -> Result<Self, ProtocolError> {
        Ok(Self {
            props: PropertyList::from_wire(recording_info_schema(), version, values)?,
        })
    }

    pub fn props(&self) -> &PropertyList {
        &self.props
    }

    pub fn props_mut(&mut self) -> &mut PropertyList {
        &mut self.props
    }
}

fn channel_id_of(props: &PropertyList) -> Result<Option<i64>, ProtocolError> {
    Ok(match props.get_typed("chanid")? {
        Some(TypedValue::Integer(id)) => Some(id),
        _ => None,
    })
}

impl HasChannelId for ProgramInfo {
    fn channel_id(&self) -> Result<Option<i64>, ProtocolError> {
        channel_id_of(&self.props)
    }
}

impl HasChannelId for RecordingInfo {
    fn channel_id(&self) -> Result<Option<i64>, ProtocolError> {
        channel_id_of(&self.props)
    }
}

impl HasCallsign for ProgramInfo {
    fn callsign(&self) -> Result<Option<String>, ProtocolError> {
        Ok(self.props.get("callsign")?.map(str::to_string))
    }
}

impl HasCallsign for RecordingInfo {
    fn callsign(&self) -> Result<Option<String>, ProtocolError> {
        Ok(self.props.get("callsign")?.map(str::to_string))
    }
}
