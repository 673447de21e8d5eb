//! Positional property schemas.
//!
//! A response message is declared once as an ordered list of named fields,
//! each carrying its own version range. The wire position of a field is not
//! fixed: resolving the schema against a negotiated version filters out the
//! fields that version does not carry and re-indexes the survivors in
//! declaration order. Callers always address fields by name; the resolved
//! schema owns the name-to-position mapping.

use crate::error::ProtocolError;
use crate::range::VersionRange;
use crate::value::{self, DataType, TypedValue};
use crate::version::ProtocolVersion;
use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// Declaration of one named field within a schema.
///
/// Version-independent: the same descriptor object serves every negotiated
/// version, resolution decides whether it is active.
#[derive(Debug, Clone)]
pub struct PropertyDescriptor {
    name: &'static str,
    data_type: DataType,
    range: VersionRange<ProtocolVersion>,
    default_value: Option<&'static str>,
    skip: bool,
}

impl PropertyDescriptor {
    pub fn new(
        name: &'static str,
        data_type: DataType,
        range: VersionRange<ProtocolVersion>,
    ) -> Self {
        Self {
            name,
            data_type,
            range,
            default_value: None,
            skip: false,
        }
    }

    /// Value substituted when a new outgoing message leaves the field unset.
    pub fn with_default(mut self, default: &'static str) -> Self {
        self.default_value = Some(default);
        self
    }

    /// Marks the field as declared but never serialized (legacy placeholder).
    pub fn skipped(mut self) -> Self {
        self.skip = true;
        self
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn data_type(&self) -> DataType {
        self.data_type
    }

    pub fn range(&self) -> &VersionRange<ProtocolVersion> {
        &self.range
    }
}

/// Result of looking a property name up for a specific version.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PropertyIndex {
    /// The field is active and sits at this wire position.
    Active(usize),
    /// The field is declared but the negotiated version does not carry it.
    NotSupported,
}

/// An ordered field declaration for one response-message kind.
#[derive(Debug)]
pub struct PropertySchema {
    name: &'static str,
    overall: VersionRange<ProtocolVersion>,
    fields: Vec<PropertyDescriptor>,
    cache: RwLock<HashMap<u16, Arc<ResolvedSchema>>>,
}

impl PropertySchema {
    pub fn builder(
        name: &'static str,
        overall: VersionRange<ProtocolVersion>,
    ) -> PropertySchemaBuilder {
        PropertySchemaBuilder {
            name,
            overall,
            fields: Vec::new(),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn overall_range(&self) -> &VersionRange<ProtocolVersion> {
        &self.overall
    }

    /// All declared fields, in declaration order.
    pub fn fields(&self) -> &[PropertyDescriptor] {
        &self.fields
    }

    /// Resolves the schema for `version`: filter inactive fields, re-index
    /// the survivors. Pure and version-stable, so the result is cached per
    /// version for the life of the process.
    pub fn resolve(&self, version: ProtocolVersion) -> Arc<ResolvedSchema> {
        if let Some(resolved) = self.cache.read().get(&version.ordinal()) {
            return Arc::clone(resolved);
        }

        let mut fields = Vec::new();
        let mut index_by_name = HashMap::new();
        for desc in &self.fields {
            if desc.skip || !desc.range.restrict(&self.overall).contains(version) {
                continue;
            }
            index_by_name.insert(desc.name, fields.len());
            fields.push(ResolvedField {
                name: desc.name,
                data_type: desc.data_type,
                default_value: desc.default_value,
            });
        }
        let declared = self.fields.iter().map(|d| d.name).collect();
        let resolved = Arc::new(ResolvedSchema {
            version,
            fields,
            index_by_name,
            declared,
        });

        self.cache
            .write()
            .entry(version.ordinal())
            .or_insert(resolved)
            .clone()
    }

    /// Number of active fields at `version`.
    pub fn property_count(&self, version: ProtocolVersion) -> usize {
        self.resolve(version).count()
    }

    /// Wire position of `name` at `version`.
    ///
    /// A declared-but-inactive field yields [`PropertyIndex::NotSupported`];
    /// a name the schema never declared is a programmer error and fails
    /// loudly.
    pub fn property_index(
        &self,
        name: &str,
        version: ProtocolVersion,
    ) -> Result<PropertyIndex, ProtocolError> {
        self.resolve(version).lookup(name)
    }
}

/// Builds a [`PropertySchema`], validating the declaration table.
pub struct PropertySchemaBuilder {
    name: &'static str,
    overall: VersionRange<ProtocolVersion>,
    fields: Vec<PropertyDescriptor>,
}

impl PropertySchemaBuilder {
    pub fn field(mut self, descriptor: PropertyDescriptor) -> Self {
        self.fields.push(descriptor);
        self
    }

    /// Appends a block of shared descriptors; schema composition is
    /// concatenation of field lists.
    pub fn fields(mut self, descriptors: impl IntoIterator<Item = PropertyDescriptor>) -> Self {
        self.fields.extend(descriptors);
        self
    }

    /// Validates and builds the schema.
    ///
    /// Duplicate names and field ranges that vanish when clipped to the
    /// schema's overall range are configuration errors, reported at build
    /// time rather than at message decode time.
    pub fn build(self) -> Result<PropertySchema, ProtocolError> {
        let mut seen = HashSet::new();
        for desc in &self.fields {
            if !seen.insert(desc.name) {
                return Err(ProtocolError::DuplicateField {
                    schema: self.name,
                    field: desc.name,
                });
            }
            if !desc.skip && desc.range.restrict(&self.overall).is_empty() {
                return Err(ProtocolError::FieldOutsideSchemaRange {
                    schema: self.name,
                    field: desc.name,
                });
            }
        }
        Ok(PropertySchema {
            name: self.name,
            overall: self.overall,
            fields: self.fields,
            cache: RwLock::new(HashMap::new()),
        })
    }
}

/// One active field in a resolved schema.
#[derive(Debug, Clone)]
pub struct ResolvedField {
    pub name: &'static str,
    pub data_type: DataType,
    pub default_value: Option<&'static str>,
}

/// A schema filtered and re-indexed for one negotiated version.
#[derive(Debug)]
pub struct ResolvedSchema {
    version: ProtocolVersion,
    fields: Vec<ResolvedField>,
    index_by_name: HashMap<&'static str, usize>,
    declared: HashSet<&'static str>,
}

impl ResolvedSchema {
    pub fn version(&self) -> ProtocolVersion {
        self.version
    }

    /// Active fields in wire order.
    pub fn fields(&self) -> &[ResolvedField] {
        &self.fields
    }

    /// Number of active fields.
    pub fn count(&self) -> usize {
        self.fields.len()
    }

    /// Looks up the wire position of `name`.
    pub fn lookup(&self, name: &str) -> Result<PropertyIndex, ProtocolError> {
        if let Some(&index) = self.index_by_name.get(name) {
            return Ok(PropertyIndex::Active(index));
        }
        if self.declared.contains(name) {
            return Ok(PropertyIndex::NotSupported);
        }
        Err(ProtocolError::UnknownProperty(name.to_string()))
    }
}

/// One response instance: a resolved schema plus the raw positional values.
#[derive(Debug, Clone)]
pub struct PropertyList {
    resolved: Arc<ResolvedSchema>,
    values: Vec<String>,
}

impl PropertyList {
    /// Creates a new outgoing message with every active field set to its
    /// default (empty when the descriptor declares none).
    pub fn new(schema: &PropertySchema, version: ProtocolVersion) -> Self {
        let resolved = schema.resolve(version);
        let values = resolved
            .fields()
            .iter()
            .map(|f| f.default_value.unwrap_or("").to_string())
            .collect();
        Self { resolved, values }
    }

    /// Wraps raw wire values received for this schema.
    ///
    /// The value count must match the active field count exactly; a mismatch
    /// means the catalogue disagrees with the backend about this version.
    pub fn from_wire(
        schema: &PropertySchema,
        version: ProtocolVersion,
        values: Vec<String>,
    ) -> Result<Self, ProtocolError> {
        let resolved = schema.resolve(version);
        if values.len() != resolved.count() {
            return Err(ProtocolError::ValueCountMismatch {
                got: values.len(),
                expected: resolved.count(),
            });
        }
        Ok(Self { resolved, values })
    }

    pub fn version(&self) -> ProtocolVersion {
        self.resolved.version()
    }

    pub fn schema(&self) -> &ResolvedSchema {
        &self.resolved
    }

    /// Number of fields carried at this version.
    pub fn count(&self) -> usize {
        self.values.len()
    }

    /// Reads the raw string value of `name`.
    ///
    /// Returns `Ok(None)` when the field is declared but inactive at this
    /// version; an undeclared name is an error.
    pub fn get(&self, name: &str) -> Result<Option<&str>, ProtocolError> {
        match self.resolved.lookup(name)? {
            PropertyIndex::Active(index) => Ok(Some(&self.values[index])),
            PropertyIndex::NotSupported => Ok(None),
        }
    }

    /// Reads and decodes `name` according to its declared data type.
    pub fn get_typed(&self, name: &str) -> Result<Option<TypedValue>, ProtocolError> {
        match self.resolved.lookup(name)? {
            PropertyIndex::Active(index) => {
                let field = &self.resolved.fields()[index];
                value::decode(&self.values[index], field.data_type, self.resolved.version())
                    .map(Some)
            }
            PropertyIndex::NotSupported => Ok(None),
        }
    }

    /// Writes the raw string value of `name`.
    ///
    /// Writing a field the negotiated version does not carry is a documented
    /// no-op (`Ok(false)`): callers set the ideal full field set at the
    /// object-model layer and the wire layer trims it. An undeclared name is
    /// an error.
    pub fn set(&mut self, name: &str, value: impl Into<String>) -> Result<bool, ProtocolError> {
        match self.resolved.lookup(name)? {
            PropertyIndex::Active(index) => {
                self.values[index] = value.into();
                Ok(true)
            }
            PropertyIndex::NotSupported => Ok(false),
        }
    }

    /// The raw values in wire order.
    pub fn values(&self) -> &[String] {
        &self.values
    }

    /// Consumes the list, yielding the wire arguments.
    pub fn into_values(self) -> Vec<String> {
        self.values
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v(numeric: i32) -> ProtocolVersion {
        ProtocolVersion::from_numeric(numeric).unwrap()
    }

    fn range(from: i32, to: i32) -> VersionRange<ProtocolVersion> {
        VersionRange::new(v(from), v(to)).unwrap()
    }

    fn open_range(from: i32) -> VersionRange<ProtocolVersion> {
        VersionRange::new(v(from), ProtocolVersion::LATEST).unwrap()
    }

    fn full_range() -> VersionRange<ProtocolVersion> {
        VersionRange::new(ProtocolVersion::INITIAL, ProtocolVersion::LATEST).unwrap()
    }

    /// Schema from the shifting-position scenario: A and C always present,
    /// B only in [40, 62).
    fn abc_schema() -> PropertySchema {
        PropertySchema::builder("abc", full_range())
            .field(PropertyDescriptor::new("a", DataType::String, full_range()))
            .field(PropertyDescriptor::new("b", DataType::String, range(40, 62)))
            .field(PropertyDescriptor::new("c", DataType::String, full_range()))
            .build()
            .unwrap()
    }

    #[test]
    fn test_resolution_filters_and_reindexes() {
        let schema = abc_schema();

        // Below b's range: b is filtered, c moves down to index 1.
        let low = schema.resolve(v(31));
        assert_eq!(low.count(), 2);
        assert_eq!(low.lookup("a").unwrap(), PropertyIndex::Active(0));
        assert_eq!(low.lookup("c").unwrap(), PropertyIndex::Active(1));
        assert_eq!(low.lookup("b").unwrap(), PropertyIndex::NotSupported);

        // Inside b's range: all three, declaration order preserved.
        let mid = schema.resolve(v(50));
        assert_eq!(mid.count(), 3);
        assert_eq!(mid.lookup("a").unwrap(), PropertyIndex::Active(0));
        assert_eq!(mid.lookup("b").unwrap(), PropertyIndex::Active(1));
        assert_eq!(mid.lookup("c").unwrap(), PropertyIndex::Active(2));
    }

    #[test]
    fn test_range_boundaries_during_resolution() {
        let schema = abc_schema();

        // from bound inclusive: b present at exactly 40.
        assert_eq!(
            schema.property_index("b", v(40)).unwrap(),
            PropertyIndex::Active(1)
        );
        // to bound exclusive: b absent at exactly 62.
        assert_eq!(
            schema.property_index("b", v(62)).unwrap(),
            PropertyIndex::NotSupported
        );
    }

    #[test]
    fn test_unknown_name_fails_loudly() {
        let schema = abc_schema();
        let err = schema.property_index("nope", v(50)).unwrap_err();
        assert!(matches!(err, ProtocolError::UnknownProperty(_)));
    }

    #[test]
    fn test_resolution_is_cached_and_deterministic() {
        let schema = abc_schema();
        let first = schema.resolve(v(50));
        let second = schema.resolve(v(50));
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(first.count(), second.count());
    }

    #[test]
    fn test_skip_fields_never_serialize() {
        let schema = PropertySchema::builder("with_skip", full_range())
            .field(PropertyDescriptor::new("real", DataType::String, full_range()))
            .field(
                PropertyDescriptor::new("legacy_pad", DataType::String, full_range()).skipped(),
            )
            .build()
            .unwrap();

        let resolved = schema.resolve(v(91));
        assert_eq!(resolved.count(), 1);
        assert_eq!(
            resolved.lookup("legacy_pad").unwrap(),
            PropertyIndex::NotSupported
        );
    }

    #[test]
    fn test_field_range_clipped_by_schema_range() {
        // Schema only valid [40, 91); field claims an open range but must be
        // clipped to the schema's.
        let schema = PropertySchema::builder("clipped", range(40, 91))
            .field(PropertyDescriptor::new("f", DataType::String, open_range(8)))
            .build()
            .unwrap();
        assert_eq!(schema.property_count(v(91)), 0);
        assert_eq!(schema.property_count(v(56)), 1);
    }

    #[test]
    fn test_build_rejects_field_outside_schema_range() {
        let err = PropertySchema::builder("bad", range(62, 91))
            .field(PropertyDescriptor::new("old", DataType::String, range(8, 31)))
            .build()
            .unwrap_err();
        assert!(matches!(err, ProtocolError::FieldOutsideSchemaRange { .. }));
    }

    #[test]
    fn test_build_rejects_duplicates() {
        let err = PropertySchema::builder("dup", full_range())
            .field(PropertyDescriptor::new("x", DataType::String, full_range()))
            .field(PropertyDescriptor::new("x", DataType::Integer, full_range()))
            .build()
            .unwrap_err();
        assert!(matches!(err, ProtocolError::DuplicateField { .. }));
    }

    #[test]
    fn test_property_list_defaults() {
        let schema = PropertySchema::builder("defaults", full_range())
            .field(
                PropertyDescriptor::new("n", DataType::Integer, full_range()).with_default("0"),
            )
            .field(PropertyDescriptor::new("s", DataType::String, full_range()))
            .build()
            .unwrap();

        let list = PropertyList::new(&schema, v(91));
        assert_eq!(list.get("n").unwrap(), Some("0"));
        assert_eq!(list.get("s").unwrap(), Some(""));
    }

    #[test]
    fn test_property_list_get_set() {
        let schema = abc_schema();
        let mut list = PropertyList::new(&schema, v(50));

        assert!(list.set("b", "hello").unwrap());
        assert_eq!(list.get("b").unwrap(), Some("hello"));
    }

    #[test]
    fn test_set_inactive_is_noop() {
        let schema = abc_schema();
        let mut list = PropertyList::new(&schema, v(31));

        let count_before = list.count();
        assert!(!list.set("b", "ignored").unwrap());
        assert_eq!(list.count(), count_before);
        assert_eq!(list.get("b").unwrap(), None);
    }

    #[test]
    fn test_set_unknown_is_error() {
        let schema = abc_schema();
        let mut list = PropertyList::new(&schema, v(50));
        assert!(list.set("nope", "x").is_err());
    }

    #[test]
    fn test_from_wire_count_mismatch() {
        let schema = abc_schema();
        let err =
            PropertyList::from_wire(&schema, v(50), vec!["only".to_string()]).unwrap_err();
        assert!(matches!(err, ProtocolError::ValueCountMismatch { .. }));
    }

    #[test]
    fn test_from_wire_positional_access() {
        let schema = abc_schema();
        // At v31 only a and c travel, in that order.
        let list = PropertyList::from_wire(
            &schema,
            v(31),
            vec!["first".to_string(), "second".to_string()],
        )
        .unwrap();
        assert_eq!(list.get("a").unwrap(), Some("first"));
        assert_eq!(list.get("c").unwrap(), Some("second"));
    }

    #[test]
    fn test_get_typed() {
        let schema = PropertySchema::builder("typed", full_range())
            .field(PropertyDescriptor::new("chanid", DataType::Integer, full_range()))
            .field(PropertyDescriptor::new("flags", DataType::Bitmask, full_range()))
            .build()
            .unwrap();

        let list = PropertyList::from_wire(
            &schema,
            v(91),
            vec!["1021".to_string(), "4".to_string()],
        )
        .unwrap();
        assert_eq!(
            list.get_typed("chanid").unwrap(),
            Some(TypedValue::Integer(1021))
        );
        assert_eq!(
            list.get_typed("flags").unwrap(),
            Some(TypedValue::Bitmask(4))
        );
    }

    #[test]
    fn test_schema_concatenation() {
        let base = vec![
            PropertyDescriptor::new("title", DataType::String, full_range()),
            PropertyDescriptor::new("chanid", DataType::Integer, full_range()),
        ];
        let schema = PropertySchema::builder("composed", full_range())
            .fields(base)
            .field(PropertyDescriptor::new("rec_group", DataType::String, open_range(14)))
            .build()
            .unwrap();

        let resolved = schema.resolve(v(91));
        assert_eq!(resolved.count(), 3);
        assert_eq!(resolved.lookup("rec_group").unwrap(), PropertyIndex::Active(2));
    }
}
