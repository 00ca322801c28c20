// src/rvc/schema.rs
//
// DGN schema registry. Field layouts are data: a TOML catalog is parsed into
// serde documents, validated, and turned into immutable `DgnSchema`s keyed by DGN.
//
// Validation collects every problem with a path-style field name
// (`dgn[3].field[1].bit_length`) instead of stopping at the first one.

use once_cell::sync::Lazy;
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;

use super::value::FieldValue;
use super::{format_dgn, parse_dgn, MAX_DGN};
use crate::error::SchemaError;

/// Catalog shipped with the binary.
pub const BUILTIN_CATALOG: &str = include_str!("catalog.toml");

static BUILTIN: Lazy<SchemaRegistry> = Lazy::new(|| {
    SchemaRegistry::from_toml_str(BUILTIN_CATALOG).expect("built-in catalog is valid")
});

// ============================================================================
// Catalog documents
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct CatalogDocument {
    pub meta: Option<MetaDoc>,
    #[serde(default)]
    pub dgn: Vec<DgnDoc>,
}

#[derive(Debug, Deserialize)]
pub struct MetaDoc {
    pub name: Option<String>,
    pub version: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct DgnDoc {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    #[serde(default)]
    pub field: Vec<FieldDoc>,
    #[serde(default, rename = "override")]
    pub overrides: Vec<OverrideDoc>,
}

#[derive(Debug, Deserialize)]
pub struct FieldDoc {
    pub name: String,
    pub start_bit: i64,
    pub bit_length: i64,
    pub kind: FieldKind,
    pub scale: Option<f64>,
    pub offset: Option<f64>,
    pub unit: Option<String>,
    #[serde(rename = "enum")]
    pub enum_map: Option<HashMap<String, String>>,
}

#[derive(Debug, Deserialize)]
pub struct OverrideDoc {
    pub name: String,
    pub kind: String,
    pub byte_offset: Option<i64>,
    pub byte_length: Option<i64>,
    #[serde(default)]
    pub signed: bool,
    pub scale: Option<f64>,
    pub offset: Option<f64>,
    pub fields: Option<Vec<String>>,
    pub subtract: Option<i64>,
}

// ============================================================================
// Schema types
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldKind {
    UnsignedInt,
    SignedInt,
    FixedPoint,
    Bitfield,
    Ascii,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FieldDescriptor {
    pub name: String,
    pub start_bit: u8,
    pub bit_length: u8,
    pub kind: FieldKind,
    pub scale: f64,
    pub offset: f64,
    pub unit: Option<String>,
    pub enum_table: Option<BTreeMap<i64, String>>,
}

impl FieldDescriptor {
    /// Mask with `bit_length` ones; also the raw "not available" pattern.
    pub fn all_ones(&self) -> u64 {
        mask(self.bit_length)
    }

    /// Single-bit flags have no room for a sentinel.
    pub fn has_sentinel(&self) -> bool {
        self.bit_length >= 2 && self.kind != FieldKind::Ascii
    }

    pub fn label(&self, key: i64) -> Option<&str> {
        self.enum_table
            .as_ref()
            .and_then(|t| t.get(&key))
            .map(String::as_str)
    }

    /// Reverse enum lookup, used when a command supplies the label text.
    pub fn key_for_label(&self, label: &str) -> Option<i64> {
        self.enum_table.as_ref().and_then(|t| {
            t.iter()
                .find(|(_, v)| v.eq_ignore_ascii_case(label))
                .map(|(k, _)| *k)
        })
    }
}

pub(crate) fn mask(bits: u8) -> u64 {
    if bits >= 64 {
        u64::MAX
    } else {
        (1u64 << bits) - 1
    }
}

/// Programmatic decoder for layouts the catalog cannot describe.
pub type CustomDecoder = fn(&[u8; 8]) -> FieldValue;

#[derive(Clone)]
pub enum OverrideKind {
    /// Little-endian integer of `byte_length` bytes at `byte_offset`.
    LeBytes {
        byte_offset: u8,
        byte_length: u8,
        signed: bool,
        scale: f64,
        offset: f64,
    },
    /// Raw bits of `fields` concatenated, first field most significant.
    ConcatBits { fields: Vec<String>, subtract: i64 },
    Custom(CustomDecoder),
}

impl std::fmt::Debug for OverrideKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OverrideKind::LeBytes {
                byte_offset,
                byte_length,
                signed,
                scale,
                offset,
            } => f
                .debug_struct("LeBytes")
                .field("byte_offset", byte_offset)
                .field("byte_length", byte_length)
                .field("signed", signed)
                .field("scale", scale)
                .field("offset", offset)
                .finish(),
            OverrideKind::ConcatBits { fields, subtract } => f
                .debug_struct("ConcatBits")
                .field("fields", fields)
                .field("subtract", subtract)
                .finish(),
            OverrideKind::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct FieldOverride {
    pub name: String,
    pub kind: OverrideKind,
}

#[derive(Debug, Clone)]
pub struct DgnSchema {
    pub dgn: u32,
    pub name: String,
    pub description: Option<String>,
    fields: Vec<FieldDescriptor>,
    overrides: Vec<FieldOverride>,
    index: HashMap<String, usize>,
}

impl DgnSchema {
    pub fn new(dgn: u32, name: impl Into<String>, fields: Vec<FieldDescriptor>) -> Self {
        let index = fields
            .iter()
            .enumerate()
            .map(|(i, f)| (f.name.clone(), i))
            .collect();
        Self {
            dgn,
            name: name.into(),
            description: None,
            fields,
            overrides: Vec::new(),
            index,
        }
    }

    pub fn fields(&self) -> &[FieldDescriptor] {
        &self.fields
    }

    pub fn overrides(&self) -> &[FieldOverride] {
        &self.overrides
    }

    pub fn field(&self, name: &str) -> Option<&FieldDescriptor> {
        self.index.get(name).map(|&i| &self.fields[i])
    }

    pub fn has_field(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    /// Replaces an existing override of the same name.
    pub fn add_override(&mut self, ov: FieldOverride) {
        self.overrides.retain(|o| o.name != ov.name);
        self.overrides.push(ov);
    }
}

// ============================================================================
// Registry
// ============================================================================

#[derive(Debug, Clone, Default)]
pub struct SchemaRegistry {
    name: String,
    version: i64,
    schemas: HashMap<u32, DgnSchema>,
    names: HashMap<String, u32>,
}

impl SchemaRegistry {
    /// Shared registry parsed from the embedded catalog.
    pub fn builtin() -> &'static SchemaRegistry {
        &BUILTIN
    }

    pub fn from_path(path: &Path) -> Result<Self, SchemaError> {
        let content = std::fs::read_to_string(path).map_err(|e| SchemaError::Read {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, SchemaError> {
        let doc: CatalogDocument =
            toml::from_str(content).map_err(|e| SchemaError::Parse(e.to_string()))?;
        Self::from_document(doc)
    }

    pub fn from_document(doc: CatalogDocument) -> Result<Self, SchemaError> {
        let mut errors = Vec::new();

        let (name, version) = match &doc.meta {
            Some(meta) => {
                let version = meta.version.unwrap_or(0);
                if version < 1 {
                    errors.push(SchemaError::invalid(
                        "meta.version",
                        "Version must be at least 1",
                    ));
                }
                (meta.name.clone().unwrap_or_default(), version)
            }
            None => {
                errors.push(SchemaError::invalid("meta", "Missing [meta] section"));
                (String::new(), 0)
            }
        };

        let mut registry = SchemaRegistry {
            name,
            version,
            ..Default::default()
        };

        for (idx, dgn_doc) in doc.dgn.into_iter().enumerate() {
            let prefix = format!("dgn[{}]", idx);
            let Some(schema) = build_schema(&prefix, dgn_doc, &mut errors) else {
                continue;
            };
            if registry.schemas.contains_key(&schema.dgn) {
                errors.push(SchemaError::invalid(
                    format!("{}.id", prefix),
                    format!("Duplicate DGN {}", format_dgn(schema.dgn)),
                ));
                continue;
            }
            if registry.names.contains_key(&schema.name) {
                errors.push(SchemaError::invalid(
                    format!("{}.name", prefix),
                    format!("Duplicate DGN name '{}'", schema.name),
                ));
                continue;
            }
            registry.insert(schema);
        }

        if errors.is_empty() {
            Ok(registry)
        } else {
            Err(SchemaError::Multiple(errors))
        }
    }

    /// Add a schema built in code. Replaces any schema with the same DGN.
    pub fn insert(&mut self, schema: DgnSchema) {
        if let Some(old) = self.schemas.get(&schema.dgn) {
            self.names.remove(&old.name);
        }
        self.names.insert(schema.name.clone(), schema.dgn);
        self.schemas.insert(schema.dgn, schema);
    }

    /// Register an override on an already loaded DGN.
    pub fn add_override(
        &mut self,
        dgn: u32,
        name: impl Into<String>,
        kind: OverrideKind,
    ) -> Result<(), SchemaError> {
        let schema = self.schemas.get_mut(&dgn).ok_or_else(|| {
            SchemaError::invalid(format_dgn(dgn), "Override target DGN is not loaded")
        })?;
        let ov = FieldOverride {
            name: name.into(),
            kind,
        };
        let mut errors = Vec::new();
        validate_override(&format_dgn(dgn), &ov, &schema.fields, &schema.index, &mut errors);
        if let Some(err) = errors.pop() {
            return Err(err);
        }
        schema.add_override(ov);
        Ok(())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn version(&self) -> i64 {
        self.version
    }

    pub fn get(&self, dgn: u32) -> Option<&DgnSchema> {
        self.schemas.get(&dgn)
    }

    /// Exact lookup, then the PDU1 fallback: when the PDU format byte is below
    /// 0xF0 the low byte is a destination address and is cleared for the lookup.
    /// Returns the destination when the fallback was used.
    pub fn lookup(&self, dgn: u32) -> Option<(&DgnSchema, Option<u8>)> {
        if let Some(schema) = self.schemas.get(&dgn) {
            return Some((schema, None));
        }
        let pdu_format = (dgn >> 8) & 0xFF;
        if pdu_format < 0xF0 {
            let base = dgn & !0xFF;
            return self
                .schemas
                .get(&base)
                .map(|schema| (schema, Some((dgn & 0xFF) as u8)));
        }
        None
    }

    pub fn by_name(&self, name: &str) -> Option<&DgnSchema> {
        self.names.get(name).and_then(|dgn| self.schemas.get(dgn))
    }

    pub fn len(&self) -> usize {
        self.schemas.len()
    }

    pub fn is_empty(&self) -> bool {
        self.schemas.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &DgnSchema> {
        self.schemas.values()
    }
}

// ============================================================================
// Validation
// ============================================================================

fn build_schema(
    prefix: &str,
    doc: DgnDoc,
    errors: &mut Vec<SchemaError>,
) -> Option<DgnSchema> {
    let before = errors.len();

    let dgn = match parse_dgn(&doc.id) {
        Some(d) if d <= MAX_DGN && doc.id.len() <= 5 => Some(d),
        _ => {
            errors.push(SchemaError::invalid(
                format!("{}.id", prefix),
                format!("Invalid DGN '{}'. Must be 1-5 hex digits up to 1FFFF", doc.id),
            ));
            None
        }
    };
    if doc.name.trim().is_empty() {
        errors.push(SchemaError::invalid(
            format!("{}.name", prefix),
            "DGN name must not be empty",
        ));
    }

    let mut fields = Vec::with_capacity(doc.field.len());
    let mut seen: HashMap<String, usize> = HashMap::new();
    for (idx, field_doc) in doc.field.into_iter().enumerate() {
        let field_prefix = format!("{}.field[{}]", prefix, idx);
        if let Some(prev) = seen.get(&field_doc.name) {
            errors.push(SchemaError::invalid(
                format!("{}.name", field_prefix),
                format!(
                    "Duplicate field name '{}' (first defined at index {})",
                    field_doc.name, prev
                ),
            ));
            continue;
        }
        seen.insert(field_doc.name.clone(), idx);
        if let Some(field) = build_field(&field_prefix, field_doc, errors) {
            fields.push(field);
        }
    }

    // Pairwise overlap over the fields that survived.
    for (i, a) in fields.iter().enumerate() {
        let a_mask = mask(a.bit_length) << a.start_bit;
        for b in &fields[i + 1..] {
            let b_mask = mask(b.bit_length) << b.start_bit;
            if a_mask & b_mask != 0 {
                errors.push(SchemaError::invalid(
                    format!("{}.field", prefix),
                    format!("Fields '{}' and '{}' overlap", a.name, b.name),
                ));
            }
        }
    }

    let index: HashMap<String, usize> = fields
        .iter()
        .enumerate()
        .map(|(i, f)| (f.name.clone(), i))
        .collect();

    let mut overrides = Vec::new();
    for (idx, ov_doc) in doc.overrides.into_iter().enumerate() {
        let ov_prefix = format!("{}.override[{}]", prefix, idx);
        if let Some(ov) = build_override(&ov_prefix, ov_doc, errors) {
            validate_override(&ov_prefix, &ov, &fields, &index, errors);
            overrides.push(ov);
        }
    }

    if errors.len() != before {
        return None;
    }
    let mut schema = DgnSchema::new(dgn?, doc.name, fields);
    schema.description = doc.description;
    for ov in overrides {
        schema.add_override(ov);
    }
    Some(schema)
}

fn build_field(
    prefix: &str,
    doc: FieldDoc,
    errors: &mut Vec<SchemaError>,
) -> Option<FieldDescriptor> {
    let before = errors.len();

    if !(1..=64).contains(&doc.bit_length) {
        errors.push(SchemaError::invalid(
            format!("{}.bit_length", prefix),
            format!("bit_length {} must be between 1 and 64", doc.bit_length),
        ));
    }
    if doc.start_bit < 0 {
        errors.push(SchemaError::invalid(
            format!("{}.start_bit", prefix),
            "start_bit must be non-negative",
        ));
    } else {
        match doc.start_bit.checked_add(doc.bit_length) {
            Some(end) if end <= 64 => {}
            Some(end) => errors.push(SchemaError::invalid(
                prefix,
                format!("Field '{}' ends at bit {}, past the 64-bit payload", doc.name, end),
            )),
            None => errors.push(SchemaError::invalid(
                prefix,
                format!("Field '{}' position overflows", doc.name),
            )),
        }
    }

    if doc.kind == FieldKind::Ascii && (doc.start_bit % 8 != 0 || doc.bit_length % 8 != 0) {
        errors.push(SchemaError::invalid(
            prefix,
            format!("ascii field '{}' must be byte aligned", doc.name),
        ));
    }

    let scale = doc.scale.unwrap_or(1.0);
    if doc.kind == FieldKind::FixedPoint && scale == 0.0 {
        errors.push(SchemaError::invalid(
            format!("{}.scale", prefix),
            "fixed_point scale must be non-zero",
        ));
    }

    let enum_table = match doc.enum_map {
        Some(map) => {
            if matches!(doc.kind, FieldKind::FixedPoint | FieldKind::Ascii) {
                errors.push(SchemaError::invalid(
                    format!("{}.enum", prefix),
                    format!("enum is not supported on {:?} fields", doc.kind),
                ));
            }
            let mut table = BTreeMap::new();
            for (key, label) in map {
                match key.trim().parse::<i64>() {
                    Ok(k) => {
                        table.insert(k, label);
                    }
                    Err(_) => errors.push(SchemaError::invalid(
                        format!("{}.enum", prefix),
                        format!("enum key '{}' is not an integer", key),
                    )),
                }
            }
            Some(table)
        }
        None => None,
    };

    if errors.len() != before {
        return None;
    }
    Some(FieldDescriptor {
        name: doc.name,
        start_bit: doc.start_bit as u8,
        bit_length: doc.bit_length as u8,
        kind: doc.kind,
        scale,
        offset: doc.offset.unwrap_or(0.0),
        unit: doc.unit,
        enum_table,
    })
}

fn build_override(
    prefix: &str,
    doc: OverrideDoc,
    errors: &mut Vec<SchemaError>,
) -> Option<FieldOverride> {
    let kind = match doc.kind.as_str() {
        "le_bytes" => {
            let (Some(byte_offset), Some(byte_length)) = (doc.byte_offset, doc.byte_length) else {
                errors.push(SchemaError::invalid(
                    prefix,
                    "le_bytes override needs byte_offset and byte_length",
                ));
                return None;
            };
            if !(0..8).contains(&byte_offset) || !(1..=4).contains(&byte_length) {
                errors.push(SchemaError::invalid(
                    prefix,
                    format!(
                        "byte_offset {} / byte_length {} out of range",
                        byte_offset, byte_length
                    ),
                ));
                return None;
            }
            OverrideKind::LeBytes {
                byte_offset: byte_offset as u8,
                byte_length: byte_length as u8,
                signed: doc.signed,
                scale: doc.scale.unwrap_or(1.0),
                offset: doc.offset.unwrap_or(0.0),
            }
        }
        "concat_bits" => OverrideKind::ConcatBits {
            fields: doc.fields.unwrap_or_default(),
            subtract: doc.subtract.unwrap_or(0),
        },
        other => {
            errors.push(SchemaError::invalid(
                format!("{}.kind", prefix),
                format!("Unknown override kind '{}'. Must be 'le_bytes' or 'concat_bits'", other),
            ));
            return None;
        }
    };
    Some(FieldOverride {
        name: doc.name,
        kind,
    })
}

fn validate_override(
    prefix: &str,
    ov: &FieldOverride,
    fields: &[FieldDescriptor],
    index: &HashMap<String, usize>,
    errors: &mut Vec<SchemaError>,
) {
    match &ov.kind {
        OverrideKind::LeBytes {
            byte_offset,
            byte_length,
            ..
        } => {
            if *byte_offset as usize + *byte_length as usize > 8 {
                errors.push(SchemaError::invalid(
                    prefix,
                    format!("Override '{}' reads past byte 8", ov.name),
                ));
            }
        }
        OverrideKind::ConcatBits { fields: parts, .. } => {
            if parts.is_empty() {
                errors.push(SchemaError::invalid(
                    prefix,
                    format!("Override '{}' lists no fields", ov.name),
                ));
                return;
            }
            let mut total = 0u32;
            let mut seen = HashSet::new();
            for part in parts {
                match index.get(part) {
                    Some(&i) => total += fields[i].bit_length as u32,
                    None => errors.push(SchemaError::invalid(
                        prefix,
                        format!("Override '{}' references unknown field '{}'", ov.name, part),
                    )),
                }
                if !seen.insert(part) {
                    errors.push(SchemaError::invalid(
                        prefix,
                        format!("Override '{}' lists '{}' twice", ov.name, part),
                    ));
                }
            }
            if total > 64 {
                errors.push(SchemaError::invalid(
                    prefix,
                    format!("Override '{}' concatenates {} bits", ov.name, total),
                ));
            }
        }
        OverrideKind::Custom(_) => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn invalid_fields(err: SchemaError) -> Vec<String> {
        match err {
            SchemaError::Multiple(errs) => errs
                .into_iter()
                .map(|e| match e {
                    SchemaError::Invalid { field, .. } => field,
                    other => other.to_string(),
                })
                .collect(),
            other => vec![other.to_string()],
        }
    }

    #[test]
    fn test_builtin_catalog_loads() {
        let reg = SchemaRegistry::builtin();
        assert_eq!(reg.name(), "RV-C");
        assert_eq!(reg.version(), 1);
        let dimmer = reg.get(0x1FEDA).unwrap();
        assert_eq!(dimmer.name, "DC_DIMMER_STATUS_3");
        assert_eq!(dimmer.field("instance").unwrap().bit_length, 8);
        assert_eq!(reg.by_name("CHARGER_STATUS").unwrap().dgn, 0x1FFC7);
        assert!(reg.by_name("DM_RV").unwrap().overrides().len() == 2);
    }

    #[test]
    fn test_field_lookup_by_name() {
        let reg = SchemaRegistry::builtin();
        let schema = reg.by_name("GENERATOR_STATUS_1").unwrap();
        let f = schema.field("engine_run_time").unwrap();
        assert_eq!((f.start_bit, f.bit_length), (8, 32));
        assert!(schema.field("nope").is_none());
        assert_eq!(
            schema.field("status").unwrap().label(3),
            Some("running")
        );
        assert_eq!(schema.field("status").unwrap().key_for_label("Running"), Some(3));
    }

    #[test]
    fn test_pdu1_fallback_lookup() {
        let reg = SchemaRegistry::builtin();
        let (schema, dest) = reg.lookup(0x0EAFF).unwrap();
        assert_eq!(schema.name, "ISO_REQUEST");
        assert_eq!(dest, Some(0xFF));

        let (schema, dest) = reg.lookup(0x0EA00).unwrap();
        assert_eq!(schema.name, "ISO_REQUEST");
        assert_eq!(dest, None);

        // PDU2 range never falls back.
        assert!(reg.lookup(0x1FE01).is_none());
    }

    #[test]
    fn test_missing_meta_and_bad_version() {
        let err = SchemaRegistry::from_toml_str("dgn = []").unwrap_err();
        assert_eq!(invalid_fields(err), vec!["meta"]);

        let err = SchemaRegistry::from_toml_str("[meta]\nversion = 0\n").unwrap_err();
        assert_eq!(invalid_fields(err), vec!["meta.version"]);
    }

    #[test]
    fn test_syntax_error_is_parse_error() {
        let err = SchemaRegistry::from_toml_str("[meta\n").unwrap_err();
        assert!(matches!(err, SchemaError::Parse(_)));
    }

    #[test]
    fn test_invalid_fields_are_collected() {
        let catalog = r#"
[meta]
version = 1

[[dgn]]
id = "2FFFF"
name = "TOO_BIG"

[[dgn]]
id = "1FF00"
name = "BROKEN"

[[dgn.field]]
name = "a"
start_bit = 0
bit_length = 8
kind = "unsigned_int"

[[dgn.field]]
name = "b"
start_bit = 4
bit_length = 8
kind = "unsigned_int"

[[dgn.field]]
name = "a"
start_bit = 16
bit_length = 8
kind = "unsigned_int"

[[dgn.field]]
name = "c"
start_bit = 60
bit_length = 8
kind = "unsigned_int"

[[dgn.field]]
name = "d"
start_bit = 24
bit_length = 8
kind = "fixed_point"
scale = 0.0

[[dgn.field]]
name = "e"
start_bit = 33
bit_length = 8
kind = "ascii"
"#;
        let fields = invalid_fields(SchemaRegistry::from_toml_str(catalog).unwrap_err());
        assert!(fields.contains(&"dgn[0].id".to_string()));
        assert!(fields.contains(&"dgn[1].field[2].name".to_string()));
        assert!(fields.contains(&"dgn[1].field[3]".to_string()));
        assert!(fields.contains(&"dgn[1].field[4].scale".to_string()));
        assert!(fields.contains(&"dgn[1].field[5]".to_string()));
        assert!(fields.contains(&"dgn[1].field".to_string()));
    }

    #[test]
    fn test_huge_field_position_is_rejected() {
        let catalog = format!(
            r#"
[meta]
version = 1

[[dgn]]
id = "1FF00"
name = "HUGE"

[[dgn.field]]
name = "a"
start_bit = {}
bit_length = 8
kind = "unsigned_int"
"#,
            i64::MAX
        );
        let fields = invalid_fields(SchemaRegistry::from_toml_str(&catalog).unwrap_err());
        assert_eq!(fields, vec!["dgn[0].field[0]".to_string()]);
    }

    #[test]
    fn test_duplicate_dgn_and_name() {
        let catalog = r#"
[meta]
version = 1

[[dgn]]
id = "1FF00"
name = "ONE"

[[dgn]]
id = "1FF00"
name = "TWO"

[[dgn]]
id = "1FF01"
name = "ONE"
"#;
        let fields = invalid_fields(SchemaRegistry::from_toml_str(catalog).unwrap_err());
        assert_eq!(fields, vec!["dgn[1].id", "dgn[2].name"]);
    }

    #[test]
    fn test_enum_keys_must_be_integers() {
        let catalog = r#"
[meta]
version = 1

[[dgn]]
id = "1FF00"
name = "ONE"

[[dgn.field]]
name = "mode"
start_bit = 0
bit_length = 8
kind = "unsigned_int"
enum = { 0 = "off", x = "bad" }
"#;
        let fields = invalid_fields(SchemaRegistry::from_toml_str(catalog).unwrap_err());
        assert_eq!(fields, vec!["dgn[0].field[0].enum"]);
    }

    #[test]
    fn test_override_validation() {
        let catalog = r#"
[meta]
version = 1

[[dgn]]
id = "1FF00"
name = "ONE"

[[dgn.field]]
name = "a"
start_bit = 0
bit_length = 8
kind = "unsigned_int"

[[dgn.override]]
name = "joined"
kind = "concat_bits"
fields = ["a", "missing"]

[[dgn.override]]
name = "wide"
kind = "le_bytes"
byte_offset = 6
byte_length = 4

[[dgn.override]]
name = "odd"
kind = "mystery"
"#;
        let fields = invalid_fields(SchemaRegistry::from_toml_str(catalog).unwrap_err());
        assert_eq!(
            fields,
            vec!["dgn[0].override[0]", "dgn[0].override[1]", "dgn[0].override[2].kind"]
        );
    }

    #[test]
    fn test_from_path_reads_file() {
        use std::io::Write;
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            "[meta]\nname = \"custom\"\nversion = 2\n\n[[dgn]]\nid = \"FF00\"\nname = \"SHORT_ID\"\n"
        )
        .unwrap();
        let reg = SchemaRegistry::from_path(file.path()).unwrap();
        assert_eq!(reg.name(), "custom");
        assert_eq!(reg.get(0x0FF00).unwrap().name, "SHORT_ID");

        let err = SchemaRegistry::from_path(Path::new("/nonexistent/catalog.toml")).unwrap_err();
        assert!(matches!(err, SchemaError::Read { .. }));
    }

    #[test]
    fn test_add_custom_override() {
        fn first_byte_doubled(data: &[u8; 8]) -> FieldValue {
            FieldValue::Unsigned(data[0] as u64 * 2)
        }
        let mut reg = SchemaRegistry::builtin().clone();
        reg.add_override(0x1FFB7, "double_instance", OverrideKind::Custom(first_byte_doubled))
            .unwrap();
        assert_eq!(reg.get(0x1FFB7).unwrap().overrides().len(), 1);
        assert!(reg
            .add_override(0x1FFB7, "bad", OverrideKind::ConcatBits {
                fields: vec!["nope".into()],
                subtract: 0,
            })
            .is_err());
        assert!(reg
            .add_override(0x00001, "x", OverrideKind::Custom(first_byte_doubled))
            .is_err());
    }
}
