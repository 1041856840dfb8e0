//! Per-field comparison rules used when building filter expressions.
//!
//! Each collection has a closed set of filterable fields. A field either
//! matches exactly or bounds a date range from one side. Fields not in a
//! registry are never filtered on.

use std::collections::HashMap;
use std::sync::LazyLock;

use crate::{Error, Result};

/// How a filter value for a field is compared.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldSpec {
    /// `field='value'`
    ExactMatch,
    /// `field >= '<date>T00:00:00.000Z'`
    DateRangeLower,
    /// `field <= '<date>T00:00:00.000Z'`
    DateRangeUpper,
}

impl FieldSpec {
    pub fn is_date_range(&self) -> bool {
        matches!(self, FieldSpec::DateRangeLower | FieldSpec::DateRangeUpper)
    }
}

const TASK_FIELDS: &[(&str, FieldSpec)] = &[
    ("title", FieldSpec::ExactMatch),
    ("status", FieldSpec::ExactMatch),
    ("assignedTo", FieldSpec::ExactMatch),
    ("startDate", FieldSpec::DateRangeLower),
    ("endDate", FieldSpec::DateRangeUpper),
];

const USER_FIELDS: &[(&str, FieldSpec)] = &[
    ("name", FieldSpec::ExactMatch),
    ("username", FieldSpec::ExactMatch),
    ("email", FieldSpec::ExactMatch),
    ("role", FieldSpec::ExactMatch),
];

const COMMENT_FIELDS: &[(&str, FieldSpec)] = &[
    ("todo", FieldSpec::ExactMatch),
    ("user", FieldSpec::ExactMatch),
];

static TASKS: LazyLock<FieldRegistry> = LazyLock::new(|| FieldRegistry::from_trusted(TASK_FIELDS));
static USERS: LazyLock<FieldRegistry> = LazyLock::new(|| FieldRegistry::from_trusted(USER_FIELDS));
static COMMENTS: LazyLock<FieldRegistry> =
    LazyLock::new(|| FieldRegistry::from_trusted(COMMENT_FIELDS));

/// Lookup table from field name to comparison rule.
#[derive(Debug, Clone, Default)]
pub struct FieldRegistry {
    fields: HashMap<String, FieldSpec>,
}

impl FieldRegistry {
    /// Build a registry, rejecting empty, malformed or duplicate field names.
    ///
    /// Field names are interpolated into filter expressions verbatim, so they
    /// must be plain identifiers.
    pub fn new<I, S>(fields: I) -> Result<Self>
    where
        I: IntoIterator<Item = (S, FieldSpec)>,
        S: Into<String>,
    {
        let mut map = HashMap::new();
        for (name, spec) in fields {
            let name = name.into();
            if !is_identifier(&name) {
                return Err(Error::InvalidConfig(format!(
                    "invalid filter field name: {:?}",
                    name
                )));
            }
            if map.insert(name.clone(), spec).is_some() {
                return Err(Error::InvalidConfig(format!(
                    "duplicate filter field: {}",
                    name
                )));
            }
        }
        Ok(Self { fields: map })
    }

    fn from_trusted(fields: &[(&str, FieldSpec)]) -> Self {
        Self {
            fields: fields
                .iter()
                .map(|(name, spec)| ((*name).to_string(), *spec))
                .collect(),
        }
    }

    /// Filterable task fields.
    pub fn tasks() -> &'static FieldRegistry {
        &TASKS
    }

    /// Filterable user fields.
    pub fn users() -> &'static FieldRegistry {
        &USERS
    }

    /// Filterable comment fields.
    pub fn comments() -> &'static FieldRegistry {
        &COMMENTS
    }

    /// Check the built-in registries. Run once at startup.
    pub fn validate_builtin() -> Result<()> {
        for table in [TASK_FIELDS, USER_FIELDS, COMMENT_FIELDS] {
            FieldRegistry::new(table.iter().copied())?;
        }
        Ok(())
    }

    pub fn get(&self, field: &str) -> Option<FieldSpec> {
        self.fields.get(field).copied()
    }

    pub fn contains(&self, field: &str) -> bool {
        self.fields.contains_key(field)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.')
}
