//! Field sets
//!
//! A [`FieldSet`] is an ordered name→[`Field`] mapping carrying an explicit
//! identity token. Registries compare fieldsets by that token, never by value.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

use crate::checksum::Checksum;
use crate::error::TypedefError;
use crate::field::{Field, FieldType};
use crate::record::{Scalar, Value, CHAIN_SEPARATOR};

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

/// Identity token of a fieldset, unique for the lifetime of the process
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FieldSetId(u64);

impl FieldSetId {
    fn next() -> Self {
        Self(NEXT_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for FieldSetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Registration level of a fieldset within a target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    /// Declared schema of the target
    Base,
    /// Fields required by one continuous query
    Query,
    /// Fields observed together in one record
    Data,
}

impl Level {
    pub fn as_str(&self) -> &'static str {
        match self {
            Level::Base => "base",
            Level::Query => "query",
            Level::Data => "data",
        }
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Level {
    type Err = TypedefError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.strip_prefix(':').unwrap_or(s) {
            "base" => Ok(Level::Base),
            "query" => Ok(Level::Query),
            "data" => Ok(Level::Data),
            other => Err(TypedefError::InvalidArgument(format!("unknown level {}", other))),
        }
    }
}

/// Canonical, order-independent key of a set of field names
pub fn names_key<I, S>(names: I) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut names: Vec<String> = names.into_iter().map(|n| n.as_ref().to_string()).collect();
    names.sort();
    names.dedup();
    names.join(",")
}

/// A set of fields, as declared by a base schema, a query or seen in a record
#[derive(Debug)]
pub struct FieldSet {
    id: FieldSetId,
    fields: BTreeMap<String, Field>,
    /// Derived from chained-access fields on summary refresh
    containers: BTreeMap<String, Field>,
    summary: String,
    target: Option<String>,
    level: Option<Level>,
    event_type_name: Option<String>,
}

impl FieldSet {
    /// Build a fieldset from a name→type mapping, every field sharing the
    /// given optionality.
    pub fn new<I, S>(mapping: I, optional: bool) -> Self
    where
        I: IntoIterator<Item = (S, FieldType)>,
        S: Into<String>,
    {
        Self::from_fields(
            mapping
                .into_iter()
                .map(|(name, field_type)| Field::new(name, field_type, optional)),
        )
    }

    /// Build a fieldset from ready-made fields
    pub fn from_fields(fields: impl IntoIterator<Item = Field>) -> Self {
        let mut set = Self {
            id: FieldSetId::next(),
            fields: fields.into_iter().map(|f| (f.name.clone(), f)).collect(),
            containers: BTreeMap::new(),
            summary: String::new(),
            target: None,
            level: None,
            event_type_name: None,
        };
        set.update_summary();
        set
    }

    pub fn id(&self) -> FieldSetId {
        self.id
    }

    /// Same identity token
    pub fn same(&self, other: &FieldSet) -> bool {
        self.id == other.id
    }

    pub fn fields(&self) -> &BTreeMap<String, Field> {
        &self.fields
    }

    pub fn get(&self, name: &str) -> Option<&Field> {
        self.fields.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.fields.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Insert or overwrite a field. Call [`FieldSet::update_summary`] once done.
    pub fn insert(&mut self, field: Field) {
        self.fields.insert(field.name.clone(), field);
    }

    pub(crate) fn get_mut(&mut self, name: &str) -> Option<&mut Field> {
        self.fields.get_mut(name)
    }

    /// Container fields implied by this set's chained accesses
    pub fn containers(&self) -> &BTreeMap<String, Field> {
        &self.containers
    }

    pub fn summary(&self) -> &str {
        &self.summary
    }

    pub fn target(&self) -> Option<&str> {
        self.target.as_deref()
    }

    pub fn level(&self) -> Option<Level> {
        self.level
    }

    pub fn event_type_name(&self) -> Option<&str> {
        self.event_type_name.as_deref()
    }

    /// True iff every mandatory field of self appears in `other` with the
    /// same type.
    pub fn subset(&self, other: &FieldSet) -> bool {
        self.fields
            .values()
            .filter(|f| f.is_mandatory())
            .all(|f| {
                other
                    .fields
                    .get(&f.name)
                    .map_or(false, |o| o.field_type == f.field_type)
            })
    }

    /// Structural copy. Without `preserve_identity` the copy gets a fresh
    /// token and no target/level binding.
    pub fn rebind(&self, preserve_identity: bool) -> FieldSet {
        let mut copy = Self {
            id: if preserve_identity { self.id } else { FieldSetId::next() },
            fields: self.fields.clone(),
            containers: BTreeMap::new(),
            summary: String::new(),
            target: None,
            level: None,
            event_type_name: None,
        };
        if preserve_identity {
            copy.target = self.target.clone();
            copy.level = self.level;
            copy.event_type_name = self.event_type_name.clone();
        }
        copy.update_summary();
        copy
    }

    /// Attach this set to a target and level, deriving its event type name
    /// from the summary digest.
    pub fn bind(&mut self, target: impl Into<String>, level: Level) {
        let target = target.into();
        let digest = Checksum::of(&self.summary);
        self.event_type_name = Some(format!("{}_{}_{}", target, level, digest.short()));
        self.target = Some(target);
        self.level = Some(level);
    }

    /// Canonical key of this set's field names
    pub fn field_names_key(&self) -> String {
        names_key(self.fields.keys())
    }

    /// Flatten a nested value into `(dotted name, scalar)` leaves.
    pub fn leaves(value: &Value) -> Vec<(String, &Scalar)> {
        value
            .leaves()
            .into_iter()
            .map(|leaf| (leaf.chain.join(CHAIN_SEPARATOR), leaf.value))
            .collect()
    }

    /// Recompute the summary and the derived container fields.
    pub fn update_summary(&mut self) {
        self.summary = self
            .fields
            .values()
            .map(|f| format!("{}:{}", f.name, f.field_type))
            .collect::<Vec<_>>()
            .join(",");
        self.containers = self
            .fields
            .values()
            .filter_map(Field::container_field)
            .map(|c| (c.name.clone(), c))
            .collect();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn set(pairs: &[(&str, FieldType)], optional: bool) -> FieldSet {
        FieldSet::new(pairs.iter().map(|(n, t)| (n.to_string(), *t)), optional)
    }

    #[test]
    fn test_identity_tokens_are_unique() {
        let a = set(&[("a", FieldType::Long)], false);
        let b = set(&[("a", FieldType::Long)], false);
        assert!(!a.same(&b));
        assert!(a.same(&a.rebind(true)));
        assert!(!a.same(&a.rebind(false)));
    }

    #[test]
    fn test_key_ignores_types_and_optionality() {
        let a = set(&[("b", FieldType::Long), ("a", FieldType::String)], false);
        let b = set(&[("a", FieldType::Double), ("b", FieldType::Boolean)], true);
        assert_eq!(a.field_names_key(), "a,b");
        assert_eq!(a.field_names_key(), b.field_names_key());
    }

    #[test]
    fn test_subset() {
        let base = set(&[("a", FieldType::Long)], false);
        let data = set(&[("a", FieldType::Long), ("b", FieldType::String)], false);
        let wrong = set(&[("a", FieldType::String)], false);
        assert!(base.subset(&data));
        assert!(!base.subset(&wrong));
        assert!(!data.subset(&base));

        let optional = set(&[("z", FieldType::Long)], true);
        assert!(optional.subset(&base));
    }

    #[test]
    fn test_rebind_drops_binding() {
        let mut a = set(&[("a", FieldType::Long)], false);
        a.bind("access_log", Level::Query);
        assert!(a.event_type_name().unwrap().starts_with("access_log_query_"));

        let kept = a.rebind(true);
        assert_eq!(kept.event_type_name(), a.event_type_name());
        let fresh = a.rebind(false);
        assert!(fresh.event_type_name().is_none());
        assert!(fresh.target().is_none());
        assert_eq!(fresh.summary(), a.summary());
    }

    #[test]
    fn test_event_type_name_is_deterministic() {
        let mut a = set(&[("a", FieldType::Long)], false);
        let mut b = set(&[("a", FieldType::Long)], true);
        a.bind("t", Level::Data);
        b.bind("t", Level::Data);
        assert_eq!(a.event_type_name(), b.event_type_name());
    }

    #[test]
    fn test_summary_and_containers() {
        let mut s = set(&[("x.y", FieldType::Long), ("n", FieldType::String)], false);
        assert_eq!(s.summary(), "n:string,x.y:long");
        assert_eq!(s.containers()["x"].field_type, FieldType::Hash);

        s.insert(Field::new("l.0", FieldType::Long, true));
        s.update_summary();
        assert_eq!(s.containers()["l"].field_type, FieldType::Array);
    }

    #[test]
    fn test_leaves_join_chains() {
        let value = Value::from(json!({"a": {"b": 1}, "c": [true]}));
        let names: Vec<String> = FieldSet::leaves(&value).into_iter().map(|(n, _)| n).collect();
        assert_eq!(names, vec!["a.b", "c.0"]);
    }

    #[test]
    fn test_level_tokens() {
        assert_eq!("data".parse::<Level>().unwrap(), Level::Data);
        assert_eq!(":query".parse::<Level>().unwrap(), Level::Query);
        assert!("meta".parse::<Level>().is_err());
    }
}
