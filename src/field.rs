//! Field descriptors

use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::TypedefError;
use crate::record::{Scalar, CHAIN_SEPARATOR};

/// Type of a field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    Boolean,
    Long,
    Double,
    String,
    /// Container reached by a named key
    Hash,
    /// Container reached by an index
    Array,
}

impl FieldType {
    /// Lowercase type name
    pub fn as_str(&self) -> &'static str {
        match self {
            FieldType::Boolean => "boolean",
            FieldType::Long => "long",
            FieldType::Double => "double",
            FieldType::String => "string",
            FieldType::Hash => "hash",
            FieldType::Array => "array",
        }
    }

    /// Whether this is a container type rather than a scalar one
    pub fn is_container(&self) -> bool {
        matches!(self, FieldType::Hash | FieldType::Array)
    }

    /// Infer the type of a scalar. Order matters: boolean, then integral,
    /// then floating point; everything else is a string.
    pub fn guess(value: &Scalar) -> FieldType {
        match value {
            Scalar::Boolean(_) => FieldType::Boolean,
            Scalar::Integer(_) => FieldType::Long,
            Scalar::Float(_) => FieldType::Double,
            Scalar::Null | Scalar::Text(_) => FieldType::String,
        }
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FieldType {
    type Err = TypedefError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "boolean" | "bool" => Ok(FieldType::Boolean),
            "long" | "int" | "integer" => Ok(FieldType::Long),
            "double" | "float" => Ok(FieldType::Double),
            "string" => Ok(FieldType::String),
            "hash" => Ok(FieldType::Hash),
            "array" => Ok(FieldType::Array),
            other => Err(TypedefError::InvalidArgument(format!(
                "unknown field type '{}'",
                other
            ))),
        }
    }
}

fn index_token() -> &'static Regex {
    static INDEX: OnceLock<Regex> = OnceLock::new();
    INDEX.get_or_init(|| Regex::new(r"^\$?\d+$").expect("index token pattern"))
}

/// A single field of a target
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Field {
    pub name: String,
    pub field_type: FieldType,
    pub optional: bool,
    chained_access: bool,
    container_name: Option<String>,
    container_type: Option<FieldType>,
}

/// Introspection shape of a field
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldDescriptor {
    pub name: String,
    #[serde(rename = "type")]
    pub field_type: FieldType,
    pub optional: bool,
}

impl Field {
    /// Create a new field. Dotted names are chained accesses into a container.
    pub fn new(name: impl Into<String>, field_type: FieldType, optional: bool) -> Self {
        let name = name.into();
        let mut parts = name.split(CHAIN_SEPARATOR);
        let head = parts.next().unwrap_or_default().to_string();
        let (chained_access, container_name, container_type) = match parts.next() {
            Some(second) => {
                let container_type = if index_token().is_match(second) {
                    FieldType::Array
                } else {
                    FieldType::Hash
                };
                (true, Some(head), Some(container_type))
            }
            None => (false, None, None),
        };

        Self {
            name,
            field_type,
            optional,
            chained_access,
            container_name,
            container_type,
        }
    }

    pub fn chained_access(&self) -> bool {
        self.chained_access
    }

    pub fn container_name(&self) -> Option<&str> {
        self.container_name.as_deref()
    }

    pub fn container_type(&self) -> Option<FieldType> {
        self.container_type
    }

    /// Required and checked as a scalar. Chained-access fields are never
    /// mandatory: the container holds no scalar of its own.
    pub fn is_mandatory(&self) -> bool {
        !self.optional && !self.chained_access
    }

    /// Copy with an overridden optional flag
    pub fn with_optional(&self, optional: bool) -> Self {
        Self {
            optional,
            ..self.clone()
        }
    }

    /// The synthetic, always optional field for this field's container
    pub fn container_field(&self) -> Option<Field> {
        match (&self.container_name, self.container_type) {
            (Some(name), Some(field_type)) => Some(Field::new(name.clone(), field_type, true)),
            _ => None,
        }
    }

    pub fn descriptor(&self) -> FieldDescriptor {
        FieldDescriptor {
            name: self.name.clone(),
            field_type: self.field_type,
            optional: self.optional,
        }
    }
}
