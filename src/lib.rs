//! Event Typedefs
//!
//! Per-target field registry for continuous queries over schema-less event
//! records.
//!
//! ## Features
//!
//! - **Three sources of knowledge**: declared base fields, fields required by
//!   queries and fields observed in records are reconciled per target
//! - **Known facts win**: once a field type is authoritative, inference never
//!   changes it
//! - **Memoized resolution**: records with an already seen field-name
//!   combination resolve to the same fieldset without inference
//! - **Lock-free reads**: readers work on immutable snapshots; writers
//!   serialize per target
//!
//! ## Architecture
//!
//! ```text
//! TypedefManager
//! ├── "access_log" -> Typedef
//! │   ├── Knowledge snapshot (fields, containers, waiting, baseset)
//! │   ├── memo (field-name combination -> data fieldset)
//! │   └── registrations (query fieldsets, data fieldsets)
//! └── "metrics"    -> Typedef (lazy)
//! ```

pub mod admin;
pub mod checksum;
pub mod config;
pub mod error;
pub mod field;
pub mod fieldset;
pub mod manager;
pub mod record;
pub mod typedef;

pub use admin::AdminServer;
pub use checksum::Checksum;
pub use config::TypedefsConfig;
pub use error::{Result, TypedefError};
pub use field::{Field, FieldDescriptor, FieldType};
pub use fieldset::{FieldSet, FieldSetId, Level};
pub use manager::{TargetSummary, TypedefManager};
pub use record::{parse_record, record_from_json, Record, Scalar, Value};
pub use typedef::{Knowledge, Typedef};
