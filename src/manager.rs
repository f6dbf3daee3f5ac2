//! Routing of registration and ingestion calls per target

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::error::{Result, TypedefError};
use crate::field::{FieldDescriptor, FieldType};
use crate::fieldset::{FieldSet, Level};
use crate::record::Record;
use crate::typedef::Typedef;

/// Short description of one target
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TargetSummary {
    pub name: String,
    pub lazy: bool,
    pub fields: usize,
}

/// One typedef per event target
#[derive(Debug, Default)]
pub struct TypedefManager {
    typedefs: RwLock<HashMap<String, Arc<Typedef>>>,
    /// Query fieldsets per target still waiting for some of their fields
    pending: Mutex<HashMap<String, Vec<Arc<FieldSet>>>>,
}

impl TypedefManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a target with a declared base schema. An empty mapping adds a lazy
    /// target.
    pub fn add_target<I, S>(&self, name: &str, fields: I) -> Result<Arc<Typedef>>
    where
        I: IntoIterator<Item = (S, FieldType)>,
        S: Into<String>,
    {
        self.insert(name, Typedef::new(fields))
    }

    /// Add a target whose schema will be learned or activated later
    pub fn add_lazy_target(&self, name: &str) -> Result<Arc<Typedef>> {
        self.insert(name, Typedef::lazy())
    }

    fn insert(&self, name: &str, typedef: Typedef) -> Result<Arc<Typedef>> {
        let mut typedefs = self.typedefs.write();
        if typedefs.contains_key(name) {
            return Err(TypedefError::TargetExists(name.to_string()));
        }
        let typedef = Arc::new(typedef);
        typedefs.insert(name.to_string(), Arc::clone(&typedef));
        info!(target_name = %name, lazy = typedef.is_lazy(), "added target");
        Ok(typedef)
    }

    pub fn get(&self, name: &str) -> Result<Arc<Typedef>> {
        self.typedefs
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| TypedefError::TargetNotFound(name.to_string()))
    }

    pub fn remove_target(&self, name: &str) -> Result<()> {
        if self.typedefs.write().remove(name).is_none() {
            return Err(TypedefError::TargetNotFound(name.to_string()));
        }
        self.pending.lock().remove(name);
        info!(target_name = %name, "removed target");
        Ok(())
    }

    /// All targets, sorted by name
    pub fn targets(&self) -> Vec<TargetSummary> {
        let typedefs = self.typedefs.read();
        let mut targets: Vec<_> = typedefs
            .iter()
            .map(|(name, td)| TargetSummary {
                name: name.clone(),
                lazy: td.is_lazy(),
                fields: td.fields().len(),
            })
            .collect();
        targets.sort_by(|a, b| a.name.cmp(&b.name));
        targets
    }

    pub fn activate(&self, name: &str, fieldset: &FieldSet) -> Result<()> {
        let typedef = self.get(name)?;
        typedef.activate(fieldset);
        self.flush_pending(name, &typedef);
        Ok(())
    }

    pub fn reserve(&self, name: &str, field: &str, field_type: FieldType, optional: bool) -> Result<bool> {
        let typedef = self.get(name)?;
        let reserved = typedef.reserve(field, field_type, optional);
        if reserved {
            self.flush_pending(name, &typedef);
        }
        Ok(reserved)
    }

    /// Whether every leaf name a query uses is known on the target
    pub fn ready<S: AsRef<str>>(&self, name: &str, fields: &[S]) -> Result<bool> {
        Ok(self.get(name)?.field_defined(fields))
    }

    /// Register the fieldset a query needs on a target.
    ///
    /// When the target already knows every field the fieldset is pushed right
    /// away. Otherwise the unknown names are marked as waiting, so strict
    /// ingestion keeps them, and the fieldset stays pending until base,
    /// reserve or data define all of them.
    pub fn register_query(&self, name: &str, mut fieldset: FieldSet) -> Result<Arc<FieldSet>> {
        let typedef = self.get(name)?;
        fieldset.bind(name, Level::Query);
        let fieldset = Arc::new(fieldset);

        let names: Vec<&str> = fieldset.fields().keys().map(String::as_str).collect();
        if typedef.field_defined(&names) {
            typedef.push(Level::Query, &fieldset)?;
            debug!(target_name = %name, event_type = ?fieldset.event_type_name(), "registered query");
            return Ok(fieldset);
        }

        for field in &names {
            typedef.wait(*field);
        }
        self.pending
            .lock()
            .entry(name.to_string())
            .or_default()
            .push(Arc::clone(&fieldset));
        debug!(target_name = %name, event_type = ?fieldset.event_type_name(), "query waiting for fields");
        // fields may have been defined since the check above
        self.flush_pending(name, &typedef);
        Ok(fieldset)
    }

    /// Retract a query fieldset, pending or registered.
    pub fn deregister_query(&self, name: &str, fieldset: &FieldSet) -> Result<bool> {
        let typedef = self.get(name)?;
        if let Some(queries) = self.pending.lock().get_mut(name) {
            queries.retain(|q| !q.same(fieldset));
        }
        typedef.pop(Level::Query, fieldset)
    }

    /// Query fieldsets of a target that still wait for fields
    pub fn pending_queries(&self, name: &str) -> Vec<Arc<FieldSet>> {
        self.pending.lock().get(name).cloned().unwrap_or_default()
    }

    /// Push every pending query of `name` whose fields are all defined now.
    fn flush_pending(&self, name: &str, typedef: &Typedef) {
        let mut pending = self.pending.lock();
        let Some(queries) = pending.get_mut(name) else {
            return;
        };
        queries.retain(|query| {
            let names: Vec<&str> = query.fields().keys().map(String::as_str).collect();
            if !typedef.field_defined(&names) {
                return true;
            }
            match typedef.push(Level::Query, query) {
                Ok(_) => debug!(target_name = %name, event_type = ?query.event_type_name(), "registered query"),
                Err(err) => warn!(target_name = %name, error = %err, "dropped pending query"),
            }
            false
        });
        if queries.is_empty() {
            pending.remove(name);
        }
    }

    /// Resolve a record's fieldset on a target and register it as data.
    ///
    /// A definition mismatch rejects the record for this target and leaves
    /// the typedef untouched.
    pub fn ingest(&self, name: &str, record: &Record, strict: bool) -> Result<Arc<FieldSet>> {
        let typedef = self.get(name)?;
        let mut resolved = typedef.refer(record, strict);
        if resolved.target().is_none() {
            if let Some(fresh) = Arc::get_mut(&mut resolved) {
                fresh.bind(name, Level::Data);
            }
        }
        if let Err(err) = typedef.push(Level::Data, &resolved) {
            warn!(target_name = %name, error = %err, "rejected record");
            return Err(err);
        }
        self.flush_pending(name, &typedef);
        Ok(resolved)
    }

    pub fn dump(&self, name: &str) -> Result<BTreeMap<String, FieldDescriptor>> {
        Ok(self.get(name)?.dump())
    }

    pub fn dump_all(&self) -> BTreeMap<String, BTreeMap<String, FieldDescriptor>> {
        self.typedefs
            .read()
            .iter()
            .map(|(name, td)| (name.clone(), td.dump()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::record_from_json;
    use serde_json::json;

    fn record(value: serde_json::Value) -> Record {
        record_from_json(value).unwrap()
    }

    #[test]
    fn test_unknown_target() {
        let manager = TypedefManager::new();
        assert!(matches!(manager.get("nope"), Err(TypedefError::TargetNotFound(_))));
        assert!(manager.ingest("nope", &record(json!({})), false).is_err());
        assert!(manager.remove_target("nope").is_err());
    }

    #[test]
    fn test_duplicate_target() {
        let manager = TypedefManager::new();
        manager.add_lazy_target("t").unwrap();
        assert!(matches!(manager.add_lazy_target("t"), Err(TypedefError::TargetExists(_))));
    }

    #[test]
    fn test_targets_sorted() {
        let manager = TypedefManager::new();
        manager.add_lazy_target("b").unwrap();
        manager.add_target("a", [("x", FieldType::Long)]).unwrap();
        let targets = manager.targets();
        assert_eq!(targets[0].name, "a");
        assert!(!targets[0].lazy);
        assert_eq!(targets[0].fields, 1);
        assert!(targets[1].lazy);
    }

    #[test]
    fn test_ingest_lazy_target() {
        let manager = TypedefManager::new();
        manager.add_lazy_target("logs").unwrap();

        let first = manager.ingest("logs", &record(json!({"path": "/", "status": 200})), false).unwrap();
        assert!(first.event_type_name().unwrap().starts_with("logs_data_"));
        let second = manager.ingest("logs", &record(json!({"path": "/a", "status": 404})), false).unwrap();
        assert!(Arc::ptr_eq(&first, &second));

        let dump = manager.dump("logs").unwrap();
        assert_eq!(dump["status"].field_type, FieldType::Long);
        assert!(dump["status"].optional);
    }

    #[test]
    fn test_conflicting_data_is_rejected() {
        let manager = TypedefManager::new();
        let td = manager.add_target("t", [("id", FieldType::Long)]).unwrap();
        let fs = FieldSet::new([("id", FieldType::String)], false);
        td.activate(&fs);

        // "id" is now a mandatory string; a conflicting data fieldset is rejected
        let conflicting = Arc::new(FieldSet::new([("id", FieldType::Long)], false));
        assert!(td.push(Level::Data, &conflicting).is_err());
        assert!(td.data_fieldsets().is_empty());
    }

    #[test]
    fn test_query_on_known_fields_registers_immediately() {
        let manager = TypedefManager::new();
        manager.add_target("t", [("score", FieldType::Double)]).unwrap();

        let query = manager
            .register_query("t", FieldSet::new([("score", FieldType::Double)], false))
            .unwrap();
        let td = manager.get("t").unwrap();
        assert!(td.waiting_fields().is_empty());
        assert!(manager.pending_queries("t").is_empty());
        assert_eq!(td.query_fieldsets().len(), 1);

        assert!(manager.deregister_query("t", &query).unwrap());
        assert!(td.query_fieldsets().is_empty());
    }

    #[test]
    fn test_query_waits_for_unknown_fields() {
        let manager = TypedefManager::new();
        let td = manager.add_target("t", [("id", FieldType::Long)]).unwrap();
        let query = manager
            .register_query(
                "t",
                FieldSet::new([("id", FieldType::Long), ("host", FieldType::String)], false),
            )
            .unwrap();

        assert!(td.waiting_fields().contains("host"));
        assert!(!manager.ready("t", &["id", "host"]).unwrap());
        assert!(td.query_fieldsets().is_empty());
        assert_eq!(manager.pending_queries("t").len(), 1);

        // a record without the awaited name leaves it waiting
        manager.ingest("t", &record(json!({"id": 1, "other": 2})), true).unwrap();
        assert!(td.waiting_fields().contains("host"));
        assert!(!td.field_defined(&["other"]));
        assert!(td.query_fieldsets().is_empty());

        // strict ingestion keeps the awaited name and resolves it
        let data = manager
            .ingest("t", &record(json!({"id": 2, "host": "h", "extra": true})), true)
            .unwrap();
        assert_eq!(data.field_names_key(), "host,id");
        assert!(!td.field_defined(&["extra"]));
        assert!(td.waiting_fields().is_empty());
        assert!(manager.ready("t", &["id", "host"]).unwrap());
        assert!(manager.pending_queries("t").is_empty());
        assert!(td.query_fieldsets()[0].same(&query));
    }

    #[test]
    fn test_pending_query_resolved_by_reserve_or_deregistered() {
        let manager = TypedefManager::new();
        let td = manager.add_lazy_target("t").unwrap();
        let first = manager
            .register_query("t", FieldSet::new([("a", FieldType::Long)], false))
            .unwrap();
        let second = manager
            .register_query("t", FieldSet::new([("b", FieldType::Double)], false))
            .unwrap();
        assert_eq!(manager.pending_queries("t").len(), 2);

        assert!(manager.deregister_query("t", &second).unwrap());
        assert_eq!(manager.pending_queries("t").len(), 1);
        assert!(td.waiting_fields().contains("b"));

        assert!(manager.reserve("t", "a", FieldType::Long, true).unwrap());
        assert!(manager.pending_queries("t").is_empty());
        assert!(td.query_fieldsets()[0].same(&first));
    }

    #[test]
    fn test_activate_then_ingest_matching_base() {
        let manager = TypedefManager::new();
        let td = manager.add_lazy_target("t").unwrap();
        manager.ingest("t", &record(json!({"id": 1})), false).unwrap();

        manager
            .activate("t", &FieldSet::new([("id", FieldType::String)], false))
            .unwrap();
        assert!(td.data_fieldsets().iter().all(|d| td.consistent(d)));

        let data = manager.ingest("t", &record(json!({"id": "abc"})), false).unwrap();
        assert_eq!(data.get("id").unwrap().field_type, FieldType::String);
        assert_eq!(td.data_fieldsets().len(), 1);
    }

    #[test]
    fn test_dump_all() {
        let manager = TypedefManager::new();
        manager.add_target("a", [("x", FieldType::Long)]).unwrap();
        manager.add_lazy_target("b").unwrap();
        let all = manager.dump_all();
        assert_eq!(all.len(), 2);
        assert!(all["b"].is_empty());
    }
}
