//! Per-target field registry
//!
//! A [`Typedef`] reconciles three sources of field knowledge for one event
//! target: the declared base fieldset, fieldsets required by registered
//! queries, and fieldsets observed in ingested records.
//!
//! ## Concurrency
//!
//! Known-field state lives in an immutable [`Knowledge`] snapshot published
//! through [`ArcSwap`]. Readers (`field_defined`, `is_lazy`, `consistent`,
//! `simple_guess`, `refer`) load the current snapshot without locking and may
//! observe a slightly stale view, never a torn or shrinking one.
//!
//! Writers serialize on one mutex per typedef, copy the snapshot, mutate the
//! copy and publish it. Validation always runs against the snapshot loaded
//! under that mutex, before anything is changed.
//!
//! The memo of data fieldsets grows with every new field-name combination and
//! is kept outside the snapshot behind its own read/write lock, so writes that
//! only register data never copy it.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use arc_swap::ArcSwap;
use parking_lot::{Mutex, RwLock};
use tracing::{debug, info};

use crate::error::{Result, TypedefError};
use crate::field::{Field, FieldDescriptor, FieldType};
use crate::fieldset::{names_key, FieldSet, Level};
use crate::record::{Record, Value, CHAIN_SEPARATOR};

/// Immutable view of everything a typedef knows about its fields
#[derive(Debug, Clone, Default)]
pub struct Knowledge {
    fields: BTreeMap<String, Field>,
    container_fields: BTreeMap<String, Field>,
    waiting_fields: BTreeSet<String>,
    baseset: Option<Arc<FieldSet>>,
}

impl Knowledge {
    /// Authoritative known fields
    pub fn fields(&self) -> &BTreeMap<String, Field> {
        &self.fields
    }

    /// Synthetic fields for intermediate nested nodes
    pub fn container_fields(&self) -> &BTreeMap<String, Field> {
        &self.container_fields
    }

    /// Names referenced by queries but not yet resolvable
    pub fn waiting_fields(&self) -> &BTreeSet<String> {
        &self.waiting_fields
    }

    pub fn baseset(&self) -> Option<&Arc<FieldSet>> {
        self.baseset.as_ref()
    }

    fn known_or_waiting(&self, name: &str) -> bool {
        self.fields.contains_key(name) || self.waiting_fields.contains(name)
    }

    fn track_container(&mut self, field: &Field) {
        if let Some(container) = field.container_field() {
            self.container_fields
                .entry(container.name.clone())
                .or_insert(container);
        }
    }

    fn consistent(&self, fieldset: &FieldSet) -> bool {
        let base_ok = self.baseset.as_ref().map_or(true, |base| base.subset(fieldset));
        let mandatory_ok = self.fields.values().filter(|f| f.is_mandatory()).all(|f| {
            fieldset
                .get(&f.name)
                .map_or(false, |given| given.field_type == f.field_type)
        });
        let known_ok = fieldset.fields().values().all(|given| {
            self.fields
                .get(&given.name)
                .map_or(true, |known| known.field_type == given.field_type)
        });
        base_ok && mandatory_ok && known_ok
    }

    /// Flattened `(name, type)` pairs of a record. Under `strict`, names that
    /// are neither known nor waiting are dropped.
    fn guess_pairs(&self, record: &Record, strict: bool) -> Vec<(String, FieldType)> {
        let mut pairs = Vec::new();
        for (key, value) in record {
            match value {
                Value::Scalar(scalar) => {
                    if strict && !self.known_or_waiting(key) {
                        continue;
                    }
                    pairs.push((key.clone(), FieldType::guess(scalar)));
                }
                container => {
                    for (chain, scalar) in FieldSet::leaves(container) {
                        let name = format!("{}{}{}", key, CHAIN_SEPARATOR, chain);
                        if strict && !self.known_or_waiting(&name) {
                            continue;
                        }
                        pairs.push((name, FieldType::guess(scalar)));
                    }
                }
            }
        }
        pairs
    }

    /// Key of the fieldset `refer` would resolve this record to: the
    /// record's flattened names plus every known mandatory field.
    fn record_key(&self, record: &Record, strict: bool) -> String {
        let leaves = self.guess_pairs(record, strict).into_iter().map(|(name, _)| name);
        let mandatory = self
            .fields
            .values()
            .filter(|f| f.is_mandatory())
            .map(|f| f.name.clone());
        names_key(leaves.chain(mandatory))
    }
}

#[derive(Debug, Default)]
struct Registrations {
    query_fieldsets: Vec<Arc<FieldSet>>,
    data_fieldsets: Vec<Arc<FieldSet>>,
}

/// Field registry of one event target
#[derive(Debug)]
pub struct Typedef {
    knowledge: ArcSwap<Knowledge>,
    /// field-name-combination key → data fieldset
    memo: RwLock<HashMap<String, Arc<FieldSet>>>,
    registrations: Mutex<Registrations>,
}

impl Default for Typedef {
    fn default() -> Self {
        Self::lazy()
    }
}

impl Typedef {
    /// Create a typedef bound to a base schema. Every declared field is
    /// required; chained-access fields additionally get a container field.
    /// An empty mapping yields a lazy typedef.
    pub fn new<I, S>(fields: I) -> Self
    where
        I: IntoIterator<Item = (S, FieldType)>,
        S: Into<String>,
    {
        let baseset = FieldSet::new(fields, false);
        if baseset.is_empty() {
            return Self::lazy();
        }

        let mut knowledge = Knowledge {
            fields: baseset.fields().clone(),
            ..Knowledge::default()
        };
        for field in baseset.fields().values().filter(|f| f.chained_access()) {
            knowledge.track_container(field);
        }
        knowledge.baseset = Some(Arc::new(baseset));

        Self::with_knowledge(knowledge)
    }

    /// Create a typedef with no base schema yet
    pub fn lazy() -> Self {
        Self::with_knowledge(Knowledge::default())
    }

    fn with_knowledge(knowledge: Knowledge) -> Self {
        Self {
            knowledge: ArcSwap::from_pointee(knowledge),
            memo: RwLock::new(HashMap::new()),
            registrations: Mutex::new(Registrations::default()),
        }
    }

    /// Current knowledge snapshot
    pub fn snapshot(&self) -> Arc<Knowledge> {
        self.knowledge.load_full()
    }

    /// Copy the snapshot, apply `update` and publish the result. Callers must
    /// hold the registrations lock.
    fn publish<R>(&self, update: impl FnOnce(&mut Knowledge) -> R) -> R {
        let mut next = Knowledge::clone(&self.knowledge.load());
        let out = update(&mut next);
        self.knowledge.store(Arc::new(next));
        out
    }

    /// True iff every given leaf name is a known field.
    pub fn field_defined<S: AsRef<str>>(&self, names: &[S]) -> bool {
        let knowledge = self.knowledge.load();
        names.iter().all(|n| knowledge.fields.contains_key(n.as_ref()))
    }

    pub fn is_lazy(&self) -> bool {
        self.knowledge.load().baseset.is_none()
    }

    /// Establish (or replace) the base fieldset from a copy of `fieldset`.
    ///
    /// The copy gets its own identity and no event-type binding. Base entries
    /// override previously known fields of the same name; everything else
    /// known stays. Data fieldsets that no longer agree with the new base are
    /// dropped from the memo and the data list, so their field-name
    /// combinations are inferred afresh.
    pub fn activate(&self, fieldset: &FieldSet) {
        let mut regs = self.registrations.lock();

        let mut base = fieldset.rebind(false);
        let names: Vec<String> = base.fields().keys().cloned().collect();
        for name in &names {
            if let Some(field) = base.get_mut(name) {
                field.optional = false;
            }
        }
        base.update_summary();

        self.publish(|k| {
            for (name, field) in base.fields() {
                k.waiting_fields.remove(name);
                k.fields.insert(name.clone(), field.clone());
                if field.chained_access() {
                    k.track_container(field);
                }
            }
            k.baseset = Some(Arc::new(base));
        });

        let current = self.knowledge.load();
        let before = regs.data_fieldsets.len();
        regs.data_fieldsets.retain(|data| current.consistent(data));
        self.memo.write().retain(|_, data| current.consistent(data));
        info!(
            fields = names.len(),
            stale = before - regs.data_fieldsets.len(),
            "activated base fieldset"
        );
    }

    /// Declare one field. Returns false if the name is already known.
    pub fn reserve(&self, name: impl Into<String>, field_type: FieldType, optional: bool) -> bool {
        let name = name.into();
        let _guard = self.registrations.lock();
        if self.knowledge.load().fields.contains_key(&name) {
            return false;
        }

        let field = Field::new(name.clone(), field_type, optional);
        self.publish(|k| {
            k.waiting_fields.remove(&name);
            if field.chained_access() {
                k.track_container(&field);
            }
            k.fields.insert(name.clone(), field);
        });
        debug!(field = %name, %field_type, optional, "reserved field");
        true
    }

    /// Record a query-referenced name that cannot be resolved yet. Returns
    /// false if the name is already known or waiting.
    pub fn wait(&self, name: impl Into<String>) -> bool {
        let name = name.into();
        let _guard = self.registrations.lock();
        let current = self.knowledge.load();
        if current.known_or_waiting(&name) {
            return false;
        }
        drop(current);

        self.publish(|k| k.waiting_fields.insert(name.clone()));
        debug!(field = %name, "waiting for field");
        true
    }

    /// Whether `fieldset` agrees with the base fieldset and with every known
    /// field.
    pub fn consistent(&self, fieldset: &FieldSet) -> bool {
        self.knowledge.load().consistent(fieldset)
    }

    /// Register a fieldset at `level`.
    pub fn push(&self, level: Level, fieldset: &Arc<FieldSet>) -> Result<bool> {
        let mut regs = self.registrations.lock();
        let current = self.knowledge.load_full();
        if !current.consistent(fieldset) {
            return Err(TypedefError::DefinitionMismatch);
        }

        match level {
            Level::Base => match &current.baseset {
                Some(base) if base.same(fieldset) => {}
                _ => return Err(TypedefError::Invariant("baseset mismatch".to_string())),
            },
            Level::Query => {
                if regs.query_fieldsets.iter().any(|q| q.same(fieldset)) {
                    return Ok(true);
                }
                regs.query_fieldsets.push(Arc::clone(fieldset));
                self.publish(|k| {
                    for (name, field) in fieldset.fields() {
                        k.waiting_fields.remove(name);
                        // one query's requirement is not target-wide
                        k.fields
                            .entry(name.clone())
                            .or_insert_with(|| field.with_optional(true));
                    }
                });
                debug!(fieldset = %fieldset.id(), "registered query fieldset");
            }
            Level::Data => {
                let key = fieldset.field_names_key();
                if regs.data_fieldsets.iter().any(|d| d.same(fieldset))
                    || self.memo.read().contains_key(&key)
                {
                    return Ok(true);
                }
                regs.data_fieldsets.push(Arc::clone(fieldset));
                self.memo.write().insert(key.clone(), Arc::clone(fieldset));

                let learns = fieldset.fields().keys().any(|n| !current.fields.contains_key(n));
                if !learns {
                    debug!(fieldset = %fieldset.id(), key = %key, "registered data fieldset");
                    return Ok(true);
                }
                self.publish(|k| {
                    for (name, field) in fieldset.fields() {
                        k.waiting_fields.remove(name);
                        if k.fields.contains_key(name) {
                            continue;
                        }
                        k.fields.insert(name.clone(), field.with_optional(true));
                        if field.chained_access() {
                            k.track_container(field);
                        }
                    }
                });
                debug!(fieldset = %fieldset.id(), key = %key, "registered data fieldset");
            }
        }
        Ok(true)
    }

    /// Retract a query fieldset. Base and data fieldsets are never retracted.
    pub fn pop(&self, level: Level, fieldset: &FieldSet) -> Result<bool> {
        match level {
            Level::Base => Err(TypedefError::Invariant(
                "pop of base fieldset is nonsense (typedef deletion?)".to_string(),
            )),
            Level::Data => Err(TypedefError::Invariant(
                "pop of data fieldset is nonsense".to_string(),
            )),
            Level::Query => {
                let mut regs = self.registrations.lock();
                regs.query_fieldsets.retain(|q| !q.same(fieldset));
                Ok(true)
            }
        }
    }

    /// Swap a data fieldset for a refined one covering the same field names.
    pub fn replace(&self, level: Level, old: &FieldSet, new: &Arc<FieldSet>) -> Result<bool> {
        if level != Level::Data {
            return Err(TypedefError::InvalidArgument(
                "fieldset replace should be called for data".to_string(),
            ));
        }
        let key = new.field_names_key();
        if old.field_names_key() != key {
            return Err(TypedefError::InvalidArgument(
                "try to replace different field name sets".to_string(),
            ));
        }

        let mut regs = self.registrations.lock();
        if !self.knowledge.load().consistent(new) {
            return Err(TypedefError::DefinitionMismatch);
        }
        regs.data_fieldsets.retain(|d| !d.same(old));
        regs.data_fieldsets.push(Arc::clone(new));
        self.memo.write().insert(key.clone(), Arc::clone(new));
        debug!(old = %old.id(), new = %new.id(), key = %key, "replaced data fieldset");
        Ok(true)
    }

    /// Infer a fieldset from the record's values alone.
    pub fn simple_guess(&self, record: &Record, optional: bool, strict: bool) -> FieldSet {
        let knowledge = self.knowledge.load();
        FieldSet::new(knowledge.guess_pairs(record, strict), optional)
    }

    /// Canonical key of the field names `record` resolves to.
    pub fn field_names_key(&self, record: &Record, strict: bool) -> String {
        self.knowledge.load().record_key(record, strict)
    }

    /// Resolve the concrete fieldset of a record.
    ///
    /// Returns the memoized data fieldset for the record's field-name
    /// combination when there is one. Otherwise guesses from the values,
    /// lets known fields override the guess and injects absent mandatory
    /// fields. The result is not pushed.
    pub fn refer(&self, record: &Record, strict: bool) -> Arc<FieldSet> {
        let knowledge = self.knowledge.load_full();
        let key = knowledge.record_key(record, strict);
        if let Some(hit) = self.memo.read().get(&key).cloned() {
            return hit;
        }

        let mut guessed = FieldSet::new(knowledge.guess_pairs(record, strict), false);
        for (name, known) in &knowledge.fields {
            match guessed.get_mut(name) {
                Some(field) => {
                    if field.field_type != known.field_type {
                        field.field_type = known.field_type;
                    }
                    if field.optional != known.optional {
                        field.optional = known.optional;
                    }
                }
                None if known.is_mandatory() => guessed.insert(known.clone()),
                None => {}
            }
        }
        guessed.update_summary();
        Arc::new(guessed)
    }

    /// Known fields for display: chained-access leaves are shown through
    /// their container fields instead.
    pub fn dump(&self) -> BTreeMap<String, FieldDescriptor> {
        let knowledge = self.knowledge.load();
        knowledge
            .fields
            .values()
            .filter(|f| !f.chained_access())
            .chain(knowledge.container_fields.values())
            .map(|f| (f.name.clone(), f.descriptor()))
            .collect()
    }

    pub fn fields(&self) -> BTreeMap<String, Field> {
        self.knowledge.load().fields.clone()
    }

    pub fn container_fields(&self) -> BTreeMap<String, Field> {
        self.knowledge.load().container_fields.clone()
    }

    pub fn waiting_fields(&self) -> BTreeSet<String> {
        self.knowledge.load().waiting_fields.clone()
    }

    pub fn baseset(&self) -> Option<Arc<FieldSet>> {
        self.knowledge.load().baseset.clone()
    }

    pub fn query_fieldsets(&self) -> Vec<Arc<FieldSet>> {
        self.registrations.lock().query_fieldsets.clone()
    }

    pub fn data_fieldsets(&self) -> Vec<Arc<FieldSet>> {
        self.registrations.lock().data_fieldsets.clone()
    }
}
