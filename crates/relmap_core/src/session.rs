//! Session: the persistence facade.

use crate::config::SessionConfig;
use crate::entity::{EntityArena, EntityRecord, EntityStatus};
use crate::error::{CoreError, CoreResult};
use crate::identity::IdentityMap;
use crate::query::{bind_predicate, Params, Query};
use crate::registry::{
    Cardinality, EntityDescriptor, EntityRegistry, FetchMode, KeyPolicy, LinkTable,
    RelationshipDescriptor, TypeTarget,
};
use crate::relation;
use crate::transaction::{TxnState, UnitOfWork};
use crate::types::{EntityKey, EntityRef, TypeId};
use relmap_store::{Insert, Predicate, Row, Select, SqlValue, Statement, StoreBackend, Update};
use std::sync::Arc;
use tracing::{debug, trace, warn};

/// The facade application code talks to.
///
/// A session owns an entity arena, the identity map, one unit of work,
/// and a storage backend. Entities are addressed by [`EntityRef`]
/// handles; handle equality within a unit of work is instance identity.
///
/// Typical flow:
///
/// 1. [`Session::begin`] opens a unit of work
/// 2. [`Session::create`], [`Session::set`], [`Session::link`] build
///    the graph; [`Session::persist`] stages roots (cascading over
///    composition relationships)
/// 3. [`Session::commit`] flushes everything in dependency order inside
///    one store transaction, rolling back automatically on failure
///
/// Reads ([`Session::find`], [`Session::query`]) work in any state and
/// materialize rows through the identity map, so re-reading a row
/// already in memory returns the in-memory instance unchanged.
///
/// Eager fetching is one level deep from the query roots: relationships
/// marked eager in the registry, plus any named fetch directives on the
/// query, are populated in the same execution.
pub struct Session<S: StoreBackend> {
    registry: Arc<EntityRegistry>,
    store: S,
    config: SessionConfig,
    arena: EntityArena,
    identity: IdentityMap,
    uow: UnitOfWork,
}

impl<S: StoreBackend> Session<S> {
    /// Creates a session over a registry and a backend.
    pub fn new(registry: Arc<EntityRegistry>, store: S) -> Self {
        Self::with_config(registry, store, SessionConfig::default())
    }

    /// Creates a session with explicit configuration.
    pub fn with_config(registry: Arc<EntityRegistry>, store: S, config: SessionConfig) -> Self {
        Self {
            registry,
            store,
            config,
            arena: EntityArena::new(),
            identity: IdentityMap::new(),
            uow: UnitOfWork::new(),
        }
    }

    /// The registry this session maps through.
    #[must_use]
    pub fn registry(&self) -> &EntityRegistry {
        &self.registry
    }

    /// Shared access to the backend.
    #[must_use]
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Mutable access to the backend.
    ///
    /// Writing through this handle bypasses the unit of work; it exists
    /// for backend administration (table setup, failure injection).
    pub fn store_mut(&mut self) -> &mut S {
        &mut self.store
    }

    /// Current transaction state.
    #[must_use]
    pub fn state(&self) -> TxnState {
        self.uow.state()
    }

    /// Returns `true` while a unit of work is active.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.uow.is_active()
    }

    // ------------------------------------------------------------------
    // Entity construction and field access
    // ------------------------------------------------------------------

    /// Creates a new, untracked entity of the given type or variant.
    ///
    /// # Errors
    ///
    /// Fails with [`CoreError::UnknownEntityType`] on a registry miss.
    pub fn create(&mut self, type_name: &str) -> CoreResult<EntityRef> {
        let target = self.registry.resolve(type_name)?;
        Ok(self
            .arena
            .alloc(EntityRecord::new(target.type_id, target.variant)))
    }

    /// Sets a scalar field, validating it against the declared kind.
    ///
    /// # Errors
    ///
    /// Fails on a stale handle, an unknown field path, or a value of
    /// the wrong kind.
    pub fn set(&mut self, entity: EntityRef, field: &str, value: SqlValue) -> CoreResult<()> {
        let registry = Arc::clone(&self.registry);
        let rec = self.arena.get_mut(entity).ok_or(CoreError::InvalidHandle)?;
        let desc = registry.descriptor(rec.type_id);
        let fd = desc
            .field_for(field, rec.variant)
            .ok_or_else(|| CoreError::unknown_field(rec.variant.unwrap_or(desc.name), field))?;
        if !fd.kind.accepts(&value) {
            return Err(CoreError::TypeMismatch {
                entity: desc.name.into(),
                field: field.into(),
                expected: fd.kind.name(),
                actual: value.kind_name(),
            });
        }
        rec.fields.insert(fd.name, value);
        rec.touch();
        Ok(())
    }

    /// Reads a scalar field; `Null` when unset.
    ///
    /// # Errors
    ///
    /// Fails on a stale handle or an unknown field path.
    pub fn get(&self, entity: EntityRef, field: &str) -> CoreResult<SqlValue> {
        let rec = self.record(entity)?;
        let desc = self.registry.descriptor(rec.type_id);
        let fd = desc
            .field_for(field, rec.variant)
            .ok_or_else(|| CoreError::unknown_field(rec.variant.unwrap_or(desc.name), field))?;
        Ok(rec.field(fd.name))
    }

    /// Assigns the primary key of a new entity.
    ///
    /// Required before persist for types with a caller-assigned key
    /// policy. The key of an entity that has been flushed is immutable;
    /// reassigning it is not supported.
    ///
    /// # Errors
    ///
    /// Fails on a stale handle.
    pub fn set_key(&mut self, entity: EntityRef, key: EntityKey) -> CoreResult<()> {
        let rec = self.arena.get_mut(entity).ok_or(CoreError::InvalidHandle)?;
        rec.key = Some(key);
        Ok(())
    }

    /// The entity's primary key, if one has been assigned yet.
    ///
    /// # Errors
    ///
    /// Fails on a stale handle.
    pub fn key_of(&self, entity: EntityRef) -> CoreResult<Option<EntityKey>> {
        Ok(self.record(entity)?.key)
    }

    /// The entity's concrete type name (the variant name for rows of a
    /// specialization).
    ///
    /// # Errors
    ///
    /// Fails on a stale handle.
    pub fn entity_type(&self, entity: EntityRef) -> CoreResult<&'static str> {
        let rec = self.record(entity)?;
        Ok(rec
            .variant
            .unwrap_or(self.registry.descriptor(rec.type_id).name))
    }

    /// The entity's tracking status.
    ///
    /// # Errors
    ///
    /// Fails on a stale handle.
    pub fn status(&self, entity: EntityRef) -> CoreResult<EntityStatus> {
        Ok(self.record(entity)?.status)
    }

    // ------------------------------------------------------------------
    // Relationships
    // ------------------------------------------------------------------

    /// Links `target` to `owner` through relationship `rel`, keeping
    /// the inverse side consistent.
    ///
    /// # Errors
    ///
    /// Fails on stale handles, an unknown relationship name, or a
    /// target of the wrong type.
    pub fn link(&mut self, owner: EntityRef, rel: &str, target: EntityRef) -> CoreResult<()> {
        relation::link(&self.registry, &mut self.arena, owner, rel, target)
    }

    /// Unlinks `target` from `owner` through `rel`, clearing the
    /// inverse side. A no-op when the pair is not linked.
    ///
    /// # Errors
    ///
    /// Fails on stale handles, an unknown relationship name, or a
    /// target of the wrong type.
    pub fn unlink(&mut self, owner: EntityRef, rel: &str, target: EntityRef) -> CoreResult<()> {
        relation::unlink(&self.registry, &mut self.arena, owner, rel, target)
    }

    /// Reads a to-one relationship. `None` covers both an empty
    /// reference and one not yet loaded.
    ///
    /// # Errors
    ///
    /// Fails on a stale handle or an unknown relationship name.
    pub fn to_one(&self, entity: EntityRef, rel: &str) -> CoreResult<Option<EntityRef>> {
        let rec = self.record(entity)?;
        let desc = self.registry.descriptor(rec.type_id);
        desc.relationship_for(rel)
            .ok_or_else(|| CoreError::unknown_relationship(desc.name, rel))?;
        Ok(rec.to_one(rel))
    }

    /// Reads a to-many relationship (empty when not loaded).
    ///
    /// # Errors
    ///
    /// Fails on a stale handle or an unknown relationship name.
    pub fn to_many(&self, entity: EntityRef, rel: &str) -> CoreResult<Vec<EntityRef>> {
        let rec = self.record(entity)?;
        let desc = self.registry.descriptor(rec.type_id);
        desc.relationship_for(rel)
            .ok_or_else(|| CoreError::unknown_relationship(desc.name, rel))?;
        Ok(rec.to_many(rel).to_vec())
    }

    // ------------------------------------------------------------------
    // Unit of work
    // ------------------------------------------------------------------

    /// Opens a fresh unit of work.
    ///
    /// The persistence context starts empty: instances from earlier
    /// units of work become detached snapshots and later reads
    /// materialize fresh instances.
    ///
    /// # Errors
    ///
    /// Fails with [`CoreError::TransactionAlreadyActive`] if a unit of
    /// work is already open.
    pub fn begin(&mut self) -> CoreResult<()> {
        self.uow.begin()?;
        self.identity.clear();
        Ok(())
    }

    /// Stages an entity for insertion, cascading over composition
    /// relationships.
    ///
    /// Entities with a generated key policy receive their key here,
    /// from the store's key sequence, so it is readable before commit.
    /// Persisting an already-managed entity is a no-op apart from the
    /// cascade.
    ///
    /// # Errors
    ///
    /// Fails with [`CoreError::TransactionNotActive`] outside a unit of
    /// work, or [`CoreError::KeyMissing`] for a caller-assigned key
    /// that was never set.
    pub fn persist(&mut self, entity: EntityRef) -> CoreResult<()> {
        if !self.uow.is_active() {
            return Err(CoreError::TransactionNotActive);
        }
        self.persist_tree(entity)
    }

    /// Commits the unit of work.
    ///
    /// The cascade is re-run over every staged root first, so entities
    /// linked into the graph after their root was persisted are picked
    /// up. All writes happen inside one store transaction, inserts
    /// ordered so that referenced rows precede the rows referencing
    /// them. On any failure the store transaction is rolled back and
    /// the unit of work ends in [`TxnState::RolledBack`].
    ///
    /// # Errors
    ///
    /// Fails with [`CoreError::InvalidTransactionState`] outside an
    /// active unit of work, or with the store-reported error after the
    /// automatic rollback.
    pub fn commit(&mut self) -> CoreResult<()> {
        self.uow.ensure_can_commit()?;
        let roots = self.uow.staged().to_vec();
        let result = roots
            .iter()
            .try_for_each(|&root| self.persist_tree(root))
            .and_then(|()| self.flush());
        match result {
            Ok(()) => {
                self.uow.mark_committed();
                Ok(())
            }
            Err(err) => {
                if let Err(rollback_err) = self.store.rollback() {
                    warn!(error = %rollback_err, "store rollback failed");
                }
                self.abandon_staged();
                self.uow.mark_rolled_back();
                Err(err)
            }
        }
    }

    /// Rolls back the unit of work, discarding staged insertions.
    ///
    /// A no-op outside an active unit of work. Keys already drawn from
    /// a key sequence stay consumed.
    ///
    /// # Errors
    ///
    /// Currently infallible; the signature leaves room for backends
    /// that must be told.
    pub fn rollback(&mut self) -> CoreResult<()> {
        if !self.uow.is_active() {
            return Ok(());
        }
        self.abandon_staged();
        self.uow.mark_rolled_back();
        Ok(())
    }

    /// Detaches every tracked instance.
    ///
    /// Unflushed changes to managed entities are lost; flush first by
    /// committing if they matter.
    pub fn clear(&mut self) {
        self.identity.clear();
    }

    // ------------------------------------------------------------------
    // Reads
    // ------------------------------------------------------------------

    /// Loads an entity by type (or variant) name and key.
    ///
    /// The identity map is consulted first; a hit returns the
    /// in-memory instance without touching the store. Eager
    /// relationships are populated on a store load.
    ///
    /// # Errors
    ///
    /// Fails on an unknown type name or a store failure.
    pub fn find(&mut self, type_name: &str, key: EntityKey) -> CoreResult<Option<EntityRef>> {
        let registry = Arc::clone(&self.registry);
        let target = registry.resolve(type_name)?;
        let desc = registry.descriptor(target.type_id);

        if let Some(entity) = self.identity.get(target.type_id, key) {
            let rec = self.record(entity)?;
            if target.variant.map_or(true, |v| rec.variant == Some(v)) {
                return Ok(Some(entity));
            }
            return Ok(None);
        }

        let mut select = Select::all(desc.table).and(Predicate::Eq(
            desc.key.column.to_owned(),
            SqlValue::Integer(key.as_i64()),
        ));
        if let (Some(spec), Some(variant)) = (&desc.discriminator, target.variant) {
            select = select.and(Predicate::Eq(
                spec.column.to_owned(),
                SqlValue::Text(variant.to_owned()),
            ));
        }
        let rows = self.store.select(&select)?;
        let Some(row) = rows.into_iter().next() else {
            return Ok(None);
        };
        let entity = self.materialize(target.type_id, &row)?;
        self.apply_eager(&[entity], target.type_id, &[])?;
        Ok(Some(entity))
    }

    /// Executes a compiled query.
    ///
    /// Parameter binding is checked up front: an unbound placeholder
    /// fails before any store round-trip. Results come back in store
    /// order, deduplicated through the identity map.
    ///
    /// # Errors
    ///
    /// Fails on unbound parameters, unknown type, field, or
    /// relationship names, or a store failure.
    pub fn query(&mut self, query: &Query, params: &Params) -> CoreResult<Vec<EntityRef>> {
        let registry = Arc::clone(&self.registry);
        let pairs = bind_predicate(&query.predicate, params)?;
        let target = registry.resolve(&query.target)?;
        let desc = registry.descriptor(target.type_id);
        for fetch in &query.fetch {
            desc.relationship_for(fetch)
                .ok_or_else(|| CoreError::unknown_relationship(desc.name, fetch))?;
        }

        let mut select = Select::all(desc.table);
        if let (Some(spec), Some(variant)) = (&desc.discriminator, target.variant) {
            select = select.and(Predicate::Eq(
                spec.column.to_owned(),
                SqlValue::Text(variant.to_owned()),
            ));
        }
        for (path, value) in pairs {
            let column = if path == desc.key.name {
                desc.key.column
            } else {
                desc.field_for(&path, target.variant)
                    .map(|f| f.column)
                    .ok_or_else(|| {
                        CoreError::unknown_field(target.variant.unwrap_or(desc.name), path.clone())
                    })?
            };
            select = select.and(Predicate::Eq(column.to_owned(), value));
        }

        if self.config.log_queries {
            debug!(entity = query.target.as_str(), "executing query");
        }
        let rows = self.store.select(&select)?;
        let mut results = Vec::new();
        for row in rows {
            let entity = self.materialize(target.type_id, &row)?;
            if !results.contains(&entity) {
                results.push(entity);
            }
        }
        self.apply_eager(&results, target.type_id, &query.fetch)?;
        Ok(results)
    }

    /// Parses and executes a query template.
    ///
    /// # Errors
    ///
    /// Fails on a malformed template, plus everything
    /// [`Session::query`] can fail with.
    pub fn query_str(&mut self, template: &str, params: &Params) -> CoreResult<Vec<EntityRef>> {
        let query = Query::parse(template)?;
        self.query(&query, params)
    }

    // ------------------------------------------------------------------
    // Internals: staging and flushing
    // ------------------------------------------------------------------

    fn record(&self, entity: EntityRef) -> CoreResult<&EntityRecord> {
        self.arena.get(entity).ok_or(CoreError::InvalidHandle)
    }

    fn persist_tree(&mut self, root: EntityRef) -> CoreResult<()> {
        let registry = Arc::clone(&self.registry);
        let mut queue = vec![root];
        let mut seen: Vec<EntityRef> = Vec::new();
        while let Some(entity) = queue.pop() {
            if seen.contains(&entity) {
                continue;
            }
            seen.push(entity);

            let (type_id, status, existing_key) = {
                let rec = self.record(entity)?;
                (rec.type_id, rec.status, rec.key)
            };
            let desc = registry.descriptor(type_id);

            if status == EntityStatus::New {
                let key = match (existing_key, desc.key.policy) {
                    (Some(key), _) => key,
                    (None, KeyPolicy::Assigned) => {
                        return Err(CoreError::key_missing(desc.name));
                    }
                    (None, KeyPolicy::Generated) => {
                        let key = EntityKey::new(self.store.reserve_key(desc.table)?);
                        if let Some(rec) = self.arena.get_mut(entity) {
                            rec.key = Some(key);
                        }
                        key
                    }
                };
                // An occupied slot means a key collision; the flush
                // surfaces it as a constraint violation.
                if self.identity.get(type_id, key).is_none() {
                    self.identity.track(type_id, key, entity);
                }
                self.uow.stage(entity)?;
            }

            let rec = self.record(entity)?;
            for rel in &desc.relationships {
                if !rel.cascade {
                    continue;
                }
                if let Some(target) = rec.to_one(rel.name) {
                    queue.push(target);
                }
                queue.extend(rec.to_many(rel.name).iter().copied());
            }
        }
        Ok(())
    }

    /// Orders staged entities so rows referenced through an owning
    /// foreign key are inserted before the rows referencing them.
    fn insertion_order(&self) -> Vec<EntityRef> {
        let staged = self.uow.staged().to_vec();
        let mut order = Vec::with_capacity(staged.len());
        let mut done: Vec<EntityRef> = Vec::new();
        let mut path: Vec<EntityRef> = Vec::new();
        for &root in &staged {
            self.visit(root, &staged, &mut order, &mut done, &mut path);
        }
        order
    }

    fn visit(
        &self,
        entity: EntityRef,
        staged: &[EntityRef],
        order: &mut Vec<EntityRef>,
        done: &mut Vec<EntityRef>,
        path: &mut Vec<EntityRef>,
    ) {
        // A cycle of owning references cannot be serialized as pure
        // inserts; break it at the re-entry point.
        if done.contains(&entity) || path.contains(&entity) {
            return;
        }
        path.push(entity);
        if let Some(rec) = self.arena.get(entity) {
            let desc = self.registry.descriptor(rec.type_id);
            for rel in &desc.relationships {
                if rel.owning && rel.fk_column.is_some() {
                    if let Some(target) = rec.to_one(rel.name) {
                        if staged.contains(&target) {
                            self.visit(target, staged, order, done, path);
                        }
                    }
                }
            }
        }
        path.pop();
        done.push(entity);
        order.push(entity);
    }

    /// Value of an owning foreign key column: the linked target's key,
    /// or the raw key loaded from the store when the reference was
    /// never resolved in memory.
    fn fk_value(&self, rec: &EntityRecord, rel: &RelationshipDescriptor) -> CoreResult<SqlValue> {
        if let Some(entry) = rec.to_one.get(rel.name) {
            return match entry {
                Some(target) => {
                    let target_rec = self.record(*target)?;
                    let key = target_rec.key.ok_or_else(|| {
                        CoreError::key_missing(self.registry.descriptor(target_rec.type_id).name)
                    })?;
                    Ok(SqlValue::Integer(key.as_i64()))
                }
                None => Ok(SqlValue::Null),
            };
        }
        Ok(rec
            .fk_keys
            .get(rel.name)
            .copied()
            .flatten()
            .map_or(SqlValue::Null, |key| SqlValue::Integer(key.as_i64())))
    }

    /// Non-key columns of a record's row: discriminator, scalar fields,
    /// owning foreign keys.
    fn row_columns(
        &self,
        rec: &EntityRecord,
        desc: &EntityDescriptor,
    ) -> CoreResult<Vec<(String, SqlValue)>> {
        let mut columns = Vec::new();
        if let Some(spec) = &desc.discriminator {
            columns.push((
                spec.column.to_owned(),
                SqlValue::Text(rec.variant.unwrap_or(desc.name).to_owned()),
            ));
        }
        for fd in desc.fields_for_variant(rec.variant) {
            columns.push((fd.column.to_owned(), rec.field(fd.name)));
        }
        for rel in &desc.relationships {
            if rel.owning {
                if let Some(fk) = rel.fk_column {
                    columns.push((fk.to_owned(), self.fk_value(rec, rel)?));
                }
            }
        }
        Ok(columns)
    }

    fn link_row(
        &self,
        link: &LinkTable,
        owner_key: EntityKey,
        member: EntityRef,
    ) -> CoreResult<Statement> {
        let member_rec = self.record(member)?;
        let member_key = member_rec.key.ok_or_else(|| {
            CoreError::key_missing(self.registry.descriptor(member_rec.type_id).name)
        })?;
        Ok(Statement::Insert(Insert {
            table: link.table.to_owned(),
            columns: vec![
                (
                    link.owner_column.to_owned(),
                    SqlValue::Integer(owner_key.as_i64()),
                ),
                (
                    link.target_column.to_owned(),
                    SqlValue::Integer(member_key.as_i64()),
                ),
            ],
        }))
    }

    /// Returns `true` if `entity` is the identity-tracked instance for
    /// its (type, key); detached snapshots from earlier units of work
    /// are not.
    fn tracked(&self, entity: EntityRef, rec: &EntityRecord) -> bool {
        rec.key
            .is_some_and(|key| self.identity.get(rec.type_id, key) == Some(entity))
    }

    fn build_statements(&self, order: &[EntityRef]) -> CoreResult<Vec<Statement>> {
        let mut statements = Vec::new();
        let mut links = Vec::new();

        // Entity inserts, then link rows, then updates: link rows and
        // updated foreign keys may reference any inserted row.
        for &entity in order {
            let rec = self.record(entity)?;
            let desc = self.registry.descriptor(rec.type_id);
            let key = rec.key.ok_or_else(|| CoreError::key_missing(desc.name))?;
            let mut columns = vec![(
                desc.key.column.to_owned(),
                SqlValue::Integer(key.as_i64()),
            )];
            columns.extend(self.row_columns(rec, desc)?);
            statements.push(Statement::Insert(Insert {
                table: desc.table.to_owned(),
                columns,
            }));

            // New owners flush their full collections.
            for rel in &desc.relationships {
                if !rel.owning {
                    continue;
                }
                if let Some(link) = &rel.link {
                    for &member in rec.to_many(rel.name) {
                        links.push(self.link_row(link, key, member)?);
                    }
                }
            }
        }

        // Managed owners flush only memberships added since their last
        // flush.
        for (entity, rec) in self.arena.iter() {
            if rec.status != EntityStatus::Managed || !self.tracked(entity, rec) {
                continue;
            }
            let desc = self.registry.descriptor(rec.type_id);
            let Some(key) = rec.key else { continue };
            for (rel_name, member) in &rec.pending_links {
                let link = desc
                    .relationship_for(rel_name)
                    .and_then(|rel| rel.link.as_ref());
                if let Some(link) = link {
                    links.push(self.link_row(link, key, *member)?);
                }
            }
            if rec.dirty {
                statements.push(Statement::Update(Update {
                    table: desc.table.to_owned(),
                    key_column: desc.key.column.to_owned(),
                    key: SqlValue::Integer(key.as_i64()),
                    columns: self.row_columns(rec, desc)?,
                }));
            }
        }

        statements.extend(links);
        Ok(statements)
    }

    fn flush(&mut self) -> CoreResult<()> {
        let order = self.insertion_order();
        let statements = self.build_statements(&order)?;
        debug!(statements = statements.len(), "flushing unit of work");

        self.store.begin()?;
        for statement in &statements {
            self.store.execute(statement)?;
        }
        self.store.commit()?;

        for &entity in &order {
            if let Some(rec) = self.arena.get_mut(entity) {
                rec.status = EntityStatus::Managed;
                rec.dirty = false;
                rec.pending_links.clear();
            }
        }
        for slot in 0..self.arena.len() {
            let entity = EntityRef::new(slot as u32);
            let flushed = self
                .arena
                .get(entity)
                .is_some_and(|rec| rec.status == EntityStatus::Managed && self.tracked(entity, rec));
            if flushed {
                if let Some(rec) = self.arena.get_mut(entity) {
                    rec.dirty = false;
                    rec.pending_links.clear();
                }
            }
        }
        Ok(())
    }

    /// Forgets identity entries for staged entities that never reached
    /// the store.
    fn abandon_staged(&mut self) {
        for entity in self.uow.staged().to_vec() {
            let forget = self.arena.get(entity).and_then(|rec| {
                (rec.status == EntityStatus::New && self.tracked(entity, rec))
                    .then_some((rec.type_id, rec.key?))
            });
            if let Some((type_id, key)) = forget {
                self.identity.forget(type_id, key);
            }
        }
    }

    // ------------------------------------------------------------------
    // Internals: materialization and eager fetching
    // ------------------------------------------------------------------

    /// Turns a store row into a tracked instance. A row whose (type,
    /// key) is already in memory resolves to the existing instance;
    /// the first instance wins and in-memory state is never overwritten
    /// by a later read.
    fn materialize(&mut self, type_id: TypeId, row: &Row) -> CoreResult<EntityRef> {
        let registry = Arc::clone(&self.registry);
        let desc = registry.descriptor(type_id);
        let key = row
            .get(desc.key.column)
            .and_then(SqlValue::as_i64)
            .map(EntityKey::new)
            .ok_or_else(|| {
                CoreError::malformed_row(format!(
                    "row in table {} has no {} column",
                    desc.table, desc.key.column
                ))
            })?;
        if let Some(existing) = self.identity.get(type_id, key) {
            return Ok(existing);
        }

        let variant = match &desc.discriminator {
            Some(spec) => {
                let name = row.get(spec.column).and_then(SqlValue::as_str).ok_or_else(|| {
                    CoreError::malformed_row(format!(
                        "row in table {} has no {} column",
                        desc.table, spec.column
                    ))
                })?;
                if name == desc.name {
                    None
                } else {
                    Some(
                        desc.variant(name)
                            .ok_or_else(|| {
                                CoreError::malformed_row(format!(
                                    "unknown variant {name} in table {}",
                                    desc.table
                                ))
                            })?
                            .name,
                    )
                }
            }
            None => None,
        };

        let mut record = EntityRecord::new(type_id, variant);
        record.key = Some(key);
        record.status = EntityStatus::Managed;
        for fd in desc.fields_for_variant(variant) {
            if let Some(value) = row.get(fd.column) {
                record.fields.insert(fd.name, value.clone());
            }
        }
        for rel in &desc.relationships {
            if let Some(fk) = rel.fk_column {
                let fk_key = row.get(fk).and_then(SqlValue::as_i64).map(EntityKey::new);
                record.fk_keys.insert(rel.name, fk_key);
            }
        }
        let entity = self.arena.alloc(record);
        self.identity.track(type_id, key, entity);
        trace!(entity = %entity, table = desc.table, %key, "materialized row");
        Ok(entity)
    }

    fn apply_eager(
        &mut self,
        parents: &[EntityRef],
        type_id: TypeId,
        extra: &[String],
    ) -> CoreResult<()> {
        let registry = Arc::clone(&self.registry);
        let desc = registry.descriptor(type_id);
        for rel in &desc.relationships {
            let wanted = rel.fetch == FetchMode::Eager || extra.iter().any(|f| f == rel.name);
            if wanted {
                self.fetch_relationship(parents, type_id, rel)?;
            }
        }
        Ok(())
    }

    fn fetch_relationship(
        &mut self,
        parents: &[EntityRef],
        type_id: TypeId,
        rel: &RelationshipDescriptor,
    ) -> CoreResult<()> {
        let registry = Arc::clone(&self.registry);
        let target = registry.resolve(rel.target)?;
        let target_desc = registry.descriptor(target.type_id);
        match (rel.cardinality, rel.owning) {
            (Cardinality::OneToMany, _) | (Cardinality::OneToOne, false) => {
                self.fetch_via_inverse_fk(parents, type_id, rel, target, target_desc)
            }
            (Cardinality::ManyToMany, _) => {
                self.fetch_via_link(parents, type_id, rel, target, target_desc)
            }
            (Cardinality::OneToOne | Cardinality::ManyToOne, true) => {
                self.fetch_to_one(parents, rel, target, target_desc)
            }
            // A non-owning many-to-one carries no state to resolve.
            _ => Ok(()),
        }
    }

    /// Fetches children that point back at the parents through an
    /// owning foreign key (one-to-many, and the inverse one-to-one
    /// side). Outer semantics: every parent ends up with a loaded
    /// collection, empty included.
    fn fetch_via_inverse_fk(
        &mut self,
        parents: &[EntityRef],
        parent_type: TypeId,
        rel: &RelationshipDescriptor,
        target: TypeTarget,
        target_desc: &EntityDescriptor,
    ) -> CoreResult<()> {
        let inverse = rel
            .inverse
            .and_then(|inv| target_desc.relationship_for(inv))
            .ok_or_else(|| {
                CoreError::unknown_relationship(target_desc.name, rel.inverse.unwrap_or(rel.name))
            })?;
        let fk_column = inverse.fk_column.ok_or_else(|| {
            CoreError::malformed_row(format!(
                "relationship {} has no owning foreign key",
                rel.name
            ))
        })?;
        let inverse_name = inverse.name;
        let collection = rel.cardinality.is_collection();

        let mut keys = Vec::new();
        for &parent in parents {
            let rec = self.arena.get_mut(parent).ok_or(CoreError::InvalidHandle)?;
            if collection {
                rec.to_many.entry(rel.name).or_default();
            }
            if rec.status == EntityStatus::Managed {
                if let Some(key) = rec.key {
                    keys.push(key);
                }
            }
        }

        for chunk in keys.chunks(self.config.fetch_batch_size) {
            let mut select = Select::all(target_desc.table).and(Predicate::In(
                fk_column.to_owned(),
                chunk.iter().map(|k| SqlValue::Integer(k.as_i64())).collect(),
            ));
            if let (Some(spec), Some(variant)) = (&target_desc.discriminator, target.variant) {
                select = select.and(Predicate::Eq(
                    spec.column.to_owned(),
                    SqlValue::Text(variant.to_owned()),
                ));
            }
            for row in self.store.select(&select)? {
                let child = self.materialize(target.type_id, &row)?;
                let parent = {
                    let crec = self.record(child)?;
                    match crec.fk_keys.get(inverse_name).copied() {
                        Some(Some(key)) => self.identity.get(parent_type, key),
                        Some(None) => None,
                        // Child was built in memory; its handle state
                        // is authoritative.
                        None => crec.to_one(inverse_name),
                    }
                };
                let Some(parent) = parent else { continue };
                if collection {
                    if let Some(rec) = self.arena.get_mut(parent) {
                        let members = rec.to_many.entry(rel.name).or_default();
                        if !members.contains(&child) {
                            members.push(child);
                        }
                    }
                } else if let Some(rec) = self.arena.get_mut(parent) {
                    rec.to_one.insert(rel.name, Some(child));
                }
                if let Some(rec) = self.arena.get_mut(child) {
                    rec.to_one.insert(inverse_name, Some(parent));
                }
            }
        }
        Ok(())
    }

    /// Resolves owning to-one references from the raw foreign keys
    /// loaded with the parents' rows.
    fn fetch_to_one(
        &mut self,
        parents: &[EntityRef],
        rel: &RelationshipDescriptor,
        target: TypeTarget,
        target_desc: &EntityDescriptor,
    ) -> CoreResult<()> {
        let mut wanted: Vec<EntityKey> = Vec::new();
        for &parent in parents {
            let (resolved, fk_entry) = {
                let rec = self.record(parent)?;
                (
                    rec.to_one.contains_key(rel.name),
                    rec.fk_keys.get(rel.name).copied(),
                )
            };
            if resolved {
                continue;
            }
            match fk_entry {
                Some(Some(key)) => {
                    if !wanted.contains(&key) {
                        wanted.push(key);
                    }
                }
                Some(None) => {
                    if let Some(rec) = self.arena.get_mut(parent) {
                        rec.to_one.insert(rel.name, None);
                    }
                }
                None => {}
            }
        }

        for chunk in wanted.chunks(self.config.fetch_batch_size) {
            let mut select = Select::all(target_desc.table).and(Predicate::In(
                target_desc.key.column.to_owned(),
                chunk.iter().map(|k| SqlValue::Integer(k.as_i64())).collect(),
            ));
            if let (Some(spec), Some(variant)) = (&target_desc.discriminator, target.variant) {
                select = select.and(Predicate::Eq(
                    spec.column.to_owned(),
                    SqlValue::Text(variant.to_owned()),
                ));
            }
            for row in self.store.select(&select)? {
                self.materialize(target.type_id, &row)?;
            }
        }

        let inverse = rel
            .inverse
            .and_then(|inv| target_desc.relationship_for(inv))
            .map(|r| (r.name, r.cardinality.is_collection()));
        for &parent in parents {
            let fk = {
                let rec = self.record(parent)?;
                if rec.to_one.contains_key(rel.name) {
                    None
                } else {
                    rec.fk_keys.get(rel.name).copied().flatten()
                }
            };
            let Some(key) = fk else { continue };
            // A dangling foreign key resolves to an empty reference.
            let child = self.identity.get(target.type_id, key);
            if let Some(rec) = self.arena.get_mut(parent) {
                rec.to_one.insert(rel.name, child);
            }
            if let (Some(child), Some((inv_name, inv_collection))) = (child, inverse) {
                if let Some(rec) = self.arena.get_mut(child) {
                    if inv_collection {
                        let members = rec.to_many.entry(inv_name).or_default();
                        if !members.contains(&parent) {
                            members.push(parent);
                        }
                    } else {
                        rec.to_one.insert(inv_name, Some(parent));
                    }
                }
            }
        }
        Ok(())
    }

    /// Fetches many-to-many memberships through the link table, from
    /// either side of the relationship.
    fn fetch_via_link(
        &mut self,
        parents: &[EntityRef],
        parent_type: TypeId,
        rel: &RelationshipDescriptor,
        target: TypeTarget,
        target_desc: &EntityDescriptor,
    ) -> CoreResult<()> {
        let inverse = rel
            .inverse
            .and_then(|inv| target_desc.relationship_for(inv));
        let (table, our_column, other_column) = if let Some(link) = &rel.link {
            (link.table, link.owner_column, link.target_column)
        } else {
            let link = inverse.and_then(|r| r.link.as_ref()).ok_or_else(|| {
                CoreError::malformed_row(format!(
                    "relationship {} has no link table mapping",
                    rel.name
                ))
            })?;
            (link.table, link.target_column, link.owner_column)
        };
        let inverse_name = inverse.map(|r| r.name);

        let mut keys = Vec::new();
        for &parent in parents {
            let rec = self.arena.get_mut(parent).ok_or(CoreError::InvalidHandle)?;
            rec.to_many.entry(rel.name).or_default();
            if rec.status == EntityStatus::Managed {
                if let Some(key) = rec.key {
                    keys.push(key);
                }
            }
        }

        let mut pairs: Vec<(EntityKey, EntityKey)> = Vec::new();
        for chunk in keys.chunks(self.config.fetch_batch_size) {
            let select = Select::all(table).and(Predicate::In(
                our_column.to_owned(),
                chunk.iter().map(|k| SqlValue::Integer(k.as_i64())).collect(),
            ));
            for row in self.store.select(&select)? {
                let ours = row.get(our_column).and_then(SqlValue::as_i64).ok_or_else(|| {
                    CoreError::malformed_row(format!("link row in {table} has no {our_column}"))
                })?;
                let theirs = row
                    .get(other_column)
                    .and_then(SqlValue::as_i64)
                    .ok_or_else(|| {
                        CoreError::malformed_row(format!(
                            "link row in {table} has no {other_column}"
                        ))
                    })?;
                pairs.push((EntityKey::new(ours), EntityKey::new(theirs)));
            }
        }

        let mut member_keys: Vec<EntityKey> = Vec::new();
        for &(_, member) in &pairs {
            if !member_keys.contains(&member) {
                member_keys.push(member);
            }
        }
        for chunk in member_keys.chunks(self.config.fetch_batch_size) {
            let mut select = Select::all(target_desc.table).and(Predicate::In(
                target_desc.key.column.to_owned(),
                chunk.iter().map(|k| SqlValue::Integer(k.as_i64())).collect(),
            ));
            if let (Some(spec), Some(variant)) = (&target_desc.discriminator, target.variant) {
                select = select.and(Predicate::Eq(
                    spec.column.to_owned(),
                    SqlValue::Text(variant.to_owned()),
                ));
            }
            for row in self.store.select(&select)? {
                self.materialize(target.type_id, &row)?;
            }
        }

        for (owner_key, member_key) in pairs {
            let Some(parent) = self.identity.get(parent_type, owner_key) else {
                continue;
            };
            let Some(member) = self.identity.get(target.type_id, member_key) else {
                continue;
            };
            if let Some(rec) = self.arena.get_mut(parent) {
                let members = rec.to_many.entry(rel.name).or_default();
                if !members.contains(&member) {
                    members.push(member);
                }
            }
            if let Some(inv) = inverse_name {
                if let Some(rec) = self.arena.get_mut(member) {
                    let members = rec.to_many.entry(inv).or_default();
                    if !members.contains(&parent) {
                        members.push(parent);
                    }
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{EntityDescriptor, FieldKind, RelationshipDescriptor};
    use relmap_store::MemoryStore;

    fn registry() -> Arc<EntityRegistry> {
        let mut registry = EntityRegistry::new();
        registry
            .register(
                EntityDescriptor::new("author", "author")
                    .field("name", "name", FieldKind::Text)
                    .relationship(
                        RelationshipDescriptor::one_to_many("books", "book")
                            .inverse_of("author")
                            .cascade()
                            .eager(),
                    ),
            )
            .unwrap();
        registry
            .register(
                EntityDescriptor::new("book", "book")
                    .field("title", "title", FieldKind::Text)
                    .relationship(
                        RelationshipDescriptor::many_to_one("author", "author")
                            .owning_fk("author_id")
                            .inverse_of("books"),
                    )
                    .relationship(
                        RelationshipDescriptor::many_to_many("tags", "tag")
                            .owning_link("book_tag", "book_id", "tag_id")
                            .inverse_of("books"),
                    ),
            )
            .unwrap();
        registry
            .register(
                EntityDescriptor::new("tag", "tag")
                    .key("id", "id", KeyPolicy::Assigned)
                    .field("label", "label", FieldKind::Text)
                    .relationship(
                        RelationshipDescriptor::many_to_many("books", "book").inverse_of("tags"),
                    ),
            )
            .unwrap();
        Arc::new(registry)
    }

    fn store() -> MemoryStore {
        let mut store = MemoryStore::new();
        store.define_table("author", Some("id"));
        store.define_table("book", Some("id"));
        store.define_table("tag", Some("id"));
        store.define_table("book_tag", None);
        store
    }

    fn session() -> Session<MemoryStore> {
        Session::new(registry(), store())
    }

    fn text(s: &str) -> SqlValue {
        SqlValue::Text(s.into())
    }

    /// Creates an author with `titles.len()` linked books.
    fn author_with_books(
        session: &mut Session<MemoryStore>,
        name: &str,
        titles: &[&str],
    ) -> EntityRef {
        let author = session.create("author").unwrap();
        session.set(author, "name", text(name)).unwrap();
        for title in titles {
            let book = session.create("book").unwrap();
            session.set(book, "title", text(title)).unwrap();
            session.link(author, "books", book).unwrap();
        }
        author
    }

    #[test]
    fn create_unknown_type_fails() {
        let mut session = session();
        let err = session.create("spaceship").unwrap_err();
        assert!(matches!(err, CoreError::UnknownEntityType { .. }));
    }

    #[test]
    fn persist_requires_active_transaction() {
        let mut session = session();
        let author = session.create("author").unwrap();
        let err = session.persist(author).unwrap_err();
        assert!(matches!(err, CoreError::TransactionNotActive));
    }

    #[test]
    fn persist_assigns_generated_key_immediately() {
        let mut session = session();
        session.begin().unwrap();
        let author = session.create("author").unwrap();
        assert_eq!(session.key_of(author).unwrap(), None);

        session.persist(author).unwrap();
        assert!(session.key_of(author).unwrap().is_some());
        assert_eq!(session.status(author).unwrap(), EntityStatus::New);
    }

    #[test]
    fn commit_writes_rows_and_manages_entities() {
        let mut session = session();
        session.begin().unwrap();
        let author = author_with_books(&mut session, "homer", &["odyssey"]);
        session.persist(author).unwrap();
        session.commit().unwrap();

        assert_eq!(session.store().row_count("author"), 1);
        assert_eq!(session.store().row_count("book"), 1);
        assert_eq!(session.status(author).unwrap(), EntityStatus::Managed);
        assert_eq!(session.state(), TxnState::Committed);

        let author_key = session.key_of(author).unwrap().unwrap();
        let rows = session.store_mut().select(&Select::all("book")).unwrap();
        assert_eq!(
            rows[0].get("author_id").and_then(SqlValue::as_i64),
            Some(author_key.as_i64())
        );
    }

    #[test]
    fn cascade_picks_up_children_linked_after_persist() {
        let mut session = session();
        session.begin().unwrap();
        let author = author_with_books(&mut session, "homer", &[]);
        session.persist(author).unwrap();

        let book = session.create("book").unwrap();
        session.set(book, "title", text("iliad")).unwrap();
        session.link(author, "books", book).unwrap();
        session.commit().unwrap();

        assert_eq!(session.store().row_count("book"), 1);
        assert_eq!(session.status(book).unwrap(), EntityStatus::Managed);
    }

    #[test]
    fn assigned_key_is_required_before_persist() {
        let mut session = session();
        session.begin().unwrap();
        let tag = session.create("tag").unwrap();
        let err = session.persist(tag).unwrap_err();
        assert!(matches!(err, CoreError::KeyMissing { .. }));
    }

    #[test]
    fn duplicate_assigned_key_rolls_back() {
        let mut session = session();
        session.begin().unwrap();
        for label in ["a", "b"] {
            let tag = session.create("tag").unwrap();
            session.set_key(tag, EntityKey::new(7)).unwrap();
            session.set(tag, "label", text(label)).unwrap();
            session.persist(tag).unwrap();
        }

        let err = session.commit().unwrap_err();
        assert!(matches!(err, CoreError::ConstraintViolation { .. }));
        assert_eq!(session.store().row_count("tag"), 0);
        assert_eq!(session.state(), TxnState::RolledBack);
    }

    #[test]
    fn commit_in_idle_state_fails() {
        let mut session = session();
        let err = session.commit().unwrap_err();
        assert!(matches!(
            err,
            CoreError::InvalidTransactionState { state: "idle" }
        ));
    }

    #[test]
    fn commit_twice_fails() {
        let mut session = session();
        session.begin().unwrap();
        session.commit().unwrap();
        let err = session.commit().unwrap_err();
        assert!(matches!(
            err,
            CoreError::InvalidTransactionState { state: "committed" }
        ));
    }

    #[test]
    fn rollback_without_active_unit_is_a_no_op() {
        let mut session = session();
        session.rollback().unwrap();
        assert_eq!(session.state(), TxnState::Idle);
    }

    #[test]
    fn rollback_discards_staged_insertions() {
        let mut session = session();
        session.begin().unwrap();
        let author = author_with_books(&mut session, "homer", &[]);
        session.persist(author).unwrap();
        let key = session.key_of(author).unwrap().unwrap();

        session.rollback().unwrap();
        assert_eq!(session.state(), TxnState::RolledBack);
        assert_eq!(session.store().row_count("author"), 0);
        assert_eq!(session.find("author", key).unwrap(), None);
    }

    #[test]
    fn injected_failure_mid_flush_rolls_back_all_writes() {
        let mut session = session();
        session.begin().unwrap();
        let author = author_with_books(&mut session, "homer", &["iliad", "odyssey"]);
        session.persist(author).unwrap();

        session.store_mut().fail_after_writes(2);
        let err = session.commit().unwrap_err();
        assert!(matches!(err, CoreError::StoreUnavailable { .. }));
        assert_eq!(session.store().row_count("author"), 0);
        assert_eq!(session.store().row_count("book"), 0);
        assert_eq!(session.state(), TxnState::RolledBack);
    }

    #[test]
    fn find_returns_the_tracked_instance() {
        let mut session = session();
        session.begin().unwrap();
        let author = author_with_books(&mut session, "homer", &[]);
        session.persist(author).unwrap();
        session.commit().unwrap();

        let key = session.key_of(author).unwrap().unwrap();
        assert_eq!(session.find("author", key).unwrap(), Some(author));
        assert_eq!(session.find("author", key).unwrap(), Some(author));
    }

    #[test]
    fn fresh_unit_of_work_detaches_prior_instances() {
        let mut session = session();
        session.begin().unwrap();
        let author = author_with_books(&mut session, "homer", &[]);
        session.persist(author).unwrap();
        session.commit().unwrap();
        let key = session.key_of(author).unwrap().unwrap();

        session.begin().unwrap();
        let reloaded = session.find("author", key).unwrap().unwrap();
        assert_ne!(reloaded, author);
        assert_eq!(session.get(reloaded, "name").unwrap(), text("homer"));
    }

    #[test]
    fn find_of_absent_key_returns_none() {
        let mut session = session();
        assert_eq!(session.find("author", EntityKey::new(99)).unwrap(), None);
    }

    #[test]
    fn eager_fetch_loads_children_and_keeps_empty_collections() {
        let mut session = session();
        session.begin().unwrap();
        let prolific = author_with_books(&mut session, "homer", &["iliad", "odyssey"]);
        let silent = author_with_books(&mut session, "pythagoras", &[]);
        session.persist(prolific).unwrap();
        session.persist(silent).unwrap();
        session.commit().unwrap();

        session.begin().unwrap();
        let authors = session.query_str("from author", &Params::new()).unwrap();
        assert_eq!(authors.len(), 2);

        let books = session.to_many(authors[0], "books").unwrap();
        assert_eq!(books.len(), 2);
        assert!(session.to_many(authors[1], "books").unwrap().is_empty());
        for book in books {
            assert_eq!(session.to_one(book, "author").unwrap(), Some(authors[0]));
        }
    }

    #[test]
    fn query_filters_on_a_field() {
        let mut session = session();
        session.begin().unwrap();
        for name in ["homer", "hesiod"] {
            let author = author_with_books(&mut session, name, &[]);
            session.persist(author).unwrap();
        }
        session.commit().unwrap();

        let params = Params::new().bind("n", text("hesiod"));
        let found = session
            .query_str("from author a where a.name = :n", &params)
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(session.get(found[0], "name").unwrap(), text("hesiod"));
    }

    #[test]
    fn query_can_filter_on_the_key_path() {
        let mut session = session();
        session.begin().unwrap();
        let author = author_with_books(&mut session, "homer", &[]);
        session.persist(author).unwrap();
        session.commit().unwrap();
        let key = session.key_of(author).unwrap().unwrap();

        let params = Params::new().bind("id", SqlValue::Integer(key.as_i64()));
        let found = session
            .query_str("from author where id = :id", &params)
            .unwrap();
        assert_eq!(found, vec![author]);
    }

    #[test]
    fn unbound_parameter_fails() {
        let mut session = session();
        let err = session
            .query_str("from author where name = :n", &Params::new())
            .unwrap_err();
        assert!(matches!(err, CoreError::UnboundParameter { .. }));
    }

    #[test]
    fn unknown_field_in_query_fails() {
        let mut session = session();
        let params = Params::new().bind("x", text("y"));
        let err = session
            .query_str("from author where shoe_size = :x", &params)
            .unwrap_err();
        assert!(matches!(err, CoreError::UnknownField { .. }));
    }

    #[test]
    fn unknown_type_in_query_fails() {
        let mut session = session();
        let err = session.query_str("from spaceship", &Params::new()).unwrap_err();
        assert!(matches!(err, CoreError::UnknownEntityType { .. }));
    }

    #[test]
    fn criteria_and_template_forms_agree() {
        use crate::query::{Criteria, Expr};

        let mut session = session();
        session.begin().unwrap();
        let author = author_with_books(&mut session, "homer", &["iliad"]);
        session.persist(author).unwrap();
        session.commit().unwrap();

        let params = Params::new().bind("n", text("homer"));
        let by_template = session
            .query_str("from author a where a.name = :n", &params)
            .unwrap();
        let by_criteria = session
            .query(
                &Criteria::from_type("author")
                    .filter(Expr::eq_param("name", "n"))
                    .build(),
                &params,
            )
            .unwrap();
        assert_eq!(by_template, by_criteria);
    }

    #[test]
    fn dirty_managed_fields_flush_as_updates() {
        let mut session = session();
        session.begin().unwrap();
        let author = author_with_books(&mut session, "old", &[]);
        session.persist(author).unwrap();
        session.commit().unwrap();
        let key = session.key_of(author).unwrap().unwrap();

        session.begin().unwrap();
        let reloaded = session.find("author", key).unwrap().unwrap();
        session.set(reloaded, "name", text("new")).unwrap();
        session.commit().unwrap();

        let rows = session.store_mut().select(&Select::all("author")).unwrap();
        assert_eq!(rows[0].get("name").and_then(SqlValue::as_str), Some("new"));
    }

    #[test]
    fn new_owner_flushes_full_link_collection() {
        let mut session = session();
        session.begin().unwrap();
        let book = session.create("book").unwrap();
        session.set(book, "title", text("iliad")).unwrap();
        let tag = session.create("tag").unwrap();
        session.set_key(tag, EntityKey::new(1)).unwrap();
        session.link(book, "tags", tag).unwrap();
        session.persist(book).unwrap();
        session.persist(tag).unwrap();
        session.commit().unwrap();

        assert_eq!(session.store().row_count("book_tag"), 1);
    }

    #[test]
    fn managed_owner_flushes_pending_links_only() {
        let mut session = session();
        session.begin().unwrap();
        let book = session.create("book").unwrap();
        session.set(book, "title", text("iliad")).unwrap();
        let tag = session.create("tag").unwrap();
        session.set_key(tag, EntityKey::new(1)).unwrap();
        session.persist(book).unwrap();
        session.persist(tag).unwrap();
        session.commit().unwrap();
        let book_key = session.key_of(book).unwrap().unwrap();

        session.begin().unwrap();
        let book = session.find("book", book_key).unwrap().unwrap();
        let tag = session.find("tag", EntityKey::new(1)).unwrap().unwrap();
        session.link(book, "tags", tag).unwrap();
        session.commit().unwrap();

        assert_eq!(session.store().row_count("book_tag"), 1);
    }

    #[test]
    fn link_fetch_directive_resolves_a_lazy_reference() {
        let mut session = session();
        session.begin().unwrap();
        let author = author_with_books(&mut session, "homer", &["iliad"]);
        session.persist(author).unwrap();
        session.commit().unwrap();

        session.begin().unwrap();
        let books = session
            .query_str("from book b left join fetch b.author", &Params::new())
            .unwrap();
        assert_eq!(books.len(), 1);
        let linked = session.to_one(books[0], "author").unwrap().unwrap();
        assert_eq!(session.get(linked, "name").unwrap(), text("homer"));
    }

    #[test]
    fn lazy_reference_stays_unloaded_without_a_directive() {
        let mut session = session();
        session.begin().unwrap();
        let author = author_with_books(&mut session, "homer", &["iliad"]);
        session.persist(author).unwrap();
        session.commit().unwrap();

        session.begin().unwrap();
        let books = session.query_str("from book", &Params::new()).unwrap();
        assert_eq!(session.to_one(books[0], "author").unwrap(), None);
    }

    #[test]
    fn set_rejects_a_value_of_the_wrong_kind() {
        let mut session = session();
        let author = session.create("author").unwrap();
        let err = session.set(author, "name", SqlValue::Integer(3)).unwrap_err();
        assert!(matches!(err, CoreError::TypeMismatch { .. }));
    }

    #[test]
    fn set_of_unknown_field_fails() {
        let mut session = session();
        let author = session.create("author").unwrap();
        let err = session.set(author, "shoe_size", text("44")).unwrap_err();
        assert!(matches!(err, CoreError::UnknownField { .. }));
    }
}
