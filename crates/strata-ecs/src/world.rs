//! World - the main container for all ECS data.
//!
//! The world owns the schema, the entity directory and every chunk. Any change
//! to the set of types an entity has migrates its row to the chunk for the new
//! signature: still-present components are copied, surviving arrays are moved,
//! the source row is swap-removed and the entity that filled the hole gets its
//! directory entry patched.
//!
//! Every entity operation checks liveness by comparing generations, in all
//! build profiles.

use std::{fmt, num::NonZeroU32};

use rustc_hash::FxHashMap;
use smallvec::SmallVec;

use crate::{
    builder::EntityBuilder,
    chunk::{Chunk, ChunkId, ChunkStorage, Transition},
    component::{ArrayElement, ArrayType, Component, ComponentType, Tag, TagType},
    definition::{Definition, Describe},
    entity::{Entity, EntityAllocator},
    error::{EcsError, EcsResult},
    query::{self, QueryBuilder},
    schema::{DEFAULT_MAX_ROW_BYTES, Schema, SchemaBank},
    storage::ArrayBuffer,
    view::EntityView,
};

/// Handle to one reference slot of an entity. Handles are 1-based.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Rint(NonZeroU32);

impl Rint {
    /// Create a handle from its raw 1-based value.
    #[must_use]
    pub const fn new(raw: u32) -> Option<Self> {
        match NonZeroU32::new(raw) {
            Some(value) => Some(Self(value)),
            None => None,
        }
    }

    /// Get the raw 1-based value.
    #[must_use]
    pub const fn get(self) -> u32 {
        self.0.get()
    }

    const fn from_slot(slot: usize) -> Self {
        Self(NonZeroU32::MIN.saturating_add(slot as u32))
    }

    const fn slot(self) -> usize {
        (self.0.get() - 1) as usize
    }
}

impl fmt::Debug for Rint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Rint({})", self.0)
    }
}

/// What happens to the children of a destroyed entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ChildPolicy {
    /// Children survive with their parent link cleared.
    #[default]
    Orphan,
    /// Children are destroyed recursively.
    Cascade,
}

/// World construction options.
#[derive(Debug, Clone)]
pub struct WorldConfig {
    /// Largest packed component row a chunk may have.
    pub max_row_bytes: usize,
    /// Hard row limit per chunk. `None` grows without bound.
    pub chunk_capacity: Option<usize>,
    /// Hard limit on live entities. `None` grows without bound.
    pub max_entities: Option<u32>,
    pub child_policy: ChildPolicy,
    /// Directory slots reserved up front.
    pub initial_entity_capacity: usize,
}

impl Default for WorldConfig {
    fn default() -> Self {
        Self {
            max_row_bytes: DEFAULT_MAX_ROW_BYTES,
            chunk_capacity: None,
            max_entities: None,
            child_policy: ChildPolicy::Orphan,
            initial_entity_capacity: 0,
        }
    }
}

impl WorldConfig {
    #[must_use]
    pub fn with_max_row_bytes(mut self, max_row_bytes: usize) -> Self {
        self.max_row_bytes = max_row_bytes;
        self
    }

    #[must_use]
    pub fn with_chunk_capacity(mut self, rows: usize) -> Self {
        self.chunk_capacity = Some(rows);
        self
    }

    #[must_use]
    pub fn with_max_entities(mut self, max_entities: u32) -> Self {
        self.max_entities = Some(max_entities);
        self
    }

    #[must_use]
    pub fn with_child_policy(mut self, child_policy: ChildPolicy) -> Self {
        self.child_policy = child_policy;
        self
    }

    #[must_use]
    pub fn with_entity_capacity(mut self, capacity: usize) -> Self {
        self.initial_entity_capacity = capacity;
        self
    }
}

/// Location of an entity within the chunk storage.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct EntityLocation {
    /// The chunk containing this entity.
    pub chunk: ChunkId,
    /// Row index within the chunk.
    pub row: usize,
}

/// Directory entry for a live entity.
#[derive(Clone, Debug)]
struct EntityMeta {
    /// Current location in chunk storage.
    location: EntityLocation,
    parent: Option<Entity>,
    /// Children in insertion order.
    children: SmallVec<[Entity; 4]>,
    /// Reference slots; `Entity::NULL` marks a vacant slot.
    references: Vec<Entity>,
}

impl EntityMeta {
    fn new(location: EntityLocation) -> Self {
        Self {
            location,
            parent: None,
            children: SmallVec::new(),
            references: Vec::new(),
        }
    }
}

fn missing<T: ?Sized>(entity: Entity) -> EcsError {
    EcsError::MissingComponent {
        entity,
        name: std::any::type_name::<T>(),
    }
}

/// The ECS world - container for all entities and components.
pub struct World {
    config: WorldConfig,
    /// Type registry and layout cache.
    schema: Schema,
    /// Entity ID allocator.
    entities: EntityAllocator,
    /// Entity metadata indexed by entity ID.
    entity_meta: Vec<Option<EntityMeta>>,
    /// Chunk storage.
    chunks: ChunkStorage,
    /// Bumped on every structural change.
    version: u64,
}

impl Default for World {
    fn default() -> Self {
        Self::new()
    }
}

impl World {
    /// Create a new world with the default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(WorldConfig::default())
    }

    /// Create a world with pre-allocated directory capacity.
    #[must_use]
    pub fn with_capacity(entity_capacity: usize) -> Self {
        Self::with_config(WorldConfig::default().with_entity_capacity(entity_capacity))
    }

    #[must_use]
    pub fn with_config(config: WorldConfig) -> Self {
        let capacity = config.initial_entity_capacity;
        Self {
            schema: Schema::with_max_row_bytes(config.max_row_bytes),
            entities: EntityAllocator::with_capacity(capacity),
            entity_meta: Vec::with_capacity(capacity + 1),
            chunks: ChunkStorage::new(config.chunk_capacity),
            version: 0,
            config,
        }
    }

    #[must_use]
    pub fn config(&self) -> &WorldConfig {
        &self.config
    }

    // ==================== Schema ====================

    #[must_use]
    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub(crate) fn schema_mut(&mut self) -> &mut Schema {
        &mut self.schema
    }

    /// Run a bank's registrations against this world's schema.
    pub fn load_bank(&mut self, bank: &impl SchemaBank) -> EcsResult<()> {
        self.schema.load(bank)
    }

    pub fn register_component<T: Component>(&mut self) -> EcsResult<ComponentType> {
        self.schema.register_component::<T>()
    }

    pub fn register_array_element<T: ArrayElement>(&mut self) -> EcsResult<ArrayType> {
        self.schema.register_array_element::<T>()
    }

    pub fn register_tag<T: Tag>(&mut self) -> EcsResult<TagType> {
        self.schema.register_tag::<T>()
    }

    /// Build the definition declared by `D`, registering its types as needed.
    pub fn describe<D: Describe>(&mut self) -> EcsResult<Definition> {
        Definition::of::<D>(&mut self.schema)
    }

    // ==================== Directory ====================

    fn meta(&self, entity: Entity) -> EcsResult<&EntityMeta> {
        if !self.entities.is_alive(entity) {
            return Err(EcsError::EntityNotFound(entity));
        }
        self.entity_meta
            .get(entity.id() as usize)
            .and_then(Option::as_ref)
            .ok_or(EcsError::EntityNotFound(entity))
    }

    fn meta_mut(&mut self, entity: Entity) -> EcsResult<&mut EntityMeta> {
        if !self.entities.is_alive(entity) {
            return Err(EcsError::EntityNotFound(entity));
        }
        self.entity_meta
            .get_mut(entity.id() as usize)
            .and_then(Option::as_mut)
            .ok_or(EcsError::EntityNotFound(entity))
    }

    fn insert_meta(&mut self, entity: Entity, meta: EntityMeta) {
        let id = entity.id() as usize;
        if id >= self.entity_meta.len() {
            self.entity_meta.resize(id + 1, None);
        }
        self.entity_meta[id] = Some(meta);
    }

    /// Point `moved` at `row` after a swap-remove filled that row with it.
    fn patch_row(&mut self, moved: Entity, row: usize) {
        if let Some(Some(meta)) = self.entity_meta.get_mut(moved.id() as usize) {
            meta.location.row = row;
        }
    }

    fn chunk_at(&self, id: ChunkId) -> EcsResult<&Chunk> {
        self.chunks
            .get(id)
            .ok_or_else(|| EcsError::InvalidState(format!("missing chunk {id:?}")))
    }

    fn chunk_at_mut(&mut self, id: ChunkId) -> EcsResult<&mut Chunk> {
        self.chunks
            .get_mut(id)
            .ok_or_else(|| EcsError::InvalidState(format!("missing chunk {id:?}")))
    }

    fn check_entity_limit(&self, additional: u32) -> EcsResult<()> {
        if let Some(max) = self.config.max_entities
            && self.entities.alive_count().saturating_add(additional) > max
        {
            return Err(EcsError::CapacityExceeded {
                limit: max as usize,
            });
        }
        Ok(())
    }

    /// Check if an entity is alive.
    #[must_use]
    pub fn is_alive(&self, entity: Entity) -> bool {
        self.meta(entity).is_ok()
    }

    /// Get the number of alive entities.
    #[must_use]
    pub fn entity_count(&self) -> u32 {
        self.entities.alive_count()
    }

    /// Get the location of an entity.
    pub fn location(&self, entity: Entity) -> EcsResult<EntityLocation> {
        Ok(self.meta(entity)?.location)
    }

    /// The exact signature of an entity.
    pub fn definition_of(&self, entity: Entity) -> EcsResult<Definition> {
        let location = self.meta(entity)?.location;
        Ok(*self.chunk_at(location.chunk)?.definition())
    }

    /// Structural version. Changes whenever an entity is created, destroyed
    /// or moved between chunks.
    #[must_use]
    pub const fn version(&self) -> u64 {
        self.version
    }

    // ==================== Entity Operations ====================

    /// Create an entity with the given signature. All data starts zeroed and
    /// all arrays start empty.
    pub fn create_entity(&mut self, definition: &Definition) -> EcsResult<Entity> {
        self.check_entity_limit(1)?;

        let chunk = self.chunks.get_or_create(definition, &mut self.schema)?;
        let entity = self.entities.peek()?;
        let row = self.chunk_at_mut(chunk)?.push(entity)?;

        let allocated = self.entities.allocate()?;
        debug_assert_eq!(allocated, entity);

        self.insert_meta(entity, EntityMeta::new(EntityLocation { chunk, row }));
        self.version += 1;

        tracing::trace!(%entity, chunk = chunk.as_raw(), row, "created entity");
        Ok(entity)
    }

    /// Spawn a new empty entity.
    pub fn spawn_empty(&mut self) -> EcsResult<Entity> {
        self.create_entity(&Definition::EMPTY)
    }

    /// Spawn an entity with a single component.
    pub fn spawn<T: Component>(&mut self, component: T) -> EcsResult<Entity> {
        self.builder().with(component).build()
    }

    /// Start building an entity that is placed directly in its final chunk.
    pub fn builder(&mut self) -> EntityBuilder<'_> {
        EntityBuilder::new(self)
    }

    /// Destroy an entity, its row and its arrays.
    ///
    /// Children are orphaned or destroyed according to
    /// [`WorldConfig::child_policy`]. References other entities hold to it
    /// become stale and stop resolving.
    pub fn destroy_entity(&mut self, entity: Entity) -> EcsResult<()> {
        self.meta(entity)?;

        match self.config.child_policy {
            ChildPolicy::Orphan => self.destroy_one(entity),
            ChildPolicy::Cascade => {
                // Descendants come after their ancestors, so walk backwards.
                let subtree = self.subtree(entity)?;
                for &member in subtree.iter().rev() {
                    self.destroy_one(member)?;
                }
                Ok(())
            }
        }
    }

    fn destroy_one(&mut self, entity: Entity) -> EcsResult<()> {
        self.meta(entity)?;
        let Some(meta) = self.entity_meta[entity.id() as usize].take() else {
            return Err(EcsError::EntityNotFound(entity));
        };

        if let Some(parent) = meta.parent
            && let Ok(parent_meta) = self.meta_mut(parent)
        {
            parent_meta.children.retain(|child| *child != entity);
        }
        for &child in &meta.children {
            if let Ok(child_meta) = self.meta_mut(child) {
                child_meta.parent = None;
            }
        }

        let location = meta.location;
        let removed = self.chunk_at_mut(location.chunk)?.swap_remove(location.row);
        if let Some(moved) = removed.moved {
            self.patch_row(moved, location.row);
        }

        self.entities.deallocate(entity);
        self.version += 1;

        tracing::trace!(%entity, chunk = location.chunk.as_raw(), moved = ?removed.moved, "destroyed entity");
        Ok(())
    }

    /// `root` followed by all of its descendants, breadth first.
    fn subtree(&self, root: Entity) -> EcsResult<Vec<Entity>> {
        let mut members = vec![root];
        let mut next = 0;
        while next < members.len() {
            let children = self.meta(members[next])?.children.clone();
            members.extend(children);
            next += 1;
        }
        Ok(members)
    }

    // ==================== Migration ====================

    /// Move an entity's row into `target`. No-op if it is already there.
    fn migrate(&mut self, entity: Entity, target: ChunkId) -> EcsResult<EntityLocation> {
        let from = self.meta(entity)?.location;
        if from.chunk == target {
            return Ok(from);
        }

        let (src, dst) = self.chunks.pair_mut(from.chunk, target);
        let result = src.move_row(from.row, dst)?;
        if let Some(moved) = result.moved {
            self.patch_row(moved, from.row);
        }

        let location = EntityLocation {
            chunk: target,
            row: result.dst_row,
        };
        self.meta_mut(entity)?.location = location;
        self.version += 1;

        tracing::trace!(
            %entity,
            from = from.chunk.as_raw(),
            to = target.as_raw(),
            row = location.row,
            "migrated entity"
        );
        Ok(location)
    }

    fn apply_transition(
        &mut self,
        entity: Entity,
        transition: Transition,
    ) -> EcsResult<EntityLocation> {
        let from = self.meta(entity)?.location;
        let target = self
            .chunks
            .transition(from.chunk, transition, &mut self.schema)?;
        self.migrate(entity, target)
    }

    /// Add every type in `definition` the entity lacks, in one migration.
    /// Nothing is removed and present data is left untouched.
    #[doc(alias = "become")]
    pub fn conform(&mut self, entity: Entity, definition: &Definition) -> EcsResult<()> {
        let current = self.definition_of(entity)?;
        if current.is_superset_of(definition) {
            return Ok(());
        }

        let target = self
            .chunks
            .get_or_create(&current.union(definition), &mut self.schema)?;
        self.migrate(entity, target)?;
        Ok(())
    }

    /// [`conform`](Self::conform) to the definition `D` describes.
    pub fn conform_to<D: Describe>(&mut self, entity: Entity) -> EcsResult<EntityView<D>> {
        self.meta(entity)?;
        let definition = self.describe::<D>()?;
        self.conform(entity, &definition)?;
        Ok(EntityView::new(entity))
    }

    /// `true` if the entity has every type in `definition`.
    pub fn is(&self, entity: Entity, definition: &Definition) -> EcsResult<bool> {
        Ok(self.definition_of(entity)?.is_superset_of(definition))
    }

    /// `true` if the entity satisfies `D`. Registers `D`'s types on first use.
    pub fn is_a<D: Describe>(&mut self, entity: Entity) -> EcsResult<bool> {
        self.meta(entity)?;
        let definition = self.describe::<D>()?;
        self.is(entity, &definition)
    }

    /// A typed handle, if the entity satisfies `D`.
    pub fn view<D: Describe>(&mut self, entity: Entity) -> EcsResult<EntityView<D>> {
        if self.is_a::<D>(entity)? {
            Ok(EntityView::new(entity))
        } else {
            Err(EcsError::InvalidState(format!(
                "entity {entity} does not satisfy {}",
                std::any::type_name::<D>()
            )))
        }
    }

    // ==================== Component Operations ====================

    /// Add a zeroed component. No-op if the entity already has it.
    pub fn add_component<T: Component>(&mut self, entity: Entity) -> EcsResult<()> {
        let location = self.meta(entity)?.location;
        let ty = self.schema.register_component::<T>()?;

        if self.chunk_at(location.chunk)?.definition().has_component(ty) {
            return Ok(());
        }
        self.apply_transition(entity, Transition::AddComponent(ty))?;
        Ok(())
    }

    /// Add a component to an entity.
    ///
    /// If the entity already has this component type, it is overwritten.
    pub fn insert<T: Component>(&mut self, entity: Entity, component: T) -> EcsResult<()> {
        self.add_component::<T>(entity)?;
        self.set(entity, component)
    }

    /// Remove a component from an entity.
    ///
    /// Returns the removed value, or `None` if the entity did not have it.
    pub fn remove_component<T: Component>(&mut self, entity: Entity) -> EcsResult<Option<T>> {
        let location = self.meta(entity)?.location;
        let Some(ty) = self.schema.try_component_type::<T>() else {
            return Ok(None);
        };
        let Some(value) = self.chunk_at(location.chunk)?.get::<T>(location.row, ty) else {
            return Ok(None);
        };

        self.apply_transition(entity, Transition::RemoveComponent(ty))?;
        Ok(Some(value))
    }

    fn component_location<T: Component>(
        &self,
        entity: Entity,
    ) -> EcsResult<(EntityLocation, ComponentType)> {
        let location = self.meta(entity)?.location;
        let ty = self
            .schema
            .try_component_type::<T>()
            .ok_or_else(|| missing::<T>(entity))?;

        if self.chunk_at(location.chunk)?.definition().has_component(ty) {
            Ok((location, ty))
        } else {
            Err(missing::<T>(entity))
        }
    }

    /// Get an owned copy of an entity's component.
    pub fn get<T: Component>(&self, entity: Entity) -> EcsResult<T> {
        let (location, ty) = self.component_location::<T>(entity)?;
        self.chunk_at(location.chunk)?
            .get(location.row, ty)
            .ok_or_else(|| missing::<T>(entity))
    }

    pub fn get_ref<T: Component>(&self, entity: Entity) -> EcsResult<&T> {
        let (location, ty) = self.component_location::<T>(entity)?;
        self.chunk_at(location.chunk)?
            .get_ref(location.row, ty)
            .ok_or_else(|| missing::<T>(entity))
    }

    pub fn get_mut<T: Component>(&mut self, entity: Entity) -> EcsResult<&mut T> {
        let (location, ty) = self.component_location::<T>(entity)?;
        self.chunk_at_mut(location.chunk)?
            .get_mut(location.row, ty)
            .ok_or_else(|| missing::<T>(entity))
    }

    /// Overwrite a component the entity already has.
    pub fn set<T: Component>(&mut self, entity: Entity, component: T) -> EcsResult<()> {
        let (location, ty) = self.component_location::<T>(entity)?;
        if self
            .chunk_at_mut(location.chunk)?
            .set(location.row, ty, component)
        {
            Ok(())
        } else {
            Err(missing::<T>(entity))
        }
    }

    /// Check if an entity has a component. `false` for dead entities.
    #[must_use]
    pub fn has<T: Component>(&self, entity: Entity) -> bool {
        self.component_location::<T>(entity).is_ok()
    }

    pub(crate) fn write_component_bytes(
        &mut self,
        entity: Entity,
        ty: ComponentType,
        bytes: &[u8],
    ) -> EcsResult<()> {
        let location = self.meta(entity)?.location;
        match self
            .chunk_at_mut(location.chunk)?
            .component_bytes_mut(location.row, ty)
        {
            Some(slot) if slot.len() == bytes.len() => {
                slot.copy_from_slice(bytes);
                Ok(())
            }
            _ => Err(EcsError::InvalidState(format!(
                "entity {entity} has no {ty:?} of {} bytes",
                bytes.len()
            ))),
        }
    }

    /// Call `f` with every enabled entity matching `definition` that has `T`.
    /// Disabled entities are skipped even when `definition` names the
    /// disabled tag.
    ///
    /// Returns the number of entities visited.
    pub fn for_each_mut<T: Component>(
        &mut self,
        definition: &Definition,
        mut f: impl FnMut(Entity, &mut T),
    ) -> usize {
        let Some(ty) = self.schema.try_component_type::<T>() else {
            return 0;
        };
        let target = definition.with_component(ty);

        let mut visited = 0;
        for chunk in self.chunks.iter_mut() {
            if query::matches(chunk.definition(), &target, true) {
                visited += chunk.len();
                chunk.for_each_mut(ty, &mut f);
            }
        }
        visited
    }

    // ==================== Tags ====================

    pub fn add_tag<T: Tag>(&mut self, entity: Entity) -> EcsResult<()> {
        self.meta(entity)?;
        let ty = self.schema.register_tag::<T>()?;
        self.add_tag_type(entity, ty)
    }

    pub fn remove_tag<T: Tag>(&mut self, entity: Entity) -> EcsResult<()> {
        self.meta(entity)?;
        match self.schema.try_tag_type::<T>() {
            Some(ty) => self.remove_tag_type(entity, ty),
            None => Ok(()),
        }
    }

    #[must_use]
    pub fn has_tag<T: Tag>(&self, entity: Entity) -> bool {
        match (self.schema.try_tag_type::<T>(), self.definition_of(entity)) {
            (Some(ty), Ok(definition)) => definition.has_tag(ty),
            _ => false,
        }
    }

    fn add_tag_type(&mut self, entity: Entity, ty: TagType) -> EcsResult<()> {
        if self.definition_of(entity)?.has_tag(ty) {
            return Ok(());
        }
        self.apply_transition(entity, Transition::AddTag(ty))?;
        Ok(())
    }

    fn remove_tag_type(&mut self, entity: Entity, ty: TagType) -> EcsResult<()> {
        if !self.definition_of(entity)?.has_tag(ty) {
            return Ok(());
        }
        self.apply_transition(entity, Transition::RemoveTag(ty))?;
        Ok(())
    }

    /// Mark an entity disabled. Migrates it to a chunk carrying the
    /// reserved `Disabled` tag, which default queries skip.
    pub fn disable(&mut self, entity: Entity) -> EcsResult<()> {
        self.add_tag_type(entity, TagType::DISABLED)
    }

    pub fn enable(&mut self, entity: Entity) -> EcsResult<()> {
        self.remove_tag_type(entity, TagType::DISABLED)
    }

    pub fn is_enabled(&self, entity: Entity) -> EcsResult<bool> {
        Ok(!self.definition_of(entity)?.is_disabled())
    }

    // ==================== Arrays ====================

    /// Give the entity an array of `len` zeroed elements.
    /// No-op if it already has an array of this type.
    pub fn create_array<T: ArrayElement>(&mut self, entity: Entity, len: usize) -> EcsResult<()> {
        let current = self.definition_of(entity)?;
        let ty = self.schema.register_array_element::<T>()?;
        if current.has_array(ty) {
            return Ok(());
        }

        let location = self.apply_transition(entity, Transition::AddArray(ty))?;
        if let Some(array) = self
            .chunk_at_mut(location.chunk)?
            .array_mut(location.row, ty)
        {
            array.resize(len);
        }
        Ok(())
    }

    /// Drop the entity's array of `T`. No-op if it has none.
    pub fn destroy_array<T: ArrayElement>(&mut self, entity: Entity) -> EcsResult<()> {
        let current = self.definition_of(entity)?;
        let Some(ty) = self.schema.try_array_type::<T>() else {
            return Ok(());
        };
        if !current.has_array(ty) {
            return Ok(());
        }
        self.apply_transition(entity, Transition::RemoveArray(ty))?;
        Ok(())
    }

    fn array_location<T: ArrayElement>(
        &self,
        entity: Entity,
    ) -> EcsResult<(EntityLocation, ArrayType)> {
        let location = self.meta(entity)?.location;
        let ty = self
            .schema
            .try_array_type::<T>()
            .ok_or_else(|| missing::<[T]>(entity))?;

        if self.chunk_at(location.chunk)?.definition().has_array(ty) {
            Ok((location, ty))
        } else {
            Err(missing::<[T]>(entity))
        }
    }

    fn array_buffer_mut<T: ArrayElement>(&mut self, entity: Entity) -> EcsResult<&mut ArrayBuffer> {
        let (location, ty) = self.array_location::<T>(entity)?;
        self.chunk_at_mut(location.chunk)?
            .array_mut(location.row, ty)
            .ok_or_else(|| missing::<[T]>(entity))
    }

    pub fn array<T: ArrayElement>(&self, entity: Entity) -> EcsResult<&[T]> {
        let (location, ty) = self.array_location::<T>(entity)?;
        self.chunk_at(location.chunk)?
            .array(location.row, ty)
            .map(ArrayBuffer::as_slice::<T>)
            .ok_or_else(|| missing::<[T]>(entity))
    }

    pub fn array_mut<T: ArrayElement>(&mut self, entity: Entity) -> EcsResult<&mut [T]> {
        Ok(self.array_buffer_mut::<T>(entity)?.as_mut_slice())
    }

    /// Resize in place. New elements are zeroed; the entity does not move.
    pub fn resize_array<T: ArrayElement>(&mut self, entity: Entity, len: usize) -> EcsResult<()> {
        self.array_buffer_mut::<T>(entity)?.resize(len);
        Ok(())
    }

    /// Replace the contents of the entity's array, creating it if needed.
    pub fn set_array<T: ArrayElement>(&mut self, entity: Entity, values: &[T]) -> EcsResult<()> {
        self.create_array::<T>(entity, 0)?;
        self.array_buffer_mut::<T>(entity)?.assign(values);
        Ok(())
    }

    #[must_use]
    pub fn has_array<T: ArrayElement>(&self, entity: Entity) -> bool {
        self.array_location::<T>(entity).is_ok()
    }

    pub(crate) fn replace_array(
        &mut self,
        entity: Entity,
        ty: ArrayType,
        buffer: ArrayBuffer,
    ) -> EcsResult<()> {
        let location = self.meta(entity)?.location;
        let slot = self
            .chunk_at_mut(location.chunk)?
            .array_mut(location.row, ty)
            .ok_or_else(|| EcsError::InvalidState(format!("entity {entity} has no {ty:?}")))?;
        *slot = buffer;
        Ok(())
    }

    // ==================== Hierarchy ====================

    /// Make `parent` the parent of `child`, detaching it from any previous
    /// parent. Fails if this would make an entity its own ancestor.
    pub fn set_parent(&mut self, child: Entity, parent: Entity) -> EcsResult<()> {
        let previous = self.meta(child)?.parent;
        self.meta(parent)?;

        if child == parent {
            return Err(EcsError::InvalidState(format!(
                "entity {child} cannot be its own parent"
            )));
        }

        let mut ancestor = Some(parent);
        while let Some(current) = ancestor {
            if current == child {
                return Err(EcsError::InvalidState(format!(
                    "parenting {child} to {parent} would create a cycle"
                )));
            }
            ancestor = self.meta(current)?.parent;
        }

        if previous == Some(parent) {
            return Ok(());
        }
        if let Some(previous) = previous {
            self.meta_mut(previous)?.children.retain(|c| *c != child);
        }
        self.meta_mut(parent)?.children.push(child);
        self.meta_mut(child)?.parent = Some(parent);
        Ok(())
    }

    /// Detach `child` from its parent. Returns the former parent.
    pub fn remove_parent(&mut self, child: Entity) -> EcsResult<Option<Entity>> {
        let previous = self.meta_mut(child)?.parent.take();
        if let Some(parent) = previous {
            self.meta_mut(parent)?.children.retain(|c| *c != child);
        }
        Ok(previous)
    }

    pub fn parent(&self, entity: Entity) -> EcsResult<Option<Entity>> {
        Ok(self.meta(entity)?.parent)
    }

    /// Children in the order they were attached.
    pub fn children(&self, entity: Entity) -> EcsResult<&[Entity]> {
        Ok(&self.meta(entity)?.children)
    }

    // ==================== References ====================

    /// Store a reference to `target`, reusing the first vacant slot.
    pub fn add_reference(&mut self, entity: Entity, target: Entity) -> EcsResult<Rint> {
        self.meta(target)?;
        let references = &mut self.meta_mut(entity)?.references;

        let slot = match references.iter().position(|e| e.is_null()) {
            Some(slot) => {
                references[slot] = target;
                slot
            }
            None => {
                references.push(target);
                references.len() - 1
            }
        };
        Ok(Rint::from_slot(slot))
    }

    /// Vacate a reference slot and return what it held.
    /// Other handles of the entity stay valid.
    pub fn remove_reference(&mut self, entity: Entity, rint: Rint) -> EcsResult<Entity> {
        let target = self.get_reference(entity, rint)?;
        let references = &mut self.meta_mut(entity)?.references;

        references[rint.slot()] = Entity::NULL;
        while references.last().is_some_and(|e| e.is_null()) {
            references.pop();
        }
        Ok(target)
    }

    /// Remove the first reference to `target`. Returns `false` if there was none.
    pub fn remove_reference_to(&mut self, entity: Entity, target: Entity) -> EcsResult<bool> {
        let position = self
            .meta(entity)?
            .references
            .iter()
            .position(|&e| e == target && !e.is_null());

        match position {
            Some(slot) => {
                self.remove_reference(entity, Rint::from_slot(slot))?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Point an occupied slot at a new target.
    pub fn set_reference(&mut self, entity: Entity, rint: Rint, target: Entity) -> EcsResult<()> {
        self.meta(target)?;
        self.get_reference(entity, rint)?;
        self.meta_mut(entity)?.references[rint.slot()] = target;
        Ok(())
    }

    /// The stored target. It may have been destroyed since.
    pub fn get_reference(&self, entity: Entity, rint: Rint) -> EcsResult<Entity> {
        match self.meta(entity)?.references.get(rint.slot()) {
            Some(&target) if !target.is_null() => Ok(target),
            _ => Err(EcsError::InvalidReference { entity, rint }),
        }
    }

    /// The stored target, or `None` if it is no longer alive.
    pub fn resolve_reference(&self, entity: Entity, rint: Rint) -> EcsResult<Option<Entity>> {
        let target = self.get_reference(entity, rint)?;
        Ok(self.is_alive(target).then_some(target))
    }

    /// Occupied reference slots in handle order.
    pub fn references(
        &self,
        entity: Entity,
    ) -> EcsResult<impl Iterator<Item = (Rint, Entity)> + '_> {
        Ok(self
            .meta(entity)?
            .references
            .iter()
            .enumerate()
            .filter(|(_, target)| !target.is_null())
            .map(|(slot, &target)| (Rint::from_slot(slot), target)))
    }

    // ==================== Cloning ====================

    /// Copy the row, arrays and reference list of `source` into a new entity
    /// of the same chunk. Hierarchy links are not copied.
    fn duplicate(&mut self, source: Entity) -> EcsResult<Entity> {
        self.check_entity_limit(1)?;

        let meta = self.meta(source)?;
        let location = meta.location;
        let references = meta.references.clone();

        let entity = self.entities.peek()?;
        let row = self
            .chunk_at_mut(location.chunk)?
            .duplicate_row(location.row, entity)?;
        let allocated = self.entities.allocate()?;
        debug_assert_eq!(allocated, entity);

        let mut meta = EntityMeta::new(EntityLocation {
            chunk: location.chunk,
            row,
        });
        meta.references = references;
        self.insert_meta(entity, meta);
        self.version += 1;
        Ok(entity)
    }

    /// Clone an entity's components, arrays, tags, references and parent
    /// link. References to the source itself point at the clone.
    pub fn clone_entity(&mut self, source: Entity) -> EcsResult<Entity> {
        let parent = self.meta(source)?.parent;
        let clone = self.duplicate(source)?;

        for target in &mut self.meta_mut(clone)?.references {
            if *target == source {
                *target = clone;
            }
        }
        if let Some(parent) = parent {
            self.meta_mut(parent)?.children.push(clone);
            self.meta_mut(clone)?.parent = Some(parent);
        }

        tracing::trace!(%source, %clone, "cloned entity");
        Ok(clone)
    }

    /// Clone `root` and all its descendants. References between members of
    /// the subtree are remapped to the clones; others are kept as-is.
    ///
    /// If any clone cannot be created, the ones already made are destroyed.
    pub fn clone_tree(&mut self, root: Entity) -> EcsResult<Entity> {
        let originals = self.subtree(root)?;
        let mut clones: FxHashMap<Entity, Entity> = FxHashMap::default();
        let mut created = Vec::with_capacity(originals.len());

        for &original in &originals {
            match self.duplicate(original) {
                Ok(clone) => {
                    clones.insert(original, clone);
                    created.push(clone);
                }
                Err(err) => {
                    for clone in created.into_iter().rev() {
                        self.destroy_one(clone)?;
                    }
                    return Err(err);
                }
            }
        }

        for (&original, &clone) in originals.iter().zip(&created) {
            let parent = self
                .meta(original)?
                .parent
                .map(|p| clones.get(&p).copied().unwrap_or(p));
            if let Some(parent) = parent {
                self.meta_mut(parent)?.children.push(clone);
                self.meta_mut(clone)?.parent = Some(parent);
            }

            for target in &mut self.meta_mut(clone)?.references {
                if let Some(&mapped) = clones.get(target) {
                    *target = mapped;
                }
            }
        }

        tracing::trace!(%root, members = originals.len(), "cloned tree");
        Ok(created[0])
    }

    // ==================== Chunk Access ====================

    #[must_use]
    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }

    /// Iterate over all chunks in creation order.
    pub fn chunks(&self) -> impl Iterator<Item = &Chunk> {
        self.chunks.iter()
    }

    #[must_use]
    pub fn chunk(&self, id: ChunkId) -> Option<&Chunk> {
        self.chunks.get(id)
    }

    /// The chunk holding exactly `definition`, if one has been created.
    #[must_use]
    pub fn find_chunk(&self, definition: &Definition) -> Option<&Chunk> {
        self.chunks.find(definition).and_then(|id| self.chunks.get(id))
    }

    // ==================== Query ====================

    /// Start building a read-only query.
    #[must_use]
    pub fn query(&self) -> QueryBuilder<'_> {
        QueryBuilder::new(self)
    }
}

impl fmt::Debug for World {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("World")
            .field("entity_count", &self.entities.alive_count())
            .field("component_types", &self.schema.component_count())
            .field("chunk_count", &self.chunks.len())
            .field("version", &self.version)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::definition::DefinitionBuilder;

    #[derive(Debug, Clone, Copy, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
    #[repr(C)]
    struct Position {
        x: f32,
        y: f32,
    }

    #[derive(Debug, Clone, Copy, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
    #[repr(C)]
    struct Velocity {
        x: f32,
        y: f32,
    }

    #[derive(Debug, Clone, Copy, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
    #[repr(C)]
    struct Health(u32);

    struct Player;

    struct Mover;

    impl Describe for Mover {
        fn describe(def: &mut DefinitionBuilder<'_>) -> EcsResult<()> {
            def.component::<Position>()?.component::<Velocity>()?;
            Ok(())
        }
    }

    /// Every live entity's directory entry points at a row holding it.
    fn assert_directory_consistent(world: &World) {
        for chunk in world.chunks() {
            for (row, &entity) in chunk.entities().iter().enumerate() {
                let location = world.location(entity).unwrap();
                assert_eq!(location, EntityLocation { chunk: chunk.id(), row });
            }
        }
        let rows: usize = world.chunks().map(Chunk::len).sum();
        assert_eq!(rows, world.entity_count() as usize);
    }

    #[test]
    fn test_spawn_and_get() {
        let mut world = World::new();

        let entity = world.spawn(Position { x: 1.0, y: 2.0 }).unwrap();

        assert!(world.is_alive(entity));
        assert_eq!(world.entity_count(), 1);
        assert_eq!(world.get::<Position>(entity), Ok(Position { x: 1.0, y: 2.0 }));
    }

    #[test]
    fn test_get_modify_set() {
        let mut world = World::new();

        let entity = world.spawn(Position { x: 1.0, y: 2.0 }).unwrap();

        let mut pos = world.get::<Position>(entity).unwrap();
        pos.x += 10.0;
        world.set(entity, pos).unwrap();
        assert_eq!(world.get::<Position>(entity).unwrap().x, 11.0);

        world.get_mut::<Position>(entity).unwrap().y = -1.0;
        assert_eq!(world.get_ref::<Position>(entity).unwrap().y, -1.0);
    }

    #[test]
    fn test_create_entity_zeroes_data() {
        let mut world = World::new();
        let pos = world.register_component::<Position>().unwrap();
        let health = world.register_component::<Health>().unwrap();

        let definition = Definition::new().with_component(pos).with_component(health);
        let entity = world.create_entity(&definition).unwrap();

        assert_eq!(world.get::<Position>(entity), Ok(Position { x: 0.0, y: 0.0 }));
        assert_eq!(world.get::<Health>(entity), Ok(Health(0)));
        assert_eq!(world.definition_of(entity), Ok(definition));
    }

    #[test]
    fn test_create_entity_unregistered_type() {
        let mut world = World::new();
        let definition = Definition::new().with_component(ComponentType::from_raw(3));

        assert!(matches!(
            world.create_entity(&definition),
            Err(EcsError::UnknownType { .. })
        ));
        assert_eq!(world.entity_count(), 0);
    }

    #[test]
    fn test_destroy() {
        let mut world = World::new();

        let entity = world.spawn(Position { x: 1.0, y: 2.0 }).unwrap();
        world.destroy_entity(entity).unwrap();

        assert!(!world.is_alive(entity));
        assert_eq!(world.entity_count(), 0);
        assert_eq!(world.destroy_entity(entity), Err(EcsError::EntityNotFound(entity)));
        assert_eq!(
            world.get::<Position>(entity),
            Err(EcsError::EntityNotFound(entity))
        );
    }

    #[test]
    fn test_stale_handle_after_recycle() {
        let mut world = World::new();

        let old = world.spawn(Health(1)).unwrap();
        world.destroy_entity(old).unwrap();
        let new = world.spawn(Health(2)).unwrap();

        assert_eq!(old.id(), new.id());
        assert!(!world.is_alive(old));
        assert_eq!(world.get::<Health>(old), Err(EcsError::EntityNotFound(old)));
        assert_eq!(world.get::<Health>(new), Ok(Health(2)));
    }

    #[test]
    fn test_destroy_maintains_others() {
        let mut world = World::new();

        let e1 = world.spawn(Health(1)).unwrap();
        let e2 = world.spawn(Health(2)).unwrap();
        let e3 = world.spawn(Health(3)).unwrap();

        world.destroy_entity(e1).unwrap();

        assert_eq!(world.get::<Health>(e2), Ok(Health(2)));
        assert_eq!(world.get::<Health>(e3), Ok(Health(3)));
        // e3 was last, so it filled e1's row.
        assert_eq!(world.location(e3).unwrap().row, 0);
        assert_directory_consistent(&world);
    }

    #[test]
    fn test_insert_component() {
        let mut world = World::new();

        let entity = world.spawn(Position { x: 1.0, y: 2.0 }).unwrap();
        world.insert(entity, Velocity { x: 0.5, y: 0.5 }).unwrap();

        assert!(world.has::<Position>(entity));
        assert!(world.has::<Velocity>(entity));
        assert_eq!(world.get::<Velocity>(entity).unwrap().x, 0.5);
        assert_eq!(world.get::<Position>(entity), Ok(Position { x: 1.0, y: 2.0 }));
    }

    #[test]
    fn test_add_present_component_is_noop() {
        let mut world = World::new();

        let entity = world.spawn(Health(5)).unwrap();
        let version = world.version();
        world.add_component::<Health>(entity).unwrap();

        assert_eq!(world.version(), version);
        assert_eq!(world.get::<Health>(entity), Ok(Health(5)));
    }

    #[test]
    fn test_remove_component() {
        let mut world = World::new();

        let entity = world.spawn(Position { x: 1.0, y: 2.0 }).unwrap();
        world.insert(entity, Velocity { x: 0.5, y: 0.5 }).unwrap();

        let removed = world.remove_component::<Velocity>(entity).unwrap();
        assert_eq!(removed, Some(Velocity { x: 0.5, y: 0.5 }));
        assert!(world.has::<Position>(entity));
        assert!(!world.has::<Velocity>(entity));

        assert_eq!(world.remove_component::<Velocity>(entity), Ok(None));
        assert_eq!(world.remove_component::<Health>(entity), Ok(None));
    }

    #[test]
    fn test_missing_component() {
        let mut world = World::new();
        let entity = world.spawn(Health(1)).unwrap();

        assert!(matches!(
            world.get::<Position>(entity),
            Err(EcsError::MissingComponent { .. })
        ));
        assert!(matches!(
            world.set(entity, Position { x: 0.0, y: 0.0 }),
            Err(EcsError::MissingComponent { .. })
        ));
    }

    #[test]
    fn test_failed_migration_leaves_entity_untouched() {
        let config = WorldConfig::default().with_chunk_capacity(1);
        let mut world = World::with_config(config);

        let blocker = world.spawn(Health(1)).unwrap();
        world.insert(blocker, Position { x: 0.0, y: 0.0 }).unwrap();

        let entity = world.spawn(Health(2)).unwrap();
        let before = world.location(entity).unwrap();

        let err = world.insert(entity, Position { x: 3.0, y: 4.0 }).unwrap_err();
        assert_eq!(err, EcsError::CapacityExceeded { limit: 1 });
        assert_eq!(world.location(entity), Ok(before));
        assert_eq!(world.get::<Health>(entity), Ok(Health(2)));
        assert!(!world.has::<Position>(entity));
        assert_directory_consistent(&world);
    }

    #[test]
    fn test_max_entities() {
        let mut world = World::with_config(WorldConfig::default().with_max_entities(2));

        world.spawn_empty().unwrap();
        let second = world.spawn_empty().unwrap();
        assert_eq!(
            world.spawn_empty(),
            Err(EcsError::CapacityExceeded { limit: 2 })
        );

        world.destroy_entity(second).unwrap();
        assert!(world.spawn_empty().is_ok());
    }

    // ==================== Tags and Enabled State ====================

    #[test]
    fn test_tags() {
        let mut world = World::new();
        let entity = world.spawn(Health(1)).unwrap();

        world.add_tag::<Player>(entity).unwrap();
        assert!(world.has_tag::<Player>(entity));
        assert_eq!(world.get::<Health>(entity), Ok(Health(1)));

        world.remove_tag::<Player>(entity).unwrap();
        assert!(!world.has_tag::<Player>(entity));
    }

    #[test]
    fn test_disable_migrates() {
        let mut world = World::new();
        let entity = world.spawn(Health(1)).unwrap();
        let enabled_chunk = world.location(entity).unwrap().chunk;

        world.disable(entity).unwrap();
        assert_eq!(world.is_enabled(entity), Ok(false));
        assert_ne!(world.location(entity).unwrap().chunk, enabled_chunk);
        assert!(world.definition_of(entity).unwrap().is_disabled());

        world.enable(entity).unwrap();
        assert_eq!(world.is_enabled(entity), Ok(true));
        assert_eq!(world.location(entity).unwrap().chunk, enabled_chunk);

        // The disabled chunk stays behind, empty.
        let definition = world.definition_of(entity).unwrap();
        let chunk = world.find_chunk(&definition).unwrap();
        assert_eq!(chunk.id(), enabled_chunk);
        assert_eq!(chunk.entities(), &[entity]);
        let disabled = world.find_chunk(&definition.with_tag(TagType::DISABLED)).unwrap();
        assert!(disabled.is_empty());
        assert!(world.find_chunk(&definition.with_tag(TagType::from_raw(9))).is_none());
    }

    // ==================== Arrays ====================

    #[test]
    fn test_arrays() {
        let mut world = World::new();
        let entity = world.spawn(Health(1)).unwrap();

        world.create_array::<u32>(entity, 3).unwrap();
        assert!(world.has_array::<u32>(entity));
        assert_eq!(world.array::<u32>(entity), Ok(&[0u32, 0, 0][..]));

        world.array_mut::<u32>(entity).unwrap()[1] = 7;
        let version = world.version();
        world.resize_array::<u32>(entity, 5).unwrap();
        assert_eq!(world.version(), version);
        assert_eq!(world.array::<u32>(entity), Ok(&[0u32, 7, 0, 0, 0][..]));

        // Arrays survive migrations.
        world.insert(entity, Position { x: 1.0, y: 1.0 }).unwrap();
        assert_eq!(world.array::<u32>(entity).unwrap()[1], 7);

        // Creating again keeps the existing contents.
        world.create_array::<u32>(entity, 1).unwrap();
        assert_eq!(world.array::<u32>(entity).unwrap().len(), 5);

        world.destroy_array::<u32>(entity).unwrap();
        assert!(!world.has_array::<u32>(entity));
        assert!(matches!(
            world.array::<u32>(entity),
            Err(EcsError::MissingComponent { .. })
        ));
    }

    #[test]
    fn test_set_array() {
        let mut world = World::new();
        let entity = world.spawn_empty().unwrap();

        world.set_array(entity, &[1u16, 2, 3]).unwrap();
        assert_eq!(world.array::<u16>(entity), Ok(&[1u16, 2, 3][..]));
        world.set_array(entity, &[9u16]).unwrap();
        assert_eq!(world.array::<u16>(entity), Ok(&[9u16][..]));
    }

    // ==================== Conform ====================

    #[test]
    fn test_conform_adds_only() {
        let mut world = World::new();
        let entity = world.spawn(Health(9)).unwrap();
        world.insert(entity, Position { x: 1.0, y: 2.0 }).unwrap();

        let view = world.conform_to::<Mover>(entity).unwrap();
        assert_eq!(view.entity(), entity);
        assert_eq!(world.get::<Position>(entity), Ok(Position { x: 1.0, y: 2.0 }));
        assert_eq!(world.get::<Velocity>(entity), Ok(Velocity { x: 0.0, y: 0.0 }));
        assert_eq!(world.get::<Health>(entity), Ok(Health(9)));

        let once = world.definition_of(entity).unwrap();
        let version = world.version();
        world.conform_to::<Mover>(entity).unwrap();
        assert_eq!(world.definition_of(entity), Ok(once));
        assert_eq!(world.version(), version);
    }

    #[test]
    fn test_is_and_view() {
        let mut world = World::new();
        let entity = world.spawn(Position { x: 0.0, y: 0.0 }).unwrap();

        assert_eq!(world.is_a::<Mover>(entity), Ok(false));
        assert!(matches!(
            world.view::<Mover>(entity),
            Err(EcsError::InvalidState(_))
        ));

        world.add_component::<Velocity>(entity).unwrap();
        assert_eq!(world.is_a::<Mover>(entity), Ok(true));
        assert!(world.view::<Mover>(entity).is_ok());
    }

    // ==================== Hierarchy ====================

    #[test]
    fn test_parent_child() {
        let mut world = World::new();
        let parent = world.spawn_empty().unwrap();
        let a = world.spawn_empty().unwrap();
        let b = world.spawn_empty().unwrap();

        world.set_parent(a, parent).unwrap();
        world.set_parent(b, parent).unwrap();

        assert_eq!(world.parent(a), Ok(Some(parent)));
        assert_eq!(world.children(parent).unwrap(), &[a, b]);

        assert_eq!(world.remove_parent(a), Ok(Some(parent)));
        assert_eq!(world.children(parent).unwrap(), &[b]);
        assert_eq!(world.parent(a), Ok(None));
    }

    #[test]
    fn test_reparent_moves_child() {
        let mut world = World::new();
        let first = world.spawn_empty().unwrap();
        let second = world.spawn_empty().unwrap();
        let child = world.spawn_empty().unwrap();

        world.set_parent(child, first).unwrap();
        world.set_parent(child, second).unwrap();

        assert!(world.children(first).unwrap().is_empty());
        assert_eq!(world.children(second).unwrap(), &[child]);
    }

    #[test]
    fn test_parent_cycle_rejected() {
        let mut world = World::new();
        let a = world.spawn_empty().unwrap();
        let b = world.spawn_empty().unwrap();
        let c = world.spawn_empty().unwrap();

        world.set_parent(b, a).unwrap();
        world.set_parent(c, b).unwrap();

        assert!(matches!(world.set_parent(a, a), Err(EcsError::InvalidState(_))));
        assert!(matches!(world.set_parent(a, c), Err(EcsError::InvalidState(_))));
        assert_eq!(world.parent(a), Ok(None));
    }

    #[test]
    fn test_destroy_orphans_children() {
        let mut world = World::new();
        let parent = world.spawn_empty().unwrap();
        let child = world.spawn_empty().unwrap();
        world.set_parent(child, parent).unwrap();

        world.destroy_entity(parent).unwrap();

        assert!(world.is_alive(child));
        assert_eq!(world.parent(child), Ok(None));
    }

    #[test]
    fn test_destroy_cascades() {
        let config = WorldConfig::default().with_child_policy(ChildPolicy::Cascade);
        let mut world = World::with_config(config);

        let root = world.spawn(Health(0)).unwrap();
        let child = world.spawn(Health(1)).unwrap();
        let grandchild = world.spawn(Health(2)).unwrap();
        let bystander = world.spawn(Health(3)).unwrap();
        world.set_parent(child, root).unwrap();
        world.set_parent(grandchild, child).unwrap();

        world.destroy_entity(root).unwrap();

        assert!(!world.is_alive(root));
        assert!(!world.is_alive(child));
        assert!(!world.is_alive(grandchild));
        assert_eq!(world.get::<Health>(bystander), Ok(Health(3)));
        assert_directory_consistent(&world);
    }

    #[test]
    fn test_destroy_child_detaches_from_parent() {
        let mut world = World::new();
        let parent = world.spawn_empty().unwrap();
        let child = world.spawn_empty().unwrap();
        world.set_parent(child, parent).unwrap();

        world.destroy_entity(child).unwrap();
        assert!(world.children(parent).unwrap().is_empty());
    }

    // ==================== References ====================

    #[test]
    fn test_reference_slots() {
        let mut world = World::new();
        let owner = world.spawn_empty().unwrap();
        let a = world.spawn_empty().unwrap();
        let b = world.spawn_empty().unwrap();
        let c = world.spawn_empty().unwrap();

        let ra = world.add_reference(owner, a).unwrap();
        let rb = world.add_reference(owner, b).unwrap();
        assert_eq!(ra.get(), 1);
        assert_eq!(rb.get(), 2);

        assert_eq!(world.remove_reference(owner, ra), Ok(a));
        // Removing one handle keeps the others valid.
        assert_eq!(world.get_reference(owner, rb), Ok(b));
        assert_eq!(
            world.get_reference(owner, ra),
            Err(EcsError::InvalidReference { entity: owner, rint: ra })
        );

        // The vacated slot is reused.
        let rc = world.add_reference(owner, c).unwrap();
        assert_eq!(rc, ra);

        world.set_reference(owner, rc, b).unwrap();
        assert!(world.remove_reference_to(owner, b).unwrap());
        assert_eq!(world.references(owner).unwrap().collect::<Vec<_>>(), vec![(rb, b)]);
        assert!(!world.remove_reference_to(owner, c).unwrap());
    }

    #[test]
    fn test_reference_resolution_after_destroy() {
        let mut world = World::new();
        let owner = world.spawn_empty().unwrap();
        let target = world.spawn_empty().unwrap();

        let rint = world.add_reference(owner, target).unwrap();
        world.destroy_entity(target).unwrap();

        assert_eq!(world.get_reference(owner, rint), Ok(target));
        assert_eq!(world.resolve_reference(owner, rint), Ok(None));
        assert_eq!(
            world.add_reference(owner, target),
            Err(EcsError::EntityNotFound(target))
        );
    }

    #[test]
    fn test_invalid_reference_handle() {
        let mut world = World::new();
        let owner = world.spawn_empty().unwrap();
        let rint = Rint::new(4).unwrap();

        assert_eq!(
            world.remove_reference(owner, rint),
            Err(EcsError::InvalidReference { entity: owner, rint })
        );
        assert!(Rint::new(0).is_none());
    }

    // ==================== Cloning ====================

    #[test]
    fn test_clone_entity() {
        let mut world = World::new();
        let parent = world.spawn_empty().unwrap();
        let other = world.spawn_empty().unwrap();

        let source = world.spawn(Health(42)).unwrap();
        world.add_tag::<Player>(source).unwrap();
        world.set_array(source, &[1u32, 2, 3]).unwrap();
        world.set_parent(source, parent).unwrap();
        let to_self = world.add_reference(source, source).unwrap();
        let to_other = world.add_reference(source, other).unwrap();

        let clone = world.clone_entity(source).unwrap();

        assert_ne!(clone, source);
        assert_eq!(world.get::<Health>(clone), Ok(Health(42)));
        assert!(world.has_tag::<Player>(clone));
        assert_eq!(world.array::<u32>(clone), Ok(&[1u32, 2, 3][..]));
        assert_eq!(world.parent(clone), Ok(Some(parent)));
        assert_eq!(world.children(parent).unwrap(), &[source, clone]);
        assert_eq!(world.get_reference(clone, to_self), Ok(clone));
        assert_eq!(world.get_reference(clone, to_other), Ok(other));

        // Independent storage.
        world.array_mut::<u32>(clone).unwrap()[0] = 9;
        assert_eq!(world.array::<u32>(source).unwrap()[0], 1);
        assert_directory_consistent(&world);
    }

    #[test]
    fn test_clone_tree_remaps_internal_references() {
        let mut world = World::new();
        let outside = world.spawn_empty().unwrap();
        let root = world.spawn(Health(1)).unwrap();
        let child = world.spawn(Health(2)).unwrap();
        world.set_parent(child, root).unwrap();

        let to_child = world.add_reference(root, child).unwrap();
        let to_outside = world.add_reference(child, outside).unwrap();

        let root_clone = world.clone_tree(root).unwrap();
        let children = world.children(root_clone).unwrap().to_vec();
        assert_eq!(children.len(), 1);
        let child_clone = children[0];

        assert_ne!(child_clone, child);
        assert_eq!(world.get::<Health>(child_clone), Ok(Health(2)));
        assert_eq!(world.parent(child_clone), Ok(Some(root_clone)));
        assert_eq!(world.parent(root_clone), Ok(None));
        assert_eq!(world.get_reference(root_clone, to_child), Ok(child_clone));
        assert_eq!(world.get_reference(child_clone, to_outside), Ok(outside));
        assert_eq!(world.children(root).unwrap(), &[child]);
    }

    #[test]
    fn test_clone_tree_rolls_back_on_failure() {
        let mut world = World::with_config(WorldConfig::default().with_max_entities(4));
        let root = world.spawn_empty().unwrap();
        let a = world.spawn_empty().unwrap();
        let b = world.spawn_empty().unwrap();
        world.set_parent(a, root).unwrap();
        world.set_parent(b, root).unwrap();

        assert_eq!(
            world.clone_tree(root),
            Err(EcsError::CapacityExceeded { limit: 4 })
        );
        assert_eq!(world.entity_count(), 3);
        assert_directory_consistent(&world);
    }

    // ==================== Iteration ====================

    #[test]
    fn test_for_each_mut() {
        let mut world = World::new();
        let pos = world.register_component::<Position>().unwrap();

        let a = world.spawn(Position { x: 1.0, y: 0.0 }).unwrap();
        let b = world.spawn(Position { x: 2.0, y: 0.0 }).unwrap();
        world.insert(b, Health(1)).unwrap();
        let disabled = world.spawn(Position { x: 3.0, y: 0.0 }).unwrap();
        world.disable(disabled).unwrap();

        let visited = world.for_each_mut::<Position>(&Definition::new(), |_, p| p.y = p.x * 2.0);
        assert_eq!(visited, 2);
        assert_eq!(world.get::<Position>(a).unwrap().y, 2.0);
        assert_eq!(world.get::<Position>(b).unwrap().y, 4.0);
        assert_eq!(world.get::<Position>(disabled).unwrap().y, 0.0);

        let only_disabled = Definition::new()
            .with_component(pos)
            .with_tag(TagType::DISABLED);
        let visited = world.for_each_mut::<Position>(&only_disabled, |_, p| p.y = 1.0);
        assert_eq!(visited, 0);
        assert_eq!(world.get::<Position>(disabled).unwrap().y, 0.0);
    }

    #[test]
    fn test_version_tracks_structure_only() {
        let mut world = World::new();
        let entity = world.spawn(Health(1)).unwrap();
        let version = world.version();

        world.set(entity, Health(2)).unwrap();
        assert_eq!(world.version(), version);

        world.insert(entity, Position { x: 0.0, y: 0.0 }).unwrap();
        assert!(world.version() > version);
    }

    // ==================== Stress Tests ====================

    #[test]
    fn test_many_migrations_keep_directory_consistent() {
        let mut world = World::new();
        let entities: Vec<_> = (0..200).map(|i| world.spawn(Health(i)).unwrap()).collect();

        for (i, &entity) in entities.iter().enumerate() {
            if i % 2 == 0 {
                world.insert(entity, Position { x: i as f32, y: 0.0 }).unwrap();
            }
            if i % 3 == 0 {
                world.add_tag::<Player>(entity).unwrap();
            }
            if i % 5 == 0 {
                world.destroy_entity(entity).unwrap();
            }
        }
        assert_directory_consistent(&world);

        for (i, &entity) in entities.iter().enumerate() {
            if i % 5 == 0 {
                assert!(!world.is_alive(entity));
                continue;
            }
            assert_eq!(world.get::<Health>(entity), Ok(Health(i as u32)));
            assert_eq!(world.has::<Position>(entity), i % 2 == 0);
            assert_eq!(world.has_tag::<Player>(entity), i % 3 == 0);
        }
    }
}
