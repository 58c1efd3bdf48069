//! Chunk storage - tables of entities sharing one exact [`Definition`].
//!
//! A chunk keeps every component of a row packed together in one row-major
//! buffer: component `ty` of row `r` lives at `stride * r + offset(ty)`.
//! Arrays are separate per-row buffers, one list per array type.

use std::{alloc::Layout, fmt, sync::Arc};

use rustc_hash::FxHashMap;
use smallvec::SmallVec;

use crate::{
    component::{ArrayType, Component, ComponentType, TagType},
    definition::Definition,
    entity::Entity,
    error::{EcsError, EcsResult, TypeKind},
    schema::{RowLayout, Schema},
    storage::{ArrayBuffer, Blob},
};

/// Unique identifier for a chunk. Ids follow creation order.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChunkId(u32);

impl ChunkId {
    /// Create a chunk ID from a raw value.
    #[must_use]
    pub const fn from_raw(id: u32) -> Self {
        Self(id)
    }

    /// Get the raw ID value.
    #[must_use]
    pub const fn as_raw(self) -> u32 {
        self.0
    }

    const fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Debug for ChunkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ChunkId({})", self.0)
    }
}

/// A single-type change to a definition. Keys the per-chunk edge cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Transition {
    AddComponent(ComponentType),
    RemoveComponent(ComponentType),
    AddArray(ArrayType),
    RemoveArray(ArrayType),
    AddTag(TagType),
    RemoveTag(TagType),
}

impl Transition {
    /// The definition reached by applying this change to `base`.
    #[must_use]
    pub fn apply(self, base: Definition) -> Definition {
        match self {
            Self::AddComponent(ty) => base.with_component(ty),
            Self::RemoveComponent(ty) => base.without_component(ty),
            Self::AddArray(ty) => base.with_array(ty),
            Self::RemoveArray(ty) => base.without_array(ty),
            Self::AddTag(ty) => base.with_tag(ty),
            Self::RemoveTag(ty) => base.without_tag(ty),
        }
    }
}

/// Result of [`Chunk::swap_remove`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SwapRemove {
    /// Entity that now occupies the removed row, if the row was not last.
    pub moved: Option<Entity>,
    /// Row count after removal.
    pub len: usize,
}

/// Result of [`Chunk::move_row`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MoveResult {
    /// Row of the entity in the destination chunk.
    pub dst_row: usize,
    /// Entity swapped into the vacated source row, if any.
    pub moved: Option<Entity>,
}

/// A table of entities with identical component, array and tag sets.
pub struct Chunk {
    id: ChunkId,
    definition: Definition,
    layout: Arc<RowLayout>,
    /// Owning entity of each row.
    entities: Vec<Entity>,
    /// Packed component rows.
    rows: Blob,
    /// Array types in ascending index order.
    array_types: SmallVec<[ArrayType; 4]>,
    array_layouts: SmallVec<[Layout; 4]>,
    /// `arrays[slot][row]`, slots parallel to `array_types`.
    arrays: Vec<Vec<ArrayBuffer>>,
    row_limit: Option<usize>,
    /// Transitions already taken out of this chunk.
    edges: FxHashMap<Transition, ChunkId>,
}

impl Chunk {
    /// Create an empty chunk for `definition`.
    pub fn new(
        id: ChunkId,
        definition: Definition,
        layout: Arc<RowLayout>,
        schema: &Schema,
        row_limit: Option<usize>,
    ) -> EcsResult<Self> {
        let row = Layout::from_size_align(layout.stride(), layout.align()).map_err(|_| {
            EcsError::InvalidState(format!(
                "invalid row layout: stride {} align {}",
                layout.stride(),
                layout.align()
            ))
        })?;

        if let Some(index) = definition.tags().iter().find(|&i| i >= schema.tag_count()) {
            return Err(EcsError::UnknownType {
                kind: TypeKind::Tag,
                name: format!("#{index}"),
            });
        }

        let mut array_types = SmallVec::new();
        let mut array_layouts = SmallVec::new();
        for index in definition.arrays() {
            let ty = ArrayType::from_raw(index as u16);
            let info = schema.array_info(ty).ok_or_else(|| EcsError::UnknownType {
                kind: TypeKind::ArrayElement,
                name: format!("#{index}"),
            })?;
            array_types.push(ty);
            array_layouts.push(info.layout());
        }

        let arrays = (0..array_types.len()).map(|_| Vec::new()).collect();

        Ok(Self {
            id,
            definition,
            layout,
            entities: Vec::new(),
            rows: Blob::new(row),
            array_types,
            array_layouts,
            arrays,
            row_limit,
            edges: FxHashMap::default(),
        })
    }

    #[must_use]
    pub const fn id(&self) -> ChunkId {
        self.id
    }

    #[must_use]
    pub const fn definition(&self) -> &Definition {
        &self.definition
    }

    #[must_use]
    pub fn layout(&self) -> &RowLayout {
        &self.layout
    }

    /// Get the number of rows in this chunk.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entities.len()
    }

    /// Check if the chunk is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    /// Get the entities in this chunk, in row order.
    #[must_use]
    pub fn entities(&self) -> &[Entity] {
        &self.entities
    }

    #[must_use]
    pub fn entity(&self, row: usize) -> Option<Entity> {
        self.entities.get(row).copied()
    }

    /// Array types stored by this chunk, ascending.
    #[must_use]
    pub fn array_types(&self) -> &[ArrayType] {
        &self.array_types
    }

    #[must_use]
    pub const fn row_limit(&self) -> Option<usize> {
        self.row_limit
    }

    /// Append a zeroed row with empty arrays for `entity`.
    pub fn push(&mut self, entity: Entity) -> EcsResult<usize> {
        if let Some(limit) = self.row_limit
            && self.entities.len() >= limit
        {
            return Err(EcsError::CapacityExceeded { limit });
        }

        let row = self.rows.push_zeroed();
        self.entities.push(entity);
        for (slot, layout) in self.array_layouts.iter().enumerate() {
            self.arrays[slot].push(ArrayBuffer::new(*layout));
        }

        debug_assert_eq!(row + 1, self.entities.len());
        Ok(row)
    }

    /// Remove `row` by moving the last row into it. Its arrays are dropped.
    ///
    /// # Panics
    ///
    /// Panics if `row` is out of bounds.
    pub fn swap_remove(&mut self, row: usize) -> SwapRemove {
        self.rows.swap_remove(row);
        self.entities.swap_remove(row);
        for column in &mut self.arrays {
            column.swap_remove(row);
        }

        SwapRemove {
            moved: self.entities.get(row).copied(),
            len: self.entities.len(),
        }
    }

    /// Append a copy of `row` owned by `entity`, arrays included.
    pub fn duplicate_row(&mut self, row: usize, entity: Entity) -> EcsResult<usize> {
        assert!(row < self.len(), "row out of bounds in Chunk::duplicate_row");

        let new_row = self.push(entity)?;
        self.rows.copy_item(row, new_row);
        for column in &mut self.arrays {
            column[new_row] = column[row].clone();
        }
        Ok(new_row)
    }

    /// Move `row` into `dst`. Shared components are copied and shared arrays
    /// moved; anything `dst` lacks is dropped and anything it adds is zeroed.
    ///
    /// Nothing is changed if `dst` cannot take another row.
    pub fn move_row(&mut self, row: usize, dst: &mut Chunk) -> EcsResult<MoveResult> {
        assert!(row < self.len(), "row out of bounds in Chunk::move_row");

        let entity = self.entities[row];
        let dst_row = dst.push(entity)?;

        let src_bytes = self.rows.get(row);
        let dst_bytes = dst.rows.get_mut(dst_row);
        for slot in self.layout.columns() {
            if let Some(offset) = dst.layout.offset(slot.ty) {
                dst_bytes[offset..offset + slot.size]
                    .copy_from_slice(&src_bytes[slot.offset..slot.offset + slot.size]);
            }
        }

        for (slot, ty) in self.array_types.iter().enumerate() {
            if let Some(dst_slot) = dst.array_slot(*ty) {
                let empty = ArrayBuffer::new(self.array_layouts[slot]);
                dst.arrays[dst_slot][dst_row] =
                    std::mem::replace(&mut self.arrays[slot][row], empty);
            }
        }

        let removed = self.swap_remove(row);
        Ok(MoveResult {
            dst_row,
            moved: removed.moved,
        })
    }

    // ==================== Components ====================

    /// Raw bytes of component `ty` in `row`.
    #[must_use]
    pub fn component_bytes(&self, row: usize, ty: ComponentType) -> Option<&[u8]> {
        let slot = self.layout.slot(ty)?;
        let bytes = self.rows.get(row);
        Some(&bytes[slot.offset..slot.offset + slot.size])
    }

    #[must_use]
    pub fn component_bytes_mut(&mut self, row: usize, ty: ComponentType) -> Option<&mut [u8]> {
        let slot = self.layout.slot(ty)?;
        let bytes = self.rows.get_mut(row);
        Some(&mut bytes[slot.offset..slot.offset + slot.size])
    }

    /// Copy of component `ty` in `row`.
    #[must_use]
    pub fn get<T: Component>(&self, row: usize, ty: ComponentType) -> Option<T> {
        self.component_bytes(row, ty)
            .map(bytemuck::pod_read_unaligned)
    }

    #[must_use]
    pub fn get_ref<T: Component>(&self, row: usize, ty: ComponentType) -> Option<&T> {
        self.component_bytes(row, ty)
            .and_then(|bytes| bytemuck::try_from_bytes(bytes).ok())
    }

    #[must_use]
    pub fn get_mut<T: Component>(&mut self, row: usize, ty: ComponentType) -> Option<&mut T> {
        self.component_bytes_mut(row, ty)
            .and_then(|bytes| bytemuck::try_from_bytes_mut(bytes).ok())
    }

    /// Overwrite component `ty` in `row`. Returns `false` if the chunk lacks it.
    pub fn set<T: Component>(&mut self, row: usize, ty: ComponentType, value: T) -> bool {
        match self.component_bytes_mut(row, ty) {
            Some(bytes) if bytes.len() == size_of::<T>() => {
                bytes.copy_from_slice(bytemuck::bytes_of(&value));
                true
            }
            _ => false,
        }
    }

    /// Call `f` for every row's component `ty`.
    pub fn for_each_mut<T: Component>(
        &mut self,
        ty: ComponentType,
        mut f: impl FnMut(Entity, &mut T),
    ) {
        let Some(slot) = self.layout.slot(ty) else {
            return;
        };

        for (row, &entity) in self.entities.iter().enumerate() {
            let bytes = &mut self.rows.get_mut(row)[slot.offset..slot.offset + slot.size];
            if let Ok(value) = bytemuck::try_from_bytes_mut(bytes) {
                f(entity, value);
            }
        }
    }

    // ==================== Arrays ====================

    fn array_slot(&self, ty: ArrayType) -> Option<usize> {
        self.array_types.binary_search(&ty).ok()
    }

    #[must_use]
    pub fn array(&self, row: usize, ty: ArrayType) -> Option<&ArrayBuffer> {
        let slot = self.array_slot(ty)?;
        self.arrays[slot].get(row)
    }

    #[must_use]
    pub fn array_mut(&mut self, row: usize, ty: ArrayType) -> Option<&mut ArrayBuffer> {
        let slot = self.array_slot(ty)?;
        self.arrays[slot].get_mut(row)
    }

    // ==================== Edges ====================

    #[must_use]
    pub fn edge(&self, transition: Transition) -> Option<ChunkId> {
        self.edges.get(&transition).copied()
    }

    fn cache_edge(&mut self, transition: Transition, target: ChunkId) {
        self.edges.insert(transition, target);
    }
}

impl fmt::Debug for Chunk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Chunk")
            .field("id", &self.id)
            .field("definition", &self.definition)
            .field("entity_count", &self.entities.len())
            .field("stride", &self.layout.stride())
            .finish()
    }
}

/// Storage for all chunks in a world.
pub struct ChunkStorage {
    /// All chunks, in creation order.
    chunks: Vec<Chunk>,
    /// Map from definition to chunk ID.
    by_definition: FxHashMap<Definition, ChunkId>,
    row_limit: Option<usize>,
}

impl Default for ChunkStorage {
    fn default() -> Self {
        Self::new(None)
    }
}

impl ChunkStorage {
    /// Create empty chunk storage; every chunk gets the given row limit.
    #[must_use]
    pub fn new(row_limit: Option<usize>) -> Self {
        Self {
            chunks: Vec::new(),
            by_definition: FxHashMap::default(),
            row_limit,
        }
    }

    /// Find the chunk holding `definition`, if it exists.
    #[must_use]
    pub fn find(&self, definition: &Definition) -> Option<ChunkId> {
        self.by_definition.get(definition).copied()
    }

    /// Get or create the chunk for `definition`.
    pub fn get_or_create(
        &mut self,
        definition: &Definition,
        schema: &mut Schema,
    ) -> EcsResult<ChunkId> {
        if let Some(id) = self.find(definition) {
            return Ok(id);
        }

        let layout = schema.component_offsets(definition.components())?;
        let id = ChunkId::from_raw(self.chunks.len() as u32);
        let chunk = Chunk::new(id, *definition, layout, schema, self.row_limit)?;

        tracing::debug!(
            chunk = id.as_raw(),
            components = definition.components().count(),
            arrays = definition.arrays().count(),
            tags = definition.tags().count(),
            stride = chunk.layout().stride(),
            "created chunk"
        );

        self.chunks.push(chunk);
        self.by_definition.insert(*definition, id);
        Ok(id)
    }

    /// Chunk reached from `from` by `transition`, created on first use.
    pub fn transition(
        &mut self,
        from: ChunkId,
        transition: Transition,
        schema: &mut Schema,
    ) -> EcsResult<ChunkId> {
        let base = &self.chunks[from.index()];
        if let Some(id) = base.edge(transition) {
            return Ok(id);
        }

        let target = transition.apply(base.definition);
        let id = self.get_or_create(&target, schema)?;
        self.chunks[from.index()].cache_edge(transition, id);
        Ok(id)
    }

    /// Get a chunk by ID.
    #[must_use]
    pub fn get(&self, id: ChunkId) -> Option<&Chunk> {
        self.chunks.get(id.index())
    }

    /// Get a mutable chunk by ID.
    #[must_use]
    pub fn get_mut(&mut self, id: ChunkId) -> Option<&mut Chunk> {
        self.chunks.get_mut(id.index())
    }

    /// Mutable access to two distinct chunks.
    ///
    /// # Panics
    ///
    /// Panics if `a == b` or either id is out of range.
    pub fn pair_mut(&mut self, a: ChunkId, b: ChunkId) -> (&mut Chunk, &mut Chunk) {
        assert_ne!(a, b, "pair_mut needs two distinct chunks");

        if a.index() < b.index() {
            let (left, right) = self.chunks.split_at_mut(b.index());
            (&mut left[a.index()], &mut right[0])
        } else {
            let (left, right) = self.chunks.split_at_mut(a.index());
            (&mut right[0], &mut left[b.index()])
        }
    }

    /// Get the number of chunks.
    #[must_use]
    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    /// Iterate over all chunks in creation order.
    pub fn iter(&self) -> impl Iterator<Item = &Chunk> {
        self.chunks.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Chunk> {
        self.chunks.iter_mut()
    }
}

impl fmt::Debug for ChunkStorage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChunkStorage")
            .field("chunk_count", &self.chunks.len())
            .finish()
    }
}
