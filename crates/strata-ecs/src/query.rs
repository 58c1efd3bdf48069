//! Query system for iterating over entities with specific type patterns.
//!
//! Queries are built at runtime with method chaining, not type-level
//! generics. A query matches whole chunks: a chunk matches when its
//! definition contains every required component, array and tag, and (unless
//! disabled entities are requested) lacks the reserved `Disabled` tag.
//!
//! # Basic Usage
//!
//! ```ignore
//! let query = world.query()
//!     .with::<Position>()
//!     .with::<Velocity>()
//!     .build();
//!
//! for row in query.iter() {
//!     let pos: Position = row.get()?;
//!     let vel: Velocity = row.get()?;
//!     println!("{} at ({}, {})", row.entity(), pos.x, pos.y);
//! }
//! ```
//!
//! Borrowing iterators hold `&World`, so the world cannot change while they
//! are alive. [`QueryCursor`] owns no borrow and instead fails with
//! `IteratorInvalidated` once the world's structure changes.

use crate::{
    chunk::{Chunk, ChunkId},
    component::{ArrayElement, Component, Tag, TagType},
    definition::Definition,
    entity::Entity,
    error::{EcsError, EcsResult},
    storage::ArrayBuffer,
    world::World,
};

/// `true` if a chunk with signature `definition` satisfies `target`.
#[must_use]
pub fn matches(definition: &Definition, target: &Definition, exclude_disabled: bool) -> bool {
    definition.is_superset_of(target) && !(exclude_disabled && definition.is_disabled())
}

fn excluded(definition: &Definition, without: &Definition) -> bool {
    definition.components().intersects(without.components())
        || definition.arrays().intersects(without.arrays())
        || definition.tags().intersects(without.tags())
}

// ============================================================================
// QueryBuilder - Runtime Builder Pattern
// ============================================================================

/// Builder for constructing queries at runtime.
///
/// A term naming a type the schema has never seen can match no chunk, so the
/// query simply comes out empty.
pub struct QueryBuilder<'w> {
    world: &'w World,
    target: Definition,
    without: Definition,
    exclude_disabled: bool,
    matches_nothing: bool,
}

impl<'w> QueryBuilder<'w> {
    /// Create a new query builder.
    #[must_use]
    pub fn new(world: &'w World) -> Self {
        Self {
            world,
            target: Definition::EMPTY,
            without: Definition::EMPTY,
            exclude_disabled: true,
            matches_nothing: false,
        }
    }

    /// Require component `T`.
    #[must_use]
    pub fn with<T: Component>(mut self) -> Self {
        match self.world.schema().try_component_type::<T>() {
            Some(ty) => self.target = self.target.with_component(ty),
            None => self.matches_nothing = true,
        }
        self
    }

    /// Require an array of `T`.
    #[must_use]
    pub fn with_array<T: ArrayElement>(mut self) -> Self {
        match self.world.schema().try_array_type::<T>() {
            Some(ty) => self.target = self.target.with_array(ty),
            None => self.matches_nothing = true,
        }
        self
    }

    /// Require tag `T`. Requiring the `Disabled` tag also turns on
    /// [`include_disabled`](Self::include_disabled).
    #[must_use]
    pub fn with_tag<T: Tag>(mut self) -> Self {
        match self.world.schema().try_tag_type::<T>() {
            Some(TagType::DISABLED) => {
                self.target = self.target.with_tag(TagType::DISABLED);
                self.exclude_disabled = false;
            }
            Some(ty) => self.target = self.target.with_tag(ty),
            None => self.matches_nothing = true,
        }
        self
    }

    /// Exclude entities that have component `T`.
    #[must_use]
    pub fn without<T: Component>(mut self) -> Self {
        if let Some(ty) = self.world.schema().try_component_type::<T>() {
            self.without = self.without.with_component(ty);
        }
        self
    }

    /// Exclude entities that have tag `T`.
    #[must_use]
    pub fn without_tag<T: Tag>(mut self) -> Self {
        if let Some(ty) = self.world.schema().try_tag_type::<T>() {
            self.without = self.without.with_tag(ty);
        }
        self
    }

    /// Require everything in a prepared definition.
    #[must_use]
    pub fn matching(mut self, definition: &Definition) -> Self {
        self.target = self.target.union(definition);
        self
    }

    /// Match disabled entities too.
    #[must_use]
    pub fn include_disabled(mut self) -> Self {
        self.exclude_disabled = false;
        self
    }

    /// Build the query.
    ///
    /// Pre-computes matching chunks. Chunks created afterwards are not seen.
    #[must_use]
    pub fn build(self) -> Query<'w> {
        let exclude_disabled = self.exclude_disabled;
        let matching_chunks = if self.matches_nothing {
            Vec::new()
        } else {
            self.world
                .chunks()
                .filter(|chunk| {
                    matches(chunk.definition(), &self.target, exclude_disabled)
                        && !excluded(chunk.definition(), &self.without)
                })
                .map(Chunk::id)
                .collect()
        };

        Query {
            world: self.world,
            target: self.target,
            without: self.without,
            exclude_disabled,
            matches_nothing: self.matches_nothing,
            matching_chunks,
        }
    }
}

// ============================================================================
// Query - Executable Query
// ============================================================================

/// An executable query over one world.
pub struct Query<'w> {
    world: &'w World,
    target: Definition,
    without: Definition,
    exclude_disabled: bool,
    matches_nothing: bool,
    matching_chunks: Vec<ChunkId>,
}

impl<'w> Query<'w> {
    /// Query every entity whose signature contains `target`.
    #[must_use]
    pub fn new(world: &'w World, target: Definition, exclude_disabled: bool) -> Self {
        let builder = QueryBuilder::new(world).matching(&target);
        if exclude_disabled {
            builder.build()
        } else {
            builder.include_disabled().build()
        }
    }

    #[must_use]
    pub fn target(&self) -> &Definition {
        &self.target
    }

    /// Get the number of matching chunks.
    #[must_use]
    pub fn chunk_count(&self) -> usize {
        self.matching_chunks.len()
    }

    /// Matching chunks in creation order, including empty ones.
    pub fn chunks(&self) -> impl Iterator<Item = &'w Chunk> + '_ {
        self.matching_chunks
            .iter()
            .filter_map(|&id| self.world.chunk(id))
    }

    /// Number of matching entities.
    #[must_use]
    pub fn count(&self) -> usize {
        self.chunks().map(Chunk::len).sum()
    }

    /// The first matching entity, if any.
    #[must_use]
    pub fn try_first(&self) -> Option<Entity> {
        self.chunks()
            .find_map(|chunk| chunk.entities().first().copied())
    }

    /// Matching entities in chunk-creation order, then row order.
    pub fn entities(&self) -> impl Iterator<Item = Entity> + '_ {
        self.chunks()
            .flat_map(|chunk| chunk.entities().iter().copied())
    }

    /// Iterate over all matching rows.
    #[must_use]
    pub fn iter(&self) -> QueryIter<'w, '_> {
        QueryIter::new(self)
    }

    /// Execute a closure for each matching row.
    pub fn each<F>(&self, mut f: F)
    where
        F: FnMut(QueryRow<'w>),
    {
        for row in self.iter() {
            f(row);
        }
    }

    /// An owned cursor over the same matches, pinned to the current version.
    #[must_use]
    pub fn cursor(&self) -> QueryCursor {
        QueryCursor {
            target: self.target,
            without: self.without,
            exclude_disabled: self.exclude_disabled,
            matches_nothing: self.matches_nothing,
            version: self.world.version(),
            chunk: 0,
            row: 0,
        }
    }
}

impl core::fmt::Debug for Query<'_> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Query")
            .field("target", &self.target)
            .field("exclude_disabled", &self.exclude_disabled)
            .field("matching_chunks", &self.matching_chunks.len())
            .finish()
    }
}

impl<'w, 'q> IntoIterator for &'q Query<'w> {
    type Item = QueryRow<'w>;
    type IntoIter = QueryIter<'w, 'q>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

// ============================================================================
// QueryIter - Iterator Over Query Results
// ============================================================================

/// Iterator over query results.
pub struct QueryIter<'w, 'q> {
    query: &'q Query<'w>,
    chunk_idx: usize,
    row: usize,
}

impl<'w, 'q> QueryIter<'w, 'q> {
    fn new(query: &'q Query<'w>) -> Self {
        Self {
            query,
            chunk_idx: 0,
            row: 0,
        }
    }
}

impl<'w> Iterator for QueryIter<'w, '_> {
    type Item = QueryRow<'w>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let &id = self.query.matching_chunks.get(self.chunk_idx)?;
            let chunk = self.query.world.chunk(id)?;

            if self.row >= chunk.len() {
                self.chunk_idx += 1;
                self.row = 0;
                continue;
            }

            let row = self.row;
            self.row += 1;

            return Some(QueryRow {
                world: self.query.world,
                chunk,
                entity: chunk.entities()[row],
                row,
            });
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let mut remaining = 0;

        for (i, &id) in self.query.matching_chunks.iter().enumerate().skip(self.chunk_idx) {
            if let Some(chunk) = self.query.world.chunk(id) {
                if i == self.chunk_idx {
                    remaining += chunk.len().saturating_sub(self.row);
                } else {
                    remaining += chunk.len();
                }
            }
        }

        (remaining, Some(remaining))
    }
}

impl ExactSizeIterator for QueryIter<'_, '_> {}

// ============================================================================
// QueryRow - Single Row Access
// ============================================================================

/// A single row from a query result.
pub struct QueryRow<'w> {
    world: &'w World,
    chunk: &'w Chunk,
    entity: Entity,
    row: usize,
}

impl<'w> QueryRow<'w> {
    /// Get the entity for this row.
    #[must_use]
    pub fn entity(&self) -> Entity {
        self.entity
    }

    /// Get an owned copy of a component.
    pub fn get<T: Component>(&self) -> EcsResult<T> {
        self.get_ref::<T>().copied()
    }

    /// Borrow a component for the lifetime of the world borrow.
    pub fn get_ref<T: Component>(&self) -> EcsResult<&'w T> {
        let missing = || EcsError::MissingComponent {
            entity: self.entity,
            name: std::any::type_name::<T>(),
        };
        let ty = self
            .world
            .schema()
            .try_component_type::<T>()
            .ok_or_else(missing)?;
        self.chunk.get_ref(self.row, ty).ok_or_else(missing)
    }

    /// Borrow an array.
    pub fn array<T: ArrayElement>(&self) -> EcsResult<&'w [T]> {
        let missing = || EcsError::MissingComponent {
            entity: self.entity,
            name: std::any::type_name::<[T]>(),
        };
        let ty = self
            .world
            .schema()
            .try_array_type::<T>()
            .ok_or_else(missing)?;
        self.chunk
            .array(self.row, ty)
            .map(ArrayBuffer::as_slice::<T>)
            .ok_or_else(missing)
    }

    /// Check if the entity has a component.
    #[must_use]
    pub fn has<T: Component>(&self) -> bool {
        self.world
            .schema()
            .try_component_type::<T>()
            .is_some_and(|ty| self.chunk.definition().has_component(ty))
    }

    #[must_use]
    pub fn has_tag<T: Tag>(&self) -> bool {
        self.world
            .schema()
            .try_tag_type::<T>()
            .is_some_and(|ty| self.chunk.definition().has_tag(ty))
    }

    #[must_use]
    pub fn is_enabled(&self) -> bool {
        !self.chunk.definition().has_tag(TagType::DISABLED)
    }

    /// The chunk holding this row.
    #[must_use]
    pub fn chunk(&self) -> &'w Chunk {
        self.chunk
    }

    #[must_use]
    pub fn row(&self) -> usize {
        self.row
    }

    /// Get the world reference.
    #[must_use]
    pub fn world(&self) -> &'w World {
        self.world
    }
}

impl core::fmt::Debug for QueryRow<'_> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("QueryRow")
            .field("entity", &self.entity)
            .field("chunk", &self.chunk.id())
            .field("row", &self.row)
            .finish()
    }
}

// ============================================================================
// QueryCursor - Owned Enumeration
// ============================================================================

/// Query enumeration that does not borrow the world.
///
/// The cursor remembers the world's structural version when it was made.
/// Any later create, destroy or migration makes [`next`](Self::next) fail
/// with `IteratorInvalidated`; component writes in place do not.
#[derive(Debug, Clone)]
pub struct QueryCursor {
    target: Definition,
    without: Definition,
    exclude_disabled: bool,
    matches_nothing: bool,
    version: u64,
    /// Index into the world's chunk list.
    chunk: usize,
    row: usize,
}

impl QueryCursor {
    /// Cursor over every entity whose signature contains `target`.
    #[must_use]
    pub fn new(world: &World, target: Definition, exclude_disabled: bool) -> Self {
        Self {
            target,
            without: Definition::EMPTY,
            exclude_disabled,
            matches_nothing: false,
            version: world.version(),
            chunk: 0,
            row: 0,
        }
    }

    /// The version this cursor is pinned to.
    #[must_use]
    pub const fn version(&self) -> u64 {
        self.version
    }

    /// Advance to the next matching entity.
    pub fn next(&mut self, world: &World) -> EcsResult<Option<Entity>> {
        if world.version() != self.version {
            return Err(EcsError::IteratorInvalidated {
                expected: self.version,
                found: world.version(),
            });
        }
        if self.matches_nothing {
            return Ok(None);
        }

        while let Some(chunk) = world.chunk(ChunkId::from_raw(self.chunk as u32)) {
            let definition = chunk.definition();
            if matches(definition, &self.target, self.exclude_disabled)
                && !excluded(definition, &self.without)
                && let Some(entity) = chunk.entity(self.row)
            {
                self.row += 1;
                return Ok(Some(entity));
            }
            self.chunk += 1;
            self.row = 0;
        }
        Ok(None)
    }
}

// ============================================================================
// Tests
// ============================================================================
