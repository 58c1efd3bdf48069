//! Entity identifiers with generational indices.
//!
//! Ids are dense and recycled through a free list. Each slot carries a
//! generation that is bumped on destruction, so a stale handle to a
//! recycled id is detected instead of silently aliasing the new entity.

use std::fmt;

use bytemuck::{Pod, Zeroable};

use crate::error::{EcsError, EcsResult};

/// Generation counter to detect stale entity references.
/// Incremented each time an entity slot is recycled.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default, PartialOrd, Ord, Pod, Zeroable)]
#[repr(transparent)]
pub struct Generation(u32);

impl Generation {
    /// Create a new generation (starts at 0).
    #[must_use]
    pub const fn new() -> Self {
        Self(0)
    }

    /// Increment the generation counter.
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0.wrapping_add(1))
    }

    /// Get the raw generation value.
    #[must_use]
    pub const fn get(self) -> u32 {
        self.0
    }
}

impl fmt::Debug for Generation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "gen{}", self.0)
    }
}

/// Raw entity index. `0` is reserved for [`Entity::NULL`].
pub type EntityId = u32;

/// A unique identifier for an entity in the world.
///
/// An entity is an `(id, generation)` pair. The id alone is reused after
/// destruction; the pair is not. `Entity` is plain data and can itself be
/// stored inside components.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Pod, Zeroable)]
#[repr(C)]
pub struct Entity {
    /// Index into the entity directory.
    id: EntityId,
    /// Generation counter for this slot.
    generation: Generation,
}

impl Entity {
    /// The "no entity" value. Never alive; also what a zeroed component holds.
    pub const NULL: Entity = Entity {
        id: 0,
        generation: Generation(0),
    };

    /// Create an entity handle with the given id and generation.
    #[must_use]
    pub const fn new(id: EntityId, generation: Generation) -> Self {
        Self { id, generation }
    }

    /// Get the entity's index.
    #[must_use]
    pub const fn id(self) -> EntityId {
        self.id
    }

    /// Get the entity's generation.
    #[must_use]
    pub const fn generation(self) -> Generation {
        self.generation
    }

    #[must_use]
    pub const fn is_null(self) -> bool {
        self.id == 0
    }

    /// Pack entity into a single u64.
    #[must_use]
    pub const fn to_bits(self) -> u64 {
        ((self.generation.0 as u64) << 32) | (self.id as u64)
    }

    /// Unpack entity from a u64.
    #[must_use]
    pub const fn from_bits(bits: u64) -> Self {
        Self {
            id: bits as u32,
            generation: Generation((bits >> 32) as u32),
        }
    }
}

impl Default for Entity {
    fn default() -> Self {
        Self::NULL
    }
}

impl fmt::Debug for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Entity({}v{})", self.id, self.generation.0)
    }
}

impl fmt::Display for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}v{}", self.id, self.generation.0)
    }
}

/// Allocator for entity IDs with generation tracking.
///
/// Maintains a free list of recycled entity slots and tracks
/// the current generation for each slot.
pub struct EntityAllocator {
    /// Generation for each entity slot. Slot 0 is reserved.
    generations: Vec<Generation>,
    /// Whether each slot currently holds a live entity.
    alive: Vec<bool>,
    /// Free list of available entity IDs.
    free_list: Vec<EntityId>,
    /// Number of currently alive entities.
    alive_count: u32,
    /// Highest id a fresh slot may take.
    max_id: EntityId,
}

impl Default for EntityAllocator {
    fn default() -> Self {
        Self::new()
    }
}

impl EntityAllocator {
    /// Create a new entity allocator.
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(0)
    }

    /// Create an allocator with pre-allocated capacity.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        let mut generations = Vec::with_capacity(capacity + 1);
        let mut alive = Vec::with_capacity(capacity + 1);
        generations.push(Generation::new());
        alive.push(false);

        Self {
            generations,
            alive,
            free_list: Vec::with_capacity(capacity / 4),
            alive_count: 0,
            max_id: EntityId::MAX,
        }
    }

    #[cfg(test)]
    const fn with_max_id(mut self, max_id: EntityId) -> Self {
        self.max_id = max_id;
        self
    }

    fn next_fresh_id(&self) -> EcsResult<EntityId> {
        EntityId::try_from(self.generations.len())
            .ok()
            .filter(|&id| id <= self.max_id)
            .ok_or(EcsError::CapacityExceeded {
                limit: self.max_id as usize,
            })
    }

    /// The entity the next [`allocate`](Self::allocate) call will return.
    ///
    /// Fails with `CapacityExceeded` once the id space is used up and no
    /// recycled slot is free.
    pub fn peek(&self) -> EcsResult<Entity> {
        match self.free_list.last() {
            Some(&id) => Ok(Entity::new(id, self.generations[id as usize])),
            None => Ok(Entity::new(self.next_fresh_id()?, Generation::new())),
        }
    }

    /// Allocate a new entity.
    pub fn allocate(&mut self) -> EcsResult<Entity> {
        let entity = if let Some(id) = self.free_list.pop() {
            // Reuse a recycled slot
            self.alive[id as usize] = true;
            let generation = self.generations[id as usize];
            Entity::new(id, generation)
        } else {
            // Allocate a new slot
            let id = self.next_fresh_id()?;
            let generation = Generation::new();
            self.generations.push(generation);
            self.alive.push(true);
            Entity::new(id, generation)
        };
        self.alive_count += 1;
        Ok(entity)
    }

    /// Deallocate an entity, making its slot available for reuse.
    ///
    /// Returns `true` if the entity was valid and deallocated.
    pub fn deallocate(&mut self, entity: Entity) -> bool {
        if !self.is_alive(entity) {
            return false;
        }

        let id = entity.id() as usize;
        // Increment generation to invalidate existing references
        self.generations[id] = self.generations[id].next();
        self.alive[id] = false;
        self.free_list.push(entity.id());
        self.alive_count -= 1;
        true
    }

    /// Check if an entity is currently alive.
    #[must_use]
    pub fn is_alive(&self, entity: Entity) -> bool {
        let id = entity.id() as usize;
        id != 0
            && id < self.generations.len()
            && self.alive[id]
            && self.generations[id] == entity.generation()
    }

    /// Get the number of currently alive entities.
    #[must_use]
    pub const fn alive_count(&self) -> u32 {
        self.alive_count
    }

    /// Number of slots handed out so far, including recycled ones.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.generations.len() - 1
    }
}
