//! Deferred entity construction.
//!
//! The builder collects the full signature first and creates the entity
//! directly in its final chunk, so no intermediate migrations happen.

use bytemuck::bytes_of;

use crate::{
    component::{ArrayElement, ArrayType, Component, ComponentType, Tag},
    definition::Definition,
    entity::Entity,
    error::{EcsError, EcsResult},
    storage::ArrayBuffer,
    world::World,
};

/// Builder returned by [`World::builder`].
///
/// ```ignore
/// let ship = world
///     .builder()
///     .with(Position { x: 0.0, y: 0.0 })
///     .with_tag::<Player>()
///     .with_array(&[Waypoint::default(); 4])
///     .build()?;
/// ```
pub struct EntityBuilder<'w> {
    world: &'w mut World,
    definition: Definition,
    components: Vec<(ComponentType, Vec<u8>)>,
    arrays: Vec<(ArrayType, ArrayBuffer)>,
    parent: Option<Entity>,
    /// First registration failure; reported by `build`.
    error: Option<EcsError>,
}

impl<'w> EntityBuilder<'w> {
    pub(crate) fn new(world: &'w mut World) -> Self {
        Self {
            world,
            definition: Definition::EMPTY,
            components: Vec::new(),
            arrays: Vec::new(),
            parent: None,
            error: None,
        }
    }

    fn record<T>(&mut self, result: EcsResult<T>) -> Option<T> {
        match result {
            Ok(value) => Some(value),
            Err(err) => {
                self.error.get_or_insert(err);
                None
            }
        }
    }

    /// Add a component with an initial value. A later value for the same
    /// type replaces an earlier one.
    #[must_use]
    pub fn with<T: Component>(mut self, component: T) -> Self {
        let registered = self.world.schema_mut().register_component::<T>();
        if let Some(ty) = self.record(registered) {
            self.definition = self.definition.with_component(ty);
            self.components.retain(|(existing, _)| *existing != ty);
            self.components.push((ty, bytes_of(&component).to_vec()));
        }
        self
    }

    /// Add a zeroed component.
    #[must_use]
    pub fn with_default<T: Component>(mut self) -> Self {
        let registered = self.world.schema_mut().register_component::<T>();
        if let Some(ty) = self.record(registered) {
            self.definition = self.definition.with_component(ty);
        }
        self
    }

    #[must_use]
    pub fn with_tag<T: Tag>(mut self) -> Self {
        let registered = self.world.schema_mut().register_tag::<T>();
        if let Some(ty) = self.record(registered) {
            self.definition = self.definition.with_tag(ty);
        }
        self
    }

    /// Add an array holding a copy of `values`.
    #[must_use]
    pub fn with_array<T: ArrayElement>(mut self, values: &[T]) -> Self {
        let registered = self.world.schema_mut().register_array_element::<T>();
        if let Some(ty) = self.record(registered) {
            self.definition = self.definition.with_array(ty);
            let mut buffer = ArrayBuffer::new(std::alloc::Layout::new::<T>());
            buffer.assign(values);
            self.arrays.retain(|(existing, _)| *existing != ty);
            self.arrays.push((ty, buffer));
        }
        self
    }

    /// Merge a prepared signature; its types start zeroed.
    #[must_use]
    pub fn with_definition(mut self, definition: &Definition) -> Self {
        self.definition = self.definition.union(definition);
        self
    }

    #[must_use]
    pub fn child_of(mut self, parent: Entity) -> Self {
        self.parent = Some(parent);
        self
    }

    /// Create the entity. Fails without creating anything if a type could not
    /// be registered or the parent is not alive.
    pub fn build(self) -> EcsResult<Entity> {
        let Self {
            world,
            definition,
            components,
            arrays,
            parent,
            error,
        } = self;

        if let Some(err) = error {
            return Err(err);
        }
        if let Some(parent) = parent
            && !world.is_alive(parent)
        {
            return Err(EcsError::EntityNotFound(parent));
        }

        let entity = world.create_entity(&definition)?;
        for (ty, bytes) in &components {
            world.write_component_bytes(entity, *ty, bytes)?;
        }
        for (ty, buffer) in arrays {
            world.replace_array(entity, ty, buffer)?;
        }
        if let Some(parent) = parent {
            world.set_parent(entity, parent)?;
        }
        Ok(entity)
    }
}
