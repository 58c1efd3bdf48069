//! Typed entity handles.

use std::{fmt, marker::PhantomData};

use crate::{definition::Describe, entity::Entity};

/// An entity that satisfied `D` when the view was made.
///
/// The view does not pin the entity's signature; later removals can make it
/// stale, in which case accessors report `MissingComponent`.
pub struct EntityView<D> {
    entity: Entity,
    _kind: PhantomData<fn() -> D>,
}

impl<D: Describe> EntityView<D> {
    pub(crate) const fn new(entity: Entity) -> Self {
        Self {
            entity,
            _kind: PhantomData,
        }
    }
}

impl<D> EntityView<D> {
    #[must_use]
    pub const fn entity(&self) -> Entity {
        self.entity
    }
}

impl<D> Clone for EntityView<D> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<D> Copy for EntityView<D> {}

impl<D> PartialEq for EntityView<D> {
    fn eq(&self, other: &Self) -> bool {
        self.entity == other.entity
    }
}

impl<D> Eq for EntityView<D> {}

impl<D> From<EntityView<D>> for Entity {
    fn from(view: EntityView<D>) -> Self {
        view.entity
    }
}

impl<D> fmt::Debug for EntityView<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EntityView<{}>({:?})", std::any::type_name::<D>(), self.entity)
    }
}
