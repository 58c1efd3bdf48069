//! Type signatures of entities and chunks.

use std::fmt;

use crate::{
    bitmask::BitMask,
    component::{ArrayElement, ArrayType, Component, ComponentType, Tag, TagType},
    error::EcsResult,
    schema::Schema,
};

/// The exact set of component, array element and tag types of an entity.
///
/// Every chunk is keyed by one `Definition`; two definitions are equal only
/// when all three masks are equal.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Definition {
    components: BitMask,
    arrays: BitMask,
    tags: BitMask,
}

impl Definition {
    /// The empty signature.
    pub const EMPTY: Self = Self {
        components: BitMask::EMPTY,
        arrays: BitMask::EMPTY,
        tags: BitMask::EMPTY,
    };

    #[must_use]
    pub const fn new() -> Self {
        Self::EMPTY
    }

    #[must_use]
    pub const fn from_masks(components: BitMask, arrays: BitMask, tags: BitMask) -> Self {
        Self {
            components,
            arrays,
            tags,
        }
    }

    /// Build the definition declared by `D`, registering its types as needed.
    pub fn of<D: Describe>(schema: &mut Schema) -> EcsResult<Self> {
        let mut builder = DefinitionBuilder::new(schema);
        D::describe(&mut builder)?;
        Ok(builder.build())
    }

    #[must_use]
    pub const fn components(&self) -> &BitMask {
        &self.components
    }

    #[must_use]
    pub const fn arrays(&self) -> &BitMask {
        &self.arrays
    }

    #[must_use]
    pub const fn tags(&self) -> &BitMask {
        &self.tags
    }

    #[must_use]
    pub const fn has_component(&self, ty: ComponentType) -> bool {
        self.components.contains(ty.index())
    }

    #[must_use]
    pub const fn has_array(&self, ty: ArrayType) -> bool {
        self.arrays.contains(ty.index())
    }

    #[must_use]
    pub const fn has_tag(&self, ty: TagType) -> bool {
        self.tags.contains(ty.index())
    }

    #[must_use]
    pub const fn is_disabled(&self) -> bool {
        self.has_tag(TagType::DISABLED)
    }

    #[must_use]
    pub fn with_component(mut self, ty: ComponentType) -> Self {
        self.components.set(ty.index());
        self
    }

    #[must_use]
    pub fn without_component(mut self, ty: ComponentType) -> Self {
        self.components.clear(ty.index());
        self
    }

    #[must_use]
    pub fn with_array(mut self, ty: ArrayType) -> Self {
        self.arrays.set(ty.index());
        self
    }

    #[must_use]
    pub fn without_array(mut self, ty: ArrayType) -> Self {
        self.arrays.clear(ty.index());
        self
    }

    #[must_use]
    pub fn with_tag(mut self, ty: TagType) -> Self {
        self.tags.set(ty.index());
        self
    }

    #[must_use]
    pub fn without_tag(mut self, ty: TagType) -> Self {
        self.tags.clear(ty.index());
        self
    }

    /// `true` if `self` has every type `other` has.
    #[must_use]
    pub fn is_superset_of(&self, other: &Self) -> bool {
        self.components.contains_all(&other.components)
            && self.arrays.contains_all(&other.arrays)
            && self.tags.contains_all(&other.tags)
    }

    #[must_use]
    pub fn union(&self, other: &Self) -> Self {
        Self {
            components: self.components.union(&other.components),
            arrays: self.arrays.union(&other.arrays),
            tags: self.tags.union(&other.tags),
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.components.is_empty() && self.arrays.is_empty() && self.tags.is_empty()
    }
}

impl fmt::Debug for Definition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Definition")
            .field("components", &self.components)
            .field("arrays", &self.arrays)
            .field("tags", &self.tags)
            .finish()
    }
}

/// Declares the types a logical entity kind requires.
///
/// ```ignore
/// struct Ship;
///
/// impl Describe for Ship {
///     fn describe(def: &mut DefinitionBuilder<'_>) -> EcsResult<()> {
///         def.component::<Position>()?
///             .component::<Velocity>()?
///             .array::<Waypoint>()?
///             .tag::<Player>()?;
///         Ok(())
///     }
/// }
/// ```
pub trait Describe: 'static {
    fn describe(def: &mut DefinitionBuilder<'_>) -> EcsResult<()>;
}

/// Accumulates a [`Definition`], registering types on the schema as it goes.
pub struct DefinitionBuilder<'s> {
    schema: &'s mut Schema,
    definition: Definition,
}

impl<'s> DefinitionBuilder<'s> {
    pub fn new(schema: &'s mut Schema) -> Self {
        Self {
            schema,
            definition: Definition::EMPTY,
        }
    }

    pub fn component<T: Component>(&mut self) -> EcsResult<&mut Self> {
        let ty = self.schema.register_component::<T>()?;
        self.definition.components.set(ty.index());
        Ok(self)
    }

    pub fn array<T: ArrayElement>(&mut self) -> EcsResult<&mut Self> {
        let ty = self.schema.register_array_element::<T>()?;
        self.definition.arrays.set(ty.index());
        Ok(self)
    }

    pub fn tag<T: Tag>(&mut self) -> EcsResult<&mut Self> {
        let ty = self.schema.register_tag::<T>()?;
        self.definition.tags.set(ty.index());
        Ok(self)
    }

    /// Include everything another entity kind requires.
    pub fn include<D: Describe>(&mut self) -> EcsResult<&mut Self> {
        D::describe(self)?;
        Ok(self)
    }

    /// Merge an already-built definition.
    pub fn merge(&mut self, other: &Definition) -> &mut Self {
        self.definition = self.definition.union(other);
        self
    }

    #[must_use]
    pub fn schema(&self) -> &Schema {
        self.schema
    }

    #[must_use]
    pub fn build(&self) -> Definition {
        self.definition
    }
}
