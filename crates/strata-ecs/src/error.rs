//! ECS error types.

use thiserror::Error;

use crate::{entity::Entity, world::Rint};

/// Which type namespace of the schema an error refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TypeKind {
    Component,
    ArrayElement,
    Tag,
}

impl std::fmt::Display for TypeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Component => "component",
            Self::ArrayElement => "array element",
            Self::Tag => "tag",
        })
    }
}

/// ECS error type.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EcsError {
    /// More distinct types registered than a signature mask can hold.
    #[error("{kind} capacity exceeded: at most {capacity} types can be registered")]
    SchemaCapacityExceeded { kind: TypeKind, capacity: usize },

    /// Type was never registered on this schema.
    #[error("unknown {kind} type: {name}")]
    UnknownType { kind: TypeKind, name: String },

    /// Entity is not alive in this world.
    #[error("entity not found: {0:?}")]
    EntityNotFound(Entity),

    /// Entity is alive but lacks the requested component or array.
    #[error("entity {entity:?} has no {name}")]
    MissingComponent { entity: Entity, name: &'static str },

    /// A structural precondition owned by the caller does not hold.
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// Reference handle does not name an occupied slot.
    #[error("entity {entity:?} has no reference slot {rint:?}")]
    InvalidReference { entity: Entity, rint: Rint },

    /// World changed structurally while a cursor was walking it.
    #[error("iterator invalidated: world version {found}, cursor created at {expected}")]
    IteratorInvalidated { expected: u64, found: u64 },

    /// Hard row or entity limit reached.
    #[error("capacity exceeded: limit is {limit}")]
    CapacityExceeded { limit: usize },

    /// Packed component row is larger than the configured maximum.
    #[error("row of {size} bytes exceeds the maximum of {max} bytes")]
    RowTooLarge { size: usize, max: usize },
}

/// Result type for ECS operations.
pub type EcsResult<T> = Result<T, EcsError>;
