//! Data-type traits and the small-integer handles the schema hands out.
//!
//! Components and array elements are plain data: `bytemuck::Pod` guarantees
//! they can be copied byte-for-byte between chunk rows and that an
//! all-zero row is a valid value. Tags carry no data at all.

use std::{
    alloc::Layout,
    any::{Any, TypeId},
    fmt,
};

use bytemuck::Pod;

/// Marker trait for fixed-size plain-data values stored in chunk rows.
///
/// # Example
///
/// ```ignore
/// #[derive(Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
/// #[repr(C)]
/// struct Position { x: f32, y: f32 }
/// ```
pub trait Component: Pod + Send + Sync + 'static {}

impl<T: Pod + Send + Sync + 'static> Component for T {}

/// Marker trait for element types of per-entity variable-length arrays.
pub trait ArrayElement: Pod + Send + Sync + 'static {}

impl<T: Pod + Send + Sync + 'static> ArrayElement for T {}

/// Marker trait for tag types. Only presence is recorded.
pub trait Tag: Any {}

impl<T: Any> Tag for T {}

macro_rules! type_handle {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(u16);

        impl $name {
            /// Create a handle from a raw index.
            #[must_use]
            pub const fn from_raw(index: u16) -> Self {
                Self(index)
            }

            /// Get the raw index.
            #[must_use]
            pub const fn as_raw(self) -> u16 {
                self.0
            }

            /// The raw index as a bit position.
            #[must_use]
            pub const fn index(self) -> usize {
                self.0 as usize
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!(stringify!($name), "({})"), self.0)
            }
        }
    };
}

type_handle!(
    /// Index of a registered component type.
    ComponentType
);
type_handle!(
    /// Index of a registered array element type.
    ArrayType
);
type_handle!(
    /// Index of a registered tag type.
    TagType
);

impl TagType {
    /// Reserved tag marking an entity as disabled. Always index 0.
    pub const DISABLED: Self = Self(0);
}

/// The reserved tag type behind [`TagType::DISABLED`].
#[derive(Debug, Clone, Copy, Default)]
pub struct Disabled;

/// Runtime information about a registered type.
#[derive(Clone)]
pub struct TypeInfo {
    /// Type name for debugging.
    name: &'static str,
    /// Memory layout. Tags always have a zero-sized layout.
    layout: Layout,
    /// Rust TypeId for type checking.
    type_id: TypeId,
}

impl TypeInfo {
    /// Info for a data-bearing type.
    #[must_use]
    pub fn of<T: 'static>() -> Self {
        Self {
            name: std::any::type_name::<T>(),
            layout: Layout::new::<T>(),
            type_id: TypeId::of::<T>(),
        }
    }

    /// Info for a tag type; the layout is ignored.
    #[must_use]
    pub fn tag<T: Tag>() -> Self {
        Self {
            name: std::any::type_name::<T>(),
            layout: Layout::new::<()>(),
            type_id: TypeId::of::<T>(),
        }
    }

    #[must_use]
    pub const fn name(&self) -> &'static str {
        self.name
    }

    #[must_use]
    pub const fn layout(&self) -> Layout {
        self.layout
    }

    #[must_use]
    pub const fn size(&self) -> usize {
        self.layout.size()
    }

    #[must_use]
    pub const fn align(&self) -> usize {
        self.layout.align()
    }

    #[must_use]
    pub fn type_id(&self) -> TypeId {
        self.type_id
    }

    /// Check if this info is for the given type.
    #[must_use]
    pub fn is<T: 'static>(&self) -> bool {
        self.type_id == TypeId::of::<T>()
    }
}

impl fmt::Debug for TypeInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TypeInfo")
            .field("name", &self.name)
            .field("size", &self.layout.size())
            .field("align", &self.layout.align())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
    #[repr(C)]
    struct Position {
        x: f32,
        y: f32,
    }

    #[test]
    fn test_type_info() {
        let info = TypeInfo::of::<Position>();

        assert_eq!(info.size(), std::mem::size_of::<Position>());
        assert_eq!(info.align(), std::mem::align_of::<Position>());
        assert!(info.is::<Position>());
        assert!(!info.is::<u32>());
        assert!(info.name().ends_with("Position"));
    }

    #[test]
    fn test_tag_info_is_zero_sized() {
        let info = TypeInfo::tag::<String>();
        assert_eq!(info.size(), 0);
        assert!(info.is::<String>());
    }

    #[test]
    fn test_handle_debug() {
        assert_eq!(format!("{:?}", ComponentType::from_raw(3)), "ComponentType(3)");
        assert_eq!(TagType::DISABLED.index(), 0);
    }
}
