//! Type registry and row layouts.
//!
//! The schema maps Rust types to small-integer indices in three separate
//! namespaces (components, array elements, tags) and computes, once per
//! distinct component signature, where each component lives inside a
//! packed chunk row.

use std::{any::TypeId, fmt, sync::Arc};

use rustc_hash::FxHashMap;
use smallvec::SmallVec;

use crate::{
    bitmask::{BitMask, MASK_CAPACITY},
    component::{
        ArrayElement, ArrayType, Component, ComponentType, Disabled, Tag, TagType, TypeInfo,
    },
    error::{EcsError, EcsResult, TypeKind},
};

/// Default upper bound on the packed size of one chunk row.
pub const DEFAULT_MAX_ROW_BYTES: usize = 16 * 1024;

const ABSENT: u16 = u16::MAX;

/// Registration diagnostics. Registration still succeeds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchemaDiagnostic {
    /// A zero-sized type was registered as a component.
    ZeroSizedComponent { name: &'static str },
}

impl fmt::Display for SchemaDiagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ZeroSizedComponent { name } => write!(
                f,
                "component {name} is zero-sized and carries no data; register it as a tag instead"
            ),
        }
    }
}

/// Something that registers a group of types, e.g. everything one module uses.
///
/// ```ignore
/// struct Physics;
///
/// impl SchemaBank for Physics {
///     fn load(&self, schema: &mut Schema) -> EcsResult<()> {
///         schema.register_component::<Position>()?;
///         schema.register_component::<Velocity>()?;
///         schema.register_tag::<Static>()?;
///         Ok(())
///     }
/// }
/// ```
pub trait SchemaBank {
    fn load(&self, schema: &mut Schema) -> EcsResult<()>;
}

/// One namespace of registered types.
struct TypeTable {
    kind: TypeKind,
    by_type: FxHashMap<TypeId, u16>,
    infos: Vec<TypeInfo>,
}

impl TypeTable {
    fn new(kind: TypeKind) -> Self {
        Self {
            kind,
            by_type: FxHashMap::default(),
            infos: Vec::new(),
        }
    }

    /// Returns the index and whether it was newly assigned.
    fn register(&mut self, info: TypeInfo) -> EcsResult<(u16, bool)> {
        if let Some(&index) = self.by_type.get(&info.type_id()) {
            return Ok((index, false));
        }

        if self.infos.len() >= MASK_CAPACITY {
            return Err(EcsError::SchemaCapacityExceeded {
                kind: self.kind,
                capacity: MASK_CAPACITY,
            });
        }

        let index = self.infos.len() as u16;
        self.by_type.insert(info.type_id(), index);
        self.infos.push(info);
        Ok((index, true))
    }

    fn lookup(&self, type_id: TypeId) -> Option<u16> {
        self.by_type.get(&type_id).copied()
    }

    fn info(&self, index: usize) -> Option<&TypeInfo> {
        self.infos.get(index)
    }

    fn unknown<T: 'static>(&self) -> EcsError {
        EcsError::UnknownType {
            kind: self.kind,
            name: std::any::type_name::<T>().to_owned(),
        }
    }
}

/// Placement of one component inside a packed row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColumnSlot {
    pub ty: ComponentType,
    pub offset: usize,
    pub size: usize,
}

/// Byte layout of a row holding one particular set of components.
///
/// Components are packed in ascending index order, each aligned to its own
/// alignment. `stride` is the packed size rounded up to the row alignment,
/// so row `r` of a buffer aligned to `align` starts at `stride * r` and
/// every column in it stays aligned.
pub struct RowLayout {
    mask: BitMask,
    columns: SmallVec<[ColumnSlot; 8]>,
    /// `positions[index]` is the position of that component in `columns`, or `ABSENT`.
    positions: Vec<u16>,
    size: usize,
    stride: usize,
    align: usize,
}

impl RowLayout {
    fn compute(schema: &Schema, mask: &BitMask) -> EcsResult<Self> {
        let mut columns: SmallVec<[ColumnSlot; 8]> = SmallVec::new();
        let mut end = 0usize;
        let mut align = 1usize;
        let mut max_index = 0usize;

        for index in mask {
            let info = schema.components.info(index).ok_or_else(|| EcsError::UnknownType {
                kind: TypeKind::Component,
                name: format!("#{index}"),
            })?;

            let offset = end.next_multiple_of(info.align());
            columns.push(ColumnSlot {
                ty: ComponentType::from_raw(index as u16),
                offset,
                size: info.size(),
            });
            end = offset + info.size();
            align = align.max(info.align());
            max_index = index;
        }

        let stride = end.next_multiple_of(align);
        if stride > schema.max_row_bytes {
            return Err(EcsError::RowTooLarge {
                size: stride,
                max: schema.max_row_bytes,
            });
        }

        let mut positions = vec![ABSENT; if mask.is_empty() { 0 } else { max_index + 1 }];
        for (position, slot) in columns.iter().enumerate() {
            positions[slot.ty.index()] = position as u16;
        }

        Ok(Self {
            mask: *mask,
            columns,
            positions,
            size: end,
            stride,
            align,
        })
    }

    /// The component set this layout was computed for.
    #[must_use]
    pub const fn mask(&self) -> &BitMask {
        &self.mask
    }

    /// Columns in ascending component index order.
    #[must_use]
    pub fn columns(&self) -> &[ColumnSlot] {
        &self.columns
    }

    /// Offset of `ty` within a row, if present.
    #[inline]
    #[must_use]
    pub fn offset(&self, ty: ComponentType) -> Option<usize> {
        self.slot(ty).map(|slot| slot.offset)
    }

    /// Column slot for `ty`, if present.
    #[inline]
    #[must_use]
    pub fn slot(&self, ty: ComponentType) -> Option<ColumnSlot> {
        match self.positions.get(ty.index()) {
            Some(&position) if position != ABSENT => Some(self.columns[position as usize]),
            _ => None,
        }
    }

    /// Packed size without trailing padding.
    #[must_use]
    pub const fn size(&self) -> usize {
        self.size
    }

    /// Distance in bytes between consecutive rows.
    #[must_use]
    pub const fn stride(&self) -> usize {
        self.stride
    }

    /// Alignment the row buffer must have.
    #[must_use]
    pub const fn align(&self) -> usize {
        self.align
    }
}

impl fmt::Debug for RowLayout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RowLayout")
            .field("columns", &self.columns)
            .field("stride", &self.stride)
            .field("align", &self.align)
            .finish()
    }
}

/// Registry of every component, array element and tag type known to a world.
pub struct Schema {
    components: TypeTable,
    arrays: TypeTable,
    tags: TypeTable,
    /// Layout cache keyed by component signature.
    layouts: FxHashMap<BitMask, Arc<RowLayout>>,
    max_row_bytes: usize,
    diagnostics: Vec<SchemaDiagnostic>,
}

impl Default for Schema {
    fn default() -> Self {
        Self::new()
    }
}

impl Schema {
    /// Create a schema with only the reserved `Disabled` tag registered.
    #[must_use]
    pub fn new() -> Self {
        Self::with_max_row_bytes(DEFAULT_MAX_ROW_BYTES)
    }

    /// Create a schema with a custom row size limit.
    #[must_use]
    pub fn with_max_row_bytes(max_row_bytes: usize) -> Self {
        let mut tags = TypeTable::new(TypeKind::Tag);
        // An empty table always has room, so this cannot fail.
        let reserved = tags.register(TypeInfo::tag::<Disabled>()).map(|(idx, _)| idx);
        debug_assert_eq!(reserved, Ok(TagType::DISABLED.as_raw()));

        Self {
            components: TypeTable::new(TypeKind::Component),
            arrays: TypeTable::new(TypeKind::ArrayElement),
            tags,
            layouts: FxHashMap::default(),
            max_row_bytes,
            diagnostics: Vec::new(),
        }
    }

    /// Run a bank's registrations against this schema.
    pub fn load(&mut self, bank: &impl SchemaBank) -> EcsResult<()> {
        bank.load(self)
    }

    // ==================== Registration ====================

    /// Register a component type and return its index.
    ///
    /// Registering the same type again returns the existing index.
    pub fn register_component<T: Component>(&mut self) -> EcsResult<ComponentType> {
        let (index, fresh) = self.components.register(TypeInfo::of::<T>())?;

        if fresh {
            let name = std::any::type_name::<T>();
            tracing::trace!(name, index, size = size_of::<T>(), "registered component");

            if size_of::<T>() == 0 {
                let diagnostic = SchemaDiagnostic::ZeroSizedComponent { name };
                tracing::warn!("{diagnostic}");
                self.diagnostics.push(diagnostic);
            }
        }

        Ok(ComponentType::from_raw(index))
    }

    /// Register an array element type and return its index.
    pub fn register_array_element<T: ArrayElement>(&mut self) -> EcsResult<ArrayType> {
        if size_of::<T>() == 0 {
            return Err(EcsError::InvalidState(format!(
                "array element {} is zero-sized",
                std::any::type_name::<T>()
            )));
        }

        let (index, fresh) = self.arrays.register(TypeInfo::of::<T>())?;
        if fresh {
            tracing::trace!(name = std::any::type_name::<T>(), index, "registered array element");
        }
        Ok(ArrayType::from_raw(index))
    }

    /// Register a tag type and return its index.
    pub fn register_tag<T: Tag>(&mut self) -> EcsResult<TagType> {
        let (index, fresh) = self.tags.register(TypeInfo::tag::<T>())?;
        if fresh {
            tracing::trace!(name = std::any::type_name::<T>(), index, "registered tag");
        }
        Ok(TagType::from_raw(index))
    }

    // ==================== Lookup ====================

    /// Get the index of a registered component type.
    pub fn component_type<T: Component>(&self) -> EcsResult<ComponentType> {
        self.try_component_type::<T>()
            .ok_or_else(|| self.components.unknown::<T>())
    }

    /// Get the index of a component type, if registered.
    #[must_use]
    pub fn try_component_type<T: 'static>(&self) -> Option<ComponentType> {
        self.components
            .lookup(TypeId::of::<T>())
            .map(ComponentType::from_raw)
    }

    pub fn array_type<T: ArrayElement>(&self) -> EcsResult<ArrayType> {
        self.try_array_type::<T>()
            .ok_or_else(|| self.arrays.unknown::<T>())
    }

    #[must_use]
    pub fn try_array_type<T: 'static>(&self) -> Option<ArrayType> {
        self.arrays.lookup(TypeId::of::<T>()).map(ArrayType::from_raw)
    }

    pub fn tag_type<T: Tag>(&self) -> EcsResult<TagType> {
        self.try_tag_type::<T>()
            .ok_or_else(|| self.tags.unknown::<T>())
    }

    #[must_use]
    pub fn try_tag_type<T: 'static>(&self) -> Option<TagType> {
        self.tags.lookup(TypeId::of::<T>()).map(TagType::from_raw)
    }

    #[must_use]
    pub fn component_info(&self, ty: ComponentType) -> Option<&TypeInfo> {
        self.components.info(ty.index())
    }

    #[must_use]
    pub fn array_info(&self, ty: ArrayType) -> Option<&TypeInfo> {
        self.arrays.info(ty.index())
    }

    #[must_use]
    pub fn tag_info(&self, ty: TagType) -> Option<&TypeInfo> {
        self.tags.info(ty.index())
    }

    #[must_use]
    pub fn component_count(&self) -> usize {
        self.components.infos.len()
    }

    #[must_use]
    pub fn array_count(&self) -> usize {
        self.arrays.infos.len()
    }

    /// Number of registered tags, including the reserved `Disabled` tag.
    #[must_use]
    pub fn tag_count(&self) -> usize {
        self.tags.infos.len()
    }

    // ==================== Layout ====================

    /// Get the row layout for a set of components, computing it on first use.
    pub fn component_offsets(&mut self, mask: &BitMask) -> EcsResult<Arc<RowLayout>> {
        if let Some(layout) = self.layouts.get(mask) {
            return Ok(Arc::clone(layout));
        }

        let layout = Arc::new(RowLayout::compute(self, mask)?);
        self.layouts.insert(*mask, Arc::clone(&layout));
        Ok(layout)
    }

    /// Cached layout for `mask`, if it has been computed.
    #[must_use]
    pub fn cached_offsets(&self, mask: &BitMask) -> Option<&Arc<RowLayout>> {
        self.layouts.get(mask)
    }

    #[must_use]
    pub const fn max_row_bytes(&self) -> usize {
        self.max_row_bytes
    }

    /// Registration diagnostics collected so far.
    #[must_use]
    pub fn diagnostics(&self) -> &[SchemaDiagnostic] {
        &self.diagnostics
    }
}

impl fmt::Debug for Schema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Schema")
            .field("components", &self.components.infos)
            .field("arrays", &self.arrays.infos)
            .field("tags", &self.tags.infos)
            .field("cached_layouts", &self.layouts.len())
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

    #[derive(Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
    #[repr(C)]
    struct Mass(f64);

    #[derive(Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
    #[repr(C)]
    struct Flag(u8);

    #[derive(Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
    #[repr(C)]
    struct Marker;

    struct Player;

    #[test]
    fn test_idempotent_registration() {
        let mut schema = Schema::new();

        let a = schema.register_component::<Position>().unwrap();
        let b = schema.register_component::<Position>().unwrap();
        let mass = schema.register_component::<Mass>().unwrap();

        assert_eq!(a, b);
        assert_ne!(a, mass);
        assert_eq!(schema.component_count(), 2);
        assert_eq!(schema.component_type::<Position>(), Ok(a));
    }

    #[test]
    fn test_separate_namespaces() {
        let mut schema = Schema::new();

        let component = schema.register_component::<Position>().unwrap();
        let array = schema.register_array_element::<Position>().unwrap();
        let tag = schema.register_tag::<Player>().unwrap();

        assert_eq!(component.index(), 0);
        assert_eq!(array.index(), 0);
        // Index 0 is the reserved Disabled tag.
        assert_eq!(tag.index(), 1);
        assert_eq!(schema.tag_type::<Disabled>(), Ok(TagType::DISABLED));
    }

    #[test]
    fn test_unknown_type() {
        let schema = Schema::new();
        let err = schema.component_type::<Position>().unwrap_err();
        assert!(matches!(
            err,
            EcsError::UnknownType {
                kind: TypeKind::Component,
                ..
            }
        ));
    }

    #[test]
    fn test_zero_sized_component_diagnostic() {
        let mut schema = Schema::new();

        schema.register_component::<Marker>().unwrap();
        schema.register_component::<Marker>().unwrap();

        assert_eq!(schema.diagnostics().len(), 1);
        let diagnostic = &schema.diagnostics()[0];
        assert!(matches!(diagnostic, SchemaDiagnostic::ZeroSizedComponent { .. }));
        assert!(diagnostic.to_string().contains("tag"));
    }

    #[test]
    fn test_zero_sized_array_element_rejected() {
        let mut schema = Schema::new();
        assert!(matches!(
            schema.register_array_element::<Marker>(),
            Err(EcsError::InvalidState(_))
        ));
    }

    #[test]
    fn test_row_layout_packing() {
        let mut schema = Schema::new();
        let flag = schema.register_component::<Flag>().unwrap();
        let mass = schema.register_component::<Mass>().unwrap();
        let pos = schema.register_component::<Position>().unwrap();

        let mask = BitMask::from_indices([flag.index(), mass.index(), pos.index()]);
        let layout = schema.component_offsets(&mask).unwrap();

        // Ascending index order: Flag @0, Mass aligned to 8, Position after.
        assert_eq!(layout.offset(flag), Some(0));
        assert_eq!(layout.offset(mass), Some(8));
        assert_eq!(layout.offset(pos), Some(16));
        assert_eq!(layout.size(), 24);
        assert_eq!(layout.stride(), 24);
        assert_eq!(layout.align(), 8);

        assert_eq!(layout.mask(), &mask);
        assert_eq!(
            layout.slot(mass),
            Some(ColumnSlot {
                ty: mass,
                offset: 8,
                size: 8
            })
        );

        let again = schema.component_offsets(&mask).unwrap();
        assert!(Arc::ptr_eq(&layout, &again));
        assert!(schema.cached_offsets(&mask).is_some_and(|cached| Arc::ptr_eq(cached, &layout)));
        assert!(schema.cached_offsets(&BitMask::from_indices([flag.index()])).is_none());
    }

    #[test]
    fn test_row_layout_absent_column() {
        let mut schema = Schema::new();
        let pos = schema.register_component::<Position>().unwrap();
        let mass = schema.register_component::<Mass>().unwrap();

        let layout = schema
            .component_offsets(&BitMask::from_indices([mass.index()]))
            .unwrap();
        assert_eq!(layout.offset(pos), None);
        assert_eq!(layout.slot(pos), None);
        assert_eq!(layout.offset(mass), Some(0));
        // Indices past the highest present component are absent too.
        assert_eq!(layout.slot(ComponentType::from_raw(200)), None);
    }

    #[test]
    fn test_row_layout_unknown_index() {
        let mut schema = Schema::new();
        let err = schema
            .component_offsets(&BitMask::from_indices([7]))
            .unwrap_err();
        assert!(matches!(err, EcsError::UnknownType { .. }));
    }

    #[test]
    fn test_row_too_large() {
        let mut schema = Schema::with_max_row_bytes(8);
        let pos = schema.register_component::<Position>().unwrap();
        let mass = schema.register_component::<Mass>().unwrap();

        let ok = schema.component_offsets(&BitMask::from_indices([pos.index()]));
        assert!(ok.is_ok());

        let err = schema
            .component_offsets(&BitMask::from_indices([pos.index(), mass.index()]))
            .unwrap_err();
        assert_eq!(err, EcsError::RowTooLarge { size: 16, max: 8 });
    }

    macro_rules! register_row {
        ($schema:ident, $results:ident, $a:ty; $($b:ty),*) => {
            $( $results.push($schema.register_tag::<($a, $b)>()); )*
        };
    }

    macro_rules! register_grid {
        ($schema:ident, $results:ident; $($a:ty),*) => {
            $(
                register_row!(
                    $schema, $results, $a;
                    u8, u16, u32, u64, u128, i8, i16, i32, i64, i128, f32, f64, bool, char, (),
                    usize, isize
                );
            )*
        };
    }

    #[test]
    fn test_tag_capacity_exceeded() {
        let mut schema = Schema::new();
        let mut results = Vec::new();

        // 17 * 17 = 289 distinct tag types.
        register_grid!(
            schema, results;
            u8, u16, u32, u64, u128, i8, i16, i32, i64, i128, f32, f64, bool, char, (), usize,
            isize
        );

        let failures = results.iter().filter(|r| r.is_err()).count();
        assert_eq!(schema.tag_count(), MASK_CAPACITY);
        assert_eq!(failures, 289 - (MASK_CAPACITY - 1));
        assert_eq!(
            results.last().cloned().unwrap(),
            Err(EcsError::SchemaCapacityExceeded {
                kind: TypeKind::Tag,
                capacity: MASK_CAPACITY,
            })
        );

        // Already-registered types keep working.
        assert!(schema.register_tag::<(u8, u8)>().is_ok());
    }

    #[test]
    fn test_schema_bank() {
        struct Bank;

        impl SchemaBank for Bank {
            fn load(&self, schema: &mut Schema) -> EcsResult<()> {
                schema.register_component::<Position>()?;
                schema.register_array_element::<u32>()?;
                schema.register_tag::<Player>()?;
                Ok(())
            }
        }

        let mut schema = Schema::new();
        schema.load(&Bank).unwrap();
        schema.load(&Bank).unwrap();

        assert_eq!(schema.component_count(), 1);
        assert_eq!(schema.array_count(), 1);
        assert_eq!(schema.tag_count(), 2);
    }
}
