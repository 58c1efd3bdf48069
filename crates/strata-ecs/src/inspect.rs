//! Human-readable dumps of entity state.

use std::fmt;

use crate::{
    chunk::ChunkId,
    component::{ArrayType, ComponentType, TagType},
    entity::Entity,
    error::EcsResult,
    world::{Rint, World},
};

/// Snapshot of everything the world knows about one entity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityInfo {
    pub entity: Entity,
    pub chunk: ChunkId,
    pub row: usize,
    /// Component type names in index order.
    pub components: Vec<&'static str>,
    /// Array element type names with their lengths.
    pub arrays: Vec<(&'static str, usize)>,
    /// Tag names, excluding the reserved disabled tag.
    pub tags: Vec<&'static str>,
    pub enabled: bool,
    pub parent: Option<Entity>,
    pub children: Vec<Entity>,
    pub references: Vec<(Rint, Entity)>,
}

impl World {
    /// Collect an [`EntityInfo`] for a live entity.
    pub fn inspect(&self, entity: Entity) -> EcsResult<EntityInfo> {
        let location = self.location(entity)?;
        let definition = self.definition_of(entity)?;
        let schema = self.schema();
        let chunk = self.chunk(location.chunk);

        let components = definition
            .components()
            .iter()
            .filter_map(|index| schema.component_info(ComponentType::from_raw(index as u16)))
            .map(|info| info.name())
            .collect();

        let arrays = definition
            .arrays()
            .iter()
            .filter_map(|index| {
                let ty = ArrayType::from_raw(index as u16);
                let info = schema.array_info(ty)?;
                let len = chunk
                    .and_then(|chunk| chunk.array(location.row, ty))
                    .map_or(0, |array| array.len());
                Some((info.name(), len))
            })
            .collect();

        let tags = definition
            .tags()
            .iter()
            .map(|index| TagType::from_raw(index as u16))
            .filter(|&ty| ty != TagType::DISABLED)
            .filter_map(|ty| schema.tag_info(ty))
            .map(|info| info.name())
            .collect();

        Ok(EntityInfo {
            entity,
            chunk: location.chunk,
            row: location.row,
            components,
            arrays,
            tags,
            enabled: !definition.is_disabled(),
            parent: self.parent(entity)?,
            children: self.children(entity)?.to_vec(),
            references: self.references(entity)?.collect(),
        })
    }
}

impl fmt::Display for EntityInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "entity {}", self.entity)?;
        if !self.enabled {
            f.write_str(" (disabled)")?;
        }
        writeln!(f, " at {:?} row {}", self.chunk, self.row)?;

        for name in &self.components {
            writeln!(f, "  component {name}")?;
        }
        for (name, len) in &self.arrays {
            writeln!(f, "  array {name} [{len}]")?;
        }
        for name in &self.tags {
            writeln!(f, "  tag {name}")?;
        }
        if let Some(parent) = self.parent {
            writeln!(f, "  parent {parent}")?;
        }
        for child in &self.children {
            writeln!(f, "  child {child}")?;
        }
        for (rint, target) in &self.references {
            writeln!(f, "  ref #{} -> {target}", rint.get())?;
        }
        Ok(())
    }
}
