// Per-entity track store
use super::position::Position;
use std::collections::HashMap;

pub type Path = Vec<Position>;

/// Entity name to its accumulated path. Paths only grow, in arrival order.
#[derive(Debug, Clone, Default)]
pub struct TrackStore {
    tracks: HashMap<String, Path>,
}

impl TrackStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends to the entity's path, creating it on first sight. Returns the
    /// new path length.
    pub fn append(&mut self, entity: &str, position: Position) -> usize {
        let path = self.tracks.entry(entity.to_string()).or_default();
        path.push(position);
        path.len()
    }

    pub fn path(&self, entity: &str) -> Option<&[Position]> {
        self.tracks.get(entity).map(Vec::as_slice)
    }

    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[Position])> {
        self.tracks.iter().map(|(k, v)| (k.as_str(), v.as_slice()))
    }
}
