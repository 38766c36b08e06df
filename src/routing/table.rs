//! Aggregated name → destination lookup.
//!
//! # Design Decisions
//! - Rebuilt in full by every tool listing and swapped in atomically
//! - Readers never block; a lookup sees either the old or the new table
//! - Entries may be stale between listings; callers fall back to parsing

use std::collections::HashMap;
use std::sync::Arc;

use arc_swap::ArcSwap;

use crate::routing::naming::create_tool_name;

/// Where an aggregated tool name points.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolMapping {
    pub destination: String,
    /// Tool name as the destination reported it.
    pub tool: String,
}

/// Collects mappings for one listing pass.
///
/// Later inserts overwrite earlier ones; an overwrite from a different
/// origin is reported as a collision.
#[derive(Debug, Default)]
pub struct ToolTableBuilder {
    entries: HashMap<String, ToolMapping>,
    collisions: usize,
}

impl ToolTableBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `tool` on `destination`, returning its aggregated name.
    pub fn insert(&mut self, destination: &str, tool: &str) -> String {
        let aggregated = create_tool_name(destination, tool);
        let mapping = ToolMapping {
            destination: destination.to_string(),
            tool: tool.to_string(),
        };

        if let Some(previous) = self.entries.insert(aggregated.clone(), mapping) {
            if previous.destination != destination || previous.tool != tool {
                self.collisions += 1;
                tracing::warn!(
                    name = %aggregated,
                    previous_destination = %previous.destination,
                    previous_tool = %previous.tool,
                    destination = %destination,
                    tool = %tool,
                    "Aggregated tool name collision, later tool wins"
                );
            }
        }
        aggregated
    }

    pub fn collisions(&self) -> usize {
        self.collisions
    }
}

#[derive(Debug)]
pub struct ToolTable {
    current: ArcSwap<HashMap<String, ToolMapping>>,
}

impl Default for ToolTable {
    fn default() -> Self {
        Self::new()
    }
}

impl ToolTable {
    pub fn new() -> Self {
        Self {
            current: ArcSwap::from_pointee(HashMap::new()),
        }
    }

    pub fn get(&self, aggregated: &str) -> Option<ToolMapping> {
        self.current.load().get(aggregated).cloned()
    }

    /// Replace the whole table with the result of a listing pass.
    pub fn publish(&self, builder: ToolTableBuilder) {
        self.current.store(Arc::new(builder.entries));
    }

    pub fn clear(&self) {
        self.current.store(Arc::new(HashMap::new()));
    }

    pub fn len(&self) -> usize {
        self.current.load().len()
    }

    pub fn is_empty(&self) -> bool {
        self.current.load().is_empty()
    }

    pub fn snapshot(&self) -> Arc<HashMap<String, ToolMapping>> {
        self.current.load_full()
    }
}
