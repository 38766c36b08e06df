//! Routing subsystem.
//!
//! # Data Flow
//! ```text
//! Tool listing (per destination, declaration order):
//!     → naming.rs (sanitize + join + truncate)
//!     → table.rs (builder collects aggregated → (destination, tool))
//!     → atomic swap of the published table
//!
//! Tool call:
//!     → table.rs lookup
//!     → on miss: naming.rs parse (split on first "__")
//! ```
//!
//! # Design Decisions
//! - Deterministic: same inputs always produce the same name
//! - Collisions are logged, never rejected; the later tool wins
//! - Lookups are lock-free

pub mod naming;
pub mod table;

pub use naming::{create_tool_name, parse_tool_name, sanitize};
pub use table::{ToolMapping, ToolTable, ToolTableBuilder};
