//! Process-wide registry of live cells.

use crate::shard::{ShardConfig, ShardHandle};
use dashmap::DashMap;
use earshot_model::geometry::CellId;
use std::sync::Arc;

#[derive(Debug)]
struct CellRegistryRef {
    cells: DashMap<CellId, ShardHandle>,
    config: ShardConfig,
}

/// Registry that lazily spawns one actor per cell.
///
/// Cells are never reaped: a cell's lifecycle is the process's lifecycle,
/// and an idle cell is a parked task with no armed timers.
///
/// # Cloning
///
/// The registry wraps its data in an [`Arc`], so clones are cheap and all
/// refer to the same cells.
#[derive(Clone, Debug)]
pub struct CellRegistry(Arc<CellRegistryRef>);

impl CellRegistry {
    /// Create an empty registry whose cells will use the provided tuning.
    pub fn new(config: ShardConfig) -> Self {
        Self(Arc::new(CellRegistryRef {
            cells: DashMap::new(),
            config,
        }))
    }

    /// Retrieve the cell's handle, spawning its actor on first use.
    pub fn get_or_spawn(&self, cell: CellId) -> ShardHandle {
        self.0
            .cells
            .entry(cell.clone())
            .or_insert_with(|| {
                tracing::debug!(%cell, "spawning cell");

                ShardHandle::spawn(cell.clone(), self.0.config.clone())
            })
            .clone()
    }

    /// Retrieve the cell's handle if its actor is already running.
    pub fn get(&self, cell: &CellId) -> Option<ShardHandle> {
        self.0.cells.get(cell).map(|handle| handle.clone())
    }

    /// Number of cells spawned so far.
    pub fn len(&self) -> usize {
        self.0.cells.len()
    }

    /// Whether no cell has been spawned yet.
    pub fn is_empty(&self) -> bool {
        self.0.cells.is_empty()
    }
}
