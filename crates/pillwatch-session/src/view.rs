use std::collections::HashMap;

use serde::Serialize;

use pillwatch_types::{
    geometry::{CellId, GridCell, Rectangle},
    status::{BaselineStatus, CellState, CellStatus},
};

/// One row of the read-only session snapshot.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CellView {
    pub cell: GridCell,
    pub state: CellState,
    pub baseline: BaselineStatus,
}

/// Read-only snapshot handed to renderers.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SessionView {
    pub master_region: Option<Rectangle>,
    pub cells: Vec<CellView>,
    /// At least one cell has a decoded baseline.
    pub monitoring: bool,
    /// The polling timer is active.
    pub polling: bool,
}

impl SessionView {
    pub fn cell(&self, id: &CellId) -> Option<&CellView> {
        self.cells.iter().find(|view| view.cell.id == *id)
    }

    pub fn status_of(&self, id: &CellId) -> Option<CellStatus> {
        self.cell(id).map(|view| view.state.status)
    }

    pub fn statuses(&self) -> HashMap<CellId, CellStatus> {
        self.cells
            .iter()
            .map(|view| (view.cell.id, view.state.status))
            .collect()
    }

    pub fn diffs(&self) -> HashMap<CellId, f64> {
        self.cells
            .iter()
            .filter_map(|view| view.state.diff.map(|diff| (view.cell.id, diff)))
            .collect()
    }

    pub fn count(&self, status: CellStatus) -> usize {
        self.cells
            .iter()
            .filter(|view| view.state.status == status)
            .count()
    }
}
