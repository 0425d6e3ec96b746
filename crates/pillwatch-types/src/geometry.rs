use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{config::GridConfig, PillwatchError, Result};

/// Axis-aligned region in the coordinate space of the unmirrored source frame.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Rectangle {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl Rectangle {
    pub fn new(x: f64, y: f64, width: f64, height: f64) -> Result<Self> {
        let rect = Self {
            x,
            y,
            width,
            height,
        };
        rect.validate()?;
        Ok(rect)
    }

    pub fn validate(&self) -> Result<()> {
        let finite = [self.x, self.y, self.width, self.height]
            .iter()
            .all(|v| v.is_finite());
        if !finite {
            return Err(PillwatchError::InvalidRegion(format!(
                "non-finite coordinates in {self}"
            )));
        }
        if self.width <= 0.0 || self.height <= 0.0 {
            return Err(PillwatchError::InvalidRegion(format!(
                "width and height must be positive, got {self}"
            )));
        }
        Ok(())
    }

    pub fn area(&self) -> f64 {
        self.width * self.height
    }

    /// Integer pixel size used when the region is captured; never 0x0.
    pub fn pixel_size(&self) -> (u32, u32) {
        (round_dimension(self.width), round_dimension(self.height))
    }
}

impl fmt::Display for Rectangle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{{x: {}, y: {}, w: {}, h: {}}}",
            self.x, self.y, self.width, self.height
        )
    }
}

fn round_dimension(value: f64) -> u32 {
    if value.is_finite() {
        value.round().max(1.0) as u32
    } else {
        1
    }
}

/// Row/column slot of a pocket inside the organizer grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct GridPosition {
    pub row: u16,
    pub col: u16,
}

impl GridPosition {
    pub const fn new(row: u16, col: u16) -> Self {
        Self { row, col }
    }
}

/// Identifier of a grid cell. The batch part changes every time the grid is regenerated,
/// so ids from an earlier grid never collide with the current one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CellId {
    batch: Uuid,
    position: GridPosition,
}

impl CellId {
    pub fn new(batch: Uuid, position: GridPosition) -> Self {
        Self { batch, position }
    }

    pub fn batch(&self) -> Uuid {
        self.batch
    }

    pub fn position(&self) -> GridPosition {
        self.position
    }
}

impl fmt::Display for CellId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let batch = self.batch.simple().to_string();
        write!(
            f,
            "cell-{}-{}-{}",
            &batch[..8],
            self.position.row,
            self.position.col
        )
    }
}

/// One pocket of the organizer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GridCell {
    pub id: CellId,
    pub rect: Rectangle,
    pub row: u16,
    pub col: u16,
    pub label: String,
}

impl GridCell {
    pub fn position(&self) -> GridPosition {
        GridPosition::new(self.row, self.col)
    }
}

/// Human-readable name of a slot, e.g. "Monday Morning".
pub fn cell_label(layout: &GridConfig, row: u16, col: u16) -> Result<String> {
    let day = layout.day_labels.get(row as usize).ok_or_else(|| {
        PillwatchError::Configuration(format!("no day label for row {row}"))
    })?;
    let slot = layout.slot_labels.get(col as usize).ok_or_else(|| {
        PillwatchError::Configuration(format!("no time-slot label for column {col}"))
    })?;
    Ok(format!("{day} {slot}"))
}

/// Split `master` into `layout.rows` x `layout.cols` cells in row-major order.
///
/// Cell geometry stays fractional; rounding only happens at capture time. Labels are
/// checked up front so a short label table never yields a partial grid.
pub fn partition_grid(batch: Uuid, master: &Rectangle, layout: &GridConfig) -> Result<Vec<GridCell>> {
    master.validate()?;
    layout.validate()?;

    let cell_width = master.width / f64::from(layout.cols);
    let cell_height = master.height / f64::from(layout.rows);

    let mut cells = Vec::with_capacity(layout.rows as usize * layout.cols as usize);
    for row in 0..layout.rows {
        for col in 0..layout.cols {
            let position = GridPosition::new(row, col);
            cells.push(GridCell {
                id: CellId::new(batch, position),
                rect: Rectangle {
                    x: master.x + f64::from(col) * cell_width,
                    y: master.y + f64::from(row) * cell_height,
                    width: cell_width,
                    height: cell_height,
                },
                row,
                col,
                label: cell_label(layout, row, col)?,
            });
        }
    }
    Ok(cells)
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;

    #[test]
    fn rejects_non_positive_rectangles() {
        assert!(Rectangle::new(0.0, 0.0, 0.0, 10.0).is_err());
        assert!(Rectangle::new(0.0, 0.0, 10.0, -1.0).is_err());
        assert!(Rectangle::new(0.0, 0.0, f64::NAN, 1.0).is_err());
        assert!(Rectangle::new(5.0, 5.0, 1.0, 1.0).is_ok());
    }

    #[test]
    fn pixel_size_never_zero() {
        let rect = Rectangle::new(0.0, 0.0, 0.3, 40.6).expect("valid rect");
        assert_eq!(rect.pixel_size(), (1, 41));
    }

    #[test]
    fn default_grid_scenario() {
        let master = Rectangle::new(0.0, 0.0, 280.0, 490.0).expect("valid rect");
        let layout = GridConfig::default();
        let cells = partition_grid(Uuid::new_v4(), &master, &layout).expect("partition");

        // 280 / 4 columns and 490 / 7 rows
        assert_eq!(cells.len(), 28);
        for cell in &cells {
            assert_eq!(cell.rect.width, 70.0);
            assert_eq!(cell.rect.height, 70.0);
        }
        assert_eq!(cells[0].label, "Monday Morning");
        assert_eq!(cells[27].label, "Sunday Bedtime");
        assert_eq!((cells[5].row, cells[5].col), (1, 1));
        assert_eq!(cells[5].rect.x, 70.0);
        assert_eq!(cells[5].rect.y, 70.0);
    }

    #[test]
    fn partition_covers_master_without_overlap() {
        let master = Rectangle::new(13.5, 7.25, 301.0, 455.3).expect("valid rect");
        let layout = GridConfig::default();
        let cells = partition_grid(Uuid::new_v4(), &master, &layout).expect("partition");

        let total: f64 = cells.iter().map(|c| c.rect.area()).sum();
        assert!((total - master.area()).abs() < 1e-6);

        let ids: HashSet<CellId> = cells.iter().map(|c| c.id).collect();
        assert_eq!(ids.len(), cells.len());

        // row-major order and contiguous columns
        for pair in cells.windows(2) {
            let (a, b) = (&pair[0], &pair[1]);
            assert!((a.row, a.col) < (b.row, b.col));
            if a.row == b.row {
                assert!((a.rect.x + a.rect.width - b.rect.x).abs() < 1e-9);
            }
        }
        let last = cells.last().expect("cells");
        assert!((last.rect.x + last.rect.width - (master.x + master.width)).abs() < 1e-9);
        assert!((last.rect.y + last.rect.height - (master.y + master.height)).abs() < 1e-9);
    }

    #[test]
    fn short_label_table_fails_before_any_cell() {
        let master = Rectangle::new(0.0, 0.0, 100.0, 100.0).expect("valid rect");
        let mut layout = GridConfig::default();
        layout.slot_labels.truncate(2);
        let err = partition_grid(Uuid::new_v4(), &master, &layout).unwrap_err();
        assert!(matches!(err, PillwatchError::Configuration(_)));
    }

    #[test]
    fn same_batch_yields_same_ids_new_batch_fresh_ids() {
        let master = Rectangle::new(0.0, 0.0, 280.0, 490.0).expect("valid rect");
        let layout = GridConfig::default();
        let batch = Uuid::new_v4();
        let a = partition_grid(batch, &master, &layout).expect("partition");
        let b = partition_grid(batch, &master, &layout).expect("partition");
        assert_eq!(a, b);

        let c = partition_grid(Uuid::new_v4(), &master, &layout).expect("partition");
        assert!(a.iter().zip(&c).all(|(x, y)| x.id != y.id));
    }
}
