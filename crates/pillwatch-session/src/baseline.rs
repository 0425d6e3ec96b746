//! Encoded and decoded baselines per cell, with version tags for async decodes.

use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
};

use pillwatch_types::{
    frame::{EncodedImage, RawImage},
    geometry::{CellId, GridCell, GridPosition},
    status::BaselineStatus,
};

/// Handed to a decode task; its result only lands if the ticket is still current.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecodeTicket {
    pub cell: CellId,
    pub version: u64,
}

#[derive(Debug, Clone)]
struct BaselineEntry {
    encoded: Option<EncodedImage>,
    decoded: Option<Arc<RawImage>>,
    status: BaselineStatus,
    version: u64,
}

/// A decoded baseline ready for comparison.
#[derive(Debug, Clone)]
pub struct DecodedBaseline {
    pub cell: CellId,
    pub version: u64,
    pub image: Arc<RawImage>,
}

/// Owns every baseline of the current grid.
///
/// Each write bumps the cell's version and drops its decoded image immediately, so
/// a decode that finishes late for an older version is discarded on completion.
#[derive(Debug, Default)]
pub struct BaselineLedger {
    entries: HashMap<CellId, BaselineEntry>,
    next_version: u64,
}

impl BaselineLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Swap in a complete new baseline set for `cells`; cells missing from
    /// `incoming` end up without a baseline.
    pub fn replace_all(
        &mut self,
        cells: &[GridCell],
        mut incoming: HashMap<CellId, Option<EncodedImage>>,
    ) -> Vec<(DecodeTicket, EncodedImage)> {
        self.entries.clear();
        let mut tickets = Vec::new();
        for cell in cells {
            let encoded = incoming.remove(&cell.id).flatten();
            if let Some(ticket) = self.write(cell.id, encoded) {
                tickets.push(ticket);
            }
        }
        tickets
    }

    /// Replace a single cell's baseline. Returns the decode job if there is something to decode.
    pub fn set(&mut self, cell: CellId, encoded: Option<EncodedImage>) -> Option<(DecodeTicket, EncodedImage)> {
        self.write(cell, encoded)
    }

    fn write(&mut self, cell: CellId, encoded: Option<EncodedImage>) -> Option<(DecodeTicket, EncodedImage)> {
        self.next_version += 1;
        let version = self.next_version;
        let status = if encoded.is_some() {
            BaselineStatus::Pending
        } else {
            BaselineStatus::Missing
        };
        let job = encoded
            .clone()
            .map(|enc| (DecodeTicket { cell, version }, enc));
        self.entries.insert(
            cell,
            BaselineEntry {
                encoded,
                decoded: None,
                status,
                version,
            },
        );
        job
    }

    /// Apply a finished decode. `None` when the ticket is stale and nothing changed.
    pub fn complete(&mut self, ticket: &DecodeTicket, decoded: Option<RawImage>) -> Option<BaselineStatus> {
        let entry = self.entries.get_mut(&ticket.cell)?;
        if entry.version != ticket.version {
            return None;
        }
        match decoded {
            Some(image) => {
                entry.decoded = Some(Arc::new(image));
                entry.status = BaselineStatus::Ready;
            }
            None => {
                entry.decoded = None;
                entry.status = BaselineStatus::Failed;
            }
        }
        Some(entry.status)
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Drop entries for cells that are no longer part of the grid.
    pub fn retain(&mut self, cells: &HashSet<CellId>) {
        self.entries.retain(|id, _| cells.contains(id));
    }

    pub fn status(&self, cell: &CellId) -> BaselineStatus {
        self.entries
            .get(cell)
            .map(|entry| entry.status)
            .unwrap_or_default()
    }

    pub fn is_current(&self, cell: &CellId, version: u64) -> bool {
        self.entries
            .get(cell)
            .map_or(false, |entry| entry.version == version && entry.decoded.is_some())
    }

    pub fn decoded(&self) -> Vec<DecodedBaseline> {
        self.entries
            .iter()
            .filter_map(|(cell, entry)| {
                entry.decoded.as_ref().map(|image| DecodedBaseline {
                    cell: *cell,
                    version: entry.version,
                    image: Arc::clone(image),
                })
            })
            .collect()
    }

    pub fn decoded_image(&self, cell: &CellId) -> Option<Arc<RawImage>> {
        self.entries.get(cell).and_then(|entry| entry.decoded.clone())
    }

    pub fn has_decoded(&self) -> bool {
        self.entries.values().any(|entry| entry.decoded.is_some())
    }

    pub fn pending(&self) -> usize {
        self.entries
            .values()
            .filter(|entry| entry.status == BaselineStatus::Pending)
            .count()
    }

    pub fn encoded(&self, cell: &CellId) -> Option<&EncodedImage> {
        self.entries.get(cell).and_then(|entry| entry.encoded.as_ref())
    }

    /// Encoded baselines keyed by grid slot, for persistence.
    pub fn encoded_by_position(&self) -> Vec<(GridPosition, EncodedImage)> {
        let mut out: Vec<(GridPosition, EncodedImage)> = self
            .entries
            .iter()
            .filter_map(|(cell, entry)| {
                entry
                    .encoded
                    .clone()
                    .map(|encoded| (cell.position(), encoded))
            })
            .collect();
        out.sort_by_key(|(position, _)| *position);
        out
    }
}

#[cfg(test)]
mod tests {
    use pillwatch_types::{config::GridConfig, geometry::partition_grid, geometry::Rectangle};
    use uuid::Uuid;

    use super::*;

    fn cells() -> Vec<GridCell> {
        let master = Rectangle::new(0.0, 0.0, 40.0, 70.0).expect("rect");
        partition_grid(Uuid::new_v4(), &master, &GridConfig::default()).expect("grid")
    }

    fn image(shade: u8) -> RawImage {
        RawImage::filled(10, 10, [shade, shade, shade, 255])
    }

    #[test]
    fn replace_all_marks_pending_and_missing() {
        let cells = cells();
        let mut ledger = BaselineLedger::new();
        let mut incoming = HashMap::new();
        incoming.insert(cells[0].id, Some(EncodedImage::new("a")));
        incoming.insert(cells[1].id, None);

        let tickets = ledger.replace_all(&cells, incoming);
        assert_eq!(tickets.len(), 1);
        assert_eq!(ledger.status(&cells[0].id), BaselineStatus::Pending);
        assert_eq!(ledger.status(&cells[1].id), BaselineStatus::Missing);
        assert_eq!(ledger.status(&cells[2].id), BaselineStatus::Missing);
        assert!(!ledger.has_decoded());
        assert_eq!(ledger.pending(), 1);
    }

    #[test]
    fn late_decode_of_older_baseline_is_discarded() {
        let cells = cells();
        let id = cells[3].id;
        let mut ledger = BaselineLedger::new();

        let (ticket_a, _) = ledger.set(id, Some(EncodedImage::new("A"))).expect("job A");
        let (ticket_b, _) = ledger.set(id, Some(EncodedImage::new("B"))).expect("job B");

        // B resolves first, A afterwards
        assert_eq!(ledger.complete(&ticket_b, Some(image(200))), Some(BaselineStatus::Ready));
        assert_eq!(ledger.complete(&ticket_a, Some(image(10))), None);

        let decoded = ledger.decoded_image(&id).expect("decoded");
        assert_eq!(decoded.pixel(0, 0), Some([200, 200, 200, 255]));
        assert_eq!(ledger.encoded(&id), Some(&EncodedImage::new("B")));
    }

    #[test]
    fn clearing_invalidates_in_flight_decodes() {
        let cells = cells();
        let id = cells[0].id;
        let mut ledger = BaselineLedger::new();
        let (ticket, _) = ledger.set(id, Some(EncodedImage::new("A"))).expect("job");

        assert!(ledger.set(id, None).is_none());
        assert_eq!(ledger.complete(&ticket, Some(image(1))), None);
        assert_eq!(ledger.status(&id), BaselineStatus::Missing);

        let (ticket, _) = ledger.set(id, Some(EncodedImage::new("A"))).expect("job");
        ledger.clear();
        assert_eq!(ledger.complete(&ticket, Some(image(1))), None);
        assert!(!ledger.has_decoded());
    }

    #[test]
    fn failed_decode_is_distinct_from_pending() {
        let cells = cells();
        let id = cells[0].id;
        let mut ledger = BaselineLedger::new();
        let (ticket, _) = ledger.set(id, Some(EncodedImage::new("corrupt"))).expect("job");
        assert_eq!(ledger.status(&id), BaselineStatus::Pending);
        assert_eq!(ledger.complete(&ticket, None), Some(BaselineStatus::Failed));
        assert_eq!(ledger.status(&id), BaselineStatus::Failed);
        assert!(!ledger.is_current(&id, ticket.version));
    }

    #[test]
    fn retain_prunes_foreign_cells() {
        let old = cells();
        let new = cells();
        let mut ledger = BaselineLedger::new();
        ledger.set(old[0].id, Some(EncodedImage::new("A")));
        ledger.set(new[0].id, Some(EncodedImage::new("B")));

        let keep: HashSet<CellId> = new.iter().map(|c| c.id).collect();
        ledger.retain(&keep);
        assert!(ledger.encoded(&old[0].id).is_none());
        assert_eq!(
            ledger.encoded_by_position(),
            vec![(GridPosition::new(0, 0), EncodedImage::new("B"))]
        );
    }
}
