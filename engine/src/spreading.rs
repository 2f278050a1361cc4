//! FILENAME: engine/src/spreading.rs
//! PURPOSE: Tracks which cells an array-producing formula currently occupies.
//! CONTEXT: A bidirectional index kept in lockstep, one map per direction:
//! origin -> its current result zone (one-to-one), and result cell -> origin
//! (many cells per zone). The invariant is exclusivity: at most one origin
//! claims any given result cell at a time, so inserting a relation first
//! evicts the origin's own previous claim and any overlapping claim of
//! another origin. The evaluator consults this structure to force-clear cells
//! an array formula abandons and to refuse edits into occupied cells.

use std::collections::HashMap;

use crate::cell::CellPosition;
use crate::zone::Zone;

#[derive(Debug, Default, Clone)]
pub struct SpreadingRelation {
    /// origin -> the rectangular result zone it owns (on the origin's sheet).
    zone_by_origin: HashMap<CellPosition, Zone>,
    /// result cell -> the origin whose formula produced its value.
    origin_by_cell: HashMap<CellPosition, CellPosition>,
}

impl SpreadingRelation {
    pub fn new() -> Self {
        SpreadingRelation::default()
    }

    /// Registers `origin` as owning `zone`. Any prior relation of this origin
    /// and any relation overlapping the new zone is evicted first; the
    /// evicted origins (excluding `origin` itself) are returned so the caller
    /// can clear their abandoned result cells.
    pub fn add_relation(&mut self, origin: &CellPosition, zone: Zone) -> Vec<CellPosition> {
        self.remove_node(origin);

        let evicted = self.search_formula_positions_spreading_on(&origin.sheet_id, &zone);
        for other in &evicted {
            self.remove_node(other);
        }

        for (col, row) in zone.positions() {
            self.origin_by_cell.insert(
                CellPosition::new(origin.sheet_id.clone(), col, row),
                origin.clone(),
            );
        }
        self.zone_by_origin.insert(origin.clone(), zone);

        evicted
    }

    /// Drops the relation anchored at `position`, if any, returning the zone
    /// it owned.
    pub fn remove_node(&mut self, position: &CellPosition) -> Option<Zone> {
        let zone = self.zone_by_origin.remove(position)?;
        for (col, row) in zone.positions() {
            self.origin_by_cell
                .remove(&CellPosition::new(position.sheet_id.clone(), col, row));
        }
        Some(zone)
    }

    /// All origins whose result zone overlaps `zone` on the given sheet.
    pub fn search_formula_positions_spreading_on(
        &self,
        sheet_id: &str,
        zone: &Zone,
    ) -> Vec<CellPosition> {
        self.zone_by_origin
            .iter()
            .filter(|(origin, owned)| origin.sheet_id == sheet_id && owned.overlaps(zone))
            .map(|(origin, _)| origin.clone())
            .collect()
    }

    /// The zone currently owned by `origin`, if it is an array formula.
    pub fn get_array_result_zone(&self, origin: &CellPosition) -> Option<&Zone> {
        self.zone_by_origin.get(origin)
    }

    pub fn is_array_formula(&self, position: &CellPosition) -> bool {
        self.zone_by_origin.contains_key(position)
    }

    /// The origin spreading onto `position`, when `position` is inside some
    /// result zone. The origin reports itself, too.
    pub fn origin_spreading_on(&self, position: &CellPosition) -> Option<&CellPosition> {
        self.origin_by_cell.get(position)
    }

    /// True when `position` holds a spread value owned by a *different*
    /// origin cell, the case where an edit must be refused.
    pub fn is_spread_target(&self, position: &CellPosition) -> bool {
        match self.origin_by_cell.get(position) {
            Some(origin) => origin != position,
            None => false,
        }
    }
}
