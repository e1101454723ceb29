use std::collections::VecDeque;

use crate::error::{AnnotError, Result};
use crate::geometry::{RasterRect, blit_bytes, crop_bytes};
use crate::mask::{MaskStore, RasterHandle};

// ============================================================================
// PATCH SNAPSHOT - rectangular byte capture of one raster region
// ============================================================================

/// Bytes of `rect`, row-major, one byte per pixel.
#[derive(Clone, Debug, PartialEq, Eq, Default)]
pub struct PatchSnapshot {
    pub rect: RasterRect,
    pub bytes: Vec<u8>,
}

impl PatchSnapshot {
    pub fn capture(store: &mut MaskStore, raster: RasterHandle, rect: RasterRect) -> Result<Self> {
        let bytes = store.read_region(raster, rect)?;
        Ok(Self { rect, bytes })
    }

    /// Grow the snapshot to cover `new_rect` while keeping it a *prior*
    /// snapshot.  The live raster is read for the enlarged region, then the
    /// previously captured prior bytes are copied back over their own
    /// sub-rectangle.  The border outside the old rect must not have been
    /// painted since the snapshot began, which holds because every paint is
    /// checked against `rect` before it is submitted.
    pub fn expand(&mut self, store: &mut MaskStore, raster: RasterHandle, new_rect: RasterRect) -> Result<()> {
        let new_rect = new_rect.union(&self.rect);
        if new_rect == self.rect {
            return Ok(());
        }
        let live = store.read_region(raster, new_rect)?;
        self.bytes = compose_expanded_prior(self.rect, &self.bytes, new_rect, live);
        self.rect = new_rect;
        Ok(())
    }

    /// Sub-snapshot of `sub`, which must lie inside `self.rect`.
    pub fn crop(&self, sub: RasterRect) -> PatchSnapshot {
        PatchSnapshot {
            rect: sub,
            bytes: crop_bytes(self.rect, &self.bytes, sub),
        }
    }

    /// Write the snapshot back into the raster.
    pub fn restore(&self, store: &mut MaskStore, raster: RasterHandle) -> Result<()> {
        store.write_region(raster, self.rect, &self.bytes)
    }

    pub fn memory_size(&self) -> usize {
        self.bytes.len()
    }
}

/// Prior snapshot for `new_rect`: `live_new` (current raster bytes of
/// `new_rect`) with the rows of `old_prior` written back at the offset of
/// `old_rect`.  `new_rect` must contain `old_rect`.
pub fn compose_expanded_prior(
    old_rect: RasterRect,
    old_prior: &[u8],
    new_rect: RasterRect,
    mut live_new: Vec<u8>,
) -> Vec<u8> {
    if !old_rect.is_empty() {
        blit_bytes(new_rect, &mut live_new, old_rect, old_prior);
    }
    live_new
}

// ============================================================================
// UNDO ACTION
// ============================================================================

/// One undoable edit: a raster region and the bytes to swap back into it.
///
/// On the undo stack `bytes` holds the state before the edit; on the redo
/// stack it holds the state after it.
#[derive(Clone, Debug)]
pub struct UndoAction {
    pub raster: RasterHandle,
    pub region: RasterRect,
    pub bytes: Vec<u8>,
    pub description: &'static str,
}

impl UndoAction {
    pub fn memory_size(&self) -> usize {
        self.bytes.len()
    }
}

// ============================================================================
// PATCH UNDO LEDGER - undo/redo stacks with count and memory limits
// ============================================================================

/// Undo/redo history of raster patches.
///
/// Undo and redo both swap: the region's current bytes are read before the
/// stored bytes are written, and the action moves to the other stack carrying
/// what was read.  Redo therefore reproduces the exact post-edit raster.
pub struct PatchUndoLedger {
    undo_stack: VecDeque<UndoAction>,
    redo_stack: VecDeque<UndoAction>,
    max_entries: usize,
    max_bytes: usize,
    /// Running memory total across both stacks.
    total_bytes: usize,
}

impl Default for PatchUndoLedger {
    fn default() -> Self {
        Self::new(50, 100 * 1024 * 1024)
    }
}

impl PatchUndoLedger {
    pub fn new(max_entries: usize, max_bytes: usize) -> Self {
        Self {
            undo_stack: VecDeque::new(),
            redo_stack: VecDeque::new(),
            max_entries,
            max_bytes,
            total_bytes: 0,
        }
    }

    /// Record an edit of `region` whose pre-edit bytes are `prior`.
    pub fn push(&mut self, raster: RasterHandle, region: RasterRect, prior: Vec<u8>, description: &'static str) {
        if region.is_empty() || prior.len() != region.byte_len() {
            crate::log_warn!(
                "Undo push ignored: {:?} with {} bytes ({})",
                region,
                prior.len(),
                description
            );
            return;
        }
        self.push_action(UndoAction {
            raster,
            region,
            bytes: prior,
            description,
        });
    }

    pub fn push_action(&mut self, action: UndoAction) {
        // A new edit invalidates everything that was undone.
        for undone in self.redo_stack.drain(..) {
            self.total_bytes = self.total_bytes.saturating_sub(undone.memory_size());
        }
        self.total_bytes += action.memory_size();
        self.undo_stack.push_back(action);
        self.prune();
    }

    /// Revert the newest edit.  Returns the region that changed, or `None`
    /// when there is nothing to undo.
    pub fn undo(&mut self, store: &mut MaskStore) -> Result<Option<RasterRect>> {
        let Some(action) = self.undo_stack.pop_back() else {
            return Ok(None);
        };
        match swap_into_raster(store, action) {
            Ok(action) => {
                let region = action.region;
                self.redo_stack.push_back(action);
                Ok(Some(region))
            }
            Err((action, e)) => {
                self.undo_stack.push_back(action);
                Err(e)
            }
        }
    }

    /// Re-apply the newest undone edit.
    pub fn redo(&mut self, store: &mut MaskStore) -> Result<Option<RasterRect>> {
        let Some(action) = self.redo_stack.pop_back() else {
            return Ok(None);
        };
        match swap_into_raster(store, action) {
            Ok(action) => {
                let region = action.region;
                self.undo_stack.push_back(action);
                Ok(Some(region))
            }
            Err((action, e)) => {
                self.redo_stack.push_back(action);
                Err(e)
            }
        }
    }

    pub fn can_undo(&self) -> bool {
        !self.undo_stack.is_empty()
    }

    pub fn can_redo(&self) -> bool {
        !self.redo_stack.is_empty()
    }

    pub fn undo_description(&self) -> Option<&'static str> {
        self.undo_stack.back().map(|a| a.description)
    }

    pub fn redo_description(&self) -> Option<&'static str> {
        self.redo_stack.back().map(|a| a.description)
    }

    pub fn undo_count(&self) -> usize {
        self.undo_stack.len()
    }

    pub fn redo_count(&self) -> usize {
        self.redo_stack.len()
    }

    /// Bytes held by both stacks.
    pub fn memory_usage(&self) -> usize {
        self.total_bytes
    }

    pub fn clear(&mut self) {
        self.undo_stack.clear();
        self.redo_stack.clear();
        self.total_bytes = 0;
    }

    /// Drop the oldest entries until both limits hold.
    fn prune(&mut self) {
        let mut evicted = 0usize;
        while self.undo_stack.len() > self.max_entries
            || (self.total_bytes > self.max_bytes && !self.undo_stack.is_empty())
        {
            let Some(removed) = self.undo_stack.pop_front() else {
                break;
            };
            self.total_bytes = self.total_bytes.saturating_sub(removed.memory_size());
            evicted += 1;
        }
        if evicted > 0 {
            crate::log_info!(
                "Undo ledger evicted {} entr{} ({} bytes held)",
                evicted,
                if evicted == 1 { "y" } else { "ies" },
                self.total_bytes
            );
        }
    }
}

/// Write `action.bytes` into its region and return the action holding the
/// bytes that were there before.  On failure the untouched action is handed
/// back so it can return to its stack.
fn swap_into_raster(
    store: &mut MaskStore,
    mut action: UndoAction,
) -> std::result::Result<UndoAction, (UndoAction, AnnotError)> {
    let current = match store.read_region(action.raster, action.region) {
        Ok(bytes) => bytes,
        Err(e) => return Err((action, e)),
    };
    if let Err(e) = store.write_region(action.raster, action.region, &action.bytes) {
        return Err((action, e));
    }
    action.bytes = current;
    Ok(action)
}

#[cfg(test)]
mod tests {
    use super::*;
    use egui::Pos2;

    fn store() -> (MaskStore, RasterHandle) {
        let mut store = MaskStore::cpu(64, 64, 8).expect("store");
        let raster = store.get_or_create_raster(0).expect("raster");
        (store, raster)
    }

    /// Paint a circle and record it in the ledger the way a stroke would.
    fn recorded_paint(
        store: &mut MaskStore,
        raster: RasterHandle,
        ledger: &mut PatchUndoLedger,
        center: Pos2,
        value: u8,
    ) {
        let region = RasterRect::around_circle(center.x, center.y, 5.0, 64, 64);
        let prior = store.read_region(raster, region).expect("prior");
        store.paint_circle(raster, center, 5.0, value).expect("paint");
        ledger.push(raster, region, prior, "Brush");
    }

    #[test]
    fn undo_then_redo_reproduces_post_edit_raster() {
        let (mut store, raster) = store();
        let mut ledger = PatchUndoLedger::default();
        let before = store.read_full(raster).expect("read");
        recorded_paint(&mut store, raster, &mut ledger, Pos2::new(20.0, 20.0), 3);
        let after = store.read_full(raster).expect("read");

        assert!(ledger.undo(&mut store).expect("undo").is_some());
        assert_eq!(store.read_full(raster).expect("read"), before);
        assert!(ledger.redo(&mut store).expect("redo").is_some());
        assert_eq!(store.read_full(raster).expect("read"), after);
    }

    #[test]
    fn push_after_undo_clears_redo() {
        let (mut store, raster) = store();
        let mut ledger = PatchUndoLedger::default();
        for i in 0..3 {
            recorded_paint(&mut store, raster, &mut ledger, Pos2::new(10.0 + i as f32 * 12.0, 10.0), 1);
        }
        ledger.undo(&mut store).expect("undo");
        ledger.undo(&mut store).expect("undo");
        assert_eq!(ledger.redo_count(), 2);

        recorded_paint(&mut store, raster, &mut ledger, Pos2::new(40.0, 40.0), 2);
        assert_eq!(ledger.redo_count(), 0);
        assert!(!ledger.can_redo());
        assert_eq!(ledger.undo_count(), 2);
        assert_eq!(ledger.redo(&mut store).expect("redo"), None);
    }

    #[test]
    fn empty_stacks_are_no_ops() {
        let (mut store, _) = store();
        let mut ledger = PatchUndoLedger::default();
        assert_eq!(ledger.undo(&mut store).expect("undo"), None);
        assert_eq!(ledger.redo(&mut store).expect("redo"), None);
    }

    #[test]
    fn count_limit_evicts_oldest() {
        let mut ledger = PatchUndoLedger::new(3, usize::MAX);
        let region = RasterRect::new(0, 0, 1, 1);
        for i in 0..5u8 {
            ledger.push(RasterHandle(0), region, vec![i], "Brush");
        }
        assert_eq!(ledger.undo_count(), 3);
        let kept: Vec<u8> = ledger.undo_stack.iter().map(|a| a.bytes[0]).collect();
        assert_eq!(kept, vec![2, 3, 4]);
    }

    #[test]
    fn byte_limit_evicts_oldest() {
        let mut ledger = PatchUndoLedger::new(100, 250);
        let region = RasterRect::new(0, 0, 10, 10);
        for i in 0..4u8 {
            ledger.push(RasterHandle(0), region, vec![i; 100], "Brush");
            assert!(ledger.memory_usage() <= 250);
        }
        assert_eq!(ledger.undo_count(), 2);
        assert_eq!(ledger.undo_stack.front().map(|a| a.bytes[0]), Some(2));

        // An entry larger than the whole budget cannot be kept.
        ledger.push(RasterHandle(0), RasterRect::new(0, 0, 20, 20), vec![0; 400], "Fill");
        assert_eq!(ledger.undo_count(), 0);
        assert_eq!(ledger.memory_usage(), 0);
    }

    #[test]
    fn mismatched_push_is_ignored() {
        let mut ledger = PatchUndoLedger::default();
        ledger.push(RasterHandle(0), RasterRect::new(0, 0, 2, 2), vec![0; 3], "Brush");
        ledger.push(RasterHandle(0), RasterRect::default(), Vec::new(), "Brush");
        assert!(!ledger.can_undo());
    }

    #[test]
    fn compose_restores_old_prior_inside_new_rect() {
        let old_rect = RasterRect::new(1, 1, 2, 2);
        let new_rect = RasterRect::new(0, 0, 4, 3);
        let live = vec![9; new_rect.byte_len()];
        let composed = compose_expanded_prior(old_rect, &[1, 2, 3, 4], new_rect, live);
        assert_eq!(
            composed,
            vec![
                9, 9, 9, 9, //
                9, 1, 2, 9, //
                9, 3, 4, 9,
            ]
        );
    }

    #[test]
    fn repeated_expansion_keeps_the_pre_stroke_state() {
        let (mut store, raster) = store();
        // Pre-existing annotation the stroke will cross.
        store.paint_circle(raster, Pos2::new(30.0, 30.0), 8.0, 5).expect("paint");
        let original = store.read_full(raster).expect("read");

        let mut patch = PatchSnapshot::capture(&mut store, raster, RasterRect::new(8, 8, 8, 8)).expect("capture");
        let mut painted = RasterRect::default();
        for (i, c) in [(12.0, 12.0), (24.0, 24.0), (36.0, 30.0), (50.0, 44.0)].iter().enumerate() {
            let center = Pos2::new(c.0, c.1);
            let footprint = RasterRect::around_circle(center.x, center.y, 3.0, 64, 64);
            if !patch.rect.contains_rect(&footprint) {
                patch.expand(&mut store, raster, footprint.inflate(2, 64, 64)).expect("expand");
            }
            store.paint_circle(raster, center, 3.0, (i % 3 + 1) as u8).expect("paint");
            painted = painted.union(&footprint);
        }
        assert!(patch.rect.contains_rect(&painted));

        patch.restore(&mut store, raster).expect("restore");
        assert_eq!(store.read_full(raster).expect("read"), original);
    }
}
