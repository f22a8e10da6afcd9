//! Per-key debounce logic.
//!
//! Each key has a 2-bit counter stored bit-sliced across two row masks
//! (`db0` holds bit 0, `db1` bit 1), so a whole row is debounced with a
//! handful of bitwise operations. A key's counter only advances while its
//! raw reading disagrees with the debounced state and resets as soon as
//! the reading agrees again. The debounced state flips when the counter
//! wraps back to zero with the reading still disagreeing, i.e. on the
//! fourth consecutive disagreeing sample.

use crate::snapshot::{KeyMatrixSnapshot, RowState};

#[derive(Debug, Clone, Copy)]
pub struct Debouncer<R: RowState, const ROWS: usize> {
    db0: [R; ROWS],
    db1: [R; ROWS],
    debounced: [R; ROWS],
}

impl<R: RowState, const ROWS: usize> Default for Debouncer<R, ROWS> {
    fn default() -> Self {
        Self::new()
    }
}

impl<R: RowState, const ROWS: usize> Debouncer<R, ROWS> {
    pub fn new() -> Self {
        Self {
            db0: [R::default(); ROWS],
            db1: [R::default(); ROWS],
            debounced: [R::default(); ROWS],
        }
    }

    /// Feed one raw sample for `row` (1 = switch conducting) and return
    /// the bits whose debounced state flipped. Rows past the matrix never
    /// change.
    pub fn debounce_row(&mut self, row: usize, sample: R) -> R {
        if row >= ROWS {
            return R::default();
        }
        let db0 = self.db0[row];
        let db1 = self.db1[row];

        // Bits that disagree with the last stable state
        let delta = sample ^ self.debounced[row];

        // Advance the counter for disagreeing bits, reset the rest
        let db1 = (db1 ^ db0) & delta;
        let db0 = !db0 & delta;

        // Still disagreeing and the counter wrapped back to zero
        let changes = !(!delta | db0 | db1);

        self.db0[row] = db0;
        self.db1[row] = db1;
        self.debounced[row] ^= changes;
        changes
    }

    pub fn state(&self) -> &[R; ROWS] {
        &self.debounced
    }
}

/// Debounces raw samples of a local switch matrix into a snapshot.
pub struct DebounceMatrixScanner<R: RowState, const ROWS: usize> {
    debouncer: Debouncer<R, ROWS>,
    snapshot: KeyMatrixSnapshot<R, ROWS>,
    interval_micros: u32,
    next_scan_at: u32,
}

impl<R: RowState, const ROWS: usize> DebounceMatrixScanner<R, ROWS> {
    /// Default pacing between two matrix reads.
    pub const DEFAULT_INTERVAL_MICROS: u32 = 1500;

    pub fn new() -> Self {
        Self::with_interval(Self::DEFAULT_INTERVAL_MICROS)
    }

    pub fn with_interval(interval_micros: u32) -> Self {
        Self {
            debouncer: Debouncer::new(),
            snapshot: KeyMatrixSnapshot::new(),
            interval_micros,
            next_scan_at: 0,
        }
    }

    /// Whether a new raw sample should be taken at `now_micros`. Arms the
    /// next deadline when it returns true.
    pub fn scan_due(&mut self, now_micros: u32) -> bool {
        if now_micros.wrapping_sub(self.next_scan_at) as i32 >= 0 {
            self.next_scan_at = now_micros.wrapping_add(self.interval_micros);
            true
        } else {
            false
        }
    }

    /// Debounce one raw sample of the whole matrix. Returns true when the
    /// debounced state changed and `snapshot().current` was refreshed.
    pub fn scan(&mut self, sample: &[R; ROWS]) -> bool {
        let mut any_changes = R::default();
        for (row, &bits) in sample.iter().enumerate() {
            any_changes = any_changes | self.debouncer.debounce_row(row, bits);
        }

        let changed = !any_changes.is_clear();
        if changed {
            self.snapshot.update(*self.debouncer.state());
        }
        changed
    }

    pub fn snapshot(&self) -> &KeyMatrixSnapshot<R, ROWS> {
        &self.snapshot
    }

    pub fn snapshot_mut(&mut self) -> &mut KeyMatrixSnapshot<R, ROWS> {
        &mut self.snapshot
    }

    pub fn is_pressed(&self, row: usize, col: usize) -> bool {
        self.snapshot.is_pressed(row, col)
    }

    pub fn was_pressed(&self, row: usize, col: usize) -> bool {
        self.snapshot.was_pressed(row, col)
    }

    pub fn pressed_count(&self) -> u32 {
        self.snapshot.pressed_count()
    }
}

impl<R: RowState, const ROWS: usize> Default for DebounceMatrixScanner<R, ROWS> {
    fn default() -> Self {
        Self::new()
    }
}
