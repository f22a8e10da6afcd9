//! Row-bitmask key state with change tracking.

use core::fmt::Debug;
use core::ops::{BitAnd, BitOr, BitXor, BitXorAssign, Not};

/// Integer holding one row of key states, one bit per column.
pub trait RowState:
    Copy
    + Default
    + Eq
    + Debug
    + Not<Output = Self>
    + BitAnd<Output = Self>
    + BitOr<Output = Self>
    + BitXor<Output = Self>
    + BitXorAssign
{
    const COLUMNS: usize;

    fn bit(self, col: usize) -> bool;
    fn ones(self) -> u32;
    fn is_clear(self) -> bool {
        self == Self::default()
    }
}

macro_rules! impl_row_state {
    ($($t:ty),*) => {
        $(
            impl RowState for $t {
                const COLUMNS: usize = <$t>::BITS as usize;

                fn bit(self, col: usize) -> bool {
                    col < Self::COLUMNS && (self >> col) & 1 != 0
                }

                fn ones(self) -> u32 {
                    self.count_ones()
                }
            }
        )*
    };
}

impl_row_state!(u8, u16, u32);

/// A key press or release between the acknowledged and the current state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyTransition {
    pub row: u8,
    pub col: u8,
    pub pressed: bool,
}

/// Current and previously acknowledged key state of one matrix.
///
/// `previous` only moves forward when the consumer calls
/// [`acknowledge`](Self::acknowledge), so a change can never be lost
/// between a scan and the event dispatch that reads it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyMatrixSnapshot<R: RowState, const ROWS: usize> {
    pub current: [R; ROWS],
    pub previous: [R; ROWS],
}

impl<R: RowState, const ROWS: usize> Default for KeyMatrixSnapshot<R, ROWS> {
    fn default() -> Self {
        Self::new()
    }
}

impl<R: RowState, const ROWS: usize> KeyMatrixSnapshot<R, ROWS> {
    pub fn new() -> Self {
        Self {
            current: [R::default(); ROWS],
            previous: [R::default(); ROWS],
        }
    }

    pub fn update(&mut self, rows: [R; ROWS]) {
        self.current = rows;
    }

    /// Drop all pressed keys, e.g. when a half disappears from the bus.
    pub fn clear(&mut self) {
        self.current = [R::default(); ROWS];
    }

    /// Mark the current state as consumed.
    pub fn acknowledge(&mut self) {
        self.previous = self.current;
    }

    pub fn has_changes(&self) -> bool {
        self.current != self.previous
    }

    pub fn is_pressed(&self, row: usize, col: usize) -> bool {
        self.current.get(row).is_some_and(|r| r.bit(col))
    }

    pub fn was_pressed(&self, row: usize, col: usize) -> bool {
        self.previous.get(row).is_some_and(|r| r.bit(col))
    }

    pub fn pressed_count(&self) -> u32 {
        self.current.iter().map(|r| r.ones()).sum()
    }

    pub fn previous_pressed_count(&self) -> u32 {
        self.previous.iter().map(|r| r.ones()).sum()
    }

    /// Keys whose state differs between `previous` and `current`, in row
    /// then column order.
    pub fn transitions(&self) -> impl Iterator<Item = KeyTransition> + '_ {
        (0..ROWS).flat_map(move |row| {
            let changed = self.current[row] ^ self.previous[row];
            (0..R::COLUMNS)
                .filter(move |&col| changed.bit(col))
                .map(move |col| KeyTransition {
                    row: row as u8,
                    col: col as u8,
                    pressed: self.current[row].bit(col),
                })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transitions_report_presses_and_releases() {
        let mut snap = KeyMatrixSnapshot::<u8, 3>::new();
        snap.update([0b0000_0001, 0, 0b1000_0000]);
        let events: Vec<_> = snap.transitions().collect();
        assert_eq!(
            events,
            vec![
                KeyTransition { row: 0, col: 0, pressed: true },
                KeyTransition { row: 2, col: 7, pressed: true },
            ]
        );

        snap.acknowledge();
        assert!(!snap.has_changes());
        assert_eq!(snap.transitions().count(), 0);

        snap.update([0, 0, 0b1000_0000]);
        let events: Vec<_> = snap.transitions().collect();
        assert_eq!(events, vec![KeyTransition { row: 0, col: 0, pressed: false }]);
        assert!(snap.was_pressed(0, 0));
        assert!(!snap.is_pressed(0, 0));
    }

    #[test]
    fn counts_and_bounds() {
        let mut snap = KeyMatrixSnapshot::<u16, 2>::new();
        snap.update([0b1011, 0x8000]);
        assert_eq!(snap.pressed_count(), 4);
        assert_eq!(snap.previous_pressed_count(), 0);
        assert!(snap.is_pressed(1, 15));
        assert!(!snap.is_pressed(1, 16));
        assert!(!snap.is_pressed(5, 0));
    }

    #[test]
    fn clear_keeps_previous_for_release_events() {
        let mut snap = KeyMatrixSnapshot::<u8, 1>::new();
        snap.update([0b110]);
        snap.acknowledge();
        snap.clear();
        assert_eq!(snap.transitions().filter(|t| !t.pressed).count(), 2);
    }
}
