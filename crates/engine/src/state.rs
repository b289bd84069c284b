//! In-memory owner of the local position snapshot.

use chrono::Utc;
use parking_lot::Mutex;
use perp_keeper_core::{Direction, PositionSnapshot, RemotePosition};
use rust_decimal::Decimal;

/// Guards the [`PositionSnapshot`]. The lock is only held for in-memory work
/// and never across an `.await`.
#[derive(Debug, Default)]
pub struct StateStore {
    inner: Mutex<PositionSnapshot>,
}

impl StateStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of the current snapshot.
    #[must_use]
    pub fn read(&self) -> PositionSnapshot {
        self.inner.lock().clone()
    }

    /// Applies `f` under the lock and returns its result.
    pub fn write<R>(&self, f: impl FnOnce(&mut PositionSnapshot) -> R) -> R {
        f(&mut self.inner.lock())
    }

    /// Resets to flat and returns the previous snapshot.
    pub fn reset(&self) -> PositionSnapshot {
        self.write(std::mem::take)
    }

    #[must_use]
    pub fn is_open(&self) -> bool {
        self.inner.lock().is_open
    }

    /// Marks a position opened by this process.
    pub fn open_with(&self, direction: Direction, entry_price: Decimal, quantity: Decimal, leverage: u32) {
        self.write(|s| {
            *s = PositionSnapshot {
                is_open: !direction.is_flat(),
                direction,
                entry_price,
                quantity: quantity.abs(),
                leverage,
                opened_at: Some(Utc::now()),
            };
        });
    }

    /// Replaces the snapshot with the exchange-reported position, keeping
    /// `opened_at` when the direction is unchanged. Returns the new snapshot.
    pub fn adopt(&self, remote: &RemotePosition) -> PositionSnapshot {
        self.write(|s| {
            let mut next = PositionSnapshot::from_remote(remote);
            if s.is_open && s.direction == next.direction {
                next.opened_at = s.opened_at;
            }
            *s = next.clone();
            next
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn remote(quantity: Decimal) -> RemotePosition {
        RemotePosition {
            symbol: "ALGOUSDT".into(),
            quantity,
            entry_price: dec!(0.25),
            mark_price: dec!(0.25),
            leverage: 2,
        }
    }

    #[test]
    fn test_starts_flat() {
        let store = StateStore::new();
        assert!(!store.is_open());
        assert_eq!(store.read(), PositionSnapshot::flat());
    }

    #[test]
    fn test_open_and_reset() {
        let store = StateStore::new();
        store.open_with(Direction::Short, dec!(100), dec!(-2), 3);
        let snap = store.read();
        assert!(snap.is_open);
        assert_eq!(snap.quantity, dec!(2));

        let previous = store.reset();
        assert_eq!(previous.direction, Direction::Short);
        assert!(!store.is_open());
        assert_eq!(store.read().quantity, dec!(0));
    }

    #[test]
    fn test_write_returns_closure_result() {
        let store = StateStore::new();
        let leverage = store.write(|s| {
            s.leverage = 7;
            s.leverage
        });
        assert_eq!(leverage, 7);
        assert_eq!(store.read().leverage, 7);
    }

    #[test]
    fn test_adopt_keeps_opened_at_for_same_direction() {
        let store = StateStore::new();
        let first = store.adopt(&remote(dec!(40)));
        let second = store.adopt(&remote(dec!(50)));
        assert_eq!(first.opened_at, second.opened_at);
        assert_eq!(second.quantity, dec!(50));

        let flipped = store.adopt(&remote(dec!(-10)));
        assert_eq!(flipped.direction, Direction::Short);
    }

    #[test]
    fn test_adopt_flat_resets() {
        let store = StateStore::new();
        store.adopt(&remote(dec!(40)));
        store.adopt(&remote(dec!(0)));
        assert!(!store.is_open());
    }
}
