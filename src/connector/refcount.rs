//! Logical-interest counter shared by a connector's callers.

// ============================================================================
// Imports
// ============================================================================

use tracing::warn;

// ============================================================================
// Release
// ============================================================================

/// Outcome of [`RefCount::release`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Release {
    /// Other callers still hold interest.
    Remaining(usize),
    /// The last caller released; tear down.
    Last,
    /// Release without a matching acquire; ignored.
    Underflow,
}

// ============================================================================
// RefCount
// ============================================================================

/// Non-negative caller count.
///
/// Not reset on reconnect: it tracks interest, not connection health.
#[derive(Debug, Default)]
pub(crate) struct RefCount {
    count: usize,
}

impl RefCount {
    /// Adds a caller. Returns `true` on the 0 → 1 transition.
    pub(crate) fn acquire(&mut self) -> bool {
        self.count += 1;
        self.count == 1
    }

    /// Removes a caller.
    pub(crate) fn release(&mut self, role: &'static str) -> Release {
        match self.count {
            0 => {
                warn!(role, "Unmatched stop ignored");
                Release::Underflow
            }
            1 => {
                self.count = 0;
                Release::Last
            }
            n => {
                self.count = n - 1;
                Release::Remaining(self.count)
            }
        }
    }

    /// Returns the current count.
    #[inline]
    pub(crate) const fn get(&self) -> usize {
        self.count
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transitions() {
        let mut refs = RefCount::default();
        assert!(refs.acquire());
        assert!(!refs.acquire());
        assert_eq!(refs.release("host"), Release::Remaining(1));
        assert_eq!(refs.release("host"), Release::Last);
        assert_eq!(refs.get(), 0);
    }

    #[test]
    fn test_underflow_ignored() {
        let mut refs = RefCount::default();
        assert_eq!(refs.release("overlay"), Release::Underflow);
        assert_eq!(refs.get(), 0);
        assert!(refs.acquire());
    }
}
