use std::{
    fmt,
    sync::{
        LazyLock,
        atomic::{AtomicU64, Ordering},
    },
};

static NEXT_ID: LazyLock<AtomicU64> = LazyLock::new(|| AtomicU64::new(rand::random()));

/// A process-wide monotonic id tagged onto every query's log span.
///
/// The seed is random so ids from different processes don't collide in
/// aggregated logs; this is a correlation tag, not a security token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RequestId(u64);

impl RequestId {
    pub fn next() -> Self {
        Self(NEXT_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_increasing() {
        let first = RequestId::next();
        let second = RequestId::next();
        let third = RequestId::next();

        assert!(second.0.wrapping_sub(first.0) >= 1);
        assert!(third.0.wrapping_sub(second.0) >= 1);
    }
}
