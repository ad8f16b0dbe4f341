//! Shared network reachability state

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

/// Coarse classification of the current network.
///
/// Drains are skipped entirely while `Offline`; the other classes scale the
/// per-drain batch size up or down.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkClass {
    Offline,
    Slow,
    Moderate,
    Fast,
}

impl NetworkClass {
    const fn as_u8(self) -> u8 {
        match self {
            Self::Offline => 0,
            Self::Slow => 1,
            Self::Moderate => 2,
            Self::Fast => 3,
        }
    }

    const fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Offline,
            1 => Self::Slow,
            3 => Self::Fast,
            _ => Self::Moderate,
        }
    }

    /// Scale a tier's base batch size for this network class.
    #[must_use]
    pub const fn scale_batch(self, base: usize) -> usize {
        match self {
            Self::Offline => 0,
            Self::Slow => {
                let half = base / 2;
                if half == 0 {
                    1
                } else {
                    half
                }
            }
            Self::Moderate => base,
            Self::Fast => base * 2,
        }
    }
}

/// Cheap cloneable handle to the process-wide network class.
///
/// The application layer updates it from whatever reachability signal the
/// platform provides; the sync layer only reads it.
#[derive(Debug, Clone)]
pub struct Connectivity {
    class: Arc<AtomicU8>,
}

impl Connectivity {
    #[must_use]
    pub fn new(initial: NetworkClass) -> Self {
        Self {
            class: Arc::new(AtomicU8::new(initial.as_u8())),
        }
    }

    #[must_use]
    pub fn online() -> Self {
        Self::new(NetworkClass::Moderate)
    }

    #[must_use]
    pub fn offline() -> Self {
        Self::new(NetworkClass::Offline)
    }

    pub fn set(&self, class: NetworkClass) {
        self.class.store(class.as_u8(), Ordering::Relaxed);
    }

    #[must_use]
    pub fn class(&self) -> NetworkClass {
        NetworkClass::from_u8(self.class.load(Ordering::Relaxed))
    }

    #[must_use]
    pub fn is_online(&self) -> bool {
        self.class() != NetworkClass::Offline
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handle_is_shared() {
        let connectivity = Connectivity::offline();
        let clone = connectivity.clone();
        assert!(!clone.is_online());

        connectivity.set(NetworkClass::Fast);
        assert!(clone.is_online());
        assert_eq!(clone.class(), NetworkClass::Fast);
    }

    #[test]
    fn test_batch_scaling() {
        assert_eq!(NetworkClass::Offline.scale_batch(10), 0);
        assert_eq!(NetworkClass::Slow.scale_batch(10), 5);
        assert_eq!(NetworkClass::Slow.scale_batch(1), 1);
        assert_eq!(NetworkClass::Moderate.scale_batch(10), 10);
        assert_eq!(NetworkClass::Fast.scale_batch(10), 20);
    }
}
