//! Arena handles for map entities.

/// Handle of a KeyFrame in the map arena.
///
/// Ids are assigned sequentially and double as arena indices. They stay valid
/// for the lifetime of the map; removal only flips the KeyFrame's `is_bad` flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct KeyFrameId(pub u64);

impl KeyFrameId {
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    /// Arena slot of this KeyFrame.
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl std::fmt::Display for KeyFrameId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "KF{}", self.0)
    }
}

/// Handle of a MapPoint (landmark) in the map arena.
///
/// A fused-away MapPoint keeps its slot; its `replaced_by` field forwards to
/// the surviving landmark.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MapPointId(pub u64);

impl MapPointId {
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    /// Arena slot of this MapPoint.
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl std::fmt::Display for MapPointId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "MP{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        assert_eq!(format!("{}", MapPointId::new(123)), "MP123");
        assert_eq!(format!("{}", KeyFrameId::new(7)), "KF7");
    }

    #[test]
    fn test_index_and_ordering() {
        assert_eq!(KeyFrameId::new(42).index(), 42);
        assert!(MapPointId::new(3) < MapPointId::new(4));

        let mut ids = vec![MapPointId::new(9), MapPointId::new(1), MapPointId::new(5)];
        ids.sort();
        assert_eq!(ids, vec![MapPointId::new(1), MapPointId::new(5), MapPointId::new(9)]);
    }
}
