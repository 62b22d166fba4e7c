use crate::my_types::*;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Feature {
    pub point: Vector2d,
    pub id: TrackId,
}

/// The live set of tracked points, in detection order.
pub type PointSet = Vec<Feature>;

/// Hands out track ids. Ids are never reused within a session.
#[derive(Debug, Default)]
pub struct TrackIdAllocator {
    next_id: usize,
}

impl TrackIdAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next(&mut self) -> TrackId {
        let id = TrackId(self.next_id);
        self.next_id += 1;
        id
    }

    /// Wrap freshly detected coordinates into features with new ids.
    pub fn assign(&mut self, points: Vec<Vector2d>) -> PointSet {
        points
            .into_iter()
            .map(|point| Feature {
                point,
                id: self.next(),
            })
            .collect()
    }
}

pub fn coordinates(features: &[Feature]) -> Vec<Vector2d> {
    features.iter().map(|f| f.point).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_are_monotonic() {
        let mut ids = TrackIdAllocator::new();
        let first = ids.assign(vec![Vector2d::new(1., 2.), Vector2d::new(3., 4.)]);
        let second = ids.assign(vec![Vector2d::new(5., 6.)]);
        assert_eq!(first[0].id, TrackId(0));
        assert_eq!(first[1].id, TrackId(1));
        assert_eq!(second[0].id, TrackId(2));
        assert_eq!(coordinates(&first), vec![Vector2d::new(1., 2.), Vector2d::new(3., 4.)]);
    }
}
