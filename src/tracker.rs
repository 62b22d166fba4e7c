use anyhow::{bail, Result};
use tracing::{debug, instrument};

use crate::detector::{DetectorParams, FeatureDetector};
use crate::error::ensure_same_shape;
use crate::feature::*;
use crate::image::Image;
use crate::optical_flow::{LkParams, PointEstimator};

/// A track that survived one step: the same id before and after.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TrackedPair {
    pub old: Feature,
    pub new: Feature,
}

/// What one call to [`SparseTracker::track`] did.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct TrackOutcome {
    /// surviving tracks, aligned old/new by construction
    pub pairs: Vec<TrackedPair>,
    /// points the estimator could not locate
    pub lost: usize,
    /// the survivors fell under the reseed threshold
    pub depleted: bool,
}

impl TrackOutcome {
    pub fn surviving_old(&self) -> PointSet {
        self.pairs.iter().map(|p| p.old).collect()
    }

    pub fn surviving_new(&self) -> PointSet {
        self.pairs.iter().map(|p| p.new).collect()
    }
}

/// Follows the live point set from one frame to the next and decides when it
/// has to be detected again.
pub struct SparseTracker {
    estimator: Box<dyn PointEstimator>,
    detector: Box<dyn FeatureDetector>,
    lk_params: LkParams,
    detector_params: DetectorParams,
    min_tracks: usize,
    ids: TrackIdAllocator,
}

impl SparseTracker {
    pub fn new(
        estimator: Box<dyn PointEstimator>,
        detector: Box<dyn FeatureDetector>,
        lk_params: LkParams,
        detector_params: DetectorParams,
        min_tracks: usize,
    ) -> Self {
        Self {
            estimator,
            detector,
            lk_params,
            detector_params,
            min_tracks,
            ids: TrackIdAllocator::new(),
        }
    }

    pub fn min_tracks(&self) -> usize {
        self.min_tracks
    }

    /// The live set must be re-detected before it is tracked again: it is empty,
    /// or the last track call left it depleted. A fresh detection smaller than
    /// the threshold is still tracked.
    pub fn needs_reseed(&self, points: &PointSet, depleted: bool) -> bool {
        points.is_empty() || depleted
    }

    /// Run the detector on `gray` and give every point a fresh id.
    pub fn detect(&mut self, gray: &Image) -> Result<PointSet> {
        let mut points = self.detector.detect(gray, &self.detector_params)?;
        points.truncate(self.detector_params.max_count);
        let features = self.ids.assign(points);
        debug!(count = features.len(), "detected features");
        Ok(features)
    }

    /// Estimate where every point of `points` went between the two frames and
    /// keep only the ones that were found.
    #[instrument(skip_all, fields(points = points.len()))]
    pub fn track(
        &mut self,
        prev_gray: &Image,
        curr_gray: &Image,
        points: &PointSet,
    ) -> Result<TrackOutcome> {
        ensure_same_shape("sparse tracking", prev_gray.shape(), curr_gray.shape())?;
        if points.is_empty() {
            return Ok(TrackOutcome {
                depleted: true,
                ..Default::default()
            });
        }

        let estimate =
            self.estimator
                .estimate(prev_gray, curr_gray, &coordinates(points), &self.lk_params)?;

        // nothing at all came back, leave the set empty and reseed next time
        if estimate.status.is_empty() {
            debug!("estimator returned no results");
            return Ok(TrackOutcome {
                lost: points.len(),
                depleted: true,
                ..Default::default()
            });
        }
        if estimate.status.len() != points.len() || estimate.points.len() != points.len() {
            bail!(
                "estimator returned {} points and {} flags for {} inputs",
                estimate.points.len(),
                estimate.status.len(),
                points.len()
            );
        }

        let pairs: Vec<TrackedPair> = points
            .iter()
            .zip(estimate.points.iter().zip(estimate.status.iter()))
            .filter(|(_, (_, found))| **found)
            .map(|(old, (&point, _))| TrackedPair {
                old: *old,
                new: Feature { point, id: old.id },
            })
            .collect();
        let lost = points.len() - pairs.len();
        let depleted = pairs.len() < self.min_tracks || pairs.is_empty();

        Ok(TrackOutcome {
            pairs,
            lost,
            depleted,
        })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::my_types::*;
    use crate::optical_flow::PointEstimate;
    use std::cell::RefCell;
    use std::rc::Rc;

    /// Moves every point by a fixed offset and loses the indices in `lose`.
    pub struct ShiftEstimator {
        pub shift: Vector2d,
        pub lose: Vec<usize>,
        pub calls: Rc<RefCell<usize>>,
    }

    impl PointEstimator for ShiftEstimator {
        fn estimate(
            &mut self,
            _prev_gray: &Image,
            _curr_gray: &Image,
            points: &[Vector2d],
            _params: &LkParams,
        ) -> Result<PointEstimate> {
            *self.calls.borrow_mut() += 1;
            Ok(PointEstimate {
                points: points.iter().map(|p| p + self.shift).collect(),
                status: (0..points.len()).map(|i| !self.lose.contains(&i)).collect(),
            })
        }
    }

    /// Returns a fixed row of points, at most `max_count` of them.
    pub struct GridDetector {
        pub count: usize,
        pub calls: Rc<RefCell<usize>>,
    }

    impl FeatureDetector for GridDetector {
        fn detect(&mut self, _gray: &Image, params: &DetectorParams) -> Result<Vec<Vector2d>> {
            *self.calls.borrow_mut() += 1;
            Ok((0..self.count.min(params.max_count))
                .map(|i| Vector2d::new(10. + 2. * i as f64, 20.))
                .collect())
        }
    }

    pub fn lk() -> LkParams {
        LkParams {
            win_size: 15,
            max_level: 2,
            iters: 10,
            epsilon: 0.03,
            min_eig: 1e-4,
        }
    }

    pub fn detector_params(max_count: usize) -> DetectorParams {
        DetectorParams {
            max_count,
            quality_level: 0.3,
            min_distance: 7.,
            block_size: 7,
        }
    }

    fn make_tracker(lose: Vec<usize>, count: usize, min_tracks: usize) -> SparseTracker {
        SparseTracker::new(
            Box::new(ShiftEstimator {
                shift: Vector2d::new(1., -1.),
                lose,
                calls: Rc::new(RefCell::new(0)),
            }),
            Box::new(GridDetector {
                count,
                calls: Rc::new(RefCell::new(0)),
            }),
            lk(),
            detector_params(20),
            min_tracks,
        )
    }

    #[test]
    fn test_alignment() {
        let gray = Image::filled(64, 64, 0);
        let mut tracker = make_tracker(vec![1, 3, 4], 10, 2);
        let points = tracker.detect(&gray).unwrap();
        let outcome = tracker.track(&gray, &gray, &points).unwrap();

        let old = outcome.surviving_old();
        let new = outcome.surviving_new();
        assert_eq!(old.len(), 7);
        assert_eq!(new.len(), 7);
        assert_eq!(outcome.lost, 3);
        assert!(!outcome.depleted);
        for (o, n) in old.iter().zip(new.iter()) {
            assert_eq!(o.id, n.id);
            assert!((n.point - o.point - Vector2d::new(1., -1.)).norm() < 1e-12);
        }
        let ids: Vec<_> = old.iter().map(|f| f.id.0).collect();
        assert_eq!(ids, vec![0, 2, 5, 6, 7, 8, 9]);
    }

    #[test]
    fn test_depleted_below_threshold() {
        let gray = Image::filled(64, 64, 0);
        let mut tracker = make_tracker((0..8).collect(), 10, 3);
        let points = tracker.detect(&gray).unwrap();
        let outcome = tracker.track(&gray, &gray, &points).unwrap();
        assert_eq!(outcome.pairs.len(), 2);
        assert!(outcome.depleted);
        assert!(tracker.needs_reseed(&outcome.surviving_new(), outcome.depleted));
        // a small fresh set is tracked before any reseed
        assert!(!tracker.needs_reseed(&outcome.surviving_new(), false));
        assert!(tracker.needs_reseed(&vec![], false));
    }

    #[test]
    fn test_empty_estimate_defers_to_reseed() {
        struct Nothing;
        impl PointEstimator for Nothing {
            fn estimate(
                &mut self,
                _: &Image,
                _: &Image,
                _: &[Vector2d],
                _: &LkParams,
            ) -> Result<PointEstimate> {
                Ok(PointEstimate::default())
            }
        }
        let gray = Image::filled(32, 32, 0);
        let mut tracker = SparseTracker::new(
            Box::new(Nothing),
            Box::new(GridDetector {
                count: 5,
                calls: Rc::new(RefCell::new(0)),
            }),
            lk(),
            detector_params(5),
            1,
        );
        let points = tracker.detect(&gray).unwrap();
        let outcome = tracker.track(&gray, &gray, &points).unwrap();
        assert!(outcome.pairs.is_empty());
        assert!(outcome.depleted);
        assert_eq!(outcome.lost, 5);
    }

    #[test]
    fn test_detect_respects_max_count_and_fresh_ids() {
        let gray = Image::filled(64, 64, 0);
        let mut tracker = make_tracker(vec![], 50, 2);
        let first = tracker.detect(&gray).unwrap();
        let second = tracker.detect(&gray).unwrap();
        assert_eq!(first.len(), 20);
        assert_eq!(second.len(), 20);
        assert_eq!(second[0].id, TrackId(20));
    }

    #[test]
    fn test_dimension_mismatch() {
        let mut tracker = make_tracker(vec![], 5, 1);
        let a = Image::filled(64, 64, 0);
        let b = Image::filled(64, 32, 0);
        let points = tracker.detect(&a).unwrap();
        let err = tracker.track(&a, &b, &points).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<crate::error::SessionError>(),
            Some(crate::error::SessionError::DimensionMismatch { .. })
        ));
    }
}
