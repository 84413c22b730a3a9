// Two-slot merge stage for accelerometer and gyroscope samples
//
// Each kind holds at most one pending sample. Once both are present they are
// emitted as one row stamped with the later timestamp and both slots clear.
// A sensor that runs faster than the other overwrites its own slot, so pairs
// can be stale when the rates diverge.

use crate::capture::{InertialKind, InertialSample, MergedInertialSample, Vec3};

#[derive(Debug, Default)]
pub struct InertialMerger {
    linear: Option<(Vec3, f64)>,
    angular: Option<(Vec3, f64)>,
    merged: usize,
}

impl InertialMerger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store the sample in its slot; returns a merged row when the pair completes
    pub fn push(&mut self, sample: InertialSample) -> Option<MergedInertialSample> {
        let slot = (sample.value, sample.timestamp);
        match sample.kind {
            InertialKind::LinearAcceleration => self.linear = Some(slot),
            InertialKind::AngularRate => self.angular = Some(slot),
        }

        match (self.linear, self.angular) {
            (Some((linear, t_linear)), Some((angular, t_angular))) => {
                self.linear = None;
                self.angular = None;
                self.merged += 1;
                Some(MergedInertialSample {
                    timestamp: t_linear.max(t_angular),
                    linear,
                    angular,
                })
            }
            _ => None,
        }
    }

    /// True if a sample is waiting for its counterpart
    pub fn has_pending(&self) -> bool {
        self.linear.is_some() || self.angular.is_some()
    }

    /// Number of merged rows emitted so far
    pub fn merged(&self) -> usize {
        self.merged
    }
}
