//! The assembled contact pipeline.

use super::detector::{Detector, DetectorConfig};
use super::stability::{Checker, StabilityConfig, Stabilizer};
use super::tracker::Tracker;
use super::validator::{Validator, ValidatorConfig};
use super::{Contact, DetectError, Image};

#[derive(Debug, Clone, Copy, Default)]
pub struct FinderConfig {
    pub detection: DetectorConfig,
    pub validation: ValidatorConfig,
    pub stability: StabilityConfig,
}

/// Runs detection, tracking, stabilization and validation over heatmap
/// frames, carrying the tracking state in between.
pub struct Finder {
    detector: Detector,
    tracker: Tracker,
    stabilizer: Stabilizer,
    checker: Checker,
    validator: Validator,
}

impl Finder {
    pub fn new(config: FinderConfig) -> Self {
        Self {
            detector: Detector::new(config.detection),
            tracker: Tracker::new(),
            stabilizer: Stabilizer::new(config.stability),
            checker: Checker::new(config.stability),
            validator: Validator::new(config.validation),
        }
    }

    /// Drops all temporal state, e.g. when the device is re-opened.
    pub fn reset(&mut self) {
        self.tracker.reset();
        self.stabilizer.reset();
        self.checker.reset();
        self.validator.reset();
    }

    /// Processes one heatmap frame into tracked, validated contacts.
    ///
    /// Validation runs before the stability check: the checker compares
    /// contacts against the invalid (palm) contacts of the same frame, so
    /// it needs the validity flags to exist.
    ///
    /// On a detection error the frame produces no contacts, but the
    /// temporal state of the previous frames is preserved.
    pub fn find(
        &mut self,
        heatmap: &Image<f64>,
        contacts: &mut Vec<Contact>,
    ) -> Result<(), DetectError> {
        self.detector.detect(heatmap, contacts)?;

        self.tracker.track(contacts);
        self.stabilizer.stabilize(contacts);
        self.validator.validate(contacts);
        self.checker.check(contacts);

        Ok(())
    }
}
