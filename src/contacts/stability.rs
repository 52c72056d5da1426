//! Stability checking and output stabilization.
//!
//! The [`Stabilizer`] smooths per-contact jitter against the previous
//! frame: position, size and orientation changes below the lower threshold
//! snap to the old value (dead-band), changes above the upper threshold
//! mark the contact unstable because they cannot be smoothed away.
//!
//! The [`Checker`] then looks across a sliding window of frames: a contact
//! that has not been present for the whole window, or that sits next to an
//! invalid contact, is marked unstable as well. The sink is expected to
//! defer the values of unstable contacts until they settle.

use super::Contact;

use std::collections::VecDeque;
use std::f64::consts::PI;

/// Below this aspect ratio the orientation of a contact is numerically
/// meaningless and gets pinned to zero.
const ASPECT_ORIENTATION_MIN: f64 = 1.1;

#[derive(Debug, Clone, Copy)]
pub struct StabilityConfig {
    /// Over how many frames a contact must exist before it is stable.
    /// Clamped to at least 2 (the current and one previous frame).
    pub temporal_window: usize,

    /// Whether contacts missing from the temporal window are unstable.
    pub check_temporal_stability: bool,

    /// Contacts closer than this to an invalid contact are unstable.
    pub distance_threshold: Option<f64>,

    /// (dead-band, unstable) bounds for position changes per frame.
    pub position_threshold: Option<(f64, f64)>,

    /// (dead-band, unstable) bounds for size changes per frame.
    pub size_threshold: Option<(f64, f64)>,

    /// (dead-band, unstable) bounds for orientation changes per frame.
    pub orientation_threshold: Option<(f64, f64)>,
}

impl Default for StabilityConfig {
    fn default() -> Self {
        Self {
            temporal_window: 3,
            check_temporal_stability: true,
            distance_threshold: None,
            position_threshold: None,
            size_threshold: None,
            orientation_threshold: None,
        }
    }
}

/// Smooths contact values against the previous frame.
pub struct Stabilizer {
    config: StabilityConfig,

    // The (already stabilized) contacts of the last frame.
    last: Vec<Contact>,
}

impl Stabilizer {
    pub fn new(config: StabilityConfig) -> Self {
        Self {
            config,
            last: Vec::new(),
        }
    }

    pub fn reset(&mut self) {
        self.last.clear();
    }

    /// Stabilizes all contacts of a frame in place.
    pub fn stabilize(&mut self, frame: &mut [Contact]) {
        for i in 0..frame.len() {
            self.stabilize_contact(&mut frame[i]);
        }

        self.last.clear();
        self.last.extend_from_slice(frame);
    }

    fn stabilize_contact(&self, contact: &mut Contact) {
        // Contacts that can't be tracked can't be stabilized.
        let Some(index) = contact.index else {
            return;
        };

        contact.stable = Some(true);

        let Some(last) = Contact::find_in_frame(index, &self.last) else {
            return;
        };
        let last = *last;

        self.stabilize_size(contact, &last);
        self.stabilize_position(contact, &last);
        self.stabilize_orientation(contact, &last);
    }

    fn stabilize_size(&self, current: &mut Contact, last: &Contact) {
        let Some((min, max)) = self.config.size_threshold else {
            return;
        };

        let dx = (current.size.x - last.size.x).abs();
        let dy = (current.size.y - last.size.y).abs();

        /*
         * If the size changes too slowly, discard the change.
         * If it changes too fast, mark the contact unstable.
         * Otherwise pass the change through.
         */

        if dx < min {
            current.size.x = last.size.x;
        } else if dx > max {
            current.stable = Some(false);
        }

        if dy < min {
            current.size.y = last.size.y;
        } else if dy > max {
            current.stable = Some(false);
        }
    }

    fn stabilize_position(&self, current: &mut Contact, last: &Contact) {
        let Some((min, max)) = self.config.position_threshold else {
            return;
        };

        let distance = (current.mean - last.mean).hypot();

        if distance < min {
            current.mean = last.mean;
        } else if distance > max {
            current.stable = Some(false);
        }
    }

    fn stabilize_orientation(&self, current: &mut Contact, last: &Contact) {
        let Some((min, max)) = self.config.orientation_threshold else {
            return;
        };

        let aspect = current.major() / current.minor();

        // A round contact has no meaningful orientation.
        if aspect < ASPECT_ORIENTATION_MIN {
            current.orientation = 0.0;
            return;
        }

        let period = if current.normalized { 1.0 } else { PI };

        // The angle difference in both directions around the half-turn
        // period; the shorter arc handles the jump from 179 to 1 degrees.
        let d1 = (current.orientation - last.orientation).abs();
        let d2 = period - d1;
        let delta = d1.min(d2);

        if delta < min {
            current.orientation = last.orientation;
        } else if delta > max {
            current.stable = Some(false);
        }
    }
}

/// Flags contacts whose recent history makes their values untrustworthy.
pub struct Checker {
    config: StabilityConfig,

    // The last `temporal_window - 1` frames.
    frames: VecDeque<Vec<Contact>>,
}

impl Checker {
    pub fn new(config: StabilityConfig) -> Self {
        let depth = config.temporal_window.max(2) - 1;

        Self {
            config,
            frames: std::iter::repeat_with(Vec::new).take(depth).collect(),
        }
    }

    pub fn reset(&mut self) {
        for frame in &mut self.frames {
            frame.clear();
        }
    }

    /// Checks all contacts of a frame. An existing unstable flag is never
    /// upgraded back to stable.
    pub fn check(&mut self, frame: &mut [Contact]) {
        let mut results = Vec::with_capacity(frame.len());

        for contact in frame.iter() {
            results.push(contact.stable.unwrap_or(true) && self.check_contact(contact, frame));
        }

        for (contact, stable) in frame.iter_mut().zip(results) {
            contact.stable = Some(stable);
        }

        // Rotate the window, reusing the evicted allocation.
        let mut oldest = self.frames.pop_front().unwrap_or_default();
        oldest.clear();
        oldest.extend_from_slice(frame);
        self.frames.push_back(oldest);
    }

    fn check_contact(&self, contact: &Contact, frame: &[Contact]) -> bool {
        if !self.check_distance(contact, frame) {
            return false;
        }

        // Contacts that can't be tracked have no history to check.
        let Some(index) = contact.index else {
            return true;
        };

        if !self.config.check_temporal_stability {
            return true;
        }

        // The contact must have existed for the whole window.
        self.frames
            .iter()
            .all(|f| Contact::find_in_frame(index, f).is_some())
    }

    /// Whether the contact keeps its distance from all invalid contacts of
    /// the same frame. Palm edges flicker, and a finger contact right next
    /// to a palm is likely part of it.
    fn check_distance(&self, contact: &Contact, frame: &[Contact]) -> bool {
        let Some(threshold) = self.config.distance_threshold else {
            return true;
        };

        frame.iter().all(|other| {
            if other.index == contact.index {
                return true;
            }

            if other.valid.unwrap_or(true) {
                return true;
            }

            /*
             * Assume both contacts are circles with radius major / 2.
             * That covers more area than the actual ellipses, which errs
             * on the side of marking contacts unstable.
             */

            let distance = (contact.mean - other.mean).hypot();
            let gap = distance - contact.major() / 2.0 - other.major() / 2.0;

            gap >= threshold
        })
    }
}
