//! Touch processing.
//!
//! Heatmap samples come in raw and inverted (high byte value = no touch).
//! This layer normalizes them, runs the contact finder, applies the
//! stylus rejection cone, keeps track of which tracking indices need lift
//! events, and drives the touchscreen side of the sink.

use crate::cone::Cone;
use crate::config::Config;
use crate::contacts::finder::Finder;
use crate::contacts::{Contact, DetectError, Image};
use crate::parser::Touch;
use crate::sink::{InputSink, SinkError};

use thiserror::Error;

use std::collections::BTreeSet;
use std::time::Instant;

#[derive(Debug, Error)]
pub enum TouchError {
    #[error(transparent)]
    Detect(#[from] DetectError),

    #[error(transparent)]
    Sink(#[from] SinkError),
}

pub struct TouchProcessor {
    invert_x: bool,
    invert_y: bool,

    disable: bool,
    disable_on_palm: bool,
    disable_on_stylus: bool,

    /// Contacts closer than this to the stylus tip are rejected, in
    /// centimeters. 0 disables the check.
    tip_distance: f64,

    // Physical display dimensions; without them the cone has no
    // coordinate space and is skipped.
    physical: Option<(f64, f64)>,

    finder: Finder,

    // The normalized heatmap.
    heatmap: Image<f64>,

    // The contacts of the current frame.
    contacts: Vec<Contact>,

    // The indices emitted as active in the previous frame.
    emitted: BTreeSet<usize>,

    // Scratch for the indices emitted in the current frame.
    current: BTreeSet<usize>,
}

impl TouchProcessor {
    pub fn new(config: &Config) -> Self {
        Self {
            invert_x: config.invert_x,
            invert_y: config.invert_y,
            disable: config.touchscreen.disable,
            disable_on_palm: config.touchscreen.disable_on_palm,
            disable_on_stylus: config.touchscreen.disable_on_stylus,
            tip_distance: config.stylus.tip_distance,
            physical: config.physical_diagonal().map(|_| (config.width, config.height)),
            finder: Finder::new(config.contacts_config()),
            heatmap: Image::default(),
            contacts: Vec::new(),
            emitted: BTreeSet::new(),
            current: BTreeSet::new(),
        }
    }

    /// The contacts of the last processed frame.
    pub fn contacts(&self) -> &[Contact] {
        &self.contacts
    }

    /// Processes one heatmap sample.
    ///
    /// The cone is read to reject palms near the stylus and written with
    /// the positions of detected palms, so the next stylus frame starts
    /// from an updated direction.
    pub fn input<S: InputSink>(
        &mut self,
        touch: &Touch<'_>,
        cone: &mut Cone,
        stylus_active: bool,
        sink: &mut S,
        now: Instant,
    ) -> Result<(), TouchError> {
        let rows = usize::from(touch.rows);
        let cols = usize::from(touch.columns);

        if rows == 0 || cols == 0 || touch.heatmap.len() != rows * cols {
            return Ok(());
        }

        let range = f64::from(touch.max) - f64::from(touch.min);
        if range <= 0.0 {
            return Ok(());
        }

        self.heatmap.resize(rows, cols);

        // The device sends inverted values: a touch lowers the reading.
        for (out, &raw) in self
            .heatmap
            .data_mut()
            .iter_mut()
            .zip(touch.heatmap.iter())
        {
            let norm = (f64::from(raw) - f64::from(touch.min)) / range;
            *out = (1.0 - norm).clamp(0.0, 1.0);
        }

        // A failed frame produces no events; tracking state carries over.
        self.finder.find(&self.heatmap, &mut self.contacts)?;

        self.apply_cone(cone, now);

        let palm_present = self
            .contacts
            .iter()
            .any(|c| !c.valid.unwrap_or(true));

        let lift_all = self.disable
            || (self.disable_on_palm && palm_present)
            || (self.disable_on_stylus && stylus_active);

        self.current.clear();

        if !lift_all {
            for contact in &self.contacts {
                let Some(index) = contact.index else {
                    continue;
                };

                // The sink exposes a fixed number of slots.
                if index >= crate::protocol::MAX_CONTACTS {
                    continue;
                }

                if !contact.valid.unwrap_or(true) {
                    continue;
                }

                let (x, y, orientation) = self.emitted_coordinates(contact);

                sink.emit_contact(
                    index,
                    x,
                    y,
                    contact.major(),
                    contact.minor(),
                    orientation,
                    contact.stable.unwrap_or(true),
                )?;

                self.current.insert(index);
            }
        }

        // Exactly one lift for everything that was active and is gone.
        for &index in self.emitted.difference(&self.current) {
            sink.emit_contact_lift(index)?;
        }

        sink.sync()?;

        std::mem::swap(&mut self.emitted, &mut self.current);
        Ok(())
    }

    /// The output coordinates of a contact, with axis inversion applied.
    fn emitted_coordinates(&self, contact: &Contact) -> (f64, f64, f64) {
        let mut x = contact.mean.x;
        let mut y = contact.mean.y;
        let mut orientation = contact.orientation;

        if self.invert_x {
            x = 1.0 - x;
        }

        if self.invert_y {
            y = 1.0 - y;
        }

        // Mirroring a single axis flips the winding of the angle.
        if self.invert_x != self.invert_y {
            orientation = 1.0 - orientation;
            if orientation >= 1.0 {
                orientation = 0.0;
            }
        }

        (x, y, orientation)
    }

    /// Feeds palm positions into the cone and rejects contacts covered
    /// by it.
    fn apply_cone(&mut self, cone: &mut Cone, now: Instant) {
        let Some((width, height)) = self.physical else {
            return;
        };

        if !cone.alive() || !cone.active(now) {
            return;
        }

        // Palms found by validation turn the cone towards them.
        for contact in &self.contacts {
            if contact.valid.unwrap_or(true) {
                continue;
            }

            let (x, y, _) = self.emitted_coordinates(contact);
            cone.update_direction(x * width, y * height, now);
        }

        let (tip_x, tip_y) = cone.position();

        // Everything the cone covers is part of the hand holding the pen,
        // and nothing belongs right under the pen tip itself.
        for i in 0..self.contacts.len() {
            if !self.contacts[i].valid.unwrap_or(true) {
                continue;
            }

            let (x, y, _) = self.emitted_coordinates(&self.contacts[i]);

            let px = x * width;
            let py = y * height;

            let near_tip =
                self.tip_distance > 0.0 && (px - tip_x).hypot(py - tip_y) <= self.tip_distance;

            if near_tip || cone.check(px, py, now) {
                self.contacts[i].valid = Some(false);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contacts::neutral::NeutralMode;
    use crate::sink::record::RecordSink;

    /// A 16x16 raw heatmap with an inverted blob at the given center.
    fn blob_frame_sized(cx: f64, cy: f64, sigma: f64) -> Vec<u8> {
        let mut data = vec![255u8; 256];

        for y in 0..16 {
            for x in 0..16 {
                let dx = x as f64 - cx;
                let dy = y as f64 - cy;
                let v = (-0.5 * (dx * dx + dy * dy) / (sigma * sigma)).exp();
                data[y * 16 + x] = 255 - (v * 255.0) as u8;
            }
        }

        data
    }

    fn blob_frame(cx: f64, cy: f64) -> Vec<u8> {
        blob_frame_sized(cx, cy, 1.5)
    }

    fn touch_sample(heatmap: &[u8]) -> Touch<'_> {
        Touch {
            rows: 16,
            columns: 16,
            min: 0,
            max: 255,
            heatmap,
        }
    }

    fn test_config() -> Config {
        let mut config = Config {
            width: 26.0,
            height: 17.3,
            ..Config::default()
        };

        config.contacts.neutral = NeutralMode::Constant;
        config.contacts.neutral_value = 0.0;
        config.contacts.activation_threshold = 0.5 * 255.0;
        config.contacts.deactivation_threshold = 0.2 * 255.0;
        config.contacts.size_min = 0.1;
        config.contacts.size_max = 8.0;
        config.contacts.temporal_window = 2;
        config.touchscreen.disable_on_stylus = true;

        config
    }

    fn process(
        touch: &mut TouchProcessor,
        heatmap: &[u8],
        cone: &mut Cone,
        stylus_active: bool,
        sink: &mut RecordSink,
    ) {
        touch
            .input(
                &touch_sample(heatmap),
                cone,
                stylus_active,
                sink,
                Instant::now(),
            )
            .unwrap();
    }

    #[test]
    fn contact_is_emitted_and_lifted_once() {
        let mut touch = TouchProcessor::new(&test_config());
        let mut cone = Cone::new(30.0, 5.0);
        let mut sink = RecordSink::default();

        let blob = blob_frame(8.0, 8.0);
        let empty = vec![255u8; 256];

        process(&mut touch, &blob, &mut cone, false, &mut sink);
        assert_eq!(sink.contacts.len(), 1);
        assert_eq!(sink.contacts[0].index, 0);
        assert!(!sink.contacts[0].stable);
        assert_eq!(sink.syncs, 1);

        process(&mut touch, &blob, &mut cone, false, &mut sink);
        assert_eq!(sink.contacts.len(), 2);
        assert!(sink.contacts[1].stable);
        assert!(sink.lifts.is_empty());

        process(&mut touch, &empty, &mut cone, false, &mut sink);
        assert_eq!(sink.lifts, vec![0]);

        // A second empty frame does not lift again.
        process(&mut touch, &empty, &mut cone, false, &mut sink);
        assert_eq!(sink.lifts, vec![0]);
        assert_eq!(sink.syncs, 4);
    }

    #[test]
    fn contact_position_is_normalized() {
        let mut touch = TouchProcessor::new(&test_config());
        let mut cone = Cone::new(30.0, 5.0);
        let mut sink = RecordSink::default();

        process(&mut touch, &blob_frame(8.0, 8.0), &mut cone, false, &mut sink);

        let c = sink.contacts[0];
        assert!((c.x - 8.0 / 15.0).abs() < 0.03, "x = {}", c.x);
        assert!((c.y - 8.0 / 15.0).abs() < 0.03, "y = {}", c.y);
    }

    #[test]
    fn inversion_mirrors_coordinates() {
        let mut config = test_config();
        config.invert_x = true;

        let mut touch = TouchProcessor::new(&config);
        let mut cone = Cone::new(30.0, 5.0);
        let mut sink = RecordSink::default();

        process(&mut touch, &blob_frame(4.0, 8.0), &mut cone, false, &mut sink);

        let c = sink.contacts[0];
        assert!((c.x - (1.0 - 4.0 / 15.0)).abs() < 0.03, "x = {}", c.x);
    }

    #[test]
    fn active_cone_rejects_contact_in_front() {
        let mut touch = TouchProcessor::new(&test_config());
        let mut sink = RecordSink::default();
        let now = Instant::now();

        // Stylus tip at the left edge of the blob, pointing at it.
        let mut cone = Cone::new(30.0, 5.0);
        let blob = blob_frame(8.0, 8.0);

        // Physical position of the blob center.
        let px = 8.0 / 15.0 * 26.0;
        let py = 8.0 / 15.0 * 17.3;

        cone.update_position(px - 2.0, py, now);
        cone.update_direction(px, py, now);

        process(&mut touch, &blob, &mut cone, false, &mut sink);

        assert!(sink.contacts.is_empty());
        assert!(!touch.contacts()[0].valid.unwrap());
    }

    #[test]
    fn decayed_cone_rejects_nothing() {
        let mut touch = TouchProcessor::new(&test_config());
        let mut sink = RecordSink::default();
        let now = Instant::now() - std::time::Duration::from_secs(10);

        let mut cone = Cone::new(30.0, 5.0);
        cone.update_position(10.0, 10.0, now);
        cone.update_direction(15.0, 10.0, now);

        process(&mut touch, &blob_frame(8.0, 8.0), &mut cone, false, &mut sink);

        assert_eq!(sink.contacts.len(), 1);
    }

    #[test]
    fn stylus_proximity_lifts_all_contacts() {
        let mut touch = TouchProcessor::new(&test_config());
        let mut cone = Cone::new(30.0, 5.0);
        let mut sink = RecordSink::default();

        let blob = blob_frame(8.0, 8.0);

        process(&mut touch, &blob, &mut cone, false, &mut sink);
        assert_eq!(sink.contacts.len(), 1);

        process(&mut touch, &blob, &mut cone, true, &mut sink);
        assert_eq!(sink.contacts.len(), 1, "no emission while stylus active");
        assert_eq!(sink.lifts, vec![0]);
    }

    #[test]
    fn contact_under_the_pen_tip_is_rejected() {
        let mut config = test_config();
        config.stylus.tip_distance = 3.0;

        let mut touch = TouchProcessor::new(&config);
        let mut sink = RecordSink::default();
        let now = Instant::now();

        // Stylus hovering right above the blob; the cone faces away.
        let mut cone = Cone::new(30.0, 5.0);
        let px = 8.0 / 15.0 * 26.0;
        let py = 8.0 / 15.0 * 17.3;
        cone.update_position(px + 1.0, py, now);
        cone.update_direction(px + 5.0, py, now);

        process(&mut touch, &blob_frame(8.0, 8.0), &mut cone, false, &mut sink);

        assert!(sink.contacts.is_empty());
        assert!(!touch.contacts()[0].valid.unwrap());
    }

    #[test]
    fn palm_disables_the_whole_touchscreen() {
        let mut config = test_config();
        config.touchscreen.disable_on_palm = true;
        config.contacts.size_max = 6.0;

        let mut touch = TouchProcessor::new(&config);
        let mut cone = Cone::new(30.0, 5.0);
        let mut sink = RecordSink::default();

        // A fingertip alone is emitted.
        process(&mut touch, &blob_frame(4.0, 4.0), &mut cone, false, &mut sink);
        assert_eq!(sink.contacts.len(), 1);

        // A palm-sized blob appears: everything is lifted, including the
        // still-present fingertip.
        let mut frame = blob_frame(4.0, 4.0);
        let palm = blob_frame_sized(11.0, 11.0, 3.0);
        for (a, &b) in frame.iter_mut().zip(palm.iter()) {
            *a = (*a).min(b);
        }

        process(&mut touch, &frame, &mut cone, false, &mut sink);
        assert_eq!(sink.contacts.len(), 1, "no further emissions");
        assert_eq!(sink.lifts, vec![0]);
    }

    #[test]
    fn disabled_touchscreen_emits_nothing() {
        let mut config = test_config();
        config.touchscreen.disable = true;

        let mut touch = TouchProcessor::new(&config);
        let mut cone = Cone::new(30.0, 5.0);
        let mut sink = RecordSink::default();

        process(&mut touch, &blob_frame(8.0, 8.0), &mut cone, false, &mut sink);

        assert!(sink.contacts.is_empty());
        assert_eq!(sink.syncs, 1);

        // Tracking still ran underneath.
        assert_eq!(touch.contacts().len(), 1);
        assert_eq!(touch.contacts()[0].index, Some(0));
    }

    #[test]
    fn undersized_frame_is_ignored() {
        let mut touch = TouchProcessor::new(&test_config());
        let mut cone = Cone::new(30.0, 5.0);
        let mut sink = RecordSink::default();

        let short = vec![255u8; 10];
        touch
            .input(
                &touch_sample(&short),
                &mut cone,
                false,
                &mut sink,
                Instant::now(),
            )
            .unwrap();

        assert_eq!(sink.syncs, 0);
    }
}
