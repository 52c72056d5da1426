//! Stylus processing.
//!
//! Samples arrive either fully decoded from MPP reports or assembled by
//! the DFT decoder. This layer keeps per-pen state (keyed by the serial
//! the controller reports), feeds the tip position into the rejection
//! cone, and drives the stylus side of the sink.

use crate::cone::Cone;
use crate::config::Config;
use crate::parser::Stylus;
use crate::sink::{InputSink, SinkError};

use std::collections::HashMap;
use std::time::Instant;

pub struct StylusProcessor {
    disable: bool,

    // Physical display dimensions, for the cone coordinate space.
    width: f64,
    height: f64,

    // The most recent sample; DFT samples inherit its serial and
    // timestamp since their payloads carry neither.
    current: Stylus,

    // The styli currently in proximity, by serial.
    active: HashMap<u32, Stylus>,
}

impl StylusProcessor {
    pub fn new(config: &Config) -> Self {
        Self {
            disable: config.stylus.disable,
            width: config.width,
            height: config.height,
            current: Stylus::default(),
            active: HashMap::new(),
        }
    }

    /// Whether any stylus is in proximity.
    pub fn active(&self) -> bool {
        !self.active.is_empty()
    }

    /// Processes one stylus sample.
    pub fn input<S: InputSink>(
        &mut self,
        sample: &Stylus,
        cone: &mut Cone,
        sink: &mut S,
        now: Instant,
    ) -> Result<(), SinkError> {
        let mut sample = *sample;

        // Samples from the DFT decoder carry neither serial nor
        // timestamp; inherit them from the previous sample.
        if sample.serial == 0 {
            sample.serial = self.current.serial;
        }

        if sample.timestamp == 0 {
            sample.timestamp = self.current.timestamp;
        }

        self.current = sample;

        if self.disable {
            return Ok(());
        }

        if sample.proximity {
            // The hand holding the pen is near the tip; aim the palm
            // rejection cone there.
            cone.update_position(sample.x * self.width, sample.y * self.height, now);

            self.active.insert(sample.serial, sample);
            sink.emit_stylus(&sample)?;
        } else {
            // Only lift once per pen; the decoder repeats dropout
            // samples while the pen stays out of range.
            if self.active.remove(&sample.serial).is_none() {
                return Ok(());
            }

            sink.emit_stylus_lift()?;
        }

        sink.sync()?;
        Ok(())
    }
}
