//! Wiring between the parser and the processing pipeline.
//!
//! One [`Daemon`] owns all per-device state. Parsed samples flow
//! synchronously into the processors, which share the rejection cone (the
//! stylus path writes the tip position, the touch path reads it and feeds
//! palm directions back). Per-frame errors are logged and the pipeline
//! moves on to the next frame; nothing here terminates the process.

use crate::cone::Cone;
use crate::config::Config;
use crate::dft::DftStylus;
use crate::parser::{Button, DftWindow, Metadata, Parser, ParserEvents, Stylus, Touch};
use crate::protocol::ParseError;
use crate::sink::InputSink;
use crate::stylus::StylusProcessor;
use crate::touch::TouchProcessor;

use std::time::Instant;

pub struct Daemon<S: InputSink> {
    parser: Parser,
    events: Processors<S>,
}

impl<S: InputSink> Daemon<S> {
    pub fn new(config: &Config, sink: S) -> Self {
        Self {
            parser: Parser::new(),
            events: Processors {
                cone: Cone::new(config.cone.angle, config.cone.distance),
                touch: TouchProcessor::new(config),
                stylus: StylusProcessor::new(config),
                dft: DftStylus::new(config.dft_config()),
                sink,
            },
        }
    }

    /// Processes one HID report worth of touch data.
    pub fn process(&mut self, data: &[u8]) -> Result<(), ParseError> {
        self.parser.parse(data, &mut self.events)
    }

    /// Processes a buffer with a non-standard header, for replay data.
    pub fn process_with_header(&mut self, data: &[u8], header: usize) -> Result<(), ParseError> {
        self.parser.parse_with_header(data, header, &mut self.events)
    }

    /// The sink this daemon drives.
    pub fn sink(&self) -> &S {
        &self.events.sink
    }

    /// The contacts of the last processed heatmap frame.
    pub fn contacts(&self) -> &[crate::contacts::Contact] {
        self.events.touch.contacts()
    }
}

struct Processors<S: InputSink> {
    cone: Cone,
    touch: TouchProcessor,
    stylus: StylusProcessor,
    dft: DftStylus,
    sink: S,
}

impl<S: InputSink> ParserEvents for Processors<S> {
    fn on_stylus(&mut self, stylus: &Stylus) {
        let result = self
            .stylus
            .input(stylus, &mut self.cone, &mut self.sink, Instant::now());

        if let Err(e) = result {
            log::warn!("Failed to emit stylus sample: {e}");
        }
    }

    fn on_touch(&mut self, touch: &Touch<'_>) {
        let stylus_active = self.stylus.active();

        let result = self.touch.input(
            touch,
            &mut self.cone,
            stylus_active,
            &mut self.sink,
            Instant::now(),
        );

        if let Err(e) = result {
            log::warn!("Failed to process heatmap frame: {e}");
        }
    }

    fn on_dft(&mut self, dft: &DftWindow) {
        // Button and pressure windows only update decoder state; position
        // windows conclude a sample that goes down the stylus path.
        let Some(sample) = self.dft.input(dft) else {
            return;
        };

        self.on_stylus(&sample);
    }

    fn on_button(&mut self, button: &Button) {
        let result = self
            .sink
            .emit_button(button.active, button.pressure)
            .and_then(|()| self.sink.sync());

        if let Err(e) = result {
            log::warn!("Failed to emit button sample: {e}");
        }
    }

    fn on_metadata(&mut self, _metadata: &Metadata) {
        // Metadata only arrives through the feature report path, which is
        // handled before the daemon starts.
    }
}
