//! Frame parser: raw report bytes → typed samples.
//!
//! The parser walks the nested container format with recursive descent and
//! hands finished samples to a [`ParserEvents`] sink. It keeps no domain
//! knowledge: heatmaps, stylus samples and DFT windows cross its boundary
//! as plain data, and everything it does not understand is skipped by the
//! declared size instead of failing the stream.
//!
//! A truncated report frame only discards that report; the remaining
//! frames of the buffer are still processed.

use crate::protocol::{
    ButtonSampleRaw, DftMetadata, DftRow, DftType, DftWindowHeader, HeatmapDimensions,
    HeatmapFrame, HidFrame, HidFrameType, LegacyGroupType, LegacyHeader, LegacyGroup,
    MetadataDimensions, MetadataTransform, ParseError, ReportFrame, ReportHeader, ReportType,
    StylusReport, StylusSampleMpp1_0, StylusSampleMpp1_51, MAX_PRESSURE_BUTTON,
    MAX_PRESSURE_MPP_1_0, MAX_PRESSURE_MPP_1_51, MAX_X, MAX_Y,
};
use crate::reader::Reader;

use std::f64::consts::PI;

/// A single sample of the stylus state, in normalized units.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Stylus {
    /// Whether the stylus is near the screen.
    pub proximity: bool,

    /// Whether the stylus is touching the screen.
    pub contact: bool,

    /// Whether the side button is being pressed.
    pub button: bool,

    /// Whether the stylus is in eraser mode.
    pub rubber: bool,

    /// The time at which this sample was generated. Wraps at 2^16.
    pub timestamp: u16,

    /// The X coordinate of the tip. Range: 0 to 1.
    pub x: f64,

    /// The Y coordinate of the tip. Range: 0 to 1.
    pub y: f64,

    /// How hard the stylus is pressed onto the display. Range: 0 to 1.
    pub pressure: f64,

    /// The angle between stylus and display, in radians. 0 if unsupported.
    pub altitude: f64,

    /// The direction the stylus is pointing in, in radians. 0 if unsupported.
    pub azimuth: f64,

    /// The serial number of the pen that produced this sample.
    pub serial: u32,
}

/// A capacitive heatmap, borrowed from the report buffer.
#[derive(Debug, Clone, Copy)]
pub struct Touch<'a> {
    pub rows: u8,
    pub columns: u8,

    /// The lowest value a heatmap cell can assume.
    pub min: u8,

    /// The highest value a heatmap cell can assume.
    pub max: u8,

    /// The heatmap in row-major order, `rows * columns` bytes.
    pub heatmap: &'a [u8],
}

/// A window of DFT antenna measurements, used to localize an active pen.
#[derive(Debug, Clone, Default)]
pub struct DftWindow {
    /// The group counter from the preceding metadata report, if it matched.
    pub group: Option<u32>,

    pub ty: DftType,

    /// The number of antenna columns on the screen.
    pub width: u8,

    /// The number of antenna rows on the screen.
    pub height: u8,

    pub x: Vec<DftRow>,
    pub y: Vec<DftRow>,
}

/// The state of the touchpad button.
#[derive(Debug, Clone, Copy, Default)]
pub struct Button {
    pub active: bool,

    /// How hard the user is pressing. Range: 0 to 1.
    pub pressure: f64,
}

/// Device metadata, from the metadata feature report.
#[derive(Debug, Clone, Copy, Default)]
pub struct Metadata {
    pub rows: u8,
    pub columns: u8,

    /// The width of the screen in centimeters.
    pub width: f64,

    /// The height of the screen in centimeters.
    pub height: f64,

    pub invert_x: bool,
    pub invert_y: bool,
}

/// The sink for parsed samples.
///
/// Every method has an empty default so consumers only implement what they
/// care about (the replay tool only wants stylus and touch, the daemon
/// wants everything).
pub trait ParserEvents {
    fn on_stylus(&mut self, _stylus: &Stylus) {}
    fn on_touch(&mut self, _touch: &Touch<'_>) {}
    fn on_dft(&mut self, _dft: &DftWindow) {}
    fn on_button(&mut self, _button: &Button) {}
    fn on_metadata(&mut self, _metadata: &Metadata) {}
}

/// Converts hundredths of a degree to radians.
fn centideg_to_rad(value: u16) -> f64 {
    f64::from(value) / 18000.0 * PI
}

#[derive(Default)]
pub struct Parser {
    // Heatmap dimensions apply to the heatmap from the *previous*
    // dimensions report, so they are cached across report frames.
    dim: HeatmapDimensions,

    // DFT metadata, cached for the next window report.
    dft_meta: Option<DftMetadata>,

    // The firmware quirk below is logged only once per process lifetime.
    quirk_logged: bool,
}

impl Parser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses one buffer of IPTS touch data.
    ///
    /// The data must begin with the regular three byte report header
    /// (report ID and timestamp), followed by a single HID frame.
    pub fn parse<E: ParserEvents>(&mut self, data: &[u8], events: &mut E) -> Result<(), ParseError> {
        self.parse_with_header(data, ReportHeader::SIZE, events)
    }

    /// Parses a buffer with an arbitrary header size.
    ///
    /// Replay tooling and feature reports prefix their data differently;
    /// they select the header size themselves.
    pub fn parse_with_header<E: ParserEvents>(
        &mut self,
        data: &[u8],
        header: usize,
        events: &mut E,
    ) -> Result<(), ParseError> {
        let mut reader = Reader::new(data);
        reader.skip(header)?;

        // A report with an empty payload carries no frame at all.
        if reader.size() == 0 {
            return Ok(());
        }

        self.parse_hid_frame(&mut reader, events)
    }

    fn parse_hid_frame<E: ParserEvents>(
        &mut self,
        reader: &mut Reader<'_>,
        events: &mut E,
    ) -> Result<(), ParseError> {
        let frame = HidFrame::decode(reader)?;

        let payload = (frame.size as usize)
            .checked_sub(HidFrame::SIZE)
            .ok_or(ParseError::EndOfData)?;

        let mut sub = reader.sub(payload)?;

        match frame.ty {
            HidFrameType::Hid => self.parse_hid_frames(&mut sub, events)?,
            HidFrameType::Heatmap => self.parse_heatmap_frame(&mut sub, events)?,
            HidFrameType::Metadata => self.parse_metadata_frame(&mut sub, events)?,
            HidFrameType::Legacy => self.parse_legacy_frame(&mut sub, events)?,
            HidFrameType::Reports => {
                /*
                 * Some firmware versions periodically emit a Reports frame
                 * whose size field is short by four bytes, leaving exactly
                 * four bytes of payload dangling in the parent frame:
                 *
                 *   0b 00 00 00 00 ff 00  74 00 04 00  00 00 00 00
                 *
                 * The frame carries no usable data, so it is ignored.
                 */
                if reader.size() == 4 {
                    if !self.quirk_logged {
                        log::debug!("Ignoring malformed 4-byte Reports frame");
                        self.quirk_logged = true;
                    }

                    // Swallow the dangling bytes so an enclosing frame
                    // list does not stumble over them.
                    reader.skip(4)?;
                    return Ok(());
                }

                self.parse_report_frames(&mut sub, events);
            }
            HidFrameType::Unknown(ty) => {
                log::debug!("Skipping unknown HID frame type 0x{ty:02X} ({payload} bytes)");
            }
        }

        Ok(())
    }

    fn parse_hid_frames<E: ParserEvents>(
        &mut self,
        reader: &mut Reader<'_>,
        events: &mut E,
    ) -> Result<(), ParseError> {
        while reader.size() > 0 {
            self.parse_hid_frame(reader, events)?;
        }

        Ok(())
    }

    /// Parses a legacy frame from older, GuC-based devices.
    ///
    /// Legacy frames wrap a list of report groups. Stylus and touch groups
    /// carry ordinary report frames; all other group types are skipped.
    fn parse_legacy_frame<E: ParserEvents>(
        &mut self,
        reader: &mut Reader<'_>,
        events: &mut E,
    ) -> Result<(), ParseError> {
        let header = LegacyHeader::decode(reader)?;

        for _ in 0..header.groups {
            let group = LegacyGroup::decode(reader)?;
            let mut sub = reader.sub(group.size as usize)?;

            match group.ty {
                LegacyGroupType::Stylus | LegacyGroupType::Touch => {
                    self.parse_report_frames(&mut sub, events);
                }
                LegacyGroupType::Unknown(ty) => {
                    log::debug!("Skipping unknown legacy group type 0x{ty:04X}");
                }
            }
        }

        Ok(())
    }

    /// Parses a metadata frame, as returned by the metadata feature report.
    fn parse_metadata_frame<E: ParserEvents>(
        &mut self,
        reader: &mut Reader<'_>,
        events: &mut E,
    ) -> Result<(), ParseError> {
        let dim = MetadataDimensions::decode(reader)?;
        let transform = MetadataTransform::decode(reader)?;

        // One unknown byte and 16 unknown floats (possibly a tilt
        // transform) follow; nothing downstream has a use for them.
        reader.skip(1)?;
        for _ in 0..16 {
            reader.read_f32()?;
        }

        let metadata = Metadata {
            rows: dim.rows.min(u8::MAX as u32) as u8,
            columns: dim.columns.min(u8::MAX as u32) as u8,

            // Fixed point (mm * 100) to floating point centimeters.
            width: f64::from(dim.width) / 1000.0,
            height: f64::from(dim.height) / 1000.0,

            invert_x: transform.xx < 0.0,
            invert_y: transform.yy < 0.0,
        };

        events.on_metadata(&metadata);
        Ok(())
    }

    /// Parses a heatmap frame. On HID-native devices the heatmap is passed
    /// inside of a HID frame instead of a report frame.
    fn parse_heatmap_frame<E: ParserEvents>(
        &mut self,
        reader: &mut Reader<'_>,
        events: &mut E,
    ) -> Result<(), ParseError> {
        let header = HeatmapFrame::decode(reader)?;
        let mut sub = reader.sub(header.size as usize)?;

        self.parse_heatmap_data(&mut sub, events)
    }

    fn parse_report_frames<E: ParserEvents>(&mut self, reader: &mut Reader<'_>, events: &mut E) {
        while reader.size() > 0 {
            let Ok(frame) = ReportFrame::decode(reader) else {
                log::debug!("Discarding truncated report frame header");
                return;
            };

            let Ok(mut sub) = reader.sub(frame.size as usize) else {
                // The declared size reaches past the enclosing frame, so
                // the boundary of the next report is unknown too.
                log::debug!("Discarding report frame with invalid size {}", frame.size);
                return;
            };

            if let Err(ParseError::EndOfData) = self.parse_report_frame(frame.ty, &mut sub, events)
            {
                log::debug!("Discarding truncated report frame {:?}", frame.ty);
            }
        }
    }

    fn parse_report_frame<E: ParserEvents>(
        &mut self,
        ty: ReportType,
        reader: &mut Reader<'_>,
        events: &mut E,
    ) -> Result<(), ParseError> {
        match ty {
            ReportType::HeatmapDimensions => self.parse_heatmap_dimensions(reader)?,
            ReportType::HeatmapData => self.parse_heatmap_data(reader, events)?,
            ReportType::StylusMpp1_0 => self.parse_stylus_mpp_1_0(reader, events)?,
            ReportType::StylusMpp1_51 => self.parse_stylus_mpp_1_51(reader, events)?,
            ReportType::DftMetadata => self.dft_meta = Some(DftMetadata::decode(reader)?),
            ReportType::DftWindow => self.parse_dft_window(reader, events)?,
            ReportType::Button => self.parse_button(reader, events)?,
            _ => {
                // Everything else (timestamps, the many partially
                // understood DFT report subtypes) is skipped by size.
            }
        }

        Ok(())
    }

    /// Caches the dimensions of the next heatmap.
    fn parse_heatmap_dimensions(&mut self, reader: &mut Reader<'_>) -> Result<(), ParseError> {
        self.dim = HeatmapDimensions::decode(reader)?;

        // On newer devices z_max may be 0; substitute a sane value.
        if self.dim.z_max == 0 {
            self.dim.z_max = 255;
        }

        Ok(())
    }

    fn parse_heatmap_data<E: ParserEvents>(
        &mut self,
        reader: &mut Reader<'_>,
        events: &mut E,
    ) -> Result<(), ParseError> {
        let size = usize::from(self.dim.rows) * usize::from(self.dim.columns);

        let touch = Touch {
            rows: self.dim.rows,
            columns: self.dim.columns,
            min: self.dim.z_min,
            max: self.dim.z_max,
            heatmap: reader.subspan(size)?,
        };

        events.on_touch(&touch);
        Ok(())
    }

    /// Parses an MPP 1.0 stylus report.
    ///
    /// A report bundles all samples from a 5 millisecond window; only the
    /// last one is forwarded, since emitting all of them produces visible
    /// jitter on the output.
    fn parse_stylus_mpp_1_0<E: ParserEvents>(
        &mut self,
        reader: &mut Reader<'_>,
        events: &mut E,
    ) -> Result<(), ParseError> {
        let report = StylusReport::decode(reader)?;

        for _ in 0..report.samples.saturating_sub(1) {
            reader.skip(StylusSampleMpp1_0::SIZE)?;
        }

        let sample = StylusSampleMpp1_0::decode(reader)?;

        let stylus = Stylus {
            proximity: sample.state.proximity,
            button: sample.state.button,
            rubber: sample.state.rubber,

            // The contact bit is always 0 in rubber mode.
            contact: sample.pressure > 0,

            x: f64::from(sample.x) / f64::from(MAX_X),
            y: f64::from(sample.y) / f64::from(MAX_Y),
            pressure: f64::from(sample.pressure) / f64::from(MAX_PRESSURE_MPP_1_0),

            serial: report.serial,
            ..Stylus::default()
        };

        events.on_stylus(&stylus);
        Ok(())
    }

    /// Parses an MPP 1.51 stylus report. Same coalescing as MPP 1.0, but
    /// the samples carry a timestamp and tip orientation.
    fn parse_stylus_mpp_1_51<E: ParserEvents>(
        &mut self,
        reader: &mut Reader<'_>,
        events: &mut E,
    ) -> Result<(), ParseError> {
        let report = StylusReport::decode(reader)?;

        for _ in 0..report.samples.saturating_sub(1) {
            reader.skip(StylusSampleMpp1_51::SIZE)?;
        }

        let sample = StylusSampleMpp1_51::decode(reader)?;

        let stylus = Stylus {
            proximity: sample.state.proximity,
            button: sample.state.button,
            rubber: sample.state.rubber,

            // The contact bit is always 0 in rubber mode.
            contact: sample.pressure > 0,

            timestamp: sample.timestamp,

            x: f64::from(sample.x) / f64::from(MAX_X),
            y: f64::from(sample.y) / f64::from(MAX_Y),
            pressure: f64::from(sample.pressure) / f64::from(MAX_PRESSURE_MPP_1_51),

            altitude: centideg_to_rad(sample.altitude),
            azimuth: centideg_to_rad(sample.azimuth),

            serial: report.serial,
        };

        events.on_stylus(&stylus);
        Ok(())
    }

    /// Parses a DFT window report: the window header followed by the X row
    /// array and the Y row array.
    fn parse_dft_window<E: ParserEvents>(
        &mut self,
        reader: &mut Reader<'_>,
        events: &mut E,
    ) -> Result<(), ParseError> {
        let header = DftWindowHeader::decode(reader)?;

        let mut window = DftWindow {
            ty: header.data_type,
            width: self.dim.columns,
            height: self.dim.rows,
            x: Vec::with_capacity(usize::from(header.num_rows)),
            y: Vec::with_capacity(usize::from(header.num_rows)),
            group: None,
        };

        for _ in 0..header.num_rows {
            window.x.push(DftRow::decode(reader)?);
        }

        for _ in 0..header.num_rows {
            window.y.push(DftRow::decode(reader)?);
        }

        // The group counter from the metadata report only applies if both
        // the sequence number and the data type line up.
        if let Some(meta) = self.dft_meta {
            if meta.seq_num == header.seq_num && meta.data_type == header.data_type {
                window.group = Some(meta.group_counter);
            }
        }

        events.on_dft(&window);
        Ok(())
    }

    /// Parses a button report. Like stylus reports these bundle several
    /// samples; only the final one is emitted.
    fn parse_button<E: ParserEvents>(
        &mut self,
        reader: &mut Reader<'_>,
        events: &mut E,
    ) -> Result<(), ParseError> {
        let mut button = Button::default();

        while reader.size() > 0 {
            let sample = ButtonSampleRaw::decode(reader)?;

            button.active = sample.button;
            button.pressure = f64::from(sample.pressure) / f64::from(MAX_PRESSURE_BUTTON);
        }

        events.on_button(&button);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Records every callback for assertions.
    #[derive(Default)]
    struct Record {
        stylus: Vec<Stylus>,
        touch: Vec<(u8, u8, Vec<u8>)>,
        dft: Vec<DftWindow>,
        button: Vec<Button>,
        metadata: Vec<Metadata>,
    }

    impl ParserEvents for Record {
        fn on_stylus(&mut self, stylus: &Stylus) {
            self.stylus.push(*stylus);
        }

        fn on_touch(&mut self, touch: &Touch<'_>) {
            self.touch
                .push((touch.rows, touch.columns, touch.heatmap.to_vec()));
        }

        fn on_dft(&mut self, dft: &DftWindow) {
            self.dft.push(dft.clone());
        }

        fn on_button(&mut self, button: &Button) {
            self.button.push(*button);
        }

        fn on_metadata(&mut self, metadata: &Metadata) {
            self.metadata.push(*metadata);
        }
    }

    fn hid_frame(ty: u8, payload: &[u8]) -> Vec<u8> {
        let mut data = Vec::new();
        data.extend_from_slice(&(payload.len() as u32 + 7).to_le_bytes());
        data.push(0);
        data.push(ty);
        data.push(0);
        data.extend_from_slice(payload);
        data
    }

    fn report_frame(ty: u8, payload: &[u8]) -> Vec<u8> {
        let mut data = vec![ty, 0];
        data.extend_from_slice(&(payload.len() as u16).to_le_bytes());
        data.extend_from_slice(payload);
        data
    }

    fn with_report_header(frame: &[u8]) -> Vec<u8> {
        let mut data = vec![0x0E, 0x00, 0x00];
        data.extend_from_slice(frame);
        data
    }

    fn mpp_1_51_sample(timestamp: u16, state: u16, x: u16, y: u16, pressure: u16) -> Vec<u8> {
        let mut data = Vec::new();
        data.extend_from_slice(&timestamp.to_le_bytes());
        data.extend_from_slice(&state.to_le_bytes());
        data.extend_from_slice(&x.to_le_bytes());
        data.extend_from_slice(&y.to_le_bytes());
        data.extend_from_slice(&pressure.to_le_bytes());
        data.extend_from_slice(&4500u16.to_le_bytes());
        data.extend_from_slice(&9000u16.to_le_bytes());
        data.extend_from_slice(&[0, 0]);
        data
    }

    fn stylus_report(serial: u32, samples: &[Vec<u8>]) -> Vec<u8> {
        let mut payload = vec![samples.len() as u8, 0, 0, 0];
        payload.extend_from_slice(&serial.to_le_bytes());
        for sample in samples {
            payload.extend_from_slice(sample);
        }
        payload
    }

    #[test]
    fn empty_payload_emits_nothing() {
        let mut parser = Parser::new();
        let mut record = Record::default();

        let data = [0x0E, 0x34, 0x12];
        parser.parse(&data, &mut record).unwrap();

        assert!(record.stylus.is_empty());
        assert!(record.touch.is_empty());
        assert!(record.dft.is_empty());
    }

    #[test]
    fn single_stylus_sample() {
        let sample = mpp_1_51_sample(100, 0b0011, 4800, 3600, 2048);
        let report = report_frame(0x60, &stylus_report(0xDEADBEEF, &[sample]));
        let data = with_report_header(&hid_frame(0xFF, &report));

        let mut parser = Parser::new();
        let mut record = Record::default();
        parser.parse(&data, &mut record).unwrap();

        assert_eq!(record.stylus.len(), 1);
        let stylus = record.stylus[0];

        assert!(stylus.proximity);
        assert!(stylus.contact);
        assert!(!stylus.button);
        assert!(!stylus.rubber);
        assert_eq!(stylus.timestamp, 100);
        assert_eq!(stylus.serial, 0xDEADBEEF);
        assert!((stylus.x - 0.5).abs() < 1e-9);
        assert!((stylus.y - 0.5).abs() < 1e-9);
        assert!((stylus.pressure - 0.5).abs() < 1e-9);
        assert!((stylus.altitude - PI / 4.0).abs() < 1e-9);
        assert!((stylus.azimuth - PI / 2.0).abs() < 1e-9);
    }

    #[test]
    fn bundled_samples_coalesce_to_last() {
        let samples = vec![
            mpp_1_51_sample(100, 0b0011, 1000, 1000, 100),
            mpp_1_51_sample(101, 0b0011, 2000, 2000, 200),
            mpp_1_51_sample(102, 0b0011, 3000, 3000, 300),
        ];

        let report = report_frame(0x60, &stylus_report(1, &samples));
        let data = with_report_header(&hid_frame(0xFF, &report));

        let mut parser = Parser::new();
        let mut record = Record::default();
        parser.parse(&data, &mut record).unwrap();

        assert_eq!(record.stylus.len(), 1);
        assert_eq!(record.stylus[0].timestamp, 102);
    }

    #[test]
    fn heatmap_dimensions_and_data() {
        let dims = [3u8, 4, 0, 2, 0, 3, 0, 255];
        let heatmap: Vec<u8> = (0..12).collect();

        let mut reports = report_frame(0x03, &dims);
        reports.extend_from_slice(&report_frame(0x25, &heatmap));
        let data = with_report_header(&hid_frame(0xFF, &reports));

        let mut parser = Parser::new();
        let mut record = Record::default();
        parser.parse(&data, &mut record).unwrap();

        assert_eq!(record.touch.len(), 1);
        let (rows, columns, buf) = &record.touch[0];
        assert_eq!(*rows, 3);
        assert_eq!(*columns, 4);
        assert_eq!(*buf, heatmap);
    }

    #[test]
    fn zero_z_max_becomes_255() {
        let dims = [2u8, 2, 0, 1, 0, 1, 0, 0];
        let heatmap = [10u8, 20, 30, 40];

        let mut reports = report_frame(0x03, &dims);
        reports.extend_from_slice(&report_frame(0x25, &heatmap));
        let data = with_report_header(&hid_frame(0xFF, &reports));

        let mut parser = Parser::new();
        let mut record = Record::default();
        parser.parse(&data, &mut record).unwrap();

        assert_eq!(parser.dim.z_max, 255);
    }

    #[test]
    fn unknown_report_types_are_skipped() {
        let mut reports = report_frame(0x42, &[0xAA; 16]);
        let sample = mpp_1_51_sample(7, 0b0001, 0, 0, 0);
        reports.extend_from_slice(&report_frame(0x60, &stylus_report(1, &[sample])));
        let data = with_report_header(&hid_frame(0xFF, &reports));

        let mut parser = Parser::new();
        let mut record = Record::default();
        parser.parse(&data, &mut record).unwrap();

        // The unknown report did not stop the stream.
        assert_eq!(record.stylus.len(), 1);
        assert_eq!(record.stylus[0].timestamp, 7);
    }

    #[test]
    fn truncated_report_discards_only_itself() {
        // A stylus report whose declared size is larger than its payload.
        let mut reports = vec![0x60, 0x00];
        reports.extend_from_slice(&100u16.to_le_bytes());
        reports.extend_from_slice(&[0u8; 8]); // only 8 of 100 bytes present

        let data = with_report_header(&hid_frame(0xFF, &reports));

        let mut parser = Parser::new();
        let mut record = Record::default();

        // No panic, no error, no callbacks.
        parser.parse(&data, &mut record).unwrap();
        assert!(record.stylus.is_empty());
    }

    #[test]
    fn malformed_four_byte_reports_frame_is_ignored() {
        // The known firmware quirk: a Reports frame that is four bytes
        // short, leaving four dangling payload bytes in the parent.
        #[rustfmt::skip]
        let data = [
            0x0E, 0x00, 0x00,                           // report header
            0x16, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,   // outer Hid frame
            0x0B, 0x00, 0x00, 0x00, 0x00, 0xFF, 0x00,   // Reports frame
            0x74, 0x00, 0x04, 0x00,                     // 4 bytes of payload
            0x00, 0x00, 0x00, 0x00,                     // 4 dangling bytes
        ];

        let mut parser = Parser::new();
        let mut record = Record::default();

        parser.parse(&data, &mut record).unwrap();
        assert!(record.stylus.is_empty());
        assert!(record.touch.is_empty());
    }

    #[test]
    fn nested_hid_frames() {
        let sample = mpp_1_51_sample(55, 0b0001, 100, 100, 0);
        let report = report_frame(0x60, &stylus_report(3, &[sample]));
        let inner = hid_frame(0xFF, &report);
        let outer = hid_frame(0x00, &inner);
        let data = with_report_header(&outer);

        let mut parser = Parser::new();
        let mut record = Record::default();
        parser.parse(&data, &mut record).unwrap();

        assert_eq!(record.stylus.len(), 1);
        assert_eq!(record.stylus[0].timestamp, 55);
    }

    #[test]
    fn legacy_frame_routes_to_report_frames() {
        let sample = mpp_1_51_sample(21, 0b0001, 100, 100, 0);
        let report = report_frame(0x60, &stylus_report(9, &[sample]));

        let mut legacy = Vec::new();
        legacy.extend_from_slice(&1u32.to_le_bytes()); // counter
        legacy.extend_from_slice(&1u32.to_le_bytes()); // groups
        legacy.extend_from_slice(&[0u8; 4]);
        legacy.extend_from_slice(&0u16.to_le_bytes()); // group index
        legacy.extend_from_slice(&0x06u16.to_le_bytes()); // stylus group
        legacy.extend_from_slice(&(report.len() as u32).to_le_bytes());
        legacy.extend_from_slice(&[0u8; 8]);
        legacy.extend_from_slice(&report);

        let data = with_report_header(&hid_frame(0xEE, &legacy));

        let mut parser = Parser::new();
        let mut record = Record::default();
        parser.parse(&data, &mut record).unwrap();

        assert_eq!(record.stylus.len(), 1);
        assert_eq!(record.stylus[0].serial, 9);
    }

    #[test]
    fn dft_window_group_requires_matching_metadata() {
        fn dft_report(seq_num: u8, data_type: u8, num_rows: u8) -> Vec<u8> {
            let mut payload = Vec::new();
            payload.extend_from_slice(&0u32.to_le_bytes()); // timestamp
            payload.push(num_rows);
            payload.push(seq_num);
            payload.extend_from_slice(&[0, 0, 0]);
            payload.push(data_type);
            payload.extend_from_slice(&[0, 0]);
            for _ in 0..(num_rows as usize * 2) {
                payload.extend_from_slice(&[0u8; DftRow::SIZE]);
            }
            report_frame(0x5C, &payload)
        }

        fn meta_report(group: u32, seq_num: u8, data_type: u8) -> Vec<u8> {
            let mut payload = Vec::new();
            payload.extend_from_slice(&group.to_le_bytes());
            payload.push(seq_num);
            payload.push(data_type);
            payload.extend_from_slice(&[0u8; 10]);
            report_frame(0x5F, &payload)
        }

        let mut reports = meta_report(77, 4, 0x06);
        reports.extend_from_slice(&dft_report(4, 0x06, 2));
        reports.extend_from_slice(&dft_report(5, 0x06, 2)); // seq mismatch

        let data = with_report_header(&hid_frame(0xFF, &reports));

        let mut parser = Parser::new();
        let mut record = Record::default();
        parser.parse(&data, &mut record).unwrap();

        assert_eq!(record.dft.len(), 2);
        assert_eq!(record.dft[0].group, Some(77));
        assert_eq!(record.dft[0].x.len(), 2);
        assert_eq!(record.dft[0].y.len(), 2);
        assert_eq!(record.dft[1].group, None);
    }

    #[test]
    fn button_report_emits_final_sample() {
        fn button_sample(pressure: u16, active: bool) -> Vec<u8> {
            let mut data = Vec::new();
            data.extend_from_slice(&pressure.to_le_bytes());
            data.extend_from_slice(&[0u8; 12]);
            data.push(active as u8);
            data.push(0);
            data
        }

        let mut payload = button_sample(100, false);
        payload.extend_from_slice(&button_sample(512, true));
        let data = with_report_header(&hid_frame(0xFF, &report_frame(0x90, &payload)));

        let mut parser = Parser::new();
        let mut record = Record::default();
        parser.parse(&data, &mut record).unwrap();

        assert_eq!(record.button.len(), 1);
        assert!(record.button[0].active);
        assert!((record.button[0].pressure - 0.5).abs() < 1e-9);
    }

    #[test]
    fn metadata_frame_decodes() {
        let mut payload = Vec::new();
        payload.extend_from_slice(&46u32.to_le_bytes()); // rows
        payload.extend_from_slice(&68u32.to_le_bytes()); // columns
        payload.extend_from_slice(&26000u32.to_le_bytes()); // 26 cm
        payload.extend_from_slice(&17300u32.to_le_bytes()); // 17.3 cm
        payload.extend_from_slice(&1.0f32.to_bits().to_le_bytes()); // xx
        payload.extend_from_slice(&0.0f32.to_bits().to_le_bytes());
        payload.extend_from_slice(&0.0f32.to_bits().to_le_bytes());
        payload.extend_from_slice(&0.0f32.to_bits().to_le_bytes());
        payload.extend_from_slice(&(-1.0f32).to_bits().to_le_bytes()); // yy
        payload.extend_from_slice(&0.0f32.to_bits().to_le_bytes());
        payload.push(0);
        for _ in 0..16 {
            payload.extend_from_slice(&0.0f32.to_bits().to_le_bytes());
        }

        // Feature reports carry only the 1-byte report ID as header.
        let mut data = vec![0x06];
        data.extend_from_slice(&hid_frame(0x02, &payload));

        let mut parser = Parser::new();
        let mut record = Record::default();
        parser.parse_with_header(&data, 1, &mut record).unwrap();

        assert_eq!(record.metadata.len(), 1);
        let meta = record.metadata[0];
        assert_eq!(meta.rows, 46);
        assert_eq!(meta.columns, 68);
        assert!((meta.width - 26.0).abs() < 1e-9);
        assert!((meta.height - 17.3).abs() < 1e-9);
        assert!(!meta.invert_x);
        assert!(meta.invert_y);
    }
}
