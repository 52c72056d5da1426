//! Wire format of the IPTS touch data stream.
//!
//! Every HID report from the device carries a 3-byte report header followed
//! by a single HID frame. HID frames nest: a `Hid` frame chains further HID
//! frames, a `Reports` frame holds a flat list of report frames, and report
//! frames finally carry the payloads we care about (heatmaps, stylus
//! samples, DFT windows, ...). Older GuC-based devices wrap their report
//! frames in a legacy group structure instead, which replay tooling
//! transports over HID using the made-up frame type 0xEE.
//!
//! Layouts here mirror the hardware structs byte for byte. Each type knows
//! how to decode itself from a [`Reader`]; integers are little-endian.

use crate::reader::Reader;

use thiserror::Error;

/// The largest X coordinate reported for stylus and touch input.
pub const MAX_X: u16 = 9600;

/// The largest Y coordinate reported for stylus and touch input.
pub const MAX_Y: u16 = 7200;

/// The diagonal of the [0, MAX_X] x [0, MAX_Y] coordinate space.
pub const DIAGONAL: u16 = 12000;

pub const MAX_PRESSURE_MPP_1_0: u16 = 1024;
pub const MAX_PRESSURE_MPP_1_51: u16 = 4096;
pub const MAX_PRESSURE_BUTTON: u16 = 1024;

/// How many contacts the tracking and the sink will handle at most.
pub const MAX_CONTACTS: usize = 10;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParseError {
    #[error("tried to read more data than available")]
    EndOfData,
}

/// The header prefixed to all data received from the device over HID.
#[derive(Debug, Clone, Copy, Default)]
pub struct ReportHeader {
    pub id: u8,
    pub timestamp: u16,
}

impl ReportHeader {
    pub const SIZE: usize = 3;

    pub fn decode(r: &mut Reader<'_>) -> Result<Self, ParseError> {
        Ok(Self {
            id: r.read_u8()?,
            timestamp: r.read_u16()?,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HidFrameType {
    /// The frame contains further HID frames, chained together.
    Hid,

    /// The frame contains a heatmap frame.
    Heatmap,

    /// The frame contains a metadata frame.
    /// Only returned by a HID feature report, never in the data stream.
    Metadata,

    /// The frame contains a legacy group. Synthetic type, used by replay
    /// tooling to transport data from older devices over the HID format.
    Legacy,

    /// The frame contains a list of report frames.
    Reports,

    Unknown(u8),
}

impl From<u8> for HidFrameType {
    fn from(value: u8) -> Self {
        match value {
            0x00 => Self::Hid,
            0x01 => Self::Heatmap,
            0x02 => Self::Metadata,
            0xEE => Self::Legacy,
            0xFF => Self::Reports,
            other => Self::Unknown(other),
        }
    }
}

/// The header of a HID frame: total size (header included), then the type.
#[derive(Debug, Clone, Copy)]
pub struct HidFrame {
    pub size: u32,
    pub ty: HidFrameType,
}

impl HidFrame {
    pub const SIZE: usize = 7;

    pub fn decode(r: &mut Reader<'_>) -> Result<Self, ParseError> {
        let size = r.read_u32()?;
        r.skip(1)?;
        let ty = HidFrameType::from(r.read_u8()?);
        r.skip(1)?;

        Ok(Self { size, ty })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportType {
    HeatmapTimestamp,
    HeatmapDimensions,
    HeatmapData,

    StylusMpp1_0,
    StylusMpp1_51,

    DftFrequencyNoise,
    DftGeneral,
    DftJnrOutput,
    DftNoiseMetricsOutput,
    DftDataSelection,
    DftMagnitude,
    DftWindow,
    DftMultipleRegion,
    DftTouchedAntennas,
    DftMetadata,
    DftDetection,
    DftLift,

    Button,

    Unknown(u8),
}

impl From<u8> for ReportType {
    fn from(value: u8) -> Self {
        match value {
            0x00 => Self::HeatmapTimestamp,
            0x03 => Self::HeatmapDimensions,
            0x25 => Self::HeatmapData,
            0x10 => Self::StylusMpp1_0,
            0x60 => Self::StylusMpp1_51,
            0x04 => Self::DftFrequencyNoise,
            0x57 => Self::DftGeneral,
            0x58 => Self::DftJnrOutput,
            0x59 => Self::DftNoiseMetricsOutput,
            0x5A => Self::DftDataSelection,
            0x5B => Self::DftMagnitude,
            0x5C => Self::DftWindow,
            0x5D => Self::DftMultipleRegion,
            0x5E => Self::DftTouchedAntennas,
            0x5F => Self::DftMetadata,
            0x62 => Self::DftDetection,
            0x63 => Self::DftLift,
            0x90 => Self::Button,
            other => Self::Unknown(other),
        }
    }
}

/// The header of a report frame. Unlike HID frames, the size field counts
/// only the payload.
#[derive(Debug, Clone, Copy)]
pub struct ReportFrame {
    pub ty: ReportType,
    pub flags: u8,
    pub size: u16,
}

impl ReportFrame {
    pub fn decode(r: &mut Reader<'_>) -> Result<Self, ParseError> {
        Ok(Self {
            ty: ReportType::from(r.read_u8()?),
            flags: r.read_u8()?,
            size: r.read_u16()?,
        })
    }
}

/// The header of a legacy group list, from GuC-based devices.
#[derive(Debug, Clone, Copy)]
pub struct LegacyHeader {
    pub counter: u32,
    pub groups: u32,
}

impl LegacyHeader {
    pub fn decode(r: &mut Reader<'_>) -> Result<Self, ParseError> {
        let counter = r.read_u32()?;
        let groups = r.read_u32()?;
        r.skip(4)?;

        Ok(Self { counter, groups })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LegacyGroupType {
    Stylus,
    Touch,
    Unknown(u16),
}

impl From<u16> for LegacyGroupType {
    fn from(value: u16) -> Self {
        match value {
            0x06 => Self::Stylus,
            0x08 => Self::Touch,
            other => Self::Unknown(other),
        }
    }
}

/// The header of a single group inside a legacy frame. Stylus and touch
/// groups wrap ordinary report frames; everything else is skipped by size.
#[derive(Debug, Clone, Copy)]
pub struct LegacyGroup {
    pub index: u16,
    pub ty: LegacyGroupType,
    pub size: u32,
}

impl LegacyGroup {
    pub fn decode(r: &mut Reader<'_>) -> Result<Self, ParseError> {
        let index = r.read_u16()?;
        let ty = LegacyGroupType::from(r.read_u16()?);
        let size = r.read_u32()?;
        r.skip(8)?;

        Ok(Self { index, ty, size })
    }
}

/// The envelope around heatmap data on HID-native devices.
#[derive(Debug, Clone, Copy)]
pub struct HeatmapFrame {
    pub size: u32,
}

impl HeatmapFrame {
    pub fn decode(r: &mut Reader<'_>) -> Result<Self, ParseError> {
        r.skip(5)?;
        Ok(Self { size: r.read_u32()? })
    }
}

/// Describes the size of a heatmap and the range of values it can contain.
#[derive(Debug, Clone, Copy, Default)]
pub struct HeatmapDimensions {
    pub rows: u8,
    pub columns: u8,
    pub y_min: u8,
    pub y_max: u8,
    pub x_min: u8,
    pub x_max: u8,
    pub z_min: u8,
    pub z_max: u8,
}

impl HeatmapDimensions {
    pub fn decode(r: &mut Reader<'_>) -> Result<Self, ParseError> {
        Ok(Self {
            rows: r.read_u8()?,
            columns: r.read_u8()?,
            y_min: r.read_u8()?,
            y_max: r.read_u8()?,
            x_min: r.read_u8()?,
            x_max: r.read_u8()?,
            z_min: r.read_u8()?,
            z_max: r.read_u8()?,
        })
    }
}

/// The header of a stylus report, followed by one or more samples.
#[derive(Debug, Clone, Copy)]
pub struct StylusReport {
    pub samples: u8,
    pub serial: u32,
}

impl StylusReport {
    pub fn decode(r: &mut Reader<'_>) -> Result<Self, ParseError> {
        let samples = r.read_u8()?;
        r.skip(3)?;
        let serial = r.read_u32()?;

        Ok(Self { samples, serial })
    }
}

/// The state bits shared by both MPP sample layouts.
///
/// The contact bit is always 0 while the stylus is in rubber mode; use the
/// pressure value for reliable contact detection.
#[derive(Debug, Clone, Copy, Default)]
pub struct StylusState {
    pub proximity: bool,
    pub contact: bool,
    pub button: bool,
    pub rubber: bool,
}

impl StylusState {
    fn from_bits(bits: u16) -> Self {
        Self {
            proximity: bits & (1 << 0) != 0,
            contact: bits & (1 << 1) != 0,
            button: bits & (1 << 2) != 0,
            rubber: bits & (1 << 3) != 0,
        }
    }
}

/// The position and state of an MPP 1.0 stylus.
/// 1024 levels of pressure, no tilt information.
#[derive(Debug, Clone, Copy)]
pub struct StylusSampleMpp1_0 {
    pub state: StylusState,
    pub x: u16,
    pub y: u16,
    pub pressure: u16,
}

impl StylusSampleMpp1_0 {
    pub const SIZE: usize = 12;

    pub fn decode(r: &mut Reader<'_>) -> Result<Self, ParseError> {
        r.skip(4)?;
        let state = StylusState::from_bits(r.read_u8()? as u16);
        let x = r.read_u16()?;
        let y = r.read_u16()?;
        let pressure = r.read_u16()?;
        r.skip(1)?;

        Ok(Self { state, x, y, pressure })
    }
}

/// The position and state of an MPP 1.51 (or later) stylus.
/// 4096 levels of pressure plus tip orientation.
#[derive(Debug, Clone, Copy)]
pub struct StylusSampleMpp1_51 {
    pub timestamp: u16,
    pub state: StylusState,
    pub x: u16,
    pub y: u16,
    pub pressure: u16,

    /// The angle between the stylus and the display. Unit: degrees * 100.
    pub altitude: u16,

    /// The direction the stylus is pointing in. Unit: degrees * 100.
    pub azimuth: u16,
}

impl StylusSampleMpp1_51 {
    pub const SIZE: usize = 16;

    pub fn decode(r: &mut Reader<'_>) -> Result<Self, ParseError> {
        let timestamp = r.read_u16()?;
        let state = StylusState::from_bits(r.read_u16()?);
        let x = r.read_u16()?;
        let y = r.read_u16()?;
        let pressure = r.read_u16()?;
        let altitude = r.read_u16()?;
        let azimuth = r.read_u16()?;
        r.skip(2)?;

        Ok(Self {
            timestamp,
            state,
            x,
            y,
            pressure,
            altitude,
            azimuth,
        })
    }
}

/// How many complex antenna components a DFT row contains.
pub const DFT_NUM_COMPONENTS: usize = 9;

/// How many rows of a pressure window encode the pressure value.
pub const DFT_PRESSURE_ROWS: usize = 6;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DftType {
    Position,
    PositionMpp2,
    Button,
    BinaryMpp2,
    Pressure,
    Unknown(u8),
}

impl From<u8> for DftType {
    fn from(value: u8) -> Self {
        match value {
            0x06 => Self::Position,
            0x07 => Self::PositionMpp2,
            0x09 => Self::Button,
            0x0A => Self::BinaryMpp2,
            0x0B => Self::Pressure,
            other => Self::Unknown(other),
        }
    }
}

impl Default for DftType {
    fn default() -> Self {
        Self::Unknown(0)
    }
}

/// A DFT metadata report. One precedes each window report; the group
/// counter is attached to the window if sequence number and type match.
#[derive(Debug, Clone, Copy)]
pub struct DftMetadata {
    pub group_counter: u32,
    pub seq_num: u8,
    pub data_type: DftType,
}

impl DftMetadata {
    pub fn decode(r: &mut Reader<'_>) -> Result<Self, ParseError> {
        let group_counter = r.read_u32()?;
        let seq_num = r.read_u8()?;
        let data_type = DftType::from(r.read_u8()?);
        r.skip(10)?;

        Ok(Self {
            group_counter,
            seq_num,
            data_type,
        })
    }
}

/// The header of a DFT window report, followed by `num_rows` X rows and
/// `num_rows` Y rows.
#[derive(Debug, Clone, Copy)]
pub struct DftWindowHeader {
    pub timestamp: u32,
    pub num_rows: u8,
    pub seq_num: u8,
    pub data_type: DftType,
}

impl DftWindowHeader {
    pub fn decode(r: &mut Reader<'_>) -> Result<Self, ParseError> {
        let timestamp = r.read_u32()?;
        let num_rows = r.read_u8()?;
        let seq_num = r.read_u8()?;
        r.skip(3)?;
        let data_type = DftType::from(r.read_u8()?);
        r.skip(2)?;

        Ok(Self {
            timestamp,
            num_rows,
            seq_num,
            data_type,
        })
    }
}

/// One antenna-line measurement of a DFT window.
#[derive(Debug, Clone, Copy, Default)]
pub struct DftRow {
    pub frequency: u32,
    pub magnitude: u32,
    pub real: [i16; DFT_NUM_COMPONENTS],
    pub imag: [i16; DFT_NUM_COMPONENTS],
    pub first: i8,
    pub last: i8,
    pub mid: i8,
    pub zero: i8,
}

impl DftRow {
    pub const SIZE: usize = 48;

    pub fn decode(r: &mut Reader<'_>) -> Result<Self, ParseError> {
        let mut row = Self {
            frequency: r.read_u32()?,
            magnitude: r.read_u32()?,
            ..Self::default()
        };

        for real in &mut row.real {
            *real = r.read_i16()?;
        }

        for imag in &mut row.imag {
            *imag = r.read_i16()?;
        }

        row.first = r.read_i8()?;
        row.last = r.read_i8()?;
        row.mid = r.read_i8()?;
        row.zero = r.read_i8()?;

        Ok(row)
    }
}

/// A sample of the state of the (touchpad) button. One report chains
/// multiple samples without any header in between.
#[derive(Debug, Clone, Copy, Default)]
pub struct ButtonSampleRaw {
    pub pressure: u16,
    pub button: bool,
}

impl ButtonSampleRaw {
    pub const SIZE: usize = 16;

    pub fn decode(r: &mut Reader<'_>) -> Result<Self, ParseError> {
        let pressure = r.read_u16()?;
        r.skip(12)?;
        let button = r.read_u8()? != 0;
        r.skip(1)?;

        Ok(Self { pressure, button })
    }
}

/// The physical dimensions block of a metadata frame.
/// Width and height are in millimeters * 100.
#[derive(Debug, Clone, Copy, Default)]
pub struct MetadataDimensions {
    pub rows: u32,
    pub columns: u32,
    pub width: u32,
    pub height: u32,
}

impl MetadataDimensions {
    pub fn decode(r: &mut Reader<'_>) -> Result<Self, ParseError> {
        Ok(Self {
            rows: r.read_u32()?,
            columns: r.read_u32()?,
            width: r.read_u32()?,
            height: r.read_u32()?,
        })
    }
}

/// The affine transform between heatmap and screen coordinates.
/// A negative xx / yy means the respective axis is inverted.
#[derive(Debug, Clone, Copy, Default)]
pub struct MetadataTransform {
    pub xx: f32,
    pub yx: f32,
    pub tx: f32,
    pub xy: f32,
    pub yy: f32,
    pub ty: f32,
}

impl MetadataTransform {
    pub fn decode(r: &mut Reader<'_>) -> Result<Self, ParseError> {
        Ok(Self {
            xx: r.read_f32()?,
            yx: r.read_f32()?,
            tx: r.read_f32()?,
            xy: r.read_f32()?,
            yy: r.read_f32()?,
            ty: r.read_f32()?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hid_frame_decode() {
        let data = [0x10, 0x00, 0x00, 0x00, 0x00, 0xFF, 0x00];
        let mut r = Reader::new(&data);

        let frame = HidFrame::decode(&mut r).unwrap();
        assert_eq!(frame.size, 0x10);
        assert_eq!(frame.ty, HidFrameType::Reports);
        assert_eq!(r.size(), 0);
    }

    #[test]
    fn report_frame_decode() {
        let data = [0x25, 0x00, 0x40, 0x01];
        let mut r = Reader::new(&data);

        let frame = ReportFrame::decode(&mut r).unwrap();
        assert_eq!(frame.ty, ReportType::HeatmapData);
        assert_eq!(frame.size, 0x140);
    }

    #[test]
    fn unknown_types_are_kept() {
        assert_eq!(HidFrameType::from(0x42), HidFrameType::Unknown(0x42));
        assert_eq!(ReportType::from(0x99), ReportType::Unknown(0x99));
        assert_eq!(DftType::from(0x1F), DftType::Unknown(0x1F));
    }

    #[test]
    fn stylus_sample_mpp_1_51_decode() {
        #[rustfmt::skip]
        let data = [
            0x64, 0x00,             // timestamp = 100
            0x03, 0x00,             // state: proximity + contact
            0xC0, 0x12,             // x = 4800
            0x10, 0x0E,             // y = 3600
            0x00, 0x08,             // pressure = 2048
            0x94, 0x11,             // altitude = 4500
            0x28, 0x23,             // azimuth = 9000
            0x00, 0x00,             // reserved
        ];

        let mut r = Reader::new(&data);
        let sample = StylusSampleMpp1_51::decode(&mut r).unwrap();

        assert_eq!(sample.timestamp, 100);
        assert!(sample.state.proximity);
        assert!(sample.state.contact);
        assert!(!sample.state.button);
        assert!(!sample.state.rubber);
        assert_eq!(sample.x, 4800);
        assert_eq!(sample.y, 3600);
        assert_eq!(sample.pressure, 2048);
        assert_eq!(sample.altitude, 4500);
        assert_eq!(sample.azimuth, 9000);
    }

    #[test]
    fn stylus_sample_mpp_1_0_decode() {
        #[rustfmt::skip]
        let data = [
            0x00, 0x00, 0x00, 0x00, // reserved
            0x05,                   // state: proximity + button
            0x80, 0x0C,             // x = 3200
            0x40, 0x06,             // y = 1600
            0x00, 0x02,             // pressure = 512
            0x00,                   // reserved
        ];

        let mut r = Reader::new(&data);
        let sample = StylusSampleMpp1_0::decode(&mut r).unwrap();

        assert!(sample.state.proximity);
        assert!(sample.state.button);
        assert!(!sample.state.contact);
        assert_eq!(sample.x, 3200);
        assert_eq!(sample.y, 1600);
        assert_eq!(sample.pressure, 512);
    }

    #[test]
    fn dft_row_decode() {
        let mut data = Vec::new();
        data.extend_from_slice(&100_000u32.to_le_bytes());
        data.extend_from_slice(&5_000u32.to_le_bytes());
        for i in 0..9i16 {
            data.extend_from_slice(&(i * 10).to_le_bytes());
        }
        for i in 0..9i16 {
            data.extend_from_slice(&(-i * 10).to_le_bytes());
        }
        data.extend_from_slice(&[4, 12, 8, 0x7F]);

        assert_eq!(data.len(), DftRow::SIZE);

        let mut r = Reader::new(&data);
        let row = DftRow::decode(&mut r).unwrap();

        assert_eq!(row.frequency, 100_000);
        assert_eq!(row.magnitude, 5_000);
        assert_eq!(row.real[3], 30);
        assert_eq!(row.imag[3], -30);
        assert_eq!(row.first, 4);
        assert_eq!(row.last, 12);
        assert_eq!(row.mid, 8);
        assert_eq!(row.zero, 127);
    }
}
