//! Virtual input devices.
//!
//! The processing pipeline talks to an [`InputSink`]; the shipped
//! implementation forwards everything to two Linux uinput devices (one
//! multitouch touchscreen, one stylus) built through evdev. Keeping the
//! sink behind a trait keeps evdev types out of the pipeline and makes the
//! pipeline testable with a recording fake.

use crate::parser::Stylus;
use crate::protocol::{DIAGONAL, MAX_CONTACTS, MAX_PRESSURE_MPP_1_51, MAX_X, MAX_Y};

use evdev_rs::enums::{EventCode, EventType, InputProp, EV_ABS, EV_KEY, EV_SYN};
use evdev_rs::{AbsInfo, DeviceWrapper, EnableCodeData, InputEvent, TimeVal, UInputDevice,
    UninitDevice};
use thiserror::Error;

use std::f64::consts::FRAC_PI_2;

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("failed to allocate evdev device")]
    Alloc,

    #[error("failed to emit input event")]
    Io(#[from] std::io::Error),
}

/// Where the processed input events go.
///
/// The pipeline calls `sync` exactly once per input frame, after all
/// contact and stylus events of that frame. A contact that disappears
/// from the tracked set receives exactly one `emit_contact_lift`.
pub trait InputSink {
    /// A tracked contact. Coordinates, sizes and orientation are
    /// normalized; `stable` tells the sink whether the values can be
    /// trusted or should be deferred.
    #[allow(clippy::too_many_arguments)]
    fn emit_contact(
        &mut self,
        index: usize,
        x: f64,
        y: f64,
        major: f64,
        minor: f64,
        orientation: f64,
        stable: bool,
    ) -> Result<(), SinkError>;

    /// The contact with the given index is gone.
    fn emit_contact_lift(&mut self, index: usize) -> Result<(), SinkError>;

    /// A stylus sample in normalized coordinates.
    fn emit_stylus(&mut self, stylus: &Stylus) -> Result<(), SinkError>;

    /// The stylus left proximity.
    fn emit_stylus_lift(&mut self) -> Result<(), SinkError>;

    /// The state of the touchpad button.
    fn emit_button(&mut self, active: bool, pressure: f64) -> Result<(), SinkError>;

    /// Commits the batch of events for this frame.
    fn sync(&mut self) -> Result<(), SinkError>;
}

/// Converts spherical pen orientation into the evdev tilt pair
/// (centidegrees, positive towards the positive axis).
fn calculate_tilt(altitude: f64, azimuth: f64) -> (i32, i32) {
    if altitude <= 0.0 {
        return (0, 0);
    }

    let sin_alt = altitude.sin();
    let cos_alt = altitude.cos();

    let tilt_x = (cos_alt * azimuth.cos()).atan2(sin_alt);
    let tilt_y = (cos_alt * azimuth.sin()).atan2(sin_alt);

    let to_centideg = |rad: f64| (rad / FRAC_PI_2 * 9000.0).round() as i32;

    (
        to_centideg(tilt_x).clamp(-9000, 9000),
        to_centideg(tilt_y).clamp(-9000, 9000),
    )
}

fn abs_info(min: i32, max: i32, resolution: i32) -> EnableCodeData {
    EnableCodeData::AbsInfo(AbsInfo {
        value: 0,
        minimum: min,
        maximum: max,
        fuzz: 0,
        flat: 0,
        resolution,
    })
}

/// The uinput-backed sink.
pub struct EvdevSink {
    touch: UInputDevice,
    stylus: UInputDevice,
}

impl EvdevSink {
    /// Creates the touchscreen and stylus devices.
    ///
    /// `width` and `height` are the physical display dimensions in
    /// centimeters; they only feed the resolution fields so downstream
    /// consumers can convert to millimeters.
    pub fn new(vendor: u16, product: u16, width: f64, height: f64) -> Result<Self, SinkError> {
        Ok(Self {
            touch: Self::create_touch(vendor, product, width, height)?,
            stylus: Self::create_stylus(vendor, product, width, height)?,
        })
    }

    fn resolutions(width: f64, height: f64) -> (i32, i32) {
        if width <= 0.0 || height <= 0.0 {
            return (0, 0);
        }

        // Units per millimeter.
        let res_x = (f64::from(MAX_X) / (width * 10.0)).round() as i32;
        let res_y = (f64::from(MAX_Y) / (height * 10.0)).round() as i32;

        (res_x, res_y)
    }

    fn create_touch(
        vendor: u16,
        product: u16,
        width: f64,
        height: f64,
    ) -> Result<UInputDevice, SinkError> {
        let dev = UninitDevice::new().ok_or(SinkError::Alloc)?;

        dev.set_name("IPTS Touch");
        dev.set_vendor_id(vendor);
        dev.set_product_id(product);

        let (res_x, res_y) = Self::resolutions(width, height);

        dev.enable_event_type(&EventType::EV_KEY)?;
        dev.enable_event_type(&EventType::EV_ABS)?;

        dev.enable_property(&InputProp::INPUT_PROP_DIRECT)?;

        dev.enable_event_code(&EventCode::EV_KEY(EV_KEY::BTN_TOUCH), None)?;
        dev.enable_event_code(&EventCode::EV_KEY(EV_KEY::BTN_LEFT), None)?;

        let max_contacts = MAX_CONTACTS as i32;

        dev.enable_event_code(
            &EventCode::EV_ABS(EV_ABS::ABS_MT_SLOT),
            Some(abs_info(0, max_contacts, 0)),
        )?;
        dev.enable_event_code(
            &EventCode::EV_ABS(EV_ABS::ABS_MT_TRACKING_ID),
            Some(abs_info(-1, max_contacts, 0)),
        )?;
        dev.enable_event_code(
            &EventCode::EV_ABS(EV_ABS::ABS_MT_POSITION_X),
            Some(abs_info(0, i32::from(MAX_X), res_x)),
        )?;
        dev.enable_event_code(
            &EventCode::EV_ABS(EV_ABS::ABS_MT_POSITION_Y),
            Some(abs_info(0, i32::from(MAX_Y), res_y)),
        )?;
        dev.enable_event_code(
            &EventCode::EV_ABS(EV_ABS::ABS_MT_ORIENTATION),
            Some(abs_info(0, 180, 0)),
        )?;
        dev.enable_event_code(
            &EventCode::EV_ABS(EV_ABS::ABS_MT_TOUCH_MAJOR),
            Some(abs_info(0, i32::from(DIAGONAL), 0)),
        )?;
        dev.enable_event_code(
            &EventCode::EV_ABS(EV_ABS::ABS_MT_TOUCH_MINOR),
            Some(abs_info(0, i32::from(DIAGONAL), 0)),
        )?;

        Ok(UInputDevice::create_from_device(&dev)?)
    }

    fn create_stylus(
        vendor: u16,
        product: u16,
        width: f64,
        height: f64,
    ) -> Result<UInputDevice, SinkError> {
        let dev = UninitDevice::new().ok_or(SinkError::Alloc)?;

        dev.set_name("IPTS Stylus");
        dev.set_vendor_id(vendor);
        dev.set_product_id(product);

        let (res_x, res_y) = Self::resolutions(width, height);

        dev.enable_event_type(&EventType::EV_KEY)?;
        dev.enable_event_type(&EventType::EV_ABS)?;

        dev.enable_property(&InputProp::INPUT_PROP_DIRECT)?;
        dev.enable_property(&InputProp::INPUT_PROP_POINTER)?;

        dev.enable_event_code(&EventCode::EV_KEY(EV_KEY::BTN_TOUCH), None)?;
        dev.enable_event_code(&EventCode::EV_KEY(EV_KEY::BTN_STYLUS), None)?;
        dev.enable_event_code(&EventCode::EV_KEY(EV_KEY::BTN_TOOL_PEN), None)?;
        dev.enable_event_code(&EventCode::EV_KEY(EV_KEY::BTN_TOOL_RUBBER), None)?;

        // Tilt resolution is expected in units per radian.
        let res_tilt = (18000.0 / std::f64::consts::PI).round() as i32;

        dev.enable_event_code(
            &EventCode::EV_ABS(EV_ABS::ABS_X),
            Some(abs_info(0, i32::from(MAX_X), res_x)),
        )?;
        dev.enable_event_code(
            &EventCode::EV_ABS(EV_ABS::ABS_Y),
            Some(abs_info(0, i32::from(MAX_Y), res_y)),
        )?;
        dev.enable_event_code(
            &EventCode::EV_ABS(EV_ABS::ABS_PRESSURE),
            Some(abs_info(0, i32::from(MAX_PRESSURE_MPP_1_51), 0)),
        )?;
        dev.enable_event_code(
            &EventCode::EV_ABS(EV_ABS::ABS_TILT_X),
            Some(abs_info(-9000, 9000, res_tilt)),
        )?;
        dev.enable_event_code(
            &EventCode::EV_ABS(EV_ABS::ABS_TILT_Y),
            Some(abs_info(-9000, 9000, res_tilt)),
        )?;
        dev.enable_event_code(
            &EventCode::EV_ABS(EV_ABS::ABS_MISC),
            Some(abs_info(0, i32::from(u16::MAX), 0)),
        )?;

        Ok(UInputDevice::create_from_device(&dev)?)
    }

    fn write(device: &UInputDevice, code: EventCode, value: i32) -> Result<(), SinkError> {
        device.write_event(&InputEvent {
            time: TimeVal::new(0, 0),
            event_code: code,
            value,
        })?;

        Ok(())
    }
}

impl InputSink for EvdevSink {
    fn emit_contact(
        &mut self,
        index: usize,
        x: f64,
        y: f64,
        major: f64,
        minor: f64,
        orientation: f64,
        stable: bool,
    ) -> Result<(), SinkError> {
        // Deferring the values of an unstable contact means not writing
        // them: the kernel keeps the previous state of the slot.
        if !stable {
            return Ok(());
        }

        let slot = index as i32;

        let x = (x * f64::from(MAX_X)).round() as i32;
        let y = (y * f64::from(MAX_Y)).round() as i32;

        let angle = (orientation * 180.0).round() as i32;
        let major = (major * f64::from(DIAGONAL)).round() as i32;
        let minor = (minor * f64::from(DIAGONAL)).round() as i32;

        Self::write(&self.touch, EventCode::EV_ABS(EV_ABS::ABS_MT_SLOT), slot)?;
        Self::write(
            &self.touch,
            EventCode::EV_ABS(EV_ABS::ABS_MT_TRACKING_ID),
            slot,
        )?;
        Self::write(&self.touch, EventCode::EV_ABS(EV_ABS::ABS_MT_POSITION_X), x)?;
        Self::write(&self.touch, EventCode::EV_ABS(EV_ABS::ABS_MT_POSITION_Y), y)?;
        Self::write(
            &self.touch,
            EventCode::EV_ABS(EV_ABS::ABS_MT_ORIENTATION),
            angle,
        )?;
        Self::write(
            &self.touch,
            EventCode::EV_ABS(EV_ABS::ABS_MT_TOUCH_MAJOR),
            major,
        )?;
        Self::write(
            &self.touch,
            EventCode::EV_ABS(EV_ABS::ABS_MT_TOUCH_MINOR),
            minor,
        )?;

        Ok(())
    }

    fn emit_contact_lift(&mut self, index: usize) -> Result<(), SinkError> {
        Self::write(
            &self.touch,
            EventCode::EV_ABS(EV_ABS::ABS_MT_SLOT),
            index as i32,
        )?;
        Self::write(&self.touch, EventCode::EV_ABS(EV_ABS::ABS_MT_TRACKING_ID), -1)?;

        Ok(())
    }

    fn emit_stylus(&mut self, stylus: &Stylus) -> Result<(), SinkError> {
        let btn_pen = stylus.proximity && !stylus.rubber;
        let btn_rubber = stylus.proximity && stylus.rubber;

        let x = (stylus.x * f64::from(MAX_X)).round() as i32;
        let y = (stylus.y * f64::from(MAX_Y)).round() as i32;
        let pressure = (stylus.pressure * f64::from(MAX_PRESSURE_MPP_1_51)).round() as i32;

        let (tilt_x, tilt_y) = calculate_tilt(stylus.altitude, stylus.azimuth);

        Self::write(
            &self.stylus,
            EventCode::EV_KEY(EV_KEY::BTN_TOUCH),
            stylus.contact as i32,
        )?;
        Self::write(
            &self.stylus,
            EventCode::EV_KEY(EV_KEY::BTN_TOOL_PEN),
            btn_pen as i32,
        )?;
        Self::write(
            &self.stylus,
            EventCode::EV_KEY(EV_KEY::BTN_TOOL_RUBBER),
            btn_rubber as i32,
        )?;
        Self::write(
            &self.stylus,
            EventCode::EV_KEY(EV_KEY::BTN_STYLUS),
            stylus.button as i32,
        )?;

        Self::write(&self.stylus, EventCode::EV_ABS(EV_ABS::ABS_X), x)?;
        Self::write(&self.stylus, EventCode::EV_ABS(EV_ABS::ABS_Y), y)?;
        Self::write(&self.stylus, EventCode::EV_ABS(EV_ABS::ABS_PRESSURE), pressure)?;
        Self::write(&self.stylus, EventCode::EV_ABS(EV_ABS::ABS_TILT_X), tilt_x)?;
        Self::write(&self.stylus, EventCode::EV_ABS(EV_ABS::ABS_TILT_Y), tilt_y)?;
        Self::write(
            &self.stylus,
            EventCode::EV_ABS(EV_ABS::ABS_MISC),
            i32::from(stylus.timestamp),
        )?;

        Ok(())
    }

    fn emit_stylus_lift(&mut self) -> Result<(), SinkError> {
        Self::write(&self.stylus, EventCode::EV_KEY(EV_KEY::BTN_TOUCH), 0)?;
        Self::write(&self.stylus, EventCode::EV_KEY(EV_KEY::BTN_TOOL_PEN), 0)?;
        Self::write(&self.stylus, EventCode::EV_KEY(EV_KEY::BTN_TOOL_RUBBER), 0)?;
        Self::write(&self.stylus, EventCode::EV_KEY(EV_KEY::BTN_STYLUS), 0)?;

        Ok(())
    }

    fn emit_button(&mut self, active: bool, _pressure: f64) -> Result<(), SinkError> {
        Self::write(
            &self.touch,
            EventCode::EV_KEY(EV_KEY::BTN_LEFT),
            active as i32,
        )?;

        Ok(())
    }

    fn sync(&mut self) -> Result<(), SinkError> {
        Self::write(&self.touch, EventCode::EV_SYN(EV_SYN::SYN_REPORT), 0)?;
        Self::write(&self.stylus, EventCode::EV_SYN(EV_SYN::SYN_REPORT), 0)?;

        Ok(())
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vertical_pen_has_no_tilt() {
        let (tx, ty) = calculate_tilt(FRAC_PI_2, 0.0);
        assert_eq!((tx, ty), (0, 0));
    }

    #[test]
    fn unsupported_altitude_maps_to_zero() {
        assert_eq!(calculate_tilt(0.0, 1.0), (0, 0));
    }

    #[test]
    fn forty_five_degrees_towards_x() {
        let (tx, ty) = calculate_tilt(std::f64::consts::FRAC_PI_4, 0.0);
        assert_eq!(tx, 4500);
        assert_eq!(ty, 0);
    }

    #[test]
    fn forty_five_degrees_towards_y() {
        let (tx, ty) = calculate_tilt(std::f64::consts::FRAC_PI_4, FRAC_PI_2);
        assert_eq!(tx, 0);
        assert_eq!(ty, 4500);
    }

    #[test]
    fn tilt_flips_with_azimuth() {
        let (tx, _) = calculate_tilt(std::f64::consts::FRAC_PI_4, std::f64::consts::PI);
        assert_eq!(tx, -4500);
    }
}
