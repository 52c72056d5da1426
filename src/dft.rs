//! DFT stylus decoding.
//!
//! HID-native devices do no pen processing in firmware. Instead they send
//! windows of antenna DFT measurements and leave it to us to find the pen:
//! position windows localize the tip, button windows carry the side button
//! and eraser signals in their phase, and pressure windows encode the tip
//! pressure in which transmit frequency resonates strongest.
//!
//! The decoder keeps the assembled stylus state between windows and hands
//! out a fresh sample whenever a position window (or a dropout) changes it.

use crate::config::DftConfig;
use crate::parser::{DftWindow, Stylus};
use crate::protocol::{DftRow, DftType, DFT_NUM_COMPONENTS, DFT_PRESSURE_ROWS};

use std::f64::consts::PI;

/// The squared amplitude of one antenna component.
fn amplitude2(row: &DftRow, i: usize) -> i64 {
    let real = i64::from(row.real[i]);
    let imag = i64::from(row.imag[i]);

    real * real + imag * imag
}

pub struct DftStylus {
    config: DftConfig,

    // The assembled stylus state.
    stylus: Stylus,

    // The phase of the last position signal. The button signal is
    // compared against it: anti-phase means button, in-phase means
    // eraser.
    real: i64,
    imag: i64,
}

impl DftStylus {
    pub fn new(config: DftConfig) -> Self {
        Self {
            config,
            stylus: Stylus::default(),
            real: 0,
            imag: 0,
        }
    }

    /// Processes one DFT window.
    ///
    /// Returns a stylus sample when the window concluded a position
    /// update (or a dropout); button and pressure windows only update the
    /// internal state that the next position sample will carry.
    pub fn input(&mut self, dft: &DftWindow) -> Option<Stylus> {
        match dft.ty {
            DftType::Position | DftType::PositionMpp2 => Some(self.handle_position(dft)),
            DftType::Button => {
                self.handle_button(dft);
                None
            }
            DftType::Pressure => {
                self.handle_pressure(dft);
                None
            }

            // The binary MPP2 subtype is only partially reverse
            // engineered; keep the dispatch open but do nothing.
            DftType::BinaryMpp2 | DftType::Unknown(_) => None,
        }
    }

    /// The current stylus state.
    pub fn stylus(&self) -> Stylus {
        self.stylus
    }

    fn handle_position(&mut self, dft: &DftWindow) -> Stylus {
        if dft.x.len() <= 1 || dft.width <= 1 || dft.height <= 1 {
            return self.lift();
        }

        // The rows are sorted by signal strength; if even the first row
        // is too weak, the stylus has left the antenna range.
        if f64::from(dft.x[0].magnitude) <= self.config.position_min_mag
            || f64::from(dft.y[0].magnitude) <= self.config.position_min_mag
        {
            return self.lift();
        }

        let Some(x) = self.interpolate_position(&dft.x[0]) else {
            return self.lift();
        };
        let Some(y) = self.interpolate_position(&dft.y[0]) else {
            return self.lift();
        };

        // Remember the phase of the position signal for the button
        // windows that follow.
        let center = DFT_NUM_COMPONENTS / 2;
        self.real = i64::from(dft.x[0].real[center]) + i64::from(dft.y[0].real[center]);
        self.imag = i64::from(dft.x[0].imag[center]) + i64::from(dft.y[0].imag[center]);

        let mut px = (x / f64::from(dft.width - 1)).clamp(0.0, 1.0);
        let mut py = (y / f64::from(dft.height - 1)).clamp(0.0, 1.0);

        if self.config.invert_x {
            px = 1.0 - px;
        }

        if self.config.invert_y {
            py = 1.0 - py;
        }

        self.stylus.proximity = true;
        self.stylus.x = px;
        self.stylus.y = py;

        self.update_tilt(dft, x, y);

        self.stylus
    }

    /// Derives altitude and azimuth from the offset between the tip
    /// signal and the secondary (ring) signal in the next row pair.
    fn update_tilt(&mut self, dft: &DftWindow, x: f64, y: f64) {
        if self.config.tilt_distance <= 0.0 {
            return;
        }

        if dft.x.len() < 2 || dft.y.len() < 2 {
            return;
        }

        if f64::from(dft.x[1].magnitude) <= self.config.tilt_min_mag
            || f64::from(dft.y[1].magnitude) <= self.config.tilt_min_mag
        {
            return;
        }

        let Some(xt) = self.interpolate_position(&dft.x[1]) else {
            return;
        };
        let Some(yt) = self.interpolate_position(&dft.y[1]) else {
            return;
        };

        // Scale the antenna offset to physical dimensions.
        let dx = (xt - x) / f64::from(dft.width - 1) * self.config.width;
        let dy = (yt - y) / f64::from(dft.height - 1) * self.config.height;

        let distance = dx.hypot(dy);
        if distance <= 0.0 {
            return;
        }

        let mut azimuth = (-dy).atan2(dx);
        if azimuth < 0.0 {
            azimuth += 2.0 * PI;
        }

        // The ring sits `tilt_distance` centimeters up the barrel; the
        // projected offset between both signals encodes the inclination.
        let altitude = self.config.tilt_distance.atan2(distance);

        self.stylus.azimuth = azimuth;
        self.stylus.altitude = altitude;
    }

    /// Finds the sub-antenna position of the signal peak in a row.
    ///
    /// The strongest of the nine components gives the integer position.
    /// Its two neighbors are projected onto the phase of the peak and the
    /// three amplitudes are pushed through a configurable exponent, which
    /// turns the bell shaped response into something close to a parabola;
    /// the vertex of the parabola through the three points gives the
    /// fractional offset.
    fn interpolate_position(&self, row: &DftRow) -> Option<f64> {
        // Assume the center component has the maximum amplitude, then
        // let the others compete.
        let mut maxi = DFT_NUM_COMPONENTS / 2;

        for i in 0..DFT_NUM_COMPONENTS {
            if amplitude2(row, i) > amplitude2(row, maxi) {
                maxi = i;
            }
        }

        // A peak on the boundary cannot be interpolated.
        if maxi == 0 || maxi == DFT_NUM_COMPONENTS - 1 {
            return None;
        }

        let amp = (amplitude2(row, maxi) as f64).sqrt();
        if amp < self.config.position_min_amp {
            return None;
        }

        // Project the neighbors onto the phase of the peak.
        let sin = f64::from(row.real[maxi]) / amp;
        let cos = f64::from(row.imag[maxi]) / amp;

        let mut shape = [
            sin * f64::from(row.real[maxi - 1]) + cos * f64::from(row.imag[maxi - 1]),
            amp,
            sin * f64::from(row.real[maxi + 1]) + cos * f64::from(row.imag[maxi + 1]),
        ];

        for v in &mut shape {
            *v = v.max(1.0).powf(self.config.position_exp);
        }

        let denom = shape[0] - 2.0 * shape[1] + shape[2];
        if denom.abs() < 1e-12 {
            return Some(f64::from(row.first) + maxi as f64);
        }

        let frac = ((shape[0] - shape[2]) / (2.0 * denom)).clamp(-0.5, 0.5);

        Some(f64::from(row.first) + maxi as f64 + frac)
    }

    /// Decodes the button window. The signal shares the pen frequency:
    /// anti-phase relative to the position signal means the side button,
    /// in-phase means the eraser end is pointing down.
    fn handle_button(&mut self, dft: &DftWindow) {
        if dft.x.is_empty() || dft.y.is_empty() {
            return;
        }

        let mut button = false;
        let mut rubber = false;

        if f64::from(dft.x[0].magnitude) > self.config.button_min_mag
            && f64::from(dft.y[0].magnitude) > self.config.button_min_mag
        {
            let center = DFT_NUM_COMPONENTS / 2;
            let real = i64::from(dft.x[0].real[center]) + i64::from(dft.y[0].real[center]);
            let imag = i64::from(dft.x[0].imag[center]) + i64::from(dft.y[0].imag[center]);

            let phase = self.real * real + self.imag * imag;

            button = phase < 0;
            rubber = phase > 0;
        }

        self.stylus.button = button;
        self.stylus.rubber = rubber;
    }

    /// Decodes the pressure window: the pen resonates on one of several
    /// frequencies depending on how hard the tip is pressed, and the
    /// fractional index of the strongest row maps linearly to pressure.
    fn handle_pressure(&mut self, dft: &DftWindow) {
        let Some(p) = self.interpolate_frequency(dft, DFT_PRESSURE_ROWS) else {
            return;
        };

        let pressure = 1.0 - p;

        if pressure > 0.0 {
            self.stylus.contact = true;
            self.stylus.pressure = pressure.clamp(0.0, 1.0);
        } else {
            self.stylus.contact = false;
            self.stylus.pressure = 0.0;
        }
    }

    /// Interpolates the strongest row index over the first `rows` rows,
    /// normalized to [0, 1]. All rows measure the same antennas on
    /// different frequencies, so X and Y magnitudes are summed.
    fn interpolate_frequency(&self, dft: &DftWindow, rows: usize) -> Option<f64> {
        if rows < 3 || dft.x.len() < rows || dft.y.len() < rows {
            return None;
        }

        let sum = |i: usize| u64::from(dft.x[i].magnitude) + u64::from(dft.y[i].magnitude);

        let mut maxi = 0;
        let mut maxm = 0;

        for i in 0..rows {
            if sum(i) > maxm {
                maxm = sum(i);
                maxi = i;
            }
        }

        if (maxm as f64) < 2.0 * self.config.freq_min_mag {
            return None;
        }

        // The peak row clamps to the interior so all three samples of the
        // parabola exist; the allowed fraction widens accordingly.
        let mut min_frac = -0.5;
        let mut max_frac = 0.5;

        if maxi < 1 {
            maxi = 1;
            min_frac = -1.0;
        } else if maxi > rows - 2 {
            maxi = rows - 2;
            max_frac = 1.0;
        }

        let m = [sum(maxi - 1) as f64, sum(maxi) as f64, sum(maxi + 1) as f64];

        let denom = m[0] - 2.0 * m[1] + m[2];

        let frac = if denom.abs() < 1e-12 {
            0.0
        } else {
            ((m[0] - m[2]) / (2.0 * denom)).clamp(min_frac, max_frac)
        };

        Some((maxi as f64 + frac) / (rows - 1) as f64)
    }

    /// The stylus has left the antenna range; reset everything.
    fn lift(&mut self) -> Stylus {
        self.stylus = Stylus::default();
        self.stylus
    }
}
