//! Estimation of the neutral value of a heatmap.
//!
//! The neutral value marks "no touch"; everything at or below it is noise.
//! It drifts with temperature and grounding, so it is re-estimated from the
//! data instead of being hardcoded.

use super::Image;

use serde::Deserialize;

use std::collections::HashMap;

/// How the neutral value of the heatmap is calculated.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NeutralMode {
    /// The most common value (statistical mode) is used.
    #[default]
    Mode,

    /// The average of all values is used.
    Average,

    /// A constant value from the config is used.
    Constant,
}

/// Calculates the neutral value of a heatmap.
///
/// The offset is added to the calculated value; for [`NeutralMode::Constant`]
/// it *is* the neutral value.
pub fn calculate(heatmap: &Image<f64>, mode: NeutralMode, offset: f64) -> f64 {
    match mode {
        NeutralMode::Mode => statistical_mode(heatmap) + offset,
        NeutralMode::Average => average(heatmap) + offset,
        NeutralMode::Constant => offset,
    }
}

fn average(heatmap: &Image<f64>) -> f64 {
    let data = heatmap.data();

    if data.is_empty() {
        return 0.0;
    }

    data.iter().sum::<f64>() / data.len() as f64
}

/// The most frequent value in the heatmap.
///
/// The input values stem from 8-bit samples, so despite being floats they
/// are heavily quantized and counting exact values is meaningful.
fn statistical_mode(heatmap: &Image<f64>) -> f64 {
    let mut counts: HashMap<u64, u32> = HashMap::new();

    let mut max_count = 0;
    let mut max_element = 0.0;

    for &value in heatmap.data() {
        let count = counts.entry(value.to_bits()).or_insert(0);
        *count += 1;

        if *count > max_count {
            max_count = *count;
            max_element = value;
        }
    }

    max_element
}

#[cfg(test)]
mod tests {
    use super::*;

    fn image_from(values: &[f64], rows: usize, cols: usize) -> Image<f64> {
        let mut img = Image::new(rows, cols);
        img.data_mut().copy_from_slice(values);
        img
    }

    #[test]
    fn mode_picks_most_frequent() {
        let img = image_from(&[0.5, 0.25, 0.5, 0.5, 0.25, 0.75], 2, 3);
        assert_eq!(calculate(&img, NeutralMode::Mode, 0.0), 0.5);
    }

    #[test]
    fn mode_applies_offset() {
        let img = image_from(&[0.5, 0.5, 0.25, 0.25, 0.25, 0.75], 2, 3);
        assert!((calculate(&img, NeutralMode::Mode, 0.1) - 0.35).abs() < 1e-12);
    }

    #[test]
    fn average_is_arithmetic_mean() {
        let img = image_from(&[0.0, 0.5, 1.0, 0.5], 2, 2);
        assert!((calculate(&img, NeutralMode::Average, 0.0) - 0.5).abs() < 1e-12);
    }

    #[test]
    fn constant_ignores_data() {
        let img = image_from(&[0.9, 0.9, 0.9, 0.9], 2, 2);
        assert_eq!(calculate(&img, NeutralMode::Constant, 0.125), 0.125);
    }
}
