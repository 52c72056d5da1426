//! Local maxima search on the blurred heatmap.

use super::Image;

/// Searches for all local maxima above the threshold.
///
/// Entries are compared with the following kernel:
///
/// ```text
///   [< ] [< ] [< ]
///   [< ] [  ] [<=]
///   [<=] [<=] [<=]
/// ```
///
/// Half of the neighbors use "less than", the other half "less or equal".
/// On a plateau of equal values exactly one cell wins (the one whose
/// preceding neighbors are all strictly smaller), so flat-topped contacts
/// are neither dropped nor reported twice.
///
/// Found points are appended to `maximas` as `(x, y)` pairs in scan order.
pub fn find(data: &Image<f64>, threshold: f64, maximas: &mut Vec<(usize, usize)>) {
    let rows = data.rows();
    let cols = data.cols();

    maximas.clear();

    for y in 0..rows {
        let can_up = y > 0;
        let can_down = y + 1 < rows;

        for x in 0..cols {
            let value = data[(y, x)];

            if value <= threshold {
                continue;
            }

            let can_left = x > 0;
            let can_right = x + 1 < cols;

            let mut max = true;

            if can_left {
                max &= data[(y, x - 1)] < value;
            }

            if can_right {
                max &= data[(y, x + 1)] <= value;
            }

            if can_up {
                max &= data[(y - 1, x)] < value;

                if can_left {
                    max &= data[(y - 1, x - 1)] < value;
                }

                if can_right {
                    max &= data[(y - 1, x + 1)] <= value;
                }
            }

            if can_down {
                max &= data[(y + 1, x)] <= value;

                if can_left {
                    max &= data[(y + 1, x - 1)] <= value;
                }

                if can_right {
                    max &= data[(y + 1, x + 1)] <= value;
                }
            }

            if max {
                maximas.push((x, y));
            }
        }
    }
}
