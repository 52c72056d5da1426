//! Frame-to-frame contact tracking.

use super::{Contact, Image};

/// Assigns stable indices to contacts by matching them against the
/// previous frame.
///
/// Matching is greedy nearest-neighbor on the full distance matrix: find
/// the globally closest pair, link it, strike out its row and column,
/// repeat. With at most ten contacts per frame this is far below the cost
/// of a proper assignment solver and empirically just as good, since
/// fingers rarely move more than a few cells per frame.
#[derive(Default)]
pub struct Tracker {
    // The contacts of the last frame.
    last: Vec<Contact>,

    // Distances between all contacts of the current and the last frame.
    distances: Image<f64>,
}

impl Tracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Forgets the stored previous frame.
    pub fn reset(&mut self) {
        self.last.clear();
    }

    /// Tracks all contacts of a frame, assigning each an index.
    pub fn track(&mut self, frame: &mut [Contact]) {
        // Assign fresh unique indices to all contacts first.
        let mut counter = 0;
        for contact in frame.iter_mut() {
            let index = self.find_new_index(counter);
            contact.index = Some(index);
            counter = index + 1;
        }

        if !self.last.is_empty() && !frame.is_empty() {
            let rows = self.last.len();
            let cols = frame.len();

            self.distances.resize(rows, cols);

            for (y, last) in self.last.iter().enumerate() {
                for (x, current) in frame.iter().enumerate() {
                    self.distances[(y, x)] = (current.mean - last.mean).hypot();
                }
            }

            // Copy the old indices over for as many contacts as both
            // frames share.
            for _ in 0..rows.min(cols) {
                let (y, x) = self.min_position();

                frame[x].index = self.last[y].index;

                for c in 0..cols {
                    self.distances[(y, c)] = f64::INFINITY;
                }
                for r in 0..rows {
                    self.distances[(r, x)] = f64::INFINITY;
                }
            }
        }

        self.last.clear();
        self.last.extend_from_slice(frame);
    }

    /// The position of the global minimum of the distance matrix.
    /// Ties resolve to the first hit in row-major order.
    fn min_position(&self) -> (usize, usize) {
        let mut min = f64::INFINITY;
        let mut pos = (0, 0);

        for y in 0..self.distances.rows() {
            for x in 0..self.distances.cols() {
                if self.distances[(y, x)] < min {
                    min = self.distances[(y, x)];
                    pos = (y, x);
                }
            }
        }

        pos
    }

    /// The smallest index >= `min` that no contact of the last frame uses.
    fn find_new_index(&self, mut min: usize) -> usize {
        while Contact::find_in_frame(min, &self.last).is_some() {
            min += 1;
        }

        min
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::math::Vec2;

    fn contact(x: f64, y: f64) -> Contact {
        Contact {
            mean: Vec2::new(x, y),
            ..Contact::default()
        }
    }

    fn indices(frame: &[Contact]) -> Vec<usize> {
        frame.iter().map(|c| c.index.unwrap()).collect()
    }

    #[test]
    fn first_frame_gets_sequential_indices() {
        let mut tracker = Tracker::new();
        let mut frame = vec![contact(0.1, 0.1), contact(0.5, 0.5), contact(0.9, 0.9)];

        tracker.track(&mut frame);
        assert_eq!(indices(&frame), vec![0, 1, 2]);
    }

    #[test]
    fn identical_frame_keeps_indices() {
        let mut tracker = Tracker::new();

        let mut frame = vec![contact(0.2, 0.3), contact(0.7, 0.6)];
        tracker.track(&mut frame);

        let mut repeat = vec![contact(0.2, 0.3), contact(0.7, 0.6)];
        tracker.track(&mut repeat);

        assert_eq!(indices(&frame), indices(&repeat));
    }

    #[test]
    fn moved_contacts_keep_their_index() {
        let mut tracker = Tracker::new();

        let mut first = vec![contact(0.2, 0.2), contact(0.8, 0.8)];
        tracker.track(&mut first);

        // Both contacts moved slightly, and their order flipped.
        let mut second = vec![contact(0.75, 0.8), contact(0.25, 0.2)];
        tracker.track(&mut second);

        assert_eq!(second[0].index, Some(1));
        assert_eq!(second[1].index, Some(0));
    }

    #[test]
    fn indices_are_unique_per_frame() {
        let mut tracker = Tracker::new();

        let mut first = vec![contact(0.1, 0.1), contact(0.5, 0.5)];
        tracker.track(&mut first);

        // More contacts than before: new ones must get unused indices.
        let mut second = vec![
            contact(0.1, 0.1),
            contact(0.5, 0.5),
            contact(0.9, 0.1),
            contact(0.9, 0.9),
        ];
        tracker.track(&mut second);

        let mut seen = indices(&second);
        seen.sort_unstable();
        seen.dedup();
        assert_eq!(seen.len(), second.len());

        // The survivors kept their identity.
        assert_eq!(second[0].index, Some(0));
        assert_eq!(second[1].index, Some(1));
    }

    #[test]
    fn lifted_contact_frees_its_index_only_after_a_frame() {
        let mut tracker = Tracker::new();

        let mut first = vec![contact(0.1, 0.1), contact(0.9, 0.9)];
        tracker.track(&mut first);

        // Contact 0 lifted; the remaining one keeps index 1.
        let mut second = vec![contact(0.9, 0.9)];
        tracker.track(&mut second);
        assert_eq!(indices(&second), vec![1]);

        // A new contact appears; the survivor keeps index 1 and the new
        // contact receives an index that is unused in the previous frame.
        let mut third = vec![contact(0.9, 0.9), contact(0.2, 0.2)];
        tracker.track(&mut third);
        assert_eq!(third[0].index, Some(1));
        assert_eq!(third[1].index, Some(2));
    }

    #[test]
    fn reset_forgets_history() {
        let mut tracker = Tracker::new();

        let mut first = vec![contact(0.4, 0.4)];
        tracker.track(&mut first);

        tracker.reset();

        let mut second = vec![contact(0.4, 0.4)];
        tracker.track(&mut second);
        assert_eq!(indices(&second), vec![0]);
    }
}
