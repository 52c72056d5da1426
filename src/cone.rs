//! The stylus rejection cone.
//!
//! While a pen is in use, the hand holding it rests on the screen somewhere
//! "behind" the tip. The cone tracks the tip position (written by the
//! stylus path) and a smoothed direction towards the detected palms; touch
//! contacts inside the cone are treated as palms by the touch path.
//!
//! All coordinates are physical (centimeters). Timestamps are passed in by
//! the caller, which keeps the state machine deterministic under test; the
//! daemon simply passes `Instant::now()`.

use std::time::{Duration, Instant};

/// A cone only rejects contacts if its position was updated recently.
const LIFETIME: Duration = Duration::from_millis(300);

pub struct Cone {
    position_update: Option<Instant>,
    direction_update: Option<Instant>,

    // The tip of the cone.
    x: f64,
    y: f64,

    // The unit direction the cone opens towards.
    dx: f64,
    dy: f64,

    // The cosine of the half opening angle.
    angle: f64,

    // How far from the tip the cone reaches, in centimeters.
    distance: f64,
}

impl Cone {
    /// Creates a cone with the given opening half-angle (degrees) and
    /// reach (centimeters).
    pub fn new(angle_deg: f64, distance: f64) -> Self {
        Self {
            position_update: None,
            direction_update: None,
            x: 0.0,
            y: 0.0,
            dx: 0.0,
            dy: 0.0,
            angle: angle_deg.to_radians().cos(),
            distance,
        }
    }

    /// Whether the cone has ever seen a position update.
    pub fn alive(&self) -> bool {
        self.position_update.is_some()
    }

    /// Whether the cone has seen a position update within its lifetime.
    pub fn active(&self, now: Instant) -> bool {
        match self.position_update {
            Some(at) => now.saturating_duration_since(at) <= LIFETIME,
            None => false,
        }
    }

    /// Moves the tip of the cone.
    pub fn update_position(&mut self, x: f64, y: f64, now: Instant) {
        self.x = x;
        self.y = y;
        self.position_update = Some(now);
    }

    /// The current tip of the cone, i.e. the last known stylus position.
    pub fn position(&self) -> (f64, f64) {
        (self.x, self.y)
    }

    /// Turns the cone towards the given point.
    ///
    /// The direction is an exponentially weighted average: the old
    /// direction decays with 2^-dt, so a palm that just moved dominates
    /// while long-gone readings fade out.
    pub fn update_direction(&mut self, x: f64, y: f64, now: Instant) {
        let weight = match self.direction_update {
            Some(at) => (-now.saturating_duration_since(at).as_secs_f64()).exp2(),
            None => 0.0,
        };

        let dist = (self.x - x).hypot(self.y - y);

        let dx = (x - self.x) / (dist + 1e-6);
        let dy = (y - self.y) / (dist + 1e-6);

        self.dx = weight * self.dx + dx;
        self.dy = weight * self.dy + dy;

        // Re-normalize the direction vector.
        let norm = self.dx.hypot(self.dy) + 1e-6;
        self.dx /= norm;
        self.dy /= norm;

        self.direction_update = Some(now);
    }

    /// Whether the given point is covered by the cone.
    pub fn check(&self, x: f64, y: f64, now: Instant) -> bool {
        if !self.active(now) {
            return false;
        }

        let dx = x - self.x;
        let dy = y - self.y;
        let dist = dx.hypot(dy);

        if dist > self.distance {
            return false;
        }

        dx * self.dx + dy * self.dy >= self.angle * dist
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cone_at(x: f64, y: f64, towards: (f64, f64), now: Instant) -> Cone {
        let mut cone = Cone::new(30.0, 5.0);
        cone.update_position(x, y, now);
        cone.update_direction(towards.0, towards.1, now);
        cone
    }

    #[test]
    fn unborn_cone_rejects_nothing() {
        let cone = Cone::new(30.0, 5.0);
        let now = Instant::now();

        assert!(!cone.alive());
        assert!(!cone.check(0.0, 0.0, now));
    }

    #[test]
    fn point_ahead_is_covered() {
        let now = Instant::now();
        let cone = cone_at(5.0, 5.0, (7.0, 5.0), now);

        assert!(cone.check(6.0, 5.0, now));
    }

    #[test]
    fn point_behind_is_not_covered() {
        let now = Instant::now();
        let cone = cone_at(5.0, 5.0, (7.0, 5.0), now);

        assert!(!cone.check(3.0, 5.0, now));
    }

    #[test]
    fn point_outside_the_opening_angle_is_not_covered() {
        let now = Instant::now();
        let cone = cone_at(5.0, 5.0, (7.0, 5.0), now);

        // 45 degrees off axis, outside the 30 degree half-angle.
        assert!(!cone.check(6.0, 6.0, now));

        // 15 degrees off axis is inside.
        let off = 15.0f64.to_radians().tan();
        assert!(cone.check(6.0, 5.0 + off, now));
    }

    #[test]
    fn point_beyond_the_reach_is_not_covered() {
        let now = Instant::now();
        let cone = cone_at(5.0, 5.0, (7.0, 5.0), now);

        assert!(!cone.check(11.0, 5.0, now));
    }

    #[test]
    fn cone_decays_after_its_lifetime() {
        let now = Instant::now();
        let cone = cone_at(5.0, 5.0, (7.0, 5.0), now);

        let soon = now + Duration::from_millis(200);
        assert!(cone.active(soon));
        assert!(cone.check(6.0, 5.0, soon));

        let later = now + Duration::from_millis(400);
        assert!(!cone.active(later));
        assert!(!cone.check(6.0, 5.0, later));

        // Decayed, but still alive: a new position update revives it.
        assert!(cone.alive());
    }

    #[test]
    fn direction_follows_recent_updates() {
        let now = Instant::now();
        let mut cone = cone_at(0.0, 0.0, (1.0, 0.0), now);

        // Seconds later, palms appear in the opposite direction; the old
        // direction has decayed to almost nothing.
        let later = now + Duration::from_secs(10);
        cone.update_position(0.0, 0.0, later);
        cone.update_direction(-1.0, 0.0, later);

        assert!(cone.check(-0.5, 0.0, later));
        assert!(!cone.check(0.5, 0.0, later));
    }
}
