//! Contact validation: size and aspect plausibility checks.
//!
//! A fingertip has a fairly narrow range of sizes and is roughly round; a
//! resting palm is large, a hovering thumb edge is long and thin. Contacts
//! outside the configured bounds are marked invalid so the sink can
//! suppress them. They stay tracked and stabilized regardless, because a
//! palm that stops being emitted still occupies its slot.

use super::Contact;

#[derive(Debug, Clone, Copy)]
pub struct ValidatorConfig {
    /// Whether validity is tracked over multiple frames. If set, a contact
    /// that was invalid once stays invalid until it is lifted.
    pub track_validity: bool,

    /// (min, max) bounds for the aspect ratio of a valid contact.
    pub aspect_limits: Option<(f64, f64)>,

    /// (min, max) bounds for the major axis of a valid contact.
    pub size_limits: Option<(f64, f64)>,
}

impl Default for ValidatorConfig {
    fn default() -> Self {
        Self {
            track_validity: true,
            aspect_limits: None,
            size_limits: None,
        }
    }
}

pub struct Validator {
    config: ValidatorConfig,

    // The contacts of the last frame.
    last: Vec<Contact>,
}

impl Validator {
    pub fn new(config: ValidatorConfig) -> Self {
        Self {
            config,
            last: Vec::new(),
        }
    }

    /// Forgets the stored previous frame.
    pub fn reset(&mut self) {
        self.last.clear();
    }

    /// Checks the validity of all contacts of a frame.
    pub fn validate(&mut self, frame: &mut [Contact]) {
        for i in 0..frame.len() {
            let valid = self.check_contact(&frame[i]);
            frame[i].valid = Some(valid);
        }

        self.last.clear();
        self.last.extend_from_slice(frame);
    }

    fn check_contact(&self, contact: &Contact) -> bool {
        // Unstable contacts carry unreliable values; don't invalidate them
        // based on a glitch.
        if !contact.stable.unwrap_or(true) {
            return true;
        }

        if self.config.track_validity && !self.check_temporal(contact) {
            return false;
        }

        if !self.check_size(contact) {
            return false;
        }

        if !self.check_aspect(contact) {
            return false;
        }

        true
    }

    /// Whether the contact was valid in the last frame.
    fn check_temporal(&self, contact: &Contact) -> bool {
        // Contacts that can't be tracked are considered temporally valid.
        let Some(index) = contact.index else {
            return true;
        };

        let Some(last) = Contact::find_in_frame(index, &self.last) else {
            return true;
        };

        last.valid.unwrap_or(true)
    }

    fn check_size(&self, contact: &Contact) -> bool {
        let Some((min, max)) = self.config.size_limits else {
            return true;
        };

        let major = contact.major();
        major >= min && major <= max
    }

    fn check_aspect(&self, contact: &Contact) -> bool {
        let Some((min, max)) = self.config.aspect_limits else {
            return true;
        };

        let aspect = contact.major() / contact.minor();
        aspect >= min && aspect <= max
    }
}
