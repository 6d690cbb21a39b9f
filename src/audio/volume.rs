//! Mapping between AirTunes volume and device gain
//!
//! Senders express volume in dB between -30 and 0, with -144 meaning
//! mute. Devices expose a linear gain range; the mapping between the two
//! is linear and clamped at both ends.

/// Quietest audible AirTunes volume
pub const AIRTUNES_MIN_DB: f32 = -30.0;
/// Loudest AirTunes volume
pub const AIRTUNES_MAX_DB: f32 = 0.0;
/// Volume senders use to mute
pub const AIRTUNES_MUTE_DB: f32 = -144.0;

/// Linear mapping onto a device gain range
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GainMapping {
    /// Device gain at -30 dB
    pub device_min: f32,
    /// Device gain at 0 dB
    pub device_max: f32,
}

impl GainMapping {
    /// Map onto `[device_min, device_max]`
    #[must_use]
    pub fn new(device_min: f32, device_max: f32) -> Self {
        Self {
            device_min,
            device_max,
        }
    }

    /// Convert an AirTunes dB volume to device gain
    ///
    /// Values at or below the mute level map to the device minimum.
    #[must_use]
    pub fn to_device(&self, airtunes_db: f32) -> f32 {
        if airtunes_db <= AIRTUNES_MUTE_DB || airtunes_db.is_nan() {
            return self.device_min;
        }

        let fraction = (airtunes_db - AIRTUNES_MIN_DB) / (AIRTUNES_MAX_DB - AIRTUNES_MIN_DB);
        let gain = fraction * (self.device_max - self.device_min) + self.device_min;
        clamp_between(gain, self.device_min, self.device_max)
    }

    /// Convert a device gain back to an AirTunes dB volume in `[-30, 0]`
    #[must_use]
    pub fn to_airtunes(&self, device_gain: f32) -> f32 {
        let span = self.device_max - self.device_min;
        if span == 0.0 {
            return AIRTUNES_MAX_DB;
        }

        let fraction = (device_gain - self.device_min) / span;
        let db = fraction * (AIRTUNES_MAX_DB - AIRTUNES_MIN_DB) + AIRTUNES_MIN_DB;
        db.clamp(AIRTUNES_MIN_DB, AIRTUNES_MAX_DB)
    }
}

impl Default for GainMapping {
    fn default() -> Self {
        Self::new(0.0, 1.0)
    }
}

/// Clamp without requiring `a <= b`
fn clamp_between(value: f32, a: f32, b: f32) -> f32 {
    value.max(a.min(b)).min(a.max(b))
}
