//! Time-window debouncing of digital inputs.

use tms_traits::DigitalIo;

use crate::config::SensorCfg;
use crate::error::Result;

/// Reports the last level that held constant for at least `window_ms`.
///
/// While the input is unstable the previously confirmed level is reported.
/// The first sample seeds the confirmed level.
#[derive(Debug, Clone)]
pub struct Debouncer {
    window_ms: u64,
    stable: Option<bool>,
    last_raw: bool,
    changed_at_ms: u64,
}

impl Debouncer {
    pub fn new(window_ms: u64) -> Self {
        Self {
            window_ms,
            stable: None,
            last_raw: false,
            changed_at_ms: 0,
        }
    }

    /// Feed one sample taken at `now_ms` and return the debounced level.
    pub fn update(&mut self, raw: bool, now_ms: u64) -> bool {
        let Some(stable) = self.stable else {
            self.stable = Some(raw);
            self.last_raw = raw;
            self.changed_at_ms = now_ms;
            return raw;
        };
        if raw != self.last_raw {
            self.last_raw = raw;
            self.changed_at_ms = now_ms;
        }
        if raw != stable && now_ms.saturating_sub(self.changed_at_ms) >= self.window_ms {
            self.stable = Some(raw);
            return raw;
        }
        stable
    }

    /// Last confirmed level, if any sample was seen.
    pub fn stable(&self) -> Option<bool> {
        self.stable
    }

    pub fn window_ms(&self) -> u64 {
        self.window_ms
    }

    /// Forget history; the next sample seeds again.
    pub fn reset(&mut self) {
        self.stable = None;
    }

    /// Forget history and assume `level`; any other level must then hold for
    /// the full window before it is reported.
    pub fn reset_to(&mut self, level: bool) {
        self.stable = Some(level);
        self.last_raw = level;
    }

    /// The last sample differs from the confirmed level.
    pub fn is_settling(&self) -> bool {
        self.stable.is_some_and(|s| s != self.last_raw)
    }
}

/// A configured input with polarity resolution and its own debouncer.
#[derive(Debug, Clone)]
pub struct DebouncedSensor {
    cfg: SensorCfg,
    debouncer: Debouncer,
}

impl DebouncedSensor {
    pub fn new(cfg: SensorCfg, window_ms: u64) -> Self {
        Self {
            cfg,
            debouncer: Debouncer::new(window_ms),
        }
    }

    /// Sample the line and return the debounced logical state.
    pub fn poll(&mut self, io: &mut dyn DigitalIo, now_ms: u64) -> Result<bool> {
        let active = self.cfg.read(io)?;
        Ok(self.debouncer.update(active, now_ms))
    }

    pub fn last(&self) -> Option<bool> {
        self.debouncer.stable()
    }

    pub fn reset(&mut self) {
        self.debouncer.reset();
    }

    pub fn reset_to(&mut self, active: bool) {
        self.debouncer.reset_to(active);
    }

    pub fn is_settling(&self) -> bool {
        self.debouncer.is_settling()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_sample_seeds() {
        let mut d = Debouncer::new(10);
        assert!(d.update(true, 0));
        assert_eq!(d.stable(), Some(true));
    }

    #[test]
    fn short_glitch_is_rejected() {
        let mut d = Debouncer::new(10);
        d.update(false, 0);
        assert!(!d.update(true, 1));
        assert!(!d.update(true, 9));
        assert!(!d.update(false, 10));
        assert!(!d.update(false, 30));
    }

    #[test]
    fn held_change_is_confirmed_after_window() {
        let mut d = Debouncer::new(10);
        d.update(false, 0);
        assert!(!d.update(true, 5));
        assert!(!d.update(true, 14));
        assert!(d.update(true, 15));
    }

    #[test]
    fn reset_to_level_debounces_the_first_sample() {
        let mut d = Debouncer::new(500);
        d.reset_to(false);
        assert!(!d.update(true, 0));
        assert!(d.is_settling());
        assert!(!d.update(true, 1));
        assert!(!d.update(true, 499));
        assert!(d.update(true, 500));
        assert!(!d.is_settling());
    }

    #[test]
    fn zero_window_passes_through() {
        let mut d = Debouncer::new(0);
        d.update(false, 0);
        assert!(d.update(true, 0));
        assert!(!d.update(false, 0));
    }
}
