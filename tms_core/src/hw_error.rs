//! Maps `Box<dyn Error>` from the I/O boundary to typed `TmsError`.
//!
//! `tms_traits::DigitalIo` returns boxed errors; this module converts them,
//! with an optional feature-gated path for `tms_hardware::HwError`.

use crate::error::TmsError;

/// Map a trait-boundary error to a typed `TmsError`.
pub fn map_hw_error(e: &(dyn std::error::Error + 'static)) -> TmsError {
    #[cfg(feature = "hardware-errors")]
    {
        if let Some(hw) = e.downcast_ref::<tms_hardware::HwError>() {
            return match hw {
                tms_hardware::HwError::UnmappedLine(_) => TmsError::Config(hw.to_string()),
                other => TmsError::Hardware(other.to_string()),
            };
        }
    }

    TmsError::Hardware(e.to_string())
}

/// Convenience for `map_err` on boxed boundary errors.
pub(crate) fn from_boxed(e: Box<dyn std::error::Error + Send + Sync>) -> TmsError {
    map_hw_error(e.as_ref())
}
