//! Human-readable error descriptions and structured JSON error formatting.

use serde_json::json;
use tms_core::error::{BuildError, TmsError};

/// Map an eyre::Report to a human-readable explanation with likely causes and fix hints.
pub fn humanize(err: &eyre::Report) -> String {
    // Typed matches first
    if let Some(be) = err.downcast_ref::<BuildError>() {
        return match be {
            BuildError::MissingIo => {
                "What happened: No I/O backend was provided to the controller.\nLikely causes: GPIO failed to initialize or was not wired into the builder.\nHow to fix: Ensure the backend is created successfully and passed via with_io(...).".to_string()
            }
            BuildError::MissingMachine => {
                "What happened: No machine description was provided to the controller.\nLikely causes: The config was not mapped into a MachineCfg.\nHow to fix: Pass the mapped config via with_machine(...).".to_string()
            }
            BuildError::InvalidConfig(msg) => format!(
                "What happened: Invalid configuration ({msg}).\nLikely causes: Missing or out-of-range values in the TOML.\nHow to fix: Edit the config file, then rerun. See etc/tms_config.toml for a sample."
            ),
        };
    }

    if let Some(te) = err.downcast_ref::<TmsError>() {
        return match te {
            TmsError::LoadTimeout { slot, travelled_mm } => format!(
                "What happened: Slot {slot} fed {travelled_mm:.1} mm without reaching its presence sensor.\nLikely causes: Filament not gripped by the feeder, tangled spool, or max_load_distance too short for the tube.\nHow to fix: Check the filament path of slot {slot}, or raise motion.max_load_distance."
            ),
            TmsError::Jam { slot, reason } => format!(
                "What happened: Slot {slot} jammed ({reason}).\nLikely causes: Filament stuck in the selector, a stuck sensor, or a blocked shared path.\nHow to fix: Clear the path by hand, then run `tms reset --slot {slot}`."
            ),
            TmsError::GateBusy { requested, owner } => format!(
                "What happened: Slot {requested} cannot use the selector while slot {owner} holds it.\nLikely causes: Slot {owner} is still loaded or mid-sequence.\nHow to fix: Unload slot {owner} first (`tms unload --slot {owner}`)."
            ),
            TmsError::BufferStarvation { slot, fed_mm } => format!(
                "What happened: The buffer did not report tension after feeding {fed_mm:.1} mm from slot {slot}.\nLikely causes: Filament broke or slipped between slot and buffer, or the buffer sensor is miswired.\nHow to fix: Inspect the path, then run `tms reset --slot {slot}`; adjust buffer.preload_max_distance if the path is long."
            ),
            TmsError::NoFilament { slot } => format!(
                "What happened: Slot {slot} has no filament at its entry sensor.\nLikely causes: Spool empty or filament not inserted.\nHow to fix: Insert filament into slot {slot} and retry."
            ),
            TmsError::InvalidState { slot, state } => format!(
                "What happened: Slot {slot} cannot accept this command while {state}.\nLikely causes: A previous error is latched or a sequence is still running.\nHow to fix: Check `tms status`; clear errors with `tms reset --slot {slot}`."
            ),
            TmsError::Hardware(msg) => format!(
                "What happened: The I/O backend failed ({msg}).\nLikely causes: Wiring, power, or GPIO permission problems.\nHow to fix: Verify pins in the config and that the process may access GPIO."
            ),
            TmsError::Halted => {
                "What happened: The run was stopped by the operator.\nLikely causes: Ctrl-C was pressed.\nHow to fix: Check the slot states with `tms status` before the next command.".to_string()
            }
            // Fallback to generic for other domain errors
            other => format!(
                "What happened: {other}.\nLikely causes: See logs.\nHow to fix: Re-run with --log-level=debug or set RUST_LOG for more detail."
            ),
        };
    }

    // String-based heuristics for errors coming from init or config
    let msg = err.to_string();
    let lower = msg.to_ascii_lowercase();

    if lower.contains("read config") {
        return format!(
            "What happened: Could not read the config file ({msg}).\nLikely causes: Wrong --config path or missing permissions.\nHow to fix: Pass --config pointing at a readable TOML file."
        );
    }

    if lower.contains("parse config") {
        let cause = err.root_cause();
        return format!(
            "What happened: The config file is not valid TOML for this controller.\nLikely causes: Typo, wrong value type, or a missing required key. Cause: {cause}\nHow to fix: Compare with etc/tms_config.toml and fix the reported key."
        );
    }

    if lower.contains("invalid configuration") {
        let cause = err.root_cause();
        return format!(
            "What happened: Configuration is invalid or incomplete ({cause}).\nLikely causes: Out-of-range values or a pin assigned twice.\nHow to fix: Edit the TOML config and try again."
        );
    }

    if lower.contains("open gpio") {
        return "What happened: Failed to initialize GPIO lines.\nLikely causes: Incorrect pin numbers or insufficient GPIO permissions.\nHow to fix: Fix the pin values in the config; ensure the process has permission to access GPIO.".to_string();
    }

    // Generic fallback
    let mut cause = String::new();
    if let Some(src) = err.source() {
        cause = format!(" Cause: {src}");
    }
    format!(
        "Something went wrong.{cause}\nHow to fix: Re-run with --log-level=debug for details. Original: {msg}"
    )
}

/// Controller errors exit with `10 + code`; everything else exits with 1.
pub fn exit_code_for_error(err: &eyre::Report) -> i32 {
    match err.downcast_ref::<TmsError>() {
        Some(te) => 10 + i32::from(te.kind().code()),
        None => 1,
    }
}

/// Structured JSON for errors when --json is enabled.
pub fn format_error_json(err: &eyre::Report) -> String {
    let msg = humanize(err);
    let Some(te) = err.downcast_ref::<TmsError>() else {
        return json!({ "reason": "Error", "message": msg }).to_string();
    };

    let details = match te {
        TmsError::LoadTimeout { slot, travelled_mm } => {
            Some(json!({ "slot": slot, "travelled_mm": travelled_mm }))
        }
        TmsError::Jam { slot, reason } => Some(json!({ "slot": slot, "reason": reason })),
        TmsError::GateBusy { requested, owner } => {
            Some(json!({ "requested": requested, "owner": owner }))
        }
        TmsError::BufferStarvation { slot, fed_mm } => {
            Some(json!({ "slot": slot, "fed_mm": fed_mm }))
        }
        TmsError::NoFilament { slot } => Some(json!({ "slot": slot })),
        TmsError::InvalidState { slot, state } => Some(json!({ "slot": slot, "state": state })),
        TmsError::Stalled { ticks } => Some(json!({ "ticks": ticks })),
        _ => None,
    };

    let kind = te.kind();
    let obj = if let Some(d) = details {
        json!({ "reason": kind.name(), "code": kind.code(), "details": d, "message": msg })
    } else {
        json!({ "reason": kind.name(), "code": kind.code(), "message": msg })
    };
    obj.to_string()
}
