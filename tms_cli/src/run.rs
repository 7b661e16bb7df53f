//! Config loading, backend assembly and command execution.

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use eyre::WrapErr;
use serde_json::{Value, json};
use tms_config::{Config, Level};
use tms_core::{
    Controller, MachineCfg, RunParams, SlotStatus, Status, load_blocking, service_for,
    unload_blocking,
};
use tms_hardware::{SimBuffer, SimMotor, SimSelector, SimSlot, SimulatedIo};
use tms_traits::{Clock, DigitalIo, MonotonicClock};

use crate::cli::Commands;

/// Read, parse and validate the typed config.
pub fn load_config(path: &Path) -> eyre::Result<Config> {
    let text = std::fs::read_to_string(path)
        .wrap_err_with(|| format!("read config {}", path.display()))?;
    let cfg: Config =
        toml::from_str(&text).wrap_err_with(|| format!("parse config {}", path.display()))?;
    cfg.validate().wrap_err("invalid configuration")?;
    Ok(cfg)
}

/// Simulated machine wired exactly like the config describes.
pub fn simulated(cfg: &Config, clock: Arc<dyn Clock + Send + Sync>) -> SimulatedIo {
    let sim = &cfg.simulation;
    let on_high = cfg.motion.motor_on == Level::High;
    let motor = |m: &tms_config::MotorPins| SimMotor {
        enable_pin: m.enable_pin,
        dir_pin: m.dir_pin,
        step_pin: m.step_pin,
        forward_high: m.feed_dir == Level::High,
        on_high,
        steps_per_mm: m.steps_per_mm,
    };
    // where a completed load parks the tip
    let loaded_at = sim.sensor_distance - cfg.selector.offset_before + cfg.selector.offset_after;

    let mut io = SimulatedIo::new(clock);
    for (i, s) in cfg.slots.iter().enumerate() {
        let mut slot = SimSlot::new(motor(&s.feeder), s.presence_pin, sim.sensor_distance);
        slot.spool = s.spool.as_ref().map(motor);
        slot.presence_high = cfg.sensors.presence_level == Level::High;
        slot.filament_pin = s.filament_pin;
        slot.filament_high = cfg.sensors.filament_level == Level::High;
        slot.has_filament = !sim.empty_slots.contains(&i);
        if sim.preloaded_slot == Some(i) {
            slot.tip_mm = loaded_at;
        }
        io = io.with_slot(slot);
    }
    if let Some(end_pin) = cfg.selector.end_pin {
        io = io.with_selector(SimSelector {
            end_pin,
            detect_high: cfg.selector.detect_level == Level::High,
            at_mm: sim.selector_distance,
        });
    }
    if let Some(b) = &cfg.buffer {
        io = io.with_buffer(SimBuffer {
            pin: b.pin,
            empty_high: b.empty_level == Level::High,
            fill_after_mm: sim.buffer_distance,
            trip_mm: sim.buffer_trip,
            reserve_mm: 0.0,
            consume_mm_s: sim.consume_mm_s,
        });
    }
    io
}

#[cfg(not(all(feature = "hardware", target_os = "linux")))]
fn open_io(cfg: &Config, clock: Arc<dyn Clock + Send + Sync>) -> eyre::Result<Box<dyn DigitalIo>> {
    tracing::info!(slots = cfg.slots.len(), "using simulated I/O backend");
    Ok(Box::new(simulated(cfg, clock)))
}

#[cfg(all(feature = "hardware", target_os = "linux"))]
fn open_io(cfg: &Config, _clock: Arc<dyn Clock + Send + Sync>) -> eyre::Result<Box<dyn DigitalIo>> {
    let mut inputs = Vec::new();
    let mut outputs = Vec::new();
    // drivers start de-energized
    let enable_idle_high = cfg.motion.motor_on == Level::Low;
    for s in &cfg.slots {
        inputs.push(s.presence_pin);
        inputs.extend(s.filament_pin);
        for m in std::iter::once(&s.feeder).chain(s.spool.as_ref()) {
            outputs.extend([
                (m.enable_pin, enable_idle_high),
                (m.dir_pin, false),
                (m.step_pin, false),
            ]);
        }
    }
    inputs.extend(cfg.selector.end_pin);
    inputs.extend(cfg.buffer.as_ref().map(|b| b.pin));

    let io = tms_hardware::GpioIo::new(&inputs, &outputs).wrap_err("open gpio lines")?;
    Ok(Box::new(io))
}

/// Assemble the controller for `cfg` and run the initial presence discovery.
pub fn open_controller(cfg: &Config) -> eyre::Result<Controller> {
    let clock: Arc<dyn Clock + Send + Sync> = Arc::new(MonotonicClock::new());
    let io = open_io(cfg, clock)?;
    let mut ctrl = Controller::builder()
        .with_io(io)
        .with_machine(MachineCfg::from(cfg))
        .with_clock(Box::new(MonotonicClock::new()))
        .try_build()?;
    ctrl.begin()?;
    Ok(ctrl)
}

pub fn execute(
    cmd: &Commands,
    cfg: &Config,
    shutdown: Arc<AtomicBool>,
    json: bool,
) -> eyre::Result<()> {
    let mut ctrl = open_controller(cfg)?;
    let params = RunParams {
        max_ticks: cfg.control.max_ticks,
        ..RunParams::default()
    }
    .with_halt(move || shutdown.load(Ordering::SeqCst));

    let result = dispatch(cmd, &mut ctrl, &params, json);
    if let Err(e) = ctrl.shutdown() {
        tracing::warn!(error = %e, "failed to disable motors on exit");
    }
    result
}

fn dispatch(
    cmd: &Commands,
    ctrl: &mut Controller,
    params: &RunParams,
    json: bool,
) -> eyre::Result<()> {
    match *cmd {
        Commands::Load { slot } => {
            let st = load_blocking(ctrl, slot, params)?;
            print_slot("loaded", &st, json);
        }
        Commands::Unload { slot } => {
            let st = unload_blocking(ctrl, slot, params)?;
            print_slot("unloaded", &st, json);
        }
        Commands::Cycle { slot } => {
            load_blocking(ctrl, slot, params)?;
            let st = unload_blocking(ctrl, slot, params)?;
            print_slot("cycled", &st, json);
        }
        Commands::Reset { slot } => {
            ctrl.reset_slot(slot)?;
            let status = ctrl.status();
            if let Some(st) = status.slot(slot) {
                print_slot("reset", st, json);
            }
        }
        Commands::Status => print_status(&ctrl.status(), json),
        Commands::Serve { seconds, slot } => {
            if let Some(slot) = slot {
                load_blocking(ctrl, slot, params)?;
            }
            let ticks = service_for(ctrl, Duration::from_secs(seconds), params)?;
            tracing::info!(ticks, seconds, "service window finished");
            let status = ctrl.status();
            if let Some(err) = status.last_error.clone() {
                return Err(err.into());
            }
            print_status(&status, json);
        }
        Commands::SelfCheck => {
            let status = ctrl.status();
            if json {
                println!(
                    "{}",
                    json!({ "status": "ok", "slots": status.slots.len(), "active_slot": status.active_slot })
                );
            } else {
                println!("OK ({} slots)", status.slots.len());
            }
        }
    }
    Ok(())
}

fn slot_json(st: &SlotStatus) -> Value {
    json!({
        "index": st.index,
        "state": st.state.name(),
        "travel_mm": st.travel_mm,
        "feeder_position_mm": st.feeder_position_mm,
        "spool_position_mm": st.spool_position_mm,
        "presence": st.presence,
        "detected_at_mm": st.detected_at_mm,
        "error": st.error.as_ref().map(|e| json!({ "kind": e.kind().name(), "code": e.kind().code(), "message": e.to_string() })),
    })
}

pub fn status_json(status: &Status) -> Value {
    json!({
        "slots": status.slots.iter().map(slot_json).collect::<Vec<_>>(),
        "active_slot": status.active_slot,
        "buffer": status.buffer.map(|b| b.name()),
        "last_error": status.last_error.as_ref().map(ToString::to_string),
    })
}

fn print_slot(what: &str, st: &SlotStatus, json: bool) {
    if json {
        println!("{}", json!({ "result": what, "slot": slot_json(st) }));
    } else {
        println!(
            "slot {} {what}: {} (travel {:.1} mm)",
            st.index,
            st.state.name(),
            st.travel_mm
        );
    }
}

fn print_status(status: &Status, json: bool) {
    if json {
        println!("{}", status_json(status));
        return;
    }
    for st in &status.slots {
        let presence = match st.presence {
            Some(true) => "present",
            Some(false) => "clear",
            None => "unknown",
        };
        match &st.error {
            Some(e) => println!("slot {}: {} [{presence}] error: {e}", st.index, st.state.name()),
            None => println!("slot {}: {} [{presence}]", st.index, st.state.name()),
        }
    }
    match status.active_slot {
        Some(i) => println!("selector: slot {i}"),
        None => println!("selector: free"),
    }
    if let Some(b) = status.buffer {
        println!("buffer: {}", b.name());
    }
}
