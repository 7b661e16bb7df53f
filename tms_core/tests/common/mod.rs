#![allow(dead_code)]

use std::sync::Arc;

use tms_core::{Controller, Level, MachineCfg, MotionCfg, MotorCfg, SensorCfg, SlotCfg};
use tms_hardware::{SimMotor, SimSlot, SimulatedIo};
use tms_traits::Line;
use tms_traits::clock::test_clock::TestClock;

pub const FEEDER_SPMM: f32 = 50.0;
pub const SPOOL_SPMM: f32 = 20.0;
pub const BUFFER_PIN: u8 = 40;
pub const END_PIN: u8 = 41;

// slot i: feeder 10i+1..3, spool 10i+4..6, presence 10i+7, filament 10i+8
pub fn base(slot: usize) -> u8 {
    u8::try_from(slot * 10).unwrap()
}

pub fn presence_pin(slot: usize) -> u8 {
    base(slot) + 7
}

pub fn filament_pin(slot: usize) -> u8 {
    base(slot) + 8
}

pub fn feeder_enable(slot: usize) -> u8 {
    base(slot) + 1
}

fn sim_motor(first: u8, steps_per_mm: f32) -> SimMotor {
    SimMotor {
        enable_pin: first,
        dir_pin: first + 1,
        step_pin: first + 2,
        forward_high: true,
        on_high: false,
        steps_per_mm,
    }
}

fn core_motor(first: u8, steps_per_mm: f32) -> MotorCfg {
    MotorCfg {
        enable: Line(first),
        dir: Line(first + 1),
        step: Line(first + 2),
        feed_dir: Level::High,
        steps_per_mm,
    }
}

/// `n` slots, each with a spool motor, no filament sensor, no buffer,
/// debounce disabled so sensor edges map to exact positions.
pub fn machine(n: usize) -> MachineCfg {
    MachineCfg {
        slots: (0..n)
            .map(|i| SlotCfg {
                index: i,
                presence: SensorCfg::new(presence_pin(i), Level::High),
                filament: None,
                feeder: core_motor(base(i) + 1, FEEDER_SPMM),
                spool: Some(core_motor(base(i) + 4, SPOOL_SPMM)),
            })
            .collect(),
        motion: MotionCfg {
            debounce_ms: 0,
            ..MotionCfg::default()
        },
        ..MachineCfg::default()
    }
}

pub fn sim_slot(i: usize, sensor_at_mm: f32) -> SimSlot {
    let mut s = SimSlot::new(sim_motor(base(i) + 1, FEEDER_SPMM), presence_pin(i), sensor_at_mm);
    s.spool = Some(sim_motor(base(i) + 4, SPOOL_SPMM));
    s.presence_high = true;
    s
}

pub fn sim(clock: &TestClock, n: usize, sensor_at_mm: f32) -> SimulatedIo {
    (0..n).fold(SimulatedIo::new(Arc::new(clock.clone())), |io, i| {
        io.with_slot(sim_slot(i, sensor_at_mm))
    })
}

pub fn build(io: &SimulatedIo, clock: &TestClock, machine: MachineCfg) -> Controller {
    Controller::builder()
        .with_io(io.clone())
        .with_machine(machine)
        .with_clock(Box::new(clock.clone()))
        .build()
        .unwrap()
}

/// Two-slot rig with presence sensors at 120 mm.
pub fn rig() -> (SimulatedIo, TestClock, Controller) {
    let clock = TestClock::new();
    let io = sim(&clock, 2, 120.0);
    let ctrl = build(&io, &clock, machine(2));
    (io, clock, ctrl)
}
