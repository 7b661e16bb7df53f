mod common;

use std::sync::Arc;

use proptest::prelude::*;
use tms_core::mocks::RecordingIo;
use tms_core::{
    Debouncer, Direction, MotionRequest, RunParams, SelectorCfg, SelectorGate, TmsError,
    build_controller, load_blocking, unload_blocking,
};
use tms_hardware::SimulatedIo;
use tms_traits::clock::test_clock::TestClock;

const INCREMENTS: [f32; 4] = [0.5, 1.0, 2.0, 5.0];
const STEPS_PER_MM: [f32; 3] = [20.0, 50.0, 80.0];

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    // Parked within one increment behind the sensor, a full load/unload cycle
    // brings the feeder back to within one increment of where it started.
    #[test]
    fn load_unload_round_trip(
        sensor_at in 20.0f32..300.0,
        frac in 0.05f32..1.0,
        inc_idx in 0usize..INCREMENTS.len(),
        spmm_idx in 0usize..STEPS_PER_MM.len(),
        before in 0.0f32..40.0,
        extra in 10.0f32..120.0,
        speed in 50.0f32..800.0,
    ) {
        let spmm = STEPS_PER_MM[spmm_idx];
        let inc = (INCREMENTS[inc_idx] * spmm).round() / spmm;

        let clock = TestClock::new();
        let mut slot = common::sim_slot(0, sensor_at);
        slot.feeder.steps_per_mm = spmm;
        slot.tip_mm = sensor_at - frac * inc;
        let io = SimulatedIo::new(Arc::new(clock.clone())).with_slot(slot);

        let mut m = common::machine(1);
        m.slots[0].feeder.steps_per_mm = spmm;
        m.motion.move_read_distance_mm = INCREMENTS[inc_idx];
        m.motion.load_speed = speed;
        m.motion.unload_speed = speed;
        m.selector = SelectorCfg {
            offset_before_mm: before,
            offset_after_mm: before + extra,
            ..SelectorCfg::default()
        };
        let mut ctrl = common::build(&io, &clock, m);

        let params = RunParams::default();
        load_blocking(&mut ctrl, 0, &params).unwrap();
        unload_blocking(&mut ctrl, 0, &params).unwrap();

        let net = io.feeder_mm(0);
        prop_assert!(net.abs() <= inc + 1e-2, "net {} vs increment {}", net, inc);
    }
}

#[derive(Debug, Clone, Copy)]
enum GateOp {
    Acquire(usize),
    Release(usize),
    Cancel(usize),
    Claim(usize),
}

fn gate_op() -> impl Strategy<Value = GateOp> {
    (0usize..3, 0u8..4).prop_map(|(slot, op)| match op {
        0 => GateOp::Acquire(slot),
        1 => GateOp::Release(slot),
        2 => GateOp::Cancel(slot),
        _ => GateOp::Claim(slot),
    })
}

proptest! {
    // Against a one-variable model: the gate never has two owners, owner
    // acquisition is idempotent and anybody else is refused.
    #[test]
    fn gate_has_at_most_one_owner(ops in prop::collection::vec(gate_op(), 0..64)) {
        let mut io = RecordingIo::default();
        let mut gate = SelectorGate::default();
        let mut owner: Option<usize> = None;

        for op in ops {
            match op {
                GateOp::Acquire(s) | GateOp::Claim(s) => {
                    let r = match op {
                        GateOp::Acquire(_) => gate.acquire(s, &mut io, 0).map(|_| ()),
                        _ => gate.claim(s),
                    };
                    match owner {
                        Some(o) if o != s => {
                            prop_assert_eq!(r, Err(TmsError::GateBusy { requested: s, owner: o }));
                        }
                        _ => {
                            prop_assert!(r.is_ok());
                            owner = Some(s);
                        }
                    }
                }
                GateOp::Release(s) => {
                    let r = gate.release(s);
                    if owner == Some(s) {
                        prop_assert!(r.is_ok());
                        owner = None;
                    } else {
                        let violation = matches!(r, Err(TmsError::InvariantViolation(_)));
                        prop_assert!(violation);
                    }
                }
                GateOp::Cancel(s) => {
                    gate.cancel(s);
                    if owner == Some(s) {
                        owner = None;
                    }
                }
            }
            prop_assert_eq!(gate.owner(), owner);
        }
    }
}

proptest! {
    // Glitches shorter than the window never change the reported level.
    #[test]
    fn debouncer_rejects_short_glitches(
        window in 2u64..50,
        base in any::<bool>(),
        pattern in prop::collection::vec((1u64..200, 1u64..50), 1..20),
    ) {
        let mut d = Debouncer::new(window);
        let mut t = 0u64;
        d.update(base, t);
        for (calm, glitch) in pattern {
            let glitch = glitch.min(window - 1);
            for _ in 0..calm {
                t += 1;
                prop_assert_eq!(d.update(base, t), base);
            }
            // raw level differs for `glitch` ms (samples at t+1 .. t+glitch)
            for _ in 0..glitch {
                t += 1;
                prop_assert_eq!(d.update(!base, t), base);
            }
        }
    }

    // A change held for the window is reported no later than one window
    // after it started.
    #[test]
    fn debouncer_reports_held_change_within_window(
        window in 0u64..50,
        base in any::<bool>(),
        settle in 0u64..100,
    ) {
        let mut d = Debouncer::new(window);
        let mut t = 0u64;
        d.update(base, t);
        for _ in 0..settle {
            t += 1;
            d.update(base, t);
        }
        t += 1;
        let changed_at = t;
        let mut reported_at = None;
        for _ in 0..=window {
            if d.update(!base, t) == !base {
                reported_at = Some(t);
                break;
            }
            t += 1;
        }
        prop_assert_eq!(reported_at, Some(changed_at + window));
    }

    // Each request re-quantizes to the nearest whole step.
    #[test]
    fn steps_are_within_half_a_step(distance in 0.0f32..2000.0, spmm in 1.0f32..500.0) {
        let steps = MotionRequest::new(distance, Direction::Forward, 100.0).steps(spmm);
        let back = f64::from(steps) / f64::from(spmm);
        let err = (back - f64::from(distance)).abs();
        prop_assert!(err <= 0.5 / f64::from(spmm) + 1e-9, "err {} at {} steps/mm", err, spmm);
    }
}

#[test]
fn round_trip_holds_without_a_spool_motor() {
    let clock = TestClock::new();
    let mut slot = common::sim_slot(0, 120.0);
    slot.spool = None;
    slot.tip_mm = 119.5;
    let io = SimulatedIo::new(Arc::new(clock.clone())).with_slot(slot);
    let mut m = common::machine(1);
    m.slots[0].spool = None;
    let mut ctrl = common::build(&io, &clock, m);
    let params = RunParams::default();
    load_blocking(&mut ctrl, 0, &params).unwrap();
    unload_blocking(&mut ctrl, 0, &params).unwrap();
    assert!(io.feeder_mm(0).abs() <= 1.0 + 1e-3);
}

#[test]
fn recording_backend_sees_no_io_before_commands() {
    let ctrl = build_controller(RecordingIo::default(), common::machine(2), None).unwrap();
    assert!(!ctrl.io().touched());
}
