mod common;

use common::{build, feeder_enable, machine, rig, sim};
use rstest::rstest;
use tms_core::{
    RunParams, SelectorCfg, SlotState, TmsError, load_blocking, run_until_settled,
    unload_blocking,
};
use tms_traits::clock::test_clock::TestClock;

fn close(a: f32, b: f32) -> bool {
    (a - b).abs() < 1e-3
}

#[test]
fn load_positions_filament_past_the_sensor() {
    let (io, _clock, mut ctrl) = rig();
    let status = load_blocking(&mut ctrl, 0, &RunParams::default()).unwrap();

    assert_eq!(status.state, SlotState::Loaded);
    assert_eq!(status.detected_at_mm, Some(120.0));
    assert!(close(status.travel_mm, 185.0), "travel {}", status.travel_mm);
    assert!(close(io.tip_mm(0), 185.0));
    // motor_on is low, so a released driver reads high
    assert_eq!(io.output_level(feeder_enable(0)), Some(true));
    assert_eq!(ctrl.status().active_slot, Some(0));
}

#[rstest]
#[case(30.0, 95.0, 185.0)]
#[case(0.0, 0.0, 120.0)]
#[case(10.0, 40.0, 150.0)]
#[case(12.5, 12.5, 120.0)]
fn final_position_is_trip_minus_before_plus_after(
    #[case] before: f32,
    #[case] after: f32,
    #[case] expected: f32,
) {
    let clock = TestClock::new();
    let io = sim(&clock, 1, 120.0);
    let mut m = machine(1);
    m.selector = SelectorCfg {
        offset_before_mm: before,
        offset_after_mm: after,
        ..SelectorCfg::default()
    };
    let mut ctrl = build(&io, &clock, m);
    let status = load_blocking(&mut ctrl, 0, &RunParams::default()).unwrap();
    assert!(close(status.travel_mm, expected), "travel {}", status.travel_mm);
}

#[test]
fn unload_rewinds_spool_past_sensor_clear() {
    let (io, _clock, mut ctrl) = rig();
    // filament already parked so the sensor clears after exactly 50 mm
    io.set_tip_mm(0, 169.5);
    ctrl.begin().unwrap();
    assert_eq!(ctrl.slot_state(0).unwrap(), SlotState::Loaded);

    let status = unload_blocking(&mut ctrl, 0, &RunParams::default()).unwrap();
    assert_eq!(status.state, SlotState::Idle);
    assert!(close(io.feeder_mm(0), -50.0), "feeder {}", io.feeder_mm(0));
    // 50 mm in lockstep plus the 150 mm extra rewind
    assert!(close(io.spool_mm(0), -200.0), "spool {}", io.spool_mm(0));
    assert!(close(status.travel_mm, -50.0));
    assert_eq!(ctrl.status().active_slot, None);
}

#[test]
fn load_then_unload_frees_the_selector_for_another_slot() {
    let (io, _clock, mut ctrl) = rig();
    let params = RunParams::default();
    load_blocking(&mut ctrl, 0, &params).unwrap();
    unload_blocking(&mut ctrl, 0, &params).unwrap();
    assert!(io.tip_mm(0) < 120.0);

    let status = load_blocking(&mut ctrl, 1, &params).unwrap();
    assert_eq!(status.state, SlotState::Loaded);
    assert_eq!(ctrl.status().active_slot, Some(1));
}

#[test]
fn second_slot_is_rejected_while_selector_is_owned() {
    let (_io, _clock, mut ctrl) = rig();
    load_blocking(&mut ctrl, 0, &RunParams::default()).unwrap();

    let err = ctrl.load_slot(1).unwrap_err();
    assert_eq!(
        err,
        TmsError::GateBusy {
            requested: 1,
            owner: 0
        }
    );
    assert_eq!(ctrl.slot_state(1).unwrap(), SlotState::Idle);
    assert_eq!(ctrl.status().last_error, Some(err));
}

#[rstest]
#[case::before_first_tick(0)]
#[case::after_first_tick(1)]
fn second_slot_is_rejected_while_first_is_loading(#[case] ticks: usize) {
    let (_io, _clock, mut ctrl) = rig();
    ctrl.load_slot(0).unwrap();
    for _ in 0..ticks {
        ctrl.tick();
    }
    if ticks > 0 {
        assert_eq!(ctrl.slot_state(0).unwrap(), SlotState::Loading);
    }
    let busy = TmsError::GateBusy {
        requested: 1,
        owner: 0,
    };

    match ctrl.load_slot(1) {
        // the selector was still unclaimed; the next tick settles it
        Ok(()) => {
            assert_eq!(ticks, 0);
            ctrl.tick();
        }
        Err(e) => assert_eq!(e, busy),
    }
    assert_eq!(ctrl.slot_state(0).unwrap(), SlotState::Loading);
    assert_eq!(ctrl.slot_state(1).unwrap(), SlotState::Idle);
    assert_eq!(ctrl.status().active_slot, Some(0));
    assert_eq!(ctrl.status().last_error, Some(busy));
}

#[test]
fn competing_requests_before_a_tick_leave_the_loser_idle() {
    let (io, _clock, mut ctrl) = rig();
    // neither request holds the selector yet, so both are accepted
    ctrl.load_slot(0).unwrap();
    ctrl.load_slot(1).unwrap();
    ctrl.tick();

    let status = ctrl.status();
    assert_eq!(status.active_slot, Some(0));
    assert_eq!(status.slots[0].state, SlotState::Loading);
    assert_eq!(status.slots[1].state, SlotState::Idle);
    assert_eq!(
        status.slots[1].error,
        Some(TmsError::GateBusy {
            requested: 1,
            owner: 0
        })
    );

    // slot 1 needs no reset once the selector is free again
    let params = RunParams::default();
    run_until_settled(&mut ctrl, &params).unwrap();
    unload_blocking(&mut ctrl, 0, &params).unwrap();
    let status = load_blocking(&mut ctrl, 1, &params).unwrap();
    assert_eq!(status.state, SlotState::Loaded);
    assert!(io.tip_mm(1) > 120.0);
}

#[test]
fn repeated_commands_are_idempotent() {
    let (io, _clock, mut ctrl) = rig();
    let params = RunParams::default();
    ctrl.unload_slot(0).unwrap();
    assert_eq!(ctrl.slot_state(0).unwrap(), SlotState::Idle);

    load_blocking(&mut ctrl, 0, &params).unwrap();
    let pulses = io.pulse_count();
    ctrl.load_slot(0).unwrap();
    run_until_settled(&mut ctrl, &params).unwrap();
    assert_eq!(io.pulse_count(), pulses);
    assert_eq!(ctrl.slot_state(0).unwrap(), SlotState::Loaded);
}

#[test]
fn slots_discovered_at_boot_are_loaded() {
    let (io, _clock, mut ctrl) = rig();
    io.set_tip_mm(1, 140.0);
    ctrl.begin().unwrap();
    let status = ctrl.status();
    assert_eq!(status.slots[0].state, SlotState::Idle);
    assert_eq!(status.slots[1].state, SlotState::Loaded);
    assert_eq!(status.active_slot, Some(1));
    assert_eq!(io.pulse_count(), 0);
}

#[test]
fn two_slots_at_the_sensor_at_boot_is_a_jam() {
    let (io, _clock, mut ctrl) = rig();
    io.set_tip_mm(0, 140.0);
    io.set_tip_mm(1, 140.0);
    let err = ctrl.begin().unwrap_err();
    assert!(matches!(err, TmsError::Jam { slot: 1, .. }));
    assert_eq!(ctrl.slot_state(0).unwrap(), SlotState::Loaded);
    assert_eq!(ctrl.slot_state(1).unwrap(), SlotState::Error);
}
