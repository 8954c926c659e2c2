//! Integration tests for the command line → driver → pin/timer pipeline.
//!
//! Every test drives the controller with wire text only and then checks
//! the calls that reached the mock hardware.

use embedded_hal::digital::PinState;
use robocore::app::ports::{InterruptSource, OutputMode};
use robocore::channel::ChannelId;
use robocore::resources::PinStatus;

use crate::mock_hw::{HwCall, exec, rig};

fn ch(n: i64) -> ChannelId {
    ChannelId::new(n).unwrap()
}

// ── H-bridge ──────────────────────────────────────────────────

#[test]
fn hbridge_power_reaches_timer_and_direction_pin() {
    let mut c = rig();
    let out = exec(&mut c, &["M10 Z0 T1", "M3 Z0 P5 C1 D6 E0", "G5 Z0 C1 P500"]);
    assert_eq!(out, "<M10/>\r\n<M3/>\r\n<G5/>\r\n");

    let hw = &c.board().io;
    assert_eq!(hw.last_write(6), Some(PinState::High));
    assert_eq!(hw.last_duty(5), Some((OutputMode::Clear, 125)));
}

#[test]
fn hbridge_reversal_flips_direction_pin() {
    let mut c = rig();
    exec(&mut c, &["M10 Z0 T1", "M3 Z0 P5 C1 D6 E0", "G5 Z0 C1 P500"]);
    assert_eq!(exec(&mut c, &["G5 Z0 C1 P-200"]), "<G5/>\r\n");

    let hw = &c.board().io;
    assert_eq!(hw.last_write(6), Some(PinState::Low));
    assert_eq!(hw.last_duty(5), Some((OutputMode::Clear, 50)));
    assert_eq!(c.motor(0).unwrap().control().common().channel(ch(1)).speed, -200);
}

#[test]
fn hbridge_min_power_lifts_small_requests() {
    let mut c = rig();
    exec(&mut c, &["M10 Z0 T1", "M3 Z0 P5 C1 D6 E0", "M12 Z0 C1 P80"]);
    exec(&mut c, &["G5 Z0 C1 P8"]);
    assert_eq!(c.board().io.last_duty(5), Some((OutputMode::Clear, 20)));
}

#[test]
fn zero_power_stops_the_timer() {
    let mut c = rig();
    exec(&mut c, &["M10 Z0 T1", "M3 Z0 P5 C1 D6 E0", "G5 Z0 C1 P400"]);
    c.board_mut().io.clear_calls();
    exec(&mut c, &["G5 Z0 C1 P0"]);
    let hw = &c.board().io;
    assert_eq!(hw.last_duty(5), Some((OutputMode::Stop, 0)));
    assert_eq!(hw.last_write(5), Some(PinState::Low));
}

// ── Split and switch bridges ──────────────────────────────────

#[test]
fn split_bridge_channels_share_one_enable_pin() {
    let mut c = rig();
    let out = exec(
        &mut c,
        &["M10 Z0 T2", "M4 Z0 P5 Q6 C1 D30 E0", "M4 Z0 P7 Q8 C2 D30 E0"],
    );
    assert_eq!(out, "<M10/>\r\n<M4/>\r\n<M4/>\r\n");
    for pin in [5, 6, 7, 8, 30] {
        assert_eq!(c.board().res.pins.status(pin), PinStatus::Assigned, "pin {pin}");
    }

    assert_eq!(exec(&mut c, &["G5 Z0 C1 P400"]), "<G5/>\r\n");
    assert_eq!(c.board().io.last_write(30), Some(PinState::High));

    // Reallocating the slot hands every pin back.
    assert_eq!(exec(&mut c, &["M10 Z0 T1"]), "<M10/>\r\n");
    for pin in [5, 6, 7, 8, 30] {
        assert_eq!(c.board().res.pins.status(pin), PinStatus::Free, "pin {pin}");
    }
}

#[test]
fn switch_bridge_drives_one_input_at_a_time() {
    let mut c = rig();
    let out = exec(&mut c, &["M10 Z0 T3", "M5 Z0 P22 Q23 C1 D24 E0"]);
    assert_eq!(out, "<M10/>\r\n<M5/>\r\n");

    assert_eq!(exec(&mut c, &["G5 Z0 C1 P100"]), "<G5/>\r\n");
    let hw = &c.board().io;
    assert_eq!(hw.last_write(24), Some(PinState::High));
    let a = hw.last_write(22);
    let b = hw.last_write(23);
    assert_ne!(a, b, "exactly one input carries drive");

    exec(&mut c, &["G5 Z0 C1 P-100"]);
    let hw = &c.board().io;
    assert_eq!(hw.last_write(22), b);
    assert_eq!(hw.last_write(23), a);

    exec(&mut c, &["G5 Z0 C1 P0"]);
    let hw = &c.board().io;
    assert_eq!(hw.last_write(22), Some(PinState::Low));
    assert_eq!(hw.last_write(23), Some(PinState::Low));
}

#[test]
fn switch_bridge_enable_must_differ_from_inputs() {
    let mut c = rig();
    exec(&mut c, &["M10 Z0 T3"]);
    assert_eq!(
        exec(&mut c, &["M5 Z0 P22 Q23 C1 D22 E0"]),
        "<Error:M5 resource: pin 22 unavailable/>\r\n"
    );
    assert_eq!(c.board().res.pins.status(22), PinStatus::Free);
    assert_eq!(c.board().res.digitals.position(|d| d.pin() == 22), None);
}

#[test]
fn wrong_channel_code_for_slot_type() {
    let mut c = rig();
    exec(&mut c, &["M10 Z0 T3"]);
    assert_eq!(
        exec(&mut c, &["M3 Z0 P5 C1 D6 E0"]),
        "<Error:M3 resource: wrong driver type for slot/>\r\n"
    );
    assert_eq!(c.board().res.pins.status(5), PinStatus::Free);
}

// ── Interlocks ────────────────────────────────────────────────

#[test]
fn encoder_budget_stops_the_channel() {
    let mut c = rig();
    exec(
        &mut c,
        &["M10 Z0 T1", "M3 Z0 P5 C1 D6 E0 W2", "M11 Z0 C1 D3", "G5 Z0 C1 P400"],
    );
    assert!(c.board().io.calls.contains(&HwCall::Attach(InterruptSource::PinChange(2))));

    assert!(c.board_mut().io.fire(InterruptSource::PinChange(2), 5));
    c.manage_inactivity();
    assert_eq!(
        c.console_mut().take(),
        "<motorfault>\r\n1 Emergency stop\r\n<motorfault/>\r\n"
    );
    assert_eq!(c.motor(0).unwrap().control().common().channel(ch(1)).speed, 0);

    // Published once; a quiet pass stays quiet.
    c.manage_inactivity();
    assert_eq!(c.console_mut().take(), "");
}

#[test]
fn power_command_after_stall_restarts_the_budget() {
    let mut c = rig();
    exec(
        &mut c,
        &["M10 Z0 T1", "M3 Z0 P5 C1 D6 E0 W2", "M11 Z0 C1 D3", "G5 Z0 C1 P400"],
    );
    c.board_mut().io.fire(InterruptSource::PinChange(2), 5);
    c.manage_inactivity();
    c.console_mut().take();

    // Wheel keeps coasting after the stop.
    c.board_mut().io.fire(InterruptSource::PinChange(2), 2);
    let common = c.motor(0).unwrap().control().common();
    assert_eq!(common.encoder_count(ch(1)), 2);

    assert_eq!(exec(&mut c, &["G5 Z0 C1 P300"]), "<G5/>\r\n");
    let common = c.motor(0).unwrap().control().common();
    assert_eq!(common.encoder_count(ch(1)), 0);
    assert_eq!(common.channel(ch(1)).speed, 300);

    // A fresh budget: two more edges stay under the limit of 3.
    c.board_mut().io.fire(InterruptSource::PinChange(2), 2);
    c.manage_inactivity();
    assert_eq!(c.motor(0).unwrap().control().common().channel(ch(1)).speed, 300);
    assert_eq!(c.board().io.last_duty(5), Some((OutputMode::Clear, 75)));
}

#[test]
fn encoder_counts_below_budget_keep_running() {
    let mut c = rig();
    exec(
        &mut c,
        &["M10 Z0 T1", "M3 Z0 P5 C1 D6 E0 W2", "M11 Z0 C1 D50", "G5 Z0 C1 P400"],
    );
    c.board_mut().io.fire(InterruptSource::PinChange(2), 10);
    c.manage_inactivity();
    assert_eq!(c.console_mut().take(), "");
    assert_eq!(c.motor(0).unwrap().control().common().channel(ch(1)).speed, 400);
}

#[test]
fn obstacle_vetoes_travel_toward_it() {
    let mut c = rig();
    // 5 cm echo.
    c.board_mut().io.pulses.insert(40, 290);
    let out = exec(
        &mut c,
        &["M10 Z0 T1", "M3 Z0 P5 C1 D6 E0", "M301 P40", "M33 Z0 P40 D10 C1 E1"],
    );
    assert_eq!(out, "<M10/>\r\n<M3/>\r\n<M301/>\r\n<M33/>\r\n");

    let out = exec(&mut c, &["G5 Z0 C1 P300"]);
    assert!(out.starts_with("<Bad Motor command 8 1 300/>\r\n"), "{out}");
    assert!(out.contains("Emergency stop"));
    assert_eq!(c.motor(0).unwrap().control().common().channel(ch(1)).speed, 0);
    // The veto is not acknowledged, so the stop fault is left in place.
    assert_eq!(c.motor(0).unwrap().control().common().fault_flag, 16);

    // Backing away is allowed.
    assert_eq!(exec(&mut c, &["G5 Z0 C1 P-300"]), "<G5/>\r\n");
    assert_eq!(c.motor(0).unwrap().control().common().channel(ch(1)).speed, -300);
    assert_eq!(c.motor(0).unwrap().control().common().fault_flag, 0);
}

#[test]
fn distant_obstacle_does_not_veto() {
    let mut c = rig();
    c.board_mut().io.pulses.insert(40, 58 * 50);
    exec(
        &mut c,
        &["M10 Z0 T1", "M3 Z0 P5 C1 D6 E0", "M301 P40", "M33 Z0 P40 D10 C1 E1"],
    );
    assert_eq!(exec(&mut c, &["G5 Z0 C1 P300"]), "<G5/>\r\n");
}

#[test]
fn power_off_stops_every_motor_slot() {
    let mut c = rig();
    exec(
        &mut c,
        &[
            "M10 Z0 T1",
            "M3 Z0 P5 C1 D6 E0",
            "M10 Z1 T3",
            "M5 Z1 P22 Q23 C1 D24 E0",
            "G5 Z0 C1 P400",
            "G5 Z1 C1 P100",
        ],
    );
    let out = exec(&mut c, &["M81"]);
    assert!(out.starts_with("<M81/>\r\n"), "{out}");
    assert_eq!(c.motor(0).unwrap().control().common().channel(ch(1)).speed, 0);
    assert_eq!(c.motor(1).unwrap().control().common().channel(ch(1)).speed, 0);
    let hw = &c.board().io;
    assert_eq!(hw.last_write(22), Some(PinState::Low));
    assert_eq!(hw.last_write(23), Some(PinState::Low));
}
