//! Integration tests for a smart controller slot talking over the
//! half-duplex serial link.

use robocore::channel::ChannelId;

use crate::mock_hw::{exec, rig};

#[test]
fn allocation_brings_up_the_link() {
    let mut c = rig();
    assert_eq!(exec(&mut c, &["M10 Z0 T0"]), "<M10/>\r\n");
    assert_eq!(c.board().link.baud, 115_200);
    // Inactivity pass probed the link and polled the fault flags.
    assert!(c.board().link.sent.iter().any(|s| s == "?FF"));
}

#[test]
fn power_becomes_motion_command() {
    let mut c = rig();
    exec(&mut c, &["M10 Z0 T0"]);
    assert_eq!(exec(&mut c, &["G5 Z0 C1 P250", "G5 Z0 C2 P-1500"]), "<G5/>\r\n<G5/>\r\n");
    assert_eq!(c.board().link.motion(), ["!G 01 250", "!G 02 -1000"]);
}

#[test]
fn forward_default_mirrors_the_command() {
    let mut c = rig();
    exec(&mut c, &["M10 Z0 T0", "M2 Z0 C1 E1"]);
    exec(&mut c, &["G5 Z0 C1 P300"]);
    assert_eq!(c.board().link.motion(), ["!G 01 -300"]);
}

#[test]
fn oversized_power_is_clamped_on_the_wire() {
    let mut c = rig();
    exec(&mut c, &["M10 Z0 T0", "M2 Z0 C1 E1"]);
    assert_eq!(exec(&mut c, &["G5 Z0 C1 P-3000000000"]), "<G5/>\r\n");
    assert_eq!(c.board().link.motion(), ["!G 01 1000"]);
}

#[test]
fn third_channel_is_refused() {
    let mut c = rig();
    exec(&mut c, &["M10 Z0 T0"]);
    assert_eq!(exec(&mut c, &["G5 Z0 C3 P10"]), "<Bad Motor command -3 3 10/>\r\n");
    assert!(c.board().link.motion().is_empty());
}

#[test]
fn controller_fault_is_published_once() {
    let mut c = rig();
    exec(&mut c, &["M10 Z0 T0"]);
    c.board_mut().link.fault = 1;
    c.manage_inactivity();
    assert_eq!(c.console_mut().take(), "<motorfault>\r\n1 Overheat\r\n<motorfault/>\r\n");
    c.manage_inactivity();
    assert_eq!(c.console_mut().take(), "");
}

#[test]
fn reset_stops_both_channels() {
    let mut c = rig();
    exec(&mut c, &["M10 Z0 T0", "G5 Z0 C1 P200", "G5 Z0 C2 P200"]);
    c.board_mut().link.sent.clear();
    let out = exec(&mut c, &["M799 Z0"]);
    assert!(out.starts_with("<M799/>\r\n"), "{out}");
    assert_eq!(c.board().link.motion(), ["!G 01 0", "!G 02 0"]);
    let common = c.motor(0).unwrap().control().common();
    assert_eq!(common.channel(ChannelId::new(1).unwrap()).speed, 0);
    assert_eq!(common.channel(ChannelId::new(2).unwrap()).speed, 0);
}

#[test]
fn status_lists_both_channels_when_connected() {
    let mut c = rig();
    exec(&mut c, &["M10 Z0 T0"]);
    let out = exec(&mut c, &["M798 Z0"]);
    assert!(out.starts_with("<controllerstatus>\r\nMotor Channel:1\r\n"), "{out}");
    assert!(out.contains("Motor Channel:2\r\n"));
    assert!(out.ends_with("<controllerstatus/>\r\n"));
}

#[test]
fn silent_controller_is_skipped() {
    let mut c = rig();
    exec(&mut c, &["M10 Z0 T0"]);
    c.board_mut().link.connected = false;
    c.board_mut().link.fault = 1;
    assert_eq!(
        exec(&mut c, &["M798 Z0"]),
        "<controllerstatus>\r\n<controllerstatus/>\r\n"
    );
}
