//! Integration tests for console framing, line sequencing and the
//! stop/resume latch.

use crate::mock_hw::{exec, rig, signed};

#[test]
fn poll_executes_one_line_per_iteration() {
    let mut c = rig();
    c.console_mut().feed("M80\r\nM115\n");
    c.poll();
    assert_eq!(c.console_mut().take(), "<M80/>\r\n");
    c.poll();
    assert!(c.console_mut().take().starts_with("<FIRMWARE_NAME:Marlinspike RoboCore>\r\n"));
    c.poll();
    assert_eq!(c.console_mut().take(), "");
}

#[test]
fn partial_line_waits_for_terminator() {
    let mut c = rig();
    c.console_mut().feed("G10");
    c.poll();
    assert_eq!(c.console_mut().take(), "");
    c.console_mut().feed("0\n");
    c.poll();
    assert_eq!(c.console_mut().take(), "<G100/>\r\n");
}

#[test]
fn numbered_lines_advance_the_sequence() {
    let mut c = rig();
    let lines: Vec<String> = (1..=5).map(|n| signed(&format!("N{n} M80"))).collect();
    let refs: Vec<&str> = lines.iter().map(String::as_str).collect();
    assert_eq!(exec(&mut c, &refs), "<M80/>\r\n".repeat(5));
    assert_eq!(c.last_line(), 5);
}

#[test]
fn corrupted_checksum_requests_the_same_line() {
    let mut c = rig();
    for n in 1..=5 {
        c.run_line(&signed(&format!("N{n} M80")));
    }
    c.console_mut().take();

    let good = signed("N6 M80");
    let bad = good.replace("M80", "M81");
    assert_eq!(
        exec(&mut c, &[bad.as_str()]),
        "<checksum mismatch, Last Line: 5/>\r\nResend: \r\n6\r\n"
    );
    assert_eq!(c.last_line(), 5);
    assert_eq!(exec(&mut c, &[good.as_str()]), "<M80/>\r\n");
    assert_eq!(c.last_line(), 6);
}

#[test]
fn numbered_line_without_checksum_is_refused() {
    let mut c = rig();
    assert_eq!(
        exec(&mut c, &["N1 M80"]),
        "<No Checksum with line number, Last Line: 0/>\r\nResend: \r\n1\r\n"
    );
}

#[test]
fn m110_renumbers_out_of_order() {
    let mut c = rig();
    assert_eq!(exec(&mut c, &[signed("N100 M110").as_str()]), "<M110/>\r\n");
    assert_eq!(c.last_line(), 100);
    assert_eq!(exec(&mut c, &[signed("N101 M80").as_str()]), "<M80/>\r\n");
}

#[test]
fn stop_latch_blocks_motion_but_not_queries() {
    let mut c = rig();
    exec(&mut c, &["M10 Z0 T1", "M3 Z0 P5 C1 D6 E0"]);
    c.run_line(&signed("N1 M80"));
    c.run_line(&signed("N2 M80"));
    c.stop();
    // Publish the stop fault before checking replies.
    c.manage_inactivity();
    c.console_mut().take();

    assert_eq!(
        exec(&mut c, &["G5 Z0 C1 P100", "G4 P1"]),
        "<Controller stopped due to errors/>\r\n<Controller stopped due to errors/>\r\n"
    );
    assert_eq!(exec(&mut c, &["G100"]), "<G100/>\r\n");
    assert!(exec(&mut c, &["M115"]).starts_with("<FIRMWARE_NAME"));

    assert_eq!(exec(&mut c, &["M999"]), "<M999/>\r\n");
    assert!(!c.is_stopped());
    assert_eq!(c.last_line(), 2);
    assert_eq!(exec(&mut c, &["G5 Z0 C1 P100"]), "<G5/>\r\n");
}

#[test]
fn kill_stops_motors_and_latches() {
    let mut c = rig();
    exec(&mut c, &["M10 Z0 T1", "M3 Z0 P5 C1 D6 E0", "G5 Z0 C1 P100"]);
    c.kill();
    assert!(c.is_stopped());
    let speed = c
        .motor(0)
        .unwrap()
        .control()
        .common()
        .channel(robocore::channel::ChannelId::new(1).unwrap())
        .speed;
    assert_eq!(speed, 0);
}

#[test]
fn realtime_output_streams_range_changes() {
    let mut c = rig();
    c.board_mut().io.pulses.insert(40, 58 * 20);
    assert_eq!(exec(&mut c, &["M301 P40"]), "<M301/>\r\n");
    assert_eq!(
        exec(&mut c, &["M1"]),
        "<M1/>\r\n<ultrasonic>\r\n1 40\r\n2 20\r\n<ultrasonic/>\r\n"
    );
    // Unchanged range is not repeated.
    assert_eq!(exec(&mut c, &["G100"]), "<G100/>\r\n");

    c.board_mut().io.pulses.insert(40, 58 * 12);
    assert_eq!(
        exec(&mut c, &["G100"]),
        "<G100/>\r\n<ultrasonic>\r\n1 40\r\n2 12\r\n<ultrasonic/>\r\n"
    );
}
