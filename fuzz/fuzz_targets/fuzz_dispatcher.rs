//! Fuzz target: `Controller::poll`
//!
//! Feeds arbitrary console input to a controller built on the host
//! simulation adapters. Any byte stream must be answered without a panic,
//! whatever slots, pins and sensors it manages to configure on the way.
//!
//! cargo fuzz run fuzz_dispatcher

#![no_main]

use libfuzzer_sys::fuzz_target;
use robocore::adapters::console::SerialConsole;
use robocore::adapters::hardware::BoardHardware;
use robocore::adapters::nvs::NvsAdapter;
use robocore::adapters::smart_link::SmartUart;
use robocore::config::ConfigStore;
use robocore::protocol::Controller;

fuzz_target!(|data: &[u8]| {
    let Ok(nvs) = NvsAdapter::new() else {
        return;
    };
    let mut console = SerialConsole::new();
    console.feed(data);
    let mut controller = Controller::new(
        BoardHardware::new(),
        SmartUart::new(),
        console,
        ConfigStore::new(nvs),
    );
    // One line per poll; bound the loop by input length.
    for _ in 0..=data.len() {
        controller.poll();
    }
});
