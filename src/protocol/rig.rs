//! Host controller shared by the handler tests.

use super::Controller;
use super::crc::crc16;
use crate::adapters::console::SerialConsole;
use crate::adapters::hardware::BoardHardware;
use crate::adapters::nvs::NvsAdapter;
use crate::adapters::smart_link::SmartUart;
use crate::config::ConfigStore;

pub(super) type Rig = Controller<BoardHardware, SmartUart, SerialConsole, ConfigStore<NvsAdapter>>;

pub(super) fn rig() -> Rig {
    let store = ConfigStore::new(NvsAdapter::new().unwrap());
    Controller::new(BoardHardware::new(), SmartUart::absent(), SerialConsole::new(), store)
}

/// Run each line and return everything written.
pub(super) fn send(c: &mut Rig, lines: &[&str]) -> String {
    for l in lines {
        c.run_line(l);
    }
    take(c)
}

pub(super) fn take(c: &mut Rig) -> String {
    c.console_mut().take_output()
}

pub(super) fn signed(body: &str) -> String {
    format!("{}*{}", body, crc16(body.as_bytes()))
}
