//! Integration tests for `M500`-`M503` against a recording storage port.

use robocore::config::{ConfigStore, EEPROM_OFFSET, EEPROM_VERSION};
use robocore::protocol::Controller;

use crate::mock_hw::{CaptureConsole, MockHardware, MockSerialLink, MockStorage, exec, rig};

#[test]
fn save_invalidates_the_tag_first() {
    let mut c = rig();
    assert_eq!(exec(&mut c, &["M1", "M500"]), "<M1/>\r\n<M500/>\r\n");

    let writes = &c.store().storage().writes;
    assert_eq!(writes.len(), 3);
    let tag = EEPROM_OFFSET..EEPROM_OFFSET + 3;
    assert_eq!(&writes[0].1[tag.clone()], b"000");
    assert_eq!(&writes[1].1[tag.clone()], b"000");
    assert_eq!(&writes[2].1[tag], EEPROM_VERSION);
    assert!(writes[2].1.len() > writes[0].1.len());
}

#[test]
fn saved_settings_survive_a_restart() {
    let mut c = rig();
    exec(&mut c, &["M1", "M500"]);

    let mut storage = MockStorage::new();
    storage.data = c.store().storage().data.clone();
    let mut fresh = Controller::new(
        MockHardware::new(),
        MockSerialLink::new(),
        CaptureConsole::new(),
        ConfigStore::new(storage),
    );
    assert!(fresh.realtime_output());
    assert!(exec(&mut fresh, &["M503"]).starts_with("<eeprom>\r\n1 1\r\n"));
}

#[test]
fn interrupted_save_reads_back_as_defaults() {
    let mut c = rig();
    exec(&mut c, &["M1", "M500"]);

    // Keep only the first two writes: the tag was never restored.
    let mut storage = MockStorage::new();
    for (key, image) in c.store().storage().writes.iter().take(2) {
        storage.data.insert(key.clone(), image.clone());
    }
    let fresh = Controller::new(
        MockHardware::new(),
        MockSerialLink::new(),
        CaptureConsole::new(),
        ConfigStore::new(storage),
    );
    assert!(!fresh.realtime_output());
}

#[test]
fn reload_and_factory_defaults() {
    let mut c = rig();
    exec(&mut c, &["M1", "M500", "M0"]);
    assert!(!c.realtime_output());

    assert_eq!(exec(&mut c, &["M501"]), "<M501/>\r\n");
    assert!(c.realtime_output());

    assert_eq!(exec(&mut c, &["M502"]), "<M502/>\r\n");
    assert!(!c.realtime_output());
    assert_eq!(
        exec(&mut c, &["M503"]),
        "<eeprom>\r\n1 0\r\n2 2000\r\n3 115200\r\n4 115200\r\n5 2000\r\n6 0\r\n<eeprom/>\r\n"
    );
}
