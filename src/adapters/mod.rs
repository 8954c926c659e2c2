//! Adapters: concrete implementations of the port traits.
//!
//! | Adapter      | Implements     | Connects to                      |
//! |--------------|----------------|----------------------------------|
//! | `hardware`   | HardwarePort   | ESP32 GPIO, LEDC, ADC, ISRs      |
//! | `console`    | ConsolePort    | UART0 command console            |
//! | `smart_link` | SerialLink     | UART1 to the smart controller    |
//! | `log_sink`   | ConsolePort    | Any console, mirrored to `log`   |
//! | `nvs`        | StoragePort    | NVS / in-memory store            |
//!
//! Every adapter has a host simulation path used by the test suites.

pub mod console;
pub mod hardware;
pub mod log_sink;
pub mod nvs;
pub mod smart_link;
