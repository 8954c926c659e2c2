//! RoboCore firmware entry point.
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                    Adapters (outer ring)                     │
//! │                                                              │
//! │  SerialConsole (UART0)   SmartUart (UART1)   NvsAdapter      │
//! │  LoggedConsole           BoardHardware (GPIO/LEDC/ADC/ISR)   │
//! │                                                              │
//! │  ─────────────── Port Trait Boundary ─────────────────       │
//! │                                                              │
//! │  ┌────────────────────────────────────────────────────────┐  │
//! │  │  Controller: line protocol · slots · interlocks        │  │
//! │  └────────────────────────────────────────────────────────┘  │
//! └──────────────────────────────────────────────────────────────┘
//! ```
#![deny(unused_must_use)]

use anyhow::{Result, anyhow};
use esp_idf_hal::delay::FreeRtos;
use esp_idf_hal::gpio::AnyIOPin;
use esp_idf_hal::peripherals::Peripherals;
use esp_idf_hal::uart::{UartDriver, config::Config as UartConfig};
use esp_idf_hal::units::Hertz;
use log::{error, info};

use robocore::adapters::console::SerialConsole;
use robocore::adapters::hardware::BoardHardware;
use robocore::adapters::log_sink::LoggedConsole;
use robocore::adapters::nvs::NvsAdapter;
use robocore::adapters::smart_link::SmartUart;
use robocore::config::{ConfigStore, load_or_default};
use robocore::drivers::hw_init;
use robocore::protocol::{Controller, VERSION};

fn main() -> Result<()> {
    // ── 1. ESP-IDF bootstrap ──────────────────────────────────
    esp_idf_svc::sys::link_patches();
    esp_idf_logger::init()?;

    info!("╔══════════════════════════════════════╗");
    info!("║  RoboCore v{}                     ║", VERSION);
    info!("╚══════════════════════════════════════╝");

    if let Err(e) = hw_init::init_peripherals() {
        // The task watchdog resets the board after its timeout.
        error!("HAL init failed: {}, halting", e);
        #[allow(clippy::empty_loop)]
        loop {}
    }

    // ── 2. Persistent configuration ───────────────────────────
    let nvs = NvsAdapter::new().map_err(|e| anyhow!("NVS init failed: {e}"))?;
    let store = ConfigStore::new(nvs);
    let config = load_or_default(&store);
    info!(
        "config: console {} baud, smart link {} baud, watchdog {} ms",
        config.console_baud, config.smart_baud, config.watchdog_timeout_ms
    );

    // ── 3. UARTs ──────────────────────────────────────────────
    let peripherals = Peripherals::take()?;
    let console_uart = UartDriver::new(
        peripherals.uart0,
        peripherals.pins.gpio43,
        peripherals.pins.gpio44,
        Option::<AnyIOPin>::None,
        Option::<AnyIOPin>::None,
        &UartConfig::new().baudrate(Hertz(config.console_baud)),
    )?;
    // Smart controller header: TX on GPIO17, RX on GPIO18.
    let smart_uart = UartDriver::new(
        peripherals.uart1,
        peripherals.pins.gpio17,
        peripherals.pins.gpio18,
        Option::<AnyIOPin>::None,
        Option::<AnyIOPin>::None,
        &UartConfig::new().baudrate(Hertz(config.smart_baud)),
    )?;

    // ── 4. Controller ─────────────────────────────────────────
    let mut controller = Controller::new(
        BoardHardware::new(),
        SmartUart::new(smart_uart),
        LoggedConsole::new(SerialConsole::new(console_uart)),
        store,
    );

    info!("System ready. Entering command loop.");

    // ── 5. Command loop ───────────────────────────────────────
    loop {
        controller.poll();
        // Yield to the idle task.
        FreeRtos::delay_ms(1);
    }
}
