//! One-shot peripheral initialization and raw register helpers.
//!
//! Configures the ADC unit and the GPIO ISR service at boot, and wraps the
//! ESP-IDF sys calls the board adapter needs per pin: GPIO direction and
//! level, oneshot ADC reads, LEDC timers/channels and per-pin ISR hooks.

#[cfg(target_os = "espidf")]
use esp_idf_svc::sys::*;

// ── Error type ────────────────────────────────────────────────

/// Errors during peripheral initialization.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HwInitError {
    AdcInitFailed(i32),
    GpioConfigFailed(i32),
    LedcInitFailed(i32),
    IsrInstallFailed(i32),
}

impl core::fmt::Display for HwInitError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::AdcInitFailed(rc) => write!(f, "ADC1 init failed (rc={})", rc),
            Self::GpioConfigFailed(rc) => write!(f, "GPIO config failed (rc={})", rc),
            Self::LedcInitFailed(rc) => write!(f, "LEDC timer/channel config failed (rc={})", rc),
            Self::IsrInstallFailed(rc) => write!(f, "GPIO ISR service install failed (rc={})", rc),
        }
    }
}

impl std::error::Error for HwInitError {}

#[cfg(target_os = "espidf")]
use log::info;

/// Clock divisor for a timer prescale code (`0` stops the clock).
pub const fn prescale_divisor(code: u8) -> u32 {
    match code {
        0 => 0,
        1 => 1,
        2 => 8,
        3 => 64,
        4 => 256,
        _ => 1024,
    }
}

/// Compare register width encoded by a waveform generation mode.
pub const fn bits_for_wave_mode(wave_mode: u8) -> u8 {
    match wave_mode {
        0b0110 => 9,
        0b0111 => 10,
        _ => 8,
    }
}

/// PWM frequency of a phase-correct timer on a 16 MHz reference clock.
pub const fn pwm_frequency_hz(prescale: u8, bits: u8) -> u32 {
    let div = prescale_divisor(prescale);
    if div == 0 {
        return 0;
    }
    let f = 16_000_000 / ((2u32 << bits) * div);
    if f == 0 { 1 } else { f }
}

#[cfg(target_os = "espidf")]
pub fn init_peripherals() -> Result<(), HwInitError> {
    // SAFETY: called once from main() before the command loop starts.
    unsafe {
        init_adc()?;
        let ret = gpio_install_isr_service(0);
        if ret != ESP_OK && ret != ESP_ERR_INVALID_STATE {
            return Err(HwInitError::IsrInstallFailed(ret));
        }
    }
    info!("hw_init: ADC1 and ISR service ready");
    Ok(())
}

#[cfg(not(target_os = "espidf"))]
pub fn init_peripherals() -> Result<(), HwInitError> {
    log::info!("hw_init(sim): peripheral init skipped");
    Ok(())
}

// ── ADC (oneshot) ─────────────────────────────────────────────

#[cfg(target_os = "espidf")]
static mut ADC1_HANDLE: adc_oneshot_unit_handle_t = core::ptr::null_mut();

/// SAFETY: ADC1_HANDLE is written once by `init_adc()` before the command
/// loop starts; all reads come from the main task.
#[cfg(target_os = "espidf")]
unsafe fn adc1_handle() -> adc_oneshot_unit_handle_t {
    unsafe { ADC1_HANDLE }
}

#[cfg(target_os = "espidf")]
unsafe fn init_adc() -> Result<(), HwInitError> {
    let init_cfg = adc_oneshot_unit_init_cfg_t {
        unit_id: adc_unit_t_ADC_UNIT_1,
        ulp_mode: adc_ulp_mode_t_ADC_ULP_MODE_DISABLE,
        ..Default::default()
    };
    let ret = unsafe { adc_oneshot_new_unit(&init_cfg, &raw mut ADC1_HANDLE) };
    if ret != ESP_OK {
        return Err(HwInitError::AdcInitFailed(ret));
    }

    let chan_cfg = adc_oneshot_chan_cfg_t {
        atten: adc_atten_t_ADC_ATTEN_DB_12,
        bitwidth: adc_bitwidth_t_ADC_BITWIDTH_12,
    };
    // GPIO1..=10 are ADC1 channels 0..=9 on the S3.
    for channel in 0..10 {
        let ret = unsafe { adc_oneshot_config_channel(adc1_handle(), channel, &chan_cfg) };
        if ret != ESP_OK {
            return Err(HwInitError::AdcInitFailed(ret));
        }
    }
    Ok(())
}

/// Oneshot ADC read scaled to 10 bits. Pins without an ADC1 channel read 0.
#[cfg(target_os = "espidf")]
pub fn adc_read(pin: u8) -> u16 {
    if !(1..=10).contains(&pin) {
        return 0;
    }
    let mut raw: i32 = 0;
    // SAFETY: adc1_handle() contract, main-task access only.
    let ret = unsafe { adc_oneshot_read(adc1_handle(), u32::from(pin - 1), &mut raw) };
    if ret != ESP_OK {
        return 0;
    }
    (raw.max(0) as u16) >> 2
}

// ── GPIO ──────────────────────────────────────────────────────

#[cfg(target_os = "espidf")]
pub fn gpio_configure(pin: u8, mode: crate::app::ports::PinMode) -> Result<(), HwInitError> {
    use crate::app::ports::PinMode;

    let (io_mode, pull_up) = match mode {
        PinMode::Input => (gpio_mode_t_GPIO_MODE_INPUT, gpio_pullup_t_GPIO_PULLUP_DISABLE),
        PinMode::InputPullup => (gpio_mode_t_GPIO_MODE_INPUT, gpio_pullup_t_GPIO_PULLUP_ENABLE),
        // Input-output so that reads of a driven pin return the driven level.
        PinMode::Output => (gpio_mode_t_GPIO_MODE_INPUT_OUTPUT, gpio_pullup_t_GPIO_PULLUP_DISABLE),
    };
    let cfg = gpio_config_t {
        pin_bit_mask: 1u64 << pin,
        mode: io_mode,
        pull_up_en: pull_up,
        pull_down_en: gpio_pulldown_t_GPIO_PULLDOWN_DISABLE,
        intr_type: gpio_int_type_t_GPIO_INTR_DISABLE,
    };
    // SAFETY: gpio_config only touches the pins in the mask.
    let ret = unsafe { gpio_config(&cfg) };
    if ret != ESP_OK {
        return Err(HwInitError::GpioConfigFailed(ret));
    }
    Ok(())
}

#[cfg(target_os = "espidf")]
pub fn gpio_write(pin: u8, high: bool) {
    // SAFETY: register write on a configured output; main task only.
    unsafe {
        gpio_set_level(i32::from(pin), u32::from(high));
    }
}

#[cfg(target_os = "espidf")]
pub fn gpio_read(pin: u8) -> bool {
    // SAFETY: read-only register access.
    (unsafe { gpio_get_level(i32::from(pin)) }) != 0
}

/// Microsecond timestamp from the RTC counter.
#[cfg(target_os = "espidf")]
pub fn micros() -> i64 {
    // SAFETY: esp_timer_get_time is a counter read, safe from any context.
    unsafe { esp_timer_get_time() }
}

// ── LEDC PWM ─────────────────────────────────────────────────

/// Program an LEDC timer for the given prescale code and resolution.
#[cfg(target_os = "espidf")]
pub fn ledc_timer(timer: u32, prescale: u8, bits: u8) -> Result<(), HwInitError> {
    let freq_hz = pwm_frequency_hz(prescale, bits);
    if freq_hz == 0 {
        // SAFETY: pausing a configured timer only stops its counter.
        unsafe { ledc_timer_pause(ledc_mode_t_LEDC_LOW_SPEED_MODE, timer) };
        return Ok(());
    }
    let cfg = ledc_timer_config_t {
        speed_mode: ledc_mode_t_LEDC_LOW_SPEED_MODE,
        timer_num: timer,
        duty_resolution: u32::from(bits),
        freq_hz,
        clk_cfg: soc_periph_ledc_clk_src_legacy_t_LEDC_AUTO_CLK,
        ..Default::default()
    };
    // SAFETY: main-task only; cfg outlives the call.
    let ret = unsafe { ledc_timer_config(&cfg) };
    if ret != ESP_OK {
        return Err(HwInitError::LedcInitFailed(ret));
    }
    unsafe { ledc_timer_resume(ledc_mode_t_LEDC_LOW_SPEED_MODE, timer) };
    Ok(())
}

/// Route an LEDC channel to a GPIO, starting at duty 0.
#[cfg(target_os = "espidf")]
pub fn ledc_bind(channel: u32, timer: u32, pin: u8) -> Result<(), HwInitError> {
    let cfg = ledc_channel_config_t {
        speed_mode: ledc_mode_t_LEDC_LOW_SPEED_MODE,
        channel,
        timer_sel: timer,
        gpio_num: i32::from(pin),
        duty: 0,
        hpoint: 0,
        ..Default::default()
    };
    // SAFETY: main-task only; cfg outlives the call.
    let ret = unsafe { ledc_channel_config(&cfg) };
    if ret != ESP_OK {
        return Err(HwInitError::LedcInitFailed(ret));
    }
    Ok(())
}

#[cfg(target_os = "espidf")]
pub fn ledc_set(channel: u32, duty: u32) {
    // SAFETY: channel was bound by ledc_bind(); main-task only.
    unsafe {
        ledc_set_duty(ledc_mode_t_LEDC_LOW_SPEED_MODE, channel, duty);
        ledc_update_duty(ledc_mode_t_LEDC_LOW_SPEED_MODE, channel);
    }
}

/// Disconnect the channel output and park it LOW.
#[cfg(target_os = "espidf")]
pub fn ledc_off(channel: u32) {
    // SAFETY: channel was bound by ledc_bind(); main-task only.
    unsafe {
        ledc_stop(ledc_mode_t_LEDC_LOW_SPEED_MODE, channel, 0);
    }
}

// ── GPIO ISR hooks ────────────────────────────────────────────

/// Register `handler` for any edge on `pin`; `arg` is handed back on each call.
///
/// # Safety
/// `arg` must stay valid until [`isr_remove`] is called for the pin.
#[cfg(target_os = "espidf")]
pub unsafe fn isr_add(
    pin: u8,
    handler: unsafe extern "C" fn(*mut core::ffi::c_void),
    arg: *mut core::ffi::c_void,
) {
    let gpio = i32::from(pin);
    unsafe {
        gpio_set_intr_type(gpio, gpio_int_type_t_GPIO_INTR_ANYEDGE);
        gpio_isr_handler_add(gpio, Some(handler), arg);
        gpio_intr_enable(gpio);
    }
}

#[cfg(target_os = "espidf")]
pub fn isr_remove(pin: u8) {
    let gpio = i32::from(pin);
    // SAFETY: removing an absent handler is a no-op in ESP-IDF.
    unsafe {
        gpio_intr_disable(gpio);
        gpio_isr_handler_remove(gpio);
    }
}
