//! Clock tree and peripheral bring-up for the STM32H753.

use defmt::info;
use embassy_stm32::{rcc::*, Config, Peripherals};

/// Clock configuration used by the firmware.
///
/// - **480 MHz** SYSCLK from PLL1 fed by the 16 MHz HSI
/// - **240 MHz** AHB clock
/// - **120 MHz** APB1 to APB4
/// - **48 MHz** HSI48 for the OTG_HS kernel clock, trimmed from USB SOF packets
/// - **Scale0** voltage scaling
///
/// # Returns
///
/// An [`embassy_stm32::Config`] ready for [`embassy_stm32::init`].
pub fn clock_config() -> Config {
    let mut config = Config::default();

    // 16 MHz HSI, undivided
    config.rcc.hsi = Some(HSIPrescaler::DIV1);
    // Low-power internal oscillator
    config.rcc.csi = true;
    // 48 MHz for USB, trimmed against the host's start-of-frame packets
    config.rcc.hsi48 = Some(Hsi48Config { sync_from_usb: true });

    // PLL1 = HSI(16 MHz) / 4 * 60 / 2 = 480 MHz

    config.rcc.pll1 = Some(Pll {
        source: PllSource::HSI,
        prediv: PllPreDiv::DIV4,  // 4 MHz PLL input
        mul: PllMul::MUL60,       // 240 MHz VCO
        divp: Some(PllDiv::DIV2), // 480 MHz P output
        divq: None,
        divr: None,
    });

    config.rcc.sys = Sysclk::PLL1_P; // 480 MHz
    config.rcc.ahb_pre = AHBPrescaler::DIV2; // 240 MHz
    config.rcc.apb1_pre = APBPrescaler::DIV2; // 120 MHz
    config.rcc.apb2_pre = APBPrescaler::DIV2; // 120 MHz
    config.rcc.apb3_pre = APBPrescaler::DIV2; // 120 MHz
    config.rcc.apb4_pre = APBPrescaler::DIV2; // 120 MHz

    // Required for 480 MHz
    config.rcc.voltage_scale = VoltageScale::Scale0;

    // OTG_HS kernel clock
    config.rcc.mux.usbsel = mux::Usbsel::HSI48;

    config
}

/// Apply [`clock_config`] and take ownership of the peripherals.
///
/// # Returns
///
/// The [`Peripherals`] singletons, to be split up with the `claim_*!` macros.
///
/// # Panics
///
/// Panics if called twice, as [`embassy_stm32::init`] does.
pub fn init_system() -> Peripherals {
    let peripherals = embassy_stm32::init(clock_config());
    info!("Clocks configured, SYSCLK 480 MHz");
    peripherals
}
