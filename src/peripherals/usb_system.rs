//! USB OTG_HS device over the external ULPI PHY.
//!
//! [`UsbSystem`] owns the builder while classes register their endpoints;
//! [`UsbSystem::into_device`] then freezes the configuration and the device is
//! driven by [`usb_task`].

use defmt::info;
use embassy_stm32::{
    bind_interrupts,
    peripherals::{PA3, PA5, PB0, PB1, PB10, PB11, PB12, PB13, PB5, PC0, PC2, PC3, USB_OTG_HS},
    usb::{self, Driver, InterruptHandler},
    Peri,
};
use embassy_usb::{Builder, UsbDevice};
use static_cell::ConstStaticCell;

/// Maximum packet size of the high-speed bulk endpoints
pub const MAX_PACKET_SIZE: u16 = 512;

/// USB driver type used by every class in the firmware
pub type UsbDriver<'d> = Driver<'d, USB_OTG_HS>;

bind_interrupts!(
    /// OTG_HS interrupt binding
    pub struct UsbInterrupts {
        OTG_HS => InterruptHandler<USB_OTG_HS>;
    }
);

/// Peripherals and buffers consumed by [`UsbSystem::new`]
pub struct UsbClaims<'d> {
    pub otg: Peri<'d, USB_OTG_HS>,
    pub ulpi_clk: Peri<'d, PA5>,
    pub ulpi_dir: Peri<'d, PC2>,
    pub ulpi_nxt: Peri<'d, PC3>,
    pub ulpi_stp: Peri<'d, PC0>,
    pub ulpi_data: (
        Peri<'d, PA3>,
        Peri<'d, PB0>,
        Peri<'d, PB1>,
        Peri<'d, PB10>,
        Peri<'d, PB11>,
        Peri<'d, PB12>,
        Peri<'d, PB13>,
        Peri<'d, PB5>,
    ),
    pub buffers: &'d mut UsbBuffers,
}

/// Move the USB peripherals out of `embassy_stm32::Peripherals`.
///
/// Can only be expanded once, the buffers are a [`ConstStaticCell`].
#[macro_export]
macro_rules! claim_usb {
    ($peripherals:expr) => {{
        $crate::peripherals::usb_system::UsbClaims {
            otg: $peripherals.USB_OTG_HS,
            ulpi_clk: $peripherals.PA5,
            ulpi_dir: $peripherals.PC2,
            ulpi_nxt: $peripherals.PC3,
            ulpi_stp: $peripherals.PC0,
            ulpi_data: (
                $peripherals.PA3,
                $peripherals.PB0,
                $peripherals.PB1,
                $peripherals.PB10,
                $peripherals.PB11,
                $peripherals.PB12,
                $peripherals.PB13,
                $peripherals.PB5,
            ),
            buffers: $crate::peripherals::usb_system::USB_BUFFERS.take(),
        }
    }};
}

/// Descriptor and endpoint memory for the device.
#[repr(C, align(32))]
pub struct UsbBuffers {
    /// Shared OUT endpoint memory, room for two full packets
    pub ep_out: [u8; MAX_PACKET_SIZE as usize * 2],
    pub config_descriptor: [u8; 256],
    pub bos_descriptor: [u8; 256],
    pub control: [u8; 64],
}

impl UsbBuffers {
    pub const fn new() -> Self {
        Self {
            ep_out: [0; MAX_PACKET_SIZE as usize * 2],
            config_descriptor: [0; 256],
            bos_descriptor: [0; 256],
            control: [0; 64],
        }
    }
}

impl Default for UsbBuffers {
    fn default() -> Self {
        Self::new()
    }
}

pub static USB_BUFFERS: ConstStaticCell<UsbBuffers> = ConstStaticCell::new(UsbBuffers::new());

/// USB device under construction.
pub struct UsbSystem<'d> {
    builder: Builder<'d, UsbDriver<'d>>,
}

impl<'d> UsbSystem<'d> {
    /// Configure the driver and device descriptors. No class is registered yet.
    pub fn new(claims: UsbClaims<'d>) -> Self {
        let mut device_config = embassy_usb::Config::new(0xc0de, 0xcafe);
        device_config.manufacturer = Some("NUbots");
        device_config.product = Some("calstream console");
        device_config.serial_number = Some(env!("CARGO_PKG_VERSION"));
        device_config.max_power = 100;

        let mut driver_config = usb::Config::default();
        driver_config.vbus_detection = true;

        let (d0, d1, d2, d3, d4, d5, d6, d7) = claims.ulpi_data;
        let driver = Driver::new_hs_ulpi(
            claims.otg,
            UsbInterrupts,
            claims.ulpi_clk,
            claims.ulpi_dir,
            claims.ulpi_nxt,
            claims.ulpi_stp,
            d0,
            d1,
            d2,
            d3,
            d4,
            d5,
            d6,
            d7,
            &mut claims.buffers.ep_out,
            driver_config,
        );

        let builder = Builder::new(
            driver,
            device_config,
            &mut claims.buffers.config_descriptor,
            &mut claims.buffers.bos_descriptor,
            &mut [],
            &mut claims.buffers.control,
        );

        info!("USB: OTG_HS configured with ULPI PHY");
        Self { builder }
    }

    /// Builder for registering class endpoints
    pub fn builder(&mut self) -> &mut Builder<'d, UsbDriver<'d>> {
        &mut self.builder
    }

    /// Finish registration and produce the device to run
    pub fn into_device(self) -> UsbDevice<'d, UsbDriver<'d>> {
        info!("USB: device built");
        self.builder.build()
    }
}

/// Drive the USB device state machine forever
#[embassy_executor::task]
pub async fn usb_task(mut device: UsbDevice<'static, UsbDriver<'static>>) -> ! {
    device.run().await
}
