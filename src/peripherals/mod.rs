//! STM32H753 peripherals used by the firmware.

pub mod acm;
pub mod system;
pub mod usb_system;

pub use acm::{AcmConnection, LinkError};
pub use system::init_system;
pub use usb_system::{usb_task, UsbSystem};
