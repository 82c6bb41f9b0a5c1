//! CDC ACM serial port carrying the terminal and the plot stream.

use defmt::{info, Format};
pub use embassy_usb::class::cdc_acm::State;
use embassy_usb::{class::cdc_acm::CdcAcmClass, driver::EndpointError, Builder};
use static_cell::StaticCell;

use super::usb_system::{UsbDriver, MAX_PACKET_SIZE};

pub static ACM_STATE: StaticCell<State<'static>> = StaticCell::new();

/// Class state consumed by [`AcmConnection::new`]
pub struct AcmClaims<'d> {
    pub state: &'d mut State<'d>,
}

/// Allocate the class state. Can only be expanded once.
#[macro_export]
macro_rules! claim_acm {
    () => {{
        $crate::peripherals::acm::AcmClaims {
            state: $crate::peripherals::acm::ACM_STATE.init(embassy_usb::class::cdc_acm::State::new()),
        }
    }};
}

/// Failure on the serial link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Format)]
pub enum LinkError {
    /// The host closed the port or the cable was pulled
    Disconnected,
    /// A received packet did not fit the receive buffer
    Overflow,
}

impl From<EndpointError> for LinkError {
    fn from(error: EndpointError) -> Self {
        match error {
            EndpointError::BufferOverflow => LinkError::Overflow,
            EndpointError::Disabled => LinkError::Disconnected,
        }
    }
}

/// Packet-level access to the CDC ACM class.
pub struct AcmConnection<'d> {
    class: CdcAcmClass<'d, UsbDriver<'d>>,
}

impl<'d> AcmConnection<'d> {
    /// Register the CDC ACM class with the USB device.
    ///
    /// # Arguments
    ///
    /// * `builder` - USB device builder, before [`UsbSystem::into_device`](super::UsbSystem::into_device)
    /// * `claims` - Class state from `claim_acm!()`
    pub fn new(builder: &mut Builder<'d, UsbDriver<'d>>, claims: AcmClaims<'d>) -> Self {
        Self {
            class: CdcAcmClass::new(builder, claims.state, MAX_PACKET_SIZE),
        }
    }

    /// Wait until the host opens the port (DTR set)
    pub async fn wait_connection(&mut self) {
        self.class.wait_connection().await;
        info!("ACM: host connected");
    }

    /// Receive one packet of at most [`MAX_PACKET_SIZE`] bytes.
    ///
    /// # Returns
    ///
    /// * `Ok(bytes_received)` - Number of bytes written to `buffer`
    /// * `Err(LinkError::Overflow)` - The packet did not fit `buffer`
    /// * `Err(LinkError::Disconnected)` - The host went away
    pub async fn receive_packet(&mut self, buffer: &mut [u8]) -> Result<usize, LinkError> {
        Ok(self.class.read_packet(buffer).await?)
    }

    /// Send `data` split into full-size packets.
    ///
    /// A transfer that ends on a packet boundary is terminated with a
    /// zero-length packet so the host does not wait for more.
    ///
    /// # Returns
    ///
    /// * `Ok(())` - Every packet was queued
    /// * `Err(LinkError::Disconnected)` - The host went away mid-transfer
    pub async fn write_all(&mut self, data: &[u8]) -> Result<(), LinkError> {
        let packet_size = usize::from(self.class.max_packet_size());
        for chunk in data.chunks(packet_size) {
            self.class.write_packet(chunk).await?;
        }
        if !data.is_empty() && data.len() % packet_size == 0 {
            self.class.write_packet(&[]).await?;
        }
        Ok(())
    }
}
