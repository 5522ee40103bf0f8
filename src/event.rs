//! Events signaled to the USB device stack
//!
//! The driver calls into an [`EventHandler`] from its interrupt entry point.
//! Handlers run in interrupt context; they must return promptly, and they
//! must not block.

use usb_device::endpoint::EndpointAddress;

/// Outcome of a transfer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt-03", derive(defmt_03::Format))]
#[non_exhaustive]
pub enum TransferResult {
    /// All requested bytes moved, or an OUT transfer ended with a short packet.
    Success,
}

/// Receives bus and transfer events from the driver
///
/// Implement this on your USB device stack, then supply it to
/// [`Driver::on_interrupt`](crate::Driver::on_interrupt).
pub trait EventHandler {
    /// The host reset the bus.
    ///
    /// Every endpoint's data toggle is DATA0, and the device address is zero.
    fn bus_reset(&mut self);
    /// The bus has been idle long enough to suspend.
    fn suspend(&mut self);
    /// The host resumed the bus.
    fn resume(&mut self);
    /// A start-of-frame token arrived.
    fn start_of_frame(&mut self) {}
    /// A setup packet arrived on the control endpoint.
    fn setup_received(&mut self, setup: &[u8; 8]);
    /// A transfer started with [`begin_transfer`](crate::Driver::begin_transfer)
    /// completed.
    ///
    /// For the control IN endpoint, completion is signaled per packet.
    fn transfer_complete(&mut self, address: EndpointAddress, bytes: usize, result: TransferResult);
}
