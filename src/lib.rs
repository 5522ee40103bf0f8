//! A USB device controller driver for Nuvoton NUC121, NUC125, and NUC126 processors
//!
//! `nuc-usbd` drives the full-speed USBD peripheral. It manages the
//! peripheral's eight hardware endpoint slots and its USB SRAM, breaks
//! transfers into packets, and reports bus and transfer events to your USB
//! device stack through an [`EventHandler`].
//!
//! Endpoint addresses, endpoint types, and errors are the [`usb-device`] types.
//!
//! To interface the library, you must define a safe implementation of [`Peripherals`].
//! See the peripherals documentation for more information.
//!
//! # Example
//!
//! ```no_run
//! use nuc_usbd::{Config, Driver, EventHandler, TransferResult, Variant};
//! use usb_device::endpoint::{EndpointAddress, EndpointType};
//! # struct Ps; unsafe impl nuc_usbd::Peripherals for Ps {
//! #   fn usbd(&self) -> *const () { 0x4006_0000 as _ } fn sram(&self) -> *const () { 0x4006_0100 as _ } }
//!
//! struct Stack;
//! impl EventHandler for Stack {
//!     fn bus_reset(&mut self) {}
//!     fn suspend(&mut self) {}
//!     fn resume(&mut self) {}
//!     fn setup_received(&mut self, setup: &[u8; 8]) { /* ... */ }
//!     fn transfer_complete(&mut self, address: EndpointAddress, bytes: usize, result: TransferResult) {}
//! }
//!
//! let mut driver = Driver::new(Ps, Variant::Nuc121);
//! driver.initialize(Config::default());
//! driver.open(EndpointAddress::from(0x81), 64, EndpointType::Bulk).unwrap();
//!
//! // In the USBD interrupt handler:
//! driver.on_interrupt(&mut Stack);
//! ```
//!
//! [`usb-device`]: https://crates.io/crates/usb-device

#![no_std]

#[macro_use]
mod log;

mod buffer;
mod bus;
mod driver;
mod endpoint;
mod event;
mod ral;
mod state;

pub use bus::BusAdapter;
pub use driver::{Config, Driver, Interrupts, Variant, ENABLED_INTERRUPTS};
pub use event::{EventHandler, TransferResult};

/// A type that owns the USBD peripheral
///
/// An implementation of `Peripherals` is expected to own
///
/// - the USBD registers
/// - the USB SRAM
///
/// # Safety
///
/// `Peripherals` should only be implemented on a type that
/// owns the register block and the SRAM required for all USB
/// operation. The pointers returned by the methods are
/// assumed to be valid. The register pointer will be cast to a
/// register definition, and the SRAM pointer must address at least
/// [`Variant::sram_size`] bytes.
///
/// # Example
///
/// A safe implementation of `Peripherals` that owns a peripheral access
/// crate's `USBD` instance. Assume that `pac` is your PAC.
///
/// ```
/// # mod pac { pub struct USBD; impl USBD { pub const PTR: *const () = 0x4006_0000 as _; } }
/// use nuc_usbd::Peripherals;
///
/// struct Usbd(pac::USBD);
///
/// unsafe impl Peripherals for Usbd {
///     fn usbd(&self) -> *const () {
///         pac::USBD::PTR
///     }
///     fn sram(&self) -> *const () {
///         (pac::USBD::PTR as usize + 0x100) as *const ()
///     }
/// }
///
/// let usbd = Usbd(pac::USBD);
/// assert_eq!(usbd.usbd(), 0x4006_0000 as *const ());
/// ```
pub unsafe trait Peripherals {
    /// Returns the address of the USBD registers
    fn usbd(&self) -> *const ();
    /// Returns the address of the USB SRAM
    fn sram(&self) -> *const ();
}
