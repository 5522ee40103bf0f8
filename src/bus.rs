//! Interrupt-safe driver adapter
//!
//! [`BusAdapter`] wraps a [`Driver`] in a critical-section mutex, so that the
//! same driver can be shared between thread mode and the USBD interrupt
//! handler.

use crate::{
    driver::{Config, Driver},
    event::EventHandler,
};
use core::cell::RefCell;
use cortex_m::interrupt::{self, Mutex};
use usb_device::{
    endpoint::{EndpointAddress, EndpointType},
    UsbError,
};

/// A [`Driver`] that you can share with an interrupt handler
///
/// Every method runs in a critical section. Event handlers supplied to
/// [`on_interrupt()`](BusAdapter::on_interrupt) run inside that critical
/// section, so they must not call back into the adapter; doing so panics.
///
/// # Example
///
/// ```no_run
/// use nuc_usbd::{BusAdapter, Config, Driver, Variant};
/// # struct Ps; unsafe impl nuc_usbd::Peripherals for Ps {
/// #   fn usbd(&self) -> *const () { 0x4006_0000 as _ } fn sram(&self) -> *const () { 0x4006_0100 as _ } }
///
/// let driver = Driver::new(Ps, Variant::Nuc121);
/// let bus = BusAdapter::new(driver, Config::default());
/// bus.set_interrupts(true);
/// ```
pub struct BusAdapter {
    driver: Mutex<RefCell<Driver>>,
}

impl BusAdapter {
    /// Initialize `driver` with `config`, then wrap it
    pub fn new(mut driver: Driver, config: Config) -> Self {
        driver.initialize(config);
        BusAdapter {
            driver: Mutex::new(RefCell::new(driver)),
        }
    }

    /// Interrupt-safe, mutable access to the driver
    pub fn with_driver<R>(&self, func: impl FnOnce(&mut Driver) -> R) -> R {
        interrupt::free(|cs| {
            let driver = self.driver.borrow(cs);
            let mut driver = driver.borrow_mut();
            func(&mut driver)
        })
    }

    pub fn set_interrupts(&self, interrupts: bool) {
        self.with_driver(|driver| driver.set_interrupts(interrupts));
    }

    pub fn set_address(&self, address: u8) {
        self.with_driver(|driver| driver.set_address(address));
    }

    pub fn remote_wakeup(&self) {
        self.with_driver(|driver| driver.remote_wakeup());
    }

    pub fn open(
        &self,
        address: EndpointAddress,
        max_packet_size: u16,
        kind: EndpointType,
    ) -> Result<(), UsbError> {
        self.with_driver(|driver| driver.open(address, max_packet_size, kind))
    }

    /// Start a transfer
    ///
    /// # Safety
    ///
    /// See [`Driver::begin_transfer`].
    pub unsafe fn begin_transfer(
        &self,
        address: EndpointAddress,
        buffer: *mut u8,
        total_bytes: u16,
    ) -> Result<(), UsbError> {
        self.with_driver(|driver| driver.begin_transfer(address, buffer, total_bytes))
    }

    pub fn stall(&self, address: EndpointAddress) -> Result<(), UsbError> {
        self.with_driver(|driver| driver.stall(address))
    }

    pub fn clear_stall(&self, address: EndpointAddress) -> Result<(), UsbError> {
        self.with_driver(|driver| driver.clear_stall(address))
    }

    pub fn is_stalled(&self, address: EndpointAddress) -> Result<bool, UsbError> {
        self.with_driver(|driver| driver.is_stalled(address))
    }

    /// Service the USBD interrupt; call this from your interrupt handler
    pub fn on_interrupt<H: EventHandler>(&self, handler: &mut H) {
        self.with_driver(|driver| driver.on_interrupt(handler));
    }
}
