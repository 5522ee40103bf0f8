//! Internal USB driver
//!
//! The driver owns the USBD registers, the USB SRAM, and the transfer table.
//! Every entry point takes `&mut self`, including the interrupt entry point,
//! so the thread-mode caller and the interrupt handler never touch a transfer
//! record at the same time. See [`BusAdapter`](crate::BusAdapter) if you need
//! to share a driver with an interrupt handler.

use crate::{
    buffer::{self, PacketMemory},
    endpoint::{Endpoint, Slot},
    event::{EventHandler, TransferResult},
    ral,
    state::{self, Transfer, TransferTable},
};
use core::ptr::NonNull;
use usb_device::{
    endpoint::{EndpointAddress, EndpointType},
    UsbDirection, UsbError,
};

/// Setup packets always land at the bottom of the SRAM.
const SETUP_OFFSET: usize = 0;

/// ATTR value recommended by the vendor: PHY, USB, pull-up, and byte mode enabled.
const ATTR_ENABLE: u32 = 0x7D0;

bitflags::bitflags! {
    /// USBD interrupt causes
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Interrupts: u32 {
        /// Bus reset, suspend, or resume
        const BUS = ral::usbd::INTSTS::BUSIF::mask;
        /// Endpoint transaction complete
        const USB = ral::usbd::INTSTS::USBIF::mask;
        /// VBUS plugged or unplugged
        const VBUS_DETECT = ral::usbd::INTSTS::VBDETIF::mask;
        /// Start of frame
        const SOF = ral::usbd::INTSTS::SOFIF::mask;
        /// Setup packet received
        const SETUP = ral::usbd::INTSTS::SETUP::mask;
    }
}

bitflags::bitflags! {
    /// Bus state, sampled from ATTR when a bus interrupt fires
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    struct BusState: u32 {
        const RESET = ral::usbd::ATTR::USBRST::mask;
        const SUSPEND = ral::usbd::ATTR::SUSPEND::mask;
        const RESUME = ral::usbd::ATTR::RESUME::mask;
        const L1_SUSPEND = ral::usbd::ATTR::L1SUSPEND::mask;
        const L1_RESUME = ral::usbd::ATTR::L1RESUME::mask;
    }
}

/// The interrupts enabled by [`Driver::initialize`]
pub const ENABLED_INTERRUPTS: Interrupts = Interrupts::VBUS_DETECT
    .union(Interrupts::BUS)
    .union(Interrupts::SETUP)
    .union(Interrupts::USB)
    .union(Interrupts::SOF);

/// Processor family member
///
/// The variants differ in the size of their USB SRAM.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt-03", derive(defmt_03::Format))]
pub enum Variant {
    /// NUC121 and NUC125, with 768 bytes of USB SRAM.
    Nuc121,
    /// NUC126, with 512 bytes of USB SRAM.
    Nuc126,
}

impl Variant {
    /// Size of the USB SRAM, in bytes
    pub const fn sram_size(self) -> usize {
        match self {
            Variant::Nuc121 => 768,
            Variant::Nuc126 => 512,
        }
    }
}

/// Driver configuration, applied by [`Driver::initialize`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt-03", derive(defmt_03::Format))]
pub struct Config {
    /// Max packet size of the control endpoint. One of 8, 16, 32, or 64.
    ///
    /// Each control direction reserves this much USB SRAM.
    pub ep0_max_packet_size: u16,
    /// Acknowledge link power management (LPM) tokens, and treat L1 sleep
    /// and wake like suspend and resume.
    pub lpm: bool,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            ep0_max_packet_size: 64,
            lpm: false,
        }
    }
}

/// A USB driver
///
/// After you allocate a `Driver` with [`new()`](Driver::new), you must
/// call [`initialize()`](Driver::initialize) before using any other method.
pub struct Driver {
    usbd: ral::usbd::Instance,
    memory: PacketMemory,
    variant: Variant,
    config: Config,
    allocator: buffer::Allocator,
    transfers: TransferTable,
    /// Address requested by the host, applied after the status stage.
    pending_address: Option<u8>,
    /// Set while a control IN data stage is sending full packets.
    ctrl_in_active: bool,
}

// Safety: the transfer table's pointers are only dereferenced through the
// driver, and the caller of begin_transfer() promised they stay valid.
unsafe impl Send for Driver {}

impl Driver {
    /// Create a new `Driver`
    ///
    /// Creation does nothing except for take ownership of the peripheral.
    /// After creating the driver, call [`initialize()`](Driver::initialize).
    ///
    /// # Panics
    ///
    /// Panics if the peripherals report a null register block or SRAM address.
    pub fn new<P: crate::Peripherals>(peripherals: P, variant: Variant) -> Self {
        let usbd = ral::instance(&peripherals);
        let sram =
            NonNull::new(peripherals.sram() as *mut u8).expect("USB SRAM address is null");
        let capacity = variant.sram_size();
        Driver {
            usbd,
            // Safety: Peripherals implementer guarantees that the SRAM
            // belongs to this peripheral, and that it's not shared.
            memory: unsafe { PacketMemory::new(sram, capacity) },
            variant,
            config: Config::default(),
            // Nothing to allocate until initialize() reserves the control buffers.
            allocator: buffer::Allocator::new(capacity, capacity),
            transfers: TransferTable::new(),
            pending_address: None,
            ctrl_in_active: false,
        }
    }

    /// Returns the processor variant
    pub fn variant(&self) -> Variant {
        self.variant
    }

    /// Returns the active configuration
    pub fn config(&self) -> Config {
        self.config
    }

    /// Reset every endpoint, reserve the control buffers, enable interrupts,
    /// and attach to the bus
    ///
    /// Assumes that the USB clocks and pins are already configured. You may
    /// call this again to fully reinitialize the driver; all endpoints, and
    /// all USB SRAM allocations, are released.
    ///
    /// # Panics
    ///
    /// Panics if the control endpoint max packet size isn't 8, 16, 32, or 64.
    pub fn initialize(&mut self, config: Config) {
        let ep0_len = config.ep0_max_packet_size;
        assert!(
            matches!(ep0_len, 8 | 16 | 32 | 64),
            "Invalid control endpoint max packet size"
        );
        self.config = config;

        let lpm = if config.lpm {
            ral::usbd::ATTR::LPMACK::mask
        } else {
            0
        };
        ral::write_reg!(ral::usbd, self.usbd, ATTR, ATTR_ENABLE | lpm);

        self.detach();

        ral::write_reg!(ral::usbd, self.usbd, STBUFSEG, SETUP_OFFSET as u32);

        for slot in Slot::all() {
            Endpoint::new(&self.usbd, slot).disable();
        }
        self.transfers.reset();

        let ctrl_in_offset = SETUP_OFFSET + buffer::SETUP_LEN;
        let ctrl_out_offset = ctrl_in_offset + ep0_len as usize;
        for (direction, segment) in [
            (UsbDirection::In, ctrl_in_offset),
            (UsbDirection::Out, ctrl_out_offset),
        ] {
            let slot = Slot::control(direction);
            let ep = Endpoint::new(&self.usbd, slot);
            ep.configure(
                EndpointAddress::from_parts(0, direction),
                EndpointType::Control,
            );
            ep.set_segment(segment);
            self.transfers
                .get_mut(slot)
                .set_packet_limits(ep0_len, ep0_len);
        }

        self.allocator
            .reset(ctrl_out_offset + ep0_len as usize);
        self.pending_address = None;
        self.ctrl_in_active = false;

        self.attach();

        ral::write_reg!(ral::usbd, self.usbd, INTSTS, ENABLED_INTERRUPTS.bits());
        ral::write_reg!(ral::usbd, self.usbd, INTEN, ENABLED_INTERRUPTS.bits());
        debug!("INITIALIZED {} BYTES FREE", self.allocator.available());
    }

    /// Enable (`true`) or disable (`false`) USBD interrupts
    pub fn set_interrupts(&mut self, interrupts: bool) {
        let inten = if interrupts {
            ENABLED_INTERRUPTS.bits()
        } else {
            0
        };
        ral::write_reg!(ral::usbd, self.usbd, INTEN, inten);
    }

    /// Connect to the bus by releasing the forced SE0
    pub fn attach(&mut self) {
        ral::modify_reg!(ral::usbd, self.usbd, SE0, SE0: 0);
    }

    /// Disconnect from the bus by forcing SE0
    pub fn detach(&mut self) {
        ral::modify_reg!(ral::usbd, self.usbd, SE0, SE0: 1);
    }

    /// Signal remote wakeup to the host
    pub fn remote_wakeup(&mut self) {
        ral::modify_reg!(ral::usbd, self.usbd, ATTR, RWAKEUP: 1);
    }

    /// Latch the device address, and send the SET_ADDRESS status stage
    ///
    /// The address isn't applied until the host acknowledges the zero-length
    /// status packet. Don't start a separate transfer for that status stage.
    pub fn set_address(&mut self, address: u8) {
        let ep = Endpoint::new(&self.usbd, Slot::CONTROL_IN);
        ep.force_data1();
        ep.arm(0);
        self.pending_address = Some(address);
        debug!("ADDRESS {} PENDING", address);
    }

    /// Returns the device address that the hardware is using
    pub fn address(&self) -> u8 {
        ral::read_reg!(ral::usbd, self.usbd, FADDR, FADDR) as u8
    }

    /// Open an endpoint
    ///
    /// Assigns a hardware slot, and a segment of USB SRAM that holds one
    /// `max_packet_size` packet. Opening an address that's already open
    /// reconfigures its slot, and reuses its SRAM segment if the packet still
    /// fits.
    ///
    /// Returns `EndpointOverflow` if there's no free hardware slot, or
    /// `EndpointMemoryOverflow` if there's not enough USB SRAM. On error, no
    /// slot or SRAM is consumed.
    pub fn open(
        &mut self,
        address: EndpointAddress,
        max_packet_size: u16,
        kind: EndpointType,
    ) -> Result<(), UsbError> {
        let (slot, reuse) = match state::lookup(&self.usbd, address) {
            Some(slot) => (slot, true),
            None => (
                state::allocate(&self.usbd).ok_or(UsbError::EndpointOverflow)?,
                false,
            ),
        };

        let ep = Endpoint::new(&self.usbd, slot);
        let transfer = self.transfers.get_mut(slot);
        let (segment, capacity) = if reuse && max_packet_size <= transfer.capacity() {
            (ep.segment(), transfer.capacity())
        } else {
            let segment = self
                .allocator
                .allocate(max_packet_size as usize)
                .ok_or(UsbError::EndpointMemoryOverflow)?;
            (segment.offset, max_packet_size)
        };

        ep.configure(address, kind);
        ep.set_segment(segment);
        transfer.set_packet_limits(max_packet_size, capacity);
        transfer.clear();

        debug!(
            "OPEN EP{} {} SLOT {} SEGMENT {} LEN {}",
            address.index(),
            address.is_in(),
            slot.index(),
            segment,
            max_packet_size
        );
        Ok(())
    }

    /// Start a transfer of `total_bytes` on an open endpoint
    ///
    /// For IN endpoints, the first packet is staged and sent immediately. For
    /// OUT endpoints, the endpoint is armed to accept a packet. The remaining
    /// packets are handled by [`on_interrupt()`](Driver::on_interrupt), which
    /// signals completion through the event handler. This call never blocks.
    ///
    /// Returns `InvalidEndpoint` if the endpoint isn't open.
    ///
    /// # Safety
    ///
    /// `buffer` must be valid for `total_bytes` reads (IN) or writes (OUT)
    /// until the driver signals completion, and nothing else may access it in
    /// that time. `buffer` may be null when `total_bytes` is zero. Don't start
    /// another transfer on the same endpoint until the prior one completes.
    pub unsafe fn begin_transfer(
        &mut self,
        address: EndpointAddress,
        buffer: *mut u8,
        total_bytes: u16,
    ) -> Result<(), UsbError> {
        let slot = state::lookup(&self.usbd, address).ok_or(UsbError::InvalidEndpoint)?;
        let ep = Endpoint::new(&self.usbd, slot);
        let transfer = self.transfers.get_mut(slot);
        transfer.begin(buffer, total_bytes);

        // The first packet of a control IN data stage must be DATA1.
        if slot == Slot::CONTROL_IN && !self.ctrl_in_active {
            ep.force_data1();
        }

        trace!("EP{} {} XFER {}", address.index(), address.is_in(), total_bytes);
        match address.direction() {
            UsbDirection::In => send_packet(&ep, &mut self.memory, transfer),
            UsbDirection::Out => ep.arm(transfer.max_packet_size() as usize),
        }
        Ok(())
    }

    /// Stall an endpoint
    ///
    /// Returns `InvalidEndpoint` if the endpoint isn't open.
    pub fn stall(&mut self, address: EndpointAddress) -> Result<(), UsbError> {
        let slot = state::lookup(&self.usbd, address).ok_or(UsbError::InvalidEndpoint)?;
        Endpoint::new(&self.usbd, slot).set_stalled(true);
        debug!("EP{} {} STALL", address.index(), address.is_in());
        Ok(())
    }

    /// Clear an endpoint's stall
    ///
    /// Non-control endpoints resume with DATA0. The endpoint's SRAM segment
    /// and max packet size are unchanged.
    ///
    /// Returns `InvalidEndpoint` if the endpoint isn't open.
    pub fn clear_stall(&mut self, address: EndpointAddress) -> Result<(), UsbError> {
        let slot = state::lookup(&self.usbd, address).ok_or(UsbError::InvalidEndpoint)?;
        let ep = Endpoint::new(&self.usbd, slot);
        ep.set_stalled(false);
        if address.index() != 0 {
            ep.reset_data_toggle();
        }
        debug!("EP{} {} CLEAR STALL", address.index(), address.is_in());
        Ok(())
    }

    /// Checks if an endpoint is stalled
    ///
    /// Returns `InvalidEndpoint` if the endpoint isn't open.
    pub fn is_stalled(&self, address: EndpointAddress) -> Result<bool, UsbError> {
        let slot = state::lookup(&self.usbd, address).ok_or(UsbError::InvalidEndpoint)?;
        Ok(Endpoint::new(&self.usbd, slot).is_stalled())
    }

    /// Handle the USBD interrupt
    ///
    /// Call this from your USBD interrupt handler. Every pending cause is
    /// serviced, in order: VBUS, bus events, setup, endpoint events, and start
    /// of frame. Events are signaled through `handler` as they're serviced.
    pub fn on_interrupt<H: EventHandler>(&mut self, handler: &mut H) {
        let status = ral::read_reg!(ral::usbd, self.usbd, INTSTS);
        let interrupts = Interrupts::from_bits_truncate(status);

        if interrupts.contains(Interrupts::VBUS_DETECT) {
            self.on_vbus_detect();
        }

        if interrupts.contains(Interrupts::BUS) {
            self.on_bus_event(handler);
        }

        if interrupts.contains(Interrupts::SETUP) {
            // Stale data must not block the new control transaction.
            Endpoint::new(&self.usbd, Slot::CONTROL_IN).clear_ready();
            Endpoint::new(&self.usbd, Slot::CONTROL_OUT).clear_ready();
            let setup = self.memory.setup(SETUP_OFFSET);
            handler.setup_received(&setup);
        }

        if interrupts.contains(Interrupts::USB) {
            for slot in Slot::all() {
                let event = slot.event_mask();
                if status & event == 0 {
                    continue;
                }
                ral::write_reg!(ral::usbd, self.usbd, INTSTS, event);
                if slot == Slot::CONTROL_IN {
                    self.on_control_in_complete(handler);
                } else {
                    self.on_endpoint_complete(slot, handler);
                }
            }
        }

        if interrupts.contains(Interrupts::SOF) {
            handler.start_of_frame();
        }

        ral::write_reg!(
            ral::usbd,
            self.usbd,
            INTSTS,
            status & ENABLED_INTERRUPTS.bits()
        );
    }

    fn on_vbus_detect(&mut self) {
        if ral::read_reg!(ral::usbd, self.usbd, VBUSDET, VBUSDET == 1) {
            ral::modify_reg!(ral::usbd, self.usbd, ATTR, USBEN: 1, PHYEN: 1);
            debug!("VBUS CONNECTED");
        } else {
            ral::modify_reg!(ral::usbd, self.usbd, ATTR, USBEN: 0);
            debug!("VBUS DISCONNECTED");
        }
    }

    fn on_bus_event<H: EventHandler>(&mut self, handler: &mut H) {
        let mut state = BusState::from_bits_truncate(ral::read_reg!(ral::usbd, self.usbd, ATTR));
        if !self.config.lpm {
            state.remove(BusState::L1_SUSPEND | BusState::L1_RESUME);
        }

        if state.contains(BusState::RESET) {
            ral::modify_reg!(ral::usbd, self.usbd, ATTR, USBEN: 1, PHYEN: 1);
            for slot in Slot::all() {
                Endpoint::new(&self.usbd, slot).reset_data_toggle();
            }
            ral::write_reg!(ral::usbd, self.usbd, FADDR, 0);
            self.pending_address = None;
            self.ctrl_in_active = false;
            debug!("RESET");
            handler.bus_reset();
        }

        if state.intersects(BusState::SUSPEND | BusState::L1_SUSPEND) {
            // Keep the USB core enabled, but turn off the PHY.
            ral::modify_reg!(ral::usbd, self.usbd, ATTR, PHYEN: 0);
            debug!("SUSPEND");
            handler.suspend();
        }

        if state.intersects(BusState::RESUME | BusState::L1_RESUME) {
            ral::modify_reg!(ral::usbd, self.usbd, ATTR, USBEN: 1, PHYEN: 1);
            debug!("RESUME");
            handler.resume();
        }
    }

    /// The control IN endpoint signals completion per packet.
    fn on_control_in_complete<H: EventHandler>(&mut self, handler: &mut H) {
        // The host acknowledged the status stage, so it's now safe to
        // take on the new address.
        if let Some(address) = self.pending_address {
            if ral::read_reg!(ral::usbd, self.usbd, FADDR, FADDR == 0) {
                ral::write_reg!(ral::usbd, self.usbd, FADDR, FADDR: address as u32);
                self.pending_address = None;
                debug!("ADDRESS {}", address);
            }
        }

        let sent = Endpoint::new(&self.usbd, Slot::CONTROL_IN).transferred();
        let max_packet_size = self.transfers.get(Slot::CONTROL_IN).max_packet_size();
        // A full packet means that the data stage continues, and the
        // hardware keeps toggling on its own.
        self.ctrl_in_active = sent == max_packet_size as usize;

        handler.transfer_complete(
            EndpointAddress::from_parts(0, UsbDirection::In),
            sent,
            TransferResult::Success,
        );
    }

    fn on_endpoint_complete<H: EventHandler>(&mut self, slot: Slot, handler: &mut H) {
        let ep = Endpoint::new(&self.usbd, slot);
        let Some(address) = ep.address() else {
            warn!("EVENT ON UNUSED SLOT {}", slot.index());
            return;
        };
        let available = ep.transferred();
        let transfer = self.transfers.get_mut(slot);

        match address.direction() {
            UsbDirection::Out => {
                let len = available.min(transfer.remaining() as usize);
                // Safety: begin_transfer() caller guarantees that the buffer
                // can hold what remains.
                unsafe {
                    self.memory
                        .read_raw(ep.segment(), transfer.data(), len)
                };
                transfer.advance(len);

                if transfer.remaining() == 0 || available < transfer.max_packet_size() as usize {
                    handler.transfer_complete(
                        address,
                        transfer.transferred() as usize,
                        TransferResult::Success,
                    );
                } else {
                    ep.arm(transfer.max_packet_size() as usize);
                }
            }
            UsbDirection::In => {
                transfer.advance(available);
                if transfer.remaining() > 0 {
                    send_packet(&ep, &mut self.memory, transfer);
                } else {
                    handler.transfer_complete(
                        address,
                        transfer.total() as usize,
                        TransferResult::Success,
                    );
                }
            }
        }
    }
}

/// Stage the next packet of an IN transfer, and send it
///
/// Bookkeeping advances when the hardware reports the packet sent.
fn send_packet(ep: &Endpoint, memory: &mut PacketMemory, transfer: &Transfer) {
    let len = transfer.packet_len() as usize;
    // Safety: begin_transfer() caller guarantees that the buffer holds
    // what remains.
    unsafe { memory.write_raw(ep.segment(), transfer.data(), len) };
    ep.arm(len);
}
