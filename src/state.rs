//! Driver state associated with endpoints
//!
//! The [`TransferTable`] holds one [`Transfer`] per hardware slot. The
//! directory functions map logical endpoint addresses onto those slots by
//! inspecting the slot configuration registers, so there is no second copy
//! of the endpoint topology to keep in sync.

use crate::{
    endpoint::{Endpoint, Slot, SLOT_COUNT},
    ral,
};
use core::ptr;
use usb_device::endpoint::EndpointAddress;

/// Progress of one transfer on one hardware slot
///
/// `data` is only dereferenced by the driver while `remaining` is non-zero.
#[derive(Clone, Copy)]
pub struct Transfer {
    data: *mut u8,
    remaining: u16,
    total: u16,
    max_packet_size: u16,
    /// Length of the SRAM segment assigned to the slot.
    capacity: u16,
}

impl Transfer {
    pub const fn new() -> Self {
        Transfer {
            data: ptr::null_mut(),
            remaining: 0,
            total: 0,
            max_packet_size: 0,
            capacity: 0,
        }
    }

    /// Start tracking a transfer of `total` bytes at `data`
    ///
    /// Keeps the max packet size negotiated when the endpoint opened.
    pub fn begin(&mut self, data: *mut u8, total: u16) {
        self.data = data;
        self.remaining = total;
        self.total = total;
    }

    /// Size of the next packet
    pub fn packet_len(&self) -> u16 {
        self.remaining.min(self.max_packet_size)
    }

    /// Account for `bytes` that the hardware moved
    ///
    /// Returns the number of bytes that were actually consumed, which never
    /// exceeds the remaining bytes.
    pub fn advance(&mut self, bytes: usize) -> u16 {
        let bytes = (bytes.min(self.remaining as usize)) as u16;
        self.remaining -= bytes;
        self.data = self.data.wrapping_add(bytes as usize);
        bytes
    }

    pub fn data(&self) -> *mut u8 {
        self.data
    }

    pub fn remaining(&self) -> u16 {
        self.remaining
    }

    pub fn total(&self) -> u16 {
        self.total
    }

    /// Bytes moved since [`begin()`](Transfer::begin)
    pub fn transferred(&self) -> u16 {
        self.total - self.remaining
    }

    pub fn max_packet_size(&self) -> u16 {
        self.max_packet_size
    }

    pub fn capacity(&self) -> u16 {
        self.capacity
    }

    /// Record the endpoint's negotiated packet size, and the size of its SRAM segment
    pub fn set_packet_limits(&mut self, max_packet_size: u16, capacity: u16) {
        self.max_packet_size = max_packet_size;
        self.capacity = capacity;
    }

    /// Forget any in-flight transfer
    pub fn clear(&mut self) {
        self.begin(ptr::null_mut(), 0);
    }
}

/// One transfer record per hardware slot
pub struct TransferTable([Transfer; SLOT_COUNT]);

impl TransferTable {
    pub const fn new() -> Self {
        TransferTable([Transfer::new(); SLOT_COUNT])
    }

    pub fn get(&self, slot: Slot) -> &Transfer {
        &self.0[slot.index()]
    }

    pub fn get_mut(&mut self, slot: Slot) -> &mut Transfer {
        &mut self.0[slot.index()]
    }

    /// Reset every record, including the packet limits
    pub fn reset(&mut self) {
        self.0 = [Transfer::new(); SLOT_COUNT];
    }
}

/// Find a slot for `address`
///
/// When `allocate` is `true`, returns the first unused slot. Otherwise, returns
/// the first configured slot whose logical address is `address`. The control
/// endpoint always resolves to its dedicated slots.
pub fn find_or_allocate(
    usbd: &ral::usbd::RegisterBlock,
    address: EndpointAddress,
    allocate: bool,
) -> Option<Slot> {
    if allocate {
        Slot::all().find(|&slot| Endpoint::new(usbd, slot).is_unused())
    } else if address.index() == 0 {
        let slot = Slot::control(address.direction());
        (Endpoint::new(usbd, slot).address() == Some(address)).then_some(slot)
    } else {
        Slot::all().find(|&slot| Endpoint::new(usbd, slot).address() == Some(address))
    }
}

/// Find the configured slot for `address`
pub fn lookup(usbd: &ral::usbd::RegisterBlock, address: EndpointAddress) -> Option<Slot> {
    find_or_allocate(usbd, address, false)
}

/// Find an unused slot
pub fn allocate(usbd: &ral::usbd::RegisterBlock) -> Option<Slot> {
    // The address doesn't participate in allocation.
    find_or_allocate(usbd, EndpointAddress::from(0), true)
}

#[cfg(test)]
mod tests {
    use super::{allocate, lookup, Transfer, TransferTable};
    use crate::{
        endpoint::{Endpoint, Slot, SLOT_COUNT},
        ral::usbd,
    };
    use usb_device::{
        endpoint::{EndpointAddress, EndpointType},
        UsbDirection,
    };

    fn registers() -> usbd::RegisterBlock {
        unsafe { core::mem::zeroed() }
    }

    #[test]
    fn transfer_packets() {
        let mut data = [0u8; 150];
        let mut xfer = Transfer::new();
        xfer.set_packet_limits(64, 64);
        xfer.begin(data.as_mut_ptr(), 150);

        assert_eq!(xfer.packet_len(), 64);
        assert_eq!(xfer.advance(64), 64);
        assert_eq!(xfer.packet_len(), 64);
        assert_eq!(xfer.advance(64), 64);
        assert_eq!(xfer.packet_len(), 22);
        assert_eq!(xfer.data(), data[128..].as_mut_ptr());
        assert_eq!(xfer.advance(22), 22);
        assert_eq!(xfer.remaining(), 0);
        assert_eq!(xfer.transferred(), 150);
        assert_eq!(xfer.total(), 150);
    }

    #[test]
    fn advance_never_passes_remaining() {
        let mut data = [0u8; 10];
        let mut xfer = Transfer::new();
        xfer.set_packet_limits(64, 64);
        xfer.begin(data.as_mut_ptr(), 10);
        assert_eq!(xfer.advance(64), 10);
        assert_eq!(xfer.remaining(), 0);
        assert_eq!(xfer.data(), data.as_mut_ptr().wrapping_add(10));
    }

    #[test]
    fn begin_keeps_packet_limits() {
        let mut xfer = Transfer::new();
        xfer.set_packet_limits(32, 40);
        xfer.begin(core::ptr::null_mut(), 0);
        assert_eq!(xfer.max_packet_size(), 32);
        assert_eq!(xfer.capacity(), 40);
        assert_eq!(xfer.packet_len(), 0);
    }

    #[test]
    fn table_reset() {
        let mut table = TransferTable::new();
        table.get_mut(Slot::CONTROL_IN).set_packet_limits(64, 64);
        table.reset();
        assert_eq!(table.get(Slot::CONTROL_IN).max_packet_size(), 0);
    }

    #[test]
    fn allocate_first_unused() {
        let regs = registers();
        for slot in Slot::all() {
            assert_eq!(allocate(&regs), Some(slot));
            Endpoint::new(&regs, slot).configure(
                EndpointAddress::from_parts(slot.index() + 1, UsbDirection::In),
                EndpointType::Bulk,
            );
        }
        assert!(allocate(&regs).is_none());

        let slot = Slot::new(SLOT_COUNT / 2).unwrap();
        Endpoint::new(&regs, slot).disable();
        assert_eq!(allocate(&regs), Some(slot));
    }

    #[test]
    fn lookup_by_address() {
        let regs = registers();
        let ep_in = EndpointAddress::from_parts(1, UsbDirection::In);
        let ep_out = EndpointAddress::from_parts(1, UsbDirection::Out);
        assert!(lookup(&regs, ep_in).is_none());

        Endpoint::new(&regs, Slot::new(2).unwrap()).configure(ep_out, EndpointType::Bulk);
        Endpoint::new(&regs, Slot::new(3).unwrap()).configure(ep_in, EndpointType::Bulk);

        assert_eq!(lookup(&regs, ep_out), Slot::new(2));
        assert_eq!(lookup(&regs, ep_in), Slot::new(3));
        assert!(lookup(&regs, EndpointAddress::from_parts(2, UsbDirection::In)).is_none());
    }

    #[test]
    fn control_resolves_to_fixed_slots() {
        let regs = registers();
        let ctrl_in = EndpointAddress::from_parts(0, UsbDirection::In);
        let ctrl_out = EndpointAddress::from_parts(0, UsbDirection::Out);

        // Unused slots never match, even though their configuration decodes to 0.
        assert!(lookup(&regs, ctrl_out).is_none());

        Endpoint::new(&regs, Slot::CONTROL_IN).configure(ctrl_in, EndpointType::Control);
        Endpoint::new(&regs, Slot::CONTROL_OUT).configure(ctrl_out, EndpointType::Control);
        assert_eq!(lookup(&regs, ctrl_in), Some(Slot::CONTROL_IN));
        assert_eq!(lookup(&regs, ctrl_out), Some(Slot::CONTROL_OUT));
    }
}
