//! Hardware endpoint slots
//!
//! The USBD peripheral has eight simplex endpoints. Each is configured with a
//! logical endpoint number and a direction, so logical endpoints map onto
//! whichever slot was free when the endpoint opened. The bidirectional
//! control endpoint needs two slots; see [`Slot::control`].

use crate::ral;
use usb_device::{
    endpoint::{EndpointAddress, EndpointType},
    UsbDirection,
};

/// Index of a hardware endpoint slot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt-03", derive(defmt_03::Format))]
pub struct Slot(usize);

/// Number of hardware endpoint slots
pub const SLOT_COUNT: usize = ral::usbd::ENDPOINT_COUNT;

impl Slot {
    /// Slot permanently assigned to control IN (`0x80`)
    pub const CONTROL_IN: Slot = Slot(0);
    /// Slot permanently assigned to control OUT (`0x00`)
    pub const CONTROL_OUT: Slot = Slot(1);

    /// Returns the slot that carries one direction of the control endpoint.
    pub const fn control(direction: UsbDirection) -> Slot {
        match direction {
            UsbDirection::In => Slot::CONTROL_IN,
            UsbDirection::Out => Slot::CONTROL_OUT,
        }
    }

    /// Returns `None` if `index` doesn't name a slot.
    pub const fn new(index: usize) -> Option<Slot> {
        if index < SLOT_COUNT {
            Some(Slot(index))
        } else {
            None
        }
    }

    pub const fn index(self) -> usize {
        self.0
    }

    /// Bit for this slot's event in INTSTS
    pub const fn event_mask(self) -> u32 {
        1 << (ral::usbd::INTSTS::EPEVT::offset as usize + self.0)
    }

    /// All slots, in scan order.
    pub fn all() -> impl Iterator<Item = Slot> {
        (0..SLOT_COUNT).map(Slot)
    }
}

/// Register view of one hardware endpoint slot
pub struct Endpoint<'a> {
    regs: &'a ral::usbd::EndpointRegisters,
}

impl<'a> Endpoint<'a> {
    pub fn new(usbd: &'a ral::usbd::RegisterBlock, slot: Slot) -> Self {
        Endpoint {
            regs: &usbd.EP[slot.index()],
        }
    }

    /// Indicates if this slot is free for allocation
    pub fn is_unused(&self) -> bool {
        ral::read_reg!(ral::usbd, self.regs, CFG, STATE == DISABLED)
    }

    /// Reconstruct the logical address from the configuration
    ///
    /// Returns `None` if the slot is unused.
    pub fn address(&self) -> Option<EndpointAddress> {
        use ral::usbd::CFG::STATE;
        let (number, state) = ral::read_reg!(ral::usbd, self.regs, CFG, EPNUM, STATE);
        let direction = match state {
            STATE::RW::IN => UsbDirection::In,
            STATE::RW::OUT => UsbDirection::Out,
            _ => return None,
        };
        Some(EndpointAddress::from_parts(number as usize, direction))
    }

    /// Configure the slot for a logical endpoint
    ///
    /// Clears any stall, and resets the data toggle to DATA0.
    pub fn configure(&self, address: EndpointAddress, kind: EndpointType) {
        let number = address.index() as u32;
        let isochronous = matches!(kind, EndpointType::Isochronous { .. }) as u32;
        match address.direction() {
            UsbDirection::In => ral::write_reg!(
                ral::usbd,
                self.regs,
                CFG,
                EPNUM: number,
                ISOCH: isochronous,
                STATE: IN,
                CSTALL: 1
            ),
            UsbDirection::Out => ral::write_reg!(
                ral::usbd,
                self.regs,
                CFG,
                EPNUM: number,
                ISOCH: isochronous,
                STATE: OUT,
                CSTALL: 1
            ),
        }
        ral::modify_reg!(ral::usbd, self.regs, CFGP, SSTALL: 0);
    }

    /// Return the slot to the unused state
    pub fn disable(&self) {
        ral::write_reg!(ral::usbd, self.regs, CFG, 0);
        ral::write_reg!(ral::usbd, self.regs, CFGP, 0);
    }

    /// Assign the slot's segment of USB SRAM
    pub fn set_segment(&self, byte_offset: usize) {
        ral::write_reg!(
            ral::usbd,
            self.regs,
            BUFSEG,
            byte_offset as u32 & ral::usbd::BUFSEG::BUFSEG::mask
        );
    }

    /// Byte offset of the slot's segment in USB SRAM
    pub fn segment(&self) -> usize {
        (ral::read_reg!(ral::usbd, self.regs, BUFSEG) & ral::usbd::BUFSEG::BUFSEG::mask) as usize
    }

    /// Send `len` bytes from the segment (IN), or accept up to `len` bytes into
    /// the segment (OUT)
    pub fn arm(&self, len: usize) {
        ral::write_reg!(ral::usbd, self.regs, MXPLD, MXPLD: len as u32);
    }

    /// Bytes moved by the most recent transaction
    pub fn transferred(&self) -> usize {
        ral::read_reg!(ral::usbd, self.regs, MXPLD, MXPLD) as usize
    }

    /// Force the next packet to use DATA1
    pub fn force_data1(&self) {
        ral::modify_reg!(ral::usbd, self.regs, CFG, DSQSYNC: 1);
    }

    /// Reset the data toggle to DATA0
    pub fn reset_data_toggle(&self) {
        ral::modify_reg!(ral::usbd, self.regs, CFG, DSQSYNC: 0);
    }

    /// Indicates if the next packet uses DATA1
    pub fn is_data1(&self) -> bool {
        ral::read_reg!(ral::usbd, self.regs, CFG, DSQSYNC == 1)
    }

    /// Drop any ready data, so that it doesn't block a new control transaction
    pub fn clear_ready(&self) {
        ral::modify_reg!(ral::usbd, self.regs, CFGP, CLRRDY: 1);
    }

    pub fn set_stalled(&self, stall: bool) {
        if stall {
            ral::modify_reg!(ral::usbd, self.regs, CFGP, SSTALL: 1);
        } else {
            ral::modify_reg!(ral::usbd, self.regs, CFGP, SSTALL: 0);
            ral::modify_reg!(ral::usbd, self.regs, CFG, CSTALL: 1);
        }
    }

    pub fn is_stalled(&self) -> bool {
        ral::read_reg!(ral::usbd, self.regs, CFGP, SSTALL == 1)
    }
}
