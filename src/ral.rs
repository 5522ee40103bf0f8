//! USBD register access layer
//!
//! Register blocks and field definitions that conform to the `ral-registers`
//! API. Only the registers used by this driver are described. Reserved
//! regions are kept so that the block layout matches the hardware.
//!
//! The peripheral has eight simplex endpoint register sets (`EP[0]` ..
//! `EP[7]`). The RAL macros want a single register identifier, so index the
//! endpoint set, then pass it as the instance:
//!
//! ```ignore
//! ral::modify_reg!(ral::usbd, &usbd.EP[3], CFG, DSQSYNC: 1);
//! ```

pub use ral_registers::{modify_reg, read_reg, write_reg, RWRegister};

/// Produces a field module, conforming to the RAL conventions.
macro_rules! field {
    ($name:ident, $offset:expr, $width:expr) => {
        field!($name, $offset, $width, {});
    };
    ($name:ident, $offset:expr, $width:expr, { $($value:ident = $raw:expr),* }) => {
        pub mod $name {
            pub const offset: u32 = $offset;
            pub const mask: u32 = ((1 << $width) - 1) << offset;
            pub mod R {}
            pub mod W {}
            pub mod RW {
                $(pub const $value: u32 = $raw;)*
            }
        }
    };
}

#[allow(non_snake_case, non_upper_case_globals)]
pub mod usbd {
    use super::RWRegister;
    use core::ptr::NonNull;

    /// One simplex hardware endpoint.
    #[repr(C)]
    pub struct EndpointRegisters {
        /// Buffer segment offset, in bytes, into the USB SRAM.
        pub BUFSEG: RWRegister<u32>,
        /// Maximal payload. Writing arms the endpoint; reading returns
        /// the bytes moved by the last transaction.
        pub MXPLD: RWRegister<u32>,
        pub CFG: RWRegister<u32>,
        pub CFGP: RWRegister<u32>,
    }

    /// Number of simplex endpoints provided by the peripheral.
    pub const ENDPOINT_COUNT: usize = 8;

    #[repr(C)]
    pub struct RegisterBlock {
        pub INTEN: RWRegister<u32>,
        pub INTSTS: RWRegister<u32>,
        pub FADDR: RWRegister<u32>,
        pub EPSTS: RWRegister<u32>,
        pub ATTR: RWRegister<u32>,
        pub VBUSDET: RWRegister<u32>,
        pub STBUFSEG: RWRegister<u32>,
        _reserved0: u32,
        pub EPSTS0: RWRegister<u32>,
        pub EPSTS1: RWRegister<u32>,
        _reserved1: [u32; 24],
        pub LPMATTR: RWRegister<u32>,
        pub FN: RWRegister<u32>,
        pub SE0: RWRegister<u32>,
        /// Includes the USB SRAM, at offset 0x100.
        _reserved2: [RWRegister<u32>; 283],
        pub EP: [EndpointRegisters; ENDPOINT_COUNT],
    }

    const _: [(); 1] = [(); (core::mem::size_of::<RegisterBlock>() == 0x580) as usize];

    pub mod INTEN {
        field!(BUSIEN, 0, 1);
        field!(USBIEN, 1, 1);
        field!(VBDETIEN, 2, 1);
        field!(NEVWKIEN, 3, 1);
        field!(SOFIEN, 4, 1);
        field!(WKEN, 8, 1);
        field!(INNAKEN, 15, 1);
    }

    pub mod INTSTS {
        field!(BUSIF, 0, 1);
        field!(USBIF, 1, 1);
        field!(VBDETIF, 2, 1);
        field!(NEVWKIF, 3, 1);
        field!(SOFIF, 4, 1);
        field!(EPEVT, 16, 8);
        field!(SETUP, 31, 1);
    }

    pub mod FADDR {
        field!(FADDR, 0, 7);
    }

    pub mod ATTR {
        field!(USBRST, 0, 1);
        field!(SUSPEND, 1, 1);
        field!(RESUME, 2, 1);
        field!(TOUT, 3, 1);
        field!(PHYEN, 4, 1);
        field!(RWAKEUP, 5, 1);
        field!(USBEN, 7, 1);
        field!(DPPUEN, 8, 1);
        field!(PWRDN, 9, 1);
        field!(BYTEM, 10, 1);
        field!(LPMACK, 11, 1);
        field!(L1SUSPEND, 12, 1);
        field!(L1RESUME, 13, 1);
    }

    pub mod VBUSDET {
        field!(VBUSDET, 0, 1);
    }

    pub mod STBUFSEG {
        field!(STBUFSEG, 3, 6);
    }

    pub mod FN {
        field!(FN, 0, 11);
    }

    pub mod SE0 {
        field!(SE0, 0, 1);
    }

    pub mod BUFSEG {
        field!(BUFSEG, 3, 7);
    }

    pub mod MXPLD {
        field!(MXPLD, 0, 9);
    }

    pub mod CFG {
        field!(EPNUM, 0, 4);
        field!(ISOCH, 4, 1);
        field!(STATE, 5, 2, { DISABLED = 0, OUT = 1, IN = 2 });
        field!(DSQSYNC, 7, 1);
        field!(CSTALL, 9, 1);
    }

    pub mod CFGP {
        field!(CLRRDY, 0, 1);
        field!(SSTALL, 1, 1);
    }

    /// An owned handle to the USBD register block.
    pub struct Instance {
        ptr: NonNull<RegisterBlock>,
    }

    impl Instance {
        /// # Safety
        ///
        /// `ptr` must point to the USBD register block, and the caller must
        /// ensure that there's only one `Instance` for that block.
        pub(crate) unsafe fn new(ptr: NonNull<RegisterBlock>) -> Self {
            Instance { ptr }
        }
    }

    impl core::ops::Deref for Instance {
        type Target = RegisterBlock;
        fn deref(&self) -> &RegisterBlock {
            // Safety: pointer validity is a precondition of construction.
            unsafe { self.ptr.as_ref() }
        }
    }

    // Safety: the instance is the only owner of the register block.
    unsafe impl Send for Instance {}
}

/// Acquire the USBD register block from the user's peripherals.
///
/// # Panics
///
/// Panics if the peripherals report a null register block address.
pub fn instance<P: crate::Peripherals>(peripherals: &P) -> usbd::Instance {
    let ptr = core::ptr::NonNull::new(peripherals.usbd() as *mut usbd::RegisterBlock)
        .expect("USBD register block address is null");
    // Safety: Peripherals implementer guarantees that the pointer is valid,
    // and that it's the only owner of these registers.
    unsafe { usbd::Instance::new(ptr) }
}

#[cfg(test)]
mod tests {
    use super::usbd;

    fn registers() -> usbd::RegisterBlock {
        // Safety: every register is an integer cell; zero is a valid bit pattern.
        unsafe { core::mem::zeroed() }
    }

    #[test]
    fn endpoint_state_values() {
        let regs = registers();
        let ep = &regs.EP[2];
        super::write_reg!(usbd, ep, CFG, EPNUM: 3, STATE: IN);
        assert_eq!(ep.CFG.read(), 3 | (2 << 5));
        assert!(super::read_reg!(usbd, ep, CFG, STATE == IN));
        assert_eq!(super::read_reg!(usbd, ep, CFG, EPNUM), 3);
    }

    #[test]
    fn modify_keeps_other_fields() {
        let regs = registers();
        let ep = &regs.EP[0];
        super::write_reg!(usbd, ep, CFG, EPNUM: 5, STATE: OUT);
        super::modify_reg!(usbd, ep, CFG, DSQSYNC: 1);
        assert_eq!(ep.CFG.read(), 5 | (1 << 5) | (1 << 7));
        super::modify_reg!(usbd, ep, CFG, DSQSYNC: 0);
        assert_eq!(ep.CFG.read(), 5 | (1 << 5));
    }

    #[test]
    fn buffer_segment_field() {
        let regs = registers();
        super::write_reg!(usbd, &regs.EP[1], BUFSEG, BUFSEG: 0x48 >> 3);
        assert_eq!(regs.EP[1].BUFSEG.read(), 0x48);
    }

    #[test]
    fn register_offsets() {
        let regs = registers();
        let base = &regs as *const _ as usize;
        let at = |reg: *const super::RWRegister<u32>| reg as usize - base;
        assert_eq!(at(&regs.STBUFSEG), 0x18);
        assert_eq!(at(&regs.EPSTS1), 0x24);
        assert_eq!(at(&regs.LPMATTR), 0x88);
        assert_eq!(at(&regs.FN), 0x8C);
        assert_eq!(at(&regs.SE0), 0x90);
        assert_eq!(&regs.EP as *const _ as usize - base, 0x500);
        assert_eq!(at(&regs.EP[7].CFGP), 0x57C);
    }

    #[test]
    fn epevt_mask() {
        assert_eq!(usbd::INTSTS::EPEVT::mask, 0xFF << 16);
        assert_eq!(usbd::INTSTS::SETUP::mask, 1 << 31);
    }
}
