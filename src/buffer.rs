//! USB SRAM packet buffers
//!
//! The USBD peripheral owns a small SRAM that it shares with software. Every
//! endpoint slot is assigned a segment of that SRAM, and all packet data moves
//! through the segment. The [`Allocator`] hands out segments; [`PacketMemory`]
//! moves bytes in and out of them.

use core::ptr::NonNull;

/// Segment offsets are expressed in units of eight bytes by the hardware.
pub const SEGMENT_ALIGN: usize = 8;

/// Size of the setup packet, always at the bottom of the SRAM.
pub const SETUP_LEN: usize = 8;

/// A region of the USB SRAM.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt-03", derive(defmt_03::Format))]
pub struct Segment {
    /// Byte offset from the start of the SRAM.
    pub offset: usize,
    /// Usable length, in bytes.
    pub len: usize,
}

/// USB SRAM segment allocator
///
/// Bump allocates from the bottom of the SRAM. Segments are never returned;
/// the only way to recover space is [`reset()`](Allocator::reset).
pub struct Allocator {
    cursor: usize,
    capacity: usize,
}

impl Allocator {
    /// Create an allocator that manages `capacity` bytes, where the first
    /// `reserved` bytes are already in use.
    ///
    /// # Panics
    ///
    /// Panics if the reservation exceeds the capacity.
    pub fn new(reserved: usize, capacity: usize) -> Self {
        assert!(
            reserved <= capacity,
            "USB SRAM too small for the control endpoint reservation"
        );
        Allocator {
            cursor: align(reserved),
            capacity,
        }
    }

    /// Allocate a segment of `size` bytes.
    ///
    /// Returns `None` if the allocation would exceed the capacity. In that case,
    /// the allocator is unchanged.
    pub fn allocate(&mut self, size: usize) -> Option<Segment> {
        let end = self.cursor.checked_add(size)?;
        if end > self.capacity {
            return None;
        }
        let segment = Segment {
            offset: self.cursor,
            len: size,
        };
        self.cursor = align(end).min(self.capacity);
        Some(segment)
    }

    /// Forget every allocation, and reserve the first `reserved` bytes.
    pub fn reset(&mut self, reserved: usize) {
        *self = Allocator::new(reserved, self.capacity);
    }

    /// Returns the offset of the next allocation.
    pub fn cursor(&self) -> usize {
        self.cursor
    }

    /// Returns the number of bytes that could still be allocated.
    pub fn available(&self) -> usize {
        self.capacity - self.cursor
    }
}

fn align(offset: usize) -> usize {
    (offset + SEGMENT_ALIGN - 1) & !(SEGMENT_ALIGN - 1)
}

/// Volatile access to the USB SRAM.
pub struct PacketMemory {
    base: NonNull<u8>,
    len: usize,
}

// Safety: the packet memory is only accessed through the owning driver.
unsafe impl Send for PacketMemory {}

impl PacketMemory {
    /// # Safety
    ///
    /// `base` must point to `len` bytes of USB SRAM, and no one else may use
    /// that memory while this object exists.
    pub unsafe fn new(base: NonNull<u8>, len: usize) -> Self {
        PacketMemory { base, len }
    }

    /// Copy `src` into the SRAM at `offset`.
    ///
    /// # Panics
    ///
    /// Panics if the write would extend past the end of the SRAM.
    pub fn write(&mut self, offset: usize, src: &[u8]) {
        self.check_range(offset, src.len());
        // Safety: range checked above.
        let dst = unsafe { self.base.as_ptr().add(offset) };
        src.iter().fold(dst, |dst, src| unsafe {
            dst.write_volatile(*src);
            dst.add(1)
        });
    }

    /// Copy from the SRAM at `offset` into `dst`.
    ///
    /// # Panics
    ///
    /// Panics if the read would extend past the end of the SRAM.
    pub fn read(&self, offset: usize, dst: &mut [u8]) {
        self.check_range(offset, dst.len());
        // Safety: range checked above.
        let src = unsafe { self.base.as_ptr().add(offset) };
        dst.iter_mut().fold(src, |src, dst| unsafe {
            *dst = src.read_volatile();
            src.add(1)
        });
    }

    /// Copy `len` bytes from the SRAM at `offset` to `dst`.
    ///
    /// # Safety
    ///
    /// `dst` must be valid for `len` byte writes, and must not alias the SRAM.
    pub unsafe fn read_raw(&self, offset: usize, dst: *mut u8, len: usize) {
        self.check_range(offset, len);
        let src = self.base.as_ptr().add(offset);
        for idx in 0..len {
            dst.add(idx).write(src.add(idx).read_volatile());
        }
    }

    /// Copy `len` bytes from `src` into the SRAM at `offset`.
    ///
    /// # Safety
    ///
    /// `src` must be valid for `len` byte reads, and must not alias the SRAM.
    pub unsafe fn write_raw(&mut self, offset: usize, src: *const u8, len: usize) {
        self.check_range(offset, len);
        let dst = self.base.as_ptr().add(offset);
        for idx in 0..len {
            dst.add(idx).write_volatile(src.add(idx).read());
        }
    }

    /// Read the setup packet at `offset`.
    pub fn setup(&self, offset: usize) -> [u8; SETUP_LEN] {
        let mut setup = [0; SETUP_LEN];
        self.read(offset, &mut setup);
        setup
    }

    fn check_range(&self, offset: usize, len: usize) {
        assert!(
            offset.checked_add(len).map_or(false, |end| end <= self.len),
            "USB SRAM access out of range"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::{Allocator, PacketMemory, Segment};
    use core::ptr::NonNull;

    #[test]
    fn allocate_entire_buffer() {
        let mut alloc = Allocator::new(0, 32);
        assert_eq!(alloc.allocate(32), Some(Segment { offset: 0, len: 32 }));
        assert!(alloc.allocate(1).is_none());
        assert_eq!(alloc.available(), 0);
    }

    #[test]
    fn allocate_after_reservation() {
        let mut alloc = Allocator::new(8 + 64 + 64, 768);
        assert_eq!(alloc.cursor(), 136);

        let first = alloc.allocate(64).unwrap();
        assert_eq!(first.offset, 136);
        let second = alloc.allocate(64).unwrap();
        assert_eq!(second.offset, 200);
        assert_eq!(alloc.cursor(), 264);
    }

    #[test]
    fn allocations_are_disjoint_and_aligned() {
        let mut alloc = Allocator::new(24, 512);
        let mut segments = [Segment { offset: 0, len: 0 }; 6];
        for (segment, size) in segments.iter_mut().zip([9, 16, 1, 64, 33, 8]) {
            *segment = alloc.allocate(size).unwrap();
            assert_eq!(segment.offset % super::SEGMENT_ALIGN, 0);
            assert!(segment.offset >= 24);
        }
        for (idx, a) in segments.iter().enumerate() {
            for b in &segments[idx + 1..] {
                assert!(a.offset + a.len <= b.offset || b.offset + b.len <= a.offset);
            }
        }
    }

    #[test]
    fn overflow_leaves_allocator_unchanged() {
        let mut alloc = Allocator::new(136, 512);
        let before = alloc.cursor();
        assert!(alloc.allocate(512).is_none());
        assert_eq!(alloc.cursor(), before);
        assert!(alloc.allocate(512 - 136).is_some());
        assert!(alloc.allocate(1).is_none());
    }

    #[test]
    fn reset_recovers_space() {
        let mut alloc = Allocator::new(136, 512);
        alloc.allocate(256).unwrap();
        alloc.reset(136);
        assert_eq!(alloc.cursor(), 136);
        assert_eq!(alloc.available(), 512 - 136);
    }

    #[test]
    #[should_panic]
    fn reservation_larger_than_capacity() {
        Allocator::new(1024, 768);
    }

    #[test]
    fn packet_memory_copies() {
        let mut sram = [0u8; 32];
        let mut memory =
            unsafe { PacketMemory::new(NonNull::new(sram.as_mut_ptr()).unwrap(), sram.len()) };
        memory.write(8, &[1, 2, 3]);
        let mut out = [0; 3];
        memory.read(8, &mut out);
        assert_eq!(out, [1, 2, 3]);
        assert_eq!(memory.setup(8), [1, 2, 3, 0, 0, 0, 0, 0]);
    }

    #[test]
    #[should_panic]
    fn packet_memory_out_of_range() {
        let mut sram = [0u8; 16];
        let mut memory =
            unsafe { PacketMemory::new(NonNull::new(sram.as_mut_ptr()).unwrap(), sram.len()) };
        memory.write(12, &[0; 8]);
    }
}
