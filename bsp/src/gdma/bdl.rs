//! Buffer descriptor list: the in-memory format the controller walks in
//! BDL mode.

use core::{fmt, ptr::NonNull};

/// Size of one descriptor.
pub const BDL_DESC_SIZE: usize = 32;
/// Alignment of the first descriptor.
pub const BDL_ALIGN: usize = 128;
/// Source and destination buffers must be aligned to the burst size.
pub const DATA_ALIGN: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BdlError {
    /// Every descriptor slot is written.
    Full,
    EmptyTransfer,
    /// A buffer address is not aligned to [`DATA_ALIGN`].
    Misaligned(usize),
}

impl fmt::Display for BdlError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BdlError::Full => f.write_str("descriptor list full"),
            BdlError::EmptyTransfer => f.write_str("zero-length transfer"),
            BdlError::Misaligned(addr) => write!(f, "buffer {:#x} not {}-byte aligned", addr, DATA_ALIGN),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum BurstType {
    Fixed = 0,
    Incr = 1,
}

/// Source/destination transfer-control word.
///
/// | bits    | field                         |
/// |---------|-------------------------------|
/// | `2:0`   | log2 of bytes per beat        |
/// | `11:8`  | beats per burst, minus one    |
/// | `16`    | burst type, 1 = incrementing  |
/// | `27:24` | cache attributes              |
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TransferCtrl(u32);

impl TransferCtrl {
    const SIZE_SHIFT: u32 = 0;
    const SIZE_MASK: u32 = 0x7;
    const LEN_SHIFT: u32 = 8;
    const LEN_MASK: u32 = 0xf;
    const TYPE_BIT: u32 = 1 << 16;
    const CACHE_SHIFT: u32 = 24;
    const CACHE_MASK: u32 = 0xf;

    #[inline]
    pub const fn from_bits(bits: u32) -> Self {
        TransferCtrl(bits)
    }

    #[inline]
    pub const fn bits(self) -> u32 {
        self.0
    }

    #[inline]
    fn field(self, shift: u32, mask: u32) -> u32 {
        (self.0 >> shift) & mask
    }

    #[inline]
    fn with_field(self, shift: u32, mask: u32, value: u32) -> Self {
        TransferCtrl((self.0 & !(mask << shift)) | ((value & mask) << shift))
    }

    /// Bytes per beat.
    pub fn burst_size(self) -> u32 {
        1 << self.field(Self::SIZE_SHIFT, Self::SIZE_MASK)
    }

    /// `bytes` must be a power of two up to 128.
    pub fn with_burst_size(self, bytes: u32) -> Self {
        debug_assert!(bytes.is_power_of_two() && bytes <= 128);
        self.with_field(Self::SIZE_SHIFT, Self::SIZE_MASK, bytes.trailing_zeros())
    }

    /// Beats per burst, 1..=16.
    pub fn burst_len(self) -> u32 {
        self.field(Self::LEN_SHIFT, Self::LEN_MASK) + 1
    }

    pub fn with_burst_len(self, beats: u32) -> Self {
        debug_assert!((1..=16).contains(&beats));
        self.with_field(Self::LEN_SHIFT, Self::LEN_MASK, beats.saturating_sub(1))
    }

    pub fn burst_type(self) -> BurstType {
        if self.0 & Self::TYPE_BIT != 0 {
            BurstType::Incr
        } else {
            BurstType::Fixed
        }
    }

    pub fn with_burst_type(self, ty: BurstType) -> Self {
        self.with_field(16, 1, ty as u32)
    }

    pub fn cache(self) -> u8 {
        self.field(Self::CACHE_SHIFT, Self::CACHE_MASK) as u8
    }

    pub fn with_cache(self, attrs: u8) -> Self {
        self.with_field(Self::CACHE_SHIFT, Self::CACHE_MASK, attrs as u32)
    }

    /// 16-byte beats, 8-beat incrementing bursts, normal cacheable.
    pub fn memcpy() -> Self {
        TransferCtrl::default()
            .with_burst_size(DATA_ALIGN as u32)
            .with_burst_len(8)
            .with_burst_type(BurstType::Incr)
            .with_cache(0x3)
    }
}

/// One contiguous copy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transaction {
    /// Bus address of the source buffer.
    pub src: usize,
    /// Bus address of the destination buffer.
    pub dst: usize,
    pub len: u32,
}

impl Transaction {
    pub fn validate(&self) -> Result<(), BdlError> {
        if self.len == 0 {
            return Err(BdlError::EmptyTransfer);
        }
        for &addr in &[self.src, self.dst] {
            if addr % DATA_ALIGN != 0 {
                return Err(BdlError::Misaligned(addr));
            }
        }
        Ok(())
    }
}

/// Hardware descriptor.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BdlDesc {
    pub src_lo: u32,
    pub src_hi: u32,
    pub dst_lo: u32,
    pub dst_hi: u32,
    pub src_tc: u32,
    pub dst_tc: u32,
    pub total_bytes: u32,
    /// Bit 0: raise BDL_END when this descriptor completes.
    pub ioc: u32,
}

const _: [(); BDL_DESC_SIZE] = [(); core::mem::size_of::<BdlDesc>()];

impl BdlDesc {
    pub fn new(tx: &Transaction, ioc: bool) -> Self {
        let src = tx.src as u64;
        let dst = tx.dst as u64;
        BdlDesc {
            src_lo: src as u32,
            src_hi: (src >> 32) as u32,
            dst_lo: dst as u32,
            dst_hi: (dst >> 32) as u32,
            src_tc: TransferCtrl::memcpy().bits(),
            dst_tc: TransferCtrl::memcpy().bits(),
            total_bytes: tx.len,
            ioc: ioc as u32,
        }
    }

    #[inline]
    pub fn src(&self) -> u64 {
        (self.src_hi as u64) << 32 | self.src_lo as u64
    }

    #[inline]
    pub fn dst(&self) -> u64 {
        (self.dst_hi as u64) << 32 | self.dst_lo as u64
    }

    #[inline]
    pub fn interrupt_on_completion(&self) -> bool {
        self.ioc & 1 != 0
    }
}

/// A descriptor array living in DMA-visible memory, filled front to back.
#[derive(Debug)]
pub struct BdlList {
    base: NonNull<BdlDesc>,
    capacity: u32,
    len: u32,
}

// The list exclusively owns its descriptor memory.
unsafe impl Send for BdlList {}

impl BdlList {
    /// Take over `capacity` descriptors at `base`.
    ///
    /// # Safety
    ///
    /// - `base` must be [`BDL_ALIGN`]-aligned, valid for
    ///   `capacity * BDL_DESC_SIZE` bytes and used by nothing else for the
    ///   life of the list.
    pub unsafe fn new(base: NonNull<u8>, capacity: u32) -> Self {
        debug_assert_eq!(base.as_ptr() as usize % BDL_ALIGN, 0);
        BdlList {
            base: base.cast(),
            capacity,
            len: 0,
        }
    }

    /// Bus address of the first descriptor.
    #[inline]
    pub fn addr(&self) -> usize {
        self.base.as_ptr() as usize
    }

    #[inline]
    pub fn as_ptr(&self) -> NonNull<u8> {
        self.base.cast()
    }

    #[inline]
    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    #[inline]
    pub fn len(&self) -> u32 {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Write the next descriptor. Every descriptor raises BDL_END.
    pub fn append(&mut self, tx: &Transaction) -> Result<(), BdlError> {
        if self.len == self.capacity {
            return Err(BdlError::Full);
        }
        tx.validate()?;
        let desc = BdlDesc::new(tx, true);
        unsafe {
            self.base
                .as_ptr()
                .add(self.len as usize)
                .write_volatile(desc)
        };
        self.len += 1;
        Ok(())
    }

    /// Read back descriptor `index`.
    pub fn entry(&self, index: u32) -> Option<BdlDesc> {
        if index >= self.len {
            return None;
        }
        Some(unsafe { self.base.as_ptr().add(index as usize).read_volatile() })
    }
}
