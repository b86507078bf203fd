use serde::{Serialize, de::DeserializeOwned};
use std::fmt::Debug;

/// An element of the ring Z_(2^BITS), i.e. an unsigned machine word with wrapping arithmetic.
pub trait Elem: Copy + Default + Debug + PartialEq + Eq + Send + Sync + Serialize + DeserializeOwned + 'static {
    const BITS: u32;
    const ZERO: Self;
    const ONE: Self;
    /// Representation of -1.
    const MINUS_ONE: Self;

    fn wrapping_add(self, rhs: Self) -> Self;
    fn wrapping_sub(self, rhs: Self) -> Self;
    fn wrapping_mul(self, rhs: Self) -> Self;
    fn wrapping_neg(self) -> Self;
    fn shl(self, bits: u32) -> Self;
    fn shr(self, bits: u32) -> Self;
    fn mask(self, bits: u32) -> Self;

    fn from_u64(v: u64) -> Self;
    /// Reduces a signed integer modulo 2^BITS.
    fn from_i64(v: i64) -> Self;
    fn to_u64(self) -> u64;
    /// Little-endian decoding, `bytes` must be exactly `BITS / 8` long.
    fn from_le_slice(bytes: &[u8]) -> Self;
}

/// A ciphertext ring usable by the LWE PIR scheme. Its double-width companion ring carries the
/// encrypted secret of the offline phase.
pub trait LweElem: Elem {
    type Wide: Elem;

    fn widen(self) -> Self::Wide;
    /// Reduces a double-width element modulo 2^BITS.
    fn narrow(w: Self::Wide) -> Self;
}

macro_rules! impl_elem {
    ($t:ty) => {
        impl Elem for $t {
            const BITS: u32 = <$t>::BITS;
            const ZERO: Self = 0;
            const ONE: Self = 1;
            const MINUS_ONE: Self = <$t>::MAX;

            #[inline(always)]
            fn wrapping_add(self, rhs: Self) -> Self {
                <$t>::wrapping_add(self, rhs)
            }
            #[inline(always)]
            fn wrapping_sub(self, rhs: Self) -> Self {
                <$t>::wrapping_sub(self, rhs)
            }
            #[inline(always)]
            fn wrapping_mul(self, rhs: Self) -> Self {
                <$t>::wrapping_mul(self, rhs)
            }
            #[inline(always)]
            fn wrapping_neg(self) -> Self {
                <$t>::wrapping_neg(self)
            }
            #[inline(always)]
            fn shl(self, bits: u32) -> Self {
                if bits >= Self::BITS { 0 } else { self << bits }
            }
            #[inline(always)]
            fn shr(self, bits: u32) -> Self {
                if bits >= Self::BITS { 0 } else { self >> bits }
            }
            #[inline(always)]
            fn mask(self, bits: u32) -> Self {
                if bits >= Self::BITS { self } else { self & ((1 << bits) - 1) }
            }
            #[inline(always)]
            fn from_u64(v: u64) -> Self {
                v as $t
            }
            #[inline(always)]
            fn from_i64(v: i64) -> Self {
                v as $t
            }
            #[inline(always)]
            fn to_u64(self) -> u64 {
                self as u64
            }
            #[inline(always)]
            fn from_le_slice(bytes: &[u8]) -> Self {
                let mut word = [0u8; std::mem::size_of::<$t>()];
                word.copy_from_slice(bytes);
                <$t>::from_le_bytes(word)
            }
        }
    };
}

impl_elem!(u32);
impl_elem!(u64);
impl_elem!(u128);

impl LweElem for u32 {
    type Wide = u64;

    #[inline(always)]
    fn widen(self) -> u64 {
        self as u64
    }
    #[inline(always)]
    fn narrow(w: u64) -> u32 {
        w as u32
    }
}

impl LweElem for u64 {
    type Wide = u128;

    #[inline(always)]
    fn widen(self) -> u128 {
        self as u128
    }
    #[inline(always)]
    fn narrow(w: u128) -> u64 {
        w as u64
    }
}
