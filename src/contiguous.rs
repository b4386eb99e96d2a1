//! Typed overlays over a flat byte region, the Rust equivalent of the
//! reference's `unsafe.Pointer`-cast "contiguous object array".
//!
//! Virtqueue descriptor/avail/used rings and the block request header are
//! all fixed-layout structs living inside a single allocation handed to
//! (or received from) a device; [`Overlay`] gives index-based typed
//! access into that allocation without any additional copying, using
//! `zerocopy` the same way the teacher's virtqueue code does for its own
//! ring structs.

use zerocopy::{AsBytes, FromBytes};

/// A fixed-stride array of `T` living inside a caller-owned byte buffer.
pub struct Overlay<'a, T: FromBytes + AsBytes> {
    bytes: &'a mut [u8],
    _marker: std::marker::PhantomData<T>,
}

impl<'a, T: FromBytes + AsBytes + Copy> Overlay<'a, T> {
    /// `bytes` must be at least `len * size_of::<T>()` long.
    pub fn new(bytes: &'a mut [u8], len: usize) -> Self {
        let need = len * std::mem::size_of::<T>();
        assert!(
            bytes.len() >= need,
            "overlay buffer too small: have {}, need {need}",
            bytes.len()
        );
        Self {
            bytes,
            _marker: std::marker::PhantomData,
        }
    }

    fn stride(&self) -> usize {
        std::mem::size_of::<T>()
    }

    pub fn get(&self, index: usize) -> T {
        let stride = self.stride();
        let slice = &self.bytes[index * stride..(index + 1) * stride];
        T::read_from(slice).expect("overlay slot misaligned or wrong length")
    }

    pub fn set(&mut self, index: usize, value: T) {
        let stride = self.stride();
        let slice = &mut self.bytes[index * stride..(index + 1) * stride];
        slice.copy_from_slice(value.as_bytes());
    }

    pub fn len(&self) -> usize {
        self.bytes.len() / self.stride()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
