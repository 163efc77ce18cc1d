// Licensed under the Apache-2.0 license

//! Word-granular access to the memory window shared with the coprocessor

use crate::error::{IpcqError, IpcqResult};
use coproc_host_osal::AtomicU32;
use core::sync::atomic::Ordering;
use zerocopy::{FromBytes, Immutable, IntoBytes};

/// Memory both sides can address.
///
/// Every access is a single aligned 32-bit load or store, the only
/// granularity the coprocessor bus guarantees to be tear-free.
pub trait SharedRegion: Send + Sync {
    /// Size in bytes
    fn len(&self) -> usize;

    fn load(&self, offset: usize) -> IpcqResult<u32>;

    fn store(&self, offset: usize, value: u32) -> IpcqResult<()>;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Host-memory backed region, used when the window is plain RAM and by the
/// emulated coprocessor.
pub struct HeapRegion {
    words: Box<[AtomicU32]>,
}

impl HeapRegion {
    /// Allocate a zeroed region of at least `len` bytes
    pub fn new(len: usize) -> Self {
        let words = (0..len.div_ceil(4))
            .map(|_| AtomicU32::new(0))
            .collect::<Vec<_>>()
            .into_boxed_slice();
        Self { words }
    }

    fn word(&self, offset: usize) -> IpcqResult<&AtomicU32> {
        if offset % 4 != 0 {
            return Err(IpcqError::AddressOutOfRange {
                addr: offset as u64,
            });
        }
        self.words
            .get(offset / 4)
            .ok_or(IpcqError::AddressOutOfRange {
                addr: offset as u64,
            })
    }
}

impl SharedRegion for HeapRegion {
    fn len(&self) -> usize {
        self.words.len() * 4
    }

    fn load(&self, offset: usize) -> IpcqResult<u32> {
        Ok(self.word(offset)?.load(Ordering::Acquire))
    }

    fn store(&self, offset: usize, value: u32) -> IpcqResult<()> {
        self.word(offset)?.store(value, Ordering::Release);
        Ok(())
    }
}

/// Copy a layout struct out of the region word by word
pub fn read_struct<T>(region: &dyn SharedRegion, offset: usize) -> IpcqResult<T>
where
    T: FromBytes + IntoBytes,
{
    let mut value = T::new_zeroed();
    for (i, chunk) in value.as_mut_bytes().chunks_exact_mut(4).enumerate() {
        chunk.copy_from_slice(&region.load(offset + i * 4)?.to_le_bytes());
    }
    Ok(value)
}

/// Copy a layout struct into the region word by word
pub fn write_struct<T>(region: &dyn SharedRegion, offset: usize, value: &T) -> IpcqResult<()>
where
    T: IntoBytes + Immutable,
{
    for (i, chunk) in value.as_bytes().chunks_exact(4).enumerate() {
        let mut word = [0u8; 4];
        word.copy_from_slice(chunk);
        region.store(offset + i * 4, u32::from_le_bytes(word))?;
    }
    Ok(())
}
