#![cfg_attr(not(target_os = "none"), allow(dead_code))]

//! Configuration record in internal flash.
//!
//! The record occupies the start of the last 128 KiB sector: a little-endian
//! magic word, the document length, then the JSON document, padded with the
//! erased value up to the flash write granularity.

use heatpump_core::config::{MAX_DOCUMENT_LEN, StorageError};

/// `HPCF` in little-endian.
pub const RECORD_MAGIC: u32 = 0x4643_5048;
pub const HEADER_LEN: usize = 8;
pub const RECORD_CAPACITY: usize = HEADER_LEN + MAX_DOCUMENT_LEN;
const ERASED: u8 = 0xFF;

/// Offset of sector 23 from the start of flash.
pub const CONFIG_OFFSET: u32 = 0x1E_0000;
pub const CONFIG_SECTOR_LEN: u32 = 0x2_0000;

/// Frames `document` into `out` and returns the padded record length.
pub fn encode_record(document: &[u8], align: usize, out: &mut [u8]) -> Result<usize, StorageError> {
    if document.len() > MAX_DOCUMENT_LEN {
        return Err(StorageError::TooLarge);
    }
    let len = u32::try_from(document.len()).map_err(|_| StorageError::TooLarge)?;
    let used = HEADER_LEN + document.len();
    let padded = used.next_multiple_of(align.max(1));
    let record = out.get_mut(..padded).ok_or(StorageError::TooLarge)?;

    record[..4].copy_from_slice(&RECORD_MAGIC.to_le_bytes());
    record[4..HEADER_LEN].copy_from_slice(&len.to_le_bytes());
    record[HEADER_LEN..used].copy_from_slice(document);
    record[used..].fill(ERASED);
    Ok(padded)
}

/// Reads the document length out of a record header.
pub fn document_len(header: &[u8]) -> Result<usize, StorageError> {
    let magic = header
        .get(..4)
        .and_then(|bytes| bytes.try_into().ok())
        .map(u32::from_le_bytes)
        .ok_or(StorageError::Corrupt)?;
    if magic != RECORD_MAGIC {
        // Erased or never written.
        return Err(StorageError::NotFound);
    }
    let len = header
        .get(4..HEADER_LEN)
        .and_then(|bytes| bytes.try_into().ok())
        .map(u32::from_le_bytes)
        .ok_or(StorageError::Corrupt)?;
    let len = usize::try_from(len).map_err(|_| StorageError::Corrupt)?;
    if len == 0 || len > MAX_DOCUMENT_LEN {
        return Err(StorageError::Corrupt);
    }
    Ok(len)
}

#[cfg(target_os = "none")]
pub use flash::FlashStore;

#[cfg(target_os = "none")]
mod flash {
    use embassy_stm32::flash::{Blocking, Flash, WRITE_SIZE};
    use heatpump_core::config::{ConfigStore, StorageError};

    use super::{
        CONFIG_OFFSET, CONFIG_SECTOR_LEN, HEADER_LEN, RECORD_CAPACITY, document_len, encode_record,
    };

    /// Record padded to the write size never exceeds this.
    const BUFFER_LEN: usize = RECORD_CAPACITY + 32;
    #[allow(clippy::cast_possible_truncation)]
    const DATA_OFFSET: u32 = CONFIG_OFFSET + HEADER_LEN as u32;

    pub struct FlashStore<'d> {
        flash: Flash<'d, Blocking>,
    }

    impl<'d> FlashStore<'d> {
        pub fn new(flash: Flash<'d, Blocking>) -> Self {
            Self { flash }
        }
    }

    impl ConfigStore for FlashStore<'_> {
        fn load(&mut self, buf: &mut [u8]) -> Result<usize, StorageError> {
            let mut header = [0u8; HEADER_LEN];
            self.flash
                .blocking_read(CONFIG_OFFSET, &mut header)
                .map_err(|_| StorageError::Io)?;
            let len = document_len(&header)?;
            let dst = buf.get_mut(..len).ok_or(StorageError::TooLarge)?;
            self.flash
                .blocking_read(DATA_OFFSET, dst)
                .map_err(|_| StorageError::Io)?;
            Ok(len)
        }

        fn save(&mut self, document: &[u8]) -> Result<(), StorageError> {
            let mut record = [0u8; BUFFER_LEN];
            let len = encode_record(document, WRITE_SIZE, &mut record)?;
            self.flash
                .blocking_erase(CONFIG_OFFSET, CONFIG_OFFSET + CONFIG_SECTOR_LEN)
                .map_err(|_| StorageError::Io)?;
            self.flash
                .blocking_write(CONFIG_OFFSET, &record[..len])
                .map_err(|_| StorageError::Io)
        }
    }
}
