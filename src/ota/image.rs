//! Flash image writer with compile-time state safety via statum.
//!
//! ```text
//! Staging ──finalize (written == total)──► Finalized
//!    │
//!    └──────────────abort────────────────► Aborted
//! ```
//!
//! Only a `Staging` writer can be finalized, and `finalize` refuses an image
//! whose byte count does not match the announced size. A partial image can
//! therefore never be marked bootable.

use super::UpdateError;
use crate::hal::FirmwareStore;
use statum::{machine, state};
use tracing::{debug, info, warn};

#[state]
pub enum ImageState {
    Staging,   // Bytes flowing into the staging area
    Finalized, // Verified and marked bootable
    Aborted,   // Staging area discarded
}

#[machine]
pub struct ImageWriter<S: ImageState> {
    total: usize,
    written: usize,
}

impl<S: ImageState> ImageWriter<S> {
    pub fn total(&self) -> usize {
        self.total
    }

    pub fn written(&self) -> usize {
        self.written
    }
}

impl ImageWriter<Staging> {
    pub fn begin(store: &mut dyn FirmwareStore, total: usize) -> Result<Self, UpdateError> {
        if total == 0 {
            return Err(UpdateError::UnknownSize);
        }
        store.begin(total)?;
        debug!("Staging area opened for {} bytes", total);
        Ok(Self::new(total, 0))
    }

    /// Writes one chunk. A chunk the store does not fully accept is an error.
    pub fn write_chunk(
        &mut self,
        store: &mut dyn FirmwareStore,
        chunk: &[u8],
    ) -> Result<(), UpdateError> {
        if self.written + chunk.len() > self.total {
            return Err(UpdateError::Oversized {
                received: self.written + chunk.len(),
                total: self.total,
            });
        }

        let accepted = store.write(chunk);
        if accepted != chunk.len() {
            return Err(UpdateError::ShortWrite {
                expected: chunk.len(),
                written: accepted,
            });
        }

        self.written += accepted;
        Ok(())
    }

    pub fn progress(&self) -> u8 {
        ((self.written as u64 * 100) / self.total as u64) as u8
    }

    pub fn is_complete(&self) -> bool {
        self.written == self.total
    }

    pub fn finalize(
        self,
        store: &mut dyn FirmwareStore,
    ) -> Result<ImageWriter<Finalized>, UpdateError> {
        if !self.is_complete() {
            store.abort();
            return Err(UpdateError::Incomplete {
                written: self.written,
                total: self.total,
            });
        }

        if let Err(e) = store.finalize() {
            store.abort();
            return Err(e.into());
        }

        info!("Firmware image of {} bytes finalized", self.total);
        Ok(self.transition())
    }

    pub fn abort(self, store: &mut dyn FirmwareStore) -> ImageWriter<Aborted> {
        warn!(
            "Aborting staged image at {} of {} bytes",
            self.written, self.total
        );
        store.abort();
        self.transition()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeFlash, FlashCall};

    #[test]
    fn complete_image_finalizes() {
        let mut flash = FakeFlash::new();
        let mut writer = ImageWriter::<Staging>::begin(&mut flash, 4).unwrap();
        writer.write_chunk(&mut flash, b"ab").unwrap();
        assert_eq!(writer.progress(), 50);
        writer.write_chunk(&mut flash, b"cd").unwrap();
        let done = writer.finalize(&mut flash).unwrap();
        assert_eq!(done.written(), 4);
        assert_eq!(flash.calls().last(), Some(&FlashCall::Finalize));
    }

    #[test]
    fn incomplete_image_is_never_finalized() {
        let mut flash = FakeFlash::new();
        let mut writer = ImageWriter::<Staging>::begin(&mut flash, 4).unwrap();
        writer.write_chunk(&mut flash, b"ab").unwrap();
        assert!(matches!(
            writer.finalize(&mut flash),
            Err(UpdateError::Incomplete { written: 2, total: 4 })
        ));
        assert!(!flash.calls().contains(&FlashCall::Finalize));
        assert_eq!(flash.calls().last(), Some(&FlashCall::Abort));
    }

    #[test]
    fn short_flash_write_is_an_error() {
        let mut flash = FakeFlash::new();
        flash.limit_writes_to(1);
        let mut writer = ImageWriter::<Staging>::begin(&mut flash, 4).unwrap();
        assert!(matches!(
            writer.write_chunk(&mut flash, b"ab"),
            Err(UpdateError::ShortWrite { expected: 2, written: 1 })
        ));
        assert_eq!(writer.written(), 0);
    }

    #[test]
    fn zero_length_image_is_refused() {
        let mut flash = FakeFlash::new();
        assert!(matches!(
            ImageWriter::<Staging>::begin(&mut flash, 0),
            Err(UpdateError::UnknownSize)
        ));
        assert!(flash.calls().is_empty());
    }
}
