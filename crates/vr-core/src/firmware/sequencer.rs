//! Flash sequencer: parse, identity check, replay, commit.
//!
//! Parsing never touches the bus; callers parse before taking the device
//! lock.

use tracing::{debug, info, instrument};

use super::image::FirmwareImage;
use crate::chip::{ChipFamily, VrChip};
use crate::error::VrError;
use crate::events::{FlashPhase, VrEvent, VrObserver};
use crate::transport::PagedTransport;

/// Outcome of a completed update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlashReport {
    pub records: usize,
    pub page_selects: usize,
}

/// Drives one firmware update through its phases.
///
/// Any error moves the sequencer to [`FlashPhase::Failed`]. Records already
/// written stay written; there is no rollback.
pub struct FlashSequencer<'a> {
    rail: &'a str,
    observer: &'a dyn VrObserver,
    phase: FlashPhase,
}

impl<'a> FlashSequencer<'a> {
    pub fn new(rail: &'a str, observer: &'a dyn VrObserver) -> Self {
        Self {
            rail,
            observer,
            phase: FlashPhase::Idle,
        }
    }

    pub fn phase(&self) -> FlashPhase {
        self.phase
    }

    fn transition(&mut self, to: FlashPhase) {
        let from = self.phase;
        self.phase = to;
        self.observer.on_event(&VrEvent::FlashPhaseChanged {
            rail: self.rail.to_string(),
            from,
            to,
        });
    }

    /// Parse and bound-check `bytes` for `family` without touching the bus.
    ///
    /// Families that cannot be flashed fail before the `Parsing` phase.
    #[instrument(skip(self, bytes), fields(rail = %self.rail, len = bytes.len()))]
    pub fn parse(&mut self, family: ChipFamily, bytes: &[u8]) -> Result<FirmwareImage, VrError> {
        let result = self.parse_image(family, bytes);
        if result.is_err() {
            self.transition(FlashPhase::Failed);
        }
        result
    }

    fn parse_image(&mut self, family: ChipFamily, bytes: &[u8]) -> Result<FirmwareImage, VrError> {
        let limit = family.max_image_records().ok_or(VrError::Unsupported {
            family,
            operation: "firmware update",
        })?;

        self.transition(FlashPhase::Parsing);
        let image = FirmwareImage::parse(bytes, limit)?;
        image.check_pages(family.page_count())?;
        debug!(records = image.len(), "Image parsed");
        Ok(image)
    }

    /// Program a parsed image. The caller holds the device lock throughout.
    #[instrument(skip(self, chip, t, image), fields(rail = %self.rail, records = image.len()))]
    pub fn run(
        &mut self,
        chip: &mut dyn VrChip,
        t: &mut PagedTransport,
        image: &FirmwareImage,
    ) -> Result<FlashReport, VrError> {
        match self.execute(chip, t, image) {
            Ok(report) => {
                self.transition(FlashPhase::Done);
                Ok(report)
            }
            Err(e) => {
                self.transition(FlashPhase::Failed);
                Err(e)
            }
        }
    }

    /// Give up on an update that never reached the device.
    pub fn abort(&mut self) {
        if !matches!(self.phase, FlashPhase::Done | FlashPhase::Failed) {
            self.transition(FlashPhase::Failed);
        }
    }

    fn execute(
        &mut self,
        chip: &mut dyn VrChip,
        t: &mut PagedTransport,
        image: &FirmwareImage,
    ) -> Result<FlashReport, VrError> {
        let family = chip.family();
        chip.max_image_records().ok_or(VrError::Unsupported {
            family,
            operation: "firmware update",
        })?;
        image.check_pages(t.device().page_count)?;

        self.transition(FlashPhase::Validating);
        chip.verify_identity(t)?;

        self.transition(FlashPhase::Flashing);
        let page_selects = self.replay(t, image)?;

        self.transition(FlashPhase::Committing);
        chip.store(t)?;
        t.settle_after_commit();

        info!(family = %family, records = image.len(), "Firmware update complete");
        Ok(FlashReport {
            records: image.len(),
            page_selects,
        })
    }

    fn replay(&mut self, t: &mut PagedTransport, image: &FirmwareImage) -> Result<usize, VrError> {
        let total = image.len();
        let mut page = None;
        let mut page_selects = 0;
        let mut decile = 0;

        for (i, record) in image.records().iter().enumerate() {
            if page != Some(record.page) {
                t.set_page(record.page)?;
                page = Some(record.page);
                page_selects += 1;
            }
            t.write_reg(record.register, record.payload())?;

            let done = i + 1;
            let reached = done * 10 / total;
            if reached > decile {
                decile = reached;
                self.observer.on_event(&VrEvent::FlashProgress {
                    rail: self.rail.to_string(),
                    current: done,
                    total,
                    page: record.page,
                });
            }
        }
        Ok(page_selects)
    }
}
