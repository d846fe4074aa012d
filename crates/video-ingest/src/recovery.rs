//! What a reader does after a read that produced no frame.

use std::time::Duration;

/// Pause between empty reads from a live device.
pub(crate) const EMPTY_READ_BACKOFF: Duration = Duration::from_millis(20);
/// Consecutive empty device reads tolerated before the source is declared gone.
pub(crate) const MAX_EMPTY_READS: u32 = 250;
/// Rewinds in a row without a single frame before a finite source is declared unreadable.
pub(crate) const MAX_BARREN_REWINDS: u32 = 3;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum EmptyRead {
    /// Sleep for the given time and read again.
    Retry(Duration),
    /// Seek back to the first frame and read again.
    Rewind,
    /// Stop the reader and report the source as unavailable.
    GiveUp,
}

/// Counts empty reads since the last good frame.
#[derive(Debug)]
pub(crate) struct ReadTracker {
    rewindable: bool,
    empty_reads: u32,
    barren_rewinds: u32,
}

impl ReadTracker {
    /// `rewindable` sources (files, stills) restart on an empty read; live devices wait.
    pub(crate) fn new(rewindable: bool) -> Self {
        Self {
            rewindable,
            empty_reads: 0,
            barren_rewinds: 0,
        }
    }

    pub(crate) fn frame(&mut self) {
        self.empty_reads = 0;
        self.barren_rewinds = 0;
    }

    pub(crate) fn empty(&mut self) -> EmptyRead {
        if self.rewindable {
            self.barren_rewinds += 1;
            if self.barren_rewinds > MAX_BARREN_REWINDS {
                return EmptyRead::GiveUp;
            }
            return EmptyRead::Rewind;
        }

        self.empty_reads += 1;
        if self.empty_reads >= MAX_EMPTY_READS {
            EmptyRead::GiveUp
        } else {
            EmptyRead::Retry(EMPTY_READ_BACKOFF)
        }
    }

    pub(crate) fn empty_reads(&self) -> u32 {
        self.empty_reads
    }
}
