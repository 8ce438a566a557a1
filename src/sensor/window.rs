//! Sliding-window smoothing of ambient light readings.

/// Number of samples averaged before any adjustment is permitted.
pub const SAMPLE_WINDOW: usize = 10;

/// Fixed-capacity ring of the most recent lux readings.
///
/// The window refuses to produce a smoothed value until it has been filled
/// once; single bright or dark flickers right after startup would otherwise
/// masquerade as the ambient level.
#[derive(Debug, Default)]
pub struct LuxWindow {
    samples: [u32; SAMPLE_WINDOW],
    next_index: usize,
    initialized: bool,
}

impl LuxWindow {
    /// Create an empty, uninitialized window.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one reading, overwriting the oldest.
    ///
    /// The window latches `initialized` the first time the write index
    /// wraps back to zero.
    pub fn push(&mut self, lux: u32) {
        self.samples[self.next_index] = lux;
        self.next_index = (self.next_index + 1) % SAMPLE_WINDOW;
        if self.next_index == 0 {
            self.initialized = true;
        }
    }

    /// Whether a full window of samples has been seen.
    #[must_use]
    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    /// Arithmetic mean of the window contents, or `None` before the window
    /// has filled once.
    #[must_use]
    pub fn smoothed(&self) -> Option<u32> {
        if !self.initialized {
            return None;
        }
        let sum: u64 = self.samples.iter().map(|&s| u64::from(s)).sum();
        Some((sum / SAMPLE_WINDOW as u64) as u32)
    }
}
