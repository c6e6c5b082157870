//! The authoritative LED state.
//!
//! Cells are stored row-major: cell `row * stripes + stripe`. A stripe is a
//! column of `rows` cells, a row spans every stripe.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::color::Rgb;
use crate::error::GridError;

/// Receives the full grid after every successful mutation.
///
/// Called with the grid lock held so updates arrive in mutation order;
/// implementations must not block.
pub trait GridObserver: Send + Sync {
    fn on_grid_updated(&self, snapshot: &[Rgb]);
}

/// Observer that ignores every update
pub struct NullObserver;

impl GridObserver for NullObserver {
    fn on_grid_updated(&self, _snapshot: &[Rgb]) {}
}

/// Dimensions of the grid: `stripes` columns by `rows` rows
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GridLayout {
    stripes: usize,
    rows: usize,
}

impl GridLayout {
    /// Largest stripe or row count a one-byte protocol index can address.
    pub const MAX_INDEXED: usize = u8::MAX as usize + 1;

    pub fn new(led_count: usize, stripes: usize) -> Result<Self, GridError> {
        if led_count == 0 || stripes == 0 {
            return Err(GridError::InvalidLayout(format!(
                "{} LEDs in {} stripes",
                led_count, stripes
            )));
        }
        if led_count % stripes != 0 {
            return Err(GridError::InvalidLayout(format!(
                "{} LEDs do not divide into {} stripes",
                led_count, stripes
            )));
        }
        let rows = led_count / stripes;
        if stripes > Self::MAX_INDEXED || rows > Self::MAX_INDEXED {
            return Err(GridError::InvalidLayout(format!(
                "{} stripes x {} rows exceeds one-byte addressing",
                stripes, rows
            )));
        }
        Ok(GridLayout { stripes, rows })
    }

    pub fn stripes(&self) -> usize {
        self.stripes
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn led_count(&self) -> usize {
        self.stripes * self.rows
    }

    /// Cell indices belonging to `stripe`
    pub fn stripe_cells(&self, stripe: usize) -> impl Iterator<Item = usize> {
        let stripes = self.stripes;
        (0..self.rows).map(move |row| row * stripes + stripe)
    }

    /// Cell indices belonging to `row`
    pub fn row_cells(&self, row: usize) -> std::ops::Range<usize> {
        row * self.stripes..(row + 1) * self.stripes
    }
}

impl Default for GridLayout {
    /// A single strip of `NUMBER_OF_LEDS` one-LED stripes
    fn default() -> Self {
        GridLayout {
            stripes: crate::protocol::NUMBER_OF_LEDS,
            rows: 1,
        }
    }
}

/// Thread-safe LED grid shared by every connection and effect.
pub struct LedGrid {
    layout: GridLayout,
    cells: Mutex<Vec<Rgb>>,
    generation: AtomicU64,
    observer: Arc<dyn GridObserver>,
}

impl LedGrid {
    pub fn new(layout: GridLayout, background: Rgb, observer: Arc<dyn GridObserver>) -> Self {
        LedGrid {
            layout,
            cells: Mutex::new(vec![background; layout.led_count()]),
            generation: AtomicU64::new(0),
            observer,
        }
    }

    pub fn layout(&self) -> GridLayout {
        self.layout
    }

    /// Number of mutations applied so far
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> Vec<Rgb> {
        self.cells.lock().clone()
    }

    pub fn set_stripe(&self, index: usize, color: Rgb) -> Result<(), GridError> {
        if index >= self.layout.stripes {
            return Err(GridError::StripeOutOfRange {
                index,
                stripes: self.layout.stripes,
            });
        }
        self.mutate(|cells| {
            for cell in self.layout.stripe_cells(index) {
                cells[cell] = color;
            }
        });
        Ok(())
    }

    pub fn set_row(&self, index: usize, color: Rgb) -> Result<(), GridError> {
        if index >= self.layout.rows {
            return Err(GridError::RowOutOfRange {
                index,
                rows: self.layout.rows,
            });
        }
        self.mutate(|cells| cells[self.layout.row_cells(index)].fill(color));
        Ok(())
    }

    pub fn set_led(&self, index: usize, color: Rgb) -> Result<(), GridError> {
        let led_count = self.layout.led_count();
        if index >= led_count {
            return Err(GridError::LedOutOfRange { index, led_count });
        }
        self.mutate(|cells| cells[index] = color);
        Ok(())
    }

    pub fn set_all(&self, color: Rgb) {
        self.mutate(|cells| cells.fill(color));
    }

    /// Rewrites every cell with `f(index, current)` as one mutation, unless
    /// `token` is cancelled.
    ///
    /// The cancellation check happens under the grid lock, so once a caller
    /// has cancelled the token and then written to the grid, no later step
    /// can overwrite that write. Returns `false` if the step was skipped.
    pub fn update_unless_cancelled<F>(&self, token: &CancellationToken, mut f: F) -> bool
    where
        F: FnMut(usize, Rgb) -> Rgb,
    {
        let mut cells = self.cells.lock();
        if token.is_cancelled() {
            return false;
        }
        for (index, cell) in cells.iter_mut().enumerate() {
            *cell = f(index, *cell);
        }
        self.publish(&cells);
        true
    }

    fn mutate<F: FnOnce(&mut [Rgb])>(&self, f: F) {
        let mut cells = self.cells.lock();
        f(&mut cells);
        self.publish(&cells);
    }

    fn publish(&self, cells: &[Rgb]) {
        self.generation.fetch_add(1, Ordering::Relaxed);
        self.observer.on_grid_updated(cells);
    }
}
