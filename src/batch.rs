// ============================================================================
// CORPUS WINDOWING
// Flat token stream -> [num_rows, row_width] grid -> shuffled window batches
// ============================================================================

use std::sync::Arc;

use rand::seq::SliceRandom;
use rand::Rng;

use crate::error::ConfigError;

/// The token stream cut into `num_rows` equal contiguous lanes.
/// Trailing tokens that do not fill a whole row are dropped.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TokenGrid {
    data: Vec<usize>,
    num_rows: usize,
    row_width: usize,
}

impl TokenGrid {
    pub fn build(tokens: &[usize], num_rows: usize, num_steps: usize) -> Result<Self, ConfigError> {
        if num_rows == 0 {
            return Err(ConfigError::Validation("num_rows must be positive".to_string()));
        }
        if num_steps == 0 {
            return Err(ConfigError::Validation("num_steps must be positive".to_string()));
        }
        let row_width = tokens.len() / num_rows;
        if row_width < num_steps + 1 {
            return Err(ConfigError::WindowTooWide { row_width, num_steps });
        }
        Ok(TokenGrid { data: tokens[..num_rows * row_width].to_vec(), num_rows, row_width })
    }

    pub fn num_rows(&self) -> usize { self.num_rows }
    pub fn row_width(&self) -> usize { self.row_width }

    pub fn row(&self, r: usize) -> &[usize] {
        &self.data[r * self.row_width..(r + 1) * self.row_width]
    }

    pub fn get(&self, r: usize, c: usize) -> usize { self.data[r * self.row_width + c] }

    /// Columns `start .. start + num_steps` of every row.
    pub fn window(&self, start: usize, num_steps: usize) -> Vec<Vec<usize>> {
        (0..self.num_rows).map(|r| self.row(r)[start..start + num_steps].to_vec()).collect()
    }

    /// Column `start + num_steps`, one token per row.
    pub fn target(&self, start: usize, num_steps: usize) -> Vec<usize> {
        (0..self.num_rows).map(|r| self.get(r, start + num_steps)).collect()
    }
}

/// One training example: a window per lane and the token that follows it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Batch {
    pub start: usize,
    /// `[num_rows][num_steps]`
    pub inputs: Vec<Vec<usize>>,
    /// `[num_rows]`
    pub targets: Vec<usize>,
}

/// Restartable source of epochs. Holds no per-epoch state, so every call
/// to [`BatchFeeder::epoch`] draws an independent permutation.
#[derive(Clone, Debug)]
pub struct BatchFeeder {
    grid: Arc<TokenGrid>,
    num_steps: usize,
}

impl BatchFeeder {
    pub fn new(grid: TokenGrid, num_steps: usize) -> Self {
        BatchFeeder { grid: Arc::new(grid), num_steps }
    }

    pub fn grid(&self) -> &TokenGrid { &self.grid }
    pub fn num_steps(&self) -> usize { self.num_steps }

    /// Batches per epoch: `row_width - num_steps - 1`, or zero when the
    /// rows cannot hold a window plus its target.
    pub fn len(&self) -> usize {
        self.grid.row_width().saturating_sub(self.num_steps + 1)
    }

    pub fn is_empty(&self) -> bool { self.len() == 0 }

    pub fn epoch(&self, rng: &mut impl Rng) -> EpochBatches {
        let mut order: Vec<usize> = (0..self.len()).collect();
        order.shuffle(rng);
        EpochBatches {
            grid: Arc::clone(&self.grid),
            num_steps: self.num_steps,
            order: order.into_iter(),
        }
    }
}

/// One pass over every start column, in the order drawn for this epoch.
/// Windows are materialized lazily as the iterator advances.
pub struct EpochBatches {
    grid: Arc<TokenGrid>,
    num_steps: usize,
    order: std::vec::IntoIter<usize>,
}

impl EpochBatches {
    /// Remaining start columns, in visiting order.
    pub fn starts(&self) -> &[usize] { self.order.as_slice() }
}

impl Iterator for EpochBatches {
    type Item = Batch;

    fn next(&mut self) -> Option<Batch> {
        let start = self.order.next()?;
        Some(Batch {
            start,
            inputs: self.grid.window(start, self.num_steps),
            targets: self.grid.target(start, self.num_steps),
        })
    }

    fn size_hint(&self) -> (usize, Option<usize>) { self.order.size_hint() }
}

impl ExactSizeIterator for EpochBatches {}
