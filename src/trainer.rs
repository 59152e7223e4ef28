// ============================================================================
// TRAINING LOOP
// shuffled windows -> encoder -> sampled loss -> backward -> momentum SGD
// ============================================================================

use std::collections::VecDeque;
use std::path::PathBuf;
use std::time::Instant;

use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing::{debug, info, warn};

use crate::batch::{Batch, BatchFeeder, TokenGrid};
use crate::checkpoint::{Checkpoint, CheckpointStore};
use crate::config::Config;
use crate::error::{CheckpointError, ConfigError, Error};
use crate::model::Model;
use crate::optim::{Momentum, ParamSet};
use crate::sampler::build_sampler;

/// Mean of the last `capacity` batch losses.
#[derive(Clone, Debug)]
pub struct MovingAverage {
    window: VecDeque<f32>,
    capacity: usize,
}

impl MovingAverage {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        MovingAverage { window: VecDeque::with_capacity(capacity), capacity }
    }

    pub fn push(&mut self, loss: f32) {
        if self.window.len() == self.capacity { self.window.pop_front(); }
        self.window.push_back(loss);
    }

    /// NaN until the first loss arrives.
    pub fn value(&self) -> f32 {
        if self.window.is_empty() { return f32::NAN; }
        self.window.iter().sum::<f32>() / self.window.len() as f32
    }

    pub fn len(&self) -> usize { self.window.len() }
    pub fn is_empty(&self) -> bool { self.window.is_empty() }
}

/// Outcome of one pass over the grid.
#[derive(Debug)]
pub struct EpochReport {
    /// 1-based index of the finished epoch.
    pub epoch: usize,
    pub batches: usize,
    /// Mean over all of this epoch's batch losses (NaN if any was NaN).
    pub mean_loss: f32,
    pub moving_avg: f32,
    pub global_step: usize,
    pub non_finite_batches: usize,
    /// `None` when the trainer has no checkpoint store.
    pub checkpoint: Option<Result<PathBuf, CheckpointError>>,
}

pub struct Trainer {
    config: Config,
    model: Model,
    params: ParamSet,
    optimizer: Momentum,
    feeder: BatchFeeder,
    store: Option<CheckpointStore>,
    rng: StdRng,
    moving: MovingAverage,
    epoch: usize,
    global_step: usize,
}

impl Trainer {
    /// Checks every data-dependent constraint, then builds the model.
    /// Nothing is computed when an error is returned.
    pub fn new(config: Config, tokens: &[usize], vocab_size: usize,
               store: Option<CheckpointStore>) -> Result<Self, ConfigError> {
        config.validate()?;
        if vocab_size < 2 {
            return Err(ConfigError::Validation(format!("vocab_size must be at least 2, got {vocab_size}")));
        }
        // unique candidates get expensive to collect as they approach the
        // whole vocabulary, so at most half of it is sampled per batch
        if 2 * config.neg_samples > vocab_size {
            return Err(ConfigError::Validation(format!(
                "neg_samples ({}) must be at most half of vocab_size ({vocab_size})", config.neg_samples
            )));
        }
        if let Some((index, &token)) = tokens.iter().enumerate().find(|(_, &t)| t >= vocab_size) {
            return Err(ConfigError::TokenOutOfRange { index, token, vocab_size });
        }
        let grid = TokenGrid::build(tokens, config.batch_size, config.num_rnn_steps)?;
        if grid.row_width() <= config.num_rnn_steps + 1 {
            return Err(ConfigError::NoBatches { row_width: grid.row_width(), num_steps: config.num_rnn_steps });
        }
        let feeder = BatchFeeder::new(grid, config.num_rnn_steps);

        let mut rng = if config.seed == 0 { StdRng::from_entropy() } else { StdRng::seed_from_u64(config.seed) };
        let dims = config.model_dims(vocab_size);
        let model = Model::new(dims, config.neg_samples, build_sampler(config.sampler, vocab_size), &mut rng);
        let params = ParamSet::new(model.param_ids(), model.graph());
        let optimizer = Momentum::new(config.learn_rate, config.momentum);

        info!(
            vocab = vocab_size,
            tokens = tokens.len(),
            lanes = config.batch_size,
            row_width = feeder.grid().row_width(),
            batches_per_epoch = feeder.len(),
            cell = %config.cell,
            params = model.total_params(),
            "model ready"
        );

        Ok(Trainer {
            moving: MovingAverage::new(config.move_avg_len),
            config, model, params, optimizer, feeder, store, rng,
            epoch: 0,
            global_step: 0,
        })
    }

    pub fn model(&self) -> &Model { &self.model }
    pub fn into_model(self) -> Model { self.model }
    pub fn feeder(&self) -> &BatchFeeder { &self.feeder }
    pub fn config(&self) -> &Config { &self.config }
    pub fn global_step(&self) -> usize { self.global_step }
    /// Epochs completed so far (including restored ones).
    pub fn epoch(&self) -> usize { self.epoch }
    pub fn moving_average(&self) -> f32 { self.moving.value() }

    /// Restores parameters, momentum and counters from the newest checkpoint
    /// of this run. Returns false when there is nothing to resume from.
    pub fn resume(&mut self) -> Result<bool, Error> {
        let Some(store) = &self.store else { return Ok(false) };
        let cp = match store.latest() {
            Ok(cp) => cp,
            Err(CheckpointError::NotFound { .. }) => return Ok(false),
            Err(e) => return Err(e.into()),
        };
        cp.restore_into(&mut self.model, Some(&mut self.params))?;
        self.epoch = cp.epoch;
        self.global_step = cp.global_step;
        self.optimizer.t = cp.global_step;
        self.moving = MovingAverage::new(self.config.move_avg_len);
        if cp.moving_avg.is_finite() { self.moving.push(cp.moving_avg); }
        info!(epoch = cp.epoch, global_step = cp.global_step, saved = %cp.timestamp, "resumed from checkpoint");
        Ok(true)
    }

    /// One forward/backward/update on `batch`. Returns the batch loss.
    /// Non-finite losses are not intercepted: the update is applied and the
    /// loss enters the moving average like any other.
    pub fn step(&mut self, batch: &Batch) -> f32 {
        let loss = self.model.batch_loss(&batch.inputs, &batch.targets, &mut self.rng);
        let value = self.model.graph().data(loss)[0];
        self.model.graph_mut().backward(loss);
        self.optimizer.step(self.model.graph_mut(), &mut self.params);
        self.moving.push(value);
        self.global_step += 1;
        value
    }

    pub fn train_epoch(&mut self) -> EpochReport {
        let t0 = Instant::now();
        let batches = self.feeder.epoch(&mut self.rng);
        let total = batches.len();
        let (mut sum, mut non_finite) = (0.0f64, 0usize);

        for batch in batches {
            let loss = self.step(&batch);
            sum += loss as f64;
            if !loss.is_finite() {
                non_finite += 1;
                warn!(step = self.global_step, start = batch.start, loss, "non-finite batch loss");
            }
            if self.global_step % self.config.log_every == 0 {
                debug!(step = self.global_step, loss, avg = self.moving.value(), "batch");
            }
        }

        self.epoch += 1;
        let mean_loss = if total == 0 { f32::NAN } else { (sum / total as f64) as f32 };
        let moving_avg = self.moving.value();
        info!(
            epoch = self.epoch,
            batches = total,
            mean_loss,
            moving_avg,
            step = self.global_step,
            secs = t0.elapsed().as_secs_f32(),
            "epoch done"
        );

        let checkpoint = self.save_checkpoint(moving_avg);
        EpochReport {
            epoch: self.epoch,
            batches: total,
            mean_loss,
            moving_avg,
            global_step: self.global_step,
            non_finite_batches: non_finite,
            checkpoint,
        }
    }

    fn save_checkpoint(&self, moving_avg: f32) -> Option<Result<PathBuf, CheckpointError>> {
        let store = self.store.as_ref()?;
        let cp = Checkpoint::capture(store.run_id(), self.epoch, self.global_step, moving_avg,
            &self.model, &self.params);
        let result = store.save(&cp);
        if let Err(e) = &result {
            warn!(epoch = self.epoch, error = %e, "checkpoint save failed, continuing");
        }
        Some(result)
    }

    /// Trains until `config.epochs` epochs are complete. After a resume only
    /// the remaining epochs run.
    pub fn run(&mut self) -> Vec<EpochReport> {
        let mut reports = Vec::with_capacity(self.config.epochs.saturating_sub(self.epoch));
        while self.epoch < self.config.epochs {
            reports.push(self.train_epoch());
        }
        reports
    }
}
