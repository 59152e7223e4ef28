//! Word-level recurrent language model.
//!
//! A token stream is cut into a `[batch_size, row_width]` grid, random
//! `num_rnn_steps` windows are encoded by a GRU (or LSTM), and the final
//! state is trained against the next word with a sampled logistic loss.
//! Everything runs on a small tape-based autodiff [`graph::Graph`].

pub mod batch;
pub mod cell;
pub mod checkpoint;
pub mod config;
pub mod encoder;
pub mod error;
pub mod generate;
pub mod graph;
pub mod head;
pub mod model;
pub mod ops;
pub mod optim;
pub mod sampler;
pub mod trainer;
pub mod vocab;

pub use batch::{Batch, BatchFeeder, EpochBatches, TokenGrid};
pub use checkpoint::{Checkpoint, CheckpointStore};
pub use config::{CellKind, Config, ModelDims, SamplerKind};
pub use error::{CheckpointError, ConfigError, Error, GenerateError};
pub use generate::Generator;
pub use model::Model;
pub use trainer::{EpochReport, MovingAverage, Trainer};
pub use vocab::Vocab;
