// ============================================================================
// CONFIGURATION
// ============================================================================

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Which gated recurrence the encoder unrolls.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum CellKind {
    Gru,
    Lstm,
}

impl FromStr for CellKind {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "gru" => Ok(CellKind::Gru),
            "lstm" => Ok(CellKind::Lstm),
            other => Err(format!("unknown cell {other:?} (expected gru or lstm)")),
        }
    }
}

impl fmt::Display for CellKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self { CellKind::Gru => "gru", CellKind::Lstm => "lstm" })
    }
}

/// Negative-sampling policy for the loss head.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SamplerKind {
    LogUniform,
    Uniform,
}

impl FromStr for SamplerKind {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace(['-', '_'], "").as_str() {
            "loguniform" | "zipf" => Ok(SamplerKind::LogUniform),
            "uniform" => Ok(SamplerKind::Uniform),
            other => Err(format!("unknown sampler {other:?} (expected log_uniform or uniform)")),
        }
    }
}

/// Shape of a model, stored in every checkpoint so it can be rebuilt.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelDims {
    pub vocab_size: usize,
    pub embed_size: usize,
    pub rnn_size: usize,
    pub hidden_size: usize,
    pub num_steps: usize,
    pub cell: CellKind,
}

#[derive(Clone, Debug)]
pub struct Config {
    /// Lanes per batch (rows of the token grid).
    pub batch_size: usize,
    /// Window width in tokens.
    pub num_rnn_steps: usize,
    pub embed_size: usize,
    pub rnn_size: usize,
    pub hidden_size: usize,
    /// Negative candidates drawn per batch.
    pub neg_samples: usize,
    pub learn_rate: f32,
    pub momentum: f32,
    pub epochs: usize,
    /// Batch losses kept for the moving average.
    pub move_avg_len: usize,
    /// Checkpoints retained per run.
    pub keep_checkpoints: usize,
    pub cell: CellKind,
    pub sampler: SamplerKind,
    /// 0 draws a seed from entropy.
    pub seed: u64,
    pub run_id: String,
    pub checkpoint_dir: PathBuf,
    /// Debug-log the batch loss every this many global steps.
    pub log_every: usize,
    pub max_vocab: usize,
    pub gen_length: usize,
    /// 0 = greedy argmax decoding.
    pub temperature: f32,
    pub corpus: String,
    pub prompt: String,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            batch_size: 32,
            num_rnn_steps: 10,
            embed_size: 64,
            rnn_size: 128,
            hidden_size: 64,
            neg_samples: 64,
            learn_rate: 0.05,
            momentum: 0.9,
            epochs: 10,
            move_avg_len: 100,
            keep_checkpoints: 5,
            cell: CellKind::Gru,
            sampler: SamplerKind::LogUniform,
            seed: 0,
            run_id: "wordrnn".to_string(),
            checkpoint_dir: PathBuf::from("./checkpoints"),
            log_every: 100,
            max_vocab: 20_000,
            gen_length: 50,
            temperature: 0.0,
            corpus: String::new(),
            prompt: String::new(),
        }
    }
}

fn parse<T: FromStr>(key: &str, value: &str) -> Result<T, ConfigError>
where
    T::Err: fmt::Display,
{
    value.parse().map_err(|e: T::Err| ConfigError::Parse {
        key: key.to_string(),
        value: value.to_string(),
        message: e.to_string(),
    })
}

impl Config {
    /// Applies `--key=value` options on top of the defaults. Keys are
    /// case-insensitive and ignore `-`/`_`, so `--learnRate`, `--learn-rate`
    /// and `--learn_rate` are the same option.
    pub fn from_args<I, S>(args: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut config = Self::default();
        for arg in args {
            let arg = arg.as_ref().trim_start_matches("--");
            let (key, value) = arg.split_once('=').ok_or_else(|| ConfigError::Parse {
                key: arg.to_string(),
                value: String::new(),
                message: "expected --key=value".to_string(),
            })?;
            config.set(key, value)?;
        }
        config.validate()?;
        Ok(config)
    }

    pub fn set(&mut self, key: &str, value: &str) -> Result<(), ConfigError> {
        let norm = key.to_ascii_lowercase().replace(['-', '_'], "");
        match norm.as_str() {
            "batchsize" => self.batch_size = parse(key, value)?,
            "numrnnsteps" | "numsteps" => self.num_rnn_steps = parse(key, value)?,
            "embedsize" => self.embed_size = parse(key, value)?,
            "rnnsize" => self.rnn_size = parse(key, value)?,
            "hiddensize" => self.hidden_size = parse(key, value)?,
            "negsamples" => self.neg_samples = parse(key, value)?,
            "learnrate" | "learningrate" => self.learn_rate = parse(key, value)?,
            "momentum" => self.momentum = parse(key, value)?,
            "epochs" => self.epochs = parse(key, value)?,
            "moveavglen" => self.move_avg_len = parse(key, value)?,
            "keepcheckpoints" => self.keep_checkpoints = parse(key, value)?,
            "cell" => self.cell = parse(key, value)?,
            "sampler" => self.sampler = parse(key, value)?,
            "seed" => self.seed = parse(key, value)?,
            "runid" => self.run_id = value.to_string(),
            "checkpointdir" => self.checkpoint_dir = PathBuf::from(value),
            "logevery" => self.log_every = parse(key, value)?,
            "maxvocab" => self.max_vocab = parse(key, value)?,
            "genlength" => self.gen_length = parse(key, value)?,
            "temperature" => self.temperature = parse(key, value)?,
            "corpus" | "trainingfile" => self.corpus = value.to_string(),
            "prompt" => self.prompt = value.to_string(),
            _ => return Err(ConfigError::UnknownKey(key.to_string())),
        }
        Ok(())
    }

    /// Range checks that need no data. Data-dependent checks (window vs.
    /// row width, vocabulary) happen when the trainer is built.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let sizes = [
            ("batch_size", self.batch_size),
            ("num_rnn_steps", self.num_rnn_steps),
            ("embed_size", self.embed_size),
            ("rnn_size", self.rnn_size),
            ("hidden_size", self.hidden_size),
            ("neg_samples", self.neg_samples),
            ("epochs", self.epochs),
            ("move_avg_len", self.move_avg_len),
            ("keep_checkpoints", self.keep_checkpoints),
            ("log_every", self.log_every),
            ("max_vocab", self.max_vocab),
        ];
        for (name, v) in sizes {
            if v == 0 {
                return Err(ConfigError::Validation(format!("{name} must be positive")));
            }
        }
        if !(self.learn_rate.is_finite() && self.learn_rate > 0.0) {
            return Err(ConfigError::Validation(format!(
                "learn_rate must be a positive finite number, got {}", self.learn_rate
            )));
        }
        if !(0.0..1.0).contains(&self.momentum) {
            return Err(ConfigError::Validation(format!("momentum must be in [0, 1), got {}", self.momentum)));
        }
        if !(self.temperature.is_finite() && self.temperature >= 0.0) {
            return Err(ConfigError::Validation(format!(
                "temperature must be finite and non-negative, got {}", self.temperature
            )));
        }
        if self.run_id.is_empty() || self.run_id.contains(['/', '\\']) {
            return Err(ConfigError::Validation(format!("run_id {:?} is not a valid file stem", self.run_id)));
        }
        Ok(())
    }

    pub fn model_dims(&self, vocab_size: usize) -> ModelDims {
        ModelDims {
            vocab_size,
            embed_size: self.embed_size,
            rnn_size: self.rnn_size,
            hidden_size: self.hidden_size,
            num_steps: self.num_rnn_steps,
            cell: self.cell,
        }
    }
}
