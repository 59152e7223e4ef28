// ============================================================================
// CHECKPOINTS
// ============================================================================
//
// One bincode file per (run, epoch): `{dir}/{run_id}-epoch{NNNN}.bin`.
// Writes go to `.tmp` first and are renamed into place, so a crash mid-write
// never leaves a truncated checkpoint under the final name.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::ModelDims;
use crate::error::{CheckpointError, ConfigError};
use crate::model::Model;
use crate::optim::ParamSet;

pub const CHECKPOINT_VERSION: &str = "wordrnn-1";

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct Checkpoint {
    pub version: String,
    pub timestamp: String,
    pub run_id: String,
    /// Epochs completed when the snapshot was taken (1-based).
    pub epoch: usize,
    pub global_step: usize,
    pub moving_avg: f32,
    pub dims: ModelDims,
    pub params: Vec<f32>,
    pub velocity: Vec<f32>,
}

impl Checkpoint {
    pub fn capture(run_id: &str, epoch: usize, global_step: usize, moving_avg: f32,
                   model: &Model, ps: &ParamSet) -> Self {
        Checkpoint {
            version: CHECKPOINT_VERSION.to_string(),
            timestamp: iso_timestamp(),
            run_id: run_id.to_string(),
            epoch,
            global_step,
            moving_avg,
            dims: model.dims().clone(),
            params: model.flat_params(),
            velocity: ps.flat_velocity(),
        }
    }

    /// Copies the saved parameters (and momentum, when `ps` is given) into a
    /// model of the same shape.
    pub fn restore_into(&self, model: &mut Model, ps: Option<&mut ParamSet>) -> Result<(), ConfigError> {
        let (want, have) = (model.dims(), &self.dims);
        let checks = [
            ("vocab_size", want.vocab_size, have.vocab_size),
            ("embed_size", want.embed_size, have.embed_size),
            ("rnn_size", want.rnn_size, have.rnn_size),
            ("hidden_size", want.hidden_size, have.hidden_size),
            ("num_steps", want.num_steps, have.num_steps),
        ];
        for (what, expected, found) in checks {
            if expected != found {
                return Err(ConfigError::Mismatch { what, expected, found });
            }
        }
        if want.cell != have.cell {
            return Err(ConfigError::Validation(format!(
                "checkpoint holds a {} cell, model uses {}", have.cell, want.cell
            )));
        }
        model.load_flat_params(&self.params)?;
        if let Some(ps) = ps {
            if !ps.load_flat_velocity(&self.velocity) {
                return Err(ConfigError::Mismatch {
                    what: "momentum buffer length",
                    expected: ps.flat_velocity().len(),
                    found: self.velocity.len(),
                });
            }
        }
        Ok(())
    }
}

/// Epoch-tagged snapshots of one run, keeping the `keep` most recent.
#[derive(Clone, Debug)]
pub struct CheckpointStore {
    dir: PathBuf,
    run_id: String,
    keep: usize,
}

impl CheckpointStore {
    pub fn new(dir: impl Into<PathBuf>, run_id: impl Into<String>, keep: usize) -> Self {
        CheckpointStore { dir: dir.into(), run_id: run_id.into(), keep: keep.max(1) }
    }

    pub fn run_id(&self) -> &str { &self.run_id }
    pub fn dir(&self) -> &Path { &self.dir }

    pub fn path_for(&self, epoch: usize) -> PathBuf {
        self.dir.join(format!("{}-epoch{:04}.bin", self.run_id, epoch))
    }

    fn epoch_of(&self, path: &Path) -> Option<usize> {
        let name = path.file_name()?.to_str()?;
        let rest = name.strip_prefix(self.run_id.as_str())?.strip_prefix("-epoch")?;
        rest.strip_suffix(".bin")?.parse().ok()
    }

    pub fn save(&self, cp: &Checkpoint) -> Result<PathBuf, CheckpointError> {
        let io = |path: &Path| {
            let path = path.to_path_buf();
            move |source| CheckpointError::Io { path, source }
        };
        fs::create_dir_all(&self.dir).map_err(io(&self.dir))?;
        let bytes = bincode::serialize(cp).map_err(CheckpointError::Encode)?;
        let path = self.path_for(cp.epoch);
        let tmp = path.with_extension("bin.tmp");
        fs::write(&tmp, &bytes).map_err(io(&tmp))?;
        fs::rename(&tmp, &path).map_err(io(&path))?;
        info!(path = %path.display(), mb = bytes.len() as f64 / 1_048_576.0, "saved checkpoint");
        // the new file is already in place; a failed eviction only leaves extras behind
        if let Err(e) = self.prune() {
            warn!(error = %e, "could not evict old checkpoints");
        }
        Ok(path)
    }

    /// Checkpoints of this run on disk, oldest epoch first.
    pub fn list(&self) -> Result<Vec<(usize, PathBuf)>, CheckpointError> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(e) => e,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => return Err(CheckpointError::Io { path: self.dir.clone(), source }),
        };
        let mut found = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|source| CheckpointError::Io { path: self.dir.clone(), source })?;
            let path = entry.path();
            if let Some(epoch) = self.epoch_of(&path) { found.push((epoch, path)); }
        }
        found.sort_by_key(|(epoch, _)| *epoch);
        Ok(found)
    }

    fn prune(&self) -> Result<(), CheckpointError> {
        let all = self.list()?;
        let excess = all.len().saturating_sub(self.keep);
        for (epoch, path) in all.into_iter().take(excess) {
            fs::remove_file(&path).map_err(|source| CheckpointError::Io { path: path.clone(), source })?;
            debug!(epoch, path = %path.display(), "evicted checkpoint");
        }
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Checkpoint, CheckpointError> {
        let bytes = fs::read(path).map_err(|source| CheckpointError::Io { path: path.to_path_buf(), source })?;
        bincode::deserialize(&bytes).map_err(|source| CheckpointError::Decode { path: path.to_path_buf(), source })
    }

    pub fn latest(&self) -> Result<Checkpoint, CheckpointError> {
        match self.list()?.pop() {
            Some((_, path)) => Self::load(&path),
            None => Err(CheckpointError::NotFound { run_id: self.run_id.clone() }),
        }
    }
}

fn iso_timestamp() -> String {
    let now = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default();
    let (secs, ms) = (now.as_secs() as i64, now.subsec_millis());
    let (days, tod) = (secs / 86400, secs % 86400);
    let (h, m, sec) = (tod / 3600, (tod % 3600) / 60, tod % 60);
    let leap = |y: i64| (y % 4 == 0 && y % 100 != 0) || y % 400 == 0;
    let mut y = 1970i64;
    let mut rd = days;
    loop {
        let diy = if leap(y) { 366 } else { 365 };
        if rd < diy { break; }
        rd -= diy;
        y += 1;
    }
    let md = [31, if leap(y) { 29 } else { 28 }, 31, 30, 31, 30, 31, 31, 30, 31, 30, 31];
    let mut mo = 0;
    for d in md {
        if rd < d { break; }
        rd -= d;
        mo += 1;
    }
    format!("{:04}-{:02}-{:02}T{:02}:{:02}:{:02}.{:03}Z", y, mo + 1, rd + 1, h, m, sec, ms)
}
