//! Candidate sampling for the sampled loss.
//!
//! The distribution is a policy: the head only needs draws and the
//! probability of any id, from which it derives expected counts.

use std::collections::HashSet;

use rand::{Rng, RngCore};

use crate::config::SamplerKind;

pub trait NegativeSampler {
    /// Number of ids the sampler can produce (`0..range`).
    fn range(&self) -> usize;
    fn probability(&self, id: usize) -> f64;
    fn draw(&self, rng: &mut dyn RngCore) -> usize;
}

/// Zipf-like `P(k) = ln((k + 2) / (k + 1)) / ln(range + 1)`.
/// Assumes ids are ranked by descending corpus frequency.
#[derive(Clone, Debug)]
pub struct LogUniformSampler {
    range: usize,
    log_range: f64,
}

impl LogUniformSampler {
    pub fn new(range: usize) -> Self {
        LogUniformSampler { range, log_range: ((range + 1) as f64).ln() }
    }
}

impl NegativeSampler for LogUniformSampler {
    fn range(&self) -> usize { self.range }

    fn probability(&self, id: usize) -> f64 {
        let k = id as f64;
        ((k + 2.0) / (k + 1.0)).ln() / self.log_range
    }

    fn draw(&self, rng: &mut dyn RngCore) -> usize {
        let u: f64 = rng.gen();
        let v = (u * self.log_range).exp().floor() as usize;
        v.saturating_sub(1).min(self.range - 1)
    }
}

#[derive(Clone, Debug)]
pub struct UniformSampler {
    range: usize,
}

impl UniformSampler {
    pub fn new(range: usize) -> Self { UniformSampler { range } }
}

impl NegativeSampler for UniformSampler {
    fn range(&self) -> usize { self.range }
    fn probability(&self, _id: usize) -> f64 { 1.0 / self.range as f64 }
    fn draw(&self, rng: &mut dyn RngCore) -> usize { rng.gen_range(0..self.range) }
}

pub fn build_sampler(kind: SamplerKind, vocab_size: usize) -> Box<dyn NegativeSampler> {
    match kind {
        SamplerKind::LogUniform => Box::new(LogUniformSampler::new(vocab_size)),
        SamplerKind::Uniform => Box::new(UniformSampler::new(vocab_size)),
    }
}

/// Distinct ids drawn for one batch and how many draws it took.
#[derive(Clone, Debug)]
pub struct Candidates {
    pub ids: Vec<usize>,
    pub tries: usize,
}

/// Draws until `num` distinct ids are collected (capped at the sampler range).
pub fn sample_unique(sampler: &dyn NegativeSampler, num: usize, rng: &mut impl Rng) -> Candidates {
    let num = num.min(sampler.range());
    let mut seen = HashSet::with_capacity(num);
    let mut ids = Vec::with_capacity(num);
    let mut tries = 0;
    while ids.len() < num {
        let id = sampler.draw(&mut *rng);
        tries += 1;
        if seen.insert(id) { ids.push(id); }
    }
    Candidates { ids, tries }
}

/// `ln E[count]` of an id with probability `p` after `tries` draws, i.e.
/// the log probability it appears at least once in a unique sample.
pub fn log_expected_count(p: f64, tries: usize) -> f32 {
    let q = -((tries as f64) * (-p).ln_1p()).exp_m1();
    q.max(f64::MIN_POSITIVE).ln() as f32
}
