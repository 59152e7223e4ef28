// ============================================================================
// SAMPLED-LOSS HEAD
// Training: target vs. a few sampled negatives. Inference: dense argmax.
// ============================================================================

use rand::Rng;
use rayon::prelude::*;

use crate::graph::{Graph, TID};
use crate::ops::{argmax, dot, glorot};
use crate::sampler::{log_expected_count, sample_unique, NegativeSampler};

pub struct SampledLossHead {
    vocab_size: usize,
    hidden_size: usize,
    neg_samples: usize,
    /// `[vocab_size, hidden_size]`, one output vector per token
    weights: TID,
    /// `[1, vocab_size]`
    bias: TID,
    sampler: Box<dyn NegativeSampler>,
}

impl SampledLossHead {
    pub fn new(vocab_size: usize, hidden_size: usize, neg_samples: usize,
               sampler: Box<dyn NegativeSampler>, g: &mut Graph, rng: &mut impl Rng) -> Self {
        debug_assert_eq!(sampler.range(), vocab_size);
        let weights = g.param(glorot(vocab_size, hidden_size, rng), vocab_size, hidden_size);
        let bias = g.param(vec![0.0; vocab_size], 1, vocab_size);
        SampledLossHead { vocab_size, hidden_size, neg_samples, weights, bias, sampler }
    }

    pub fn vocab_size(&self) -> usize { self.vocab_size }
    pub fn neg_samples(&self) -> usize { self.neg_samples }

    /// Mean sampled loss of `repr` (`[lanes, hidden]`) against `targets`.
    /// One set of negatives is drawn per call and shared by all lanes.
    pub fn loss(&self, repr: TID, targets: &[usize], g: &mut Graph, rng: &mut impl Rng) -> TID {
        let cand = sample_unique(self.sampler.as_ref(), self.neg_samples, rng);
        let log_q_cand: Vec<f32> = cand.ids.iter()
            .map(|&id| log_expected_count(self.sampler.probability(id), cand.tries))
            .collect();
        let log_q_true: Vec<f32> = targets.iter()
            .map(|&t| log_expected_count(self.sampler.probability(t), cand.tries))
            .collect();
        g.sampled_logistic(repr, self.weights, self.bias, targets, &cand.ids, &log_q_true, &log_q_cand)
    }

    /// Dense `repr @ W^T + b` over the whole vocabulary, `[lanes * vocab]`.
    pub fn scores(&self, repr: &[f32], g: &Graph) -> Vec<f32> {
        let h = self.hidden_size;
        let w = g.data(self.weights);
        let b = g.data(self.bias);
        let lanes = repr.len() / h;
        let mut out = vec![0.0f32; lanes * self.vocab_size];
        for (lane, row) in out.chunks_exact_mut(self.vocab_size).enumerate() {
            let r = &repr[lane * h..(lane + 1) * h];
            row.par_iter_mut().enumerate().for_each(|(v, s)| {
                *s = dot(r, &w[v * h..(v + 1) * h]) + b[v];
            });
        }
        out
    }

    /// Most likely next token for every lane of `repr`.
    pub fn predict(&self, repr: TID, g: &Graph) -> Vec<usize> {
        let scores = self.scores(g.data(repr), g);
        scores.chunks_exact(self.vocab_size).map(argmax).collect()
    }

    pub fn param_ids(&self) -> Vec<TID> { vec![self.weights, self.bias] }
}
