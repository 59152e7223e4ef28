// ============================================================================
// GENERATION
// Slide a num_steps window over the output, one lane, argmax each step.
// ============================================================================

use rand::distributions::{Distribution, WeightedIndex};
use rand::Rng;

use crate::error::GenerateError;
use crate::graph::Graph;
use crate::model::Model;
use crate::ops::{argmax, vec_max};

/// Read-only view of a trained model with its own scratch tape, so decoding
/// never touches the training graph.
pub struct Generator<'m> {
    model: &'m Model,
    graph: Graph,
}

impl<'m> Generator<'m> {
    pub fn new(model: &'m Model) -> Self {
        Generator { model, graph: model.graph().snapshot() }
    }

    fn check_seed(&self, seed: &[usize]) -> Result<(), GenerateError> {
        let dims = self.model.dims();
        if seed.len() != dims.num_steps {
            return Err(GenerateError::SeedLength { expected: dims.num_steps, found: seed.len() });
        }
        if let Some(&token) = seed.iter().find(|&&t| t >= dims.vocab_size) {
            return Err(GenerateError::TokenOutOfRange { token, vocab_size: dims.vocab_size });
        }
        Ok(())
    }

    /// Vocabulary scores for the token following `window`.
    fn next_scores(&mut self, window: &[usize]) -> Vec<f32> {
        self.graph.reset();
        let repr = self.model.encoder().encode(&[window.to_vec()], &mut self.graph);
        self.model.head().scores(self.graph.data(repr), &self.graph)
    }

    /// Greedy decoding: `n` new token ids following `seed`, which must hold
    /// exactly `num_steps` ids. The seed itself is not repeated in the output.
    pub fn generate(&mut self, seed: &[usize], n: usize) -> Result<Vec<usize>, GenerateError> {
        self.check_seed(seed)?;
        let mut window = seed.to_vec();
        let mut out = Vec::with_capacity(n);
        for _ in 0..n {
            let next = argmax(&self.next_scores(&window));
            out.push(next);
            window.remove(0);
            window.push(next);
        }
        Ok(out)
    }

    /// Like [`Generator::generate`] but draws each token from
    /// `softmax(scores / temperature)`. A temperature of zero (or below)
    /// falls back to argmax.
    pub fn generate_sampled(&mut self, seed: &[usize], n: usize, temperature: f32,
                            rng: &mut impl Rng) -> Result<Vec<usize>, GenerateError> {
        if temperature <= 0.0 {
            return self.generate(seed, n);
        }
        self.check_seed(seed)?;
        let mut window = seed.to_vec();
        let mut out = Vec::with_capacity(n);
        for _ in 0..n {
            let scores = self.next_scores(&window);
            let max = vec_max(&scores);
            let weights = scores.iter().map(|&s| ((s - max) / temperature).exp());
            let next = match WeightedIndex::new(weights) {
                Ok(dist) => dist.sample(rng),
                Err(_) => argmax(&scores),
            };
            out.push(next);
            window.remove(0);
            window.push(next);
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CellKind, ModelDims};
    use crate::sampler::LogUniformSampler;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn model(cell: CellKind) -> Model {
        let dims = ModelDims { vocab_size: 30, embed_size: 5, rnn_size: 7, hidden_size: 6, num_steps: 3, cell };
        Model::new(dims, 4, Box::new(LogUniformSampler::new(30)), &mut StdRng::seed_from_u64(21))
    }

    #[test]
    fn greedy_generation_is_deterministic() {
        for cell in [CellKind::Gru, CellKind::Lstm] {
            let m = model(cell);
            let a = Generator::new(&m).generate(&[1, 2, 3], 12).unwrap();
            let b = Generator::new(&m).generate(&[1, 2, 3], 12).unwrap();
            assert_eq!(a.len(), 12);
            assert_eq!(a, b);
            assert!(a.iter().all(|&t| t < 30));
        }
    }

    #[test]
    fn first_token_is_the_dense_argmax() {
        let m = model(CellKind::Gru);
        let mut g = m.graph().snapshot();
        let repr = m.encoder().encode(&[vec![4, 5, 6]], &mut g);
        let expected = m.head().predict(repr, &g);
        assert_eq!(Generator::new(&m).generate(&[4, 5, 6], 1).unwrap(), expected);
    }

    #[test]
    fn seed_is_validated() {
        let m = model(CellKind::Gru);
        let mut generator = Generator::new(&m);
        assert_eq!(generator.generate(&[1, 2], 5), Err(GenerateError::SeedLength { expected: 3, found: 2 }));
        assert_eq!(generator.generate(&[1, 2, 30], 5), Err(GenerateError::TokenOutOfRange { token: 30, vocab_size: 30 }));
        assert_eq!(generator.generate(&[1, 2, 3], 0), Ok(vec![]));
    }

    #[test]
    fn sampling_is_reproducible_and_zero_temperature_is_greedy() {
        let m = model(CellKind::Gru);
        let mut generator = Generator::new(&m);
        let a = generator.generate_sampled(&[7, 8, 9], 10, 1.0, &mut StdRng::seed_from_u64(3)).unwrap();
        let b = generator.generate_sampled(&[7, 8, 9], 10, 1.0, &mut StdRng::seed_from_u64(3)).unwrap();
        assert_eq!(a, b);
        let greedy = generator.generate(&[7, 8, 9], 10).unwrap();
        let cold = generator.generate_sampled(&[7, 8, 9], 10, 0.0, &mut StdRng::seed_from_u64(3)).unwrap();
        assert_eq!(greedy, cold);
    }
}
