// ============================================================================
// WORD RNN MODEL
// Owns the graph (parameters first, scratch tape after) plus the encoder and
// head parameter handles.
// ============================================================================

use rand::Rng;

use crate::config::ModelDims;
use crate::encoder::SequenceEncoder;
use crate::error::ConfigError;
use crate::graph::{Graph, TID};
use crate::head::SampledLossHead;
use crate::sampler::NegativeSampler;

pub struct Model {
    dims: ModelDims,
    graph: Graph,
    encoder: SequenceEncoder,
    head: SampledLossHead,
}

impl Model {
    pub fn new(dims: ModelDims, neg_samples: usize, sampler: Box<dyn NegativeSampler>,
               rng: &mut impl Rng) -> Self {
        let mut graph = Graph::new();
        let encoder = SequenceEncoder::new(&dims, &mut graph, rng);
        let head = SampledLossHead::new(dims.vocab_size, dims.hidden_size, neg_samples, sampler, &mut graph, rng);
        graph.freeze_params();
        Model { dims, graph, encoder, head }
    }

    pub fn dims(&self) -> &ModelDims { &self.dims }
    pub fn graph(&self) -> &Graph { &self.graph }
    pub fn graph_mut(&mut self) -> &mut Graph { &mut self.graph }
    pub fn encoder(&self) -> &SequenceEncoder { &self.encoder }
    pub fn head(&self) -> &SampledLossHead { &self.head }

    pub fn param_ids(&self) -> Vec<TID> {
        let mut ids = self.encoder.param_ids();
        ids.extend(self.head.param_ids());
        ids
    }

    pub fn total_params(&self) -> usize {
        self.param_ids().iter().map(|&t| self.graph.data(t).len()).sum()
    }

    /// Records a fresh forward pass for one batch and returns the loss node.
    /// Gradients are zeroed; call `graph_mut().backward(loss)` next.
    pub fn batch_loss(&mut self, inputs: &[Vec<usize>], targets: &[usize], rng: &mut impl Rng) -> TID {
        self.graph.reset();
        self.graph.zero_grad();
        let repr = self.encoder.encode(inputs, &mut self.graph);
        self.head.loss(repr, targets, &mut self.graph, rng)
    }

    /// All parameters concatenated in registration order.
    pub fn flat_params(&self) -> Vec<f32> {
        let mut out = Vec::with_capacity(self.total_params());
        for t in self.param_ids() { out.extend_from_slice(self.graph.data(t)); }
        out
    }

    /// Inverse of [`Model::flat_params`].
    pub fn load_flat_params(&mut self, flat: &[f32]) -> Result<(), ConfigError> {
        let expected = self.total_params();
        if flat.len() != expected {
            return Err(ConfigError::Mismatch { what: "parameter count", expected, found: flat.len() });
        }
        let mut off = 0;
        for t in self.param_ids() {
            let dst = self.graph.data_mut(t);
            let len = dst.len();
            dst.copy_from_slice(&flat[off..off + len]);
            off += len;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CellKind;
    use crate::sampler::LogUniformSampler;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn tiny(cell: CellKind) -> Model {
        let dims = ModelDims { vocab_size: 12, embed_size: 3, rnn_size: 4, hidden_size: 3, num_steps: 2, cell };
        Model::new(dims, 4, Box::new(LogUniformSampler::new(12)), &mut StdRng::seed_from_u64(5))
    }

    fn loss_value(model: &mut Model, inputs: &[Vec<usize>], targets: &[usize]) -> f32 {
        let l = model.batch_loss(inputs, targets, &mut StdRng::seed_from_u64(77));
        model.graph().data(l)[0]
    }

    #[test]
    fn end_to_end_gradients_match_finite_differences() {
        for cell in [CellKind::Gru, CellKind::Lstm] {
            let mut model = tiny(cell);
            let inputs = vec![vec![1, 2], vec![3, 4], vec![5, 1]];
            let targets = vec![3, 5, 2];
            let loss = model.batch_loss(&inputs, &targets, &mut StdRng::seed_from_u64(77));
            model.graph_mut().backward(loss);

            let ids = model.param_ids();
            // embedding row 1, first cell weight, last cell param (initial state), projection, head
            let picks = [(ids[0], 3), (ids[1], 5), (ids[ids.len() - 5], 0), (ids[ids.len() - 4], 2), (ids[ids.len() - 2], 9)];
            let analytic: Vec<f32> = picks.iter().map(|&(t, i)| model.graph().grad(t)[i]).collect();
            for (&(t, i), &a) in picks.iter().zip(&analytic) {
                let eps = 1e-2;
                let orig = model.graph().data(t)[i];
                model.graph_mut().data_mut(t)[i] = orig + eps;
                let plus = loss_value(&mut model, &inputs, &targets);
                model.graph_mut().data_mut(t)[i] = orig - eps;
                let minus = loss_value(&mut model, &inputs, &targets);
                model.graph_mut().data_mut(t)[i] = orig;
                let n = (plus - minus) / (2.0 * eps);
                assert!((a - n).abs() <= 2e-3 + 3e-2 * (a.abs() + n.abs()),
                    "{cell:?} {t:?}[{i}] analytic {a} numeric {n}");
            }
        }
    }

    #[test]
    fn flat_params_round_trip_and_size_check() {
        let mut model = tiny(CellKind::Gru);
        let mut flat = model.flat_params();
        assert_eq!(flat.len(), model.total_params());
        flat.iter_mut().for_each(|v| *v += 1.0);
        model.load_flat_params(&flat).unwrap();
        assert_eq!(model.flat_params(), flat);
        assert!(matches!(model.load_flat_params(&flat[1..]), Err(ConfigError::Mismatch { .. })));
    }
}
