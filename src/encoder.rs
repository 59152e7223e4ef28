// ============================================================================
// SEQUENCE ENCODER
// embedding -> cell unrolled over the window -> tanh(h_T @ Wp + bp)
// ============================================================================

use rand::Rng;

use crate::cell::{build_cell, CellState, RecurrentCell};
use crate::config::ModelDims;
use crate::graph::{Graph, TID};
use crate::ops::{glorot, rand_normal};

pub struct SequenceEncoder {
    vocab_size: usize,
    embed_size: usize,
    hidden_size: usize,
    embedding: TID,
    cell: Box<dyn RecurrentCell>,
    proj_w: TID,
    proj_b: TID,
}

impl SequenceEncoder {
    pub fn new(dims: &ModelDims, g: &mut Graph, rng: &mut impl Rng) -> Self {
        let scale = (1.0 / dims.embed_size as f32).sqrt();
        let embedding = g.param(rand_normal(dims.vocab_size * dims.embed_size, scale, rng),
            dims.vocab_size, dims.embed_size);
        let cell = build_cell(dims.cell, dims.embed_size, dims.rnn_size, g, rng);
        let proj_w = g.param(glorot(dims.rnn_size, dims.hidden_size, rng), dims.rnn_size, dims.hidden_size);
        let proj_b = g.param(vec![0.0; dims.hidden_size], 1, dims.hidden_size);
        SequenceEncoder {
            vocab_size: dims.vocab_size, embed_size: dims.embed_size, hidden_size: dims.hidden_size,
            embedding, cell, proj_w, proj_b,
        }
    }

    pub fn cell(&self) -> &dyn RecurrentCell { self.cell.as_ref() }
    pub fn hidden_size(&self) -> usize { self.hidden_size }
    pub fn embed_size(&self) -> usize { self.embed_size }

    /// Embedding rows for one column of tokens (one per lane).
    pub fn embed(&self, ids: &[usize], g: &mut Graph) -> TID {
        debug_assert!(ids.iter().all(|&t| t < self.vocab_size));
        g.gather_rows(self.embedding, ids)
    }

    /// `tanh(h @ Wp + bp)`
    pub fn project(&self, h: TID, g: &mut Graph) -> TID {
        let mm = g.matmul(h, self.proj_w);
        let pre = g.broadcast_add(mm, self.proj_b);
        g.tanh_op(pre)
    }

    /// Unrolls the cell across `window` (`[lanes][num_steps]`) from the
    /// learned initial state and returns the `[lanes, hidden_size]`
    /// representation of the final state. Intermediate states are not kept.
    pub fn encode(&self, window: &[Vec<usize>], g: &mut Graph) -> TID {
        let lanes = window.len();
        let steps = window.first().map_or(0, Vec::len);
        debug_assert!(window.iter().all(|row| row.len() == steps));

        let mut state: CellState = self.cell.initial_state(lanes, g);
        let mut column = Vec::with_capacity(lanes);
        for t in 0..steps {
            column.clear();
            column.extend(window.iter().map(|row| row[t]));
            let x = self.embed(&column, g);
            state = self.cell.step(x, &state, g);
        }
        self.project(state.h, g)
    }

    pub fn param_ids(&self) -> Vec<TID> {
        let mut ids = vec![self.embedding];
        ids.extend(self.cell.param_ids());
        ids.extend([self.proj_w, self.proj_b]);
        ids
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CellKind;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn dims(cell: CellKind) -> ModelDims {
        ModelDims { vocab_size: 30, embed_size: 4, rnn_size: 6, hidden_size: 5, num_steps: 3, cell }
    }

    #[test]
    fn single_step_window_is_one_cell_call() {
        let mut rng = StdRng::seed_from_u64(2);
        let mut g = Graph::new();
        let enc = SequenceEncoder::new(&dims(CellKind::Gru), &mut g, &mut rng);
        g.freeze_params();

        let encoded = enc.encode(&[vec![7], vec![19]], &mut g);
        let via_encoder = g.data(encoded).to_vec();

        g.reset();
        let h0 = enc.cell().initial_state(2, &mut g);
        let x = enc.embed(&[7, 19], &mut g);
        let h1 = enc.cell().step(x, &h0, &mut g);
        let manual = enc.project(h1.h, &mut g);
        assert_eq!(via_encoder, g.data(manual));
    }

    #[test]
    fn output_shape_and_range() {
        for kind in [CellKind::Gru, CellKind::Lstm] {
            let mut rng = StdRng::seed_from_u64(4);
            let mut g = Graph::new();
            let enc = SequenceEncoder::new(&dims(kind), &mut g, &mut rng);
            g.freeze_params();
            let window = vec![vec![1, 2, 3], vec![4, 5, 6], vec![29, 0, 0], vec![9, 9, 9]];
            let r = enc.encode(&window, &mut g);
            assert_eq!((g.rows(r), g.cols(r)), (4, 5));
            assert!(g.data(r).iter().all(|v| v.abs() < 1.0));
        }
    }

    #[test]
    fn lanes_are_independent() {
        let mut rng = StdRng::seed_from_u64(6);
        let mut g = Graph::new();
        let enc = SequenceEncoder::new(&dims(CellKind::Gru), &mut g, &mut rng);
        g.freeze_params();
        let both = enc.encode(&[vec![1, 2, 3], vec![4, 5, 6]], &mut g);
        let both = g.data(both).to_vec();
        let second = enc.encode(&[vec![4, 5, 6]], &mut g);
        for (a, b) in both[5..].iter().zip(g.data(second)) {
            assert!((a - b).abs() < 1e-5);
        }
    }
}
