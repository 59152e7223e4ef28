// ============================================================================
// GATED RECURRENT CELLS
// ============================================================================
//
// A cell is a pure transition `(x, state, params) -> state`. It records its
// ops on the caller's graph and keeps nothing between calls, so the encoder
// can unroll it freely and swap one variant for another.

use rand::Rng;

use crate::config::CellKind;
use crate::graph::{Graph, TID};
use crate::ops::glorot;

/// Recurrent state for a batch of lanes. `c` is only used by cells with a
/// separate memory channel.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CellState {
    pub h: TID,
    pub c: Option<TID>,
}

pub trait RecurrentCell {
    fn kind(&self) -> CellKind;
    fn input_size(&self) -> usize;
    fn state_size(&self) -> usize;
    /// The learned initial state broadcast to `lanes` rows.
    fn initial_state(&self, lanes: usize, g: &mut Graph) -> CellState;
    /// `x` is `[lanes, input_size]`.
    fn step(&self, x: TID, prev: &CellState, g: &mut Graph) -> CellState;
    fn param_ids(&self) -> Vec<TID>;
}

pub fn build_cell(kind: CellKind, input_size: usize, state_size: usize,
                  g: &mut Graph, rng: &mut impl Rng) -> Box<dyn RecurrentCell> {
    match kind {
        CellKind::Gru => Box::new(GruCell::new(input_size, state_size, g, rng)),
        CellKind::Lstm => Box::new(LstmCell::new(input_size, state_size, g, rng)),
    }
}

// ----------------------------------------------------------------------------
// GRU
// ----------------------------------------------------------------------------

/// Intermediate nodes of one GRU transition.
#[derive(Clone, Copy, Debug)]
pub struct GruStep {
    pub reset: TID,
    pub update: TID,
    pub candidate: TID,
    pub h: TID,
}

pub struct GruCell {
    input_size: usize,
    state_size: usize,
    wr: TID, br: TID,
    wz: TID, bz: TID,
    w: TID, b: TID,
    h0: TID,
}

impl GruCell {
    pub fn new(input_size: usize, state_size: usize, g: &mut Graph, rng: &mut impl Rng) -> Self {
        let fan_in = input_size + state_size;
        let mut gate = |g: &mut Graph| {
            let w = g.param(glorot(fan_in, state_size, rng), fan_in, state_size);
            let b = g.param(vec![0.0; state_size], 1, state_size);
            (w, b)
        };
        let (wr, br) = gate(g);
        let (wz, bz) = gate(g);
        let (w, b) = gate(g);
        let h0 = g.param(vec![0.0; state_size], 1, state_size);
        GruCell { input_size, state_size, wr, br, wz, bz, w, b, h0 }
    }

    /// One transition, keeping the gates and candidate for inspection.
    pub fn step_traced(&self, x: TID, h_prev: TID, g: &mut Graph) -> GruStep {
        // reset, update = sigmoid([x, h_prev] @ W + b)
        let xh = g.concat_cols(x, h_prev);
        let r_mm = g.matmul(xh, self.wr);
        let r_pre = g.broadcast_add(r_mm, self.br);
        let reset = g.sigmoid(r_pre);
        let z_mm = g.matmul(xh, self.wz);
        let z_pre = g.broadcast_add(z_mm, self.bz);
        let update = g.sigmoid(z_pre);

        // candidate = tanh([x, reset * h_prev] @ W + b)
        let gated = g.mul(reset, h_prev);
        let xrh = g.concat_cols(x, gated);
        let c_mm = g.matmul(xrh, self.w);
        let c_pre = g.broadcast_add(c_mm, self.b);
        let candidate = g.tanh_op(c_pre);

        // h = update * h_prev + (1 - update) * candidate
        let keep = g.mul(update, h_prev);
        let omz = g.one_minus(update);
        let take = g.mul(omz, candidate);
        let h = g.add(keep, take);

        GruStep { reset, update, candidate, h }
    }
}

impl RecurrentCell for GruCell {
    fn kind(&self) -> CellKind { CellKind::Gru }
    fn input_size(&self) -> usize { self.input_size }
    fn state_size(&self) -> usize { self.state_size }

    fn initial_state(&self, lanes: usize, g: &mut Graph) -> CellState {
        CellState { h: g.expand_rows(self.h0, lanes), c: None }
    }

    fn step(&self, x: TID, prev: &CellState, g: &mut Graph) -> CellState {
        CellState { h: self.step_traced(x, prev.h, g).h, c: None }
    }

    fn param_ids(&self) -> Vec<TID> {
        vec![self.wr, self.br, self.wz, self.bz, self.w, self.b, self.h0]
    }
}

// ----------------------------------------------------------------------------
// LSTM
// ----------------------------------------------------------------------------

pub struct LstmCell {
    input_size: usize,
    state_size: usize,
    wi: TID, bi: TID,
    wf: TID, bf: TID,
    wo: TID, bo: TID,
    wg: TID, bg: TID,
    h0: TID,
    c0: TID,
}

impl LstmCell {
    pub fn new(input_size: usize, state_size: usize, g: &mut Graph, rng: &mut impl Rng) -> Self {
        let fan_in = input_size + state_size;
        let mut gate = |g: &mut Graph, bias: f32| {
            let w = g.param(glorot(fan_in, state_size, rng), fan_in, state_size);
            let b = g.param(vec![bias; state_size], 1, state_size);
            (w, b)
        };
        let (wi, bi) = gate(g, 0.0);
        // forget bias 1.0: remember by default early in training
        let (wf, bf) = gate(g, 1.0);
        let (wo, bo) = gate(g, 0.0);
        let (wg, bg) = gate(g, 0.0);
        let h0 = g.param(vec![0.0; state_size], 1, state_size);
        let c0 = g.param(vec![0.0; state_size], 1, state_size);
        LstmCell { input_size, state_size, wi, bi, wf, bf, wo, bo, wg, bg, h0, c0 }
    }
}

impl RecurrentCell for LstmCell {
    fn kind(&self) -> CellKind { CellKind::Lstm }
    fn input_size(&self) -> usize { self.input_size }
    fn state_size(&self) -> usize { self.state_size }

    fn initial_state(&self, lanes: usize, g: &mut Graph) -> CellState {
        let h = g.expand_rows(self.h0, lanes);
        let c = g.expand_rows(self.c0, lanes);
        CellState { h, c: Some(c) }
    }

    fn step(&self, x: TID, prev: &CellState, g: &mut Graph) -> CellState {
        let c_prev = match prev.c {
            Some(c) => c,
            None => g.constant(vec![0.0; g.rows(prev.h) * self.state_size], g.rows(prev.h), self.state_size),
        };
        let xh = g.concat_cols(x, prev.h);
        let gate = |w: TID, b: TID, g: &mut Graph| {
            let mm = g.matmul(xh, w);
            g.broadcast_add(mm, b)
        };
        let i_pre = gate(self.wi, self.bi, g);
        let f_pre = gate(self.wf, self.bf, g);
        let o_pre = gate(self.wo, self.bo, g);
        let g_pre = gate(self.wg, self.bg, g);
        let i = g.sigmoid(i_pre);
        let f = g.sigmoid(f_pre);
        let o = g.sigmoid(o_pre);
        let cand = g.tanh_op(g_pre);

        // c = f * c_prev + i * cand;  h = o * tanh(c)
        let kept = g.mul(f, c_prev);
        let written = g.mul(i, cand);
        let c = g.add(kept, written);
        let c_act = g.tanh_op(c);
        let h = g.mul(o, c_act);
        CellState { h, c: Some(c) }
    }

    fn param_ids(&self) -> Vec<TID> {
        vec![self.wi, self.bi, self.wf, self.bf, self.wo, self.bo, self.wg, self.bg, self.h0, self.c0]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ops::rand_normal;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn setup(lanes: usize) -> (Graph, GruCell, TID, TID) {
        let mut rng = StdRng::seed_from_u64(42);
        let mut g = Graph::new();
        let cell = GruCell::new(6, 5, &mut g, &mut rng);
        g.freeze_params();
        let x = g.constant(rand_normal(lanes * 6, 1.5, &mut rng), lanes, 6);
        let h = g.constant(rand_normal(lanes * 5, 0.8, &mut rng), lanes, 5);
        (g, cell, x, h)
    }

    #[test]
    fn gru_step_is_deterministic() {
        let (mut g, cell, x, h) = setup(3);
        let a = cell.step_traced(x, h, &mut g);
        let b = cell.step_traced(x, h, &mut g);
        assert_eq!(g.data(a.h), g.data(b.h));
        assert_eq!((g.rows(a.h), g.cols(a.h)), (3, 5));
    }

    #[test]
    fn gru_gates_are_strictly_between_zero_and_one() {
        let (mut g, cell, x, h) = setup(4);
        let s = cell.step_traced(x, h, &mut g);
        for &v in g.data(s.reset).iter().chain(g.data(s.update)) {
            assert!(v > 0.0 && v < 1.0, "gate {v}");
        }
        for &v in g.data(s.candidate) {
            assert!(v > -1.0 && v < 1.0);
        }
    }

    #[test]
    fn gru_next_state_is_convex_combination() {
        let (mut g, cell, x, h) = setup(4);
        let s = cell.step_traced(x, h, &mut g);
        let prev = g.data(h);
        let cand = g.data(s.candidate);
        for (j, &v) in g.data(s.h).iter().enumerate() {
            let lo = prev[j].min(cand[j]) - 1e-6;
            let hi = prev[j].max(cand[j]) + 1e-6;
            assert!(v >= lo && v <= hi, "h[{j}]={v} outside [{lo}, {hi}]");
        }
    }

    #[test]
    fn initial_state_is_shared_across_lanes() {
        let mut rng = StdRng::seed_from_u64(1);
        let mut g = Graph::new();
        let cell = GruCell::new(2, 3, &mut g, &mut rng);
        g.data_mut(cell.h0).copy_from_slice(&[0.1, 0.2, 0.3]);
        g.freeze_params();
        let s = cell.initial_state(2, &mut g);
        assert_eq!(g.data(s.h), &[0.1, 0.2, 0.3, 0.1, 0.2, 0.3]);
        assert!(s.c.is_none());
    }

    #[test]
    fn lstm_state_shapes_and_bounds() {
        let mut rng = StdRng::seed_from_u64(8);
        let mut g = Graph::new();
        let cell = LstmCell::new(4, 6, &mut g, &mut rng);
        g.freeze_params();
        let mut state = cell.initial_state(3, &mut g);
        for _ in 0..5 {
            let x = g.constant(rand_normal(12, 1.0, &mut rng), 3, 4);
            state = cell.step(x, &state, &mut g);
        }
        let c = state.c.expect("lstm keeps a cell state");
        assert_eq!((g.rows(state.h), g.cols(state.h)), (3, 6));
        assert_eq!(g.data(c).len(), 18);
        assert!(g.data(state.h).iter().all(|v| v.abs() < 1.0));
        assert_eq!(cell.param_ids().len(), 10);
    }
}
