// ============================================================================
// PARAMETER COLLECTION + MOMENTUM SGD
// ============================================================================

use crate::graph::{Graph, TID};

/// Parameters the optimizer updates, with one velocity buffer each.
pub struct ParamSet {
    ids: Vec<TID>,
    velocity: Vec<Vec<f32>>,
}

impl ParamSet {
    pub fn new(ids: Vec<TID>, g: &Graph) -> Self {
        let velocity = ids.iter().map(|&t| vec![0.0; g.data(t).len()]).collect();
        ParamSet { ids, velocity }
    }

    pub fn ids(&self) -> &[TID] { &self.ids }

    pub fn flat_velocity(&self) -> Vec<f32> {
        self.velocity.iter().flatten().copied().collect()
    }

    /// Restores velocity written by [`ParamSet::flat_velocity`]. Returns
    /// false (leaving buffers untouched) when the length does not match.
    pub fn load_flat_velocity(&mut self, flat: &[f32]) -> bool {
        let total: usize = self.velocity.iter().map(Vec::len).sum();
        if flat.len() != total { return false; }
        let mut off = 0;
        for v in self.velocity.iter_mut() {
            let len = v.len();
            v.copy_from_slice(&flat[off..off + len]);
            off += len;
        }
        true
    }
}

/// Classical momentum: `v = mu * v + grad; theta -= lr * v`.
/// Fixed rate and coefficient for the whole run.
pub struct Momentum {
    pub lr: f32,
    pub momentum: f32,
    pub t: usize,
}

impl Momentum {
    pub fn new(lr: f32, momentum: f32) -> Self {
        Momentum { lr, momentum, t: 0 }
    }

    pub fn step(&mut self, g: &mut Graph, ps: &mut ParamSet) {
        self.t += 1;
        for (idx, &tid) in ps.ids.iter().enumerate() {
            let (data, grad) = g.data_and_grad(tid);
            let vel = &mut ps.velocity[idx];
            for j in 0..data.len() {
                vel[j] = self.momentum * vel[j] + grad[j];
                data[j] -= self.lr * vel[j];
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn momentum_accumulates_velocity() {
        let mut g = Graph::new();
        let w = g.param(vec![1.0, -1.0], 1, 2);
        g.freeze_params();
        let mut ps = ParamSet::new(vec![w], &g);
        let mut opt = Momentum::new(0.1, 0.5);

        // grad = 1: v1 = 1, w -= 0.1; v2 = 0.5 + 1 = 1.5, w -= 0.15
        for expected in [[0.9f32, -1.1], [0.75, -1.25]] {
            g.zero_grad();
            g.grad_mut(w).fill(1.0);
            opt.step(&mut g, &mut ps);
            let d = g.data(w);
            assert!((d[0] - expected[0]).abs() < 1e-6 && (d[1] - expected[1]).abs() < 1e-6, "{d:?}");
        }
        assert_eq!(opt.t, 2);
        assert_eq!(ps.flat_velocity(), vec![1.5, 1.5]);
    }

    #[test]
    fn velocity_round_trip_checks_length() {
        let mut g = Graph::new();
        let a = g.param(vec![0.0; 3], 1, 3);
        let b = g.param(vec![0.0; 2], 1, 2);
        g.freeze_params();
        let mut ps = ParamSet::new(vec![a, b], &g);
        assert!(ps.load_flat_velocity(&[1.0, 2.0, 3.0, 4.0, 5.0]));
        assert_eq!(ps.flat_velocity(), vec![1.0, 2.0, 3.0, 4.0, 5.0]);
        assert!(!ps.load_flat_velocity(&[1.0]));
    }
}
