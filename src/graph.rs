// ============================================================================
// VECTORIZED TENSOR AUTODIFF ENGINE
// Each node = dense row-major matrix. No per-scalar nodes.
// ============================================================================
//
// Parameters are registered first and fenced off with `freeze_params`.
// Everything recorded after the fence is scratch: `reset` truncates it,
// so each training step records a fresh tape on top of the same weights.

use crate::ops::{dot, gemm, sigmoid, softplus, vec_add, vec_add_inplace, vec_axpy, vec_mul, vec_sigmoid, vec_tanh};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct TID(usize);

#[derive(Clone, Debug)]
enum TensorOp {
    None,
    MatMul { a: TID, b: TID, m: usize, k: usize, n: usize },
    Add { a: TID, b: TID },
    Mul { a: TID, b: TID },
    Sigmoid { a: TID },
    Tanh { a: TID },
    OneMinus { a: TID },
    BroadcastAdd { a: TID, bias: TID, rows: usize, cols: usize },
    ExpandRows { a: TID, rows: usize, cols: usize },
    ConcatCols { a: TID, b: TID, rows: usize, ca: usize, cb: usize },
    GatherRows { table: TID, ids: Vec<usize>, cols: usize },
    SampledLogistic(Box<SampledTerms>),
}

/// Cached per-term derivatives of the fused sampled loss.
/// `d_true[b]` is dL/ds for lane b's target logit, `d_cand[b * K + k]` for
/// candidate k (zero where the candidate is the lane's own target).
#[derive(Clone, Debug)]
struct SampledTerms {
    repr: TID,
    weights: TID,
    bias: TID,
    targets: Vec<usize>,
    candidates: Vec<usize>,
    d_true: Vec<f32>,
    d_cand: Vec<f32>,
}

#[derive(Clone)]
struct TensorNode {
    data: Vec<f32>,
    grad: Vec<f32>,
    rows: usize,
    cols: usize,
    op: TensorOp,
}

#[derive(Clone)]
pub struct Graph {
    nodes: Vec<TensorNode>,
    param_boundary: usize,
}

impl Default for Graph {
    fn default() -> Self { Self::new() }
}

impl Graph {
    pub fn new() -> Self {
        Graph { nodes: Vec::with_capacity(4096), param_boundary: 0 }
    }

    fn push(&mut self, data: Vec<f32>, rows: usize, cols: usize, op: TensorOp) -> TID {
        debug_assert_eq!(data.len(), rows * cols);
        let len = data.len();
        let id = self.nodes.len();
        self.nodes.push(TensorNode { data, grad: vec![0.0; len], rows, cols, op });
        TID(id)
    }

    pub fn param(&mut self, data: Vec<f32>, rows: usize, cols: usize) -> TID {
        debug_assert!(self.param_boundary == 0, "params must be registered before freeze_params");
        self.push(data, rows, cols, TensorOp::None)
    }

    pub fn constant(&mut self, data: Vec<f32>, rows: usize, cols: usize) -> TID {
        self.push(data, rows, cols, TensorOp::None)
    }

    pub fn freeze_params(&mut self) { self.param_boundary = self.nodes.len(); }

    pub fn reset(&mut self) { self.nodes.truncate(self.param_boundary); }

    pub fn zero_grad(&mut self) {
        for node in self.nodes.iter_mut() { node.grad.fill(0.0); }
    }

    /// Copy of the parameter nodes only, with zeroed gradients.
    pub fn snapshot(&self) -> Graph {
        let nodes = self.nodes[..self.param_boundary].iter().map(|n| TensorNode {
            data: n.data.clone(), grad: vec![0.0; n.data.len()],
            rows: n.rows, cols: n.cols, op: TensorOp::None,
        }).collect();
        Graph { nodes, param_boundary: self.param_boundary }
    }

    pub fn len(&self) -> usize { self.nodes.len() }
    pub fn is_empty(&self) -> bool { self.nodes.is_empty() }

    pub fn data(&self, t: TID) -> &[f32] { &self.nodes[t.0].data }
    pub fn data_mut(&mut self, t: TID) -> &mut [f32] { &mut self.nodes[t.0].data }
    pub fn grad(&self, t: TID) -> &[f32] { &self.nodes[t.0].grad }
    pub fn grad_mut(&mut self, t: TID) -> &mut [f32] { &mut self.nodes[t.0].grad }
    pub fn rows(&self, t: TID) -> usize { self.nodes[t.0].rows }
    pub fn cols(&self, t: TID) -> usize { self.nodes[t.0].cols }

    /// Parameter and gradient of one node, borrowed together for in-place updates.
    pub fn data_and_grad(&mut self, t: TID) -> (&mut [f32], &[f32]) {
        let node = &mut self.nodes[t.0];
        (node.data.as_mut_slice(), node.grad.as_slice())
    }

    // ------------------------------------------------------------------
    // Forward ops: each builds one TensorNode
    // ------------------------------------------------------------------

    pub fn matmul(&mut self, a: TID, b: TID) -> TID {
        let m = self.nodes[a.0].rows;
        let k = self.nodes[a.0].cols;
        let n = self.nodes[b.0].cols;
        debug_assert_eq!(k, self.nodes[b.0].rows, "matmul shape [{},{}] @ [{},{}]",
            m, k, self.nodes[b.0].rows, n);

        let mut out = vec![0.0f32; m * n];
        gemm(m, k, n,
            &self.nodes[a.0].data, (k, 1),
            &self.nodes[b.0].data, (n, 1),
            0.0, &mut out);
        self.push(out, m, n, TensorOp::MatMul { a, b, m, k, n })
    }

    pub fn add(&mut self, a: TID, b: TID) -> TID {
        let data = vec_add(&self.nodes[a.0].data, &self.nodes[b.0].data);
        let (r, c) = (self.nodes[a.0].rows, self.nodes[a.0].cols);
        self.push(data, r, c, TensorOp::Add { a, b })
    }

    pub fn mul(&mut self, a: TID, b: TID) -> TID {
        let data = vec_mul(&self.nodes[a.0].data, &self.nodes[b.0].data);
        let (r, c) = (self.nodes[a.0].rows, self.nodes[a.0].cols);
        self.push(data, r, c, TensorOp::Mul { a, b })
    }

    pub fn sigmoid(&mut self, a: TID) -> TID {
        let data = vec_sigmoid(&self.nodes[a.0].data);
        let (r, c) = (self.nodes[a.0].rows, self.nodes[a.0].cols);
        self.push(data, r, c, TensorOp::Sigmoid { a })
    }

    pub fn tanh_op(&mut self, a: TID) -> TID {
        let data = vec_tanh(&self.nodes[a.0].data);
        let (r, c) = (self.nodes[a.0].rows, self.nodes[a.0].cols);
        self.push(data, r, c, TensorOp::Tanh { a })
    }

    pub fn one_minus(&mut self, a: TID) -> TID {
        let data: Vec<f32> = self.nodes[a.0].data.iter().map(|x| 1.0 - x).collect();
        let (r, c) = (self.nodes[a.0].rows, self.nodes[a.0].cols);
        self.push(data, r, c, TensorOp::OneMinus { a })
    }

    /// [m,n] + [1,n] broadcast bias add
    pub fn broadcast_add(&mut self, a: TID, bias: TID) -> TID {
        let rows = self.nodes[a.0].rows;
        let cols = self.nodes[a.0].cols;
        debug_assert_eq!(self.nodes[bias.0].data.len(), cols);
        let mut out = self.nodes[a.0].data.clone();
        let bd = &self.nodes[bias.0].data;
        for row in out.chunks_exact_mut(cols) { vec_add_inplace(row, bd); }
        self.push(out, rows, cols, TensorOp::BroadcastAdd { a, bias, rows, cols })
    }

    /// Repeat a [1,n] row into [rows,n]
    pub fn expand_rows(&mut self, a: TID, rows: usize) -> TID {
        debug_assert_eq!(self.nodes[a.0].rows, 1);
        let cols = self.nodes[a.0].cols;
        let src = &self.nodes[a.0].data;
        let mut out = Vec::with_capacity(rows * cols);
        for _ in 0..rows { out.extend_from_slice(src); }
        self.push(out, rows, cols, TensorOp::ExpandRows { a, rows, cols })
    }

    /// [m,p] | [m,q] -> [m,p+q]
    pub fn concat_cols(&mut self, a: TID, b: TID) -> TID {
        let rows = self.nodes[a.0].rows;
        debug_assert_eq!(rows, self.nodes[b.0].rows);
        let ca = self.nodes[a.0].cols;
        let cb = self.nodes[b.0].cols;
        let ad = &self.nodes[a.0].data;
        let bd = &self.nodes[b.0].data;
        let mut out = Vec::with_capacity(rows * (ca + cb));
        for i in 0..rows {
            out.extend_from_slice(&ad[i * ca..(i + 1) * ca]);
            out.extend_from_slice(&bd[i * cb..(i + 1) * cb]);
        }
        self.push(out, rows, ca + cb, TensorOp::ConcatCols { a, b, rows, ca, cb })
    }

    /// Embedding lookup: row `ids[i]` of `table` becomes row `i` of the output.
    pub fn gather_rows(&mut self, table: TID, ids: &[usize]) -> TID {
        let cols = self.nodes[table.0].cols;
        let td = &self.nodes[table.0].data;
        let mut out = Vec::with_capacity(ids.len() * cols);
        for &id in ids {
            debug_assert!(id < self.nodes[table.0].rows, "row {} out of range", id);
            out.extend_from_slice(&td[id * cols..(id + 1) * cols]);
        }
        self.push(out, ids.len(), cols, TensorOp::GatherRows { table, ids: ids.to_vec(), cols })
    }

    /// Fused noise-contrastive loss, averaged over lanes -> [1,1].
    ///
    /// `repr` is [B,H], `weights` is [V,H], `bias` is [1,V]. Each lane scores
    /// its own target against the shared `candidates`; logits are shifted by
    /// the log expected counts of the sampler (`log_q_true` per lane,
    /// `log_q_cand` per candidate). A candidate equal to the lane's target
    /// is skipped for that lane.
    #[allow(clippy::too_many_arguments)]
    pub fn sampled_logistic(
        &mut self, repr: TID, weights: TID, bias: TID,
        targets: &[usize], candidates: &[usize],
        log_q_true: &[f32], log_q_cand: &[f32],
    ) -> TID {
        let lanes = self.nodes[repr.0].rows;
        let dim = self.nodes[repr.0].cols;
        debug_assert_eq!(targets.len(), lanes);
        debug_assert_eq!(self.nodes[weights.0].cols, dim);
        debug_assert_eq!(candidates.len(), log_q_cand.len());
        let k = candidates.len();
        let rd = &self.nodes[repr.0].data;
        let wd = &self.nodes[weights.0].data;
        let bd = &self.nodes[bias.0].data;
        let logit = |b: usize, id: usize| dot(&rd[b * dim..(b + 1) * dim], &wd[id * dim..(id + 1) * dim]) + bd[id];

        let mut total = 0.0f32;
        let mut d_true = vec![0.0f32; lanes];
        let mut d_cand = vec![0.0f32; lanes * k];
        for b in 0..lanes {
            let t = targets[b];
            let s = logit(b, t) - log_q_true[b];
            total += softplus(-s);
            d_true[b] = sigmoid(s) - 1.0;
            for (j, &c) in candidates.iter().enumerate() {
                if c == t { continue; }
                let s = logit(b, c) - log_q_cand[j];
                total += softplus(s);
                d_cand[b * k + j] = sigmoid(s);
            }
        }
        let loss = total / lanes.max(1) as f32;
        let terms = SampledTerms {
            repr, weights, bias,
            targets: targets.to_vec(), candidates: candidates.to_vec(),
            d_true, d_cand,
        };
        self.push(vec![loss], 1, 1, TensorOp::SampledLogistic(Box::new(terms)))
    }

    // ------------------------------------------------------------------
    // Backward: vectorized gradient propagation
    // ------------------------------------------------------------------

    pub fn backward(&mut self, loss: TID) {
        self.nodes[loss.0].grad.fill(1.0);
        let n = self.nodes.len();

        for i in (0..n).rev() {
            let has_grad = self.nodes[i].grad.iter().any(|&g| g != 0.0);
            if !has_grad { continue; }

            let op = self.nodes[i].op.clone();
            match op {
                TensorOp::None => {}

                TensorOp::MatMul { a, b, m, k, n: nn } => {
                    let og = self.nodes[i].grad.clone();
                    // dA = dOut @ B^T
                    {
                        let mut da_buf = vec![0.0f32; m * k];
                        gemm(m, nn, k, &og, (nn, 1), &self.nodes[b.0].data, (1, nn), 0.0, &mut da_buf);
                        vec_add_inplace(&mut self.nodes[a.0].grad, &da_buf);
                    }
                    // dB = A^T @ dOut
                    {
                        let mut db_buf = vec![0.0f32; k * nn];
                        gemm(k, m, nn, &self.nodes[a.0].data, (1, k), &og, (nn, 1), 0.0, &mut db_buf);
                        vec_add_inplace(&mut self.nodes[b.0].grad, &db_buf);
                    }
                }

                TensorOp::Add { a, b } => {
                    let g = self.nodes[i].grad.clone();
                    vec_add_inplace(&mut self.nodes[a.0].grad, &g);
                    vec_add_inplace(&mut self.nodes[b.0].grad, &g);
                }

                TensorOp::Mul { a, b } => {
                    let g = self.nodes[i].grad.clone();
                    let a_d = self.nodes[a.0].data.clone();
                    let b_d = self.nodes[b.0].data.clone();
                    for j in 0..g.len() {
                        self.nodes[a.0].grad[j] += g[j] * b_d[j];
                        self.nodes[b.0].grad[j] += g[j] * a_d[j];
                    }
                }

                TensorOp::Sigmoid { a } => {
                    let g = self.nodes[i].grad.clone();
                    let od = self.nodes[i].data.clone();
                    for j in 0..g.len() {
                        let s = od[j];
                        self.nodes[a.0].grad[j] += g[j] * s * (1.0 - s);
                    }
                }

                TensorOp::Tanh { a } => {
                    let g = self.nodes[i].grad.clone();
                    let od = self.nodes[i].data.clone();
                    for j in 0..g.len() {
                        let t = od[j];
                        self.nodes[a.0].grad[j] += g[j] * (1.0 - t * t);
                    }
                }

                TensorOp::OneMinus { a } => {
                    let g = self.nodes[i].grad.clone();
                    for j in 0..g.len() { self.nodes[a.0].grad[j] -= g[j]; }
                }

                TensorOp::BroadcastAdd { a, bias, rows: rr, cols: cc } => {
                    let g = self.nodes[i].grad.clone();
                    vec_add_inplace(&mut self.nodes[a.0].grad, &g);
                    for ii in 0..rr {
                        let off = ii * cc;
                        vec_add_inplace(&mut self.nodes[bias.0].grad, &g[off..off + cc]);
                    }
                }

                TensorOp::ExpandRows { a, rows: rr, cols: cc } => {
                    let g = self.nodes[i].grad.clone();
                    for ii in 0..rr {
                        let off = ii * cc;
                        vec_add_inplace(&mut self.nodes[a.0].grad, &g[off..off + cc]);
                    }
                }

                TensorOp::ConcatCols { a, b, rows: rr, ca, cb } => {
                    let g = self.nodes[i].grad.clone();
                    let w = ca + cb;
                    for ii in 0..rr {
                        let off = ii * w;
                        vec_add_inplace(&mut self.nodes[a.0].grad[ii * ca..(ii + 1) * ca], &g[off..off + ca]);
                        vec_add_inplace(&mut self.nodes[b.0].grad[ii * cb..(ii + 1) * cb], &g[off + ca..off + w]);
                    }
                }

                TensorOp::GatherRows { table, ids, cols: cc } => {
                    let g = self.nodes[i].grad.clone();
                    let tg = &mut self.nodes[table.0].grad;
                    for (r, &id) in ids.iter().enumerate() {
                        vec_add_inplace(&mut tg[id * cc..(id + 1) * cc], &g[r * cc..(r + 1) * cc]);
                    }
                }

                TensorOp::SampledLogistic(terms) => {
                    let gv = self.nodes[i].grad[0];
                    self.sampled_backward(gv, &terms);
                }
            }
        }
    }

    fn sampled_backward(&mut self, gv: f32, t: &SampledTerms) {
        let lanes = self.nodes[t.repr.0].rows;
        let dim = self.nodes[t.repr.0].cols;
        let k = t.candidates.len();
        let scale = gv / lanes.max(1) as f32;

        // Every (lane, vocab id, dL/ds) triple that contributed to the loss.
        let mut terms = Vec::with_capacity(lanes * (k + 1));
        for b in 0..lanes {
            terms.push((b, t.targets[b], t.d_true[b] * scale));
            for (j, &c) in t.candidates.iter().enumerate() {
                let d = t.d_cand[b * k + j];
                if d != 0.0 { terms.push((b, c, d * scale)); }
            }
        }

        let mut d_repr = vec![0.0f32; lanes * dim];
        {
            let wd = &self.nodes[t.weights.0].data;
            for &(b, id, d) in &terms {
                vec_axpy(&mut d_repr[b * dim..(b + 1) * dim], d, &wd[id * dim..(id + 1) * dim]);
            }
        }
        let rd = self.nodes[t.repr.0].data.clone();
        {
            let wg = &mut self.nodes[t.weights.0].grad;
            for &(b, id, d) in &terms {
                vec_axpy(&mut wg[id * dim..(id + 1) * dim], d, &rd[b * dim..(b + 1) * dim]);
            }
        }
        {
            let bg = &mut self.nodes[t.bias.0].grad;
            for &(_, id, d) in &terms { bg[id] += d; }
        }
        vec_add_inplace(&mut self.nodes[t.repr.0].grad, &d_repr);
    }
}
