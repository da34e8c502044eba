//! Dense symmetric positive-definite helpers behind the quasi-Newton
//! and trust-region model matrices: a Cholesky factorization with a
//! solver, and a symmetric eigensolver feeding the condition-number
//! clamp.

use ndarray::{Array1, Array2};

/// Cholesky factorization `A = L Lᵀ` of a symmetric positive-definite
/// matrix, held as its lower-triangular factor.
pub(crate) struct SpdFactor {
    l: Array2<f64>,
}

impl SpdFactor {
    /// Factor a matrix column by column, eliminating the contribution
    /// of each finished column from the ones that follow. Returns
    /// `None` when a pivot is not strictly positive, the signal that
    /// the matrix has lost positive definiteness and the caller's
    /// model needs a reset.
    pub(crate) fn new(a: &Array2<f64>) -> Option<Self> {
        let n = a.nrows();
        if a.ncols() != n {
            return None;
        }
        let mut l = a.clone();
        for col in 0..n {
            for done in 0..col {
                let weight = l[[col, done]];
                for row in col..n {
                    let update = weight * l[[row, done]];
                    l[[row, col]] -= update;
                }
            }
            let pivot = l[[col, col]];
            if !(pivot > 0.0) || !pivot.is_finite() {
                return None;
            }
            let scale = pivot.sqrt().recip();
            for row in col..n {
                l[[row, col]] *= scale;
            }
        }
        Some(Self { l })
    }

    /// The factor of the identity, for callers that just reset their
    /// model to it.
    pub(crate) fn identity(n: usize) -> Self {
        Self {
            l: Array2::<f64>::eye(n),
        }
    }

    /// Solve `A x = b` through the factor: forward substitution on
    /// `L`, then back substitution on `Lᵀ`.
    pub(crate) fn solve(&self, b: &Array1<f64>) -> Array1<f64> {
        let n = self.l.nrows();
        let mut x = b.clone();
        for row in 0..n {
            for col in 0..row {
                let known = x[col];
                x[row] -= self.l[[row, col]] * known;
            }
            x[row] /= self.l[[row, row]];
        }
        for row in (0..n).rev() {
            for col in (row + 1)..n {
                let known = x[col];
                x[row] -= self.l[[col, row]] * known;
            }
            x[row] /= self.l[[row, row]];
        }
        x
    }
}

/// `lambda * I_n`.
pub(crate) fn scaled_identity(n: usize, lambda: f64) -> Array2<f64> {
    Array2::<f64>::eye(n) * lambda
}

/// Replace a matrix with the average of itself and its transpose.
pub(crate) fn symmetrize(m: &mut Array2<f64>) {
    let averaged = (&*m + &m.t()) / 2.0;
    *m = averaged;
}

/// Eigenvalues of a symmetric matrix, sorted ascending: Householder
/// reduction to tridiagonal form followed by implicit QR iteration
/// with Wilkinson shifts. Returns `None` when the iteration fails to
/// converge.
pub(crate) fn symmetric_eigenvalues(a: &Array2<f64>) -> Option<Array1<f64>> {
    let n = a.nrows();
    if n == 0 || a.ncols() != n {
        return None;
    }
    let (mut diag, mut off) = tridiagonalize(a);
    if !tridiagonal_eigenvalues(&mut diag, &mut off, 30 * n) {
        return None;
    }
    diag.sort_by(|x, y| x.partial_cmp(y).unwrap_or(std::cmp::Ordering::Equal));
    Some(Array1::from_vec(diag))
}

/// Shift the diagonal of a symmetric positive-definite matrix so its
/// condition number does not exceed `max_cond`. Returns the shift that
/// was applied, if any.
pub(crate) fn clamp_condition(b: &mut Array2<f64>, max_cond: f64) -> Option<f64> {
    let eigenvalues = symmetric_eigenvalues(b)?;
    let n = eigenvalues.len();
    let lambda_min = eigenvalues[0];
    let lambda_max = eigenvalues[n - 1];
    if lambda_min <= 0.0 || !lambda_max.is_finite() {
        return None;
    }
    if lambda_max <= max_cond * lambda_min {
        return None;
    }
    // With shift s the extremes become (λ_max + s)/(λ_min + s); this
    // choice of s makes that ratio exactly max_cond.
    let shift = (lambda_max - max_cond * lambda_min) / (max_cond - 1.0);
    if !shift.is_finite() || shift <= 0.0 {
        return None;
    }
    for i in 0..n {
        b[[i, i]] += shift;
    }
    Some(shift)
}

// Householder similarity reduction of a real symmetric matrix to
// tridiagonal form. Returns the diagonal and the sub-diagonal; the
// input is read, not modified.
fn tridiagonalize(a: &Array2<f64>) -> (Vec<f64>, Vec<f64>) {
    let n = a.nrows();
    let mut w = a.clone();
    let mut off = vec![0.0; n.saturating_sub(1)];
    let mut v = vec![0.0; n];

    for k in 0..n.saturating_sub(2) {
        let mut norm_sq = 0.0;
        for i in (k + 1)..n {
            norm_sq += w[[i, k]] * w[[i, k]];
        }
        if norm_sq <= f64::EPSILON * f64::EPSILON {
            off[k] = 0.0;
            continue;
        }
        let pivot = w[[k + 1, k]];
        let sigma = if pivot < 0.0 {
            -norm_sq.sqrt()
        } else {
            norm_sq.sqrt()
        };

        // Reflector over rows k+1..n; the leading entry absorbs the
        // shifted pivot.
        v[k + 1] = pivot + sigma;
        for i in (k + 2)..n {
            v[i] = w[[i, k]];
        }
        let mut v_norm_sq = 0.0;
        for i in (k + 1)..n {
            v_norm_sq += v[i] * v[i];
        }
        let tau = 2.0 / v_norm_sq;

        // Rank-2 update of the trailing block,
        // W <- W - v qᵀ - q vᵀ with q = τWv - (τ/2)(vᵀ·τWv) v.
        let mut q = vec![0.0; n];
        for i in (k + 1)..n {
            let mut dot = 0.0;
            for j in (k + 1)..n {
                dot += w[[i, j]] * v[j];
            }
            q[i] = tau * dot;
        }
        let mut vq = 0.0;
        for i in (k + 1)..n {
            vq += v[i] * q[i];
        }
        let correction = 0.5 * tau * vq;
        for i in (k + 1)..n {
            q[i] -= correction * v[i];
        }
        for i in (k + 1)..n {
            for j in (k + 1)..n {
                let update = v[i] * q[j] + q[i] * v[j];
                w[[i, j]] -= update;
            }
        }
        off[k] = -sigma;
    }

    let diag = (0..n).map(|i| w[[i, i]]).collect();
    if n >= 2 {
        off[n - 2] = w[[n - 1, n - 2]];
    }
    (diag, off)
}

// Implicit QR iteration with Wilkinson shifts on a symmetric
// tridiagonal matrix, eigenvalues only. Deflates converged tail
// entries and sweeps Givens rotations through the unreduced block.
// Returns false when the sweep budget runs out.
fn tridiagonal_eigenvalues(diag: &mut [f64], off: &mut [f64], max_sweeps: usize) -> bool {
    let n = diag.len();
    if n <= 1 {
        return true;
    }
    let mut sweeps = 0;
    let mut hi = n - 1;
    while hi > 0 {
        let mut lo = hi;
        while lo > 0 {
            let threshold = f64::EPSILON * (diag[lo - 1].abs() + diag[lo].abs());
            if off[lo - 1].abs() <= threshold {
                off[lo - 1] = 0.0;
                break;
            }
            lo -= 1;
        }
        if lo == hi {
            hi -= 1;
            continue;
        }
        sweeps += 1;
        if sweeps > max_sweeps {
            return false;
        }

        // Wilkinson shift from the trailing 2x2 block.
        let d = 0.5 * (diag[hi - 1] - diag[hi]);
        let e = off[hi - 1];
        let r = (d * d + e * e).sqrt();
        let shift = diag[hi] - e * e / (d + if d >= 0.0 { r } else { -r });

        let mut x = diag[lo] - shift;
        let mut z = off[lo];
        for k in lo..hi {
            let (c, s) = givens(x, z);
            if k > lo {
                off[k - 1] = c * x + s * z;
            }
            let d_k = diag[k];
            let d_k1 = diag[k + 1];
            let e_k = off[k];
            diag[k] = c * c * d_k + 2.0 * c * s * e_k + s * s * d_k1;
            diag[k + 1] = s * s * d_k - 2.0 * c * s * e_k + c * c * d_k1;
            off[k] = c * s * (d_k1 - d_k) + (c * c - s * s) * e_k;
            if k + 1 < hi {
                // The rotation leaks a bulge one entry further down.
                let e_next = off[k + 1];
                x = off[k];
                z = s * e_next;
                off[k + 1] = c * e_next;
            }
        }
    }
    true
}

// Givens rotation (c, s) with [c, s; -s, c] · [a; b] = [r; 0].
fn givens(a: f64, b: f64) -> (f64, f64) {
    if b == 0.0 {
        (1.0, 0.0)
    } else if b.abs() > a.abs() {
        let t = a / b;
        let s = 1.0 / (1.0 + t * t).sqrt();
        (s * t, s)
    } else {
        let t = b / a;
        let c = 1.0 / (1.0 + t * t).sqrt();
        (c, c * t)
    }
}
