//! Quadratic programs over the probability simplex.
//!
//! Every strand solve ends up as a small dense problem of the form:
//!
//! ```text
//! minimize   xᵀ Q x − 2 bᵀ x + c
//! subject to Σ x_i = 1,  x_i ≥ 0
//! ```
//!
//! with `Q` symmetric positive semi-definite. The dimension is the number of
//! candidate guides (a handful to a few dozen), so a dense primal active-set
//! method is both exact and cheap.
//!
//! Implementation choices:
//! - The working set only ever holds bound constraints `x_i = 0`; the equality
//!   constraint is always active. Each face subproblem eliminates it with an
//!   orthonormal basis `Z` of `{v : Σ v_i = 0}`, so iterates sum to one up to
//!   round-off whatever the magnitude of `Q`.
//! - The reduced Hessian `Zᵀ Q_FF Z` is solved by SVD. Its reciprocal condition
//!   number is measured against the size of `Q_FF` itself, so rescaling the
//!   problem never changes the verdict. Ill-conditioned faces are reported as
//!   [`QpError::Singular`] rather than silently returning a pseudo-inverse
//!   answer, so callers can decide to regularize.

use nalgebra::{DMatrix, DVector};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum QpError {
    #[error("problem has no variables")]
    Empty,
    #[error("face system is singular (reciprocal condition {rcond:.3e})")]
    Singular { rcond: f64 },
    #[error("active set did not converge within {iterations} iterations")]
    Diverged { iterations: usize },
    #[error("non-finite value in problem data or iterate")]
    NonFinite,
    #[error("dimension mismatch: quadratic {quadratic}, linear {linear}, start {start}")]
    Dimension {
        quadratic: usize,
        linear: usize,
        start: usize,
    },
}

/// `xᵀ Q x − 2 bᵀ x + c` restricted to the simplex.
#[derive(Debug, Clone, PartialEq)]
pub struct SimplexQp {
    pub quadratic: DMatrix<f64>,
    pub linear: DVector<f64>,
    pub constant: f64,
}

impl SimplexQp {
    pub fn dim(&self) -> usize {
        self.linear.len()
    }

    pub fn objective(&self, x: &DVector<f64>) -> f64 {
        (&self.quadratic * x).dot(x) - 2.0 * self.linear.dot(x) + self.constant
    }

    /// `∇ = 2 Q x − 2 b`.
    pub fn gradient(&self, x: &DVector<f64>) -> DVector<f64> {
        (&self.quadratic * x - &self.linear) * 2.0
    }

    /// Copy of the problem with `shift` added to the diagonal of `Q`.
    pub fn regularized(&self, shift: f64) -> SimplexQp {
        let mut out = self.clone();
        for i in 0..out.dim() {
            out.quadratic[(i, i)] += shift;
        }
        out
    }

    /// The uniform point `1/n`, always feasible.
    pub fn uniform_start(&self) -> DVector<f64> {
        let n = self.dim();
        DVector::from_element(n, 1.0 / n.max(1) as f64)
    }
}

/// Result of a successful solve.
#[derive(Debug, Clone, PartialEq)]
pub struct QpSolution {
    pub x: DVector<f64>,
    pub objective: f64,
    pub iterations: usize,
}

/// Anything that can minimize a [`SimplexQp`].
pub trait QpSolver: Sync {
    /// Minimize starting from the feasible point `x0`.
    fn solve(&self, problem: &SimplexQp, x0: &DVector<f64>) -> Result<QpSolution, QpError>;
}

/// Primal active-set method for [`SimplexQp`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ActiveSetSolver {
    pub max_iterations: usize,
    pub tolerance: f64,
    pub singular_tolerance: f64,
}

impl Default for ActiveSetSolver {
    fn default() -> Self {
        Self {
            max_iterations: 500,
            tolerance: 1e-10,
            singular_tolerance: 1e-13,
        }
    }
}

impl ActiveSetSolver {
    /// Minimize over the face of the simplex spanned by `free`.
    ///
    /// Returns the minimizer on the free coordinates and the multiplier `ν` of
    /// the equality constraint (`Q_FF x_F + ν 1 = b_F`).
    fn solve_face(&self, problem: &SimplexQp, free: &[usize]) -> Result<(DVector<f64>, f64), QpError> {
        let m = free.len();
        let q = DMatrix::from_fn(m, m, |r, c| problem.quadratic[(free[r], free[c])]);
        let b = DVector::from_fn(m, |r, _| problem.linear[free[r]]);
        let center = DVector::from_element(m, 1.0 / m as f64);

        let x_free = if m == 1 {
            center
        } else {
            let z = sum_free_basis(m);
            let hessian = z.transpose() * &q * &z;
            let gradient = z.transpose() * (&q * &center - &b);

            let svd = hessian.svd(true, true);
            let reference = svd.singular_values.max().max(q.amax());
            let rcond = if reference > 0.0 {
                svd.singular_values.min() / reference
            } else {
                0.0
            };
            if !rcond.is_finite() || rcond < self.singular_tolerance {
                return Err(QpError::Singular { rcond });
            }

            let y = svd.solve(&(-gradient), 0.0).map_err(|_| QpError::Singular { rcond })?;
            center + z * y
        };
        if x_free.iter().any(|v| !v.is_finite()) {
            return Err(QpError::NonFinite);
        }

        let nu = (&b - &q * &x_free).mean();
        Ok((x_free, nu))
    }
}

/// Orthonormal basis of `{v ∈ R^m : Σ v_i = 0}` (Helmert contrasts), `m ≥ 2`.
fn sum_free_basis(m: usize) -> DMatrix<f64> {
    let mut z = DMatrix::zeros(m, m - 1);
    for k in 1..m {
        let norm = ((k * (k + 1)) as f64).sqrt();
        for i in 0..k {
            z[(i, k - 1)] = 1.0 / norm;
        }
        z[(k, k - 1)] = -(k as f64) / norm;
    }
    z
}

impl QpSolver for ActiveSetSolver {
    fn solve(&self, problem: &SimplexQp, x0: &DVector<f64>) -> Result<QpSolution, QpError> {
        let n = problem.dim();
        if n == 0 {
            return Err(QpError::Empty);
        }
        if problem.quadratic.nrows() != n || problem.quadratic.ncols() != n || x0.len() != n {
            return Err(QpError::Dimension {
                quadratic: problem.quadratic.nrows(),
                linear: n,
                start: x0.len(),
            });
        }
        if problem.quadratic.iter().chain(problem.linear.iter()).any(|v| !v.is_finite()) {
            return Err(QpError::NonFinite);
        }

        // The only feasible point.
        if n == 1 {
            let x = DVector::from_element(1, 1.0);
            let objective = problem.objective(&x);
            return Ok(QpSolution {
                x,
                objective,
                iterations: 0,
            });
        }

        // Multipliers are compared against the problem's own scale.
        let scale = problem
            .quadratic
            .diagonal()
            .iter()
            .chain(problem.linear.iter())
            .fold(1.0_f64, |acc, v| acc.max(v.abs()));
        let multiplier_tol = self.tolerance * scale;

        let mut x = x0.clone();
        let mut fixed = vec![false; n];
        for i in 0..n {
            if x[i] <= 0.0 {
                x[i] = 0.0;
                fixed[i] = true;
            }
        }

        for iteration in 1..=self.max_iterations {
            let free: Vec<usize> = (0..n).filter(|&i| !fixed[i]).collect();
            if free.is_empty() {
                // Cannot happen from a feasible start; recover by releasing everything.
                fixed.iter_mut().for_each(|f| *f = false);
                continue;
            }

            let (target, nu) = self.solve_face(problem, &free)?;

            let mut step = DVector::<f64>::zeros(n);
            for (k, &i) in free.iter().enumerate() {
                step[i] = target[k] - x[i];
            }

            if step.amax() <= self.tolerance {
                for (k, &i) in free.iter().enumerate() {
                    x[i] = target[k];
                }

                // Stationary on the current face: check the bound multipliers
                // λ_i = 2((Qx)_i − b_i + ν) of the fixed coordinates.
                let qx = &problem.quadratic * &x;
                let mut release: Option<(usize, f64)> = None;
                for i in (0..n).filter(|&i| fixed[i]) {
                    let lambda = 2.0 * (qx[i] - problem.linear[i] + nu);
                    if lambda < -multiplier_tol && release.is_none_or(|(_, worst)| lambda < worst) {
                        release = Some((i, lambda));
                    }
                }

                match release {
                    None => {
                        let objective = problem.objective(&x);
                        return Ok(QpSolution {
                            x,
                            objective,
                            iterations: iteration,
                        });
                    }
                    Some((i, _)) => {
                        fixed[i] = false;
                        continue;
                    }
                }
            }

            // Longest step towards the face minimizer that keeps x ≥ 0.
            let mut alpha = 1.0;
            let mut blocking = None;
            for &i in &free {
                if step[i] < 0.0 {
                    let ratio = -x[i] / step[i];
                    if ratio < alpha {
                        alpha = ratio;
                        blocking = Some(i);
                    }
                }
            }

            x.axpy(alpha, &step, 1.0);
            if let Some(i) = blocking {
                x[i] = 0.0;
                fixed[i] = true;
            }
            if x.iter().any(|v| !v.is_finite()) {
                return Err(QpError::NonFinite);
            }
        }

        Err(QpError::Diverged {
            iterations: self.max_iterations,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn qp(q: &[f64], b: &[f64]) -> SimplexQp {
        let n = b.len();
        SimplexQp {
            quadratic: DMatrix::from_row_slice(n, n, q),
            linear: DVector::from_row_slice(b),
            constant: 0.0,
        }
    }

    #[test]
    fn interior_minimum_is_found() {
        // (x0 - 0.3)^2 + (x1 - 0.7)^2 expanded: Q = I, b = (0.3, 0.7).
        let problem = qp(&[1.0, 0.0, 0.0, 1.0], &[0.3, 0.7]);
        let sol = ActiveSetSolver::default()
            .solve(&problem, &problem.uniform_start())
            .unwrap();

        assert_relative_eq!(sol.x[0], 0.3, epsilon = 1e-12);
        assert_relative_eq!(sol.x[1], 0.7, epsilon = 1e-12);
    }

    #[test]
    fn bound_becomes_active() {
        // Unconstrained target (1.2, -0.2) lies outside the simplex.
        let problem = qp(&[1.0, 0.0, 0.0, 1.0], &[1.2, -0.2]);
        let sol = ActiveSetSolver::default()
            .solve(&problem, &problem.uniform_start())
            .unwrap();

        assert_relative_eq!(sol.x[0], 1.0, epsilon = 1e-12);
        assert_eq!(sol.x[1], 0.0);
    }

    #[test]
    fn released_bound_reaches_interior_optimum() {
        // Start on a vertex; the optimum is interior so the bounds must be released.
        let problem = qp(
            &[2.0, 0.0, 0.0, 0.0, 2.0, 0.0, 0.0, 0.0, 2.0],
            &[0.2, 0.6, 1.0],
        );
        let start = DVector::from_row_slice(&[1.0, 0.0, 0.0]);
        let sol = ActiveSetSolver::default().solve(&problem, &start).unwrap();

        // Minimizer of Σ (x_i - b_i / 2)^2 on the simplex: shift by (1 - 0.9) / 3.
        let shift = (1.0 - 0.9) / 3.0;
        assert_relative_eq!(sol.x[0], 0.1 + shift, epsilon = 1e-10);
        assert_relative_eq!(sol.x[1], 0.3 + shift, epsilon = 1e-10);
        assert_relative_eq!(sol.x[2], 0.5 + shift, epsilon = 1e-10);
    }

    #[test]
    fn single_variable_is_exactly_one() {
        let problem = qp(&[3.0], &[-5.0]);
        let sol = ActiveSetSolver::default()
            .solve(&problem, &problem.uniform_start())
            .unwrap();
        assert_eq!(sol.x.as_slice(), &[1.0]);
    }

    #[test]
    fn duplicated_variables_are_singular_until_regularized() {
        let problem = qp(&[1.0, 1.0, 1.0, 1.0], &[1.0, 1.0]);
        let solver = ActiveSetSolver::default();

        let err = solver.solve(&problem, &problem.uniform_start()).unwrap_err();
        assert!(matches!(err, QpError::Singular { .. }), "{err:?}");

        let sol = solver
            .solve(&problem.regularized(1e-6), &problem.uniform_start())
            .unwrap();
        assert_relative_eq!(sol.x[0], 0.5, epsilon = 1e-9);
        assert_relative_eq!(sol.x[1], 0.5, epsilon = 1e-9);
    }

    #[test]
    fn answer_does_not_depend_on_problem_scale() {
        // s·((x0 - 0.3)^2 + (x1 - 0.7)^2): same minimizer at every magnitude.
        for scale in [1e-3, 1.0, 1e3, 1e6, 1e8, 1e12] {
            let problem = qp(&[scale, 0.0, 0.0, scale], &[0.3 * scale, 0.7 * scale]);
            let sol = ActiveSetSolver::default()
                .solve(&problem, &problem.uniform_start())
                .unwrap_or_else(|e| panic!("scale {scale:e}: {e}"));

            assert!((sol.x.sum() - 1.0).abs() < 1e-12, "scale {scale:e}: {}", sol.x);
            assert_relative_eq!(sol.x[0], 0.3, epsilon = 1e-12);
            assert_relative_eq!(sol.x[1], 0.7, epsilon = 1e-12);
        }
    }

    #[test]
    fn large_coupled_problem_keeps_bounds_and_unit_sum() {
        let scale = 1e9;
        let q: Vec<f64> = [4.0, 1.0, 0.5, 1.0, 3.0, 0.2, 0.5, 0.2, 2.0].iter().map(|v| v * scale).collect();
        let problem = qp(&q, &[3.0 * scale, 0.5 * scale, -1.0 * scale]);
        let sol = ActiveSetSolver::default()
            .solve(&problem, &problem.uniform_start())
            .unwrap();

        assert!((sol.x.sum() - 1.0).abs() < 1e-12, "{}", sol.x);
        assert_eq!(sol.x[2], 0.0);
        assert!(sol.x.iter().all(|&v| v >= 0.0));

        // Same problem at unit scale gives the same point.
        let unit = qp(&[4.0, 1.0, 0.5, 1.0, 3.0, 0.2, 0.5, 0.2, 2.0], &[3.0, 0.5, -1.0]);
        let reference = ActiveSetSolver::default().solve(&unit, &unit.uniform_start()).unwrap();
        assert_relative_eq!(sol.x, reference.x, epsilon = 1e-10);
    }

    #[test]
    fn helmert_basis_is_orthonormal_and_sum_free() {
        let z = sum_free_basis(5);
        assert_relative_eq!(z.transpose() * &z, DMatrix::identity(4, 4), epsilon = 1e-14);
        for col in z.column_iter() {
            assert!(col.sum().abs() < 1e-14);
        }
    }

    #[test]
    fn zero_iteration_budget_diverges() {
        let problem = qp(&[1.0, 0.0, 0.0, 1.0], &[0.3, 0.7]);
        let solver = ActiveSetSolver {
            max_iterations: 0,
            ..ActiveSetSolver::default()
        };
        let err = solver.solve(&problem, &problem.uniform_start()).unwrap_err();
        assert_eq!(err, QpError::Diverged { iterations: 0 });
    }

    #[test]
    fn gradient_matches_finite_differences() {
        let problem = SimplexQp {
            constant: 4.0,
            ..qp(&[2.0, 0.5, 0.5, 1.0], &[0.1, -0.4])
        };
        let x = DVector::from_row_slice(&[0.3, 0.7]);
        let g = problem.gradient(&x);

        let h = 1e-6;
        for i in 0..2 {
            let mut xp = x.clone();
            let mut xm = x.clone();
            xp[i] += h;
            xm[i] -= h;
            let fd = (problem.objective(&xp) - problem.objective(&xm)) / (2.0 * h);
            assert_relative_eq!(g[i], fd, epsilon = 1e-6);
        }
    }
}
