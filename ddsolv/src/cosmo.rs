/////////////////////////////////////////////////////////////////////////////////////////////
//
// COSMO model: primal and adjoint solves, solvation energy and analytical forces.
//
// Created on: 12 Jun 2026     Author: Daniel Owen
//
// Copyright (c) 2025, Maptek Pty Ltd. All rights reserved. Licensed under the MIT License.
//
/////////////////////////////////////////////////////////////////////////////////////////////

//! COSMO model: primal and adjoint solves, solvation energy and analytical
//! forces.
//!
//! The primal system is `L sigma = g` with `g = -proj(U . Phi)`; the adjoint
//! system `L* s = psi` supplies the density contracted against every
//! geometry derivative, so the force assembly below needs no extra linear
//! solves. The energy is `E = 1/2 f(eps) <sigma, psi>` with
//! `f = (eps - 1)/eps`.
//!
//! Forces are the exact derivative of the *discretized* energy: the two
//! operator-derivative contractions (moving the evaluation sphere and moving
//! the source sphere), the exposed-surface derivative through the switching
//! function, and the solute-field term. Because every piece is an exact
//! pairwise derivative, the assembled forces sum to zero under rigid
//! translation to round-off.

use ddsolv_fmm::{gradient_basis, lm_index, BasisWorkspace};
use faer::MatRef;
use rayon::prelude::*;

use crate::geometry::{dfsw, dist, fsw, switch_upper, Cavity};
use crate::operators::{
    cosmo_diag_solve, cosmo_offdiag_apply, cosmo_offdiag_apply_adj, psi, solute_field,
    solute_potential, weighted_rhs,
};
use crate::solver::{jacobi_diis, SolveResult};

/// Result of a COSMO solve: both linear systems plus the energy.
#[derive(Debug, Clone)]
pub struct CosmoSolution {
    /// Primal solve, `L sigma = g`.
    pub primal: SolveResult,
    /// Adjoint solve, `L* s = psi`.
    pub adjoint: SolveResult,
    /// Solvation energy `1/2 f(eps) <sigma, psi>`.
    pub energy: f64,
}

impl CosmoSolution {
    /// Apparent surface charge density coefficients.
    #[inline]
    pub fn sigma(&self) -> MatRef<'_, f64> {
        self.primal.x.as_ref()
    }

    /// Adjoint density coefficients.
    #[inline]
    pub fn adjoint_density(&self) -> MatRef<'_, f64> {
        self.adjoint.x.as_ref()
    }

    /// Whether both solves met the tolerance.
    #[inline]
    pub fn converged(&self) -> bool {
        self.primal.converged && self.adjoint.converged
    }
}

/// COSMO dielectric scaling `f = (eps - 1)/eps`.
#[inline]
pub fn cosmo_fac(dielectric: f64) -> f64 {
    (dielectric - 1.0) / dielectric
}

/// Runs the primal and adjoint COSMO solves and assembles the energy.
///
/// Non-convergence is reported through the [`SolveResult`] flags, never as a
/// panic or error; the returned densities are the last iterates either way.
pub fn solve_cosmo(cav: &Cavity) -> CosmoSolution {
    let params = *cav.params();

    let phi = solute_potential(cav);
    let g = weighted_rhs(cav, phi.as_ref());
    let primal = jacobi_diis(
        g.as_ref(),
        |x| cosmo_offdiag_apply(cav, x),
        |x| cosmo_diag_solve(cav, x),
        params.lmax,
        params.tolerance,
        params.max_iterations,
        params.diis_depth,
    );

    let rhs_adj = psi(cav);
    let adjoint = jacobi_diis(
        rhs_adj.as_ref(),
        |x| cosmo_offdiag_apply_adj(cav, x),
        |x| cosmo_diag_solve(cav, x),
        params.lmax,
        params.tolerance,
        params.max_iterations,
        params.diis_depth,
    );

    let mut energy = 0.0;
    for i in 0..cav.nsph() {
        for lm in 0..cav.nbasis() {
            energy += primal.x[(lm, i)] * rhs_adj[(lm, i)];
        }
    }
    energy *= 0.5 * cosmo_fac(params.dielectric);

    CosmoSolution { primal, adjoint, energy }
}

/// Analytical forces on the sphere centers, `F_a = -dE/dc_a`, one vector per
/// sphere.
pub fn cosmo_forces(cav: &Cavity, sol: &CosmoSolution) -> Vec<[f64; 3]> {
    let params = *cav.params();
    let (ngrid, nsph) = (cav.ngrid(), cav.nsph());
    let half_f = 0.5 * cosmo_fac(params.dielectric);

    // xi_in = w_n s_i(y_n): the adjoint density at the grid, quadrature
    // weight folded in. zeta additionally carries the exposure weight.
    let xi = cav.project_grid_adj(sol.adjoint_density());
    let phi = solute_potential(cav);
    let field = solute_field(cav);
    let sigma = sol.sigma();

    let mut forces = vec![[0.0; 3]; nsph];
    forces.par_iter_mut().enumerate().for_each(|(a, out)| {
        let mut ws = GradScratch::new(params.lmax);
        let mut acc = [0.0; 3];

        // Moving the evaluation sphere: grid points of a sweep through the
        // neighbour couplings. The coupling enters L with a minus sign, so
        // its derivative contracts negatively here and positively below.
        for n in 0..ngrid {
            let xi_an = xi[(n, a)];
            if xi_an == 0.0 {
                continue;
            }
            let xg = cav.grid_point(a, n);
            for &j in cav.neighbours(a) {
                let g = grad_switched_expansion(cav, &xg, j, sigma, &mut ws);
                acc[0] -= xi_an * g[0];
                acc[1] -= xi_an * g[1];
                acc[2] -= xi_an * g[2];
            }
        }

        // Moving the source sphere: sphere a seen from its neighbours' grids.
        for &i in cav.neighbours(a) {
            for n in 0..ngrid {
                let xi_in = xi[(n, i)];
                if xi_in == 0.0 {
                    continue;
                }
                let xg = cav.grid_point(i, n);
                let g = grad_switched_expansion(cav, &xg, a, sigma, &mut ws);
                acc[0] += xi_in * g[0];
                acc[1] += xi_in * g[1];
                acc[2] += xi_in * g[2];
            }
        }

        // Exposure derivative through the switching function. The clamp in
        // u_i makes the derivative vanish wherever u_i = 0.
        for &i in cav.neighbours(a) {
            for n in 0..ngrid {
                if cav.ui(n, i) == 0.0 {
                    continue;
                }
                let weight = xi[(n, i)] * phi[(n, i)];
                if weight == 0.0 {
                    continue;
                }
                let xg = cav.grid_point(i, n);
                let r = dist(&xg, &cav.centers()[a]);
                let t = r / cav.radii()[a];
                let df = dfsw(t, params.se, params.eta);
                if df != 0.0 {
                    let s = df / (cav.radii()[a] * r);
                    acc[0] += weight * s * (xg[0] - cav.centers()[a][0]);
                    acc[1] += weight * s * (xg[1] - cav.centers()[a][1]);
                    acc[2] += weight * s * (xg[2] - cav.centers()[a][2]);
                }
            }
        }
        for n in 0..ngrid {
            if cav.ui(n, a) == 0.0 {
                continue;
            }
            let weight = xi[(n, a)] * phi[(n, a)];
            if weight == 0.0 {
                continue;
            }
            let xg = cav.grid_point(a, n);
            for &j in cav.neighbours(a) {
                let r = dist(&xg, &cav.centers()[j]);
                let t = r / cav.radii()[j];
                let df = dfsw(t, params.se, params.eta);
                if df != 0.0 {
                    let s = df / (cav.radii()[j] * r);
                    acc[0] -= weight * s * (xg[0] - cav.centers()[j][0]);
                    acc[1] -= weight * s * (xg[1] - cav.centers()[j][1]);
                    acc[2] -= weight * s * (xg[2] - cav.centers()[j][2]);
                }
            }
        }

        // Solute-field term: the grid of a rides through the field, and the
        // charge of a acts on every exposed grid point.
        for n in 0..ngrid {
            let zeta = xi[(n, a)] * cav.ui(n, a);
            if zeta != 0.0 {
                let g = field[a * ngrid + n];
                acc[0] += zeta * g[0];
                acc[1] += zeta * g[1];
                acc[2] += zeta * g[2];
            }
        }
        let qa = cav.charges()[a];
        for i in 0..nsph {
            for n in 0..ngrid {
                let zeta = xi[(n, i)] * cav.ui(n, i);
                if zeta == 0.0 {
                    continue;
                }
                let xg = cav.grid_point(i, n);
                let r = dist(&xg, &cav.centers()[a]);
                let s = zeta * qa / (r * r * r);
                acc[0] += s * (xg[0] - cav.centers()[a][0]);
                acc[1] += s * (xg[1] - cav.centers()[a][1]);
                acc[2] += s * (xg[2] - cav.centers()[a][2]);
            }
        }

        out[0] = half_f * acc[0];
        out[1] = half_f * acc[1];
        out[2] = half_f * acc[2];
    });
    forces
}

struct GradScratch {
    basis: BasisWorkspace,
    vylm: Vec<f64>,
    vdylm: Vec<[f64; 3]>,
}

impl GradScratch {
    fn new(lmax: usize) -> Self {
        let nb = ddsolv_fmm::nbasis(lmax);
        Self {
            basis: BasisWorkspace::new(lmax),
            vylm: vec![0.0; nb],
            vdylm: vec![[0.0; 3]; nb],
        }
    }
}

/// Cartesian gradient of the switching-weighted interior expansion
/// `omega(t) W_j` of sphere `j` at the point `x`, zero outside the switching
/// support.
fn grad_switched_expansion(
    cav: &Cavity,
    x: &[f64; 3],
    j: usize,
    sigma: MatRef<'_, f64>,
    ws: &mut GradScratch,
) -> [f64; 3] {
    let params = cav.params();
    let high = switch_upper(params.se, params.eta);
    let rj = cav.radii()[j];
    let c = [
        x[0] - cav.centers()[j][0],
        x[1] - cav.centers()[j][1],
        x[2] - cav.centers()[j][2],
    ];
    let r = (c[0] * c[0] + c[1] * c[1] + c[2] * c[2]).sqrt();
    let t = r / rj;
    if t >= high {
        return [0.0; 3];
    }
    let w = fsw(t, params.se, params.eta);
    let dw = dfsw(t, params.se, params.eta);

    gradient_basis(&c, params.lmax, cav.scales(), &mut ws.basis, &mut ws.vylm, &mut ws.vdylm);
    let sdir = [c[0] / r, c[1] / r, c[2] / r];

    // W = sum 4pi/(2l+1) t^l Y sigma;
    // grad W = (1/r_j) sum 4pi/(2l+1) t^(l-1) (l Y s + grad_S Y) sigma.
    let mut val = 0.0;
    let mut grad = [0.0; 3];
    let mut tl = 1.0;
    let mut tlm1 = 1.0;
    for l in 0..=params.lmax {
        let fac = cav.scales().v4pi2lp1[l];
        let fl = l as f64;
        for m in -(l as i64)..=(l as i64) {
            let idx = lm_index(l, m);
            let slm = sigma[(idx, j)];
            if slm == 0.0 {
                continue;
            }
            val += fac * tl * ws.vylm[idx] * slm;
            if l >= 1 {
                let g = fac * tlm1 / rj * slm;
                grad[0] += g * (fl * ws.vylm[idx] * sdir[0] + ws.vdylm[idx][0]);
                grad[1] += g * (fl * ws.vylm[idx] * sdir[1] + ws.vdylm[idx][1]);
                grad[2] += g * (fl * ws.vylm[idx] * sdir[2] + ws.vdylm[idx][2]);
            }
        }
        tlm1 = tl;
        tl *= t;
    }

    let dws = dw / rj;
    [
        dws * sdir[0] * val + w * grad[0],
        dws * sdir[1] * val + w * grad[1],
        dws * sdir[2] * val + w * grad[2],
    ]
}
