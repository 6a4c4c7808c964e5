/////////////////////////////////////////////////////////////////////////////////////////////
//
// PCM model: screened-potential and density solves, solvation energy.
//
// Created on: 12 Jun 2026     Author: Daniel Owen
//
// Copyright (c) 2025, Maptek Pty Ltd. All rights reserved. Licensed under the MIT License.
//
/////////////////////////////////////////////////////////////////////////////////////////////

//! PCM model: screened-potential and density solves, solvation energy.
//!
//! The integral-equation-formalism flow is two chained solves: the screened
//! representation `R_eps Phi_eps = R_inf g` followed by the COSMO-type
//! density solve `L sigma = Phi_eps`. The dielectric response lives entirely
//! in `R_eps`, so the energy carries no extra scaling:
//! `E = 1/2 <sigma, psi>`.
//!
//! Only energies are computed for this model; the force path is COSMO-only
//! (see DESIGN.md).

use crate::geometry::Cavity;
use crate::operators::{
    cosmo_diag_solve, cosmo_offdiag_apply, pcm_diag_apply, pcm_diag_solve, psi, r_eps_apply,
    r_inf_apply, solute_potential, weighted_rhs,
};
use crate::solver::{jacobi_diis, SolveResult};
use faer::MatRef;

/// Result of a PCM solve: both linear systems plus the energy.
#[derive(Debug, Clone)]
pub struct PcmSolution {
    /// Screened-potential solve, `R_eps Phi_eps = R_inf g`.
    pub screened: SolveResult,
    /// Density solve, `L sigma = Phi_eps`.
    pub primal: SolveResult,
    /// Solvation energy `1/2 <sigma, psi>`.
    pub energy: f64,
}

impl PcmSolution {
    /// Apparent surface charge density coefficients.
    #[inline]
    pub fn sigma(&self) -> MatRef<'_, f64> {
        self.primal.x.as_ref()
    }

    /// Screened potential coefficients `Phi_eps`.
    #[inline]
    pub fn screened_potential(&self) -> MatRef<'_, f64> {
        self.screened.x.as_ref()
    }

    /// Whether both solves met the tolerance.
    #[inline]
    pub fn converged(&self) -> bool {
        self.screened.converged && self.primal.converged
    }
}

/// Runs the chained PCM solves and assembles the energy.
pub fn solve_pcm(cav: &Cavity) -> PcmSolution {
    let params = *cav.params();

    let phi = solute_potential(cav);
    let g = weighted_rhs(cav, phi.as_ref());
    let rhs = r_inf_apply(cav, g.as_ref());

    // R_eps split against its approximate per-degree diagonal: the closure
    // subtracts the diagonal action from the full apply.
    let screened = jacobi_diis(
        rhs.as_ref(),
        |x| {
            let mut y = r_eps_apply(cav, x);
            let d = pcm_diag_apply(cav, x);
            for c in 0..y.ncols() {
                for r in 0..y.nrows() {
                    y[(r, c)] -= d[(r, c)];
                }
            }
            y
        },
        |x| pcm_diag_solve(cav, x),
        params.lmax,
        params.tolerance,
        params.max_iterations,
        params.diis_depth,
    );

    let primal = jacobi_diis(
        screened.x.as_ref(),
        |x| cosmo_offdiag_apply(cav, x),
        |x| cosmo_diag_solve(cav, x),
        params.lmax,
        params.tolerance,
        params.max_iterations,
        params.diis_depth,
    );

    let rhs_psi = psi(cav);
    let mut energy = 0.0;
    for i in 0..cav.nsph() {
        for lm in 0..cav.nbasis() {
            energy += primal.x[(lm, i)] * rhs_psi[(lm, i)];
        }
    }
    energy *= 0.5;

    PcmSolution { screened, primal, energy }
}
