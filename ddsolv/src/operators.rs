/////////////////////////////////////////////////////////////////////////////////////////////
//
// Boundary operators of the COSMO and PCM models.
//
// Created on: 12 Jun 2026     Author: Daniel Owen
//
// Copyright (c) 2025, Maptek Pty Ltd. All rights reserved. Licensed under the MIT License.
//
/////////////////////////////////////////////////////////////////////////////////////////////

//! Boundary operators of the COSMO and PCM models.
//!
//! All operators act on coefficient matrices with one `(lmax + 1)^2` column
//! per sphere and return fresh matrices of the same shape (or grid-value
//! matrices with one column per sphere for the potential builders).
//!
//! The COSMO operator `L` splits into its exact diagonal `4 pi/(2l+1)` and
//! the switching-weighted interior-expansion coupling over neighbour spheres;
//! the coupling and its exact transpose are what the Jacobi/DIIS solver
//! iterates on. The PCM operators are built from the double-layer operator
//! `D`: `R_eps = 2 pi (eps+1)/(eps-1) I - D` and `R_inf = 2 pi I - D`, where
//! the global part of `D` runs through the FMM tree (or the dense fallback
//! selected by configuration) and the `-2 pi/(2l+1)` principal-value diagonal
//! is applied at the grid level before projection.

use ddsolv_fmm::{
    l2p, l2p_adj, lm_index, m2p, BasisWorkspace, FmmWorkspace,
};
use faer::{Mat, MatRef};
use rayon::prelude::*;
use std::f64::consts::PI;

use crate::geometry::{dist, fsw, switch_upper, Cavity};

/// Shared-reference column access used by the sphere-parallel loops. Sound
/// only while every concurrent writer targets a distinct column.
#[inline]
unsafe fn col_mut_unchecked(mat: &Mat<f64>, col: usize) -> &mut [f64] {
    std::slice::from_raw_parts_mut(mat.col(col).as_ptr() as *mut f64, mat.nrows())
}

#[inline]
fn col_slice<'a>(mat: MatRef<'a, f64>, col: usize) -> &'a [f64] {
    unsafe { std::slice::from_raw_parts(mat.col(col).as_ptr(), mat.nrows()) }
}

#[inline]
fn sub(a: [f64; 3], b: [f64; 3]) -> [f64; 3] {
    [a[0] - b[0], a[1] - b[1], a[2] - b[2]]
}

/// Applies the COSMO diagonal `4 pi/(2l+1)` per degree.
pub fn cosmo_diag_apply(cav: &Cavity, x: MatRef<'_, f64>) -> Mat<f64> {
    diag_scale(cav, x, |l| 4.0 * PI / (2.0 * l + 1.0))
}

/// Inverts the COSMO diagonal, the Jacobi preconditioner of `L`.
pub fn cosmo_diag_solve(cav: &Cavity, x: MatRef<'_, f64>) -> Mat<f64> {
    diag_scale(cav, x, |l| (2.0 * l + 1.0) / (4.0 * PI))
}

/// Off-diagonal block of the COSMO operator `L`: for each sphere, the
/// neighbour interior expansions are evaluated at its grid points, weighted
/// by the switching function, projected back onto the basis, and negated.
/// The minus sign is structural: the neighbour values are boundary data of
/// the local problem, moved to the left-hand side.
pub fn cosmo_offdiag_apply(cav: &Cavity, x: MatRef<'_, f64>) -> Mat<f64> {
    let params = *cav.params();
    let (ngrid, nsph, nb) = (cav.ngrid(), cav.nsph(), cav.nbasis());
    let high = switch_upper(params.se, params.eta);

    let y = Mat::zeros(nb, nsph);
    (0..nsph).into_par_iter().for_each(|i| {
        let mut ws = BasisWorkspace::new(params.lmax);
        let mut vals = vec![0.0; ngrid];
        for n in 0..ngrid {
            let xg = cav.grid_point(i, n);
            let mut pot = 0.0;
            for &j in cav.neighbours(i) {
                let c = sub(xg, cav.centers()[j]);
                let rj = cav.radii()[j];
                let t = dist(&xg, &cav.centers()[j]) / rj;
                if t >= high {
                    continue;
                }
                let w = fsw(t, params.se, params.eta);
                if w != 0.0 {
                    l2p(&c, rj, params.lmax, cav.scales(), &mut ws, w, col_slice(x, j), 1.0, &mut pot);
                }
            }
            vals[n] = -pot;
        }
        project_into(cav, &vals, unsafe { col_mut_unchecked(&y, i) });
    });
    y
}

/// Exact transpose of [`cosmo_offdiag_apply`], used by the adjoint solve.
pub fn cosmo_offdiag_apply_adj(cav: &Cavity, x: MatRef<'_, f64>) -> Mat<f64> {
    let params = *cav.params();
    let (ngrid, nsph, nb) = (cav.ngrid(), cav.nsph(), cav.nbasis());
    let high = switch_upper(params.se, params.eta);

    // Weighted grid values of the input, the transpose of the projection.
    let xi = cav.project_grid_adj(x);

    let y = Mat::zeros(nb, nsph);
    (0..nsph).into_par_iter().for_each(|j| {
        let mut ws = BasisWorkspace::new(params.lmax);
        let dst = unsafe { col_mut_unchecked(&y, j) };
        dst.fill(0.0);
        let rj = cav.radii()[j];
        for &i in cav.neighbours(j) {
            for n in 0..ngrid {
                let xg = cav.grid_point(i, n);
                let t = dist(&xg, &cav.centers()[j]) / rj;
                if t >= high {
                    continue;
                }
                let w = fsw(t, params.se, params.eta);
                if w != 0.0 {
                    let c = sub(xg, cav.centers()[j]);
                    l2p_adj(&c, w * xi[(n, i)], rj, params.lmax, cav.scales(), &mut ws, -1.0, 1.0, dst);
                }
            }
        }
    });
    y
}

/// Applies the double-layer operator `D` at the grid level and projects the
/// result, weighted by the exposed-surface factors `u_i(y_n)`.
///
/// The global coupling treats each sphere's density as the degree-scaled
/// multipole source `l * x_lm`; `with_diag` adds the `-2 pi/(2l+1)`
/// principal-value diagonal at the grid points before projection.
pub fn double_layer_apply(cav: &Cavity, x: MatRef<'_, f64>, with_diag: bool) -> Mat<f64> {
    let params = *cav.params();
    let (nsph, nb) = (cav.nsph(), cav.nbasis());

    // Degree-scaled source multipoles of the double-layer kernel.
    let mut mul = Mat::zeros(nb, nsph);
    for j in 0..nsph {
        for l in 0..=params.lmax {
            for m in -(l as i64)..=(l as i64) {
                let idx = lm_index(l, m);
                mul[(idx, j)] = l as f64 * x[(idx, j)];
            }
        }
    }

    if params.enable_fmm {
        double_layer_fmm(cav, x, mul.as_ref(), with_diag)
    } else {
        double_layer_dense(cav, x, mul.as_ref(), with_diag)
    }
}

fn double_layer_fmm(
    cav: &Cavity,
    x: MatRef<'_, f64>,
    mul: MatRef<'_, f64>,
    with_diag: bool,
) -> Mat<f64> {
    let params = *cav.params();
    let (ngrid, nsph, nb) = (cav.ngrid(), cav.nsph(), cav.nbasis());
    let tree = cav.tree();

    let mut fw = FmmWorkspace::new(tree, params.pm, params.pl);
    fw.set_leaf_multipoles(tree, mul);
    fw.forward_pass(tree, cav.scales());

    let y = Mat::zeros(nb, nsph);
    (0..nsph).into_par_iter().for_each(|i| {
        let mut ws = BasisWorkspace::new(params.pm.max(params.pl));
        let mut vals = vec![0.0; ngrid];
        for n in 0..ngrid {
            let u = cav.ui(n, i);
            if u == 0.0 {
                continue;
            }
            let xg = cav.grid_point(i, n);
            let mut pot = fw.eval_leaf_local(tree, cav.scales(), &mut ws, i, &sub(xg, cav.centers()[i]));
            for &b in tree.near_atoms(i) {
                if b == i {
                    continue;
                }
                let c = sub(xg, cav.centers()[b]);
                m2p(&c, cav.radii()[b], params.lmax, cav.scales(), &mut ws, 1.0, col_slice(mul, b), 1.0, &mut pot);
            }
            if with_diag {
                pot += diag_at_grid(cav, x, i, n);
            }
            vals[n] = u * pot;
        }
        project_into(cav, &vals, unsafe { col_mut_unchecked(&y, i) });
    });
    y
}

fn double_layer_dense(
    cav: &Cavity,
    x: MatRef<'_, f64>,
    mul: MatRef<'_, f64>,
    with_diag: bool,
) -> Mat<f64> {
    let params = *cav.params();
    let (ngrid, nsph, nb) = (cav.ngrid(), cav.nsph(), cav.nbasis());

    let y = Mat::zeros(nb, nsph);
    (0..nsph).into_par_iter().for_each(|i| {
        let mut ws = BasisWorkspace::new(params.lmax);
        let mut vals = vec![0.0; ngrid];
        for n in 0..ngrid {
            let u = cav.ui(n, i);
            if u == 0.0 {
                continue;
            }
            let xg = cav.grid_point(i, n);
            let mut pot = 0.0;
            for b in 0..nsph {
                if b == i {
                    continue;
                }
                let c = sub(xg, cav.centers()[b]);
                m2p(&c, cav.radii()[b], params.lmax, cav.scales(), &mut ws, 1.0, col_slice(mul, b), 1.0, &mut pot);
            }
            if with_diag {
                pot += diag_at_grid(cav, x, i, n);
            }
            vals[n] = u * pot;
        }
        project_into(cav, &vals, unsafe { col_mut_unchecked(&y, i) });
    });
    y
}

/// Grid-level principal-value diagonal `-sum_lm 2 pi/(2l+1) x_lm Y_lm(y_n)`.
#[inline]
fn diag_at_grid(cav: &Cavity, x: MatRef<'_, f64>, i: usize, n: usize) -> f64 {
    let mut pot = 0.0;
    for l in 0..=cav.params().lmax {
        let fac = -2.0 * PI / (2.0 * l as f64 + 1.0);
        for m in -(l as i64)..=(l as i64) {
            let idx = lm_index(l, m);
            pot += fac * x[(idx, i)] * cav.vgrid(idx, n);
        }
    }
    pot
}

/// Dielectric factor of `R_eps`, `2 pi (eps+1)/(eps-1)`.
#[inline]
pub fn pcm_fac(dielectric: f64) -> f64 {
    2.0 * PI * (dielectric + 1.0) / (dielectric - 1.0)
}

/// Applies `R_eps = 2 pi (eps+1)/(eps-1) I - D` (with the principal-value
/// diagonal of `D` included).
pub fn r_eps_apply(cav: &Cavity, x: MatRef<'_, f64>) -> Mat<f64> {
    let fac = pcm_fac(cav.params().dielectric);
    let mut y = double_layer_apply(cav, x, true);
    for c in 0..y.ncols() {
        for r in 0..y.nrows() {
            y[(r, c)] = fac * x[(r, c)] - y[(r, c)];
        }
    }
    y
}

/// Applies `R_inf = 2 pi I - D`, the `eps -> inf` limit of `R_eps`.
pub fn r_inf_apply(cav: &Cavity, x: MatRef<'_, f64>) -> Mat<f64> {
    let mut y = double_layer_apply(cav, x, true);
    for c in 0..y.ncols() {
        for r in 0..y.nrows() {
            y[(r, c)] = 2.0 * PI * x[(r, c)] - y[(r, c)];
        }
    }
    y
}

/// Applies the approximate `R_eps` diagonal `fac + 2 pi/(2l+1)` used as the
/// Jacobi preconditioner of the PCM solve.
pub fn pcm_diag_apply(cav: &Cavity, x: MatRef<'_, f64>) -> Mat<f64> {
    let fac = pcm_fac(cav.params().dielectric);
    diag_scale(cav, x, |l| fac + 2.0 * PI / (2.0 * l + 1.0))
}

/// Inverts the approximate `R_eps` diagonal.
pub fn pcm_diag_solve(cav: &Cavity, x: MatRef<'_, f64>) -> Mat<f64> {
    let fac = pcm_fac(cav.params().dielectric);
    diag_scale(cav, x, |l| 1.0 / (fac + 2.0 * PI / (2.0 * l + 1.0)))
}

/// Solute potential `Phi` at every cavity grid point (`ngrid x nsph`),
/// evaluated from the atomic point charges through the FMM tree or the dense
/// fallback.
pub fn solute_potential(cav: &Cavity) -> Mat<f64> {
    let params = *cav.params();
    let (ngrid, nsph) = (cav.ngrid(), cav.nsph());
    let phi = Mat::zeros(ngrid, nsph);

    if params.enable_fmm {
        let tree = cav.tree();
        let mut fw = FmmWorkspace::new(tree, params.pm, params.pl);
        fw.set_leaf_charges(tree, cav.charges(), cav.scales());
        fw.forward_pass(tree, cav.scales());

        (0..nsph).into_par_iter().for_each(|i| {
            let mut ws = BasisWorkspace::new(params.pm.max(params.pl));
            let dst = unsafe { col_mut_unchecked(&phi, i) };
            for n in 0..ngrid {
                let xg = cav.grid_point(i, n);
                let mut pot = fw.eval_leaf_local(tree, cav.scales(), &mut ws, i, &sub(xg, cav.centers()[i]));
                for &b in tree.near_atoms(i) {
                    pot += cav.charges()[b] / dist(&xg, &cav.centers()[b]);
                }
                dst[n] = pot;
            }
        });
    } else {
        (0..nsph).into_par_iter().for_each(|i| {
            let dst = unsafe { col_mut_unchecked(&phi, i) };
            for n in 0..ngrid {
                let xg = cav.grid_point(i, n);
                let mut pot = 0.0;
                for b in 0..nsph {
                    pot += cav.charges()[b] / dist(&xg, &cav.centers()[b]);
                }
                dst[n] = pot;
            }
        });
    }
    phi
}

/// Gradient of the solute potential at every grid point, indexed
/// `i * ngrid + n`. Used by the force assembly only, so it stays dense.
pub fn solute_field(cav: &Cavity) -> Vec<[f64; 3]> {
    let (ngrid, nsph) = (cav.ngrid(), cav.nsph());
    let mut field = vec![[0.0; 3]; nsph * ngrid];
    field.par_iter_mut().enumerate().for_each(|(idx, e)| {
        let (i, n) = (idx / ngrid, idx % ngrid);
        let xg = cav.grid_point(i, n);
        let mut g = [0.0; 3];
        for b in 0..cav.nsph() {
            let d = sub(xg, cav.centers()[b]);
            let r = dist(&xg, &cav.centers()[b]);
            let s = cav.charges()[b] / (r * r * r);
            g[0] -= s * d[0];
            g[1] -= s * d[1];
            g[2] -= s * d[2];
        }
        *e = g;
    });
    field
}

/// Weighted right-hand side `g = -proj(U .* Phi)` of the COSMO equations.
pub fn weighted_rhs(cav: &Cavity, phi: MatRef<'_, f64>) -> Mat<f64> {
    let (ngrid, nsph) = (cav.ngrid(), cav.nsph());
    let mut masked = Mat::zeros(ngrid, nsph);
    for i in 0..nsph {
        for n in 0..ngrid {
            masked[(n, i)] = -cav.ui(n, i) * phi[(n, i)];
        }
    }
    cav.project_grid(masked.as_ref())
}

/// Solute density representation `psi`: for point charges only the monopole
/// row is populated, `psi_i00 = sqrt(4 pi) q_i`.
pub fn psi(cav: &Cavity) -> Mat<f64> {
    let mut out = Mat::zeros(cav.nbasis(), cav.nsph());
    let c = (4.0 * PI).sqrt();
    for (i, &q) in cav.charges().iter().enumerate() {
        out[(0, i)] = c * q;
    }
    out
}

fn diag_scale(cav: &Cavity, x: MatRef<'_, f64>, factor: impl Fn(f64) -> f64) -> Mat<f64> {
    let (nb, nsph) = (cav.nbasis(), cav.nsph());
    let mut y = Mat::zeros(nb, nsph);
    for i in 0..nsph {
        for l in 0..=cav.params().lmax {
            let f = factor(l as f64);
            for m in -(l as i64)..=(l as i64) {
                let idx = lm_index(l, m);
                y[(idx, i)] = f * x[(idx, i)];
            }
        }
    }
    y
}

fn project_into(cav: &Cavity, vals: &[f64], dst: &mut [f64]) {
    for lm in 0..cav.nbasis() {
        let mut acc = 0.0;
        for (n, &v) in vals.iter().enumerate() {
            acc += cav.vwgrid(lm, n) * v;
        }
        dst[lm] = acc;
    }
}
