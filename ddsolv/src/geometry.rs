/////////////////////////////////////////////////////////////////////////////////////////////
//
// Cavity geometry: switching function, exposed-surface weights and projection tables.
//
// Created on: 12 Jun 2026     Author: Daniel Owen
//
// Copyright (c) 2025, Maptek Pty Ltd. All rights reserved. Licensed under the MIT License.
//
/////////////////////////////////////////////////////////////////////////////////////////////

//! Cavity geometry: switching function, exposed-surface weights and
//! projection tables.
//!
//! A [`Cavity`] freezes everything the boundary operators need about a fixed
//! set of atom-centered spheres: the angular grid replicated on each sphere,
//! the characteristic weights `u_i(y_n)` marking grid points exposed to the
//! solvent, sphere neighbour lists, the harmonic tables shared with the FMM
//! kernels, and the cluster tree over the spheres. Construction validates
//! once; afterwards the geometry is immutable and shared read-only across
//! threads.

use ddsolv_fmm::{nbasis, real_harmonics, BasisWorkspace, ClusterTree, HarmonicScales, TreeError};
use faer::Mat;
use std::fmt;

use crate::config::SolverParams;
use crate::grid::SphericalQuadrature;

/// Geometry rejected during [`Cavity`] construction.
#[derive(Debug, Clone, PartialEq)]
pub enum GeometryError {
    /// One charge per sphere is required.
    ChargeCountMismatch { spheres: usize, charges: usize },
    /// The sphere set itself is invalid.
    Tree(TreeError),
}

impl fmt::Display for GeometryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GeometryError::ChargeCountMismatch { spheres, charges } => {
                write!(f, "expected one charge per sphere, got {charges} charges for {spheres} spheres")
            }
            GeometryError::Tree(err) => write!(f, "invalid sphere set: {err}"),
        }
    }
}

impl std::error::Error for GeometryError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            GeometryError::Tree(err) => Some(err),
            _ => None,
        }
    }
}

impl From<TreeError> for GeometryError {
    fn from(err: TreeError) -> Self {
        GeometryError::Tree(err)
    }
}

/// Upper edge of the switching region in the scaled distance `t = |x - c|/r`.
///
/// The region spans `[switch_upper - eta, switch_upper]`; with the default
/// shift `se = -1` it sits strictly inside the unit sphere.
#[inline]
pub fn switch_upper(se: f64, eta: f64) -> f64 {
    1.0 + (se + 1.0) * eta / 2.0
}

/// C² quintic switching function: `1` below the region, `0` above it.
pub fn fsw(t: f64, se: f64, eta: f64) -> f64 {
    let high = switch_upper(se, eta);
    let low = high - eta;
    if t >= high {
        0.0
    } else if t <= low {
        1.0
    } else {
        let x = (t - low) / eta;
        1.0 - x * x * x * (10.0 - 15.0 * x + 6.0 * x * x)
    }
}

/// Derivative of [`fsw`] with respect to `t`.
pub fn dfsw(t: f64, se: f64, eta: f64) -> f64 {
    let high = switch_upper(se, eta);
    let low = high - eta;
    if t >= high || t <= low {
        0.0
    } else {
        let x = (t - low) / eta;
        -30.0 * x * x * (1.0 - x) * (1.0 - x) / eta
    }
}

/// Immutable cavity geometry shared by every operator and solver stage.
#[derive(Debug)]
pub struct Cavity {
    params: SolverParams,
    centers: Vec<[f64; 3]>,
    radii: Vec<f64>,
    charges: Vec<f64>,
    grid: SphericalQuadrature,
    scales: HarmonicScales,
    tree: ClusterTree,
    /// Per sphere, the other spheres whose switching region its grid points
    /// can touch. Symmetrized, so the same lists serve the adjoint loops.
    neighbours: Vec<Vec<usize>>,
    /// `ngrid x nsph` exposed-surface weights `u_i(y_n)`.
    ui: Mat<f64>,
    /// `nbasis(lmax) x ngrid` basis values at the grid directions.
    vgrid: Mat<f64>,
    /// `vgrid` with the quadrature weight folded into each column.
    vwgrid: Mat<f64>,
}

impl Cavity {
    /// Builds the cavity for the given spheres and solute point charges.
    ///
    /// The angular grid is the product rule of [`SphericalQuadrature::for_degree`]
    /// at twice the basis degree, which keeps the projection of band-limited
    /// grid data exact while oversampling the switching-weighted couplings.
    pub fn new(
        params: SolverParams,
        centers: Vec<[f64; 3]>,
        radii: Vec<f64>,
        charges: Vec<f64>,
    ) -> Result<Self, GeometryError> {
        let tree = ClusterTree::new(&centers, &radii, params.separation_ratio)?;
        if charges.len() != centers.len() {
            return Err(GeometryError::ChargeCountMismatch {
                spheres: centers.len(),
                charges: charges.len(),
            });
        }

        let grid = SphericalQuadrature::for_degree(2 * params.lmax);
        let scales = HarmonicScales::new(params.pm.max(params.pl));

        let nsph = centers.len();
        let ngrid = grid.len();
        let nb = nbasis(params.lmax);

        // Basis and weighted-basis tables at the grid directions.
        let mut vgrid = Mat::zeros(nb, ngrid);
        let mut vwgrid = Mat::zeros(nb, ngrid);
        let mut ws = BasisWorkspace::new(params.lmax);
        let mut vylm = vec![0.0; nb];
        for n in 0..ngrid {
            real_harmonics(&grid.point(n), params.lmax, &scales, &mut ws, &mut vylm);
            let w = grid.weight(n);
            for lm in 0..nb {
                vgrid[(lm, n)] = vylm[lm];
                vwgrid[(lm, n)] = w * vylm[lm];
            }
        }

        // Symmetrized neighbour lists: j is kept for i when grid points of
        // either sphere can land in the other's switching support.
        let high = switch_upper(params.se, params.eta);
        let mut neighbours = vec![Vec::new(); nsph];
        for i in 0..nsph {
            for j in 0..nsph {
                if i == j {
                    continue;
                }
                let d = dist(&centers[i], &centers[j]);
                if d < radii[i] + high * radii[j] || d < radii[j] + high * radii[i] {
                    neighbours[i].push(j);
                }
            }
        }

        // Exposed-surface weights u_i(y_n) = max(0, 1 - sum_j fsw(t_inj)).
        let mut ui = Mat::zeros(ngrid, nsph);
        for i in 0..nsph {
            for n in 0..ngrid {
                let x = grid_point_of(&centers[i], radii[i], &grid, n);
                let mut covered = 0.0;
                for &j in &neighbours[i] {
                    let t = dist(&x, &centers[j]) / radii[j];
                    covered += fsw(t, params.se, params.eta);
                }
                ui[(n, i)] = (1.0 - covered).max(0.0);
            }
        }

        Ok(Self {
            params,
            centers,
            radii,
            charges,
            grid,
            scales,
            tree,
            neighbours,
            ui,
            vgrid,
            vwgrid,
        })
    }

    #[inline]
    pub fn params(&self) -> &SolverParams {
        &self.params
    }

    /// Number of spheres.
    #[inline]
    pub fn nsph(&self) -> usize {
        self.centers.len()
    }

    /// Number of grid points per sphere.
    #[inline]
    pub fn ngrid(&self) -> usize {
        self.grid.len()
    }

    /// Number of basis coefficients per sphere, `(lmax + 1)^2`.
    #[inline]
    pub fn nbasis(&self) -> usize {
        nbasis(self.params.lmax)
    }

    #[inline]
    pub fn centers(&self) -> &[[f64; 3]] {
        &self.centers
    }

    #[inline]
    pub fn radii(&self) -> &[f64] {
        &self.radii
    }

    #[inline]
    pub fn charges(&self) -> &[f64] {
        &self.charges
    }

    #[inline]
    pub fn grid(&self) -> &SphericalQuadrature {
        &self.grid
    }

    #[inline]
    pub fn scales(&self) -> &HarmonicScales {
        &self.scales
    }

    #[inline]
    pub fn tree(&self) -> &ClusterTree {
        &self.tree
    }

    /// Neighbour spheres of sphere `i`.
    #[inline]
    pub fn neighbours(&self, i: usize) -> &[usize] {
        &self.neighbours[i]
    }

    /// Exposed-surface weight of grid point `n` on sphere `i`.
    #[inline]
    pub fn ui(&self, n: usize, i: usize) -> f64 {
        self.ui[(n, i)]
    }

    /// Basis value `Y_lm(y_n)`.
    #[inline]
    pub fn vgrid(&self, lm: usize, n: usize) -> f64 {
        self.vgrid[(lm, n)]
    }

    /// Weighted basis value `w_n Y_lm(y_n)`.
    #[inline]
    pub fn vwgrid(&self, lm: usize, n: usize) -> f64 {
        self.vwgrid[(lm, n)]
    }

    /// Cartesian position of grid point `n` on sphere `i`.
    #[inline]
    pub fn grid_point(&self, i: usize, n: usize) -> [f64; 3] {
        grid_point_of(&self.centers[i], self.radii[i], &self.grid, n)
    }

    /// Projects per-sphere grid values (`ngrid x nsph`) onto basis
    /// coefficients (`nbasis x nsph`) with the weighted basis table.
    pub fn project_grid(&self, values: faer::MatRef<'_, f64>) -> Mat<f64> {
        self.vwgrid.as_ref() * values
    }

    /// Evaluates basis coefficients (`nbasis x nsph`) at every grid point
    /// (`ngrid x nsph`).
    pub fn eval_grid(&self, coeffs: faer::MatRef<'_, f64>) -> Mat<f64> {
        self.vgrid.transpose() * coeffs
    }

    /// Transpose of [`Self::project_grid`]: sends basis coefficients to
    /// weighted grid values `sum_lm w_n Y_lm(y_n) x_lm`.
    pub fn project_grid_adj(&self, coeffs: faer::MatRef<'_, f64>) -> Mat<f64> {
        self.vwgrid.transpose() * coeffs
    }
}

#[inline]
fn grid_point_of(center: &[f64; 3], radius: f64, grid: &SphericalQuadrature, n: usize) -> [f64; 3] {
    let y = grid.point(n);
    [
        center[0] + radius * y[0],
        center[1] + radius * y[1],
        center[2] + radius * y[2],
    ]
}

#[inline]
pub(crate) fn dist(a: &[f64; 3], b: &[f64; 3]) -> f64 {
    let dx = a[0] - b[0];
    let dy = a[1] - b[1];
    let dz = a[2] - b[2];
    (dx * dx + dy * dy + dz * dz).sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params() -> SolverParams {
        SolverParams::builder().lmax(4).build().unwrap()
    }

    #[test]
    fn switching_function_is_a_smooth_step() {
        let (se, eta) = (-1.0, 0.1);
        let high = switch_upper(se, eta);
        let low = high - eta;
        assert!((high - 1.0).abs() < 1e-15);
        assert!((fsw(low - 0.01, se, eta) - 1.0).abs() < 1e-15);
        assert!(fsw(high + 0.01, se, eta).abs() < 1e-15);
        let mid = 0.5 * (low + high);
        assert!((fsw(mid, se, eta) - 0.5).abs() < 1e-14);

        // dfsw matches a centered difference inside the region.
        let h = 1e-6;
        let fd = (fsw(mid + h, se, eta) - fsw(mid - h, se, eta)) / (2.0 * h);
        assert!((dfsw(mid, se, eta) - fd).abs() < 1e-8);
        assert_eq!(dfsw(low - 0.01, se, eta), 0.0);
        assert_eq!(dfsw(high + 0.01, se, eta), 0.0);
    }

    #[test]
    fn isolated_sphere_is_fully_exposed() {
        let cav = Cavity::new(params(), vec![[0.0; 3]], vec![2.0], vec![1.0]).unwrap();
        assert!(cav.neighbours(0).is_empty());
        for n in 0..cav.ngrid() {
            assert_eq!(cav.ui(n, 0), 1.0);
        }
    }

    #[test]
    fn overlapping_spheres_bury_grid_points() {
        let cav = Cavity::new(
            params(),
            vec![[0.0, 0.0, 0.0], [0.0, 0.0, 2.5]],
            vec![2.0, 2.0],
            vec![1.0, -1.0],
        )
        .unwrap();
        assert_eq!(cav.neighbours(0), &[1]);
        assert_eq!(cav.neighbours(1), &[0]);

        let mut buried = 0;
        let mut exposed = 0;
        for n in 0..cav.ngrid() {
            let u = cav.ui(n, 0);
            assert!((0.0..=1.0).contains(&u));
            let x = cav.grid_point(0, n);
            let t = dist(&x, &[0.0, 0.0, 2.5]) / 2.0;
            if t < 1.0 - cav.params().eta {
                assert_eq!(u, 0.0);
                buried += 1;
            } else if t > 1.0 {
                assert_eq!(u, 1.0);
                exposed += 1;
            }
        }
        assert!(buried > 0 && exposed > 0);
    }

    #[test]
    fn projection_round_trips_band_limited_data() {
        let cav = Cavity::new(params(), vec![[0.0; 3]], vec![1.5], vec![1.0]).unwrap();
        let nb = cav.nbasis();
        let mut coeffs = Mat::zeros(nb, 1);
        for lm in 0..nb {
            coeffs[(lm, 0)] = (lm as f64 * 0.37).sin() + 0.2;
        }
        let values = cav.eval_grid(coeffs.as_ref());
        let back = cav.project_grid(values.as_ref());
        for lm in 0..nb {
            assert!((back[(lm, 0)] - coeffs[(lm, 0)]).abs() < 1e-12);
        }
    }

    #[test]
    fn rejects_charge_count_mismatch() {
        let err = Cavity::new(params(), vec![[0.0; 3]], vec![1.0], vec![]).unwrap_err();
        assert!(matches!(err, GeometryError::ChargeCountMismatch { spheres: 1, charges: 0 }));
    }
}
