/////////////////////////////////////////////////////////////////////////////////////////////
//
// Angular quadrature rules on the unit sphere.
//
// Created on: 12 Jun 2026     Author: Daniel Owen
//
// Copyright (c) 2025, Maptek Pty Ltd. All rights reserved. Licensed under the MIT License.
//
/////////////////////////////////////////////////////////////////////////////////////////////

//! Angular quadrature rules on the unit sphere.
//!
//! Provides a Gauss-Legendre x uniform-azimuth product rule whose weights sum
//! to `4 pi`. The rule is chosen by polynomial degree: [`SphericalQuadrature::for_degree`]
//! integrates products of two spherical polynomials of that degree exactly,
//! which is what the projection tables in [`crate::geometry`] require.

use std::f64::consts::PI;

/// A fixed set of unit-sphere directions with positive weights summing to
/// `4 pi`.
#[derive(Debug, Clone)]
pub struct SphericalQuadrature {
    points: Vec<[f64; 3]>,
    weights: Vec<f64>,
}

impl SphericalQuadrature {
    /// Product rule with `ntheta` Gauss-Legendre nodes in `cos(theta)` and
    /// `nphi` uniform azimuthal nodes.
    pub fn product(ntheta: usize, nphi: usize) -> Self {
        assert!(ntheta > 0 && nphi > 0, "quadrature sizes must be positive");
        let (nodes, gl_weights) = gauss_legendre(ntheta);
        let mut points = Vec::with_capacity(ntheta * nphi);
        let mut weights = Vec::with_capacity(ntheta * nphi);
        let wphi = 2.0 * PI / nphi as f64;
        for (it, &ct) in nodes.iter().enumerate() {
            let st = (1.0 - ct * ct).max(0.0).sqrt();
            for ip in 0..nphi {
                let phi = wphi * ip as f64;
                points.push([st * phi.cos(), st * phi.sin(), ct]);
                weights.push(gl_weights[it] * wphi);
            }
        }
        Self { points, weights }
    }

    /// Smallest product rule that integrates `f * g` exactly for spherical
    /// polynomials `f`, `g` of degree at most `degree`.
    ///
    /// `degree + 1` polar nodes handle `cos(theta)` polynomials up to degree
    /// `2 degree + 1`; `2 degree + 1` azimuthal nodes resolve every Fourier
    /// mode up to order `2 degree`.
    pub fn for_degree(degree: usize) -> Self {
        Self::product(degree + 1, 2 * degree + 1)
    }

    /// Number of quadrature points.
    #[inline]
    pub fn len(&self) -> usize {
        self.points.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Direction of point `n`.
    #[inline]
    pub fn point(&self, n: usize) -> [f64; 3] {
        self.points[n]
    }

    /// Weight of point `n`.
    #[inline]
    pub fn weight(&self, n: usize) -> f64 {
        self.weights[n]
    }

    /// All directions.
    #[inline]
    pub fn points(&self) -> &[[f64; 3]] {
        &self.points
    }

    /// All weights.
    #[inline]
    pub fn weights(&self) -> &[f64] {
        &self.weights
    }
}

/// Gauss-Legendre nodes and weights on `[-1, 1]`, found by Newton iteration
/// on the Legendre polynomial from the Chebyshev initial guess.
fn gauss_legendre(n: usize) -> (Vec<f64>, Vec<f64>) {
    let mut nodes = vec![0.0; n];
    let mut weights = vec![0.0; n];
    for i in 0..n {
        let mut x = (PI * (i as f64 + 0.75) / (n as f64 + 0.5)).cos();
        let mut dp = 0.0;
        for _ in 0..100 {
            // P_n(x) and its derivative by the three-term recurrence.
            let mut p0 = 1.0;
            let mut p1 = x;
            for k in 2..=n {
                let fk = k as f64;
                let p2 = ((2.0 * fk - 1.0) * x * p1 - (fk - 1.0) * p0) / fk;
                p0 = p1;
                p1 = p2;
            }
            dp = n as f64 * (x * p1 - p0) / (x * x - 1.0);
            let dx = p1 / dp;
            x -= dx;
            if dx.abs() < 1e-15 {
                break;
            }
        }
        nodes[i] = x;
        weights[i] = 2.0 / ((1.0 - x * x) * dp * dp);
    }
    (nodes, weights)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ddsolv_fmm::{nbasis, real_harmonics, BasisWorkspace, HarmonicScales};

    #[test]
    fn weights_sum_to_sphere_area() {
        let quad = SphericalQuadrature::for_degree(6);
        let total: f64 = quad.weights().iter().sum();
        assert!((total - 4.0 * PI).abs() < 1e-12);
    }

    #[test]
    fn gauss_legendre_integrates_monomials() {
        let (nodes, weights) = gauss_legendre(5);
        // Exact for degree <= 9: int x^k = 2/(k+1) for even k, 0 for odd.
        for k in 0..=9usize {
            let num: f64 = nodes
                .iter()
                .zip(&weights)
                .map(|(&x, &w)| w * x.powi(k as i32))
                .sum();
            let exact = if k % 2 == 0 { 2.0 / (k as f64 + 1.0) } else { 0.0 };
            assert!((num - exact).abs() < 1e-13, "k = {k}: {num} vs {exact}");
        }
    }

    #[test]
    fn harmonics_are_discretely_orthonormal() {
        let p = 6;
        let quad = SphericalQuadrature::for_degree(p);
        let scales = HarmonicScales::new(p);
        let mut ws = BasisWorkspace::new(p);
        let nb = nbasis(p);

        let mut gram = vec![0.0; nb * nb];
        let mut vylm = vec![0.0; nb];
        for n in 0..quad.len() {
            let w = quad.weight(n);
            real_harmonics(&quad.point(n), p, &scales, &mut ws, &mut vylm);
            for a in 0..nb {
                for b in 0..nb {
                    gram[a * nb + b] += w * vylm[a] * vylm[b];
                }
            }
        }
        for a in 0..nb {
            for b in 0..nb {
                let exact = if a == b { 1.0 } else { 0.0 };
                assert!(
                    (gram[a * nb + b] - exact).abs() < 1e-12,
                    "gram[{a}][{b}] = {}",
                    gram[a * nb + b]
                );
            }
        }
    }
}
