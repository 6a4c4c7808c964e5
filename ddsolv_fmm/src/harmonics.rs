/////////////////////////////////////////////////////////////////////////////////////////////
//
// Real spherical harmonics: scaling tables, stable coordinate conversion and recurrences.
//
// Created on: 12 Jun 2026     Author: Daniel Owen
//
// Copyright (c) 2025, Maptek Pty Ltd. All rights reserved. Licensed under the MIT License.
//
/////////////////////////////////////////////////////////////////////////////////////////////

//! Real spherical harmonics: scaling tables, stable coordinate conversion and recurrences.
//!
//! All coefficient vectors in this crate are flat slices of length `(p + 1)^2`
//! holding one real harmonic coefficient per `(l, m)` pair, ordered degree by
//! degree with orders `-l..=l` inside each degree (see [`lm_index`]).
//!
//! The basis is the real, orthonormal one: `Y_l^0` is the zonal harmonic,
//! `Y_l^{+m}` carries `cos(m φ)` and `Y_l^{-m}` carries `sin(m φ)`, both with
//! the `sqrt(2)` factor folded into the normalization so that
//! `∫ Y_l^m Y_l'^m' dΩ = δ δ`. The associated Legendre recurrence below seeds
//! the diagonal with `P_{m+1}^{m+1} = -(2m+1) sinθ P_m^m`, so the
//! Condon-Shortley phase is part of the basis.

use std::f64::consts::PI;

/// Number of coefficients in a degree-`p` expansion.
#[inline(always)]
pub fn nbasis(p: usize) -> usize {
    (p + 1) * (p + 1)
}

/// Flat index of the `(l, m)` coefficient, `-l <= m <= l`.
#[inline(always)]
pub fn lm_index(l: usize, m: i64) -> usize {
    ((l * (l + 1)) as i64 + m) as usize
}

/// Precomputed normalization and coupling tables for a fixed maximum degree.
///
/// Built once per solve and shared read-only across threads; every kernel in
/// this crate takes a reference rather than recomputing square roots in inner
/// loops.
#[derive(Debug, Clone)]
pub struct HarmonicScales {
    pmax: usize,

    /// `vscales[lm(l, |m|)]` multiplies `P_l^{|m|} * trig` to produce the
    /// orthonormal real harmonic. `vscales(l, 0) = sqrt((2l+1)/4π)`; the
    /// `sqrt(2)` for `m != 0` is folded in here.
    pub vscales: Vec<f64>,

    /// `vscales * 4π/(2l+1)`, the combination used by the M2P/L2P kernels.
    pub vscales_rel: Vec<f64>,

    /// `4π/(2l+1)` per degree.
    pub v4pi2lp1: Vec<f64>,

    /// `vfact[n] = sqrt(n!)` for `n <= 2 pmax + 1`.
    pub vfact: Vec<f64>,

    /// Square roots of binomial coefficients, `vcnk[n(n+1)/2 + k] = sqrt(C(n, k))`
    /// for `n <= 2 pmax`, the coupling table of the axial translation theorems.
    pub vcnk: Vec<f64>,
}

impl HarmonicScales {
    /// Builds all tables for expansions up to degree `pmax`.
    pub fn new(pmax: usize) -> Self {
        let nb = nbasis(pmax);
        let mut vscales = vec![0.0; nb];
        let mut vscales_rel = vec![0.0; nb];
        let mut v4pi2lp1 = vec![0.0; pmax + 1];

        for l in 0..=pmax {
            let fl = l as f64;
            let zonal = ((2.0 * fl + 1.0) / (4.0 * PI)).sqrt();
            v4pi2lp1[l] = 4.0 * PI / (2.0 * fl + 1.0);
            let base = l * (l + 1);
            vscales[base] = zonal;
            // Downward order recurrence: divide out sqrt((l-m+1)(l+m)) and put
            // the sqrt(2) of the sine/cosine pair in place.
            let mut tmp = zonal * 2f64.sqrt();
            for m in 1..=l {
                let fm = m as f64;
                tmp /= ((fl - fm + 1.0) * (fl + fm)).sqrt();
                vscales[base + m] = tmp;
                vscales[base - m] = tmp;
            }
            for m in 0..=l {
                vscales_rel[base + m] = vscales[base + m] * v4pi2lp1[l];
                vscales_rel[base - m] = vscales[base + m] * v4pi2lp1[l];
            }
        }

        let nfact = 2 * pmax + 2;
        let mut vfact = vec![0.0; nfact];
        vfact[0] = 1.0;
        for n in 1..nfact {
            vfact[n] = vfact[n - 1] * (n as f64).sqrt();
        }

        let ncnk = (2 * pmax + 1) * (2 * pmax + 2) / 2;
        let mut vcnk = vec![0.0; ncnk];
        for n in 0..=(2 * pmax) {
            for k in 0..=n {
                vcnk[n * (n + 1) / 2 + k] = vfact[n] / (vfact[k] * vfact[n - k]);
            }
        }

        Self { pmax, vscales, vscales_rel, v4pi2lp1, vfact, vcnk }
    }

    /// Maximum expansion degree the tables cover.
    #[inline]
    pub fn pmax(&self) -> usize {
        self.pmax
    }

    /// `sqrt(C(n, k))`, valid for `n <= 2 pmax`.
    #[inline]
    pub fn sqrt_binomial(&self, n: usize, k: usize) -> f64 {
        self.vcnk[n * (n + 1) / 2 + k]
    }

    /// `sqrt((2l+1)/(2k+1))`.
    #[inline]
    pub fn sqrt_degree_ratio(&self, l: usize, k: usize) -> f64 {
        self.vscales[l * (l + 1)] / self.vscales[k * (k + 1)]
    }
}

/// Spherical coordinates of a Cartesian vector, kept in the factored form the
/// recurrences consume.
#[derive(Debug, Clone, Copy)]
pub struct SphCoords {
    pub rho: f64,
    pub ctheta: f64,
    pub stheta: f64,
    pub cphi: f64,
    pub sphi: f64,
}

/// Converts a Cartesian vector to spherical coordinates without forming
/// unscaled sums of squares (overflow-safe for extreme inputs).
///
/// The zero vector yields `rho = 0` with the remaining fields set to the north
/// pole; callers branch on `rho == 0` before using the angles. A vector on the
/// polar axis yields `stheta = 0`, `cphi = 1`, `sphi = 0`.
pub fn cartesian_to_spherical(x: &[f64; 3]) -> SphCoords {
    let amax = x[0].abs().max(x[1].abs()).max(x[2].abs());
    if amax == 0.0 {
        return SphCoords { rho: 0.0, ctheta: 1.0, stheta: 0.0, cphi: 1.0, sphi: 0.0 };
    }
    let sx = x[0] / amax;
    let sy = x[1] / amax;
    let sz = x[2] / amax;
    let rnorm = (sx * sx + sy * sy + sz * sz).sqrt();
    let tnorm = (sx * sx + sy * sy).sqrt();
    let rho = amax * rnorm;
    if tnorm == 0.0 {
        let ctheta = if sz > 0.0 { 1.0 } else { -1.0 };
        return SphCoords { rho, ctheta, stheta: 0.0, cphi: 1.0, sphi: 0.0 };
    }
    SphCoords {
        rho,
        ctheta: sz / rnorm,
        stheta: tnorm / rnorm,
        cphi: sx / tnorm,
        sphi: sy / tnorm,
    }
}

/// Reusable per-thread buffers for basis evaluation.
#[derive(Debug, Clone)]
pub struct BasisWorkspace {
    pub vplm: Vec<f64>,
    pub vcos: Vec<f64>,
    pub vsin: Vec<f64>,
}

impl BasisWorkspace {
    pub fn new(pmax: usize) -> Self {
        Self {
            vplm: vec![0.0; nbasis(pmax)],
            vcos: vec![0.0; pmax + 1],
            vsin: vec![0.0; pmax + 1],
        }
    }
}

/// Fills `vplm[lm(l, m)]` (the `m >= 0` slots) with the associated Legendre
/// values `P_l^m(ctheta)` up to degree `p`.
///
/// Uses the order-diagonal seed `P_{m+1}^{m+1} = -(2m+1) sinθ P_m^m` and the
/// three-term degree recurrence; at the poles (`stheta == 0`) the closed form
/// `P_l^0 = ctheta^l`, `P_l^{m>0} = 0` is used instead.
pub fn legendre_table(ctheta: f64, stheta: f64, p: usize, vplm: &mut [f64]) {
    debug_assert!(vplm.len() >= nbasis(p));
    if stheta == 0.0 {
        vplm[..nbasis(p)].fill(0.0);
        let mut zl = 1.0;
        for l in 0..=p {
            vplm[l * (l + 1)] = zl;
            zl *= ctheta;
        }
        return;
    }
    let mut pmm = 1.0;
    for m in 0..=p {
        vplm[m * (m + 1) + m] = pmm;
        if m == p {
            break;
        }
        let fm = m as f64;
        let mut prev2 = pmm;
        let mut prev1 = (2.0 * fm + 1.0) * ctheta * pmm;
        vplm[(m + 1) * (m + 2) + m] = prev1;
        for l in (m + 2)..=p {
            let fl = l as f64;
            let cur = ((2.0 * fl - 1.0) * ctheta * prev1 - (fl + fm - 1.0) * prev2) / (fl - fm);
            vplm[l * (l + 1) + m] = cur;
            prev2 = prev1;
            prev1 = cur;
        }
        pmm *= -(2.0 * fm + 1.0) * stheta;
    }
}

/// Fills `vcos[m] = cos(m φ)` and `vsin[m] = sin(m φ)` by the angle-addition
/// recurrence; no transcendental calls beyond the inputs.
pub fn trig_table(cphi: f64, sphi: f64, p: usize, vcos: &mut [f64], vsin: &mut [f64]) {
    vcos[0] = 1.0;
    vsin[0] = 0.0;
    for m in 1..=p {
        vcos[m] = vcos[m - 1] * cphi - vsin[m - 1] * sphi;
        vsin[m] = vcos[m - 1] * sphi + vsin[m - 1] * cphi;
    }
}

/// Evaluates all real harmonics `Y_l^m(x / |x|)` up to degree `p` into `vylm`
/// and returns `|x|`.
///
/// For `x = 0` the direction is undefined: the function returns `rho = 0` and
/// leaves `vylm` untouched, so callers must branch on the return value.
pub fn real_harmonics(
    x: &[f64; 3],
    p: usize,
    scales: &HarmonicScales,
    ws: &mut BasisWorkspace,
    vylm: &mut [f64],
) -> f64 {
    let sph = cartesian_to_spherical(x);
    if sph.rho == 0.0 {
        return 0.0;
    }
    legendre_table(sph.ctheta, sph.stheta, p, &mut ws.vplm);
    trig_table(sph.cphi, sph.sphi, p, &mut ws.vcos, &mut ws.vsin);
    for l in 0..=p {
        let base = l * (l + 1);
        vylm[base] = scales.vscales[base] * ws.vplm[base];
        for m in 1..=l {
            let sp = scales.vscales[base + m] * ws.vplm[base + m];
            vylm[base + m] = sp * ws.vcos[m];
            vylm[base - m] = sp * ws.vsin[m];
        }
    }
    sph.rho
}

/// Evaluates all real harmonics and their tangential (spherical surface)
/// gradients at the unit direction `s`.
///
/// `vylm[lm]` receives `Y_l^m(s)` and `vdylm[lm]` the Cartesian components of
/// `∇_S Y_l^m`, the gradient of `Y` along the sphere. At the poles the
/// azimuthal limit is taken analytically: only the `|m| = 1` harmonics carry a
/// nonzero tangential gradient there,
/// `∂_x Y_l^1 = ∂_y Y_l^{-1} = -l(l+1)/2 * vscales(l,1) * ctheta^{l+1}`.
pub fn gradient_basis(
    s: &[f64; 3],
    p: usize,
    scales: &HarmonicScales,
    ws: &mut BasisWorkspace,
    vylm: &mut [f64],
    vdylm: &mut [[f64; 3]],
) {
    let sph = cartesian_to_spherical(s);
    debug_assert!(sph.rho > 0.0);
    legendre_table(sph.ctheta, sph.stheta, p, &mut ws.vplm);

    if sph.stheta == 0.0 {
        vylm[..nbasis(p)].fill(0.0);
        vdylm[..nbasis(p)].fill([0.0; 3]);
        let mut zl = 1.0; // ctheta^l
        for l in 0..=p {
            let base = l * (l + 1);
            vylm[base] = scales.vscales[base] * zl;
            if l >= 1 {
                let fl = l as f64;
                let g = -0.5 * fl * (fl + 1.0) * scales.vscales[base + 1] * zl * sph.ctheta;
                vdylm[base + 1] = [g, 0.0, 0.0];
                vdylm[base - 1] = [0.0, g, 0.0];
            }
            zl *= sph.ctheta;
        }
        return;
    }

    trig_table(sph.cphi, sph.sphi, p, &mut ws.vcos, &mut ws.vsin);
    let et = [sph.ctheta * sph.cphi, sph.ctheta * sph.sphi, -sph.stheta];
    let ep = [-sph.sphi, sph.cphi, 0.0];
    for l in 0..=p {
        let base = l * (l + 1);
        let fl = l as f64;
        for m in 0..=l {
            let fm = m as f64;
            let plm = ws.vplm[base + m];
            // dP_l^m/dθ, valid away from the poles.
            let plm_prev = if l > 0 && m <= l - 1 { ws.vplm[l * (l - 1) + m] } else { 0.0 };
            let dplm = (fl * sph.ctheta * plm - (fl + fm) * plm_prev) / sph.stheta;
            let vs = scales.vscales[base + m];
            let yc = vs * plm * ws.vcos[m];
            let tc = vs * dplm * ws.vcos[m];
            let pc = -vs * plm * fm * ws.vsin[m] / sph.stheta;
            vylm[base + m] = yc;
            vdylm[base + m] = [
                tc * et[0] + pc * ep[0],
                tc * et[1] + pc * ep[1],
                tc * et[2] + pc * ep[2],
            ];
            if m > 0 {
                let ys = vs * plm * ws.vsin[m];
                let ts = vs * dplm * ws.vsin[m];
                let ps = vs * plm * fm * ws.vcos[m] / sph.stheta;
                vylm[base - m] = ys;
                vdylm[base - m] = [
                    ts * et[0] + ps * ep[0],
                    ts * et[1] + ps * ep[1],
                    ts * et[2] + ps * ep[2],
                ];
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lm(l: usize, m: i64) -> usize {
        lm_index(l, m)
    }

    #[test]
    fn index_layout_is_degree_major() {
        assert_eq!(lm(0, 0), 0);
        assert_eq!(lm(1, -1), 1);
        assert_eq!(lm(1, 0), 2);
        assert_eq!(lm(1, 1), 3);
        assert_eq!(lm(2, -2), 4);
        assert_eq!(lm(2, 2), 8);
        assert_eq!(nbasis(3), 16);
    }

    #[test]
    fn zonal_scales_match_closed_form() {
        let scales = HarmonicScales::new(6);
        for l in 0..=6 {
            let expect = ((2.0 * l as f64 + 1.0) / (4.0 * PI)).sqrt();
            assert!((scales.vscales[l * (l + 1)] - expect).abs() < 1e-14);
            assert!((scales.v4pi2lp1[l] - 4.0 * PI / (2.0 * l as f64 + 1.0)).abs() < 1e-14);
        }
    }

    #[test]
    fn sqrt_binomials_match_pascal() {
        let scales = HarmonicScales::new(5);
        assert!((scales.sqrt_binomial(4, 2) - 6f64.sqrt()).abs() < 1e-14);
        assert!((scales.sqrt_binomial(10, 3) - 120f64.sqrt()).abs() < 1e-12);
        assert!((scales.sqrt_binomial(7, 0) - 1.0).abs() < 1e-14);
    }

    #[test]
    fn trig_recurrence_matches_transcendentals() {
        let phi = 0.7345_f64;
        let mut vcos = vec![0.0; 11];
        let mut vsin = vec![0.0; 11];
        trig_table(phi.cos(), phi.sin(), 10, &mut vcos, &mut vsin);
        for m in 0..=10 {
            assert!((vcos[m] - (m as f64 * phi).cos()).abs() < 1e-12);
            assert!((vsin[m] - (m as f64 * phi).sin()).abs() < 1e-12);
        }
    }

    #[test]
    fn legendre_poles_use_closed_form() {
        let mut vplm = vec![0.0; nbasis(5)];
        legendre_table(-1.0, 0.0, 5, &mut vplm);
        for l in 0..=5usize {
            assert_eq!(vplm[l * (l + 1)], if l % 2 == 0 { 1.0 } else { -1.0 });
            for m in 1..=l {
                assert_eq!(vplm[l * (l + 1) + m], 0.0);
            }
        }
    }

    #[test]
    fn degree_one_harmonics_are_scaled_direction() {
        let scales = HarmonicScales::new(3);
        let mut ws = BasisWorkspace::new(3);
        let mut vylm = vec![0.0; nbasis(3)];
        let x = [0.3, -1.2, 0.8];
        let rho = real_harmonics(&x, 3, &scales, &mut ws, &mut vylm);
        assert!((rho - (0.3f64 * 0.3 + 1.2 * 1.2 + 0.8 * 0.8).sqrt()).abs() < 1e-14);
        let c = (3.0 / (4.0 * PI)).sqrt();
        // Y_1^0 ~ z, Y_1^1 ~ -x, Y_1^{-1} ~ -y under the Condon-Shortley seed.
        assert!((vylm[lm(1, 0)] - c * x[2] / rho).abs() < 1e-13);
        assert!((vylm[lm(1, 1)] + c * x[0] / rho).abs() < 1e-13);
        assert!((vylm[lm(1, -1)] + c * x[1] / rho).abs() < 1e-13);
    }

    #[test]
    fn zero_vector_is_signalled_not_evaluated() {
        let scales = HarmonicScales::new(2);
        let mut ws = BasisWorkspace::new(2);
        let mut vylm = vec![7.0; nbasis(2)];
        let rho = real_harmonics(&[0.0; 3], 2, &scales, &mut ws, &mut vylm);
        assert_eq!(rho, 0.0);
        assert!(vylm.iter().all(|&v| v == 7.0));
    }

    #[test]
    fn spherical_conversion_handles_huge_components() {
        let sph = cartesian_to_spherical(&[3e300, 4e300, 0.0]);
        assert!(((sph.rho - 5e300) / 5e300).abs() < 1e-14);
        assert!((sph.cphi - 0.6).abs() < 1e-14);
        assert!((sph.sphi - 0.8).abs() < 1e-14);
        assert_eq!(sph.stheta, 1.0);
    }

    #[test]
    fn gradient_matches_finite_differences() {
        let scales = HarmonicScales::new(5);
        let mut ws = BasisWorkspace::new(5);
        let p = 5;
        let s = {
            let v: [f64; 3] = [0.4, -0.7, 0.59];
            let n = (v[0] * v[0] + v[1] * v[1] + v[2] * v[2]).sqrt();
            [v[0] / n, v[1] / n, v[2] / n]
        };
        let mut vylm = vec![0.0; nbasis(p)];
        let mut vdylm = vec![[0.0; 3]; nbasis(p)];
        gradient_basis(&s, p, &scales, &mut ws, &mut vylm, &mut vdylm);

        let h = 1e-6;
        for axis in 0..3 {
            let mut sp = s;
            sp[axis] += h;
            let np = (sp[0] * sp[0] + sp[1] * sp[1] + sp[2] * sp[2]).sqrt();
            let sp = [sp[0] / np, sp[1] / np, sp[2] / np];
            let mut sm = s;
            sm[axis] -= h;
            let nm = (sm[0] * sm[0] + sm[1] * sm[1] + sm[2] * sm[2]).sqrt();
            let sm = [sm[0] / nm, sm[1] / nm, sm[2] / nm];
            let mut yp = vec![0.0; nbasis(p)];
            let mut ym = vec![0.0; nbasis(p)];
            real_harmonics(&sp, p, &scales, &mut ws, &mut yp);
            real_harmonics(&sm, p, &scales, &mut ws, &mut ym);
            for idx in 0..nbasis(p) {
                // The finite difference steps along the sphere, so it samples
                // the tangential gradient only.
                let fd = (yp[idx] - ym[idx]) / (2.0 * h);
                assert!(
                    (vdylm[idx][axis] - fd).abs() < 5e-5,
                    "axis {axis} idx {idx}: {} vs {}",
                    vdylm[idx][axis],
                    fd
                );
            }
        }
    }

    #[test]
    fn gradient_at_pole_keeps_only_order_one() {
        let scales = HarmonicScales::new(4);
        let mut ws = BasisWorkspace::new(4);
        let mut vylm = vec![0.0; nbasis(4)];
        let mut vdylm = vec![[0.0; 3]; nbasis(4)];
        gradient_basis(&[0.0, 0.0, 1.0], 4, &scales, &mut ws, &mut vylm, &mut vdylm);
        for l in 1..=4usize {
            let base = l * (l + 1);
            let fl = l as f64;
            let expect = -0.5 * fl * (fl + 1.0) * scales.vscales[base + 1];
            assert!((vdylm[base + 1][0] - expect).abs() < 1e-13);
            assert!((vdylm[base - 1][1] - expect).abs() < 1e-13);
            assert_eq!(vdylm[base][0], 0.0);
            assert_eq!(vdylm[base][2], 0.0);
        }
    }
}
