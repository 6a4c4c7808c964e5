/////////////////////////////////////////////////////////////////////////////////////////////
//
// FMM translation kernels: P2M/M2P/L2P and the M2M/M2L/L2L families with adjoints.
//
// Created on: 12 Jun 2026     Author: Daniel Owen
//
// Copyright (c) 2025, Maptek Pty Ltd. All rights reserved. Licensed under the MIT License.
//
/////////////////////////////////////////////////////////////////////////////////////////////

//! FMM translation kernels: P2M/M2P/L2P and the M2M/M2L/L2L families with adjoints.
//!
//! Expansions are stored in radius-scaled form. A multipole expansion of
//! degree `pm` on a sphere of radius `r` reproduces the potential of its
//! sources at any exterior point `x` (relative position `c`, `ρ = |c|`) as
//!
//! ```text
//! v(x) = Σ_lm  4π/(2l+1) * (r/ρ)^(l+1) * M_lm * Y_lm(c/ρ)
//! ```
//!
//! and a local expansion of degree `pl` reproduces the far potential inside
//! its sphere as
//!
//! ```text
//! v(x) = Σ_lm  4π/(2l+1) * (ρ/r)^l * L_lm * Y_lm(c/ρ)
//! ```
//!
//! The radius scaling keeps every translation a function of radius *ratios*,
//! so extreme geometries neither overflow nor underflow the power chains.
//!
//! The degree-mixing translations (M2M, M2L, L2L) decompose into a rotation
//! bringing the translation axis onto `+z`, a closed-form axial translation,
//! and the inverse rotation; the axial forms couple orders independently
//! through the square-root-binomial table. Same-center translations reduce to
//! diagonal radius rescalings and translations along `±z` skip the rotations
//! entirely.
//!
//! Every kernel follows the BLAS-style contract
//! `dst <- beta*dst + alpha*op(src)`; with `beta == 0` the destination is
//! never read, so uninitialized or NaN storage is safe to overwrite.
//!
//! M2L requires strictly separated centers: translating between coincident
//! centers has no convergent expansion and trips an assertion rather than an
//! error path, since the tree construction guarantees separation.

use crate::harmonics::{
    cartesian_to_spherical, lm_index, nbasis, BasisWorkspace, HarmonicScales,
};
use crate::rotations::{
    rotate_about_z, rotate_about_z_adj, transform_oxz, RotationScratch,
};

/// Scratch buffers for the rotation-based translation wrappers. One instance
/// per thread; sized by the largest expansion degree in play.
#[derive(Debug, Clone)]
pub struct TranslationScratch {
    tmp1: Vec<f64>,
    tmp2: Vec<f64>,
    rot: RotationScratch,
}

impl TranslationScratch {
    pub fn new(pmax: usize) -> Self {
        Self {
            tmp1: vec![0.0; nbasis(pmax)],
            tmp2: vec![0.0; nbasis(pmax)],
            rot: RotationScratch::new(pmax),
        }
    }
}

#[inline(always)]
fn combine(beta: f64, dst: &mut f64, val: f64) {
    if beta == 0.0 {
        *dst = val;
    } else {
        *dst = beta * *dst + val;
    }
}

#[inline(always)]
fn scale_tail(beta: f64, dst: &mut [f64]) {
    if beta == 0.0 {
        dst.fill(0.0);
    } else if beta != 1.0 {
        for v in dst {
            *v *= beta;
        }
    }
}

// ---------------------------------------------------------------------------
// Particle kernels.
// ---------------------------------------------------------------------------

/// Accumulates the multipole expansion of a point charge `src_q` at relative
/// position `c` onto the sphere of radius `dst_r`:
/// `M_lm += q * ρ^l / r^(l+1) * Y_lm(c/ρ)`.
///
/// A charge at the expansion center contributes to the monopole term only.
#[allow(clippy::too_many_arguments)]
pub fn p2m(
    c: &[f64; 3],
    src_q: f64,
    dst_r: f64,
    p: usize,
    scales: &HarmonicScales,
    ws: &mut BasisWorkspace,
    alpha: f64,
    beta: f64,
    dst: &mut [f64],
) {
    let sph = cartesian_to_spherical(c);
    if sph.rho == 0.0 {
        combine(beta, &mut dst[0], alpha * src_q / dst_r * scales.vscales[0]);
        scale_tail(beta, &mut dst[1..nbasis(p)]);
        return;
    }
    crate::harmonics::legendre_table(sph.ctheta, sph.stheta, p, &mut ws.vplm);
    crate::harmonics::trig_table(sph.cphi, sph.sphi, p, &mut ws.vcos, &mut ws.vsin);
    let rcoef = sph.rho / dst_r;
    let mut t = alpha * src_q / dst_r;
    for l in 0..=p {
        let base = l * (l + 1);
        combine(beta, &mut dst[base], t * scales.vscales[base] * ws.vplm[base]);
        for m in 1..=l {
            let sp = t * scales.vscales[base + m] * ws.vplm[base + m];
            combine(beta, &mut dst[base + m], sp * ws.vcos[m]);
            combine(beta, &mut dst[base - m], sp * ws.vsin[m]);
        }
        t *= rcoef;
    }
}

/// Evaluates a multipole expansion at the exterior point `c` (relative to the
/// expansion center): `dst <- beta*dst + alpha * v(c)`.
///
/// The expansion center itself has no defined value; `ρ == 0` contributes
/// nothing beyond the `beta` scaling.
#[allow(clippy::too_many_arguments)]
pub fn m2p(
    c: &[f64; 3],
    src_r: f64,
    p: usize,
    scales: &HarmonicScales,
    ws: &mut BasisWorkspace,
    alpha: f64,
    src: &[f64],
    beta: f64,
    dst: &mut f64,
) {
    let sph = cartesian_to_spherical(c);
    if sph.rho == 0.0 {
        combine(beta, dst, 0.0);
        return;
    }
    crate::harmonics::legendre_table(sph.ctheta, sph.stheta, p, &mut ws.vplm);
    crate::harmonics::trig_table(sph.cphi, sph.sphi, p, &mut ws.vcos, &mut ws.vsin);
    let rcoef = src_r / sph.rho;
    let mut t = rcoef;
    let mut acc = 0.0;
    for l in 0..=p {
        let base = l * (l + 1);
        let mut deg = src[base] * scales.vscales_rel[base] * ws.vplm[base];
        for m in 1..=l {
            let sp = scales.vscales_rel[base + m] * ws.vplm[base + m];
            deg += sp * (src[base + m] * ws.vcos[m] + src[base - m] * ws.vsin[m]);
        }
        acc += t * deg;
        t *= rcoef;
    }
    combine(beta, dst, alpha * acc);
}

/// Adjoint of [`m2p`]: spreads a point weight `src_q` at `c` onto the dual
/// multipole coefficients of the sphere of radius `dst_r`.
#[allow(clippy::too_many_arguments)]
pub fn m2p_adj(
    c: &[f64; 3],
    src_q: f64,
    dst_r: f64,
    p: usize,
    scales: &HarmonicScales,
    ws: &mut BasisWorkspace,
    alpha: f64,
    beta: f64,
    dst: &mut [f64],
) {
    let sph = cartesian_to_spherical(c);
    if sph.rho == 0.0 {
        scale_tail(beta, &mut dst[..nbasis(p)]);
        return;
    }
    crate::harmonics::legendre_table(sph.ctheta, sph.stheta, p, &mut ws.vplm);
    crate::harmonics::trig_table(sph.cphi, sph.sphi, p, &mut ws.vcos, &mut ws.vsin);
    let rcoef = dst_r / sph.rho;
    let mut t = alpha * src_q * rcoef;
    for l in 0..=p {
        let base = l * (l + 1);
        combine(beta, &mut dst[base], t * scales.vscales_rel[base] * ws.vplm[base]);
        for m in 1..=l {
            let sp = t * scales.vscales_rel[base + m] * ws.vplm[base + m];
            combine(beta, &mut dst[base + m], sp * ws.vcos[m]);
            combine(beta, &mut dst[base - m], sp * ws.vsin[m]);
        }
        t *= rcoef;
    }
}

/// Evaluates a local expansion at the interior point `c` (relative to the
/// expansion center). Well defined at the center itself, where only the
/// monopole term survives.
#[allow(clippy::too_many_arguments)]
pub fn l2p(
    c: &[f64; 3],
    src_r: f64,
    p: usize,
    scales: &HarmonicScales,
    ws: &mut BasisWorkspace,
    alpha: f64,
    src: &[f64],
    beta: f64,
    dst: &mut f64,
) {
    let sph = cartesian_to_spherical(c);
    if sph.rho == 0.0 {
        combine(beta, dst, alpha * src[0] * scales.vscales_rel[0]);
        return;
    }
    crate::harmonics::legendre_table(sph.ctheta, sph.stheta, p, &mut ws.vplm);
    crate::harmonics::trig_table(sph.cphi, sph.sphi, p, &mut ws.vcos, &mut ws.vsin);
    let rcoef = sph.rho / src_r;
    let mut t = 1.0;
    let mut acc = 0.0;
    for l in 0..=p {
        let base = l * (l + 1);
        let mut deg = src[base] * scales.vscales_rel[base] * ws.vplm[base];
        for m in 1..=l {
            let sp = scales.vscales_rel[base + m] * ws.vplm[base + m];
            deg += sp * (src[base + m] * ws.vcos[m] + src[base - m] * ws.vsin[m]);
        }
        acc += t * deg;
        t *= rcoef;
    }
    combine(beta, dst, alpha * acc);
}

/// Adjoint of [`l2p`]: spreads a point weight at `c` onto the dual local
/// coefficients of the sphere of radius `dst_r`.
#[allow(clippy::too_many_arguments)]
pub fn l2p_adj(
    c: &[f64; 3],
    src_q: f64,
    dst_r: f64,
    p: usize,
    scales: &HarmonicScales,
    ws: &mut BasisWorkspace,
    alpha: f64,
    beta: f64,
    dst: &mut [f64],
) {
    let sph = cartesian_to_spherical(c);
    if sph.rho == 0.0 {
        combine(beta, &mut dst[0], alpha * src_q * scales.vscales_rel[0]);
        scale_tail(beta, &mut dst[1..nbasis(p)]);
        return;
    }
    crate::harmonics::legendre_table(sph.ctheta, sph.stheta, p, &mut ws.vplm);
    crate::harmonics::trig_table(sph.cphi, sph.sphi, p, &mut ws.vcos, &mut ws.vsin);
    let rcoef = sph.rho / dst_r;
    let mut t = alpha * src_q;
    for l in 0..=p {
        let base = l * (l + 1);
        combine(beta, &mut dst[base], t * scales.vscales_rel[base] * ws.vplm[base]);
        for m in 1..=l {
            let sp = t * scales.vscales_rel[base + m] * ws.vplm[base + m];
            combine(beta, &mut dst[base + m], sp * ws.vcos[m]);
            combine(beta, &mut dst[base - m], sp * ws.vsin[m]);
        }
        t *= rcoef;
    }
}

// ---------------------------------------------------------------------------
// Axial (z-aligned) expansion translations.
// ---------------------------------------------------------------------------

/// Same-center M2M: a pure radius rescale, `M'_lm = (r_src/r_dst)^(l+1) M_lm`.
pub fn m2m_scale(
    src_r: f64,
    dst_r: f64,
    p: usize,
    alpha: f64,
    src: &[f64],
    beta: f64,
    dst: &mut [f64],
) {
    let ratio = src_r / dst_r;
    let mut t = alpha * ratio;
    for l in 0..=p {
        let base = l * (l + 1);
        for m in -(l as i64)..=(l as i64) {
            let idx = (base as i64 + m) as usize;
            combine(beta, &mut dst[idx], t * src[idx]);
        }
        t *= ratio;
    }
}

/// Same-center L2L: `L'_lm = (r_dst/r_src)^l L_lm`.
pub fn l2l_scale(
    src_r: f64,
    dst_r: f64,
    p: usize,
    alpha: f64,
    src: &[f64],
    beta: f64,
    dst: &mut [f64],
) {
    let ratio = dst_r / src_r;
    let mut t = alpha;
    for l in 0..=p {
        let base = l * (l + 1);
        for m in -(l as i64)..=(l as i64) {
            let idx = (base as i64 + m) as usize;
            combine(beta, &mut dst[idx], t * src[idx]);
        }
        t *= ratio;
    }
}

/// M2M along the polar axis. `z` is the source center's position relative to
/// the destination center (signed; any value including zero is valid since
/// the translated series is polynomial in `z`):
///
/// ```text
/// M'_lm = Σ_{λ=|m|}^{l} sqrt(C(l+m, λ+m) C(l-m, λ-m)) sqrt((2l+1)/(2λ+1))
///         * z^(l-λ) r_src^(λ+1) / r_dst^(l+1) * M_λm
/// ```
#[allow(clippy::too_many_arguments)]
pub fn m2m_ztranslate(
    z: f64,
    src_r: f64,
    dst_r: f64,
    p: usize,
    scales: &HarmonicScales,
    alpha: f64,
    src: &[f64],
    beta: f64,
    dst: &mut [f64],
) {
    let r1 = src_r / dst_r;
    let r2 = z / dst_r;
    let mut pow1 = vec![0.0; p + 1];
    let mut pow2 = vec![0.0; p + 1];
    pow1[0] = r1;
    pow2[0] = 1.0;
    for k in 1..=p {
        pow1[k] = pow1[k - 1] * r1;
        pow2[k] = pow2[k - 1] * r2;
    }
    for m in 0..=p {
        for l in m..=p {
            let mut acc_c = 0.0;
            let mut acc_s = 0.0;
            for lam in m..=l {
                let coef = scales.sqrt_binomial(l + m, lam + m)
                    * scales.sqrt_binomial(l - m, lam - m)
                    * scales.sqrt_degree_ratio(l, lam)
                    * pow1[lam]
                    * pow2[l - lam];
                let base = lam * (lam + 1);
                acc_c += coef * src[base + m];
                if m > 0 {
                    acc_s += coef * src[base - m];
                }
            }
            let base = l * (l + 1);
            combine(beta, &mut dst[base + m], alpha * acc_c);
            if m > 0 {
                combine(beta, &mut dst[base - m], alpha * acc_s);
            }
        }
    }
}

/// Adjoint of [`m2m_ztranslate`] with the same geometric parameters: maps a
/// dual vector on the forward destination back to the forward source.
#[allow(clippy::too_many_arguments)]
pub fn m2m_ztranslate_adj(
    z: f64,
    src_r: f64,
    dst_r: f64,
    p: usize,
    scales: &HarmonicScales,
    alpha: f64,
    src: &[f64],
    beta: f64,
    dst: &mut [f64],
) {
    let r1 = src_r / dst_r;
    let r2 = z / dst_r;
    let mut pow1 = vec![0.0; p + 1];
    let mut pow2 = vec![0.0; p + 1];
    pow1[0] = r1;
    pow2[0] = 1.0;
    for k in 1..=p {
        pow1[k] = pow1[k - 1] * r1;
        pow2[k] = pow2[k - 1] * r2;
    }
    for m in 0..=p {
        for lam in m..=p {
            let mut acc_c = 0.0;
            let mut acc_s = 0.0;
            for l in lam..=p {
                let coef = scales.sqrt_binomial(l + m, lam + m)
                    * scales.sqrt_binomial(l - m, lam - m)
                    * scales.sqrt_degree_ratio(l, lam)
                    * pow1[lam]
                    * pow2[l - lam];
                let base = l * (l + 1);
                acc_c += coef * src[base + m];
                if m > 0 {
                    acc_s += coef * src[base - m];
                }
            }
            let base = lam * (lam + 1);
            combine(beta, &mut dst[base + m], alpha * acc_c);
            if m > 0 {
                combine(beta, &mut dst[base - m], alpha * acc_s);
            }
        }
    }
}

/// L2L along the polar axis; `z` is again the source center relative to the
/// destination center:
///
/// ```text
/// L'_λm = Σ_{l=λ}^{p} sqrt(C(l+m, λ+m) C(l-m, λ-m)) sqrt((2λ+1)/(2l+1))
///         * (-z)^(l-λ) r_dst^λ / r_src^l * L_lm
/// ```
#[allow(clippy::too_many_arguments)]
pub fn l2l_ztranslate(
    z: f64,
    src_r: f64,
    dst_r: f64,
    p: usize,
    scales: &HarmonicScales,
    alpha: f64,
    src: &[f64],
    beta: f64,
    dst: &mut [f64],
) {
    let r1 = -z / src_r;
    let r2 = dst_r / src_r;
    let mut pow1 = vec![0.0; p + 1];
    let mut pow2 = vec![0.0; p + 1];
    pow1[0] = 1.0;
    pow2[0] = 1.0;
    for k in 1..=p {
        pow1[k] = pow1[k - 1] * r1;
        pow2[k] = pow2[k - 1] * r2;
    }
    for m in 0..=p {
        for lam in m..=p {
            let mut acc_c = 0.0;
            let mut acc_s = 0.0;
            for l in lam..=p {
                let coef = scales.sqrt_binomial(l + m, lam + m)
                    * scales.sqrt_binomial(l - m, lam - m)
                    * scales.sqrt_degree_ratio(lam, l)
                    * pow2[lam]
                    * pow1[l - lam];
                let base = l * (l + 1);
                acc_c += coef * src[base + m];
                if m > 0 {
                    acc_s += coef * src[base - m];
                }
            }
            let base = lam * (lam + 1);
            combine(beta, &mut dst[base + m], alpha * acc_c);
            if m > 0 {
                combine(beta, &mut dst[base - m], alpha * acc_s);
            }
        }
    }
}

/// Adjoint of [`l2l_ztranslate`] with the same geometric parameters.
#[allow(clippy::too_many_arguments)]
pub fn l2l_ztranslate_adj(
    z: f64,
    src_r: f64,
    dst_r: f64,
    p: usize,
    scales: &HarmonicScales,
    alpha: f64,
    src: &[f64],
    beta: f64,
    dst: &mut [f64],
) {
    let r1 = -z / src_r;
    let r2 = dst_r / src_r;
    let mut pow1 = vec![0.0; p + 1];
    let mut pow2 = vec![0.0; p + 1];
    pow1[0] = 1.0;
    pow2[0] = 1.0;
    for k in 1..=p {
        pow1[k] = pow1[k - 1] * r1;
        pow2[k] = pow2[k - 1] * r2;
    }
    for m in 0..=p {
        for l in m..=p {
            let mut acc_c = 0.0;
            let mut acc_s = 0.0;
            for lam in m..=l {
                let coef = scales.sqrt_binomial(l + m, lam + m)
                    * scales.sqrt_binomial(l - m, lam - m)
                    * scales.sqrt_degree_ratio(lam, l)
                    * pow2[lam]
                    * pow1[l - lam];
                let base = lam * (lam + 1);
                acc_c += coef * src[base + m];
                if m > 0 {
                    acc_s += coef * src[base - m];
                }
            }
            let base = l * (l + 1);
            combine(beta, &mut dst[base + m], alpha * acc_c);
            if m > 0 {
                combine(beta, &mut dst[base - m], alpha * acc_s);
            }
        }
    }
}

/// Precomputes the order-indexed M2L axial coupling table.
///
/// Layout: `coefs[(m*(pl+1) + j)*(pm+1) + n]` couples source degree `n` of
/// order `m` to destination degree `j` of the same order. Entries outside
/// `m <= j <= pl`, `m <= n <= pm` are left untouched.
///
/// `z` must be nonzero; coincident or unseparated centers violate the far
/// field contract and abort.
pub fn m2l_ztranslate_coeffs(
    z: f64,
    src_r: f64,
    dst_r: f64,
    pm: usize,
    pl: usize,
    scales: &HarmonicScales,
    coefs: &mut [f64],
) {
    assert!(z != 0.0, "M2L translation requires separated centers");
    let t = z.abs();
    let mut pow1 = vec![0.0; pm + 1];
    let mut pow2 = vec![0.0; pl + 1];
    pow1[0] = src_r / t;
    pow2[0] = 1.0;
    for n in 1..=pm {
        pow1[n] = pow1[n - 1] * (src_r / t);
    }
    for j in 1..=pl {
        pow2[j] = pow2[j - 1] * (dst_r / t);
    }
    let mmax = pm.min(pl);
    for m in 0..=mmax {
        for j in m..=pl {
            for n in m..=pm {
                // Sources above the target alternate with the source degree,
                // sources below with the target degree.
                let phase = if z > 0.0 {
                    if n % 2 == 0 { 1.0 } else { -1.0 }
                } else if j % 2 == 0 {
                    1.0
                } else {
                    -1.0
                };
                coefs[(m * (pl + 1) + j) * (pm + 1) + n] = phase
                    * scales.sqrt_binomial(j + n, n - m)
                    * scales.sqrt_binomial(j + n, n + m)
                    * scales.sqrt_degree_ratio(j, n)
                    * pow1[n]
                    * pow2[j];
            }
        }
    }
}

/// M2L along the polar axis: converts a multipole expansion of degree `pm`
/// into a local expansion of degree `pl` about a center separated by `z`.
///
/// The source coefficients are regathered by order so each order applies its
/// precomputed coupling block contiguously.
#[allow(clippy::too_many_arguments)]
pub fn m2l_ztranslate(
    z: f64,
    src_r: f64,
    dst_r: f64,
    pm: usize,
    pl: usize,
    scales: &HarmonicScales,
    alpha: f64,
    src: &[f64],
    beta: f64,
    dst: &mut [f64],
) {
    let mmax = pm.min(pl);
    let mut coefs = vec![0.0; (mmax + 1) * (pl + 1) * (pm + 1)];
    m2l_ztranslate_coeffs(z, src_r, dst_r, pm, pl, scales, &mut coefs);

    let mut ord_c = vec![0.0; pm + 1];
    let mut ord_s = vec![0.0; pm + 1];
    for m in 0..=mmax {
        for n in m..=pm {
            let base = n * (n + 1);
            ord_c[n] = src[base + m];
            if m > 0 {
                ord_s[n] = src[base - m];
            }
        }
        for j in m..=pl {
            let row = (m * (pl + 1) + j) * (pm + 1);
            let mut acc_c = 0.0;
            let mut acc_s = 0.0;
            for n in m..=pm {
                let c = coefs[row + n];
                acc_c += c * ord_c[n];
                if m > 0 {
                    acc_s += c * ord_s[n];
                }
            }
            let base = j * (j + 1);
            combine(beta, &mut dst[base + m], alpha * acc_c);
            if m > 0 {
                combine(beta, &mut dst[base - m], alpha * acc_s);
            }
        }
    }
    // Destination orders beyond the source truncation receive no coupling.
    for j in (mmax + 1)..=pl {
        let base = j * (j + 1);
        for m in (mmax as i64 + 1)..=(j as i64) {
            combine(beta, &mut dst[(base as i64 + m) as usize], 0.0);
            combine(beta, &mut dst[(base as i64 - m) as usize], 0.0);
        }
    }
}

/// Adjoint of [`m2l_ztranslate`] with the same geometric parameters: maps a
/// dual local vector of degree `pl` to a dual multipole vector of degree `pm`.
#[allow(clippy::too_many_arguments)]
pub fn m2l_ztranslate_adj(
    z: f64,
    src_r: f64,
    dst_r: f64,
    pm: usize,
    pl: usize,
    scales: &HarmonicScales,
    alpha: f64,
    src: &[f64],
    beta: f64,
    dst: &mut [f64],
) {
    let mmax = pm.min(pl);
    let mut coefs = vec![0.0; (mmax + 1) * (pl + 1) * (pm + 1)];
    m2l_ztranslate_coeffs(z, src_r, dst_r, pm, pl, scales, &mut coefs);

    let mut ord_c = vec![0.0; pl + 1];
    let mut ord_s = vec![0.0; pl + 1];
    for m in 0..=mmax {
        for j in m..=pl {
            let base = j * (j + 1);
            ord_c[j] = src[base + m];
            if m > 0 {
                ord_s[j] = src[base - m];
            }
        }
        for n in m..=pm {
            let mut acc_c = 0.0;
            let mut acc_s = 0.0;
            for j in m..=pl {
                let c = coefs[(m * (pl + 1) + j) * (pm + 1) + n];
                acc_c += c * ord_c[j];
                if m > 0 {
                    acc_s += c * ord_s[j];
                }
            }
            let base = n * (n + 1);
            combine(beta, &mut dst[base + m], alpha * acc_c);
            if m > 0 {
                combine(beta, &mut dst[base - m], alpha * acc_s);
            }
        }
    }
    for n in (mmax + 1)..=pm {
        let base = n * (n + 1);
        for m in (mmax as i64 + 1)..=(n as i64) {
            combine(beta, &mut dst[(base as i64 + m) as usize], 0.0);
            combine(beta, &mut dst[(base as i64 - m) as usize], 0.0);
        }
    }
}

// ---------------------------------------------------------------------------
// General translations: rotate, translate along z, rotate back.
// ---------------------------------------------------------------------------

/// M2M between arbitrary centers. `c` is the source center relative to the
/// destination center.
#[allow(clippy::too_many_arguments)]
pub fn m2m_rotation(
    c: &[f64; 3],
    src_r: f64,
    dst_r: f64,
    p: usize,
    scales: &HarmonicScales,
    ws: &mut TranslationScratch,
    alpha: f64,
    src: &[f64],
    beta: f64,
    dst: &mut [f64],
) {
    let sph = cartesian_to_spherical(c);
    if sph.rho == 0.0 {
        m2m_scale(src_r, dst_r, p, alpha, src, beta, dst);
        return;
    }
    if c[0] == 0.0 && c[1] == 0.0 {
        m2m_ztranslate(c[2], src_r, dst_r, p, scales, alpha, src, beta, dst);
        return;
    }
    let TranslationScratch { tmp1, tmp2, rot } = ws;
    rotate_about_z(p, sph.cphi, sph.sphi, 1.0, src, 0.0, tmp1);
    transform_oxz(p, sph.ctheta, sph.stheta, 1.0, tmp1, 0.0, tmp2, rot);
    m2m_ztranslate(sph.rho, src_r, dst_r, p, scales, 1.0, tmp2, 0.0, tmp1);
    transform_oxz(p, sph.ctheta, -sph.stheta, 1.0, tmp1, 0.0, tmp2, rot);
    rotate_about_z_adj(p, sph.cphi, sph.sphi, alpha, tmp2, beta, dst);
}

/// Adjoint of [`m2m_rotation`] with the same geometric parameters. Rotations
/// are orthogonal, so only the axial step is transposed.
#[allow(clippy::too_many_arguments)]
pub fn m2m_rotation_adj(
    c: &[f64; 3],
    src_r: f64,
    dst_r: f64,
    p: usize,
    scales: &HarmonicScales,
    ws: &mut TranslationScratch,
    alpha: f64,
    src: &[f64],
    beta: f64,
    dst: &mut [f64],
) {
    let sph = cartesian_to_spherical(c);
    if sph.rho == 0.0 {
        m2m_scale(src_r, dst_r, p, alpha, src, beta, dst);
        return;
    }
    if c[0] == 0.0 && c[1] == 0.0 {
        m2m_ztranslate_adj(c[2], src_r, dst_r, p, scales, alpha, src, beta, dst);
        return;
    }
    let TranslationScratch { tmp1, tmp2, rot } = ws;
    rotate_about_z(p, sph.cphi, sph.sphi, 1.0, src, 0.0, tmp1);
    transform_oxz(p, sph.ctheta, sph.stheta, 1.0, tmp1, 0.0, tmp2, rot);
    m2m_ztranslate_adj(sph.rho, src_r, dst_r, p, scales, 1.0, tmp2, 0.0, tmp1);
    transform_oxz(p, sph.ctheta, -sph.stheta, 1.0, tmp1, 0.0, tmp2, rot);
    rotate_about_z_adj(p, sph.cphi, sph.sphi, alpha, tmp2, beta, dst);
}

/// L2L between arbitrary centers; `c` is the source center relative to the
/// destination center.
#[allow(clippy::too_many_arguments)]
pub fn l2l_rotation(
    c: &[f64; 3],
    src_r: f64,
    dst_r: f64,
    p: usize,
    scales: &HarmonicScales,
    ws: &mut TranslationScratch,
    alpha: f64,
    src: &[f64],
    beta: f64,
    dst: &mut [f64],
) {
    let sph = cartesian_to_spherical(c);
    if sph.rho == 0.0 {
        l2l_scale(src_r, dst_r, p, alpha, src, beta, dst);
        return;
    }
    if c[0] == 0.0 && c[1] == 0.0 {
        l2l_ztranslate(c[2], src_r, dst_r, p, scales, alpha, src, beta, dst);
        return;
    }
    let TranslationScratch { tmp1, tmp2, rot } = ws;
    rotate_about_z(p, sph.cphi, sph.sphi, 1.0, src, 0.0, tmp1);
    transform_oxz(p, sph.ctheta, sph.stheta, 1.0, tmp1, 0.0, tmp2, rot);
    l2l_ztranslate(sph.rho, src_r, dst_r, p, scales, 1.0, tmp2, 0.0, tmp1);
    transform_oxz(p, sph.ctheta, -sph.stheta, 1.0, tmp1, 0.0, tmp2, rot);
    rotate_about_z_adj(p, sph.cphi, sph.sphi, alpha, tmp2, beta, dst);
}

/// Adjoint of [`l2l_rotation`] with the same geometric parameters.
#[allow(clippy::too_many_arguments)]
pub fn l2l_rotation_adj(
    c: &[f64; 3],
    src_r: f64,
    dst_r: f64,
    p: usize,
    scales: &HarmonicScales,
    ws: &mut TranslationScratch,
    alpha: f64,
    src: &[f64],
    beta: f64,
    dst: &mut [f64],
) {
    let sph = cartesian_to_spherical(c);
    if sph.rho == 0.0 {
        l2l_scale(src_r, dst_r, p, alpha, src, beta, dst);
        return;
    }
    if c[0] == 0.0 && c[1] == 0.0 {
        l2l_ztranslate_adj(c[2], src_r, dst_r, p, scales, alpha, src, beta, dst);
        return;
    }
    let TranslationScratch { tmp1, tmp2, rot } = ws;
    rotate_about_z(p, sph.cphi, sph.sphi, 1.0, src, 0.0, tmp1);
    transform_oxz(p, sph.ctheta, sph.stheta, 1.0, tmp1, 0.0, tmp2, rot);
    l2l_ztranslate_adj(sph.rho, src_r, dst_r, p, scales, 1.0, tmp2, 0.0, tmp1);
    transform_oxz(p, sph.ctheta, -sph.stheta, 1.0, tmp1, 0.0, tmp2, rot);
    rotate_about_z_adj(p, sph.cphi, sph.sphi, alpha, tmp2, beta, dst);
}

/// M2L between separated centers; `c` is the source center relative to the
/// destination center and must be nonzero.
#[allow(clippy::too_many_arguments)]
pub fn m2l_rotation(
    c: &[f64; 3],
    src_r: f64,
    dst_r: f64,
    pm: usize,
    pl: usize,
    scales: &HarmonicScales,
    ws: &mut TranslationScratch,
    alpha: f64,
    src: &[f64],
    beta: f64,
    dst: &mut [f64],
) {
    let sph = cartesian_to_spherical(c);
    assert!(sph.rho != 0.0, "M2L translation requires separated centers");
    if c[0] == 0.0 && c[1] == 0.0 {
        m2l_ztranslate(c[2], src_r, dst_r, pm, pl, scales, alpha, src, beta, dst);
        return;
    }
    let TranslationScratch { tmp1, tmp2, rot } = ws;
    rotate_about_z(pm, sph.cphi, sph.sphi, 1.0, src, 0.0, tmp1);
    transform_oxz(pm, sph.ctheta, sph.stheta, 1.0, tmp1, 0.0, tmp2, rot);
    m2l_ztranslate(sph.rho, src_r, dst_r, pm, pl, scales, 1.0, tmp2, 0.0, tmp1);
    transform_oxz(pl, sph.ctheta, -sph.stheta, 1.0, tmp1, 0.0, tmp2, rot);
    rotate_about_z_adj(pl, sph.cphi, sph.sphi, alpha, tmp2, beta, dst);
}

/// Adjoint of [`m2l_rotation`] with the same geometric parameters: maps a
/// dual local vector of degree `pl` to a dual multipole vector of degree `pm`.
#[allow(clippy::too_many_arguments)]
pub fn m2l_rotation_adj(
    c: &[f64; 3],
    src_r: f64,
    dst_r: f64,
    pm: usize,
    pl: usize,
    scales: &HarmonicScales,
    ws: &mut TranslationScratch,
    alpha: f64,
    src: &[f64],
    beta: f64,
    dst: &mut [f64],
) {
    let sph = cartesian_to_spherical(c);
    assert!(sph.rho != 0.0, "M2L translation requires separated centers");
    if c[0] == 0.0 && c[1] == 0.0 {
        m2l_ztranslate_adj(c[2], src_r, dst_r, pm, pl, scales, alpha, src, beta, dst);
        return;
    }
    let TranslationScratch { tmp1, tmp2, rot } = ws;
    rotate_about_z(pl, sph.cphi, sph.sphi, 1.0, src, 0.0, tmp1);
    transform_oxz(pl, sph.ctheta, sph.stheta, 1.0, tmp1, 0.0, tmp2, rot);
    m2l_ztranslate_adj(sph.rho, src_r, dst_r, pm, pl, scales, 1.0, tmp2, 0.0, tmp1);
    transform_oxz(pm, sph.ctheta, -sph.stheta, 1.0, tmp1, 0.0, tmp2, rot);
    rotate_about_z_adj(pm, sph.cphi, sph.sphi, alpha, tmp2, beta, dst);
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn direct_potential(charges: &[(f64, [f64; 3])], x: &[f64; 3]) -> f64 {
        charges
            .iter()
            .map(|(q, c)| {
                let d = [x[0] - c[0], x[1] - c[1], x[2] - c[2]];
                q / (d[0] * d[0] + d[1] * d[1] + d[2] * d[2]).sqrt()
            })
            .sum()
    }

    fn random_unit_ball(rng: &mut StdRng, scale: f64) -> [f64; 3] {
        loop {
            let v = [
                rng.random_range(-1.0..1.0),
                rng.random_range(-1.0..1.0),
                rng.random_range(-1.0..1.0),
            ];
            if v[0] * v[0] + v[1] * v[1] + v[2] * v[2] < 1.0 {
                return [v[0] * scale, v[1] * scale, v[2] * scale];
            }
        }
    }

    fn sub(a: &[f64; 3], b: &[f64; 3]) -> [f64; 3] {
        [a[0] - b[0], a[1] - b[1], a[2] - b[2]]
    }

    #[test]
    fn p2m_then_m2p_reproduces_coulomb() {
        let p = 20;
        let scales = HarmonicScales::new(p);
        let mut bws = BasisWorkspace::new(p);
        let mut rng = StdRng::seed_from_u64(42);
        let center = [0.4, -0.2, 0.1];
        let radius = 1.0;
        let charges: Vec<(f64, [f64; 3])> = (0..12)
            .map(|_| {
                let off = random_unit_ball(&mut rng, 0.9);
                (
                    rng.random_range(-1.0..1.0),
                    [center[0] + off[0], center[1] + off[1], center[2] + off[2]],
                )
            })
            .collect();
        let mut mp = vec![0.0; nbasis(p)];
        for (k, (q, pos)) in charges.iter().enumerate() {
            let beta = if k == 0 { 0.0 } else { 1.0 };
            p2m(&sub(pos, &center), *q, radius, p, &scales, &mut bws, 1.0, beta, &mut mp);
        }
        let target = [5.3, -2.0, 4.1];
        let mut v = f64::NAN;
        m2p(&sub(&target, &center), radius, p, &scales, &mut bws, 1.0, &mp, 0.0, &mut v);
        let exact = direct_potential(&charges, &target);
        assert!((v - exact).abs() < 1e-10 * exact.abs().max(1.0), "{v} vs {exact}");
    }

    #[test]
    fn m2m_shifts_expansion_without_accuracy_loss() {
        let p = 16;
        let scales = HarmonicScales::new(p);
        let mut bws = BasisWorkspace::new(p);
        let mut tws = TranslationScratch::new(p);
        let mut rng = StdRng::seed_from_u64(1);
        let child_c = [1.0, 0.5, -0.3];
        let parent_c = [0.2, -0.1, 0.4];
        let charges: Vec<(f64, [f64; 3])> = (0..8)
            .map(|_| {
                let off = random_unit_ball(&mut rng, 0.5);
                (
                    rng.random_range(-1.0..1.0),
                    [child_c[0] + off[0], child_c[1] + off[1], child_c[2] + off[2]],
                )
            })
            .collect();
        let mut child_m = vec![0.0; nbasis(p)];
        for (k, (q, pos)) in charges.iter().enumerate() {
            let beta = if k == 0 { 0.0 } else { 1.0 };
            p2m(&sub(pos, &child_c), *q, 0.6, p, &scales, &mut bws, 1.0, beta, &mut child_m);
        }
        let mut parent_m = vec![f64::NAN; nbasis(p)];
        m2m_rotation(
            &sub(&child_c, &parent_c),
            0.6,
            2.0,
            p,
            &scales,
            &mut tws,
            1.0,
            &child_m,
            0.0,
            &mut parent_m,
        );
        let target = [9.0, 7.5, -6.0];
        let mut v = 0.0;
        m2p(&sub(&target, &parent_c), 2.0, p, &scales, &mut bws, 1.0, &parent_m, 0.0, &mut v);
        let exact = direct_potential(&charges, &target);
        // M2M is exact up to the shared truncation of the child expansion.
        assert!((v - exact).abs() < 1e-9 * exact.abs().max(1.0), "{v} vs {exact}");
    }

    #[test]
    fn axial_m2l_meets_prescribed_accuracy() {
        // Unit charge at the origin, multipole sphere of radius 1, local
        // expansion on a unit sphere at distance 10, evaluated half a radius
        // off its center.
        let p = 20;
        let scales = HarmonicScales::new(p);
        let mut bws = BasisWorkspace::new(p);
        let origin = [0.0; 3];
        let local_c = [10.0, 0.0, 0.0];
        let eval = [10.5, 0.0, 0.0];
        let mut mp = vec![0.0; nbasis(p)];
        p2m(&origin, 1.0, 1.0, p, &scales, &mut bws, 1.0, 0.0, &mut mp);
        let mut tws = TranslationScratch::new(p);
        let mut loc = vec![0.0; nbasis(p)];
        m2l_rotation(
            &sub(&origin, &local_c),
            1.0,
            1.0,
            p,
            p,
            &scales,
            &mut tws,
            1.0,
            &mp,
            0.0,
            &mut loc,
        );
        let mut v = 0.0;
        l2p(&sub(&eval, &local_c), 1.0, p, &scales, &mut bws, 1.0, &loc, 0.0, &mut v);
        let exact = 1.0 / 10.5;
        assert!((v - exact).abs() < 1e-10, "{v} vs {exact}");
    }

    #[test]
    fn full_chain_matches_direct_summation() {
        // P2M -> M2M -> M2L -> L2L -> L2P against the direct sum, with the
        // translation axes in general position so every rotation path runs.
        let p = 20;
        let scales = HarmonicScales::new(p);
        let mut bws = BasisWorkspace::new(p);
        let mut tws = TranslationScratch::new(p);
        let mut rng = StdRng::seed_from_u64(7);
        let src_c = [0.3, 0.2, -0.5];
        let src_parent_c = [0.0, -0.4, 0.1];
        let dst_parent_c = [12.0, 9.0, -7.0];
        let dst_c = [12.6, 8.5, -6.8];
        let charges: Vec<(f64, [f64; 3])> = (0..10)
            .map(|_| {
                let off = random_unit_ball(&mut rng, 0.4);
                (
                    rng.random_range(-1.0..1.0),
                    [src_c[0] + off[0], src_c[1] + off[1], src_c[2] + off[2]],
                )
            })
            .collect();
        let mut m_child = vec![0.0; nbasis(p)];
        for (k, (q, pos)) in charges.iter().enumerate() {
            let beta = if k == 0 { 0.0 } else { 1.0 };
            p2m(&sub(pos, &src_c), *q, 0.5, p, &scales, &mut bws, 1.0, beta, &mut m_child);
        }
        let mut m_parent = vec![0.0; nbasis(p)];
        m2m_rotation(&sub(&src_c, &src_parent_c), 0.5, 1.5, p, &scales, &mut tws, 1.0, &m_child, 0.0, &mut m_parent);
        let mut l_parent = vec![0.0; nbasis(p)];
        m2l_rotation(
            &sub(&src_parent_c, &dst_parent_c),
            1.5,
            1.5,
            p,
            p,
            &scales,
            &mut tws,
            1.0,
            &m_parent,
            0.0,
            &mut l_parent,
        );
        let mut l_child = vec![0.0; nbasis(p)];
        l2l_rotation(&sub(&dst_parent_c, &dst_c), 1.5, 0.7, p, &scales, &mut tws, 1.0, &l_parent, 0.0, &mut l_child);
        let eval = [12.8, 8.3, -6.9];
        let mut v = 0.0;
        l2p(&sub(&eval, &dst_c), 0.7, p, &scales, &mut bws, 1.0, &l_child, 0.0, &mut v);
        let exact = direct_potential(&charges, &eval);
        assert!((v - exact).abs() < 1e-8 * exact.abs().max(1e-3), "{v} vs {exact}");
    }

    #[test]
    fn m2l_below_axis_matches_direct() {
        // Source centered above the target exercises the other phase branch.
        let p = 20;
        let scales = HarmonicScales::new(p);
        let mut bws = BasisWorkspace::new(p);
        let mut tws = TranslationScratch::new(p);
        let src_c = [0.0, 0.0, -8.0];
        let dst_c = [0.0, 0.0, 0.0];
        let q_pos = [0.1, -0.2, -8.3];
        let mut mp = vec![0.0; nbasis(p)];
        p2m(&sub(&q_pos, &src_c), 1.0, 1.0, p, &scales, &mut bws, 1.0, 0.0, &mut mp);
        let mut loc = vec![0.0; nbasis(p)];
        m2l_rotation(&sub(&src_c, &dst_c), 1.0, 1.0, p, p, &scales, &mut tws, 1.0, &mp, 0.0, &mut loc);
        let eval = [0.2, 0.3, -0.4];
        let mut v = 0.0;
        l2p(&sub(&eval, &dst_c), 1.0, p, &scales, &mut bws, 1.0, &loc, 0.0, &mut v);
        let exact = direct_potential(&[(1.0, q_pos)], &eval);
        assert!((v - exact).abs() < 1e-9, "{v} vs {exact}");
    }

    #[test]
    fn same_center_fast_paths_match_reexpansion() {
        let p = 12;
        let scales = HarmonicScales::new(p);
        let mut bws = BasisWorkspace::new(p);
        let mut tws = TranslationScratch::new(p);
        let q_pos = [0.3, -0.1, 0.2];
        let mut on_r2 = vec![0.0; nbasis(p)];
        let mut on_r3 = vec![0.0; nbasis(p)];
        p2m(&q_pos, 1.0, 2.0, p, &scales, &mut bws, 1.0, 0.0, &mut on_r2);
        p2m(&q_pos, 1.0, 3.0, p, &scales, &mut bws, 1.0, 0.0, &mut on_r3);
        let mut rescaled = vec![f64::NAN; nbasis(p)];
        m2m_rotation(&[0.0; 3], 2.0, 3.0, p, &scales, &mut tws, 1.0, &on_r2, 0.0, &mut rescaled);
        for (a, b) in rescaled.iter().zip(&on_r3) {
            assert!((a - b).abs() < 1e-13);
        }
    }

    #[test]
    fn translation_adjoints_satisfy_duality() {
        let pm = 9;
        let pl = 7;
        let pmax = pm.max(pl);
        let scales = HarmonicScales::new(pmax);
        let mut tws = TranslationScratch::new(pmax);
        let mut rng = StdRng::seed_from_u64(11);
        let c = [1.3, -0.8, 2.1];
        let dot = |a: &[f64], b: &[f64]| -> f64 { a.iter().zip(b).map(|(x, y)| x * y).sum() };

        // M2M.
        let x: Vec<f64> = (0..nbasis(pmax)).map(|_| rng.random_range(-1.0..1.0)).collect();
        let y: Vec<f64> = (0..nbasis(pmax)).map(|_| rng.random_range(-1.0..1.0)).collect();
        let mut fx = vec![0.0; nbasis(pmax)];
        let mut aty = vec![0.0; nbasis(pmax)];
        m2m_rotation(&c, 0.7, 1.9, pmax, &scales, &mut tws, 1.0, &x, 0.0, &mut fx);
        m2m_rotation_adj(&c, 0.7, 1.9, pmax, &scales, &mut tws, 1.0, &y, 0.0, &mut aty);
        let lhs = dot(&fx, &y);
        let rhs = dot(&x, &aty);
        assert!((lhs - rhs).abs() < 1e-10 * lhs.abs().max(1.0), "m2m {lhs} vs {rhs}");

        // L2L.
        let mut fx = vec![0.0; nbasis(pmax)];
        let mut aty = vec![0.0; nbasis(pmax)];
        l2l_rotation(&c, 1.9, 0.7, pmax, &scales, &mut tws, 1.0, &x, 0.0, &mut fx);
        l2l_rotation_adj(&c, 1.9, 0.7, pmax, &scales, &mut tws, 1.0, &y, 0.0, &mut aty);
        let lhs = dot(&fx, &y);
        let rhs = dot(&x, &aty);
        assert!((lhs - rhs).abs() < 1e-10 * lhs.abs().max(1.0), "l2l {lhs} vs {rhs}");

        // M2L with heterogeneous degrees.
        let far = [6.0, -3.0, 5.0];
        let xm: Vec<f64> = (0..nbasis(pm)).map(|_| rng.random_range(-1.0..1.0)).collect();
        let yl: Vec<f64> = (0..nbasis(pl)).map(|_| rng.random_range(-1.0..1.0)).collect();
        let mut fx = vec![0.0; nbasis(pl)];
        let mut aty = vec![0.0; nbasis(pm)];
        m2l_rotation(&far, 1.0, 1.0, pm, pl, &scales, &mut tws, 1.0, &xm, 0.0, &mut fx);
        m2l_rotation_adj(&far, 1.0, 1.0, pm, pl, &scales, &mut tws, 1.0, &yl, 0.0, &mut aty);
        let lhs = dot(&fx, &yl);
        let rhs = dot(&xm, &aty);
        assert!((lhs - rhs).abs() < 1e-10 * lhs.abs().max(1.0), "m2l {lhs} vs {rhs}");
    }

    #[test]
    fn point_kernel_adjoints_satisfy_duality() {
        let p = 8;
        let scales = HarmonicScales::new(p);
        let mut bws = BasisWorkspace::new(p);
        let mut rng = StdRng::seed_from_u64(23);
        let c = [0.4, 1.1, -0.9];
        let x: Vec<f64> = (0..nbasis(p)).map(|_| rng.random_range(-1.0..1.0)).collect();
        let w = 0.37;

        let mut v = 0.0;
        m2p(&c, 0.8, p, &scales, &mut bws, 1.0, &x, 0.0, &mut v);
        let mut dual = vec![0.0; nbasis(p)];
        m2p_adj(&c, w, 0.8, p, &scales, &mut bws, 1.0, 0.0, &mut dual);
        let rhs: f64 = x.iter().zip(&dual).map(|(a, b)| a * b).sum();
        assert!((v * w - rhs).abs() < 1e-12);

        let mut v = 0.0;
        l2p(&c, 2.0, p, &scales, &mut bws, 1.0, &x, 0.0, &mut v);
        let mut dual = vec![0.0; nbasis(p)];
        l2p_adj(&c, w, 2.0, p, &scales, &mut bws, 1.0, 0.0, &mut dual);
        let rhs: f64 = x.iter().zip(&dual).map(|(a, b)| a * b).sum();
        assert!((v * w - rhs).abs() < 1e-12);
    }

    #[test]
    fn beta_zero_overwrites_and_beta_one_accumulates() {
        let p = 6;
        let scales = HarmonicScales::new(p);
        let mut tws = TranslationScratch::new(p);
        let mut rng = StdRng::seed_from_u64(2);
        let x: Vec<f64> = (0..nbasis(p)).map(|_| rng.random_range(-1.0..1.0)).collect();
        let c = [0.9, 0.4, -1.2];

        let mut fresh = vec![f64::NAN; nbasis(p)];
        m2m_rotation(&c, 0.5, 1.0, p, &scales, &mut tws, 1.0, &x, 0.0, &mut fresh);
        assert!(fresh.iter().all(|v| v.is_finite()));

        let mut doubled = fresh.clone();
        m2m_rotation(&c, 0.5, 1.0, p, &scales, &mut tws, 1.0, &x, 1.0, &mut doubled);
        for (d, f) in doubled.iter().zip(&fresh) {
            assert!((d - 2.0 * f).abs() < 1e-12);
        }
    }

    #[test]
    #[should_panic(expected = "separated centers")]
    fn m2l_with_coincident_centers_panics() {
        let p = 4;
        let scales = HarmonicScales::new(p);
        let mut tws = TranslationScratch::new(p);
        let x = vec![0.0; nbasis(p)];
        let mut y = vec![0.0; nbasis(p)];
        m2l_rotation(&[0.0; 3], 1.0, 1.0, p, p, &scales, &mut tws, 1.0, &x, 0.0, &mut y);
    }
}
