/////////////////////////////////////////////////////////////////////////////////////////////
//
// Rotation operators for real spherical-harmonic coefficient vectors.
//
// Created on: 12 Jun 2026     Author: Daniel Owen
//
// Copyright (c) 2025, Maptek Pty Ltd. All rights reserved. Licensed under the MIT License.
//
/////////////////////////////////////////////////////////////////////////////////////////////

//! Rotation operators for real spherical-harmonic coefficient vectors.
//!
//! Rotating the coordinate frame maps a degree-`l` coefficient block through a
//! dense `(2l+1) x (2l+1)` orthogonal matrix; degrees never mix. Three cases
//! are provided:
//!
//! - [`rotate_about_z`]: rotation about the polar axis. The blocks are
//!   2x2-banded in the order index, so the whole transform is `O(P^2)`.
//! - [`transform_general`]: arbitrary rotation, built degree by degree with
//!   the Ivanic-Ruedenberg recurrence seeded from the exact degree-1 block,
//!   `O(P^3)` total.
//! - [`transform_oxz`]: rotation carrying the `xz`-half-plane onto the polar
//!   axis. For rotations about the `y` axis the cosine and sine blocks never
//!   mix, so half the matrix entries are skipped.
//!
//! All rotations are orthogonal, so each adjoint is the transpose and equals
//! the inverse rotation.
//!
//! Convention: `transform_general(r, ...)` re-expresses a function in the
//! frame `B` whose coordinates satisfy `x_B = r * x_A`. The recurrence runs in
//! the Condon-Shortley-free convention internally; coefficient vectors are
//! conjugated by `(-1)^{|m|}` on the way in and out, which converts between
//! that convention and the basis of [`crate::harmonics`].

use crate::harmonics::{lm_index, nbasis};

/// Reusable buffers for the degree recurrence: two rotation blocks of side up
/// to `2 pmax + 1` and one converted coefficient vector.
#[derive(Debug, Clone)]
pub struct RotationScratch {
    prev: Vec<f64>,
    cur: Vec<f64>,
    conv: Vec<f64>,
}

impl RotationScratch {
    pub fn new(pmax: usize) -> Self {
        let side = 2 * pmax + 1;
        Self {
            prev: vec![0.0; side * side],
            cur: vec![0.0; side * side],
            conv: vec![0.0; nbasis(pmax)],
        }
    }
}

#[inline(always)]
fn csphase(m: i64) -> f64 {
    if m & 1 == 0 {
        1.0
    } else {
        -1.0
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

/// Rotates a coefficient vector about the polar axis.
///
/// The target frame is the source frame rotated by the azimuth whose cosine
/// and sine are `(cphi, sphi)`; a point at that azimuth has azimuth zero in
/// the target frame. BLAS-style update `dst <- beta*dst + alpha*rot(src)`;
/// `beta == 0` never reads `dst`.
pub fn rotate_about_z(
    p: usize,
    cphi: f64,
    sphi: f64,
    alpha: f64,
    src: &[f64],
    beta: f64,
    dst: &mut [f64],
) {
    debug_assert!(src.len() >= nbasis(p) && dst.len() >= nbasis(p));
    let mut cm = 1.0;
    let mut sm = 0.0;
    // Order-major sweep: the trig pair advances once per order and applies to
    // every degree that carries it.
    for m in 0..=(p as i64) {
        for l in (m as usize)..=p {
            let ip = lm_index(l, m);
            let im = lm_index(l, -m);
            if m == 0 {
                combine(beta, &mut dst[ip], alpha * src[ip]);
            } else {
                let a = src[ip];
                let b = src[im];
                combine(beta, &mut dst[ip], alpha * (a * cm + b * sm));
                combine(beta, &mut dst[im], alpha * (b * cm - a * sm));
            }
        }
        let cn = cm * cphi - sm * sphi;
        sm = cm * sphi + sm * cphi;
        cm = cn;
    }
}

/// Adjoint (equals inverse) of [`rotate_about_z`] with the same angle.
pub fn rotate_about_z_adj(
    p: usize,
    cphi: f64,
    sphi: f64,
    alpha: f64,
    src: &[f64],
    beta: f64,
    dst: &mut [f64],
) {
    rotate_about_z(p, cphi, -sphi, alpha, src, beta, dst);
}

/// Applies an arbitrary frame rotation `x_B = r * x_A` to a coefficient
/// vector.
pub fn transform_general(
    p: usize,
    r: &[[f64; 3]; 3],
    alpha: f64,
    src: &[f64],
    beta: f64,
    dst: &mut [f64],
    ws: &mut RotationScratch,
) {
    // Degree-1 block in the basis order (m = -1, 0, 1) <-> (y, z, x).
    let r1 = [
        [r[1][1], r[1][2], r[1][0]],
        [r[2][1], r[2][2], r[2][0]],
        [r[0][1], r[0][2], r[0][0]],
    ];
    transform_rec(p, &r1, alpha, src, beta, dst, ws, false);
}

/// Frame rotation about the `y` axis taking the direction with polar angle
/// `(ctheta, stheta)` in the `xz`-half-plane onto `+z`.
///
/// Passing `-stheta` applies the inverse rotation. Entries coupling cosine
/// and sine orders vanish for this rotation and are skipped.
pub fn transform_oxz(
    p: usize,
    ctheta: f64,
    stheta: f64,
    alpha: f64,
    src: &[f64],
    beta: f64,
    dst: &mut [f64],
    ws: &mut RotationScratch,
) {
    let r1 = [
        [1.0, 0.0, 0.0],
        [0.0, ctheta, stheta],
        [0.0, -stheta, ctheta],
    ];
    transform_rec(p, &r1, alpha, src, beta, dst, ws, true);
}

/// Ivanic-Ruedenberg degree recurrence. `r1` is the degree-1 rotation block
/// indexed `[m + 1][m' + 1]`; `oxz` skips the vanishing cross-sign entries.
#[allow(clippy::too_many_arguments)]
fn transform_rec(
    p: usize,
    r1: &[[f64; 3]; 3],
    alpha: f64,
    src: &[f64],
    beta: f64,
    dst: &mut [f64],
    ws: &mut RotationScratch,
    oxz: bool,
) {
    debug_assert!(src.len() >= nbasis(p) && dst.len() >= nbasis(p));
    let RotationScratch { prev, cur, conv } = ws;
    debug_assert!(conv.len() >= nbasis(p));

    for l in 0..=p {
        for m in -(l as i64)..=(l as i64) {
            let idx = lm_index(l, m);
            conv[idx] = csphase(m) * src[idx];
        }
    }

    combine(beta, &mut dst[0], alpha * conv[0]);
    if p == 0 {
        return;
    }

    for (mi, row) in r1.iter().enumerate() {
        for (mj, &v) in row.iter().enumerate() {
            prev[mi * 3 + mj] = v;
        }
    }
    for m in -1i64..=1 {
        let mut sum = 0.0;
        for mp in -1i64..=1 {
            sum += prev[(m + 1) as usize * 3 + (mp + 1) as usize] * conv[lm_index(1, mp)];
        }
        combine(beta, &mut dst[lm_index(1, m)], alpha * csphase(m) * sum);
    }

    for l in 2..=p {
        let li = l as i64;
        let lp = l - 1;
        let side = 2 * l + 1;
        let pside = 2 * lp + 1;
        cur[..side * side].fill(0.0);

        // Helper P(i, mu, m') from the 1998 erratum, with the boundary column
        // cases for |m'| = l.
        let prev_at = |mu: i64, nu: i64| prev[(mu + lp as i64) as usize * pside + (nu + lp as i64) as usize];
        let r1_at = |i: i64, j: i64| r1[(i + 1) as usize][(j + 1) as usize];
        let pfun = |i: i64, mu: i64, mp: i64| -> f64 {
            if mp == li {
                r1_at(i, 1) * prev_at(mu, li - 1) - r1_at(i, -1) * prev_at(mu, -li + 1)
            } else if mp == -li {
                r1_at(i, 1) * prev_at(mu, -li + 1) + r1_at(i, -1) * prev_at(mu, li - 1)
            } else {
                r1_at(i, 0) * prev_at(mu, mp)
            }
        };

        for m in -li..=li {
            for mp in -li..=li {
                if oxz && (m < 0) != (mp < 0) {
                    continue;
                }
                let denom = if mp.abs() < li {
                    ((li + mp) * (li - mp)) as f64
                } else {
                    (2 * li * (2 * li - 1)) as f64
                };
                let ma = m.abs();

                let u = (((li * li - m * m) as f64) / denom).sqrt();
                let uterm = if u != 0.0 { pfun(0, m, mp) } else { 0.0 };

                // The m == 0 coefficient carries the extra sqrt(2) and the
                // (1 - 2δ) sign flip of the erratum.
                let v = if m == 0 {
                    -0.5 * ((2 * (li - 1) * li) as f64 / denom).sqrt()
                } else {
                    0.5 * (((li + ma - 1) * (li + ma)) as f64 / denom).sqrt()
                };
                let vterm = if m == 0 {
                    pfun(1, 1, mp) + pfun(-1, -1, mp)
                } else if m > 0 {
                    let scale = if m == 1 { 2f64.sqrt() } else { 1.0 };
                    let tail = if m == 1 { 0.0 } else { pfun(-1, -m + 1, mp) };
                    pfun(1, m - 1, mp) * scale - tail
                } else {
                    let scale = if m == -1 { 2f64.sqrt() } else { 1.0 };
                    let head = if m == -1 { 0.0 } else { pfun(1, m + 1, mp) };
                    head + pfun(-1, -m - 1, mp) * scale
                };

                let w = if m == 0 {
                    0.0
                } else {
                    -0.5 * (((li - ma - 1) * (li - ma)) as f64 / denom).sqrt()
                };
                let wterm = if w == 0.0 {
                    0.0
                } else if m > 0 {
                    pfun(1, m + 1, mp) + pfun(-1, -m - 1, mp)
                } else {
                    pfun(1, m - 1, mp) - pfun(-1, -m + 1, mp)
                };

                cur[(m + li) as usize * side + (mp + li) as usize] = u * uterm + v * vterm + w * wterm;
            }
        }

        for m in -li..=li {
            let mut sum = 0.0;
            for mp in -li..=li {
                sum += cur[(m + li) as usize * side + (mp + li) as usize] * conv[lm_index(l, mp)];
            }
            combine(beta, &mut dst[lm_index(l, m)], alpha * csphase(m) * sum);
        }

        std::mem::swap(prev, cur);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::harmonics::{real_harmonics, BasisWorkspace, HarmonicScales};
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    const P: usize = 8;

    fn random_coeffs(rng: &mut StdRng, p: usize) -> Vec<f64> {
        (0..nbasis(p)).map(|_| rng.random_range(-1.0..1.0)).collect()
    }

    fn rotation_from_axis_angle(axis: [f64; 3], angle: f64) -> [[f64; 3]; 3] {
        let n = (axis[0] * axis[0] + axis[1] * axis[1] + axis[2] * axis[2]).sqrt();
        let u = [axis[0] / n, axis[1] / n, axis[2] / n];
        let (s, c) = angle.sin_cos();
        let mut r = [[0.0; 3]; 3];
        for i in 0..3 {
            for j in 0..3 {
                let eps = |i: usize, j: usize, k: usize| -> f64 {
                    match (i, j, k) {
                        (0, 1, 2) | (1, 2, 0) | (2, 0, 1) => 1.0,
                        (0, 2, 1) | (2, 1, 0) | (1, 0, 2) => -1.0,
                        _ => 0.0,
                    }
                };
                let mut cross = 0.0;
                for k in 0..3 {
                    cross += eps(i, j, k) * u[k];
                }
                r[i][j] = c * if i == j { 1.0 } else { 0.0 } + (1.0 - c) * u[i] * u[j] - s * cross;
            }
        }
        r
    }

    fn apply_rotation(r: &[[f64; 3]; 3], x: &[f64; 3]) -> [f64; 3] {
        [
            r[0][0] * x[0] + r[0][1] * x[1] + r[0][2] * x[2],
            r[1][0] * x[0] + r[1][1] * x[1] + r[1][2] * x[2],
            r[2][0] * x[0] + r[2][1] * x[1] + r[2][2] * x[2],
        ]
    }

    fn eval(coeffs: &[f64], x: &[f64; 3], scales: &HarmonicScales) -> f64 {
        let mut ws = BasisWorkspace::new(P);
        let mut vylm = vec![0.0; nbasis(P)];
        real_harmonics(x, P, scales, &mut ws, &mut vylm);
        coeffs.iter().zip(&vylm).map(|(c, y)| c * y).sum()
    }

    #[test]
    fn general_transform_rotates_function_values() {
        let scales = HarmonicScales::new(P);
        let mut rng = StdRng::seed_from_u64(17);
        let mut ws = RotationScratch::new(P);
        let src = random_coeffs(&mut rng, P);
        let r = rotation_from_axis_angle([0.3, -1.0, 0.7], 1.234);
        let mut dst = vec![0.0; nbasis(P)];
        transform_general(P, &r, 1.0, &src, 0.0, &mut dst, &mut ws);
        for _ in 0..20 {
            let x = [
                rng.random_range(-1.0..1.0),
                rng.random_range(-1.0..1.0),
                rng.random_range(-1.0..1.0),
            ];
            let xb = apply_rotation(&r, &x);
            let va = eval(&src, &x, &scales);
            let vb = eval(&dst, &xb, &scales);
            assert!((va - vb).abs() < 1e-11, "{va} vs {vb}");
        }
    }

    #[test]
    fn general_transform_is_an_isometry_and_round_trips() {
        let mut rng = StdRng::seed_from_u64(3);
        let mut ws = RotationScratch::new(P);
        let src = random_coeffs(&mut rng, P);
        let r = rotation_from_axis_angle([1.0, 2.0, -0.5], -0.83);
        let rt = {
            let mut t = [[0.0; 3]; 3];
            for i in 0..3 {
                for j in 0..3 {
                    t[i][j] = r[j][i];
                }
            }
            t
        };
        let mut fwd = vec![0.0; nbasis(P)];
        let mut back = vec![0.0; nbasis(P)];
        transform_general(P, &r, 1.0, &src, 0.0, &mut fwd, &mut ws);
        transform_general(P, &rt, 1.0, &fwd, 0.0, &mut back, &mut ws);
        let n0: f64 = src.iter().map(|v| v * v).sum();
        let n1: f64 = fwd.iter().map(|v| v * v).sum();
        assert!((n0 - n1).abs() < 1e-11 * n0.max(1.0));
        for (a, b) in src.iter().zip(&back) {
            assert!((a - b).abs() < 1e-11);
        }
    }

    #[test]
    fn polar_rotation_matches_general_transform() {
        let mut rng = StdRng::seed_from_u64(99);
        let mut ws = RotationScratch::new(P);
        let src = random_coeffs(&mut rng, P);
        let phi = 2.31_f64;
        // Frame rotated by +phi about z: coordinates transform with Rz(-phi).
        let r = [
            [phi.cos(), phi.sin(), 0.0],
            [-phi.sin(), phi.cos(), 0.0],
            [0.0, 0.0, 1.0],
        ];
        let mut via_general = vec![0.0; nbasis(P)];
        let mut via_banded = vec![0.0; nbasis(P)];
        transform_general(P, &r, 1.0, &src, 0.0, &mut via_general, &mut ws);
        rotate_about_z(P, phi.cos(), phi.sin(), 1.0, &src, 0.0, &mut via_banded);
        for (a, b) in via_general.iter().zip(&via_banded) {
            assert!((a - b).abs() < 1e-12);
        }
    }

    #[test]
    fn oxz_transform_matches_general_transform() {
        let mut rng = StdRng::seed_from_u64(7);
        let mut ws = RotationScratch::new(P);
        let src = random_coeffs(&mut rng, P);
        let theta = 0.77_f64;
        let r = [
            [theta.cos(), 0.0, -theta.sin()],
            [0.0, 1.0, 0.0],
            [theta.sin(), 0.0, theta.cos()],
        ];
        let mut via_general = vec![0.0; nbasis(P)];
        let mut via_oxz = vec![0.0; nbasis(P)];
        transform_general(P, &r, 1.0, &src, 0.0, &mut via_general, &mut ws);
        transform_oxz(P, theta.cos(), theta.sin(), 1.0, &src, 0.0, &mut via_oxz, &mut ws);
        for (a, b) in via_general.iter().zip(&via_oxz) {
            assert!((a - b).abs() < 1e-12);
        }
    }

    #[test]
    fn polar_adjoint_inverts_and_respects_beta() {
        let mut rng = StdRng::seed_from_u64(5);
        let src = random_coeffs(&mut rng, P);
        let mut fwd = vec![0.0; nbasis(P)];
        rotate_about_z(P, 0.6, 0.8, 1.0, &src, 0.0, &mut fwd);
        let mut acc = src.clone();
        // dst <- 2*dst + adj(fwd) should equal 3*src.
        rotate_about_z_adj(P, 0.6, 0.8, 1.0, &fwd, 2.0, &mut acc);
        for (a, s) in acc.iter().zip(&src) {
            assert!((a - 3.0 * s).abs() < 1e-12);
        }
    }
}
