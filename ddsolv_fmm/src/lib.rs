/////////////////////////////////////////////////////////////////////////////////////////////
//
// Spherical-harmonic fast multipole kernels for domain-decomposition solvation solvers.
//
// Created on: 12 Jun 2026     Author: Daniel Owen
//
// Copyright (c) 2025, Maptek Pty Ltd. All rights reserved. Licensed under the MIT License.
//
/////////////////////////////////////////////////////////////////////////////////////////////

//! Spherical-harmonic fast multipole kernels for domain-decomposition
//! solvation solvers.
//!
//! This crate provides the numerical engine underneath the `ddsolv` boundary
//! operators: real spherical harmonics with precomputed scaling tables,
//! coefficient-space rotations, the full translation-kernel family
//! (P2M/M2P/L2P and M2M/M2L/L2L, each with its adjoint), a bounding-sphere
//! cluster tree with frozen near/far interaction lists, and a tree driver
//! running complete forward and adjoint FMM passes.
//!
//! Everything operates on flat coefficient slices of length `(p + 1)^2` in
//! the layout of [`harmonics::lm_index`], with expansions stored in the
//! radius-scaled form documented in [`translations`]. Kernels follow a
//! BLAS-style `dst <- beta*dst + alpha*op(src)` contract throughout, which is
//! what lets tree passes fold "overwrite first contribution, accumulate the
//! rest" into a single code path.
//!
//! The crate is deliberately independent of any solvation model: it knows
//! about spheres, charges and expansions, not about cavities or dielectrics.

pub mod driver;
pub mod harmonics;
pub mod rotations;
pub mod translations;
pub mod tree;

pub use driver::{p2m_adj, FmmWorkspace};
pub use harmonics::{
    cartesian_to_spherical, gradient_basis, lm_index, nbasis, real_harmonics, BasisWorkspace,
    HarmonicScales,
};
pub use rotations::{rotate_about_z, rotate_about_z_adj, transform_general, transform_oxz, RotationScratch};
pub use translations::{
    l2l_rotation, l2l_rotation_adj, l2p, l2p_adj, m2l_rotation, m2l_rotation_adj, m2m_rotation,
    m2m_rotation_adj, m2p, m2p_adj, p2m, TranslationScratch,
};
pub use tree::{ClusterTree, TreeError};
