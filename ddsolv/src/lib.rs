/////////////////////////////////////////////////////////////////////////////////////////////
//
// Domain-decomposition continuum-solvation solver (ddCOSMO / ddPCM).
//
// Created on: 12 Jun 2026     Author: Daniel Owen
//
// Copyright (c) 2025, Maptek Pty Ltd. All rights reserved. Licensed under the MIT License.
//
/////////////////////////////////////////////////////////////////////////////////////////////

//! Domain-decomposition continuum-solvation solver (ddCOSMO / ddPCM).
//!
//! The solute cavity is a union of atom-centered spheres; the apparent
//! surface charge on each sphere is expanded in real spherical harmonics and
//! the coupled boundary equations are solved sphere-by-sphere with a
//! Jacobi/DIIS iteration. Global couplings (the PCM double-layer operator and
//! the solute potential) run through the FMM engine of [`ddsolv_fmm`], with a
//! dense fallback selected by configuration.
//!
//! Typical use:
//!
//! ```no_run
//! use ddsolv::{Cavity, SolverParams, solve_cosmo};
//!
//! let params = SolverParams::builder().lmax(6).build().unwrap();
//! let cav = Cavity::new(
//!     params,
//!     vec![[0.0, 0.0, 0.0], [0.0, 0.0, 2.9]],
//!     vec![2.0, 1.8],
//!     vec![0.4, -0.4],
//! ).unwrap();
//! let solution = solve_cosmo(&cav);
//! println!("E_solv = {} (converged: {})", solution.energy, solution.converged());
//! ```

pub mod config;
pub mod cosmo;
pub mod geometry;
pub mod grid;
pub mod operators;
pub mod pcm;
pub mod solver;

pub use config::{ConfigError, SolverParams, SolverParamsBuilder};
pub use cosmo::{cosmo_forces, solve_cosmo, CosmoSolution};
pub use geometry::{dfsw, fsw, switch_upper, Cavity, GeometryError};
pub use grid::SphericalQuadrature;
pub use pcm::{solve_pcm, PcmSolution};
pub use solver::{hnorm, jacobi_diis, SolveResult};
