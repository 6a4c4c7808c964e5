/////////////////////////////////////////////////////////////////////////////////////////////
//
// Declares validated configuration types for the solvation solver.
//
// Created on: 12 Jun 2026     Author: Daniel Owen
//
// Copyright (c) 2025, Maptek Pty Ltd. All rights reserved. Licensed under the MIT License.
//
/////////////////////////////////////////////////////////////////////////////////////////////

//! Declares validated configuration types for the solvation solver.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Configuration rejected during validation.
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigError {
    /// The multipole degree must dominate the basis degree so leaf densities
    /// embed exactly into the working expansions.
    MultipoleDegreeTooLow { lmax: usize, pm: usize },
    /// Relative tolerance outside `(0, 1)`.
    InvalidTolerance { tolerance: f64 },
    /// The iteration cap must be positive.
    ZeroIterationCap,
    /// The dielectric constant must exceed one.
    InvalidDielectric { dielectric: f64 },
    /// Switching width outside `(0, 1]`.
    InvalidEta { eta: f64 },
    /// Switching shift outside `[-1, 1]`.
    InvalidShift { se: f64 },
    /// Far-field separation ratio below one.
    InvalidSeparationRatio { ratio: f64 },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::MultipoleDegreeTooLow { lmax, pm } => {
                write!(f, "multipole degree {pm} must be at least the basis degree {lmax}")
            }
            ConfigError::InvalidTolerance { tolerance } => {
                write!(f, "tolerance {tolerance} must lie in (0, 1)")
            }
            ConfigError::ZeroIterationCap => write!(f, "maximum iteration count must be positive"),
            ConfigError::InvalidDielectric { dielectric } => {
                write!(f, "dielectric constant {dielectric} must exceed 1")
            }
            ConfigError::InvalidEta { eta } => write!(f, "switching width {eta} must lie in (0, 1]"),
            ConfigError::InvalidShift { se } => write!(f, "switching shift {se} must lie in [-1, 1]"),
            ConfigError::InvalidSeparationRatio { ratio } => {
                write!(f, "separation ratio {ratio} must be >= 1")
            }
        }
    }
}

impl std::error::Error for ConfigError {}

/// Validated solver parameters.
///
/// Construct through [`SolverParams::builder`]; the builder applies the
/// defaults below and [`SolverParamsBuilder::build`] validates once, so a
/// `SolverParams` in hand is always consistent.
///
/// ### Default Values
/// - `lmax`: `6`
/// - `pm` / `pl`: `20`
/// - `dielectric`: `78.3553` (water)
/// - `eta`: `0.1`, `se`: `-1.0`
/// - `tolerance`: `1e-8`
/// - `max_iterations`: `100`
/// - `diis_depth`: `20`
/// - `separation_ratio`: `2.0`
/// - `enable_fmm`: `true`
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SolverParams {
    /// Spherical-harmonic basis degree of the surface densities.
    pub lmax: usize,

    /// Working degree of multipole expansions in the FMM passes.
    pub pm: usize,

    /// Working degree of local expansions in the FMM passes.
    pub pl: usize,

    /// Relative permittivity of the solvent.
    pub dielectric: f64,

    /// Width of the switching region, as a fraction of the sphere radius.
    pub eta: f64,

    /// Placement of the switching region relative to the sphere surface:
    /// `-1` keeps it strictly inside, `0` centers it, `1` keeps it outside.
    pub se: f64,

    /// Relative convergence tolerance in the degree-weighted H-norm.
    pub tolerance: f64,

    /// Iteration cap for the Jacobi/DIIS solver.
    pub max_iterations: usize,

    /// Number of residual/solution pairs retained for DIIS extrapolation;
    /// values below two disable extrapolation.
    pub diis_depth: usize,

    /// Cluster pairs are far-field once their center distance reaches this
    /// multiple of the summed bounding radii.
    pub separation_ratio: f64,

    /// Whether global couplings run through the FMM tree or the dense
    /// fallback. A configuration choice, not an error path.
    pub enable_fmm: bool,
}

impl SolverParams {
    /// Returns a new [`SolverParamsBuilder`] holding the defaults.
    pub fn builder() -> SolverParamsBuilder {
        SolverParamsBuilder::new()
    }
}

/// A convenience builder for [`SolverParams`]; see that type for the meaning
/// and defaults of each field.
#[derive(Debug, Clone)]
pub struct SolverParamsBuilder {
    lmax: usize,
    pm: usize,
    pl: usize,
    dielectric: f64,
    eta: f64,
    se: f64,
    tolerance: f64,
    max_iterations: usize,
    diis_depth: usize,
    separation_ratio: f64,
    enable_fmm: bool,
}

impl Default for SolverParamsBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl SolverParamsBuilder {
    fn new() -> Self {
        Self {
            lmax: 6,
            pm: 20,
            pl: 20,
            dielectric: 78.3553,
            eta: 0.1,
            se: -1.0,
            tolerance: 1e-8,
            max_iterations: 100,
            diis_depth: 20,
            separation_ratio: 2.0,
            enable_fmm: true,
        }
    }

    /// Sets the surface density basis degree.
    pub fn lmax(mut self, lmax: usize) -> Self {
        self.lmax = lmax;
        self
    }

    /// Sets the multipole working degree.
    pub fn pm(mut self, pm: usize) -> Self {
        self.pm = pm;
        self
    }

    /// Sets the local working degree.
    pub fn pl(mut self, pl: usize) -> Self {
        self.pl = pl;
        self
    }

    /// Sets the solvent dielectric constant.
    pub fn dielectric(mut self, dielectric: f64) -> Self {
        self.dielectric = dielectric;
        self
    }

    /// Sets the switching region width.
    pub fn eta(mut self, eta: f64) -> Self {
        self.eta = eta;
        self
    }

    /// Sets the switching region placement.
    pub fn se(mut self, se: f64) -> Self {
        self.se = se;
        self
    }

    /// Sets the relative convergence tolerance.
    pub fn tolerance(mut self, tolerance: f64) -> Self {
        self.tolerance = tolerance;
        self
    }

    /// Sets the iteration cap.
    pub fn max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    /// Sets the DIIS history depth.
    pub fn diis_depth(mut self, diis_depth: usize) -> Self {
        self.diis_depth = diis_depth;
        self
    }

    /// Sets the far-field separation ratio.
    pub fn separation_ratio(mut self, separation_ratio: f64) -> Self {
        self.separation_ratio = separation_ratio;
        self
    }

    /// Selects the FMM tree or the dense fallback for global couplings.
    pub fn enable_fmm(mut self, enable_fmm: bool) -> Self {
        self.enable_fmm = enable_fmm;
        self
    }

    /// Validates and builds the [`SolverParams`].
    pub fn build(self) -> Result<SolverParams, ConfigError> {
        if self.pm < self.lmax {
            return Err(ConfigError::MultipoleDegreeTooLow { lmax: self.lmax, pm: self.pm });
        }
        if !(self.tolerance > 0.0 && self.tolerance < 1.0) {
            return Err(ConfigError::InvalidTolerance { tolerance: self.tolerance });
        }
        if self.max_iterations == 0 {
            return Err(ConfigError::ZeroIterationCap);
        }
        if !(self.dielectric.is_finite() && self.dielectric > 1.0) {
            return Err(ConfigError::InvalidDielectric { dielectric: self.dielectric });
        }
        if !(self.eta > 0.0 && self.eta <= 1.0) {
            return Err(ConfigError::InvalidEta { eta: self.eta });
        }
        if !(-1.0..=1.0).contains(&self.se) {
            return Err(ConfigError::InvalidShift { se: self.se });
        }
        if !(self.separation_ratio.is_finite() && self.separation_ratio >= 1.0) {
            return Err(ConfigError::InvalidSeparationRatio { ratio: self.separation_ratio });
        }
        Ok(SolverParams {
            lmax: self.lmax,
            pm: self.pm,
            pl: self.pl,
            dielectric: self.dielectric,
            eta: self.eta,
            se: self.se,
            tolerance: self.tolerance,
            max_iterations: self.max_iterations,
            diis_depth: self.diis_depth,
            separation_ratio: self.separation_ratio,
            enable_fmm: self.enable_fmm,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        let params = SolverParams::builder().build().unwrap();
        assert_eq!(params.lmax, 6);
        assert!(params.enable_fmm);
    }

    #[test]
    fn rejects_inconsistent_degrees() {
        let err = SolverParams::builder().lmax(10).pm(6).build().unwrap_err();
        assert_eq!(err, ConfigError::MultipoleDegreeTooLow { lmax: 10, pm: 6 });
    }

    #[test]
    fn rejects_out_of_range_scalars() {
        assert!(matches!(
            SolverParams::builder().tolerance(0.0).build().unwrap_err(),
            ConfigError::InvalidTolerance { .. }
        ));
        assert!(matches!(
            SolverParams::builder().dielectric(0.9).build().unwrap_err(),
            ConfigError::InvalidDielectric { .. }
        ));
        assert!(matches!(
            SolverParams::builder().eta(1.5).build().unwrap_err(),
            ConfigError::InvalidEta { .. }
        ));
        assert!(matches!(
            SolverParams::builder().max_iterations(0).build().unwrap_err(),
            ConfigError::ZeroIterationCap
        ));
    }
}
