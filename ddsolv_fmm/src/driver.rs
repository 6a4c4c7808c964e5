/////////////////////////////////////////////////////////////////////////////////////////////
//
// Tree driver: forward and adjoint FMM passes over a cluster hierarchy.
//
// Created on: 12 Jun 2026     Author: Daniel Owen
//
// Copyright (c) 2025, Maptek Pty Ltd. All rights reserved. Licensed under the MIT License.
//
/////////////////////////////////////////////////////////////////////////////////////////////

//! Tree driver: forward and adjoint FMM passes over a cluster hierarchy.
//!
//! A [`FmmWorkspace`] owns one multipole and one local coefficient column per
//! tree node. The forward pass is the classical five-step scheme: leaf
//! multipole assignment (caller), bottom-up M2M, far-field M2L, top-down L2L,
//! and near-field/point evaluation (caller, via [`FmmWorkspace::eval_leaf_local`]
//! and direct sums). The adjoint pass runs the transposed steps in reverse
//! order; after it, the multipole columns hold *dual* multipoles from which
//! the caller contracts adjoint point weights back to source strengths.
//!
//! Parallelism: every pass is data-parallel over the nodes of one tree level
//! (or over all nodes for the interaction step). Each task writes exactly one
//! node column and only reads columns that no task of the same step writes,
//! so the raw column aliasing below stays disjoint.

use faer::Mat;
use rayon::prelude::*;

use crate::harmonics::{nbasis, BasisWorkspace, HarmonicScales};
use crate::translations::{
    l2l_rotation, l2l_rotation_adj, l2p, l2p_adj, m2l_rotation, m2l_rotation_adj, m2m_rotation,
    m2m_rotation_adj, TranslationScratch,
};
use crate::tree::ClusterTree;

/// Shared-reference column access used by the level-parallel passes. Sound
/// only while every concurrent writer targets a distinct column.
#[inline]
unsafe fn col_mut_unchecked(mat: &Mat<f64>, col: usize) -> &mut [f64] {
    std::slice::from_raw_parts_mut(mat.col(col).as_ptr() as *mut f64, mat.nrows())
}

#[inline]
fn col_ref(mat: &Mat<f64>, col: usize) -> &[f64] {
    unsafe { std::slice::from_raw_parts(mat.col(col).as_ptr(), mat.nrows()) }
}

#[inline]
fn sub(a: [f64; 3], b: [f64; 3]) -> [f64; 3] {
    [a[0] - b[0], a[1] - b[1], a[2] - b[2]]
}

/// Per-pass expansion storage for one tree.
///
/// Created fresh at the start of each FMM pass; the node columns are plain
/// dense `faer` storage, one multipole column of degree `pm` and one local
/// column of degree `pl` per node.
pub struct FmmWorkspace {
    pm: usize,
    pl: usize,
    node_m: Mat<f64>,
    node_l: Mat<f64>,
}

impl FmmWorkspace {
    pub fn new(tree: &ClusterTree, pm: usize, pl: usize) -> Self {
        let nn = tree.n_nodes();
        Self {
            pm,
            pl,
            node_m: Mat::zeros(nbasis(pm), nn),
            node_l: Mat::zeros(nbasis(pl), nn),
        }
    }

    #[inline]
    pub fn pm(&self) -> usize {
        self.pm
    }

    #[inline]
    pub fn pl(&self) -> usize {
        self.pl
    }

    /// Zeroes every multipole column.
    pub fn zero_multipoles(&mut self) {
        self.node_m = Mat::zeros(nbasis(self.pm), self.node_m.ncols());
    }

    /// Zeroes every local column.
    pub fn zero_locals(&mut self) {
        self.node_l = Mat::zeros(nbasis(self.pl), self.node_l.ncols());
    }

    /// Installs per-atom multipole coefficients at the leaves. `coeffs` has
    /// one column per atom; rows beyond its height are zero-padded, so a
    /// degree-limited source density may be installed directly into a higher
    /// working degree.
    pub fn set_leaf_multipoles(&mut self, tree: &ClusterTree, coeffs: faer::MatRef<'_, f64>) {
        assert!(coeffs.ncols() == tree.n_atoms(), "one coefficient column per atom");
        assert!(coeffs.nrows() <= nbasis(self.pm), "leaf coefficients exceed the working degree");
        self.zero_multipoles();
        for atom in 0..tree.n_atoms() {
            let leaf = tree.atom_leaf(atom);
            let dst = unsafe { col_mut_unchecked(&self.node_m, leaf) };
            for row in 0..coeffs.nrows() {
                dst[row] = coeffs[(row, atom)];
            }
        }
    }

    /// Installs point charges sitting at the leaf sphere centers: each leaf
    /// multipole is the monopole `q / (r sqrt(4π))`.
    pub fn set_leaf_charges(&mut self, tree: &ClusterTree, charges: &[f64], scales: &HarmonicScales) {
        assert!(charges.len() == tree.n_atoms(), "one charge per atom");
        self.zero_multipoles();
        for (atom, &q) in charges.iter().enumerate() {
            let leaf = tree.atom_leaf(atom);
            let dst = unsafe { col_mut_unchecked(&self.node_m, leaf) };
            dst[0] = q / tree.node_radius(leaf) * scales.vscales[0];
        }
    }

    /// Multipole column of a node (forward: expansion; after an adjoint pass:
    /// dual multipole).
    #[inline]
    pub fn node_multipole(&self, node: usize) -> &[f64] {
        col_ref(&self.node_m, node)
    }

    /// Local column of a node.
    #[inline]
    pub fn node_local(&self, node: usize) -> &[f64] {
        col_ref(&self.node_l, node)
    }

    /// Multipole column of the leaf holding `atom`.
    #[inline]
    pub fn leaf_multipole(&self, tree: &ClusterTree, atom: usize) -> &[f64] {
        self.node_multipole(tree.atom_leaf(atom))
    }

    /// Evaluates the far-field potential at a point near `atom`, `c` relative
    /// to the atom's leaf center.
    pub fn eval_leaf_local(
        &self,
        tree: &ClusterTree,
        scales: &HarmonicScales,
        ws: &mut BasisWorkspace,
        atom: usize,
        c: &[f64; 3],
    ) -> f64 {
        let leaf = tree.atom_leaf(atom);
        let mut v = 0.0;
        l2p(
            c,
            tree.node_radius(leaf),
            self.pl,
            scales,
            ws,
            1.0,
            self.node_local(leaf),
            0.0,
            &mut v,
        );
        v
    }

    /// Adjoint of [`Self::eval_leaf_local`]: accumulates a point weight onto
    /// the dual local column of the atom's leaf.
    pub fn accumulate_point_dual(
        &mut self,
        tree: &ClusterTree,
        scales: &HarmonicScales,
        ws: &mut BasisWorkspace,
        atom: usize,
        c: &[f64; 3],
        weight: f64,
    ) {
        let leaf = tree.atom_leaf(atom);
        let radius = tree.node_radius(leaf);
        let dst = unsafe { col_mut_unchecked(&self.node_l, leaf) };
        l2p_adj(c, weight, radius, self.pl, scales, ws, 1.0, 1.0, dst);
    }

    /// Bottom-up M2M: every internal node gathers its children, first child
    /// overwriting, second accumulating.
    pub fn upward_pass(&mut self, tree: &ClusterTree, scales: &HarmonicScales) {
        let node_m = &self.node_m;
        let pm = self.pm;
        for level in tree.levels().iter().rev() {
            level.par_iter().for_each(|&node| {
                let Some((a, b)) = tree.children(node) else { return };
                let mut ws = TranslationScratch::new(pm);
                let dst = unsafe { col_mut_unchecked(node_m, node) };
                for (k, child) in [a, b].into_iter().enumerate() {
                    let c = sub(tree.node_center(child), tree.node_center(node));
                    m2m_rotation(
                        &c,
                        tree.node_radius(child),
                        tree.node_radius(node),
                        pm,
                        scales,
                        &mut ws,
                        1.0,
                        col_ref(node_m, child),
                        if k == 0 { 0.0 } else { 1.0 },
                        dst,
                    );
                }
            });
        }
    }

    /// Far-field M2L: every node's local column collects the multipoles of
    /// its far list; nodes with no far interactions hold an explicitly zero
    /// local expansion.
    pub fn interaction_pass(&mut self, tree: &ClusterTree, scales: &HarmonicScales) {
        self.zero_locals();
        let node_m = &self.node_m;
        let node_l = &self.node_l;
        let (pm, pl) = (self.pm, self.pl);
        (0..tree.n_nodes()).into_par_iter().for_each(|node| {
            let far = tree.far(node);
            if far.is_empty() {
                return;
            }
            let mut ws = TranslationScratch::new(pm.max(pl));
            let dst = unsafe { col_mut_unchecked(node_l, node) };
            for (k, &src) in far.iter().enumerate() {
                let c = sub(tree.node_center(src), tree.node_center(node));
                m2l_rotation(
                    &c,
                    tree.node_radius(src),
                    tree.node_radius(node),
                    pm,
                    pl,
                    scales,
                    &mut ws,
                    1.0,
                    col_ref(node_m, src),
                    if k == 0 { 0.0 } else { 1.0 },
                    dst,
                );
            }
        });
    }

    /// Top-down L2L: every non-root node accumulates its parent's local
    /// expansion onto its own.
    pub fn downward_pass(&mut self, tree: &ClusterTree, scales: &HarmonicScales) {
        let node_l = &self.node_l;
        let pl = self.pl;
        for level in tree.levels().iter().skip(1) {
            level.par_iter().for_each(|&node| {
                let Some(parent) = tree.parent(node) else { return };
                let mut ws = TranslationScratch::new(pl);
                let dst = unsafe { col_mut_unchecked(node_l, node) };
                let c = sub(tree.node_center(parent), tree.node_center(node));
                l2l_rotation(
                    &c,
                    tree.node_radius(parent),
                    tree.node_radius(node),
                    pl,
                    scales,
                    &mut ws,
                    1.0,
                    col_ref(node_l, parent),
                    1.0,
                    dst,
                );
            });
        }
    }

    /// Full forward pass: M2M, M2L, L2L. Leaf multipoles must be installed
    /// beforehand; leaf locals are ready for [`Self::eval_leaf_local`] after.
    pub fn forward_pass(&mut self, tree: &ClusterTree, scales: &HarmonicScales) {
        self.upward_pass(tree, scales);
        self.interaction_pass(tree, scales);
        self.downward_pass(tree, scales);
    }

    /// Transpose of [`Self::downward_pass`], run bottom-up: parents gather
    /// their children's dual locals.
    pub fn adjoint_collection_pass(&mut self, tree: &ClusterTree, scales: &HarmonicScales) {
        let node_l = &self.node_l;
        let pl = self.pl;
        for level in tree.levels().iter().rev() {
            level.par_iter().for_each(|&node| {
                let Some((a, b)) = tree.children(node) else { return };
                let mut ws = TranslationScratch::new(pl);
                let dst = unsafe { col_mut_unchecked(node_l, node) };
                for child in [a, b] {
                    let c = sub(tree.node_center(node), tree.node_center(child));
                    l2l_rotation_adj(
                        &c,
                        tree.node_radius(node),
                        tree.node_radius(child),
                        pl,
                        scales,
                        &mut ws,
                        1.0,
                        col_ref(node_l, child),
                        1.0,
                        dst,
                    );
                }
            });
        }
    }

    /// Transpose of [`Self::interaction_pass`]: dual multipoles collect the
    /// dual locals of the (symmetric) far lists. Overwrites the multipole
    /// columns.
    pub fn adjoint_interaction_pass(&mut self, tree: &ClusterTree, scales: &HarmonicScales) {
        self.zero_multipoles();
        let node_m = &self.node_m;
        let node_l = &self.node_l;
        let (pm, pl) = (self.pm, self.pl);
        (0..tree.n_nodes()).into_par_iter().for_each(|node| {
            let far = tree.far(node);
            if far.is_empty() {
                return;
            }
            let mut ws = TranslationScratch::new(pm.max(pl));
            let dst = unsafe { col_mut_unchecked(node_m, node) };
            for (k, &other) in far.iter().enumerate() {
                let c = sub(tree.node_center(node), tree.node_center(other));
                m2l_rotation_adj(
                    &c,
                    tree.node_radius(node),
                    tree.node_radius(other),
                    pm,
                    pl,
                    scales,
                    &mut ws,
                    1.0,
                    col_ref(node_l, other),
                    if k == 0 { 0.0 } else { 1.0 },
                    dst,
                );
            }
        });
    }

    /// Transpose of [`Self::upward_pass`], run top-down: children accumulate
    /// their parent's dual multipole.
    pub fn adjoint_distribution_pass(&mut self, tree: &ClusterTree, scales: &HarmonicScales) {
        let node_m = &self.node_m;
        let pm = self.pm;
        for level in tree.levels().iter().skip(1) {
            level.par_iter().for_each(|&node| {
                let Some(parent) = tree.parent(node) else { return };
                let mut ws = TranslationScratch::new(pm);
                let dst = unsafe { col_mut_unchecked(node_m, node) };
                let c = sub(tree.node_center(node), tree.node_center(parent));
                m2m_rotation_adj(
                    &c,
                    tree.node_radius(node),
                    tree.node_radius(parent),
                    pm,
                    scales,
                    &mut ws,
                    1.0,
                    col_ref(node_m, parent),
                    1.0,
                    dst,
                );
            });
        }
    }

    /// Full adjoint pass, the exact transpose of [`Self::forward_pass`]:
    /// dual leaf locals must be installed beforehand (zero the locals, then
    /// [`Self::accumulate_point_dual`]); dual leaf multipoles are available
    /// from [`Self::leaf_multipole`] after.
    pub fn adjoint_pass(&mut self, tree: &ClusterTree, scales: &HarmonicScales) {
        self.adjoint_collection_pass(tree, scales);
        self.adjoint_interaction_pass(tree, scales);
        self.adjoint_distribution_pass(tree, scales);
    }
}

/// Contracts a dual multipole column with the multipole basis of a unit point
/// charge at `c` (the P2M adjoint): returns the dual source strength.
pub fn p2m_adj(
    c: &[f64; 3],
    dual: &[f64],
    dst_r: f64,
    p: usize,
    scales: &HarmonicScales,
    ws: &mut BasisWorkspace,
) -> f64 {
    let mut basis = vec![0.0; nbasis(p)];
    crate::translations::p2m(c, 1.0, dst_r, p, scales, ws, 1.0, 0.0, &mut basis);
    dual.iter().zip(&basis).map(|(d, b)| d * b).sum()
}
