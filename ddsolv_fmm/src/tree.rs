/////////////////////////////////////////////////////////////////////////////////////////////
//
// Binary bounding-sphere hierarchy with near/far interaction lists.
//
// Created on: 12 Jun 2026     Author: Daniel Owen
//
// Copyright (c) 2025, Maptek Pty Ltd. All rights reserved. Licensed under the MIT License.
//
/////////////////////////////////////////////////////////////////////////////////////////////

//! Binary bounding-sphere hierarchy with near/far interaction lists.
//!
//! The tree is built once per geometry and immutable afterwards. Each leaf
//! holds exactly one input sphere; internal nodes split their spheres at the
//! median along the widest coordinate extent and carry the smallest sphere
//! enclosing both children. A dual recursion over node pairs classifies every
//! leaf-leaf interaction exactly once as *far* (admissible for M2L, when the
//! centers satisfy `|c1 - c2| >= ratio * (r1 + r2)`) or *near* (evaluated
//! directly). Far pairs may join nodes at different depths; the lists are
//! symmetric by construction.

use std::fmt;

/// Construction failures for [`ClusterTree`].
#[derive(Debug, Clone, PartialEq)]
pub enum TreeError {
    /// No input spheres were provided.
    NoSpheres,
    /// `centers` and `radii` lengths disagree.
    DimensionMismatch { centers: usize, radii: usize },
    /// A sphere radius was zero, negative or non-finite.
    InvalidRadius { index: usize, radius: f64 },
    /// The separation ratio must be at least one for the far-field series to
    /// converge.
    InvalidSeparationRatio { ratio: f64 },
}

impl fmt::Display for TreeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TreeError::NoSpheres => write!(f, "cluster tree requires at least one sphere"),
            TreeError::DimensionMismatch { centers, radii } => {
                write!(f, "centers ({centers}) and radii ({radii}) lengths disagree")
            }
            TreeError::InvalidRadius { index, radius } => {
                write!(f, "sphere {index} has invalid radius {radius}")
            }
            TreeError::InvalidSeparationRatio { ratio } => {
                write!(f, "separation ratio {ratio} must be >= 1")
            }
        }
    }
}

impl std::error::Error for TreeError {}

/// Immutable cluster hierarchy over a set of spheres.
#[derive(Debug, Clone)]
pub struct ClusterTree {
    centers: Vec<[f64; 3]>,
    radii: Vec<f64>,
    parent: Vec<Option<usize>>,
    children: Vec<Option<(usize, usize)>>,
    leaf_atom: Vec<Option<usize>>,
    atom_leaf: Vec<usize>,
    levels: Vec<Vec<usize>>,
    far: Vec<Vec<usize>>,
    near: Vec<Vec<usize>>,
    near_atoms: Vec<Vec<usize>>,
}

impl ClusterTree {
    /// Builds the hierarchy and freezes its interaction lists.
    pub fn new(
        centers: &[[f64; 3]],
        radii: &[f64],
        separation_ratio: f64,
    ) -> Result<Self, TreeError> {
        if centers.is_empty() {
            return Err(TreeError::NoSpheres);
        }
        if centers.len() != radii.len() {
            return Err(TreeError::DimensionMismatch {
                centers: centers.len(),
                radii: radii.len(),
            });
        }
        for (i, &r) in radii.iter().enumerate() {
            if !(r.is_finite() && r > 0.0) {
                return Err(TreeError::InvalidRadius { index: i, radius: r });
            }
        }
        if !(separation_ratio.is_finite() && separation_ratio >= 1.0) {
            return Err(TreeError::InvalidSeparationRatio { ratio: separation_ratio });
        }

        let n = centers.len();
        let mut tree = Self {
            centers: Vec::with_capacity(2 * n - 1),
            radii: Vec::with_capacity(2 * n - 1),
            parent: Vec::with_capacity(2 * n - 1),
            children: Vec::with_capacity(2 * n - 1),
            leaf_atom: Vec::with_capacity(2 * n - 1),
            atom_leaf: vec![0; n],
            levels: Vec::new(),
            far: Vec::new(),
            near: Vec::new(),
            near_atoms: Vec::new(),
        };
        let mut order: Vec<usize> = (0..n).collect();
        tree.build(&mut order, centers, radii, 0);

        let nn = tree.centers.len();
        tree.far = vec![Vec::new(); nn];
        tree.near = vec![Vec::new(); nn];
        tree.classify(0, 0, separation_ratio);

        tree.near_atoms = vec![Vec::new(); n];
        for a in 0..n {
            let leaf = tree.atom_leaf[a];
            let mut list: Vec<usize> = tree.near[leaf]
                .iter()
                .map(|&node| tree.leaf_atom[node].expect("near lists pair leaves"))
                .collect();
            list.sort_unstable();
            tree.near_atoms[a] = list;
        }
        Ok(tree)
    }

    fn build(
        &mut self,
        atoms: &mut [usize],
        centers: &[[f64; 3]],
        radii: &[f64],
        depth: usize,
    ) -> usize {
        let node = self.centers.len();
        self.centers.push([0.0; 3]);
        self.radii.push(0.0);
        self.parent.push(None);
        self.children.push(None);
        self.leaf_atom.push(None);
        if self.levels.len() <= depth {
            self.levels.push(Vec::new());
        }
        self.levels[depth].push(node);

        if atoms.len() == 1 {
            let a = atoms[0];
            self.centers[node] = centers[a];
            self.radii[node] = radii[a];
            self.leaf_atom[node] = Some(a);
            self.atom_leaf[a] = node;
            return node;
        }

        // Median split along the widest extent of the sphere centers.
        let mut lo = [f64::INFINITY; 3];
        let mut hi = [f64::NEG_INFINITY; 3];
        for &a in atoms.iter() {
            for d in 0..3 {
                lo[d] = lo[d].min(centers[a][d]);
                hi[d] = hi[d].max(centers[a][d]);
            }
        }
        let mut axis = 0;
        for d in 1..3 {
            if hi[d] - lo[d] > hi[axis] - lo[axis] {
                axis = d;
            }
        }
        atoms.sort_unstable_by(|&a, &b| {
            centers[a][axis]
                .partial_cmp(&centers[b][axis])
                .expect("sphere centers must be finite")
        });
        let mid = atoms.len() / 2;
        let (left, right) = atoms.split_at_mut(mid);
        let lc = self.build(left, centers, radii, depth + 1);
        let rc = self.build(right, centers, radii, depth + 1);
        self.children[node] = Some((lc, rc));
        self.parent[lc] = Some(node);
        self.parent[rc] = Some(node);

        let (c, r) = enclosing_sphere(
            self.centers[lc],
            self.radii[lc],
            self.centers[rc],
            self.radii[rc],
        );
        self.centers[node] = c;
        self.radii[node] = r;
        node
    }

    /// Dual recursion partitioning all leaf-leaf interactions into far node
    /// pairs and near leaf pairs.
    fn classify(&mut self, i: usize, j: usize, ratio: f64) {
        if i == j {
            match self.children[i] {
                None => self.near[i].push(i),
                Some((a, b)) => {
                    self.classify(a, a, ratio);
                    self.classify(a, b, ratio);
                    self.classify(b, b, ratio);
                }
            }
            return;
        }
        let d = dist(&self.centers[i], &self.centers[j]);
        if d >= ratio * (self.radii[i] + self.radii[j]) {
            self.far[i].push(j);
            self.far[j].push(i);
            return;
        }
        match (self.children[i], self.children[j]) {
            (None, None) => {
                self.near[i].push(j);
                self.near[j].push(i);
            }
            (Some((a, b)), None) => {
                self.classify(a, j, ratio);
                self.classify(b, j, ratio);
            }
            (None, Some((a, b))) => {
                self.classify(i, a, ratio);
                self.classify(i, b, ratio);
            }
            (Some((ia, ib)), Some((ja, jb))) => {
                // Split the bigger cluster to keep the recursion balanced.
                if self.radii[i] >= self.radii[j] {
                    self.classify(ia, j, ratio);
                    self.classify(ib, j, ratio);
                } else {
                    self.classify(i, ja, ratio);
                    self.classify(i, jb, ratio);
                }
            }
        }
    }

    #[inline]
    pub fn n_nodes(&self) -> usize {
        self.centers.len()
    }

    #[inline]
    pub fn n_atoms(&self) -> usize {
        self.atom_leaf.len()
    }

    #[inline]
    pub fn node_center(&self, node: usize) -> [f64; 3] {
        self.centers[node]
    }

    #[inline]
    pub fn node_radius(&self, node: usize) -> f64 {
        self.radii[node]
    }

    #[inline]
    pub fn children(&self, node: usize) -> Option<(usize, usize)> {
        self.children[node]
    }

    #[inline]
    pub fn parent(&self, node: usize) -> Option<usize> {
        self.parent[node]
    }

    /// Atom held by a leaf, `None` for internal nodes.
    #[inline]
    pub fn leaf_atom(&self, node: usize) -> Option<usize> {
        self.leaf_atom[node]
    }

    /// Leaf node holding the given atom.
    #[inline]
    pub fn atom_leaf(&self, atom: usize) -> usize {
        self.atom_leaf[atom]
    }

    /// Nodes grouped by depth, root first.
    #[inline]
    pub fn levels(&self) -> &[Vec<usize>] {
        &self.levels
    }

    /// Admissible far nodes of `node` (symmetric).
    #[inline]
    pub fn far(&self, node: usize) -> &[usize] {
        &self.far[node]
    }

    /// Near leaves of a leaf `node`, including the leaf itself.
    #[inline]
    pub fn near(&self, node: usize) -> &[usize] {
        &self.near[node]
    }

    /// Atoms whose leaves are near the given atom's leaf (includes `atom`).
    #[inline]
    pub fn near_atoms(&self, atom: usize) -> &[usize] {
        &self.near_atoms[atom]
    }
}

fn dist(a: &[f64; 3], b: &[f64; 3]) -> f64 {
    let d = [a[0] - b[0], a[1] - b[1], a[2] - b[2]];
    (d[0] * d[0] + d[1] * d[1] + d[2] * d[2]).sqrt()
}

/// Smallest sphere enclosing two spheres.
fn enclosing_sphere(c1: [f64; 3], r1: f64, c2: [f64; 3], r2: f64) -> ([f64; 3], f64) {
    let d = dist(&c1, &c2);
    if d + r2 <= r1 {
        return (c1, r1);
    }
    if d + r1 <= r2 {
        return (c2, r2);
    }
    let r = 0.5 * (d + r1 + r2);
    let t = (r - r1) / d;
    (
        [
            c1[0] + t * (c2[0] - c1[0]),
            c1[1] + t * (c2[1] - c1[1]),
            c1[2] + t * (c2[2] - c1[2]),
        ],
        r,
    )
}
