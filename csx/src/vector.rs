//! Dense vectors and the element-wise operations the API exposes.

use log::debug;
use rand::Rng;

use crate::error::{Result, SparseError};

/// A dense vector of doubles.
#[derive(Debug, Clone, PartialEq)]
pub struct Vector {
    elements: Vec<f64>,
}

impl Vector {
    pub fn new(size: usize) -> Vector {
        Vector {
            elements: vec![0.0; size],
        }
    }

    /// Copies `buff` into a fresh vector.
    pub fn from_slice(buff: &[f64]) -> Vector {
        Vector {
            elements: buff.to_vec(),
        }
    }

    pub fn random(size: usize) -> Vector {
        Vector::random_range(size, -0.1, 0.1)
    }

    pub fn random_range(size: usize, min: f64, max: f64) -> Vector {
        let mut rng = rand::thread_rng();
        Vector {
            elements: (0..size).map(|_| rng.gen_range(min..=max)).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.elements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    pub fn as_slice(&self) -> &[f64] {
        &self.elements
    }

    pub fn as_mut_slice(&mut self) -> &mut [f64] {
        &mut self.elements
    }

    pub fn init(&mut self, val: f64) {
        self.elements.fill(val);
    }

    pub fn init_part(&mut self, val: f64, start: usize, end: usize) {
        self.elements[start..end].fill(val);
    }

    pub fn set_entry(&mut self, idx: usize, val: f64) -> Result<()> {
        if idx >= self.elements.len() {
            return Err(SparseError::ArgInvalid("vector index out of bounds"));
        }
        self.elements[idx] = val;
        Ok(())
    }

    /// `self = v1 * num`.
    pub fn scale_from(&mut self, v1: &Vector, num: f64) {
        for (dst, src) in self.elements.iter_mut().zip(&v1.elements) {
            *dst = src * num;
        }
    }

    /// `self[start..end] = v1[start..end] * num`.
    pub fn scale_part(&mut self, v1: &Vector, num: f64, start: usize, end: usize) {
        for i in start..end {
            self.elements[i] = v1.elements[i] * num;
        }
    }

    /// `self = v1 + v2`.
    pub fn add_from(&mut self, v1: &Vector, v2: &Vector) {
        for (dst, (a, b)) in self.elements.iter_mut().zip(v1.elements.iter().zip(&v2.elements)) {
            *dst = a + b;
        }
    }

    pub fn add_part(&mut self, v1: &Vector, v2: &Vector, start: usize, end: usize) {
        for i in start..end {
            self.elements[i] = v1.elements[i] + v2.elements[i];
        }
    }

    /// `self = v1 - v2`.
    pub fn sub_from(&mut self, v1: &Vector, v2: &Vector) {
        for (dst, (a, b)) in self.elements.iter_mut().zip(v1.elements.iter().zip(&v2.elements)) {
            *dst = a - b;
        }
    }

    /// `self = v1 + num * v2`.
    pub fn scale_add(&mut self, v1: &Vector, v2: &Vector, num: f64) {
        for (dst, (a, b)) in self.elements.iter_mut().zip(v1.elements.iter().zip(&v2.elements)) {
            *dst = a + num * b;
        }
    }

    pub fn scale_add_part(&mut self, v1: &Vector, v2: &Vector, num: f64, start: usize, end: usize) {
        for i in start..end {
            self.elements[i] = v1.elements[i] + num * v2.elements[i];
        }
    }

    /// Dot product.
    pub fn dot(&self, other: &Vector) -> f64 {
        self.elements
            .iter()
            .zip(&other.elements)
            .map(|(a, b)| a * b)
            .sum()
    }

    pub fn copy_from(&mut self, other: &Vector) {
        self.elements.copy_from_slice(&other.elements);
    }

    /// Element-wise comparison within `eps` relative tolerance; logs and
    /// reports the first mismatch.
    pub fn compare(&self, other: &Vector, eps: f64) -> bool {
        if self.len() != other.len() {
            return false;
        }
        for (i, (a, b)) in self.elements.iter().zip(&other.elements).enumerate() {
            if (a - b).abs() > eps * a.abs().max(b.abs()).max(1.0) {
                debug!("vectors differ at {i}: {a} != {b}");
                return false;
            }
        }
        true
    }

    /// Permutes into a new vector: entry `i` lands at `perm[i]`.
    pub fn reorder(&self, perm: &[usize]) -> Result<Vector> {
        if perm.len() != self.len() {
            return Err(SparseError::ArgInvalid("permutation size mismatch"));
        }
        let mut out = vec![0.0; self.len()];
        for (i, &p) in perm.iter().enumerate() {
            out[p] = self.elements[i];
        }
        Ok(Vector { elements: out })
    }

    /// Inverse of [`Vector::reorder`]: entry `perm[i]` comes back to `i`.
    pub fn inv_reorder(&self, perm: &[usize]) -> Result<Vector> {
        if perm.len() != self.len() {
            return Err(SparseError::ArgInvalid("permutation size mismatch"));
        }
        let mut out = vec![0.0; self.len()];
        for (i, &p) in perm.iter().enumerate() {
            out[i] = self.elements[p];
        }
        Ok(Vector { elements: out })
    }

    pub fn print(&self) {
        println!(
            "[{}]",
            self.elements
                .iter()
                .map(|v| format!("{v:.6}"))
                .collect::<Vec<_>>()
                .join(", ")
        );
    }
}

impl std::ops::Index<usize> for Vector {
    type Output = f64;

    fn index(&self, idx: usize) -> &f64 {
        &self.elements[idx]
    }
}

impl std::ops::IndexMut<usize> for Vector {
    fn index_mut(&mut self, idx: usize) -> &mut f64 {
        &mut self.elements[idx]
    }
}
