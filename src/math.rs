// Copyright (c) 2022-2024, Richard Lincoln. All rights reserved.

use num_complex::Complex64;

pub const J: Complex64 = Complex64 { re: 0.0, im: 1.0 };

/// Infinity norm that is zero for empty input.
pub fn norm_inf(a: &[f64]) -> f64 {
    if a.is_empty() {
        0.0
    } else {
        full::slice::norm_inf(a).max(0.0)
    }
}

/// Largest element, or `None` if `a` is empty.
pub fn max(a: &[f64]) -> Option<f64> {
    a.iter().copied().reduce(f64::max)
}

pub fn dot(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(a, b)| a * b).sum()
}

pub fn norm(a: &[f64]) -> f64 {
    dot(a, a).sqrt()
}
