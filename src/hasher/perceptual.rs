//! DCT perceptual hash for images.
//!
//! The image is reduced to a 32x32 grayscale thumbnail, transformed with a
//! 2-D DCT-II, and the 8x8 lowest frequencies are thresholded against their
//! median. The DC term is left out of the median since it only tracks
//! overall brightness.

use std::f64::consts::PI;
use std::path::Path;

use image::imageops::FilterType;
use image::{DynamicImage, ImageReader};

use crate::error::{Error, Result};

const SIZE: usize = 32;
const LOW: usize = 8;

/// Decode `path` and return its perceptual hash as 16 hex digits.
pub fn perceptual_hash(path: &Path) -> Result<String> {
    let image = ImageReader::open(path)?
        .with_guessed_format()?
        .decode()
        .map_err(|e| Error::format(path, e.to_string()))?;

    Ok(format!("{:016x}", dct_hash(&image)))
}

/// 64-bit perceptual hash of a decoded image.
pub fn dct_hash(image: &DynamicImage) -> u64 {
    let gray = image
        .resize_exact(SIZE as u32, SIZE as u32, FilterType::Triangle)
        .to_luma8();
    let pixels: Vec<f64> = gray.pixels().map(|p| f64::from(p.0[0])).collect();

    // cos_table[k][n] = cos(pi * (2n + 1) * k / 2N)
    let mut cos_table = [[0f64; SIZE]; LOW];
    for (k, row) in cos_table.iter_mut().enumerate() {
        for (n, value) in row.iter_mut().enumerate() {
            *value = (PI * (2 * n + 1) as f64 * k as f64 / (2 * SIZE) as f64).cos();
        }
    }

    // Separable transform: rows first, then columns, low frequencies only.
    let mut rows = [[0f64; LOW]; SIZE];
    for (y, out) in rows.iter_mut().enumerate() {
        let line = &pixels[y * SIZE..(y + 1) * SIZE];
        for (u, coeff) in out.iter_mut().enumerate() {
            *coeff = line.iter().zip(cos_table[u].iter()).map(|(p, c)| p * c).sum();
        }
    }

    let mut coeffs = [0f64; LOW * LOW];
    for v in 0..LOW {
        for u in 0..LOW {
            coeffs[v * LOW + u] = (0..SIZE).map(|y| rows[y][u] * cos_table[v][y]).sum();
        }
    }

    let mut ac: Vec<f64> = coeffs[1..].to_vec();
    ac.sort_by(|a, b| a.total_cmp(b));
    let median = ac[ac.len() / 2];

    coeffs
        .iter()
        .enumerate()
        .filter(|(_, c)| **c > median)
        .fold(0u64, |hash, (i, _)| hash | (1 << i))
}
