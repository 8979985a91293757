//! Two-dimensional sample grids shared by every module

use crate::error::*;

/// Dimensions of the simulated retina
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct GridShape {
    /// Number of columns (x extent)
    pub columns: usize,
    /// Number of rows (y extent)
    pub rows: usize,
    /// Pixels per degree of visual angle
    pub pixels_per_degree: f64,
}

impl GridShape {
    /// Create a new shape with validation
    pub fn new(columns: usize, rows: usize, pixels_per_degree: f64) -> Result<Self> {
        if columns == 0 {
            return Err(RuntimeError::invalid_parameter("columns", "0", "> 0"));
        }
        if rows == 0 {
            return Err(RuntimeError::invalid_parameter("rows", "0", "> 0"));
        }
        if !(pixels_per_degree > 0.0) || !pixels_per_degree.is_finite() {
            return Err(RuntimeError::invalid_parameter(
                "pixels_per_degree",
                pixels_per_degree.to_string(),
                "> 0.0",
            ));
        }
        Ok(Self {
            columns,
            rows,
            pixels_per_degree,
        })
    }

    /// Number of pixels
    pub fn len(&self) -> usize {
        self.columns * self.rows
    }

    /// True when the shape has no pixels
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Row-major grid of per-pixel samples.
///
/// Index `y * columns + x` holds the value at column `x`, row `y`.
#[derive(Debug, Clone, PartialEq)]
pub struct Grid {
    columns: usize,
    rows: usize,
    data: Vec<f64>,
}

impl Grid {
    /// Create a zero-filled grid
    pub fn new(columns: usize, rows: usize) -> Self {
        Self::filled(columns, rows, 0.0)
    }

    /// Create a grid with every sample set to `value`
    pub fn filled(columns: usize, rows: usize, value: f64) -> Self {
        Self {
            columns,
            rows,
            data: vec![value; columns * rows],
        }
    }

    /// Create a zero-filled grid matching a retina shape
    pub fn for_shape(shape: &GridShape) -> Self {
        Self::new(shape.columns, shape.rows)
    }

    /// Wrap row-major samples
    pub fn from_vec(columns: usize, rows: usize, data: Vec<f64>) -> Result<Self> {
        if data.len() != columns * rows {
            return Err(RuntimeError::invalid_config(format!(
                "grid of {}x{} needs {} samples, got {}",
                columns,
                rows,
                columns * rows,
                data.len()
            )));
        }
        Ok(Self {
            columns,
            rows,
            data,
        })
    }

    /// Number of columns
    pub fn columns(&self) -> usize {
        self.columns
    }

    /// Number of rows
    pub fn rows(&self) -> usize {
        self.rows
    }

    /// `(columns, rows)`
    pub fn dimensions(&self) -> (usize, usize) {
        (self.columns, self.rows)
    }

    /// Number of samples
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// True when the grid holds no samples
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Value at column `x`, row `y`
    pub fn get(&self, x: usize, y: usize) -> Option<f64> {
        if x < self.columns && y < self.rows {
            Some(self.data[y * self.columns + x])
        } else {
            None
        }
    }

    /// Set the value at column `x`, row `y`; out-of-range writes are ignored
    pub fn set(&mut self, x: usize, y: usize, value: f64) {
        if x < self.columns && y < self.rows {
            self.data[y * self.columns + x] = value;
        }
    }

    /// Row-major samples
    pub fn as_slice(&self) -> &[f64] {
        &self.data
    }

    /// Mutable row-major samples
    pub fn as_mut_slice(&mut self) -> &mut [f64] {
        &mut self.data
    }

    /// Copy of row `y`
    pub fn row(&self, y: usize) -> Option<Vec<f64>> {
        if y >= self.rows {
            return None;
        }
        let start = y * self.columns;
        Some(self.data[start..start + self.columns].to_vec())
    }

    /// Copy of column `x`
    pub fn column(&self, x: usize) -> Option<Vec<f64>> {
        if x >= self.columns {
            return None;
        }
        Some(
            (0..self.rows)
                .map(|y| self.data[y * self.columns + x])
                .collect(),
        )
    }

    /// Set every sample to `value`
    pub fn fill(&mut self, value: f64) {
        self.data.iter_mut().for_each(|v| *v = value);
    }

    /// Overwrite this grid with the samples of `other`
    pub fn copy_from(&mut self, other: &Grid) -> Result<()> {
        self.ensure_same_shape(other)?;
        self.data.copy_from_slice(&other.data);
        Ok(())
    }

    /// Accumulate `scale * other` into this grid
    pub fn add_scaled(&mut self, other: &Grid, scale: f64) -> Result<()> {
        self.ensure_same_shape(other)?;
        for (dst, src) in self.data.iter_mut().zip(&other.data) {
            *dst += scale * src;
        }
        Ok(())
    }

    /// Arithmetic mean of all samples
    pub fn mean(&self) -> f64 {
        if self.data.is_empty() {
            return 0.0;
        }
        self.data.iter().sum::<f64>() / self.data.len() as f64
    }

    /// First non-finite sample as `(index, value)`
    pub fn find_non_finite(&self) -> Option<(usize, f64)> {
        self.data
            .iter()
            .enumerate()
            .find(|(_, v)| !v.is_finite())
            .map(|(i, v)| (i, *v))
    }

    /// Write the transpose of this grid into `dst`, reshaping it as needed
    pub fn transpose_into(&self, dst: &mut Grid) {
        dst.columns = self.rows;
        dst.rows = self.columns;
        dst.data.resize(self.data.len(), 0.0);
        for y in 0..self.rows {
            for x in 0..self.columns {
                dst.data[x * self.rows + y] = self.data[y * self.columns + x];
            }
        }
    }

    /// Error unless `other` has the same dimensions
    pub fn ensure_same_shape(&self, other: &Grid) -> Result<()> {
        if self.dimensions() != other.dimensions() {
            return Err(RuntimeError::dimension_mismatch(
                self.dimensions(),
                other.dimensions(),
            ));
        }
        Ok(())
    }
}
