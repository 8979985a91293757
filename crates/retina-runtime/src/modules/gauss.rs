//! Spatial Gaussian filtering
//!
//! Young and van Vliet recursive Gaussian, run down every column and then
//! along every row. Line ends use the Triggs and Sdika boundary conditions,
//! which behave as if edge pixels were replicated to infinity. Lines shorter
//! than four samples, and sigmas too small for the recursive
//! approximation, fall back to a direct normalised convolution.

use super::{Module, ModuleParams, PortInputs};
use crate::{error::*, grid::{Grid, GridShape}};

#[cfg(feature = "parallel")]
use rayon::prelude::*;

/// Smallest sigma (pixels) handled by the recursive filter
const MIN_RECURSIVE_SIGMA: f64 = 0.5;

/// Shortest line handled by the recursive filter
const MIN_RECURSIVE_LEN: usize = 4;

/// Parameters for [`GaussFilter`]
#[derive(Debug, Clone, PartialEq)]
pub struct GaussFilterParams {
    /// Standard deviation at the fovea (degrees)
    pub sigma_deg: f64,
    /// Grow sigma with eccentricity
    pub space_variant: bool,
    /// Density fall-off rate beyond `r0_deg`
    pub k: f64,
    /// Eccentricity (degrees) where density starts to fall
    pub r0_deg: f64,
}

impl Default for GaussFilterParams {
    fn default() -> Self {
        Self {
            sigma_deg: 0.0,
            space_variant: false,
            k: 0.0,
            r0_deg: 0.0,
        }
    }
}

impl GaussFilterParams {
    /// Create space-invariant parameters with validation
    pub fn new(sigma_deg: f64) -> Result<Self> {
        let params = Self {
            sigma_deg,
            ..Default::default()
        };
        params.validate()?;
        Ok(params)
    }

    /// Enable space-variant sigma with density fall-off `k` beyond `r0_deg`
    pub fn with_space_variance(mut self, k: f64, r0_deg: f64) -> Self {
        self.space_variant = true;
        self.k = k;
        self.r0_deg = r0_deg;
        self
    }

    /// Read `sigma`, `spaceVariantSigma`, `K` and `R0`
    pub fn from_params(params: &ModuleParams) -> Result<Self> {
        params.ensure_known("GaussFilter", &["sigma", "spaceVariantSigma", "K", "R0"])?;
        let p = Self {
            sigma_deg: params.number_or("sigma", 0.0)?,
            space_variant: params.flag_or("spaceVariantSigma", false)?,
            k: params.number_or("K", 0.0)?,
            r0_deg: params.number_or("R0", 0.0)?,
        };
        p.validate()?;
        Ok(p)
    }

    /// Validate parameters
    pub fn validate(&self) -> Result<()> {
        if !(self.sigma_deg >= 0.0) || !self.sigma_deg.is_finite() {
            return Err(RuntimeError::invalid_parameter(
                "sigma",
                self.sigma_deg.to_string(),
                ">= 0.0",
            ));
        }
        if self.k < 0.0 {
            return Err(RuntimeError::invalid_parameter(
                "K",
                self.k.to_string(),
                ">= 0.0",
            ));
        }
        if self.r0_deg < 0.0 {
            return Err(RuntimeError::invalid_parameter(
                "R0",
                self.r0_deg.to_string(),
                ">= 0.0",
            ));
        }
        Ok(())
    }

    /// Relative cell density at eccentricity `r_deg`
    pub fn density(&self, r_deg: f64) -> f64 {
        if r_deg > self.r0_deg {
            1.0 / (1.0 + self.k * (r_deg - self.r0_deg))
        } else {
            1.0
        }
    }
}

/// Recursive filter coefficients for one sigma
#[derive(Debug, Clone, Copy, PartialEq)]
struct Coefficients {
    sigma: f64,
    b: f64,
    b1: f64,
    b2: f64,
    b3: f64,
    /// Triggs boundary matrix, row-major
    m: [f64; 9],
}

impl Coefficients {
    fn for_sigma(sigma: f64) -> Self {
        if sigma < MIN_RECURSIVE_SIGMA {
            return Self {
                sigma,
                b: 1.0,
                b1: 0.0,
                b2: 0.0,
                b3: 0.0,
                m: [0.0; 9],
            };
        }

        let q = if sigma < 2.5 {
            3.97156 - 4.14554 * (1.0 - 0.26891 * sigma).sqrt()
        } else {
            0.98711 * sigma - 0.96330
        };
        let (q2, q3) = (q * q, q * q * q);
        let b0 = 1.57825 + 2.44413 * q + 1.4281 * q2 + 0.422205 * q3;
        let b1 = (2.44413 * q + 2.85619 * q2 + 1.26661 * q3) / b0;
        let b2 = (-1.4281 * q2 - 1.26661 * q3) / b0;
        let b3 = (0.422205 * q3) / b0;
        let b = 1.0 - (b1 + b2 + b3);

        let norm = (1.0 + b1 - b2 + b3) * (1.0 + b2 + (b1 - b3) * b3);
        let m = [
            -b3 * b1 + 1.0 - b3 * b3 - b2,
            (b3 + b1) * (b2 + b3 * b1),
            b3 * (b1 + b3 * b2),
            b1 + b3 * b2,
            -(b2 - 1.0) * (b2 + b3 * b1),
            -(b3 * b1 + b3 * b3 + b2 - 1.0) * b3,
            b3 * b1 + b2 + b1 * b1 - b2 * b2,
            b1 * b2 + b3 * b2 * b2 - b1 * b3 * b3 - b3 * b3 * b3 - b3 * b2 + b3,
            b3 * (b1 + b3 * b2),
        ]
        .map(|v| v / norm);

        Self {
            sigma,
            b,
            b1,
            b2,
            b3,
            m,
        }
    }

    fn recursive(&self) -> bool {
        self.sigma >= MIN_RECURSIVE_SIGMA
    }
}

/// Coefficient source for one line
#[derive(Clone, Copy)]
enum Coeffs<'a> {
    Uniform(&'a Coefficients),
    Varying(&'a [Coefficients]),
}

impl<'a> Coeffs<'a> {
    fn at(&self, j: usize) -> &'a Coefficients {
        match *self {
            Coeffs::Uniform(c) => c,
            Coeffs::Varying(v) => &v[j],
        }
    }

    fn line(&self, i: usize, len: usize) -> Coeffs<'a> {
        match *self {
            Coeffs::Uniform(c) => Coeffs::Uniform(c),
            Coeffs::Varying(v) => Coeffs::Varying(&v[i * len..(i + 1) * len]),
        }
    }

    fn recursive(&self, len: usize) -> bool {
        match *self {
            Coeffs::Uniform(c) => c.recursive(),
            Coeffs::Varying(v) => v[..len].iter().all(Coefficients::recursive),
        }
    }
}

#[derive(Debug, Clone)]
enum Kernel {
    Identity,
    Uniform(Coefficients),
    /// Per-pixel coefficients in both traversal layouts
    Varying {
        row_major: Vec<Coefficients>,
        column_major: Vec<Coefficients>,
    },
}

/// Spatial Gaussian blur with optional eccentricity-dependent sigma
#[derive(Debug, Clone)]
pub struct GaussFilter {
    params: GaussFilterParams,
    shape: GridShape,
    kernel: Kernel,
    scratch: Grid,
    output: Grid,
}

impl GaussFilter {
    /// Create a filter for `shape`; sigma is converted to pixels here
    pub fn new(params: GaussFilterParams, shape: &GridShape) -> Result<Self> {
        params.validate()?;
        let sigma_px = params.sigma_deg * shape.pixels_per_degree;

        let kernel = if sigma_px == 0.0 {
            Kernel::Identity
        } else if params.space_variant {
            let mut row_major = Vec::with_capacity(shape.len());
            for y in 0..shape.rows {
                for x in 0..shape.columns {
                    let sigma = sigma_at(&params, shape, sigma_px, x, y);
                    row_major.push(Coefficients::for_sigma(sigma));
                }
            }
            let mut column_major = Vec::with_capacity(shape.len());
            for x in 0..shape.columns {
                for y in 0..shape.rows {
                    column_major.push(row_major[y * shape.columns + x]);
                }
            }
            Kernel::Varying {
                row_major,
                column_major,
            }
        } else {
            Kernel::Uniform(Coefficients::for_sigma(sigma_px))
        };

        log::debug!(
            "GaussFilter sigma={}px over {}x{} (space variant: {})",
            sigma_px,
            shape.columns,
            shape.rows,
            params.space_variant
        );

        Ok(Self {
            params,
            shape: *shape,
            kernel,
            scratch: Grid::new(shape.rows, shape.columns),
            output: Grid::for_shape(shape),
        })
    }

    /// Effective sigma in pixels at column `x`, row `y`
    pub fn sigma_px(&self, x: usize, y: usize) -> f64 {
        match &self.kernel {
            Kernel::Identity => 0.0,
            Kernel::Uniform(c) => c.sigma,
            Kernel::Varying { row_major, .. } => row_major[y * self.shape.columns + x].sigma,
        }
    }

    /// Filter parameters
    pub fn params(&self) -> &GaussFilterParams {
        &self.params
    }
}

fn sigma_at(params: &GaussFilterParams, shape: &GridShape, sigma_px: f64, x: usize, y: usize) -> f64 {
    let cx = (shape.columns / 2) as f64;
    let cy = (shape.rows / 2) as f64;
    let r = ((x as f64 - cx).powi(2) + (y as f64 - cy).powi(2)).sqrt();
    sigma_px / params.density(r / shape.pixels_per_degree)
}

impl Module for GaussFilter {
    fn type_tag(&self) -> &'static str {
        "GaussFilter"
    }

    fn reset(&mut self) {
        self.output.fill(0.0);
    }

    fn step(&mut self, _dt_ms: f64, inputs: &PortInputs) -> Result<()> {
        self.output.copy_from(&inputs.current)?;

        let (vertical, horizontal) = match &self.kernel {
            Kernel::Identity => return Ok(()),
            Kernel::Uniform(c) => (Coeffs::Uniform(c), Coeffs::Uniform(c)),
            Kernel::Varying {
                row_major,
                column_major,
            } => (Coeffs::Varying(column_major), Coeffs::Varying(row_major)),
        };

        self.output.transpose_into(&mut self.scratch);
        filter_lines(self.scratch.as_mut_slice(), self.shape.rows, vertical);
        self.scratch.transpose_into(&mut self.output);
        filter_lines(self.output.as_mut_slice(), self.shape.columns, horizontal);
        Ok(())
    }

    fn output(&self) -> &Grid {
        &self.output
    }
}

fn filter_lines(data: &mut [f64], line_len: usize, coeffs: Coeffs<'_>) {
    let run = |(i, line): (usize, &mut [f64])| {
        let c = coeffs.line(i, line_len);
        if line.len() >= MIN_RECURSIVE_LEN && c.recursive(line.len()) {
            recursive_line(line, c);
        } else {
            direct_line(line, c);
        }
    };

    #[cfg(feature = "parallel")]
    data.par_chunks_mut(line_len).enumerate().for_each(run);

    #[cfg(not(feature = "parallel"))]
    data.chunks_mut(line_len).enumerate().for_each(run);
}

/// In-place forward/backward recursion with Triggs boundary
fn recursive_line(t: &mut [f64], c: Coeffs<'_>) {
    let n = t.len();
    let s0 = t[0];
    let u = t[n - 1];

    let k = c.at(0);
    t[0] = k.b * s0 + (k.b1 + k.b2 + k.b3) * s0;
    let k = c.at(1);
    t[1] = k.b * t[1] + k.b1 * t[0] + (k.b2 + k.b3) * s0;
    let k = c.at(2);
    t[2] = k.b * t[2] + k.b1 * t[1] + k.b2 * t[0] + k.b3 * s0;
    for j in 3..n {
        let k = c.at(j);
        t[j] = k.b * t[j] + k.b1 * t[j - 1] + k.b2 * t[j - 2] + k.b3 * t[j - 3];
    }

    let m = &c.at(n - 1).m;
    let (d0, d1, d2) = (t[n - 1] - u, t[n - 2] - u, t[n - 3] - u);
    let w_m1 = u + m[0] * d0 + m[1] * d1 + m[2] * d2;
    let w = u + m[3] * d0 + m[4] * d1 + m[5] * d2;
    let w_p1 = u + m[6] * d0 + m[7] * d1 + m[8] * d2;

    t[n - 1] = w_m1;
    let k = c.at(n - 2);
    t[n - 2] = k.b * t[n - 2] + k.b1 * t[n - 1] + k.b2 * w + k.b3 * w_p1;
    let k = c.at(n - 3);
    t[n - 3] = k.b * t[n - 3] + k.b1 * t[n - 2] + k.b2 * t[n - 1] + k.b3 * w;
    for j in (0..n - 3).rev() {
        let k = c.at(j);
        t[j] = k.b * t[j] + k.b1 * t[j + 1] + k.b2 * t[j + 2] + k.b3 * t[j + 3];
    }
}

/// Normalised convolution with edge replication
fn direct_line(line: &mut [f64], c: Coeffs<'_>) {
    let src = line.to_vec();
    let last = src.len() as isize - 1;
    for (i, out) in line.iter_mut().enumerate() {
        let sigma = c.at(i).sigma;
        if sigma <= 0.0 {
            continue;
        }
        let radius = (3.0 * sigma).ceil().max(1.0) as isize;
        let (mut acc, mut norm) = (0.0, 0.0);
        for k in -radius..=radius {
            let w = (-((k * k) as f64) / (2.0 * sigma * sigma)).exp();
            let idx = (i as isize + k).clamp(0, last) as usize;
            acc += w * src[idx];
            norm += w;
        }
        *out = acc / norm;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn impulse(columns: usize, rows: usize) -> PortInputs {
        let mut g = Grid::new(columns, rows);
        g.set(columns / 2, rows / 2, 1.0);
        PortInputs::current(g)
    }

    #[test]
    fn test_zero_sigma_is_identity() {
        let shape = GridShape::new(5, 5, 10.0).unwrap();
        let mut f = GaussFilter::new(GaussFilterParams::default(), &shape).unwrap();
        let input = impulse(5, 5);
        f.step(1.0, &input).unwrap();
        assert_eq!(f.output(), &input.current);
    }

    #[test]
    fn test_constant_field_is_preserved() {
        let shape = GridShape::new(16, 12, 5.0).unwrap();
        let mut f = GaussFilter::new(GaussFilterParams::new(0.6).unwrap(), &shape).unwrap();
        f.step(1.0, &PortInputs::current(Grid::filled(16, 12, 5.0))).unwrap();
        for v in f.output().as_slice() {
            assert!((v - 5.0).abs() < 1e-9, "{}", v);
        }
    }

    #[test]
    fn test_impulse_response_is_symmetric_and_normalised() {
        let shape = GridShape::new(41, 41, 1.0).unwrap();
        let mut f = GaussFilter::new(GaussFilterParams::new(3.0).unwrap(), &shape).unwrap();
        f.step(1.0, &impulse(41, 41)).unwrap();
        let out = f.output();

        let total: f64 = out.as_slice().iter().sum();
        assert!((total - 1.0).abs() < 1e-3, "mass {}", total);

        let centre = out.get(20, 20).unwrap();
        assert!(centre > out.get(21, 20).unwrap());
        assert!((out.get(17, 20).unwrap() - out.get(20, 17).unwrap()).abs() < 1e-4);

        // neighbour/centre ratio of a sampled Gaussian with sigma = 3
        let expected = (-1.0f64 / 18.0).exp();
        let ratio = out.get(21, 20).unwrap() / centre;
        assert!((ratio - expected).abs() < 0.03, "ratio {}", ratio);
    }

    #[test]
    fn test_short_lines_use_direct_convolution() {
        let shape = GridShape::new(3, 1, 1.0).unwrap();
        let mut f = GaussFilter::new(GaussFilterParams::new(1.0).unwrap(), &shape).unwrap();
        let input = Grid::from_vec(3, 1, vec![0.0, 3.0, 0.0]).unwrap();
        f.step(1.0, &PortInputs::current(input)).unwrap();
        let out = f.output().as_slice();
        assert!(out[1] < 3.0 && out[0] > 0.0);
        assert!((out[0] - out[2]).abs() < 1e-12);
    }

    #[test]
    fn test_space_variant_sigma_grows_with_eccentricity() {
        let shape = GridShape::new(21, 21, 2.0).unwrap();
        let params = GaussFilterParams::new(1.0).unwrap().with_space_variance(1.0, 1.0);
        let mut f = GaussFilter::new(params, &shape).unwrap();

        assert_eq!(f.sigma_px(10, 10), 2.0);
        assert!(f.sigma_px(0, 0) > f.sigma_px(5, 5));
        assert!(f.sigma_px(12, 10) == 2.0);

        f.step(1.0, &PortInputs::current(Grid::filled(21, 21, 2.0))).unwrap();
        for v in f.output().as_slice() {
            assert!((v - 2.0).abs() < 1e-9);
        }
    }

    #[test]
    fn test_density_profile() {
        let p = GaussFilterParams::new(1.0).unwrap().with_space_variance(0.5, 2.0);
        assert_eq!(p.density(1.0), 1.0);
        assert_eq!(p.density(4.0), 0.5);
    }

    #[test]
    fn test_rejects_negative_sigma() {
        assert!(GaussFilterParams::new(-1.0).is_err());
        let params = ModuleParams::new().with("sigma", 0.5).with("spaceVariantSigma", "False");
        assert!(!GaussFilterParams::from_params(&params).unwrap().space_variant);
    }
}
