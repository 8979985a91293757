//! Visual input providers and photoreceptor channel decomposition

use crate::{error::*, grid::{Grid, GridShape}};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use rand_distr::{Distribution, Normal};
use std::f64::consts::PI;

/// Tolerance used when comparing step times with window bounds
const TIME_EPSILON: f64 = 1e-9;

/// Signals derived from the input frame that connections may read
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InputChannel {
    /// Raw first colour channel (luminance for grey frames)
    Input,
    /// Long-wavelength cones
    LCones,
    /// Medium-wavelength cones
    MCones,
    /// Short-wavelength cones
    SCones,
    /// Rods: mean of the three cone signals
    Rods,
}

impl InputChannel {
    /// Every channel, in a fixed order
    pub const ALL: [InputChannel; 5] = [
        InputChannel::Input,
        InputChannel::LCones,
        InputChannel::MCones,
        InputChannel::SCones,
        InputChannel::Rods,
    ];

    /// Resolve a configuration name
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.name() == name)
    }

    /// Configuration name
    pub fn name(&self) -> &'static str {
        match self {
            InputChannel::Input => "Input",
            InputChannel::LCones => "L_cones",
            InputChannel::MCones => "M_cones",
            InputChannel::SCones => "S_cones",
            InputChannel::Rods => "rods",
        }
    }

    fn slot(&self) -> usize {
        match self {
            InputChannel::Input => 0,
            InputChannel::LCones => 1,
            InputChannel::MCones => 2,
            InputChannel::SCones => 3,
            InputChannel::Rods => 4,
        }
    }
}

/// One RGB input frame
#[derive(Debug, Clone, PartialEq)]
pub struct InputFrame {
    red: Grid,
    green: Grid,
    blue: Grid,
}

impl InputFrame {
    /// Black frame
    pub fn new(shape: &GridShape) -> Self {
        Self {
            red: Grid::for_shape(shape),
            green: Grid::for_shape(shape),
            blue: Grid::for_shape(shape),
        }
    }

    /// Grey frame: the same luminance in every channel
    pub fn grey(luminance: Grid) -> Self {
        Self {
            red: luminance.clone(),
            green: luminance.clone(),
            blue: luminance,
        }
    }

    /// Colour frame from three equally sized planes
    pub fn from_rgb(red: Grid, green: Grid, blue: Grid) -> Result<Self> {
        red.ensure_same_shape(&green)?;
        red.ensure_same_shape(&blue)?;
        Ok(Self { red, green, blue })
    }

    /// `(columns, rows)`
    pub fn dimensions(&self) -> (usize, usize) {
        self.red.dimensions()
    }

    /// Red plane
    pub fn red(&self) -> &Grid {
        &self.red
    }

    /// Green plane
    pub fn green(&self) -> &Grid {
        &self.green
    }

    /// Blue plane
    pub fn blue(&self) -> &Grid {
        &self.blue
    }

    /// Set every channel of every pixel to `value`
    pub fn fill_grey(&mut self, value: f64) {
        self.red.fill(value);
        self.green.fill(value);
        self.blue.fill(value);
    }

    fn set_grey(&mut self, i: usize, value: f64) {
        self.red.as_mut_slice()[i] = value;
        self.green.as_mut_slice()[i] = value;
        self.blue.as_mut_slice()[i] = value;
    }

    fn copy_from(&mut self, other: &InputFrame) -> Result<()> {
        self.red.copy_from(&other.red)?;
        self.green.copy_from(&other.green)?;
        self.blue.copy_from(&other.blue)
    }
}

/// Photoreceptor signals derived from the current frame
#[derive(Debug, Clone)]
pub struct ChannelSet {
    grids: [Grid; 5],
}

impl ChannelSet {
    /// Zeroed channels for `shape`
    pub fn new(shape: &GridShape) -> Self {
        Self {
            grids: std::array::from_fn(|_| Grid::for_shape(shape)),
        }
    }

    /// Channel grid
    pub fn get(&self, channel: InputChannel) -> &Grid {
        &self.grids[channel.slot()]
    }

    /// Recompute every channel from `frame` (sRGB -> XYZ -> Hunt-Pointer-Estevez LMS)
    pub fn update(&mut self, frame: &InputFrame) -> Result<()> {
        self.grids[0].copy_from(&frame.red)?;
        let (r, g, b) = (
            frame.red.as_slice(),
            frame.green.as_slice(),
            frame.blue.as_slice(),
        );
        let [_, l, m, s, rods] = &mut self.grids;
        l.ensure_same_shape(&frame.red)?;
        let (l, m, s, rods) = (
            l.as_mut_slice(),
            m.as_mut_slice(),
            s.as_mut_slice(),
            rods.as_mut_slice(),
        );

        for i in 0..r.len() {
            let x = 0.4124564 * r[i] + 0.3575761 * g[i] + 0.1804375 * b[i];
            let y = 0.2126729 * r[i] + 0.7151522 * g[i] + 0.0721750 * b[i];
            let z = 0.0193339 * r[i] + 0.1191920 * g[i] + 0.9503041 * b[i];

            let first = 0.38971 * x + 0.68898 * y - 0.07868 * z;
            let second = -0.22981 * x + 1.1834 * y + 0.04641 * z;
            let third = z;

            l[i] = third;
            m[i] = second;
            s[i] = first;
            rods[i] = (first + second + third) / 3.0;
        }
        Ok(())
    }
}

/// Behaviour shared by every input provider
pub trait InputSource: Send {
    /// Re-establish the stream for a new trial
    fn reset(&mut self, _trial: usize, _seed: u64) {}

    /// Write the frame shown at `time_ms` into `frame`
    fn frame(&mut self, time_ms: f64, frame: &mut InputFrame) -> Result<()>;
}

/// Inclusive pixel rectangle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Extent {
    /// First column
    pub x0: usize,
    /// First row
    pub y0: usize,
    /// Last column
    pub x1: usize,
    /// Last row
    pub y1: usize,
}

impl Extent {
    fn contains(&self, x: usize, y: usize) -> bool {
        x >= self.x0 && x <= self.x1 && y >= self.y0 && y <= self.y1
    }
}

/// Uniform baseline with a rectangular pulse during `[start, stop]`
#[derive(Debug, Clone, PartialEq)]
pub struct ImpulseInput {
    /// Pulse onset (ms)
    pub start_ms: f64,
    /// Pulse offset (ms), inclusive
    pub stop_ms: f64,
    /// Pulse height above baseline
    pub amplitude: f64,
    /// Baseline value
    pub offset: f64,
    /// Pixels receiving the pulse; `None` for the whole grid
    pub extent: Option<Extent>,
}

impl ImpulseInput {
    /// Create a full-field impulse with validation
    pub fn new(start_ms: f64, stop_ms: f64, amplitude: f64, offset: f64) -> Result<Self> {
        if !(stop_ms >= start_ms) {
            return Err(RuntimeError::invalid_parameter(
                "stop",
                format!("{} (with start={})", stop_ms, start_ms),
                ">= start",
            ));
        }
        Ok(Self {
            start_ms,
            stop_ms,
            amplitude,
            offset,
            extent: None,
        })
    }

    /// Restrict the pulse to a rectangle
    pub fn with_extent(mut self, extent: Extent) -> Self {
        self.extent = Some(extent);
        self
    }
}

impl InputSource for ImpulseInput {
    fn frame(&mut self, time_ms: f64, frame: &mut InputFrame) -> Result<()> {
        let active = time_ms >= self.start_ms - TIME_EPSILON && time_ms <= self.stop_ms + TIME_EPSILON;
        if !active {
            frame.fill_grey(self.offset);
            return Ok(());
        }
        match self.extent {
            None => frame.fill_grey(self.offset + self.amplitude),
            Some(extent) => {
                let (columns, rows) = frame.dimensions();
                for y in 0..rows {
                    for x in 0..columns {
                        let v = if extent.contains(x, y) {
                            self.offset + self.amplitude
                        } else {
                            self.offset
                        };
                        frame.set_grey(y * columns + x, v);
                    }
                }
            }
        }
        Ok(())
    }
}

/// Per-pixel Gaussian noise, redrawn every `period_ms`
#[derive(Debug, Clone)]
pub struct WhiteNoiseInput {
    mean: f64,
    contrast1: f64,
    contrast2: f64,
    period_ms: f64,
    switch_ms: f64,
    rng: ChaCha8Rng,
    last_draw: Option<u64>,
    values: Vec<f64>,
}

impl WhiteNoiseInput {
    /// Create a noise source; standard deviation is `contrast * mean`
    pub fn new(mean: f64, contrast1: f64, contrast2: f64, period_ms: f64, switch_ms: f64) -> Result<Self> {
        if !(period_ms > 0.0) {
            return Err(RuntimeError::invalid_parameter(
                "period",
                period_ms.to_string(),
                "> 0.0",
            ));
        }
        for (name, c) in [("contrast1", contrast1), ("contrast2", contrast2)] {
            if !(c >= 0.0) {
                return Err(RuntimeError::invalid_parameter(name, c.to_string(), ">= 0.0"));
            }
        }
        Ok(Self {
            mean,
            contrast1,
            contrast2,
            period_ms,
            switch_ms,
            rng: ChaCha8Rng::seed_from_u64(0),
            last_draw: None,
            values: Vec::new(),
        })
    }

    fn redraw(&mut self, time_ms: f64, len: usize) -> Result<()> {
        let contrast = if time_ms < self.switch_ms {
            self.contrast1
        } else {
            self.contrast2
        };
        let normal = Normal::new(self.mean, (contrast * self.mean).abs()).map_err(|e| {
            RuntimeError::invalid_parameter("contrast", contrast.to_string(), e.to_string())
        })?;
        let rng = &mut self.rng;
        self.values.clear();
        self.values
            .extend((0..len).map(|_| normal.sample(&mut *rng).max(0.0)));
        Ok(())
    }
}

impl InputSource for WhiteNoiseInput {
    fn reset(&mut self, trial: usize, seed: u64) {
        self.rng = ChaCha8Rng::seed_from_u64(seed.wrapping_add(trial as u64));
        self.last_draw = None;
        self.values.clear();
    }

    fn frame(&mut self, time_ms: f64, frame: &mut InputFrame) -> Result<()> {
        let (columns, rows) = frame.dimensions();
        let draw = (time_ms / self.period_ms + TIME_EPSILON).floor().max(0.0) as u64;
        if self.last_draw != Some(draw) || self.values.len() != columns * rows {
            self.redraw(time_ms, columns * rows)?;
            self.last_draw = Some(draw);
        }
        for (i, v) in self.values.iter().enumerate() {
            frame.set_grey(i, *v);
        }
        Ok(())
    }
}

/// Pre-decoded frames, each shown for `frame_period_ms`; the last is held
#[derive(Debug, Clone)]
pub struct SequenceInput {
    frames: Vec<InputFrame>,
    frame_period_ms: f64,
}

impl SequenceInput {
    /// Create a sequence with validation
    pub fn new(frames: Vec<InputFrame>, frame_period_ms: f64) -> Result<Self> {
        if !(frame_period_ms > 0.0) {
            return Err(RuntimeError::invalid_parameter(
                "InputFramePeriod",
                frame_period_ms.to_string(),
                "> 0.0",
            ));
        }
        let Some(first) = frames.first() else {
            return Err(RuntimeError::missing_input(0.0, "sequence has no frames"));
        };
        let dims = first.dimensions();
        if let Some(bad) = frames.iter().find(|f| f.dimensions() != dims) {
            return Err(RuntimeError::dimension_mismatch(dims, bad.dimensions()));
        }
        Ok(Self {
            frames,
            frame_period_ms,
        })
    }

    /// Number of frames
    pub fn len(&self) -> usize {
        self.frames.len()
    }

    /// True when the sequence has no frames
    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// `(columns, rows)` of every frame
    pub fn dimensions(&self) -> Option<(usize, usize)> {
        self.frames.first().map(InputFrame::dimensions)
    }
}

impl InputSource for SequenceInput {
    fn frame(&mut self, time_ms: f64, frame: &mut InputFrame) -> Result<()> {
        let idx = (time_ms / self.frame_period_ms + TIME_EPSILON).floor().max(0.0) as usize;
        let last = self.frames.len().checked_sub(1).ok_or_else(|| {
            RuntimeError::missing_input(time_ms, "sequence has no frames")
        })?;
        frame.copy_from(&self.frames[idx.min(last)])
    }
}

/// Temporal behaviour of a grating
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum GratingKind {
    /// Travelling sinusoid
    Drifting,
    /// Standing sinusoid modulated in time
    Oscillating,
    /// Static grating followed by its contrast-reversed copy
    Reversing,
}

impl GratingKind {
    /// Map the numeric type code (0, 1, 2)
    pub fn from_code(code: u32) -> Result<Self> {
        match code {
            0 => Ok(GratingKind::Drifting),
            1 => Ok(GratingKind::Oscillating),
            2 => Ok(GratingKind::Reversing),
            other => Err(RuntimeError::invalid_parameter(
                "type",
                other.to_string(),
                "0, 1 or 2",
            )),
        }
    }
}

/// Parameters for [`GratingInput`]
#[derive(Debug, Clone, PartialEq)]
pub struct GratingParams {
    /// Temporal behaviour
    pub kind: GratingKind,
    /// Uniform blank before the grating (ms)
    pub blank_ms: f64,
    /// Duration of the grating (ms)
    pub first_ms: f64,
    /// Duration of the reversed grating, reversing kind only (ms)
    pub second_ms: f64,
    /// Spatial period (pixels)
    pub period_px: f64,
    /// Temporal frequency (Hz)
    pub freq_hz: f64,
    /// Mean luminance
    pub luminance: f64,
    /// Michelson contrast
    pub contrast: f64,
    /// Spatial phase (cycles * 2)
    pub phase: f64,
    /// Temporal phase (cycles * 2)
    pub temporal_phase: f64,
    /// Orientation (radians)
    pub orientation: f64,
    /// Per-channel luminance weights (red, green, blue)
    pub weights: [f64; 3],
    /// Per-channel phase offsets in units of pi (red, green, blue)
    pub channel_phases: [f64; 3],
}

impl Default for GratingParams {
    fn default() -> Self {
        Self {
            kind: GratingKind::Drifting,
            blank_ms: 0.0,
            first_ms: 1000.0,
            second_ms: 0.0,
            period_px: 10.0,
            freq_hz: 1.0,
            luminance: 100.0,
            contrast: 0.5,
            phase: 0.0,
            temporal_phase: 0.0,
            orientation: 0.0,
            weights: [1.0, 1.0, 1.0],
            channel_phases: [0.0, 0.0, 0.0],
        }
    }
}

impl GratingParams {
    /// Validate parameters
    pub fn validate(&self) -> Result<()> {
        if !(self.period_px > 0.0) {
            return Err(RuntimeError::invalid_parameter(
                "period",
                self.period_px.to_string(),
                "> 0.0",
            ));
        }
        for (name, v) in [
            ("length1", self.blank_ms),
            ("length2", self.first_ms),
            ("length3", self.second_ms),
        ] {
            if !(v >= 0.0) {
                return Err(RuntimeError::invalid_parameter(name, v.to_string(), ">= 0.0"));
            }
        }
        Ok(())
    }
}

/// Sinusoidal grating generator
#[derive(Debug, Clone)]
pub struct GratingInput {
    params: GratingParams,
}

impl GratingInput {
    /// Create a grating with validation
    pub fn new(params: GratingParams) -> Result<Self> {
        params.validate()?;
        Ok(Self { params })
    }
}

impl InputSource for GratingInput {
    fn frame(&mut self, time_ms: f64, frame: &mut InputFrame) -> Result<()> {
        let p = &self.params;
        let first_end = p.blank_ms + p.first_ms;
        let second_end = first_end
            + if p.kind == GratingKind::Reversing {
                p.second_ms
            } else {
                0.0
            };

        // 1 inside the grating, -1 while reversed, 0 for a uniform field
        let (polarity, temporal) = if time_ms < p.blank_ms || time_ms >= second_end {
            (0.0, 1.0)
        } else if time_ms < first_end {
            let cycles = p.freq_hz * time_ms / 1000.0;
            match p.kind {
                GratingKind::Drifting => (1.0, cycles),
                GratingKind::Oscillating => (1.0, ((cycles + p.temporal_phase / 2.0) * 2.0 * PI).cos()),
                GratingKind::Reversing => (1.0, 1.0),
            }
        } else {
            (-1.0, 1.0)
        };

        let (columns, rows) = frame.dimensions();
        let (x0, y0) = ((columns / 2) as f64, (rows / 2) as f64);
        let (cos_t, sin_t) = (p.orientation.cos(), p.orientation.sin());
        let amplitude = p.contrast * p.luminance;
        let planes = [&mut frame.red, &mut frame.green, &mut frame.blue];

        for (c, plane) in planes.into_iter().enumerate() {
            let w = p.weights[c];
            let data = plane.as_mut_slice();
            for y in 0..rows {
                for x in 0..columns {
                    let mut v = w * p.luminance;
                    if polarity != 0.0 {
                        let proj = (x as f64 - x0) * cos_t + (y as f64 - y0) * sin_t;
                        let spatial = proj / p.period_px + p.phase / 2.0;
                        let channel = p.channel_phases[c] * PI;
                        let wave = match p.kind {
                            GratingKind::Drifting => ((spatial - temporal) * 2.0 * PI + channel).cos(),
                            GratingKind::Oscillating => (spatial * 2.0 * PI + channel).cos() * temporal,
                            GratingKind::Reversing => (spatial * 2.0 * PI + channel).cos(),
                        };
                        v += polarity * w * amplitude * wave;
                    }
                    data[y * columns + x] = v;
                }
            }
        }
        Ok(())
    }
}

/// Input provider selected at build time
#[derive(Debug, Clone)]
pub enum InputProvider {
    /// Rectangular pulse
    Impulse(ImpulseInput),
    /// Seeded Gaussian noise
    WhiteNoise(WhiteNoiseInput),
    /// Pre-decoded frames
    Sequence(SequenceInput),
    /// Sinusoidal grating
    Grating(GratingInput),
}

impl InputProvider {
    /// Provider name as used in configuration
    pub fn kind(&self) -> &'static str {
        match self {
            InputProvider::Impulse(_) => "impulse",
            InputProvider::WhiteNoise(_) => "whiteNoise",
            InputProvider::Sequence(_) => "sequence",
            InputProvider::Grating(_) => "grating",
        }
    }
}

impl InputSource for InputProvider {
    fn reset(&mut self, trial: usize, seed: u64) {
        match self {
            InputProvider::Impulse(i) => i.reset(trial, seed),
            InputProvider::WhiteNoise(i) => i.reset(trial, seed),
            InputProvider::Sequence(i) => i.reset(trial, seed),
            InputProvider::Grating(i) => i.reset(trial, seed),
        }
    }

    fn frame(&mut self, time_ms: f64, frame: &mut InputFrame) -> Result<()> {
        match self {
            InputProvider::Impulse(i) => i.frame(time_ms, frame),
            InputProvider::WhiteNoise(i) => i.frame(time_ms, frame),
            InputProvider::Sequence(i) => i.frame(time_ms, frame),
            InputProvider::Grating(i) => i.frame(time_ms, frame),
        }
    }
}
