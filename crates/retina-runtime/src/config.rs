//! Structured experiment description
//!
//! A [`RetinaScript`] carries the resolved `Create`/`Connect`/`multimeter`
//! directives of a retina script together with the simulation and input
//! settings, and builds a ready-to-run [`RetinaSimulation`] from them.

use crate::{
    error::*,
    graph::{Connection, FeedbackPolicy, GraphBuilder, PortKind},
    grid::Grid,
    input::{
        Extent, GratingInput, GratingKind, GratingParams, ImpulseInput, InputFrame,
        InputProvider, SequenceInput, WhiteNoiseInput,
    },
    modules::ModuleParams,
    multimeter::{Multimeter, MultimeterMode},
    simulation::{RetinaSimulation, SimulationParams},
};
use serde::{Deserialize, Serialize};

/// Complete experiment description
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetinaScript {
    /// Clock, trials and grid
    #[serde(default)]
    pub simulation: SimulationParams,
    /// Cycle resolution policy
    #[serde(default)]
    pub feedback_policy: FeedbackPolicy,
    /// Visual input
    pub input: InputConfig,
    /// `Create` directives, in declaration order
    #[serde(default)]
    pub modules: Vec<ModuleConfig>,
    /// `Connect` directives, in declaration order
    #[serde(default)]
    pub connections: Vec<ConnectionConfig>,
    /// `Show` directives (display only)
    #[serde(default)]
    pub show: Vec<ShowConfig>,
    /// Multimeter bindings
    #[serde(default)]
    pub multimeters: Vec<MultimeterConfig>,
    /// Modules exposed to the spiking layer
    #[serde(default)]
    pub output: Vec<String>,
    /// Multimeter whose trial average goes to the aggregate result file
    #[serde(default)]
    pub default_multimeter: Option<String>,
}

/// `Input(kind, params)`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum InputConfig {
    /// Rectangular pulse
    Impulse {
        /// Onset (ms)
        start: f64,
        /// Offset (ms), inclusive
        stop: f64,
        /// Pulse height
        amplitude: f64,
        /// Baseline
        #[serde(default)]
        offset: f64,
        /// Optional pixel rectangle
        #[serde(default)]
        extent: Option<Extent>,
    },
    /// Gaussian noise redrawn every `period`
    WhiteNoise {
        /// Mean luminance
        mean: f64,
        /// Contrast before `switch`
        contrast1: f64,
        /// Contrast from `switch` on
        contrast2: f64,
        /// Redraw period (ms)
        period: f64,
        /// Contrast switch time (ms)
        #[serde(default)]
        switch: f64,
    },
    /// Pre-decoded grey frames, row-major
    Sequence {
        /// One list of `columns * rows` samples per frame
        frames: Vec<Vec<f64>>,
        /// Display time of each frame (ms)
        frame_period: f64,
    },
    /// Sinusoidal grating
    Grating(GratingConfig),
}

/// Grating settings as named in retina scripts
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GratingConfig {
    /// 0 drifting, 1 oscillating, 2 reversing
    #[serde(rename = "type")]
    pub type_code: u32,
    /// Blank period (ms)
    pub length1: f64,
    /// Grating period (ms)
    pub length2: f64,
    /// Reversed grating period (ms)
    pub length3: f64,
    /// Spatial period (pixels)
    pub period: f64,
    /// Temporal frequency (Hz)
    pub freq: f64,
    /// Mean luminance
    pub luminance: f64,
    /// Contrast
    pub contrast: f64,
    /// Spatial phase
    pub phase: f64,
    /// Temporal phase
    pub temporal_phase: f64,
    /// Orientation (radians)
    pub orientation: f64,
    /// Red, green, blue weights
    pub weights: [f64; 3],
    /// Red, green, blue phase offsets
    pub channel_phases: [f64; 3],
}

impl Default for GratingConfig {
    fn default() -> Self {
        let d = GratingParams::default();
        Self {
            type_code: 0,
            length1: d.blank_ms,
            length2: d.first_ms,
            length3: d.second_ms,
            period: d.period_px,
            freq: d.freq_hz,
            luminance: d.luminance,
            contrast: d.contrast,
            phase: d.phase,
            temporal_phase: d.temporal_phase,
            orientation: d.orientation,
            weights: d.weights,
            channel_phases: d.channel_phases,
        }
    }
}

impl GratingConfig {
    fn to_params(&self) -> Result<GratingParams> {
        Ok(GratingParams {
            kind: GratingKind::from_code(self.type_code)?,
            blank_ms: self.length1,
            first_ms: self.length2,
            second_ms: self.length3,
            period_px: self.period,
            freq_hz: self.freq,
            luminance: self.luminance,
            contrast: self.contrast,
            phase: self.phase,
            temporal_phase: self.temporal_phase,
            orientation: self.orientation,
            weights: self.weights,
            channel_phases: self.channel_phases,
        })
    }
}

/// `Create(type, name, params)`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModuleConfig {
    /// Module type tag
    #[serde(rename = "type")]
    pub type_tag: String,
    /// Unique module name
    pub name: String,
    /// Type-specific parameters
    #[serde(default)]
    pub params: ModuleParams,
}

/// `Connect(sources, target, port)`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// Source terms, optionally prefixed with `+` or `-`
    pub from: Vec<String>,
    /// Target module
    pub to: String,
    /// Target port
    #[serde(default = "default_port")]
    pub port: PortKind,
    /// Read the sources' previous-step output
    #[serde(default)]
    pub feedback: bool,
}

fn default_port() -> PortKind {
    PortKind::Current
}

/// `Show(module, flag, margin)`; accepted and ignored
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShowConfig {
    /// Displayed module
    pub module: String,
    /// Display toggle
    #[serde(default)]
    pub flag: bool,
    /// Window margin
    #[serde(default)]
    pub margin: f64,
}

/// `multimeter(mode, label, module, params)`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MultimeterConfig {
    /// Result file label
    pub label: String,
    /// Sampled module or input channel
    pub target: String,
    /// Sampling mode and coordinates
    #[serde(flatten)]
    pub mode: MultimeterMode,
    /// Start of temporal recording (ms)
    #[serde(default)]
    pub start_time: f64,
}

impl InputConfig {
    /// Provider name as used in configuration
    pub fn kind(&self) -> &'static str {
        match self {
            InputConfig::Impulse { .. } => "impulse",
            InputConfig::WhiteNoise { .. } => "whiteNoise",
            InputConfig::Sequence { .. } => "sequence",
            InputConfig::Grating(_) => "grating",
        }
    }

    /// Build the input provider; sequence frames must match `columns x rows`
    pub fn build(&self, columns: usize, rows: usize) -> Result<InputProvider> {
        let provider = match self {
            InputConfig::Impulse {
                start,
                stop,
                amplitude,
                offset,
                extent,
            } => {
                let mut impulse = ImpulseInput::new(*start, *stop, *amplitude, *offset)?;
                if let Some(extent) = extent {
                    impulse = impulse.with_extent(*extent);
                }
                InputProvider::Impulse(impulse)
            }
            InputConfig::WhiteNoise {
                mean,
                contrast1,
                contrast2,
                period,
                switch,
            } => InputProvider::WhiteNoise(WhiteNoiseInput::new(
                *mean, *contrast1, *contrast2, *period, *switch,
            )?),
            InputConfig::Sequence {
                frames,
                frame_period,
            } => {
                let frames = frames
                    .iter()
                    .map(|samples| {
                        Grid::from_vec(columns, rows, samples.clone()).map(InputFrame::grey)
                    })
                    .collect::<Result<Vec<_>>>()?;
                InputProvider::Sequence(SequenceInput::new(frames, *frame_period)?)
            }
            InputConfig::Grating(grating) => {
                InputProvider::Grating(GratingInput::new(grating.to_params()?)?)
            }
        };
        Ok(provider)
    }
}

impl RetinaScript {
    /// Resolve every directive into a simulation ready to run
    pub fn build(&self) -> Result<RetinaSimulation> {
        self.simulation.validate()?;
        let shape = self.simulation.shape()?;

        let mut builder = GraphBuilder::new(shape).with_feedback_policy(self.feedback_policy);
        for m in &self.modules {
            builder = builder.create(m.type_tag.as_str(), m.name.as_str(), m.params.clone());
        }
        for c in &self.connections {
            let mut conn = Connection::from_terms(c.from.as_slice(), c.to.as_str(), c.port)?;
            conn.feedback = c.feedback;
            builder = builder.connect(conn);
        }
        let graph = builder.build()?;

        for s in &self.show {
            if graph.index_of(&s.module).is_none() {
                log::warn!("Show directive names unknown module '{}'", s.module);
            }
            log::warn!("Ignoring display directive for '{}'", s.module);
        }

        let input = self.input.build(shape.columns, shape.rows)?;
        let mut sim = RetinaSimulation::new(self.simulation.clone(), graph, input)?;

        for m in &self.multimeters {
            sim.add_multimeter(
                Multimeter::new(m.label.as_str(), m.target.as_str(), m.mode)
                    .with_start_time(m.start_time),
            )?;
        }
        if let Some(label) = &self.default_multimeter {
            match sim.multimeter(label).map(|m| *m.mode()) {
                Some(MultimeterMode::Temporal { .. }) => {}
                Some(_) => {
                    return Err(RuntimeError::invalid_config(format!(
                        "default multimeter '{}' must use temporal mode",
                        label
                    )))
                }
                None => {
                    return Err(RuntimeError::invalid_config(format!(
                        "default multimeter '{}' is not declared",
                        label
                    )))
                }
            }
        }
        sim.set_outputs(self.output.as_slice())?;

        log::info!(
            "Built retina: {} module(s), {} connection(s), {} multimeter(s), input '{}'",
            self.modules.len(),
            self.connections.len(),
            self.multimeters.len(),
            self.input.kind()
        );
        Ok(sim)
    }
}
