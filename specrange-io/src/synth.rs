//! Deterministic synthetic spectrum images for demos and tests.

use rayon::prelude::*;
use specrange_core::CalibrationParameters;

use crate::cube::SpectrumCube;
use crate::service::CubeDataService;
use crate::Result;

/// Name of the dataset built by [`synthetic_service`].
pub const SYNTHETIC_DATASET: &str = "synthetic";

/// How a peak's amplitude varies across the image.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Gradient {
    /// Same amplitude everywhere.
    Uniform,
    /// Grows from the left edge to the right edge.
    LeftToRight,
    /// Grows from the top edge to the bottom edge.
    TopToBottom,
}

/// A Gaussian peak added to every pixel.
#[derive(Debug, Clone, PartialEq)]
pub struct SynthPeak {
    pub energy: f64,
    pub sigma: f64,
    pub amplitude: f64,
    pub gradient: Gradient,
}

impl SynthPeak {
    /// Creates a uniform peak.
    #[must_use]
    pub fn new(energy: f64, sigma: f64, amplitude: f64) -> Self {
        Self {
            energy,
            sigma,
            amplitude,
            gradient: Gradient::Uniform,
        }
    }

    /// Sets the spatial gradient.
    #[must_use]
    pub fn with_gradient(mut self, gradient: Gradient) -> Self {
        self.gradient = gradient;
        self
    }
}

/// Synthetic cube parameters.
#[derive(Debug, Clone)]
pub struct SynthConfig {
    pub rows: usize,
    pub cols: usize,
    pub channels: usize,
    pub calibration: CalibrationParameters,
    /// Flat background counts per channel.
    pub background: f64,
    /// Standard deviation of additive noise.
    pub noise: f64,
    pub seed: u64,
    pub peaks: Vec<SynthPeak>,
}

impl Default for SynthConfig {
    fn default() -> Self {
        Self {
            rows: 32,
            cols: 32,
            channels: 1024,
            calibration: CalibrationParameters::new(-0.2, 0.01, "keV"),
            background: 1.0,
            noise: 0.2,
            seed: 42,
            peaks: vec![
                // Zero-energy strobe peak.
                SynthPeak::new(0.0, 0.05, 400.0),
                // Fe K lines.
                SynthPeak::new(6.404, 0.06, 120.0).with_gradient(Gradient::LeftToRight),
                SynthPeak::new(7.058, 0.06, 18.0).with_gradient(Gradient::LeftToRight),
                // Cu K lines.
                SynthPeak::new(8.048, 0.07, 80.0).with_gradient(Gradient::TopToBottom),
                SynthPeak::new(8.905, 0.07, 12.0).with_gradient(Gradient::TopToBottom),
            ],
        }
    }
}

impl SynthConfig {
    /// Creates the default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the image size.
    #[must_use]
    pub fn with_size(mut self, rows: usize, cols: usize) -> Self {
        self.rows = rows;
        self.cols = cols;
        self
    }

    /// Sets the channel count.
    #[must_use]
    pub fn with_channels(mut self, channels: usize) -> Self {
        self.channels = channels;
        self
    }

    /// Sets the noise level.
    #[must_use]
    pub fn with_noise(mut self, noise: f64) -> Self {
        self.noise = noise;
        self
    }

    /// Sets the noise seed.
    #[must_use]
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }
}

/// Builds a cube from `config`. The same config always yields the same counts.
///
/// # Errors
/// Cube validation errors, e.g. zero channels or an invalid calibration.
pub fn synthetic_cube(config: &SynthConfig) -> Result<SpectrumCube> {
    let channels = config.channels;
    let pixels = config.rows * config.cols;
    let energies: Vec<f64> = (0..channels)
        .map(|c| config.calibration.energy_at(to_f64(c)))
        .collect();

    let mut values = vec![0.0; pixels * channels.max(1)];
    values
        .par_chunks_mut(channels.max(1))
        .enumerate()
        .for_each(|(pixel, spectrum)| {
            let row = pixel / config.cols.max(1);
            let col = pixel % config.cols.max(1);
            let mut rng = SimpleRng::new(config.seed ^ (pixel as u64).wrapping_mul(0x9E37_79B9));
            for (value, &energy) in spectrum.iter_mut().zip(&energies) {
                let signal: f64 = config
                    .peaks
                    .iter()
                    .map(|peak| {
                        let scale = match peak.gradient {
                            Gradient::Uniform => 1.0,
                            Gradient::LeftToRight => fraction(col, config.cols),
                            Gradient::TopToBottom => fraction(row, config.rows),
                        };
                        gaussian(energy, peak.energy, peak.sigma, peak.amplitude * scale)
                    })
                    .sum();
                *value = (config.background + signal + rng.gauss(0.0, config.noise)).max(0.0);
            }
        });

    SpectrumCube::from_flat(
        "Synthetic EDS map",
        config.calibration.clone(),
        [config.rows, config.cols, channels],
        values,
    )
}

/// A service holding one dataset named [`SYNTHETIC_DATASET`] with one signal.
///
/// # Errors
/// Cube validation errors.
pub fn synthetic_service(config: &SynthConfig) -> Result<CubeDataService> {
    let mut service = CubeDataService::new();
    service.insert(SYNTHETIC_DATASET, vec![synthetic_cube(config)?]);
    Ok(service)
}

fn gaussian(x: f64, mu: f64, sigma: f64, amplitude: f64) -> f64 {
    amplitude * (-(x - mu).powi(2) / (2.0 * sigma.powi(2))).exp()
}

/// Position in `[0.25, 1.0]` along an axis of `len` pixels.
fn fraction(index: usize, len: usize) -> f64 {
    if len <= 1 {
        return 1.0;
    }
    0.25 + 0.75 * to_f64(index) / to_f64(len - 1)
}

#[allow(clippy::cast_precision_loss)]
fn to_f64(value: usize) -> f64 {
    value as f64
}

/// Minimal deterministic PRNG (xoshiro256**).
struct SimpleRng {
    state: [u64; 4],
}

impl SimpleRng {
    fn new(seed: u64) -> Self {
        let mut s = [0u64; 4];
        let mut x = seed;
        for slot in &mut s {
            x = x.wrapping_mul(6_364_136_223_846_793_005).wrapping_add(1);
            *slot = x;
        }
        SimpleRng { state: s }
    }

    fn next_u64(&mut self) -> u64 {
        let result = (self.state[1].wrapping_mul(5)).rotate_left(7).wrapping_mul(9);
        let t = self.state[1] << 17;
        self.state[2] ^= self.state[0];
        self.state[3] ^= self.state[1];
        self.state[1] ^= self.state[2];
        self.state[0] ^= self.state[3];
        self.state[2] ^= t;
        self.state[3] = self.state[3].rotate_left(45);
        result
    }

    #[allow(clippy::cast_precision_loss)]
    fn next_f64(&mut self) -> f64 {
        (self.next_u64() >> 11) as f64 / (1u64 << 53) as f64
    }

    /// Box-Muller transform.
    fn gauss(&mut self, mean: f64, std_dev: f64) -> f64 {
        if std_dev <= 0.0 {
            return mean;
        }
        let u1 = self.next_f64().max(1e-15);
        let u2 = self.next_f64();
        let z = (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos();
        mean + std_dev * z
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use specrange_core::{EnergySpan, IndexSpan};

    fn small() -> SynthConfig {
        SynthConfig::new().with_size(4, 5).with_channels(1024)
    }

    #[test]
    fn test_deterministic() {
        let a = synthetic_cube(&small()).unwrap();
        let b = synthetic_cube(&small()).unwrap();
        assert_eq!(a, b);
        let c = synthetic_cube(&small().with_seed(7)).unwrap();
        assert_ne!(a, c);
    }

    #[test]
    fn test_shape_and_zero_peak() {
        let cube = synthetic_cube(&small().with_noise(0.0)).unwrap();
        assert_eq!(cube.shape(), (4, 5, 1024));
        let width = cube.zero_peak_width().unwrap();
        // Half-width at half maximum of a sigma 0.05 Gaussian is about 0.059.
        assert!(width > 0.04 && width < 0.08, "width {width}");
    }

    #[test]
    fn test_iron_gradient_left_to_right() {
        let cube = synthetic_cube(&small().with_noise(0.0)).unwrap();
        let converter = cube.converter().unwrap();
        let span = converter
            .energy_to_indices(EnergySpan::new(6.3, 6.5).unwrap())
            .unwrap();
        let image = cube
            .channel_image(IndexSpan::new(span.start, span.end).unwrap())
            .unwrap();
        assert!(image[[0, 4]] > image[[0, 0]]);
        assert!((image[[0, 0]] - image[[3, 0]]).abs() < 1e-9);
    }
}
