//! 8-bit symmetric quantisation.
//!
//! Weights get one scale per output row, activations one scale per tensor,
//! chosen so that the largest magnitude maps to 127. Products accumulate in
//! `i32` and are rescaled to `f32` before bias and activation, so pooling and
//! the output nonlinearities always run in floating point.
use std::io::{self, Write};

use crate::{
    network::{self, Layer, Network, Shape},
    simd::{Kernels, MAX_DOT_I8_LEN},
    Error, Result,
};

pub const QMAX: f32 = 127.0;

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum QuantTarget {
    Float,
    I8(f32),
}

impl QuantTarget {
    pub fn quantise(self, buf: &[f32]) -> io::Result<Vec<u8>> {
        let mut quantised = Vec::<u8>::new();

        for &float in buf {
            match self {
                Self::Float => quantised.write_all(&float.to_le_bytes())?,
                Self::I8(scale) => {
                    let qf = (f64::from(float) / f64::from(scale)).round();

                    if !(-f64::from(QMAX)..=f64::from(QMAX)).contains(&qf) {
                        return Err(io::Error::new(io::ErrorKind::InvalidData, "Failed quantisation from f32 to i8!"));
                    }

                    quantised.write_all(&(qf as i8).to_le_bytes())?;
                }
            }
        }

        Ok(quantised)
    }
}

/// Scale mapping the largest magnitude in `buf` to `QMAX`.
pub fn symmetric_scale(buf: &[f32]) -> f32 {
    let max = buf.iter().fold(0f32, |max, x| max.max(x.abs()));
    if max > 0.0 {
        max / QMAX
    } else {
        1.0
    }
}

/// Quantises `buf` with its own symmetric scale.
pub fn quantise_i8(buf: &[f32]) -> io::Result<(Vec<i8>, f32)> {
    let scale = symmetric_scale(buf);
    let bytes = QuantTarget::I8(scale).quantise(buf)?;
    Ok((bytes.into_iter().map(|b| b as i8).collect(), scale))
}

/// Weight rows of one layer, each with its own scale.
#[derive(Clone, Debug, PartialEq)]
pub struct QuantisedRows {
    pub weights: Vec<i8>,
    pub scales: Vec<f32>,
    pub fan_in: usize,
}

impl QuantisedRows {
    pub fn from_rows(rows: &[f32], fan_in: usize) -> io::Result<Self> {
        let mut weights = Vec::with_capacity(rows.len());
        let mut scales = Vec::with_capacity(rows.len() / fan_in);

        for row in rows.chunks_exact(fan_in) {
            let (quantised, scale) = quantise_i8(row)?;
            weights.extend(quantised);
            scales.push(scale);
        }

        Ok(Self { weights, scales, fan_in })
    }

    pub fn row(&self, idx: usize) -> &[i8] {
        &self.weights[idx * self.fan_in..(idx + 1) * self.fan_in]
    }

    /// `[scales][weights]`, scales as `f32`.
    pub fn to_bytes(&self) -> io::Result<Vec<u8>> {
        let mut bytes = QuantTarget::Float.quantise(&self.scales)?;
        bytes.extend(self.weights.iter().map(|&w| w as u8));
        Ok(bytes)
    }
}

/// A network whose convolutions and dense layers run on 8-bit weights and
/// activations.
#[derive(Clone, Debug, PartialEq)]
pub struct QuantisedNetwork {
    network: Network,
    /// Quantised weights of each layer, `None` for parameterless layers.
    rows: Vec<Option<QuantisedRows>>,
}

impl QuantisedNetwork {
    pub fn from_unquantised(network: Network) -> Result<Self> {
        let mut rows = Vec::with_capacity(network.layers().len());

        for (layer, shape) in network.iter() {
            let (weights, fan_in) = match layer {
                Layer::Conv2d(conv) => (&conv.weights, conv.description(shape)?.fan_in()),
                Layer::Dense(dense) => (&dense.weights, shape.size()),
                Layer::MaxPool2d { .. } | Layer::Flatten => {
                    rows.push(None);
                    continue;
                }
            };

            // i32 accumulators hold at most MAX_DOT_I8_LEN full scale products
            if fan_in > MAX_DOT_I8_LEN {
                return Err(Error::Model(format!(
                    "{} with fan-in {fan_in} exceeds the quantised limit of {MAX_DOT_I8_LEN}",
                    layer.name()
                )));
            }

            rows.push(Some(QuantisedRows::from_rows(weights, fan_in)?));
        }

        Ok(Self { network, rows })
    }

    pub fn input_shape(&self) -> Shape {
        self.network.input_shape()
    }

    pub fn output_shape(&self) -> Shape {
        self.network.output_shape()
    }

    /// Quantised forward pass of a single sample.
    pub fn forward(&self, input: &[f32], kernels: &Kernels) -> Result<Vec<f32>> {
        network::check_input(self.network.input_shape(), input)?;

        let mut x = input.to_vec();

        for ((layer, shape), rows) in self.network.iter().zip(&self.rows) {
            x = match (layer, rows) {
                (Layer::Conv2d(conv), Some(rows)) => {
                    let desc = conv.description(shape)?;
                    let (qx, sx) = quantise_i8(&x)?;
                    let mut patch = vec![0i8; desc.fan_in()];
                    let mut out = vec![0.0; desc.output_size()];

                    for (pixel, dst) in out.chunks_exact_mut(desc.output_channels).enumerate() {
                        let (oy, ox) = (pixel / desc.output_shape.1, pixel % desc.output_shape.1);
                        desc.im2col(&qx, oy, ox, &mut patch);

                        for (o, d) in dst.iter_mut().enumerate() {
                            let acc = kernels.dot_i8(&patch, rows.row(o));
                            *d = acc as f32 * sx * rows.scales[o] + conv.bias[o];
                        }
                    }

                    conv.activation.apply(&mut out);
                    out
                }
                (Layer::Dense(dense), Some(rows)) => {
                    let (qx, sx) = quantise_i8(&x)?;
                    let mut out: Vec<f32> = (0..dense.units)
                        .map(|o| kernels.dot_i8(&qx, rows.row(o)) as f32 * sx * rows.scales[o] + dense.bias[o])
                        .collect();

                    dense.activation.apply(&mut out);
                    out
                }
                (Layer::MaxPool2d { size, stride }, _) => network::max_pool(&x, shape, *size, *stride)?,
                (Layer::Flatten, _) => x,
                (layer, None) => return Err(Error::Model(format!("{} has no quantised weights", layer.name()))),
            };
        }

        Ok(x)
    }

    /// Per parameterised layer: `[scales][i8 weights][f32 bias]`.
    pub fn to_bytes(&self) -> io::Result<Vec<u8>> {
        let mut bytes = Vec::new();

        for (layer, rows) in self.network.layers().iter().zip(&self.rows) {
            let bias = match layer {
                Layer::Conv2d(conv) => &conv.bias,
                Layer::Dense(dense) => &dense.bias,
                Layer::MaxPool2d { .. } | Layer::Flatten => continue,
            };

            if let Some(rows) = rows {
                bytes.extend(rows.to_bytes()?);
            }
            bytes.extend(QuantTarget::Float.quantise(bias)?);
        }

        Ok(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        compile::Arch,
        network::{ball_detector, Activation, Dense},
        rng::ParamRng,
    };

    #[test]
    fn quant_target_encodings() {
        assert_eq!(QuantTarget::Float.quantise(&[1.0]).unwrap(), 1f32.to_le_bytes().to_vec());
        assert_eq!(QuantTarget::I8(0.5).quantise(&[1.0, -63.5]).unwrap(), vec![2, (-127i8) as u8]);
        assert!(QuantTarget::I8(0.5).quantise(&[64.0]).is_err());
        assert!(QuantTarget::I8(1.0).quantise(&[f32::NAN]).is_err());
    }

    #[test]
    fn largest_magnitude_maps_to_qmax() {
        let (q, scale) = quantise_i8(&[0.5, -2.0, 1.2]).unwrap();
        assert_eq!(scale, 2.0 / QMAX);
        assert_eq!(q, vec![32, -127, 76]);

        let (q, scale) = quantise_i8(&[0.0, 0.0]).unwrap();
        assert_eq!((q, scale), (vec![0, 0], 1.0));
    }

    #[test]
    fn rows_keep_their_own_scale() {
        let rows = QuantisedRows::from_rows(&[1.0, -1.0, 0.0, 10.0, 4.0, 0.0], 3).unwrap();
        assert_eq!(rows.scales, vec![1.0 / QMAX, 10.0 / QMAX]);
        assert_eq!(rows.row(0), &[127, -127, 0]);
        assert_eq!(rows.row(1), &[127, 51, 0]);
    }

    #[test]
    fn dense_matches_float_closely() {
        let dense = Dense {
            units: 2,
            activation: Activation::Linear,
            weights: vec![0.25, -0.5, 1.0, 0.0, 2.0, -1.0],
            bias: vec![0.1, -0.2],
        };
        let net = Network::new(Shape::Image { height: 1, width: 3, channels: 1 }, vec![Layer::Flatten, Layer::Dense(dense)])
            .unwrap();
        let kernels = Kernels::new(Arch::General, 2).unwrap();

        let input = [1.0, 2.0, -3.0];
        let float = net.forward(&input, &kernels).unwrap();
        let quantised = QuantisedNetwork::from_unquantised(net).unwrap().forward(&input, &kernels).unwrap();

        for (f, q) in float.iter().zip(&quantised) {
            assert!((f - q).abs() < 0.1, "{f} vs {q}");
        }
    }

    #[test]
    fn ball_detector_stays_close_to_reference() {
        let input = Shape::Image { height: 16, width: 16, channels: 1 };
        let net = ball_detector(input, 11).unwrap();
        let quantised = QuantisedNetwork::from_unquantised(net.clone()).unwrap();
        let kernels = Kernels::new(Arch::General, 2).unwrap();

        let mut rng = ParamRng::with_seed(5);
        for _ in 0..8 {
            let sample = rng.vec_f32(input.size(), 0.0, 1.0, false);
            let float = net.forward(&sample, &kernels).unwrap();
            let q = quantised.forward(&sample, &kernels).unwrap();
            assert_eq!(q.len(), 1);
            assert!((float[0] - q[0]).abs() < 0.1, "{} vs {}", float[0], q[0]);
        }
    }

    #[test]
    fn rejects_fan_in_beyond_i32_accumulation() {
        let fan_in = MAX_DOT_I8_LEN + 1;
        let dense = Dense { units: 1, activation: Activation::Linear, weights: vec![1.0; fan_in], bias: vec![0.0] };
        let net = Network::new(
            Shape::Image { height: 1, width: fan_in, channels: 1 },
            vec![Layer::Flatten, Layer::Dense(dense)],
        )
        .unwrap();

        assert!(matches!(QuantisedNetwork::from_unquantised(net), Err(Error::Model(_))));

        let dense = Dense { units: 1, activation: Activation::Linear, weights: vec![1.0; fan_in - 1], bias: vec![0.0] };
        let net = Network::new(
            Shape::Image { height: 1, width: fan_in - 1, channels: 1 },
            vec![Layer::Flatten, Layer::Dense(dense)],
        )
        .unwrap();

        let input = vec![1.0; fan_in - 1];
        let kernels = Kernels::new(Arch::General, 2).unwrap();
        let out = QuantisedNetwork::from_unquantised(net).unwrap().forward(&input, &kernels).unwrap();
        assert!((out[0] - (fan_in - 1) as f32).abs() / (fan_in as f32) < 1e-3);
    }

    #[test]
    fn export_layout() {
        let dense = Dense { units: 1, activation: Activation::Linear, weights: vec![1.0, -0.25], bias: vec![0.25] };
        let net = Network::new(Shape::Image { height: 1, width: 2, channels: 1 }, vec![Layer::Flatten, Layer::Dense(dense)])
            .unwrap();
        let bytes = QuantisedNetwork::from_unquantised(net).unwrap().to_bytes().unwrap();

        let mut expected = (1.0f32 / QMAX).to_le_bytes().to_vec();
        expected.extend([127u8, (-32i8) as u8]);
        expected.extend(0.25f32.to_le_bytes());
        assert_eq!(bytes, expected);
    }
}
