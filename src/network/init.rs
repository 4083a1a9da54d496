use super::{Activation, Conv2d, Dense, Layer, Network, Padding, Shape};
use crate::{rng::ParamRng, Result};

/// Randomly initialised ball detector: two convolution blocks followed by a
/// small classifier with a single sigmoid output.
///
/// Needs an input of at least 8x8.
pub fn ball_detector(input: Shape, seed: u64) -> Result<Network> {
    let mut rng = ParamRng::with_seed(seed);
    let channels = match input {
        Shape::Image { channels, .. } => channels,
        Shape::Vector(_) => 1,
    };

    let mut layers = vec![
        conv3x3(&mut rng, channels, 8, Padding::Same),
        Layer::MaxPool2d { size: 2, stride: 2 },
        conv3x3(&mut rng, 8, 16, Padding::Valid),
        Layer::MaxPool2d { size: 2, stride: 2 },
        Layer::Flatten,
    ];

    let mut shape = input;
    for layer in &layers {
        shape = layer.output_shape(shape)?;
    }

    let hidden = 32;
    layers.push(Layer::Dense(Dense {
        units: hidden,
        activation: Activation::ReLU,
        weights: he_init(&mut rng, shape.size(), hidden),
        bias: rng.vec_f32(hidden, 0.0, 0.01, false),
    }));
    layers.push(Layer::Dense(Dense {
        units: 1,
        activation: Activation::Sigmoid,
        weights: he_init(&mut rng, hidden, 1),
        bias: vec![0.0],
    }));

    Network::new(input, layers)
}

fn conv3x3(rng: &mut ParamRng, channels: usize, filters: usize, padding: Padding) -> Layer {
    Layer::Conv2d(Conv2d {
        filters,
        kernel: (3, 3),
        stride: 1,
        padding,
        activation: Activation::ReLU,
        weights: he_init(rng, 9 * channels, filters),
        bias: rng.vec_f32(filters, 0.0, 0.01, false),
    })
}

fn he_init(rng: &mut ParamRng, fan_in: usize, outputs: usize) -> Vec<f32> {
    let stdev = (2.0 / fan_in as f32).sqrt();
    rng.vec_f32(fan_in * outputs, 0.0, stdev, true)
}
