mod conv;
mod init;
mod io;

use std::fmt;

pub use conv::ConvolutionDescription;
pub use init::ball_detector;

use crate::{simd::Kernels, Error, Result};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Shape {
    Image { height: usize, width: usize, channels: usize },
    Vector(usize),
}

impl Shape {
    pub fn size(&self) -> usize {
        match *self {
            Self::Image { height, width, channels } => height * width * channels,
            Self::Vector(size) => size,
        }
    }

    /// `None` when the element count does not fit a `usize`.
    pub fn checked_size(&self) -> Option<usize> {
        match *self {
            Self::Image { height, width, channels } => height.checked_mul(width)?.checked_mul(channels),
            Self::Vector(size) => Some(size),
        }
    }
}

impl fmt::Display for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Image { height, width, channels } => write!(f, "{height}x{width}x{channels}"),
            Self::Vector(size) => write!(f, "{size}"),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Activation {
    Linear,
    ReLU,
    Sigmoid,
    Softmax,
}

impl Activation {
    pub fn apply(self, xs: &mut [f32]) {
        match self {
            Self::Linear => {}
            Self::ReLU => xs.iter_mut().for_each(|x| *x = x.max(0.0)),
            Self::Sigmoid => xs.iter_mut().for_each(|x| *x = sigmoid(*x)),
            Self::Softmax => {
                let max = xs.iter().copied().fold(f32::NEG_INFINITY, f32::max);
                let mut total = 0.0;
                for x in xs.iter_mut() {
                    *x = (*x - max).exp();
                    total += *x;
                }
                xs.iter_mut().for_each(|x| *x /= total);
            }
        }
    }
}

pub fn sigmoid(x: f32) -> f32 {
    1. / (1. + (-x).exp())
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Padding {
    Valid,
    Same,
}

/// Filters are stored one row per output channel, each row ordered
/// `[ky][kx][input channel]` to line up with `ConvolutionDescription::im2col`.
#[derive(Clone, Debug, PartialEq)]
pub struct Conv2d {
    pub filters: usize,
    pub kernel: (usize, usize),
    pub stride: usize,
    pub padding: Padding,
    pub activation: Activation,
    pub weights: Vec<f32>,
    pub bias: Vec<f32>,
}

/// Weights are stored one row per unit.
#[derive(Clone, Debug, PartialEq)]
pub struct Dense {
    pub units: usize,
    pub activation: Activation,
    pub weights: Vec<f32>,
    pub bias: Vec<f32>,
}

#[derive(Clone, Debug, PartialEq)]
pub enum Layer {
    Conv2d(Conv2d),
    MaxPool2d { size: usize, stride: usize },
    Flatten,
    Dense(Dense),
}

impl Layer {
    /// Shape produced when applied to `input`, checking parameter counts.
    pub fn output_shape(&self, input: Shape) -> Result<Shape> {
        match (self, input) {
            (Self::Conv2d(conv), Shape::Image { height, width, channels }) => {
                let (kh, kw) = conv.kernel;

                if conv.filters == 0 || kh == 0 || kw == 0 || conv.stride == 0 {
                    return Err(Error::Model("conv2d with zero sized filters or stride".to_string()));
                }

                if conv.padding == Padding::Valid && (kh > height || kw > width) {
                    return Err(Error::Model(format!("{kh}x{kw} filter does not fit {height}x{width} input")));
                }

                if conv.activation == Activation::Softmax {
                    return Err(Error::Model("softmax is only supported on dense layers".to_string()));
                }

                let desc = conv.description(input)?;
                check_params("conv2d", &conv.weights, &conv.bias, desc.fan_in(), conv.filters)?;

                let (height, width) = desc.output_shape;
                Ok(Shape::Image { height, width, channels: conv.filters })
            }
            (Self::MaxPool2d { size, stride }, Shape::Image { height, width, channels }) => {
                if *size == 0 || *stride == 0 || *size > height || *size > width {
                    return Err(Error::Model(format!("invalid {size}/{stride} pooling over {height}x{width}")));
                }

                Ok(Shape::Image { height: (height - size) / stride + 1, width: (width - size) / stride + 1, channels })
            }
            (Self::Flatten, shape) => Ok(Shape::Vector(shape.size())),
            (Self::Dense(dense), Shape::Vector(size)) => {
                if dense.units == 0 {
                    return Err(Error::Model("dense layer without units".to_string()));
                }

                check_params("dense", &dense.weights, &dense.bias, size, dense.units)?;
                Ok(Shape::Vector(dense.units))
            }
            (layer, shape) => Err(Error::Model(format!("{} cannot follow an output of shape {shape}", layer.name()))),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Conv2d(_) => "conv2d",
            Self::MaxPool2d { .. } => "max_pooling2d",
            Self::Flatten => "flatten",
            Self::Dense(_) => "dense",
        }
    }
}

fn check_params(name: &str, weights: &[f32], bias: &[f32], fan_in: usize, outputs: usize) -> Result<()> {
    if weights.len() != fan_in * outputs || bias.len() != outputs {
        return Err(Error::Model(format!(
            "{name} expects {} weights and {outputs} biases, got {} and {}",
            fan_in * outputs,
            weights.len(),
            bias.len()
        )));
    }

    Ok(())
}

impl Conv2d {
    pub fn description(&self, input: Shape) -> Result<ConvolutionDescription> {
        match input {
            Shape::Image { height, width, channels } => Ok(ConvolutionDescription::new(
                (height, width),
                channels,
                self.filters,
                self.kernel,
                self.padding,
                self.stride,
            )),
            Shape::Vector(_) => Err(Error::Model("conv2d needs an image input".to_string())),
        }
    }
}

/// Sequential network over channels-last images.
#[derive(Clone, Debug, PartialEq)]
pub struct Network {
    input: Shape,
    layers: Vec<Layer>,
    /// Input shape of each layer, followed by the output shape.
    shapes: Vec<Shape>,
}

impl Network {
    pub fn new(input: Shape, layers: Vec<Layer>) -> Result<Self> {
        if !matches!(input, Shape::Image { .. }) || input.checked_size().unwrap_or(0) == 0 {
            return Err(Error::Model(format!("network input must be a non-empty image, got {input}")));
        }

        let mut shapes = vec![input];
        for layer in &layers {
            let next = layer.output_shape(shapes[shapes.len() - 1])?;
            shapes.push(next);
        }

        Ok(Self { input, layers, shapes })
    }

    pub fn input_shape(&self) -> Shape {
        self.input
    }

    pub fn output_shape(&self) -> Shape {
        self.shapes[self.shapes.len() - 1]
    }

    pub fn layers(&self) -> &[Layer] {
        &self.layers
    }

    /// Pairs each layer with the shape it is applied to.
    pub fn iter(&self) -> impl Iterator<Item = (&Layer, Shape)> {
        self.layers.iter().zip(self.shapes.iter().copied())
    }

    /// Floating point forward pass of a single sample.
    pub fn forward(&self, input: &[f32], kernels: &Kernels) -> Result<Vec<f32>> {
        check_input(self.input, input)?;

        let mut x = input.to_vec();

        for (layer, shape) in self.iter() {
            x = match layer {
                Layer::Conv2d(conv) => {
                    let desc = conv.description(shape)?;
                    let mut patch = vec![0.0; desc.fan_in()];
                    let mut out = vec![0.0; desc.output_size()];

                    for (pixel, dst) in out.chunks_exact_mut(desc.output_channels).enumerate() {
                        let (oy, ox) = (pixel / desc.output_shape.1, pixel % desc.output_shape.1);
                        desc.im2col(&x, oy, ox, &mut patch);

                        for ((d, row), &b) in dst.iter_mut().zip(conv.weights.chunks_exact(desc.fan_in())).zip(&conv.bias) {
                            *d = kernels.dot_f32(&patch, row) + b;
                        }
                    }

                    conv.activation.apply(&mut out);
                    out
                }
                Layer::MaxPool2d { size, stride } => max_pool(&x, shape, *size, *stride)?,
                Layer::Flatten => x,
                Layer::Dense(dense) => {
                    let mut out: Vec<f32> = dense
                        .weights
                        .chunks_exact(x.len())
                        .zip(&dense.bias)
                        .map(|(row, &b)| kernels.dot_f32(&x, row) + b)
                        .collect();

                    dense.activation.apply(&mut out);
                    out
                }
            };
        }

        Ok(x)
    }
}

pub(crate) fn check_input(shape: Shape, input: &[f32]) -> Result<()> {
    if input.len() != shape.size() {
        return Err(Error::Shape(format!("network expects {} inputs ({shape}), got {}", shape.size(), input.len())));
    }

    Ok(())
}

pub(crate) fn max_pool(input: &[f32], shape: Shape, size: usize, stride: usize) -> Result<Vec<f32>> {
    let Shape::Image { height, width, channels } = shape else {
        return Err(Error::Shape(format!("cannot pool over a vector of {shape}")));
    };

    let hout = (height - size) / stride + 1;
    let wout = (width - size) / stride + 1;
    let mut out = vec![f32::NEG_INFINITY; hout * wout * channels];

    for oy in 0..hout {
        for ox in 0..wout {
            let dst = &mut out[(oy * wout + ox) * channels..][..channels];

            for ky in 0..size {
                for kx in 0..size {
                    let (iy, ix) = (oy * stride + ky, ox * stride + kx);
                    let src = &input[(iy * width + ix) * channels..][..channels];

                    for (d, &s) in dst.iter_mut().zip(src) {
                        *d = d.max(s);
                    }
                }
            }
        }
    }

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compile::Arch;

    fn kernels() -> Kernels {
        Kernels::new(Arch::General, 1).unwrap()
    }

    fn image(height: usize, width: usize, channels: usize) -> Shape {
        Shape::Image { height, width, channels }
    }

    #[test]
    fn rejects_broken_chains() {
        let dense = Layer::Dense(Dense { units: 1, activation: Activation::Linear, weights: vec![0.0; 4], bias: vec![0.0] });
        assert!(Network::new(image(2, 2, 1), vec![dense.clone()]).is_err());
        assert!(Network::new(image(2, 2, 1), vec![Layer::Flatten, dense]).is_ok());

        let conv = Layer::Conv2d(Conv2d {
            filters: 1,
            kernel: (3, 3),
            stride: 1,
            padding: Padding::Valid,
            activation: Activation::ReLU,
            weights: vec![0.0; 9],
            bias: vec![0.0],
        });
        assert!(Network::new(image(2, 2, 1), vec![conv.clone()]).is_err());
        assert!(Network::new(image(3, 3, 1), vec![conv.clone()]).is_ok());
        assert!(Network::new(image(3, 3, 2), vec![conv]).is_err());

        assert!(Network::new(Shape::Vector(4), vec![]).is_err());
        assert!(Network::new(image(usize::MAX, 2, 1), vec![Layer::Flatten]).is_err());
    }

    #[test]
    fn conv_forward() {
        // 3x3 image, one 2x2 filter summing its window, then relu
        let conv = Conv2d {
            filters: 2,
            kernel: (2, 2),
            stride: 1,
            padding: Padding::Valid,
            activation: Activation::ReLU,
            weights: vec![1.0, 1.0, 1.0, 1.0, -1.0, 0.0, 0.0, 0.0],
            bias: vec![0.5, 0.0],
        };
        let net = Network::new(image(3, 3, 1), vec![Layer::Conv2d(conv)]).unwrap();
        assert_eq!(net.output_shape(), image(2, 2, 2));

        let input = [1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0, 9.0];
        let out = net.forward(&input, &kernels()).unwrap();
        assert_eq!(out, vec![12.5, 0.0, 16.5, 0.0, 24.5, 0.0, 28.5, 0.0]);
    }

    #[test]
    fn pool_flatten_dense() {
        let dense = Dense { units: 2, activation: Activation::Linear, weights: vec![1.0, 0.0, 0.0, 1.0], bias: vec![0.0, 1.0] };
        let layers = vec![Layer::MaxPool2d { size: 2, stride: 2 }, Layer::Flatten, Layer::Dense(dense)];
        let net = Network::new(image(2, 4, 1), layers).unwrap();
        assert_eq!(net.output_shape(), Shape::Vector(2));

        let input = [1.0, 5.0, -2.0, -1.0, 3.0, 0.0, -4.0, -3.0];
        assert_eq!(net.forward(&input, &kernels()).unwrap(), vec![5.0, 0.0]);

        assert!(net.forward(&input[..4], &kernels()).is_err());
    }

    #[test]
    fn activations() {
        let mut xs = [-1.0, 0.0, 2.0];
        Activation::ReLU.apply(&mut xs);
        assert_eq!(xs, [0.0, 0.0, 2.0]);

        let mut xs = [0.0];
        Activation::Sigmoid.apply(&mut xs);
        assert_eq!(xs, [0.5]);

        let mut xs = [1.0, 1.0, 1.0, 1.0];
        Activation::Softmax.apply(&mut xs);
        assert_eq!(xs, [0.25; 4]);
    }
}
