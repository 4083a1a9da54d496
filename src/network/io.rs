//! Binary model files.
//!
//! All values are little endian. Weights are written in file order
//! (`[ky][kx][in][out]` for convolutions, `[in][units]` for dense layers),
//! so a channels-last framework can dump its kernels directly.
use std::{
    fs::File,
    io::{BufReader, BufWriter, Read, Write},
    path::Path,
};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use tracing::debug;

use super::{Activation, Conv2d, Dense, Layer, Network, Padding, Shape};
use crate::{Error, Result};

pub const MODEL_MAGIC: &[u8; 4] = b"QNET";
pub const MODEL_VERSION: u16 = 1;

/// Upper bound on the parameters of a single layer, guards allocations
/// against corrupt headers.
const MAX_LAYER_PARAMS: usize = 1 << 26;

/// Upper bound on `height * width * channels` of the input image.
const MAX_INPUT_SIZE: usize = 1 << 26;

const TAG_CONV2D: u8 = 0;
const TAG_MAXPOOL2D: u8 = 1;
const TAG_FLATTEN: u8 = 2;
const TAG_DENSE: u8 = 3;

impl TryFrom<u8> for Activation {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0 => Ok(Self::Linear),
            1 => Ok(Self::ReLU),
            2 => Ok(Self::Sigmoid),
            3 => Ok(Self::Softmax),
            _ => Err(Error::Model(format!("unknown activation {value}"))),
        }
    }
}

impl From<Activation> for u8 {
    fn from(value: Activation) -> Self {
        match value {
            Activation::Linear => 0,
            Activation::ReLU => 1,
            Activation::Sigmoid => 2,
            Activation::Softmax => 3,
        }
    }
}

impl TryFrom<u8> for Padding {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0 => Ok(Self::Valid),
            1 => Ok(Self::Same),
            _ => Err(Error::Model(format!("unknown padding {value}"))),
        }
    }
}

impl From<Padding> for u8 {
    fn from(value: Padding) -> Self {
        match value {
            Padding::Valid => 0,
            Padding::Same => 1,
        }
    }
}

impl Network {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|err| Error::open(path, err))?;
        let network = Self::read_from(&mut BufReader::new(file))?;

        debug!(path = %path.display(), layers = network.layers().len(), output = %network.output_shape(), "loaded network");

        Ok(network)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let file = File::create(path).map_err(|err| Error::open(path, err))?;
        let mut writer = BufWriter::new(file);
        self.write_to(&mut writer)?;
        writer.flush()?;
        Ok(())
    }

    pub fn read_from<R: Read>(reader: &mut R) -> Result<Self> {
        let mut magic = [0u8; 4];
        reader.read_exact(&mut magic)?;
        if &magic != MODEL_MAGIC {
            return Err(Error::Model("not a model file".to_string()));
        }

        let version = reader.read_u16::<LittleEndian>()?;
        if version != MODEL_VERSION {
            return Err(Error::Model(format!("unsupported model version {version}")));
        }

        let height = read_usize(reader)?;
        let width = read_usize(reader)?;
        let channels = read_usize(reader)?;
        let input = Shape::Image { height, width, channels };

        if input.checked_size().filter(|&size| size <= MAX_INPUT_SIZE).is_none() {
            return Err(Error::Model(format!("input of {height}x{width}x{channels} is too large")));
        }

        let count = read_usize(reader)?;
        let mut layers = Vec::new();
        let mut shape = input;

        for _ in 0..count {
            let layer = match reader.read_u8()? {
                TAG_CONV2D => {
                    let Shape::Image { channels, .. } = shape else {
                        return Err(Error::Model(format!("conv2d cannot follow an output of shape {shape}")));
                    };

                    let filters = read_usize(reader)?;
                    let kernel = (read_usize(reader)?, read_usize(reader)?);
                    let stride = read_usize(reader)?;
                    let padding = Padding::try_from(reader.read_u8()?)?;
                    let activation = Activation::try_from(reader.read_u8()?)?;
                    let fan_in = kernel.0.checked_mul(kernel.1).and_then(|size| size.checked_mul(channels));
                    let Some(fan_in) = fan_in else {
                        let (kh, kw) = kernel;
                        return Err(Error::Model(format!("{kh}x{kw} kernel over {channels} channels is too large")));
                    };
                    let (weights, bias) = read_params(reader, fan_in, filters)?;

                    Layer::Conv2d(Conv2d { filters, kernel, stride, padding, activation, weights, bias })
                }
                TAG_MAXPOOL2D => Layer::MaxPool2d { size: read_usize(reader)?, stride: read_usize(reader)? },
                TAG_FLATTEN => Layer::Flatten,
                TAG_DENSE => {
                    let Shape::Vector(fan_in) = shape else {
                        return Err(Error::Model(format!("dense cannot follow an output of shape {shape}")));
                    };

                    let units = read_usize(reader)?;
                    let activation = Activation::try_from(reader.read_u8()?)?;
                    let (weights, bias) = read_params(reader, fan_in, units)?;

                    Layer::Dense(Dense { units, activation, weights, bias })
                }
                tag => return Err(Error::Model(format!("unknown layer tag {tag}"))),
            };

            shape = layer.output_shape(shape)?;
            layers.push(layer);
        }

        if reader.read(&mut [0u8; 1])? != 0 {
            return Err(Error::Model("trailing bytes after the last layer".to_string()));
        }

        Network::new(input, layers)
    }

    pub fn write_to<W: Write>(&self, writer: &mut W) -> Result<()> {
        let Shape::Image { height, width, channels } = self.input_shape() else {
            return Err(Error::Model(format!("cannot store a network over {} inputs", self.input_shape())));
        };

        writer.write_all(MODEL_MAGIC)?;
        writer.write_u16::<LittleEndian>(MODEL_VERSION)?;
        write_usize(writer, height)?;
        write_usize(writer, width)?;
        write_usize(writer, channels)?;
        write_usize(writer, self.layers().len())?;

        for layer in self.layers() {
            match layer {
                Layer::Conv2d(conv) => {
                    writer.write_u8(TAG_CONV2D)?;
                    write_usize(writer, conv.filters)?;
                    write_usize(writer, conv.kernel.0)?;
                    write_usize(writer, conv.kernel.1)?;
                    write_usize(writer, conv.stride)?;
                    writer.write_u8(conv.padding.into())?;
                    writer.write_u8(conv.activation.into())?;
                    write_params(writer, &conv.weights, &conv.bias, conv.filters)?;
                }
                Layer::MaxPool2d { size, stride } => {
                    writer.write_u8(TAG_MAXPOOL2D)?;
                    write_usize(writer, *size)?;
                    write_usize(writer, *stride)?;
                }
                Layer::Flatten => writer.write_u8(TAG_FLATTEN)?,
                Layer::Dense(dense) => {
                    writer.write_u8(TAG_DENSE)?;
                    write_usize(writer, dense.units)?;
                    writer.write_u8(dense.activation.into())?;
                    write_params(writer, &dense.weights, &dense.bias, dense.units)?;
                }
            }
        }

        Ok(())
    }
}

fn read_usize<R: Read>(reader: &mut R) -> Result<usize> {
    Ok(reader.read_u32::<LittleEndian>()? as usize)
}

fn write_usize<W: Write>(writer: &mut W, value: usize) -> Result<()> {
    let value = u32::try_from(value).map_err(|_| Error::Model(format!("{value} does not fit the model format")))?;
    writer.write_u32::<LittleEndian>(value)?;
    Ok(())
}

/// Reads file ordered weights and transposes them into one row per output.
fn read_params<R: Read>(reader: &mut R, fan_in: usize, outputs: usize) -> Result<(Vec<f32>, Vec<f32>)> {
    let count = fan_in.checked_mul(outputs).filter(|&count| count <= MAX_LAYER_PARAMS);
    let Some(count) = count else {
        return Err(Error::Model(format!("layer with {fan_in}x{outputs} weights is too large")));
    };

    let mut file_order = vec![0f32; count];
    reader.read_f32_into::<LittleEndian>(&mut file_order)?;

    let mut weights = vec![0f32; count];
    for (i, &w) in file_order.iter().enumerate() {
        let (col, row) = (i / outputs, i % outputs);
        weights[row * fan_in + col] = w;
    }

    let mut bias = vec![0f32; outputs];
    reader.read_f32_into::<LittleEndian>(&mut bias)?;

    Ok((weights, bias))
}

fn write_params<W: Write>(writer: &mut W, weights: &[f32], bias: &[f32], outputs: usize) -> Result<()> {
    let fan_in = weights.len() / outputs;

    for col in 0..fan_in {
        for row in 0..outputs {
            writer.write_f32::<LittleEndian>(weights[row * fan_in + col])?;
        }
    }

    for &b in bias {
        writer.write_f32::<LittleEndian>(b)?;
    }

    Ok(())
}
