use super::Padding;

/// Geometry of a 2D convolution over a channels-last image.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ConvolutionDescription {
    pub input_shape: (usize, usize),
    pub input_channels: usize,
    pub output_shape: (usize, usize),
    pub output_channels: usize,
    pub filter_shape: (usize, usize),
    /// Zeros added above and to the left of the input.
    pub padding_shape: (usize, usize),
    pub stride: usize,
}

impl ConvolutionDescription {
    /// Callers must ensure `stride > 0`, and for `Padding::Valid` that the
    /// filter fits inside the input.
    pub fn new(
        input_shape: (usize, usize),
        input_channels: usize,
        output_channels: usize,
        filter_shape: (usize, usize),
        padding: Padding,
        stride: usize,
    ) -> Self {
        let (output_shape, padding_shape) = match padding {
            Padding::Valid => {
                let hout = (input_shape.0 - filter_shape.0) / stride + 1;
                let wout = (input_shape.1 - filter_shape.1) / stride + 1;
                ((hout, wout), (0, 0))
            }
            Padding::Same => {
                let hout = input_shape.0.div_ceil(stride);
                let wout = input_shape.1.div_ceil(stride);
                let htotal = ((hout - 1) * stride + filter_shape.0).saturating_sub(input_shape.0);
                let wtotal = ((wout - 1) * stride + filter_shape.1).saturating_sub(input_shape.1);
                ((hout, wout), (htotal / 2, wtotal / 2))
            }
        };

        Self { input_shape, input_channels, output_shape, output_channels, filter_shape, padding_shape, stride }
    }

    /// Length of one im2col patch, which is also the row length of the filters.
    pub fn fan_in(&self) -> usize {
        self.filter_shape.0 * self.filter_shape.1 * self.input_channels
    }

    pub fn output_size(&self) -> usize {
        self.output_shape.0 * self.output_shape.1 * self.output_channels
    }

    /// Gathers the receptive field of output pixel `(oy, ox)` into `patch`,
    /// ordered `[ky][kx][channel]`, with zeros outside the input.
    pub fn im2col<T: Copy + Default>(&self, input: &[T], oy: usize, ox: usize, patch: &mut [T]) {
        let (h, w) = self.input_shape;
        let (kh, kw) = self.filter_shape;
        let c = self.input_channels;

        for ky in 0..kh {
            let iy = (oy * self.stride + ky).checked_sub(self.padding_shape.0).filter(|&iy| iy < h);

            for kx in 0..kw {
                let ix = (ox * self.stride + kx).checked_sub(self.padding_shape.1).filter(|&ix| ix < w);
                let dst = &mut patch[(ky * kw + kx) * c..][..c];

                match (iy, ix) {
                    (Some(iy), Some(ix)) => dst.copy_from_slice(&input[(iy * w + ix) * c..][..c]),
                    _ => dst.fill(T::default()),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn output_shapes() {
        let valid = ConvolutionDescription::new((32, 32), 1, 8, (3, 3), Padding::Valid, 1);
        assert_eq!(valid.output_shape, (30, 30));
        assert_eq!(valid.fan_in(), 9);

        let strided = ConvolutionDescription::new((7, 9), 2, 4, (3, 3), Padding::Valid, 2);
        assert_eq!(strided.output_shape, (3, 4));

        let same = ConvolutionDescription::new((5, 5), 1, 1, (3, 3), Padding::Same, 1);
        assert_eq!(same.output_shape, (5, 5));
        assert_eq!(same.padding_shape, (1, 1));

        let same_strided = ConvolutionDescription::new((6, 6), 1, 1, (3, 3), Padding::Same, 2);
        assert_eq!(same_strided.output_shape, (3, 3));
        assert_eq!(same_strided.padding_shape, (0, 0));
    }

    #[test]
    fn im2col_pads_with_zeros() {
        // 3x3 single channel image
        let input = [1, 2, 3, 4, 5, 6, 7, 8, 9];
        let desc = ConvolutionDescription::new((3, 3), 1, 1, (3, 3), Padding::Same, 1);
        let mut patch = [0; 9];

        desc.im2col(&input, 0, 0, &mut patch);
        assert_eq!(patch, [0, 0, 0, 0, 1, 2, 0, 4, 5]);

        desc.im2col(&input, 1, 1, &mut patch);
        assert_eq!(patch, input);

        desc.im2col(&input, 2, 2, &mut patch);
        assert_eq!(patch, [5, 6, 0, 8, 9, 0, 0, 0, 0]);
    }

    #[test]
    fn im2col_keeps_channels_together() {
        // 2x2 image with 2 channels, 2x2 valid filter
        let input = [1, -1, 2, -2, 3, -3, 4, -4];
        let desc = ConvolutionDescription::new((2, 2), 2, 1, (2, 2), Padding::Valid, 1);
        let mut patch = [0; 8];

        desc.im2col(&input, 0, 0, &mut patch);
        assert_eq!(patch, input);
    }
}
