use std::{
    ffi::OsString,
    fs::File,
    io::BufReader,
    path::{Path, PathBuf},
};

use tracing::debug;

use crate::{npy, Error, Result, IMAGES_SUFFIX};

/// Dense row-major array of `f32`.
#[derive(Clone, Debug, PartialEq)]
pub struct Array {
    shape: Vec<usize>,
    data: Vec<f32>,
}

impl Array {
    pub fn new(shape: Vec<usize>, data: Vec<f32>) -> Result<Self> {
        let expected: usize = shape.iter().product();

        if expected != data.len() {
            return Err(Error::Shape(format!("shape {shape:?} holds {expected} elements, got {}", data.len())));
        }

        Ok(Self { shape, data })
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn data(&self) -> &[f32] {
        &self.data
    }

    /// Length of the first axis, 1 for a scalar.
    pub fn len(&self) -> usize {
        self.shape.first().copied().unwrap_or(1)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of elements in one entry of the first axis.
    pub fn row_len(&self) -> usize {
        self.shape.iter().skip(1).product()
    }

    pub fn row(&self, idx: usize) -> &[f32] {
        let len = self.row_len();
        &self.data[idx * len..(idx + 1) * len]
    }
}

/// Mean, labels and images of an image database.
///
/// Built once and only ever shared by reference afterwards.
#[derive(Clone, Debug, PartialEq)]
pub struct DatasetBundle {
    mean: Array,
    y: Array,
    images: Array,
}

impl DatasetBundle {
    /// Checks that there is a label per image and that `mean` broadcasts
    /// over a single image, either per pixel, per channel or as a scalar.
    pub fn new(mean: Array, y: Array, images: Array) -> Result<Self> {
        if images.shape().is_empty() {
            return Err(Error::Dataset("images need a sample axis".to_string()));
        }

        if y.shape().is_empty() {
            return Err(Error::Dataset("labels need a sample axis".to_string()));
        }

        if y.len() != images.len() {
            return Err(Error::Dataset(format!("{} labels for {} images", y.len(), images.len())));
        }

        let bundle = Self { mean, y, images };
        let means = bundle.mean.data().len();

        if means != bundle.sample_len() && means != bundle.channels() && means != 1 {
            return Err(Error::Dataset(format!(
                "mean of {means} elements does not broadcast over images of shape {:?}",
                bundle.sample_shape()
            )));
        }

        Ok(bundle)
    }

    /// Reads `mean` and `y` from `database_path` and `images` from the
    /// sibling file carrying the `.x` suffix.
    pub fn load(database_path: impl AsRef<Path>) -> Result<Self> {
        let database_path = database_path.as_ref();

        let (mean, y) = {
            let file = File::open(database_path).map_err(|err| Error::open(database_path, err))?;
            let mut reader = BufReader::new(file);
            let mean = npy::read_array(&mut reader)?;
            let y = npy::read_array(&mut reader)?;
            (mean, y)
        };

        debug!(path = %database_path.display(), mean = ?mean.shape(), y = ?y.shape(), "loaded mean and labels");

        let images_path = Self::images_path(database_path);
        let images = {
            let file = File::open(&images_path).map_err(|err| Error::open(&images_path, err))?;
            npy::read_array(&mut BufReader::new(file))?
        };

        debug!(path = %images_path.display(), images = ?images.shape(), "loaded images");

        Self::new(mean, y, images)
    }

    pub fn images_path(database_path: &Path) -> PathBuf {
        let mut path = OsString::from(database_path.as_os_str());
        path.push(IMAGES_SUFFIX);
        PathBuf::from(path)
    }

    pub fn y(&self) -> &Array {
        &self.y
    }

    pub fn len(&self) -> usize {
        self.images.len()
    }

    pub fn is_empty(&self) -> bool {
        self.images.is_empty()
    }

    /// Shape of a single image, without the sample axis.
    pub fn sample_shape(&self) -> &[usize] {
        &self.images.shape()[1..]
    }

    pub fn sample_len(&self) -> usize {
        self.images.row_len()
    }

    /// Trailing channel count of `[n, h, w, c]` images, 1 otherwise.
    pub fn channels(&self) -> usize {
        match self.images.shape() {
            [_, _, _, c] => *c,
            _ => 1,
        }
    }

    /// Image `idx` with the mean subtracted.
    pub fn sample(&self, idx: usize) -> Vec<f32> {
        let image = self.images.row(idx);
        let mean = self.mean.data();

        if mean.len() == image.len() {
            image.iter().zip(mean).map(|(x, m)| x - m).collect()
        } else if mean.len() == 1 {
            image.iter().map(|x| x - mean[0]).collect()
        } else {
            image.iter().enumerate().map(|(i, x)| x - mean[i % mean.len()]).collect()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn images() -> Array {
        Array::new(vec![2, 2, 2, 2], (0..16).map(|x| x as f32).collect()).unwrap()
    }

    fn labels() -> Array {
        Array::new(vec![2], vec![1.0, 0.0]).unwrap()
    }

    #[test]
    fn label_count_must_match() {
        let y = Array::new(vec![3], vec![1.0, 0.0, 1.0]).unwrap();
        let mean = Array::new(vec![], vec![0.0]).unwrap();
        assert!(matches!(DatasetBundle::new(mean, y, images()), Err(Error::Dataset(_))));
    }

    #[test]
    fn mean_broadcasting() {
        let per_pixel = Array::new(vec![2, 2, 2], vec![1.0; 8]).unwrap();
        let bundle = DatasetBundle::new(per_pixel, labels(), images()).unwrap();
        assert_eq!(bundle.sample(1), (7..15).map(|x| x as f32).collect::<Vec<_>>());

        let per_channel = Array::new(vec![2], vec![0.0, 10.0]).unwrap();
        let bundle = DatasetBundle::new(per_channel, labels(), images()).unwrap();
        assert_eq!(bundle.sample(0), vec![0.0, -9.0, 2.0, -7.0, 4.0, -5.0, 6.0, -3.0]);

        let scalar = Array::new(vec![], vec![2.0]).unwrap();
        let bundle = DatasetBundle::new(scalar, labels(), images()).unwrap();
        assert_eq!(bundle.sample(0)[0], -2.0);

        let odd = Array::new(vec![3], vec![0.0; 3]).unwrap();
        assert!(matches!(DatasetBundle::new(odd, labels(), images()), Err(Error::Dataset(_))));
    }

    #[test]
    fn images_path_appends_suffix() {
        assert_eq!(DatasetBundle::images_path(Path::new("data/img.db")), PathBuf::from("data/img.db.x"));
    }

    #[test]
    fn array_rows() {
        let array = Array::new(vec![3, 2], vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]).unwrap();
        assert_eq!(array.len(), 3);
        assert_eq!(array.row_len(), 2);
        assert_eq!(array.row(2), &[5.0, 6.0]);
        assert!(Array::new(vec![2, 2], vec![0.0; 3]).is_err());
    }
}
