use std::{fs::File, io::Write, path::Path};

use crate::{Error, Result};

/// Writes `bytes` to `output_path`, optionally padding the file to a
/// multiple of 64 bytes.
pub fn write_to_bin(bytes: &[u8], output_path: &Path, pad: bool) -> Result<()> {
    let mut file = File::create(output_path).map_err(|err| Error::open(output_path, err))?;

    file.write_all(bytes)?;

    if pad {
        let mut padding = vec![0u8; (64 - bytes.len() % 64) % 64];

        let chs = [b'q', b'n', b'e', b't'];

        for (i, p) in padding.iter_mut().enumerate() {
            *p = chs[i % chs.len()];
        }

        file.write_all(&padding)?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pads_to_64_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.bin");

        write_to_bin(&[1, 2, 3], &path, true).unwrap();
        let written = std::fs::read(&path).unwrap();
        assert_eq!(written.len(), 64);
        assert_eq!(&written[..7], &[1, 2, 3, b'q', b'n', b'e', b't']);

        write_to_bin(&[0; 64], &path, true).unwrap();
        assert_eq!(std::fs::read(&path).unwrap().len(), 64);
    }
}
