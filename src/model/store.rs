use std::{
    fs::File,
    io::{self, BufReader, BufWriter, Read, Write},
    path::Path,
};

use super::{ModelParam, predict_margin};
use crate::{FmErr, Result, data::Row};

/// The format tag at the start of every model file, raw native-endian floats.
pub const MODEL_TAG: &[u8; 4] = b"binf";

fn truncated(what: &str, e: io::Error) -> FmErr {
    match e.kind() {
        io::ErrorKind::UnexpectedEof => {
            FmErr::InvalidModelParam(format!("model stream ended while reading the {what}"))
        }
        _ => FmErr::Io(e),
    }
}

/// Writes the raw bytes of `param`.
pub fn write_param<W: Write + ?Sized>(writer: &mut W, param: &ModelParam) -> Result<()> {
    writer.write_all(bytemuck::bytes_of(param))?;
    Ok(())
}

/// Reads and validates a `ModelParam` written by `write_param`.
pub fn read_param<R: Read + ?Sized>(reader: &mut R) -> Result<ModelParam> {
    let mut buf = [0u8; size_of::<ModelParam>()];
    reader
        .read_exact(&mut buf)
        .map_err(|e| truncated("parameters", e))?;

    let param: ModelParam = bytemuck::pod_read_unaligned(&buf);
    param.validate()?;
    Ok(param)
}

/// Reads `n` raw weights.
///
/// The buffer grows one chunk at a time, so a header announcing more weights than the stream
/// holds fails on the missing bytes instead of allocating for them up front.
pub fn read_weights<R: Read + ?Sized>(reader: &mut R, n: usize) -> Result<Vec<f32>> {
    const CHUNK: usize = 1 << 16;

    let mut weight = Vec::with_capacity(n.min(CHUNK));
    let mut buf = vec![0f32; n.min(CHUNK)];

    while weight.len() < n {
        let len = (n - weight.len()).min(CHUNK);
        reader
            .read_exact(bytemuck::cast_slice_mut(&mut buf[..len]))
            .map_err(|e| truncated("weights", e))?;
        weight.extend_from_slice(&buf[..len]);
    }

    Ok(weight)
}

/// Writes a model file: the format tag, the raw `param` and its `num_weight` weights.
///
/// # Returns
/// A `SizeMismatch` error if `weight` doesn't hold exactly `num_weight` values.
pub fn save_model<W: Write + ?Sized>(writer: &mut W, param: &ModelParam, weight: &[f32]) -> Result<()> {
    if weight.len() != param.num_weight() {
        return Err(FmErr::SizeMismatch {
            what: "model weights",
            got: weight.len(),
            expected: param.num_weight(),
        });
    }

    writer.write_all(MODEL_TAG)?;
    write_param(writer, param)?;
    writer.write_all(bytemuck::cast_slice(weight))?;
    Ok(())
}

/// A factorization machine owning its weights.
#[derive(Debug, Clone, PartialEq)]
pub struct FmModel {
    param: ModelParam,
    weight: Vec<f32>,
}

impl FmModel {
    /// Creates a new `FmModel`.
    ///
    /// # Returns
    /// A `SizeMismatch` error if `weight` doesn't hold exactly `param.num_weight` values.
    pub fn new(param: ModelParam, weight: Vec<f32>) -> Result<Self> {
        if weight.len() != param.num_weight() {
            return Err(FmErr::SizeMismatch {
                what: "model weights",
                got: weight.len(),
                expected: param.num_weight(),
            });
        }

        Ok(Self { param, weight })
    }

    /// Reads a model written by `save`.
    ///
    /// The format tag is checked before anything else is interpreted; an unknown tag or a
    /// truncated stream is an error, there's no partial recovery.
    pub fn load<R: Read + ?Sized>(reader: &mut R) -> Result<Self> {
        let mut tag = [0u8; 4];
        reader
            .read_exact(&mut tag)
            .map_err(|e| truncated("format tag", e))?;

        if &tag != MODEL_TAG {
            return Err(FmErr::InvalidModelTag(tag));
        }

        let param = read_param(reader)?;
        let weight = read_weights(reader, param.num_weight())?;

        Ok(Self { param, weight })
    }

    pub fn save<W: Write + ?Sized>(&self, writer: &mut W) -> Result<()> {
        save_model(writer, &self.param, &self.weight)
    }

    pub fn load_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut reader = BufReader::new(File::open(path)?);
        Self::load(&mut reader)
    }

    pub fn save_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let mut writer = BufWriter::new(File::create(path)?);
        self.save(&mut writer)?;
        writer.flush()?;
        Ok(())
    }

    /// Computes the margin of `row` with the owned weights.
    pub fn predict(&self, row: &Row<'_>) -> f32 {
        predict_margin(&self.param, &self.weight, row)
    }

    /// Writes one line per feature: its index followed by its factors, tab separated.
    pub fn dump<W: Write + ?Sized>(&self, writer: &mut W) -> Result<()> {
        let k = self.param.nfactor();

        for (i, factors) in self.weight.chunks_exact(k).enumerate() {
            write!(writer, "{i}")?;
            for v in factors {
                write!(writer, "\t{v}")?;
            }
            writeln!(writer)?;
        }

        Ok(())
    }

    pub fn param(&self) -> &ModelParam {
        &self.param
    }

    pub fn weight(&self) -> &[f32] {
        &self.weight
    }

    pub fn into_parts(self) -> (ModelParam, Vec<f32>) {
        (self.param, self.weight)
    }
}
