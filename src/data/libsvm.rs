//! Streaming reader for the libsvm text format.
//!
//! Each line is `label[:weight] index[:value] index[:value] ...`. A missing value means `1.0`,
//! a missing weight means `1.0`. Blank lines and lines starting with `#` are skipped.

use std::{
    fs::File,
    io::{BufRead, BufReader, Lines},
    num::NonZeroUsize,
    ops::Range,
    path::{Path, PathBuf},
    str::FromStr,
};

use log::debug;

use super::{RowBlock, RowBlockIter, ShardSpec};
use crate::{FmErr, Result};

/// Parses a single libsvm line into `block`.
///
/// # Arguments
/// * `block` - The block the parsed row gets appended to.
/// * `line` - The raw line.
/// * `lineno` - The 1-based line number, used for error reporting.
///
/// # Returns
/// Whether the line held a row (blank lines and comments don't).
pub fn parse_line(block: &mut RowBlock, line: &str, lineno: usize) -> Result<bool> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return Ok(false);
    }

    let mut tokens = line.split_whitespace();
    let Some(head) = tokens.next() else {
        return Ok(false);
    };
    let (label, weight): (f32, f32) = match head.split_once(':') {
        Some((label, weight)) => (parse_num(label, lineno)?, parse_num(weight, lineno)?),
        None => (parse_num(head, lineno)?, 1.0),
    };

    let features = tokens
        .map(|token| -> Result<(u32, f32)> {
            match token.split_once(':') {
                Some((index, value)) => Ok((parse_num(index, lineno)?, parse_num(value, lineno)?)),
                None => Ok((parse_num(token, lineno)?, 1.0)),
            }
        })
        .collect::<Result<Vec<_>>>()?;

    block.push(label, weight, features);
    Ok(true)
}

fn parse_num<T: FromStr>(token: &str, lineno: usize) -> Result<T> {
    token.parse().map_err(|_| FmErr::Parse {
        line: lineno,
        msg: format!("invalid number {token:?}"),
    })
}

fn is_data_line(line: &str) -> bool {
    let line = line.trim();
    !line.is_empty() && !line.starts_with('#')
}

/// A `RowBlockIter` streaming a worker's shard of a libsvm file.
///
/// The file is split by data lines, each worker owning a contiguous, balanced range of them.
pub struct LibSvmIter {
    path: PathBuf,
    range: Range<usize>,
    batch_size: usize,
    lines: Option<Lines<BufReader<File>>>,
    lineno: usize,
    next_row: usize,
    block: RowBlock,
}

impl LibSvmIter {
    /// Opens the shard owned by `spec` of the libsvm file at `path`.
    ///
    /// # Arguments
    /// * `path` - The libsvm file.
    /// * `spec` - The shard to read.
    /// * `batch_size` - The maximum amount of rows per batch.
    ///
    /// # Returns
    /// An io error if the file can't be read.
    pub fn open<P: AsRef<Path>>(path: P, spec: ShardSpec, batch_size: NonZeroUsize) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        let mut total = 0;
        for line in BufReader::new(File::open(&path)?).lines() {
            if is_data_line(&line?) {
                total += 1;
            }
        }

        let range = spec.range(total);
        debug!(
            "opened {}: rank={} rows={:?} of {total}",
            path.display(),
            spec.rank,
            range
        );

        let mut iter = Self {
            path,
            range,
            batch_size: batch_size.get(),
            lines: None,
            lineno: 0,
            next_row: 0,
            block: RowBlock::new(),
        };
        iter.reset()?;
        Ok(iter)
    }

    /// The range of data lines owned by this shard.
    pub fn range(&self) -> Range<usize> {
        self.range.clone()
    }
}

impl RowBlockIter for LibSvmIter {
    fn reset(&mut self) -> Result<()> {
        let file = File::open(&self.path)?;
        self.lines = Some(BufReader::new(file).lines());
        self.lineno = 0;
        self.next_row = 0;
        self.block.clear();
        Ok(())
    }

    fn advance(&mut self) -> Result<bool> {
        self.block.clear();

        let Some(lines) = self.lines.as_mut() else {
            return Ok(false);
        };

        while self.block.len() < self.batch_size && self.next_row < self.range.end {
            let Some(line) = lines.next() else {
                break;
            };

            let line = line?;
            self.lineno += 1;

            if !is_data_line(&line) {
                continue;
            }

            let row = self.next_row;
            self.next_row += 1;

            if row >= self.range.start {
                parse_line(&mut self.block, &line, self.lineno)?;
            }
        }

        Ok(!self.block.is_empty())
    }

    fn current_batch(&self) -> &RowBlock {
        &self.block
    }
}

#[cfg(test)]
mod tests {
    use std::{env, fs};

    use super::*;

    #[test]
    fn parses_labels_weights_and_features() {
        let mut block = RowBlock::new();
        assert!(parse_line(&mut block, "1 0:0.5 3:2", 1).unwrap());
        assert!(parse_line(&mut block, "0:2.5 7", 2).unwrap());
        assert!(!parse_line(&mut block, "   ", 3).unwrap());
        assert!(!parse_line(&mut block, "# comment", 4).unwrap());

        let row = block.row(0);
        assert_eq!((row.label, row.weight), (1.0, 1.0));
        assert_eq!(row.index, &[0, 3]);
        assert_eq!(row.value, &[0.5, 2.0]);

        let row = block.row(1);
        assert_eq!((row.label, row.weight), (0.0, 2.5));
        assert_eq!(row.features().collect::<Vec<_>>(), vec![(7, 1.0)]);
    }

    #[test]
    fn rejects_malformed_tokens() {
        let mut block = RowBlock::new();
        let err = parse_line(&mut block, "1 a:1", 9).unwrap_err();
        assert!(matches!(err, FmErr::Parse { line: 9, .. }));
        assert!(block.is_empty());
    }

    #[test]
    fn streams_the_rank_shard() {
        let path = env::temp_dir().join(format!("fm-libsvm-{}.txt", std::process::id()));
        fs::write(&path, "1 0:1\n# skip\n0 1:1\n\n1 2:1\n0 3:1\n1 4:1\n").unwrap();

        let spec = ShardSpec::new(0, NonZeroUsize::new(2).unwrap()); // rows 0..3
        let mut iter = LibSvmIter::open(&path, spec, NonZeroUsize::new(2).unwrap()).unwrap();
        assert_eq!(iter.range(), 0..3);

        let mut indices = Vec::new();
        while iter.advance().unwrap() {
            indices.extend(iter.current_batch().rows().map(|r| r.index[0]));
        }
        assert_eq!(indices, [0, 1, 2]);

        let spec = ShardSpec::new(1, NonZeroUsize::new(2).unwrap()); // rows 3..5
        let mut iter = LibSvmIter::open(&path, spec, NonZeroUsize::new(2).unwrap()).unwrap();
        assert!(iter.advance().unwrap());
        let indices: Vec<_> = iter.current_batch().rows().map(|r| r.index[0]).collect();
        assert_eq!(indices, [3, 4]);
        assert!(!iter.advance().unwrap());

        iter.reset().unwrap();
        assert!(iter.advance().unwrap());
        assert_eq!(iter.current_batch().len(), 2);

        fs::remove_file(path).unwrap();
    }
}
