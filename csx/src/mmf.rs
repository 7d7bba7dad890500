//! Matrix-market (MMF) coordinate file reader.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use log::info;

use crate::error::{Result, SparseError};

/// A matrix loaded from a matrix-market file, kept in sorted coordinate
/// form.
#[derive(Debug, Clone)]
pub struct MmfMatrix {
    pub nrows: usize,
    pub ncols: usize,
    /// 1-based, row-major sorted. For symmetric files only the stored
    /// (lower) triangle.
    entries: Vec<(usize, usize, f64)>,
    pub symmetric: bool,
}

impl MmfMatrix {
    pub fn read<P: AsRef<Path>>(path: P) -> Result<MmfMatrix> {
        let path = path.as_ref();
        let file = File::open(path)?;
        let mut lines = BufReader::new(file).lines();

        let header = lines
            .next()
            .ok_or_else(|| SparseError::InputMatrix("empty file".to_string()))??;
        let symmetric = parse_header(&header)?;

        let mut size_line = None;
        for line in lines.by_ref() {
            let line = line?;
            let trimmed = line.trim();
            if trimmed.is_empty() || trimmed.starts_with('%') {
                continue;
            }
            size_line = Some(line);
            break;
        }
        let size_line =
            size_line.ok_or_else(|| SparseError::InputMatrix("missing size line".to_string()))?;
        let mut it = size_line.split_whitespace();
        let nrows: usize = parse_field(it.next(), "rows")?;
        let ncols: usize = parse_field(it.next(), "columns")?;
        let nnz: usize = parse_field(it.next(), "nonzeros")?;
        if nrows == 0 || ncols == 0 {
            return Err(SparseError::InputMatrix("zero matrix dimension".to_string()));
        }

        let mut entries = Vec::with_capacity(nnz);
        for line in lines {
            let line = line?;
            let trimmed = line.trim();
            if trimmed.is_empty() || trimmed.starts_with('%') {
                continue;
            }
            let mut it = trimmed.split_whitespace();
            let row: usize = parse_field(it.next(), "entry row")?;
            let col: usize = parse_field(it.next(), "entry column")?;
            let val: f64 = parse_field(it.next(), "entry value")?;
            if row == 0 || row > nrows || col == 0 || col > ncols {
                return Err(SparseError::InputMatrix(format!(
                    "entry ({row}, {col}) out of bounds"
                )));
            }
            if symmetric && col > row {
                return Err(SparseError::InputMatrix(format!(
                    "symmetric file stores upper-triangle entry ({row}, {col})"
                )));
            }
            entries.push((row, col, val));
        }

        if entries.len() != nnz {
            return Err(SparseError::InputMatrix(format!(
                "header promises {nnz} entries, file holds {}",
                entries.len()
            )));
        }

        entries.sort_by_key(|&(r, c, _)| (r, c));
        info!(
            "loaded {}: {nrows}x{ncols}, {nnz} stored entries{}",
            path.display(),
            if symmetric { " (symmetric)" } else { "" }
        );
        Ok(MmfMatrix {
            nrows,
            ncols,
            entries,
            symmetric,
        })
    }

    /// Total nonzeros of the represented matrix (mirrored entries
    /// counted for symmetric files).
    pub fn nnz(&self) -> usize {
        if self.symmetric {
            let diag = self.entries.iter().filter(|&&(r, c, _)| r == c).count();
            2 * (self.entries.len() - diag) + diag
        } else {
            self.entries.len()
        }
    }

    /// The stored entries. For a symmetric file this is the lower
    /// triangle plus diagonal.
    pub fn stored_points(&self) -> &[(usize, usize, f64)] {
        &self.entries
    }

    /// All entries of the represented matrix, mirroring the off-diagonal
    /// entries of a symmetric file.
    pub fn full_points(&self) -> Vec<(usize, usize, f64)> {
        if !self.symmetric {
            return self.entries.clone();
        }
        let mut points = Vec::with_capacity(self.nnz());
        points.extend_from_slice(&self.entries);
        for &(r, c, v) in &self.entries {
            if r != c {
                points.push((c, r, v));
            }
        }
        points.sort_by_key(|&(r, c, _)| (r, c));
        points
    }
}

fn parse_header(header: &str) -> Result<bool> {
    let fields: Vec<&str> = header.split_whitespace().collect();
    if fields.len() < 5
        || fields[0] != "%%MatrixMarket"
        || fields[1] != "matrix"
        || fields[2] != "coordinate"
    {
        return Err(SparseError::InputMatrix(format!(
            "malformed matrix-market header: {header}"
        )));
    }
    if fields[3] != "real" && fields[3] != "integer" {
        return Err(SparseError::InputMatrix(format!(
            "unsupported value type: {}",
            fields[3]
        )));
    }
    match fields[4] {
        "general" => Ok(false),
        "symmetric" => Ok(true),
        other => Err(SparseError::InputMatrix(format!(
            "unsupported symmetry: {other}"
        ))),
    }
}

fn parse_field<T: std::str::FromStr>(field: Option<&str>, what: &str) -> Result<T> {
    field
        .ok_or_else(|| SparseError::InputMatrix(format!("missing {what}")))?
        .parse()
        .map_err(|_| SparseError::InputMatrix(format!("unparseable {what}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_tmp(content: &str) -> tempfile::NamedTempFile {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(content.as_bytes()).unwrap();
        f
    }

    #[test]
    fn test_read_general() {
        let f = write_tmp(
            "%%MatrixMarket matrix coordinate real general\n\
             % a comment\n\
             3 3 4\n\
             1 1 1.0\n\
             3 2 4.0\n\
             1 3 2.0\n\
             2 2 3.0\n",
        );
        let mmf = MmfMatrix::read(f.path()).unwrap();
        assert_eq!((mmf.nrows, mmf.ncols, mmf.nnz()), (3, 3, 4));
        assert!(!mmf.symmetric);
        // Entries come back sorted row-major.
        assert_eq!(
            mmf.stored_points(),
            &[(1, 1, 1.0), (1, 3, 2.0), (2, 2, 3.0), (3, 2, 4.0)]
        );
    }

    #[test]
    fn test_read_symmetric_expands() {
        let f = write_tmp(
            "%%MatrixMarket matrix coordinate real symmetric\n\
             3 3 4\n\
             1 1 1.0\n\
             2 1 5.0\n\
             2 2 2.0\n\
             3 3 3.0\n",
        );
        let mmf = MmfMatrix::read(f.path()).unwrap();
        assert!(mmf.symmetric);
        assert_eq!(mmf.nnz(), 5);
        let full = mmf.full_points();
        assert!(full.contains(&(1, 2, 5.0)));
        assert!(full.contains(&(2, 1, 5.0)));
    }

    #[test]
    fn test_bad_headers() {
        for content in [
            "%%MatrixMarket matrix array real general\n1 1 1\n",
            "%%MatrixMarket matrix coordinate complex general\n1 1 1\n",
            "not a header\n",
            "",
        ] {
            let f = write_tmp(content);
            assert!(MmfMatrix::read(f.path()).is_err(), "content: {content:?}");
        }
    }

    #[test]
    fn test_entry_count_mismatch() {
        let f = write_tmp(
            "%%MatrixMarket matrix coordinate real general\n\
             2 2 3\n\
             1 1 1.0\n",
        );
        assert!(MmfMatrix::read(f.path()).is_err());
    }

    #[test]
    fn test_out_of_bounds_entry() {
        let f = write_tmp(
            "%%MatrixMarket matrix coordinate real general\n\
             2 2 1\n\
             3 1 1.0\n",
        );
        assert!(MmfMatrix::read(f.path()).is_err());
    }
}
