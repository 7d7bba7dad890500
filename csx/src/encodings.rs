//! Encoding types, instantiations and user-facing encoding sequences.
//!
//! An encoding type fixes the iteration order used when scanning a
//! partition for runs: horizontal, vertical, the two diagonal orders, or
//! one of the block orders with a fixed row/column alignment of 1 to 8.

use crate::error::{Result, SparseError};

/// Number of concrete (non-group) encoding types, `None` included.
pub const NR_TYPES: usize = 21;

/// Multiplier separating the type index from the delta in a pattern id.
///
/// Delta units occupy ids below this offset (their id is the delta width
/// in bits), so a pattern id is globally unique per instantiation.
pub const PATTERN_ID_OFFSET: u64 = 10_000;

/// One iteration order of a sparse partition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum EncodingType {
    None,
    Horizontal,
    Vertical,
    Diagonal,
    AntiDiagonal,
    BlockRow1,
    BlockRow2,
    BlockRow3,
    BlockRow4,
    BlockRow5,
    BlockRow6,
    BlockRow7,
    BlockRow8,
    BlockCol1,
    BlockCol2,
    BlockCol3,
    BlockCol4,
    BlockCol5,
    BlockCol6,
    BlockCol7,
    BlockCol8,
}

impl EncodingType {
    /// All concrete types in search order, `None` excluded.
    pub fn all() -> impl Iterator<Item = EncodingType> {
        (1..NR_TYPES).map(EncodingType::from_index)
    }

    pub fn from_index(idx: usize) -> EncodingType {
        use EncodingType::*;
        match idx {
            0 => EncodingType::None,
            1 => Horizontal,
            2 => Vertical,
            3 => Diagonal,
            4 => AntiDiagonal,
            5 => BlockRow1,
            6 => BlockRow2,
            7 => BlockRow3,
            8 => BlockRow4,
            9 => BlockRow5,
            10 => BlockRow6,
            11 => BlockRow7,
            12 => BlockRow8,
            13 => BlockCol1,
            14 => BlockCol2,
            15 => BlockCol3,
            16 => BlockCol4,
            17 => BlockCol5,
            18 => BlockCol6,
            19 => BlockCol7,
            20 => BlockCol8,
            _ => panic!("encoding type index out of range: {idx}"),
        }
    }

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn is_block_row(self) -> bool {
        (EncodingType::BlockRow1..=EncodingType::BlockRow8).contains(&self)
    }

    pub fn is_block_col(self) -> bool {
        (EncodingType::BlockCol1..=EncodingType::BlockCol8).contains(&self)
    }

    pub fn is_block(self) -> bool {
        self.is_block_row() || self.is_block_col()
    }

    /// Row alignment for block-row types, column alignment for block-col
    /// types, 0 for every other type.
    pub fn block_alignment(self) -> usize {
        if self.is_block_row() {
            self.index() - EncodingType::BlockRow1.index() + 1
        } else if self.is_block_col() {
            self.index() - EncodingType::BlockCol1.index() + 1
        } else {
            0
        }
    }

    pub fn name(self) -> &'static str {
        use EncodingType::*;
        match self {
            EncodingType::None => "none",
            Horizontal => "hor",
            Vertical => "ver",
            Diagonal => "diag",
            AntiDiagonal => "rdiag",
            BlockRow1 => "br1",
            BlockRow2 => "br2",
            BlockRow3 => "br3",
            BlockRow4 => "br4",
            BlockRow5 => "br5",
            BlockRow6 => "br6",
            BlockRow7 => "br7",
            BlockRow8 => "br8",
            BlockCol1 => "bc1",
            BlockCol2 => "bc2",
            BlockCol3 => "bc3",
            BlockCol4 => "bc4",
            BlockCol5 => "bc5",
            BlockCol6 => "bc6",
            BlockCol7 => "bc7",
            BlockCol8 => "bc8",
        }
    }

    /// Resolves a type or group name to its member types.
    ///
    /// Group names (`all`, `blockrow`, `blockcol`) expand to every member;
    /// they are accepted only as user input and never stored.
    pub fn from_name(name: &str) -> Result<Vec<EncodingType>> {
        use EncodingType::*;
        let types = match name {
            "all" => EncodingType::all().collect(),
            "blockrow" => (BlockRow1.index()..=BlockRow8.index())
                .map(EncodingType::from_index)
                .collect(),
            "blockcol" => (BlockCol1.index()..=BlockCol8.index())
                .map(EncodingType::from_index)
                .collect(),
            single => vec![EncodingType::from_index(
                (0..NR_TYPES)
                    .find(|&i| EncodingType::from_index(i).name() == single)
                    .ok_or_else(|| {
                        SparseError::ConfigInvalid(format!("unknown encoding type: {single}"))
                    })?,
            )],
        };
        Ok(types)
    }
}

/// A concrete pattern shape: the iteration order it was found in and the
/// run stride (or block width for block types). Delta units are
/// represented as `(None, width_in_bits)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Instantiation {
    pub ty: EncodingType,
    pub delta: usize,
}

impl Instantiation {
    pub const fn new(ty: EncodingType, delta: usize) -> Instantiation {
        Instantiation { ty, delta }
    }

    /// The globally unique numeric id persisted in a partition's id map.
    pub fn pattern_id(&self) -> u64 {
        match self.ty {
            EncodingType::None => self.delta as u64,
            ty => ty.index() as u64 * PATTERN_ID_OFFSET + self.delta as u64,
        }
    }

    /// Inverse of [`Instantiation::pattern_id`].
    pub fn from_pattern_id(id: u64) -> Instantiation {
        if id < PATTERN_ID_OFFSET {
            debug_assert!(matches!(id, 8 | 16 | 32 | 64), "bad delta id: {id}");
            Instantiation::new(EncodingType::None, id as usize)
        } else {
            Instantiation::new(
                EncodingType::from_index((id / PATTERN_ID_OFFSET) as usize),
                (id % PATTERN_ID_OFFSET) as usize,
            )
        }
    }
}

/// Id of the delta instantiation for a fixed byte width.
pub fn delta_pattern_id(delta_bytes: usize) -> u64 {
    (delta_bytes << 3) as u64
}

/// A user-supplied restriction of the encoding search, parsed from the
/// `spx.preproc.xform` option.
///
/// The grammar is a comma list of type or group names, each optionally
/// followed by a braced delta list: `hor{1,2},br2{4}`. If any delta list
/// is present the sequence is *explicit*: the iterative search is skipped
/// and exactly the listed instantiations are encoded, in order.
#[derive(Debug, Clone)]
pub struct EncodingSequence {
    entries: Vec<(EncodingType, Vec<usize>)>,
    explicit: bool,
}

impl EncodingSequence {
    pub fn parse(conf: &str) -> Result<EncodingSequence> {
        let mut entries = Vec::new();
        let mut explicit = false;
        let conf = conf.trim();
        if conf.is_empty() || conf == "none" {
            return Ok(EncodingSequence {
                entries,
                explicit,
            });
        }

        for part in split_top_level(conf) {
            let (name, deltas) = match part.find('{') {
                Some(lb) => {
                    if !part.ends_with('}') {
                        return Err(SparseError::ConfigInvalid(format!(
                            "malformed xform entry: {part}"
                        )));
                    }
                    let deltas = part[lb + 1..part.len() - 1]
                        .split(',')
                        .map(|d| {
                            d.trim().parse::<usize>().map_err(|_| {
                                SparseError::ConfigInvalid(format!("bad delta in: {part}"))
                            })
                        })
                        .collect::<Result<Vec<_>>>()?;
                    explicit = true;
                    (&part[..lb], deltas)
                }
                None => (&part[..], Vec::new()),
            };

            for ty in EncodingType::from_name(name.trim())? {
                entries.push((ty, deltas.clone()));
            }
        }

        Ok(EncodingSequence { entries, explicit })
    }

    pub fn is_explicit(&self) -> bool {
        self.explicit
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (EncodingType, &[usize])> {
        self.entries.iter().map(|(ty, ds)| (*ty, ds.as_slice()))
    }
}

fn split_top_level(s: &str) -> Vec<String> {
    let mut parts = Vec::new();
    let mut depth = 0usize;
    let mut cur = String::new();
    for ch in s.chars() {
        match ch {
            '{' => {
                depth += 1;
                cur.push(ch);
            }
            '}' => {
                depth = depth.saturating_sub(1);
                cur.push(ch);
            }
            ',' if depth == 0 => {
                parts.push(std::mem::take(&mut cur));
            }
            _ => cur.push(ch),
        }
    }
    if !cur.is_empty() {
        parts.push(cur);
    }
    parts
}

/// Window selection policy for statistical sampling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SamplingMethod {
    None,
    FixedWindow,
    FixedPortion,
}

impl SamplingMethod {
    pub fn from_name(name: &str) -> Result<SamplingMethod> {
        match name {
            "none" => Ok(SamplingMethod::None),
            "window" => Ok(SamplingMethod::FixedWindow),
            "portion" => Ok(SamplingMethod::FixedPortion),
            other => Err(SparseError::ConfigInvalid(format!(
                "unknown sampling method: {other}"
            ))),
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            SamplingMethod::None => "none",
            SamplingMethod::FixedWindow => "window",
            SamplingMethod::FixedPortion => "portion",
        }
    }
}

/// Scoring function used to pick the winning type per encoding pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Heuristic {
    /// `nnz_encoded - nr_patterns`: maximize covered nonzeros.
    MaxCoverage,
    /// Additionally charges the per-unit header and the delta-unit
    /// switches the encoding introduces.
    MinCost,
}

impl Heuristic {
    pub fn from_name(name: &str) -> Result<Heuristic> {
        match name {
            "cover" => Ok(Heuristic::MaxCoverage),
            "cost" => Ok(Heuristic::MinCost),
            other => Err(SparseError::ConfigInvalid(format!(
                "unknown heuristic: {other}"
            ))),
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Heuristic::MaxCoverage => "cover",
            Heuristic::MinCost => "cost",
        }
    }
}
