//! Pattern statistics gathered per iteration order.
//!
//! For every candidate instantiation the collection tallies how many
//! nonzeros it would cover, how many units it would take and how many
//! delta units would remain next to it. The encoding manager turns these
//! tallies into scores; the manipulators below implement the sampling
//! scale-up, the oversize-block split and the coverage filter.

use std::collections::{BTreeMap, BTreeSet};

use crate::encodings::{EncodingType, Instantiation};

/// Tally for one instantiation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsData {
    /// Nonzeros covered by instances of this instantiation.
    pub nnz: usize,
    /// Number of instances (units).
    pub npatterns: usize,
    /// Delta units that would remain interleaved with this encoding.
    pub ndeltas: usize,
}

impl StatsData {
    pub fn new(nnz: usize, npatterns: usize) -> StatsData {
        StatsData {
            nnz,
            npatterns,
            ndeltas: 0,
        }
    }

    pub fn with_deltas(nnz: usize, npatterns: usize, ndeltas: usize) -> StatsData {
        StatsData {
            nnz,
            npatterns,
            ndeltas,
        }
    }

    pub fn update(&mut self, other: StatsData) {
        self.nnz += other.nnz;
        self.npatterns += other.npatterns;
        self.ndeltas += other.ndeltas;
    }
}

/// Per-instantiation tallies of one statistics pass.
#[derive(Debug, Clone, Default)]
pub struct StatsCollection {
    map: BTreeMap<Instantiation, StatsData>,
}

impl StatsCollection {
    pub fn new() -> StatsCollection {
        StatsCollection {
            map: BTreeMap::new(),
        }
    }

    pub fn append(&mut self, inst: Instantiation, data: StatsData) {
        self.map.entry(inst).or_default().update(data);
    }

    /// Folds every entry of `other` into this collection.
    pub fn append_collection(&mut self, other: &StatsCollection) {
        for (&inst, &data) in &other.map {
            self.append(inst, data);
        }
    }

    pub fn clear(&mut self) {
        self.map.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (Instantiation, StatsData)> + '_ {
        self.map.iter().map(|(&i, &d)| (i, d))
    }

    pub fn get(&self, inst: &Instantiation) -> Option<StatsData> {
        self.map.get(inst).copied()
    }

    /// Tallies aggregated over all instantiations.
    pub fn global(&self) -> StatsData {
        let mut ret = StatsData::default();
        for &data in self.map.values() {
            ret.update(data);
        }
        ret
    }

    /// Tallies aggregated per encoding type.
    pub fn per_type(&self) -> BTreeMap<EncodingType, StatsData> {
        let mut ret: BTreeMap<EncodingType, StatsData> = BTreeMap::new();
        for (&inst, &data) in &self.map {
            ret.entry(inst.ty).or_default().update(data);
        }
        ret
    }

    /// Instantiations of `ty`, in delta order.
    pub fn instantiations_of(&self, ty: EncodingType) -> Vec<Instantiation> {
        self.map.keys().filter(|i| i.ty == ty).copied().collect()
    }

    /// Scales every tally by `factor`. Applied to sampled statistics
    /// before any filtering so that the filters see full-matrix
    /// estimates.
    pub fn scale(&mut self, factor: f64) {
        for data in self.map.values_mut() {
            data.nnz = (data.nnz as f64 * factor) as usize;
            data.npatterns = (data.npatterns as f64 * factor) as usize;
            data.ndeltas = (data.ndeltas as f64 * factor) as usize;
        }
    }

    /// Splits oversize block instantiations into chains of the smaller
    /// widths already present with sufficient coverage, largest width
    /// first. A block unit may hold at most `max_limit` values, so for
    /// alignment `a` the width is capped at `max_limit / a`.
    pub fn split_blocks(&mut self, max_limit: usize, total_nnz: usize, min_coverage: f64) {
        let block_types: Vec<EncodingType> = {
            let mut tys: Vec<_> = self.map.keys().map(|i| i.ty).filter(|t| t.is_block()).collect();
            tys.dedup();
            tys
        };

        for ty in block_types {
            let align = ty.block_alignment();
            let max_width = (max_limit / align).max(1);

            let mut split_widths: Vec<usize> = self
                .map
                .iter()
                .filter(|(i, d)| {
                    i.ty == ty
                        && i.delta <= max_width
                        && (d.nnz as f64) >= min_coverage * total_nnz as f64
                })
                .map(|(i, _)| i.delta)
                .collect();
            split_widths.sort_unstable();
            split_widths.reverse();
            if split_widths.is_empty() {
                split_widths.push(max_width);
            }

            let oversize: Vec<Instantiation> = self
                .map
                .keys()
                .filter(|i| i.ty == ty && i.delta > max_width)
                .copied()
                .collect();

            for inst in oversize {
                let data = self.map.remove(&inst).unwrap();
                let mut width = inst.delta;
                for &w in &split_widths {
                    let parts = width / w;
                    if parts > 0 {
                        self.append(
                            Instantiation::new(ty, w),
                            StatsData::new(data.npatterns * parts * align * w, data.npatterns * parts),
                        );
                        width %= w;
                    }
                }
                // Whatever is left of the width falls back to deltas.
            }
        }
    }

    /// Drops every instantiation covering less than `min_coverage` of the
    /// partition's nonzeros; survivors are recorded in `encoded_inst` for
    /// the encoding passes. The delta baseline (`None` type) is never a
    /// pattern and passes through unrecorded.
    pub fn filter_coverage(
        &mut self,
        total_nnz: usize,
        min_coverage: f64,
        encoded_inst: &mut BTreeSet<Instantiation>,
    ) {
        let threshold = min_coverage * total_nnz as f64;
        self.map
            .retain(|inst, data| inst.ty == EncodingType::None || data.nnz as f64 >= threshold);
        for inst in self.map.keys() {
            if inst.ty != EncodingType::None {
                encoded_inst.insert(*inst);
            }
        }
    }
}

/// One run of a run-length encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rle {
    pub freq: usize,
    pub val: usize,
}

/// Replaces each value by its distance from the previous one; the first
/// value is kept as is.
pub fn delta_encode(xs: &[usize]) -> Vec<usize> {
    let mut out = Vec::with_capacity(xs.len());
    let mut prev = match xs.first() {
        Some(&x) => {
            out.push(x);
            x
        }
        None => return out,
    };
    for &x in &xs[1..] {
        out.push(x - prev);
        prev = x;
    }
    out
}

/// Largest distance between successive values.
pub fn max_delta(xs: &[usize]) -> usize {
    let mut max = 0;
    for w in xs.windows(2) {
        max = max.max(w[1] - w[0]);
    }
    max
}

/// Run-length encodes `vals`.
pub fn rle_encode(vals: &[usize]) -> Vec<Rle> {
    let mut out = Vec::new();
    let mut iter = vals.iter();
    let mut cur = match iter.next() {
        Some(&v) => Rle { freq: 1, val: v },
        None => return out,
    };
    for &v in iter {
        if v == cur.val {
            cur.freq += 1;
        } else {
            out.push(cur);
            cur = Rle { freq: 1, val: v };
        }
    }
    out.push(cur);
    out
}
