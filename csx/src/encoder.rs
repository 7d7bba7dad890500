//! Delta run-length encoding manager.
//!
//! Drives the statistics → scoring → greedy-encoding loop over one
//! partition: transform to a candidate order, tally candidate patterns,
//! pick the winner by heuristic score, replace its runs with pattern
//! elements, repeat until no candidate scores positive. An explicit
//! encoding sequence replaces the search with a fixed pass list.

use std::collections::BTreeSet;

use itertools::Itertools;
use log::{debug, info};

use crate::element::{Element, IN_PATTERN, PATTERN_START};
use crate::encodings::{EncodingSequence, EncodingType, Heuristic, Instantiation, SamplingMethod};
use crate::error::{Result, SparseError};
use crate::partition::SparsePartition;
use crate::runtime::config::RuntimeConfig;
use crate::stats::{delta_encode, max_delta, rle_encode, StatsCollection, StatsData};

/// Window splitting policy for sampling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SplitAlg {
    /// Each window covers the same number of rows.
    ByRows,
    /// Each window covers roughly the same number of nonzeros.
    ByNnz,
}

pub struct EncodingManager<'a> {
    spm: &'a mut SparsePartition,
    min_limit: usize,
    max_limit: usize,
    min_perc: f64,
    sampling_enabled: bool,
    minimize_cost: bool,
    sort_window_size: usize,
    sampling_portion: f64,
    samples_max: usize,
    split_blocks: bool,
    onedim_blocks: bool,
    /// With absolute column indices a pattern cannot absorb the
    /// preceding singleton, so run extension is disabled.
    full_colind: bool,
    split_type: SplitAlg,
    sort_splits: Vec<usize>,
    sort_splits_nzeros: Vec<usize>,
    selected_splits: Vec<usize>,
    /// Cumulative statistics of the types already encoded, for the
    /// min-cost score.
    encoded_stats: StatsCollection,
    /// Instantiations that survived the filters and may be encoded.
    encoded_inst: BTreeSet<Instantiation>,
    xforms_ignore: [bool; crate::encodings::NR_TYPES],
}

impl<'a> EncodingManager<'a> {
    pub fn new(spm: &'a mut SparsePartition, config: &RuntimeConfig) -> Result<EncodingManager<'a>> {
        let mut mgr = EncodingManager {
            spm,
            min_limit: config.min_unit_size,
            max_limit: config.max_unit_size,
            min_perc: config.min_coverage,
            sampling_enabled: config.sampling != SamplingMethod::None,
            minimize_cost: config.heuristic == Heuristic::MinCost,
            sort_window_size: config.window_size,
            sampling_portion: config.sampling_portion,
            samples_max: config.nr_samples,
            split_blocks: config.split_blocks,
            onedim_blocks: config.one_dim_blocks,
            full_colind: config.full_colind,
            split_type: if config.sampling == SamplingMethod::FixedWindow {
                SplitAlg::ByRows
            } else {
                SplitAlg::ByNnz
            },
            sort_splits: Vec::new(),
            sort_splits_nzeros: Vec::new(),
            selected_splits: Vec::new(),
            encoded_stats: StatsCollection::new(),
            encoded_inst: BTreeSet::new(),
            xforms_ignore: [true; crate::encodings::NR_TYPES],
        };

        // The iterative search only considers the configured types.
        for (ty, _) in config.parsed_xform()?.iter() {
            mgr.remove_ignore(ty);
        }

        if mgr.sampling_enabled {
            if config.sampling == SamplingMethod::FixedPortion {
                mgr.sort_window_size = ((mgr.sampling_portion
                    * mgr.spm.nr_nonzeros() as f64)
                    / mgr.samples_max as f64) as usize;
                if mgr.sort_window_size == 0 {
                    mgr.sort_window_size = 1;
                }
            } else if mgr.sort_window_size > mgr.spm.rowptr_len() - 1 {
                return Err(SparseError::ConfigInvalid(format!(
                    "window size {} exceeds partition rows {}",
                    mgr.sort_window_size,
                    mgr.spm.rowptr_len() - 1
                )));
            }

            mgr.compute_sort_splits();
            let nr_windows = mgr.sort_splits.len().saturating_sub(1);
            if mgr.samples_max > nr_windows {
                mgr.samples_max = nr_windows;
            }
            mgr.select_splits();
        }

        Ok(mgr)
    }

    fn add_ignore(&mut self, ty: EncodingType) {
        self.xforms_ignore[ty.index()] = true;
    }

    fn remove_ignore(&mut self, ty: EncodingType) {
        if !self.onedim_blocks
            && (ty == EncodingType::BlockRow1 || ty == EncodingType::BlockCol1)
        {
            return;
        }
        self.xforms_ignore[ty.index()] = false;
    }

    fn is_ignored(&self, ty: EncodingType) -> bool {
        self.xforms_ignore[ty.index()]
    }

    /// Runs the full iterative encoding loop on the owned partition.
    pub fn encode_all(&mut self) {
        if self.spm.nr_nonzeros() == 0 {
            return;
        }

        self.encoded_stats.clear();
        let mut enc_seq: Vec<EncodingType> = Vec::new();
        loop {
            let type_stats = self.gen_all_stats();
            let ty = self.choose_type(&type_stats);
            if ty == EncodingType::None {
                break;
            }

            info!(
                "partition @{}: encoding to {}",
                self.spm.row_start(),
                ty.name()
            );
            for (inst, data) in type_stats.iter() {
                if inst.ty == ty {
                    self.encoded_stats.append(inst, data);
                }
            }

            self.encode(ty);
            enc_seq.push(ty);
        }

        self.spm.transform(EncodingType::Horizontal);
        info!(
            "partition @{}: encoding sequence: {}",
            self.spm.row_start(),
            if enc_seq.is_empty() {
                "none".to_string()
            } else {
                enc_seq.iter().map(|t| t.name()).join(", ")
            }
        );
    }

    /// Encodes exactly the instantiations of an explicit sequence, in
    /// order.
    pub fn encode_serial(&mut self, seq: &EncodingSequence) {
        if self.spm.nr_nonzeros() == 0 {
            return;
        }

        self.xforms_ignore = [true; crate::encodings::NR_TYPES];
        for (ty, deltas) in seq.iter() {
            self.remove_ignore(ty);
            for &delta in deltas {
                self.encoded_inst.insert(Instantiation::new(ty, delta));
            }
            self.encode(ty);
            self.add_ignore(ty);
        }

        self.spm.transform(EncodingType::Horizontal);
    }

    /// One full statistics pass over every non-ignored type.
    fn gen_all_stats(&mut self) -> StatsCollection {
        self.encoded_inst.clear();
        let mut stats = StatsCollection::new();
        let spm_nnz = self.spm.nr_nonzeros();

        if self.sampling_enabled && self.spm.rowptr_len() - 1 > self.samples_max {
            let mut samples_nnz = 0usize;
            self.spm.transform(EncodingType::Horizontal);
            for i in 0..self.samples_max {
                let split = self.selected_splits[i];
                let window_start = self.sort_splits[split];
                let window_size = self.sort_splits[split + 1] - window_start;
                if window_size == 0 {
                    break;
                }

                let mut window = self.spm.window(window_start, window_size);
                if window.nr_nonzeros() != 0 {
                    samples_nnz += self.sort_splits_nzeros[split];
                    for ty in EncodingType::all() {
                        if self.is_ignored(ty) {
                            continue;
                        }
                        window.transform(ty);
                        self.generate_stats(&mut window, &mut stats);
                    }
                }

                window.transform(EncodingType::Horizontal);
                self.spm.put_window(&window);
            }

            // Scale up to full-matrix estimates before any filtering.
            if samples_nnz != 0 {
                stats.scale(spm_nnz as f64 / samples_nnz as f64);
            }
            if self.split_blocks {
                stats.split_blocks(self.max_limit, spm_nnz, self.min_perc);
            }
            stats.filter_coverage(spm_nnz, self.min_perc, &mut self.encoded_inst);
        } else {
            if self.minimize_cost {
                self.generate_delta_stats(&mut stats);
            }

            for ty in EncodingType::all() {
                if self.is_ignored(ty) {
                    continue;
                }

                self.spm.transform(ty);
                self.generate_stats_spm(&mut stats);
                if ty.is_block() && self.split_blocks {
                    stats.split_blocks(self.max_limit, spm_nnz, self.min_perc);
                }
                stats.filter_coverage(spm_nnz, self.min_perc, &mut self.encoded_inst);
                if self.minimize_cost {
                    self.generate_delta_stats(&mut stats);
                }
            }
        }

        stats
    }

    fn generate_stats_spm(&mut self, stats: &mut StatsCollection) {
        // Work on a temporary move of the partition borrow to appease the
        // generic walker below.
        let spm: &mut SparsePartition = self.spm;
        let min_limit = self.min_limit;
        let max_limit = self.max_limit;
        let full_colind = self.full_colind;
        generate_stats_impl(spm, min_limit, max_limit, full_colind, stats);
    }

    fn generate_stats(&self, sp: &mut SparsePartition, stats: &mut StatsCollection) {
        generate_stats_impl(sp, self.min_limit, self.max_limit, self.full_colind, stats);
    }

    /// Tallies the delta units that remain after the current marks, and
    /// clears the marks while walking (resetting the partition for the
    /// next candidate type).
    fn generate_delta_stats(&mut self, stats: &mut StatsCollection) {
        let ty = self.spm.ty();
        let max_limit = self.max_limit;
        let nr_rows = self.spm.rowptr_len() - 1;
        let mut xs: Vec<usize> = Vec::new();

        for i in 0..nr_rows {
            for e in self.spm.row_elems_mut(i) {
                if e.is_pattern() {
                    // Encoded units terminate the surrounding delta run.
                    flush_delta_stats(&mut xs, ty, max_limit, stats);
                    continue;
                }
                if !e.is_marked(IN_PATTERN) {
                    xs.push(e.col());
                } else {
                    e.unmark(IN_PATTERN);
                }

                if e.is_marked(PATTERN_START) {
                    flush_delta_stats(&mut xs, ty, max_limit, stats);
                    e.unmark(PATTERN_START);
                }
            }
            flush_delta_stats(&mut xs, ty, max_limit, stats);
        }
    }

    /// Picks the best-scoring type; zero-score types join the ignore
    /// set.
    fn choose_type(&mut self, stats: &StatsCollection) -> EncodingType {
        let mut ret = EncodingType::None;
        let mut max_score = 0u64;
        for (ty, data) in stats.per_type() {
            let score = self.type_score(ty, data);
            debug!(
                "type {}: nnz {} patterns {} deltas {} -> score {score}",
                ty.name(),
                data.nnz,
                data.npatterns,
                data.ndeltas
            );
            if score == 0 {
                self.add_ignore(ty);
            } else if score > max_score {
                max_score = score;
                ret = ty;
            }
        }
        ret
    }

    fn type_score(&self, ty: EncodingType, sdata: StatsData) -> u64 {
        let nr_encoded = sdata.nnz as u64;
        let nr_patterns = sdata.npatterns as u64;

        if self.minimize_cost {
            let nr_deltas = (self.encoded_stats.global().ndeltas + sdata.ndeltas) as u64;
            let nr_switches = if ty == EncodingType::None {
                nr_patterns
            } else {
                nr_patterns + nr_deltas
            };
            nr_encoded.saturating_sub(nr_patterns + nr_switches)
        } else {
            nr_encoded.saturating_sub(nr_patterns)
        }
    }

    /// Rewrites the partition in `ty` order, replacing every run whose
    /// instantiation made it through the filters with a pattern element.
    fn encode(&mut self, ty: EncodingType) {
        if ty == EncodingType::None {
            return;
        }

        self.spm.transform(ty);
        let nr_rows = self.spm.rowptr_len() - 1;
        let rowptr_hint = self.spm.rowptr_len();
        let mut new_elems: Vec<Element> = Vec::with_capacity(self.spm.elems().len());

        for i in 0..nr_rows {
            let row: Vec<Element> = self.spm.row_elems(i).to_vec();
            self.encode_row(&row, &mut new_elems);
        }

        self.spm.rebuild(new_elems, rowptr_hint);
        self.add_ignore(ty);
    }

    fn encode_row(&self, row: &[Element], newrow: &mut Vec<Element>) {
        let mut xs: Vec<usize> = Vec::new();
        let mut vs: Vec<f64> = Vec::new();
        let row_no = match row.first() {
            Some(e) => e.row(),
            None => return,
        };

        for e in row {
            if !e.is_pattern() {
                xs.push(e.col());
                vs.push(e.value());
                continue;
            }

            if !xs.is_empty() {
                self.do_encode(row_no, &mut xs, &mut vs, newrow);
            }
            newrow.push(e.clone());
        }

        if !xs.is_empty() {
            self.do_encode(row_no, &mut xs, &mut vs, newrow);
        }
    }

    fn do_encode(
        &self,
        row_no: usize,
        xs: &mut Vec<usize>,
        vs: &mut Vec<f64>,
        encoded: &mut Vec<Element>,
    ) {
        let ty = self.spm.ty();
        if ty.is_block() {
            if !self.split_blocks {
                self.do_encode_block(row_no, xs, vs, encoded);
            } else {
                self.do_encode_block_alt(row_no, xs, vs, encoded);
            }
            return;
        }

        let rles = rle_encode(&delta_encode(xs));
        let mut vi = 0usize;
        let mut col = 0usize;

        for rle in rles {
            let mut rle_freq = rle.freq;
            if rle_freq != 1
                && self
                    .encoded_inst
                    .contains(&Instantiation::new(ty, rle.val))
            {
                col += rle.val;
                let mut rle_start = col;
                if col != rle.val && !self.full_colind {
                    // Extend the run over the preceding singleton: its
                    // distance to the run equals the run delta.
                    if !encoded.last().map_or(true, Element::is_pattern) {
                        rle_start -= rle.val;
                        rle_freq += 1;
                        encoded.pop();
                        vi -= 1;
                    }
                }

                while rle_freq >= self.min_limit {
                    let curr_freq = self.max_limit.min(rle_freq);
                    encoded.push(Element::new_pattern(
                        row_no,
                        rle_start,
                        vs[vi..vi + curr_freq].to_vec(),
                        Instantiation::new(ty, rle.val),
                    ));
                    vi += curr_freq;
                    rle_start += rle.val * curr_freq;
                    rle_freq -= curr_freq;
                }

                // Leave the column at the last element of the pattern.
                col = rle_start - rle.val;
            }

            for _ in 0..rle_freq {
                col += rle.val;
                encoded.push(Element::new(row_no, col, vs[vi]));
                vi += 1;
            }
        }

        assert_eq!(vi, vs.len(), "not all elements processed");
        xs.clear();
        vs.clear();
    }

    fn do_encode_block(
        &self,
        row_no: usize,
        xs: &mut Vec<usize>,
        vs: &mut Vec<f64>,
        encoded: &mut Vec<Element>,
    ) {
        let ty = self.spm.ty();
        let align = ty.block_alignment();
        assert!(align > 0, "not a block type");

        let rles = rle_encode(&delta_encode(xs));
        let mut vi = 0usize;
        let mut col = 0usize;

        for rle in rles {
            col += rle.val;
            let (skip_front, mut nr_elem) = if col == 1 {
                (0, rle.freq)
            } else {
                let mut sf = (col - 2) % align;
                if sf != 0 {
                    sf = align - sf;
                }
                (sf, rle.freq + 1)
            };

            nr_elem = nr_elem.saturating_sub(skip_front);
            let skip_back = nr_elem % align;
            nr_elem = nr_elem.saturating_sub(skip_back);
            let mut skip_back = skip_back;

            if rle.val == 1
                && self
                    .encoded_inst
                    .contains(&Instantiation::new(ty, nr_elem / align))
                && nr_elem >= 2 * align
            {
                let mut rle_start = if col != 1 {
                    encoded.pop();
                    vi -= 1;
                    col - 1
                } else {
                    col
                };

                for _ in 0..skip_front {
                    encoded.push(Element::new(row_no, rle_start, vs[vi]));
                    rle_start += 1;
                    vi += 1;
                }

                // Align the unit bound to whole block columns.
                let max_limit = self.max_limit / align * align;
                let mut nr_blocks = nr_elem / max_limit;
                let nr_elem_block = max_limit.min(nr_elem);
                if nr_blocks == 0 {
                    nr_blocks = 1;
                } else {
                    skip_back += nr_elem - nr_elem_block * nr_blocks;
                }

                for i in 0..nr_blocks {
                    encoded.push(Element::new_pattern(
                        row_no,
                        rle_start + i * nr_elem_block,
                        block_body(ty, align, &vs[vi..vi + nr_elem_block]),
                        Instantiation::new(ty, nr_elem_block / align),
                    ));
                    vi += nr_elem_block;
                }

                for i in 0..skip_back {
                    encoded.push(Element::new(
                        row_no,
                        rle_start + nr_elem_block * nr_blocks + i,
                        vs[vi],
                    ));
                    vi += 1;
                }
            } else {
                for i in 0..rle.freq {
                    encoded.push(Element::new(row_no, col + i * rle.val, vs[vi]));
                    vi += 1;
                }
            }

            col += rle.val * (rle.freq - 1);
        }

        assert_eq!(vi, vs.len(), "not all elements processed");
        xs.clear();
        vs.clear();
    }

    fn do_encode_block_alt(
        &self,
        row_no: usize,
        xs: &mut Vec<usize>,
        vs: &mut Vec<f64>,
        encoded: &mut Vec<Element>,
    ) {
        let ty = self.spm.ty();
        let align = ty.block_alignment();
        assert!(align > 0, "not a block type");

        let rles = rle_encode(&delta_encode(xs));
        let mut vi = 0usize;
        let mut col = 0usize;

        for rle in rles {
            col += rle.val;
            let (skip_front, mut nr_elem) = if col == 1 {
                (0, rle.freq)
            } else {
                let mut sf = (col - 2) % align;
                if sf != 0 {
                    sf = align - sf;
                }
                (sf, rle.freq + 1)
            };

            nr_elem = nr_elem.saturating_sub(skip_front);
            let mut skip_back = nr_elem % align;
            nr_elem -= skip_back;

            if rle.val == 1 && nr_elem >= 2 * align {
                let mut rle_start = if col != 1 {
                    encoded.pop();
                    vi -= 1;
                    col - 1
                } else {
                    col
                };

                for _ in 0..skip_front {
                    encoded.push(Element::new(row_no, rle_start, vs[vi]));
                    rle_start += 1;
                    vi += 1;
                }

                // Chain blocks of the chosen widths, largest first.
                let mut other_dim = nr_elem / align;
                for inst in self.encoded_inst.iter().rev() {
                    if inst.ty != ty {
                        continue;
                    }
                    while other_dim >= inst.delta {
                        let nr_elem_block = align * inst.delta;
                        encoded.push(Element::new_pattern(
                            row_no,
                            rle_start,
                            block_body(ty, align, &vs[vi..vi + nr_elem_block]),
                            Instantiation::new(ty, inst.delta),
                        ));
                        rle_start += nr_elem_block;
                        vi += nr_elem_block;
                        nr_elem -= nr_elem_block;
                        other_dim -= inst.delta;
                    }
                }

                skip_back += nr_elem;
                for _ in 0..skip_back {
                    encoded.push(Element::new(row_no, rle_start, vs[vi]));
                    rle_start += 1;
                    vi += 1;
                }
            } else {
                for i in 0..rle.freq {
                    encoded.push(Element::new(row_no, col + i * rle.val, vs[vi]));
                    vi += 1;
                }
            }

            col += rle.val * (rle.freq - 1);
        }

        assert_eq!(vi, vs.len(), "not all elements processed");
        xs.clear();
        vs.clear();
    }

    /// Computes window boundaries for the configured split policy.
    fn compute_sort_splits(&mut self) {
        match self.split_type {
            SplitAlg::ByRows => self.compute_sort_splits_by_rows(),
            SplitAlg::ByNnz => self.compute_sort_splits_by_nnz(),
        }
    }

    fn compute_sort_splits_by_rows(&mut self) {
        let nr_rows = self.spm.rowptr_len() - 1;
        let step = self.sort_window_size.max(1);
        self.sort_splits.push(0);
        let mut i = 0;
        while i < nr_rows {
            let next = (i + step).min(nr_rows);
            self.sort_splits.push(next);
            self.sort_splits_nzeros.push(
                (i..next).map(|r| self.spm.row_elems(r).len()).sum(),
            );
            i = next;
        }
    }

    fn compute_sort_splits_by_nnz(&mut self) {
        let nr_rows = self.spm.rowptr_len() - 1;
        let target = self.sort_window_size.max(1);

        self.sort_splits.push(0);
        let mut window_nnz = 0usize;
        for i in 0..nr_rows {
            let row_nnz = self.spm.row_elems(i).len();
            window_nnz += row_nnz;
            if window_nnz >= target {
                // Round to the closer full row in nonzeros.
                let overshoot = window_nnz - target;
                let undershoot = target - (window_nnz - row_nnz);
                if overshoot <= undershoot || window_nnz == row_nnz {
                    self.sort_splits.push(i + 1);
                    self.sort_splits_nzeros.push(window_nnz);
                    window_nnz = 0;
                } else {
                    self.sort_splits.push(i);
                    self.sort_splits_nzeros.push(window_nnz - row_nnz);
                    window_nnz = row_nnz;
                }
            }
        }

        if window_nnz > 0 || self.sort_splits.len() == 1 {
            self.sort_splits.push(nr_rows);
            self.sort_splits_nzeros.push(window_nnz);
        } else if *self.sort_splits.last().unwrap() != nr_rows {
            let last = *self.sort_splits.last().unwrap();
            let tail: usize = (last..nr_rows).map(|r| self.spm.row_elems(r).len()).sum();
            self.sort_splits.push(nr_rows);
            self.sort_splits_nzeros.push(tail);
        }
    }

    /// Deterministic stride-spread sample of the windows: the first half
    /// densely when samples are plentiful, the rest evenly strided.
    fn select_splits(&mut self) {
        let mut nr_splits = self.sort_splits.len().saturating_sub(1);
        let mut nr_samples = self.samples_max;
        self.selected_splits = Vec::with_capacity(nr_samples);

        if nr_samples == nr_splits {
            self.selected_splits.extend(0..nr_splits);
            return;
        }

        let mut base = 0;
        if nr_samples > nr_splits / 2 {
            self.selected_splits.extend(0..nr_splits / 2);
            nr_samples -= nr_splits / 2;
            base = nr_splits / 2;
            nr_splits -= nr_splits / 2;
        }

        let skip = nr_splits / (nr_samples + 1);
        for i in 0..nr_samples {
            self.selected_splits.push(base + (i + 1) * skip);
        }
    }
}

/// Reorders a block's values from iteration order into body order.
///
/// Scanning a block-row band walks the block column by column; the unit
/// body is stored row-major, so the values are transposed here. Block
/// columns are the mirror image: scanned row by row, stored
/// column-major.
fn block_body(ty: EncodingType, align: usize, vals: &[f64]) -> Vec<f64> {
    let other_dim = vals.len() / align;
    let mut body = vec![0.0; vals.len()];
    if ty.is_block_row() {
        let (r, c) = (align, other_dim);
        for j in 0..c {
            for i in 0..r {
                body[i * c + j] = vals[j * r + i];
            }
        }
    } else {
        let (r, c) = (other_dim, align);
        for i in 0..r {
            for j in 0..c {
                body[j * r + i] = vals[i * c + j];
            }
        }
    }
    body
}

fn flush_delta_stats(
    xs: &mut Vec<usize>,
    ty: EncodingType,
    max_limit: usize,
    stats: &mut StatsCollection,
) {
    if xs.is_empty() {
        return;
    }

    let index_size = core::mem::size_of::<u64>();
    let delta_size = csx_util::delta_size_bytes(max_delta(xs) as u64);
    let npatt = csx_util::iceil(xs.len(), max_limit);
    let nnz = (index_size - delta_size) * xs.len() / index_size;
    if ty == EncodingType::None {
        stats.append(
            Instantiation::new(EncodingType::None, 0),
            StatsData::with_deltas(nnz, npatt, npatt),
        );
    } else {
        stats.append(
            Instantiation::new(ty, 0),
            StatsData::with_deltas(0, 0, npatt),
        );
    }
    xs.clear();
}

/// Scans one partition in its current order and tallies candidate
/// patterns, marking claimed elements so no element is counted twice.
fn generate_stats_impl(
    sp: &mut SparsePartition,
    min_limit: usize,
    max_limit: usize,
    full_colind: bool,
    stats: &mut StatsCollection,
) {
    let nr_rows = sp.rowptr_len() - 1;
    let mut xs: Vec<usize> = Vec::new();
    let mut idxs: Vec<usize> = Vec::new();

    for i in 0..nr_rows {
        let row_len = sp.row_elems(i).len();
        for j in 0..row_len {
            let (col, boundary) = {
                let e = &sp.row_elems(i)[j];
                // Both elements already claimed by a candidate this round
                // and units encoded in earlier passes bound a run.
                (e.col(), e.is_pattern() || e.is_marked(IN_PATTERN))
            };
            if !boundary {
                xs.push(col);
                idxs.push(j);
                continue;
            }
            update_stats(sp, i, &mut xs, &mut idxs, min_limit, max_limit, full_colind, stats);
        }
        update_stats(sp, i, &mut xs, &mut idxs, min_limit, max_limit, full_colind, stats);
    }
}

#[allow(clippy::too_many_arguments)]
fn update_stats(
    sp: &mut SparsePartition,
    row: usize,
    xs: &mut Vec<usize>,
    idxs: &mut Vec<usize>,
    min_limit: usize,
    max_limit: usize,
    full_colind: bool,
    stats: &mut StatsCollection,
) {
    let ty = sp.ty();
    let align = ty.block_alignment();
    if align > 0 {
        update_stats_block(sp, row, xs, idxs, align, stats);
        return;
    }

    debug_assert_eq!(xs.len(), idxs.len());
    if xs.is_empty() {
        return;
    }

    let rles = rle_encode(&delta_encode(xs));
    let mut col = 0usize;
    let mut last_rle_patt = false;
    let mut base = 0usize;

    for rle in rles {
        // Without absolute column indices a run can absorb the singleton
        // right before it, lowering the bar by one.
        let absorb = !full_colind && col != 0 && !last_rle_patt;
        let real_limit = if absorb { min_limit - 1 } else { min_limit };

        if rle.freq > 1 && rle.freq >= real_limit {
            let real_nnz = if absorb { rle.freq + 1 } else { rle.freq };
            let mut rem_nnz = real_nnz % max_limit;
            let mut patt_nnz = real_nnz;
            let mut patt_npatterns = real_nnz / max_limit + (rem_nnz != 0) as usize;
            if rem_nnz != 0 && rem_nnz < min_limit {
                // The remainder unit is too short to stand as a pattern.
                patt_npatterns -= 1;
                patt_nnz -= rem_nnz;
            } else {
                rem_nnz = 0;
            }

            stats.append(
                Instantiation::new(ty, rle.val),
                StatsData::new(patt_nnz, patt_npatterns),
            );

            let start = if absorb { base - 1 } else { base };
            let row_elems = sp.row_elems_mut(row);
            row_elems[idxs[start]].mark(PATTERN_START);
            for k in 0..real_nnz - rem_nnz {
                row_elems[idxs[start + k]].mark(IN_PATTERN);
            }
            last_rle_patt = true;
        } else {
            last_rle_patt = false;
        }

        base += rle.freq;
        col += rle.val;
    }

    xs.clear();
    idxs.clear();
}

fn update_stats_block(
    sp: &mut SparsePartition,
    row: usize,
    xs: &mut Vec<usize>,
    idxs: &mut Vec<usize>,
    align: usize,
    stats: &mut StatsCollection,
) {
    debug_assert!(align > 0, "not a block type");
    debug_assert_eq!(xs.len(), idxs.len());
    if xs.is_empty() {
        return;
    }

    let ty = sp.ty();
    let rles = rle_encode(&delta_encode(xs));
    let mut unit_start = 0usize;
    let mut base = 0usize;

    for rle in rles {
        unit_start += rle.val;
        if rle.val == 1 {
            // The run start is 1-based; alignment math below is 0-based.
            let (skip_front, mut nr_elem, absorb) = if unit_start == 1 {
                (0usize, rle.freq, false)
            } else {
                let mut sf = (unit_start - 2) % align;
                if sf != 0 {
                    sf = align - sf;
                }
                (sf, rle.freq + 1, true)
            };

            nr_elem = nr_elem.saturating_sub(skip_front);
            let other_dim = nr_elem / align;

            if other_dim >= 2 {
                let patt_nnz = other_dim * align;
                stats.append(
                    Instantiation::new(ty, other_dim),
                    StatsData::new(patt_nnz, 1),
                );

                let start = if absorb { base - 1 } else { base } + skip_front;
                let row_elems = sp.row_elems_mut(row);
                row_elems[idxs[start]].mark(PATTERN_START);
                for k in 0..patt_nnz {
                    row_elems[idxs[start + k]].mark(IN_PATTERN);
                }
            }
        }

        base += rle.freq;
        unit_start += rle.val * (rle.freq - 1);
    }

    xs.clear();
    idxs.clear();
}
