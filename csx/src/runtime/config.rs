//! Runtime configuration: typed fields plus the string-mnemonic option
//! surface and the environment loader.

use log::error;

use crate::encodings::{EncodingSequence, Heuristic, SamplingMethod};
use crate::error::{Result, SparseError};

/// All tunables of the preprocessing and execution pipeline.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    /// Size of the worker set (workers + calling thread).
    pub nr_threads: usize,
    /// One CPU id per thread; threads are pinned to these.
    pub cpu_affinity: Vec<usize>,
    pub heuristic: Heuristic,
    /// Encoding search restriction, `spx.preproc.xform` syntax.
    pub xform: String,
    pub sampling: SamplingMethod,
    pub nr_samples: usize,
    pub sampling_portion: f64,
    /// Window size in rows (window sampling mode).
    pub window_size: usize,
    /// Encode the lower triangle plus diagonal of a symmetric matrix.
    pub symmetric: bool,
    /// Enable the oversize-block split post-filter.
    pub split_blocks: bool,
    /// Consider BlockRow1/BlockCol1 candidates.
    pub one_dim_blocks: bool,
    /// Write absolute fixed-width columns in ctl.
    pub full_colind: bool,
    pub min_unit_size: usize,
    pub max_unit_size: usize,
    pub min_coverage: f64,
}

impl Default for RuntimeConfig {
    fn default() -> RuntimeConfig {
        RuntimeConfig {
            nr_threads: 1,
            cpu_affinity: Vec::new(),
            heuristic: Heuristic::MinCost,
            xform: "all".to_string(),
            sampling: SamplingMethod::None,
            nr_samples: 10,
            sampling_portion: 0.01,
            window_size: 0,
            symmetric: false,
            split_blocks: false,
            one_dim_blocks: false,
            full_colind: cfg!(feature = "numa"),
            min_unit_size: 4,
            max_unit_size: 255,
            min_coverage: 0.1,
        }
    }
}

fn parse<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value.parse().map_err(|_| {
        error!("invalid value \"{value}\" while setting property \"{key}\"");
        SparseError::ConfigInvalid(format!("invalid value \"{value}\" for \"{key}\""))
    })
}

impl RuntimeConfig {
    /// Sets one property by its string mnemonic, e.g.
    /// `spx.preproc.heuristic` = `cost`.
    pub fn set_option(&mut self, key: &str, value: &str) -> Result<()> {
        match key {
            "spx.rt.nr_threads" => {
                self.nr_threads = parse(key, value)?;
                if self.nr_threads == 0 {
                    return Err(SparseError::ConfigInvalid(
                        "nr_threads must be positive".to_string(),
                    ));
                }
            }
            "spx.rt.cpu_affinity" => {
                self.cpu_affinity = value
                    .split(',')
                    .map(|c| parse(key, c.trim()))
                    .collect::<Result<Vec<usize>>>()?;
            }
            "spx.preproc.heuristic" => self.heuristic = Heuristic::from_name(value)?,
            "spx.preproc.xform" => {
                // Parse eagerly so a bad sequence is reported here.
                EncodingSequence::parse(value)?;
                self.xform = value.to_string();
            }
            "spx.preproc.sampling" => self.sampling = SamplingMethod::from_name(value)?,
            "spx.preproc.sampling.nr_samples" => self.nr_samples = parse(key, value)?,
            "spx.preproc.sampling.portion" => self.sampling_portion = parse(key, value)?,
            "spx.preproc.window_size" => self.window_size = parse(key, value)?,
            "spx.matrix.symmetric" => self.symmetric = parse(key, value)?,
            "spx.matrix.split_blocks" => self.split_blocks = parse(key, value)?,
            "spx.matrix.one_dim_blocks" => self.one_dim_blocks = parse(key, value)?,
            "spx.matrix.full_colind" => self.full_colind = parse(key, value)?,
            "spx.matrix.min_unit_size" => self.min_unit_size = parse(key, value)?,
            "spx.matrix.max_unit_size" => self.max_unit_size = parse(key, value)?,
            "spx.matrix.min_coverage" => self.min_coverage = parse(key, value)?,
            other => {
                error!("mnemonic \"{other}\" not found");
                return Err(SparseError::ConfigInvalid(format!(
                    "unknown mnemonic: {other}"
                )));
            }
        }
        self.check()
    }

    /// Loads the `SPX_*` environment variables over the current values.
    pub fn set_from_env(&mut self) -> Result<()> {
        const ENV_MAP: &[(&str, &str)] = &[
            ("SPX_RT_NR_THREADS", "spx.rt.nr_threads"),
            ("SPX_CPU_AFFINITY", "spx.rt.cpu_affinity"),
            ("SPX_XFORM_CONF", "spx.preproc.xform"),
            ("SPX_WINDOW_SIZE", "spx.preproc.window_size"),
            ("SPX_SAMPLES", "spx.preproc.sampling.nr_samples"),
            ("SPX_SAMPLING_PORTION", "spx.preproc.sampling.portion"),
        ];
        for (var, key) in ENV_MAP {
            if let Ok(value) = std::env::var(var) {
                self.set_option(key, &value)?;
            }
        }
        Ok(())
    }

    /// Validates the value domains of spec-level constraints.
    pub fn check(&self) -> Result<()> {
        if self.min_unit_size < 2 {
            return Err(SparseError::ConfigInvalid(
                "min_unit_size must be at least 2".to_string(),
            ));
        }
        if self.max_unit_size > 255 || self.max_unit_size < self.min_unit_size {
            return Err(SparseError::ConfigInvalid(
                "max_unit_size must lie in [min_unit_size, 255]".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.min_coverage) {
            return Err(SparseError::ConfigInvalid(
                "min_coverage must lie in [0, 1]".to_string(),
            ));
        }
        match self.sampling {
            SamplingMethod::None => {}
            SamplingMethod::FixedWindow => {
                if self.nr_samples == 0 {
                    return Err(SparseError::ConfigInvalid(
                        "invalid number of samples".to_string(),
                    ));
                }
                if self.window_size == 0 {
                    return Err(SparseError::ConfigInvalid("invalid window size".to_string()));
                }
            }
            SamplingMethod::FixedPortion => {
                if self.nr_samples == 0 {
                    return Err(SparseError::ConfigInvalid(
                        "invalid number of samples".to_string(),
                    ));
                }
                if self.sampling_portion <= 0.0 || self.sampling_portion > 1.0 {
                    return Err(SparseError::ConfigInvalid(
                        "sampling portion must lie in (0, 1]".to_string(),
                    ));
                }
            }
        }
        Ok(())
    }

    /// The CPU each thread is pinned to. Defaults to the identity
    /// placement when no explicit affinity was configured.
    pub fn affinity(&self) -> Result<Vec<usize>> {
        if self.cpu_affinity.is_empty() {
            return Ok((0..self.nr_threads).collect());
        }
        if self.cpu_affinity.len() != self.nr_threads {
            return Err(SparseError::ConfigInvalid(format!(
                "cpu_affinity lists {} cpus for {} threads",
                self.cpu_affinity.len(),
                self.nr_threads
            )));
        }
        Ok(self.cpu_affinity.clone())
    }

    pub fn parsed_xform(&self) -> Result<EncodingSequence> {
        EncodingSequence::parse(&self.xform)
    }
}
