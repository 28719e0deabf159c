//! Key-value configuration files.
//!
//! The format is one `key value…` pair per line; blank lines and `#`
//! comments are skipped. `length` is required and may list several chain
//! lengths (batch mode emits one CSV per length); everything else has a
//! default.

use std::error::Error;
use std::fmt;
use std::fs;
use std::path::Path;

#[derive(Clone, Debug, PartialEq)]
pub struct Config {
    /// Chain lengths to generate, in the order given.
    pub lengths: Vec<usize>,
    /// Uniform range for interface dimensions, inclusive.
    pub size_range: (usize, usize),
    /// Uniform range for elemental DAG edge counts, inclusive.
    pub dag_size_range: (usize, usize),
    /// Machines available to the schedulers; 0 means unbounded.
    pub available_threads: usize,
    /// Per-machine adjoint memory in DAG edges; 0 means unbounded.
    pub available_memory: usize,
    /// Allow matrix-free tangent/adjoint eliminations.
    pub matrix_free: bool,
    /// Wall-clock budget per branch & bound solver, in seconds.
    pub time_to_solve: f64,
    /// Seed for the chain generator.
    pub seed: u64,
    /// Chains to generate per length in batch mode.
    pub amount: usize,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            lengths: Vec::new(),
            size_range: (1, 8),
            dag_size_range: (8, 64),
            available_threads: 0,
            available_memory: 0,
            matrix_free: false,
            time_to_solve: 10.0,
            seed: 0,
            amount: 1,
        }
    }
}

#[derive(Debug)]
pub enum ConfigError {
    Io(std::io::Error),
    /// A line that does not parse: `(line number, explanation)`.
    Malformed(usize, String),
    /// A key this crate does not recognize.
    UnknownKey(usize, String),
    /// `length` was never given.
    MissingLength,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Io(err) => write!(f, "cannot read config: {err}"),
            ConfigError::Malformed(line, msg) => {
                write!(f, "config line {line}: {msg}")
            }
            ConfigError::UnknownKey(line, key) => {
                write!(f, "config line {line}: unknown key `{key}`")
            }
            ConfigError::MissingLength => write!(f, "config is missing the `length` key"),
        }
    }
}

impl Error for ConfigError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            ConfigError::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<std::io::Error> for ConfigError {
    fn from(err: std::io::Error) -> Self {
        ConfigError::Io(err)
    }
}

impl Config {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path)?;
        Self::parse(&text)
    }

    pub fn parse(text: &str) -> Result<Self, ConfigError> {
        let mut config = Config::default();

        for (idx, raw) in text.lines().enumerate() {
            let line_no = idx + 1;
            let line = raw.split('#').next().unwrap_or("").trim();
            if line.is_empty() {
                continue;
            }

            let mut fields = line.split_whitespace();
            let key = fields.next().expect("non-empty line has a first field");
            let values: Vec<&str> = fields.collect();

            match key {
                "length" => {
                    config.lengths = parse_all(line_no, key, &values)?;
                    if config.lengths.is_empty() || config.lengths.iter().any(|&q| q < 2) {
                        return Err(ConfigError::Malformed(
                            line_no,
                            "`length` needs one or more values >= 2".into(),
                        ));
                    }
                }
                "size_range" => config.size_range = parse_range(line_no, key, &values)?,
                "dag_size_range" => config.dag_size_range = parse_range(line_no, key, &values)?,
                "available_threads" => {
                    config.available_threads = parse_one(line_no, key, &values)?
                }
                "available_memory" => config.available_memory = parse_one(line_no, key, &values)?,
                "matrix_free" => {
                    config.matrix_free = match parse_one::<u8>(line_no, key, &values)? {
                        0 => false,
                        1 => true,
                        other => {
                            return Err(ConfigError::Malformed(
                                line_no,
                                format!("`matrix_free` is 0 or 1, got {other}"),
                            ))
                        }
                    }
                }
                "time_to_solve" => config.time_to_solve = parse_one(line_no, key, &values)?,
                "seed" => config.seed = parse_one(line_no, key, &values)?,
                "amount" => {
                    config.amount = parse_one(line_no, key, &values)?;
                    if config.amount == 0 {
                        return Err(ConfigError::Malformed(
                            line_no,
                            "`amount` must be at least 1".into(),
                        ));
                    }
                }
                other => return Err(ConfigError::UnknownKey(line_no, other.to_string())),
            }
        }

        if config.lengths.is_empty() {
            return Err(ConfigError::MissingLength);
        }
        Ok(config)
    }
}

fn parse_all<T: std::str::FromStr>(
    line: usize,
    key: &str,
    values: &[&str],
) -> Result<Vec<T>, ConfigError> {
    values
        .iter()
        .map(|v| {
            v.parse().map_err(|_| {
                ConfigError::Malformed(line, format!("`{key}` has a non-numeric value `{v}`"))
            })
        })
        .collect()
}

fn parse_one<T: std::str::FromStr>(
    line: usize,
    key: &str,
    values: &[&str],
) -> Result<T, ConfigError> {
    if values.len() != 1 {
        return Err(ConfigError::Malformed(
            line,
            format!("`{key}` takes exactly one value"),
        ));
    }
    values[0]
        .parse()
        .map_err(|_| ConfigError::Malformed(line, format!("`{key}` cannot parse `{}`", values[0])))
}

fn parse_range(line: usize, key: &str, values: &[&str]) -> Result<(usize, usize), ConfigError> {
    let parsed: Vec<usize> = parse_all(line, key, values)?;
    match parsed[..] {
        [lo, hi] if lo <= hi && lo > 0 => Ok((lo, hi)),
        [_, _] => Err(ConfigError::Malformed(
            line,
            format!("`{key}` needs 0 < lo <= hi"),
        )),
        _ => Err(ConfigError::Malformed(
            line,
            format!("`{key}` takes exactly two values"),
        )),
    }
}
