use std::collections::VecDeque;
use std::io::BufRead;

use anyhow::Context;

use crate::error::Error;
use crate::NodeId;

/// One job of a coflow trace.
// example: 3	13122	2	1	138,21#38:4.0
#[derive(Debug, Clone, PartialEq)]
pub struct JobRecord {
    pub id: usize,
    /// arrival time in milliseconds
    pub arrival_ms: f64,
    pub num_map: usize,
    pub mappers: Vec<NodeId>,
    pub num_reduce: usize,
    /// (location, input in MB)
    pub reducers: Vec<(NodeId, f64)>,
}

impl JobRecord {
    #[inline]
    pub fn arrival_secs(&self) -> f64 {
        self.arrival_ms / 1000.0
    }

    /// Input of each reducer in bytes.
    pub fn reducer_input_bytes(&self) -> Vec<i64> {
        self.reducers
            .iter()
            .map(|&(_, mb)| (mb * 1_000_000.0).round() as i64)
            .collect()
    }
}

macro_rules! parse_next {
    ($tokens:expr, $ret:ty, $what:expr) => {
        $tokens
            .next()
            .and_then(|f| f.trim().parse::<$ret>().ok())
            .ok_or_else(|| Error::ParseTrace(format!("bad or missing {}", $what)))?
    };
}

impl std::str::FromStr for JobRecord {
    type Err = Error;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let fields: Vec<&str> = s.trim_end_matches(&['\r', '\n'][..]).split('\t').collect();
        if fields.len() != 5 {
            return Err(Error::ParseTrace(format!(
                "expect 5 tab separated fields, found {}",
                fields.len()
            )));
        }

        let mut tokens = fields.iter().copied();
        let id = parse_next!(tokens, usize, "job id");
        let arrival_ms = parse_next!(tokens, f64, "arrival time");
        let num_map = parse_next!(tokens, usize, "number of mappers");
        let num_reduce = parse_next!(tokens, usize, "number of reducers");

        let (map_part, red_part) = fields[4]
            .trim()
            .split_once('#')
            .ok_or_else(|| Error::ParseTrace("missing '#' between mappers and reducers".into()))?;

        let mappers: Vec<NodeId> = map_part
            .split(',')
            .map(|x| x.trim().parse::<NodeId>().ok())
            .collect::<Option<Vec<_>>>()
            .ok_or_else(|| Error::ParseTrace(format!("bad mapper locations: {}", map_part)))?;

        let reducers: Vec<(NodeId, f64)> = red_part
            .split(',')
            .map(|x| {
                x.split_once(':').and_then(|(loc, mb)| {
                    loc.trim()
                        .parse::<NodeId>()
                        .ok()
                        .zip(mb.trim().parse::<f64>().ok())
                })
            })
            .collect::<Option<Vec<_>>>()
            .ok_or_else(|| Error::ParseTrace(format!("bad reducer info: {}", red_part)))?;

        if mappers.len() != num_map {
            return Err(Error::ParseTrace(format!(
                "expect {} mappers, found {}",
                num_map,
                mappers.len()
            )));
        }
        if reducers.len() != num_reduce {
            return Err(Error::ParseTrace(format!(
                "expect {} reducers, found {}",
                num_reduce,
                reducers.len()
            )));
        }
        if reducers.iter().any(|&(_, mb)| !(mb >= 0.0)) {
            return Err(Error::ParseTrace(format!("negative reducer input: {}", red_part)));
        }

        Ok(JobRecord {
            id,
            arrival_ms,
            num_map,
            mappers,
            num_reduce,
            reducers,
        })
    }
}

/// Jobs of a trace in file order.
#[derive(Debug, Clone, Default)]
pub struct JobTrace {
    records: VecDeque<JobRecord>,
}

impl JobTrace {
    pub fn from_path<P: AsRef<std::path::Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let f = std::fs::File::open(path)
            .with_context(|| format!("failed to open trace {}", path.display()))?;
        Self::from_reader(std::io::BufReader::new(f))
    }

    /// Read jobs up to the end of input or the first empty line. Lines starting with `#` are
    /// comments.
    pub fn from_reader<R: BufRead>(reader: R) -> anyhow::Result<Self> {
        let mut records = VecDeque::new();
        for (lineno, line) in reader.lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                break;
            }
            if line.starts_with('#') {
                continue;
            }
            let r: JobRecord = line
                .parse()
                .with_context(|| format!("parse line {} failed: {}", lineno + 1, line))?;
            records.push_back(r);
        }
        Ok(JobTrace { records })
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Take the next jobs that arrive together with the first remaining one.
    pub fn next_batch(&mut self) -> Vec<JobRecord> {
        let first = match self.records.front() {
            Some(r) => r.arrival_ms,
            None => return Vec::new(),
        };
        let mut batch = Vec::new();
        while let Some(r) = self.records.front() {
            if r.arrival_ms > first {
                break;
            }
            batch.extend(self.records.pop_front());
        }
        batch
    }
}
