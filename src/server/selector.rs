use crate::payload;
use bytes::Bytes;
use thiserror::Error;

pub const TIER_COUNT: usize = 4;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SelectError {
    #[error("experiment index '{0}' is not a number")]
    NotANumber(String),
    #[error("experiment index {index} is out of range 1..={max}")]
    OutOfRange { index: u64, max: usize },
}

/// The precomputed response bodies, one per tier, each twice the size of the
/// previous one. Never mutated after construction.
#[derive(Debug, Clone)]
pub struct PayloadSet {
    tiers: Vec<Bytes>,
}

impl PayloadSet {
    pub fn generate(base_size: usize) -> Result<Self, anyhow::Error> {
        let mut tiers = Vec::with_capacity(TIER_COUNT);
        for i in 0..TIER_COUNT {
            let size = base_size
                .checked_mul(1 << i)
                .ok_or(anyhow!("Payload base size {} is too large", base_size))?;
            tiers.push(payload::generate(size)?);
        }
        Ok(Self { tiers })
    }

    pub fn sizes(&self) -> Vec<usize> {
        self.tiers.iter().map(Bytes::len).collect()
    }

    /// Looks up a tier by its 1-based index.
    pub fn get(&self, index: u64) -> Result<&Bytes, SelectError> {
        let out_of_range = || SelectError::OutOfRange {
            index,
            max: self.tiers.len(),
        };
        let slot = usize::try_from(index)
            .ok()
            .and_then(|i| i.checked_sub(1))
            .ok_or_else(out_of_range)?;
        self.tiers.get(slot).ok_or_else(out_of_range)
    }

    /// Maps a request path such as `/2` to its payload.
    pub fn select(&self, path: &str) -> Result<&Bytes, SelectError> {
        let param = path.strip_prefix('/').unwrap_or(path);
        let index: u64 = param
            .parse()
            .map_err(|_| SelectError::NotANumber(param.to_string()))?;
        self.get(index)
    }
}
