//! Which shard ids this process runs, out of how many.

use shardline_common::ShardingConfig;
use thiserror::Error;

/// Invalid shard configuration, reported before any connection is made
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AssignmentError {
    #[error("shard ids were given without a shard count")]
    MissingShardCount,

    #[error("a shard count was given without shard ids")]
    MissingShardIds,

    #[error("shard id list is empty")]
    EmptyShardIds,

    #[error("shard count must be at least 1")]
    ZeroShardCount,

    #[error("shard id {0} is not a valid shard id")]
    InvalidShardId(i64),

    #[error("shard id {0} is listed more than once")]
    DuplicateShardId(u32),

    #[error("shard id {id} is out of range for {total} shards")]
    ShardIdOutOfRange { id: u32, total: u32 },

    #[error("{ids} shard ids exceed the shard count of {total}")]
    TooManyShardIds { ids: usize, total: u32 },
}

/// Validated shard ids, sorted ascending, with their total
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShardAssignment {
    ids: Vec<u32>,
    total: Option<u32>,
    use_recommended: bool,
}

impl ShardAssignment {
    /// Validate an explicit assignment
    ///
    /// With `use_recommended` the count comes from gateway metadata later and
    /// `total` is ignored; the ids are checked again once it is known.
    pub fn new(
        ids: Vec<i64>,
        total: Option<u32>,
        use_recommended: bool,
    ) -> Result<Self, AssignmentError> {
        if ids.is_empty() {
            return Err(AssignmentError::EmptyShardIds);
        }
        if total.is_none() && !use_recommended {
            return Err(AssignmentError::MissingShardCount);
        }

        let mut parsed = ids
            .into_iter()
            .map(|id| u32::try_from(id).map_err(|_| AssignmentError::InvalidShardId(id)))
            .collect::<Result<Vec<_>, _>>()?;
        parsed.sort_unstable();
        if let Some(pair) = parsed.windows(2).find(|pair| pair[0] == pair[1]) {
            return Err(AssignmentError::DuplicateShardId(pair[0]));
        }

        let total = if use_recommended { None } else { total };
        if let Some(total) = total {
            validate(&parsed, total)?;
        }

        Ok(Self {
            ids: parsed,
            total,
            use_recommended,
        })
    }

    /// Assignment described by configuration; `None` means unsharded
    pub fn from_config(config: &ShardingConfig) -> Result<Option<Self>, AssignmentError> {
        match &config.shard_ids {
            Some(ids) => Self::new(
                ids.clone(),
                config.shard_count,
                config.use_recommended_shard_count,
            )
            .map(Some),
            None if config.shard_count.is_some() || config.use_recommended_shard_count => {
                Err(AssignmentError::MissingShardIds)
            }
            None => Ok(None),
        }
    }

    /// Every shard `0..total`
    pub fn all(total: u32) -> Result<Self, AssignmentError> {
        Self::new((0..i64::from(total)).collect(), Some(total), false)
    }

    pub fn ids(&self) -> &[u32] {
        &self.ids
    }

    /// Explicit total; `None` when the recommended count is used
    pub fn total(&self) -> Option<u32> {
        self.total
    }

    pub fn uses_recommended(&self) -> bool {
        self.use_recommended
    }

    /// Shard count to identify with, given the gateway's recommendation
    pub fn effective_total(&self, recommended: Option<u32>) -> Result<u32, AssignmentError> {
        if !self.use_recommended {
            return self.total.ok_or(AssignmentError::MissingShardCount);
        }
        let total = recommended.ok_or(AssignmentError::MissingShardCount)?;
        validate(&self.ids, total)?;
        Ok(total)
    }
}

/// `ids` must be sorted
fn validate(ids: &[u32], total: u32) -> Result<(), AssignmentError> {
    if total == 0 {
        return Err(AssignmentError::ZeroShardCount);
    }
    if ids.len() > total as usize {
        return Err(AssignmentError::TooManyShardIds {
            ids: ids.len(),
            total,
        });
    }
    match ids.last() {
        Some(&id) if id >= total => Err(AssignmentError::ShardIdOutOfRange { id, total }),
        _ => Ok(()),
    }
}
