//! Guild member lookups (op 8) and the chunk accumulation behind them.

use serde_json::Value;
use shardline_core::Snowflake;
use std::collections::HashMap;
use tokio::sync::oneshot;
use uuid::Uuid;

use crate::events::GuildMembersChunkPayload;
use crate::protocol::RequestGuildMembersPayload;

/// A member lookup as requested by the caller
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GuildMembersRequest {
    pub guild_id: Snowflake,
    /// Username prefix; empty matches everyone. Ignored when `user_ids` is set.
    pub query: String,
    /// 0 means no limit
    pub limit: u32,
    pub presences: bool,
    pub user_ids: Vec<Snowflake>,
}

impl GuildMembersRequest {
    /// Every member of `guild_id`
    #[must_use]
    pub fn new(guild_id: Snowflake) -> Self {
        Self {
            guild_id,
            query: String::new(),
            limit: 0,
            presences: false,
            user_ids: Vec::new(),
        }
    }

    #[must_use]
    pub fn query(mut self, query: impl Into<String>, limit: u32) -> Self {
        self.query = query.into();
        self.limit = limit;
        self
    }

    #[must_use]
    pub fn user_ids(mut self, user_ids: impl IntoIterator<Item = Snowflake>) -> Self {
        self.user_ids = user_ids.into_iter().collect();
        self
    }

    #[must_use]
    pub fn presences(mut self, presences: bool) -> Self {
        self.presences = presences;
        self
    }

    pub(crate) fn into_payload(self, nonce: String) -> RequestGuildMembersPayload {
        let query = self.user_ids.is_empty().then_some(self.query);
        RequestGuildMembersPayload {
            guild_id: self.guild_id,
            query,
            limit: self.limit,
            presences: self.presences,
            user_ids: self.user_ids,
            nonce,
        }
    }
}

/// Result of a completed lookup, chunks concatenated in arrival order
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GuildMembers {
    pub guild_id: Snowflake,
    pub members: Vec<Value>,
    pub presences: Vec<Value>,
    pub not_found: Vec<Snowflake>,
    /// Number of chunks received
    pub chunks: u32,
}

struct PendingLookup {
    result: GuildMembers,
    reply: oneshot::Sender<GuildMembers>,
}

/// In-flight lookups of one shard, keyed by nonce
#[derive(Default)]
pub(crate) struct PendingLookups {
    pending: HashMap<String, PendingLookup>,
}

impl PendingLookups {
    /// Track a new lookup and return its nonce
    pub(crate) fn register(
        &mut self,
        guild_id: Snowflake,
        reply: oneshot::Sender<GuildMembers>,
    ) -> String {
        self.prune();

        let mut nonce = Uuid::new_v4().simple().to_string();
        while self.pending.contains_key(&nonce) {
            nonce = Uuid::new_v4().simple().to_string();
        }

        self.pending.insert(
            nonce.clone(),
            PendingLookup {
                result: GuildMembers {
                    guild_id,
                    ..GuildMembers::default()
                },
                reply,
            },
        );
        nonce
    }

    /// Fold a chunk into its lookup. Returns true when the lookup completed.
    ///
    /// Chunks without a nonce, or with a nonce this shard never issued,
    /// are ignored.
    pub(crate) fn accept(&mut self, chunk: &GuildMembersChunkPayload) -> bool {
        let Some(nonce) = chunk.nonce.as_deref() else {
            return false;
        };
        let Some(lookup) = self.pending.get_mut(nonce) else {
            return false;
        };

        let result = &mut lookup.result;
        result.members.extend(chunk.members.iter().cloned());
        result.presences.extend(chunk.presences.iter().cloned());
        result.not_found.extend(chunk.not_found.iter().copied());
        result.chunks += 1;

        if result.chunks < chunk.chunk_count {
            return false;
        }

        if let Some(lookup) = self.pending.remove(nonce) {
            // The caller may have given up already
            let _ = lookup.reply.send(lookup.result);
        }
        true
    }

    /// Drop lookups whose caller stopped waiting
    pub(crate) fn prune(&mut self) {
        self.pending.retain(|_, lookup| !lookup.reply.is_closed());
    }

    pub(crate) fn len(&self) -> usize {
        self.pending.len()
    }
}
