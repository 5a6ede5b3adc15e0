//! # Chunk Reassembler
//!
//! Buffers fragments by group until all `total` have arrived, then hands
//! back the original bytes exactly once.
//!
//! ## Bounds
//!
//! - Groups older than `chunk_ttl_ms` are discarded, and their ids are
//!   remembered for one more TTL so a straggling fragment cannot reopen the
//!   group and linger.
//! - At most `max_groups` groups are held; beyond that the oldest go first.
//! - A group may not claim more than `max_chunks_per_group` fragments.

use super::ChunkEnvelope;
use crate::errors::CodecError;
use shared_types::Timestamp;
use std::collections::HashMap;

/// Limits for the reassembly buffer.
#[derive(Debug, Clone)]
pub struct ReassemblyConfig {
    pub chunk_ttl_ms: u64,
    pub max_groups: usize,
    pub max_chunks_per_group: usize,
}

impl Default for ReassemblyConfig {
    fn default() -> Self {
        Self {
            chunk_ttl_ms: crate::CHUNK_TTL.as_millis() as u64,
            max_groups: crate::MAX_CHUNK_GROUPS,
            max_chunks_per_group: crate::MAX_CHUNKS_PER_GROUP,
        }
    }
}

/// Groups are scoped by topic so equal ids on two topics never mix.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct GroupKey {
    pub topic: String,
    pub id: String,
}

impl GroupKey {
    pub fn new(topic: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            id: id.into(),
        }
    }
}

/// Result of feeding one fragment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChunkAccept {
    /// More fragments are needed.
    Incomplete { received: usize, total: usize },
    /// The group is complete; these are the original payload bytes.
    Complete(Vec<u8>),
    /// This index was already received; ignored.
    Duplicate,
    /// The group was evicted earlier; fragment dropped.
    Discarded,
}

#[derive(Debug)]
struct PendingGroup {
    total: usize,
    started_at: Timestamp,
    parts: Vec<Option<Vec<u8>>>,
    received: usize,
}

impl PendingGroup {
    fn new(total: usize, started_at: Timestamp) -> Self {
        Self {
            total,
            started_at,
            parts: vec![None; total],
            received: 0,
        }
    }

    fn is_expired(&self, now: Timestamp, ttl_ms: u64) -> bool {
        now.saturating_sub(self.started_at) > ttl_ms
    }

    fn is_complete(&self) -> bool {
        self.received == self.total
    }

    fn assemble(self) -> Vec<u8> {
        self.parts.into_iter().flatten().flatten().collect()
    }
}

/// Per-topic, per-group fragment buffer.
#[derive(Debug)]
pub struct ChunkReassembler {
    pending: HashMap<GroupKey, PendingGroup>,
    /// Recently evicted groups and when they were evicted.
    evicted: HashMap<GroupKey, Timestamp>,
    config: ReassemblyConfig,
}

impl ChunkReassembler {
    pub fn new(config: ReassemblyConfig) -> Self {
        Self {
            pending: HashMap::new(),
            evicted: HashMap::new(),
            config,
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(ReassemblyConfig::default())
    }

    /// Feed one fragment received on `topic`.
    pub fn accept(
        &mut self,
        topic: &str,
        envelope: ChunkEnvelope,
        now: Timestamp,
    ) -> Result<ChunkAccept, CodecError> {
        let data = envelope.decode_data()?;
        if envelope.total > self.config.max_chunks_per_group {
            return Err(CodecError::TooManyChunks {
                needed: envelope.total,
                limit: self.config.max_chunks_per_group,
            });
        }

        let key = GroupKey::new(topic, envelope.id);
        if self.evicted.contains_key(&key) {
            return Ok(ChunkAccept::Discarded);
        }

        let ttl = self.config.chunk_ttl_ms;
        if self
            .pending
            .get(&key)
            .is_some_and(|group| group.is_expired(now, ttl))
        {
            self.pending.remove(&key);
            self.evicted.insert(key, now);
            return Ok(ChunkAccept::Discarded);
        }

        let group = self
            .pending
            .entry(key.clone())
            .or_insert_with(|| PendingGroup::new(envelope.total, now));

        if group.total != envelope.total {
            return Err(CodecError::MalformedChunk(format!(
                "total {} disagrees with group total {}",
                envelope.total, group.total
            )));
        }

        let slot = &mut group.parts[envelope.index];
        if slot.is_some() {
            return Ok(ChunkAccept::Duplicate);
        }
        *slot = Some(data);
        group.received += 1;

        if !group.is_complete() {
            let progress = ChunkAccept::Incomplete {
                received: group.received,
                total: group.total,
            };
            self.enforce_max_groups(now);
            return Ok(progress);
        }

        match self.pending.remove(&key) {
            Some(group) => Ok(ChunkAccept::Complete(group.assemble())),
            None => Ok(ChunkAccept::Discarded),
        }
    }

    /// Discard groups older than the TTL and forget old tombstones.
    ///
    /// Returns the discarded group keys.
    pub fn gc_expired(&mut self, now: Timestamp) -> Vec<GroupKey> {
        let ttl = self.config.chunk_ttl_ms;
        let expired: Vec<GroupKey> = self
            .pending
            .iter()
            .filter(|(_, group)| group.is_expired(now, ttl))
            .map(|(key, _)| key.clone())
            .collect();

        for key in &expired {
            self.pending.remove(key);
            self.evicted.insert(key.clone(), now);
        }

        self.evicted
            .retain(|_, evicted_at| now.saturating_sub(*evicted_at) <= ttl);

        expired
    }

    /// Purge the oldest groups while over `max_groups`.
    pub fn enforce_max_groups(&mut self, now: Timestamp) -> Vec<GroupKey> {
        if self.pending.len() <= self.config.max_groups {
            return vec![];
        }

        let mut entries: Vec<_> = self
            .pending
            .iter()
            .map(|(key, group)| (key.clone(), group.started_at))
            .collect();
        entries.sort_by_key(|(_, started_at)| *started_at);

        let to_remove = self.pending.len() - self.config.max_groups;
        let purged: Vec<GroupKey> = entries
            .into_iter()
            .take(to_remove)
            .map(|(key, _)| key)
            .collect();

        for key in &purged {
            self.pending.remove(key);
            self.evicted.insert(key.clone(), now);
        }

        purged
    }

    /// Number of groups still waiting for fragments.
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn config(&self) -> &ReassemblyConfig {
        &self.config
    }
}
