use crate::encoding::frame::FrameWriter;
use super::interface::TagMessages;
use super::message::{Tag, TAG_LOCALITY_LOG_ROUTER};
use super::set::LogSet;
use super::system::LogSystem;

use bytes::Bytes;
use rand::Rng as _;
use std::collections::BTreeMap;

/// The per-commit staging buffer: collects tagged messages, computes
/// their placement, and frames them into one payload per local log
/// server. Remote log sets are fed indirectly via log routers, so only
/// local sets get buffers.
///
/// Subsequences start at 1 and are assigned in [`Self::add_message`]
/// order; the merged cursors rely on this to distinguish "between
/// versions" (subsequence 0) from "mid-version".
///
/// The accumulator snapshots the log system's local sets at
/// construction, so a commit's placement is stable even if membership
/// changes while it is being staged.
pub struct PushData {
    /// Local log sets, in log system order.
    sets: Vec<LogSet>,
    /// The number of router tags to spread remote-bound messages over,
    /// or 0 when the log system has no remote logs.
    router_tags: u32,
    /// Tags queued for the next message.
    next_tags: Vec<Tag>,
    /// The previous message's tags, reused by use_previous_locations.
    prev_tags: Vec<Tag>,
    /// The previous message's locations, reused by use_previous_locations.
    locations: Vec<usize>,
    /// One frame buffer per local server across all local sets.
    writers: Vec<FrameWriter>,
    /// Per location, the byte offsets at which each tag's frames start.
    tags: Vec<BTreeMap<Tag, Vec<u32>>>,
    subsequence: u32,
}

impl PushData {
    pub fn new(system: &LogSystem) -> Self {
        let sets = system.local_sets();
        let total: usize = sets.iter().map(|set| set.log_servers.len()).sum();
        Self {
            sets,
            router_tags: if system.has_remote_logs() { system.log_router_tags() } else { 0 },
            next_tags: Vec::new(),
            prev_tags: Vec::new(),
            locations: Vec::new(),
            writers: vec![FrameWriter::new(); total],
            tags: vec![BTreeMap::new(); total],
            subsequence: 1,
        }
    }

    /// Queues a tag for the next message.
    pub fn add_tag(&mut self, tag: Tag) {
        self.next_tags.push(tag);
    }

    /// Stages a message with the queued tags, assigning it the next
    /// subsequence and framing it into every buffer its placement
    /// selects. With `use_previous_locations`, the previous message's
    /// tags and placement are reused instead (the queued tags must be
    /// the same); this skips recomputing placement for runs of messages
    /// with identical tags.
    pub fn add_message(&mut self, payload: &[u8], use_previous_locations: bool) {
        if !use_previous_locations {
            self.prev_tags.clear();
            if self.router_tags > 0 {
                self.prev_tags.push(self.random_router_tag());
            }
            self.prev_tags.append(&mut self.next_tags);

            self.locations.clear();
            let mut offset = 0;
            for set in &self.sets {
                set.get_push_locations(&self.prev_tags, &mut self.locations, offset);
                offset += set.log_servers.len();
            }
        } else {
            self.next_tags.clear();
        }

        let subsequence = self.subsequence;
        self.subsequence += 1;
        for &location in &self.locations {
            for &tag in &self.prev_tags {
                self.tags[location].entry(tag).or_default().push(self.writers[location].offset());
            }
            self.writers[location].append(subsequence, &self.prev_tags, payload);
        }
    }

    /// The number of messages staged so far.
    pub fn message_count(&self) -> u32 {
        self.subsequence - 1
    }

    /// The number of per-server buffers (local servers across all local
    /// sets), which is also the location index space.
    pub fn location_count(&self) -> usize {
        self.writers.len()
    }

    /// Takes the staged payload and tag side table for one location.
    pub(super) fn take_location(&mut self, location: usize) -> (Bytes, Vec<TagMessages>) {
        let messages = self.writers[location].finish();
        let tags = std::mem::take(&mut self.tags[location])
            .into_iter()
            .map(|(tag, offsets)| TagMessages { tag, offsets })
            .collect();
        (messages, tags)
    }

    /// A uniformly random router tag, spreading remote-bound messages
    /// over the configured router count.
    fn random_router_tag(&self) -> Tag {
        Tag::new(TAG_LOCALITY_LOG_ROUTER, rand::thread_rng().gen_range(0..self.router_tags))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoding::frame::FrameReader;
    use crate::log::interface::{LogServerClient, ServerHandle};
    use crate::log::set::BestPolicy;
    use crate::log::state::{CoreLogSet, CoreState};
    use crate::policy::{Locality, ReplicationPolicy};
    use std::sync::Arc;

    /// A single-set, three-server log system with no remote logs.
    fn test_system() -> Arc<LogSystem> {
        let localities: Vec<Locality> =
            ["a", "b", "c"].iter().map(|z| Locality::zone(z)).collect();
        let state = CoreState {
            log_sets: vec![CoreLogSet {
                servers: vec![0, 1, 2],
                localities: localities.clone(),
                replication_factor: 3,
                anti_quorum: 0,
                policy: ReplicationPolicy::across_zones(3),
                best_policy: BestPolicy::Id,
                locality: 0,
                is_local: true,
            }],
            ..CoreState::default()
        };
        LogSystem::from_core_state(&state, |id, locality| {
            let (client, _requests) = LogServerClient::channel(id, locality.clone());
            ServerHandle::fixed(client)
        })
    }

    /// Subsequences must be 1..=N in add_message order, on every server
    /// the messages landed on.
    #[test]
    fn subsequences_are_monotonic_from_one() {
        let system = test_system();
        let mut data = PushData::new(&system);
        for i in 0..4 {
            data.add_tag(Tag::new(0, 7));
            data.add_message(format!("m{i}").as_bytes(), false);
        }
        assert_eq!(data.message_count(), 4);

        let mut seen = 0;
        for location in 0..data.location_count() {
            let (messages, _) = data.take_location(location);
            if messages.is_empty() {
                continue;
            }
            seen += 1;
            let mut reader = FrameReader::new(messages);
            let mut expected = 1;
            while let Some(frame) = reader.next().unwrap() {
                assert_eq!(frame.subsequence, expected);
                assert_eq!(frame.tags, vec![Tag::new(0, 7)]);
                expected += 1;
            }
            assert_eq!(expected, 5);
        }
        // Replication factor 3: all three servers hold the messages.
        assert_eq!(seen, 3);
    }

    /// The tag side table points at each frame's start offset.
    #[test]
    fn tag_offsets_address_frames() {
        let system = test_system();
        let tag = Tag::new(0, 1);
        let mut data = PushData::new(&system);
        data.add_tag(tag);
        data.add_message(b"first", false);
        data.add_tag(tag);
        data.add_message(b"second", false);

        let location = 1; // 1 % 3, the tag's preferred server
        let (messages, tags) = data.take_location(location);
        let offsets = &tags.iter().find(|t| t.tag == tag).unwrap().offsets;
        assert_eq!(offsets.len(), 2);
        for (i, &offset) in offsets.iter().enumerate() {
            let mut reader = FrameReader::new(messages.slice(offset as usize..));
            let frame = reader.next().unwrap().unwrap();
            assert_eq!(frame.subsequence, i as u32 + 1);
        }
    }

    /// use_previous_locations reuses the prior message's tags and
    /// placement without consuming queued tags.
    #[test]
    fn previous_locations_are_reused() {
        let system = test_system();
        let tag = Tag::new(0, 2);
        let mut data = PushData::new(&system);
        data.add_tag(tag);
        data.add_message(b"a", false);
        data.add_message(b"b", true);

        let (messages, tags) = data.take_location(2); // 2 % 3
        let mut reader = FrameReader::new(messages);
        let first = reader.next().unwrap().unwrap();
        let second = reader.next().unwrap().unwrap();
        assert_eq!(first.tags, second.tags);
        assert_eq!(second.subsequence, 2);
        assert_eq!(tags.iter().find(|t| t.tag == tag).unwrap().offsets.len(), 2);
    }
}
