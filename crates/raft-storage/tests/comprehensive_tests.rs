//! # comprehensive storage tests
//!
//! why: verify the durable log and term/vote storage behave across restarts and damage
//! relations: tests raft-storage crate, with raft-core's RaftNode on top for the end-to-end cases
//! what: persistence, rotation, truncation, crash recovery, pruning, trait polymorphism

use raft_core::message::{AppendEntriesResponse, NewEntryRequest, VoteResponse};
use raft_core::{
    InMemoryRaftLog, LogEntry, LogError, MemberId, RaftConfig, RaftLog, RaftMessage, RaftNode,
    ReadableRaftLog, ReplicatedContent, StateStorage, Term, NO_INDEX,
};
use raft_storage::segment::{self, HEADER_SIZE};
use raft_storage::{FileStateStorage, LogConfig, SegmentedRaftLog, State};
use std::fs::{self, OpenOptions};
use std::path::Path;
use std::sync::Arc;
use tempfile::tempdir;

fn entry(term: Term) -> LogEntry {
    LogEntry::new(term, ReplicatedContent::Transaction(format!("tx-{term}").into_bytes()))
}

fn small_segments(dir: &Path, entries_per_segment: u64, strategy: &str) -> LogConfig {
    LogConfig {
        rotation_entries: Some(entries_per_segment),
        pruning_strategy: strategy.to_string(),
        ..LogConfig::new(dir)
    }
}

fn append_each(log: &SegmentedRaftLog, terms: &[Term]) {
    for term in terms {
        log.append(&[entry(*term)]).unwrap();
    }
}

fn segment_len(dir: &Path, version: u64) -> u64 {
    fs::metadata(dir.join(segment::file_name(version))).unwrap().len()
}

// =============================================================================
// SECTION 1: SEGMENTED LOG BASICS
// =============================================================================

mod segmented_basic {
    use super::*;

    #[test]
    fn new_log_is_empty() {
        let dir = tempdir().unwrap();
        let log = SegmentedRaftLog::open(&LogConfig::new(dir.path())).unwrap();

        assert_eq!(log.append_index(), NO_INDEX);
        assert_eq!(log.prev_index(), NO_INDEX);
        assert_eq!(log.read_entry_term(NO_INDEX).unwrap(), Some(0));
        assert_eq!(log.entry(0).unwrap(), None);
        assert!(dir.path().join(segment::file_name(0)).exists());
    }

    #[test]
    fn append_and_read_back() {
        let dir = tempdir().unwrap();
        let log = SegmentedRaftLog::open(&LogConfig::new(dir.path())).unwrap();

        let appended = log.append(&[entry(1), entry(1), entry(2)]).unwrap();
        assert_eq!(appended, 2);
        assert_eq!(log.entry(0).unwrap(), Some(entry(1)));
        assert_eq!(log.entry(2).unwrap(), Some(entry(2)));
        assert_eq!(log.read_entry_term(2).unwrap(), Some(2));
        assert_eq!(log.entry(3).unwrap(), None);
    }

    #[test]
    fn append_empty_batch_is_noop() {
        let dir = tempdir().unwrap();
        let log = SegmentedRaftLog::open(&LogConfig::new(dir.path())).unwrap();
        log.append(&[entry(1)]).unwrap();
        assert_eq!(log.append(&[]).unwrap(), 0);
    }

    #[test]
    fn decreasing_term_is_refused_before_writing() {
        let dir = tempdir().unwrap();
        let log = SegmentedRaftLog::open(&LogConfig::new(dir.path())).unwrap();
        log.append(&[entry(3)]).unwrap();
        let size = segment_len(dir.path(), 0);

        assert!(log.append(&[entry(2)]).is_err());
        assert_eq!(segment_len(dir.path(), 0), size);
    }

    #[test]
    fn every_content_kind_is_stored() {
        let dir = tempdir().unwrap();
        let log = SegmentedRaftLog::open(&LogConfig::new(dir.path())).unwrap();
        let entries = vec![
            LogEntry::new(1, ReplicatedContent::NewLeaderBarrier),
            LogEntry::new(1, ReplicatedContent::MemberSet(vec![MemberId(1), MemberId(2)])),
            LogEntry::new(1, ReplicatedContent::Dummy(vec![0x00, 0xff, 0x7f])),
            LogEntry::new(1, ReplicatedContent::Transaction(vec![0u8; 64 * 1024])),
        ];
        log.append(&entries).unwrap();
        for (index, expected) in entries.iter().enumerate() {
            assert_eq!(log.entry(index as i64).unwrap().as_ref(), Some(expected));
        }
    }
}

// =============================================================================
// SECTION 2: ROTATION TESTS
// =============================================================================

mod rotation {
    use super::*;

    #[test]
    fn rotates_by_entry_count() {
        let dir = tempdir().unwrap();
        let log = SegmentedRaftLog::open(&small_segments(dir.path(), 2, "keep_all")).unwrap();
        append_each(&log, &[1, 1, 1, 2, 2]);

        assert_eq!(log.segment_count(), 3);
        for version in 0..3 {
            assert!(dir.path().join(segment::file_name(version)).exists());
        }
        for index in 0..=4 {
            assert!(log.entry(index).unwrap().is_some(), "index {index}");
        }
    }

    #[test]
    fn rotates_by_size() {
        let dir = tempdir().unwrap();
        let config = LogConfig {
            rotation_size: HEADER_SIZE + 10,
            ..LogConfig::new(dir.path())
        };
        let log = SegmentedRaftLog::open(&config).unwrap();
        append_each(&log, &[1, 1, 1]);
        assert_eq!(log.segment_count(), 4);
    }

    #[test]
    fn rotation_is_invisible_after_restart() {
        let dir = tempdir().unwrap();
        let config = small_segments(dir.path(), 2, "keep_all");
        {
            let log = SegmentedRaftLog::open(&config).unwrap();
            append_each(&log, &[1, 1, 2, 2, 3]);
        }
        let log = SegmentedRaftLog::open(&config).unwrap();
        assert_eq!(log.append_index(), 4);
        assert_eq!(log.read_entry_term(3).unwrap(), Some(2));
        assert_eq!(log.entry(4).unwrap(), Some(entry(3)));
    }
}

// =============================================================================
// SECTION 3: TRUNCATION TESTS
// =============================================================================

mod truncation {
    use super::*;

    #[test]
    fn truncate_within_active_segment() {
        let dir = tempdir().unwrap();
        let log = SegmentedRaftLog::open(&LogConfig::new(dir.path())).unwrap();
        log.append(&[entry(1), entry(1), entry(1)]).unwrap();

        log.truncate(1).unwrap();
        assert_eq!(log.append_index(), 0);
        assert_eq!(log.entry(1).unwrap(), None);

        log.append(&[entry(2)]).unwrap();
        assert_eq!(log.entry(1).unwrap(), Some(entry(2)));
    }

    #[test]
    fn truncate_across_segments_removes_newer_files() {
        let dir = tempdir().unwrap();
        let config = small_segments(dir.path(), 2, "keep_all");
        let log = SegmentedRaftLog::open(&config).unwrap();
        append_each(&log, &[1, 1, 1, 1, 1]);
        assert_eq!(log.segment_count(), 3);

        log.truncate(1).unwrap();
        assert_eq!(log.segment_count(), 1);
        assert!(!dir.path().join(segment::file_name(1)).exists());
        assert!(!dir.path().join(segment::file_name(2)).exists());

        log.append(&[entry(3)]).unwrap();
        drop(log);

        let log = SegmentedRaftLog::open(&config).unwrap();
        assert_eq!(log.append_index(), 1);
        assert_eq!(log.read_entry_term(1).unwrap(), Some(3));
    }

    #[test]
    fn truncate_beyond_append_index_is_noop() {
        let dir = tempdir().unwrap();
        let log = SegmentedRaftLog::open(&LogConfig::new(dir.path())).unwrap();
        log.append(&[entry(1)]).unwrap();
        log.truncate(5).unwrap();
        assert_eq!(log.append_index(), 0);
    }

    #[test]
    fn truncate_at_or_below_prev_index_is_refused() {
        let dir = tempdir().unwrap();
        let log = SegmentedRaftLog::open(&LogConfig::new(dir.path())).unwrap();
        log.skip(5, 2).unwrap();
        assert!(matches!(
            log.truncate(5),
            Err(LogError::InvalidTruncate { index: 5, .. })
        ));
    }
}

// =============================================================================
// SECTION 4: CRASH RECOVERY TESTS
// =============================================================================

mod crash_recovery {
    use super::*;

    #[test]
    fn entries_survive_restart() {
        let dir = tempdir().unwrap();
        let config = LogConfig::new(dir.path());
        {
            let log = SegmentedRaftLog::open(&config).unwrap();
            log.append(&[entry(1), entry(2), entry(2)]).unwrap();
        }
        let log = SegmentedRaftLog::open(&config).unwrap();
        assert_eq!(
            log.state(),
            State {
                prev_index: NO_INDEX,
                prev_term: 0,
                append_index: 2
            }
        );
        assert_eq!(log.entry(1).unwrap(), Some(entry(2)));
    }

    #[test]
    fn torn_final_record_is_cut_off() {
        let dir = tempdir().unwrap();
        let config = LogConfig::new(dir.path());
        {
            let log = SegmentedRaftLog::open(&config).unwrap();
            log.append(&[entry(1), entry(1), entry(1)]).unwrap();
        }
        let len = segment_len(dir.path(), 0);
        let file = OpenOptions::new()
            .write(true)
            .open(dir.path().join(segment::file_name(0)))
            .unwrap();
        file.set_len(len - 3).unwrap();
        drop(file);

        let log = SegmentedRaftLog::open(&config).unwrap();
        assert_eq!(log.append_index(), 1);
        assert!(segment_len(dir.path(), 0) < len - 3);

        // the log keeps working from the cut
        log.append(&[entry(2)]).unwrap();
        assert_eq!(log.entry(2).unwrap(), Some(entry(2)));
    }

    #[test]
    fn corruption_before_the_end_is_damage() {
        let dir = tempdir().unwrap();
        let config = LogConfig::new(dir.path());
        {
            let log = SegmentedRaftLog::open(&config).unwrap();
            log.append(&[entry(1), entry(1), entry(1)]).unwrap();
        }
        let path = dir.path().join(segment::file_name(0));
        let mut bytes = fs::read(&path).unwrap();
        bytes[HEADER_SIZE as usize + 10] ^= 0xff;
        fs::write(&path, bytes).unwrap();

        let err = SegmentedRaftLog::open(&config).unwrap_err();
        assert!(err.is_damaged(), "expected damage, got {err}");
    }

    #[test]
    fn oversized_length_before_the_end_is_damage() {
        let dir = tempdir().unwrap();
        let config = LogConfig::new(dir.path());
        {
            let log = SegmentedRaftLog::open(&config).unwrap();
            log.append(&[entry(1), entry(1), entry(1)]).unwrap();
        }
        let path = dir.path().join(segment::file_name(0));
        let mut bytes = fs::read(&path).unwrap();
        let len = bytes.len();
        bytes[HEADER_SIZE as usize] = 0x7f;
        fs::write(&path, bytes).unwrap();

        let err = SegmentedRaftLog::open(&config).unwrap_err();
        assert!(err.is_damaged(), "expected damage, got {err}");
        // nothing was cut away
        assert_eq!(segment_len(dir.path(), 0), len as u64);
    }

    #[test]
    fn bad_tail_in_older_segment_is_damage() {
        let dir = tempdir().unwrap();
        let config = small_segments(dir.path(), 2, "keep_all");
        {
            let log = SegmentedRaftLog::open(&config).unwrap();
            append_each(&log, &[1, 1, 1]);
        }
        let len = segment_len(dir.path(), 0);
        let file = OpenOptions::new()
            .write(true)
            .open(dir.path().join(segment::file_name(0)))
            .unwrap();
        file.set_len(len - 2).unwrap();
        drop(file);

        assert!(SegmentedRaftLog::open(&config).unwrap_err().is_damaged());
    }

    #[test]
    fn skip_survives_restart() {
        let dir = tempdir().unwrap();
        let config = LogConfig::new(dir.path());
        {
            let log = SegmentedRaftLog::open(&config).unwrap();
            log.append(&[entry(1), entry(1)]).unwrap();
            assert_eq!(log.skip(10, 4).unwrap(), 10);
            assert_eq!(log.entry(1).unwrap(), None);
            log.append(&[entry(5)]).unwrap();
        }
        let log = SegmentedRaftLog::open(&config).unwrap();
        assert_eq!(log.prev_index(), 10);
        assert_eq!(log.read_entry_term(10).unwrap(), Some(4));
        assert_eq!(log.append_index(), 11);
        assert_eq!(log.entry(11).unwrap(), Some(entry(5)));
    }

    #[test]
    fn skip_behind_append_index_is_ignored() {
        let dir = tempdir().unwrap();
        let log = SegmentedRaftLog::open(&LogConfig::new(dir.path())).unwrap();
        log.append(&[entry(1), entry(1), entry(1)]).unwrap();
        assert_eq!(log.skip(1, 1).unwrap(), 2);
        assert_eq!(log.prev_index(), NO_INDEX);
    }
}

// =============================================================================
// SECTION 5: PRUNING TESTS
// =============================================================================

mod pruning {
    use super::*;

    #[test]
    fn prune_removes_only_whole_segments_below_limit() {
        let dir = tempdir().unwrap();
        let log = SegmentedRaftLog::open(&small_segments(dir.path(), 2, "keep_none")).unwrap();
        append_each(&log, &[1, 1, 2, 2, 3, 3]);
        assert_eq!(log.segment_count(), 4);

        assert_eq!(log.prune(3).unwrap(), 1);
        assert!(!dir.path().join(segment::file_name(0)).exists());
        assert_eq!(log.entry(1).unwrap(), None);
        assert_eq!(log.read_entry_term(1).unwrap(), Some(1));
        assert_eq!(log.entry(2).unwrap(), Some(entry(2)));

        assert_eq!(log.prune(100).unwrap(), 5);
        assert_eq!(log.segment_count(), 1);
        assert_eq!(log.append_index(), 5);
    }

    #[test]
    fn prune_without_eligible_segment_is_noop() {
        let dir = tempdir().unwrap();
        let log = SegmentedRaftLog::open(&small_segments(dir.path(), 2, "keep_none")).unwrap();
        append_each(&log, &[1, 1, 1]);
        assert_eq!(log.prune(1).unwrap(), NO_INDEX);
        assert_eq!(log.segment_count(), 2);
    }

    #[test]
    fn keep_all_never_prunes() {
        let dir = tempdir().unwrap();
        let log = SegmentedRaftLog::open(&small_segments(dir.path(), 1, "keep_all")).unwrap();
        append_each(&log, &[1, 1, 1, 1]);
        assert_eq!(log.prune(100).unwrap(), NO_INDEX);
        assert_eq!(log.entry(0).unwrap(), Some(entry(1)));
    }

    #[test]
    fn entries_strategy_keeps_newest_entries() {
        let dir = tempdir().unwrap();
        let log = SegmentedRaftLog::open(&small_segments(dir.path(), 2, "2 entries")).unwrap();
        append_each(&log, &[1, 1, 1, 1, 1, 1]);

        assert_eq!(log.prune(100).unwrap(), 3);
        assert_eq!(log.entry(4).unwrap(), Some(entry(1)));
    }

    #[test]
    fn pruned_log_recovers_its_floor() {
        let dir = tempdir().unwrap();
        let config = small_segments(dir.path(), 2, "keep_none");
        {
            let log = SegmentedRaftLog::open(&config).unwrap();
            append_each(&log, &[1, 1, 2, 2, 3]);
            log.prune(4).unwrap();
        }
        let log = SegmentedRaftLog::open(&config).unwrap();
        assert_eq!(log.prev_index(), 3);
        assert_eq!(log.read_entry_term(3).unwrap(), Some(2));
        assert_eq!(log.entry(4).unwrap(), Some(entry(3)));
    }

    #[test]
    fn invalid_strategy_is_rejected_on_open() {
        let dir = tempdir().unwrap();
        let config = small_segments(dir.path(), 2, "7 fortnights");
        assert!(SegmentedRaftLog::open(&config).is_err());
    }
}

// =============================================================================
// SECTION 6: TERM AND VOTE STORAGE
// =============================================================================

mod term_and_vote {
    use super::*;

    #[test]
    fn create_storage_creates_directory() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("raft_data");
        FileStateStorage::new(&path).unwrap();
        assert!(path.exists());
    }

    #[test]
    fn term_survives_restart() {
        let dir = tempdir().unwrap();
        {
            let mut storage = FileStateStorage::new(dir.path()).unwrap();
            storage.save_term_and_vote(10, Some(MemberId(5))).unwrap();
        }
        let storage = FileStateStorage::new(dir.path()).unwrap();
        assert_eq!(storage.load_term_and_vote().unwrap(), (10, Some(MemberId(5))));
    }

    #[test]
    fn meta_file_is_valid_json() {
        let dir = tempdir().unwrap();
        let mut storage = FileStateStorage::new(dir.path()).unwrap();
        storage.save_term_and_vote(u64::MAX, Some(MemberId(u64::MAX))).unwrap();

        let contents = fs::read_to_string(storage.meta_path()).unwrap();
        let _: serde_json::Value = serde_json::from_str(&contents).expect("valid JSON");
        assert_eq!(
            storage.load_term_and_vote().unwrap(),
            (u64::MAX, Some(MemberId(u64::MAX)))
        );
    }

    #[test]
    fn meta_file_does_not_disturb_segments() {
        let dir = tempdir().unwrap();
        let mut storage = FileStateStorage::new(dir.path()).unwrap();
        storage.save_term_and_vote(3, None).unwrap();
        let log = SegmentedRaftLog::open(&LogConfig::new(dir.path())).unwrap();
        assert_eq!(log.append_index(), NO_INDEX);
    }
}

// =============================================================================
// SECTION 7: RAFT NODE ON DURABLE STORAGE
// =============================================================================

mod durable_node {
    use super::*;

    fn open_node(dir: &Path) -> RaftNode {
        let config = RaftConfig {
            pre_vote: false,
            ..RaftConfig::default()
        };
        let log = SegmentedRaftLog::open(&small_segments(dir, 1, "keep_none")).unwrap();
        RaftNode::open(
            MemberId(1),
            (1..=3).map(MemberId),
            config,
            Arc::new(log),
            Box::new(FileStateStorage::new(dir).unwrap()),
        )
        .unwrap()
    }

    fn submit(node: &mut RaftNode, bytes: &[u8]) {
        node.handle(RaftMessage::NewEntryRequest(NewEntryRequest {
            from: MemberId(1),
            content: ReplicatedContent::Transaction(bytes.to_vec()),
        }))
        .unwrap();
    }

    #[test]
    fn prune_never_passes_commit_index() {
        let dir = tempdir().unwrap();
        let mut node = open_node(dir.path());
        node.handle(RaftMessage::ElectionTimeout { from: MemberId(1) })
            .unwrap();
        node.handle(RaftMessage::VoteResponse(VoteResponse {
            from: MemberId(2),
            term: 1,
            vote_granted: true,
        }))
        .unwrap();
        submit(&mut node, b"one");
        submit(&mut node, b"two");
        node.handle(RaftMessage::AppendEntriesResponse(AppendEntriesResponse {
            from: MemberId(2),
            term: 1,
            success: true,
            match_index: 0,
            append_index: 0,
        }))
        .unwrap();
        assert_eq!(node.commit_index(), 0);

        node.handle(RaftMessage::PruneRequest {
            from: MemberId(1),
            prune_index: 100,
        })
        .unwrap();
        assert!(node.log().prev_index() <= node.commit_index());
        assert!(node.log().entry(1).unwrap().is_some());
        assert!(node.log().entry(2).unwrap().is_some());
    }

    #[test]
    fn term_vote_and_log_survive_restart() {
        let dir = tempdir().unwrap();
        {
            let mut node = open_node(dir.path());
            node.handle(RaftMessage::ElectionTimeout { from: MemberId(1) })
                .unwrap();
            node.handle(RaftMessage::VoteResponse(VoteResponse {
                from: MemberId(3),
                term: 1,
                vote_granted: true,
            }))
            .unwrap();
            submit(&mut node, b"payload");
        }

        let node = open_node(dir.path());
        assert_eq!(node.term(), 1);
        assert_eq!(node.voted_for(), Some(MemberId(1)));
        assert_eq!(node.append_index(), 1);
        assert_eq!(
            node.log().entry(0).unwrap().map(|e| e.content),
            Some(ReplicatedContent::NewLeaderBarrier)
        );
    }
}

// =============================================================================
// SECTION 8: LOG TRAIT POLYMORPHISM
// =============================================================================

mod trait_polymorphism {
    use super::*;

    fn exercise(log: &dyn RaftLog) {
        assert_eq!(log.append(&[entry(1), entry(1), entry(2)]).unwrap(), 2);
        assert_eq!(log.read_entry_term(2).unwrap(), Some(2));

        log.truncate(1).unwrap();
        assert_eq!(log.append_index(), 0);
        assert_eq!(log.entries(0, 10).unwrap(), vec![entry(1)]);

        assert_eq!(log.skip(5, 3).unwrap(), 5);
        assert_eq!(log.prev_index(), 5);
        assert_eq!(log.read_entry_term(5).unwrap(), Some(3));
        assert_eq!(log.entry(0).unwrap(), None);
    }

    #[test]
    fn in_memory_implements_trait() {
        exercise(&InMemoryRaftLog::new());
    }

    #[test]
    fn segmented_implements_trait() {
        let dir = tempdir().unwrap();
        exercise(&SegmentedRaftLog::open(&LogConfig::new(dir.path())).unwrap());
    }
}
