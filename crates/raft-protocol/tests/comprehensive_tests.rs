//! # comprehensive protocol tests
//!
//! why: verify that what one member writes another member reads back, and
//! that two members agree on a stack before talking
//! relations: tests raft-protocol's codec, pipeline and handshake drivers
//! what: round-trips, bounded entries, unknown messages, handshakes over an
//! in-memory duplex stream

use bytes::BytesMut;
use proptest::prelude::*;
use raft_core::message::{
    AppendEntriesRequest, AppendEntriesResponse, Heartbeat, LogCompactionInfo, NewEntryRequest,
    VoteRequest, VoteResponse,
};
use raft_core::{
    ClusterId, ClusterIdAwareMessage, IdAllocationRequest, IdType, LogEntry, MemberId, RaftMessage,
    ReplicatedContent,
};
use raft_protocol::handshake::{
    self, ApplicationProtocol, ModifierProtocol, SupportedApplicationProtocol,
    SupportedModifierProtocol,
};
use raft_protocol::{
    framing, CodecError, DecodedMessage, Modifier, NegotiationError, Pipeline, ProtocolStack,
    RaftMessageDecoder, RaftMessageEncoder, SupportedProtocols,
};

const CLUSTER: ClusterId = ClusterId(0x0123_4567_89ab_cdef_0011_2233_4455_6677);

fn roundtrip(message: RaftMessage) -> RaftMessage {
    let mut out = BytesMut::new();
    RaftMessageEncoder::default()
        .encode(&ClusterIdAwareMessage::new(CLUSTER, message), &mut out)
        .unwrap();
    match RaftMessageDecoder.decode(&out).unwrap() {
        DecodedMessage::Message(decoded) => {
            assert_eq!(decoded.cluster_id, CLUSTER);
            decoded.message
        }
        other => panic!("decoded {other:?}"),
    }
}

fn entries(count: usize) -> Vec<LogEntry> {
    (0..count)
        .map(|i| LogEntry::new(i as u64 + 1, ReplicatedContent::Transaction(vec![i as u8; i])))
        .collect()
}

fn append(count: usize) -> RaftMessage {
    RaftMessage::AppendEntriesRequest(AppendEntriesRequest {
        from: MemberId(1),
        leader_term: 5,
        prev_log_index: 9,
        prev_log_term: 4,
        entries: entries(count),
        leader_commit: 8,
    })
}

// =============================================================================
// SECTION 1: MESSAGE ROUND-TRIPS
// =============================================================================

mod message_roundtrip {
    use super::*;

    #[test]
    fn every_network_message_survives() {
        let vote = VoteRequest {
            from: MemberId(2),
            term: 7,
            candidate: MemberId(2),
            last_log_index: 41,
            last_log_term: 6,
        };
        let response = VoteResponse {
            from: MemberId(3),
            term: 7,
            vote_granted: true,
        };
        let messages = vec![
            RaftMessage::VoteRequest(vote.clone()),
            RaftMessage::PreVoteRequest(vote),
            RaftMessage::VoteResponse(response.clone()),
            RaftMessage::PreVoteResponse(VoteResponse {
                vote_granted: false,
                ..response
            }),
            append(0),
            append(1),
            append(25),
            RaftMessage::AppendEntriesResponse(AppendEntriesResponse {
                from: MemberId(3),
                term: 5,
                success: false,
                match_index: -1,
                append_index: 3,
            }),
            RaftMessage::Heartbeat(Heartbeat {
                from: MemberId(1),
                leader_term: 5,
                commit_index: 12,
                commit_index_term: 5,
            }),
            RaftMessage::HeartbeatResponse { from: MemberId(2) },
            RaftMessage::LogCompactionInfo(LogCompactionInfo {
                from: MemberId(1),
                leader_term: 5,
                prev_index: 100,
            }),
            RaftMessage::NewEntryRequest(NewEntryRequest {
                from: MemberId(2),
                content: ReplicatedContent::IdAllocation(IdAllocationRequest {
                    owner: MemberId(2),
                    id_type: IdType::Node,
                    range_start: 1024,
                    range_length: 64,
                }),
            }),
        ];
        for message in messages {
            assert_eq!(roundtrip(message.clone()), message);
        }
    }

    #[test]
    fn every_content_kind_survives_in_append() {
        let contents = vec![
            ReplicatedContent::NewLeaderBarrier,
            ReplicatedContent::MemberSet(vec![MemberId(1), MemberId(2), MemberId(3)]),
            ReplicatedContent::Dummy(vec![7; 100]),
            ReplicatedContent::Transaction(Vec::new()),
        ];
        let message = RaftMessage::AppendEntriesRequest(AppendEntriesRequest {
            from: MemberId(1),
            leader_term: 2,
            prev_log_index: -1,
            prev_log_term: 0,
            entries: contents.into_iter().map(|c| LogEntry::new(2, c)).collect(),
            leader_commit: -1,
        });
        assert_eq!(roundtrip(message.clone()), message);
    }
}

// =============================================================================
// SECTION 2: ROUND-TRIP PROPERTIES
// =============================================================================

mod roundtrip_properties {
    use super::*;

    fn content() -> impl Strategy<Value = ReplicatedContent> {
        prop_oneof![
            prop::collection::vec(any::<u8>(), 0..64).prop_map(ReplicatedContent::Transaction),
            prop::collection::vec(any::<u8>(), 0..64).prop_map(ReplicatedContent::Dummy),
            Just(ReplicatedContent::NewLeaderBarrier),
            prop::collection::vec(any::<u64>().prop_map(MemberId), 0..5).prop_map(ReplicatedContent::MemberSet),
        ]
    }

    fn message() -> impl Strategy<Value = RaftMessage> {
        let member = any::<u64>().prop_map(MemberId);
        prop_oneof![
            (member.clone(), any::<u64>(), any::<i64>(), any::<u64>()).prop_map(|(from, term, index, last)| {
                RaftMessage::VoteRequest(VoteRequest {
                    from,
                    term,
                    candidate: from,
                    last_log_index: index,
                    last_log_term: last,
                })
            }),
            (member.clone(), any::<u64>(), any::<bool>()).prop_map(|(from, term, granted)| {
                RaftMessage::PreVoteResponse(VoteResponse {
                    from,
                    term,
                    vote_granted: granted,
                })
            }),
            (
                member.clone(),
                any::<u64>(),
                any::<i64>(),
                prop::collection::vec((any::<u64>(), content()), 0..8)
            )
                .prop_map(|(from, term, prev, raw)| {
                    RaftMessage::AppendEntriesRequest(AppendEntriesRequest {
                        from,
                        leader_term: term,
                        prev_log_index: prev,
                        prev_log_term: term,
                        entries: raw.into_iter().map(|(t, c)| LogEntry::new(t, c)).collect(),
                        leader_commit: prev,
                    })
                }),
            (member.clone(), any::<u64>(), any::<bool>(), any::<i64>(), any::<i64>()).prop_map(
                |(from, term, success, match_index, append_index)| {
                    RaftMessage::AppendEntriesResponse(AppendEntriesResponse {
                        from,
                        term,
                        success,
                        match_index,
                        append_index,
                    })
                }
            ),
            (member.clone(), content()).prop_map(|(from, content)| {
                RaftMessage::NewEntryRequest(NewEntryRequest { from, content })
            }),
            member.prop_map(|from| RaftMessage::HeartbeatResponse { from }),
        ]
    }

    proptest! {
        #[test]
        fn decode_inverts_encode(message in message()) {
            prop_assert_eq!(roundtrip(message.clone()), message);
        }

        #[test]
        fn compressed_pipeline_inverts_itself(message in message()) {
            let stack = ProtocolStack::new(ApplicationProtocol::raft(1), vec![Modifier::Snappy.protocol()]);
            let pipeline = Pipeline::new(stack, 1024 * 1024).unwrap();
            let wrapped = ClusterIdAwareMessage::new(CLUSTER, message);

            let mut out = BytesMut::new();
            pipeline.outbound(&wrapped, &mut out).unwrap();
            let frame = framing::split_frame(&mut out, pipeline.max_frame()).unwrap().unwrap();
            prop_assert_eq!(pipeline.inbound(&frame).unwrap(), DecodedMessage::Message(wrapped));
        }
    }
}

// =============================================================================
// SECTION 3: BOUNDED ENTRIES AND MALFORMED INPUT
// =============================================================================

mod bounds_and_anomalies {
    use super::*;

    #[test]
    fn oversized_new_entry_writes_nothing() {
        let encoder = RaftMessageEncoder::new(1024);
        let message = ClusterIdAwareMessage::new(
            CLUSTER,
            RaftMessage::NewEntryRequest(NewEntryRequest {
                from: MemberId(1),
                content: ReplicatedContent::Transaction(vec![0; 2048]),
            }),
        );

        let mut out = BytesMut::from(&b"earlier frame"[..]);
        let err = encoder.encode(&message, &mut out).unwrap_err();
        assert!(matches!(err, CodecError::EntryTooLarge { limit: 1024, .. }));
        assert_eq!(&out[..], b"earlier frame");
    }

    #[test]
    fn oversized_entry_is_refused_by_pipeline_too() {
        let stack = ProtocolStack::new(ApplicationProtocol::raft(1), vec![]);
        let pipeline = Pipeline::new(stack, 16).unwrap();
        let message = ClusterIdAwareMessage::new(
            CLUSTER,
            RaftMessage::NewEntryRequest(NewEntryRequest {
                from: MemberId(1),
                content: ReplicatedContent::Dummy(vec![1; 64]),
            }),
        );
        let mut out = BytesMut::new();
        assert!(pipeline.outbound(&message, &mut out).is_err());
        assert!(out.is_empty());
    }

    #[test]
    fn appended_entries_are_not_bounded_by_client_limit() {
        let encoder = RaftMessageEncoder::new(16);
        let mut out = BytesMut::new();
        encoder
            .encode(&ClusterIdAwareMessage::new(CLUSTER, append(30)), &mut out)
            .unwrap();
        assert!(out.len() > 16);
    }

    #[test]
    fn unknown_kind_from_newer_peer_is_a_sentinel() {
        let mut out = BytesMut::new();
        RaftMessageEncoder::default()
            .encode(
                &ClusterIdAwareMessage::new(CLUSTER, RaftMessage::HeartbeatResponse { from: MemberId(5) }),
                &mut out,
            )
            .unwrap();
        // overwrite the ordinal
        out[16..20].copy_from_slice(&1000i32.to_be_bytes());

        assert_eq!(
            RaftMessageDecoder.decode(&out).unwrap(),
            DecodedMessage::Unknown {
                cluster_id: CLUSTER,
                ordinal: 1000,
                from: MemberId(5)
            }
        );
    }

    #[test]
    fn garbage_is_an_error_not_a_panic() {
        assert!(RaftMessageDecoder.decode(&[1, 2, 3]).is_err());
        let err = RaftMessageDecoder.decode(&[0u8; 40]).unwrap_err();
        assert!(err.is_recoverable());
    }
}

// =============================================================================
// SECTION 4: HANDSHAKE OVER A STREAM
// =============================================================================

mod handshake_driver {
    use super::*;

    fn supported(versions: &[u32], compression: &[&str]) -> SupportedProtocols {
        SupportedProtocols {
            application: SupportedApplicationProtocol {
                category: "raft".into(),
                versions: versions.to_vec(),
            },
            modifiers: vec![SupportedModifierProtocol {
                category: "compression".into(),
                implementations: compression.iter().map(|s| s.to_string()).collect(),
            }],
        }
    }

    async fn run(
        client: SupportedProtocols,
        server: SupportedProtocols,
    ) -> (
        Result<ProtocolStack, NegotiationError>,
        Result<ProtocolStack, NegotiationError>,
    ) {
        let (mut client_end, mut server_end) = tokio::io::duplex(4096);
        let server_task = tokio::spawn(async move { handshake::accept(server, &mut server_end).await });
        let client_result = handshake::initiate(&client, &mut client_end).await;
        drop(client_end);
        let server_result = server_task.await.unwrap();
        (client_result, server_result)
    }

    #[tokio::test]
    async fn both_ends_agree_on_the_stack() {
        let client = supported(&[1, 2], &["Snappy", "LZ4"]);
        let server = supported(&[1], &["LZ4", "Snappy"]);
        let expected = handshake::negotiate(&client, &server).unwrap();

        let (client_stack, server_stack) = run(client, server).await;
        let client_stack = client_stack.unwrap();
        assert_eq!(client_stack, server_stack.unwrap());
        assert_eq!(client_stack, expected);
        assert_eq!(client_stack.application, ApplicationProtocol::raft(1));
        assert_eq!(client_stack.modifiers, vec![ModifierProtocol::new("compression", "LZ4")]);
    }

    #[tokio::test]
    async fn no_common_modifier_still_connects() {
        let (client_stack, server_stack) = run(supported(&[1], &["Snappy"]), supported(&[1], &["LZ4"])).await;
        assert!(client_stack.unwrap().modifiers.is_empty());
        assert!(server_stack.unwrap().modifiers.is_empty());
    }

    #[tokio::test]
    async fn peer_without_modifiers_still_connects() {
        let defaults = SupportedProtocols::default();
        let (client_stack, server_stack) = run(defaults.clone(), defaults.without_modifiers()).await;
        let client_stack = client_stack.unwrap();
        assert!(client_stack.modifiers.is_empty());
        assert_eq!(client_stack, server_stack.unwrap());
    }

    #[tokio::test]
    async fn no_common_version_aborts_both_ends() {
        let (client_stack, server_stack) = run(supported(&[2], &[]), supported(&[1], &[])).await;
        assert!(matches!(client_stack, Err(NegotiationError::Refused(_))));
        assert!(matches!(
            server_stack,
            Err(NegotiationError::NoCommonApplicationProtocol { .. })
        ));
    }

    #[tokio::test]
    async fn negotiated_stack_carries_raft_traffic() {
        let (mut client_end, mut server_end) = tokio::io::duplex(64 * 1024);
        let server = tokio::spawn(async move {
            let stack = handshake::accept(SupportedProtocols::default(), &mut server_end)
                .await
                .unwrap();
            let pipeline = Pipeline::new(stack, 1024).unwrap();
            let frame = framing::read_frame(&mut server_end, pipeline.max_frame())
                .await
                .unwrap()
                .unwrap();
            pipeline.inbound(&frame).unwrap()
        });

        let stack = handshake::initiate(&SupportedProtocols::default(), &mut client_end)
            .await
            .unwrap();
        let pipeline = Pipeline::new(stack, 1024).unwrap();
        let message = ClusterIdAwareMessage::new(CLUSTER, append(3));
        let mut out = BytesMut::new();
        pipeline.outbound(&message, &mut out).unwrap();
        tokio::io::AsyncWriteExt::write_all(&mut client_end, &out).await.unwrap();

        assert_eq!(server.await.unwrap(), DecodedMessage::Message(message));
    }
}
