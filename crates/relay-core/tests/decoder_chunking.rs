//! Integration tests for the relay-core frame decoder.
//!
//! A TCP stream may deliver the same bytes in any grouping.  These tests
//! assert that the frames produced never depend on how the input was split,
//! and that a file payload is carried through the decoder byte-for-byte.

use proptest::prelude::*;
use relay_core::{encode_chat, encode_file_header, encode_user, DecoderMode, Frame, FrameDecoder};

/// Decodes `stream` after cutting it at every offset in `cuts`.
fn decode_split(stream: &[u8], cuts: &[usize]) -> Vec<Frame> {
    let mut points: Vec<usize> = cuts.iter().map(|c| c % (stream.len() + 1)).collect();
    points.sort_unstable();
    points.dedup();

    let mut decoder = FrameDecoder::new();
    let mut frames = Vec::new();
    let mut start = 0;
    for point in points.into_iter().chain(std::iter::once(stream.len())) {
        frames.extend(decoder.feed(&stream[start..point]));
        start = point;
    }
    frames
}

/// Merges adjacent binary chunks so that payloads can be compared regardless
/// of how the decoder sliced them.
fn coalesce(frames: Vec<Frame>) -> Vec<Frame> {
    let mut merged: Vec<Frame> = Vec::new();
    for frame in frames {
        match (merged.last_mut(), frame) {
            (Some(Frame::BinaryChunk { bytes: acc }), Frame::BinaryChunk { bytes }) => {
                acc.extend_from_slice(&bytes)
            }
            (_, frame) => merged.push(frame),
        }
    }
    merged
}

fn sample_stream(payload: &[u8]) -> Vec<u8> {
    let mut stream = Vec::new();
    stream.extend(encode_user("Alice").unwrap());
    stream.extend(encode_chat("Alice", "hello | world").unwrap());
    stream.extend(encode_file_header("notes.txt", payload.len() as u64, Some("Alice")).unwrap());
    stream.extend_from_slice(payload);
    stream.extend(b"Bob left.\n");
    stream.extend(encode_chat("Alice", "bye").unwrap());
    stream
}

#[test]
fn test_full_conversation_decodes_in_order() {
    // Arrange
    let payload = b"line one\nUSER|not-a-frame\n".to_vec();
    let stream = sample_stream(&payload);

    // Act
    let frames = coalesce(FrameDecoder::new().feed(&stream).collect());

    // Assert
    assert_eq!(
        frames,
        vec![
            Frame::UserAnnounce {
                name: "Alice".to_string()
            },
            Frame::ChatMessage {
                sender_name: "Alice".to_string(),
                text: "hello | world".to_string()
            },
            Frame::FileHeader {
                file_name: "notes.txt".to_string(),
                size: payload.len() as u64,
                sender_name: Some("Alice".to_string())
            },
            Frame::BinaryChunk { bytes: payload },
            Frame::Unknown {
                raw: "Bob left.".to_string()
            },
            Frame::ChatMessage {
                sender_name: "Alice".to_string(),
                text: "bye".to_string()
            },
        ]
    );
}

#[test]
fn test_large_payload_in_network_sized_reads() {
    // Arrange – 500 000 bytes, delivered in 4 096-byte reads.
    let payload: Vec<u8> = (0..500_000u32).map(|i| (i % 251) as u8).collect();
    let mut stream = encode_file_header("big.bin", payload.len() as u64, None).unwrap();
    stream.extend_from_slice(&payload);

    // Act
    let mut decoder = FrameDecoder::new();
    let mut received = Vec::new();
    let mut headers = 0;
    for read in stream.chunks(4096) {
        for frame in decoder.feed(read) {
            match frame {
                Frame::FileHeader { .. } => headers += 1,
                Frame::BinaryChunk { bytes } => received.extend_from_slice(&bytes),
                other => panic!("unexpected frame {other:?}"),
            }
        }
    }

    // Assert
    assert_eq!(headers, 1);
    assert_eq!(received, payload);
    assert_eq!(decoder.mode(), DecoderMode::Text);
}

proptest! {
    #[test]
    fn test_frames_do_not_depend_on_read_boundaries(
        payload in proptest::collection::vec(any::<u8>(), 0..512),
        cuts in proptest::collection::vec(any::<usize>(), 0..16),
    ) {
        let stream = sample_stream(&payload);

        let whole = coalesce(FrameDecoder::new().feed(&stream).collect());
        let split = coalesce(decode_split(&stream, &cuts));

        prop_assert_eq!(whole, split);
    }

    #[test]
    fn test_binary_chunks_never_exceed_declared_size(
        size in 1u64..2048,
        extra in proptest::collection::vec(any::<u8>(), 0..64),
        cuts in proptest::collection::vec(any::<usize>(), 0..8),
    ) {
        let mut stream = encode_file_header("f", size, None).unwrap();
        stream.extend(std::iter::repeat(0xAAu8).take(size as usize));
        stream.extend_from_slice(&extra);

        let total: u64 = decode_split(&stream, &cuts)
            .into_iter()
            .map(|frame| match frame {
                Frame::BinaryChunk { bytes } => bytes.len() as u64,
                _ => 0,
            })
            .sum();

        prop_assert_eq!(total, size);
    }
}
