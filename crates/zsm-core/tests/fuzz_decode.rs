use proptest::prelude::*;
use rand::{thread_rng, Rng};
use zsm_core::{FrameBuffer, Packet, PacketError, PacketType, SIGNATURE_SIZE};

#[test]
fn fuzz_decode_packet_never_panics() {
    let mut rng = thread_rng();
    for _ in 0..10_000 {
        let len: usize = rng.gen_range(0..2048);
        let mut data = vec![0u8; len];
        rng.fill(&mut data[..]);
        let _ = Packet::decode(&data);
    }
}

#[test]
fn fuzz_frame_buffer_never_panics() {
    let mut rng = thread_rng();
    for _ in 0..1_000 {
        let mut frames = FrameBuffer::new();
        let len: usize = rng.gen_range(0..4096);
        let mut data = vec![0u8; len];
        rng.fill(&mut data[..]);
        frames.extend_from_slice(&data);
        while let Ok(Some(frame)) = frames.next_frame() {
            let _ = frame.packet();
        }
    }
}

#[test]
fn random_mutation_of_valid_packet_is_handled() {
    let mut rng = thread_rng();
    let packet = Packet::new(PacketType::Message, vec![0xAB; 120], [1u8; SIGNATURE_SIZE])
        .unwrap()
        .encode()
        .to_vec();

    for _ in 0..1_000 {
        let mut mutated = packet.clone();
        let flip_count = rng.gen_range(1..6);
        for _ in 0..flip_count {
            let idx = rng.gen_range(0..mutated.len());
            mutated[idx] ^= rng.gen::<u8>();
        }
        let _ = Packet::decode(&mutated);
    }
}

proptest! {
    #[test]
    fn short_buffers_are_truncated(payload in proptest::collection::vec(any::<u8>(), 1..512), cut in 0usize..1000) {
        let encoded = Packet::new(PacketType::Message, payload, [0u8; SIGNATURE_SIZE])
            .unwrap()
            .encode();
        let cut = cut % encoded.len();

        let result = Packet::decode(&encoded[..cut]);
        let is_truncated = matches!(result, Err(PacketError::Truncated { .. }));
        prop_assert!(is_truncated);
    }

    #[test]
    fn frames_survive_arbitrary_chunking(
        payloads in proptest::collection::vec(proptest::collection::vec(any::<u8>(), 1..300), 1..8),
        chunk in 1usize..97,
    ) {
        let mut stream = Vec::new();
        for payload in &payloads {
            let packet = Packet::new(PacketType::Message, payload.clone(), [3u8; SIGNATURE_SIZE]).unwrap();
            stream.extend_from_slice(&packet.encode());
        }

        let mut frames = FrameBuffer::new();
        let mut received = Vec::new();
        for piece in stream.chunks(chunk) {
            frames.extend_from_slice(piece);
            while let Some(frame) = frames.next_frame().unwrap() {
                received.push(frame.packet().unwrap().payload.to_vec());
            }
        }

        prop_assert_eq!(received, payloads);
        prop_assert_eq!(frames.pending(), 0);
    }
}
