use assert_matches::assert_matches;

use descgen::domain::{Chunk, ChunkStatus, PipelineState, normalize_description};
use descgen::error::DescError;

const ALL: [ChunkStatus; 5] = [
    ChunkStatus::Pending,
    ChunkStatus::Submitted,
    ChunkStatus::InProgress,
    ChunkStatus::Ended,
    ChunkStatus::Merged,
];

#[test]
fn transitions_only_move_forward() {
    for from in ALL {
        for to in ALL {
            if from.can_advance_to(to) {
                assert!(to > from, "{from} -> {to} goes backwards");
            }
        }
    }
    assert!(ChunkStatus::Submitted.can_advance_to(ChunkStatus::Ended));
    assert!(!ChunkStatus::Pending.can_advance_to(ChunkStatus::Ended));
    assert!(!ChunkStatus::Merged.can_advance_to(ChunkStatus::Merged));
}

#[test]
fn advance_ignores_backward_moves() {
    let mut chunk = Chunk::new(0, "data/.desc-batch-0.jsonl".into(), 3);
    assert!(chunk.advance(ChunkStatus::Submitted));
    assert!(chunk.advance(ChunkStatus::Ended));
    assert!(!chunk.advance(ChunkStatus::InProgress));
    assert!(!chunk.advance(ChunkStatus::Submitted));
    assert_eq!(chunk.status, ChunkStatus::Ended);
    assert!(chunk.advance(ChunkStatus::Merged));
    assert!(!chunk.advance(ChunkStatus::Ended));
}

#[test]
fn status_strings_round_trip() {
    for status in ALL {
        assert_eq!(status.as_str().parse::<ChunkStatus>().unwrap(), status);
    }
    assert_matches!(
        "cancelled".parse::<ChunkStatus>(),
        Err(DescError::StateCorrupt(_))
    );
}

#[test]
fn completion_needs_a_submitted_chunk() {
    let mut state = PipelineState::new(
        "m",
        vec![
            Chunk::new(0, "a".into(), 1),
            Chunk::new(1, "b".into(), 1),
        ],
    );
    assert!(!state.all_submitted_settled());

    state.chunks[0].batch_id = Some("msgbatch_0".to_string());
    state.chunks[0].status = ChunkStatus::Submitted;
    assert!(!state.all_submitted_settled());

    state.chunks[0].status = ChunkStatus::Ended;
    assert!(state.all_submitted_settled());
}

#[test]
fn normalization_examples() {
    assert_eq!(normalize_description("  Sells shoes  "), "Sells shoes.");
    assert_eq!(normalize_description("Wow!"), "Wow!");
    assert_eq!(normalize_description("Line one\n line two"), "Line one line two.");
    assert_eq!(normalize_description("   "), "");
}
