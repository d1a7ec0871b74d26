//! End-to-end engine scenarios: fast paths, inference routing, reassembly,
//! batching, and the timed flush.

use std::sync::atomic::Ordering;
use std::time::Duration;

use corral_lib::alignments::{CigarOp, CorrectionAlignments};
use corral_lib::engine::CorrectionEngine;

use crate::helpers::{
    overlap, run_engine, simple_message, source_from, test_config, test_model, Script,
    ScriptedFactory,
};

/// Zero overlaps: both windows are trivial and the output is the target
/// sequence, untouched, without any backend call.
#[test]
fn test_no_overlaps_outputs_target() {
    let source = source_from(&[("read", b"ACGTACGTAC")]);
    let factory = ScriptedFactory::new(Script::Majority);
    let message = CorrectionAlignments::new("read".to_string(), vec![], vec![], vec![]);

    let outputs = run_engine(vec![message], source, &factory, 5, 4).unwrap();

    assert_eq!(outputs.len(), 1);
    assert_eq!(outputs[0].name, "read");
    assert_eq!(outputs[0].seq, "ACGTACGTAC");
    assert_eq!(factory.calls.load(Ordering::SeqCst), 0, "trivial reads must skip inference");
}

/// A perfect full-length overlap: two aligned rows but no disagreement, so
/// both windows stay trivial and the read completes on the fast path.
#[test]
fn test_perfect_overlap_is_trivial() {
    let source = source_from(&[("t", b"ACGTACGT"), ("q", b"ACGTACGT")]);
    let factory = ScriptedFactory::new(Script::Majority);

    let outputs =
        run_engine(vec![simple_message("t", "q", 8)], source, &factory, 4, 4).unwrap();

    assert_eq!(outputs.len(), 1);
    assert_eq!(outputs[0].seq, "ACGTACGT");
    assert_eq!(factory.calls.load(Ordering::SeqCst), 0);
}

/// One window disagrees and goes through inference; the other is trivial.
/// The backend votes 'A' for the disputed position, so the target survives.
#[test]
fn test_mixed_trivial_and_inferred_windows() {
    let source = source_from(&[("t", b"AAAACCCC"), ("q", b"AACA")]);
    let factory = ScriptedFactory::new(Script::Constant(0));
    let message = CorrectionAlignments::new(
        "t".to_string(),
        vec!["q".to_string()],
        vec![overlap(0, 4, 0, 4, 4, 8)],
        vec![vec![CigarOp::Match(4)]],
    );

    let outputs = run_engine(vec![message], source, &factory, 4, 4).unwrap();

    assert_eq!(outputs.len(), 1);
    assert_eq!(outputs[0].name, "t");
    assert_eq!(outputs[0].seq, "AAAACCCC");
    assert_eq!(factory.calls.load(Ordering::SeqCst), 1);
}

/// The majority backend fixes a position where every query disagrees with
/// the target.
#[test]
fn test_majority_vote_corrects_target_error() {
    let source =
        source_from(&[("t", b"AAGA"), ("q1", b"AACA"), ("q2", b"AACA"), ("q3", b"AACA")]);
    let factory = ScriptedFactory::new(Script::Majority);
    let message = CorrectionAlignments::new(
        "t".to_string(),
        vec!["q1".to_string(), "q2".to_string(), "q3".to_string()],
        vec![overlap(0, 4, 0, 4, 4, 4); 3],
        vec![vec![CigarOp::Match(4)]; 3],
    );

    let outputs = run_engine(vec![message], source, &factory, 4, 4).unwrap();

    assert_eq!(outputs.len(), 1);
    assert_eq!(outputs[0].seq, "AACA");
}

/// An empty middle window splits the read into suffixed sub-sequences.
#[test]
fn test_empty_window_splits_read() {
    // Window 1 (positions 4..8) fully disagrees; the scripted backend deletes
    // every supported column, decoding that window to the empty string.
    let source = source_from(&[("read", b"GGGGAAAAGGGG"), ("q", b"CCCC")]);
    let factory = ScriptedFactory::new(Script::Constant(4));
    let message = CorrectionAlignments::new(
        "read".to_string(),
        vec!["q".to_string()],
        vec![overlap(4, 8, 0, 4, 4, 12)],
        vec![vec![CigarOp::Match(4)]],
    );

    let outputs = run_engine(vec![message], source, &factory, 4, 4).unwrap();

    assert_eq!(outputs.len(), 2);
    assert_eq!(outputs[0].name, "read:0");
    assert_eq!(outputs[0].seq, "GGGG");
    assert_eq!(outputs[1].name, "read:1");
    assert_eq!(outputs[1].seq, "GGGG");
}

/// Wide windows claim multiple batch slots: two 12000-column windows at
/// batch size 4 cannot share a batch, forcing a flush between them.
#[test]
fn test_wide_windows_force_batch_flush() {
    let tlen = 24_000u32;
    let target = vec![b'A'; tlen as usize];
    let query = vec![b'C'; tlen as usize];
    let source = source_from(&[("t", &target), ("q", &query)]);
    let factory = ScriptedFactory::new(Script::Constant(0));
    let message = CorrectionAlignments::new(
        "t".to_string(),
        vec!["q".to_string()],
        vec![overlap(0, tlen, 0, tlen, tlen, tlen)],
        vec![vec![CigarOp::Match(tlen)]],
    );

    let outputs = run_engine(vec![message], source, &factory, 12_000, 4).unwrap();

    // One flush forced by the slot budget, one on termination.
    assert_eq!(factory.calls.load(Ordering::SeqCst), 2);
    assert_eq!(outputs.len(), 1);
    assert_eq!(outputs[0].seq.len(), tlen as usize);
    assert!(outputs[0].seq.bytes().all(|b| b == b'A'));
}

/// With no further input, a partial batch flushes after the 10-second pop
/// deadline and the read completes without termination.
#[test]
fn test_timed_flush_completes_read() {
    let source = source_from(&[("t", b"AAAAAAAA"), ("q", b"CCCCCCCC")]);
    let factory = ScriptedFactory::new(Script::Constant(0));
    let message = CorrectionAlignments::new(
        "t".to_string(),
        vec!["q".to_string()],
        vec![overlap(0, 8, 0, 8, 8, 8)],
        vec![vec![CigarOp::Match(8)]],
    );

    let (sink, output_rx) = crossbeam_channel::unbounded();
    let mut engine =
        CorrectionEngine::new(&test_config(4), test_model(4), source, &factory, sink).unwrap();
    engine.submit(message).unwrap();

    // Both windows sit in the accumulator until the deadline fires.
    let corrected = output_rx
        .recv_timeout(Duration::from_secs(14))
        .expect("timed flush should deliver the read without terminate()");
    assert_eq!(corrected.name, "t");
    assert_eq!(corrected.seq, "AAAAAAAA");
    assert_eq!(factory.calls.load(Ordering::SeqCst), 1);

    engine.terminate().unwrap();
}

/// A duplicate read name mid-flight is dropped; the first occurrence
/// completes normally.
#[test]
fn test_duplicate_read_name_dropped() {
    let source = source_from(&[("t", b"AAAA"), ("q", b"AACA")]);
    let factory = ScriptedFactory::new(Script::Constant(0));
    let message = || {
        CorrectionAlignments::new(
            "t".to_string(),
            vec!["q".to_string()],
            vec![overlap(0, 4, 0, 4, 4, 4)],
            vec![vec![CigarOp::Match(4)]],
        )
    };

    // The single input worker registers the first message and then sees the
    // duplicate while the first is still pending inference.
    let outputs =
        run_engine(vec![message(), message()], source, &factory, 4, 4).unwrap();

    assert_eq!(outputs.len(), 1);
    assert_eq!(outputs[0].name, "t");
    assert_eq!(outputs[0].seq, "AAAA");
}

/// Multiple reads interleave through the pipeline and all complete.
#[test]
fn test_many_reads_complete() {
    let target = b"ACGTACGTACGTACGT";
    let mut reads: Vec<(String, Vec<u8>)> =
        vec![("q".to_string(), b"ACGA".to_vec())];
    for i in 0..20 {
        reads.push((format!("t{i}"), target.to_vec()));
    }
    let read_refs: Vec<(&str, &[u8])> =
        reads.iter().map(|(n, s)| (n.as_str(), s.as_slice())).collect();
    let source = source_from(&read_refs);

    let factory = ScriptedFactory::new(Script::Majority);
    let messages = (0..20)
        .map(|i| {
            CorrectionAlignments::new(
                format!("t{i}"),
                vec!["q".to_string()],
                vec![overlap(0, 4, 0, 4, 4, 16)],
                vec![vec![CigarOp::Match(4)]],
            )
        })
        .collect();

    let outputs = run_engine(messages, source, &factory, 8, 4).unwrap();
    assert_eq!(outputs.len(), 20);
    for output in &outputs {
        // A lone disagreeing row cannot outvote the target base at coverage
        // one; either way the read must come back full length.
        assert_eq!(output.seq.len(), 16);
    }
}

/// Malformed messages are dropped while the pipeline keeps running.
#[test]
fn test_malformed_message_dropped_pipeline_continues() {
    let source = source_from(&[("good", b"ACGT"), ("bad", b"ACGT"), ("q", b"ACGT")]);
    let factory = ScriptedFactory::new(Script::Majority);

    // The bad message claims a query length that disagrees with the source.
    let bad = CorrectionAlignments::new(
        "bad".to_string(),
        vec!["q".to_string()],
        vec![overlap(0, 4, 0, 4, 8, 4)],
        vec![vec![CigarOp::Match(4)]],
    );
    let good = simple_message("good", "q", 4);

    let outputs = run_engine(vec![bad, good], source, &factory, 4, 4).unwrap();

    assert_eq!(outputs.len(), 1);
    assert_eq!(outputs[0].name, "good");
}

/// Unknown reads referenced by a message drop that message only.
#[test]
fn test_missing_query_read_dropped() {
    let source = source_from(&[("t", b"ACGT")]);
    let factory = ScriptedFactory::new(Script::Majority);
    let message = simple_message("t", "ghost", 4);

    let outputs = run_engine(vec![message], source, &factory, 4, 4).unwrap();
    assert!(outputs.is_empty());
}
