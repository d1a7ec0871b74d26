//! Shutdown, error propagation, and stats behavior of the engine.

use std::sync::atomic::Ordering;

use corral_lib::alignments::{CigarOp, CorrectionAlignments};
use corral_lib::engine::{CorrectionConfig, CorrectionEngine};

use crate::helpers::{
    overlap, run_engine, source_from, test_config, test_model, Script, ScriptedFactory,
};

fn disagreeing_message(tname: &str) -> CorrectionAlignments {
    CorrectionAlignments::new(
        tname.to_string(),
        vec!["q".to_string()],
        vec![overlap(0, 4, 0, 4, 4, 4)],
        vec![vec![CigarOp::Match(4)]],
    )
}

/// Terminating an idle engine joins every pool without producing output.
#[test]
fn test_terminate_idle_engine() {
    let source = source_from(&[("t", b"ACGT")]);
    let factory = ScriptedFactory::new(Script::Majority);
    let (sink, output_rx) = crossbeam_channel::unbounded();

    let mut engine =
        CorrectionEngine::new(&test_config(4), test_model(4), source, &factory, sink).unwrap();
    engine.terminate().unwrap();

    assert!(engine.submit(disagreeing_message("t")).is_err(), "submit after terminate fails");
    drop(engine);
    assert!(output_rx.iter().next().is_none());
}

/// terminate() is idempotent and flushes work accepted beforehand.
#[test]
fn test_terminate_twice() {
    let source = source_from(&[("t", b"AAAA"), ("q", b"AACA")]);
    let factory = ScriptedFactory::new(Script::Constant(0));
    let (sink, output_rx) = crossbeam_channel::unbounded();

    let mut engine =
        CorrectionEngine::new(&test_config(4), test_model(4), source, &factory, sink).unwrap();
    engine.submit(disagreeing_message("t")).unwrap();
    engine.terminate().unwrap();
    engine.terminate().unwrap();
    drop(engine);

    let outputs: Vec<_> = output_rx.iter().collect();
    assert_eq!(outputs.len(), 1);
}

/// A transient backend failure is retried once after a cache clear, and the
/// batch still completes.
#[test]
fn test_transient_backend_failure_retried() {
    let source = source_from(&[("t", b"AAAA"), ("q", b"AACA")]);
    let factory = ScriptedFactory::new(Script::TransientOnce(0));

    let outputs =
        run_engine(vec![disagreeing_message("t")], source, &factory, 4, 4).unwrap();

    assert_eq!(outputs.len(), 1);
    assert_eq!(outputs[0].seq, "AAAA");
    assert_eq!(factory.calls.load(Ordering::SeqCst), 2, "initial call plus one retry");
    assert_eq!(factory.cache_clears.load(Ordering::SeqCst), 1);
}

/// A second consecutive backend failure is fatal and surfaces from
/// terminate().
#[test]
fn test_repeated_backend_failure_is_fatal() {
    let source = source_from(&[("t", b"AAAA"), ("q", b"AACA")]);
    let factory = ScriptedFactory::new(Script::AlwaysTransient);
    let (sink, _output_rx) = crossbeam_channel::unbounded();

    let mut engine =
        CorrectionEngine::new(&test_config(4), test_model(4), source, &factory, sink).unwrap();
    engine.submit(disagreeing_message("t")).unwrap();

    let err = engine.terminate().expect_err("repeated backend failure must propagate");
    assert!(format!("{err:#}").contains("retry"), "unexpected error: {err:#}");
    assert_eq!(factory.cache_clears.load(Ordering::SeqCst), 1);
}

/// Requesting an unknown device fails at startup.
#[test]
fn test_unknown_device_fatal_at_startup() {
    let source = source_from(&[("t", b"ACGT")]);
    let factory = ScriptedFactory::new(Script::Majority);
    let (sink, _output_rx) = crossbeam_channel::unbounded();

    let config = CorrectionConfig {
        device: "cuda:all".to_string(),
        threads: 1,
        infer_threads: 2,
        batch_size: 4,
    };
    let err = CorrectionEngine::new(&config, test_model(4), source, &factory, sink)
        .expect_err("empty device enumeration must be fatal");
    assert!(err.to_string().contains("cuda:all"));
}

/// Batch size 0 auto-sizes from the factory.
#[test]
fn test_auto_batch_size() {
    let source = source_from(&[("t", b"AAAA"), ("q", b"AACA")]);
    let factory = ScriptedFactory::new(Script::Constant(0));

    let outputs = run_engine(vec![disagreeing_message("t")], source, &factory, 4, 0).unwrap();
    assert_eq!(outputs.len(), 1);
}

/// Engine counters reflect the work done.
#[test]
fn test_sample_stats() {
    let source = source_from(&[
        ("trivial", b"ACGT"),
        ("inferred", b"AAAA"),
        ("q", b"AACA"),
    ]);
    let factory = ScriptedFactory::new(Script::Constant(0));
    let (sink, output_rx) = crossbeam_channel::unbounded();

    let mut engine =
        CorrectionEngine::new(&test_config(4), test_model(4), source, &factory, sink).unwrap();
    engine
        .submit(CorrectionAlignments::new("trivial".to_string(), vec![], vec![], vec![]))
        .unwrap();
    engine.submit(disagreeing_message("inferred")).unwrap();
    engine.terminate().unwrap();

    let stats = engine.sample_stats();
    assert_eq!(stats.num_reads_corrected, 2);
    assert_eq!(stats.num_early_reads, 1);
    assert_eq!(stats.total_reads_in_input, 3);
    assert_eq!(stats.features_queue_depth, 0);
    assert_eq!(stats.inferred_queue_depth, 0);

    drop(engine);
    assert_eq!(output_rx.iter().count(), 2);
}

/// Several input workers and a deeper message stream still deliver exactly
/// one output per read.
#[test]
fn test_multithreaded_input_workers() {
    let mut entries: Vec<(String, Vec<u8>)> = vec![("q".to_string(), b"AACA".to_vec())];
    for i in 0..50 {
        entries.push((format!("t{i}"), b"AAAA".to_vec()));
    }
    let refs: Vec<(&str, &[u8])> =
        entries.iter().map(|(n, s)| (n.as_str(), s.as_slice())).collect();
    let source = source_from(&refs);

    let factory = ScriptedFactory::new(Script::Constant(0));
    let (sink, output_rx) = crossbeam_channel::unbounded();
    let config = CorrectionConfig {
        device: "cpu".to_string(),
        threads: 4,
        infer_threads: 1,
        batch_size: 4,
    };

    let mut engine =
        CorrectionEngine::new(&config, test_model(4), source, &factory, sink).unwrap();
    for i in 0..50 {
        engine.submit(disagreeing_message(&format!("t{i}"))).unwrap();
    }
    engine.terminate().unwrap();
    drop(engine);

    let mut names: Vec<String> = output_rx.iter().map(|r| r.name).collect();
    names.sort();
    names.dedup();
    assert_eq!(names.len(), 50, "every read completes exactly once");
}
