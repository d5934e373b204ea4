// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Synchronous poll-and-fetch: presence gates, ordering, per-tick failures.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use framegate::core::{ChannelOutcome, ChannelOutput, GraphRunnerConfig, Solution};
use framegate::{
    FaceMesh, FaceMeshValue, GraphError, GraphRunner, NormalizedLandmarkList, NormalizedRect,
    OutputListener, OutputValue, PacketPayload, PayloadKind, Result, RunningMode, ScriptedEngine,
    SidePackets, Timestamp,
};

const POLL_TIMEOUT: Duration = Duration::from_millis(250);

#[derive(Default)]
struct Recorder {
    outputs: Vec<ChannelOutput>,
}

impl OutputListener for Recorder {
    fn on_output(&mut self, output: &ChannelOutput) -> Result<()> {
        self.outputs.push(output.clone());
        Ok(())
    }
}

fn runner_with_timeout(engine: &Arc<ScriptedEngine>) -> GraphRunner {
    GraphRunner::with_config(
        engine.clone(),
        GraphRunnerConfig {
            poll_timeout: Some(POLL_TIMEOUT),
            ..Default::default()
        },
    )
}

fn rect() -> NormalizedRect {
    NormalizedRect {
        x_center: 0.5,
        y_center: 0.5,
        width: 0.25,
        height: 0.25,
        rotation: 0.0,
        rect_id: Some(1),
    }
}

#[test]
fn test_gate_false_three_times_then_true_yields_one_event() {
    let engine = Arc::new(ScriptedEngine::new());
    let mut runner = runner_with_timeout(&engine);
    runner
        .add_gated_output("rect_presence", &[("rects", PayloadKind::Rects)])
        .unwrap();

    let recorder = Arc::new(Mutex::new(Recorder::default()));
    let listener: Arc<Mutex<dyn OutputListener>> = recorder.clone();
    runner.subscribe("rects", &listener);
    runner.start(RunningMode::Sync, &SidePackets::new()).unwrap();

    for t in 0..3 {
        engine.emit_value("rect_presence", Timestamp(t), OutputValue::Bool(false));
    }
    engine.emit_value("rect_presence", Timestamp(3), OutputValue::Bool(true));
    engine.emit_value("rects", Timestamp(3), OutputValue::Rects(vec![rect()]));

    for _ in 0..3 {
        let tick = runner.fetch_next().unwrap();
        assert_eq!(tick.get("rects").unwrap().outcome, ChannelOutcome::Absent);
        assert!(tick.is_empty());
    }
    // No value packet was consumed while the gate read false.
    assert_eq!(engine.poll_count("rects"), 0);
    assert_eq!(engine.poll_count("rect_presence"), 3);

    let tick = runner.fetch_next().unwrap();
    assert_eq!(tick.rects("rects"), Some(&[rect()][..]));
    assert_eq!(engine.poll_count("rects"), 1);

    let recorded = &recorder.lock().outputs;
    assert_eq!(recorded.len(), 1);
    assert_eq!(
        recorded[0].outcome,
        ChannelOutcome::Present(OutputValue::Rects(vec![rect()]))
    );
}

#[test]
fn test_unreadable_gate_is_reported_and_pairing_recovers() {
    let engine = Arc::new(ScriptedEngine::new());
    let mut runner = runner_with_timeout(&engine);
    runner
        .add_gated_output("rect_presence", &[("rects", PayloadKind::Rects)])
        .unwrap();
    runner.start(RunningMode::Sync, &SidePackets::new()).unwrap();

    engine.emit(
        "rect_presence",
        Timestamp(1),
        Some(PacketPayload::Encoded {
            kind: PayloadKind::Bool,
            bytes: vec![0xc1],
        }),
    );
    engine.emit_value("rects", Timestamp(1), OutputValue::Rects(vec![]));
    engine.emit_value("rect_presence", Timestamp(2), OutputValue::Bool(true));
    engine.emit_value("rects", Timestamp(2), OutputValue::Rects(vec![rect()]));

    let broken = runner.fetch_next().unwrap();
    let failures: Vec<_> = broken.decode_failures().map(|(channel, _)| channel).collect();
    assert_eq!(failures, ["rect_presence"]);
    assert_eq!(broken.get("rect_presence").unwrap().timestamp, Some(Timestamp(1)));
    assert_eq!(broken.get("rects").unwrap().outcome, ChannelOutcome::Absent);
    assert_eq!(engine.poll_count("rects"), 0);

    // The value left behind at t=1 must not be handed out for t=2.
    let healthy = runner.fetch_next().unwrap();
    let rects = healthy.get("rects").unwrap();
    assert_eq!(rects.timestamp, Some(Timestamp(2)));
    assert_eq!(healthy.rects("rects"), Some(&[rect()][..]));
    assert_eq!(healthy.decode_failures().count(), 0);
}

#[test]
fn test_gate_true_without_value_times_out() {
    let engine = Arc::new(ScriptedEngine::new());
    let mut runner = runner_with_timeout(&engine);
    runner
        .add_gated_output("rect_presence", &[("rects", PayloadKind::Rects)])
        .unwrap();
    runner.start(RunningMode::Sync, &SidePackets::new()).unwrap();

    engine.emit_value("rect_presence", Timestamp(0), OutputValue::Bool(true));
    let err = runner.fetch_next().unwrap_err();
    assert!(matches!(err, GraphError::PollTimeout { ref channel, .. } if channel == "rects"));
}

#[test]
fn test_face_mesh_fetches_in_registration_order() {
    let engine = Arc::new(ScriptedEngine::new());
    let mut runner = runner_with_timeout(&engine);
    FaceMesh::new(2).register_outputs(&mut runner).unwrap();
    runner.start(RunningMode::Sync, &SidePackets::new()).unwrap();

    let landmarks = vec![NormalizedLandmarkList::default(); 2];
    engine.emit_value(FaceMesh::FACE_DETECTIONS_PRESENCE, Timestamp(0), OutputValue::Bool(false));
    engine.emit_value(FaceMesh::MULTI_FACE_LANDMARKS_PRESENCE, Timestamp(0), OutputValue::Bool(true));
    engine.emit_value(
        FaceMesh::MULTI_FACE_LANDMARKS,
        Timestamp(0),
        OutputValue::LandmarkLists(landmarks.clone()),
    );
    engine.emit_value(
        FaceMesh::FACE_RECTS_FROM_LANDMARKS,
        Timestamp(0),
        OutputValue::Rects(vec![rect(), rect()]),
    );

    let tick = runner.fetch_next().unwrap();
    let channels: Vec<_> = tick.outputs.iter().map(|o| o.channel.as_str()).collect();
    assert_eq!(
        channels,
        [
            FaceMesh::FACE_DETECTIONS,
            FaceMesh::MULTI_FACE_LANDMARKS,
            FaceMesh::FACE_RECTS_FROM_LANDMARKS
        ]
    );

    let value = FaceMeshValue::from_tick(&tick);
    assert!(value.face_detections.is_empty());
    assert_eq!(value.multi_face_landmarks, landmarks);
    assert_eq!(value.face_rects_from_landmarks.len(), 2);
    assert_eq!(engine.poll_count(FaceMesh::FACE_DETECTIONS), 0);
}

#[test]
fn test_decode_failure_is_per_tick() {
    let engine = Arc::new(ScriptedEngine::new());
    let mut runner = runner_with_timeout(&engine);
    runner.add_output("rects", PayloadKind::Rects).unwrap();
    runner.start(RunningMode::Sync, &SidePackets::new()).unwrap();

    engine.emit(
        "rects",
        Timestamp(0),
        Some(PacketPayload::Encoded {
            kind: PayloadKind::Rects,
            bytes: vec![0xc1],
        }),
    );
    engine.emit(
        "rects",
        Timestamp(1),
        Some(OutputValue::Rects(vec![rect()]).encode().unwrap()),
    );

    let broken = runner.fetch_next().unwrap();
    assert_eq!(broken.decode_failures().count(), 1);

    let healthy = runner.fetch_next().unwrap();
    assert_eq!(healthy.rects("rects").map(<[_]>::len), Some(1));
    assert_eq!(healthy.timestamp(), Some(Timestamp(1)));
}

#[test]
fn test_engine_closing_a_channel_is_clean_termination() {
    let engine = Arc::new(ScriptedEngine::new());
    let mut runner = runner_with_timeout(&engine);
    runner
        .add_gated_output("rect_presence", &[("rects", PayloadKind::Rects)])
        .unwrap();
    runner.start(RunningMode::Sync, &SidePackets::new()).unwrap();

    engine.close_output("rect_presence");
    let err = runner.fetch_next().unwrap_err();
    assert!(err.is_clean_termination());
    runner.stop().unwrap();
}
