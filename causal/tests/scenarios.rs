use causal::{
    CausalError, Clock, ClockModel, Command, DeliveryEngine, ErrorKind, MatrixClock, MessageId,
    Notification, ReceiveOutcome, RecordingObserver, Script, ScriptRunner, Step, VectorClock,
};
use std::sync::Arc;
use tracing_test::traced_test;

fn vector(counters: &[u64]) -> Clock {
    Clock::Vector(VectorClock::from_counters(counters.to_vec()))
}

fn matrix(rows: &[&[u64]]) -> Clock {
    Clock::Matrix(MatrixClock::from_rows(
        rows.iter()
            .map(|row| VectorClock::from_counters(row.to_vec()))
            .collect(),
    ))
}

fn ids(labels: &[u64]) -> Vec<MessageId> {
    labels.iter().copied().map(MessageId::new).collect()
}

fn engine(model: ClockModel) -> (DeliveryEngine, Arc<RecordingObserver>) {
    let mut engine = DeliveryEngine::with_model(model).unwrap();
    let recorder = RecordingObserver::new();
    engine.subscribe(recorder.clone());
    (engine, recorder)
}

#[test]
fn partial_update_buffers_then_drains() -> anyhow::Result<()> {
    let (mut engine, recorder) = engine(ClockModel::VectorPartial);

    let m0 = engine.send("P1", "m0")?;
    assert_eq!(m0.timestamp(), &vector(&[1, 0, 0]));
    let m1 = engine.send("P1", "m1")?;
    assert_eq!(m1.timestamp(), &vector(&[2, 0, 0]));
    assert_eq!(engine.clock("P1")?, &vector(&[2, 0, 0]));

    assert_eq!(engine.receive("P2", m1.id())?, ReceiveOutcome::Buffered);
    assert_eq!(engine.clock("P2")?, &vector(&[0, 0, 0]));
    assert_eq!(engine.pending("P2")?, vec![m1.id()]);

    let outcome = engine.receive("P2", m0.id())?;
    assert_eq!(outcome, ReceiveOutcome::Delivered { drained: vec![m1.id()] });
    assert_eq!(engine.clock("P2")?, &vector(&[2, 0, 0]));
    assert!(engine.pending("P2")?.is_empty());

    let log = recorder.notifications();
    assert_eq!(
        log,
        vec![
            Notification::Buffered {
                process: "P2".into(),
                message_id: m1.id(),
            },
            Notification::Delivered {
                process: "P2".into(),
                message_id: m0.id(),
                clock: vector(&[1, 0, 0]),
            },
            Notification::Delivered {
                process: "P2".into(),
                message_id: m1.id(),
                clock: vector(&[2, 0, 0]),
            },
        ]
    );

    Ok(())
}

#[test]
fn full_merge_counts_deliveries_as_events() -> anyhow::Result<()> {
    let (mut engine, recorder) = engine(ClockModel::VectorMerge);

    let m0 = engine.send("P1", "m0")?;
    let m1 = engine.send("P1", "m1")?;
    engine.receive("P2", m1.id())?;
    engine.receive("P2", m0.id())?;

    let clocks: Vec<_> = recorder
        .notifications()
        .into_iter()
        .filter_map(|n| match n {
            Notification::Delivered { clock, .. } => Some(clock),
            _ => None,
        })
        .collect();
    assert_eq!(clocks, vec![vector(&[1, 1, 0]), vector(&[2, 2, 0])]);

    // P2's next send carries its delivery events
    let m2 = engine.send("P2", "m2")?;
    assert_eq!(m2.timestamp(), &vector(&[2, 3, 0]));

    Ok(())
}

#[test]
fn matrix_merges_table_and_ticks_diagonal() -> anyhow::Result<()> {
    let (mut engine, recorder) = engine(ClockModel::Matrix);

    let m0 = engine.send("P1", "m0")?;
    let m1 = engine.send("P1", "m1")?;
    assert_eq!(m1.timestamp(), &matrix(&[&[2, 0, 0], &[0, 0, 0], &[0, 0, 0]]));

    assert_eq!(engine.receive("P2", m1.id())?, ReceiveOutcome::Buffered);
    engine.receive("P2", m0.id())?;

    let first = recorder
        .notifications()
        .into_iter()
        .find_map(|n| match n {
            Notification::Delivered {
                message_id, clock, ..
            } if message_id == m0.id() => Some(clock),
            _ => None,
        })
        .expect("m0 delivered");
    assert_eq!(first, matrix(&[&[1, 0, 0], &[0, 1, 0], &[0, 0, 0]]));
    assert_eq!(
        engine.clock("P2")?,
        &matrix(&[&[2, 0, 0], &[0, 2, 0], &[0, 0, 0]])
    );
    assert_eq!(engine.history("P2")?, &[m0.id(), m1.id()]);

    Ok(())
}

#[test]
fn receive_of_unsent_message_is_an_error() -> anyhow::Result<()> {
    for model in ClockModel::ALL {
        let (mut engine, recorder) = engine(model);
        let m0 = engine.send("P1", "m0")?;
        engine.receive("P2", m0.id())?;
        let clock = engine.clock("P2")?.clone();

        let err = engine.receive("P2", "m99".parse()?).unwrap_err();

        assert!(matches!(err, CausalError::UnknownMessage(id) if id == MessageId::new(99)));
        assert_eq!(err.kind(), ErrorKind::UnknownMessage);
        assert_eq!(engine.clock("P2")?, &clock);
        assert_eq!(engine.history("P2")?, &[m0.id()]);
        assert!(engine.pending("P2")?.is_empty());
        assert_eq!(recorder.errors(), vec![ErrorKind::UnknownMessage]);
    }

    Ok(())
}

#[test]
fn repeated_receives_are_absorbed() -> anyhow::Result<()> {
    for model in ClockModel::ALL {
        let (mut engine, recorder) = engine(model);
        let m0 = engine.send("P1", "m0")?;
        let m1 = engine.send("P1", "m1")?;

        for _ in 0..3 {
            engine.receive("P3", m1.id())?;
        }
        assert_eq!(engine.pending("P3")?, vec![m1.id()]);

        for _ in 0..3 {
            engine.receive("P3", m0.id())?;
            engine.receive("P3", m1.id())?;
        }
        assert_eq!(engine.history("P3")?, &[m0.id(), m1.id()]);
        assert_eq!(recorder.delivered_to("P3"), vec![m0.id(), m1.id()]);
        assert!(recorder.errors().is_empty());
    }

    Ok(())
}

#[test]
fn showcase_under_partial_update() -> anyhow::Result<()> {
    let engine = DeliveryEngine::with_model(ClockModel::VectorPartial)?;
    let mut runner = ScriptRunner::new(engine, Script::showcase());

    let summary = runner.run_to_end();
    assert_eq!(summary.steps, 20);
    assert_eq!(summary.errors, 0);

    let engine = runner.engine();
    assert_eq!(engine.history("P1")?, ids(&[2, 4, 5, 6]));
    assert_eq!(engine.history("P2")?, ids(&[0, 1, 3, 5]));
    assert_eq!(engine.history("P3")?, ids(&[0]));
    assert_eq!(engine.clock("P1")?, &vector(&[3, 3, 1]));
    assert_eq!(engine.clock("P2")?, &vector(&[3, 3, 1]));
    assert_eq!(engine.clock("P3")?, &vector(&[1, 0, 1]));
    // P3 never hears of m1, so everything after it waits
    assert_eq!(engine.pending("P3")?, ids(&[3, 2, 4, 6]));
    assert_eq!(
        engine.message(MessageId::new(6)).map(|m| m.timestamp().clone()),
        Some(vector(&[3, 3, 1]))
    );

    Ok(())
}

#[test]
fn showcase_under_merging_models() -> anyhow::Result<()> {
    for model in [ClockModel::VectorMerge, ClockModel::Matrix] {
        let engine = DeliveryEngine::with_model(model)?;
        let mut runner = ScriptRunner::new(engine, Script::showcase());
        runner.run_to_end();

        let engine = runner.engine();
        assert!(engine.history("P1")?.is_empty());
        assert_eq!(engine.history("P2")?, ids(&[0, 1, 3]));
        assert_eq!(engine.history("P3")?, ids(&[0]));
        assert_eq!(engine.pending("P1")?, ids(&[2, 4, 5, 6]));
        assert_eq!(engine.pending("P2")?, ids(&[5]));
        assert_eq!(engine.pending("P3")?, ids(&[3, 2, 4, 6]));
        assert_eq!(engine.clock("P2")?.causal_vector(), VectorClock::from_counters(vec![3, 6, 0]));
    }

    Ok(())
}

#[test]
fn chat_payloads_survive_delivery() -> anyhow::Result<()> {
    let engine = DeliveryEngine::with_model(ClockModel::Matrix)?;
    let mut runner = ScriptRunner::new(engine, Script::chat());
    runner.run_to_end();

    let engine = runner.engine();
    let texts: Vec<_> = engine
        .history("P2")?
        .iter()
        .filter_map(|id| engine.message(*id).and_then(|m| m.text()))
        .collect();
    assert_eq!(texts, vec!["Hello, world!", "How are you?"]);
    assert_eq!(engine.history("P3")?, ids(&[0]));

    Ok(())
}

#[test]
fn reset_restarts_the_script() -> anyhow::Result<()> {
    let engine = DeliveryEngine::with_model(ClockModel::VectorPartial)?;
    let mut runner = ScriptRunner::new(engine, Script::showcase());
    runner.run_to_end();
    let first = runner.engine().history("P1")?.to_vec();
    let sent = runner.engine().messages().len() as u64;

    runner.reset();
    for state in runner.engine().states() {
        assert!(state.history().is_empty());
        assert_eq!(state.pending_len(), 0);
        assert_eq!(state.clock(), &vector(&[0, 0, 0]));
    }

    // same deliveries, under ids that were never used before the reset
    runner.run_to_end();
    let shifted: Vec<_> = first.iter().map(|id| MessageId::new(id.seq() + sent)).collect();
    assert_eq!(runner.engine().history("P1")?, shifted);

    Ok(())
}

#[test]
fn message_from_before_reset_cannot_take_a_new_slot() -> anyhow::Result<()> {
    for model in ClockModel::ALL {
        let (mut engine, recorder) = engine(model);
        let old = engine.send("P1", "old")?;
        engine.reset();

        // a transport still holding the old value hands it over late
        assert!(matches!(
            engine.receive_message("P2", &old),
            Err(CausalError::UnknownMessage(id)) if id == old.id()
        ));

        let new = engine.send("P1", "new")?;
        assert_ne!(new.id(), old.id());
        assert!(engine.receive("P2", new.id())?.is_delivered());
        assert_eq!(engine.history("P2")?, &[new.id()]);
        assert_eq!(engine.message(new.id()).and_then(|m| m.text()), Some("new"));
        assert_eq!(recorder.errors(), vec![ErrorKind::UnknownMessage]);
    }

    Ok(())
}

#[test]
#[traced_test]
fn unknown_label_is_logged_and_skipped() {
    let script = Script::new(
        "typo",
        vec![
            Step::new(Command::send("P1", "m0", "hi")),
            Step::new(Command::receive("P2", "m7")),
            Step::new(Command::receive("P2", "m0")),
        ],
    );
    let engine = DeliveryEngine::with_model(ClockModel::VectorPartial).unwrap();
    let recorder = RecordingObserver::new();
    let mut runner = ScriptRunner::new(engine, script);
    runner.engine_mut().subscribe(recorder.clone());

    let summary = runner.run_to_end();

    assert_eq!(summary.steps, 3);
    assert_eq!(summary.errors, 1);
    assert_eq!(recorder.errors(), vec![ErrorKind::UnknownMessage]);
    assert_eq!(runner.engine().history("P2").unwrap(), ids(&[0]));
    assert!(logs_contain("message label `m7` was never sent"));
}

#[test]
#[traced_test]
fn unknown_process_is_reported() {
    let (mut engine, recorder) = engine(ClockModel::VectorMerge);

    assert!(matches!(
        engine.send("P4", "lost"),
        Err(CausalError::UnknownProcess(_))
    ));
    assert_eq!(recorder.errors(), vec![ErrorKind::UnknownProcess]);
    assert!(logs_contain("process `P4` is not a member"));
}
