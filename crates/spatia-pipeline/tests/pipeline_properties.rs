//! Write Pipeline Integration Tests
//!
//! Ordering, durability and delivery behavior observed through the public API

use std::sync::Arc;
use std::thread;

use spatia_pipeline::aof::{decode_entries, replay_file, AofFile, AofFlusher};
use spatia_pipeline::{
    ChangeEvent, ChangeKind, ChannelSink, Command, FsyncPolicy, Geofence, Geometry, MemoryStore, ObjectStore,
    Pipeline, PipelineConfig, PipelineError, Region, Transition, TriggerEvent,
};

fn cmd(args: &[&str]) -> Command {
    Command::new(args.iter().copied())
}

fn phoenix() -> Region {
    Region::bounds(33.0, -113.0, 34.0, -111.0)
}

#[test]
fn test_detail_reflects_store_after_each_command() {
    let pipeline = Pipeline::new(MemoryStore::new(), &PipelineConfig::default());

    let commands = [
        cmd(&["SET", "fleet", "truck1", "FIELD", "speed", "55", "POINT", "33.5", "-112.2"]),
        cmd(&["FSET", "fleet", "truck1", "speed", "60", "heading", "90"]),
        cmd(&["SET", "fleet", "truck1", "POINT", "33.6", "-112.1"]),
        cmd(&["DEL", "fleet", "truck1"]),
    ];

    for command in &commands {
        let invocation = pipeline.execute(command).unwrap();
        let stored = pipeline.with_store(|store| store.get("fleet", "truck1").cloned());
        assert_eq!(invocation.detail.new, stored, "after {command}");
    }
}

#[test]
fn test_log_order_matches_sequence_order_under_contention() {
    let pipeline = Arc::new(Pipeline::new(MemoryStore::new(), &PipelineConfig::default()));

    let handles: Vec<_> = (0..4)
        .map(|worker| {
            let pipeline = Arc::clone(&pipeline);
            thread::spawn(move || {
                (0..250)
                    .map(|i| {
                        let id = format!("w{worker}-{i}");
                        let lat = format!("{}", (i % 80) as f64);
                        let command = cmd(&["SET", "fleet", &id, "POINT", &lat, "10"]);
                        let seq = pipeline.execute(&command).unwrap().detail.seq;
                        (seq, command)
                    })
                    .collect::<Vec<_>>()
            })
        })
        .collect();

    let mut executed: Vec<(u64, Command)> = handles.into_iter().flat_map(|h| h.join().unwrap()).collect();
    executed.sort_by_key(|(seq, _)| *seq);

    let seqs: Vec<u64> = executed.iter().map(|(seq, _)| *seq).collect();
    assert_eq!(seqs, (1..=1000).collect::<Vec<u64>>());

    let logged = decode_entries(&pipeline.take_log_bytes()).unwrap().commands;
    let expected: Vec<Command> = executed.into_iter().map(|(_, command)| command).collect();
    assert_eq!(logged, expected);
}

#[test]
fn test_failed_command_is_invisible_to_subscribers() {
    let pipeline = Pipeline::new(MemoryStore::with_capacity_limit(1), &PipelineConfig::default());
    let (sink, mut rx) = ChannelSink::<ChangeEvent>::bounded(16);
    pipeline.live().subscribe("fleet", None, Arc::new(sink));

    pipeline.execute(&cmd(&["SET", "fleet", "a", "POINT", "1", "1"])).unwrap();
    let err = pipeline.execute(&cmd(&["SET", "fleet", "b", "POINT", "2", "2"])).unwrap_err();
    assert_eq!(err, PipelineError::CapacityExceeded { limit: 1 });

    assert_eq!(rx.try_recv().unwrap().detail.id, "a");
    assert!(rx.try_recv().is_err());
    assert_eq!(pipeline.with_store(|store| store.len()), 1);
}

#[test]
fn test_geofence_enter_and_exit_for_fleet() {
    let pipeline = Pipeline::new(MemoryStore::new(), &PipelineConfig::default());
    let (sink, mut rx) = ChannelSink::<TriggerEvent>::bounded(16);
    pipeline.fences().set_hook(Geofence::new(
        "phx-yard",
        "fleet",
        phoenix(),
        [Transition::Enter, Transition::Exit],
        Arc::new(sink),
    ));

    let created = pipeline
        .execute(&cmd(&["SET", "fleet", "truck1", "POINT", "33.5", "-112.2"]))
        .unwrap();
    assert_eq!(created.detail.kind, ChangeKind::Create);
    assert_eq!(created.triggers.triggered, 1);

    // moving within the region is `inside`, which this hook ignores
    let moved = pipeline
        .execute(&cmd(&["SET", "fleet", "truck1", "POINT", "33.6", "-112.0"]))
        .unwrap();
    assert_eq!(moved.triggers.evaluated, 1);
    assert_eq!(moved.triggers.triggered, 0);

    pipeline.execute(&cmd(&["DEL", "fleet", "truck1"])).unwrap();

    let enter = rx.try_recv().unwrap();
    assert_eq!(enter.detect, Transition::Enter);
    assert_eq!(enter.detail.seq, 1);
    let exit = rx.try_recv().unwrap();
    assert_eq!(exit.detect, Transition::Exit);
    assert_eq!(exit.detail.kind, ChangeKind::Delete);
    assert!(rx.try_recv().is_err());

    // other collections are not evaluated
    let other = pipeline
        .execute(&cmd(&["SET", "boats", "b1", "POINT", "33.5", "-112.2"]))
        .unwrap();
    assert_eq!(other.triggers.evaluated, 0);
}

#[test]
fn test_truck_enters_then_leaves_the_yard() {
    let pipeline = Pipeline::new(MemoryStore::new(), &PipelineConfig::default());
    let (sink, mut rx) = ChannelSink::<TriggerEvent>::bounded(4);
    pipeline.fences().set_hook(Geofence::new(
        "phx-yard",
        "fleet",
        phoenix(),
        [Transition::Enter, Transition::Exit],
        Arc::new(sink),
    ));

    let created = pipeline
        .execute(&cmd(&["SET", "fleet", "truck1", "POINT", "33.5", "-112.0"]))
        .unwrap();
    assert_eq!(created.detail.key, "fleet");
    assert_eq!(created.detail.id, "truck1");
    assert_eq!(created.detail.kind, ChangeKind::Create);
    assert!(created.detail.previous.is_none());
    assert_eq!(created.detail.new_geometry(), Some(&Geometry::point(33.5, -112.0)));

    let enter = rx.try_recv().unwrap();
    assert_eq!(enter.detect, Transition::Enter);

    let moved = pipeline
        .execute(&cmd(&["SET", "fleet", "truck1", "POINT", "50.0", "10.0"]))
        .unwrap();
    assert_eq!(moved.triggers.triggered, 1);

    let exit = rx.try_recv().unwrap();
    assert_eq!(exit.detect, Transition::Exit);
    assert_eq!(exit.detail.seq, 2);
    assert_eq!(exit.detail.kind, ChangeKind::Update);
    assert_eq!(exit.detail.previous_geometry(), Some(&Geometry::point(33.5, -112.0)));
    assert_eq!(exit.detail.new_geometry(), Some(&Geometry::point(50.0, 10.0)));
    assert!(rx.try_recv().is_err());
}

#[test]
fn test_slow_subscriber_does_not_block_writes() {
    let pipeline = Pipeline::new(MemoryStore::new(), &PipelineConfig::default());
    let (sink, mut rx) = ChannelSink::<ChangeEvent>::bounded(1);
    pipeline.live().subscribe("fleet", Some(Region::circle(33.5, -112.2, 5_000.0)), Arc::new(sink));

    for i in 0..3 {
        let lon = format!("{}", -112.2 + i as f64 * 0.001);
        let invocation = pipeline
            .execute(&cmd(&["SET", "fleet", "truck1", "POINT", "33.5", &lon]))
            .unwrap();
        assert_eq!(invocation.notifications.matched, 1);
    }

    let stats = pipeline.stats();
    assert_eq!(stats.live_delivered, 1);
    assert_eq!(stats.live_dropped, 2);
    assert_eq!(rx.try_recv().unwrap().detail.seq, 1);
    assert!(rx.try_recv().is_err());
}

#[tokio::test]
async fn test_replay_reproduces_store() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("appendonly.aof");
    let config = PipelineConfig::default();

    let pipeline = Arc::new(Pipeline::new(MemoryStore::new(), &config));
    let file = AofFile::open(&path, FsyncPolicy::Always).await.unwrap();
    let mut flusher = AofFlusher::new(Arc::clone(&pipeline), file, &config.aof);

    let script = [
        cmd(&["SET", "fleet", "truck1", "FIELD", "speed", "55", "POINT", "33.5", "-112.2"]),
        cmd(&["SET", "fleet", "truck2", "STRING", "parked"]),
        cmd(&["SET", "fleet", "truck2", "NX", "POINT", "1", "1"]),
        cmd(&["FSET", "fleet", "truck1", "speed", "0"]),
        cmd(&["SET", "zones", "z1", "BOUNDS", "33", "-113", "34", "-111"]),
        cmd(&["DEL", "fleet", "truck2"]),
        cmd(&["DEL", "fleet", "truck2"]),
    ];
    for command in &script {
        pipeline.execute(command).unwrap();
    }
    flusher.flush().await.unwrap();

    let mut replayed = MemoryStore::new();
    let report = replay_file(&path, &mut replayed).await.unwrap();

    assert_eq!(report.applied as u64, pipeline.last_seq());
    assert_eq!(report.noops, 0);
    assert_eq!(pipeline.with_store(MemoryStore::clone), replayed);
}
