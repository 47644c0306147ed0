//! Integration tests for the run-control state machine
//!
//! These tests drive a spawned pipeline through its handle and validate:
//! 1. Records flow through the stage chain in push order, exactly once
//! 2. `go_n` budgets, `pause` and `stop` apply at cycle boundaries
//! 3. Empty polls leave every counter except the poll count untouched
//! 4. Run boundaries short-circuit the cycle before the builder runs
//! 5. Fatal errors halt or skip according to policy, transport errors
//!    always halt

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use evflow_core::pipeline::{
    BoundaryReason, DataSource, Pipeline, PipelineConfig, PipelineState,
};
use evflow_core::record::{
    end_frame, physics_frame, prestart_frame, tags, Bank, StructuredRecord,
};
use evflow_core::{
    CollectingConsumer, DomainEvent, DomainObject, Error, EventBuilder, RawEvent,
};

/// Builder that tracks the current run, records every control frame it is
/// shown, and can be scripted to fail on one event number.
struct TrackingBuilder {
    detector: Option<String>,
    run: u32,
    control_tags: Arc<Mutex<Vec<u16>>>,
    fail_on_event: Option<u64>,
}

impl TrackingBuilder {
    fn new() -> Self {
        TrackingBuilder {
            detector: None,
            run: 0,
            control_tags: Arc::new(Mutex::new(Vec::new())),
            fail_on_event: None,
        }
    }

    fn failing_on(event: u64) -> Self {
        let mut builder = Self::new();
        builder.fail_on_event = Some(event);
        builder
    }

    fn control_tags(&self) -> Arc<Mutex<Vec<u16>>> {
        Arc::clone(&self.control_tags)
    }
}

#[async_trait]
impl EventBuilder for TrackingBuilder {
    fn configure_detector(&mut self, name: &str) {
        self.detector = Some(name.to_string());
    }

    async fn on_non_physics_frame(&mut self, record: &StructuredRecord) -> anyhow::Result<()> {
        self.control_tags.lock().unwrap().push(record.root().tag);
        if let Some(info) = record.prestart_info() {
            self.run = info.run;
        }
        Ok(())
    }

    async fn build(&mut self, record: &StructuredRecord) -> anyhow::Result<DomainEvent> {
        let number = record.event_number().unwrap_or(0);
        if self.fail_on_event == Some(number) {
            anyhow::bail!("scripted build failure on event {number}");
        }
        let collection = self.detector.clone().unwrap_or_else(|| "RawBanks".to_string());
        let mut event = DomainEvent::new(self.run, number);
        event.put(collection, vec![DomainObject::Blob(record.to_wire())])?;
        Ok(event)
    }
}

fn physics(sequence: u64, number: u32) -> RawEvent {
    RawEvent::new(
        sequence,
        StructuredRecord::new(physics_frame(number, vec![])).to_wire(),
    )
}

fn prestart(sequence: u64, run: u32) -> RawEvent {
    RawEvent::new(
        sequence,
        StructuredRecord::new(prestart_frame(1_700_000_000, run, 1)).to_wire(),
    )
}

fn end(sequence: u64, total_events: u32) -> RawEvent {
    RawEvent::new(
        sequence,
        StructuredRecord::new(end_frame(1_700_000_500, total_events)).to_wire(),
    )
}

fn event_numbers(events: &Arc<Mutex<Vec<DomainEvent>>>) -> Vec<u64> {
    events.lock().unwrap().iter().map(|e| e.event_number()).collect()
}

#[tokio::test]
async fn test_events_flow_in_push_order() {
    let config = PipelineConfig::new(DataSource::EtRing)
        .with_queue_timeout(Duration::from_millis(50))
        .with_detector("Tracker2021");
    let pipeline = Pipeline::new(config).unwrap();
    let queue = pipeline.raw_input().unwrap();
    let collector = CollectingConsumer::new();
    let events = collector.collected();
    let pipeline = pipeline
        .with_event_builder(Box::new(TrackingBuilder::new()))
        .with_consumer(Box::new(collector));

    for n in 1..=5u32 {
        queue.push(physics(n as u64, n)).unwrap();
    }

    let mut handle = pipeline.spawn().await.unwrap();
    handle.go_n(5).unwrap();
    let status = handle.wait_state(PipelineState::Paused).await;

    assert_eq!(status.counters.records_consumed, 5);
    assert_eq!(status.counters.events_built, 5);
    assert_eq!(event_numbers(&events), vec![1, 2, 3, 4, 5]);
    // The detector name handed over at assembly reached the builder.
    assert!(events.lock().unwrap()[0].has("Tracker2021"));

    handle.stop().unwrap();
    handle.join().await.unwrap();
}

#[tokio::test]
async fn test_empty_polls_touch_nothing_but_the_poll_count() {
    let config = PipelineConfig::new(DataSource::EtRing)
        .with_queue_timeout(Duration::from_millis(20));
    let pipeline = Pipeline::new(config)
        .unwrap()
        .with_event_builder(Box::new(TrackingBuilder::new()));
    let queue = pipeline.raw_input().unwrap();

    let mut handle = pipeline.spawn().await.unwrap();
    handle.go().unwrap();

    // Let several empty polls elapse, then park.
    let status = handle
        .wait_for(|s| s.counters.empty_polls >= 3)
        .await
        .unwrap();
    assert_eq!(status.counters.records_consumed, 0);
    assert_eq!(status.counters.events_built, 0);
    assert_eq!(status.counters.last_event_number, None);

    handle.pause().unwrap();
    handle.wait_state(PipelineState::Paused).await;

    // A record pushed while paused is picked up exactly where cycling
    // resumes.
    queue.push(physics(0, 9)).unwrap();
    handle.go_n(1).unwrap();
    let status = handle
        .wait_for(|s| s.counters.records_consumed == 1)
        .await
        .unwrap();
    assert_eq!(status.counters.last_event_number, Some(9));

    handle.stop().unwrap();
    handle.join().await.unwrap();
}

#[tokio::test]
async fn test_pause_while_looping_consumes_nothing_afterwards() {
    let config = PipelineConfig::new(DataSource::EtRing)
        .with_queue_timeout(Duration::from_millis(20));
    let pipeline = Pipeline::new(config)
        .unwrap()
        .with_event_builder(Box::new(TrackingBuilder::new()));
    let queue = pipeline.raw_input().unwrap();

    let mut handle = pipeline.spawn().await.unwrap();
    handle.go().unwrap();
    handle.wait_state(PipelineState::Looping).await;
    handle.pause().unwrap();
    handle.wait_state(PipelineState::Paused).await;

    // Records arriving while paused stay buffered.
    queue.push(physics(0, 1)).unwrap();
    queue.push(physics(1, 2)).unwrap();
    tokio::time::sleep(Duration::from_millis(60)).await;

    let status = handle.status();
    assert_eq!(status.state, PipelineState::Paused);
    assert_eq!(status.counters.records_consumed, 0);
    assert_eq!(queue.len(), 2);

    handle.go_n(2).unwrap();
    let status = handle
        .wait_for(|s| s.counters.records_consumed == 2)
        .await
        .unwrap();
    assert_eq!(status.counters.last_event_number, Some(2));

    handle.stop().unwrap();
    handle.join().await.unwrap();
}

#[tokio::test]
async fn test_end_frame_halts_before_the_builder_sees_it() {
    let builder = TrackingBuilder::new();
    let control_tags = builder.control_tags();
    let config = PipelineConfig::new(DataSource::EtRing)
        .with_queue_timeout(Duration::from_millis(50));
    let pipeline = Pipeline::new(config).unwrap();
    let queue = pipeline.raw_input().unwrap();
    let collector = CollectingConsumer::new();
    let events = collector.collected();
    let pipeline = pipeline
        .with_event_builder(Box::new(builder))
        .with_consumer(Box::new(collector));

    // E1 E2 E3=END E4 E5
    queue.push(prestart(0, 1042)).unwrap();
    queue.push(physics(1, 1)).unwrap();
    queue.push(physics(2, 2)).unwrap();
    queue.push(end(3, 2)).unwrap();
    queue.push(physics(4, 3)).unwrap();
    queue.push(physics(5, 4)).unwrap();

    let mut handle = pipeline.spawn().await.unwrap();
    handle.go().unwrap();
    let status = handle.wait_done().await;

    assert_eq!(status.state, PipelineState::Done);
    assert_eq!(status.boundary, Some(BoundaryReason::RunBoundary));
    assert_eq!(status.counters.run_number, Some(1042));
    // Prestart, E1, E2 and the END frame were consumed; E4 and E5 were not.
    assert_eq!(status.counters.records_consumed, 4);
    assert_eq!(event_numbers(&events), vec![1, 2]);
    assert_eq!(queue.len(), 2);

    // The builder was shown the prestart frame but never the END frame.
    let tags_seen = control_tags.lock().unwrap().clone();
    assert_eq!(tags_seen, vec![tags::PRESTART]);

    handle.join().await.unwrap();
}

#[tokio::test]
async fn test_run_boundary_continue_policy_spans_runs() {
    let config = PipelineConfig::new(DataSource::EtRing)
        .with_queue_timeout(Duration::from_millis(50))
        .with_stop_on_run_boundary(false);
    let pipeline = Pipeline::new(config).unwrap();
    let queue = pipeline.raw_input().unwrap();
    let collector = CollectingConsumer::new();
    let events = collector.collected();
    let pipeline = pipeline
        .with_event_builder(Box::new(TrackingBuilder::new()))
        .with_consumer(Box::new(collector));

    queue.push(prestart(0, 7)).unwrap();
    queue.push(physics(1, 11)).unwrap();
    queue.push(end(2, 1)).unwrap();
    queue.push(prestart(3, 8)).unwrap();
    queue.push(physics(4, 3)).unwrap();
    queue.push(end(5, 1)).unwrap();

    let mut handle = pipeline.spawn().await.unwrap();
    handle.go_n(6).unwrap();
    let status = handle
        .wait_for(|s| s.state == PipelineState::Paused && s.counters.records_consumed == 6)
        .await
        .unwrap();

    assert_eq!(status.boundary, Some(BoundaryReason::RunBoundary));
    assert_eq!(status.counters.run_number, Some(8));

    // Event numbers restart in the second run; the watermark must reset.
    assert_eq!(event_numbers(&events), vec![11, 3]);
    let runs: Vec<u32> = events.lock().unwrap().iter().map(|e| e.run_number()).collect();
    assert_eq!(runs, vec![7, 8]);

    handle.stop().unwrap();
    handle.join().await.unwrap();
}

#[tokio::test]
async fn test_event_number_regression_is_a_protocol_error() {
    let config = PipelineConfig::new(DataSource::EtRing)
        .with_queue_timeout(Duration::from_millis(50));
    let pipeline = Pipeline::new(config).unwrap();
    let queue = pipeline.raw_input().unwrap();
    let collector = CollectingConsumer::new();
    let events = collector.collected();
    let pipeline = pipeline
        .with_event_builder(Box::new(TrackingBuilder::new()))
        .with_consumer(Box::new(collector));

    queue.push(prestart(0, 55)).unwrap();
    queue.push(physics(1, 5)).unwrap();
    queue.push(physics(2, 3)).unwrap();

    let mut handle = pipeline.spawn().await.unwrap();
    handle.go().unwrap();
    let status = handle.wait_done().await;

    assert_eq!(status.state, PipelineState::Done);
    let message = status.last_error.unwrap();
    assert!(message.contains("event number"), "unexpected error: {message}");
    assert_eq!(event_numbers(&events), vec![5]);

    handle.join().await.unwrap();
}

#[tokio::test]
async fn test_builder_failure_halts_without_partial_delivery() {
    let config = PipelineConfig::new(DataSource::EtRing)
        .with_queue_timeout(Duration::from_millis(50));
    let pipeline = Pipeline::new(config).unwrap();
    let queue = pipeline.raw_input().unwrap();
    let collector = CollectingConsumer::new();
    let events = collector.collected();
    let pipeline = pipeline
        .with_event_builder(Box::new(TrackingBuilder::failing_on(2)))
        .with_consumer(Box::new(collector));

    queue.push(physics(0, 1)).unwrap();
    queue.push(physics(1, 2)).unwrap();
    queue.push(physics(2, 3)).unwrap();

    let mut handle = pipeline.spawn().await.unwrap();
    handle.go().unwrap();
    let status = handle.wait_done().await;

    assert_eq!(status.state, PipelineState::Done);
    assert!(status.last_error.unwrap().contains("scripted build failure"));
    // The failed cycle delivered nothing downstream.
    assert_eq!(event_numbers(&events), vec![1]);
    assert_eq!(status.counters.events_built, 1);
    assert_eq!(status.counters.records_consumed, 2);

    handle.join().await.unwrap();
}

#[tokio::test]
async fn test_lenient_policy_skips_failed_build_and_spends_its_budget() {
    let config = PipelineConfig::new(DataSource::EtRing)
        .with_queue_timeout(Duration::from_millis(50))
        .with_stop_on_errors(false);
    let pipeline = Pipeline::new(config).unwrap();
    let queue = pipeline.raw_input().unwrap();
    let collector = CollectingConsumer::new();
    let events = collector.collected();
    let pipeline = pipeline
        .with_event_builder(Box::new(TrackingBuilder::failing_on(1)))
        .with_consumer(Box::new(collector));

    queue.push(physics(0, 1)).unwrap();
    queue.push(physics(1, 2)).unwrap();

    let mut handle = pipeline.spawn().await.unwrap();
    handle.go_n(2).unwrap();
    let status = handle
        .wait_for(|s| s.state == PipelineState::Paused && s.counters.records_consumed == 2)
        .await
        .unwrap();

    // The abandoned record consumed one unit of budget, so exactly one
    // event came out of a two-record budget.
    assert_eq!(event_numbers(&events), vec![2]);
    assert_eq!(status.counters.events_built, 1);
    assert!(status.last_error.unwrap().contains("event 1"));

    handle.stop().unwrap();
    handle.join().await.unwrap();
}

#[tokio::test]
async fn test_transport_failure_halts_even_under_lenient_policy() {
    let config = PipelineConfig::new(DataSource::EtRing)
        .with_queue_timeout(Duration::from_millis(50))
        .with_stop_on_errors(false);
    let pipeline = Pipeline::new(config).unwrap();
    let queue = pipeline.raw_input().unwrap();
    let collector = CollectingConsumer::new();
    let events = collector.collected();
    let pipeline = pipeline
        .with_event_builder(Box::new(TrackingBuilder::new()))
        .with_consumer(Box::new(collector));

    queue.push(physics(0, 1)).unwrap();
    drop(queue);

    let mut handle = pipeline.spawn().await.unwrap();
    handle.go().unwrap();
    let status = handle.wait_done().await;

    // The buffered record was still delivered before the disconnect
    // surfaced.
    assert_eq!(event_numbers(&events), vec![1]);
    assert!(status.last_error.unwrap().contains("disconnected"));

    handle.join().await.unwrap();
}

#[tokio::test]
async fn test_commands_after_the_task_ends_report_terminated() {
    let config = PipelineConfig::new(DataSource::EtRing);
    let pipeline = Pipeline::new(config)
        .unwrap()
        .with_event_builder(Box::new(TrackingBuilder::new()));

    let mut handle = pipeline.spawn().await.unwrap();
    handle.stop().unwrap();
    handle.wait_done().await;

    // The command channel closes when the task exits; allow it a moment.
    let mut terminated = false;
    for _ in 0..100 {
        if matches!(handle.go(), Err(Error::Terminated)) {
            terminated = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert!(terminated, "command channel never closed");

    handle.join().await.unwrap();
}

#[tokio::test]
async fn test_status_snapshot_serializes_boundary_and_counters() {
    let config = PipelineConfig::new(DataSource::EtRing)
        .with_queue_timeout(Duration::from_millis(50))
        .with_max_records(1);
    let pipeline = Pipeline::new(config).unwrap();
    let queue = pipeline.raw_input().unwrap();
    let pipeline = pipeline.with_event_builder(Box::new(TrackingBuilder::new()));

    queue.push(physics(0, 1)).unwrap();
    queue.push(physics(1, 2)).unwrap();

    let mut handle = pipeline.spawn().await.unwrap();
    handle.go().unwrap();
    let status = handle.wait_done().await;

    assert_eq!(status.boundary, Some(BoundaryReason::EventLimit));
    let json = status.to_json().unwrap();
    assert!(json.contains("\"state\":\"done\""));
    assert!(json.contains("\"boundary\":\"event-limit\""));
    assert!(json.contains("\"records_consumed\":1"));

    handle.join().await.unwrap();
}

#[tokio::test]
async fn test_physics_frames_carry_their_banks_through() {
    let config = PipelineConfig::new(DataSource::EtRing)
        .with_queue_timeout(Duration::from_millis(50));
    let pipeline = Pipeline::new(config).unwrap();
    let queue = pipeline.raw_input().unwrap();
    let collector = CollectingConsumer::new();
    let events = collector.collected();
    let pipeline = pipeline
        .with_event_builder(Box::new(TrackingBuilder::new()))
        .with_consumer(Box::new(collector));

    let frame = physics_frame(
        77,
        vec![Bank::f64_data(0x0101, 0, vec![1.5, 2.25, 4.0])],
    );
    queue
        .push(RawEvent::new(0, StructuredRecord::new(frame).to_wire()))
        .unwrap();

    let mut handle = pipeline.spawn().await.unwrap();
    handle.go_n(1).unwrap();
    handle
        .wait_for(|s| s.counters.events_built == 1)
        .await
        .unwrap();

    let events = events.lock().unwrap();
    let event = &events[0];
    assert_eq!(event.event_number(), 77);
    let blob = match event.get("RawBanks") {
        Some([DomainObject::Blob(bytes)]) => bytes.clone(),
        other => panic!("expected one blob collection, got {other:?}"),
    };
    // The carried payload reparses to the same frame.
    let reparsed = StructuredRecord::from_wire(&blob, "test").unwrap();
    assert_eq!(reparsed.event_number(), Some(77));
    assert!(reparsed.root().find_child(0x0101).is_some());

    handle.stop().unwrap();
    handle.join().await.unwrap();
}
