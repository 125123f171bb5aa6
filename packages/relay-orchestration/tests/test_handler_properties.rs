//! Property tests for stage routing and tracking id correlation

use std::sync::Arc;

use proptest::prelude::*;
use relay_backends::{BackendKind, InMemoryBroker};
use relay_orchestration::{
    ensure_tracking_id, Action, Event, ExecutionContext, HopState, PipelineHandler, RelayConfig,
    Stage, StageRouter,
};
use serde_json::Value;

const KNOWN: [&str; 8] = ["queue", "topic", "bus", "terminal", "sqs", "sns", "bridge", "end"];

proptest! {
    #[test]
    fn prop_router_is_total(name in ".*") {
        let action = StageRouter::resolve(&name);
        let known = KNOWN.contains(&name.trim().to_ascii_lowercase().as_str());
        prop_assert_eq!(known, !matches!(action, Action::DefaultTerminal { .. }));
    }

    #[test]
    fn prop_router_ignores_case_and_padding(idx in 0usize..KNOWN.len(), upper in any::<bool>(), pad in 0usize..3) {
        let base = if upper { KNOWN[idx].to_ascii_uppercase() } else { KNOWN[idx].to_string() };
        let padded = format!("{}{}{}", " ".repeat(pad), base, " ".repeat(pad));
        prop_assert_eq!(StageRouter::resolve(&padded), StageRouter::resolve(KNOWN[idx]));
    }

    #[test]
    fn prop_existing_tracking_id_is_kept(id in "[a-zA-Z0-9-]{1,40}", other in "[a-z]{1,8}") {
        let mut event = Event::new();
        event.insert("tracking_id".to_string(), Value::String(id.clone()));
        event.insert(other.clone(), Value::Bool(true));
        let before = event.clone();

        let ctx = ensure_tracking_id(&mut event, &ExecutionContext::default());

        prop_assert_eq!(ctx.tracking_id, id);
        prop_assert!(!ctx.generated);
        prop_assert_eq!(event, before);
    }

    #[test]
    fn prop_tracking_id_is_stable_across_hops(hops in 1usize..6) {
        let mut event = Event::new();
        let first = ensure_tracking_id(&mut event, &ExecutionContext::default());
        for _ in 0..hops {
            let next = ensure_tracking_id(&mut event, &ExecutionContext::default());
            prop_assert_eq!(&next.tracking_id, &first.tracking_id);
            prop_assert!(!next.generated);
        }
    }

    #[test]
    fn prop_unrecognized_stage_never_forwards(name in "[a-z]{1,12}") {
        prop_assume!(!KNOWN.contains(&name.as_str()));

        let broker = InMemoryBroker::new();
        let config = Arc::new(RelayConfig::default().for_stage(Stage::parse(&name)));
        let handler = PipelineHandler::new(config, Arc::new(broker.clone()));

        let report = tokio_test::block_on(
            handler.handle(&mut Event::new(), &ExecutionContext::default()),
        )
        .unwrap();

        prop_assert!(report.dispatch.is_none());
        prop_assert_eq!(report.action, Action::DefaultTerminal { requested: name });
        prop_assert!(broker.bus().archived().is_empty());
    }

    #[test]
    fn prop_non_string_tracking_id_is_replaced(n in any::<i64>()) {
        let mut event = Event::new();
        event.insert("tracking_id".to_string(), Value::from(n));

        let ctx = ensure_tracking_id(&mut event, &ExecutionContext::default());

        prop_assert!(ctx.generated);
        prop_assert!(ctx.tracking_id.starts_with("id-"));
        prop_assert_eq!(&event["tracking_id"], &Value::String(ctx.tracking_id.clone()));
    }
}

#[tokio::test]
async fn test_terminal_hop_is_idempotent() {
    let broker = InMemoryBroker::new();
    let config = Arc::new(RelayConfig::default().for_stage(Stage::Terminal));
    let handler = PipelineHandler::new(config, Arc::new(broker.clone()));

    let mut event: Event = serde_json::from_str(r#"{"tracking_id": "id-5"}"#).unwrap();
    for _ in 0..3 {
        let report = handler.handle(&mut event, &ExecutionContext::default()).await.unwrap();
        assert_eq!(report.final_state(), HopState::Done);
        assert_eq!(report.tracking_id, "id-5");
    }

    assert!(broker.bus().archived().is_empty());
    assert_eq!(event.len(), 1);
}

#[tokio::test]
async fn test_each_forwarding_stage_calls_exactly_one_backend() {
    for (stage, kind) in [
        (Stage::Queue, BackendKind::Queue),
        (Stage::Topic, BackendKind::Topic),
        (Stage::Bus, BackendKind::Bus),
    ] {
        let broker = InMemoryBroker::new().with_queue("q").with_topic("t");
        let queue = broker.queue("q").unwrap();
        let topic = broker.topic("t").unwrap();
        let mut subscriber = topic.subscribe();

        let config = RelayConfig {
            queue_identifier: "q".to_string(),
            topic_identifier: "t".to_string(),
            ..RelayConfig::default()
        }
        .for_stage(stage.clone());
        let handler = PipelineHandler::new(Arc::new(config), Arc::new(broker.clone()));

        let report = handler
            .handle(&mut Event::new(), &ExecutionContext::default())
            .await
            .unwrap();
        assert_eq!(report.forwarded_to(), Some(kind));

        let sent = [
            queue.total_sent() as usize,
            usize::from(subscriber.try_recv().is_ok()),
            broker.bus().archived().len(),
        ];
        assert_eq!(sent.iter().sum::<usize>(), 1, "stage {} touched {:?}", stage, sent);
    }
}
