//! Message router behavior tests

use gatelink::protocol::{NotificationTopic, PublishTopic};
use gatelink::routing::{GateEvent, MessageRouter};
use gatelink::{DeviceStatus, GateState};
use proptest::prelude::*;
use serde_json::json;

#[test]
fn test_status_snapshot_is_decoded() {
    let router = MessageRouter::new();
    let payload = json!({
        "timestamp": 1_700_000_000_000i64,
        "status": "success",
        "data": {
            "stato": "in chiusura",
            "fcApertura": "disattivo",
            "fcChiusura": "disattivo",
            "fotocellule": "sconosciuto",
            "coste": "attivo",
            "ricevente": "attivo",
            "posizione": "45%",
            "consumo": "1.2A"
        }
    });

    router.dispatch(
        NotificationTopic::GateStatus.as_str(),
        payload.to_string().as_bytes(),
    );

    let data = router.gate_status().and_then(|status| status.data).unwrap();
    assert_eq!(data.state, GateState::Closing);
    assert!(data.state.is_moving());
    assert_eq!(data.photocells, DeviceStatus::Unknown);
    assert_eq!(data.position_percent(), Some(45));
}

#[test]
fn test_status_without_data_still_replaces() {
    let router = MessageRouter::new();
    router.dispatch(
        NotificationTopic::GateStatus.as_str(),
        json!({"status": "error", "timestamp": 5}).to_string().as_bytes(),
    );

    let status = router.gate_status().unwrap();
    assert!(status.data.is_none());
    assert_eq!(status.timestamp, Some(5));
}

#[test]
fn test_statistics_latest_wins() {
    let router = MessageRouter::new();
    let mut watch = router.watch_statistics();
    for total in [10u64, 11, 12] {
        let payload = json!({
            "timestamp": total,
            "totale_storico": {"cancello": total, "luce_garage": 0, "pedonabile": 0, "cancellino": 0},
            "ultime_24_ore": {"cancello": 1, "luce_garage": 0, "pedonabile": 0, "cancellino": 0}
        });
        router.dispatch(
            NotificationTopic::Statistics.as_str(),
            payload.to_string().as_bytes(),
        );
    }

    assert!(watch.has_changed().unwrap());
    let latest = watch.borrow_and_update().clone().unwrap();
    assert_eq!(latest.total.gate, 12);
    assert_eq!(latest.last_24h.gate, 1);
}

#[test]
fn test_structured_notification_data_is_rendered_as_json() {
    let router = MessageRouter::new();
    let payload = json!({"data": {"code": 3}, "status": "error", "timestamp": 0});

    match router.dispatch(
        NotificationTopic::PartialError.as_str(),
        payload.to_string().as_bytes(),
    ) {
        Some(GateEvent::Notification(notification)) => {
            assert!(notification.is_error);
            assert!(notification.message.ends_with(r#" - {"code":3}"#));
        }
        other => panic!("unexpected {other:?}"),
    }
}

#[test]
fn test_publish_topics_are_not_routed() {
    let router = MessageRouter::new();
    for topic in PublishTopic::ALL {
        let payload = json!({"data": "x", "status": "success", "timestamp": 0});
        assert!(router
            .dispatch(topic.as_str(), payload.to_string().as_bytes())
            .is_none());
    }
}

proptest! {
    #[test]
    fn prop_unregistered_topics_never_change_state(
        topic in "[a-z/]{1,40}",
        payload in proptest::collection::vec(any::<u8>(), 0..128),
    ) {
        prop_assume!(topic.parse::<NotificationTopic>().is_err());
        let router = MessageRouter::new();
        let mut events = router.subscribe_events();

        prop_assert!(router.dispatch(&topic, &payload).is_none());
        prop_assert!(router.gate_status().is_none());
        prop_assert!(router.statistics().is_none());
        prop_assert!(events.try_recv().is_err());
    }

    #[test]
    fn prop_arbitrary_bytes_never_panic(
        index in 0usize..NotificationTopic::ALL.len(),
        payload in proptest::collection::vec(any::<u8>(), 0..256),
    ) {
        let router = MessageRouter::new();
        let _ = router.dispatch(NotificationTopic::ALL[index].as_str(), &payload);
    }
}
