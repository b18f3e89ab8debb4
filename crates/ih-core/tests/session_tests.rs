//! HostSession Tests
//!
//! End-to-end behaviour of mounted interactives against in-memory
//! collaborators and a scripted frame peer.

use ih_channel::FrameLink;
use ih_core::{HostConfig, HostError, HostEvent, InteractiveInstance, LearnerIdentity};
use ih_protocol::{
    AttachmentOperation, AttachmentUrlRequest, CustomMessage, Generation, HostMessage, InteractiveId,
    InteractiveMessage, JwtRequest, LinkedStateListenerRequest, LogEvent, Mode,
    RemoveLinkedStateListener, RequestId,
};
use ih_test_utils::{test_session, MemoryStore, StaticCredentials, TestSessionBuilder};
use pretty_assertions::assert_eq;
use serde_json::{json, Map};
use std::time::Duration;
use tokio::sync::broadcast;

async fn settle() {
    for _ in 0..20 {
        tokio::task::yield_now().await;
    }
}

fn drain(rx: &mut broadcast::Receiver<HostEvent>) -> Vec<HostEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

fn instance(id: &str) -> InteractiveInstance {
    InteractiveInstance::new(id, format!("https://interactives.test/{id}")).with_label(id.to_uppercase())
}

#[tokio::test]
async fn test_handshake_posts_persisted_state() {
    let store = MemoryStore::new();
    store.seed("q1", json!({"answer": "B"}));
    let t = TestSessionBuilder::default().store(store).build();

    let (_, mut peer) = t.mount(
        instance("q1")
            .with_authored_state(json!({"prompt": "pick one"}))
            .with_link("q2", "Question 2"),
    );
    peer.handshake().await;

    let HostMessage::InitInteractive(init) = peer.next_message().await else {
        panic!("expected initInteractive");
    };
    assert_eq!(init.mode, Mode::Runtime);
    assert_eq!(init.authored_state, json!({"prompt": "pick one"}));
    assert_eq!(init.interactive_state, json!({"answer": "B"}));
    assert_eq!(init.linked_interactives.len(), 1);
    assert!(init.host_features.attachments);
}

#[tokio::test]
async fn test_legacy_no_change_state_initializes_empty() {
    let store = MemoryStore::new();
    store.seed("q1", json!("no-change"));
    let t = TestSessionBuilder::default().store(store).build();

    let (_, mut peer) = t.mount(instance("q1"));
    peer.handshake().await;
    let HostMessage::InitInteractive(init) = peer.next_message().await else {
        panic!("expected initInteractive");
    };
    assert_eq!(init.interactive_state, serde_json::Value::Null);
}

#[tokio::test]
async fn test_load_failure_falls_back_to_instance_state() {
    let store = MemoryStore::new();
    store.set_fail_loads(true);
    let t = TestSessionBuilder::default().store(store).build();

    let (_, mut peer) = t.mount(instance("q1").with_interactive_state(json!({"draft": 1})));
    peer.handshake().await;
    let HostMessage::InitInteractive(init) = peer.next_message().await else {
        panic!("expected initInteractive");
    };
    assert_eq!(init.interactive_state, json!({"draft": 1}));
}

#[tokio::test]
async fn test_state_updates_persist_only_real_changes() {
    let t = test_session();
    let peer = t.connect(instance("q1")).await;
    let id = InteractiveId::from("q1");

    for payload in [
        json!({"a": 1}),
        json!({"a": 1}),
        json!("no-change"),
        json!({"a": 2}),
        json!("touch"),
    ] {
        peer.send(&InteractiveMessage::InteractiveState(payload));
    }
    settle().await;
    t.session.runtime(&id).unwrap().flush().await;

    assert_eq!(
        t.store.writes_for(&id),
        vec![json!({"a": 1}), json!({"a": 2}), json!({"a": 2})]
    );
}

#[tokio::test]
async fn test_report_mode_never_persists() {
    let t = test_session();
    let peer = t.connect(instance("q1").with_mode(Mode::Report)).await;

    peer.send(&InteractiveMessage::InteractiveState(json!({"a": 1})));
    settle().await;
    t.session.runtime(&"q1".into()).unwrap().flush().await;
    assert!(t.store.writes().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_save_all_reports_silent_interactives() {
    let config = HostConfig::default()
        .with_handshake_retry(Duration::from_millis(10))
        .with_state_request_timeout(Duration::from_millis(50))
        .with_save_watchdog(Duration::from_millis(20));
    let t = TestSessionBuilder::default().config(config).build();
    let mut answering = t.connect(instance("q1")).await;
    let _silent = t.connect(instance("q2")).await;
    let _report = t.connect(instance("q3").with_mode(Mode::Report)).await;
    let mut rx = t.session.subscribe();

    let (summary, ()) = tokio::join!(t.session.save_all(), async {
        let request = answering.next_message().await;
        assert!(matches!(request, HostMessage::GetInteractiveState(None)));
        answering.send(&InteractiveMessage::InteractiveState(json!({"final": true})));
    });

    assert_eq!(summary.saved, vec![InteractiveId::from("q1")]);
    assert_eq!(summary.skipped, vec![InteractiveId::from("q3")]);
    assert_eq!(summary.failed_labels(), vec!["Q2".to_string()]);
    assert!(summary.failed[0].to_string().contains("Q2"));
    assert_eq!(t.store.state(&"q1".into()), Some(json!({"final": true})));

    let events: Vec<HostEvent> = drain(&mut rx)
        .into_iter()
        .filter(|e| {
            matches!(
                e,
                HostEvent::SavesSlow | HostEvent::SavesFinishedLate | HostEvent::SaveFailed { .. }
            )
        })
        .collect();
    assert_eq!(
        events,
        vec![
            HostEvent::SavesSlow,
            HostEvent::SavesFinishedLate,
            HostEvent::SaveFailed {
                labels: vec!["Q2".to_string()]
            },
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn test_save_all_with_fast_answers_is_quiet() {
    let t = test_session();
    let mut peer = t.connect(instance("q1")).await;
    let mut rx = t.session.subscribe();

    let (summary, ()) = tokio::join!(t.session.save_all(), async {
        peer.next_message().await;
        peer.send(&InteractiveMessage::InteractiveState(json!("no-change")));
    });

    assert!(summary.is_complete());
    assert_eq!(summary.saved.len(), 1);
    assert!(drain(&mut rx)
        .iter()
        .all(|e| !matches!(e, HostEvent::SavesSlow | HostEvent::SaveFailed { .. })));
}

#[tokio::test]
async fn test_attachment_write_then_read() {
    let t = test_session();
    let mut peer = t.connect(instance("q1")).await;

    let write = |id: u64| {
        InteractiveMessage::GetAttachmentUrl(AttachmentUrlRequest {
            request_id: RequestId(id),
            name: "recording.webm".to_string(),
            operation: AttachmentOperation::Write,
            content_type: Some("audio/webm".to_string()),
            expires_in: None,
        })
    };

    peer.send(&write(1));
    let HostMessage::AttachmentUrl(first) = peer.next_message().await else {
        panic!("expected attachmentUrl");
    };
    peer.send(&write(2));
    let HostMessage::AttachmentUrl(second) = peer.next_message().await else {
        panic!("expected attachmentUrl");
    };
    let (first, second) = (first.url.unwrap(), second.url.unwrap());
    assert_ne!(first, second);
    assert!(first.contains("method=PUT"));
    assert_eq!(t.storage.folders_created(), 1);

    peer.send(&InteractiveMessage::GetAttachmentUrl(AttachmentUrlRequest {
        request_id: RequestId(3),
        name: "recording.webm".to_string(),
        operation: AttachmentOperation::Read,
        content_type: None,
        expires_in: Some(60),
    }));
    let HostMessage::AttachmentUrl(read) = peer.next_message().await else {
        panic!("expected attachmentUrl");
    };
    assert_eq!(read.request_id, RequestId(3));
    let url = read.url.unwrap();
    assert!(url.contains("method=GET"));
    assert!(url.contains("/recording.webm?"));
    assert_eq!(t.storage.folders_created(), 1);

    settle().await;
    let reference = t.store.attachment(&"q1".into(), "recording.webm").unwrap();
    assert!(url.contains(&reference.path));
}

#[tokio::test]
async fn test_attachment_read_uses_reference_from_store() {
    let t = test_session();
    t.store.seed_attachment(
        "q1",
        "photo.png",
        ih_core::AttachmentReference {
            folder_id: "folder-9".to_string(),
            path: "earlier-session/photo.png".to_string(),
        },
    );
    let mut peer = t.connect(instance("q1")).await;

    peer.send(&InteractiveMessage::GetAttachmentUrl(AttachmentUrlRequest {
        request_id: RequestId(1),
        name: "photo.png".to_string(),
        operation: AttachmentOperation::Read,
        content_type: None,
        expires_in: None,
    }));
    let HostMessage::AttachmentUrl(read) = peer.next_message().await else {
        panic!("expected attachmentUrl");
    };
    assert!(read
        .url
        .unwrap()
        .contains("/folder-9/earlier-session/photo.png?"));
}

#[tokio::test]
async fn test_preview_write_is_an_error_response() {
    let t = TestSessionBuilder::default()
        .identity(LearnerIdentity::Preview)
        .build();
    let mut peer = t.connect(instance("q1")).await;

    peer.send(&InteractiveMessage::GetAttachmentUrl(AttachmentUrlRequest {
        request_id: RequestId(5),
        name: "a.txt".to_string(),
        operation: AttachmentOperation::Write,
        content_type: None,
        expires_in: None,
    }));
    let HostMessage::AttachmentUrl(response) = peer.next_message().await else {
        panic!("expected attachmentUrl");
    };
    assert_eq!(response.request_id, RequestId(5));
    assert!(response.error.unwrap().contains("not supported"));
}

#[tokio::test]
async fn test_jwt_requests_always_get_a_reply() {
    let t = test_session();
    let mut peer = t.connect(instance("q1")).await;
    peer.send(&InteractiveMessage::GetFirebaseJwt(JwtRequest {
        request_id: RequestId(1),
        firebase_app: Some("answers".to_string()),
        extra: Map::new(),
    }));
    let HostMessage::FirebaseJwt(response) = peer.next_message().await else {
        panic!("expected firebaseJWT");
    };
    assert_eq!(response.token.as_deref(), Some("test-jwt"));
    assert_eq!(t.credentials.requests()[0].0.as_deref(), Some("answers"));

    let t = TestSessionBuilder::default()
        .credentials(StaticCredentials::none())
        .build();
    let mut peer = t.connect(instance("q1")).await;
    peer.send(&InteractiveMessage::GetFirebaseJwt(JwtRequest {
        request_id: RequestId(2),
        firebase_app: None,
        extra: Map::new(),
    }));
    let HostMessage::FirebaseJwt(response) = peer.next_message().await else {
        panic!("expected firebaseJWT");
    };
    assert_eq!(response.request_id, RequestId(2));
    assert_eq!(response.response_type.as_deref(), Some("ERROR"));
}

#[tokio::test]
async fn test_linked_state_is_pushed_until_removed() {
    let t = test_session();
    let mut watcher = t.connect(instance("q1")).await;
    let source = t.connect(instance("q2")).await;

    watcher.send(&InteractiveMessage::AddLinkedInteractiveStateListener(
        LinkedStateListenerRequest {
            listener_id: "l1".into(),
            interactive_item_id: "q2".into(),
        },
    ));
    settle().await;
    source.send(&InteractiveMessage::InteractiveState(json!({"x": 5})));
    settle().await;
    t.session.runtime(&"q2".into()).unwrap().flush().await;

    let HostMessage::LinkedInteractiveState(pushed) = watcher.next_message().await else {
        panic!("expected linkedInteractiveState");
    };
    assert_eq!(pushed.listener_id, "l1".into());
    assert_eq!(pushed.interactive_state, json!({"x": 5}));

    let remove = InteractiveMessage::RemoveLinkedInteractiveStateListener(
        RemoveLinkedStateListener {
            listener_id: "l1".into(),
        },
    );
    watcher.send(&remove);
    watcher.send(&remove);
    settle().await;
    assert_eq!(t.store.watcher_count(&"q2".into()), 0);

    source.send(&InteractiveMessage::InteractiveState(json!({"x": 6})));
    settle().await;
    t.session.runtime(&"q2".into()).unwrap().flush().await;
    assert!(watcher.try_next_message().is_none());
}

#[tokio::test]
async fn test_unmount_releases_watches_and_text_components() {
    let t = test_session();
    let peer = t.connect(instance("q1")).await;
    peer.send(&InteractiveMessage::AddLinkedInteractiveStateListener(
        LinkedStateListenerRequest {
            listener_id: "l1".into(),
            interactive_item_id: "q9".into(),
        },
    ));
    peer.send(&InteractiveMessage::CustomMessage(CustomMessage::new(
        "dynamicText:registerComponent",
        json!({"id": "para-1"}),
    )));
    settle().await;
    assert_eq!(t.store.watcher_count(&"q9".into()), 1);
    assert_eq!(t.coordinator.registered(), vec!["para-1".to_string()]);

    t.session.unmount(&"q1".into()).unwrap();
    assert_eq!(t.store.watcher_count(&"q9".into()), 0);
    assert!(t.coordinator.registered().is_empty());
    assert!(t.session.unmount(&"q1".into()).is_err());
}

#[tokio::test(start_paused = true)]
async fn test_state_reported_during_load_is_kept() {
    let store = MemoryStore::new();
    store.seed("q1", json!({"v": "stored"}));
    store.set_load_delay(Duration::from_millis(100));
    let t = TestSessionBuilder::default().store(store).build();
    let id = InteractiveId::from("q1");

    let (_, mut peer) = t.mount(instance("q1"));
    peer.handshake().await;
    tokio::time::sleep(Duration::from_millis(10)).await;
    peer.send(&InteractiveMessage::InteractiveState(json!({"v": "fresh"})));

    let HostMessage::InitInteractive(init) = peer.next_message().await else {
        panic!("expected initInteractive");
    };
    assert_eq!(init.interactive_state, json!({"v": "fresh"}));

    peer.send(&InteractiveMessage::InteractiveState(json!({"v": "fresh"})));
    settle().await;
    let runtime = t.session.runtime(&id).unwrap();
    runtime.flush().await;
    assert_eq!(t.store.writes_for(&id), vec![json!({"v": "fresh"})]);
    assert_eq!(runtime.current_state(), Some(json!({"v": "fresh"})));
}

#[tokio::test]
async fn test_remount_with_new_source_uses_new_instance() {
    let t = test_session();
    let first = t
        .connect(InteractiveInstance::new("q1", "https://a.test/v1").with_authored_state(json!({"v": 1})))
        .await;
    first.send(&InteractiveMessage::InteractiveState(json!({"answer": "A"})));
    settle().await;

    let (generation, mut second) = t.mount(
        InteractiveInstance::new("q1", "https://b.test/v2")
            .with_label("Question 1 (v2)")
            .with_authored_state(json!({"v": 2}))
            .with_mode(Mode::Report),
    );
    assert_eq!(generation, Generation(2));
    second.handshake().await;
    let HostMessage::InitInteractive(init) = second.next_message().await else {
        panic!("expected initInteractive");
    };
    assert_eq!(init.authored_state, json!({"v": 2}));
    assert_eq!(init.mode, Mode::Report);
    assert_eq!(init.interactive_state, json!({"answer": "A"}));

    let runtime = t.session.runtime(&"q1".into()).unwrap();
    assert_eq!(runtime.url(), "https://b.test/v2");
    assert_eq!(runtime.label(), "Question 1 (v2)");
    assert_eq!(t.session.interactive_ids(), vec![InteractiveId::from("q1")]);

    second.send(&InteractiveMessage::InteractiveState(json!({"answer": "B"})));
    settle().await;
    runtime.flush().await;
    assert_eq!(t.store.writes_for(&"q1".into()), vec![json!({"answer": "A"})]);

    let (host, _frame) = FrameLink::pair();
    let err = runtime.reload(instance("q2"), host).unwrap_err();
    assert!(matches!(err, HostError::InstanceMismatch { .. }));
    assert!(runtime.is_mounted());
}

#[tokio::test]
async fn test_remount_releases_previous_generation() {
    let t = test_session();
    let peer = t.connect(instance("q1")).await;
    peer.send(&InteractiveMessage::AddLinkedInteractiveStateListener(
        LinkedStateListenerRequest {
            listener_id: "l1".into(),
            interactive_item_id: "q9".into(),
        },
    ));
    peer.send(&InteractiveMessage::CustomMessage(CustomMessage::new(
        "dynamicText:registerComponent",
        json!({"id": "para-1"}),
    )));
    settle().await;
    assert_eq!(t.store.watcher_count(&"q9".into()), 1);
    assert_eq!(t.coordinator.registered(), vec!["para-1".to_string()]);

    let (_, mut second) = t.mount(instance("q1"));
    assert_eq!(t.store.watcher_count(&"q9".into()), 0);
    assert!(t.coordinator.registered().is_empty());

    second.handshake().await;
    second
        .next_matching(|m| matches!(m, HostMessage::InitInteractive(_)))
        .await;
    let runtime = t.session.runtime(&"q1".into()).unwrap();
    assert_eq!(runtime.linked_listener_count(), 0);
    assert_eq!(runtime.generation(), Generation(2));
}

#[tokio::test]
async fn test_reconnect_abandons_pending_request() {
    let t = test_session();
    let _first = t.connect(instance("q1")).await;
    let runtime = t.session.runtime(&"q1".into()).unwrap();
    let stale = runtime.request_state(None).unwrap();
    let _shared = runtime.request_state(None).unwrap();

    let mut second = t.connect(instance("q1")).await;
    assert_eq!(runtime.generation(), Generation(2));

    let fresh = runtime.request_state(None).unwrap();
    assert!(matches!(
        second.next_message().await,
        HostMessage::GetInteractiveState(None)
    ));
    second.send(&InteractiveMessage::InteractiveState(json!({"v": 1})));
    fresh.await.unwrap();

    let abandoned = tokio::time::timeout(Duration::from_millis(50), stale).await;
    assert!(abandoned.is_err());
}

#[tokio::test]
async fn test_ui_events_and_telemetry() {
    let t = test_session();
    let mut rx = t.session.subscribe();
    let peer = t.connect(instance("q1")).await;

    peer.send(&InteractiveMessage::Height(320.0));
    peer.send(&InteractiveMessage::Hint("try again".to_string()));
    peer.send(&InteractiveMessage::Log(LogEvent {
        event: "answer submitted".to_string(),
        value: Some(json!(3)),
        data: None,
    }));
    peer.send(&InteractiveMessage::CustomMessage(CustomMessage::new(
        "graph:zoom",
        json!({"level": 2}),
    )));
    settle().await;

    let events = drain(&mut rx);
    assert!(events.iter().any(|e| matches!(e, HostEvent::Connected { .. })));
    assert!(events
        .iter()
        .any(|e| matches!(e, HostEvent::Height { height, .. } if (*height - 320.0).abs() < f64::EPSILON)));
    assert!(events
        .iter()
        .any(|e| matches!(e, HostEvent::Hint { text, .. } if text == "try again")));
    assert!(events
        .iter()
        .any(|e| matches!(e, HostEvent::CustomMessage { message, .. } if message.kind == "graph:zoom")));

    let logged = t.telemetry.events();
    assert_eq!(logged.len(), 1);
    assert_eq!(logged[0].interactive, InteractiveId::from("q1"));
    assert_eq!(logged[0].event, "answer submitted");
}
