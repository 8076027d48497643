use std::time::Duration;

use glimpse_agent::debuglet::{DebugletEvent, State};
use glimpse_inspect::{FrameSlot, InspectorValue, PauseEvent, PausedFrame};
use httpmock::prelude::*;
use httpmock::Mock;
use pretty_assertions::assert_eq;
use serde_json::json;

use crate::harness::{debuglet, fixture_with, Fixture, FOO_JS};

async fn register_mock(server: &MockServer) -> Mock<'_> {
    server
        .mock_async(|when, then| {
            when.method(POST).path("/debuggees/register");
            then.status(200).json_body(json!({"debuggee": {"id": "bar"}}));
        })
        .await
}

fn controller_fixture(server: &MockServer) -> Fixture {
    let base_url = server.base_url();
    fixture_with(&[("fixtures/foo.js", FOO_JS)], move |config| {
        config.project_id = Some("test-project".to_string());
        config.controller_base_url = base_url;
    })
}

fn paused(breakpoint_id: u64) -> PauseEvent {
    PauseEvent {
        breakpoint_id,
        frames: vec![PausedFrame {
            id: 1,
            function_name: "foo".to_string(),
            script: "fixtures/foo.js".to_string(),
            line: 1,
            column: 0,
            arguments: Vec::new(),
            locals: vec![FrameSlot {
                name: "n".to_string(),
                value: InspectorValue::Number(2.0),
            }],
        }],
    }
}

#[tokio::test]
async fn register_and_discover() -> anyhow::Result<()> {
    let server = MockServer::start_async().await;
    let register = register_mock(&server).await;

    let fx = controller_fixture(&server);
    let mut agent = debuglet(&fx);
    let mut events = agent.take_events().expect("events channel");

    agent.register_once().await?;

    register.assert_async().await;
    assert_eq!(agent.debuggee_id(), Some("bar"));
    assert_eq!(
        events.try_recv()?,
        DebugletEvent::Registered("bar".to_string())
    );
    assert_eq!(agent.state(), State::Registered);
    Ok(())
}

#[tokio::test]
async fn fetch_and_install() -> anyhow::Result<()> {
    let server = MockServer::start_async().await;
    register_mock(&server).await;
    server
        .mock_async(|when, then| {
            when.method(GET)
                .path("/debuggees/bar/breakpoints")
                .query_param("successOnTimeout", "true");
            then.status(200).json_body(json!({
                "breakpoints": [{
                    "id": "test",
                    "action": "CAPTURE",
                    "location": {"path": "fixtures/foo.js", "line": 2},
                }],
            }));
        })
        .await;

    let fx = controller_fixture(&server);
    let mut agent = debuglet(&fx);
    agent.register_once().await?;
    agent.poll_once().await?;

    let installed = agent.active_breakpoint("test").expect("installed breakpoint");
    assert_eq!(installed.action(), "CAPTURE");
    let location = installed.location.as_ref().unwrap();
    assert_eq!((location.path.as_str(), location.line), ("fixtures/foo.js", 2));
    assert_eq!(agent.api().num_breakpoints(), 1);
    assert_eq!(agent.api().num_listeners(), 1);
    Ok(())
}

#[tokio::test]
async fn duplicate_listings_install_once() {
    let server = MockServer::start_async().await;
    register_mock(&server).await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/debuggees/bar/breakpoints");
            then.status(200).json_body(json!({
                "breakpoints": [{
                    "id": "test",
                    "location": {"path": "fixtures/foo.js", "line": 2},
                }],
            }));
        })
        .await;

    let fx = controller_fixture(&server);
    let mut agent = debuglet(&fx);
    agent.register_once().await.unwrap();
    agent.poll_once().await.unwrap();
    agent.poll_once().await.unwrap();

    assert_eq!(agent.api().num_breakpoints(), 1);
}

#[tokio::test]
async fn unsupported_actions_are_rejected_with_one_update() {
    let server = MockServer::start_async().await;
    register_mock(&server).await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/debuggees/bar/breakpoints");
            then.status(200).json_body(json!({
                "breakpoints": [{
                    "id": "testLog",
                    "action": "FOO",
                    "location": {"path": "fixtures/foo.js", "line": 2},
                }],
            }));
        })
        .await;
    let update = server
        .mock_async(|when, then| {
            when.method(PUT)
                .path("/debuggees/bar/breakpoints/testLog")
                .json_body_partial(
                    r#"{
                        "breakpoint": {
                            "id": "testLog",
                            "isFinalState": true,
                            "status": {
                                "isError": true,
                                "description": {"format": "The only supported actions are CAPTURE/LOG"}
                            }
                        }
                    }"#,
                );
            then.status(200).json_body(json!({"kind": "ack"}));
        })
        .await;

    let fx = controller_fixture(&server);
    let mut agent = debuglet(&fx);
    agent.register_once().await.unwrap();
    agent.poll_once().await.unwrap();

    update.assert_async().await;
    assert!(agent.active_breakpoint("testLog").is_none());
    assert_eq!(agent.api().num_breakpoints(), 0);
    assert!(agent.is_finalized("testLog"));
}

#[tokio::test]
async fn expired_breakpoints_update_once_and_stay_finalized() {
    let server = MockServer::start_async().await;
    register_mock(&server).await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/debuggees/bar/breakpoints");
            then.status(200).json_body(json!({
                "breakpoints": [{
                    "id": "test",
                    "location": {"path": "fixtures/foo.js", "line": 2},
                }],
            }));
        })
        .await;
    let update = server
        .mock_async(|when, then| {
            when.method(PUT)
                .path("/debuggees/bar/breakpoints/test")
                .json_body_partial(
                    r#"{
                        "breakpoint": {
                            "isFinalState": true,
                            "status": {
                                "isError": true,
                                "description": {"format": "The snapshot has expired"}
                            }
                        }
                    }"#,
                );
            then.status(200).json_body(json!({"kind": "ack"}));
        })
        .await;

    let base_url = server.base_url();
    let fx = fixture_with(&[("fixtures/foo.js", FOO_JS)], move |config| {
        config.project_id = Some("test-project".to_string());
        config.controller_base_url = base_url;
        config.breakpoint_expiration_sec = 1;
        config.breakpoint_update_interval_sec = 0;
    });
    let mut agent = debuglet(&fx);
    agent.register_once().await.unwrap();
    agent.poll_once().await.unwrap();
    assert_eq!(agent.api().num_breakpoints(), 1);

    tokio::time::sleep(Duration::from_millis(1100)).await;
    agent.sweep_expired().await;

    assert_eq!(update.hits_async().await, 1);
    assert!(agent.active_breakpoint("test").is_none());
    assert_eq!(agent.api().num_breakpoints(), 0);

    // The server still lists the expired breakpoint; it must not be
    // reinstalled or re-updated.
    agent.poll_once().await.unwrap();
    agent.sweep_expired().await;
    assert_eq!(update.hits_async().await, 1);
    assert_eq!(agent.api().num_breakpoints(), 0);
}

#[tokio::test]
async fn captures_finalize_with_exactly_one_update() {
    let server = MockServer::start_async().await;
    register_mock(&server).await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/debuggees/bar/breakpoints");
            then.status(200).json_body(json!({
                "breakpoints": [{
                    "id": "test",
                    "action": "CAPTURE",
                    "location": {"path": "fixtures/foo.js", "line": 2},
                }],
            }));
        })
        .await;
    let update = server
        .mock_async(|when, then| {
            when.method(PUT)
                .path("/debuggees/bar/breakpoints/test")
                .json_body_partial(r#"{"breakpoint": {"id": "test", "isFinalState": true}}"#);
            then.status(200).json_body(json!({"kind": "ack"}));
        })
        .await;

    let fx = controller_fixture(&server);
    let mut agent = debuglet(&fx);
    agent.register_once().await.unwrap();
    agent.poll_once().await.unwrap();

    let low_id = *agent
        .api_mut()
        .inspector_mut()
        .installed()
        .keys()
        .next()
        .expect("one installed breakpoint");
    agent.api_mut().inspector_mut().push_pause(paused(low_id));
    agent.pump().await;

    assert_eq!(update.hits_async().await, 1);
    assert!(agent.active_breakpoint("test").is_none());
    assert_eq!(agent.api().num_breakpoints(), 0);
    assert!(agent.is_finalized("test"));

    // Later pauses on the same low-level id do nothing.
    agent.api_mut().inspector_mut().push_pause(paused(low_id));
    agent.pump().await;
    assert_eq!(update.hits_async().await, 1);
}

#[tokio::test]
async fn logpoints_are_installed_but_never_capture_finalized() {
    let server = MockServer::start_async().await;
    register_mock(&server).await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/debuggees/bar/breakpoints");
            then.status(200).json_body(json!({
                "breakpoints": [{
                    "id": "lp",
                    "action": "LOG",
                    "logMessageFormat": "n is $0",
                    "expressions": ["n"],
                    "location": {"path": "fixtures/foo.js", "line": 2},
                }],
            }));
        })
        .await;

    let fx = controller_fixture(&server);
    let mut agent = debuglet(&fx);
    agent.register_once().await.unwrap();
    agent.poll_once().await.unwrap();
    assert_eq!(agent.api().num_listeners(), 1);

    let low_id = *agent
        .api_mut()
        .inspector_mut()
        .installed()
        .keys()
        .next()
        .unwrap();
    agent
        .api_mut()
        .inspector_mut()
        .set_evaluation(1, "n", Ok(InspectorValue::Number(2.0)));
    agent.api_mut().inspector_mut().push_pause(paused(low_id));
    agent.pump().await;

    // Still active: logpoints are only removed by the server or expiry.
    assert!(agent.active_breakpoint("lp").is_some());
    assert_eq!(agent.api().num_breakpoints(), 1);
    assert!(!agent.is_finalized("lp"));
}

#[tokio::test]
async fn server_removals_clear_without_updates() {
    let server = MockServer::start_async().await;
    register_mock(&server).await;
    let mut list = server
        .mock_async(|when, then| {
            when.method(GET).path("/debuggees/bar/breakpoints");
            then.status(200).json_body(json!({
                "breakpoints": [{
                    "id": "gone",
                    "location": {"path": "fixtures/foo.js", "line": 2},
                }],
            }));
        })
        .await;

    let fx = controller_fixture(&server);
    let mut agent = debuglet(&fx);
    agent.register_once().await.unwrap();
    agent.poll_once().await.unwrap();
    assert_eq!(agent.api().num_breakpoints(), 1);

    // Next poll returns an empty set.
    list.delete_async().await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/debuggees/bar/breakpoints");
            then.status(200).json_body(json!({"breakpoints": []}));
        })
        .await;

    agent.poll_once().await.unwrap();
    assert!(agent.active_breakpoint("gone").is_none());
    assert_eq!(agent.api().num_breakpoints(), 0);
    // Removal is silent; nothing was finalized.
    assert!(!agent.is_finalized("gone"));
}

#[test]
fn bootstrap_wires_the_full_agent() {
    let fx = fixture_with(&[("fixtures/foo.js", FOO_JS)], |config| {
        config.project_id = Some("test-project".to_string());
    });

    let agent = glimpse_agent::bootstrap(
        (*fx.config).clone(),
        glimpse_inspect::MockInspectorClient::new(),
    )
    .expect("bootstrap");

    assert!(!agent.debuggee().uniquifier.is_empty());
    assert!(agent.debuggee().agent_version.starts_with("glimpse-agent/"));
    assert_eq!(agent.debuggee().project, "test-project");
}

#[tokio::test]
async fn missing_project_id_stops_with_an_init_error() {
    let fx = fixture_with(&[("fixtures/foo.js", FOO_JS)], |config| {
        config.controller_base_url = "http://127.0.0.1:1".to_string();
    });
    let mut agent = debuglet(&fx);
    let mut events = agent.take_events().unwrap();

    assert!(agent.run().await.is_err());
    assert!(matches!(
        events.try_recv().unwrap(),
        DebugletEvent::InitError(_)
    ));
    assert_eq!(agent.state(), State::Stopped);
}

#[tokio::test]
async fn run_loop_polls_and_stops_cleanly() {
    let server = MockServer::start_async().await;
    register_mock(&server).await;
    let list = server
        .mock_async(|when, then| {
            when.method(GET).path("/debuggees/bar/breakpoints");
            then.status(200).json_body(json!({"waitExpired": true}));
        })
        .await;

    let fx = controller_fixture(&server);
    let mut agent = debuglet(&fx);
    let mut events = agent.take_events().unwrap();
    let shutdown = agent.shutdown_handle();

    let task = tokio::spawn(async move {
        let result = agent.run().await;
        (agent, result)
    });

    tokio::time::sleep(Duration::from_millis(200)).await;
    shutdown.stop();
    let (agent, result) = task.await.unwrap();
    result.unwrap();

    assert!(list.hits_async().await >= 1);
    assert_eq!(agent.state(), State::Stopped);

    let mut seen = Vec::new();
    while let Ok(event) = events.try_recv() {
        seen.push(event);
    }
    assert!(seen.contains(&DebugletEvent::Registered("bar".to_string())));
    assert!(seen.contains(&DebugletEvent::Stopped));
}
