//! Bridge: sync/async modes, overlap guard, cancellation, availability.
//!
//! Plain `#[test]`s: the bridge owns its runtime and must not be driven from
//! inside another one.

mod common;

use common::{count, registry, ScriptedTunnel};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tunnelvision::bridge::{IN_PROGRESS, UNAVAILABLE};
use tunnelvision::{Bridge, BridgeEvent, CircuitRegistry, RequestId, Router, TunnelRegistry};

fn bridge(tunnels: TunnelRegistry, default_circuit: &str) -> Bridge {
    let circuits = CircuitRegistry::with_builtins(Arc::new(tunnels));
    let router = Router::new(Arc::new(circuits), default_circuit);
    Bridge::new(Arc::new(router)).unwrap()
}

/// Collect events for `id` until its `Done` arrives
fn events_for(bridge: &Bridge, id: RequestId) -> Vec<BridgeEvent> {
    let deadline = Instant::now() + Duration::from_secs(5);
    let mut events = Vec::new();
    while Instant::now() < deadline {
        if let Some(event) = bridge.next_event_timeout(Duration::from_millis(50)) {
            if event.id() != id {
                continue;
            }
            let done = matches!(event, BridgeEvent::Done { .. });
            events.push(event);
            if done {
                return events;
            }
        }
    }
    panic!("no Done for request {id}, got {events:?}");
}

#[test]
fn test_send_blocking_returns_text() {
    let bridge = bridge(registry(vec![ScriptedTunnel::ok("echo", "pong")]), "echo");
    assert_eq!(bridge.send_blocking("ping"), "pong");
}

#[test]
fn test_send_blocking_renders_failures_inline() {
    let bridge = bridge(registry(vec![ScriptedTunnel::failing("flaky", "refused")]), "flaky");
    assert!(bridge.is_available());
    assert_eq!(bridge.send_blocking("ping"), "[Error: refused]");
}

#[test]
fn test_submit_delivers_response_then_done() {
    let bridge = bridge(registry(vec![ScriptedTunnel::ok("echo", "pong")]), "echo");

    let submission = bridge.submit("ping");
    assert!(submission.started);

    let events = events_for(&bridge, submission.id);
    assert_eq!(
        events,
        vec![
            BridgeEvent::Response {
                id: submission.id,
                text: "pong".to_string(),
            },
            BridgeEvent::Done { id: submission.id },
        ]
    );
    assert!(!bridge.is_running());
}

#[test]
fn test_overlapping_submit_is_rejected() {
    let (slow, gate) = ScriptedTunnel::ok("slow", "done").gated();
    let calls = slow.calls();
    let bridge = bridge(registry(vec![slow]), "slow");

    let first = bridge.submit("one");
    assert!(first.started);
    assert!(bridge.is_running());

    let second = bridge.submit("two");
    assert!(!second.started);
    assert_eq!(bridge.send_blocking("three"), IN_PROGRESS);

    assert_eq!(
        events_for(&bridge, second.id),
        vec![
            BridgeEvent::Response {
                id: second.id,
                text: IN_PROGRESS.to_string(),
            },
            BridgeEvent::Done { id: second.id },
        ]
    );

    gate.notify_one();
    let first_events = events_for(&bridge, first.id);
    assert_eq!(first_events.len(), 2);
    assert_eq!(count(&calls), 1);
    assert!(bridge.submit("four").started);
}

#[test]
fn test_cancel_drops_the_request() {
    let (slow, _gate) = ScriptedTunnel::ok("slow", "too late").gated();
    let bridge = bridge(registry(vec![slow]), "slow");

    let submission = bridge.submit("wait");
    assert!(submission.started);

    assert!(bridge.cancel());
    assert!(!bridge.is_running());
    assert!(!bridge.cancel());

    std::thread::sleep(Duration::from_millis(100));
    assert!(bridge.poll_events().is_empty());

    let next = bridge.submit("again");
    assert!(next.started);
    assert!(bridge.cancel());
}

#[test]
fn test_unavailable_circuit_emits_only_done() {
    let offline = ScriptedTunnel::offline("offline");
    let calls = offline.calls();
    let bridge = bridge(registry(vec![offline]), "offline");

    assert!(!bridge.is_available());
    assert_eq!(bridge.send_blocking("hi"), UNAVAILABLE);

    let submission = bridge.submit("hi");
    assert!(!submission.started);
    assert_eq!(
        events_for(&bridge, submission.id),
        vec![BridgeEvent::Done { id: submission.id }]
    );
    assert!(!bridge.is_running());
    assert_eq!(count(&calls), 0);
}

#[test]
fn test_submit_probes_off_the_caller_thread() {
    let offline = ScriptedTunnel::offline("offline").with_probe_delay(Duration::from_millis(500));
    let bridge = bridge(registry(vec![offline]), "offline");

    let before = Instant::now();
    let submission = bridge.submit("hi");
    assert!(before.elapsed() < Duration::from_millis(250));
    assert!(submission.started);

    assert_eq!(
        events_for(&bridge, submission.id),
        vec![BridgeEvent::Done { id: submission.id }]
    );

    // Known now, so the next one is turned away without spawning.
    let again = bridge.submit("hi");
    assert!(!again.started);
    assert_eq!(
        events_for(&bridge, again.id),
        vec![BridgeEvent::Done { id: again.id }]
    );
}

#[test]
fn test_override_runs_when_default_is_offline() {
    let echo = ScriptedTunnel::ok("echo", "e");
    let echo_calls = echo.calls();
    let bridge = bridge(
        registry(vec![ScriptedTunnel::offline("offline"), echo]),
        "offline",
    );

    assert!(!bridge.is_available());
    assert_eq!(bridge.send_blocking("hi"), UNAVAILABLE);
    assert_eq!(bridge.send_blocking("@echo hi"), "e");
    assert_eq!(count(&echo_calls), 1);
    assert_eq!(bridge.router().current(), "echo");
}

#[test]
fn test_submit_override_when_default_is_offline() {
    let echo = ScriptedTunnel::ok("echo", "e");
    let echo_calls = echo.calls();
    let bridge = bridge(
        registry(vec![ScriptedTunnel::offline("offline"), echo]),
        "offline",
    );
    assert!(!bridge.is_available());

    let submission = bridge.submit("@echo hi");
    assert!(submission.started);
    assert_eq!(
        events_for(&bridge, submission.id),
        vec![
            BridgeEvent::Response {
                id: submission.id,
                text: "e".to_string(),
            },
            BridgeEvent::Done { id: submission.id },
        ]
    );
    assert_eq!(count(&echo_calls), 1);
}

#[test]
fn test_bare_sigil_switches_away_from_offline_default() {
    let bridge = bridge(
        registry(vec![
            ScriptedTunnel::offline("offline"),
            ScriptedTunnel::ok("echo", "e"),
        ]),
        "offline",
    );
    assert!(!bridge.is_available());

    assert_eq!(bridge.send_blocking("@echo"), "[Switched to circuit: echo]");
    assert!(bridge.is_available());
    assert_eq!(bridge.send_blocking("hi"), "e");
}

#[test]
fn test_bare_sigil_switches_through_bridge() {
    let bridge = bridge(
        registry(vec![
            ScriptedTunnel::ok("echo", "e"),
            ScriptedTunnel::ok("other", "o"),
        ]),
        "echo",
    );

    assert_eq!(bridge.send_blocking("@other"), "[Switched to circuit: other]");
    assert_eq!(bridge.router().current(), "other");
    assert_eq!(bridge.send_blocking("hi"), "o");
}

#[test]
fn test_stale_default_circuit_degrades_to_error() {
    let bridge = bridge(registry(vec![ScriptedTunnel::ok("echo", "e")]), "retired");
    assert!(bridge.is_available());
    assert_eq!(bridge.send_blocking("hi"), "[Error: Unknown circuit: retired]");
}

#[test]
fn test_invalidate_availability_reprobes() {
    let bridge = bridge(registry(vec![ScriptedTunnel::ok("echo", "e")]), "echo");
    assert!(bridge.is_available());
    bridge.invalidate_availability();
    assert!(bridge.is_available());
    assert_eq!(bridge.send_blocking("hi"), "e");
}
