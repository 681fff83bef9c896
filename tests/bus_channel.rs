mod common;

use std::sync::Arc;

use parking_lot::Mutex;

use pagescope::bus::{Channel, Payload};
use pagescope::error::AgentError;

use common::record_events;

fn metric(name: &str) -> Payload {
    Payload::Metric {
        name: name.to_string(),
        value: 1.0,
        entity: None,
    }
}

#[test]
fn children_are_memoized() {
    let root = Channel::root(false);
    let log = record_events(&root.get("feature"), &["ping"]);
    root.get("feature").emit("ping", &mut metric("ping"), None);
    assert_eq!(log.lock().as_slice(), ["ping"]);
}

#[test]
fn buffered_events_replay_on_drain() {
    let root = Channel::root(false);
    let channel = root.get("feature");
    channel.buffer(&["late"], "startup");

    channel.emit("late", &mut metric("one"), None);
    channel.emit("late", &mut metric("two"), None);

    let log = record_events(&channel, &["late"]);
    assert!(log.lock().is_empty());

    channel.drain("startup");
    assert_eq!(log.lock().len(), 2);

    // The bucket is live from here on.
    channel.emit("late", &mut metric("three"), None);
    assert_eq!(log.lock().len(), 3);
}

#[test]
fn drained_bucket_never_buffers_again() {
    let root = Channel::root(false);
    let channel = root.get("feature");
    channel.buffer(&["late"], "startup");
    channel.drain("startup");

    // Re-marking after the drain must not capture.
    channel.buffer(&["late"], "startup");
    let log = record_events(&channel, &["late"]);
    channel.emit("late", &mut metric("x"), None);
    assert_eq!(log.lock().len(), 1);
}

#[test]
fn reentrant_emit_is_suppressed() {
    let root = Channel::root(false);
    let channel = root.get("feature");
    let inner_log = record_events(&channel, &["inner"]);

    let nested = channel.clone();
    channel.on("outer", move |_, _, _| {
        nested.emit("inner", &mut metric("inner"), None);
        Ok(())
    });
    channel.emit("outer", &mut metric("outer"), None);
    assert!(inner_log.lock().is_empty());
}

#[test]
fn emit_force_bypasses_suppression() {
    let root = Channel::root(false);
    let channel = root.get("feature");
    let inner_log = record_events(&channel, &["inner"]);

    let nested = channel.clone();
    channel.on("outer", move |_, _, _| {
        nested.emit_force("inner", &mut metric("inner"), None);
        Ok(())
    });
    channel.emit("outer", &mut metric("outer"), None);
    assert_eq!(inner_log.lock().len(), 1);
}

#[test]
fn always_bus_skips_suppression() {
    let root = Channel::root(true);
    let channel = root.get("feature");
    let inner_log = record_events(&channel, &["inner"]);

    let nested = channel.clone();
    channel.on("outer", move |_, _, _| {
        nested.emit("inner", &mut metric("inner"), None);
        Ok(())
    });
    channel.emit("outer", &mut metric("outer"), None);
    assert_eq!(inner_log.lock().len(), 1);
}

#[test]
fn failing_handler_reports_internal_error() {
    let root = Channel::root(false);
    let channel = root.get("feature");
    let errors = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&errors);
    root.on("internal-error", move |_, payload, _| {
        if let Payload::InternalError { message } = payload {
            sink.lock().push(message.clone());
        }
        Ok(())
    });

    channel.on("boom", |_, _, _| Err(AgentError::Handler("bad subscriber".to_string())));
    let after = record_events(&channel, &["boom"]);

    channel.emit("boom", &mut metric("boom"), None);
    // The sibling registered after the failing handler still ran.
    assert_eq!(after.lock().len(), 1);
    assert_eq!(errors.lock().len(), 1);
    assert!(errors.lock()[0].contains("bad subscriber"));
}

#[test]
fn panicking_handler_does_not_abort_siblings() {
    let root = Channel::root(false);
    let channel = root.get("feature");
    let errors = record_events(&root, &["internal-error"]);

    channel.on("boom", |_, _, _| panic!("handler exploded"));
    let after = record_events(&channel, &["boom"]);

    channel.emit("boom", &mut metric("boom"), None);
    assert_eq!(after.lock().len(), 1);
    assert_eq!(errors.lock().len(), 1);
}

#[test]
fn contexts_are_keyed_and_removable() {
    let root = Channel::root(false);
    let channel = root.get("feature");

    let ctx = channel.context(42);
    ctx.with(|d| d.interaction = Some(7));
    assert!(channel.context(42).same_context(&ctx));

    let other = root.get("other").context(42);
    assert!(!other.same_context(&ctx));

    let taken = channel.take_context(42).expect("context present");
    assert!(taken.same_context(&ctx));
    assert!(!channel.context(42).same_context(&ctx));
}
