mod common;

use std::sync::Arc;

use parking_lot::Mutex;

use pagescope::bus::{InvocationContext, TimerMethod};
use pagescope::config::AgentSettings;
use pagescope::host::{Callback, SimPage, Value};

use common::build_agent;

#[test]
fn one_shot_timer_fires_with_extra_args() {
    let page = SimPage::new("app.example.com");
    let agent = build_agent(&page, AgentSettings::default());
    let _aggregator = agent.instrument();
    let env = page.env();

    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let cb = Callback::new(move |_, args| {
        sink.lock()
            .extend(args.iter().filter_map(Value::as_number));
    });
    env.call(
        "setTimeout",
        vec![
            Value::Func(cb),
            Value::Number(20.0),
            Value::Number(7.0),
            Value::Number(8.0),
        ],
    )
    .expect("setTimeout");

    env.advance(10.0);
    assert!(seen.lock().is_empty());
    env.advance(15.0);
    assert_eq!(seen.lock().as_slice(), [7.0, 8.0]);
    assert_eq!(env.pending_tasks(), 0);
}

#[test]
fn interval_repeats_until_cleared() {
    let page = SimPage::new("app.example.com");
    let agent = build_agent(&page, AgentSettings::default());
    let _aggregator = agent.instrument();
    let env = page.env();

    let fires = Arc::new(Mutex::new(0u32));
    let sink = Arc::clone(&fires);
    let cb = Callback::new(move |_, _| *sink.lock() += 1);
    let id = env
        .call(
            "setInterval",
            vec![Value::Func(cb), Value::Number(10.0)],
        )
        .expect("setInterval");

    env.advance(35.0);
    assert_eq!(*fires.lock(), 3);

    env.call("clearTimeout", vec![id]).expect("clearTimeout");
    env.advance(50.0);
    assert_eq!(*fires.lock(), 3);
    assert_eq!(env.pending_tasks(), 0);
}

#[test]
fn cancellation_reconciles_the_expected_counter() {
    let page = SimPage::new("app.example.com");
    let agent = build_agent(&page, AgentSettings::default());
    let _aggregator = agent.instrument();
    let env = page.env();

    let contexts: Arc<Mutex<Vec<InvocationContext>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&contexts);
    agent
        .bus()
        .get("timer")
        .on("setTimeout-timer-start", move |_, _, ctx| {
            if let Some(ctx) = ctx {
                sink.lock().push(ctx.clone());
            }
            Ok(())
        });

    let cb = Callback::new(|_, _| {});
    let id = env
        .call("setTimeout", vec![Value::Func(cb), Value::Number(30.0)])
        .expect("setTimeout");
    env.call("clearTimeout", vec![id]).expect("clearTimeout");
    env.run_until_idle();

    let contexts = contexts.lock();
    assert_eq!(contexts.len(), 1);
    let (expected, fired, timer) =
        contexts[0].with(|d| (d.expected_callbacks, d.fired_callbacks, d.timer));
    assert_eq!(fired, 0);
    // The cancel path released the slot the callback would have filled.
    assert_eq!(expected, 0);
    assert_eq!(timer.map(|t| t.method), Some(TimerMethod::Once));
    assert_eq!(timer.map(|t| t.delay_ms), Some(30.0));
}

#[test]
fn negative_delay_is_coerced_to_zero() {
    let page = SimPage::new("app.example.com");
    let agent = build_agent(&page, AgentSettings::default());
    let _aggregator = agent.instrument();
    let env = page.env();

    let contexts: Arc<Mutex<Vec<InvocationContext>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&contexts);
    agent
        .bus()
        .get("timer")
        .on("setTimeout-timer-start", move |_, _, ctx| {
            if let Some(ctx) = ctx {
                sink.lock().push(ctx.clone());
            }
            Ok(())
        });

    let fired = Arc::new(Mutex::new(false));
    let flag = Arc::clone(&fired);
    env.call(
        "setTimeout",
        vec![
            Value::Func(Callback::new(move |_, _| *flag.lock() = true)),
            Value::Number(-5.0),
        ],
    )
    .expect("setTimeout");
    env.advance(0.0);

    assert!(*fired.lock());
    let delay = contexts.lock()[0].with(|d| d.timer.map(|t| t.delay_ms));
    assert_eq!(delay, Some(0.0));
}
