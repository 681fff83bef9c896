mod common;

use pagescope::adapters::timers::{unwrap_timers, wrap_timers};
use pagescope::config::AgentSettings;
use pagescope::host::SimPage;
use pagescope::intercept::Capability;

use common::build_agent;

#[test]
fn three_wraps_three_unwraps_restore_identity() {
    let page = SimPage::new("app.example.com");
    let agent = build_agent(&page, AgentSettings::default());
    let original = page.env().slot("setTimeout").expect("native slot");

    for _ in 0..3 {
        wrap_timers(&agent);
    }
    assert_eq!(agent.registry().active_count(Capability::Timers), 3);
    assert!(page.env().slot("setTimeout").expect("slot").is_wrapper());

    unwrap_timers(&agent);
    unwrap_timers(&agent);
    // Still held by the last reference.
    assert!(page.env().slot("setTimeout").expect("slot").is_wrapper());

    unwrap_timers(&agent);
    let restored = page.env().slot("setTimeout").expect("slot");
    assert!(!restored.is_wrapper());
    assert!(restored.same_target(&original));
    assert_eq!(agent.registry().active_count(Capability::Timers), 0);
}

#[test]
fn over_release_is_a_no_op() {
    let page = SimPage::new("app.example.com");
    let agent = build_agent(&page, AgentSettings::default());
    let original = page.env().slot("setTimeout").expect("native slot");

    wrap_timers(&agent);
    unwrap_timers(&agent);
    unwrap_timers(&agent);
    unwrap_timers(&agent);

    assert!(page.env().slot("setTimeout").expect("slot").same_target(&original));

    // Wrapping still works after the extra releases.
    wrap_timers(&agent);
    assert_eq!(agent.registry().active_count(Capability::Timers), 1);
    assert!(page.env().slot("setTimeout").expect("slot").is_wrapper());
}

#[test]
fn second_wrap_does_not_rewrap() {
    let page = SimPage::new("app.example.com");
    let agent = build_agent(&page, AgentSettings::default());

    wrap_timers(&agent);
    let first = page.env().slot("setTimeout").expect("slot");
    wrap_timers(&agent);
    let second = page.env().slot("setTimeout").expect("slot");
    assert!(first.same_target(&second));
}

#[test]
fn disable_permanently_restores_and_blocks() {
    let page = SimPage::new("app.example.com");
    let agent = build_agent(&page, AgentSettings::default());
    let original = page.env().slot("setTimeout").expect("native slot");

    wrap_timers(&agent);
    agent
        .registry()
        .disable_permanently(Capability::Timers, page.env());
    assert!(page.env().slot("setTimeout").expect("slot").same_target(&original));

    // Later wrap attempts leave the native slot alone.
    wrap_timers(&agent);
    assert!(!page.env().slot("setTimeout").expect("slot").is_wrapper());
    assert_eq!(agent.registry().active_count(Capability::Timers), 0);
}
