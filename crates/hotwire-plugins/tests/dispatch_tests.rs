//! End-to-end dispatch behaviour against real script plugins.

mod common;

use std::sync::Arc;
use std::time::{Duration, Instant};

use common::{Sandbox, direct, in_group};
use hotwire_kernel::{HandlerFailure, HandlerOutcome};

// ============================================================================
// Ordering and chains
// ============================================================================

#[tokio::test]
async fn lower_priority_side_effects_come_first() {
    let sandbox = Sandbox::new();
    sandbox.write(
        "order/late.rhai",
        r#"
        fn register(r) { r.plugin("Late", 50).handle("^go$", "relay"); }
        fn relay(event) { event.reply("late"); continue_chain() }
        "#,
    );
    sandbox.write(
        "order/early.rhai",
        r#"
        fn register(r) { r.plugin("Early", 5).handle("^go$", "relay"); }
        fn relay(event) { event.reply("early"); continue_chain() }
        "#,
    );
    sandbox.host.load_all();

    let event = direct("go", false);
    assert!(sandbox.host.dispatch(event.clone()).await);
    assert_eq!(event.reply_texts(), ["early", "late"]);
}

#[tokio::test]
async fn continue_sentinel_lets_next_handler_run() {
    let sandbox = Sandbox::new();
    sandbox.write(
        "chain/pin.rhai",
        r#"
        fn register(r) { r.plugin("Pin", 5).handle("^pin.$", "pin"); }
        fn pin(event) { event.reply("pin"); continue_chain() }
        "#,
    );
    sandbox.write(
        "chain/ping.rhai",
        r#"
        fn register(r) { r.plugin("Ping", 10).handle("^ping$", "ping"); }
        fn ping(event) { event.reply("ping"); true }
        "#,
    );
    sandbox.write(
        "chain/tail.rhai",
        r#"
        fn register(r) { r.plugin("Tail", 20).handle("^p", "tail"); }
        fn tail(event) { event.reply("tail"); }
        "#,
    );
    sandbox.host.load_all();

    let event = direct("ping", true);
    let report = sandbox.host.dispatch_detailed(event.clone()).await;
    assert!(report.matched);
    assert_eq!(event.reply_texts(), ["pin", "ping"]);
    assert_eq!(report.executed.len(), 2);
    assert!(report.executed[0].outcome.is_continue());
}

#[tokio::test]
async fn handler_without_return_value_stops_the_chain() {
    let sandbox = Sandbox::new();
    sandbox.write(
        "chain/quiet.rhai",
        r#"
        fn register(r) {
            r.plugin("Quiet", 1).handle("^hi", "quiet");
            r.plugin("After", 2).handle("^hi", "after");
        }
        fn quiet(event) { event.reply("quiet"); }
        fn after(event) { event.reply("after"); }
        "#,
    );
    sandbox.host.load_all();

    let event = direct("hi there", false);
    assert!(sandbox.host.dispatch(event.clone()).await);
    assert_eq!(event.reply_texts(), ["quiet"]);
}

#[tokio::test]
async fn captures_reach_the_handler() {
    let sandbox = Sandbox::new();
    sandbox.write(
        "dice/roll.rhai",
        r#"
        fn register(r) { r.plugin("Dice").handle("roll (\\d+)d(\\d+)(?: \\+(\\d+))?", "roll"); }
        fn roll(event) {
            let bonus = if event.matches[2] == () { "0" } else { event.matches[2] };
            event.reply(`${event.matches[0]}x${event.matches[1]}+${bonus}`);
        }
        "#,
    );
    sandbox.host.load_all();

    let event = direct("roll 2d6 please", false);
    assert!(sandbox.host.dispatch(event.clone()).await);
    assert_eq!(event.reply_texts(), ["2x6+0"]);

    // anchored at the start only
    assert!(!sandbox.host.dispatch(direct("please roll 2d6", false)).await);
}

// ============================================================================
// Permissions
// ============================================================================

#[tokio::test]
async fn owner_only_match_is_unmatched_for_others() {
    let sandbox = Sandbox::new();
    sandbox.write(
        "admin/secret.rhai",
        r#"
        fn register(r) {
            r.plugin("Secret").handle("^secret$", #{ handler: "reveal", owner_only: true });
        }
        fn reveal(event) { event.reply("the secret"); }
        "#,
    );
    sandbox.host.load_all();

    let stranger = direct("secret", false);
    let report = sandbox.host.dispatch_detailed(stranger.clone()).await;
    assert!(!report.matched);
    assert_eq!(report.denials.len(), 1);
    assert!(stranger.replies().is_empty());

    let owner = direct("secret", true);
    assert!(sandbox.host.dispatch(owner.clone()).await);
    assert_eq!(owner.reply_texts(), ["the secret"]);
}

#[tokio::test]
async fn group_only_handler_needs_a_group_chat() {
    let sandbox = Sandbox::new();
    sandbox.write(
        "group/roll_call.rhai",
        r#"
        fn register(r) {
            r.plugin("RollCall").handle("^here$", #{ handler: "here", group_only: true });
        }
        fn here(event) { event.reply(`${event.user_id} in ${event.group_id}`); }
        "#,
    );
    sandbox.host.load_all();

    assert!(!sandbox.host.dispatch(direct("here", true)).await);
    let event = in_group("here");
    assert!(sandbox.host.dispatch(event.clone()).await);
    assert_eq!(event.reply_texts(), ["user-2 in group-7"]);
}

// ============================================================================
// Isolation
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn slow_handler_times_out_without_blocking_others() {
    let sandbox = Arc::new(Sandbox::with_config(|c| c.handler_timeout_ms = 300));
    sandbox.write(
        "slow/sleepy.rhai",
        r#"
        fn register(r) { r.plugin("Sleepy").handle("^sleep$", "sleepy"); }
        fn sleepy(event) { sleep_ms(5000); event.reply("woke up"); }
        "#,
    );
    sandbox.write(
        "slow/quick.rhai",
        r#"
        fn register(r) { r.plugin("Quick").handle("^quick$", "quick"); }
        fn quick(event) { event.reply("fast"); }
        "#,
    );
    sandbox.host.load_all();

    let started = Instant::now();
    let slow_event = direct("sleep", false);
    let slow = {
        let sandbox = sandbox.clone();
        let event = slow_event.clone();
        tokio::spawn(async move { sandbox.host.dispatch_detailed(event).await })
    };
    tokio::time::sleep(Duration::from_millis(30)).await;

    let quick_started = Instant::now();
    let quick = direct("quick", false);
    assert!(sandbox.host.dispatch(quick.clone()).await);
    assert!(quick_started.elapsed() < Duration::from_millis(250));
    assert_eq!(quick.reply_texts(), ["fast"]);

    let report = slow.await.unwrap();
    assert!(report.matched);
    assert!(started.elapsed() < Duration::from_millis(1500));
    assert!(matches!(
        report.executed[0].outcome,
        HandlerOutcome::Stop(Err(HandlerFailure::TimedOut(_)))
    ));
    assert!(slow_event.replies().is_empty());
    assert!(sandbox.logs.error_logs().is_empty());
}

#[tokio::test]
async fn script_error_is_reported_with_context() {
    let sandbox = Sandbox::with_config(|c| c.error_content_limit = 12);
    sandbox.write(
        "bad/thrower.rhai",
        r#"
        fn register(r) { r.plugin("Thrower").handle("^explode", "explode"); }
        fn explode(event) { throw "kaboom"; }
        "#,
    );
    sandbox.host.load_all();

    let event = in_group("explode with a very long message attached");
    let report = sandbox.host.dispatch_detailed(event).await;
    assert!(report.matched);
    assert!(matches!(
        report.executed[0].outcome,
        HandlerOutcome::Stop(Err(HandlerFailure::Error(_)))
    ));

    let errors = sandbox.logs.error_logs();
    assert_eq!(errors.len(), 1);
    let (text, detail) = &errors[0];
    assert!(text.contains("Thrower"));
    assert!(text.contains("kaboom"));
    assert!(detail.contains("plugin: bad/thrower.rhai:Thrower"));
    assert!(detail.contains("handler: explode"));
    assert!(detail.contains("user: user-2"));
    assert!(detail.contains("chat: group-7"));
    assert!(detail.contains("content: explode with"));
    assert!(!detail.contains("very long"));
}

#[tokio::test]
async fn replies_are_mirrored_to_the_plugin_log() {
    let sandbox = Sandbox::new();
    sandbox.write(
        "media/pics.rhai",
        r#"
        fn register(r) { r.plugin("Pics").handle("^pic$", "pic"); }
        fn pic(event) {
            event.reply("here you go");
            event.reply_image("https://img.example/cat.png", "a cat");
            event.reply_ark(24, #{ title: "card" });
        }
        "#,
    );
    sandbox.host.load_all();

    assert!(sandbox.host.dispatch(direct("pic", false)).await);
    let logs = sandbox.logs.plugin_logs();
    let texts: Vec<_> = logs.iter().map(|(text, _)| text.as_str()).collect();
    assert_eq!(texts, ["here you go", "[image] a cat", "[ark] 24"]);
    assert!(logs.iter().all(|(_, plugin)| plugin == "Pics"));
}
