#![forbid(unsafe_code)]

//! Structured logging emitted by the update scheduler.
//!
//!   cargo test -p tessera-view --test tracing_tests

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tessera_view::{BindingValue, DetectionMode, EventKind, UpdateScheduler, ViewTree};
use tracing_subscriber::layer::SubscriberExt;

// ============================================================================
// Test Infrastructure
// ============================================================================

#[derive(Debug, Clone)]
struct CapturedEvent {
    level: tracing::Level,
    message: String,
    fields: HashMap<String, String>,
}

struct EventCapture {
    events: Arc<Mutex<Vec<CapturedEvent>>>,
}

struct FieldVisitor {
    message: String,
    fields: HashMap<String, String>,
}

impl tracing::field::Visit for FieldVisitor {
    fn record_debug(&mut self, field: &tracing::field::Field, value: &dyn std::fmt::Debug) {
        if field.name() == "message" {
            self.message = format!("{value:?}");
        } else {
            self.fields
                .insert(field.name().to_string(), format!("{value:?}"));
        }
    }

    fn record_u64(&mut self, field: &tracing::field::Field, value: u64) {
        self.fields.insert(field.name().to_string(), value.to_string());
    }

    fn record_str(&mut self, field: &tracing::field::Field, value: &str) {
        self.fields.insert(field.name().to_string(), value.to_string());
    }
}

impl<S: tracing::Subscriber> tracing_subscriber::Layer<S> for EventCapture {
    fn on_event(&self, event: &tracing::Event<'_>, _ctx: tracing_subscriber::layer::Context<'_, S>) {
        let mut visitor = FieldVisitor {
            message: String::new(),
            fields: HashMap::new(),
        };
        event.record(&mut visitor);
        self.events.lock().unwrap().push(CapturedEvent {
            level: *event.metadata().level(),
            message: visitor.message,
            fields: visitor.fields,
        });
    }
}

fn with_captured_events<F: FnOnce()>(f: F) -> Vec<CapturedEvent> {
    let events = Arc::new(Mutex::new(Vec::new()));
    let subscriber = tracing_subscriber::registry().with(EventCapture {
        events: Arc::clone(&events),
    });
    tracing::subscriber::with_default(subscriber, f);
    let captured = events.lock().unwrap().clone();
    captured
}

fn find<'a>(events: &'a [CapturedEvent], message: &str) -> Vec<&'a CapturedEvent> {
    events.iter().filter(|e| e.message == message).collect()
}

// ============================================================================
// Tests
// ============================================================================

#[test]
fn walk_emits_start_and_end_with_counts() {
    let events = with_captured_events(|| {
        let mut tree = ViewTree::new();
        let root = tree.create_root(DetectionMode::Default, [("n", BindingValue::from(1))]).unwrap();
        tree.create_node(root, DetectionMode::Manual, [("m", BindingValue::from(1))])
            .unwrap();
        let mut scheduler = UpdateScheduler::new();
        scheduler.schedule(&mut tree, root, EventKind::External).unwrap();
    });

    assert_eq!(find(&events, "walk start").len(), 1);
    let end = find(&events, "walk end");
    assert_eq!(end.len(), 1);
    assert_eq!(end[0].level, tracing::Level::DEBUG);
    assert_eq!(end[0].fields.get("recomputed").map(String::as_str), Some("1"));
    assert_eq!(end[0].fields.get("pruned").map(String::as_str), Some("1"));
    assert_eq!(find(&events, "pruned subtree").len(), 1);
}

#[test]
fn failures_are_logged_as_warnings() {
    let events = with_captured_events(|| {
        let mut tree = ViewTree::new();
        let root = tree.create_root(DetectionMode::Default, [("n", BindingValue::from(1))]).unwrap();
        tree.set_recompute(root, |_| Err("no data".into())).unwrap();
        let mut scheduler = UpdateScheduler::new();
        scheduler.schedule(&mut tree, root, EventKind::External).unwrap();
    });

    let failures = find(&events, "view update failed");
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].level, tracing::Level::WARN);
    assert!(failures[0].fields["error"].contains("no data"));
}

#[test]
fn manual_mark_does_not_walk() {
    let events = with_captured_events(|| {
        let mut tree = ViewTree::new();
        let root = tree.create_root(DetectionMode::Manual, [("n", BindingValue::from(1))]).unwrap();
        let mut scheduler = UpdateScheduler::new();
        scheduler.schedule(&mut tree, root, EventKind::ManualMark).unwrap();
    });

    assert!(find(&events, "walk start").is_empty());
    assert_eq!(find(&events, "marked path to root").len(), 1);
}
