//! Behavioral tests for the admission controller through its public,
//! wall-clock API. Exact token arithmetic at a pinned clock is covered by
//! the unit tests inside the module.

use std::collections::HashMap;

use mcp_deliberation::admission::{
    AdmissionController, AdmissionSettings, AdmissionStats, BucketLimits, DEFAULT_CALLER,
};
use mcp_deliberation::error::AdmissionError;

fn tight_settings() -> AdmissionSettings {
    let mut operations = HashMap::new();
    operations.insert("insert_thought".to_string(), BucketLimits::new(3.0, 0.001));
    operations.insert("query".to_string(), BucketLimits::new(50.0, 0.001));
    AdmissionSettings {
        operations,
        default_limits: BucketLimits::new(2.0, 0.001),
        window_secs: 3600,
    }
}

#[test]
fn allows_until_capacity_is_spent_then_denies() {
    let mut controller = AdmissionController::new(tight_settings());

    for _ in 0..3 {
        controller
            .check("insert_thought", None)
            .expect("within capacity");
    }

    let err = controller.check("insert_thought", None).unwrap_err();
    let AdmissionError::RateLimited {
        operation,
        retry_after_ms,
    } = err;
    assert_eq!(operation, "insert_thought");
    assert!(retry_after_ms > 0, "denial must carry a retry hint");
}

#[test]
fn denial_does_not_drain_other_operations() {
    let mut controller = AdmissionController::new(tight_settings());

    for _ in 0..3 {
        controller.check("insert_thought", None).unwrap();
    }
    assert!(controller.check("insert_thought", None).is_err());

    // The query class has its own bucket.
    controller.check("query", None).expect("query unaffected");
}

#[test]
fn unknown_operation_is_created_with_default_limits() {
    let mut controller = AdmissionController::new(tight_settings());

    controller.check("export_graphviz", None).unwrap();
    controller.check("export_graphviz", None).unwrap();
    assert!(controller.check("export_graphviz", None).is_err());

    let stats = controller.stats("export_graphviz", None);
    assert_eq!(stats.capacity, 2.0);
}

#[test]
fn stats_report_the_advertised_fields() {
    let mut controller = AdmissionController::new(tight_settings());
    controller.check("query", None).unwrap();

    let AdmissionStats {
        operation,
        tokens_remaining,
        capacity,
        refill_rate,
        requests_in_current_window,
    } = controller.stats("query", None);

    assert_eq!(operation, "query");
    assert_eq!(capacity, 50.0);
    assert_eq!(refill_rate, 0.001);
    assert!(tokens_remaining <= capacity);
    assert!(tokens_remaining >= 48.9, "one token spent plus tiny refill");
    assert_eq!(requests_in_current_window, 1);
}

#[test]
fn window_counter_is_keyed_by_caller() {
    let mut controller = AdmissionController::new(tight_settings());

    controller.check("query", Some("alice")).unwrap();
    controller.check("query", Some("alice")).unwrap();
    controller.check("query", None).unwrap();

    assert_eq!(
        controller.stats("query", Some("alice")).requests_in_current_window,
        2
    );
    assert_eq!(
        controller
            .stats("query", Some(DEFAULT_CALLER))
            .requests_in_current_window,
        1
    );
}

#[test]
fn callers_get_independent_buckets() {
    let mut controller = AdmissionController::new(tight_settings());

    for _ in 0..3 {
        controller.check("insert_thought", Some("alice")).unwrap();
    }
    assert!(controller.check("insert_thought", Some("alice")).is_err());
    controller
        .check("insert_thought", Some("bob"))
        .expect("bob has a fresh bucket");
}
