//! Fleet scenarios: sampling, partitioning and teardown across many hosts.

use gpu_selftest_client::{
    quick_settings, session_over, stop_signal, FleetOptions, FleetOrchestrator, MockPlatform,
    StopSignal,
};
use selftest_core::{summarize_fleet, SamplePercent};
use selftest_types::HostId;
use std::collections::BTreeSet;

fn ids(range: std::ops::RangeInclusive<u64>) -> Vec<HostId> {
    range.map(HostId::new).collect()
}

fn orchestrator(platform: &MockPlatform, options: FleetOptions) -> FleetOrchestrator {
    FleetOrchestrator::new(session_over(platform.clone(), quick_settings()), options).unwrap()
}

// ============================================================================
// Partitioning
// ============================================================================

/// One host never becomes ready; the others pass and nothing is left running.
#[tokio::test]
async fn slow_host_fails_alone() {
    let platform = MockPlatform::healthy_fleet(ids(1..=3));
    platform.never_ready(HostId::new(2));

    let run = orchestrator(&platform, FleetOptions::default())
        .run(&ids(1..=3), StopSignal::never())
        .await
        .unwrap();

    assert_eq!(
        run.passed,
        BTreeSet::from([HostId::new(1), HostId::new(3)])
    );
    assert_eq!(run.failed, BTreeSet::from([HostId::new(2)]));
    let failure = run.reports[&HostId::new(2)].failure.as_ref().unwrap();
    assert_eq!(failure.kind(), "ProvisionTimeout");
    assert_eq!(platform.live_instances(), 0);

    let text = summarize_fleet(&run);
    assert!(text.contains("3 selected, 2 passed, 1 failed"));
    assert!(text.contains("FAIL 2: ProvisionTimeout"));
}

// ============================================================================
// Sampling
// ============================================================================

/// 30% of 100 hosts selects 30 distinct hosts.
#[tokio::test]
async fn thirty_percent_of_a_hundred() {
    let platform = MockPlatform::healthy_fleet(ids(1..=100));
    let options = FleetOptions {
        sample: SamplePercent::new(30.0).unwrap(),
        seed: Some(42),
        concurrency: 16,
        ..Default::default()
    };

    let run = orchestrator(&platform, options)
        .run(&ids(1..=100), StopSignal::never())
        .await
        .unwrap();

    let distinct: BTreeSet<_> = run.selected.iter().copied().collect();
    assert_eq!(run.selected.len(), 30);
    assert_eq!(distinct.len(), 30);
    assert_eq!(run.passed.len() + run.failed.len(), 30);
    assert_eq!(platform.total_created(), 30);
}

/// 100% selects the whole fleet.
#[tokio::test]
async fn full_sample_tests_everyone() {
    let platform = MockPlatform::healthy_fleet(ids(1..=12));

    let run = orchestrator(&platform, FleetOptions::default())
        .run(&ids(1..=12), StopSignal::never())
        .await
        .unwrap();

    assert_eq!(run.selected.len(), 12);
    assert_eq!(run.passed.len(), 12);
}

/// The same seed selects the same hosts.
#[tokio::test]
async fn seeded_runs_are_reproducible() {
    let options = FleetOptions {
        sample: SamplePercent::new(40.0).unwrap(),
        seed: Some(7),
        ..Default::default()
    };

    let first = orchestrator(&MockPlatform::healthy_fleet(ids(1..=10)), options)
        .run(&ids(1..=10), StopSignal::never())
        .await
        .unwrap();
    let second = orchestrator(&MockPlatform::healthy_fleet(ids(1..=10)), options)
        .run(&ids(1..=10), StopSignal::never())
        .await
        .unwrap();

    assert_eq!(first.selected, second.selected);
}

// ============================================================================
// Teardown
// ============================================================================

/// Leaked instances are listed in the fleet summary without changing verdicts.
#[tokio::test]
async fn leaks_are_reported_per_host() {
    let platform = MockPlatform::healthy_fleet(ids(1..=3));
    platform.fail_destroy(HostId::new(3), 100);

    let run = orchestrator(&platform, FleetOptions::default())
        .run(&ids(1..=3), StopSignal::never())
        .await
        .unwrap();

    assert_eq!(run.passed.len(), 3);
    let leaked = run.leaked();
    assert_eq!(leaked.len(), 1);
    assert_eq!(leaked[0].0, HostId::new(3));

    let text = summarize_fleet(&run);
    assert!(text.contains("1 teardown warning"));
    assert!(text.contains("host 3 left instance"));
}

/// A stop requested mid-run still partitions every selected host.
#[tokio::test]
async fn stop_mid_run_keeps_partition_total() {
    let platform = MockPlatform::healthy_fleet(ids(1..=6));
    platform.set_probe_delay(std::time::Duration::from_millis(20));
    let (handle, signal) = stop_signal();
    let options = FleetOptions {
        concurrency: 1,
        ..Default::default()
    };

    let stopper = tokio::spawn(async move {
        tokio::time::sleep(std::time::Duration::from_millis(30)).await;
        handle.stop();
    });
    let run = orchestrator(&platform, options)
        .run(&ids(1..=6), signal)
        .await
        .unwrap();
    stopper.await.unwrap();

    assert_eq!(run.passed.len() + run.failed.len(), 6);
    assert!(!run.failed.is_empty());
    assert_eq!(platform.live_instances(), 0);
}
