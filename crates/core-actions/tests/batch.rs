//! Batch-level behaviour of the orchestrator against a scripted tool.

mod common;

use common::{Fixture, Repo, VIEW};
use core_actions::PlugError;
use core_events::recording::HostRecord;
use core_state::Phase;
use pretty_assertions::assert_eq;
use std::time::Duration;

#[tokio::test]
async fn timeout_fails_one_plugin_and_the_rest_succeed() {
    let fx = Fixture::new(
        2,
        Duration::from_secs(1),
        &[
            ("a", Repo::fresh("aaaaaaaaaaaa").delay(Duration::from_secs(5))),
            ("b", Repo::fresh("bbbbbbbbbbbb").delay(Duration::from_millis(50))),
            ("c", Repo::fresh("cccccccccccc").delay(Duration::from_millis(50))),
        ],
    );

    let summary = fx.orch.update_all(VIEW).await.unwrap();
    assert_eq!((summary.total, summary.success, summary.fail), (3, 2, 1));
    assert!(summary.elapsed >= Duration::from_secs(1));
    assert!(fx.runner.peak_concurrency() <= 2);

    fx.orch.with_state(|state| {
        assert!(!state.updating);
        assert_eq!(state.status(&fx.dir("a")).unwrap().phase, Phase::Fail);
        assert!(!state.status(&fx.dir("a")).unwrap().revisions.is_complete());
        assert_eq!(state.status(&fx.dir("b")).unwrap().phase, Phase::Success);
        assert_eq!(state.status(&fx.dir("c")).unwrap().phase, Phase::Success);
    });

    let bundle = fx.orch.settings().bundle_dir.clone();
    assert_eq!(
        fx.log("a"),
        vec![
            format!("cd {}", bundle.display()),
            "git clone https://example.invalid/a.git a --progress --recursive".to_string(),
            "Error: clone failed: process timeout after 1s".to_string(),
        ]
    );
    // Persisted log mirrors the in-memory one.
    use core_state::LogStore;
    assert_eq!(fx.logs.read_all("a").unwrap(), fx.log("a"));

    let report = fx.host.last_push(VIEW).unwrap();
    assert!(report[0].starts_with("Cost:"));
    assert!(report[0].ends_with("s Success:2 Fail:1"));
    assert_eq!(
        report[1..].to_vec(),
        vec![
            "[xoo]".to_string(),
            "✗ a: Error: clone failed: process timeout after 1s".to_string(),
            "✓ b [master]: Installed".to_string(),
            "✓ c [master]: Installed".to_string(),
        ]
    );
    assert_eq!(fx.host.updating_transitions(), vec![true, false]);
}

#[tokio::test]
async fn progress_is_pushed_while_in_flight() {
    let fx = Fixture::new(
        1,
        Duration::from_secs(5),
        &[("a", Repo::fresh("a1").delay(Duration::from_millis(500)))],
    );
    fx.orch.update_all(VIEW).await.unwrap();
    let pushes = fx.host.pushes(VIEW);
    assert!(pushes.len() >= 3, "got {} pushes", pushes.len());
    assert!(
        pushes
            .iter()
            .any(|p| p[0] == "Install/Updating plugins 0/1")
    );
    assert!(pushes.last().unwrap()[0].starts_with("Cost:"));
}

#[tokio::test]
async fn second_batch_is_rejected_while_updating() {
    let fx = Fixture::new(
        2,
        Duration::from_secs(5),
        &[
            ("a", Repo::fresh("a1").delay(Duration::from_millis(300))),
            ("b", Repo::installed("b0", "b1").delay(Duration::from_millis(300))),
        ],
    );

    let (first, rejected) = tokio::join!(fx.orch.update_all(VIEW), async {
        tokio::time::sleep(Duration::from_millis(50)).await;
        let single = fx.orch.update(VIEW, "b", false).await;
        let all = fx.orch.update_all(VIEW).await;
        let install = fx.orch.install(VIEW, "owner/other").await;
        let total = fx.orch.with_state(|s| (s.total, s.statuses().count()));
        (single, all, install, total)
    });

    let summary = first.unwrap();
    assert_eq!(summary.total, 2);
    let (single, all, install, total) = rejected;
    assert!(matches!(single, Err(PlugError::Busy)));
    assert!(matches!(all, Err(PlugError::Busy)));
    assert!(matches!(install, Err(PlugError::Busy)));
    assert_eq!(total, (2, 2));
    assert_eq!(
        fx.host.errors(),
        vec!["Plugin update in process".to_string(); 3]
    );
    // The rejected install did not replace the plugin list.
    assert_eq!(fx.orch.plugins().len(), 2);
}

#[tokio::test]
async fn frozen_plugins_are_skipped_by_update_all_only() {
    let fx = Fixture::new(
        4,
        Duration::from_secs(5),
        &[
            ("a", Repo::installed("a0", "a1").frozen()),
            ("b", Repo::installed("b0", "b1")),
        ],
    );
    let summary = fx.orch.update_all(VIEW).await.unwrap();
    assert_eq!(summary.total, 1);
    fx.orch.with_state(|s| {
        assert!(s.status(&fx.dir("a")).is_none());
        assert!(s.status(&fx.dir("b")).is_some());
    });

    let single = fx.orch.update(VIEW, "a", false).await.unwrap();
    assert_eq!((single.total, single.success), (1, 1));
}

#[tokio::test]
async fn unchanged_pull_skips_hook() {
    let fx = Fixture::new(
        2,
        Duration::from_secs(5),
        &[("a", Repo::installed("abc123", "abc123").hook("make"))],
    );
    fx.orch.update_all(VIEW).await.unwrap();
    assert_eq!(fx.hook_runs(), 0);
    let report = fx.host.last_push(VIEW).unwrap();
    assert_eq!(report.last().unwrap(), "✓ a [master]: Already up-to-date.");
    assert!(!fx.log("a").iter().any(|l| l.starts_with("Run command:")));
}

#[tokio::test]
async fn changed_pull_and_clone_run_hook() {
    let fx = Fixture::new(
        2,
        Duration::from_secs(5),
        &[
            ("a", Repo::installed("1111111111", "2222222222").hook("make")),
            ("b", Repo::fresh("3333333333").hook("./install.sh")),
        ],
    );
    fx.orch.update_all(VIEW).await.unwrap();
    assert_eq!(fx.hook_runs(), 2);

    let a = fx.log("a");
    assert!(a.contains(&"Run command: make".to_string()));
    assert!(a.contains(&"hook ran: make".to_string()));
    assert!(a.contains(&"Receiving objects: 100%".to_string()));

    let report = fx.host.last_push(VIEW).unwrap();
    assert_eq!(
        report[2..].to_vec(),
        vec![
            "✓ a [master]: Updated [11111111 - 22222222]".to_string(),
            "✓ b [master]: Installed".to_string(),
        ]
    );
}

#[tokio::test]
async fn remote_refresh_happens_once_per_batch() {
    let fx = Fixture::new(
        2,
        Duration::from_secs(5),
        &[
            ("a", Repo::installed("a0", "a1").docs().remote_plugin()),
            ("b", Repo::installed("b0", "b1").remote_plugin()),
            ("c", Repo::installed("c0", "c0").docs().remote_plugin()),
        ],
    );
    fx.orch.update_all(VIEW).await.unwrap();
    assert_eq!(fx.host.count(&HostRecord::RefreshRemote), 1);
    // Unchanged `c` gets no help tags.
    assert_eq!(
        fx.host
            .records()
            .into_iter()
            .filter(|r| matches!(r, HostRecord::Helptags(_)))
            .collect::<Vec<_>>(),
        vec![HostRecord::Helptags(fx.dir("a").join("doc"))]
    );
}

#[tokio::test]
async fn unchanged_remote_plugins_do_not_refresh() {
    let fx = Fixture::new(
        1,
        Duration::from_secs(5),
        &[("a", Repo::installed("a0", "a0").remote_plugin())],
    );
    fx.orch.update_all(VIEW).await.unwrap();
    assert_eq!(fx.host.count(&HostRecord::RefreshRemote), 0);
}

#[tokio::test]
async fn empty_plugin_list_completes() {
    let fx = Fixture::new(3, Duration::from_secs(5), &[]);
    let summary = fx.orch.update_all(VIEW).await.unwrap();
    assert_eq!((summary.total, summary.success, summary.fail), (0, 0, 0));
    assert!(!fx.orch.is_updating());
    assert_eq!(
        fx.host.last_push(VIEW).unwrap()[0],
        format!(
            "Cost:{}s Success:0 Fail:0",
            summary.elapsed.as_millis() as f64 / 1000.0
        )
    );
}

#[tokio::test]
async fn crashed_job_is_a_scheduler_fault_and_releases_the_batch() {
    let fx = Fixture::new(
        2,
        Duration::from_secs(5),
        &[
            ("a", Repo::fresh("a1").crash()),
            ("b", Repo::fresh("b1").delay(Duration::from_millis(50))),
        ],
    );

    let err = fx.orch.update_all(VIEW).await.unwrap_err();
    assert!(err.is_scheduler_fault());
    assert!(err.to_string().contains("job for a panicked"));
    assert!(!fx.orch.is_updating());
    assert_eq!(fx.host.updating_transitions(), vec![true, false]);
    assert_eq!(fx.host.errors(), vec![err.to_string()]);

    fx.orch.with_state(|state| {
        assert_eq!(state.status(&fx.dir("a")).unwrap().phase, Phase::Fail);
        assert_eq!(state.status(&fx.dir("b")).unwrap().phase, Phase::Success);
    });
    let report = fx.host.last_push(VIEW).unwrap();
    assert!(report[0].ends_with("Success:1 Fail:1"), "{report:?}");

    let next = fx.orch.update(VIEW, "b", false).await.unwrap();
    assert_eq!((next.total, next.success, next.fail), (1, 1, 0));
}

#[tokio::test]
async fn unresolved_revision_after_clone_is_not_reported_installed() {
    let fx = Fixture::new(1, Duration::from_secs(5), &[("a", Repo::fresh(""))]);

    let summary = fx.orch.update_all(VIEW).await.unwrap();
    assert_eq!(summary.success, 1);
    fx.orch.with_state(|state| {
        let status = state.status(&fx.dir("a")).unwrap();
        assert_eq!(status.revisions.to, None);
        assert!(!status.revisions.is_complete());
    });
    let report = fx.host.last_push(VIEW).unwrap();
    assert!(report[1].starts_with("✓ a [master]:"), "{report:?}");
    assert!(!report[1].contains("Installed"), "{report:?}");

    // Nothing recorded to diff against.
    let pushed = fx.host.pushes(VIEW).len();
    fx.orch.diff(VIEW, "a").await.unwrap();
    assert_eq!(fx.host.pushes(VIEW).len(), pushed);
}
