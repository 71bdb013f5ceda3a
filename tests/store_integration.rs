//! Integration tests for the reference store and revision resolution.
//!
//! These tests use the real `git` binary as transport against upstream
//! repositories on the local filesystem.

mod common;

use std::fs;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;

use common::{hanging_git, run_git, settings, Sandbox, Upstream};
use refcheckout::core::paths::StorePaths;
use refcheckout::core::types::{RepositoryIdentity, RevisionSpec};
use refcheckout::git::GitCli;
use refcheckout::resolve::{resolve, ResolveError, RevisionSource};
use refcheckout::store::{Freshness, StoreError, StoreHandle, StoreManager, SyncState};

fn identity() -> RepositoryIdentity {
    RepositoryIdentity::new("acme/widget").unwrap()
}

fn manager() -> StoreManager {
    StoreManager::new(Arc::new(GitCli::default()), &settings())
}

fn store_paths(sandbox: &Sandbox) -> StorePaths {
    StorePaths::new(sandbox.cache().join("acme/widget.git"))
}

/// A manager whose `git` never answers.
fn hanging_manager(sandbox: &Sandbox, network_timeout: Duration) -> StoreManager {
    let mut settings = settings();
    settings.network_timeout = network_timeout;
    StoreManager::new(Arc::new(GitCli::new(hanging_git(sandbox.path()))), &settings)
}

async fn ensure(upstream: &Upstream, paths: &StorePaths) -> Result<StoreHandle, StoreError> {
    manager()
        .ensure(&identity(), &upstream.url(), paths, &CancellationToken::new())
        .await
}

// =============================================================================
// Store lifecycle
// =============================================================================

mod lifecycle {
    use super::*;

    #[tokio::test]
    async fn create_writes_bare_mirror_and_state() {
        let upstream = Upstream::new();
        upstream.branch("feature");
        let sandbox = Sandbox::new();
        let paths = store_paths(&sandbox);

        let store = ensure(&upstream, &paths).await.unwrap();

        assert!(store.created);
        assert_eq!(store.freshness, Freshness::Fresh);
        assert_eq!(
            run_git(paths.store_dir(), &["rev-parse", "--is-bare-repository"]),
            "true"
        );
        assert_eq!(
            run_git(paths.store_dir(), &["rev-parse", "refs/heads/feature"]),
            upstream.head()
        );
        assert_eq!(run_git(paths.store_dir(), &["config", "gc.auto"]), "0");

        let state = SyncState::read(paths.store_dir()).unwrap().unwrap();
        assert_eq!(state.identity, identity());
        assert_eq!(state.remote_url, upstream.url());
        assert_eq!(state.fetch_count, 0);
    }

    #[tokio::test]
    async fn update_fetches_and_records() {
        let upstream = Upstream::new();
        let sandbox = Sandbox::new();
        let paths = store_paths(&sandbox);
        let first = ensure(&upstream, &paths).await.unwrap();

        let next = upstream.commit_file("next.txt", "next\n", "Next");
        let second = ensure(&upstream, &paths).await.unwrap();

        assert!(!second.created);
        assert_eq!(second.freshness, Freshness::Fresh);
        assert!(second.last_synchronized >= first.last_synchronized);
        assert_eq!(
            run_git(paths.store_dir(), &["rev-parse", "refs/heads/main"]),
            next
        );
        let state = SyncState::read(paths.store_dir()).unwrap().unwrap();
        assert_eq!(state.fetch_count, 1);
    }

    #[tokio::test]
    async fn unreachable_remote_degrades_to_stale() {
        let upstream = Upstream::new();
        let sandbox = Sandbox::new();
        let paths = store_paths(&sandbox);
        ensure(&upstream, &paths).await.unwrap();

        let url = upstream.url();
        fs::remove_dir_all(upstream.path()).unwrap();
        let store = manager()
            .ensure(&identity(), &url, &paths, &CancellationToken::new())
            .await
            .unwrap();

        assert!(store.is_stale());
        assert!(store.last_synchronized.is_some());
    }

    #[tokio::test]
    async fn timed_out_refresh_degrades_to_stale() {
        let upstream = Upstream::new();
        let sandbox = Sandbox::new();
        let paths = store_paths(&sandbox);
        ensure(&upstream, &paths).await.unwrap();

        let started = Instant::now();
        let store = hanging_manager(&sandbox, Duration::from_millis(500))
            .ensure(&identity(), &upstream.url(), &paths, &CancellationToken::new())
            .await
            .unwrap();

        assert!(started.elapsed() < Duration::from_secs(10));
        match &store.freshness {
            Freshness::Stale { reason } => assert!(reason.contains("timed out"), "{reason}"),
            Freshness::Fresh => panic!("expected a stale store"),
        }
        assert_eq!(
            run_git(paths.store_dir(), &["rev-parse", "refs/heads/main"]),
            upstream.head()
        );
    }

    #[tokio::test]
    async fn timed_out_create_is_unreachable() {
        let upstream = Upstream::new();
        let sandbox = Sandbox::new();
        let paths = store_paths(&sandbox);

        let err = hanging_manager(&sandbox, Duration::from_millis(500))
            .ensure(&identity(), &upstream.url(), &paths, &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, StoreError::Unreachable { .. }), "{err}");
        assert!(!paths.store_dir().exists());
        assert_eq!(fs::read_dir(paths.parent_dir()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn cancel_during_transfer_stops_git() {
        let upstream = Upstream::new();
        let sandbox = Sandbox::new();
        let paths = store_paths(&sandbox);

        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(300)).await;
            trigger.cancel();
        });

        let started = Instant::now();
        let err = hanging_manager(&sandbox, Duration::from_secs(60))
            .ensure(&identity(), &upstream.url(), &paths, &cancel)
            .await
            .unwrap_err();

        assert!(matches!(err, StoreError::Cancelled), "{err}");
        assert!(started.elapsed() < Duration::from_secs(10));
        assert!(!paths.store_dir().exists());
    }

    #[tokio::test]
    async fn store_of_another_identity_is_refused() {
        let upstream = Upstream::new();
        let sandbox = Sandbox::new();
        let paths = store_paths(&sandbox);
        ensure(&upstream, &paths).await.unwrap();

        let other = RepositoryIdentity::new("acme/gadget").unwrap();
        let err = manager()
            .ensure(&other, &upstream.url(), &paths, &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, StoreError::IdentityMismatch { .. }));
    }

    #[tokio::test]
    async fn foreign_mirror_of_same_remote_is_adopted() {
        let upstream = Upstream::new();
        let sandbox = Sandbox::new();
        let paths = store_paths(&sandbox);
        fs::create_dir_all(paths.parent_dir()).unwrap();
        run_git(
            &paths.parent_dir(),
            &["clone", "-q", "--mirror", &upstream.url(), "widget.git"],
        );

        let store = ensure(&upstream, &paths).await.unwrap();

        assert!(!store.created);
        assert_eq!(store.freshness, Freshness::Fresh);
        let state = SyncState::read(paths.store_dir()).unwrap().unwrap();
        assert_eq!(state.identity, identity());
    }

    #[tokio::test]
    async fn unusable_directory_is_replaced() {
        let upstream = Upstream::new();
        let sandbox = Sandbox::new();
        let paths = store_paths(&sandbox);
        fs::create_dir_all(paths.store_dir()).unwrap();
        fs::write(paths.store_dir().join("garbage"), "x").unwrap();

        let store = ensure(&upstream, &paths).await.unwrap();

        assert!(store.created);
        assert!(!paths.store_dir().join("garbage").exists());
    }

    #[tokio::test]
    async fn cancelled_create_leaves_nothing_behind() {
        let upstream = Upstream::new();
        let sandbox = Sandbox::new();
        let paths = store_paths(&sandbox);

        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = manager()
            .ensure(&identity(), &upstream.url(), &paths, &cancel)
            .await
            .unwrap_err();

        assert!(matches!(err, StoreError::Cancelled));
        assert!(!paths.store_dir().exists());
    }
}

// =============================================================================
// Revision resolution
// =============================================================================

mod resolution {
    use super::*;

    struct Fixture {
        upstream: Upstream,
        _sandbox: Sandbox,
        store: StoreHandle,
    }

    /// main: c1 -> c2 (v2.0), feature: c1 -> f1, tag v1.0 (annotated) at c1,
    /// lightweight tag `nightly` at f1, and a branch and tag both named
    /// `release` pointing at different commits.
    async fn fixture() -> Fixture {
        let upstream = Upstream::new();
        upstream.annotated_tag("v1.0", "first release");
        upstream.tag("release");
        upstream.checkout_new("feature");
        upstream.commit_file("f.txt", "f\n", "Feature");
        upstream.tag("nightly");
        upstream.checkout("main");
        upstream.commit_file("c2.txt", "c2\n", "Second");
        upstream.tag("v2.0");
        upstream.branch("release");

        let sandbox = Sandbox::new();
        let paths = store_paths(&sandbox);
        let store = ensure(&upstream, &paths).await.unwrap();
        Fixture {
            upstream,
            _sandbox: sandbox,
            store,
        }
    }

    fn resolved(fx: &Fixture, spec: &str) -> String {
        resolve(&fx.store, &RevisionSpec::parse(spec))
            .unwrap()
            .oid
            .as_str()
            .to_string()
    }

    #[tokio::test]
    async fn empty_spec_is_default_branch() {
        let fx = fixture().await;
        let commit = resolve(&fx.store, &RevisionSpec::Default).unwrap();
        assert_eq!(commit.oid.as_str(), fx.upstream.rev_parse("main"));
        assert!(matches!(
            commit.source,
            RevisionSource::DefaultBranch(Some(ref name)) if name.as_str() == "refs/heads/main"
        ));
    }

    #[tokio::test]
    async fn branches_and_tags() {
        let fx = fixture().await;
        assert_eq!(resolved(&fx, "feature"), fx.upstream.rev_parse("feature"));
        assert_eq!(resolved(&fx, "v1.0"), fx.upstream.rev_parse("v1.0"));
        assert_eq!(resolved(&fx, "nightly"), fx.upstream.rev_parse("feature"));
        assert_eq!(
            resolved(&fx, "refs/tags/v2.0"),
            fx.upstream.rev_parse("main")
        );
    }

    #[tokio::test]
    async fn annotated_tag_peels_to_commit() {
        let fx = fixture().await;
        let commit = resolve(&fx.store, &RevisionSpec::parse("v1.0")).unwrap();
        let tag_object = run_git(fx.store.path(), &["rev-parse", "refs/tags/v1.0"]);
        assert_ne!(commit.oid.as_str(), tag_object);
        assert_eq!(
            commit.source,
            RevisionSource::Tag(refcheckout::core::types::RefName::for_tag("v1.0").unwrap())
        );
    }

    #[tokio::test]
    async fn branch_shadows_tag_of_same_name() {
        let fx = fixture().await;
        let commit = resolve(&fx.store, &RevisionSpec::parse("release")).unwrap();
        assert_eq!(commit.oid.as_str(), fx.upstream.rev_parse("refs/heads/release"));
        assert!(matches!(commit.source, RevisionSource::Branch(_)));
        assert_eq!(
            resolved(&fx, "refs/tags/release"),
            fx.upstream.rev_parse("refs/tags/release")
        );
    }

    #[tokio::test]
    async fn commit_ids_full_and_abbreviated() {
        let fx = fixture().await;
        let full = fx.upstream.rev_parse("feature");
        assert_eq!(resolved(&fx, &full), full);
        assert_eq!(resolved(&fx, &full[..8]), full);
        assert_eq!(resolved(&fx, &full[..8].to_uppercase()), full);
    }

    #[tokio::test]
    async fn unknown_names_are_not_found() {
        let fx = fixture().await;
        for spec in ["nope", "refs/heads/nope", "deadbeefdeadbeef"] {
            let err = resolve(&fx.store, &RevisionSpec::parse(spec)).unwrap_err();
            assert!(
                matches!(err, ResolveError::NotFound { stale: false, .. }),
                "{spec}: {err}"
            );
        }
    }

    #[tokio::test]
    async fn ambiguous_prefix_lists_candidates() {
        let upstream = Upstream::new();
        for i in 0..2000 {
            fs::write(upstream.path().join(format!("f{i}.txt")), format!("{i}\n")).unwrap();
        }
        run_git(upstream.path(), &["add", "-A"]);
        run_git(upstream.path(), &["commit", "-q", "-m", "Many files"]);
        let sandbox = Sandbox::new();
        let store = ensure(&upstream, &store_paths(&sandbox)).await.unwrap();

        let listing = run_git(
            store.path(),
            &["cat-file", "--batch-all-objects", "--batch-check=%(objectname)"],
        );
        let mut objects: Vec<&str> = listing.lines().collect();
        objects.sort();
        let prefix = objects
            .windows(2)
            .find(|pair| pair[0][..4] == pair[1][..4])
            .map(|pair| pair[0][..4].to_string())
            .expect("2000 blobs share a 4-digit prefix");
        let expected: Vec<&str> = objects
            .iter()
            .copied()
            .filter(|oid| oid.starts_with(&prefix))
            .collect();

        let err = resolve(&store, &RevisionSpec::parse(&prefix)).unwrap_err();
        match &err {
            ResolveError::Ambiguous { spec, candidates } => {
                assert_eq!(spec, &prefix);
                let found: Vec<&str> = candidates.iter().map(|oid| oid.as_str()).collect();
                assert_eq!(found, expected);
            }
            other => panic!("expected ambiguity, got {other}"),
        }
        assert!(err.to_string().contains(expected[0]));
    }

    #[tokio::test]
    async fn tree_id_is_not_a_commit() {
        let fx = fixture().await;
        let tree = run_git(fx.store.path(), &["rev-parse", "main^{tree}"]);
        let err = resolve(&fx.store, &RevisionSpec::parse(&tree)).unwrap_err();
        assert!(matches!(err, ResolveError::NotFound { .. }));
    }
}
