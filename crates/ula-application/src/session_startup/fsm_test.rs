use super::*;
use crate::machine::FsmHandle;
use crate::test_support::*;
use std::sync::Mutex;
use std::sync::atomic::Ordering;
use std::time::Duration;
use ula_core::asset::{Asset, AssetCache, AssetOrigin};
use ula_core::error::UlaError;

struct Harness {
    store: Arc<MockStore>,
    source: Arc<MockSource>,
    cache: Arc<MockCache>,
    coordinator: Arc<MockCoordinator>,
    extractor: Arc<MockExtractor>,
    storage: Arc<MockStorage>,
    fsm: SessionStartupFsm,
}

impl Harness {
    fn new() -> Self {
        Self::with_extractor(Arc::new(MockExtractor::default()))
    }

    fn with_extractor(extractor: Arc<MockExtractor>) -> Self {
        let store = MockStore::new();
        let source = Arc::new(MockSource::default());
        let cache = Arc::new(MockCache::default());
        let coordinator = Arc::new(MockCoordinator::default());
        let storage = Arc::new(MockStorage::with(4096));
        let fsm = SessionStartupFsm::new(
            &*store,
            store.clone(),
            resolver(&source, &cache),
            coordinator.clone(),
            extractor.clone(),
            storage.clone(),
        );
        Self {
            store,
            source,
            cache,
            coordinator,
            extractor,
            storage,
            fsm,
        }
    }

    fn add_debian(&self) -> (Session, Filesystem) {
        let filesystem = self
            .store
            .add_filesystem(Filesystem::new("debian", "debian", "arm64"));
        let session = self.store.add_session(Session::new("debian", filesystem.id));
        (session, filesystem)
    }

    async fn send(&mut self, event: SessionStartupEvent) -> SessionStartupState {
        self.fsm.handle_event(event).await;
        self.fsm.state()
    }
}

fn session() -> Session {
    let mut session = Session::new("debian", 1);
    session.id = 2;
    session
}

fn filesystem() -> Filesystem {
    let mut filesystem = Filesystem::new("debian", "debian", "arm64");
    filesystem.id = 1;
    filesystem
}

fn remote(assets: Vec<Asset>) -> AssetList {
    AssetList {
        asset_type: assets[0].asset_type.clone(),
        architecture_type: assets[0].architecture_type.clone(),
        assets,
        origin: AssetOrigin::Remote,
    }
}

/// One sample of every non-wrapper state.
fn all_states() -> Vec<SessionStartupState> {
    use SessionStartupState as S;
    vec![
        S::WaitingForSelection,
        S::SingleSessionNotAllowed,
        S::SessionRestartable { session: session() },
        S::ReadyForPreparation {
            session: session(),
            filesystem: filesystem(),
        },
        S::SessionFilesystemMissing { session: session() },
        S::RetrievingAssetLists,
        S::AssetListsFailed,
        S::AssetListsSucceeded {
            asset_lists: vec![remote(vec![support_asset()])],
        },
        S::GeneratingDownloadRequirements,
        S::RemoteUnreachable,
        S::NoDownloadsRequired,
        S::DownloadsRequired {
            requirements: vec![DownloadRequirement::from(&support_asset())],
            large_download_required: false,
        },
        S::Downloading {
            completed: 1,
            total: 3,
        },
        S::DownloadsSucceeded,
        S::DownloadsFailed {
            reason: "gone".to_string(),
        },
        S::CacheAccessedWhileEmpty,
        S::CacheAccessedInWrongState,
        S::CopyingLocally,
        S::LocalCopySucceeded,
        S::LocalCopyFailed {
            reason: "disk".to_string(),
        },
        S::VerifyingFilesystemAssets,
        S::AssetsMissingFromSupport,
        S::FilesystemCopyFailed {
            reason: "disk".to_string(),
        },
        S::FilesystemAssetsVerified,
        S::VerifyingStorage,
        S::StorageInsufficient { available_mb: 10 },
        S::StorageLow { available_mb: 500 },
        S::StorageSufficient,
        S::Extracting {
            line: "bin".to_string(),
        },
        S::ExtractionSucceeded,
        S::ExtractionFailed {
            reason: "tar".to_string(),
        },
    ]
}

fn assert_accepted_only_from(
    harness: &Harness,
    event: SessionStartupEvent,
    accepted: fn(&SessionStartupState) -> bool,
) {
    for state in all_states() {
        harness.fsm.set_state(state.clone());
        assert_eq!(
            harness.fsm.transition_is_acceptable(&event),
            accepted(&state),
            "{:?} from {:?}",
            event,
            state
        );
    }
}

#[test]
fn test_guard_table() {
    use SessionStartupEvent as E;
    use SessionStartupState as S;

    let harness = Harness::new();
    let owned = DownloadId(7);
    harness.coordinator.own(owned);

    assert_accepted_only_from(&harness, E::SessionSelected { session: session() }, |s| {
        matches!(s, S::WaitingForSelection)
    });
    assert_accepted_only_from(
        &harness,
        E::RetrieveAssetLists {
            filesystem: filesystem(),
        },
        |s| matches!(s, S::ReadyForPreparation { .. } | S::AssetsMissingFromSupport),
    );
    assert_accepted_only_from(
        &harness,
        E::GenerateDownloads {
            filesystem: filesystem(),
            asset_lists: Vec::new(),
        },
        |s| matches!(s, S::AssetListsSucceeded { .. }),
    );
    assert_accepted_only_from(
        &harness,
        E::DownloadAssets {
            requirements: Vec::new(),
        },
        |s| matches!(s, S::DownloadsRequired { .. }),
    );
    assert_accepted_only_from(
        &harness,
        E::AssetDownloadComplete { download_id: owned },
        |s| matches!(s, S::Downloading { .. }),
    );
    assert_accepted_only_from(
        &harness,
        E::AssetDownloadComplete {
            download_id: DownloadId(999),
        },
        |_| true,
    );
    assert_accepted_only_from(&harness, E::SyncDownloadState, |_| true);
    assert_accepted_only_from(&harness, E::CopyDownloadsToLocalStorage, |s| {
        matches!(s, S::DownloadsSucceeded)
    });
    assert_accepted_only_from(
        &harness,
        E::VerifyFilesystemAssets {
            filesystem: filesystem(),
        },
        |s| matches!(s, S::NoDownloadsRequired | S::LocalCopySucceeded),
    );
    assert_accepted_only_from(&harness, E::VerifyAvailableStorage, |s| {
        matches!(s, S::FilesystemAssetsVerified)
    });
    assert_accepted_only_from(&harness, E::VerifyAvailableStorageComplete, |s| {
        matches!(s, S::VerifyingStorage | S::StorageLow { .. })
    });
    assert_accepted_only_from(
        &harness,
        E::ExtractFilesystem {
            filesystem: filesystem(),
        },
        |s| matches!(s, S::StorageSufficient),
    );
    assert_accepted_only_from(&harness, E::ResetState, |_| true);
}

#[tokio::test]
async fn test_illegal_transition_keeps_protocol_position() {
    let mut harness = Harness::new();
    harness.fsm.set_state(SessionStartupState::StorageSufficient);

    let state = harness.send(SessionStartupEvent::VerifyAvailableStorage).await;
    assert_eq!(
        state,
        SessionStartupState::IllegalTransition {
            event: Box::new(SessionStartupEvent::VerifyAvailableStorage),
            state: Box::new(SessionStartupState::StorageSufficient),
        }
    );

    // A second rejection still records the original position
    let state = harness
        .send(SessionStartupEvent::CopyDownloadsToLocalStorage)
        .await;
    assert_eq!(state.underlying(), &SessionStartupState::StorageSufficient);

    // And the legal event for that position is still accepted
    harness.extractor.extracted.store(true, Ordering::SeqCst);
    let state = harness
        .send(SessionStartupEvent::ExtractFilesystem {
            filesystem: filesystem(),
        })
        .await;
    assert_eq!(state, SessionStartupState::ExtractionSucceeded);
}

#[tokio::test]
async fn test_selection_without_active_sessions_resolves_filesystem() {
    let mut harness = Harness::new();
    let (session, filesystem) = harness.add_debian();

    let state = harness
        .send(SessionStartupEvent::SessionSelected {
            session: session.clone(),
        })
        .await;
    assert_eq!(
        state,
        SessionStartupState::ReadyForPreparation {
            session,
            filesystem
        }
    );
}

#[tokio::test]
async fn test_selection_is_refused_while_another_session_runs() {
    let mut harness = Harness::new();
    let (session, filesystem) = harness.add_debian();
    let mut running = Session::new("other", filesystem.id);
    running.active = true;
    harness.store.add_session(running);

    let state = harness
        .send(SessionStartupEvent::SessionSelected { session })
        .await;
    assert_eq!(state, SessionStartupState::SingleSessionNotAllowed);
}

#[tokio::test]
async fn test_selecting_the_running_session_is_restartable() {
    let mut harness = Harness::new();
    let filesystem = harness
        .store
        .add_filesystem(Filesystem::new("debian", "debian", "arm64"));
    let mut running = Session::new("debian", filesystem.id);
    running.active = true;
    let running = harness.store.add_session(running);

    let state = harness
        .send(SessionStartupEvent::SessionSelected {
            session: running.clone(),
        })
        .await;
    assert_eq!(
        state,
        SessionStartupState::SessionRestartable { session: running }
    );
}

#[tokio::test]
async fn test_selection_with_unknown_filesystem() {
    let mut harness = Harness::new();
    let orphan = harness.store.add_session(Session::new("orphan", 404));

    let state = harness
        .send(SessionStartupEvent::SessionSelected {
            session: orphan.clone(),
        })
        .await;
    assert_eq!(
        state,
        SessionStartupState::SessionFilesystemMissing { session: orphan }
    );
}

#[tokio::test]
async fn test_asset_list_retrieval() {
    let mut harness = Harness::new();
    publish_debian_manifests(&harness.source);
    harness.fsm.set_state(SessionStartupState::AssetsMissingFromSupport);

    let state = harness
        .send(SessionStartupEvent::RetrieveAssetLists {
            filesystem: filesystem(),
        })
        .await;
    match state {
        SessionStartupState::AssetListsSucceeded { asset_lists } => {
            assert_eq!(asset_lists.len(), 4);
            assert!(asset_lists.iter().all(|l| l.origin == AssetOrigin::Remote));
        }
        other => panic!("unexpected state {:?}", other),
    }
}

#[tokio::test]
async fn test_any_empty_asset_list_fails_retrieval() {
    let mut harness = Harness::new();
    harness
        .source
        .publish("support", "all", vec![support_asset()]);
    harness.fsm.set_state(SessionStartupState::AssetsMissingFromSupport);

    let state = harness
        .send(SessionStartupEvent::RetrieveAssetLists {
            filesystem: filesystem(),
        })
        .await;
    assert_eq!(state, SessionStartupState::AssetListsFailed);
}

#[tokio::test]
async fn test_offline_retrieval_serves_cached_lists() {
    let mut harness = Harness::new();
    for (asset_type, arch, asset) in [
        ("support", "all", Asset::new("proot", "support", "all", 1)),
        ("support", "arm64", support_asset()),
        ("debian", "all", distribution_script()),
        ("debian", "arm64", rootfs_asset()),
    ] {
        harness
            .cache
            .store_asset_list(asset_type, arch, &[asset])
            .await
            .unwrap();
    }
    harness.source.unreachable.store(true, Ordering::SeqCst);
    harness.fsm.set_state(SessionStartupState::AssetsMissingFromSupport);

    let state = harness
        .send(SessionStartupEvent::RetrieveAssetLists {
            filesystem: filesystem(),
        })
        .await;
    match state {
        SessionStartupState::AssetListsSucceeded { asset_lists } => {
            assert!(asset_lists.iter().all(|l| l.origin == AssetOrigin::Cached));
        }
        other => panic!("unexpected state {:?}", other),
    }
}

#[tokio::test]
async fn test_fresh_filesystem_requires_large_download() {
    let mut harness = Harness::new();
    let lists = vec![remote(vec![support_asset()]), remote(vec![rootfs_asset()])];
    harness.fsm.set_state(SessionStartupState::AssetListsSucceeded {
        asset_lists: lists.clone(),
    });

    let state = harness
        .send(SessionStartupEvent::GenerateDownloads {
            filesystem: filesystem(),
            asset_lists: lists,
        })
        .await;
    match state {
        SessionStartupState::DownloadsRequired {
            requirements,
            large_download_required,
        } => {
            assert_eq!(requirements.len(), 2);
            assert!(large_download_required);
        }
        other => panic!("unexpected state {:?}", other),
    }
}

#[tokio::test]
async fn test_extracted_filesystem_skips_archive() {
    let mut harness = Harness::new();
    harness.extractor.extracted.store(true, Ordering::SeqCst);
    let lists = vec![remote(vec![support_asset()]), remote(vec![rootfs_asset()])];
    harness.fsm.set_state(SessionStartupState::AssetListsSucceeded {
        asset_lists: lists.clone(),
    });

    let state = harness
        .send(SessionStartupEvent::GenerateDownloads {
            filesystem: filesystem(),
            asset_lists: lists,
        })
        .await;
    assert_eq!(
        state,
        SessionStartupState::DownloadsRequired {
            requirements: vec![DownloadRequirement::from(&support_asset())],
            large_download_required: false,
        }
    );
}

#[tokio::test]
async fn test_backup_filesystem_skips_archive() {
    let mut harness = Harness::new();
    harness.cache.mark_present(&support_asset());
    let lists = vec![remote(vec![support_asset()]), remote(vec![rootfs_asset()])];
    let mut from_backup = filesystem();
    from_backup.is_created_from_backup = true;
    harness.fsm.set_state(SessionStartupState::AssetListsSucceeded {
        asset_lists: lists.clone(),
    });

    let state = harness
        .send(SessionStartupEvent::GenerateDownloads {
            filesystem: from_backup,
            asset_lists: lists,
        })
        .await;
    assert_eq!(state, SessionStartupState::NoDownloadsRequired);
}

#[tokio::test]
async fn test_offline_with_missing_assets_is_remote_unreachable() {
    let mut harness = Harness::new();
    let mut lists = vec![remote(vec![support_asset()])];
    lists[0].origin = AssetOrigin::Cached;
    harness.fsm.set_state(SessionStartupState::AssetListsSucceeded {
        asset_lists: lists.clone(),
    });

    let state = harness
        .send(SessionStartupEvent::GenerateDownloads {
            filesystem: filesystem(),
            asset_lists: lists,
        })
        .await;
    assert_eq!(state, SessionStartupState::RemoteUnreachable);
}

#[tokio::test]
async fn test_download_progress_and_completion() {
    let mut harness = Harness::new();
    let requirements = vec![
        DownloadRequirement::from(&support_asset()),
        DownloadRequirement::from(&distribution_script()),
    ];
    harness.fsm.set_state(SessionStartupState::DownloadsRequired {
        requirements: requirements.clone(),
        large_download_required: false,
    });

    let state = harness
        .send(SessionStartupEvent::DownloadAssets {
            requirements: requirements.clone(),
        })
        .await;
    assert_eq!(
        state,
        SessionStartupState::Downloading {
            completed: 0,
            total: 2
        }
    );
    assert_eq!(harness.coordinator.enqueued.lock().unwrap()[0], requirements);

    harness.coordinator.script(DownloadCompletion::Progress {
        completed: 1,
        total: 2,
    });
    let state = harness
        .send(SessionStartupEvent::AssetDownloadComplete {
            download_id: DownloadId(100),
        })
        .await;
    assert_eq!(
        state,
        SessionStartupState::Downloading {
            completed: 1,
            total: 2
        }
    );

    let state = harness
        .send(SessionStartupEvent::AssetDownloadComplete {
            download_id: DownloadId(101),
        })
        .await;
    assert_eq!(state, SessionStartupState::DownloadsSucceeded);
}

#[tokio::test]
async fn test_enqueue_failure() {
    let mut harness = Harness::new();
    *harness.coordinator.enqueue_error.lock().unwrap() =
        Some(UlaError::download("download manager unavailable"));
    harness.fsm.set_state(SessionStartupState::DownloadsRequired {
        requirements: Vec::new(),
        large_download_required: false,
    });

    let state = harness
        .send(SessionStartupEvent::DownloadAssets {
            requirements: vec![DownloadRequirement::from(&support_asset())],
        })
        .await;
    assert!(matches!(state, SessionStartupState::DownloadsFailed { .. }));
}

#[tokio::test]
async fn test_download_failure_reason_is_verbatim() {
    let mut harness = Harness::new();
    harness.coordinator.own(DownloadId(5));
    harness
        .coordinator
        .script(DownloadCompletion::Failure("HTTP 404".to_string()));
    harness.fsm.set_state(SessionStartupState::Downloading {
        completed: 0,
        total: 1,
    });

    let state = harness
        .send(SessionStartupEvent::AssetDownloadComplete {
            download_id: DownloadId(5),
        })
        .await;
    assert_eq!(
        state,
        SessionStartupState::DownloadsFailed {
            reason: "HTTP 404".to_string()
        }
    );
}

#[tokio::test]
async fn test_foreign_completion_changes_nothing() {
    let mut harness = Harness::new();
    let downloading = SessionStartupState::Downloading {
        completed: 1,
        total: 3,
    };
    harness.fsm.set_state(downloading.clone());

    let state = harness
        .send(SessionStartupEvent::AssetDownloadComplete {
            download_id: DownloadId(31337),
        })
        .await;
    assert_eq!(state, downloading);

    harness.fsm.set_state(SessionStartupState::FilesystemAssetsVerified);
    let state = harness
        .send(SessionStartupEvent::AssetDownloadComplete {
            download_id: DownloadId(31337),
        })
        .await;
    assert_eq!(state, SessionStartupState::FilesystemAssetsVerified);
}

#[tokio::test]
async fn test_own_completion_outside_download_phase_is_illegal() {
    let mut harness = Harness::new();
    harness.coordinator.own(DownloadId(3));
    harness.fsm.set_state(SessionStartupState::StorageSufficient);

    let state = harness
        .send(SessionStartupEvent::AssetDownloadComplete {
            download_id: DownloadId(3),
        })
        .await;
    assert!(matches!(state, SessionStartupState::IllegalTransition { .. }));
}

#[tokio::test]
async fn test_sync_in_wrong_state() {
    let mut harness = Harness::new();
    harness.coordinator.persisted.store(true, Ordering::SeqCst);
    harness.fsm.set_state(SessionStartupState::StorageSufficient);

    let state = harness.send(SessionStartupEvent::SyncDownloadState).await;
    assert_eq!(state, SessionStartupState::CacheAccessedInWrongState);
    assert_eq!(harness.coordinator.recoveries.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_sync_without_persisted_state_is_a_no_op() {
    let mut harness = Harness::new();

    let state = harness.send(SessionStartupEvent::SyncDownloadState).await;
    assert_eq!(state, SessionStartupState::WaitingForSelection);
    assert_eq!(harness.coordinator.recoveries.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_sync_replays_recovered_completions() {
    let mut harness = Harness::new();
    harness.coordinator.persisted.store(true, Ordering::SeqCst);

    *harness.coordinator.recovery.lock().unwrap() = DownloadCompletion::AllSucceeded;
    let state = harness.send(SessionStartupEvent::SyncDownloadState).await;
    assert_eq!(state, SessionStartupState::DownloadsSucceeded);

    harness.fsm.set_state(SessionStartupState::Downloading {
        completed: 0,
        total: 0,
    });
    *harness.coordinator.recovery.lock().unwrap() = DownloadCompletion::Progress {
        completed: 2,
        total: 5,
    };
    let state = harness.send(SessionStartupEvent::SyncDownloadState).await;
    assert_eq!(
        state,
        SessionStartupState::Downloading {
            completed: 2,
            total: 5
        }
    );

    *harness.coordinator.recovery.lock().unwrap() = DownloadCompletion::CacheEmpty;
    let state = harness.send(SessionStartupEvent::SyncDownloadState).await;
    assert_eq!(state, SessionStartupState::CacheAccessedWhileEmpty);
}

#[tokio::test]
async fn test_local_staging() {
    let mut harness = Harness::new();
    harness.fsm.set_state(SessionStartupState::DownloadsSucceeded);
    let state = harness
        .send(SessionStartupEvent::CopyDownloadsToLocalStorage)
        .await;
    assert_eq!(state, SessionStartupState::LocalCopySucceeded);

    *harness.coordinator.stage_error.lock().unwrap() = Some(UlaError::io("read-only"));
    harness.fsm.set_state(SessionStartupState::DownloadsSucceeded);
    let state = harness
        .send(SessionStartupEvent::CopyDownloadsToLocalStorage)
        .await;
    assert_eq!(
        state,
        SessionStartupState::LocalCopyFailed {
            reason: "IO error: read-only".to_string()
        }
    );
}

#[tokio::test]
async fn test_up_to_date_filesystem_is_verified_without_copy() {
    let mut harness = Harness::new();
    harness.fsm.set_state(SessionStartupState::NoDownloadsRequired);

    let state = harness
        .send(SessionStartupEvent::VerifyFilesystemAssets {
            filesystem: filesystem(),
        })
        .await;
    assert_eq!(state, SessionStartupState::FilesystemAssetsVerified);
    assert_eq!(harness.extractor.copies.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_stale_filesystem_assets_are_copied_and_version_persisted() {
    let mut harness = Harness::new();
    let (_, filesystem) = harness.add_debian();
    harness.cache.set_latest_version("debian", 300).await.unwrap();
    harness.extractor.extracted.store(true, Ordering::SeqCst);
    harness.fsm.set_state(SessionStartupState::LocalCopySucceeded);

    let state = harness
        .send(SessionStartupEvent::VerifyFilesystemAssets {
            filesystem: filesystem.clone(),
        })
        .await;
    assert_eq!(state, SessionStartupState::FilesystemAssetsVerified);
    assert_eq!(harness.extractor.copies.load(Ordering::SeqCst), 1);
    assert_eq!(harness.extractor.archive_removals.load(Ordering::SeqCst), 1);
    assert_eq!(
        harness.store.filesystem(filesystem.id).unwrap().version_code_used,
        300
    );
}

#[tokio::test]
async fn test_missing_filesystem_assets_need_support_cache() {
    let mut harness = Harness::new();
    harness
        .extractor
        .filesystem_assets_present
        .store(false, Ordering::SeqCst);
    harness
        .extractor
        .support_cache_complete
        .store(false, Ordering::SeqCst);
    harness.fsm.set_state(SessionStartupState::NoDownloadsRequired);

    let state = harness
        .send(SessionStartupEvent::VerifyFilesystemAssets {
            filesystem: filesystem(),
        })
        .await;
    assert_eq!(state, SessionStartupState::AssetsMissingFromSupport);
}

#[tokio::test]
async fn test_filesystem_copy_failures() {
    let mut harness = Harness::new();
    let (_, filesystem) = harness.add_debian();
    harness
        .extractor
        .filesystem_assets_present
        .store(false, Ordering::SeqCst);
    *harness.extractor.copy_error.lock().unwrap() = Some(UlaError::io("no space"));
    harness.fsm.set_state(SessionStartupState::NoDownloadsRequired);

    let state = harness
        .send(SessionStartupEvent::VerifyFilesystemAssets {
            filesystem: filesystem.clone(),
        })
        .await;
    assert!(matches!(
        state,
        SessionStartupState::FilesystemCopyFailed { .. }
    ));

    // Copy succeeds but the version cannot be persisted
    *harness.extractor.copy_error.lock().unwrap() = None;
    harness
        .extractor
        .filesystem_assets_present
        .store(false, Ordering::SeqCst);
    harness.store.fail_updates.store(true, Ordering::SeqCst);
    harness.fsm.set_state(SessionStartupState::NoDownloadsRequired);
    let state = harness
        .send(SessionStartupEvent::VerifyFilesystemAssets { filesystem })
        .await;
    assert!(matches!(
        state,
        SessionStartupState::FilesystemCopyFailed { .. }
    ));
}

#[tokio::test]
async fn test_storage_thresholds() {
    let mut harness = Harness::new();
    let cases = [
        (0, SessionStartupState::StorageInsufficient { available_mb: 0 }),
        (250, SessionStartupState::StorageInsufficient { available_mb: 250 }),
        (251, SessionStartupState::StorageLow { available_mb: 251 }),
        (1000, SessionStartupState::StorageLow { available_mb: 1000 }),
        (1001, SessionStartupState::StorageSufficient),
    ];

    for (available, expected) in cases {
        harness.storage.set(Ok(available));
        harness.fsm.set_state(SessionStartupState::FilesystemAssetsVerified);
        let state = harness.send(SessionStartupEvent::VerifyAvailableStorage).await;
        assert_eq!(state, expected, "available {} MB", available);
    }
}

#[tokio::test]
async fn test_storage_probe_error_is_insufficient() {
    let mut harness = Harness::new();
    harness.storage.set(Err(UlaError::io("statvfs failed")));
    harness.fsm.set_state(SessionStartupState::FilesystemAssetsVerified);

    let state = harness.send(SessionStartupEvent::VerifyAvailableStorage).await;
    assert_eq!(
        state,
        SessionStartupState::StorageInsufficient { available_mb: 0 }
    );
}

#[tokio::test]
async fn test_low_storage_can_be_confirmed() {
    let mut harness = Harness::new();
    harness.fsm.set_state(SessionStartupState::StorageLow { available_mb: 600 });

    let state = harness
        .send(SessionStartupEvent::VerifyAvailableStorageComplete)
        .await;
    assert_eq!(state, SessionStartupState::StorageSufficient);
}

#[tokio::test]
async fn test_already_extracted_filesystem_succeeds_immediately() {
    let mut harness = Harness::new();
    harness.extractor.extracted.store(true, Ordering::SeqCst);
    harness.fsm.set_state(SessionStartupState::StorageSufficient);

    let state = harness
        .send(SessionStartupEvent::ExtractFilesystem {
            filesystem: filesystem(),
        })
        .await;
    assert_eq!(state, SessionStartupState::ExtractionSucceeded);
    assert_eq!(harness.extractor.archive_removals.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_extraction_outcomes() {
    let mut harness = Harness::new();
    harness.fsm.set_state(SessionStartupState::StorageSufficient);
    let state = harness
        .send(SessionStartupEvent::ExtractFilesystem {
            filesystem: filesystem(),
        })
        .await;
    assert_eq!(state, SessionStartupState::ExtractionSucceeded);
    assert_eq!(harness.extractor.archive_removals.load(Ordering::SeqCst), 1);

    let extractor = Arc::new(MockExtractor::default());
    *extractor.outcome.lock().unwrap() = Ok(ExtractionOutcome::Failure("tar: bad header".to_string()));
    let mut harness = Harness::with_extractor(extractor);
    harness.fsm.set_state(SessionStartupState::StorageSufficient);
    let state = harness
        .send(SessionStartupEvent::ExtractFilesystem {
            filesystem: filesystem(),
        })
        .await;
    assert_eq!(
        state,
        SessionStartupState::ExtractionFailed {
            reason: "tar: bad header".to_string()
        }
    );
}

#[tokio::test]
async fn test_unconfirmed_extraction_fails_with_unknown_reason() {
    let extractor = Arc::new(MockExtractor::default());
    extractor.marks_extracted.store(false, Ordering::SeqCst);
    let mut harness = Harness::with_extractor(extractor);
    harness.fsm.set_state(SessionStartupState::StorageSufficient);

    let state = harness
        .send(SessionStartupEvent::ExtractFilesystem {
            filesystem: filesystem(),
        })
        .await;
    assert_eq!(
        state,
        SessionStartupState::ExtractionFailed {
            reason: "Unknown reason".to_string()
        }
    );
    assert_eq!(harness.extractor.archive_removals.load(Ordering::SeqCst), 0);
}

// Records the machine's state each time it reports a line.
struct LineRecorder {
    inner: MockExtractor,
    observer: Mutex<Option<watch::Receiver<SessionStartupState>>>,
    seen: Mutex<Vec<SessionStartupState>>,
}

#[async_trait]
impl FilesystemExtractor for LineRecorder {
    async fn has_been_extracted(&self, directory_name: &str) -> bool {
        self.inner.has_been_extracted(directory_name).await
    }

    async fn extract(
        &self,
        filesystem: &Filesystem,
        on_line: &(dyn Fn(String) + Send + Sync),
    ) -> Result<ExtractionOutcome> {
        for line in ["etc/passwd", "usr/bin/env"] {
            on_line(line.to_string());
            let observer = self.observer.lock().unwrap();
            if let Some(rx) = observer.as_ref() {
                self.seen.lock().unwrap().push(rx.borrow().clone());
            }
        }
        self.inner.extract(filesystem, &|_line: String| {}).await
    }

    async fn remove_archive_files(&self, directory_name: &str) -> Result<()> {
        self.inner.remove_archive_files(directory_name).await
    }

    async fn copy_assets_onto_filesystem(&self, filesystem: &Filesystem) -> Result<()> {
        self.inner.copy_assets_onto_filesystem(filesystem).await
    }

    async fn assets_present_in_support_cache(&self, assets: &[Asset]) -> bool {
        self.inner.assets_present_in_support_cache(assets).await
    }

    async fn assets_present_on_filesystem(&self, directory_name: &str, assets: &[Asset]) -> bool {
        self.inner
            .assets_present_on_filesystem(directory_name, assets)
            .await
    }
}

#[tokio::test]
async fn test_extraction_lines_are_posted() {
    let recorder = Arc::new(LineRecorder {
        inner: MockExtractor::default(),
        observer: Mutex::new(None),
        seen: Mutex::new(Vec::new()),
    });
    let store = MockStore::new();
    let source = Arc::new(MockSource::default());
    let cache = Arc::new(MockCache::default());
    let mut fsm = SessionStartupFsm::new(
        &*store,
        store.clone(),
        resolver(&source, &cache),
        Arc::new(MockCoordinator::default()),
        recorder.clone(),
        Arc::new(MockStorage::with(4096)),
    );
    *recorder.observer.lock().unwrap() = Some(fsm.subscribe());
    fsm.set_state(SessionStartupState::StorageSufficient);

    fsm.handle_event(SessionStartupEvent::ExtractFilesystem {
        filesystem: filesystem(),
    })
    .await;

    assert_eq!(
        *recorder.seen.lock().unwrap(),
        vec![
            SessionStartupState::Extracting {
                line: "etc/passwd".to_string()
            },
            SessionStartupState::Extracting {
                line: "usr/bin/env".to_string()
            },
        ]
    );
    assert_eq!(fsm.state(), SessionStartupState::ExtractionSucceeded);
}

#[tokio::test]
async fn test_reset_from_any_state() {
    let mut harness = Harness::new();
    for state in all_states() {
        harness.fsm.set_state(state);
        let state = harness.send(SessionStartupEvent::ResetState).await;
        assert_eq!(state, SessionStartupState::WaitingForSelection);
    }
}

#[tokio::test]
async fn test_runner_drives_selection_through_storage_check() {
    let harness = Harness::new();
    let (session, filesystem) = harness.add_debian();
    publish_debian_manifests(&harness.source);
    let handle = FsmHandle::spawn(harness.fsm);
    let mut rx = handle.observe_state();

    handle.submit_event(SessionStartupEvent::SessionSelected { session });
    handle.submit_event(SessionStartupEvent::RetrieveAssetLists {
        filesystem: filesystem.clone(),
    });

    let state = tokio::time::timeout(
        Duration::from_secs(5),
        rx.wait_for(|s| matches!(s, SessionStartupState::AssetListsSucceeded { .. })),
    )
    .await
    .expect("asset lists not retrieved")
    .unwrap()
    .clone();
    let SessionStartupState::AssetListsSucceeded { asset_lists } = state else {
        unreachable!()
    };

    handle.submit_event(SessionStartupEvent::GenerateDownloads {
        filesystem,
        asset_lists,
    });
    let state = tokio::time::timeout(
        Duration::from_secs(5),
        rx.wait_for(|s| matches!(s, SessionStartupState::DownloadsRequired { .. })),
    )
    .await
    .expect("requirements not generated")
    .unwrap()
    .clone();
    assert!(matches!(
        state,
        SessionStartupState::DownloadsRequired {
            large_download_required: true,
            ..
        }
    ));
}
