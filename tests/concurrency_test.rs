//! Concurrency tests for drivetree.
//!
//! These tests verify that concurrent structural mutations and quota
//! updates for the same owner are serialized correctly.

mod common;

use common::{create_user, setup_drive, setup_file_drive};

use drivetree::drive::FolderRepository;
use drivetree::{DriveError, NewFolder, UploadRequest};

/// Test concurrent uploads for one owner.
///
/// Every upload must be counted exactly once in `storage_used`.
#[tokio::test]
async fn test_concurrent_uploads_update_quota() {
    let (drive, _blobs) = setup_drive().await;
    create_user(&drive, "u", 1_000_000).await;

    const NUM_UPLOADS: usize = 20;

    let mut handles = Vec::new();
    for i in 0..NUM_UPLOADS {
        let drive = drive.clone();
        handles.push(tokio::spawn(async move {
            let request = UploadRequest::new(format!("file-{i}.bin"), vec![0u8; 10 + i]);
            drive.tree().upload("u", &request).await
        }));
    }

    let mut success_count = 0;
    for handle in handles {
        if handle.await.unwrap().is_ok() {
            success_count += 1;
        }
    }
    assert_eq!(success_count, NUM_UPLOADS, "All uploads should succeed");

    let expected: i64 = (0..NUM_UPLOADS).map(|i| (10 + i) as i64).sum();
    assert_eq!(drive.quota().usage("u").await.unwrap().used, expected);
    assert_eq!(drive.quota().reconcile("u").await.unwrap(), expected);
}

/// Test concurrent creates of the same folder name.
///
/// Exactly one create must win; the rest must fail with Conflict.
#[tokio::test]
async fn test_concurrent_creates_same_name() {
    let (drive, _blobs) = setup_drive().await;
    create_user(&drive, "u", 1_000).await;

    const NUM_TASKS: usize = 10;

    let mut handles = Vec::new();
    for _ in 0..NUM_TASKS {
        let drive = drive.clone();
        handles.push(tokio::spawn(async move {
            drive.tree().create("u", &NewFolder::new("Docs")).await
        }));
    }

    let mut created = 0;
    let mut conflicts = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => created += 1,
            Err(DriveError::Conflict(_)) => conflicts += 1,
            Err(e) => panic!("unexpected error: {e}"),
        }
    }
    assert_eq!(created, 1);
    assert_eq!(conflicts, NUM_TASKS - 1);
}

/// Test two crossing moves on the same owner.
///
/// Moving A under B and B under A at the same time must never produce a
/// cycle: one move wins and the other is rejected.
#[tokio::test]
async fn test_concurrent_crossing_moves() {
    let (drive, _blobs) = setup_drive().await;
    create_user(&drive, "u", 1_000).await;

    let a = drive.tree().create("u", &NewFolder::new("A")).await.unwrap();
    let b = drive.tree().create("u", &NewFolder::new("B")).await.unwrap();

    let first = {
        let drive = drive.clone();
        let (a, b) = (a.id.clone(), b.id.clone());
        tokio::spawn(async move { drive.tree().move_node(&a, "u", Some(&b)).await })
    };
    let second = {
        let drive = drive.clone();
        let (a, b) = (a.id.clone(), b.id.clone());
        tokio::spawn(async move { drive.tree().move_node(&b, "u", Some(&a)).await })
    };

    let results = [first.await.unwrap(), second.await.unwrap()];
    let ok = results.iter().filter(|r| r.is_ok()).count();
    let cycles = results
        .iter()
        .filter(|r| matches!(r, Err(DriveError::CycleViolation(_))))
        .count();
    assert_eq!(ok, 1);
    assert_eq!(cycles, 1);

    let pool = drive.db().pool();
    let a = FolderRepository::get_by_id(pool, &a.id).await.unwrap().unwrap();
    let b = FolderRepository::get_by_id(pool, &b.id).await.unwrap().unwrap();
    let roots = [a.parent_id.is_none(), b.parent_id.is_none()];
    assert_eq!(roots.iter().filter(|r| **r).count(), 1, "exactly one root remains");
    assert!(a.path == "/B/A" || b.path == "/A/B");
}

/// Test soft-delete racing with uploads into the same subtree.
///
/// No live file may be left inside a trashed folder.
#[tokio::test]
async fn test_soft_delete_races_upload() {
    let (drive, _blobs) = setup_drive().await;
    create_user(&drive, "u", 1_000_000).await;

    let docs = drive.tree().create("u", &NewFolder::new("Docs")).await.unwrap();

    let mut handles = Vec::new();
    for i in 0..10 {
        let drive = drive.clone();
        let folder_id = docs.id.clone();
        handles.push(tokio::spawn(async move {
            let request =
                UploadRequest::new(format!("f{i}.txt"), vec![1u8; 5]).in_folder(folder_id);
            drive.tree().upload("u", &request).await.map(|_| ())
        }));
    }
    {
        let drive = drive.clone();
        let folder_id = docs.id.clone();
        handles.push(tokio::spawn(async move {
            drive.trash().soft_delete(&folder_id, "u").await.map(|_| ())
        }));
    }
    for handle in handles {
        // Uploads after the delete fail with NotFound
        let _ = handle.await.unwrap();
    }

    let orphans: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM files f JOIN folders p ON p.id = f.folder_id
         WHERE f.is_deleted = 0 AND p.is_deleted = 1",
    )
    .fetch_one(drive.db().pool())
    .await
    .unwrap();
    assert_eq!(orphans, 0);

    let used = drive.quota().usage("u").await.unwrap().used;
    let stored: i64 = sqlx::query_scalar("SELECT COALESCE(SUM(size), 0) FROM files")
        .fetch_one(drive.db().pool())
        .await
        .unwrap();
    assert_eq!(used, stored);
}

/// Test operations of different owners in parallel.
#[tokio::test]
async fn test_different_owners_in_parallel() {
    let (drive, _blobs) = setup_drive().await;
    for owner in ["u1", "u2", "u3"] {
        create_user(&drive, owner, 1_000).await;
    }

    let mut handles = Vec::new();
    for owner in ["u1", "u2", "u3"] {
        let drive = drive.clone();
        handles.push(tokio::spawn(async move {
            let root = drive.tree().create(owner, &NewFolder::new("Root")).await?;
            for i in 0..5 {
                drive
                    .tree()
                    .create(owner, &NewFolder::new(format!("C{i}")).with_parent(&root.id))
                    .await?;
            }
            drive.trash().soft_delete(&root.id, owner).await?;
            drive.trash().permanently_delete(&root.id, owner).await
        }));
    }

    for handle in handles {
        let summary = handle.await.unwrap().unwrap();
        assert_eq!(summary.folders, 6);
    }
    let remaining: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM folders")
        .fetch_one(drive.db().pool())
        .await
        .unwrap();
    assert_eq!(remaining, 0);
}

/// Test many owners writing at once against a file-backed database.
///
/// Owners are not serialized against each other, so their transactions
/// overlap on the pool and must all wait for the write lock and succeed.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_different_owners_on_file_database() {
    let temp_dir = tempfile::TempDir::new().unwrap();
    let (drive, _blobs) = setup_file_drive(temp_dir.path()).await;

    const NUM_OWNERS: usize = 16;
    const FOLDERS_PER_OWNER: usize = 20;

    for o in 0..NUM_OWNERS {
        create_user(&drive, &format!("owner{o}"), 1_000_000).await;
    }

    let mut handles = Vec::new();
    for o in 0..NUM_OWNERS {
        let drive = drive.clone();
        handles.push(tokio::spawn(async move {
            let owner = format!("owner{o}");
            for i in 0..FOLDERS_PER_OWNER {
                drive
                    .tree()
                    .create(&owner, &NewFolder::new(format!("F{i}")))
                    .await?;
            }
            let request = UploadRequest::new("notes.txt", vec![7u8; 10]);
            drive.tree().upload(&owner, &request).await?;
            Ok::<_, DriveError>(())
        }));
    }

    let mut errors = Vec::new();
    for handle in handles {
        if let Err(e) = handle.await.unwrap() {
            errors.push(e.to_string());
        }
    }
    assert!(errors.is_empty(), "failed writes: {errors:?}");

    let folders: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM folders")
        .fetch_one(drive.db().pool())
        .await
        .unwrap();
    assert_eq!(folders as usize, NUM_OWNERS * FOLDERS_PER_OWNER);
    for o in 0..NUM_OWNERS {
        let usage = drive.quota().usage(&format!("owner{o}")).await.unwrap();
        assert_eq!(usage.used, 10);
    }

    drive.db().close().await;
}
