//! Test helpers for drive integration tests.
//!
//! Provides an in-memory blob store with injectable failures and helpers
//! to set up a drive over an in-memory database.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use drivetree::config::Config;
use drivetree::drive::StoredBlob;
use drivetree::{
    BlobStore, Database, Drive, DriveError, DriveSettings, NewUser, Result, UserRepository,
};

/// Blob store keeping content in memory.
#[derive(Default)]
pub struct MemoryBlobStore {
    blobs: Mutex<HashMap<String, Vec<u8>>>,
    next_id: AtomicUsize,
    fail_puts: AtomicBool,
    fail_deletes: AtomicBool,
}

impl MemoryBlobStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Make every following `put` fail.
    pub fn fail_puts(&self, fail: bool) {
        self.fail_puts.store(fail, Ordering::SeqCst);
    }

    /// Make every following `delete` fail.
    pub fn fail_deletes(&self, fail: bool) {
        self.fail_deletes.store(fail, Ordering::SeqCst);
    }

    pub fn contains(&self, public_id: &str) -> bool {
        self.blobs.lock().unwrap().contains_key(public_id)
    }

    pub fn len(&self) -> usize {
        self.blobs.lock().unwrap().len()
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn put(&self, bytes: &[u8], hint: &str) -> Result<StoredBlob> {
        if self.fail_puts.load(Ordering::SeqCst) {
            return Err(DriveError::Storage("injected put failure".to_string()));
        }
        let n = self.next_id.fetch_add(1, Ordering::SeqCst);
        let public_id = format!("blob-{n}-{hint}");
        self.blobs
            .lock()
            .unwrap()
            .insert(public_id.clone(), bytes.to_vec());
        Ok(StoredBlob {
            url: format!("memory://{public_id}"),
            public_id,
        })
    }

    async fn delete(&self, public_id: &str) -> Result<()> {
        if self.fail_deletes.load(Ordering::SeqCst) {
            return Err(DriveError::Storage("injected delete failure".to_string()));
        }
        self.blobs.lock().unwrap().remove(public_id);
        Ok(())
    }
}

/// Default settings for tests.
pub fn test_settings() -> DriveSettings {
    DriveSettings::from_config(&Config::default()).unwrap()
}

/// Drive over an in-memory database and blob store.
pub async fn setup_drive() -> (Drive, Arc<MemoryBlobStore>) {
    setup_drive_with(test_settings()).await
}

pub async fn setup_drive_with(settings: DriveSettings) -> (Drive, Arc<MemoryBlobStore>) {
    let db = Database::open_in_memory().await.unwrap();
    let blobs = MemoryBlobStore::new();
    let drive = Drive::new(db, blobs.clone(), settings);
    (drive, blobs)
}

/// Drive over a file-backed database in `dir`, with the pool `main` uses.
pub async fn setup_file_drive(dir: &std::path::Path) -> (Drive, Arc<MemoryBlobStore>) {
    let db = Database::open(dir.join("drive.db")).await.unwrap();
    let blobs = MemoryBlobStore::new();
    let drive = Drive::new(db, blobs.clone(), test_settings());
    (drive, blobs)
}

/// Register an owner with the given storage limit.
pub async fn create_user(drive: &Drive, id: &str, storage_limit: i64) {
    let user = NewUser::new(id, format!("{id}@example.com"), storage_limit);
    UserRepository::create(drive.db().pool(), &user).await.unwrap();
}
