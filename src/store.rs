//! Access to publication records.
//!
//! Status changes made through [`PublicationStore::set_published`] only
//! become durable on [`PublicationStore::commit`]; [`PublicationStore::rollback`]
//! discards them.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{PublishError, PublishResult};
use crate::model::{
    BinaryPublication, PublicationRef, PublishingStatus, SourcePublication, Suite,
};

#[async_trait]
pub trait PublicationStore: Send + Sync {
    /// Source publications of `archive` with one of `statuses`, ordered by id.
    async fn source_publications(
        &self,
        archive: &str,
        statuses: &[PublishingStatus],
    ) -> PublishResult<Vec<SourcePublication>>;

    /// Binary publications of `archive` with one of `statuses`, ordered by id.
    async fn binary_publications(
        &self,
        archive: &str,
        statuses: &[PublishingStatus],
    ) -> PublishResult<Vec<BinaryPublication>>;

    /// Flip a PENDING publication to PUBLISHED.
    async fn set_published(&self, publication: PublicationRef) -> PublishResult<()>;

    /// Suites holding deleted publications whose files were not removed yet.
    async fn suites_with_pending_deletions(&self, archive: &str)
        -> PublishResult<BTreeSet<Suite>>;

    async fn commit(&self) -> PublishResult<()>;

    async fn rollback(&self) -> PublishResult<()>;
}

/// The publication rows of every archive.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PublicationSet {
    #[serde(default)]
    pub sources: Vec<SourcePublication>,
    #[serde(default)]
    pub binaries: Vec<BinaryPublication>,
}

impl PublicationSet {
    fn set_published(&mut self, publication: PublicationRef) -> PublishResult<()> {
        let status = match publication {
            PublicationRef::Source(id) => self
                .sources
                .iter_mut()
                .find(|p| p.id == id)
                .map(|p| &mut p.status),
            PublicationRef::Binary(id) => self
                .binaries
                .iter_mut()
                .find(|p| p.id == id)
                .map(|p| &mut p.status),
        }
        .ok_or_else(|| PublishError::Store(format!("no such {}", publication)))?;

        match *status {
            PublishingStatus::Pending | PublishingStatus::Published => {
                *status = PublishingStatus::Published;
                Ok(())
            }
            other => Err(PublishError::Store(format!(
                "cannot publish {} with status {:?}",
                publication, other
            ))),
        }
    }

    fn pending_deletions(&self, archive: &str) -> BTreeSet<Suite> {
        let sources = self
            .sources
            .iter()
            .filter(|p| p.archive == archive)
            .filter(|p| p.status == PublishingStatus::Deleted && p.date_removed.is_none())
            .map(|p| p.suite());
        let binaries = self
            .binaries
            .iter()
            .filter(|p| p.archive == archive)
            .filter(|p| p.status == PublishingStatus::Deleted && p.date_removed.is_none())
            .map(|p| p.suite());
        sources.chain(binaries).collect()
    }
}

/// Publication store held entirely in memory.
#[derive(Debug, Default)]
pub struct MemoryPublicationStore {
    working: Mutex<PublicationSet>,
    committed: Mutex<PublicationSet>,
    commits: AtomicUsize,
}

fn poisoned<T>(_: T) -> PublishError {
    PublishError::Store("publication store lock poisoned".to_string())
}

impl MemoryPublicationStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_set(set: PublicationSet) -> Self {
        Self {
            working: Mutex::new(set.clone()),
            committed: Mutex::new(set),
            commits: AtomicUsize::new(0),
        }
    }

    /// Insert a source publication; it is immediately committed.
    pub fn add_source(&self, publication: SourcePublication) -> PublishResult<()> {
        self.working
            .lock()
            .map_err(poisoned)?
            .sources
            .push(publication.clone());
        self.committed
            .lock()
            .map_err(poisoned)?
            .sources
            .push(publication);
        Ok(())
    }

    /// Insert a binary publication; it is immediately committed.
    pub fn add_binary(&self, publication: BinaryPublication) -> PublishResult<()> {
        self.working
            .lock()
            .map_err(poisoned)?
            .binaries
            .push(publication.clone());
        self.committed
            .lock()
            .map_err(poisoned)?
            .binaries
            .push(publication);
        Ok(())
    }

    /// Committed state.
    pub fn snapshot(&self) -> PublishResult<PublicationSet> {
        Ok(self.committed.lock().map_err(poisoned)?.clone())
    }

    /// Committed status of a publication.
    pub fn status(&self, publication: PublicationRef) -> PublishResult<Option<PublishingStatus>> {
        let set = self.committed.lock().map_err(poisoned)?;
        Ok(match publication {
            PublicationRef::Source(id) => set.sources.iter().find(|p| p.id == id).map(|p| p.status),
            PublicationRef::Binary(id) => {
                set.binaries.iter().find(|p| p.id == id).map(|p| p.status)
            }
        })
    }

    /// Number of commits so far.
    pub fn commits(&self) -> usize {
        self.commits.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PublicationStore for MemoryPublicationStore {
    async fn source_publications(
        &self,
        archive: &str,
        statuses: &[PublishingStatus],
    ) -> PublishResult<Vec<SourcePublication>> {
        let set = self.working.lock().map_err(poisoned)?;
        let mut pubs: Vec<_> = set
            .sources
            .iter()
            .filter(|p| p.archive == archive && statuses.contains(&p.status))
            .cloned()
            .collect();
        pubs.sort_by_key(|p| p.id);
        Ok(pubs)
    }

    async fn binary_publications(
        &self,
        archive: &str,
        statuses: &[PublishingStatus],
    ) -> PublishResult<Vec<BinaryPublication>> {
        let set = self.working.lock().map_err(poisoned)?;
        let mut pubs: Vec<_> = set
            .binaries
            .iter()
            .filter(|p| p.archive == archive && statuses.contains(&p.status))
            .cloned()
            .collect();
        pubs.sort_by_key(|p| p.id);
        Ok(pubs)
    }

    async fn set_published(&self, publication: PublicationRef) -> PublishResult<()> {
        self.working
            .lock()
            .map_err(poisoned)?
            .set_published(publication)
    }

    async fn suites_with_pending_deletions(
        &self,
        archive: &str,
    ) -> PublishResult<BTreeSet<Suite>> {
        Ok(self.working.lock().map_err(poisoned)?.pending_deletions(archive))
    }

    async fn commit(&self) -> PublishResult<()> {
        let working = self.working.lock().map_err(poisoned)?.clone();
        *self.committed.lock().map_err(poisoned)? = working;
        self.commits.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn rollback(&self) -> PublishResult<()> {
        let committed = self.committed.lock().map_err(poisoned)?.clone();
        *self.working.lock().map_err(poisoned)? = committed;
        Ok(())
    }
}

/// Publication store backed by a JSON file, rewritten on every commit.
#[derive(Debug)]
pub struct JsonPublicationStore {
    path: PathBuf,
    inner: MemoryPublicationStore,
}

impl JsonPublicationStore {
    pub fn open(path: &Path) -> PublishResult<Self> {
        let set: PublicationSet = match std::fs::read(path) {
            Ok(content) => serde_json::from_slice(&content)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => PublicationSet::default(),
            Err(e) => return Err(e.into()),
        };
        Ok(Self {
            path: path.to_path_buf(),
            inner: MemoryPublicationStore::from_set(set),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl PublicationStore for JsonPublicationStore {
    async fn source_publications(
        &self,
        archive: &str,
        statuses: &[PublishingStatus],
    ) -> PublishResult<Vec<SourcePublication>> {
        self.inner.source_publications(archive, statuses).await
    }

    async fn binary_publications(
        &self,
        archive: &str,
        statuses: &[PublishingStatus],
    ) -> PublishResult<Vec<BinaryPublication>> {
        self.inner.binary_publications(archive, statuses).await
    }

    async fn set_published(&self, publication: PublicationRef) -> PublishResult<()> {
        self.inner.set_published(publication).await
    }

    async fn suites_with_pending_deletions(
        &self,
        archive: &str,
    ) -> PublishResult<BTreeSet<Suite>> {
        self.inner.suites_with_pending_deletions(archive).await
    }

    async fn commit(&self) -> PublishResult<()> {
        self.inner.commit().await?;
        let content = serde_json::to_vec_pretty(&self.inner.snapshot()?)?;
        apt_repository::write_atomically(&self.path, &content)?;
        Ok(())
    }

    async fn rollback(&self) -> PublishResult<()> {
        self.inner.rollback().await
    }
}
