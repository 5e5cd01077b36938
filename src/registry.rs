//! The ordered list of installed docsets and its lifecycle.
//!
//! Readers take an immutable [`RegistrySnapshot`]; every mutation builds a
//! new list, persists it, swaps the snapshot and then sends one
//! [`DocsetsChanged`] notification.

use std::{
    collections::{HashMap, HashSet},
    path::{Path, PathBuf},
    sync::{
        Arc,
        Mutex,
        MutexGuard,
        PoisonError,
        RwLock,
        atomic::{AtomicU64, Ordering},
    },
};

use tokio::sync::broadcast;

use crate::{
    data_dir::DataDir,
    docset::{BundlePaths, Docset, bundle_dir_name, validate_bundle},
    docset_url::DocsetUrl,
    error::{Error, Result},
    registry_db::RegistryDb,
    store::ContentStore,
    walker,
};

/// Sent after every change to the docset list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DocsetsChanged;

const CHANGE_CHANNEL_CAPACITY: usize = 16;
const STAGING_PREFIX: &str = ".import-";
const REPLACED_PREFIX: &str = ".replaced-";

static STAGING_SEQ: AtomicU64 = AtomicU64::new(0);

/// One immutable view of the registry.
#[derive(Debug)]
pub struct RegistrySnapshot {
    pub version: u64,
    pub docsets: Arc<[Docset]>,
    pub enabled: Arc<[Docset]>,
}

impl RegistrySnapshot {
    fn new(version: u64, docsets: Vec<Docset>) -> Self {
        let enabled: Vec<Docset> =
            docsets.iter().filter(|d| d.enabled).cloned().collect();
        Self {
            version,
            docsets: docsets.into(),
            enabled: enabled.into(),
        }
    }
}

pub struct DocsetRegistry {
    data_dir: DataDir,
    db: RegistryDb,
    state: RwLock<Arc<RegistrySnapshot>>,
    writer: Mutex<()>,
    stores: Mutex<HashMap<String, Arc<ContentStore>>>,
    importing: Mutex<HashSet<PathBuf>>,
    changes: broadcast::Sender<DocsetsChanged>,
    #[cfg(test)]
    fail_at: Mutex<Option<FailPoint>>,
}

/// Steps of a mutation that tests can make fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FailPoint {
    Copy,
    Save,
}

impl DocsetRegistry {
    /// Open the registry database under `data_dir` and load the list.
    pub fn open(data_dir: DataDir) -> Result<Self> {
        let db = RegistryDb::open(&data_dir.registry_db())?;
        let docsets = db.load_docsets()?;
        tracing::debug!(count = docsets.len(), "loaded docset registry");

        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Ok(Self {
            data_dir,
            db,
            state: RwLock::new(Arc::new(RegistrySnapshot::new(0, docsets))),
            writer: Mutex::new(()),
            stores: Mutex::new(HashMap::new()),
            importing: Mutex::new(HashSet::new()),
            changes,
            #[cfg(test)]
            fail_at: Mutex::new(None),
        })
    }

    pub fn data_dir(&self) -> &DataDir {
        &self.data_dir
    }

    /// Re-read the persisted list, replacing the in-memory one.
    ///
    /// Notifies only when the list differs from the current snapshot.
    pub fn load(&self) -> Result<()> {
        let loaded = self.db.load_docsets()?;
        self.commit(|list| {
            if *list == loaded {
                return Ok(None);
            }
            *list = loaded;
            Ok(Some(()))
        })?;
        Ok(())
    }

    /// Persist the current list as-is.
    pub fn save(&self) -> Result<()> {
        let _guard = lock(&self.writer);
        self.db.save_docsets(&self.snapshot().docsets)
    }

    pub fn snapshot(&self) -> Arc<RegistrySnapshot> {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn docsets(&self) -> Arc<[Docset]> {
        self.snapshot().docsets.clone()
    }

    pub fn enabled_docsets(&self) -> Arc<[Docset]> {
        self.snapshot().enabled.clone()
    }

    pub fn version(&self) -> u64 {
        self.snapshot().version
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DocsetsChanged> {
        self.changes.subscribe()
    }

    /// The docset owning the content `url` addresses.
    pub fn docset_for_url(&self, url: &str) -> Option<Docset> {
        let parsed = DocsetUrl::parse(url, self.data_dir.root())?;
        self.docset_for_relative_path(&parsed.path)
    }

    /// The first docset, in registry order, whose path is `path` or an
    /// ancestor of it.
    pub fn docset_for_relative_path(&self, path: &str) -> Option<Docset> {
        self.snapshot()
            .docsets
            .iter()
            .find(|d| d.owns_relative_path(path))
            .cloned()
    }

    /// Look a docset up by display name, then by identifier.
    pub fn docset_named(&self, name: &str) -> Option<Docset> {
        let snapshot = self.snapshot();
        snapshot
            .docsets
            .iter()
            .find(|d| d.name == name)
            .or_else(|| snapshot.docsets.iter().find(|d| d.identifier == name))
            .cloned()
    }

    /// The docset serving `platform`, ignoring case. Enabled docsets win
    /// over disabled ones; otherwise the first in registry order.
    pub fn docset_for_platform(&self, platform: &str) -> Option<Docset> {
        let snapshot = self.snapshot();
        let mut serving = snapshot
            .docsets
            .iter()
            .filter(|d| d.platform.eq_ignore_ascii_case(platform.trim()));
        let first = serving.clone().next();
        serving.find(|d| d.enabled).or(first).cloned()
    }

    pub fn absolute_path(&self, docset: &Docset) -> PathBuf {
        self.data_dir.absolute(&docset.relative_path)
    }

    /// The content store of `docset`, opened on first use and cached.
    pub fn store_for(&self, docset: &Docset) -> Result<Arc<ContentStore>> {
        let mut stores = lock(&self.stores);
        if let Some(store) = stores.get(&docset.relative_path) {
            return Ok(store.clone());
        }

        let index = BundlePaths::new(self.absolute_path(docset)).index();
        if !index.is_dir() {
            return Err(Error::NotFound {
                kind: "content store",
                name: docset.relative_path.clone(),
            });
        }
        let store = Arc::new(ContentStore::open_registered(&index)?);
        stores.insert(docset.relative_path.clone(), store.clone());
        Ok(store)
    }

    /// Describe a bundle under the data root without registering it.
    pub fn describe_bundle(&self, path: &Path) -> Result<Docset> {
        let meta = validate_bundle(path)?;
        let relative = self.relative_to_root(path)?;
        Ok(Docset::from_meta(&meta, relative))
    }

    /// Register a bundle that already lives under the data root.
    ///
    /// A docset with the same name is replaced in place, keeping its
    /// position and enabled flag, when `replace_existing` is set.
    pub fn add_docset(
        &self,
        docset: Docset,
        replace_existing: bool,
    ) -> Result<Docset> {
        validate_bundle(&self.absolute_path(&docset))?;
        let added = self.commit(|list| {
            insert_docset(list, docset, replace_existing).map(Some)
        })?;
        let added = added.ok_or_else(|| {
            Error::Config("docset was not registered".into())
        })?;
        self.evict_store(&added.relative_path);
        tracing::info!(
            name = %added.name,
            path = %added.relative_path,
            "added docset"
        );
        Ok(added)
    }

    /// Copy the bundle at `source` into the library and register it.
    ///
    /// The bundle is staged in the downloads directory first. A failed
    /// copy leaves the staging directory behind for
    /// [`remove_cached_downloads`](Self::remove_cached_downloads) and the
    /// registry untouched. Moving the staged bundle into place and
    /// registering it happen under the writer lock; if either fails, a
    /// replaced bundle is moved back and the registry is left as it was.
    pub fn import_docset(
        &self,
        source: &Path,
        replace_existing: bool,
    ) -> Result<Docset> {
        let meta = validate_bundle(source)?;
        let library = self.data_dir.library_dir()?;
        let downloads = self.data_dir.downloads_dir()?;
        let destination = library.join(bundle_dir_name(&meta.name));
        let relative = self.relative_to_root(&destination)?;

        // Fail early; checked again under the writer lock.
        check_import(
            &self.snapshot().docsets,
            &meta.name,
            &relative,
            replace_existing,
        )?;

        let staging = downloads.join(unique_name(STAGING_PREFIX));
        let _import = ImportGuard::new(&self.importing, staging.clone());
        let bytes = walker::copy_tree(source, &staging)?;
        self.fail_point(FailPoint::Copy)?;
        tracing::debug!(
            staging = %staging.display(),
            bytes,
            "staged docset import"
        );

        let writer = lock(&self.writer);
        let current = self.snapshot();
        let checked = check_import(
            &current.docsets,
            &meta.name,
            &relative,
            replace_existing,
        );
        let existing = match checked {
            Ok(existing) => existing,
            Err(e) => {
                remove_path(&staging);
                return Err(e);
            }
        };
        let owned = current.docsets.iter().any(|d| d.relative_path == relative);
        if destination.exists() && !owned {
            remove_path(&staging);
            return Err(Error::Config(format!(
                "{} already exists and is not a registered docset",
                destination.display()
            )));
        }

        let trash_path = downloads.join(unique_name(REPLACED_PREFIX));
        let _trash = ImportGuard::new(&self.importing, trash_path.clone());
        let trash = if destination.exists() {
            std::fs::rename(&destination, &trash_path)?;
            Some(trash_path)
        } else {
            None
        };
        if let Err(e) = std::fs::rename(&staging, &destination) {
            restore(trash.as_deref(), &destination);
            return Err(e.into());
        }
        self.evict_store(&relative);

        let docset = Docset::from_meta(&meta, relative.clone());
        let committed = self.commit_locked(&writer, |list| {
            insert_docset(list, docset, replace_existing).map(Some)
        });
        let imported = match committed {
            Ok(Some(imported)) => imported,
            other => {
                remove_path(&destination);
                restore(trash.as_deref(), &destination);
                self.evict_store(&relative);
                return Err(match other {
                    Err(e) => e,
                    Ok(_) => Error::Config("docset was not registered".into()),
                });
            }
        };
        drop(writer);

        if let Some(trash) = trash {
            remove_path(&trash);
        }
        if let Some(old) = existing
            && old.relative_path != imported.relative_path
        {
            self.evict_store(&old.relative_path);
            let old_path = self.absolute_path(&old);
            if old_path.starts_with(&library) {
                remove_path(&old_path);
            }
        }

        tracing::info!(
            name = %imported.name,
            path = %imported.relative_path,
            replaced = replace_existing,
            "imported docset"
        );
        Ok(imported)
    }

    /// Enable or disable a docset. Returns whether anything changed.
    pub fn set_enabled(&self, docset: &Docset, enabled: bool) -> Result<bool> {
        let changed = self.commit(|list| {
            let entry = list
                .iter_mut()
                .find(|d| d.relative_path == docset.relative_path)
                .ok_or_else(|| not_found(docset))?;
            if entry.enabled == enabled {
                return Ok(None);
            }
            entry.enabled = enabled;
            Ok(Some(()))
        })?;
        Ok(changed.is_some())
    }

    /// Unregister every docset stored inside `folder`. Files are kept.
    pub fn remove_docsets_in_folder(
        &self,
        folder: &Path,
    ) -> Result<Vec<Docset>> {
        let removed = self.commit(|list| {
            let (removed, kept): (Vec<_>, Vec<_>) =
                std::mem::take(list).into_iter().partition(|d| {
                    self.data_dir.absolute(&d.relative_path).starts_with(folder)
                });
            *list = kept;
            Ok((!removed.is_empty()).then_some(removed))
        })?;

        let removed = removed.unwrap_or_default();
        for docset in &removed {
            self.evict_store(&docset.relative_path);
        }
        if !removed.is_empty() {
            tracing::info!(
                folder = %folder.display(),
                count = removed.len(),
                "removed docsets in folder"
            );
        }
        Ok(removed)
    }

    /// Unregister `docset` and delete its bundle.
    pub fn remove_docset(&self, docset: &Docset) -> Result<Docset> {
        let removed = self.commit(|list| {
            let position = list
                .iter()
                .position(|d| d.relative_path == docset.relative_path)
                .ok_or_else(|| not_found(docset))?;
            Ok(Some(list.remove(position)))
        })?;
        let removed = removed.ok_or_else(|| not_found(docset))?;

        self.evict_store(&removed.relative_path);
        let path = self.absolute_path(&removed);
        if path.exists() {
            std::fs::remove_dir_all(&path)?;
        }
        tracing::info!(name = %removed.name, "removed docset");
        Ok(removed)
    }

    /// Move the docset at `from` so it ends up at `to`.
    pub fn move_docset(&self, from: usize, to: usize) -> Result<()> {
        self.commit(|list| {
            let len = list.len();
            for index in [from, to] {
                if index >= len {
                    return Err(Error::IndexOutOfBounds { index, len });
                }
            }
            if from == to {
                return Ok(None);
            }
            let docset = list.remove(from);
            list.insert(to, docset);
            Ok(Some(()))
        })?;
        Ok(())
    }

    /// Delete leftovers in the downloads directory.
    ///
    /// In-progress imports and anything overlapping an installed docset
    /// are kept. Returns the number of entries removed.
    pub fn remove_cached_downloads(&self) -> Result<usize> {
        let downloads = self.data_dir.downloads_dir()?;
        let installed: Vec<PathBuf> = self
            .snapshot()
            .docsets
            .iter()
            .map(|d| self.absolute_path(d))
            .collect();

        let mut removed = 0;
        for entry in std::fs::read_dir(&downloads)? {
            let path = entry?.path();
            if lock(&self.importing).contains(&path) {
                tracing::debug!(
                    path = %path.display(),
                    "skipping import in progress"
                );
                continue;
            }
            let overlaps = installed
                .iter()
                .any(|d| d.starts_with(&path) || path.starts_with(d));
            if overlaps {
                continue;
            }

            if path.is_dir() {
                std::fs::remove_dir_all(&path)?;
            } else {
                std::fs::remove_file(&path)?;
            }
            removed += 1;
        }

        tracing::info!(removed, "cleaned cached downloads");
        Ok(removed)
    }

    /// Apply `mutate` to a copy of the list, then persist, publish and
    /// notify. `Ok(None)` from `mutate` means nothing changed.
    ///
    /// If persisting fails the published snapshot is left as it was.
    fn commit<T>(
        &self,
        mutate: impl FnOnce(&mut Vec<Docset>) -> Result<Option<T>>,
    ) -> Result<Option<T>> {
        let writer = lock(&self.writer);
        self.commit_locked(&writer, mutate)
    }

    /// [`commit`](Self::commit) for a caller already holding the writer
    /// lock.
    fn commit_locked<T>(
        &self,
        _writer: &MutexGuard<'_, ()>,
        mutate: impl FnOnce(&mut Vec<Docset>) -> Result<Option<T>>,
    ) -> Result<Option<T>> {
        let current = self.snapshot();
        let mut list = current.docsets.to_vec();

        let Some(value) = mutate(&mut list)? else {
            return Ok(None);
        };

        self.fail_point(FailPoint::Save)?;
        self.db.save_docsets(&list)?;
        let next = Arc::new(RegistrySnapshot::new(current.version + 1, list));
        *self.state.write().unwrap_or_else(PoisonError::into_inner) = next;

        // No receivers is fine.
        let _ = self.changes.send(DocsetsChanged);
        Ok(Some(value))
    }

    #[cfg(test)]
    fn fail_point(&self, point: FailPoint) -> Result<()> {
        if *lock(&self.fail_at) == Some(point) {
            return Err(Error::Io(std::io::Error::other(format!(
                "{point:?} failed"
            ))));
        }
        Ok(())
    }

    #[cfg(not(test))]
    fn fail_point(&self, _point: FailPoint) -> Result<()> {
        Ok(())
    }

    fn evict_store(&self, relative_path: &str) {
        lock(&self.stores).remove(relative_path);
    }

    fn relative_to_root(&self, path: &Path) -> Result<String> {
        self.data_dir.relativize(path).ok_or_else(|| {
            Error::Config(format!(
                "{} is not inside the data directory {}",
                path.display(),
                self.data_dir.root().display()
            ))
        })
    }
}

impl std::fmt::Debug for DocsetRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DocsetRegistry")
            .field("root", &self.data_dir.root())
            .field("version", &self.version())
            .finish_non_exhaustive()
    }
}

/// Marks a staging directory as in use for the lifetime of an import.
struct ImportGuard<'a> {
    importing: &'a Mutex<HashSet<PathBuf>>,
    path: PathBuf,
}

impl<'a> ImportGuard<'a> {
    fn new(importing: &'a Mutex<HashSet<PathBuf>>, path: PathBuf) -> Self {
        lock(importing).insert(path.clone());
        Self { importing, path }
    }
}

impl Drop for ImportGuard<'_> {
    fn drop(&mut self) {
        lock(self.importing).remove(&self.path);
    }
}

fn insert_docset(
    list: &mut Vec<Docset>,
    mut docset: Docset,
    replace_existing: bool,
) -> Result<Docset> {
    let same_name = list.iter().position(|d| d.name == docset.name);
    let same_path = list
        .iter()
        .position(|d| d.relative_path == docset.relative_path);

    match (same_name, same_path) {
        (Some(_), _) if !replace_existing => {
            Err(Error::NameCollision(docset.name))
        }
        (Some(i), Some(j)) if i != j => Err(Error::Config(format!(
            "{} is already registered as '{}'",
            docset.relative_path, list[j].name
        ))),
        (Some(i), _) => {
            docset.enabled = list[i].enabled;
            list[i] = docset.clone();
            Ok(docset)
        }
        (None, Some(j)) => Err(Error::Config(format!(
            "{} is already registered as '{}'",
            docset.relative_path, list[j].name
        ))),
        (None, None) => {
            list.push(docset.clone());
            Ok(docset)
        }
    }
}

/// Check that a bundle named `name` may be installed at `relative`.
/// Returns the docset it replaces, if any.
fn check_import(
    docsets: &[Docset],
    name: &str,
    relative: &str,
    replace_existing: bool,
) -> Result<Option<Docset>> {
    let existing = docsets.iter().find(|d| d.name == name).cloned();
    if existing.is_some() && !replace_existing {
        return Err(Error::NameCollision(name.to_string()));
    }
    if docsets
        .iter()
        .any(|d| d.relative_path == relative && d.name != name)
    {
        return Err(Error::NameCollision(name.to_string()));
    }
    Ok(existing)
}

/// Move a replaced bundle back to `destination`.
fn restore(trash: Option<&Path>, destination: &Path) {
    let Some(trash) = trash else {
        return;
    };
    if let Err(e) = std::fs::rename(trash, destination) {
        tracing::warn!(
            trash = %trash.display(),
            destination = %destination.display(),
            error = %e,
            "could not restore replaced docset"
        );
    }
}

fn not_found(docset: &Docset) -> Error {
    Error::NotFound {
        kind: "docset",
        name: docset.name.clone(),
    }
}

fn unique_name(prefix: &str) -> String {
    format!(
        "{prefix}{}-{}",
        std::process::id(),
        STAGING_SEQ.fetch_add(1, Ordering::Relaxed)
    )
}

fn remove_path(path: &Path) {
    if let Err(e) = std::fs::remove_dir_all(path) {
        tracing::warn!(path = %path.display(), error = %e, "could not remove");
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
