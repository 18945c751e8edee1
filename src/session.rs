//! Persistence of session credentials.
//!
//! The host owns its sessions. This crate never holds on to a
//! [`CredentialPair`] beyond a single call; instead it hands refreshed pairs
//! back through [`SessionStore::on_credential_refreshed`].
//!
//! Two stores ship with the crate:
//! * [`MemoryStore`] - for servers that keep sessions in process
//! * [`FileStore`] - a TOML file, for the command-line host
//!
//! # Expiry
//!
//! The access credential lives until [`CredentialPair::expires_at`]. The
//! refresh credential has no reported lifetime; stores forget it
//! [`REFRESH_TTL`] after it was last stored.

use std::{
    collections::{BTreeMap, HashMap},
    fmt, fs,
    io::Write,
    path::{Path, PathBuf},
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::{Duration, SystemTime},
};

use serde::{Deserialize, Serialize};
use serde_with::{serde_as, TimestampMilliSeconds};
use tempfile::NamedTempFile;

use crate::{
    credentials::{Clock, CredentialPair, SessionId, SystemClock},
    error::{Error, Result},
};

/// How long a stored refresh credential is kept.
pub const REFRESH_TTL: Duration = Duration::from_secs(30 * 24 * 60 * 60);

/// Host-side storage of one credential pair per session.
///
/// Implementations must be cheap to call from async code; both bundled
/// stores finish without blocking on anything but a local file.
pub trait SessionStore: Send + Sync {
    /// Returns the session's credentials, if it has any that have not
    /// outlived [`REFRESH_TTL`].
    ///
    /// # Errors
    ///
    /// Will return `Err` if the backing storage cannot be read.
    fn load(&self, session: SessionId) -> Result<Option<CredentialPair>>;

    /// Stores credentials after a login.
    ///
    /// # Errors
    ///
    /// Will return `Err` if the backing storage cannot be written.
    fn store(&self, session: SessionId, pair: &CredentialPair) -> Result<()>;

    /// Called whenever a refresh produced a successor pair.
    ///
    /// # Errors
    ///
    /// Will return `Err` if the backing storage cannot be written.
    fn on_credential_refreshed(&self, session: SessionId, pair: &CredentialPair) -> Result<()> {
        self.store(session, pair)
    }

    /// Forgets the session.
    ///
    /// # Errors
    ///
    /// Will return `Err` if the backing storage cannot be written.
    fn remove(&self, session: SessionId) -> Result<()>;
}

#[serde_as]
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
struct Record {
    #[serde_as(as = "TimestampMilliSeconds<i64>")]
    stored_at: SystemTime,
    pair: CredentialPair,
}

impl Record {
    fn new(pair: &CredentialPair, now: SystemTime) -> Self {
        Self {
            pair: pair.clone(),
            stored_at: now,
        }
    }

    fn is_expired_at(&self, now: SystemTime) -> bool {
        now.duration_since(self.stored_at)
            .is_ok_and(|elapsed| elapsed > REFRESH_TTL)
    }
}

/// Ignores poisoning: records are replaced whole, never left half-written.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Sessions kept in process memory.
pub struct MemoryStore {
    records: Mutex<HashMap<SessionId, Record>>,
    clock: Arc<dyn Clock>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// Evaluates [`REFRESH_TTL`] against `clock` instead of the wall clock.
    #[must_use]
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            records: Mutex::new(HashMap::new()),
            clock,
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryStore")
            .field("sessions", &lock(&self.records).len())
            .finish_non_exhaustive()
    }
}

impl SessionStore for MemoryStore {
    fn load(&self, session: SessionId) -> Result<Option<CredentialPair>> {
        let now = self.clock.now();
        let mut records = lock(&self.records);
        if records
            .get(&session)
            .is_some_and(|record| record.is_expired_at(now))
        {
            records.remove(&session);
        }
        Ok(records.get(&session).map(|record| record.pair.clone()))
    }

    fn store(&self, session: SessionId, pair: &CredentialPair) -> Result<()> {
        let record = Record::new(pair, self.clock.now());
        lock(&self.records).insert(session, record);
        Ok(())
    }

    fn remove(&self, session: SessionId) -> Result<()> {
        lock(&self.records).remove(&session);
        Ok(())
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct SessionFile {
    #[serde(default)]
    sessions: BTreeMap<String, Record>,
}

/// Sessions kept in a TOML file.
///
/// The file contains refresh credentials; on Unix it is readable by the owner
/// only. Every write replaces the file as a whole, so readers never observe a
/// partial file.
///
/// ```toml
/// [sessions.00000000-0000-0000-0000-000000000000]
/// stored_at = 1700000000000
///
/// [sessions.00000000-0000-0000-0000-000000000000.pair]
/// access = "BQD..."
/// refresh = "AQC..."
/// expires_at = 1700003600000
/// ```
pub struct FileStore {
    path: PathBuf,
    guard: Mutex<()>,
    clock: Arc<dyn Clock>,
}

impl FileStore {
    /// Upper bound for the session file.
    const MAX_FILE_SIZE: u64 = 1024 * 1024;

    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self::with_clock(path, Arc::new(SystemClock))
    }

    /// Evaluates [`REFRESH_TTL`] against `clock` instead of the wall clock.
    #[must_use]
    pub fn with_clock(path: impl Into<PathBuf>, clock: Arc<dyn Clock>) -> Self {
        Self {
            path: path.into(),
            guard: Mutex::new(()),
            clock,
        }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read(&self) -> Result<SessionFile> {
        let metadata = match fs::metadata(&self.path) {
            Ok(metadata) => metadata,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(SessionFile::default());
            }
            Err(e) => return Err(e.into()),
        };

        if metadata.len() > Self::MAX_FILE_SIZE {
            return Err(Error::configuration(format!(
                "session file {} too large ({} bytes)",
                self.path.display(),
                metadata.len()
            )));
        }

        let contents = fs::read_to_string(&self.path)?;
        toml::from_str(&contents).map_err(Into::into)
    }

    /// Writes to a sibling temporary file, created with mode `0600` on Unix,
    /// and renames it over the session file.
    fn write(&self, file: &SessionFile) -> Result<()> {
        let contents = toml::to_string(file)?;

        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        let mut temp = NamedTempFile::new_in(dir)?;
        temp.write_all(contents.as_bytes())?;
        temp.as_file().sync_all()?;
        temp.persist(&self.path).map_err(|e| e.error)?;
        Ok(())
    }

    fn update<F>(&self, f: F) -> Result<()>
    where
        F: FnOnce(&mut BTreeMap<String, Record>),
    {
        let _guard = lock(&self.guard);
        let mut file = self.read()?;
        f(&mut file.sessions);

        let now = self.clock.now();
        file.sessions.retain(|_, record| !record.is_expired_at(now));
        self.write(&file)
    }
}

impl fmt::Debug for FileStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FileStore")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

impl SessionStore for FileStore {
    fn load(&self, session: SessionId) -> Result<Option<CredentialPair>> {
        let now = self.clock.now();
        let _guard = lock(&self.guard);
        let file = self.read()?;
        Ok(file
            .sessions
            .get(&session.to_string())
            .filter(|record| !record.is_expired_at(now))
            .map(|record| record.pair.clone()))
    }

    fn store(&self, session: SessionId, pair: &CredentialPair) -> Result<()> {
        let record = Record::new(pair, self.clock.now());
        self.update(|sessions| {
            sessions.insert(session.to_string(), record);
        })?;
        debug!("stored credentials in {}", self.path.display());
        Ok(())
    }

    fn remove(&self, session: SessionId) -> Result<()> {
        self.update(|sessions| {
            sessions.remove(&session.to_string());
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pair(access: &str) -> CredentialPair {
        CredentialPair::new(
            access.to_owned(),
            "refresh".to_owned(),
            SystemTime::UNIX_EPOCH + Duration::from_millis(1_700_000_000_123),
        )
    }

    #[test]
    fn memory_store_replaces_on_refresh() {
        let store = MemoryStore::new();
        let session = SessionId::new();

        assert_eq!(store.load(session).unwrap(), None);
        store.store(session, &pair("first")).unwrap();
        store.on_credential_refreshed(session, &pair("second")).unwrap();
        assert_eq!(store.load(session).unwrap(), Some(pair("second")));

        store.remove(session).unwrap();
        assert_eq!(store.load(session).unwrap(), None);
    }

    #[test]
    fn file_store_survives_reopening() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sessions.toml");
        let session = SessionId::local();
        let other = SessionId::new();

        let store = FileStore::new(&path);
        store.store(session, &pair("mine")).unwrap();
        store.store(other, &pair("theirs")).unwrap();
        drop(store);

        let store = FileStore::new(&path);
        assert_eq!(store.load(session).unwrap(), Some(pair("mine")));
        store.remove(other).unwrap();
        assert_eq!(store.load(other).unwrap(), None);
        assert_eq!(store.load(session).unwrap(), Some(pair("mine")));
    }

    #[test]
    fn missing_file_has_no_sessions() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path().join("absent.toml"));
        assert_eq!(store.load(SessionId::new()).unwrap(), None);
    }

    /// A clock that only moves when told to.
    #[derive(Debug)]
    struct SteppedClock(Mutex<SystemTime>);

    impl SteppedClock {
        fn new() -> Arc<Self> {
            Arc::new(Self(Mutex::new(
                SystemTime::UNIX_EPOCH + Duration::from_secs(1_700_000_000),
            )))
        }

        fn advance(&self, by: Duration) {
            *lock(&self.0) += by;
        }
    }

    impl Clock for SteppedClock {
        fn now(&self) -> SystemTime {
            *lock(&self.0)
        }
    }

    #[test]
    fn expired_records_are_forgotten() {
        let now = SystemTime::now();
        let record = Record {
            pair: pair("old"),
            stored_at: now - REFRESH_TTL - Duration::from_secs(1),
        };
        assert!(record.is_expired_at(now));
        assert!(!Record::new(&pair("new"), now).is_expired_at(now));
    }

    #[test]
    fn memory_store_expires_by_its_clock() {
        let clock = SteppedClock::new();
        let store = MemoryStore::with_clock(clock.clone());
        let session = SessionId::new();

        store.store(session, &pair("kept")).unwrap();
        clock.advance(REFRESH_TTL);
        assert_eq!(store.load(session).unwrap(), Some(pair("kept")));

        clock.advance(Duration::from_secs(1));
        assert_eq!(store.load(session).unwrap(), None);
    }

    #[test]
    fn file_store_prunes_by_its_clock() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sessions.toml");
        let clock = SteppedClock::new();
        let store = FileStore::with_clock(&path, clock.clone());
        let old = SessionId::new();
        let new = SessionId::new();

        store.store(old, &pair("old")).unwrap();
        clock.advance(REFRESH_TTL + Duration::from_secs(1));
        assert_eq!(store.load(old).unwrap(), None);

        store.store(new, &pair("new")).unwrap();
        let contents = fs::read_to_string(&path).unwrap();
        assert!(!contents.contains(&old.to_string()));
        assert!(contents.contains(&new.to_string()));
    }

    #[cfg(unix)]
    #[test]
    fn rewritten_file_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sessions.toml");
        fs::write(&path, "").unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o644)).unwrap();

        FileStore::new(&path)
            .store(SessionId::new(), &pair("secret"))
            .unwrap();

        let mode = fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[test]
    fn store_leaves_no_temporary_files() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path().join("sessions.toml"));
        store.store(SessionId::new(), &pair("a")).unwrap();
        store.store(SessionId::new(), &pair("b")).unwrap();

        let entries: Vec<_> = fs::read_dir(dir.path()).unwrap().collect();
        assert_eq!(entries.len(), 1);
    }

    #[test]
    fn malformed_file_is_a_configuration_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sessions.toml");
        fs::write(&path, "sessions = 3").unwrap();

        let err = FileStore::new(&path).load(SessionId::new()).unwrap_err();
        assert_eq!(err.kind, crate::error::ErrorKind::Configuration);
    }
}
