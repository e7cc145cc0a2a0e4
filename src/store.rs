//! Repository seams for the three entity stores. The engine issues reads and
//! writes against these traits; what backs them (relational or otherwise) is
//! the host's concern. In-memory implementations are provided for tests and
//! single-process deployments.

use crate::attendance::AttendanceRecord;
use crate::error::{AttendanceError, Result};
use crate::gallery::EmbeddingRecord;
use crate::session::Session;
use crate::{EmbeddingId, PersonId, SessionId};
use std::collections::HashMap;
use std::sync::Mutex;

pub trait EmbeddingStore: Send + Sync {
    /// Insert a new record, assigning its id.
    fn insert(&self, record: EmbeddingRecord) -> Result<EmbeddingId>;

    fn get(&self, id: EmbeddingId) -> Result<EmbeddingRecord>;

    /// Every record for a person, active or not.
    fn for_person(&self, person_id: PersonId) -> Result<Vec<EmbeddingRecord>>;

    fn active_for_person(&self, person_id: PersonId) -> Result<Vec<EmbeddingRecord>>;

    fn all_active(&self) -> Result<Vec<EmbeddingRecord>>;

    /// Mutate a record in place. Implementations must apply the closure
    /// atomically so concurrent usage-counter updates are not lost.
    fn update(&self, id: EmbeddingId, f: &mut dyn FnMut(&mut EmbeddingRecord)) -> Result<()>;
}

pub trait SessionStore: Send + Sync {
    fn insert(&self, session: Session) -> Result<()>;

    fn get(&self, id: SessionId) -> Result<Session>;

    /// Mutate a session under the store's lock. Serializes state transitions
    /// per session: of two concurrent `start()` calls, the second observes
    /// the already-started session and fails its guard.
    fn update(
        &self,
        id: SessionId,
        f: &mut dyn FnMut(&mut Session) -> Result<()>,
    ) -> Result<()>;
}

pub trait AttendanceStore: Send + Sync {
    fn get(&self, session_id: SessionId, person_id: PersonId)
        -> Result<Option<AttendanceRecord>>;

    fn upsert(&self, record: AttendanceRecord) -> Result<()>;

    fn for_session(&self, session_id: SessionId) -> Result<Vec<AttendanceRecord>>;
}

#[derive(Default)]
pub struct MemoryEmbeddingStore {
    inner: Mutex<MemoryEmbeddingInner>,
}

#[derive(Default)]
struct MemoryEmbeddingInner {
    records: HashMap<EmbeddingId, EmbeddingRecord>,
    next_id: EmbeddingId,
}

impl MemoryEmbeddingStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, MemoryEmbeddingInner>> {
        self.inner
            .lock()
            .map_err(|_| AttendanceError::Storage("embedding store lock poisoned".into()))
    }
}

impl EmbeddingStore for MemoryEmbeddingStore {
    fn insert(&self, mut record: EmbeddingRecord) -> Result<EmbeddingId> {
        let mut inner = self.lock()?;
        inner.next_id += 1;
        let id = inner.next_id;
        record.id = id;
        inner.records.insert(id, record);
        Ok(id)
    }

    fn get(&self, id: EmbeddingId) -> Result<EmbeddingRecord> {
        self.lock()?
            .records
            .get(&id)
            .cloned()
            .ok_or_else(|| AttendanceError::Storage(format!("embedding {} not found", id)))
    }

    fn for_person(&self, person_id: PersonId) -> Result<Vec<EmbeddingRecord>> {
        let inner = self.lock()?;
        let mut records: Vec<_> = inner
            .records
            .values()
            .filter(|r| r.person_id == person_id)
            .cloned()
            .collect();
        records.sort_by_key(|r| r.id);
        Ok(records)
    }

    fn active_for_person(&self, person_id: PersonId) -> Result<Vec<EmbeddingRecord>> {
        Ok(self
            .for_person(person_id)?
            .into_iter()
            .filter(|r| r.is_active)
            .collect())
    }

    fn all_active(&self) -> Result<Vec<EmbeddingRecord>> {
        let inner = self.lock()?;
        let mut records: Vec<_> = inner
            .records
            .values()
            .filter(|r| r.is_active)
            .cloned()
            .collect();
        records.sort_by_key(|r| (r.person_id, r.id));
        Ok(records)
    }

    fn update(&self, id: EmbeddingId, f: &mut dyn FnMut(&mut EmbeddingRecord)) -> Result<()> {
        let mut inner = self.lock()?;
        let record = inner
            .records
            .get_mut(&id)
            .ok_or_else(|| AttendanceError::Storage(format!("embedding {} not found", id)))?;
        f(record);
        Ok(())
    }
}

#[derive(Default)]
pub struct MemorySessionStore {
    sessions: Mutex<HashMap<SessionId, Session>>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<SessionId, Session>>> {
        self.sessions
            .lock()
            .map_err(|_| AttendanceError::Storage("session store lock poisoned".into()))
    }
}

impl SessionStore for MemorySessionStore {
    fn insert(&self, session: Session) -> Result<()> {
        self.lock()?.insert(session.id, session);
        Ok(())
    }

    fn get(&self, id: SessionId) -> Result<Session> {
        self.lock()?
            .get(&id)
            .cloned()
            .ok_or(AttendanceError::SessionNotFound(id))
    }

    fn update(
        &self,
        id: SessionId,
        f: &mut dyn FnMut(&mut Session) -> Result<()>,
    ) -> Result<()> {
        let mut sessions = self.lock()?;
        let session = sessions
            .get_mut(&id)
            .ok_or(AttendanceError::SessionNotFound(id))?;
        f(session)
    }
}

#[derive(Default)]
pub struct MemoryAttendanceStore {
    records: Mutex<HashMap<(SessionId, PersonId), AttendanceRecord>>,
}

impl MemoryAttendanceStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(
        &self,
    ) -> Result<std::sync::MutexGuard<'_, HashMap<(SessionId, PersonId), AttendanceRecord>>> {
        self.records
            .lock()
            .map_err(|_| AttendanceError::Storage("attendance store lock poisoned".into()))
    }
}

impl AttendanceStore for MemoryAttendanceStore {
    fn get(
        &self,
        session_id: SessionId,
        person_id: PersonId,
    ) -> Result<Option<AttendanceRecord>> {
        Ok(self.lock()?.get(&(session_id, person_id)).cloned())
    }

    fn upsert(&self, record: AttendanceRecord) -> Result<()> {
        self.lock()?
            .insert((record.session_id, record.person_id), record);
        Ok(())
    }

    fn for_session(&self, session_id: SessionId) -> Result<Vec<AttendanceRecord>> {
        let records = self.lock()?;
        let mut out: Vec<_> = records
            .values()
            .filter(|r| r.session_id == session_id)
            .cloned()
            .collect();
        out.sort_by_key(|r| r.person_id);
        Ok(out)
    }
}
