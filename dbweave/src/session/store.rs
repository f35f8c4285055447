// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

//! 会话存储
//!
//! [`FileSessionStore`] 每个会话一个 JSON 文件（`sess_{id}.json`），写入先落临时文件再改名；
//! [`MemorySessionStore`] 供测试与单进程部署使用。

use parking_lot::RwLock;
use std::collections::HashMap;
use std::fmt::Debug;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant, SystemTime};
use tracing::{debug, warn};

use super::record::{SessionData, is_valid_session_id};
use super::{SessionError, SessionResult};

/// 会话持久化接口
pub trait SessionStore: Debug + Send + Sync {
    /// 读取会话，不存在时返回 None
    fn read(&self, id: &str) -> SessionResult<Option<SessionData>>;

    /// 写入会话
    fn write(&self, id: &str, data: &SessionData) -> SessionResult<()>;

    /// 删除会话，不存在时不报错
    fn destroy(&self, id: &str) -> SessionResult<()>;

    /// 删除超过 `max_age` 未写入的会话，返回删除数量
    fn gc(&self, max_age: Duration) -> SessionResult<usize>;
}

/// 文件会话存储
#[derive(Debug, Clone)]
pub struct FileSessionStore {
    dir: PathBuf,
}

impl FileSessionStore {
    /// 使用目录创建，目录不存在时创建
    pub fn new(dir: impl Into<PathBuf>) -> SessionResult<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    /// 存储目录
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, id: &str) -> SessionResult<PathBuf> {
        if !is_valid_session_id(id) {
            return Err(SessionError::Storage(format!("Refusing malformed session id '{}'", id)));
        }
        Ok(self.dir.join(format!("sess_{}.json", id)))
    }
}

impl SessionStore for FileSessionStore {
    fn read(&self, id: &str) -> SessionResult<Option<SessionData>> {
        let path = self.path_for(id)?;
        let content = match fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        match serde_json::from_str(&content) {
            Ok(data) => Ok(Some(data)),
            Err(e) => {
                warn!("Discarding unreadable session file {}: {}", path.display(), e);
                Ok(None)
            }
        }
    }

    fn write(&self, id: &str, data: &SessionData) -> SessionResult<()> {
        let path = self.path_for(id)?;
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, serde_json::to_vec(data)?)?;
        fs::rename(&tmp, &path)?;
        Ok(())
    }

    fn destroy(&self, id: &str) -> SessionResult<()> {
        match fs::remove_file(self.path_for(id)?) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn gc(&self, max_age: Duration) -> SessionResult<usize> {
        let now = SystemTime::now();
        let mut removed = 0;

        for entry in fs::read_dir(&self.dir)? {
            let entry = entry?;
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            if !name.starts_with("sess_") {
                continue;
            }

            let modified = entry.metadata()?.modified()?;
            let age = now.duration_since(modified).unwrap_or_default();
            if age > max_age {
                match fs::remove_file(entry.path()) {
                    Ok(()) => removed += 1,
                    Err(e) if e.kind() == ErrorKind::NotFound => {}
                    Err(e) => return Err(e.into()),
                }
            }
        }

        debug!("Session gc removed {} file(s) from {}", removed, self.dir.display());
        Ok(removed)
    }
}

/// 内存会话存储
#[derive(Debug, Default)]
pub struct MemorySessionStore {
    entries: RwLock<HashMap<String, (SessionData, Instant)>>,
}

impl MemorySessionStore {
    /// 创建空存储
    pub fn new() -> Self {
        Self::default()
    }

    /// 当前会话数
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// 是否为空
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

impl SessionStore for MemorySessionStore {
    fn read(&self, id: &str) -> SessionResult<Option<SessionData>> {
        Ok(self.entries.read().get(id).map(|(data, _)| data.clone()))
    }

    fn write(&self, id: &str, data: &SessionData) -> SessionResult<()> {
        self.entries
            .write()
            .insert(id.to_string(), (data.clone(), Instant::now()));
        Ok(())
    }

    fn destroy(&self, id: &str) -> SessionResult<()> {
        self.entries.write().remove(id);
        Ok(())
    }

    fn gc(&self, max_age: Duration) -> SessionResult<usize> {
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|_, (_, written)| written.elapsed() <= max_age);
        Ok(before - entries.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn id(c: char) -> String {
        std::iter::repeat_n(c, 64).collect()
    }

    fn data() -> SessionData {
        let mut data = SessionData::default();
        data.values.insert("user".to_string(), json!("alice"));
        data
    }

    /// TEST-U-130: 文件存储读写删除
    #[test]
    fn test_file_store_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileSessionStore::new(dir.path().join("sessions")).unwrap();

        assert!(store.read(&id('a')).unwrap().is_none());
        store.write(&id('a'), &data()).unwrap();
        assert_eq!(store.read(&id('a')).unwrap(), Some(data()));
        assert!(dir.path().join("sessions").join(format!("sess_{}.json", id('a'))).exists());

        store.destroy(&id('a')).unwrap();
        store.destroy(&id('a')).unwrap();
        assert!(store.read(&id('a')).unwrap().is_none());
    }

    /// TEST-U-131: 非法 ID 不会触及文件系统
    #[test]
    fn test_file_store_rejects_malformed_id() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileSessionStore::new(dir.path()).unwrap();
        assert!(matches!(store.read("../../etc/passwd"), Err(SessionError::Storage(_))));
        assert!(matches!(store.write("short", &data()), Err(SessionError::Storage(_))));
    }

    /// TEST-U-132: 损坏的文件视为不存在
    #[test]
    fn test_file_store_corrupt_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileSessionStore::new(dir.path()).unwrap();
        fs::write(dir.path().join(format!("sess_{}.json", id('b'))), "{not json").unwrap();
        assert!(store.read(&id('b')).unwrap().is_none());
    }

    /// TEST-U-133: 垃圾回收
    #[test]
    fn test_gc() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileSessionStore::new(dir.path()).unwrap();
        store.write(&id('c'), &data()).unwrap();
        assert_eq!(store.gc(Duration::from_secs(3600)).unwrap(), 0);
        std::thread::sleep(Duration::from_millis(20));
        assert_eq!(store.gc(Duration::ZERO).unwrap(), 1);

        let memory = MemorySessionStore::new();
        memory.write(&id('d'), &data()).unwrap();
        assert_eq!(memory.gc(Duration::from_secs(3600)).unwrap(), 0);
        std::thread::sleep(Duration::from_millis(5));
        assert_eq!(memory.gc(Duration::ZERO).unwrap(), 1);
        assert!(memory.is_empty());
    }
}
