//! 청크 스토리지 백엔드
//!
//! transferable ID로 주소화되는 바이트 저장소. 수신 진행 중에는
//! append-only. CRUD 계층(DB, S3 등)은 이 trait 건너편에 산다.

use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Write};
use std::path::PathBuf;

use parking_lot::Mutex;

use crate::error::{Error, Result};
use crate::transferable::TransferableId;

/// 청크 스토리지 인터페이스
pub trait ChunkStorage: Send + Sync {
    /// offset 위치에 바이트 추가
    ///
    /// 진행 중 전송에서는 offset이 항상 현재 저장 길이와 같아야 한다.
    fn write(&self, id: TransferableId, offset: u64, bytes: &[u8]) -> Result<()>;

    /// 전체 바이트 읽기
    fn read_all(&self, id: TransferableId) -> Result<Vec<u8>>;

    /// 저장분 삭제 (없는 ID는 no-op)
    fn delete(&self, id: TransferableId) -> Result<()>;
}

/// 파일 기반 스토리지 (transferable당 파일 하나)
pub struct FileStorage {
    root: PathBuf,
}

impl FileStorage {
    /// 루트 디렉터리 아래에 스토리지 생성
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    fn path_for(&self, id: TransferableId) -> PathBuf {
        self.root.join(id.to_string())
    }
}

impl ChunkStorage for FileStorage {
    fn write(&self, id: TransferableId, offset: u64, bytes: &[u8]) -> Result<()> {
        let path = self.path_for(id);
        let current = path.metadata().map(|m| m.len()).unwrap_or(0);
        if current != offset {
            return Err(Error::Storage {
                transferable_id: id,
                message: format!("append offset 불일치: file={current}, chunk={offset}"),
            });
        }

        let mut file = OpenOptions::new().create(true).append(true).open(&path)?;
        file.write_all(bytes)?;
        file.sync_data()?;
        Ok(())
    }

    fn read_all(&self, id: TransferableId) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        File::open(self.path_for(id))?.read_to_end(&mut buf)?;
        Ok(buf)
    }

    fn delete(&self, id: TransferableId) -> Result<()> {
        match fs::remove_file(self.path_for(id)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// 인메모리 스토리지 (테스트/데모용)
#[derive(Default)]
pub struct MemoryStorage {
    entries: Mutex<HashMap<TransferableId, Vec<u8>>>,
}

impl MemoryStorage {
    /// 빈 스토리지 생성
    pub fn new() -> Self {
        Self::default()
    }

    /// 저장된 transferable 수
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// 비어 있는지 여부
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

impl ChunkStorage for MemoryStorage {
    fn write(&self, id: TransferableId, offset: u64, bytes: &[u8]) -> Result<()> {
        let mut entries = self.entries.lock();
        let entry = entries.entry(id).or_default();
        if entry.len() as u64 != offset {
            return Err(Error::Storage {
                transferable_id: id,
                message: format!(
                    "append offset 불일치: stored={}, chunk={offset}",
                    entry.len()
                ),
            });
        }
        entry.extend_from_slice(bytes);
        Ok(())
    }

    fn read_all(&self, id: TransferableId) -> Result<Vec<u8>> {
        self.entries
            .lock()
            .get(&id)
            .cloned()
            .ok_or(Error::Storage {
                transferable_id: id,
                message: "저장분 없음".into(),
            })
    }

    fn delete(&self, id: TransferableId) -> Result<()> {
        self.entries.lock().remove(&id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use uuid::Uuid;

    use super::*;

    fn exercise(storage: &dyn ChunkStorage) {
        let id = Uuid::new_v4();

        storage.write(id, 0, b"hello").unwrap();
        storage.write(id, 5, b" world").unwrap();
        assert_eq!(storage.read_all(id).unwrap(), b"hello world");

        // offset 불일치는 거부
        assert!(storage.write(id, 3, b"x").is_err());
        assert_eq!(storage.read_all(id).unwrap(), b"hello world");

        storage.delete(id).unwrap();
        assert!(storage.read_all(id).is_err());

        // 없는 ID 삭제는 no-op
        storage.delete(Uuid::new_v4()).unwrap();
    }

    #[test]
    fn memory_storage_contract() {
        exercise(&MemoryStorage::new());
    }

    #[test]
    fn file_storage_contract() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FileStorage::new(dir.path()).unwrap();
        exercise(&storage);
    }

    #[test]
    fn file_storage_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let id = Uuid::new_v4();

        {
            let storage = FileStorage::new(dir.path()).unwrap();
            storage.write(id, 0, b"part1").unwrap();
        }

        // 프로세스 재시작 시나리오: 같은 루트로 다시 열어 이어서 쓴다
        let storage = FileStorage::new(dir.path()).unwrap();
        storage.write(id, 5, b"part2").unwrap();
        assert_eq!(storage.read_all(id).unwrap(), b"part1part2");
    }
}
