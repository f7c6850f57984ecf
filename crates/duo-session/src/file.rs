use std::io;
use std::path::Path;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt, SeekFrom};
use tokio::sync::Mutex;

/// A file the local side wants to send, read lazily one chunk at a time.
#[async_trait]
pub trait FileSource: Send + Sync {
    fn name(&self) -> &str;
    fn size(&self) -> u64;
    async fn read_chunk(&self, offset: u64, len: usize) -> io::Result<Bytes>;
}

#[derive(Clone, Debug)]
pub struct MemoryFile {
    name: String,
    data: Bytes,
}

impl MemoryFile {
    pub fn new(name: impl Into<String>, data: impl Into<Bytes>) -> Self {
        Self {
            name: name.into(),
            data: data.into(),
        }
    }
}

#[async_trait]
impl FileSource for MemoryFile {
    fn name(&self) -> &str {
        &self.name
    }

    fn size(&self) -> u64 {
        self.data.len() as u64
    }

    async fn read_chunk(&self, offset: u64, len: usize) -> io::Result<Bytes> {
        let start = usize::try_from(offset)
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "offset out of range"))?;
        if start > self.data.len() {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "offset past end of file",
            ));
        }
        let end = start.saturating_add(len).min(self.data.len());
        Ok(self.data.slice(start..end))
    }
}

#[derive(Debug)]
pub struct DiskFile {
    name: String,
    size: u64,
    file: Mutex<File>,
}

impl DiskFile {
    pub async fn open(path: impl AsRef<Path>) -> io::Result<Self> {
        let path = path.as_ref();
        let file = File::open(path).await?;
        let size = file.metadata().await?.len();
        let name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        Ok(Self {
            name,
            size,
            file: Mutex::new(file),
        })
    }
}

#[async_trait]
impl FileSource for DiskFile {
    fn name(&self) -> &str {
        &self.name
    }

    fn size(&self) -> u64 {
        self.size
    }

    async fn read_chunk(&self, offset: u64, len: usize) -> io::Result<Bytes> {
        let mut file = self.file.lock().await;
        file.seek(SeekFrom::Start(offset)).await?;
        let mut buf = Vec::with_capacity(len);
        (&mut *file).take(len as u64).read_to_end(&mut buf).await?;
        Ok(Bytes::from(buf))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[tokio::test]
    async fn memory_file_slices_without_copying_past_end() {
        let file = MemoryFile::new("notes.txt", Bytes::from_static(b"abcdefgh"));
        assert_eq!(file.read_chunk(0, 3).await.expect("first"), "abc");
        assert_eq!(file.read_chunk(6, 16).await.expect("tail"), "gh");
        assert!(file.read_chunk(8, 4).await.expect("at end").is_empty());
        assert!(file.read_chunk(9, 1).await.is_err());
    }

    #[tokio::test]
    async fn disk_file_reads_by_offset() {
        let mut tmp = tempfile::NamedTempFile::new().expect("tempfile");
        tmp.write_all(b"0123456789").expect("write");
        tmp.flush().expect("flush");

        let file = DiskFile::open(tmp.path()).await.expect("open");
        assert_eq!(file.size(), 10);
        assert_eq!(file.read_chunk(4, 4).await.expect("middle"), "4567");
        assert_eq!(file.read_chunk(8, 4).await.expect("tail"), "89");
    }
}
