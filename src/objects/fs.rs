//! Filesystem blob store
//!
//! Layout under the root directory:
//! - one directory per bucket
//! - one file per object, named `{urlencoded key}.obj`
//!
//! Object file format:
//! - magic: `TSOB` (4 bytes)
//! - header length: u32 LE (4 bytes)
//! - header: JSON-encoded `ObjectMeta`
//! - body bytes
//!
//! Writes go to a temporary file in the bucket directory and are renamed
//! into place, so readers see either the old or the new object. Conditional
//! writes are serialized through one lock per store.

use super::blob::{
    BlobStore, ByteRange, ByteStream, GetResult, ListPage, ObjectMeta, PutOptions,
    STREAMING_CHUNK_SIZE,
};
use super::error::{ObjectStoreError, ObjectStoreResult};
use super::memory::{check_precondition, DEFAULT_PAGE_SIZE};
use async_trait::async_trait;
use bytes::Bytes;
use futures_util::stream::{self, StreamExt};
use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use tokio::fs::{self, File};
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tokio::sync::Mutex;

const OBJECT_MAGIC: [u8; 4] = *b"TSOB";
const OBJECT_SUFFIX: &str = ".obj";
const TEMP_PREFIX: &str = ".tmp-";
/// Longest encoded file name most filesystems accept, minus the suffix
const MAX_ENCODED_KEY_LEN: usize = 250;
const MAX_HEADER_LEN: u32 = 16 * 1024 * 1024;

/// Blob store backed by a local directory
#[derive(Debug)]
pub struct FsBlobStore {
    root: PathBuf,
    page_size: usize,
    write_lock: Mutex<()>,
}

impl FsBlobStore {
    /// Open a store rooted at `root`, creating the directory if needed
    pub async fn open(root: impl Into<PathBuf>) -> ObjectStoreResult<Self> {
        let root = root.into();
        fs::create_dir_all(&root).await?;
        Ok(Self {
            root,
            page_size: DEFAULT_PAGE_SIZE,
            write_lock: Mutex::new(()),
        })
    }

    /// Builder method: set the listing page size
    pub fn page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    fn bucket_dir(&self, bucket: &str) -> ObjectStoreResult<PathBuf> {
        let valid = !bucket.is_empty()
            && !bucket.starts_with('.')
            && bucket
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
        if !valid {
            return Err(ObjectStoreError::InvalidName(format!("bucket {:?}", bucket)));
        }
        Ok(self.root.join(bucket))
    }

    fn object_path(&self, bucket: &str, key: &str) -> ObjectStoreResult<PathBuf> {
        let encoded = urlencoding::encode(key);
        if key.is_empty() || encoded.len() > MAX_ENCODED_KEY_LEN {
            return Err(ObjectStoreError::InvalidName(format!("key {:?}", key)));
        }
        Ok(self
            .bucket_dir(bucket)?
            .join(format!("{}{}", encoded, OBJECT_SUFFIX)))
    }

    async fn require_bucket(&self, bucket: &str) -> ObjectStoreResult<PathBuf> {
        let dir = self.bucket_dir(bucket)?;
        if !is_dir(&dir).await {
            return Err(ObjectStoreError::BucketNotFound {
                bucket: bucket.to_string(),
            });
        }
        Ok(dir)
    }
}

async fn is_dir(path: &Path) -> bool {
    fs::metadata(path).await.map(|m| m.is_dir()).unwrap_or(false)
}

/// Open an object file and read its header, `None` if it does not exist
async fn open_object(path: &Path) -> ObjectStoreResult<Option<(File, ObjectMeta, u64)>> {
    let mut file = match File::open(path).await {
        Ok(file) => file,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };

    let mut magic = [0u8; 4];
    file.read_exact(&mut magic).await?;
    if magic != OBJECT_MAGIC {
        return Err(ObjectStoreError::Serialization(format!(
            "invalid object file magic in {}",
            path.display()
        )));
    }

    let header_len = file.read_u32_le().await?;
    if header_len > MAX_HEADER_LEN {
        return Err(ObjectStoreError::Serialization(format!(
            "object header too large: {}",
            header_len
        )));
    }
    let mut header = vec![0u8; header_len as usize];
    file.read_exact(&mut header).await?;
    let meta: ObjectMeta = serde_json::from_slice(&header)?;

    Ok(Some((file, meta, 8 + header_len as u64)))
}

/// Stream `len` bytes from the current file position
fn stream_file(file: File, len: u64) -> ByteStream {
    stream::try_unfold((file, len), |(mut file, remaining)| async move {
        if remaining == 0 {
            return Ok(None);
        }
        let want = remaining.min(STREAMING_CHUNK_SIZE as u64) as usize;
        let mut buf = vec![0u8; want];
        file.read_exact(&mut buf).await?;
        Ok::<_, ObjectStoreError>(Some((Bytes::from(buf), (file, remaining - want as u64))))
    })
    .boxed()
}

fn version_of(body: &[u8]) -> String {
    format!("{:08x}-{}", crc32fast::hash(body), body.len())
}

#[async_trait]
impl BlobStore for FsBlobStore {
    fn name(&self) -> &'static str {
        "filesystem"
    }

    async fn bucket_exists(&self, bucket: &str) -> ObjectStoreResult<bool> {
        Ok(is_dir(&self.bucket_dir(bucket)?).await)
    }

    async fn create_bucket(&self, bucket: &str) -> ObjectStoreResult<()> {
        fs::create_dir_all(self.bucket_dir(bucket)?).await?;
        Ok(())
    }

    async fn list_page(
        &self,
        bucket: &str,
        prefix: &str,
        start_after: Option<&str>,
    ) -> ObjectStoreResult<ListPage> {
        let dir = self.require_bucket(bucket).await?;

        let mut keys = Vec::new();
        let mut entries = fs::read_dir(&dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            let Some(encoded) = name.to_str().and_then(|n| n.strip_suffix(OBJECT_SUFFIX)) else {
                continue;
            };
            let Ok(key) = urlencoding::decode(encoded) else {
                continue;
            };
            if key.starts_with(prefix) && start_after.map_or(true, |after| &*key > after) {
                keys.push(key.into_owned());
            }
        }
        keys.sort();

        let next = if keys.len() > self.page_size {
            keys.truncate(self.page_size);
            keys.last().cloned()
        } else {
            None
        };
        Ok(ListPage { keys, next })
    }

    async fn head(&self, bucket: &str, key: &str) -> ObjectStoreResult<Option<ObjectMeta>> {
        let path = self.object_path(bucket, key)?;
        Ok(open_object(&path).await?.map(|(_, meta, _)| meta))
    }

    async fn get(
        &self,
        bucket: &str,
        key: &str,
        range: ByteRange,
    ) -> ObjectStoreResult<Option<GetResult>> {
        let path = self.object_path(bucket, key)?;
        let Some((mut file, meta, data_offset)) = open_object(&path).await? else {
            return Ok(None);
        };

        let span = range.resolve(meta.size);
        file.seek(SeekFrom::Start(data_offset + span.start)).await?;
        Ok(Some(GetResult {
            meta,
            stream: stream_file(file, span.end - span.start),
        }))
    }

    async fn put(
        &self,
        bucket: &str,
        key: &str,
        body: Bytes,
        options: PutOptions,
    ) -> ObjectStoreResult<ObjectMeta> {
        let path = self.object_path(bucket, key)?;
        let dir = self.require_bucket(bucket).await?;

        let _guard = self.write_lock.lock().await;
        let current = open_object(&path).await?.map(|(_, meta, _)| meta);
        check_precondition(bucket, key, &options.mode, current.as_ref())?;

        let meta = ObjectMeta {
            key: key.to_string(),
            size: body.len() as u64,
            version: version_of(&body),
            metadata: options.metadata,
            acl: options.acl,
        };
        let header = serde_json::to_vec(&meta)?;
        let header_len = u32::try_from(header.len())
            .map_err(|_| ObjectStoreError::Serialization("object header too large".to_string()))?;

        let tmp_path = dir.join(format!("{}{}", TEMP_PREFIX, uuid::Uuid::new_v4()));
        let written = async {
            let mut tmp = File::create(&tmp_path).await?;
            tmp.write_all(&OBJECT_MAGIC).await?;
            tmp.write_all(&header_len.to_le_bytes()).await?;
            tmp.write_all(&header).await?;
            tmp.write_all(&body).await?;
            tmp.sync_all().await?;
            fs::rename(&tmp_path, &path).await
        }
        .await;

        if let Err(e) = written {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(e.into());
        }
        Ok(meta)
    }

    async fn delete(&self, bucket: &str, key: &str) -> ObjectStoreResult<bool> {
        let path = self.object_path(bucket, key)?;
        let _guard = self.write_lock.lock().await;
        match fs::remove_file(&path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}
