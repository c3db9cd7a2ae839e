//! `HgImporter`: the framed request/response protocol spoken to a
//! long-running `hg debugedenimporthelper` subprocess (§4.8), grounded on
//! `HgImporter.cpp`/`HgImporter.h`.

use std::path::Path;
use std::process::Stdio;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tracing::{info, warn};

use crate::errors::{BackingStoreError, Result};

const PROTOCOL_VERSION: u32 = 1;

const FLAG_ERROR: u32 = 0x01;
const FLAG_MORE_CHUNKS: u32 = 0x02;

const START_TREEMANIFEST_SUPPORTED: u32 = 0x01;
const START_MONONOKE_SUPPORTED: u32 = 0x02;
const START_CAT_TREE_SUPPORTED: u32 = 0x04;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum CommandType {
    Started = 0,
    Response = 1,
    FetchTree = 5,
    CatFile = 7,
    GetFileSize = 8,
    CatTree = 9,
}

impl CommandType {
    fn from_u32(value: u32) -> Option<Self> {
        match value {
            0 => Some(Self::Started),
            1 => Some(Self::Response),
            5 => Some(Self::FetchTree),
            7 => Some(Self::CatFile),
            8 => Some(Self::GetFileSize),
            9 => Some(Self::CatTree),
            _ => None,
        }
    }
}

struct ChunkHeader {
    request_id: u32,
    command: u32,
    flags: u32,
    data_len: u32,
}

const HEADER_LEN: usize = 16;

impl ChunkHeader {
    fn to_bytes(&self) -> [u8; HEADER_LEN] {
        let mut out = BytesMut::with_capacity(HEADER_LEN);
        out.put_u32(self.request_id);
        out.put_u32(self.command);
        out.put_u32(self.flags);
        out.put_u32(self.data_len);
        out.as_ref().try_into().unwrap()
    }

    fn from_bytes(buf: &[u8; HEADER_LEN]) -> Self {
        let mut b = Bytes::copy_from_slice(buf);
        Self {
            request_id: b.get_u32(),
            command: b.get_u32(),
            flags: b.get_u32(),
            data_len: b.get_u32(),
        }
    }
}

/// Configuration and repo-name/store-path details learned from the helper's
/// `CMD_STARTED` response.
#[derive(Debug, Clone, Default)]
pub struct ImporterOptions {
    pub tree_manifest_pack_paths: Vec<String>,
    pub repo_name: Option<String>,
}

/// A single live connection to an `hg debugedenimporthelper` subprocess.
/// Not `Sync`: requests are issued sequentially over one pipe pair, matching
/// the original's thread-bound design (callers wanting concurrency create
/// more than one `HgImporter`).
pub struct HgImporter {
    child: Child,
    stdin: ChildStdin,
    stdout: ChildStdout,
    next_request_id: u32,
    options: ImporterOptions,
}

impl HgImporter {
    pub async fn spawn(hg_path: &Path, repo_path: &Path) -> Result<Self> {
        let mut cmd = Command::new(hg_path);
        cmd.arg("debugedenimporthelper")
            .current_dir(repo_path)
            .env("WATCHMAN_NO_SPAWN", "1")
            .env("HGPLAIN", "1")
            .env("CHGDISABLE", "1")
            .env_remove("DYLD_LIBRARY_PATH")
            .env_remove("DYLD_INSERT_LIBRARIES")
            .args([
                "--config",
                "extensions.fsmonitor=!",
                "--config",
                "extensions.hgevents=!",
                "--config",
                "edenapi.max-retry-per-request=0",
            ])
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit());

        let mut child = cmd.spawn().map_err(|e| BackingStoreError::Io {
            operation: "spawn hg debugedenimporthelper",
            source: e,
        })?;
        let stdin = child.stdin.take().expect("piped stdin");
        let stdout = child.stdout.take().expect("piped stdout");

        let mut importer = Self {
            child,
            stdin,
            stdout,
            next_request_id: 1,
            options: ImporterOptions::default(),
        };
        importer.options = importer.wait_for_helper_start().await?;
        info!(repo = %repo_path.display(), "hg_import_helper started");
        Ok(importer)
    }

    pub fn options(&self) -> &ImporterOptions {
        &self.options
    }

    async fn read_exact_n(&mut self, len: usize) -> Result<Bytes> {
        let mut buf = vec![0u8; len];
        self.stdout.read_exact(&mut buf).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::UnexpectedEof {
                BackingStoreError::Protocol(format!(
                    "unexpected EOF from debugedenimporthelper after reading {len} bytes"
                ))
            } else {
                BackingStoreError::Io {
                    operation: "read from debugedenimporthelper",
                    source: e,
                }
            }
        })?;
        Ok(Bytes::from(buf))
    }

    async fn read_header(&mut self, expected_request_id: u32) -> Result<ChunkHeader> {
        let mut raw = [0u8; HEADER_LEN];
        raw.copy_from_slice(&self.read_exact_n(HEADER_LEN).await?);
        let header = ChunkHeader::from_bytes(&raw);

        if header.flags & FLAG_ERROR != 0 {
            return Err(self.read_error(header.data_len).await);
        }

        if header.request_id != expected_request_id {
            return Err(BackingStoreError::Protocol(format!(
                "received unexpected transaction id {} != {}",
                header.request_id, expected_request_id
            )));
        }

        Ok(header)
    }

    async fn read_error(&mut self, data_len: u32) -> BackingStoreError {
        let body = match self.read_exact_n(data_len as usize).await {
            Ok(b) => b,
            Err(e) => return e,
        };
        let mut cursor = body;
        if cursor.remaining() < 4 {
            return BackingStoreError::Protocol("truncated error response".to_string());
        }
        let type_len = cursor.get_u32() as usize;
        if cursor.remaining() < type_len {
            return BackingStoreError::Protocol("truncated error type".to_string());
        }
        let type_name = String::from_utf8_lossy(&cursor.copy_to_bytes(type_len)).into_owned();
        if cursor.remaining() < 4 {
            return BackingStoreError::Protocol("truncated error message length".to_string());
        }
        let msg_len = cursor.get_u32() as usize;
        let message = if cursor.remaining() >= msg_len {
            String::from_utf8_lossy(&cursor.copy_to_bytes(msg_len)).into_owned()
        } else {
            String::new()
        };
        warn!(%type_name, %message, "error received from hg helper process");
        BackingStoreError::Remote { type_name, message }
    }

    async fn wait_for_helper_start(&mut self) -> Result<ImporterOptions> {
        let header = self.read_header(0).await.map_err(|e| match e {
            BackingStoreError::Protocol(msg) if msg.contains("unexpected EOF") => {
                BackingStoreError::Protocol(
                    "error starting Mercurial import helper; it exited before sending CMD_STARTED"
                        .to_string(),
                )
            }
            other => other,
        })?;

        if CommandType::from_u32(header.command) != Some(CommandType::Started) {
            return Err(BackingStoreError::Protocol(
                "unexpected start message from hg_import_helper script".to_string(),
            ));
        }
        if (header.data_len as usize) < 4 {
            return Err(BackingStoreError::Protocol(
                "missing CMD_STARTED response body".to_string(),
            ));
        }

        let mut body = self.read_exact_n(header.data_len as usize).await?;
        if body.remaining() < 4 {
            return Err(BackingStoreError::Protocol("truncated CMD_STARTED body".to_string()));
        }
        let protocol_version = body.get_u32();
        if protocol_version != PROTOCOL_VERSION {
            return Err(BackingStoreError::Protocol(format!(
                "hg_import_helper protocol version mismatch: expected {PROTOCOL_VERSION}, got {protocol_version}"
            )));
        }

        if body.remaining() < 8 {
            return Err(BackingStoreError::Protocol("truncated CMD_STARTED flags".to_string()));
        }
        let flags = body.get_u32();
        let num_tree_paths = body.get_u32();

        if flags & START_TREEMANIFEST_SUPPORTED == 0 {
            return Err(BackingStoreError::Protocol(
                "hg_import_helper does not support treemanifest".to_string(),
            ));
        }
        if num_tree_paths == 0 {
            return Err(BackingStoreError::Protocol(
                "hg_import_helper supports treemanifest but provided no store paths".to_string(),
            ));
        }

        let mut tree_manifest_pack_paths = Vec::with_capacity(num_tree_paths as usize);
        for _ in 0..num_tree_paths {
            if body.remaining() < 4 {
                return Err(BackingStoreError::Protocol("truncated tree path length".to_string()));
            }
            let path_len = body.get_u32() as usize;
            if body.remaining() < path_len {
                return Err(BackingStoreError::Protocol("truncated tree path".to_string()));
            }
            tree_manifest_pack_paths
                .push(String::from_utf8_lossy(&body.copy_to_bytes(path_len)).into_owned());
        }

        let repo_name = if flags & START_MONONOKE_SUPPORTED != 0 {
            if body.remaining() < 4 {
                return Err(BackingStoreError::Protocol("truncated repo name length".to_string()));
            }
            let name_len = body.get_u32() as usize;
            if body.remaining() < name_len {
                return Err(BackingStoreError::Protocol("truncated repo name".to_string()));
            }
            Some(String::from_utf8_lossy(&body.copy_to_bytes(name_len)).into_owned())
        } else {
            None
        };

        if flags & START_CAT_TREE_SUPPORTED == 0 {
            return Err(BackingStoreError::Protocol(
                "hg_import_helper does not support CMD_CAT_TREE; update Mercurial".to_string(),
            ));
        }

        Ok(ImporterOptions {
            tree_manifest_pack_paths,
            repo_name,
        })
    }

    async fn request(&mut self, command: CommandType, payload: &[u8]) -> Result<Bytes> {
        let request_id = self.next_request_id;
        self.next_request_id = self.next_request_id.wrapping_add(1).max(1);

        let header = ChunkHeader {
            request_id,
            command: command as u32,
            flags: 0,
            data_len: payload.len() as u32,
        };
        self.stdin
            .write_all(&header.to_bytes())
            .await
            .map_err(|e| BackingStoreError::Io {
                operation: "write request header to debugedenimporthelper",
                source: e,
            })?;
        self.stdin.write_all(payload).await.map_err(|e| BackingStoreError::Io {
            operation: "write request body to debugedenimporthelper",
            source: e,
        })?;

        let mut chunks = BytesMut::new();
        loop {
            let response_header = self.read_header(request_id).await?;
            chunks.extend_from_slice(&self.read_exact_n(response_header.data_len as usize).await?);
            if response_header.flags & FLAG_MORE_CHUNKS == 0 {
                break;
            }
        }
        Ok(chunks.freeze())
    }

    /// Fetches the raw content of a file at a given manifest node.
    pub async fn cat_file(&mut self, path: &str, node: &[u8]) -> Result<Bytes> {
        let mut payload = BytesMut::new();
        payload.put_u32(path.len() as u32);
        payload.put_slice(path.as_bytes());
        payload.put_u32(node.len() as u32);
        payload.put_slice(node);
        self.request(CommandType::CatFile, &payload).await
    }

    /// Fetches the size of a file at a given manifest node, as a little
    /// payload the caller decodes as a big-endian `u64`.
    pub async fn get_file_size(&mut self, path: &str, node: &[u8]) -> Result<u64> {
        let mut payload = BytesMut::new();
        payload.put_u32(path.len() as u32);
        payload.put_slice(path.as_bytes());
        payload.put_u32(node.len() as u32);
        payload.put_slice(node);
        let mut response = self.request(CommandType::GetFileSize, &payload).await?;
        if response.remaining() < 8 {
            return Err(BackingStoreError::Protocol(
                "truncated CMD_GET_FILE_SIZE response".to_string(),
            ));
        }
        Ok(response.get_u64())
    }

    /// Fetches a raw tree manifest blob for a directory at a given node.
    pub async fn cat_tree(&mut self, path: &str, node: &[u8]) -> Result<Bytes> {
        let mut payload = BytesMut::new();
        payload.put_u32(path.len() as u32);
        payload.put_slice(path.as_bytes());
        payload.put_u32(node.len() as u32);
        payload.put_slice(node);
        self.request(CommandType::CatTree, &payload).await
    }

    /// Requests that the helper prefetch (into its local hgcache) the tree
    /// rooted at `node`.
    pub async fn fetch_tree(&mut self, path: &str, node: &[u8]) -> Result<Bytes> {
        let mut payload = BytesMut::new();
        payload.put_u32(path.len() as u32);
        payload.put_slice(path.as_bytes());
        payload.put_u32(node.len() as u32);
        payload.put_slice(node);
        self.request(CommandType::FetchTree, &payload).await
    }

    pub async fn shutdown(mut self) {
        drop(self.stdin);
        let _ = self.child.wait().await;
    }
}

/// Wraps a single [HgImporter], replacing it with a freshly spawned one and
/// retrying exactly once whenever a request fails with a protocol/transport
/// error or an explicit `ResetRepoError` (§4.8).
pub struct HgImporterManager {
    hg_path: std::path::PathBuf,
    repo_path: std::path::PathBuf,
    importer: Option<HgImporter>,
}

impl HgImporterManager {
    pub async fn new(hg_path: impl Into<std::path::PathBuf>, repo_path: impl Into<std::path::PathBuf>) -> Result<Self> {
        let hg_path = hg_path.into();
        let repo_path = repo_path.into();
        let importer = HgImporter::spawn(&hg_path, &repo_path).await?;
        Ok(Self {
            hg_path,
            repo_path,
            importer: Some(importer),
        })
    }

    pub fn repo_name(&self) -> Option<&str> {
        self.importer.as_ref()?.options().repo_name.as_deref()
    }

    async fn respawn(&mut self) -> Result<()> {
        if let Some(old) = self.importer.take() {
            old.shutdown().await;
        }
        self.importer = Some(HgImporter::spawn(&self.hg_path, &self.repo_path).await?);
        Ok(())
    }

    fn is_retryable(err: &BackingStoreError) -> bool {
        matches!(err, BackingStoreError::Protocol(_) | BackingStoreError::Io { .. }) || err.is_reset_repo_error()
    }

    /// Runs `op` against the live importer, retrying exactly once (with a
    /// freshly respawned subprocess) on a retryable error.
    pub async fn retry_on_error<F, Fut, T>(&mut self, mut op: F) -> Result<T>
    where
        F: FnMut(&mut HgImporter) -> Fut,
        Fut: std::future::Future<Output = Result<T>>,
    {
        let mut retried = false;
        loop {
            let importer = self
                .importer
                .as_mut()
                .expect("importer is always Some between calls");
            match op(importer).await {
                Ok(value) => return Ok(value),
                Err(err) if Self::is_retryable(&err) && !retried => {
                    warn!(error = %err, "restarting hg_import_helper and retrying operation");
                    retried = true;
                    self.respawn().await?;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunk_header_roundtrip() {
        let header = ChunkHeader {
            request_id: 7,
            command: CommandType::CatFile as u32,
            flags: FLAG_MORE_CHUNKS,
            data_len: 1024,
        };
        let bytes = header.to_bytes();
        let decoded = ChunkHeader::from_bytes(&bytes);
        assert_eq!(decoded.request_id, 7);
        assert_eq!(decoded.command, CommandType::CatFile as u32);
        assert_eq!(decoded.flags, FLAG_MORE_CHUNKS);
        assert_eq!(decoded.data_len, 1024);
    }

    #[test]
    fn command_type_round_trips_known_values() {
        for (raw, expected) in [
            (0, CommandType::Started),
            (1, CommandType::Response),
            (5, CommandType::FetchTree),
            (7, CommandType::CatFile),
            (8, CommandType::GetFileSize),
            (9, CommandType::CatTree),
        ] {
            assert_eq!(CommandType::from_u32(raw), Some(expected));
        }
        assert_eq!(CommandType::from_u32(2), None);
    }
}
