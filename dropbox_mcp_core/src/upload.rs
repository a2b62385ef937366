//! Three-phase session upload (start, append, finish) for payloads too large
//! for a single upload request.

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::{debug, info};

use crate::connectors::dropbox::types::{CommitInfo, FileMetadata, UploadSessionCursor};
use crate::error::ConnectorError;

pub const CHUNK_SIZE: usize = 4 * 1024 * 1024;

/// Payloads larger than this go through an upload session.
pub const CHUNKED_UPLOAD_THRESHOLD: u64 = 150 * 1024 * 1024;

pub fn needs_session(len: u64) -> bool {
    len > CHUNKED_UPLOAD_THRESHOLD
}

#[async_trait]
pub trait UploadSessionApi: Send + Sync {
    /// Opens a session with an empty first chunk and returns its id.
    async fn start_session(&self) -> Result<String, ConnectorError>;

    async fn append(
        &self,
        cursor: &UploadSessionCursor,
        chunk: Vec<u8>,
    ) -> Result<(), ConnectorError>;

    async fn finish(
        &self,
        cursor: &UploadSessionCursor,
        commit: &CommitInfo,
    ) -> Result<FileMetadata, ConnectorError>;
}

/// Fills `buf` unless the source ends first. Returns the number of bytes read.
async fn read_chunk<R>(reader: &mut R, buf: &mut [u8]) -> Result<usize, ConnectorError>
where
    R: AsyncRead + Unpin,
{
    let mut filled = 0;
    while filled < buf.len() {
        let n = reader
            .read(&mut buf[filled..])
            .await
            .map_err(|e| ConnectorError::Upload(format!("failed to read chunk: {}", e)))?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}

/// Streams `source` into a new session, appending chunks in order at their
/// cumulative offset, then commits at the final offset.
///
/// An append failure aborts the upload without a finish call; the session is
/// left to expire on the provider side.
pub async fn upload_large<A, R>(
    api: &A,
    commit: &CommitInfo,
    mut source: R,
) -> Result<FileMetadata, ConnectorError>
where
    A: UploadSessionApi + ?Sized,
    R: AsyncRead + Unpin,
{
    let session_id = api
        .start_session()
        .await
        .map_err(|e| ConnectorError::Upload(format!("failed to start upload session: {}", e)))?;
    info!(path = %commit.path, "upload session started");

    let mut cursor = UploadSessionCursor {
        session_id,
        offset: 0,
    };
    let mut buf = vec![0u8; CHUNK_SIZE];
    let mut chunks = 0usize;

    loop {
        let n = read_chunk(&mut source, &mut buf).await?;
        if n == 0 {
            break;
        }
        api.append(&cursor, buf[..n].to_vec())
            .await
            .map_err(|e| ConnectorError::Upload(format!("failed to append chunk: {}", e)))?;
        debug!(offset = cursor.offset, len = n, "chunk appended");
        cursor.offset += n as u64;
        chunks += 1;
        if n < CHUNK_SIZE {
            break;
        }
    }

    let metadata = api
        .finish(&cursor, commit)
        .await
        .map_err(|e| ConnectorError::Upload(format!("failed to finish upload session: {}", e)))?;
    info!(offset = cursor.offset, chunks, "upload session finished");
    Ok(metadata)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connectors::dropbox::types::WriteMode;
    use std::sync::Mutex;

    #[derive(Debug, Clone, PartialEq)]
    enum Call {
        Start,
        Append { offset: u64, len: usize },
        Finish { offset: u64 },
    }

    #[derive(Default)]
    struct RecordingApi {
        calls: Mutex<Vec<Call>>,
        fail_append_at: Option<usize>,
    }

    impl RecordingApi {
        fn failing_at(index: usize) -> Self {
            Self {
                fail_append_at: Some(index),
                ..Default::default()
            }
        }

        fn calls(&self) -> Vec<Call> {
            self.calls.lock().unwrap().clone()
        }

        fn appends(&self) -> Vec<(u64, usize)> {
            self.calls()
                .into_iter()
                .filter_map(|c| match c {
                    Call::Append { offset, len } => Some((offset, len)),
                    _ => None,
                })
                .collect()
        }

        fn finish_offset(&self) -> Option<u64> {
            self.calls().into_iter().find_map(|c| match c {
                Call::Finish { offset } => Some(offset),
                _ => None,
            })
        }
    }

    #[async_trait]
    impl UploadSessionApi for RecordingApi {
        async fn start_session(&self) -> Result<String, ConnectorError> {
            self.calls.lock().unwrap().push(Call::Start);
            Ok("sess-1".to_string())
        }

        async fn append(
            &self,
            cursor: &UploadSessionCursor,
            chunk: Vec<u8>,
        ) -> Result<(), ConnectorError> {
            assert_eq!(cursor.session_id, "sess-1");
            let index = self.appends().len();
            if self.fail_append_at == Some(index) {
                return Err(ConnectorError::Api {
                    status: 500,
                    summary: "internal".into(),
                });
            }
            self.calls.lock().unwrap().push(Call::Append {
                offset: cursor.offset,
                len: chunk.len(),
            });
            Ok(())
        }

        async fn finish(
            &self,
            cursor: &UploadSessionCursor,
            commit: &CommitInfo,
        ) -> Result<FileMetadata, ConnectorError> {
            self.calls.lock().unwrap().push(Call::Finish {
                offset: cursor.offset,
            });
            Ok(FileMetadata {
                name: "big.bin".into(),
                id: "id:big".into(),
                path_display: Some(commit.path.clone()),
                path_lower: Some(commit.path.to_lowercase()),
                size: cursor.offset,
                rev: "01".into(),
                server_modified: None,
                client_modified: None,
                content_hash: None,
            })
        }
    }

    fn commit() -> CommitInfo {
        CommitInfo::new("/big.bin", WriteMode::Add)
    }

    async fn run(len: usize) -> RecordingApi {
        let api = RecordingApi::default();
        let data = vec![7u8; len];
        let meta = upload_large(&api, &commit(), data.as_slice()).await.unwrap();
        assert_eq!(meta.size, len as u64);
        api
    }

    #[tokio::test]
    async fn empty_source_starts_and_finishes_without_appends() {
        let api = run(0).await;
        assert_eq!(api.calls(), vec![Call::Start, Call::Finish { offset: 0 }]);
    }

    #[tokio::test]
    async fn source_smaller_than_one_chunk() {
        let api = run(1000).await;
        assert_eq!(api.appends(), vec![(0, 1000)]);
        assert_eq!(api.finish_offset(), Some(1000));
    }

    #[tokio::test]
    async fn source_of_exactly_one_chunk() {
        let api = run(CHUNK_SIZE).await;
        assert_eq!(api.appends(), vec![(0, CHUNK_SIZE)]);
        assert_eq!(api.finish_offset(), Some(CHUNK_SIZE as u64));
    }

    #[tokio::test]
    async fn source_with_trailing_partial_chunk() {
        let len = 3 * CHUNK_SIZE + 17;
        let api = run(len).await;
        let c = CHUNK_SIZE as u64;
        assert_eq!(
            api.appends(),
            vec![
                (0, CHUNK_SIZE),
                (c, CHUNK_SIZE),
                (2 * c, CHUNK_SIZE),
                (3 * c, 17)
            ]
        );
        assert_eq!(api.finish_offset(), Some(len as u64));
    }

    #[tokio::test]
    async fn append_failure_skips_finish() {
        let api = RecordingApi::failing_at(1);
        let data = vec![1u8; 2 * CHUNK_SIZE + 5];
        let err = upload_large(&api, &commit(), data.as_slice())
            .await
            .unwrap_err();
        assert!(matches!(err, ConnectorError::Upload(_)));
        assert!(err.to_string().contains("failed to append chunk"));
        assert_eq!(api.appends(), vec![(0, CHUNK_SIZE)]);
        assert_eq!(api.finish_offset(), None);
    }

    #[tokio::test]
    async fn two_hundred_mebibytes_in_fifty_appends() {
        let api = RecordingApi::default();
        let len: u64 = 200 * 1024 * 1024;
        let source = tokio::io::repeat(0).take(len);
        upload_large(&api, &commit(), source).await.unwrap();

        let appends = api.appends();
        assert_eq!(appends.len(), 50);
        for (i, (offset, chunk_len)) in appends.iter().enumerate() {
            assert_eq!(*offset, i as u64 * 4_194_304);
            assert_eq!(*chunk_len, CHUNK_SIZE);
        }
        assert_eq!(api.finish_offset(), Some(209_715_200));
    }

    #[test]
    fn threshold_is_strictly_greater_than() {
        assert!(!needs_session(CHUNKED_UPLOAD_THRESHOLD));
        assert!(needs_session(CHUNKED_UPLOAD_THRESHOLD + 1));
        assert!(!needs_session(0));
    }
}
