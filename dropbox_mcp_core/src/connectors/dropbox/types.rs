use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize, Serializer};
use serde_json::{json, Map, Value};

// --- Metadata ---

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct FileMetadata {
    pub name: String,
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub path_display: Option<String>,
    #[serde(default)]
    pub path_lower: Option<String>,
    #[serde(default)]
    pub size: u64,
    #[serde(default)]
    pub rev: String,
    #[serde(default)]
    pub server_modified: Option<DateTime<Utc>>,
    #[serde(default)]
    pub client_modified: Option<DateTime<Utc>>,
    #[serde(default)]
    pub content_hash: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct FolderMetadata {
    pub name: String,
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub path_display: Option<String>,
    #[serde(default)]
    pub path_lower: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct DeletedMetadata {
    pub name: String,
    #[serde(default)]
    pub path_display: Option<String>,
    #[serde(default)]
    pub path_lower: Option<String>,
}

/// A Dropbox entry, discriminated by the `.tag` field.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = ".tag", rename_all = "snake_case")]
pub enum Metadata {
    File(FileMetadata),
    Folder(FolderMetadata),
    Deleted(DeletedMetadata),
}

fn display_path(display: &Option<String>, lower: &Option<String>) -> String {
    display.clone().or_else(|| lower.clone()).unwrap_or_default()
}

fn timestamp(t: &Option<DateTime<Utc>>) -> Value {
    match t {
        Some(t) => json!(t.to_rfc3339_opts(chrono::SecondsFormat::Secs, true)),
        None => Value::Null,
    }
}

impl FileMetadata {
    pub fn path(&self) -> String {
        display_path(&self.path_display, &self.path_lower)
    }

    /// name, path, size, modified, rev
    pub fn summary(&self) -> Map<String, Value> {
        let mut m = Map::new();
        m.insert("name".into(), json!(self.name));
        m.insert("path".into(), json!(self.path()));
        m.insert("size".into(), json!(self.size));
        m.insert("modified".into(), timestamp(&self.server_modified));
        m.insert("rev".into(), json!(self.rev));
        m
    }
}

impl FolderMetadata {
    pub fn path(&self) -> String {
        display_path(&self.path_display, &self.path_lower)
    }
}

impl Metadata {
    pub fn name(&self) -> &str {
        match self {
            Metadata::File(f) => &f.name,
            Metadata::Folder(f) => &f.name,
            Metadata::Deleted(d) => &d.name,
        }
    }

    /// Listing shape: type plus name/path, and size/modified/rev for files.
    pub fn to_entry(&self) -> Map<String, Value> {
        match self {
            Metadata::File(f) => {
                let mut m = f.summary();
                m.insert("type".into(), json!("file"));
                m
            }
            Metadata::Folder(f) => {
                let mut m = Map::new();
                m.insert("name".into(), json!(f.name));
                m.insert("path".into(), json!(f.path()));
                m.insert("type".into(), json!("folder"));
                m
            }
            Metadata::Deleted(d) => {
                let mut m = Map::new();
                m.insert("name".into(), json!(d.name));
                m.insert(
                    "path".into(),
                    json!(display_path(&d.path_display, &d.path_lower)),
                );
                m.insert("type".into(), json!("deleted"));
                m
            }
        }
    }

    /// Detail shape used by get_metadata: adds content_hash for files and id for folders.
    pub fn to_detail(&self) -> Map<String, Value> {
        let mut m = self.to_entry();
        match self {
            Metadata::File(f) => {
                m.insert("content_hash".into(), json!(f.content_hash));
            }
            Metadata::Folder(f) => {
                m.insert("id".into(), json!(f.id));
            }
            Metadata::Deleted(_) => {}
        }
        m
    }

    /// Search hit: files without `rev`; deleted entries are not hits.
    pub fn to_search_hit(&self) -> Option<Map<String, Value>> {
        match self {
            Metadata::File(_) => {
                let mut m = self.to_entry();
                m.remove("rev");
                Some(m)
            }
            Metadata::Folder(_) => Some(self.to_entry()),
            Metadata::Deleted(_) => None,
        }
    }
}

// --- Listing / search ---

#[derive(Debug, Deserialize)]
pub struct ListFolderResult {
    pub entries: Vec<Metadata>,
    pub cursor: String,
    pub has_more: bool,
}

#[derive(Debug, Deserialize)]
#[serde(tag = ".tag", rename_all = "snake_case")]
pub enum MetadataV2 {
    Metadata {
        metadata: Metadata,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
pub struct SearchMatch {
    pub metadata: MetadataV2,
}

#[derive(Debug, Deserialize)]
pub struct SearchResult {
    pub matches: Vec<SearchMatch>,
    #[serde(default)]
    pub has_more: bool,
}

#[derive(Debug, Deserialize)]
pub struct RelocationResult {
    pub metadata: Metadata,
}

#[derive(Debug, Deserialize)]
pub struct CreateFolderResult {
    pub metadata: FolderMetadata,
}

#[derive(Debug, Deserialize)]
pub struct ListRevisionsResult {
    #[serde(default)]
    pub is_deleted: bool,
    pub entries: Vec<FileMetadata>,
}

// --- Uploads ---

/// Conflict policy when the target path already exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = ".tag", rename_all = "snake_case")]
pub enum WriteMode {
    #[default]
    Add,
    Overwrite,
}

impl WriteMode {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "" | "add" => Some(WriteMode::Add),
            "overwrite" => Some(WriteMode::Overwrite),
            _ => None,
        }
    }
}

/// Dropbox rejects fractional seconds in `client_modified`.
fn serialize_whole_seconds<S: Serializer>(t: &DateTime<Utc>, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_str(&t.format("%Y-%m-%dT%H:%M:%SZ").to_string())
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommitInfo {
    pub path: String,
    pub mode: WriteMode,
    pub autorename: bool,
    #[serde(serialize_with = "serialize_whole_seconds")]
    pub client_modified: DateTime<Utc>,
    pub mute: bool,
}

impl CommitInfo {
    pub fn new(path: impl Into<String>, mode: WriteMode) -> Self {
        Self {
            path: path.into(),
            mode,
            autorename: true,
            client_modified: Utc::now(),
            mute: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UploadSessionCursor {
    pub session_id: String,
    pub offset: u64,
}

#[derive(Debug, Serialize)]
pub struct UploadSessionStartArg {
    pub close: bool,
}

#[derive(Debug, Deserialize)]
pub struct UploadSessionStartResult {
    pub session_id: String,
}

#[derive(Debug, Serialize)]
pub struct UploadSessionAppendArg<'a> {
    pub cursor: &'a UploadSessionCursor,
    pub close: bool,
}

#[derive(Debug, Serialize)]
pub struct UploadSessionFinishArg<'a> {
    pub cursor: &'a UploadSessionCursor,
    pub commit: &'a CommitInfo,
}

// --- Sharing ---

#[derive(Debug, Clone, Default, Serialize)]
pub struct SharedLinkSettings {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub require_password: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub link_password: Option<String>,
}

impl SharedLinkSettings {
    pub fn is_empty(&self) -> bool {
        self.expires.is_none() && self.link_password.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct LinkDetails {
    pub url: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub path_lower: Option<String>,
    #[serde(default)]
    pub expires: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = ".tag", rename_all = "snake_case")]
pub enum SharedLinkMetadata {
    File(LinkDetails),
    Folder(LinkDetails),
}

impl SharedLinkMetadata {
    pub fn details(&self) -> &LinkDetails {
        match self {
            SharedLinkMetadata::File(d) => d,
            SharedLinkMetadata::Folder(d) => d,
        }
    }

    pub fn url(&self) -> &str {
        &self.details().url
    }

    pub fn to_entry(&self) -> Map<String, Value> {
        let (kind, d) = match self {
            SharedLinkMetadata::File(d) => ("file", d),
            SharedLinkMetadata::Folder(d) => ("folder", d),
        };
        let mut m = Map::new();
        m.insert("url".into(), json!(d.url));
        m.insert("name".into(), json!(d.name));
        m.insert("path".into(), json!(d.path_lower));
        m.insert("type".into(), json!(kind));
        if d.expires.is_some() {
            m.insert("expires".into(), timestamp(&d.expires));
        }
        m
    }
}

#[derive(Debug, Deserialize)]
pub struct ListSharedLinksResult {
    pub links: Vec<SharedLinkMetadata>,
    #[serde(default)]
    pub has_more: bool,
}
