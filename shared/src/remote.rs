//! Abstract remote-host capability (§6.3).
//!
//! `RemoteHost` is the trait the stub generator and deletion echo logic
//! depend on; `service::remote_client::OpenListClient` is the only
//! implementation today, grounded directly on the donor project's
//! `openlist_client.py`.

use serde::{Deserialize, Serialize};

/// One entry returned by a remote directory listing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteFile {
    pub name: String,
    pub path: String,
    pub is_dir: bool,
    pub size: u64,
    /// Modification time as a Unix timestamp, when the remote reports one.
    pub modified: Option<i64>,
    /// Opaque signature token some remotes require in download URLs.
    pub sign: Option<String>,
}

impl RemoteFile {
    /// Extension without the leading dot, lowercased. `None` for
    /// directories and extensionless names.
    pub fn extension(&self) -> Option<String> {
        if self.is_dir {
            return None;
        }
        crate::utils::lowercase_extension(&self.name)
    }
}

/// One page of a directory listing.
#[derive(Debug, Clone)]
pub struct ListingPage {
    pub entries: Vec<RemoteFile>,
    pub total: u64,
}

/// Capability a stub task needs from whatever remote object store backs it.
///
/// Modeled as plain `async fn`s rather than `#[async_trait]`: the service
/// binary only ever holds a concrete `OpenListClient`, so there is no need
/// to erase the type behind a trait object.
pub trait RemoteHost {
    /// Authenticate and obtain (or refresh) a bearer token.
    fn login(&self) -> impl std::future::Future<Output = crate::Result<String>> + Send;

    /// List one page of a directory's contents.
    fn list_dir(
        &self,
        path: &str,
        page: u32,
        per_page: u32,
    ) -> impl std::future::Future<Output = crate::Result<ListingPage>> + Send;

    /// Fetch metadata for a single file or directory.
    fn get_file_info(
        &self,
        path: &str,
    ) -> impl std::future::Future<Output = crate::Result<RemoteFile>> + Send;

    /// Request deletion of one or more remote paths (used for the
    /// local-delete-to-server echo, §4.3 edge cases).
    fn remove(
        &self,
        paths: &[String],
    ) -> impl std::future::Future<Output = crate::Result<()>> + Send;

    /// Cheap reachability probe used by the control plane's connection test.
    fn test_connection(&self) -> impl std::future::Future<Output = crate::Result<()>> + Send;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_remote_file_extension() {
        let file = RemoteFile {
            name: "Movie.mkv".to_string(),
            path: "/media/Movie.mkv".to_string(),
            is_dir: false,
            size: 123,
            modified: None,
            sign: None,
        };
        assert_eq!(file.extension(), Some("mkv".to_string()));

        let dir = RemoteFile {
            name: "Season 1".to_string(),
            path: "/media/Season 1".to_string(),
            is_dir: true,
            size: 0,
            modified: None,
            sign: None,
        };
        assert_eq!(dir.extension(), None);
    }
}
