use std::{
    io,
    path::{Path, PathBuf},
};

use tempfile::TempDir;
use tracing::warn;

const WORKSPACE_PREFIX: &str = "xrechnung-";

/// Private scratch directory for one transform or render call. The directory
/// and everything in it is removed when the workspace is closed or dropped.
#[derive(Debug)]
pub struct Workspace {
    dir: TempDir,
}

impl Workspace {
    /// Creation stays on the calling thread: it is one `mkdir` per request.
    pub fn create_in(root: &Path) -> io::Result<Self> {
        std::fs::create_dir_all(root)?;
        let dir = tempfile::Builder::new()
            .prefix(WORKSPACE_PREFIX)
            .tempdir_in(root)?;
        Ok(Self { dir })
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn file(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }

    pub async fn write(&self, name: &str, contents: &[u8]) -> io::Result<PathBuf> {
        let path = self.file(name);
        tokio::fs::write(&path, contents).await?;
        Ok(path)
    }

    /// Remove the directory on the blocking pool, logging instead of failing
    /// when removal does not succeed. Removal still finishes if the caller
    /// is cancelled while waiting.
    pub async fn close(self) {
        let path = self.dir.path().to_path_buf();
        let outcome = tokio::task::spawn_blocking(move || self.dir.close()).await;
        let error = match outcome {
            Ok(Ok(())) => return,
            Ok(Err(err)) => err.to_string(),
            Err(join) => join.to_string(),
        };
        warn!(
            target = "infra::workspace",
            op = "workspace::close",
            path = %path.display(),
            error = %error,
            "Failed to remove request workspace"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn workspace_is_removed_on_close_and_drop() {
        let root = TempDir::new().expect("root");

        let closed = Workspace::create_in(root.path()).expect("workspace");
        closed.write("input.xml", b"<a/>").await.expect("write");
        let closed_path = closed.path().to_path_buf();
        assert!(closed_path.join("input.xml").is_file());
        closed.close().await;
        assert!(!closed_path.exists());

        let dropped = Workspace::create_in(root.path()).expect("workspace");
        let dropped_path = dropped.path().to_path_buf();
        drop(dropped);
        assert!(!dropped_path.exists());

        assert_eq!(std::fs::read_dir(root.path()).expect("read root").count(), 0);
    }

    #[test]
    fn missing_root_is_created() {
        let root = TempDir::new().expect("root");
        let nested = root.path().join("jobs").join("pdf");
        let workspace = Workspace::create_in(&nested).expect("workspace");
        assert!(workspace.path().starts_with(&nested));
        assert!(
            workspace
                .path()
                .file_name()
                .and_then(|name| name.to_str())
                .is_some_and(|name| name.starts_with(WORKSPACE_PREFIX))
        );
    }
}
