//! Static file fallback.
//!
//! # Responsibilities
//! - Map a request path onto `<public_dir><path>`
//! - Refuse anything that resolves outside the canonical public directory
//! - Serve `index.html` for directory targets
//!
//! # Design Decisions
//! - Both the root and the candidate are canonicalized, so symlinks and
//!   encoded separators cannot escape the root
//! - HEAD reads metadata only

use std::io;
use std::path::{Path, PathBuf};

use hyper::header;
use percent_encoding::percent_decode_str;

use crate::http::response::Response;

const INDEX: &str = "index.html";

/// Why a static lookup produced no file.
#[derive(Debug, thiserror::Error)]
pub enum StaticError {
    /// Missing, not a regular file, or outside the public directory.
    #[error("Not found")]
    NotFound,
    /// The file exists but could not be read.
    #[error("Failed to read file: {0}")]
    Io(#[source] io::Error),
}

/// Resolve a request path to a file under `root`.
pub async fn resolve(root: &Path, path: &str) -> Result<PathBuf, StaticError> {
    let decoded = percent_decode_str(path)
        .decode_utf8()
        .map_err(|_| StaticError::NotFound)?;

    if decoded.contains('\0') || decoded.split(['/', '\\']).any(|segment| segment == "..") {
        return Err(StaticError::NotFound);
    }

    let mut relative = decoded.trim_start_matches('/').to_string();
    if relative.is_empty() || relative.ends_with('/') {
        relative.push_str(INDEX);
    }

    let root = tokio::fs::canonicalize(root)
        .await
        .map_err(|_| StaticError::NotFound)?;
    let mut file = contained(&root, &root.join(&relative)).await?;

    if tokio::fs::metadata(&file).await.map_err(StaticError::Io)?.is_dir() {
        file = contained(&root, &file.join(INDEX)).await?;
    }

    let meta = tokio::fs::metadata(&file).await.map_err(StaticError::Io)?;
    if !meta.is_file() {
        return Err(StaticError::NotFound);
    }
    Ok(file)
}

/// Canonicalize `candidate` and require it to stay under `root`.
async fn contained(root: &Path, candidate: &Path) -> Result<PathBuf, StaticError> {
    let resolved = tokio::fs::canonicalize(candidate)
        .await
        .map_err(|_| StaticError::NotFound)?;
    if resolved.starts_with(root) {
        Ok(resolved)
    } else {
        tracing::debug!(path = ?candidate, "Static path escapes public directory");
        Err(StaticError::NotFound)
    }
}

/// Build the response for a static file. HEAD gets headers and the file
/// size as `content-length`, without a body.
pub async fn serve(root: &Path, path: &str, head: bool) -> Result<Response, StaticError> {
    let file = resolve(root, path).await?;
    let content_type = mime_guess::from_path(&file).first_or_octet_stream();

    let mut res = Response::new();
    res.set_header(header::CONTENT_TYPE, content_type.essence_str());

    if head {
        let len = tokio::fs::metadata(&file).await.map_err(StaticError::Io)?.len();
        res.headers.insert(header::CONTENT_LENGTH, len.into());
    } else {
        res.body = tokio::fs::read(&file).await.map_err(StaticError::Io)?.into();
    }
    Ok(res)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    /// `<tmp>/public/{index.html, css/site.css, docs/index.html}` plus
    /// `<tmp>/secret.txt` outside the root.
    fn fixture() -> (TempDir, PathBuf) {
        let tmp = TempDir::new().unwrap();
        let public = tmp.path().join("public");
        std::fs::create_dir_all(public.join("css")).unwrap();
        std::fs::create_dir_all(public.join("docs")).unwrap();
        std::fs::write(public.join("index.html"), "<h1>home</h1>").unwrap();
        std::fs::write(public.join("css/site.css"), "body {}").unwrap();
        std::fs::write(public.join("docs/index.html"), "docs").unwrap();
        std::fs::write(tmp.path().join("secret.txt"), "secret").unwrap();
        (tmp, public)
    }

    #[tokio::test]
    async fn trailing_slash_serves_index() {
        let (_tmp, public) = fixture();
        let file = resolve(&public, "/").await.unwrap();
        assert!(file.ends_with("index.html"));

        let file = resolve(&public, "/docs/").await.unwrap();
        assert!(file.ends_with("docs/index.html"));

        let file = resolve(&public, "/docs").await.unwrap();
        assert!(file.ends_with("docs/index.html"));
    }

    #[tokio::test]
    async fn traversal_variants_are_rejected() {
        let (_tmp, public) = fixture();
        for path in [
            "/../secret.txt",
            "/%2e%2e/secret.txt",
            "/%2E%2E%2Fsecret.txt",
            "/css/..%2F..%2Fsecret.txt",
            "/..\\secret.txt",
            "/index.html%00.css",
        ] {
            assert!(
                matches!(resolve(&public, path).await, Err(StaticError::NotFound)),
                "{} should be rejected",
                path
            );
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn symlink_out_of_root_is_rejected() {
        let (tmp, public) = fixture();
        std::os::unix::fs::symlink(tmp.path().join("secret.txt"), public.join("link.txt")).unwrap();
        assert!(matches!(resolve(&public, "/link.txt").await, Err(StaticError::NotFound)));
    }

    #[tokio::test]
    async fn content_type_and_head_length() {
        let (_tmp, public) = fixture();

        let res = serve(&public, "/css/site.css", false).await.unwrap();
        assert_eq!(res.header(header::CONTENT_TYPE), Some("text/css"));
        assert_eq!(&res.body[..], b"body {}");

        let res = serve(&public, "/index.html", true).await.unwrap();
        assert!(res.body.is_empty());
        assert_eq!(res.header(header::CONTENT_LENGTH), Some("13"));
    }

    #[tokio::test]
    async fn missing_file_is_not_found() {
        let (_tmp, public) = fixture();
        let err = resolve(&public, "/nope.txt").await.unwrap_err();
        assert!(matches!(err, StaticError::NotFound));
        assert_eq!(err.to_string(), "Not found");
    }
}
