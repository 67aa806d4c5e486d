//! Auxiliary HTTP endpoints: file uploads and downloads.
//!
//! The runtime never moves bytes itself. It builds the endpoint URLs and
//! drives a batch through an upload callback supplied by the host.

use crate::error::UploadError;
use serde::{Deserialize, Serialize};
use url::Url;

/// Names shown in a selection summary before collapsing into "and N more".
const SUMMARY_NAMES: usize = 3;

/// A file the user picked, with its contents already read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectedFile {
    pub name: String,
    pub mime: String,
    pub last_modified: u64,
    pub size: u64,
    pub bytes: Vec<u8>,
    /// False when the picker rejected the file type.
    pub supported: bool,
}

impl SelectedFile {
    pub fn new(name: impl Into<String>, mime: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            mime: mime.into(),
            last_modified: 0,
            size: bytes.len() as u64,
            bytes,
            supported: true,
        }
    }

    pub fn content_type(&self) -> &str {
        if self.mime.is_empty() {
            "application/octet-stream"
        } else {
            &self.mime
        }
    }
}

/// Backend answer to a successful upload.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct UploadReceipt {
    pub file_id: String,
    pub extension: String,
}

/// File reference reported to the backend in a change event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UploadedFile {
    pub id: String,
    pub extension: String,
    pub name: String,
    pub last_modified: u64,
    pub size: u64,
    #[serde(rename = "type")]
    pub mime: String,
}

#[derive(Debug, Default, PartialEq)]
pub struct UploadOutcome {
    pub uploaded: Vec<UploadedFile>,
    /// Failure that stopped the batch early.
    pub failure: Option<UploadError>,
}

pub fn upload_endpoint(
    origin: &Url,
    prefix: &str,
    session_id: &str,
    file: &SelectedFile,
) -> Result<Url, UploadError> {
    let mut url = session_url(origin, prefix, session_id)?;
    url.query_pairs_mut()
        .append_pair("file_name", &file.name)
        .append_pair("type", &file.mime);
    Ok(url)
}

pub fn download_url(
    origin: &Url,
    prefix: &str,
    session_id: &str,
    request_id: u64,
    fragment_id: &str,
    widget_id: &str,
) -> Result<Url, UploadError> {
    let mut url = session_url(origin, prefix, session_id)?;
    url.query_pairs_mut()
        .append_pair("request_id", &request_id.to_string())
        .append_pair("fragment_id", fragment_id)
        .append_pair("widget_id", widget_id);
    Ok(url)
}

fn session_url(origin: &Url, prefix: &str, session_id: &str) -> Result<Url, UploadError> {
    let mut url = origin.clone();
    url.set_path(prefix);
    url.set_query(None);
    url.set_fragment(None);
    url.path_segments_mut()
        .map_err(|()| UploadError::Endpoint(format!("'{origin}' cannot carry a path")))?
        .pop_if_empty()
        .push(session_id);
    Ok(url)
}

/// Uploads files one at a time. Unsupported files are skipped, a
/// single-file uploader stops after its first upload, and the first failure
/// abandons the rest of the batch. Files uploaded before a failure are kept.
pub fn upload_batch<F>(files: Vec<SelectedFile>, multiple: bool, mut upload: F) -> UploadOutcome
where
    F: FnMut(&SelectedFile) -> Result<UploadReceipt, UploadError>,
{
    let mut outcome = UploadOutcome::default();

    for file in files {
        if !file.supported {
            tracing::debug!(file_name = %file.name, "skipping unsupported file");
            continue;
        }

        match upload(&file) {
            Ok(receipt) => outcome.uploaded.push(UploadedFile {
                id: receipt.file_id,
                extension: receipt.extension,
                name: file.name,
                last_modified: file.last_modified,
                size: file.size,
                mime: file.mime,
            }),
            Err(err) => {
                tracing::warn!(file_name = %file.name, error = %err, "upload failed; abandoning batch");
                outcome.failure = Some(err);
                break;
            }
        }

        if !multiple {
            break;
        }
    }

    outcome
}

/// "a, b, c and 2 more"
pub fn selection_summary(files: &[UploadedFile]) -> Option<String> {
    let (first, rest) = files.split_first()?;
    let mut summary = first.name.clone();

    for (position, file) in rest.iter().enumerate() {
        if position + 1 >= SUMMARY_NAMES {
            summary.push_str(&format!(" and {} more", rest.len() - position));
            break;
        }
        summary.push_str(", ");
        summary.push_str(&file.name);
    }

    Some(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn origin() -> Url {
        Url::parse("http://example.test:8080/app/page?x=1#top").expect("origin")
    }

    fn uploaded(name: &str) -> UploadedFile {
        UploadedFile {
            id: format!("id-{name}"),
            extension: "txt".to_string(),
            name: name.to_string(),
            last_modified: 0,
            size: 1,
            mime: "text/plain".to_string(),
        }
    }

    #[test]
    fn upload_endpoint_carries_name_and_type() {
        let file = SelectedFile::new("my report.csv", "text/csv", b"a,b".to_vec());
        let url = upload_endpoint(&origin(), "/uploaded-files", "sid-1", &file).expect("endpoint");
        assert_eq!(
            url.as_str(),
            "http://example.test:8080/uploaded-files/sid-1?file_name=my+report.csv&type=text%2Fcsv"
        );
    }

    #[test]
    fn download_url_carries_request_and_widget() {
        let url = download_url(&origin(), "/_download/", "sid-1", 7, "frag", "btn").expect("url");
        assert_eq!(
            url.as_str(),
            "http://example.test:8080/_download/sid-1?request_id=7&fragment_id=frag&widget_id=btn"
        );
    }

    #[test]
    fn endpoint_rejects_origins_without_paths() {
        let origin = Url::parse("data:text/plain,hello").expect("data url");
        assert!(matches!(
            download_url(&origin, "/_download", "sid", 1, "f", "w"),
            Err(UploadError::Endpoint(_))
        ));
    }

    #[test]
    fn batch_stops_at_first_failure_and_keeps_earlier_files() {
        let files = vec![
            SelectedFile::new("a.txt", "text/plain", b"a".to_vec()),
            SelectedFile::new("b.txt", "text/plain", b"b".to_vec()),
            SelectedFile::new("c.txt", "text/plain", b"c".to_vec()),
        ];
        let mut attempts = Vec::new();

        let outcome = upload_batch(files, true, |file| {
            attempts.push(file.name.clone());
            if file.name == "b.txt" {
                return Err(UploadError::Transport("503".to_string()));
            }
            Ok(UploadReceipt {
                file_id: format!("id-{}", file.name),
                extension: "txt".to_string(),
            })
        });

        assert_eq!(attempts, vec!["a.txt", "b.txt"]);
        assert_eq!(outcome.uploaded.len(), 1);
        assert_eq!(outcome.uploaded[0].id, "id-a.txt");
        assert_eq!(outcome.failure, Some(UploadError::Transport("503".to_string())));
    }

    #[test]
    fn single_uploader_sends_first_supported_file_only() {
        let mut skipped = SelectedFile::new("x.exe", "", b"x".to_vec());
        skipped.supported = false;
        let files = vec![
            skipped,
            SelectedFile::new("a.txt", "text/plain", b"a".to_vec()),
            SelectedFile::new("b.txt", "text/plain", b"b".to_vec()),
        ];

        let outcome = upload_batch(files, false, |file| {
            Ok(UploadReceipt {
                file_id: file.name.clone(),
                extension: String::new(),
            })
        });

        let names: Vec<&str> = outcome.uploaded.iter().map(|file| file.name.as_str()).collect();
        assert_eq!(names, vec!["a.txt"]);
        assert_eq!(outcome.failure, None);
    }

    #[test]
    fn summary_lists_three_names() {
        assert_eq!(selection_summary(&[]), None);
        assert_eq!(selection_summary(&[uploaded("a")]).as_deref(), Some("a"));

        let three: Vec<_> = ["a", "b", "c"].into_iter().map(uploaded).collect();
        assert_eq!(selection_summary(&three).as_deref(), Some("a, b, c"));

        let five: Vec<_> = ["a", "b", "c", "d", "e"].into_iter().map(uploaded).collect();
        assert_eq!(selection_summary(&five).as_deref(), Some("a, b, c and 2 more"));
    }

    #[test]
    fn uploaded_file_serializes_with_wire_names() {
        let value = serde_json::to_value(uploaded("a")).expect("serialize");
        assert_eq!(value["type"], "text/plain");
        assert_eq!(value["id"], "id-a");
        assert!(value.get("mime").is_none());
    }
}
