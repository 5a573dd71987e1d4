use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use ticketmail_content::{Attachment, sanitize_filename};
use ticketmail_core::{NewAttachment, Store};

/// `<root>/<yyyy>/<mm>/<dd>/<email_id>` with repeated separators collapsed.
pub(crate) fn bucket_dir(root: &Path, day: NaiveDate, email_id: i64) -> PathBuf {
    let raw = format!(
        "{}/{}/{}",
        root.to_string_lossy(),
        day.format("%Y/%m/%d"),
        email_id
    );
    let mut collapsed = String::with_capacity(raw.len());
    for ch in raw.chars() {
        if ch == '/' && collapsed.ends_with('/') {
            continue;
        }
        collapsed.push(ch);
    }
    PathBuf::from(collapsed)
}

fn mime_for(attachment: &Attachment, file_name: &str) -> String {
    let declared = attachment.content_type.trim();
    if declared.is_empty() || declared == "application/octet-stream" {
        mime_guess::from_path(file_name)
            .first_or_octet_stream()
            .to_string()
    } else {
        declared.to_string()
    }
}

/// Writes the attachments of one email and records the ones that made it to
/// disk. Returns the ids of the recorded rows.
///
/// Names are sanitized but not deduplicated, so two attachments with the
/// same name overwrite each other.
pub(crate) async fn save_attachments(
    store: &Store,
    root: &Path,
    day: NaiveDate,
    email_id: i64,
    attachments: &[Attachment],
) -> Vec<i64> {
    if attachments.is_empty() {
        return Vec::new();
    }
    let dir = bucket_dir(root, day, email_id);
    if let Err(err) = tokio::fs::create_dir_all(&dir).await {
        tracing::error!(
            from = "receiver",
            email_id,
            dir = %dir.display(),
            error = %err,
            "cannot create attachment directory"
        );
        return Vec::new();
    }

    let mut rows = Vec::new();
    for attachment in attachments {
        let file_name = sanitize_filename(&attachment.filename);
        let target = dir.join(&file_name);
        if let Err(err) = tokio::fs::write(&target, &attachment.data).await {
            tracing::error!(
                from = "receiver",
                email_id,
                file = %attachment.filename,
                error = %err,
                "error writing attachment"
            );
            continue;
        }
        rows.push(NewAttachment {
            ref_id: email_id,
            path: dir.to_string_lossy().into_owned(),
            mime_type: mime_for(attachment, &file_name),
            file_size: attachment.data.len() as i64,
            file_name,
        });
    }
    if rows.is_empty() {
        return Vec::new();
    }

    let ids = store.insert_attachments(&rows).await;
    if ids.is_empty() {
        tracing::error!(from = "receiver", email_id, "failed to record attachments");
    } else {
        tracing::info!(from = "receiver", email_id, total = ids.len(), "email attachments inserted");
    }
    ids
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::roles_mod::test_support::{fresh_store, temp_path};

    fn day() -> anyhow::Result<NaiveDate> {
        NaiveDate::from_ymd_opt(2025, 1, 14).ok_or_else(|| anyhow::anyhow!("date"))
    }

    fn attachment(name: &str, content_type: &str) -> Attachment {
        Attachment {
            filename: name.to_string(),
            content_type: content_type.to_string(),
            data: b"payload".to_vec(),
        }
    }

    #[test]
    fn bucket_dir_collapses_separators() -> anyhow::Result<()> {
        assert_eq!(
            bucket_dir(Path::new("/"), day()?, 42),
            PathBuf::from("/2025/01/14/42")
        );
        assert_eq!(
            bucket_dir(Path::new("/data//files/"), day()?, 7),
            PathBuf::from("/data/files/2025/01/14/7")
        );
        Ok(())
    }

    #[test]
    fn mime_is_guessed_when_not_declared() {
        let generic = attachment("report.pdf", "application/octet-stream");
        assert_eq!(mime_for(&generic, "report.pdf"), "application/pdf");
        let declared = attachment("report.bin", "image/png");
        assert_eq!(mime_for(&declared, "report.bin"), "image/png");
    }

    #[tokio::test]
    async fn save_attachments_writes_files_and_rows() -> anyhow::Result<()> {
        let store = fresh_store().await?;
        let root = temp_path("ticketmail-attachments");
        let ids = save_attachments(
            &store,
            &root,
            day()?,
            9,
            &[
                attachment("a:b.txt", "text/plain"),
                attachment("photo.png", "image/png"),
            ],
        )
        .await;
        assert_eq!(ids.len(), 2);

        let dir = bucket_dir(&root, day()?, 9);
        assert_eq!(std::fs::read(dir.join("a-b.txt"))?, b"payload");
        let rows = store.attachments_for_email(9).await;
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].file_name, "a-b.txt");
        assert_eq!(rows[0].file_size, Some(7));
        assert_eq!(rows[1].mime_type.as_deref(), Some("image/png"));

        let _ = std::fs::remove_dir_all(&root);
        Ok(())
    }
}
