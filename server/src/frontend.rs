use std::io::Cursor;
use std::io::Read;
use std::path::Path;

use axum::Json;
use axum::extract::Multipart;
use axum::extract::State;
use axum::http::StatusCode;
use bytes::Bytes;
use nanoedge_protocol::Permissions;
use nanoedge_state::CreateServiceParams;
use serde_json::Value;
use serde_json::json;
use tracing::info;

use crate::AppState;
use crate::error::ApiError;

/// `POST /admin-api/v2/host-frontend` — deploy a frontend-hosting service:
/// a server script plus a zip of static assets, extracted under
/// `static/<serviceName>/`. The created service can read its own static
/// directory.
pub(crate) async fn host_frontend(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let mut service_name: Option<String> = None;
    let mut server_code: Option<String> = None;
    let mut static_zip: Option<Bytes> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|err| ApiError::InvalidInput(format!("malformed multipart body: {err}")))?
    {
        let name = field.name().map(str::to_string);
        match name.as_deref() {
            Some("serviceName") => {
                let text = field
                    .text()
                    .await
                    .map_err(|err| ApiError::InvalidInput(err.to_string()))?;
                service_name = Some(text);
            }
            Some("server") => {
                let text = field
                    .text()
                    .await
                    .map_err(|err| ApiError::InvalidInput(err.to_string()))?;
                server_code = Some(text);
            }
            Some("static") => {
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|err| ApiError::InvalidInput(err.to_string()))?;
                static_zip = Some(bytes);
            }
            _ => {}
        }
    }

    let service_name = service_name
        .filter(|name| !name.is_empty())
        .ok_or_else(|| ApiError::InvalidInput("`serviceName` field is required".to_string()))?;
    let server_code = server_code
        .filter(|code| !code.is_empty())
        .ok_or_else(|| ApiError::InvalidInput("`server` field is required".to_string()))?;
    let static_zip = static_zip
        .ok_or_else(|| ApiError::InvalidInput("`static` field is required".to_string()))?;

    let static_dir = state.static_root().join(&service_name);
    extract_zip(static_zip, static_dir.clone()).await?;
    info!(service = %service_name, dir = %static_dir.display(), "extracted frontend assets");

    let mut permissions = Permissions::default();
    permissions.grant_read(static_dir.to_string_lossy());
    let record = state
        .store()
        .create_service(&CreateServiceParams {
            name: service_name,
            code: server_code,
            enabled: true,
            jwt_check: false,
            permissions,
            schema: None,
        })
        .await?;
    Ok((StatusCode::CREATED, Json(json!(record))))
}

/// Unpack an uploaded archive, refusing entries that escape the target
/// directory. The zip crate is synchronous, so the work runs off the
/// reactor.
async fn extract_zip(bytes: Bytes, target: std::path::PathBuf) -> Result<(), ApiError> {
    tokio::task::spawn_blocking(move || extract_zip_blocking(&bytes, &target))
        .await
        .map_err(|err| ApiError::Internal(err.to_string()))?
}

fn extract_zip_blocking(bytes: &[u8], target: &Path) -> Result<(), ApiError> {
    let mut archive = zip::ZipArchive::new(Cursor::new(bytes))
        .map_err(|err| ApiError::InvalidInput(format!("`static` is not a zip archive: {err}")))?;
    std::fs::create_dir_all(target).map_err(|err| ApiError::Internal(err.to_string()))?;

    for index in 0..archive.len() {
        let mut entry = archive
            .by_index(index)
            .map_err(|err| ApiError::InvalidInput(format!("corrupt zip entry: {err}")))?;
        let Some(relative) = entry.enclosed_name() else {
            return Err(ApiError::InvalidInput(format!(
                "zip entry `{}` escapes the target directory",
                entry.name()
            )));
        };
        let destination = target.join(relative);
        if entry.is_dir() {
            std::fs::create_dir_all(&destination)
                .map_err(|err| ApiError::Internal(err.to_string()))?;
            continue;
        }
        if let Some(parent) = destination.parent() {
            std::fs::create_dir_all(parent).map_err(|err| ApiError::Internal(err.to_string()))?;
        }
        let mut contents = Vec::with_capacity(usize::try_from(entry.size()).unwrap_or(0));
        entry
            .read_to_end(&mut contents)
            .map_err(|err| ApiError::Internal(err.to_string()))?;
        std::fs::write(&destination, contents)
            .map_err(|err| ApiError::Internal(err.to_string()))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use zip::write::SimpleFileOptions;

    fn zip_with(entries: &[(&str, &str)]) -> anyhow::Result<Bytes> {
        let mut buffer = Cursor::new(Vec::new());
        {
            let mut writer = zip::ZipWriter::new(&mut buffer);
            for (name, contents) in entries {
                writer.start_file(*name, SimpleFileOptions::default())?;
                writer.write_all(contents.as_bytes())?;
            }
            writer.finish()?;
        }
        Ok(Bytes::from(buffer.into_inner()))
    }

    #[tokio::test]
    async fn extracts_nested_entries() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let target = dir.path().join("site");
        let archive = zip_with(&[("index.html", "<h1>hi</h1>"), ("js/app.js", "export {}")])?;
        extract_zip(archive, target.clone()).await?;
        assert!(target.join("index.html").exists());
        assert!(target.join("js/app.js").exists());
        Ok(())
    }

    #[tokio::test]
    async fn traversal_entries_are_refused() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let archive = zip_with(&[("../escape.txt", "nope")])?;
        let result = extract_zip(archive, dir.path().join("site")).await;
        assert!(matches!(result, Err(ApiError::InvalidInput(_))));
        Ok(())
    }
}
