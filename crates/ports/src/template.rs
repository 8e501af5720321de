//! Template source management and static builds.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::{PortError, Result};
use crate::object_store::ObjectStore;

/// Prepares template sources, builds them and publishes the output.
#[async_trait]
pub trait TemplateBuilder: Send + Sync {
    /// Local directory holding the sources of template `name`.
    fn template_dir(&self, name: &str) -> PathBuf;

    /// Where the build expects the site's fields document.
    fn fields_path(&self, name: &str) -> PathBuf;

    /// Makes sure the template sources are present locally. Does nothing if
    /// the directory is already populated.
    async fn ensure_local(&self, name: &str) -> Result<PathBuf>;

    /// Replaces the local sources with the current copy from storage.
    async fn refresh(&self, name: &str) -> Result<PathBuf>;

    /// Builds the template in `dir` and returns the output directory.
    async fn build(&self, dir: &Path) -> Result<PathBuf>;

    /// Uploads every file under `output_dir` below `site_prefix` and returns
    /// the number of files uploaded.
    async fn upload_built(
        &self,
        site_prefix: &str,
        name: &str,
        output_dir: &Path,
    ) -> Result<usize>;

    /// Writes the fields document a build of `name` reads.
    async fn write_fields(&self, name: &str, fields: &serde_json::Value) -> Result<()> {
        let path = self.fields_path(name);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&path, serde_json::to_vec_pretty(fields)?).await?;
        Ok(())
    }

    /// Removes the fields document written by [`write_fields`](Self::write_fields).
    async fn clear_fields(&self, name: &str) -> Result<()> {
        match tokio::fs::remove_file(self.fields_path(name)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// Where templates live locally and in object storage.
#[derive(Debug, Clone)]
pub struct TemplateLayout {
    /// Local directory holding one subdirectory per template.
    pub templates_root: PathBuf,
    /// Object key prefix of template sources, e.g. `templates/`.
    pub templates_prefix: String,
    /// Build output directory, relative to the template directory.
    pub build_folder: String,
    /// Directory of the fields document, relative to the template directory.
    pub fields_file_path: String,
    pub fields_file_name: String,
}

/// How [`LocalTemplateBuilder`] turns sources into static assets.
#[derive(Debug, Clone)]
pub enum BuildMode {
    /// Runs a shell command in the template directory.
    Command(String),
    /// Copies the sources unchanged into the build folder.
    CopySources,
}

/// Template builder over the local filesystem.
#[derive(Clone)]
pub struct LocalTemplateBuilder {
    store: Arc<dyn ObjectStore>,
    layout: TemplateLayout,
    mode: BuildMode,
}

impl LocalTemplateBuilder {
    pub fn new(store: Arc<dyn ObjectStore>, layout: TemplateLayout, mode: BuildMode) -> Self {
        Self {
            store,
            layout,
            mode,
        }
    }

    pub fn layout(&self) -> &TemplateLayout {
        &self.layout
    }

    fn source_prefix(&self, name: &str) -> String {
        format!("{}{}/", self.layout.templates_prefix, name)
    }

    async fn run_command(&self, command: &str, dir: &Path) -> Result<()> {
        tracing::info!(command, dir = %dir.display(), "Running template build");
        let output = tokio::process::Command::new("sh")
            .arg("-c")
            .arg(command)
            .current_dir(dir)
            .kill_on_drop(true)
            .output()
            .await?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(PortError::Build(format!(
                "`{command}` exited with {}: {}",
                output.status,
                stderr.trim()
            )));
        }
        Ok(())
    }

    async fn copy_sources(&self, dir: &Path, output: &Path) -> Result<()> {
        let skip = format!("{}/", self.layout.build_folder);
        for relative in collect_files(dir).await? {
            if relative.starts_with(&skip) {
                continue;
            }
            let target = output.join(&relative);
            if let Some(parent) = target.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            tokio::fs::copy(dir.join(&relative), &target).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl TemplateBuilder for LocalTemplateBuilder {
    fn template_dir(&self, name: &str) -> PathBuf {
        self.layout.templates_root.join(name)
    }

    fn fields_path(&self, name: &str) -> PathBuf {
        self.template_dir(name)
            .join(&self.layout.fields_file_path)
            .join(&self.layout.fields_file_name)
    }

    async fn ensure_local(&self, name: &str) -> Result<PathBuf> {
        let dir = self.template_dir(name);
        if dir_has_entries(&dir).await? {
            return Ok(dir);
        }

        let prefix = self.source_prefix(name);
        let keys = self.store.list(&prefix, usize::MAX).await?;
        if keys.is_empty() {
            return Err(PortError::ObjectNotFound(prefix));
        }
        tokio::fs::create_dir_all(&dir).await?;
        self.store.download(&keys, &dir, &prefix).await?;
        tracing::debug!(template = name, files = keys.len(), "Template sources downloaded");
        Ok(dir)
    }

    async fn refresh(&self, name: &str) -> Result<PathBuf> {
        let dir = self.template_dir(name);
        match tokio::fs::remove_dir_all(&dir).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        self.ensure_local(name).await
    }

    async fn build(&self, dir: &Path) -> Result<PathBuf> {
        let output = dir.join(&self.layout.build_folder);
        match &self.mode {
            BuildMode::Command(command) => self.run_command(command, dir).await?,
            BuildMode::CopySources => {
                if tokio::fs::try_exists(&output).await? {
                    tokio::fs::remove_dir_all(&output).await?;
                }
                tokio::fs::create_dir_all(&output).await?;
                self.copy_sources(dir, &output).await?;
            }
        }
        if !tokio::fs::try_exists(&output).await? {
            return Err(PortError::Build(format!(
                "build produced no {} directory",
                self.layout.build_folder
            )));
        }
        Ok(output)
    }

    async fn upload_built(
        &self,
        site_prefix: &str,
        name: &str,
        output_dir: &Path,
    ) -> Result<usize> {
        let files = collect_files(output_dir).await?;
        let prefix = site_prefix.trim_end_matches('/');
        for relative in &files {
            let body = tokio::fs::read(output_dir.join(relative)).await?;
            let key = format!("{prefix}/{relative}");
            self.store
                .upload(&key, Some(content_type_for(relative)), body)
                .await?;
        }
        tracing::info!(template = name, prefix, files = files.len(), "Build uploaded");
        Ok(files.len())
    }
}

async fn dir_has_entries(dir: &Path) -> Result<bool> {
    match tokio::fs::read_dir(dir).await {
        Ok(mut entries) => Ok(entries.next_entry().await?.is_some()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e.into()),
    }
}

/// Lists every regular file below `root` as a `/`-separated relative path,
/// sorted.
pub async fn collect_files(root: &Path) -> Result<Vec<String>> {
    let mut files = Vec::new();
    let mut pending = vec![PathBuf::new()];
    while let Some(relative) = pending.pop() {
        let mut entries = tokio::fs::read_dir(root.join(&relative)).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = relative.join(entry.file_name());
            let file_type = entry.file_type().await?;
            if file_type.is_dir() {
                pending.push(path);
            } else if file_type.is_file() {
                let key: Vec<_> = path
                    .components()
                    .map(|c| c.as_os_str().to_string_lossy().into_owned())
                    .collect();
                files.push(key.join("/"));
            }
        }
    }
    files.sort();
    Ok(files)
}

/// Content type served for a file, derived from its extension.
pub fn content_type_for(path: &str) -> &'static str {
    let extension = path
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .unwrap_or_default();
    match extension.as_str() {
        "html" | "htm" => "text/html",
        "css" => "text/css",
        "js" | "mjs" => "application/javascript",
        "json" | "map" => "application/json",
        "txt" => "text/plain",
        "xml" => "application/xml",
        "svg" => "image/svg+xml",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "ico" => "image/x-icon",
        "woff" => "font/woff",
        "woff2" => "font/woff2",
        "ttf" => "font/ttf",
        _ => "application/octet-stream",
    }
}
