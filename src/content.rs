//! Text previews and raw byte streaming.
//!
//! A preview is two requests: the viewer shell (HTML + script), then the
//! script's `?action=get_content` fetch, which streams the file as
//! `text/plain` in [`CHUNK_SIZE`] pieces or, for markdown with
//! `render=html`, returns rendered HTML.

use axum::{
    body::Body,
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
};
use bytes::Bytes;
use futures_util::stream::{Stream, StreamExt};
use maud::{html, Markup, PreEscaped, DOCTYPE};
use std::{
    io,
    path::{Path, PathBuf},
};
use tokio_util::io::ReaderStream;
use tracing::{debug, error, warn};

use crate::{
    config::{CHUNK_SIZE, STATIC_DIR_NAME},
    error::ServeError,
    markdown,
};

/// Extensions previewed inline regardless of their guessed MIME type.
const PREVIEWABLE_EXTENSIONS: &[&str] = &[
    "txt", "csv", "log", "md", "json", "xml", "yaml", "yml", "ini", "cfg", "py", "js", "html",
    "css", "java", "c", "cpp", "h", "cs", "rb", "php", "go", "swift", "ts", "sh", "bash", "sql",
];

const STRUCTURED_TEXT_MIMES: &[&str] = &["application/json", "application/xml"];

/// Query parameters understood by the file routes.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RequestQuery {
    pub action: Option<String>,
    pub render: Option<String>,
    pub chunk_size: Option<String>,
    pub page: Option<String>,
    pub search: Option<String>,
}

/// Builds from decoded `key=value` pairs. The first occurrence of a key wins
/// and unknown keys are ignored.
impl FromIterator<(String, String)> for RequestQuery {
    fn from_iter<I: IntoIterator<Item = (String, String)>>(pairs: I) -> Self {
        let mut query = Self::default();
        for (key, value) in pairs {
            let slot = match key.as_str() {
                "action" => &mut query.action,
                "render" => &mut query.render,
                "chunk_size" => &mut query.chunk_size,
                "page" => &mut query.page,
                "search" => &mut query.search,
                _ => continue,
            };
            slot.get_or_insert(value);
        }
        query
    }
}

impl RequestQuery {
    fn wants_content(&self) -> bool {
        self.action.as_deref() == Some("get_content")
    }

    fn wants_html(&self) -> bool {
        self.render.as_deref() == Some("html")
    }
}

fn extension(name: &str) -> Option<String> {
    Path::new(name)
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_lowercase)
}

pub fn is_previewable(name: &str) -> bool {
    extension(name).is_some_and(|ext| PREVIEWABLE_EXTENSIONS.contains(&ext.as_str()))
}

pub fn is_markdown(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("md"))
}

/// Text MIME, structured-text MIME, or an allow-listed extension.
pub fn is_text_like(path: &Path) -> bool {
    let mime = mime_guess::from_path(path).first_or_octet_stream();
    let essence = mime.essence_str();
    essence.starts_with("text/")
        || STRUCTURED_TEXT_MIMES.contains(&essence)
        || path
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(is_previewable)
}

// --- Preview entry point ---

/// Serves a text-like file: the viewer shell, or its content when the query asks for it.
pub async fn serve_text(
    path: &Path,
    raw_url: &str,
    query: &RequestQuery,
    highlight: bool,
) -> Result<Response, ServeError> {
    if query.wants_content() {
        if query.wants_html() && is_markdown(path) {
            debug!("Rendering markdown for: {}", path.display());
            return render_markdown(path).await;
        }
        debug!("Streaming text content for: {}", path.display());
        return stream_text(path).await;
    }

    let filename = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "file".to_string());
    let shell = if is_markdown(path) && markdown::available() {
        debug!("Generating markdown viewer for: {}", path.display());
        markdown_viewer(&filename, raw_url)
    } else {
        debug!("Generating code viewer for: {}", path.display());
        code_viewer(&filename, raw_url, highlight)
    };
    Ok(shell.into_response())
}

async fn stream_text(path: &Path) -> Result<Response, ServeError> {
    let (file, len) = open_for_streaming(path).await?;
    let mut headers = HeaderMap::new();
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("text/plain"));
    headers.insert(header::CONTENT_ENCODING, HeaderValue::from_static("identity"));
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));

    let body = Body::from_stream(chunked(file, path.to_path_buf(), len));
    Ok((StatusCode::OK, headers, body).into_response())
}

async fn render_markdown(path: &Path) -> Result<Response, ServeError> {
    let source = tokio::fs::read(path).await.map_err(|e| {
        error!("Failed to read markdown file {}: {}", path.display(), e);
        ServeError::NotFound("File not found or read error.")
    })?;
    let rendered = tokio::task::spawn_blocking(move || markdown::render(source))
        .await
        .map_err(|e| {
            error!("Markdown rendering task failed: {}", e);
            ServeError::Internal("Error rendering Markdown.")
        })??;

    let mut headers = HeaderMap::new();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("text/html; charset=utf-8"),
    );
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    Ok((StatusCode::OK, headers, rendered).into_response())
}

// --- Downloads ---

/// Streams a whole file with an exact `Content-Length`.
///
/// `content_type` defaults to a guess from the extension.
pub async fn stream_download(
    path: &Path,
    content_type: Option<&'static str>,
) -> Result<Response, ServeError> {
    let (file, len) = open_for_streaming(path).await?;

    let mime_type = match content_type {
        Some(ct) => ct.to_string(),
        None => mime_guess::from_path(path)
            .first_or_octet_stream()
            .to_string(),
    };

    let mut headers = HeaderMap::new();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_str(&mime_type)
            .unwrap_or_else(|_| HeaderValue::from_static("application/octet-stream")),
    );
    headers.insert(header::CONTENT_LENGTH, HeaderValue::from(len));

    let body = Body::from_stream(chunked(file, path.to_path_buf(), len));
    Ok((StatusCode::OK, headers, body).into_response())
}

async fn open_for_streaming(path: &Path) -> Result<(tokio::fs::File, u64), ServeError> {
    let not_found = |e: io::Error| {
        error!("Failed to open {} for streaming: {}", path.display(), e);
        ServeError::NotFound("File not found or read error.")
    };
    let file = tokio::fs::File::open(path).await.map_err(not_found)?;
    let metadata = file.metadata().await.map_err(not_found)?;
    if !metadata.is_file() {
        return Err(ServeError::NotFound("File not found."));
    }
    Ok((file, metadata.len()))
}

// --- Streaming ---

/// Per-request transfer bookkeeping; logs how the transfer ended when dropped.
///
/// The body stream owns the session, so hyper dropping the body on a client
/// disconnect is what ends it early.
struct StreamSession {
    path: PathBuf,
    expected: u64,
    sent: u64,
    failed: bool,
}

impl Drop for StreamSession {
    fn drop(&mut self) {
        if self.failed {
            return;
        }
        if self.sent < self.expected {
            warn!(
                "Client disconnected after {} of {} bytes of {}",
                self.sent,
                self.expected,
                self.path.display()
            );
        } else {
            debug!("Finished streaming {} ({} bytes)", self.path.display(), self.sent);
        }
    }
}

/// Reads `file` in chunks of at most [`CHUNK_SIZE`] bytes.
pub fn chunked(
    file: tokio::fs::File,
    path: PathBuf,
    expected: u64,
) -> impl Stream<Item = io::Result<Bytes>> + Send + 'static {
    let mut session = StreamSession {
        path,
        expected,
        sent: 0,
        failed: false,
    };
    ReaderStream::with_capacity(file, CHUNK_SIZE).map(move |chunk| {
        match &chunk {
            Ok(bytes) => session.sent += bytes.len() as u64,
            Err(e) => {
                error!("Read error while streaming {}: {}", session.path.display(), e);
                session.failed = true;
            }
        }
        chunk
    })
}

// --- Viewer shells ---

/// `s` as a JavaScript string literal that is safe inside a `<script>` element.
fn js_string(s: &str) -> String {
    serde_json::to_string(s)
        .unwrap_or_else(|_| "\"\"".to_string())
        .replace("</", "<\\/")
}

fn viewer_head(title: &str) -> Markup {
    html! {
        meta charset="utf-8";
        meta name="viewport" content="width=device-width, initial-scale=1.0";
        title { (title) }
        style { (PreEscaped(VIEWER_CSS)) }
    }
}

pub fn code_viewer(filename: &str, raw_url: &str, highlight: bool) -> Markup {
    let script = format!(
        "const contentUrl = {url} + \"?action=get_content&chunk_size={chunk}\";\n\
         const staticBase = \"/{static_dir}/\";\n\
         const enableHighlight = {highlight};\n{body}",
        url = js_string(raw_url),
        chunk = CHUNK_SIZE,
        static_dir = STATIC_DIR_NAME,
        highlight = highlight,
        body = CODE_VIEWER_JS,
    );
    html! {
        (DOCTYPE)
        html {
            head { (viewer_head(&format!("Code Viewer - {}", filename))) }
            body {
                div class="header" {
                    h2 { (filename) }
                    a href=(raw_url) download { "Download raw file" }
                }
                div #loading { "Loading file content..." }
                div #code-container {
                    pre { code #code-content {} }
                }
                script { (PreEscaped(script)) }
            }
        }
    }
}

pub fn markdown_viewer(filename: &str, raw_url: &str) -> Markup {
    let script = format!(
        "const contentUrl = {url} + \"?action=get_content&render=html\";\n{body}",
        url = js_string(raw_url),
        body = MARKDOWN_VIEWER_JS,
    );
    html! {
        (DOCTYPE)
        html {
            head { (viewer_head(&format!("Markdown Viewer - {}", filename))) }
            body {
                div class="header" {
                    h2 { (filename) }
                    div {
                        a href={(raw_url) "?action=get_content"} target="_blank" { "View source" }
                        a href=(raw_url) download { "Download raw file" }
                    }
                }
                div #loading { "Rendering Markdown..." }
                div #md-container { div #md-content {} }
                script { (PreEscaped(script)) }
            }
        }
    }
}

const VIEWER_CSS: &str = r#"
body { font-family: -apple-system, BlinkMacSystemFont, "Segoe UI", Roboto, Arial, sans-serif; margin: 0; background: #f5f5f5; color: #333; }
.header { background: #222; color: white; padding: 1rem 1.25rem; display: flex; justify-content: space-between; align-items: center; position: sticky; top: 0; }
.header h2 { margin: 0; font-size: 1.1rem; word-break: break-all; }
.header a { color: #66d9ef; text-decoration: none; margin-left: 1rem; }
#loading { text-align: center; padding: 2rem; color: #888; }
#code-container { padding: 1rem; }
pre { margin: 0; background: #fdfdfd; border-radius: 5px; padding: 1rem; overflow-x: auto; }
code { font-family: "SFMono-Regular", Consolas, "Liberation Mono", Menlo, monospace; font-size: 0.875rem; white-space: pre-wrap; word-wrap: break-word; }
#md-container { padding: 2rem; background: white; margin: 1rem; border-radius: 5px; line-height: 1.6; }
#md-content table { border-collapse: collapse; }
#md-content th, #md-content td { padding: 0.5rem; border: 1px solid #dee2e6; }
#md-content pre { background: #f1f1f1; }
"#;

const CODE_VIEWER_JS: &str = r#"
const codeElement = document.getElementById('code-content');
const loadingElement = document.getElementById('loading');

function highlight() {
    if (enableHighlight && window.Prism) {
        try { Prism.highlightElement(codeElement); } catch (e) { console.error('Prism error:', e); }
    }
}

async function loadFileContent() {
    try {
        const response = await fetch(contentUrl);
        if (!response.ok) throw new Error(`HTTP error! status: ${response.status}`);
        const contentType = response.headers.get('content-type');
        if (!contentType || !contentType.startsWith('text/plain')) {
            throw new Error(`Invalid content type: ${contentType}`);
        }
        const reader = response.body.getReader();
        const decoder = new TextDecoder('utf-8');
        loadingElement.style.display = 'none';
        while (true) {
            const { done, value } = await reader.read();
            if (done) break;
            codeElement.textContent += decoder.decode(value, { stream: true });
        }
        codeElement.textContent += decoder.decode();
        highlight();
    } catch (error) {
        loadingElement.textContent = `Failed to load: ${error.message}`;
        loadingElement.style.color = 'red';
    }
}

if (enableHighlight) {
    const link = document.createElement('link');
    link.rel = 'stylesheet';
    link.href = staticBase + 'prism.css';
    document.head.appendChild(link);
    const script = document.createElement('script');
    script.src = staticBase + 'prism.js';
    document.head.appendChild(script);
}
window.addEventListener('DOMContentLoaded', loadFileContent);
"#;

const MARKDOWN_VIEWER_JS: &str = r#"
async function loadMarkdownContent() {
    const loadingElement = document.getElementById('loading');
    const contentElement = document.getElementById('md-content');
    try {
        const response = await fetch(contentUrl);
        if (!response.ok) throw new Error(`HTTP error! status: ${response.status}`);
        const htmlText = await response.text();
        loadingElement.style.display = 'none';
        contentElement.innerHTML = htmlText;
    } catch (error) {
        loadingElement.textContent = `Rendering failed: ${error.message}`;
        loadingElement.style.color = 'red';
    }
}
window.addEventListener('DOMContentLoaded', loadMarkdownContent);
"#;
