//! Request classification and dispatch.
//!
//! Every GET goes through [`classify`], which maps the URL path to exactly one
//! [`Resource`]; [`handle_request`] then matches on it.

use axum::{
    extract::{Query, Request, State},
    http::{StatusCode, Uri},
    response::{IntoResponse, Redirect, Response},
    routing::get,
    Router,
};
use std::path::{Component, Path, PathBuf};
use tower::ServiceExt;
use tower_http::{services::ServeDir, trace::TraceLayer};
use tracing::{debug, error, info};

use crate::{
    config::{ArchiveReuse, ARCHIVE_SUFFIX, STATIC_DIR_NAME},
    content::{self, RequestQuery},
    error::ServeError,
    listing::{self, ListingContext, PageRequest},
    state::SharedState,
};

/// What a request path refers to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resource {
    /// Path below the static prefix, with the prefix removed.
    StaticAsset(String),
    /// `target` is where the archive lives (or will); `source` is the
    /// directory it is built from, when that directory exists.
    Archive {
        target: PathBuf,
        source: Option<PathBuf>,
    },
    TextLike(PathBuf),
    Directory(PathBuf),
    Opaque(PathBuf),
}

pub fn app(state: SharedState) -> Router {
    Router::new()
        .route("/", get(handle_request))
        .route("/*path", get(handle_request))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Classifies a raw (still percent-encoded) request path.
pub fn classify(root_dir: &Path, raw_path: &str, show_hidden: bool) -> Result<Resource, ServeError> {
    let static_prefix = format!("/{}/", STATIC_DIR_NAME);
    if let Some(rest) = raw_path.strip_prefix(&static_prefix) {
        return Ok(Resource::StaticAsset(format!("/{}", rest)));
    }

    let decoded = urlencoding::decode(raw_path)
        .map_err(|_| ServeError::NotFound("Path not found."))?
        .into_owned();

    if let Some(dir_part) = decoded.strip_suffix(ARCHIVE_SUFFIX) {
        return classify_archive(root_dir, &decoded, dir_part, show_hidden);
    }

    let full_path = resolve_and_validate_path(root_dir, &sanitize_path(&decoded, show_hidden)?)?;
    if full_path.is_dir() {
        Ok(Resource::Directory(full_path))
    } else if full_path.is_file() {
        if content::is_text_like(&full_path) {
            Ok(Resource::TextLike(full_path))
        } else {
            Ok(Resource::Opaque(full_path))
        }
    } else {
        Err(ServeError::NotFound("Path not found."))
    }
}

fn classify_archive(
    root_dir: &Path,
    archive_path: &str,
    dir_part: &str,
    show_hidden: bool,
) -> Result<Resource, ServeError> {
    let existing = sanitize_path(archive_path, show_hidden)
        .and_then(|rel| resolve_and_validate_path(root_dir, &rel))
        .ok()
        .filter(|p| p.is_file());

    let source = sanitize_path(dir_part, show_hidden)
        .ok()
        .filter(|rel| rel != Path::new("."))
        .and_then(|rel| resolve_and_validate_path(root_dir, &rel).ok())
        .filter(|p| p.is_dir() && p != root_dir);

    let target = match (existing, &source) {
        (Some(file), _) => file,
        (None, Some(dir)) => archive_target(dir)?,
        (None, None) => {
            info!("No file or directory for archive request {}", archive_path);
            return Err(ServeError::NotFound("Directory not found."));
        }
    };
    Ok(Resource::Archive { target, source })
}

/// `<parent>/<name>.zip` next to the source directory.
fn archive_target(dir: &Path) -> Result<PathBuf, ServeError> {
    match (dir.parent(), dir.file_name()) {
        (Some(parent), Some(name)) => {
            let mut file_name = name.to_os_string();
            file_name.push(ARCHIVE_SUFFIX);
            Ok(parent.join(file_name))
        }
        _ => Err(ServeError::NotFound("Directory not found.")),
    }
}

/// Catch-all GET handler.
pub async fn handle_request(
    State(state): State<SharedState>,
    Query(pairs): Query<Vec<(String, String)>>,
    req: Request,
) -> Response {
    let query: RequestQuery = pairs.into_iter().collect();
    let uri = req.uri().clone();
    info!("GET request for: {}", uri);

    let resource = match classify(&state.root_dir, uri.path(), state.show_hidden) {
        Ok(r) => r,
        Err(e) => return e.into_response(),
    };
    debug!("Classified {} as {:?}", uri.path(), resource);

    let result = match resource {
        Resource::StaticAsset(rest) => return serve_static(&state, rest, &uri, req).await,
        Resource::Archive { target, source } => serve_archive(&state, target, source).await,
        Resource::TextLike(path) => {
            content::serve_text(&path, uri.path(), &query, state.highlight).await
        }
        Resource::Directory(path) => serve_listing(&state, path, &uri, &query).await,
        Resource::Opaque(path) => content::stream_download(&path, None).await,
    };
    result.unwrap_or_else(IntoResponse::into_response)
}

async fn serve_static(state: &SharedState, rest: String, uri: &Uri, mut req: Request) -> Response {
    let rewritten = match uri.query() {
        Some(q) => format!("{}?{}", rest, q),
        None => rest,
    };
    match rewritten.parse::<Uri>() {
        Ok(u) => *req.uri_mut() = u,
        Err(_) => return ServeError::NotFound("Path not found.").into_response(),
    }
    match ServeDir::new(&state.static_dir).oneshot(req).await {
        Ok(res) => res.into_response(),
        Err(never) => match never {},
    }
}

async fn serve_archive(
    state: &SharedState,
    target: PathBuf,
    source: Option<PathBuf>,
) -> Result<Response, ServeError> {
    let needs_builder = source.is_some()
        && (!target.is_file() || state.archives.reuse() == ArchiveReuse::WhileFresh);

    if let Some(source) = source.filter(|_| needs_builder) {
        let builder_state = state.clone();
        let build_target = target.clone();
        tokio::task::spawn_blocking(move || builder_state.archives.build(&source, &build_target))
            .await
            .map_err(|e| {
                error!("Archive task failed: {}", e);
                ServeError::Internal("Failed to create ZIP file.")
            })??;
    }

    if !target.is_file() {
        error!("ZIP file was not created at {}", target.display());
        return Err(ServeError::Internal("Failed to create ZIP file."));
    }
    content::stream_download(&target, Some("application/zip")).await
}

async fn serve_listing(
    state: &SharedState,
    dir: PathBuf,
    uri: &Uri,
    query: &RequestQuery,
) -> Result<Response, ServeError> {
    let path = uri.path();
    let display_path = urlencoding::decode(path)
        .map(|p| p.into_owned())
        .unwrap_or_else(|_| path.to_string());

    if !path.ends_with('/') {
        let location = slash_redirect_location(&display_path, uri.query(), state.show_hidden)?;
        return Ok(Redirect::permanent(&location).into_response());
    }

    let request = PageRequest::from_query(query.page.as_deref(), query.search.as_deref());
    let listing_state = state.clone();

    let markup = tokio::task::spawn_blocking(move || {
        let ctx = ListingContext {
            display_path: &display_path,
            is_root: dir == listing_state.root_dir,
            show_hidden: listing_state.show_hidden,
        };
        listing::render(&dir, &ctx, &request, &listing_state.sizes)
    })
    .await
    .map_err(|e| {
        error!("Listing task failed: {}", e);
        ServeError::Internal("Error reading directory contents.")
    })??;

    Ok((StatusCode::OK, markup).into_response())
}

/// `Location` for a directory requested without its trailing slash.
///
/// Rebuilt from the sanitized components, never echoed from the request:
/// a raw `//host` path would otherwise become a protocol-relative redirect
/// to another site.
fn slash_redirect_location(
    decoded_path: &str,
    query: Option<&str>,
    show_hidden: bool,
) -> Result<String, ServeError> {
    let relative = sanitize_path(decoded_path, show_hidden)?;
    let mut location = String::from("/");
    for component in relative.components() {
        if let Component::Normal(name) = component {
            location.push_str(&urlencoding::encode(&name.to_string_lossy()));
            location.push('/');
        }
    }
    if let Some(q) = query {
        location.push('?');
        location.push_str(q);
    }
    Ok(location)
}

// --- Path handling ---

/// Cleans up a decoded URL path into a path relative to the shared root.
///
/// `..` pops a component instead of climbing above the root. Hidden
/// components are refused unless `show_hidden`.
pub fn sanitize_path(decoded_path: &str, show_hidden: bool) -> Result<PathBuf, ServeError> {
    // An encoded %00 would truncate the path at the OS boundary.
    if decoded_path.contains('\0') {
        return Err(ServeError::NotFound("Path not found."));
    }
    let mut clean_path = PathBuf::new();
    // Path components, not string matching: "a/../b", "//x" and "./x" all
    // normalize here before anything touches the filesystem.
    for component in Path::new(decoded_path).components() {
        match component {
            Component::Normal(comp) => {
                // Disallow components starting with '.' (like .git, .env, etc.)
                if !show_hidden && comp.to_string_lossy().starts_with('.') {
                    return Err(ServeError::NotFound("Path not found."));
                }
                clean_path.push(comp);
            }
            // Ignore RootDir, CurDir, Prefix entirely as we build relative to our root
            Component::RootDir | Component::Prefix(_) | Component::CurDir => {}
            Component::ParentDir => {
                // Pop instead of keeping "..", so the relative path can never
                // start above the root once joined
                clean_path.pop();
            }
        }
    }
    // "/" (or a path that popped back to nothing) is the root itself
    if clean_path.as_os_str().is_empty() {
        Ok(PathBuf::from("."))
    } else {
        Ok(clean_path)
    }
}

/// Resolves the sanitized relative path against the root directory and validates it.
/// Ensures the final path is *within* the root directory using canonicalization.
pub fn resolve_and_validate_path(
    root_dir: &Path, // Should be the absolute, canonicalized root path
    sanitized_relative_path: &Path,
) -> Result<PathBuf, ServeError> {
    let potentially_unsafe_path = root_dir.join(sanitized_relative_path);

    // Canonicalize resolves symlinks, so a link pointing outside the root is caught here.
    // It also fails for paths that don't exist, which become Not-Found below.
    match potentially_unsafe_path.canonicalize() {
        // starts_with compares whole components: "/srv/share2" is not under "/srv/share"
        Ok(canonical_path) if canonical_path.starts_with(root_dir) => Ok(canonical_path),
        Ok(canonical_path) => {
            // Reported as Not-Found so probing can't tell "outside" from "missing"
            error!(
                "Path traversal attempt: '{}' resolved to '{}' which is outside root '{}'",
                sanitized_relative_path.display(),
                canonical_path.display(),
                root_dir.display()
            );
            Err(ServeError::NotFound("Path not found."))
        }
        Err(e) => {
            debug!(
                "Failed to resolve '{}': {}",
                potentially_unsafe_path.display(),
                e
            );
            Err(ServeError::NotFound("Path not found."))
        }
    }
}
