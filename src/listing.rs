//! Paginated, searchable directory listings.
//!
//! Only the entries of the requested page are stat'ed, so a directory with
//! thousands of children costs one `read_dir` plus at most [`PAGE_SIZE`]
//! stats (and size-cache lookups for sub-directories).

use chrono::{DateTime, Local};
use humansize::{format_size, BINARY};
use maud::{html, Markup, PreEscaped, DOCTYPE};
use std::{
    fs,
    num::IntErrorKind,
    path::{Path, PathBuf},
    time::SystemTime,
};
use thiserror::Error;
use tracing::{error, warn};

use crate::{config::PAGE_SIZE, content::is_previewable, size_cache::SizeCache};

#[derive(Debug, Error)]
pub enum ListingError {
    #[error("cannot read directory {path}: {source}")]
    Unreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

// --- Request ---
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageRequest {
    pub page_number: usize,
    pub search_term: String,
}

impl PageRequest {
    /// Lenient parse of the `page`/`search` query values; junk pages become 1.
    /// Numbers too large for `usize` saturate, so they still land on the last page.
    pub fn from_query(page: Option<&str>, search: Option<&str>) -> Self {
        let page_number = page
            .and_then(|p| match p.trim().parse::<usize>() {
                Ok(n) => Some(n),
                Err(e) if *e.kind() == IntErrorKind::PosOverflow => Some(usize::MAX),
                Err(_) => None,
            })
            .unwrap_or(1);
        Self {
            page_number,
            search_term: search.unwrap_or_default().to_string(),
        }
    }
}

impl Default for PageRequest {
    fn default() -> Self {
        Self::from_query(None, None)
    }
}

// --- Paging ---
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Page<T> {
    pub items: Vec<T>,
    /// Clamped into `1..=total_pages`.
    pub page_number: usize,
    pub total_pages: usize,
}

/// Keeps names containing `term` (case-insensitively) sorted by lowercase name.
pub fn filter_and_sort(mut names: Vec<String>, term: &str) -> Vec<String> {
    let needle = term.to_lowercase();
    if !needle.is_empty() {
        names.retain(|n| n.to_lowercase().contains(&needle));
    }
    names.sort_by(|a, b| {
        a.to_lowercase()
            .cmp(&b.to_lowercase())
            .then_with(|| a.cmp(b))
    });
    names
}

pub fn total_pages(count: usize) -> usize {
    count.div_ceil(PAGE_SIZE).max(1)
}

pub fn paginate<T>(items: Vec<T>, requested_page: usize) -> Page<T> {
    let total_pages = total_pages(items.len());
    let page_number = requested_page.clamp(1, total_pages);
    let items = items
        .into_iter()
        .skip((page_number - 1) * PAGE_SIZE)
        .take(PAGE_SIZE)
        .collect();
    Page {
        items,
        page_number,
        total_pages,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageLink {
    Previous(Option<usize>),
    Number(usize),
    Current(usize),
    Ellipsis,
    Next(Option<usize>),
}

/// Previous/next controls around a window of `page ± 2`, with shortcuts to
/// the first and last page when the window doesn't reach them.
pub fn page_links(page: usize, total_pages: usize) -> Vec<PageLink> {
    let mut links = vec![PageLink::Previous((page > 1).then(|| page - 1))];

    let start = page.saturating_sub(2).max(1);
    let end = (page + 2).min(total_pages);
    if start > 1 {
        links.push(PageLink::Number(1));
        if start > 2 {
            links.push(PageLink::Ellipsis);
        }
    }
    for p in start..=end {
        links.push(if p == page {
            PageLink::Current(p)
        } else {
            PageLink::Number(p)
        });
    }
    if end < total_pages {
        if end + 1 < total_pages {
            links.push(PageLink::Ellipsis);
        }
        links.push(PageLink::Number(total_pages));
    }

    links.push(PageLink::Next((page < total_pages).then(|| page + 1)));
    links
}

// --- Entries ---
#[derive(Debug, Clone)]
pub struct DirectoryEntry {
    pub name: String,
    pub is_directory: bool,
    /// `None` when the entry could not be stat'ed.
    pub size_bytes: Option<u64>,
    pub modified_at: Option<SystemTime>,
}

/// Immediate children of `dir`, minus dot-entries unless `show_hidden`.
pub fn read_names(dir: &Path, show_hidden: bool) -> Result<Vec<String>, ListingError> {
    let reader = fs::read_dir(dir).map_err(|source| ListingError::Unreadable {
        path: dir.to_path_buf(),
        source,
    })?;

    let mut names = Vec::new();
    for entry in reader {
        let entry = match entry {
            Ok(e) => e,
            Err(e) => {
                warn!("Skipping unreadable entry in {}: {}", dir.display(), e);
                continue;
            }
        };
        let name = match entry.file_name().into_string() {
            Ok(n) => n,
            Err(_) => {
                error!("Skipping entry with non-UTF8 filename in {}", dir.display());
                continue;
            }
        };
        if !show_hidden && name.starts_with('.') {
            continue;
        }
        names.push(name);
    }
    Ok(names)
}

fn stat_entry(dir: &Path, name: String, sizes: &SizeCache) -> DirectoryEntry {
    let path = dir.join(&name);
    match fs::metadata(&path) {
        Ok(meta) if meta.is_dir() => DirectoryEntry {
            size_bytes: Some(sizes.size_of(&path)),
            modified_at: meta.modified().ok(),
            is_directory: true,
            name,
        },
        Ok(meta) => DirectoryEntry {
            size_bytes: Some(meta.len()),
            modified_at: meta.modified().ok(),
            is_directory: false,
            name,
        },
        Err(e) => {
            warn!("Could not get stats for {}: {}", path.display(), e);
            DirectoryEntry {
                name,
                is_directory: false,
                size_bytes: None,
                modified_at: None,
            }
        }
    }
}

// --- Rendering ---
pub struct ListingContext<'a> {
    /// Decoded request path, shown in the title.
    pub display_path: &'a str,
    pub is_root: bool,
    pub show_hidden: bool,
}

/// Builds the listing page for `dir`. Fails only if `dir` can't be enumerated.
pub fn render(
    dir: &Path,
    ctx: &ListingContext<'_>,
    request: &PageRequest,
    sizes: &SizeCache,
) -> Result<Markup, ListingError> {
    let names = filter_and_sort(read_names(dir, ctx.show_hidden)?, &request.search_term);
    let page = paginate(names, request.page_number);
    // Filtering and sorting only need names; metadata is fetched for the visible page alone
    let entries: Vec<DirectoryEntry> = page
        .items
        .into_iter()
        .map(|name| stat_entry(dir, name, sizes))
        .collect();

    let title = format!("Index of {}", ctx.display_path);
    let search = request.search_term.as_str();

    Ok(html! {
        (DOCTYPE)
        html lang="en" {
            head {
                meta charset="UTF-8";
                meta name="viewport" content="width=device-width, initial-scale=1.0";
                title { (title) }
                style { (PreEscaped(LISTING_CSS)) }
            }
            body {
                h1 { (title) }
                div class="search" {
                    form method="get" {
                        input type="text" name="search" value=(search) placeholder="Search files and folders...";
                        input type="submit" value="Search";
                    }
                }
                ul {
                    li class="header" {
                        span { "Name" }
                        span class="size" { "Size" }
                        span class="date" { "Modified" }
                        span class="actions" { "Actions" }
                    }
                    @if !ctx.is_root {
                        li { a href="../" { "[Parent directory]" } }
                    }
                    @for entry in &entries {
                        (entry_row(entry))
                    }
                }
                div class="pagination" {
                    @for link in page_links(page.page_number, page.total_pages) {
                        (page_link(link, search))
                    }
                }
                div class="back-link" { a href="/" { "Back to root" } }
            }
        }
    })
}

fn entry_row(entry: &DirectoryEntry) -> Markup {
    // Relative href: encoded so '#', '?' and '%' in names stay part of the path
    let href = urlencoding::encode(&entry.name).into_owned();
    let size = entry
        .size_bytes
        .map(|s| format_size(s, BINARY))
        .unwrap_or_else(|| "N/A".to_string());
    let modified = entry
        .modified_at
        .map(|t| {
            let datetime: DateTime<Local> = t.into();
            datetime.format("%Y-%m-%d %H:%M:%S").to_string()
        })
        .unwrap_or_else(|| "N/A".to_string());

    html! {
        li {
            @if entry.is_directory {
                a href={(href) "/"} { (entry.name) "/" }
            } @else {
                a href=(href) { (entry.name) }
            }
            span class="size" { (size) }
            span class="date" { (modified) }
            span class="actions" {
                @if entry.is_directory {
                    a href={(href) ".zip"} { "Download (ZIP)" }
                } @else {
                    a href=(href) download { "Download" }
                    @if is_previewable(&entry.name) {
                        " "
                        a href=(href) target="_blank" { "Preview" }
                    }
                }
            }
        }
    }
}

fn page_link(link: PageLink, search: &str) -> Markup {
    let href = |p: usize| format!("?page={}&search={}", p, urlencoding::encode(search));
    html! {
        @match link {
            PageLink::Previous(Some(p)) => { a href=(href(p)) { (PreEscaped("&laquo;")) " Previous" } }
            PageLink::Previous(None) => { span class="disabled" { (PreEscaped("&laquo;")) " Previous" } }
            PageLink::Number(p) => { a href=(href(p)) { (p) } }
            PageLink::Current(p) => { span class="current" { (p) } }
            PageLink::Ellipsis => { span { "..." } }
            PageLink::Next(Some(p)) => { a href=(href(p)) { "Next " (PreEscaped("&raquo;")) } }
            PageLink::Next(None) => { span class="disabled" { "Next " (PreEscaped("&raquo;")) } }
        }
    }
}

const LISTING_CSS: &str = r#"
:root { --primary: #007BFF; --header-bg: #343a40; --muted: #6c757d; --action: #28a745; --border: #dee2e6; }
body { font-family: -apple-system, BlinkMacSystemFont, "Segoe UI", Roboto, Arial, sans-serif; background: #f8f9fa; margin: 0; padding: 20px; }
h1 { font-size: 1.5rem; text-align: center; color: #333; word-break: break-all; }
.search { text-align: center; margin-bottom: 1.5rem; }
.search input[type="text"] { padding: 0.5rem; width: 60%; max-width: 300px; border: 1px solid #ccc; border-radius: 4px; }
.search input[type="submit"] { padding: 0.5rem 1rem; background: var(--primary); color: white; border: none; border-radius: 4px; cursor: pointer; }
ul { list-style: none; padding: 0; width: 95%; max-width: 1200px; margin: 0 auto; }
li { display: flex; justify-content: space-between; align-items: center; background: white; padding: 0.75rem 1rem; margin-bottom: 0.5rem; border-radius: 6px; box-shadow: 0 1px 3px rgba(0,0,0,0.1); }
li.header { background: var(--header-bg); color: white; font-weight: bold; }
a { text-decoration: none; color: var(--primary); }
a:hover { text-decoration: underline; }
.size, .date { color: var(--muted); font-size: 0.875rem; }
.actions a { color: var(--action); margin: 0 5px; font-size: 0.875rem; }
.pagination { text-align: center; margin: 2rem 0; }
.pagination a, .pagination span { display: inline-block; padding: 0.5rem 0.75rem; margin: 0 0.25rem; border: 1px solid var(--border); border-radius: 4px; }
.pagination .current { background: var(--primary); color: white; border-color: var(--primary); }
.pagination .disabled { color: var(--muted); cursor: not-allowed; }
.back-link { text-align: center; margin-top: 1.5rem; }
@media (max-width: 768px) { li { flex-direction: column; align-items: flex-start; } }
"#;
