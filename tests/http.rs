use axum::{
    body::{to_bytes, Body},
    http::{header, Request, StatusCode},
    response::Response,
    Router,
};
use dirshare::{config::CHUNK_SIZE, ServerConfig, ServerState};
use std::{fs, io::Cursor};
use tempfile::{tempdir, TempDir};
use tower::ServiceExt;
use zip::ZipArchive;

fn setup() -> (TempDir, Router) {
    let dir = tempdir().unwrap();
    let state = ServerState::shared(ServerConfig::new(dir.path())).unwrap();
    (dir, dirshare::app(state))
}

async fn get(app: &Router, uri: &str) -> Response {
    app.clone()
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap()
}

async fn body_bytes(res: Response) -> Vec<u8> {
    to_bytes(res.into_body(), usize::MAX).await.unwrap().to_vec()
}

async fn body_text(res: Response) -> String {
    String::from_utf8(body_bytes(res).await).unwrap()
}

fn header_str<'a>(res: &'a Response, name: header::HeaderName) -> &'a str {
    res.headers().get(name).unwrap().to_str().unwrap()
}

#[tokio::test]
async fn root_listing_clamps_pages() {
    let (dir, app) = setup();
    for i in 0..45 {
        fs::write(dir.path().join(format!("file{:02}.bin", i)), b"x").unwrap();
    }

    let res = get(&app, "/?page=0").await;
    assert_eq!(res.status(), StatusCode::OK);
    let html = body_text(res).await;
    assert!(html.contains(r#"<span class="current">1</span>"#));
    assert!(html.contains("file00.bin"));
    assert!(!html.contains("file20.bin"));

    let html = body_text(get(&app, "/?page=8").await).await;
    assert!(html.contains(r#"<span class="current">3</span>"#));
    assert!(html.contains("file44.bin"));
    assert!(!html.contains("file39.bin"));
}

#[tokio::test]
async fn search_filters_case_insensitively() {
    let (dir, app) = setup();
    for name in ["Test.txt", "alpha", "TABLE.csv"] {
        fs::write(dir.path().join(name), b"x").unwrap();
    }

    let html = body_text(get(&app, "/?search=t").await).await;
    let table = html.find(">TABLE.csv<").unwrap();
    let test = html.find(">Test.txt<").unwrap();
    assert!(table < test);
    assert!(!html.contains(">alpha<"));
    assert!(html.contains(r#"value="t""#));
}

#[tokio::test]
async fn hostile_names_are_escaped() {
    let (dir, app) = setup();
    fs::write(dir.path().join("<script>x<"), b"x").unwrap();

    let html = body_text(get(&app, "/?search=%3Cscript%3E").await).await;
    assert!(!html.contains("<script>"));
    assert!(html.contains("&lt;script&gt;x&lt;"));
    assert!(html.contains("%3Cscript%3Ex%3C"));
}

#[tokio::test]
async fn directory_without_slash_redirects() {
    let (dir, app) = setup();
    fs::create_dir(dir.path().join("docs")).unwrap();

    let res = get(&app, "/docs?page=2").await;
    assert_eq!(res.status(), StatusCode::PERMANENT_REDIRECT);
    assert_eq!(header_str(&res, header::LOCATION), "/docs/?page=2");

    let res = get(&app, "/docs/").await;
    assert_eq!(res.status(), StatusCode::OK);
    assert!(body_text(res).await.contains("[Parent directory]"));
}

#[tokio::test]
async fn redirect_never_points_at_another_host() {
    let (dir, app) = setup();
    fs::create_dir(dir.path().join("docs")).unwrap();
    fs::create_dir(dir.path().join("evil.example")).unwrap();

    let res = get(&app, "//docs").await;
    assert_eq!(res.status(), StatusCode::PERMANENT_REDIRECT);
    assert_eq!(header_str(&res, header::LOCATION), "/docs/");

    let res = get(&app, "//evil.example").await;
    assert_eq!(res.status(), StatusCode::PERMANENT_REDIRECT);
    assert_eq!(header_str(&res, header::LOCATION), "/evil.example/");
}

#[tokio::test]
async fn huge_page_number_shows_last_page() {
    let (dir, app) = setup();
    for i in 0..45 {
        fs::write(dir.path().join(format!("file{:02}.bin", i)), b"x").unwrap();
    }

    let html = body_text(get(&app, "/?page=99999999999999999999999").await).await;
    assert!(html.contains(r#"<span class="current">3</span>"#));
    assert!(html.contains("file44.bin"));
}

#[tokio::test]
async fn repeated_query_keys_use_the_first_value() {
    let (dir, app) = setup();
    for i in 0..45 {
        fs::write(dir.path().join(format!("file{:02}.bin", i)), b"x").unwrap();
    }

    let res = get(&app, "/?page=1&page=2").await;
    assert_eq!(res.status(), StatusCode::OK);
    let html = body_text(res).await;
    assert!(html.contains(r#"<span class="current">1</span>"#));
    assert!(html.contains("file00.bin"));
}

#[tokio::test]
async fn directory_archive_is_built_and_reused() {
    let (dir, app) = setup();
    fs::create_dir_all(dir.path().join("docs/nested")).unwrap();
    fs::write(dir.path().join("docs/a.txt"), b"alpha").unwrap();
    fs::write(dir.path().join("docs/nested/b.txt"), b"beta").unwrap();

    let res = get(&app, "/docs.zip").await;
    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(header_str(&res, header::CONTENT_TYPE), "application/zip");
    let length: usize = header_str(&res, header::CONTENT_LENGTH).parse().unwrap();
    let bytes = body_bytes(res).await;
    assert_eq!(bytes.len(), length);

    let mut archive = ZipArchive::new(Cursor::new(bytes.clone())).unwrap();
    let mut names: Vec<String> = (0..archive.len())
        .map(|i| archive.by_index(i).unwrap().name().to_string())
        .collect();
    names.sort();
    assert_eq!(names, vec!["a.txt", "nested/b.txt"]);
    assert!(dir.path().join("docs.zip").is_file());

    fs::write(dir.path().join("docs/c.txt"), b"gamma").unwrap();
    let again = body_bytes(get(&app, "/docs.zip").await).await;
    assert_eq!(again, bytes);
}

#[tokio::test]
async fn archive_of_nothing_is_not_found() {
    let (_dir, app) = setup();
    assert_eq!(get(&app, "/missing.zip").await.status(), StatusCode::NOT_FOUND);
    assert_eq!(get(&app, "/.zip").await.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn content_fetch_streams_exact_bytes() {
    let (dir, app) = setup();
    for size in [0, CHUNK_SIZE - 1, CHUNK_SIZE, CHUNK_SIZE + 1, 10 * CHUNK_SIZE] {
        let data: Vec<u8> = (0..size).map(|i| b'a' + (i % 26) as u8).collect();
        fs::write(dir.path().join(format!("f{size}.txt")), &data).unwrap();

        let res = get(&app, &format!("/f{size}.txt?action=get_content&chunk_size=16384")).await;
        assert_eq!(res.status(), StatusCode::OK);
        assert_eq!(header_str(&res, header::CONTENT_TYPE), "text/plain");
        assert_eq!(header_str(&res, header::CACHE_CONTROL), "no-cache");
        assert_eq!(header_str(&res, header::CONTENT_ENCODING), "identity");
        assert_eq!(body_bytes(res).await, data, "size {size}");
    }
}

#[tokio::test]
async fn text_file_without_flag_gets_viewer_shell() {
    let (dir, app) = setup();
    fs::write(dir.path().join("main.py"), b"print('hi')").unwrap();

    let res = get(&app, "/main.py").await;
    assert_eq!(res.status(), StatusCode::OK);
    assert!(header_str(&res, header::CONTENT_TYPE).starts_with("text/html"));
    let html = body_text(res).await;
    assert!(html.contains("?action=get_content&chunk_size=16384"));
    assert!(html.contains("\"/main.py\""));
    assert!(!html.contains("print('hi')"));
}

#[cfg(feature = "markdown")]
#[tokio::test]
async fn markdown_renders_on_request() {
    let (dir, app) = setup();
    fs::write(dir.path().join("README.md"), b"# Hello\n\n| a |\n|---|\n| 1 |\n").unwrap();
    fs::write(dir.path().join("broken.md"), [0x23u8, 0x20, 0xff, 0xfe]).unwrap();

    let shell = body_text(get(&app, "/README.md").await).await;
    assert!(shell.contains("render=html"));

    let res = get(&app, "/README.md?action=get_content&render=html").await;
    assert_eq!(res.status(), StatusCode::OK);
    assert!(header_str(&res, header::CONTENT_TYPE).starts_with("text/html"));
    let html = body_text(res).await;
    assert!(html.contains("<h1 id=\"hello\">Hello</h1>"));
    assert!(html.contains("<table>"));

    let res = get(&app, "/broken.md?action=get_content&render=html").await;
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);

    let raw = body_text(get(&app, "/README.md?action=get_content").await).await;
    assert!(raw.starts_with("# Hello"));
}

#[cfg(not(feature = "markdown"))]
#[tokio::test]
async fn markdown_render_without_capability_is_server_error() {
    let (dir, app) = setup();
    fs::write(dir.path().join("README.md"), b"# Hello").unwrap();
    let res = get(&app, "/README.md?action=get_content&render=html").await;
    assert_eq!(res.status(), StatusCode::INTERNAL_SERVER_ERROR);
}

#[tokio::test]
async fn opaque_files_download_with_length() {
    let (dir, app) = setup();
    let data = vec![0x89u8; 3000];
    fs::write(dir.path().join("photo.png"), &data).unwrap();

    let res = get(&app, "/photo.png").await;
    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(header_str(&res, header::CONTENT_TYPE), "image/png");
    assert_eq!(header_str(&res, header::CONTENT_LENGTH), "3000");
    assert_eq!(body_bytes(res).await, data);
}

#[tokio::test]
async fn static_assets_pass_through() {
    let (dir, app) = setup();
    fs::create_dir(dir.path().join("static")).unwrap();
    fs::write(dir.path().join("static/prism.js"), b"var Prism = {};").unwrap();

    let res = get(&app, "/static/prism.js").await;
    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(body_text(res).await, "var Prism = {};");
}

#[tokio::test]
async fn paths_outside_root_are_not_found() {
    let (dir, _app) = setup();
    let inner = dir.path().join("inner");
    fs::create_dir(&inner).unwrap();
    fs::write(dir.path().join("secret.txt"), b"top secret").unwrap();

    let state = ServerState::shared(ServerConfig::new(&inner)).unwrap();
    let confined = dirshare::app(state);
    for uri in ["/%2e%2e/secret.txt", "/..%2Fsecret.txt", "/missing"] {
        let res = get(&confined, uri).await;
        assert_eq!(res.status(), StatusCode::NOT_FOUND, "{uri}");
    }
}
