//! HTML rendering and embedded static assets
//!
//! No JavaScript beyond a progressive-enhancement hint, no external
//! resources; everything is served from the process.

use crate::state::ShareDescriptor;
use hyper::StatusCode;

const STYLE_CSS: &str = include_str!("static/style.css");
const APP_JS: &str = include_str!("static/app.js");
const LOGO_SVG: &str = include_str!("static/logo.svg");

/// Look up an embedded asset by its path below the random prefix.
/// Returns the content type and body.
pub fn asset(path: &str) -> Option<(&'static str, &'static str)> {
    match path {
        "css/style.css" => Some(("text/css; charset=utf-8", STYLE_CSS)),
        "js/app.js" => Some(("application/javascript; charset=utf-8", APP_JS)),
        "img/logo.svg" => Some(("image/svg+xml", LOGO_SVG)),
        _ => None,
    }
}

/// The share landing page
pub fn share_page(share: &ShareDescriptor, static_prefix: &str) -> String {
    format!(
        "<!DOCTYPE html>\n\
         <html lang=\"en\">\n\
         <head>\n\
         <meta charset=\"utf-8\">\n\
         <meta name=\"viewport\" content=\"width=device-width, initial-scale=1\">\n\
         <title>oniondrop</title>\n\
         <link rel=\"stylesheet\" href=\"/{prefix}/css/style.css\">\n\
         <script src=\"/{prefix}/js/app.js\" defer></script>\n\
         </head>\n\
         <body>\n\
         <main>\n\
         <img class=\"logo\" src=\"/{prefix}/img/logo.svg\" alt=\"\">\n\
         <h1>{name}</h1>\n\
         <p class=\"meta\">{size}</p>\n\
         <a id=\"download\" class=\"button\" href=\"/download\">Download</a>\n\
         <p id=\"hint\" class=\"hint\">This file is shared once. The address stops working after the download.</p>\n\
         </main>\n\
         </body>\n\
         </html>\n",
        prefix = static_prefix,
        name = escape(&share.file_name),
        size = share.size_display(),
    )
}

/// Templated error page for 404/405/500
pub fn error_page(status: StatusCode, message: &str) -> String {
    format!(
        "<!DOCTYPE html>\n\
         <html lang=\"en\">\n\
         <head><meta charset=\"utf-8\"><title>{code} {reason}</title></head>\n\
         <body style=\"font-family:system-ui,sans-serif;background:#17171d;color:#e6e6ea;\
         display:flex;min-height:100vh;align-items:center;justify-content:center\">\n\
         <main style=\"text-align:center\">\n\
         <h1>{code} {reason}</h1>\n\
         <p>{message}</p>\n\
         </main>\n\
         </body>\n\
         </html>\n",
        code = status.as_u16(),
        reason = status.canonical_reason().unwrap_or("Error"),
        message = escape(message),
    )
}

/// Minimal HTML escaping for interpolated text
fn escape(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn share() -> ShareDescriptor {
        ShareDescriptor {
            path: PathBuf::from("/tmp/report.pdf"),
            file_name: "report.pdf".to_string(),
            size_bytes: 4096,
        }
    }

    #[test]
    fn share_page_contains_metadata_and_prefix() {
        let html = share_page(&share(), "RaNd0mPrefix");
        assert!(html.contains("report.pdf"));
        assert!(html.contains("4.0 KiB"));
        assert!(html.contains("/RaNd0mPrefix/css/style.css"));
        assert!(html.contains("href=\"/download\""));
    }

    #[test]
    fn file_names_are_escaped() {
        let evil = ShareDescriptor {
            file_name: "<script>alert(1)</script>".to_string(),
            ..share()
        };
        let html = share_page(&evil, "p");
        assert!(!html.contains("<script>alert"));
        assert!(html.contains("&lt;script&gt;"));
    }

    #[test]
    fn known_assets_resolve() {
        assert!(asset("css/style.css").is_some());
        assert!(asset("js/app.js").is_some());
        assert!(asset("img/logo.svg").is_some());
        assert!(asset("css/../secret").is_none());
        assert!(asset("").is_none());
    }

    #[test]
    fn error_page_renders_status() {
        let html = error_page(StatusCode::NOT_FOUND, "No such page");
        assert!(html.contains("404 Not Found"));
        assert!(html.contains("No such page"));
    }
}
