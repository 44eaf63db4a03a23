//! Request routing
//!
//! Three surfaces: the share page at `/`, static assets below the
//! random unguessable prefix, and the single `/download` route that
//! streams the artifact. Everything else is a templated 404/405/500.

use super::body::FileBody;
use super::pages;
use crate::state::ShareDescriptor;
use bytes::Bytes;
use http_body_util::combinators::BoxBody;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::{header, Method, Request, Response, StatusCode};
use std::convert::Infallible;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, info};

/// Shared per-session routing context
pub(crate) struct RouterContext {
    pub share: ShareDescriptor,
    /// Random 128-bit URL-safe segment prefixing all static assets
    pub static_prefix: String,
    /// Fired once the download body has been fully handed over
    pub download_done: mpsc::UnboundedSender<()>,
}

type ResponseBody = BoxBody<Bytes, std::io::Error>;

pub(crate) async fn handle(
    req: Request<Incoming>,
    ctx: Arc<RouterContext>,
) -> Result<Response<ResponseBody>, Infallible> {
    let method = req.method().clone();
    let path = req.uri().path().to_string();
    debug!("{} {}", method, path);

    if method != Method::GET {
        return Ok(error_response(
            StatusCode::METHOD_NOT_ALLOWED,
            "Only GET is supported here",
        ));
    }

    let response = match path.as_str() {
        "/" => html_response(StatusCode::OK, pages::share_page(&ctx.share, &ctx.static_prefix)),
        "/download" => download_response(&ctx).await,
        other => match strip_static_prefix(other, &ctx.static_prefix) {
            Some(asset_path) => asset_response(asset_path),
            None => error_response(StatusCode::NOT_FOUND, "No such page"),
        },
    };
    Ok(response)
}

/// Match `/<prefix>/<rest>` and return `<rest>`
fn strip_static_prefix<'a>(path: &'a str, prefix: &str) -> Option<&'a str> {
    path.strip_prefix('/')?
        .strip_prefix(prefix)?
        .strip_prefix('/')
}

fn asset_response(path: &str) -> Response<ResponseBody> {
    match pages::asset(path) {
        Some((content_type, body)) => {
            let mut response = Response::new(full(body));
            response.headers_mut().insert(
                header::CONTENT_TYPE,
                header::HeaderValue::from_static(content_type),
            );
            response
        },
        None => error_response(StatusCode::NOT_FOUND, "No such asset"),
    }
}

async fn download_response(ctx: &RouterContext) -> Response<ResponseBody> {
    let file = match tokio::fs::File::open(&ctx.share.path).await {
        Ok(file) => file,
        Err(e) => {
            error!("Cannot open shared file {}: {}", ctx.share.path.display(), e);
            return error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                "The shared file could not be read",
            );
        },
    };

    info!("Download of {} started", ctx.share.file_name);
    let body = FileBody::new(file, ctx.share.size_bytes, ctx.download_done.clone());

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "application/octet-stream")
        .header(header::CONTENT_LENGTH, ctx.share.size_bytes)
        .header(
            header::CONTENT_DISPOSITION,
            format!("attachment; filename=\"{}\"", sanitize(&ctx.share.file_name)),
        )
        .body(body.boxed())
        .unwrap_or_else(|e| {
            error!("Failed to build download response: {}", e);
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "Internal fault")
        })
}

fn html_response(status: StatusCode, html: String) -> Response<ResponseBody> {
    Response::builder()
        .status(status)
        .header(header::CONTENT_TYPE, "text/html; charset=utf-8")
        .body(full(html))
        .unwrap_or_else(|_| Response::new(full("Internal Server Error")))
}

fn error_response(status: StatusCode, message: &str) -> Response<ResponseBody> {
    html_response(status, pages::error_page(status, message))
}

fn full(body: impl Into<Bytes>) -> ResponseBody {
    Full::new(body.into()).map_err(|e| match e {}).boxed()
}

/// Keep the attachment filename header well-formed
fn sanitize(name: &str) -> String {
    name.chars()
        .map(|c| match c {
            '"' | '\\' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefix_matching_is_exact() {
        assert_eq!(
            strip_static_prefix("/abcDEF123/css/style.css", "abcDEF123"),
            Some("css/style.css")
        );
        assert_eq!(strip_static_prefix("/wrong/css/style.css", "abcDEF123"), None);
        assert_eq!(strip_static_prefix("/abcDEF123", "abcDEF123"), None);
        assert_eq!(strip_static_prefix("/", "abcDEF123"), None);
    }

    #[test]
    fn filenames_cannot_break_the_header() {
        assert_eq!(sanitize("plain.txt"), "plain.txt");
        assert_eq!(sanitize("we\"ird\\name\r\n.txt"), "we_ird_name__.txt");
    }
}
