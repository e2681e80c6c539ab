//! Minimal web surface.
//!
//! Three routes, handled sequentially on the server thread:
//!
//! - `GET /` — dashboard page embedding the two charts. Viewing the page
//!   triggers a staleness-gated chart refresh first, so a visitor never sees
//!   charts older than the configured age (fail-soft: a failed refresh shows
//!   the previous charts).
//! - `GET /data` — JSON snapshot of the latest-reading cache. No side
//!   effects, no log read, never blocks on the ingestion lock.
//! - `GET /static/<chart>.png` — the raster artifacts (404 until the first
//!   successful regeneration).
//!
//! Nothing here mutates the log.

use crate::chart::{ChartRefresher, CLIMATE_CHART, SOIL_CHART};
use crate::config::HttpSettings;
use crate::error::{Result, StationError};
use crate::store::LatestHandle;
use log::{info, warn};
use std::fs::File;
use std::io;
use std::sync::{Arc, PoisonError};
use tiny_http::{Header, Method, Response, Server};

fn content_type(value: &'static str) -> Option<Header> {
    Header::from_bytes(&b"Content-Type"[..], value.as_bytes()).ok()
}

/// Path component of a request URL. Browsers and the old dashboard habitually
/// append query strings (`/?refresh=1`); routing ignores them.
fn path_of(url: &str) -> &str {
    url.split('?').next().unwrap_or(url)
}

fn page_html() -> String {
    format!(
        "<!DOCTYPE html>\n\
         <html>\n\
         <head>\n\
           <title>Garden Station</title>\n\
           <meta http-equiv=\"refresh\" content=\"300\">\n\
         </head>\n\
         <body>\n\
           <h1>Garden Station</h1>\n\
           <h2>Daily Average Soil Moisture</h2>\n\
           <img src=\"/static/{SOIL_CHART}\" alt=\"Soil moisture chart\">\n\
           <h2>Daily Average Temperature &amp; Humidity</h2>\n\
           <img src=\"/static/{CLIMATE_CHART}\" alt=\"Temperature and humidity chart\">\n\
         </body>\n\
         </html>\n"
    )
}

/// Serve the dashboard until process termination. Returns only if the
/// listener cannot be bound.
pub fn serve(
    settings: &HttpSettings,
    latest: LatestHandle,
    refresher: Arc<ChartRefresher>,
) -> Result<()> {
    let server = Server::http(&settings.bind)
        .map_err(|e| StationError::Io(io::Error::new(io::ErrorKind::Other, e.to_string())))?;
    info!("web surface listening on {}", settings.bind);

    for request in server.incoming_requests() {
        if *request.method() != Method::Get {
            respond(request, Response::from_string("method not allowed").with_status_code(405));
            continue;
        }
        let path = path_of(request.url()).to_string();
        match path.as_str() {
            "/" => {
                refresher.refresh_if_stale();
                let mut response = Response::from_string(page_html());
                if let Some(h) = content_type("text/html; charset=utf-8") {
                    response.add_header(h);
                }
                respond(request, response);
            }
            "/data" => {
                let snapshot = *latest.read().unwrap_or_else(PoisonError::into_inner);
                let body = serde_json::to_string(&snapshot)
                    .unwrap_or_else(|_| "{}".to_string());
                let mut response = Response::from_string(body);
                if let Some(h) = content_type("application/json") {
                    response.add_header(h);
                }
                respond(request, response);
            }
            path if path == format!("/static/{SOIL_CHART}") => {
                respond_chart(request, refresher.soil_chart_path());
            }
            path if path == format!("/static/{CLIMATE_CHART}") => {
                respond_chart(request, refresher.climate_chart_path());
            }
            _ => {
                respond(request, Response::from_string("not found").with_status_code(404));
            }
        }
    }
    Ok(())
}

fn respond_chart(request: tiny_http::Request, path: std::path::PathBuf) {
    match File::open(&path) {
        Ok(file) => {
            let mut response = Response::from_file(file);
            if let Some(h) = content_type("image/png") {
                response.add_header(h);
            }
            if let Err(e) = request.respond(response) {
                warn!("failed to send chart: {e}");
            }
        }
        Err(_) => {
            // No chart yet; first run before any successful commit.
            respond(
                request,
                Response::from_string("chart not generated yet").with_status_code(404),
            );
        }
    }
}

fn respond<R: io::Read>(request: tiny_http::Request, response: Response<R>) {
    if let Err(e) = request.respond(response) {
        warn!("failed to send response: {e}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn routing_ignores_query_strings() {
        assert_eq!(path_of("/?refresh=1"), "/");
        assert_eq!(path_of("/data?x=1&y=2"), "/data");
        assert_eq!(path_of("/"), "/");
        assert_eq!(
            path_of("/static/soil_moisture_graph.png"),
            "/static/soil_moisture_graph.png"
        );
    }

    #[test]
    fn page_references_both_charts() {
        let html = page_html();
        assert!(html.contains("/static/soil_moisture_graph.png"));
        assert!(html.contains("/static/temp_humidity_graph.png"));
    }

    #[test]
    fn data_snapshot_serializes_to_expected_keys() {
        let snapshot = crate::store::LatestReading {
            soil_moisture: 42,
            temperature: 21.5,
            humidity: 60.0,
        };
        let json = serde_json::to_string(&snapshot).unwrap();
        assert!(json.contains("\"soil_moisture\":42"));
        assert!(json.contains("\"temperature\":21.5"));
        assert!(json.contains("\"humidity\":60.0"));
    }
}
