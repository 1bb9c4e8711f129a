//! Redirect resolver
//!
//! Serves `GET /redirect/<appname>/<entry>[/<path...>]`: looks the app and
//! entry up in the registry and renders an HTML page whose client-side
//! logic sends the visitor either to the container's local port (private
//! network) or to the entry's external redirect host.

use axum::extract::{Path, RawQuery, State};
use axum::http::StatusCode;
use axum::response::Html;
use axum::routing::get;
use axum::Router;
use regex::Regex;
use std::sync::{Arc, OnceLock};
use url::Url;

use crate::registry::Registry;

/// Entry segment that addresses the default entry.
const DEFAULT_ENTRY_SEGMENT: &str = "_";

fn query_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(
            r"^([a-zA-Z0-9_~.%-]+=[a-zA-Z0-9_~.%/-]*(&[a-zA-Z0-9_~.%-]+=[a-zA-Z0-9_~.%/-]*)*)?$",
        )
        .expect("query pattern compiles")
    })
}

/// Validates a query string against the safe `key=value(&key=value)*`
/// language; anything else becomes empty. Idempotent.
pub fn sanitize_query(qs: &str) -> &str {
    if query_pattern().is_match(qs) {
        qs
    } else {
        ""
    }
}

/// Components of a parsed redirect host.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct ParsedRedirect {
    /// scheme + host[:port], or host[:port] when the input had no scheme
    pub base: String,
    /// path component, e.g. `/api/v1`
    pub path: String,
    /// query string without `?`, sanitized
    pub query: String,
}

/// Parses a redirect spec: a full URL or a bare `host[:port][/path][?query]`.
/// A transient scheme is added for bare hosts so the URL parser applies.
pub fn parse_redirect_host(host: &str) -> ParsedRedirect {
    let has_scheme = host.starts_with("http://") || host.starts_with("https://");
    let url_str = if has_scheme {
        host.to_string()
    } else {
        format!("http://{}", host)
    };

    let parsed = match Url::parse(&url_str) {
        Ok(parsed) => parsed,
        Err(_) => {
            // Unparseable: the whole string is the base
            return ParsedRedirect {
                base: host.to_string(),
                ..Default::default()
            };
        }
    };

    let mut host_port = parsed.host_str().unwrap_or_default().to_string();
    if let Some(port) = parsed.port() {
        host_port = format!("{}:{}", host_port, port);
    }

    let base = if has_scheme {
        format!("{}://{}", parsed.scheme(), host_port)
    } else {
        host_port
    };

    // The parser normalizes an absent path to "/"; keep it empty unless the
    // input actually carried one
    let rest = if has_scheme {
        host.splitn(3, '/').nth(2).unwrap_or("")
    } else {
        host
    };
    let path = if rest.contains('/') {
        parsed.path().to_string()
    } else {
        String::new()
    };

    ParsedRedirect {
        base,
        path,
        query: sanitize_query(parsed.query().unwrap_or("")).to_string(),
    }
}

/// Routes served by the redirect resolver.
pub fn router(registry: Arc<Registry>) -> Router {
    Router::new()
        .route("/redirect", get(handle_incomplete))
        .route("/redirect/{appname}", get(handle_incomplete))
        .route("/redirect/{appname}/{entry}", get(handle_redirect))
        .route("/redirect/{appname}/{entry}/{*path}", get(handle_redirect_with_path))
        .with_state(registry)
}

async fn handle_incomplete() -> (StatusCode, Html<String>) {
    error_page(
        StatusCode::BAD_REQUEST,
        "Invalid path format, expected /redirect/<appname>/<entry>[/<path>]",
    )
}

async fn handle_redirect(
    State(registry): State<Arc<Registry>>,
    Path((appname, entry)): Path<(String, String)>,
    RawQuery(query): RawQuery,
) -> (StatusCode, Html<String>) {
    resolve(&registry, &appname, &entry, "/", query.as_deref())
}

async fn handle_redirect_with_path(
    State(registry): State<Arc<Registry>>,
    Path((appname, entry, path)): Path<(String, String, String)>,
    RawQuery(query): RawQuery,
) -> (StatusCode, Html<String>) {
    let path = format!("/{}", path);
    resolve(&registry, &appname, &entry, &path, query.as_deref())
}

fn resolve(
    registry: &Registry,
    appname: &str,
    entry_name: &str,
    path: &str,
    query: Option<&str>,
) -> (StatusCode, Html<String>) {
    let Some(app) = registry.get(appname) else {
        return error_page(StatusCode::NOT_FOUND, &format!("App not found: {}", appname));
    };

    let lookup = if entry_name == DEFAULT_ENTRY_SEGMENT {
        ""
    } else {
        entry_name
    };
    let Some(entry) = app.entry(lookup) else {
        return error_page(
            StatusCode::NOT_FOUND,
            &format!("Entry not found: {}/{}", appname, entry_name),
        );
    };

    if entry.redirect.is_empty() {
        return error_page(
            StatusCode::BAD_REQUEST,
            &format!("Entry {}/{} does not have redirect configured", appname, entry_name),
        );
    }

    let page = render_page(
        &entry.redirect,
        &entry.port,
        path,
        sanitize_query(query.unwrap_or("")),
    );
    (StatusCode::OK, Html(page))
}

fn error_page(status: StatusCode, message: &str) -> (StatusCode, Html<String>) {
    let body = format!(
        "<html><body><h1>Error</h1><p>{}</p></body></html>",
        html_escape(message)
    );
    (status, Html(body))
}

fn html_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

/// Escapes a value for embedding inside a single-quoted JS string literal.
fn js_escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\'' => out.push_str("\\'"),
            '"' => out.push_str("\\\""),
            '<' => out.push_str("\\u003C"),
            '>' => out.push_str("\\u003E"),
            '&' => out.push_str("\\u0026"),
            c if (c as u32) < 0x20 => out.push_str(&format!("\\u{:04X}", c as u32)),
            c => out.push(c),
        }
    }
    out
}

/// Renders the self-detecting redirect page.
fn render_page(redirect_host: &str, container_port: &str, path: &str, query: &str) -> String {
    let parsed = parse_redirect_host(redirect_host);

    PAGE_TEMPLATE
        .replace("{{redirect_base}}", &js_escape(&parsed.base))
        .replace("{{redirect_path}}", &js_escape(&parsed.path))
        .replace("{{redirect_query}}", &js_escape(&parsed.query))
        .replace("{{container_port}}", &js_escape(container_port))
        .replace("{{path}}", &js_escape(path))
        .replace("{{query_string}}", &js_escape(query))
}

const PAGE_TEMPLATE: &str = r#"<!DOCTYPE html>
<html lang="en">
<head>
    <meta charset="UTF-8">
    <meta name="viewport" content="width=device-width, initial-scale=1.0">
    <title>Redirecting...</title>
    <style>
        body {
            font-family: -apple-system, BlinkMacSystemFont, 'Segoe UI', Roboto, sans-serif;
            display: flex;
            justify-content: center;
            align-items: center;
            height: 100vh;
            margin: 0;
            background: linear-gradient(135deg, #667eea 0%, #764ba2 100%);
            color: white;
        }
        .container { text-align: center; padding: 2rem; }
        .spinner {
            width: 50px;
            height: 50px;
            border: 4px solid rgba(255,255,255,0.3);
            border-top-color: white;
            border-radius: 50%;
            animation: spin 1s linear infinite;
            margin: 0 auto 1rem;
        }
        @keyframes spin { to { transform: rotate(360deg); } }
        .status { font-size: 0.9rem; opacity: 0.8; margin-top: 1rem; }
        .error {
            color: #ff6b6b;
            background: rgba(0,0,0,0.2);
            padding: 1rem;
            border-radius: 8px;
            margin-top: 1rem;
            display: none;
        }
    </style>
</head>
<body>
    <div class="container">
        <div class="spinner"></div>
        <h2>Detecting network...</h2>
        <p class="status" id="status">Checking if you're on the local network...</p>
        <div class="error" id="error"></div>
    </div>

    <script>
    (function() {
        // Redirect host components (from config, may include path and query)
        const REDIRECT_BASE = '{{redirect_base}}';
        const REDIRECT_PATH = '{{redirect_path}}';
        const REDIRECT_QUERY = '{{redirect_query}}';
        // Container info
        const CONTAINER_PORT = '{{container_port}}';
        // Request components
        const PATH = '{{path}}';
        const QUERY_STRING = '{{query_string}}';

        const statusEl = document.getElementById('status');
        const errorEl = document.getElementById('error');

        function setStatus(msg) {
            statusEl.textContent = msg;
        }

        function showError(msg) {
            errorEl.textContent = msg;
            errorEl.style.display = 'block';
        }

        function redirectTo(url) {
            setStatus('Redirecting to ' + url + '...');
            window.location.replace(url);
        }

        // Merge two paths: /path1 + /path2 = /path1/path2
        function mergePaths(basePath, extraPath) {
            if (!basePath && !extraPath) return '/';
            if (!basePath) return extraPath;
            if (!extraPath || extraPath === '/') return basePath;
            const base = basePath.endsWith('/') ? basePath.slice(0, -1) : basePath;
            const extra = extraPath.startsWith('/') ? extraPath : '/' + extraPath;
            return base + extra;
        }

        // Merge two query strings: x=1 + y=2 = x=1&y=2
        function mergeQueryStrings(q1, q2) {
            if (!q1 && !q2) return '';
            if (!q1) return q2;
            if (!q2) return q1;
            return q1 + '&' + q2;
        }

        // Build local URL using current hostname with container port
        function buildLocalURL() {
            const hostname = window.location.hostname;
            const protocol = window.location.protocol;
            let url = protocol + '//' + hostname + ':' + CONTAINER_PORT + PATH;
            if (QUERY_STRING) {
                url += '?' + QUERY_STRING;
            }
            return url;
        }

        // Build external URL with path and query merging
        function buildExternalURL() {
            let base = REDIRECT_BASE;
            if (!base.startsWith('http://') && !base.startsWith('https://')) {
                base = window.location.protocol + '//' + base;
            }
            const mergedPath = mergePaths(REDIRECT_PATH, PATH);
            const mergedQuery = mergeQueryStrings(REDIRECT_QUERY, QUERY_STRING);

            let url = base + mergedPath;
            if (mergedQuery) {
                url += '?' + mergedQuery;
            }
            return url;
        }

        // Check if an IPv4 address is in a private range
        function isPrivateIP(ip) {
            if (ip.startsWith('10.')) return true;
            if (ip.startsWith('172.')) {
                const second = parseInt(ip.split('.')[1], 10);
                if (second >= 16 && second <= 31) return true;
            }
            if (ip.startsWith('192.168.')) return true;
            if (ip === '127.0.0.1' || ip === 'localhost') return true;
            return false;
        }

        // Classify the current hostname as local or external
        function isLocalHostname() {
            const hostname = window.location.hostname;

            const ipv4Pattern = /^(\d{1,3}\.){3}\d{1,3}$/;
            if (ipv4Pattern.test(hostname)) {
                return isPrivateIP(hostname);
            }

            if (hostname === 'localhost' || hostname === '127.0.0.1') {
                return true;
            }

            // .local domain (mDNS)
            if (hostname.endsWith('.local')) {
                return true;
            }

            // No TLD: likely an internal hostname
            if (!hostname.includes('.')) {
                return true;
            }

            return false;
        }

        // Probe the container's local port
        async function checkLocalAccess() {
            const localURL = buildLocalURL();
            setStatus('Testing local connection...');

            try {
                const controller = new AbortController();
                const timeoutId = setTimeout(() => controller.abort(), 3000);

                await fetch(localURL, {
                    method: 'HEAD',
                    mode: 'no-cors',
                    signal: controller.signal
                });

                clearTimeout(timeoutId);
                return true;
            } catch (err) {
                return false;
            }
        }

        async function main() {
            if (isLocalHostname()) {
                setStatus('Local network detected, verifying access...');

                const localAccessible = await checkLocalAccess();

                if (localAccessible || isLocalHostname()) {
                    redirectTo(buildLocalURL());
                    return;
                }
            }

            setStatus('External network detected');
            redirectTo(buildExternalURL());
        }

        main().catch(function(err) {
            showError('Detection failed: ' + err.message + '. Redirecting to external host...');
            setTimeout(function() {
                redirectTo(buildExternalURL());
            }, 2000);
        });
    })();
    </script>
</body>
</html>
"#;
