//! CGI shim
//!
//! When the binary is invoked as a CGI program (symlinked as an app's
//! `index.cgi`), it proxies one GET request to the daemon's Unix socket
//! and translates the HTTP response into CGI output on stdout. The request
//! path is everything after `index.cgi/` in `PATH_INFO`.

use std::path::Path;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::UnixStream;

/// Runs one CGI request/response cycle against the daemon socket.
pub async fn run(socket_path: &Path) {
    let path_info = std::env::var("PATH_INFO").unwrap_or_default();
    if path_info.is_empty() {
        output_error(400, "PATH_INFO not set");
        return;
    }

    // "/cgi/ThirdParty/app/index.cgi/redirect/x/y" -> "/redirect/x/y"
    let Some(idx) = path_info.find("index.cgi/") else {
        output_error(400, "Invalid CGI path format");
        return;
    };
    let mut request_path = format!("/{}", &path_info[idx + "index.cgi/".len()..]);

    let query_string = std::env::var("QUERY_STRING").unwrap_or_default();
    if !query_string.is_empty() {
        request_path = format!("{}?{}", request_path, query_string);
    }

    let host = std::env::var("HTTP_HOST").unwrap_or_else(|_| "localhost".to_string());

    match proxy_request(socket_path, &request_path, &host).await {
        Ok(response) => emit_response(&response),
        Err(_) => output_service_unavailable(),
    }
}

/// Sends one `Connection: close` GET over the Unix socket and reads the
/// whole response.
async fn proxy_request(
    socket_path: &Path,
    request_path: &str,
    host: &str,
) -> std::io::Result<Vec<u8>> {
    let mut stream = UnixStream::connect(socket_path).await?;

    let request = format!(
        "GET {} HTTP/1.1\r\nHost: {}\r\nConnection: close\r\n\r\n",
        request_path, host
    );
    stream.write_all(request.as_bytes()).await?;

    let mut response = Vec::new();
    stream.read_to_end(&mut response).await?;
    Ok(response)
}

/// Translates a raw HTTP response into CGI output: headers, a `Status`
/// line, a blank line, then the body.
fn emit_response(response: &[u8]) {
    let Some(header_end) = find_header_end(response) else {
        output_error(502, "Malformed response from daemon");
        return;
    };

    let head = String::from_utf8_lossy(&response[..header_end]);
    let body = &response[header_end + 4..];

    let mut lines = head.split("\r\n");
    let status_line = lines.next().unwrap_or_default();
    // "HTTP/1.1 200 OK" -> "200 OK"
    let status = status_line
        .splitn(2, ' ')
        .nth(1)
        .unwrap_or("502 Bad Gateway");

    for line in lines {
        if line.is_empty() {
            continue;
        }
        // Hop-by-hop framing headers make no sense in CGI output
        let lower = line.to_ascii_lowercase();
        if lower.starts_with("connection:") || lower.starts_with("transfer-encoding:") {
            continue;
        }
        println!("{}", line);
    }
    println!("Status: {}", status);
    println!();

    use std::io::Write;
    let stdout = std::io::stdout();
    let _ = stdout.lock().write_all(body);
}

fn find_header_end(response: &[u8]) -> Option<usize> {
    response.windows(4).position(|w| w == b"\r\n\r\n")
}

fn output_error(status: u16, msg: &str) {
    println!("Content-Type: text/html; charset=utf-8");
    println!("Status: {}", status);
    println!();
    println!("<html><body><h1>Error</h1><p>{}</p></body></html>", msg);
}

fn output_service_unavailable() {
    println!("Content-Type: text/html; charset=utf-8");
    println!("Status: 503 Service Unavailable");
    println!();
    println!(
        r#"<!DOCTYPE html>
<html>
<head>
    <title>Service Unavailable</title>
    <style>
        body {{
            font-family: -apple-system, BlinkMacSystemFont, 'Segoe UI', Roboto, sans-serif;
            display: flex;
            justify-content: center;
            align-items: center;
            height: 100vh;
            margin: 0;
            background: #f5f5f5;
            color: #333;
        }}
        .container {{
            text-align: center;
            padding: 2rem;
            background: white;
            border-radius: 8px;
            box-shadow: 0 2px 10px rgba(0,0,0,0.1);
        }}
        h1 {{ color: #e74c3c; }}
    </style>
</head>
<body>
    <div class="container">
        <h1>Service Unavailable</h1>
        <p>The WatchCow service is not running.</p>
        <p>Please ensure the WatchCow daemon is started.</p>
    </div>
</body>
</html>"#
    );
}
