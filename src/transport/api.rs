use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;

use super::FootageStore;

pub const DEFAULT_API_URL: &str = "http://127.0.0.1:5001/api";

#[derive(Debug, Deserialize)]
struct IdResponse {
    id: i64,
}

/// JSON-over-HTTP footage catalogue.
///
/// `POST {base}/insert_footage` and `POST {base}/insert_event`; both answer
/// with `{"id": <n>}`.
pub struct HttpFootageStore {
    base_url: String,
    agent: ureq::Agent,
}

impl HttpFootageStore {
    pub fn new(base_url: &str, timeout: Duration) -> Self {
        let agent = ureq::AgentBuilder::new().timeout(timeout).build();
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            agent,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn post(&self, endpoint: &str, body: serde_json::Value) -> Result<i64> {
        let url = format!("{}/{}", self.base_url, endpoint);
        let response = self
            .agent
            .post(&url)
            .send_json(body)
            .map_err(|err| anyhow!("POST {url} failed: {err}"))?;
        let parsed: IdResponse = response
            .into_json()
            .with_context(|| format!("invalid response from {url}"))?;
        Ok(parsed.id)
    }
}

impl FootageStore for HttpFootageStore {
    fn insert_footage(&self, file_path: &str, duration: f64) -> Result<i64> {
        let id = self.post(
            "insert_footage",
            json!({ "file_path": file_path, "duration": duration }),
        )?;
        log::info!("stored footage {file_path} as id {id}");
        Ok(id)
    }

    fn insert_event(&self, event_type: &str, title: &str, footage_id: i64) -> Result<i64> {
        let id = self.post(
            "insert_event",
            json!({ "event_type": event_type, "title": title, "footage_id": footage_id }),
        )?;
        log::info!("stored event {id} for footage {footage_id}");
        Ok(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{BufRead, BufReader, Read, Write};
    use std::net::TcpListener;
    use std::thread;

    /// Serve one request with `body`, returning what was received.
    fn serve_once(status: &str, body: &'static str) -> Result<(String, thread::JoinHandle<String>)> {
        let listener = TcpListener::bind("127.0.0.1:0")?;
        let url = format!("http://{}/api", listener.local_addr()?);
        let status = status.to_string();
        let handle = thread::spawn(move || {
            let Ok((stream, _)) = listener.accept() else {
                return String::new();
            };
            let mut reader = BufReader::new(stream);
            let mut head = String::new();
            let mut content_length = 0usize;
            loop {
                let mut line = String::new();
                if reader.read_line(&mut line).unwrap_or(0) == 0 || line == "\r\n" {
                    break;
                }
                if let Some(v) = line.to_ascii_lowercase().strip_prefix("content-length:") {
                    content_length = v.trim().parse().unwrap_or(0);
                }
                head.push_str(&line);
            }
            let mut payload = vec![0u8; content_length];
            let _ = reader.read_exact(&mut payload);
            let response = format!(
                "HTTP/1.1 {status}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                body.len()
            );
            let _ = reader.get_mut().write_all(response.as_bytes());
            head + &String::from_utf8_lossy(&payload)
        });
        Ok((url, handle))
    }

    #[test]
    fn insert_footage_posts_json_and_reads_id() -> Result<()> {
        let (url, server) = serve_once("200 OK", r#"{"id": 17}"#)?;
        let store = HttpFootageStore::new(&url, Duration::from_secs(5));
        let id = store.insert_footage("clip_r.mp4", 4.5)?;
        assert_eq!(id, 17);
        let request = server.join().map_err(|_| anyhow!("server panicked"))?;
        assert!(request.starts_with("POST /api/insert_footage"));
        assert!(request.contains(r#""file_path":"clip_r.mp4""#));
        Ok(())
    }

    #[test]
    fn error_status_is_an_error() -> Result<()> {
        let (url, server) = serve_once("500 Internal Server Error", r#"{"error": "x"}"#)?;
        let store = HttpFootageStore::new(&url, Duration::from_secs(5));
        assert!(store.insert_event("Person Detected", "Footage ID 1", 1).is_err());
        let _ = server.join();
        Ok(())
    }
}
