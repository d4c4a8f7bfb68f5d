//! JSON response boundary.
//!
//! Bodies are serialized into a buffer before anything is written, so a
//! serialization failure never leaves a truncated payload on the wire.

use anyhow::Result;
use serde::Serialize;
use std::io::Write;

pub const JSON_CONTENT_TYPE: &str = "application/json; charset=UTF-8";

/// Fixed headers for every JSON response. Dynamic admin data must never be cached.
pub const NO_CACHE_HEADERS: [(&str, &str); 4] = [
    ("Content-Type", JSON_CONTENT_TYPE),
    ("Expires", "Mon, 26 Jul 1997 05:00:00 GMT"),
    ("Cache-Control", "no-cache, must-revalidate"),
    ("Pragma", "no-cache"),
];

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct JsonResponse {
    pub status: u16,
    pub body: Vec<u8>,
}

impl JsonResponse {
    pub fn from_value<T: Serialize + ?Sized>(value: &T) -> Result<Self> {
        Self::with_status(200, value)
    }

    pub fn with_status<T: Serialize + ?Sized>(status: u16, value: &T) -> Result<Self> {
        let body = serde_json::to_vec(value)?;
        Ok(Self { status, body })
    }

    pub fn error(status: u16, code: &str) -> Self {
        Self {
            status,
            body: serde_json::json!({ "error": code }).to_string().into_bytes(),
        }
    }

    pub fn headers(&self) -> impl Iterator<Item = (&'static str, &'static str)> {
        NO_CACHE_HEADERS.iter().copied()
    }

    pub fn body_str(&self) -> &str {
        std::str::from_utf8(&self.body).unwrap_or("")
    }

    /// Write as an HTTP/1.1 response. The full response is assembled first and
    /// written in one call.
    pub fn write_to<W: Write>(&self, out: &mut W) -> Result<()> {
        let mut head = format!("{}\r\n", status_line(self.status));
        for (name, value) in self.headers() {
            head.push_str(&format!("{name}: {value}\r\n"));
        }
        head.push_str(&format!("Content-Length: {}\r\n\r\n", self.body.len()));

        let mut response = head.into_bytes();
        response.extend_from_slice(&self.body);
        out.write_all(&response)?;
        out.flush()?;
        Ok(())
    }
}

fn status_line(status: u16) -> &'static str {
    match status {
        200 => "HTTP/1.1 200 OK",
        400 => "HTTP/1.1 400 Bad Request",
        401 => "HTTP/1.1 401 Unauthorized",
        403 => "HTTP/1.1 403 Forbidden",
        404 => "HTTP/1.1 404 Not Found",
        405 => "HTTP/1.1 405 Method Not Allowed",
        413 => "HTTP/1.1 413 Payload Too Large",
        _ => "HTTP/1.1 500 Internal Server Error",
    }
}
