#![cfg_attr(not(target_os = "none"), allow(dead_code))]

//! HTTP/1.1 framing around the command routes.

use core::fmt::Write as _;

use heapless::String;
use heatpump_core::command::{CommandError, Reply};

pub const HTTP_PORT: u16 = 80;
/// Only the request line matters; headers past this are never read.
pub const MAX_REQUEST_LEN: usize = 512;
pub const HEAD_CAPACITY: usize = 192;

/// Response as sent on the wire.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum HttpResponse<'a> {
    SeeOther(&'static str),
    Json(&'a [u8]),
    Error(u16, &'static str),
}

impl<'a> HttpResponse<'a> {
    pub fn from_reply(reply: &'a Reply) -> Self {
        match reply {
            Reply::Redirect { location } => HttpResponse::SeeOther(*location),
            Reply::Json(body) => HttpResponse::Json(body.as_slice()),
            Reply::Unavailable => HttpResponse::Error(500, "Internal Server Error"),
        }
    }

    pub const fn from_error(error: CommandError) -> Self {
        match error {
            CommandError::NotFound => HttpResponse::Error(404, "Not Found"),
            CommandError::MethodNotAllowed => HttpResponse::Error(405, "Method Not Allowed"),
            CommandError::Malformed => HttpResponse::Error(400, "Bad Request"),
        }
    }

    pub const fn status(&self) -> u16 {
        match *self {
            HttpResponse::SeeOther(_) => 303,
            HttpResponse::Json(_) => 200,
            HttpResponse::Error(code, _) => code,
        }
    }

    /// Body bytes following the head.
    pub fn body(&self) -> &'a [u8] {
        match *self {
            HttpResponse::SeeOther(_) => &[],
            HttpResponse::Json(body) => body,
            HttpResponse::Error(_, reason) => reason.as_bytes(),
        }
    }

    /// Status line and headers, terminated by the blank line.
    pub fn head(&self) -> Result<String<HEAD_CAPACITY>, core::fmt::Error> {
        let mut head = String::new();
        let body = self.body();
        match *self {
            HttpResponse::SeeOther(location) => write!(
                head,
                "HTTP/1.1 303 See Other\r\nLocation: {location}\r\n"
            )?,
            HttpResponse::Json(_) => write!(
                head,
                "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\n"
            )?,
            HttpResponse::Error(code, reason) => write!(
                head,
                "HTTP/1.1 {code} {reason}\r\nContent-Type: text/plain\r\n"
            )?,
        }
        write!(
            head,
            "Connection: close\r\nContent-Length: {}\r\n\r\n",
            body.len()
        )?;
        Ok(head)
    }
}

/// Returns the request line once its terminator has arrived.
pub fn request_line(received: &[u8]) -> Option<Result<&str, CommandError>> {
    let end = received.windows(2).position(|pair| pair == b"\r\n")?;
    Some(core::str::from_utf8(&received[..end]).map_err(|_| CommandError::Malformed))
}
