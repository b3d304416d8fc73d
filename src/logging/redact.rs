//! Secret masking for log output.
//!
//! The Bot API puts the bot token in every request URL, so any transport
//! error or debug line can leak it. Everything written by the tracing layer
//! passes through [`RedactingMakeWriter`].

use regex::Regex;
use std::io::{self, Write};
use std::sync::LazyLock;
use tracing_subscriber::fmt::MakeWriter;

const REDACTED: &str = "[REDACTED]";

/// `<bot id>:<secret>` as issued by BotFather.
static RE_BOT_TOKEN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b\d{5,}:[A-Za-z0-9_-]{30,}").expect("failed to compile regex: bot_token")
});

/// `/bot<id>:<secret>/` path segment of a Bot API URL, whatever the token length.
static RE_BOT_URL_SEGMENT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"/bot\d+:[A-Za-z0-9_-]+/").expect("failed to compile regex: bot_url_segment")
});

static RE_BEARER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"Bearer [a-zA-Z0-9._\-]+").expect("failed to compile regex: bearer")
});

pub struct RedactingWriter<W: Write> {
    inner: W,
    buffer: Vec<u8>,
}

const MAX_BUFFER_BYTES: usize = 8192;

impl<W: Write> RedactingWriter<W> {
    pub fn new(inner: W) -> Self {
        Self {
            inner,
            buffer: Vec::new(),
        }
    }

    fn write_redacted(&mut self, line: &[u8]) -> io::Result<()> {
        let text = String::from_utf8_lossy(line);
        self.inner.write_all(redact_string(&text).as_bytes())
    }

    fn flush_buffer(&mut self) -> io::Result<()> {
        if self.buffer.is_empty() {
            return Ok(());
        }
        let pending = std::mem::take(&mut self.buffer);
        self.write_redacted(&pending)
    }
}

impl<W: Write> Write for RedactingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }

        self.buffer.extend_from_slice(buf);
        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            self.write_redacted(&line[..line.len() - 1])?;
            self.inner.write_all(b"\n")?;
        }
        if self.buffer.len() > MAX_BUFFER_BYTES {
            self.flush_buffer()?;
        }

        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.flush_buffer()?;
        self.inner.flush()
    }
}

impl<W: Write> Drop for RedactingWriter<W> {
    fn drop(&mut self) {
        let _ = self.flush_buffer();
        let _ = self.inner.flush();
    }
}

pub struct RedactingMakeWriter<M> {
    inner: M,
}

impl<M> RedactingMakeWriter<M> {
    pub fn new(inner: M) -> Self {
        Self { inner }
    }
}

impl<'a, M> MakeWriter<'a> for RedactingMakeWriter<M>
where
    M: MakeWriter<'a>,
    M::Writer: Write,
{
    type Writer = RedactingWriter<M::Writer>;

    fn make_writer(&'a self) -> Self::Writer {
        RedactingWriter::new(self.inner.make_writer())
    }
}

pub fn redact_string(input: &str) -> String {
    if input.is_empty() {
        return String::new();
    }

    let mut result = RE_BOT_URL_SEGMENT
        .replace_all(input, format!("/bot{REDACTED}/").as_str())
        .into_owned();
    result = RE_BOT_TOKEN.replace_all(&result, REDACTED).into_owned();
    result = RE_BEARER.replace_all(&result, REDACTED).into_owned();
    result
}

/// Display wrapper that redacts the wrapped value's text.
pub struct RedactedDisplay<T: std::fmt::Display>(pub T);

impl<T: std::fmt::Display> std::fmt::Display for RedactedDisplay<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&redact_string(&self.0.to_string()))
    }
}
