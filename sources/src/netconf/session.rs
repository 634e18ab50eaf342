//! NETCONF 1.0 session: `]]>]]>`-delimited XML messages over a byte stream.

use super::NetconfError;
use super::connector::Transport;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

const DELIMITER: &[u8] = b"]]>]]>";
const READ_CHUNK: usize = 8192;

const CLIENT_HELLO: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<hello xmlns="urn:ietf:params:xml:ns:netconf:base:1.0">
  <capabilities>
    <capability>urn:ietf:params:netconf:base:1.0</capability>
  </capabilities>
</hello>"#;

pub struct Session {
    transport: Transport,
    buf: Vec<u8>,
    message_id: u64,
}

impl Session {
    /// Reads the server hello and answers with the client hello.
    pub async fn establish(transport: Transport) -> Result<Self, NetconfError> {
        let mut session = Session {
            transport,
            buf: Vec::new(),
            message_id: 0,
        };

        let hello = session.read_message().await?;
        if !hello.contains("<hello") {
            return Err(NetconfError::Protocol(
                "server did not send a hello message".into(),
            ));
        }
        session.write_message(CLIENT_HELLO).await?;

        Ok(session)
    }

    /// Runs a single RPC and returns the raw `<rpc-reply>` document.
    pub async fn rpc(&mut self, operation: &str) -> Result<String, NetconfError> {
        self.message_id += 1;
        let request = format!(
            r#"<rpc message-id="{}" xmlns="urn:ietf:params:xml:ns:netconf:base:1.0">{operation}</rpc>"#,
            self.message_id
        );
        self.write_message(&request).await?;

        let reply = self.read_message().await?;
        if let Some(message) = rpc_error(&reply) {
            return Err(NetconfError::Rpc(message));
        }
        Ok(reply)
    }

    /// Returns the full configuration in curly-brace text format.
    pub async fn get_configuration_text(&mut self) -> Result<String, NetconfError> {
        let reply = self
            .rpc(r#"<get-configuration format="text"/>"#)
            .await?;
        element_text(&reply, "configuration-text")
            .map(|text| unescape(&text))
            .ok_or_else(|| NetconfError::Protocol("reply has no configuration-text".into()))
    }

    /// Best-effort close; the transport is dropped either way.
    pub async fn close(mut self) {
        if let Err(e) = self.rpc("<close-session/>").await {
            tracing::debug!(error = %e, "NETCONF close-session failed");
        }
    }

    async fn write_message(&mut self, message: &str) -> Result<(), NetconfError> {
        let writer = &mut self.transport.writer;
        writer.write_all(message.as_bytes()).await?;
        writer.write_all(DELIMITER).await?;
        writer.flush().await?;
        Ok(())
    }

    async fn read_message(&mut self) -> Result<String, NetconfError> {
        let mut searched = 0;
        loop {
            if let Some(pos) = find(&self.buf[searched..], DELIMITER) {
                let end = searched + pos;
                let message = String::from_utf8(self.buf[..end].to_vec())
                    .map_err(|e| NetconfError::Protocol(format!("invalid UTF-8 in message: {e}")))?;
                self.buf.drain(..end + DELIMITER.len());
                return Ok(message);
            }
            // The delimiter may straddle two reads.
            searched = self.buf.len().saturating_sub(DELIMITER.len() - 1);

            let mut chunk = [0u8; READ_CHUNK];
            let n = self.transport.reader.read(&mut chunk).await?;
            if n == 0 {
                return Err(match self.transport.diagnostics().await {
                    Some(message) => NetconfError::Ssh(message),
                    None => NetconfError::UnexpectedEof,
                });
            }
            self.buf.extend_from_slice(&chunk[..n]);
        }
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

/// Text content of the first `<name>` element, ignoring attributes and
/// namespace prefixes on the opening tag. Self-closing elements yield "".
fn element_text(document: &str, name: &str) -> Option<String> {
    let mut from = 0;
    let (qualified, content_start, self_closing) = loop {
        let start = from + document[from..].find('<')? + 1;
        let tag_len = document[start..]
            .find(|c: char| c == '>' || c == '/' || c.is_whitespace())
            .unwrap_or(document.len() - start);
        let qualified = &document[start..start + tag_len];
        let local = qualified.rsplit_once(':').map_or(qualified, |(_, local)| local);

        if local == name && !qualified.is_empty() {
            let tag_end = start + document[start..].find('>')?;
            break (qualified, tag_end + 1, document[..tag_end].ends_with('/'));
        }
        from = start;
    };

    if self_closing {
        return Some(String::new());
    }

    let close = format!("</{qualified}>");
    let end = content_start + document[content_start..].find(&close)?;
    Some(document[content_start..end].to_string())
}

fn rpc_error(reply: &str) -> Option<String> {
    let error = element_text(reply, "rpc-error")?;
    let severity = element_text(&error, "error-severity").unwrap_or_default();
    if severity.trim() == "warning" {
        return None;
    }

    let message = element_text(&error, "error-message")
        .map(|m| unescape(m.trim()))
        .unwrap_or_else(|| "unknown error".to_string());
    Some(message)
}

/// Resolves the predefined XML entities and numeric character references.
fn unescape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;

    while let Some(amp) = rest.find('&') {
        out.push_str(&rest[..amp]);
        rest = &rest[amp..];

        let Some(semi) = rest.find(';') else { break };
        let entity = &rest[1..semi];
        let decoded = match entity {
            "lt" => Some('<'),
            "gt" => Some('>'),
            "amp" => Some('&'),
            "quot" => Some('"'),
            "apos" => Some('\''),
            _ => entity
                .strip_prefix("#x")
                .and_then(|hex| u32::from_str_radix(hex, 16).ok())
                .or_else(|| entity.strip_prefix('#').and_then(|dec| dec.parse().ok()))
                .and_then(char::from_u32),
        };

        match decoded {
            Some(c) => {
                out.push(c);
                rest = &rest[semi + 1..];
            }
            None => {
                out.push('&');
                rest = &rest[1..];
            }
        }
    }

    out.push_str(rest);
    out
}
