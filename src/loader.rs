//! Script loader: uploads lua sources to the peripheral's filesystem over
//! the control sub-channel and drives app lifecycle.
//!
//! Uploads are a three-phase handshake (open, write chunks, close); the
//! peripheral acknowledges each phase by echoing the printed `nil`. Any other
//! echo rejects the upload - there is no resume, the caller restarts the
//! whole file.

use tracing::{debug, info};

use crate::error::{LinkError, LoaderError};
use crate::link::Link;

/// Printed acknowledgement the peripheral echoes per accepted phase.
const ACK: &str = "nil";

/// Wrapper around each content chunk: `f:write('<chunk>');print(nil)`.
const WRITE_OVERHEAD: usize = "f:write('');print(nil)".len();

/// Upload `content` to `remote_name` on the peripheral, replacing any
/// existing file. Strictly sequential: each chunk waits for its
/// acknowledgement before the next is sent.
pub async fn upload_file(
    link: &Link,
    content: &str,
    remote_name: &str,
) -> Result<(), LoaderError> {
    let budget = link
        .max_lua_payload()
        .checked_sub(WRITE_OVERHEAD)
        .filter(|b| *b > 0)
        .ok_or(LinkError::PayloadTooLong {
            size: WRITE_OVERHEAD + 1,
            max: link.max_lua_payload(),
        })?;

    let open = format!("f=frame.file.open('{remote_name}','w');print(nil)");
    expect_ack(link, &open, remote_name).await?;

    for chunk in escape_chunks(content, budget) {
        let write = format!("f:write('{chunk}');print(nil)");
        expect_ack(link, &write, remote_name).await?;
    }

    expect_ack(link, "f:close();print(nil)", remote_name).await?;
    info!("uploaded {} bytes to '{}'", content.len(), remote_name);
    Ok(())
}

/// Upload a set of `(remote_name, content)` library files in order.
pub async fn upload_stdlib(link: &Link, files: &[(&str, &str)]) -> Result<(), LoaderError> {
    for (remote_name, content) in files {
        upload_file(link, content, remote_name).await?;
    }
    Ok(())
}

/// Start the uploaded app by requiring its module and wait for the ready
/// text it prints on startup.
pub async fn start_app(link: &Link, app_name: &str) -> Result<String, LoaderError> {
    let response = link
        .send_lua(&format!("require('{app_name}')"), true)
        .await?
        .unwrap_or_default();
    debug!("app '{}' ready: {}", app_name, response);
    Ok(response)
}

/// Stop a running app: break its main loop, then reset the runtime so the
/// next upload starts from a clean state.
pub async fn stop_app(link: &Link) -> Result<(), LoaderError> {
    link.send_break_signal().await?;
    link.send_reset_signal().await?;
    Ok(())
}

async fn expect_ack(link: &Link, lua: &str, name: &str) -> Result<(), LoaderError> {
    let response = link.send_lua(lua, true).await?.unwrap_or_default();
    if response != ACK {
        return Err(LoaderError::ChunkRejected { name: name.to_string(), response });
    }
    Ok(())
}

/// Split `content` into lua-escaped chunks of at most `budget` bytes each,
/// never splitting an escape sequence or a utf-8 character.
fn escape_chunks(content: &str, budget: usize) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut chunk = String::new();
    for ch in content.chars() {
        let escaped: String = match ch {
            '\\' => "\\\\".to_string(),
            '\'' => "\\'".to_string(),
            '\n' => "\\n".to_string(),
            '\r' => "\\r".to_string(),
            '\t' => "\\t".to_string(),
            _ => ch.to_string(),
        };
        if chunk.len() + escaped.len() > budget {
            chunks.push(std::mem::take(&mut chunk));
        }
        chunk.push_str(&escaped);
    }
    if !chunk.is_empty() || chunks.is_empty() {
        chunks.push(chunk);
    }
    chunks
}
