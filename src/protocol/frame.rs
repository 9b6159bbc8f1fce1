//! Length-prefixed framing: `MSG|<ascii decimal length>\n<body>`.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::{CorralError, Result};

/// Magic prefix every frame starts with.
pub const FRAME_MAGIC: &[u8; 4] = b"MSG|";

/// Largest body a reader accepts. Longer declarations are malformed.
pub const MAX_FRAME_LEN: usize = 64 * 1024 * 1024;

// u32::MAX has 10 digits; anything longer cannot be a valid length.
const MAX_LENGTH_DIGITS: usize = 10;

/// Header bytes for a body of `len` bytes.
pub fn frame_header(len: usize) -> Vec<u8> {
    let mut header = Vec::with_capacity(FRAME_MAGIC.len() + MAX_LENGTH_DIGITS + 1);
    header.extend_from_slice(FRAME_MAGIC);
    header.extend_from_slice(len.to_string().as_bytes());
    header.push(b'\n');
    header
}

/// Write one frame. Callers sharing a writer must hold a lock across this call
/// so header and body are never interleaved with another frame.
pub async fn write_frame<W>(writer: &mut W, body: &[u8]) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    if body.len() > MAX_FRAME_LEN {
        return Err(CorralError::FrameTooLarge(body.len()));
    }
    writer.write_all(&frame_header(body.len())).await?;
    writer.write_all(body).await?;
    writer.flush().await?;
    Ok(())
}

/// Read one frame and return its body.
///
/// Blocks until a complete frame arrived; wrap in `tokio::time::timeout` to
/// bound the wait.
pub async fn read_frame<R>(reader: &mut R) -> Result<Vec<u8>>
where
    R: AsyncRead + Unpin,
{
    let mut magic = [0u8; 4];
    read_exact_or_closed(reader, &mut magic).await?;
    if &magic != FRAME_MAGIC {
        return Err(CorralError::MalformedMessage(format!(
            "expected frame prefix {:?}, got {:?}",
            String::from_utf8_lossy(FRAME_MAGIC),
            String::from_utf8_lossy(&magic)
        )));
    }

    let len = read_length(reader).await?;
    let mut body = vec![0u8; len];
    read_exact_or_closed(reader, &mut body).await?;
    Ok(body)
}

async fn read_length<R>(reader: &mut R) -> Result<usize>
where
    R: AsyncRead + Unpin,
{
    let mut digits = Vec::with_capacity(MAX_LENGTH_DIGITS);
    loop {
        let mut byte = [0u8; 1];
        read_exact_or_closed(reader, &mut byte).await?;
        if byte[0] == b'\n' {
            break;
        }
        if digits.len() == MAX_LENGTH_DIGITS {
            return Err(CorralError::MalformedMessage(
                "frame length field is too long".to_string(),
            ));
        }
        digits.push(byte[0]);
    }

    parse_length(&digits)
}

fn parse_length(digits: &[u8]) -> Result<usize> {
    if digits.is_empty() || !digits.iter().all(u8::is_ascii_digit) {
        return Err(CorralError::MalformedMessage(format!(
            "frame length {:?} is not a decimal number",
            String::from_utf8_lossy(digits)
        )));
    }
    // All ASCII digits, so this is valid UTF-8.
    let text = std::str::from_utf8(digits)
        .map_err(|e| CorralError::MalformedMessage(e.to_string()))?;
    let len: usize = text.parse().map_err(|_| {
        CorralError::MalformedMessage(format!("frame length {} overflows", text))
    })?;
    if len > MAX_FRAME_LEN {
        return Err(CorralError::MalformedMessage(format!(
            "frame length {} exceeds the {} byte limit",
            len, MAX_FRAME_LEN
        )));
    }
    Ok(len)
}

async fn read_exact_or_closed<R>(reader: &mut R, buf: &mut [u8]) -> Result<()>
where
    R: AsyncRead + Unpin,
{
    match reader.read_exact(buf).await {
        Ok(_) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
            Err(CorralError::ConnectionClosed)
        }
        Err(e) => Err(e.into()),
    }
}
