/// Native-messaging framing: a 4-byte length in native byte order followed
/// by that many bytes of UTF-8 JSON.
use anyhow::{bail, Context, Result};
use serde::{de::DeserializeOwned, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Largest frame the browser may send us.
pub const MAX_INBOUND_FRAME: usize = 64 * 1024 * 1024;
/// Largest frame the browser accepts from a native host.
pub const MAX_OUTBOUND_FRAME: usize = 1024 * 1024;

/// Reads one frame. `Ok(None)` on a clean EOF before the length prefix.
pub async fn read_frame<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Option<Vec<u8>>> {
    let mut prefix = [0u8; 4];
    let mut filled = 0;
    while filled < prefix.len() {
        let n = reader
            .read(&mut prefix[filled..])
            .await
            .context("Failed to read frame length")?;
        if n == 0 {
            if filled == 0 {
                return Ok(None);
            }
            bail!("Truncated frame length: got {filled} of 4 bytes");
        }
        filled += n;
    }

    let len = u32::from_ne_bytes(prefix) as usize;
    if len > MAX_INBOUND_FRAME {
        bail!("Inbound frame of {len} bytes exceeds {MAX_INBOUND_FRAME}");
    }

    let mut body = vec![0u8; len];
    reader
        .read_exact(&mut body)
        .await
        .with_context(|| format!("Truncated frame: expected {len} bytes"))?;
    Ok(Some(body))
}

/// Writes `body` as one frame and flushes.
pub async fn write_frame<W: AsyncWrite + Unpin>(writer: &mut W, body: &[u8]) -> Result<()> {
    if body.len() > MAX_OUTBOUND_FRAME {
        bail!("Outbound frame of {} bytes exceeds {MAX_OUTBOUND_FRAME}", body.len());
    }
    let len = u32::try_from(body.len()).context("Frame length does not fit in u32")?;
    writer.write_all(&len.to_ne_bytes()).await?;
    writer.write_all(body).await?;
    writer.flush().await?;
    Ok(())
}

pub async fn read_json<R, T>(reader: &mut R) -> Result<Option<T>>
where
    R: AsyncRead + Unpin,
    T: DeserializeOwned,
{
    match read_frame(reader).await? {
        Some(body) => Ok(Some(serde_json::from_slice(&body).context("Malformed JSON frame")?)),
        None => Ok(None),
    }
}

pub async fn write_json<W, T>(writer: &mut W, value: &T) -> Result<()>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let body = serde_json::to_vec(value)?;
    write_frame(writer, &body).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};

    #[tokio::test]
    async fn frame_has_native_endian_length_prefix() {
        let mut out = Vec::new();
        write_frame(&mut out, b"{}").await.unwrap();
        assert_eq!(&out[..4], &2u32.to_ne_bytes());
        assert_eq!(&out[4..], b"{}");
    }

    #[tokio::test]
    async fn reads_back_consecutive_frames() {
        let mut out = Vec::new();
        write_json(&mut out, &json!({ "a": 1 })).await.unwrap();
        write_json(&mut out, &json!([true])).await.unwrap();

        let mut input = out.as_slice();
        let first: Value = read_json(&mut input).await.unwrap().unwrap();
        let second: Value = read_json(&mut input).await.unwrap().unwrap();
        assert_eq!(first, json!({ "a": 1 }));
        assert_eq!(second, json!([true]));
        assert!(read_frame(&mut input).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn empty_input_is_clean_eof() {
        let mut input: &[u8] = &[];
        assert!(read_frame(&mut input).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn partial_length_prefix_is_an_error() {
        for len in 1..4 {
            let bytes = [7u8, 0, 0];
            let mut input = &bytes[..len];
            let err = read_frame(&mut input).await.unwrap_err();
            assert!(format!("{err:#}").contains("Truncated frame length"), "{len} bytes");
        }
    }

    #[tokio::test]
    async fn truncated_body_is_an_error() {
        let mut bytes = 10u32.to_ne_bytes().to_vec();
        bytes.extend_from_slice(b"abc");
        let mut input = bytes.as_slice();
        assert!(read_frame(&mut input).await.is_err());
    }

    #[tokio::test]
    async fn oversized_inbound_length_is_rejected() {
        let bytes = (MAX_INBOUND_FRAME as u32 + 1).to_ne_bytes();
        let mut input = &bytes[..];
        assert!(read_frame(&mut input).await.is_err());
    }

    #[tokio::test]
    async fn oversized_outbound_frame_is_rejected() {
        let mut out = Vec::new();
        let body = vec![b' '; MAX_OUTBOUND_FRAME + 1];
        assert!(write_frame(&mut out, &body).await.is_err());
        assert!(out.is_empty());
    }
}
