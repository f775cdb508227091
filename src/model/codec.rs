//! Codec for the node's opaque track ids.
//!
//! A track id is base64 over a big-endian message:
//!
//! ```text
//! i32  header      (flags << 30) | payload size
//! u8   version     only when the "versioned" flag is set, otherwise 1
//! utf  title
//! utf  author
//! i64  length (ms)
//! utf  identifier
//! bool is_stream
//! ?utf uri                      (version >= 2)
//! ?utf artwork_url, ?utf isrc   (version >= 3)
//! utf  source_name
//! ...  source specific bytes
//! i64  position (ms)
//! ```
//!
//! `utf` is a `u16` length followed by UTF-8 bytes; `?utf` is a `bool`
//! presence flag followed by an `utf` when present.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use bytes::{Buf, BufMut, BytesMut};
use thiserror::Error;

use super::track::TrackInfo;

const TRACK_INFO_VERSIONED: u32 = 1;
const CURRENT_VERSION: u8 = 3;
const SIZE_MASK: u32 = 0x3FFF_FFFF;

/// Error al decodificar un track id persistido
#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("El track id está vacío")]
    Empty,

    #[error("Base64 inválido en el track id: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("El track id está truncado")]
    Truncated,

    #[error("El track id contiene UTF-8 inválido")]
    InvalidUtf8,

    #[error("Versión de track no soportada: {0}")]
    UnsupportedVersion(u8),
}

/// Codifica la información de un track en un track id (versión 3)
pub fn encode(info: &TrackInfo) -> String {
    let mut body = BytesMut::new();
    body.put_u8(CURRENT_VERSION);
    put_utf(&mut body, &info.title);
    put_utf(&mut body, &info.author);
    body.put_i64(clamp_i64(info.length_ms));
    put_utf(&mut body, &info.identifier);
    body.put_u8(u8::from(info.is_stream));
    put_nullable_utf(&mut body, info.uri.as_deref());
    put_nullable_utf(&mut body, info.artwork_url.as_deref());
    put_nullable_utf(&mut body, info.isrc.as_deref());
    put_utf(&mut body, &info.source_name);
    body.put_i64(clamp_i64(info.position_ms));

    let mut message = BytesMut::with_capacity(body.len() + 4);
    message.put_u32((TRACK_INFO_VERSIONED << 30) | (body.len() as u32 & SIZE_MASK));
    message.extend_from_slice(&body);

    STANDARD.encode(&message)
}

/// Decodifica un track id (versiones 1 a 3)
pub fn decode(track_id: &str) -> Result<TrackInfo, DecodeError> {
    let trimmed = track_id.trim();
    if trimmed.is_empty() {
        return Err(DecodeError::Empty);
    }

    let raw = STANDARD.decode(trimmed)?;
    let mut message = raw.as_slice();

    let header = get_u32(&mut message)?;
    let flags = header >> 30;
    let size = (header & SIZE_MASK) as usize;
    if message.remaining() < size {
        return Err(DecodeError::Truncated);
    }
    let mut body = &message[..size];

    let version = if flags & TRACK_INFO_VERSIONED != 0 {
        get_u8(&mut body)?
    } else {
        1
    };
    if version == 0 || version > CURRENT_VERSION {
        return Err(DecodeError::UnsupportedVersion(version));
    }

    let title = get_utf(&mut body)?;
    let author = get_utf(&mut body)?;
    let length_ms = get_i64(&mut body)?.max(0) as u64;
    let identifier = get_utf(&mut body)?;
    let is_stream = get_u8(&mut body)? != 0;
    let uri = if version >= 2 {
        get_nullable_utf(&mut body)?
    } else {
        None
    };
    let (artwork_url, isrc) = if version >= 3 {
        (get_nullable_utf(&mut body)?, get_nullable_utf(&mut body)?)
    } else {
        (None, None)
    };
    let source_name = get_utf(&mut body)?;

    // Los bytes propios de cada fuente van antes de la posición final
    let position_ms = if body.remaining() >= 8 {
        let mut tail = &body[body.len() - 8..];
        tail.get_i64().max(0) as u64
    } else {
        0
    };

    Ok(TrackInfo {
        title,
        author,
        length_ms,
        identifier,
        is_stream,
        uri,
        artwork_url,
        isrc,
        source_name,
        position_ms,
    })
}

fn clamp_i64(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

fn put_utf(buf: &mut BytesMut, value: &str) {
    let mut end = value.len().min(u16::MAX as usize);
    while !value.is_char_boundary(end) {
        end -= 1;
    }
    buf.put_u16(end as u16);
    buf.extend_from_slice(&value.as_bytes()[..end]);
}

fn put_nullable_utf(buf: &mut BytesMut, value: Option<&str>) {
    match value {
        Some(value) => {
            buf.put_u8(1);
            put_utf(buf, value);
        }
        None => buf.put_u8(0),
    }
}

fn get_u8(buf: &mut &[u8]) -> Result<u8, DecodeError> {
    if buf.remaining() < 1 {
        return Err(DecodeError::Truncated);
    }
    Ok(buf.get_u8())
}

fn get_u32(buf: &mut &[u8]) -> Result<u32, DecodeError> {
    if buf.remaining() < 4 {
        return Err(DecodeError::Truncated);
    }
    Ok(buf.get_u32())
}

fn get_i64(buf: &mut &[u8]) -> Result<i64, DecodeError> {
    if buf.remaining() < 8 {
        return Err(DecodeError::Truncated);
    }
    Ok(buf.get_i64())
}

fn get_utf(buf: &mut &[u8]) -> Result<String, DecodeError> {
    if buf.remaining() < 2 {
        return Err(DecodeError::Truncated);
    }
    let len = buf.get_u16() as usize;
    if buf.remaining() < len {
        return Err(DecodeError::Truncated);
    }
    let value = std::str::from_utf8(&buf[..len])
        .map_err(|_| DecodeError::InvalidUtf8)?
        .to_string();
    buf.advance(len);
    Ok(value)
}

fn get_nullable_utf(buf: &mut &[u8]) -> Result<Option<String>, DecodeError> {
    if get_u8(buf)? == 0 {
        return Ok(None);
    }
    get_utf(buf).map(Some)
}
