//! Session preamble codec
//!
//! Three fixed frames precede the ciphertext: credential (4-byte LE signed
//! length + UTF-8 `username:password`), raw 16-byte IV, 8-byte LE signed
//! plaintext size. The payload itself has no framing; it runs to EOF.

use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::protocol::{CRED_LEN_BYTES, IV_LEN, MAX_CREDENTIAL_BYTES, SIZE_LEN};

#[derive(Debug, Error)]
pub enum FrameError {
    #[error("credential length {0} outside 1..={}", MAX_CREDENTIAL_BYTES)]
    CredentialLength(i32),
    #[error("credential bytes are not valid UTF-8")]
    CredentialEncoding,
    #[error("credential must be username:password with both parts non-empty")]
    CredentialFormat,
    #[error("declared payload size {0} is negative")]
    NegativeSize(i64),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Username/password pair carried in the first frame.
///
/// The colon is the wire separator, so a username may not contain one;
/// `parse` rejects anything but exactly `user:pass` with both halves
/// non-empty.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credential {
    pub username: String,
    pub password: String,
}

impl Credential {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }

    /// The exact string both endpoints feed into key derivation.
    pub fn wire_string(&self) -> String {
        format!("{}:{}", self.username, self.password)
    }

    pub fn parse(raw: &str) -> Result<Self, FrameError> {
        if raw.bytes().filter(|b| *b == b':').count() != 1 {
            return Err(FrameError::CredentialFormat);
        }
        match raw.split_once(':') {
            Some((user, pass)) if !user.is_empty() && !pass.is_empty() => {
                Ok(Self::new(user, pass))
            }
            _ => Err(FrameError::CredentialFormat),
        }
    }
}

pub async fn write_credential<S: AsyncWrite + Unpin>(
    stream: &mut S,
    credential: &Credential,
) -> Result<(), FrameError> {
    let raw = credential.wire_string();
    stream.write_all(&(raw.len() as i32).to_le_bytes()).await?;
    stream.write_all(raw.as_bytes()).await?;
    Ok(())
}

pub async fn read_credential<S: AsyncRead + Unpin>(stream: &mut S) -> Result<Credential, FrameError> {
    let mut len_buf = [0u8; CRED_LEN_BYTES];
    stream.read_exact(&mut len_buf).await?;
    let len = i32::from_le_bytes(len_buf);
    if len <= 0 || len as usize > MAX_CREDENTIAL_BYTES {
        return Err(FrameError::CredentialLength(len));
    }
    let mut raw = vec![0u8; len as usize];
    stream.read_exact(&mut raw).await?;
    let raw = String::from_utf8(raw).map_err(|_| FrameError::CredentialEncoding)?;
    Credential::parse(&raw)
}

pub async fn write_iv<S: AsyncWrite + Unpin>(stream: &mut S, iv: &[u8; IV_LEN]) -> Result<(), FrameError> {
    stream.write_all(iv).await?;
    Ok(())
}

pub async fn read_iv<S: AsyncRead + Unpin>(stream: &mut S) -> Result<[u8; IV_LEN], FrameError> {
    let mut iv = [0u8; IV_LEN];
    stream.read_exact(&mut iv).await?;
    Ok(iv)
}

pub async fn write_payload_size<S: AsyncWrite + Unpin>(stream: &mut S, size: i64) -> Result<(), FrameError> {
    stream.write_all(&size.to_le_bytes()).await?;
    Ok(())
}

/// Reads the declared plaintext size. Negative values are a framing error;
/// the upper bound is policy and checked by the session handler, not here.
pub async fn read_payload_size<S: AsyncRead + Unpin>(stream: &mut S) -> Result<i64, FrameError> {
    let mut size_buf = [0u8; SIZE_LEN];
    stream.read_exact(&mut size_buf).await?;
    let size = i64::from_le_bytes(size_buf);
    if size < 0 {
        return Err(FrameError::NegativeSize(size));
    }
    Ok(size)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn credential_roundtrip() {
        let (mut a, mut b) = tokio::io::duplex(256);
        let cred = Credential::new("admin", "password");
        write_credential(&mut a, &cred).await.unwrap();
        let got = read_credential(&mut b).await.unwrap();
        assert_eq!(got, cred);
    }

    #[tokio::test]
    async fn credential_preserves_utf8() {
        let (mut a, mut b) = tokio::io::duplex(256);
        let cred = Credential::new("olá", "sénha");
        write_credential(&mut a, &cred).await.unwrap();
        assert_eq!(read_credential(&mut b).await.unwrap(), cred);
    }

    #[test]
    fn parse_rejects_malformed() {
        assert!(Credential::parse("nocolon").is_err());
        assert!(Credential::parse("a:b:c").is_err());
        assert!(Credential::parse("a::b").is_err());
        assert!(Credential::parse(":pass").is_err());
        assert!(Credential::parse("user:").is_err());
        assert!(Credential::parse("user:pass").is_ok());
    }

    #[tokio::test]
    async fn negative_credential_length_is_framing_error() {
        let mut frame = Vec::new();
        frame.extend_from_slice(&(-4i32).to_le_bytes());
        frame.extend_from_slice(b"trap");
        let err = read_credential(&mut frame.as_slice()).await.unwrap_err();
        assert!(matches!(err, FrameError::CredentialLength(-4)));
    }

    #[tokio::test]
    async fn oversized_credential_length_is_framing_error() {
        let frame = ((MAX_CREDENTIAL_BYTES as i32) + 1).to_le_bytes();
        let err = read_credential(&mut frame.as_slice()).await.unwrap_err();
        assert!(matches!(err, FrameError::CredentialLength(_)));
    }

    #[tokio::test]
    async fn invalid_utf8_credential_is_rejected() {
        let mut frame = Vec::new();
        frame.extend_from_slice(&4i32.to_le_bytes());
        frame.extend_from_slice(&[0xff, 0xfe, b'a', b'b']);
        let err = read_credential(&mut frame.as_slice()).await.unwrap_err();
        assert!(matches!(err, FrameError::CredentialEncoding));
    }

    #[tokio::test]
    async fn truncated_credential_is_io_error() {
        let mut frame = Vec::new();
        frame.extend_from_slice(&16i32.to_le_bytes());
        frame.extend_from_slice(b"short");
        let err = read_credential(&mut frame.as_slice()).await.unwrap_err();
        assert!(matches!(err, FrameError::Io(_)));
    }

    #[tokio::test]
    async fn iv_roundtrip() {
        let (mut a, mut b) = tokio::io::duplex(64);
        let iv = [7u8; IV_LEN];
        write_iv(&mut a, &iv).await.unwrap();
        assert_eq!(read_iv(&mut b).await.unwrap(), iv);
    }

    #[tokio::test]
    async fn size_roundtrip_and_negative_rejected() {
        let (mut a, mut b) = tokio::io::duplex(64);
        write_payload_size(&mut a, 52_428_800).await.unwrap();
        assert_eq!(read_payload_size(&mut b).await.unwrap(), 52_428_800);

        let frame = (-1i64).to_le_bytes();
        let err = read_payload_size(&mut frame.as_slice()).await.unwrap_err();
        assert!(matches!(err, FrameError::NegativeSize(-1)));
    }
}
