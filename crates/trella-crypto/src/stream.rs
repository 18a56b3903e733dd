//! Streaming encrypt, decrypt, and transfer.
//!
//! These transforms move data between an async reader and an async
//! writer without knowing the stream length up front. That matters
//! for decryption with an appended digest: the last bytes of the
//! stream are the encrypted digest, so the transform holds back the
//! final `2 * DIGEST_SIZE` bytes and only releases data once further
//! input proves the held bytes are not the tail. At EOF the held
//! tail splits into trailing plaintext and the 20-byte digest, which
//! must match the digest of everything emitted.
//!
//! Readers may return short counts; writers must accept everything
//! offered (`write_all`) or fail the transform.

use cipher::StreamCipher;
use sha1::{Digest, Sha1};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::session::{CipherOpts, SessionKey};
use crate::{random, CryptoError, Result, DIGEST_SIZE, IV_SIZE, READ_SIZE_DEFAULT};

/// Held-back tail length while scanning for the encrypted digest.
const TAIL_SIZE: usize = DIGEST_SIZE * 2;

impl SessionKey {
    /// Encrypt everything from `reader` into `writer`.
    ///
    /// Returns the total ciphertext size written, including the IV
    /// prefix and digest suffix when enabled. The output is
    /// byte-identical in layout to [`SessionKey::encrypt_with`] on
    /// the concatenated input; like buffer mode, an empty input
    /// stream is rejected before any framing is written.
    pub async fn encrypt_stream<R, W>(
        &self,
        reader: &mut R,
        writer: &mut W,
        opts: CipherOpts,
    ) -> Result<u64>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let mut buf = vec![0u8; READ_SIZE_DEFAULT];
        let mut n = reader.read(&mut buf).await?;
        if n == 0 {
            return Err(CryptoError::InvalidLength(0));
        }

        let iv = if opts.iv {
            random::bytes()
        } else {
            [0u8; IV_SIZE]
        };
        let mut cipher = self.keystream(&iv)?;
        let mut total = 0u64;

        if opts.iv {
            writer.write_all(&iv).await?;
            total += IV_SIZE as u64;
        }

        let mut digest = opts.digest.then(Sha1::new);
        while n != 0 {
            if let Some(d) = digest.as_mut() {
                d.update(&buf[..n]);
            }
            cipher.apply_keystream(&mut buf[..n]);
            writer.write_all(&buf[..n]).await?;
            total += n as u64;
            n = reader.read(&mut buf).await?;
        }

        if let Some(d) = digest {
            let mut tail = d.finalize();
            cipher.apply_keystream(&mut tail);
            writer.write_all(&tail).await?;
            total += DIGEST_SIZE as u64;
        }

        writer.flush().await?;
        Ok(total)
    }

    /// Decrypt everything from `reader` into `writer`.
    ///
    /// Returns the total plaintext size written. With the digest
    /// enabled, a mismatch fails the transform even though all
    /// plaintext bytes have already been emitted; callers must treat
    /// the output as poisoned on error. A stream recovering zero
    /// plaintext bytes is rejected under every framing, as in buffer
    /// mode.
    pub async fn decrypt_stream<R, W>(
        &self,
        reader: &mut R,
        writer: &mut W,
        opts: CipherOpts,
    ) -> Result<u64>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let mut iv = [0u8; IV_SIZE];
        if opts.iv {
            reader.read_exact(&mut iv).await?;
        }
        let mut cipher = self.keystream(&iv)?;
        let mut total = 0u64;

        if !opts.digest {
            // No trailing digest to detect: a straight pipe.
            let mut buf = vec![0u8; READ_SIZE_DEFAULT];
            loop {
                let n = reader.read(&mut buf).await?;
                if n == 0 {
                    break;
                }
                cipher.apply_keystream(&mut buf[..n]);
                writer.write_all(&buf[..n]).await?;
                total += n as u64;
            }
            if total == 0 {
                return Err(CryptoError::TruncatedInput);
            }
            writer.flush().await?;
            return Ok(total);
        }

        let mut digest = Sha1::new();
        let mut held: Vec<u8> = Vec::with_capacity(TAIL_SIZE + READ_SIZE_DEFAULT);
        let mut buf = vec![0u8; READ_SIZE_DEFAULT];
        loop {
            let n = reader.read(&mut buf).await?;
            if n == 0 {
                break;
            }
            held.extend_from_slice(&buf[..n]);

            // Everything beyond the hold-back window is confirmed
            // payload; decrypt and release it.
            if held.len() > TAIL_SIZE {
                let release = held.len() - TAIL_SIZE;
                cipher.apply_keystream(&mut held[..release]);
                digest.update(&held[..release]);
                writer.write_all(&held[..release]).await?;
                total += release as u64;
                held.drain(..release);
            }
        }

        // The tail must hold the digest plus at least one plaintext
        // byte; a framing-only stream is rejected like an empty
        // buffer.
        if held.len() <= DIGEST_SIZE {
            return Err(CryptoError::TruncatedInput);
        }

        // The held tail is trailing plaintext plus the digest.
        cipher.apply_keystream(&mut held);
        let split = held.len() - DIGEST_SIZE;
        digest.update(&held[..split]);
        writer.write_all(&held[..split]).await?;
        total += split as u64;
        writer.flush().await?;

        if digest.finalize()[..] != held[split..] {
            return Err(CryptoError::DigestMismatch);
        }
        Ok(total)
    }
}

/// Copy everything from `reader` to `writer` without transformation.
///
/// The plain-transfer twin of the streaming ciphers, used by the
/// unencrypted file-transfer path. Returns the total size moved.
pub async fn transfer<R, W>(reader: &mut R, writer: &mut W) -> Result<u64>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut total = 0u64;
    let mut buf = vec![0u8; READ_SIZE_DEFAULT];
    loop {
        let n = reader.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        writer.write_all(&buf[..n]).await?;
        total += n as u64;
    }
    writer.flush().await?;
    Ok(total)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use std::pin::Pin;
    use std::task::{Context, Poll};

    /// Reader adapter that yields at most `limit` bytes per call
    /// (capped at 64), exercising short-read handling.
    struct Dribble<R> {
        inner: R,
        limit: usize,
    }

    impl<R: AsyncRead + Unpin> AsyncRead for Dribble<R> {
        fn poll_read(
            mut self: Pin<&mut Self>,
            cx: &mut Context<'_>,
            buf: &mut tokio::io::ReadBuf<'_>,
        ) -> Poll<std::io::Result<()>> {
            let take = self.limit.min(64).min(buf.remaining());
            let mut tmp = [0u8; 64];
            let mut small = tokio::io::ReadBuf::new(&mut tmp[..take]);
            match Pin::new(&mut self.inner).poll_read(cx, &mut small) {
                Poll::Ready(Ok(())) => {
                    buf.put_slice(small.filled());
                    Poll::Ready(Ok(()))
                }
                other => other,
            }
        }
    }

    #[tokio::test]
    async fn test_stream_matches_buffer_mode() {
        let key = SessionKey::generate();
        let mut plain = vec![0u8; 258];
        random::fill(&mut plain);

        let mut cipher_out = Cursor::new(Vec::new());
        let written = key
            .encrypt_stream(&mut plain.as_slice(), &mut cipher_out, CipherOpts::default())
            .await
            .expect("encrypt stream");
        let cipher = cipher_out.into_inner();
        assert_eq!(written as usize, cipher.len());
        assert_eq!(
            cipher.len(),
            SessionKey::encrypted_len(plain.len(), CipherOpts::default())
        );

        // Buffer-mode decrypt accepts stream-mode output.
        assert_eq!(key.decrypt(&cipher).expect("buffer decrypt"), plain);
    }

    #[tokio::test]
    async fn test_stream_roundtrip_with_dribbling_reader() {
        let key = SessionKey::generate();
        let mut plain = vec![0u8; 258];
        random::fill(&mut plain);

        let mut cipher_out = Cursor::new(Vec::new());
        key.encrypt_stream(
            &mut Dribble {
                inner: plain.as_slice(),
                limit: 7,
            },
            &mut cipher_out,
            CipherOpts::default(),
        )
        .await
        .expect("encrypt stream");
        let cipher = cipher_out.into_inner();

        let mut plain_out = Cursor::new(Vec::new());
        let total = key
            .decrypt_stream(
                &mut Dribble {
                    inner: cipher.as_slice(),
                    limit: 7,
                },
                &mut plain_out,
                CipherOpts::default(),
            )
            .await
            .expect("decrypt stream");

        assert_eq!(total as usize, plain.len());
        assert_eq!(plain_out.into_inner(), plain);
    }

    #[tokio::test]
    async fn test_stream_decrypts_buffer_output() {
        let key = SessionKey::generate();
        let plain = b"buffer mode to stream mode interop".to_vec();
        let cipher = key.encrypt(&plain).expect("encrypt");

        let mut out = Cursor::new(Vec::new());
        let total = key
            .decrypt_stream(&mut cipher.as_slice(), &mut out, CipherOpts::default())
            .await
            .expect("decrypt stream");
        assert_eq!(total as usize, plain.len());
        assert_eq!(out.into_inner(), plain);
    }

    #[tokio::test]
    async fn test_stream_digest_mismatch_reported_after_emit() {
        let key = SessionKey::generate();
        let mut cipher = key.encrypt(&[0x11u8; 100]).expect("encrypt");
        let last = cipher.len() - 1;
        cipher[last] ^= 0x01;

        let mut out = Cursor::new(Vec::new());
        let err = key
            .decrypt_stream(&mut cipher.as_slice(), &mut out, CipherOpts::default())
            .await
            .expect_err("tampered digest must fail");
        assert!(matches!(err, CryptoError::DigestMismatch));
    }

    #[tokio::test]
    async fn test_stream_truncated_tail() {
        let key = SessionKey::generate();
        let cipher = key.encrypt(&[0u8; 32]).expect("encrypt");
        // Keep the IV but cut into the digest region.
        let cut = &cipher[..IV_SIZE + 10];

        let mut out = Cursor::new(Vec::new());
        let err = key
            .decrypt_stream(&mut &cut[..], &mut out, CipherOpts::default())
            .await
            .expect_err("truncated tail must fail");
        assert!(matches!(err, CryptoError::TruncatedInput));
    }

    #[tokio::test]
    async fn test_empty_reader_rejected_on_encrypt() {
        let key = SessionKey::generate();
        for opts in [CipherOpts::default(), CipherOpts::RAW] {
            let mut reader: &[u8] = &[];
            let mut out = Cursor::new(Vec::new());
            let err = key
                .encrypt_stream(&mut reader, &mut out, opts)
                .await
                .expect_err("empty input must fail");
            assert!(matches!(err, CryptoError::InvalidLength(0)));
            // Nothing was written, not even framing.
            assert!(out.into_inner().is_empty());
        }
    }

    #[tokio::test]
    async fn test_framing_only_stream_rejected() {
        let key = SessionKey::generate();
        let cipher = key.encrypt(&[0u8; 32]).expect("encrypt");
        // IV plus exactly one digest-sized tail: zero recovered
        // plaintext bytes.
        let cut = &cipher[..IV_SIZE + DIGEST_SIZE];

        let mut out = Cursor::new(Vec::new());
        let err = key
            .decrypt_stream(&mut &cut[..], &mut out, CipherOpts::default())
            .await
            .expect_err("framing-only stream must fail");
        assert!(matches!(err, CryptoError::TruncatedInput));
    }

    #[tokio::test]
    async fn test_empty_raw_stream_rejected_on_decrypt() {
        let key = SessionKey::generate();
        let mut reader: &[u8] = &[];
        let mut out = Cursor::new(Vec::new());
        let err = key
            .decrypt_stream(&mut reader, &mut out, CipherOpts::RAW)
            .await
            .expect_err("empty input must fail");
        assert!(matches!(err, CryptoError::TruncatedInput));
    }

    #[tokio::test]
    async fn test_transfer_copies_verbatim() {
        let mut data = vec![0u8; 3000];
        random::fill(&mut data);
        let mut out = Cursor::new(Vec::new());
        let total = transfer(&mut data.as_slice(), &mut out)
            .await
            .expect("transfer");
        assert_eq!(total as usize, data.len());
        assert_eq!(out.into_inner(), data);
    }

    #[tokio::test]
    async fn test_raw_stream_is_length_preserving() {
        let key = SessionKey::generate();
        let plain = vec![0xabu8; 130];

        let mut cipher_out = Cursor::new(Vec::new());
        key.encrypt_stream(&mut plain.as_slice(), &mut cipher_out, CipherOpts::RAW)
            .await
            .expect("encrypt stream");
        let cipher = cipher_out.into_inner();
        assert_eq!(cipher.len(), plain.len());
        assert_eq!(key.decrypt_with(&cipher, CipherOpts::RAW).expect("decrypt"), plain);
    }
}
