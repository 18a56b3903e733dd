//! Streaming encrypt/decrypt with a reader that dribbles at most 7
//! bytes per call, compared against buffer mode.

use std::io::Cursor;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::io::{AsyncRead, ReadBuf};
use trella_crypto::{random, CipherOpts, SessionKey};

/// Yields at most `limit` bytes per read call.
struct Dribble<R> {
    inner: R,
    limit: usize,
}

impl<R: AsyncRead + Unpin> AsyncRead for Dribble<R> {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        let take = self.limit.min(16).min(buf.remaining());
        let mut tmp = [0u8; 16];
        let mut small = ReadBuf::new(&mut tmp[..take]);
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
async fn streaming_matches_buffer_mode() {
    trella_integration_tests::init_tracing();

    let key = SessionKey::generate();
    let mut plain = vec![0u8; 258];
    random::fill(&mut plain);

    // Encrypt through the streaming API, 7 bytes at a time.
    let mut cipher_out = Cursor::new(Vec::new());
    let cipher_total = key
        .encrypt_stream(
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

    // Total size agrees with buffer mode.
    assert_eq!(cipher_total as usize, cipher.len());
    assert_eq!(
        cipher.len(),
        SessionKey::encrypted_len(plain.len(), CipherOpts::default())
    );

    // Decrypt through the streaming API, 7 bytes at a time.
    let mut plain_out = Cursor::new(Vec::new());
    let plain_total = key
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

    assert_eq!(plain_total as usize, plain.len());
    assert_eq!(plain_out.into_inner(), plain);

    // Buffer mode agrees byte for byte.
    assert_eq!(key.decrypt(&cipher).expect("buffer decrypt"), plain);
}

#[tokio::test]
async fn streaming_rejects_empty_input_like_buffer_mode() {
    trella_integration_tests::init_tracing();

    let key = SessionKey::generate();
    assert!(key.encrypt(&[]).is_err());

    // The streaming twin agrees: an empty reader never produces a
    // framing-only ciphertext.
    let mut reader: &[u8] = &[];
    let mut out = Cursor::new(Vec::new());
    assert!(key
        .encrypt_stream(&mut reader, &mut out, CipherOpts::default())
        .await
        .is_err());
    assert!(out.into_inner().is_empty());
}
