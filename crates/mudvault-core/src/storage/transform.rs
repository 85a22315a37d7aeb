//! Chained byte transforms.
//!
//! A [`ByteTransform`] is an encoder/decoder pair in the usual
//! update/finish shape. It can be stacked onto a sink ([`TransformSink`]) or
//! onto a stream ([`transform_stream`]); errors from either side surface
//! through the ordinary `Result` channel.

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{self, StreamExt};

use super::{ByteSink, ByteStream, StorageError};
use crate::crypto::CryptoError;

/// A stateful byte transform.
pub trait ByteTransform: Send {
    /// Feed input, returning whatever output is ready.
    fn update(&mut self, input: &[u8]) -> Result<Vec<u8>, CryptoError>;

    /// Flush the remaining output. Consumes the transform.
    fn finish(self: Box<Self>) -> Result<Vec<u8>, CryptoError>;
}

/// A sink that runs every chunk through a transform before forwarding it.
pub struct TransformSink {
    name: String,
    transform: Option<Box<dyn ByteTransform>>,
    inner: Box<dyn ByteSink>,
}

impl TransformSink {
    pub fn new(
        name: impl Into<String>,
        transform: Box<dyn ByteTransform>,
        inner: Box<dyn ByteSink>,
    ) -> Self {
        Self {
            name: name.into(),
            transform: Some(transform),
            inner,
        }
    }

    fn closed(&self) -> StorageError {
        StorageError::SinkClosed {
            name: self.name.clone(),
        }
    }
}

impl std::fmt::Debug for TransformSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransformSink")
            .field("name", &self.name)
            .field("finished", &self.transform.is_none())
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl ByteSink for TransformSink {
    async fn write(&mut self, data: &[u8]) -> Result<(), StorageError> {
        let Some(transform) = self.transform.as_mut() else {
            return Err(self.closed());
        };
        let out = transform.update(data)?;
        if !out.is_empty() {
            self.inner.write(&out).await?;
        }
        Ok(())
    }

    async fn finish(&mut self) -> Result<(), StorageError> {
        let Some(transform) = self.transform.take() else {
            return Err(self.closed());
        };
        let out = transform.finish()?;
        if !out.is_empty() {
            self.inner.write(&out).await?;
        }
        self.inner.finish().await
    }
}

/// Wrap a stream so every chunk passes through `transform`.
///
/// The transform's final output is emitted once the input is exhausted.
/// An input error or transform error ends the stream.
pub fn transform_stream(input: ByteStream, transform: Box<dyn ByteTransform>) -> ByteStream {
    stream::try_unfold(
        (input, Some(transform)),
        |(mut input, mut transform)| async move {
            loop {
                let Some(active) = transform.as_mut() else {
                    return Ok::<_, StorageError>(None);
                };
                match input.next().await {
                    Some(chunk) => {
                        let out = active.update(&chunk?)?;
                        if !out.is_empty() {
                            return Ok(Some((Bytes::from(out), (input, transform))));
                        }
                    }
                    None => {
                        let Some(last) = transform.take() else {
                            return Ok(None);
                        };
                        let out = last.finish()?;
                        if out.is_empty() {
                            return Ok(None);
                        }
                        return Ok(Some((Bytes::from(out), (input, None))));
                    }
                }
            }
        },
    )
    .boxed()
}
