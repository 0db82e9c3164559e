//! Collaborators the outbox pulls from and tears down.
use async_trait::async_trait;
use flow_columnar::Batch;
use flow_wire::ProducerMetadata;
use tokio_util::sync::CancellationToken;
use tracing::warn;

/// Upstream operator producing batches.
///
/// A zero-length batch signals end of data; `next` must not be called again after it.
#[async_trait]
pub trait BatchSource: Send {
    /// One-time setup, called before the first `next`.
    fn init(&mut self) -> anyhow::Result<()> {
        Ok(())
    }

    async fn next(&mut self, ctx: &CancellationToken) -> anyhow::Result<Batch>;
}

#[async_trait]
impl<S: BatchSource + ?Sized> BatchSource for Box<S> {
    fn init(&mut self) -> anyhow::Result<()> {
        (**self).init()
    }

    async fn next(&mut self, ctx: &CancellationToken) -> anyhow::Result<Batch> {
        (**self).next(ctx).await
    }
}

/// Something that accumulates trailing metadata (row counts, traces, stats) to ship
/// once the data stream is done.
#[async_trait]
pub trait MetadataSource: Send {
    async fn drain_metadata(&mut self, ctx: &CancellationToken) -> Vec<ProducerMetadata>;
}

/// Resource released when the outbox exits.
#[async_trait]
pub trait Closer: Send {
    async fn close(&mut self, ctx: &CancellationToken) -> anyhow::Result<()>;
}

/// Ordered set of closers, released at most once.
#[derive(Default)]
pub struct Closers(Vec<Box<dyn Closer>>);

impl Closers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, closer: impl Closer + 'static) {
        self.0.push(Box::new(closer));
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Close everything in registration order. Failures are logged, never returned.
    pub async fn close_and_log_on_err(&mut self, ctx: &CancellationToken, owner: &str) {
        for (index, mut closer) in std::mem::take(&mut self.0).into_iter().enumerate() {
            if let Err(err) = closer.close(ctx).await {
                warn!(owner = %owner, closer = index, error = ?err, "error closing resource");
            }
        }
    }
}

impl std::fmt::Debug for Closers {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Closers").field(&self.0.len()).finish()
    }
}

impl FromIterator<Box<dyn Closer>> for Closers {
    fn from_iter<I: IntoIterator<Item = Box<dyn Closer>>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}
