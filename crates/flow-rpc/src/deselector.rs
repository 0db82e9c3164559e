// Adapter that turns selection-vector batches into dense ones before serialization.
use async_trait::async_trait;
use flow_columnar::Batch;
use tokio_util::sync::CancellationToken;

use crate::BatchSource;

/// Wraps a [`BatchSource`] so every batch it yields has no selection vector.
#[derive(Debug)]
pub struct Deselector<S> {
    input: S,
}

impl<S: BatchSource> Deselector<S> {
    pub fn new(input: S) -> Self {
        Self { input }
    }

    pub fn into_inner(self) -> S {
        self.input
    }
}

#[async_trait]
impl<S: BatchSource> BatchSource for Deselector<S> {
    fn init(&mut self) -> anyhow::Result<()> {
        self.input.init()
    }

    async fn next(&mut self, ctx: &CancellationToken) -> anyhow::Result<Batch> {
        Ok(self.input.next(ctx).await?.densify())
    }
}
