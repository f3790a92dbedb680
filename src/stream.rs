//! Row streams backed by a leased connection.

use std::pin::Pin;
use std::task::{Context, Poll};

use futures::Stream;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use crate::{Result, Row};

/// Rows of a streaming query, yielded one at a time as they are decoded.
///
/// The connection behind the stream is released when the last row has been
/// read, when an error is yielded, or when the stream is dropped early.
/// An error ends the stream.
#[must_use = "streams do nothing unless polled"]
#[derive(Debug)]
pub struct RowStream {
   inner: ReceiverStream<Result<Row>>,
}

impl RowStream {
   pub(crate) fn new(rx: mpsc::Receiver<Result<Row>>) -> Self {
      Self {
         inner: ReceiverStream::new(rx),
      }
   }

   /// Drain the stream into a vector, stopping at the first error.
   pub async fn try_collect(mut self) -> Result<Vec<Row>> {
      use futures::StreamExt;

      let mut rows = Vec::new();
      while let Some(row) = self.next().await {
         rows.push(row?);
      }
      Ok(rows)
   }
}

impl Stream for RowStream {
   type Item = Result<Row>;

   fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
      Pin::new(&mut self.inner).poll_next(cx)
   }

   fn size_hint(&self) -> (usize, Option<usize>) {
      self.inner.size_hint()
   }
}
