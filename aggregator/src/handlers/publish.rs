use axum::extract::State;
use axum::Json;
use bytes::Bytes;
use tracing::{debug, instrument, Span};

use aggregator_common::event::parse_batch;

use crate::api::{AggregatorError, PublishResponse};
use crate::router;

/// Accept one event or an array of events and hand them to the queue.
///
/// The whole batch is validated before the first enqueue. Answering 200 means every record
/// is queued; persistence happens later, out of band.
#[instrument(skip_all, fields(batch_size))]
pub async fn publish(
    state: State<router::State>,
    body: Bytes,
) -> Result<Json<PublishResponse>, AggregatorError> {
    let records = parse_batch(&body)?;
    let accepted = records.len();
    Span::current().record("batch_size", accepted);

    for record in records {
        // A closed queue mid-batch leaves the earlier records queued.
        state.queue.enqueue(record).await?;
        state.counters.record_received(1);
    }

    let queued = state.queue.depth();
    debug!(accepted, queued, "batch enqueued");

    Ok(Json(PublishResponse { accepted, queued }))
}
