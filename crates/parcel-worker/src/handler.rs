//! Worker entry point.
//!
//! An invocation carries either a batch of queue records or a single call.
//! Each call is resolved (following a proxy if needed), dispatched through
//! the [`FunctionRegistry`], measured, and its outcome written to the
//! caller's `result_store` key. Function failures end up in the outcome;
//! only storage failures and retry requests come back as errors.

use std::sync::Arc;

use futures::stream::{self, StreamExt};
use parcel_proto::{
    BatchEvent, CallMessage, Codec, CodecError, Incoming, OutcomeRecord, QueueRecord,
    FUNCTION_FIELD, PROXY_FIELD, RECORDS_FIELD,
};
use parcel_state::BlobStore;
use serde_json::Value;
use tracing::{debug, error, info, warn};

use crate::context::InvocationContext;
use crate::encoder::{JsonEncoder, OutcomeEncoder, SERIALIZATION_ERROR};
use crate::error::HandlerError;
use crate::function::CallArgs;
use crate::outcome::{Failure, Outcome};
use crate::registry::FunctionRegistry;
use crate::sink::{FacadeSink, MetricsSink, Tags, COUNT, REMAINING_MILLISECONDS};

/// Function tag used when a call names no function.
const MISSING_FUNCTION_TAG: &str = "None";

pub struct Handler {
    registry: FunctionRegistry,
    codec: Codec,
    metrics: Arc<dyn MetricsSink>,
    encoder: Arc<dyn OutcomeEncoder>,
    max_in_flight: Option<usize>,
}

impl Handler {
    /// Handler reading proxies from and writing outcomes to `bucket`.
    pub fn new(store: Arc<dyn BlobStore>, bucket: impl Into<String>) -> Self {
        Self {
            registry: FunctionRegistry::new(),
            codec: Codec::new(store, bucket),
            metrics: Arc::new(FacadeSink),
            encoder: Arc::new(JsonEncoder),
            max_in_flight: None,
        }
    }

    #[must_use]
    pub fn with_registry(mut self, registry: FunctionRegistry) -> Self {
        self.registry = registry;
        self
    }

    #[must_use]
    pub fn with_metrics(mut self, metrics: Arc<dyn MetricsSink>) -> Self {
        self.metrics = metrics;
        self
    }

    #[must_use]
    pub fn with_encoder(mut self, encoder: Arc<dyn OutcomeEncoder>) -> Self {
        self.encoder = encoder;
        self
    }

    /// Bound the number of records of one batch running at once.
    #[must_use]
    pub fn with_max_in_flight(mut self, limit: Option<usize>) -> Self {
        self.max_in_flight = limit.filter(|n| *n > 0);
        self
    }

    pub fn registry(&self) -> &FunctionRegistry {
        &self.registry
    }

    pub fn registry_mut(&mut self) -> &mut FunctionRegistry {
        &mut self.registry
    }

    pub fn bucket(&self) -> &str {
        self.codec.bucket()
    }

    /// Handle one raw event.
    ///
    /// `{"Records": [...]}` is a batch; an object with `function` or
    /// `proxy` is a single call. Anything else is logged and ignored.
    pub async fn handle(&self, event: Value, ctx: &InvocationContext) -> Result<(), HandlerError> {
        if event.get(RECORDS_FIELD).is_some() {
            return match serde_json::from_value::<BatchEvent>(event) {
                Ok(batch) => self.handle_batch(batch.records, ctx).await,
                Err(e) => {
                    error!(error = %e, "dropping malformed batch event");
                    Ok(())
                }
            };
        }

        if event.get(FUNCTION_FIELD).is_some() || event.get(PROXY_FIELD).is_some() {
            return match Incoming::from_value(event) {
                Ok(incoming) => self.handle_single(incoming, ctx).await,
                Err(e) => {
                    error!(error = %e, "dropping malformed call");
                    Ok(())
                }
            };
        }

        warn!("ignoring unrecognised event");
        Ok(())
    }

    /// Run every decodable record concurrently and wait for all of them.
    ///
    /// Undecodable records are logged and dropped. If any record fails, the
    /// first failure is returned once the rest have finished.
    pub async fn handle_batch(
        &self,
        records: Vec<QueueRecord>,
        ctx: &InvocationContext,
    ) -> Result<(), HandlerError> {
        let received = records.len();
        let units: Vec<Incoming> = records
            .into_iter()
            .filter_map(|record| match Incoming::from_slice(record.body.as_bytes()) {
                Ok(incoming) => Some(incoming),
                Err(e) => {
                    error!(
                        message_id = ?record.message_id,
                        body = %record.body,
                        error = %e,
                        "couldn't decode record body"
                    );
                    None
                }
            })
            .collect();

        info!(
            records = received,
            decoded = units.len(),
            max_in_flight = ?self.max_in_flight,
            "handling batch"
        );

        let results: Vec<Result<(), HandlerError>> = match self.max_in_flight {
            Some(limit) => {
                stream::iter(units)
                    .map(|unit| self.handle_single(unit, ctx))
                    .buffer_unordered(limit)
                    .collect()
                    .await
            }
            None => {
                let calls = units.into_iter().map(|unit| self.handle_single(unit, ctx));
                futures::future::join_all(calls).await
            }
        };

        let mut first = None;
        for err in results.into_iter().filter_map(Result::err) {
            if first.is_none() {
                first = Some(err);
            } else {
                warn!(error = %err, "further failure in batch");
            }
        }
        first.map_or(Ok(()), Err)
    }

    /// Resolve, dispatch, measure and record a single call.
    pub async fn handle_single(
        &self,
        incoming: Incoming,
        ctx: &InvocationContext,
    ) -> Result<(), HandlerError> {
        let call = match self.codec.resolve(incoming).await {
            Ok(call) => call,
            Err(CodecError::Store(e)) => return Err(e.into()),
            Err(e) => {
                error!(error = %e, "dropping undecodable proxied call");
                return Ok(());
            }
        };

        let CallMessage {
            function,
            args,
            kwargs,
            result_store,
        } = call;

        let outcome = self
            .registry
            .dispatch(function.as_deref(), CallArgs::new(args, kwargs))
            .await;

        let function = function.unwrap_or_else(|| MISSING_FUNCTION_TAG.to_owned());
        self.emit_metrics(&function, ctx);

        match &outcome {
            Outcome::Success(_) => debug!(function = %function, "call succeeded"),
            Outcome::Failure(failure) => error!(
                function = %function,
                exception = %failure.repr(),
                traceback = %failure.trace,
                "call failed"
            ),
            Outcome::RetryRequested { reason } => {
                warn!(function = %function, reason = %reason, "call requested a retry");
                return Err(HandlerError::RetryRequested {
                    function,
                    reason: reason.clone(),
                });
            }
        }

        match result_store {
            Some(key) => self.record(&key, &outcome).await,
            None => {
                debug!(function = %function, "no result_store, discarding outcome");
                Ok(())
            }
        }
    }

    fn emit_metrics(&self, function: &str, ctx: &InvocationContext) {
        let tags = Tags {
            function,
            worker: ctx.worker_name(),
        };
        self.metrics.increment_counter(COUNT, 1, tags);
        #[allow(clippy::cast_precision_loss)]
        self.metrics
            .set_gauge(REMAINING_MILLISECONDS, ctx.remaining_millis() as f64, tags);
    }

    async fn record(&self, key: &str, outcome: &Outcome) -> Result<(), HandlerError> {
        let body = match self.encoder.encode(outcome) {
            Ok(body) => body,
            Err(e) => {
                error!(result_store = %key, error = %e, "couldn't encode outcome");
                let failure = Failure::new(SERIALIZATION_ERROR, e.to_string());
                OutcomeRecord::exception(failure.repr(), failure.traceback())
                    .to_vec()
                    .map_err(HandlerError::Encode)?
            }
        };

        self.codec
            .store()
            .put(self.codec.bucket(), key, &body)
            .await?;
        debug!(result_store = %key, size = body.len(), "recorded outcome");
        Ok(())
    }
}

impl std::fmt::Debug for Handler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Handler")
            .field("registry", &self.registry.names())
            .field("bucket", &self.codec.bucket())
            .field("max_in_flight", &self.max_in_flight)
            .finish_non_exhaustive()
    }
}
