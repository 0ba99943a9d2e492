//! Chunked property creation with per-item outcomes.
//!
//! Every outcome is handed to an [`ItemSink`] before the next remote call is
//! issued, which lets the caller persist created entities write-ahead of any
//! further mutation.

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::authn::Credential;
use crate::errors::{DeployerError, ErrorKind, RemoteError};
use crate::models::configuration::{validate_property, ObjectType, PropertySpec};
use crate::utils::percentage;

use super::{Created, CrmApi};

/// Largest number of inputs the batch endpoint accepts in one request
pub const ENDPOINT_BATCH_CEILING: usize = 100;

/// Chunk size used when properties are created one request at a time
pub const DEFAULT_ITEM_CHUNK: usize = 10;

/// How a chunk of properties is sent to the CRM
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchMode {
    /// One batch-endpoint request per chunk, item errors stay item-scoped
    Endpoint { chunk_size: usize },

    /// One request per property, finer progress and any remote error aborts
    ItemByItem { chunk_size: usize },
}

impl BatchMode {
    /// Batch endpoint mode with the chunk size clamped to the CRM ceiling
    pub fn endpoint(chunk_size: usize) -> Self {
        BatchMode::Endpoint {
            chunk_size: chunk_size.clamp(1, ENDPOINT_BATCH_CEILING),
        }
    }

    pub fn item_by_item(chunk_size: usize) -> Self {
        BatchMode::ItemByItem {
            chunk_size: chunk_size.max(1),
        }
    }

    pub fn chunk_size(&self) -> usize {
        match self {
            BatchMode::Endpoint { chunk_size } | BatchMode::ItemByItem { chunk_size } => {
                *chunk_size
            }
        }
    }

    /// Number of chunks `items` properties are split into
    pub fn chunk_count(&self, items: usize) -> usize {
        items.div_ceil(self.chunk_size())
    }
}

impl Default for BatchMode {
    fn default() -> Self {
        BatchMode::item_by_item(DEFAULT_ITEM_CHUNK)
    }
}

/// What happened to one property
#[derive(Debug, Clone, PartialEq)]
pub enum ItemOutcome {
    Created(Created),

    /// The CRM already had it; adopted and recorded like a created one
    Existing(Created),

    /// Refused locally or by the CRM; the rest of the batch continues
    Rejected {
        name: String,
        reason: String,
        kind: ErrorKind,
    },
}

impl ItemOutcome {
    /// The remote entity, unless the item was rejected
    pub fn created(&self) -> Option<&Created> {
        match self {
            ItemOutcome::Created(c) | ItemOutcome::Existing(c) => Some(c),
            ItemOutcome::Rejected { .. } => None,
        }
    }

    fn from_created(created: Created) -> Self {
        if created.existed {
            ItemOutcome::Existing(created)
        } else {
            ItemOutcome::Created(created)
        }
    }
}

/// Progress through all properties of one object type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchProgress {
    pub completed: usize,
    pub total: usize,
    pub percentage: u8,
}

/// Counts items across the chunks of one object type
#[derive(Debug, Clone)]
pub struct BatchCounter {
    completed: usize,
    total: usize,
}

impl BatchCounter {
    pub fn new(total: usize) -> Self {
        Self {
            completed: 0,
            total,
        }
    }

    fn record(&mut self) -> BatchProgress {
        self.completed = (self.completed + 1).min(self.total);
        self.snapshot()
    }

    pub fn snapshot(&self) -> BatchProgress {
        BatchProgress {
            completed: self.completed,
            total: self.total,
            percentage: percentage(self.completed, self.total),
        }
    }
}

/// Receives every item outcome as soon as it is known
#[async_trait]
pub trait ItemSink: Send {
    async fn item_done(
        &mut self,
        property: &PropertySpec,
        outcome: &ItemOutcome,
        progress: BatchProgress,
    ) -> Result<(), DeployerError>;
}

/// A chunk stopped before all of its items were processed
#[derive(Debug)]
pub struct BatchAbort {
    /// Outcomes observed before the abort, already handed to the sink
    pub outcomes: Vec<ItemOutcome>,
    pub error: DeployerError,
}

/// Create one chunk of properties of `object_type`.
///
/// Locally invalid properties are rejected without a remote call. In
/// [`BatchMode::Endpoint`] the remaining properties go out in one request and
/// items the CRM refused are rejected individually. In
/// [`BatchMode::ItemByItem`] any remote error aborts the chunk. A failing sink
/// aborts as well, since further calls could no longer be recorded.
pub async fn create_chunk<S: ItemSink>(
    api: &dyn CrmApi,
    credential: &Credential,
    object_type: ObjectType,
    chunk: &[PropertySpec],
    mode: BatchMode,
    counter: &mut BatchCounter,
    sink: &mut S,
) -> Result<Vec<ItemOutcome>, BatchAbort> {
    let mut outcomes = Vec::with_capacity(chunk.len());
    let mut valid = Vec::with_capacity(chunk.len());

    for property in chunk {
        match validate_property(property) {
            Ok(()) => valid.push(property),
            Err(reason) => {
                warn!(property = %property.name, %object_type, "rejecting property: {reason}");
                let outcome = ItemOutcome::Rejected {
                    name: property.name.clone(),
                    reason,
                    kind: ErrorKind::RemoteValidationError,
                };
                report(sink, property, outcome, counter, &mut outcomes).await?;
            }
        }
    }

    if valid.is_empty() {
        return Ok(outcomes);
    }

    match mode {
        BatchMode::Endpoint { .. } => {
            let inputs: Vec<PropertySpec> = valid.iter().map(|p| (*p).clone()).collect();
            debug!(%object_type, count = inputs.len(), "sending property batch");
            let results = match api
                .create_properties_batch(credential, object_type, &inputs)
                .await
            {
                Ok(results) => results,
                Err(e) => return Err(abort(outcomes, e)),
            };

            for property in valid {
                let result = results
                    .iter()
                    .find(|r| r.name == property.name)
                    .map(|r| r.result.clone())
                    .unwrap_or_else(|| {
                        Err(RemoteError::Validation(
                            "missing from batch response".to_string(),
                        ))
                    });
                let outcome = match result {
                    Ok(created) => ItemOutcome::from_created(created),
                    Err(e) => {
                        warn!(property = %property.name, %object_type, "property refused by the CRM: {e}");
                        ItemOutcome::Rejected {
                            name: property.name.clone(),
                            reason: e.to_string(),
                            kind: e.kind(),
                        }
                    }
                };
                report(sink, property, outcome, counter, &mut outcomes).await?;
            }
        }
        BatchMode::ItemByItem { .. } => {
            for property in valid {
                let created = match api.create_property(credential, property).await {
                    Ok(created) => created,
                    Err(e) => {
                        warn!(property = %property.name, %object_type, "property creation failed: {e}");
                        return Err(abort(outcomes, e));
                    }
                };
                let outcome = ItemOutcome::from_created(created);
                report(sink, property, outcome, counter, &mut outcomes).await?;
            }
        }
    }

    Ok(outcomes)
}

async fn report<S: ItemSink>(
    sink: &mut S,
    property: &PropertySpec,
    outcome: ItemOutcome,
    counter: &mut BatchCounter,
    outcomes: &mut Vec<ItemOutcome>,
) -> Result<(), BatchAbort> {
    let progress = counter.record();
    let result = sink.item_done(property, &outcome, progress).await;
    outcomes.push(outcome);
    match result {
        Ok(()) => Ok(()),
        Err(error) => Err(BatchAbort {
            outcomes: std::mem::take(outcomes),
            error,
        }),
    }
}

fn abort(outcomes: Vec<ItemOutcome>, error: RemoteError) -> BatchAbort {
    BatchAbort {
        outcomes,
        error: error.into(),
    }
}
