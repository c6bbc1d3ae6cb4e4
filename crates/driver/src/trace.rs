//! The local view of the canonical trace: an in-memory commitment table
//! implementing the solvers' `TraceOracle`, refreshed from the trusted
//! rollup node.

use anyhow::Result;
use ethers::{
    providers::{Http, Provider},
    types::{H256, U64},
};
use fault_agent_solvers::fault::{Claim, TraceError, TraceOracle};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, RwLock};
use std::time::Duration;

/// Response shape of the node's `rollup_traceAtBlock` method.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
struct TraceAtBlockResponse {
    trace_hash: H256,
}

/// Response shape of the node's `rollup_outputAtIndex` method.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
struct OutputAtIndexResponse {
    output_root: H256,
}

#[derive(Debug, Default)]
struct TraceTable {
    units: Vec<Claim>,
    outputs: Vec<Claim>,
}

/// The [TraceLog] caches per-unit commitments and per-output roots pulled
/// from the trusted node, so the solvers can query them synchronously. Both
/// tables are append-only; an index is either unknown or final.
pub struct TraceLog {
    node_provider: Arc<Provider<Http>>,
    table: RwLock<TraceTable>,
}

impl TraceLog {
    /// Creates an empty trace log over the trusted node endpoint.
    pub fn new(node_provider: Arc<Provider<Http>>) -> Self {
        Self {
            node_provider,
            table: RwLock::new(TraceTable::default()),
        }
    }

    /// Records the commitment for one trace unit. Out-of-order indices are
    /// ignored; the refresh loop fills the table sequentially.
    pub fn record_unit(&self, index: u64, commitment: Claim) {
        let mut table = self.table.write().expect("trace table poisoned");
        if index as usize == table.units.len() {
            table.units.push(commitment);
        }
    }

    /// Records the root for one submitted output.
    pub fn record_output(&self, index: u64, root: Claim) {
        let mut table = self.table.write().expect("trace table poisoned");
        if index as usize == table.outputs.len() {
            table.outputs.push(root);
        }
    }

    /// Pulls every unit and output the node knows and the table does not
    /// yet. Returns the table sizes after the pull.
    pub async fn refresh(&self) -> Result<(u64, u64)> {
        let head: U64 = self
            .node_provider
            .request("rollup_blockNumber", ())
            .await?;
        let from = {
            let table = self.table.read().expect("trace table poisoned");
            table.units.len() as u64
        };
        for index in from..=head.as_u64() {
            let response: TraceAtBlockResponse = self
                .node_provider
                .request("rollup_traceAtBlock", [index])
                .await?;
            self.record_unit(index, response.trace_hash);
        }

        let outputs: U64 = self
            .node_provider
            .request("rollup_outputCount", ())
            .await?;
        let from = {
            let table = self.table.read().expect("trace table poisoned");
            table.outputs.len() as u64
        };
        for index in from..outputs.as_u64() {
            let response: OutputAtIndexResponse = self
                .node_provider
                .request("rollup_outputAtIndex", [index])
                .await?;
            self.record_output(index, response.output_root);
        }

        let table = self.table.read().expect("trace table poisoned");
        Ok((table.units.len() as u64, table.outputs.len() as u64))
    }

    /// Refreshes on a fixed interval, forever. Failures are logged and
    /// retried on the next tick; the node may simply be behind.
    pub async fn refresh_loop(self: Arc<Self>, interval: Duration) {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            match self.refresh().await {
                Ok((units, outputs)) => {
                    tracing::debug!(target: "trace-log", units, outputs, "trace tables refreshed");
                }
                Err(e) => {
                    tracing::warn!(target: "trace-log", "Error refreshing trace tables: {}", e);
                }
            }
        }
    }
}

impl TraceOracle for TraceLog {
    fn commitment_at(&self, trace_index: u64) -> Result<Claim, TraceError> {
        self.table
            .read()
            .expect("trace table poisoned")
            .units
            .get(trace_index as usize)
            .copied()
            .ok_or(TraceError::Unavailable(trace_index))
    }

    fn output_root(&self, batch_index: u64) -> Result<Claim, TraceError> {
        self.table
            .read()
            .expect("trace table poisoned")
            .outputs
            .get(batch_index as usize)
            .copied()
            .ok_or(TraceError::Unavailable(batch_index))
    }
}
