//! The transaction dispatch actor: one sender per role. Every write the
//! per-game workers produce funnels through this loop, which keeps nonce
//! management trivially serial.

use crate::{Driver, DriverConfig};
use anyhow::Result;
use async_trait::async_trait;
use ethers::providers::Middleware;
use std::sync::Arc;

/// The [TxDispatcher] drains the driver's transaction queue and sends each
/// transaction through the signing provider, in order.
pub struct TxDispatcher {
    /// The configuration for all of the drivers.
    pub config: Arc<DriverConfig>,
}

impl TxDispatcher {
    /// Creates a new instance of the [TxDispatcher] driver.
    pub fn new(config: Arc<DriverConfig>) -> Self {
        Self { config }
    }
}

#[async_trait]
impl Driver for TxDispatcher {
    async fn start_loop(self) -> Result<()> {
        tracing::info!(target: "tx-dispatch-driver", "Starting transaction dispatch driver...");
        let mut locked_receive_ch = self.config.tx_receiver.lock().await;
        tracing::info!(target: "tx-dispatch-driver", "Locked receive channel mutex successfully. Beginning tx dispatch loop.");

        while let Some(tx) = locked_receive_ch.recv().await {
            tracing::debug!(target: "tx-dispatch-driver", "Transaction request received in dispatch driver. Sending transaction...");
            match self.config.l1_provider.send_transaction(tx, None).await {
                Ok(res) => {
                    tracing::info!(target: "tx-dispatch-driver", "Transaction sent successfully. Tx hash: {}", res.tx_hash());
                }
                Err(e) => {
                    // Soft failure; the move is recomputed against a fresh
                    // mirror on the next polling cycle.
                    tracing::error!(target: "tx-dispatch-driver", "Error sending transaction: {}", e);
                }
            }
        }

        Ok(())
    }
}
