//! Portable description of a runtime, handed to worker processes as a
//! base64 string.

use std::time::Duration;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Serialize};

use nimbus_core::config::{BackendConfig, BackendKind, QueueConfig, RuntimeConfig};
use nimbus_core::Config;

use crate::error::RuntimeError;
use crate::state::RuntimeState;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuntimeDescriptor {
    pub storage_conn: String,
    pub queue_conn: String,
    pub visibility_timeout_secs: u64,
    pub inline_payload_limit: usize,
    pub cell_poll_ms: u64,
}

impl RuntimeDescriptor {
    pub fn from_config(config: &Config) -> Self {
        Self {
            storage_conn: config.backend.storage_conn.clone(),
            queue_conn: config.backend.queue_conn.clone(),
            visibility_timeout_secs: config.queue.visibility_timeout.as_secs(),
            inline_payload_limit: config.queue.inline_payload_limit,
            cell_poll_ms: config.runtime.cell_poll_interval.as_millis() as u64,
        }
    }

    pub fn encode(&self) -> Result<String, RuntimeError> {
        let json = serde_json::to_vec(self).map_err(|e| RuntimeError::Descriptor(e.to_string()))?;
        Ok(STANDARD.encode(json))
    }

    pub fn decode(encoded: &str) -> Result<Self, RuntimeError> {
        let json = STANDARD
            .decode(encoded.trim())
            .map_err(|e| RuntimeError::Descriptor(format!("not base64: {e}")))?;
        serde_json::from_slice(&json).map_err(|e| RuntimeError::Descriptor(e.to_string()))
    }

    /// Overwrite the runtime-related parts of `config` with this descriptor.
    pub fn apply_to(&self, config: &mut Config) {
        config.backend = BackendConfig {
            storage_conn: self.storage_conn.clone(),
            queue_conn: self.queue_conn.clone(),
        };
        config.queue = self.queue_config();
        config.runtime = self.runtime_config();
    }

    fn queue_config(&self) -> QueueConfig {
        QueueConfig {
            visibility_timeout: Duration::from_secs(self.visibility_timeout_secs),
            inline_payload_limit: self.inline_payload_limit,
        }
    }

    fn runtime_config(&self) -> RuntimeConfig {
        RuntimeConfig {
            cell_poll_interval: Duration::from_millis(self.cell_poll_ms),
        }
    }

    /// Open the runtime this descriptor names.
    pub fn connect(&self) -> Result<RuntimeState, RuntimeError> {
        let backend = BackendConfig {
            storage_conn: self.storage_conn.clone(),
            queue_conn: self.queue_conn.clone(),
        };
        match backend.kind()? {
            BackendKind::Memory => Ok(RuntimeState::in_memory(&self.queue_config(), &self.runtime_config())),
        }
    }
}
