use serde::{Deserialize, Serialize};

/// Shutdown order published back to a device after a threshold breach.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ShutdownCommand {
    pub device_id: i64,
    pub command: String,
}

impl ShutdownCommand {
    pub fn for_device(device_id: i64) -> Self {
        Self {
            device_id,
            command: "shutdown".to_string(),
        }
    }
}
