//! Client ↔ engine message protocol.
//!
//! Commands arrive as JSON objects tagged by `action`, notices go out tagged
//! by `type`. Field names are camelCase on the wire.

use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Command {
    /// Sent by a client on startup; makes sure the engine has booted.
    Initialize,
    CheckForUpdates {
        #[serde(default)]
        nonce: Option<u64>,
    },
    ActivateUpdate {
        #[serde(default)]
        nonce: Option<u64>,
    },
}
impl Command {
    /// `None` for anything that isn't a recognised command.
    pub fn from_value(value: Value) -> Option<Self> {
        serde_json::from_value(value).ok()
    }

    pub fn nonce(&self) -> Option<u64> {
        match self {
            Self::Initialize => None,
            Self::CheckForUpdates { nonce } | Self::ActivateUpdate { nonce } => *nonce,
        }
    }
}

/// Public description of a version.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VersionInfo {
    pub hash: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub app_data: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE", rename_all_fields = "camelCase")]
pub enum Notice {
    VersionDetected {
        version: VersionInfo,
    },
    NoNewVersionDetected {
        version: VersionInfo,
    },
    VersionReady {
        current_version: VersionInfo,
        latest_version: VersionInfo,
    },
    VersionInstallationFailed {
        version: VersionInfo,
        error: String,
    },
    VersionActivated {
        previous: Option<VersionInfo>,
        current: VersionInfo,
    },
    UnrecoverableState {
        reason: String,
    },
    OperationCompleted {
        nonce: Option<u64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        result: Option<bool>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_command_from_value() {
        assert_eq!(Command::from_value(json!({"action": "INITIALIZE"})), Some(Command::Initialize));
        assert_eq!(
            Command::from_value(json!({"action": "CHECK_FOR_UPDATES", "nonce": 7})),
            Some(Command::CheckForUpdates { nonce: Some(7) })
        );
        assert_eq!(Command::from_value(json!({"action": "ACTIVATE_UPDATE"})), Some(Command::ActivateUpdate { nonce: None }));
        assert_eq!(Command::from_value(json!({"action": "SELF_DESTRUCT"})), None);
        assert_eq!(Command::from_value(json!("INITIALIZE")), None);
    }

    #[test]
    fn test_notice_wire_format() {
        let notice = Notice::VersionReady {
            current_version: VersionInfo { hash: "a".into(), app_data: None },
            latest_version: VersionInfo { hash: "b".into(), app_data: Some(json!({"release": 2})) },
        };
        assert_eq!(
            serde_json::to_value(&notice).unwrap(),
            json!({
                "type": "VERSION_READY",
                "currentVersion": {"hash": "a"},
                "latestVersion": {"hash": "b", "appData": {"release": 2}},
            })
        );
        let completed = Notice::OperationCompleted { nonce: Some(3), result: Some(true), error: None };
        assert_eq!(serde_json::to_value(&completed).unwrap(), json!({"type": "OPERATION_COMPLETED", "nonce": 3, "result": true}));
    }
}
