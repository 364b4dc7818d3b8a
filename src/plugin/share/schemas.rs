//! JSON schemas published by the share snapshot plugin.

use serde_json::{Value, json};

/// Options accepted when protecting a share.
#[must_use]
pub fn options_schema() -> Value {
    json!({
        "title": "Share Protection Options",
        "type": "object",
        "properties": {
            "snapshot_name": {
                "type": "string",
                "title": "Snapshot Name",
                "description": "The name of the snapshot.",
                "default": null
            },
            "description": {
                "type": "string",
                "title": "Description",
                "description": "The description of the snapshot."
            },
            "force": {
                "type": "boolean",
                "title": "Force",
                "description": "Snapshot the share even when it is busy.",
                "default": false
            }
        },
        "required": ["snapshot_name", "description", "force"]
    })
}

/// Options accepted when restoring a share.
#[must_use]
pub fn restore_schema() -> Value {
    json!({
        "title": "Share Protection Restore",
        "type": "object",
        "properties": {
            "restore_name": {
                "type": "string",
                "title": "Restore Share Name",
                "description": "The name of the restored share.",
                "default": null
            },
            "restore_description": {
                "type": "string",
                "title": "Restore Description",
                "description": "The description of the restored share.",
                "default": null
            }
        }
    })
}

/// Information persisted for a protected share.
#[must_use]
pub fn saved_info_schema() -> Value {
    json!({
        "title": "Share Protection Saved Info",
        "type": "object",
        "properties": {
            "snapshot_id": {
                "type": "string",
                "title": "Snapshot ID",
                "description": "Identifier of the share snapshot."
            },
            "share_id": {
                "type": "string",
                "title": "Share ID",
                "description": "Identifier of the protected share."
            }
        },
        "required": ["snapshot_id", "share_id"]
    })
}
