//! Persisted key layout.
//!
//! Logical keys, all under one flat namespace:
//!
//! | Key                  | Record                                    |
//! |----------------------|-------------------------------------------|
//! | `me`                 | local identity (instance id, key hash)    |
//! | `options`            | operator settings                         |
//! | `instance/<id>`      | one record per known remote instance      |
//! | `instanceIds`        | index of known instance ids               |
//!
//! The `instanceIds` index is rewritten on every full save so that ids
//! removed by a reset drop out of it.

use proxypact_types::InstanceId;

/// Key of the local identity record.
pub const ME: &str = "me";

/// Key of the operator settings record.
pub const OPTIONS: &str = "options";

/// Key of the instance-id index record.
pub const INSTANCE_IDS: &str = "instanceIds";

/// Prefix of per-instance records.
pub const INSTANCE_PREFIX: &str = "instance/";

/// Builds the storage key of one remote instance record.
pub fn instance(instance_id: &InstanceId) -> String {
    format!("{INSTANCE_PREFIX}{instance_id}")
}

/// Extracts the instance id from an instance record key, if it is one.
pub fn parse_instance(key: &str) -> Option<InstanceId> {
    key.strip_prefix(INSTANCE_PREFIX)
        .filter(|rest| !rest.is_empty())
        .map(InstanceId::new)
}
