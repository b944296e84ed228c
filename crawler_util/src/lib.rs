// Copyright 2023 Toolchain Labs, Inc. All rights reserved.
// Licensed under the Apache License, Version 2.0 (see LICENSE).

//! Small stateless helpers shared by every crate in this workspace: instance naming and
//! random UUID generation.

use chrono::{DateTime, Utc};
use rand::Rng;
use uuid::Uuid;

pub type InstanceName = String;

/// Generates a new UUID.
///
/// Unlike `Uuid::new_v4`, which goes through the `getrandom` crate, this uses `rand`'s
/// thread-local RNG. `getrandom` always tries to use the kernel's RNG, which is less
/// flexible than `rand`'s pluggable RNGs (and `getrandom`'s own docs recommend `rand`).
pub fn generate_uuid() -> String {
    let mut rng = rand::thread_rng();
    Uuid::from_bytes(rng.gen()).to_string()
}

/// Default pod/instance identifier used when none is configured, mirroring the
/// original `POD_NAME` setting's `default_factory=str(uuid4())`.
pub fn default_instance_name() -> InstanceName {
    generate_uuid()
}

/// Current instant, used as the implicit upper bound of a backfill range when the
/// caller does not supply one.
pub fn now() -> DateTime<Utc> {
    Utc::now()
}

#[cfg(test)]
mod tests {
    use super::generate_uuid;

    #[test]
    fn generates_well_formed_uuids() {
        let a = generate_uuid();
        let b = generate_uuid();
        assert_ne!(a, b);
        assert_eq!(a.len(), 36);
    }
}
