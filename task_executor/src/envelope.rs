// Copyright 2024 Toolchain Labs, Inc. All rights reserved.
// Licensed under the Apache License, Version 2.0 (see LICENSE).

//! Inbound task envelopes (SPEC_FULL §3/§6.1).

use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;

/// Oldest `datetime_offset` a backfill envelope may name (spec §3/§6.1), mirroring the
/// original's `not_older_than_30_days` validator.
const MAX_BACKFILL_AGE: Duration = Duration::days(30);

#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct BackfillEnvelope {
    pub channel_url: String,
    pub datetime_offset: DateTime<Utc>,
}

impl BackfillEnvelope {
    /// Rejects a `datetime_offset` older than `now - 30 days` (spec §3: `datetime_offset ≥
    /// now − 30 days`).
    pub fn validate(&self) -> Result<(), String> {
        let floor = Utc::now() - MAX_BACKFILL_AGE;
        if self.datetime_offset < floor {
            return Err(format!(
                "datetime_offset {} is older than the 30-day floor {floor}",
                self.datetime_offset
            ));
        }
        Ok(())
    }
}

#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct IncrementalEnvelope {
    pub channel_id: i64,
    pub last_message_id: i64,
}

impl IncrementalEnvelope {
    /// Rejects a non-positive `last_message_id` (spec §3: `last_message_id > 0`).
    pub fn validate(&self) -> Result<(), String> {
        if self.last_message_id <= 0 {
            return Err(format!("last_message_id {} is not positive", self.last_message_id));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backfill_within_30_days_is_valid() {
        let envelope = BackfillEnvelope {
            channel_url: "https://t.me/example".to_owned(),
            datetime_offset: Utc::now() - Duration::days(5),
        };
        assert!(envelope.validate().is_ok());
    }

    #[test]
    fn backfill_older_than_30_days_is_rejected() {
        let envelope = BackfillEnvelope {
            channel_url: "https://t.me/example".to_owned(),
            datetime_offset: Utc::now() - Duration::days(31),
        };
        assert!(envelope.validate().is_err());
    }

    #[test]
    fn incremental_with_positive_id_is_valid() {
        let envelope = IncrementalEnvelope { channel_id: 1, last_message_id: 1 };
        assert!(envelope.validate().is_ok());
    }

    #[test]
    fn incremental_with_non_positive_id_is_rejected() {
        let envelope = IncrementalEnvelope { channel_id: 1, last_message_id: 0 };
        assert!(envelope.validate().is_err());

        let negative = IncrementalEnvelope { channel_id: 1, last_message_id: -5 };
        assert!(negative.validate().is_err());
    }
}
