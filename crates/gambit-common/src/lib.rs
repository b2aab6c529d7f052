//! Common types and functions for Gambit.

#![warn(clippy::pedantic, missing_docs)]
#![allow(clippy::module_name_repetitions, clippy::default_trait_access)]

use std::{
    fmt::Display,
    ops::Sub,
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

pub mod artifact;
pub mod assignment;
pub mod identity;
pub mod payload;
pub mod status;
pub mod task;
pub mod version;

/// UTC timestamp used by Gambit, nanoseconds since the unix epoch.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[repr(transparent)]
#[serde(transparent)]
#[must_use]
pub struct UnixNanos(pub u64);

impl UnixNanos {
    /// Get the current timestamp from [`SystemTime`].
    pub fn now() -> Self {
        UnixNanos(
            SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .unwrap_or(Duration::ZERO)
                .as_nanos()
                .try_into()
                .unwrap_or(0),
        )
    }

    /// Subtract a duration, stopping at the epoch.
    pub fn saturating_sub(self, duration: Duration) -> Self {
        UnixNanos(
            self.0
                .saturating_sub(duration.as_nanos().try_into().unwrap_or(u64::MAX)),
        )
    }

    /// Convert to an [`OffsetDateTime`], clamping values that
    /// cannot be represented to the epoch.
    pub fn to_datetime(self) -> OffsetDateTime {
        OffsetDateTime::from_unix_timestamp_nanos(i128::from(self.0))
            .unwrap_or(OffsetDateTime::UNIX_EPOCH)
    }
}

impl Sub<Duration> for UnixNanos {
    type Output = UnixNanos;

    fn sub(self, rhs: Duration) -> Self::Output {
        self.saturating_sub(rhs)
    }
}

impl From<u64> for UnixNanos {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

impl From<UnixNanos> for u64 {
    fn from(value: UnixNanos) -> Self {
        value.0
    }
}

impl From<UnixNanos> for OffsetDateTime {
    fn from(value: UnixNanos) -> Self {
        value.to_datetime()
    }
}

impl From<OffsetDateTime> for UnixNanos {
    fn from(value: OffsetDateTime) -> Self {
        UnixNanos(value.unix_timestamp_nanos().try_into().unwrap_or(0))
    }
}

macro_rules! id_type {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(
            Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
        )]
        #[repr(transparent)]
        #[serde(transparent)]
        pub struct $name(pub u64);

        impl Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                self.0.fmt(f)
            }
        }

        impl From<u64> for $name {
            fn from(value: u64) -> Self {
                Self(value)
            }
        }
    };
}

id_type!(
    /// Identifier of a [`task::Task`].
    TaskId
);
id_type!(
    /// Identifier of an [`artifact::TrainingRun`].
    TrainingRunId
);
id_type!(
    /// Identifier of an [`artifact::Network`].
    NetworkId
);
id_type!(
    /// Identifier of an [`assignment::TaskAssignment`].
    AssignmentId
);
id_type!(
    /// Identifier of an [`assignment::MatchGame`].
    MatchGameId
);
id_type!(
    /// Identifier of an [`identity::AuthToken`].
    TokenId
);
id_type!(
    /// Identifier of a legacy [`identity::LegacyUser`].
    UserId
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn saturating_sub_stops_at_epoch() {
        assert_eq!(
            UnixNanos(5).saturating_sub(Duration::from_secs(1)),
            UnixNanos(0)
        );
        assert_eq!(
            UnixNanos(3_000_000_000) - Duration::from_secs(1),
            UnixNanos(2_000_000_000)
        );
    }

    #[test]
    fn datetime_conversion() {
        let nanos = UnixNanos(1_700_000_000_123_456_789);
        let dt: OffsetDateTime = nanos.into();
        assert_eq!(dt.nanosecond(), 123_456_789);
        assert_eq!(UnixNanos::from(dt), nanos);
    }
}
