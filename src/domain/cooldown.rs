use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

use super::{ActorId, PassId, TenantId};

/// Live cooldown record for one tenant.
///
/// `generation` is the fence checked by reminder callbacks: a timer armed for
/// generation N only acts while the stored record still carries N.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CooldownState {
    pub tenant: TenantId,
    pub generation: u64,
    pub last_bump: DateTime<Utc>,
    pub last_actor: ActorId,
}

/// What the store holds for a tenant. The generation outlives the state it
/// fenced, so clearing a cooldown never lets the counter move backward.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct StateSlot {
    pub generation: u64,
    pub state: Option<CooldownState>,
}

/// Append-only log row, one per accepted bump.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BumpHistoryEntry {
    pub tenant: TenantId,
    pub actor: ActorId,
    pub at: DateTime<Utc>,
}

/// A "(tenant, actor, timestamp) bump observed" signal from any event source.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BumpObservation {
    pub tenant: TenantId,
    pub actor: ActorId,
    pub observed_at: DateTime<Utc>,
    /// Set by polling detectors; passive observation leaves it empty.
    pub pass: Option<PassId>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TimeRemaining {
    /// No active cooldown: bumping is allowed now.
    Ready,
    Waiting(Duration),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Admission {
    Accept,
    /// Same real-world bump as the watermark, within tolerance.
    Duplicate,
    /// Older than the watermark.
    Stale,
    /// Later than now plus tolerance; a skewed or forged timestamp.
    FromFuture,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SettingsError {
    #[error("cooldown interval must be positive")]
    ZeroInterval,
    #[error("dedup tolerance must be shorter than the cooldown interval")]
    ToleranceTooWide,
    #[error("duration out of range: {0:?}")]
    OutOfRange(Duration),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CooldownSettings {
    interval: TimeDelta,
    dedup_tolerance: TimeDelta,
}

impl CooldownSettings {
    pub fn new(interval: Duration, dedup_tolerance: Duration) -> Result<Self, SettingsError> {
        if interval.is_zero() {
            return Err(SettingsError::ZeroInterval);
        }
        if dedup_tolerance >= interval {
            return Err(SettingsError::ToleranceTooWide);
        }
        let to_delta =
            |d: Duration| TimeDelta::from_std(d).map_err(|_| SettingsError::OutOfRange(d));
        Ok(Self {
            interval: to_delta(interval)?,
            dedup_tolerance: to_delta(dedup_tolerance)?,
        })
    }

    pub fn interval(&self) -> TimeDelta {
        self.interval
    }

    pub fn dedup_tolerance(&self) -> TimeDelta {
        self.dedup_tolerance
    }

    pub fn deadline_after(&self, bump_at: DateTime<Utc>) -> DateTime<Utc> {
        bump_at + self.interval
    }

    pub fn remaining(&self, state: Option<&CooldownState>, now: DateTime<Utc>) -> TimeRemaining {
        let Some(state) = state else {
            return TimeRemaining::Ready;
        };
        match (self.deadline_after(state.last_bump) - now).to_std() {
            Ok(left) if !left.is_zero() => TimeRemaining::Waiting(left),
            _ => TimeRemaining::Ready,
        }
    }

    /// First `fire_at + k * interval` (k >= 1) strictly after `now`.
    pub fn next_repeat(&self, fire_at: DateTime<Utc>, now: DateTime<Utc>) -> DateTime<Utc> {
        let next = fire_at + self.interval;
        if next > now {
            return next;
        }
        let step = self.interval.num_milliseconds().max(1);
        let behind = (now - fire_at).num_milliseconds();
        let k = behind / step + 1;
        fire_at + TimeDelta::milliseconds(step.saturating_mul(k))
    }

    pub fn admit(
        &self,
        observed_at: DateTime<Utc>,
        watermark: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Admission {
        // a future bump would become a watermark no real bump could pass
        if observed_at > now + self.dedup_tolerance {
            return Admission::FromFuture;
        }
        let Some(mark) = watermark else {
            return Admission::Accept;
        };
        if (observed_at - mark).abs() <= self.dedup_tolerance {
            Admission::Duplicate
        } else if observed_at < mark {
            Admission::Stale
        } else {
            Admission::Accept
        }
    }
}

/// Newest known bump for a tenant: live state or, once cleared, the log.
pub fn watermark(
    slot: &StateSlot,
    newest_entry: Option<&BumpHistoryEntry>,
) -> Option<DateTime<Utc>> {
    let live = slot.state.as_ref().map(|s| s.last_bump);
    let logged = newest_entry.map(|e| e.at);
    live.max(logged)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> CooldownSettings {
        CooldownSettings::new(Duration::from_secs(7200), Duration::from_secs(5)).unwrap()
    }

    fn t(secs: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000 + secs, 0).unwrap()
    }

    fn state_at(secs: i64) -> CooldownState {
        CooldownState {
            tenant: TenantId::parse("g1").unwrap(),
            generation: 1,
            last_bump: t(secs),
            last_actor: ActorId::parse("u1").unwrap(),
        }
    }

    #[test]
    fn rejects_bad_settings() {
        assert_eq!(
            CooldownSettings::new(Duration::ZERO, Duration::ZERO),
            Err(SettingsError::ZeroInterval)
        );
        assert_eq!(
            CooldownSettings::new(Duration::from_secs(5), Duration::from_secs(5)),
            Err(SettingsError::ToleranceTooWide)
        );
    }

    #[test]
    fn admit_classifies_against_watermark() {
        let s = settings();
        let now = t(3600);
        assert_eq!(s.admit(t(0), None, now), Admission::Accept);
        assert_eq!(s.admit(t(3), Some(t(0)), now), Admission::Duplicate);
        assert_eq!(s.admit(t(-3), Some(t(0)), now), Admission::Duplicate);
        assert_eq!(s.admit(t(-60), Some(t(0)), now), Admission::Stale);
        assert_eq!(s.admit(t(60), Some(t(0)), now), Admission::Accept);
    }

    #[test]
    fn admit_rejects_timestamps_ahead_of_now() {
        let s = settings();
        let now = t(0);
        assert_eq!(s.admit(t(5), None, now), Admission::Accept);
        assert_eq!(s.admit(t(6), None, now), Admission::FromFuture);
        assert_eq!(
            s.admit(t(365 * 24 * 3600), Some(t(-60)), now),
            Admission::FromFuture
        );
    }

    #[test]
    fn remaining_counts_down_then_ready() {
        let s = settings();
        let state = state_at(0);
        assert_eq!(s.remaining(None, t(0)), TimeRemaining::Ready);
        assert_eq!(
            s.remaining(Some(&state), t(3600)),
            TimeRemaining::Waiting(Duration::from_secs(3600))
        );
        assert_eq!(s.remaining(Some(&state), t(7200)), TimeRemaining::Ready);
        assert_eq!(s.remaining(Some(&state), t(9000)), TimeRemaining::Ready);
    }

    #[test]
    fn next_repeat_skips_missed_intervals() {
        let s = settings();
        assert_eq!(s.next_repeat(t(7200), t(7200)), t(14_400));
        assert_eq!(s.next_repeat(t(7200), t(20_000)), t(21_600));
        assert_eq!(s.next_repeat(t(7200), t(21_600)), t(28_800));
    }

    #[test]
    fn watermark_prefers_newest() {
        let slot = StateSlot {
            generation: 3,
            state: None,
        };
        let entry = BumpHistoryEntry {
            tenant: TenantId::parse("g1").unwrap(),
            actor: ActorId::parse("u1").unwrap(),
            at: t(10),
        };
        assert_eq!(watermark(&slot, Some(&entry)), Some(t(10)));
        assert_eq!(watermark(&StateSlot::default(), None), None);

        let live = StateSlot {
            generation: 4,
            state: Some(state_at(20)),
        };
        assert_eq!(watermark(&live, Some(&entry)), Some(t(20)));
    }
}
