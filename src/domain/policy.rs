use serde::Deserialize;

/// What happens to a tenant's cooldown once its reminder fires.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReminderPolicy {
    /// Clear the cooldown; the next reminder needs a fresh bump.
    #[default]
    Once,
    /// Keep reminding every interval until a new bump or a reset.
    Repeat,
}
