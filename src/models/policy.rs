use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyKind {
    NoShow,
    LateCancellation,
    Deposit,
    Rescheduling,
}

impl PolicyKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            PolicyKind::NoShow => "no_show",
            PolicyKind::LateCancellation => "late_cancellation",
            PolicyKind::Deposit => "deposit",
            PolicyKind::Rescheduling => "rescheduling",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "no_show" => Some(PolicyKind::NoShow),
            "late_cancellation" => Some(PolicyKind::LateCancellation),
            "deposit" => Some(PolicyKind::Deposit),
            "rescheduling" => Some(PolicyKind::Rescheduling),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FeeType {
    Fixed,
    Percentage,
}

impl FeeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            FeeType::Fixed => "fixed",
            FeeType::Percentage => "percentage",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "percentage" => FeeType::Percentage,
            _ => FeeType::Fixed,
        }
    }
}

/// One business rule as configured in settings. `fee_amount` is minor
/// currency units for `fixed`, a whole percent of the service price for
/// `percentage`. `window_hours` and `free_reschedules` only apply to the
/// kinds that use them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Policy {
    pub kind: PolicyKind,
    pub enabled: bool,
    pub fee_type: FeeType,
    pub fee_amount: i64,
    pub window_hours: i64,
    pub free_reschedules: i64,
}

impl Policy {
    pub fn fee_for(&self, price_minor: i64) -> i64 {
        match self.fee_type {
            FeeType::Fixed => self.fee_amount,
            FeeType::Percentage => price_minor * self.fee_amount / 100,
        }
    }
}

/// The policy values in effect when an appointment was booked, frozen into
/// the appointment row. Later policy edits never change the fee obligations
/// of existing bookings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PolicySnapshot {
    pub no_show: Option<Policy>,
    pub late_cancellation: Option<Policy>,
    pub deposit: Option<Policy>,
    pub rescheduling: Option<Policy>,
    pub deposit_forfeit_on_cancel: bool,
}

impl PolicySnapshot {
    pub fn from_policies(policies: &[Policy], deposit_forfeit_on_cancel: bool) -> Self {
        let mut snapshot = PolicySnapshot {
            deposit_forfeit_on_cancel,
            ..Default::default()
        };
        for policy in policies.iter().filter(|p| p.enabled) {
            match policy.kind {
                PolicyKind::NoShow => snapshot.no_show = Some(policy.clone()),
                PolicyKind::LateCancellation => snapshot.late_cancellation = Some(policy.clone()),
                PolicyKind::Deposit => snapshot.deposit = Some(policy.clone()),
                PolicyKind::Rescheduling => snapshot.rescheduling = Some(policy.clone()),
            }
        }
        snapshot
    }

    pub fn from_json(s: &str) -> anyhow::Result<Self> {
        Ok(serde_json::from_str(s)?)
    }

    pub fn to_json(&self) -> anyhow::Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}
