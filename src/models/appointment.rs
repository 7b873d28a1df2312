use chrono::{Duration, NaiveDateTime};
use serde::{Deserialize, Serialize};

use super::policy::PolicySnapshot;
use super::service::ServiceSnapshot;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AppointmentStatus {
    Pending,
    Confirmed,
    Completed,
    Cancelled,
    NoShow,
    Rescheduled,
}

impl AppointmentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AppointmentStatus::Pending => "pending",
            AppointmentStatus::Confirmed => "confirmed",
            AppointmentStatus::Completed => "completed",
            AppointmentStatus::Cancelled => "cancelled",
            AppointmentStatus::NoShow => "no_show",
            AppointmentStatus::Rescheduled => "rescheduled",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "confirmed" => AppointmentStatus::Confirmed,
            "completed" => AppointmentStatus::Completed,
            "cancelled" => AppointmentStatus::Cancelled,
            "no_show" => AppointmentStatus::NoShow,
            "rescheduled" => AppointmentStatus::Rescheduled,
            _ => AppointmentStatus::Pending,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            AppointmentStatus::Completed
                | AppointmentStatus::Cancelled
                | AppointmentStatus::NoShow
                | AppointmentStatus::Rescheduled
        )
    }

    pub fn can_transition_to(&self, next: AppointmentStatus) -> bool {
        match self {
            AppointmentStatus::Pending => matches!(
                next,
                AppointmentStatus::Confirmed | AppointmentStatus::Cancelled
            ),
            AppointmentStatus::Confirmed => matches!(
                next,
                AppointmentStatus::Completed
                    | AppointmentStatus::Cancelled
                    | AppointmentStatus::NoShow
                    | AppointmentStatus::Rescheduled
            ),
            // Terminal states accept nothing.
            _ => false,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CancelReason {
    ClientRequest,
    BusinessRequest,
    PaymentFailed,
}

impl CancelReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            CancelReason::ClientRequest => "client_request",
            CancelReason::BusinessRequest => "business_request",
            CancelReason::PaymentFailed => "payment_failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "client_request" => Some(CancelReason::ClientRequest),
            "business_request" => Some(CancelReason::BusinessRequest),
            "payment_failed" => Some(CancelReason::PaymentFailed),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Appointment {
    pub id: String,
    pub business_id: String,
    pub client_id: String,
    pub service: ServiceSnapshot,
    pub start_at: NaiveDateTime,
    pub status: AppointmentStatus,
    pub cancel_reason: Option<CancelReason>,
    pub policies: PolicySnapshot,
    pub reschedule_count: i32,
    pub rescheduled_from: Option<String>,
    pub deposit_authorization_id: Option<String>,
    pub deposit_captured: bool,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

impl Appointment {
    /// End is always derived from the immutable service snapshot.
    pub fn end_at(&self) -> NaiveDateTime {
        self.start_at + Duration::minutes(self.service.duration_minutes as i64)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FeeReason {
    NoShow,
    LateCancellation,
    RescheduleFee,
    DepositForfeit,
    ServicePayment,
    Refund,
}

impl FeeReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            FeeReason::NoShow => "no_show",
            FeeReason::LateCancellation => "late_cancellation",
            FeeReason::RescheduleFee => "reschedule_fee",
            FeeReason::DepositForfeit => "deposit_forfeit",
            FeeReason::ServicePayment => "service_payment",
            FeeReason::Refund => "refund",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "no_show" => Some(FeeReason::NoShow),
            "late_cancellation" => Some(FeeReason::LateCancellation),
            "reschedule_fee" => Some(FeeReason::RescheduleFee),
            "deposit_forfeit" => Some(FeeReason::DepositForfeit),
            "service_payment" => Some(FeeReason::ServicePayment),
            "refund" => Some(FeeReason::Refund),
            _ => None,
        }
    }
}

/// One row of the append-only fee ledger. Entries are never deleted; a
/// reversal is a new `refund` entry with a negative amount.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeeEntry {
    pub id: String,
    pub appointment_id: String,
    pub reason: FeeReason,
    pub amount_minor: i64,
    pub collected: bool,
    pub receipt_id: Option<String>,
    pub applied_at: NaiveDateTime,
}

/// A scheduled reminder registered with the notification dispatcher.
/// `provider_ref` is the dispatcher's own id, needed to cancel it later.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Reminder {
    pub id: String,
    pub appointment_id: String,
    pub provider_ref: String,
    pub send_at: NaiveDateTime,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pending_transitions() {
        assert!(AppointmentStatus::Pending.can_transition_to(AppointmentStatus::Confirmed));
        assert!(AppointmentStatus::Pending.can_transition_to(AppointmentStatus::Cancelled));
        assert!(!AppointmentStatus::Pending.can_transition_to(AppointmentStatus::Completed));
        assert!(!AppointmentStatus::Pending.can_transition_to(AppointmentStatus::NoShow));
    }

    #[test]
    fn test_confirmed_transitions() {
        for next in [
            AppointmentStatus::Completed,
            AppointmentStatus::Cancelled,
            AppointmentStatus::NoShow,
            AppointmentStatus::Rescheduled,
        ] {
            assert!(AppointmentStatus::Confirmed.can_transition_to(next));
        }
        assert!(!AppointmentStatus::Confirmed.can_transition_to(AppointmentStatus::Pending));
    }

    #[test]
    fn test_terminal_states_are_final() {
        for terminal in [
            AppointmentStatus::Completed,
            AppointmentStatus::Cancelled,
            AppointmentStatus::NoShow,
            AppointmentStatus::Rescheduled,
        ] {
            assert!(terminal.is_terminal());
            for next in [
                AppointmentStatus::Pending,
                AppointmentStatus::Confirmed,
                AppointmentStatus::Completed,
                AppointmentStatus::Cancelled,
                AppointmentStatus::NoShow,
                AppointmentStatus::Rescheduled,
            ] {
                assert!(!terminal.can_transition_to(next));
            }
        }
    }

    #[test]
    fn test_status_round_trip() {
        for status in [
            AppointmentStatus::Pending,
            AppointmentStatus::Confirmed,
            AppointmentStatus::Completed,
            AppointmentStatus::Cancelled,
            AppointmentStatus::NoShow,
            AppointmentStatus::Rescheduled,
        ] {
            assert_eq!(AppointmentStatus::parse(status.as_str()), status);
        }
    }
}
