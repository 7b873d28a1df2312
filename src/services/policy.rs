use chrono::{Duration, NaiveDateTime};

use crate::models::{Appointment, PolicySnapshot, ServiceSnapshot};

/// Lifecycle change a caller is asking for, evaluated against the policy
/// snapshot frozen into the appointment at booking time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleRequest {
    Cancel,
    Reschedule,
    NoShow,
    Complete,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecisionReason {
    NoFee,
    FreeCancellation,
    LateCancellationFee,
    NoShowFee,
    FreeReschedule,
    RescheduleFee,
    RescheduleWindowClosed,
}

impl DecisionReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            DecisionReason::NoFee => "no_fee",
            DecisionReason::FreeCancellation => "free_cancellation",
            DecisionReason::LateCancellationFee => "late_cancellation_fee",
            DecisionReason::NoShowFee => "no_show_fee",
            DecisionReason::FreeReschedule => "free_reschedule",
            DecisionReason::RescheduleFee => "reschedule_fee",
            DecisionReason::RescheduleWindowClosed => "reschedule_window_closed",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PolicyDecision {
    pub allowed: bool,
    pub fee_minor: i64,
    pub reason: DecisionReason,
}

impl PolicyDecision {
    fn allowed(fee_minor: i64, reason: DecisionReason) -> Self {
        Self {
            allowed: true,
            fee_minor,
            reason,
        }
    }

    fn denied(reason: DecisionReason) -> Self {
        Self {
            allowed: false,
            fee_minor: 0,
            reason,
        }
    }
}

/// Pure policy evaluation. Returns a decision; executing the transition and
/// collecting any fee is the orchestrator's job.
pub fn evaluate(
    appointment: &Appointment,
    request: LifecycleRequest,
    now: NaiveDateTime,
) -> PolicyDecision {
    let policies = &appointment.policies;
    let price = appointment.service.price_minor;

    match request {
        LifecycleRequest::NoShow => match &policies.no_show {
            Some(policy) => PolicyDecision::allowed(policy.fee_for(price), DecisionReason::NoShowFee),
            None => PolicyDecision::allowed(0, DecisionReason::NoFee),
        },

        LifecycleRequest::Cancel => {
            // A cancellation after the start time is effectively a no-show;
            // the harsher rule wins.
            if now >= appointment.start_at {
                if let Some(policy) = &policies.no_show {
                    return PolicyDecision::allowed(
                        policy.fee_for(price),
                        DecisionReason::NoShowFee,
                    );
                }
            }
            match &policies.late_cancellation {
                Some(policy) => {
                    let boundary = appointment.start_at - Duration::hours(policy.window_hours);
                    if now >= boundary {
                        PolicyDecision::allowed(
                            policy.fee_for(price),
                            DecisionReason::LateCancellationFee,
                        )
                    } else {
                        PolicyDecision::allowed(0, DecisionReason::FreeCancellation)
                    }
                }
                None => PolicyDecision::allowed(0, DecisionReason::FreeCancellation),
            }
        }

        LifecycleRequest::Reschedule => match &policies.rescheduling {
            Some(policy) => {
                let boundary = appointment.start_at - Duration::hours(policy.window_hours);
                if now > boundary {
                    // Too close to the appointment: rescheduling is refused
                    // outright, not fee-bearing. The client must cancel.
                    return PolicyDecision::denied(DecisionReason::RescheduleWindowClosed);
                }
                if (appointment.reschedule_count as i64) < policy.free_reschedules {
                    PolicyDecision::allowed(0, DecisionReason::FreeReschedule)
                } else {
                    PolicyDecision::allowed(policy.fee_for(price), DecisionReason::RescheduleFee)
                }
            }
            None => PolicyDecision::allowed(0, DecisionReason::FreeReschedule),
        },

        LifecycleRequest::Complete => PolicyDecision::allowed(0, DecisionReason::NoFee),
    }
}

/// Deposit due at booking time, if any. Evaluated once; the authorization is
/// captured on completion and released or forfeited on early exit.
pub fn deposit_due(policies: &PolicySnapshot, service: &ServiceSnapshot) -> Option<i64> {
    if !service.requires_deposit {
        return None;
    }
    let policy = policies.deposit.as_ref()?;
    let amount = policy.fee_for(service.price_minor);
    (amount > 0).then_some(amount)
}
