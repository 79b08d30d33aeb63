//! The booking state machine: one transition table, consulted by every
//! status change.
//!
//! | from                     | to        | who                               |
//! |--------------------------|-----------|-----------------------------------|
//! | pending                  | confirmed | admin                             |
//! | confirmed                | paid      | admin, deposit policy only        |
//! | pending, confirmed, paid | cancelled | owner or admin                    |
//! | pending                  | expired   | expiry sweep                      |
//! | confirmed, paid          | completed | admin                             |
//! | cancelled                | pending   | admin, if `reopen_cancelled`      |
//! | expired                  | pending   | admin, if `reopen_expired`        |

use crate::model::*;
use crate::policy::{percent_of, BookingPolicy};

use super::EngineError;

/// Who may fire a transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    Admin,
    OwnerOrAdmin,
    /// Only the expiry sweep.
    System,
}

/// Look up `from → to` in the table. `None` means the edge does not exist
/// under this policy.
pub fn rule(from: BookingStatus, to: BookingStatus, policy: &BookingPolicy) -> Option<Trigger> {
    use BookingStatus::*;
    match (from, to) {
        (Pending, Confirmed) => Some(Trigger::Admin),
        (Confirmed, Paid) if policy.deposit.is_enabled() => Some(Trigger::Admin),
        (Pending | Confirmed | Paid, Cancelled) => Some(Trigger::OwnerOrAdmin),
        (Pending, Expired) => Some(Trigger::System),
        (Confirmed | Paid, Completed) => Some(Trigger::Admin),
        (Cancelled, Pending) if policy.reopen_cancelled => Some(Trigger::Admin),
        (Expired, Pending) if policy.reopen_expired => Some(Trigger::Admin),
        _ => None,
    }
}

/// Every status reachable from `from` under `policy`.
pub fn allowed_targets(from: BookingStatus, policy: &BookingPolicy) -> Vec<BookingStatus> {
    BookingStatus::ALL
        .into_iter()
        .filter(|to| rule(from, *to, policy).is_some())
        .collect()
}

/// Decide whether `actor` may move `booking` to `to`.
///
/// Checked in order: access to the booking, no-op, table edge, trigger.
pub fn authorize(
    booking: &Booking,
    to: BookingStatus,
    actor: &Actor,
    policy: &BookingPolicy,
) -> Result<Trigger, EngineError> {
    if !actor.can_view(booking) {
        return Err(EngineError::forbidden("you don't have access to this booking"));
    }
    let from = booking.status;
    if from == to {
        return Err(EngineError::conflict(format!("booking is already {from}")));
    }
    let trigger = rule(from, to, policy).ok_or(EngineError::InvalidTransition { from, to })?;
    match (trigger, actor) {
        (Trigger::Admin, Actor::Admin(_)) => {}
        (Trigger::Admin, _) => {
            return Err(EngineError::forbidden(format!(
                "only an admin can move a booking to {to}"
            )));
        }
        (Trigger::OwnerOrAdmin, Actor::Admin(_) | Actor::Customer(_)) => {}
        (Trigger::OwnerOrAdmin, Actor::System) => {
            return Err(EngineError::InvalidTransition { from, to });
        }
        (Trigger::System, Actor::System) => {}
        // Expiry is a consequence of the deadline, never a user action.
        (Trigger::System, _) => return Err(EngineError::InvalidTransition { from, to }),
    }
    Ok(trigger)
}

/// Refund owed when a booking in `from` is cancelled: the configured share
/// of the total once the booking is fully paid, otherwise nothing. Under a
/// deposit policy only `paid` is fully paid; without one, `confirmed` is.
pub fn refund_for(
    from: BookingStatus,
    total_price: Money,
    policy: &BookingPolicy,
) -> Result<Money, EngineError> {
    let fully_paid = match from {
        BookingStatus::Paid => true,
        BookingStatus::Confirmed => !policy.deposit.is_enabled(),
        _ => false,
    };
    if !fully_paid {
        return Ok(0);
    }
    percent_of(total_price, policy.refund_percent)
        .ok_or(EngineError::LimitExceeded("total price overflow"))
}
