//! Order status transition table

use shared::models::OrderStatus;

/// Whether `from → to` is a legal order transition
pub fn can_transition(from: OrderStatus, to: OrderStatus) -> bool {
    use OrderStatus::*;
    match (from, to) {
        (Created, PendingDispatch)
        | (PendingDispatch, Dispatching)
        | (Dispatching, Accepted)
        | (Accepted, DriverArriving)
        | (DriverArriving, InProgress)
        | (InProgress, Completed)
        | (PendingDispatch, Rejected)
        | (Dispatching, Rejected)
        | (Completed, Refunded) => true,
        (from, Cancelled) => from.is_cancellable(),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use OrderStatus::*;

    #[test]
    fn test_happy_path_is_legal() {
        let path = [
            Created,
            PendingDispatch,
            Dispatching,
            Accepted,
            DriverArriving,
            InProgress,
            Completed,
            Refunded,
        ];
        for pair in path.windows(2) {
            assert!(can_transition(pair[0], pair[1]), "{} -> {}", pair[0], pair[1]);
        }
    }

    #[test]
    fn test_cancel_only_before_ride_starts() {
        for from in [Created, PendingDispatch, Dispatching, Accepted, DriverArriving] {
            assert!(can_transition(from, Cancelled));
        }
        for from in [InProgress, Completed, Refunded, Rejected, Cancelled] {
            assert!(!can_transition(from, Cancelled));
        }
    }

    #[test]
    fn test_no_skipping_or_reopening() {
        assert!(!can_transition(Accepted, InProgress));
        assert!(!can_transition(Dispatching, Completed));
        assert!(!can_transition(Rejected, Dispatching));
        assert!(!can_transition(Cancelled, PendingDispatch));
        assert!(!can_transition(InProgress, Refunded));
    }
}
