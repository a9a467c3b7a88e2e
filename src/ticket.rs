use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::{TransferError, TransferResult};
use crate::state::{TicketStep, TransferTicket};
use crate::store::TransferStore;

/// Short-lived, single-purpose tickets that walk an upload through
/// `Issued -> SpecChecked -> Chunking`.
pub struct TicketGate {
    store: Arc<dyn TransferStore>,
    ttl: Duration,
}

impl TicketGate {
    pub fn new(store: Arc<dyn TransferStore>, ttl_secs: i64) -> Self {
        Self {
            store,
            ttl: Duration::seconds(ttl_secs),
        }
    }

    /// Issue a ticket for `access_token`. A token holds at most one live
    /// ticket: an unexpired one is handed out again, reset to `Issued`.
    pub fn issue(&self, access_token: &str, user_name: &str) -> TransferResult<TransferTicket> {
        self.issue_at(access_token, user_name, Utc::now())
    }

    fn issue_at(
        &self,
        access_token: &str,
        user_name: &str,
        now: DateTime<Utc>,
    ) -> TransferResult<TransferTicket> {
        if let Some(mut existing) = self
            .store
            .latest_ticket_after(access_token, now - self.ttl)?
        {
            debug!(ticket = %existing.ticket, "reusing live ticket");
            self.store.update_ticket_step(&existing.ticket, TicketStep::Issued)?;
            existing.step = TicketStep::Issued;
            return Ok(existing);
        }

        let ticket = TransferTicket {
            ticket: Uuid::new_v4().simple().to_string(),
            access_token: access_token.to_string(),
            user_name: user_name.to_string(),
            step: TicketStep::Issued,
            created_at: now,
        };
        self.store.insert_ticket(ticket.clone())?;
        Ok(ticket)
    }

    /// Check that `ticket` belongs to `access_token`, is inside its TTL and
    /// sits exactly at `required`.
    pub fn check(
        &self,
        ticket: &str,
        access_token: &str,
        required: TicketStep,
    ) -> TransferResult<TransferTicket> {
        self.check_at(ticket, access_token, required, Utc::now())
    }

    fn check_at(
        &self,
        ticket: &str,
        access_token: &str,
        required: TicketStep,
        now: DateTime<Utc>,
    ) -> TransferResult<TransferTicket> {
        let found = self
            .store
            .get_ticket(ticket)?
            .filter(|t| t.access_token == access_token)
            .ok_or_else(|| TransferError::ticket("unknown ticket"))?;

        if now - found.created_at >= self.ttl {
            return Err(TransferError::ticket("ticket expired"));
        }
        if found.step != required {
            warn!(
                ticket,
                current = ?found.step,
                required = ?required,
                "ticket at wrong step"
            );
            return Err(TransferError::ticket(format!(
                "ticket is at {:?}, operation needs {:?}",
                found.step, required
            )));
        }
        Ok(found)
    }

    /// Move a ticket from `from` to the step right after it.
    pub fn advance(
        &self,
        ticket: &str,
        access_token: &str,
        from: TicketStep,
    ) -> TransferResult<TransferTicket> {
        let mut found = self.check(ticket, access_token, from)?;
        let next = from
            .next()
            .ok_or_else(|| TransferError::ticket("ticket is already at its last step"))?;
        self.store.update_ticket_step(ticket, next)?;
        found.step = next;
        Ok(found)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn gate() -> (Arc<MemoryStore>, TicketGate) {
        let store = Arc::new(MemoryStore::new());
        let gate = TicketGate::new(store.clone(), 120);
        (store, gate)
    }

    #[test]
    fn chunk_step_needs_chunking_ticket() {
        let (_, gate) = gate();
        let ticket = gate.issue("token", "dev").unwrap();
        let id = ticket.ticket.as_str();

        assert!(gate.check(id, "token", TicketStep::Chunking).is_err());
        gate.advance(id, "token", TicketStep::Issued).unwrap();
        assert!(gate.check(id, "token", TicketStep::Chunking).is_err());
        gate.advance(id, "token", TicketStep::SpecChecked).unwrap();
        assert!(gate.check(id, "token", TicketStep::Chunking).is_ok());
    }

    #[test]
    fn steps_cannot_be_skipped() {
        let (_, gate) = gate();
        let ticket = gate.issue("token", "dev").unwrap();
        assert!(gate
            .advance(&ticket.ticket, "token", TicketStep::SpecChecked)
            .is_err());
    }

    #[test]
    fn wrong_token_is_rejected() {
        let (_, gate) = gate();
        let ticket = gate.issue("token", "dev").unwrap();
        assert!(gate.check(&ticket.ticket, "other", TicketStep::Issued).is_err());
    }

    #[test]
    fn expired_ticket_fails_at_any_step() {
        let (store, gate) = gate();
        store
            .insert_ticket(TransferTicket {
                ticket: "old".into(),
                access_token: "token".into(),
                user_name: "dev".into(),
                step: TicketStep::Chunking,
                created_at: Utc::now() - Duration::seconds(121),
            })
            .unwrap();

        let err = gate.check("old", "token", TicketStep::Chunking).unwrap_err();
        assert!(matches!(err, TransferError::TicketRejected { ref reason } if reason == "ticket expired"));
    }

    #[test]
    fn ttl_boundary_uses_check_time() {
        let (_, gate) = gate();
        let ticket = gate.issue("token", "dev").unwrap();
        let later = ticket.created_at + Duration::seconds(119);
        assert!(gate
            .check_at(&ticket.ticket, "token", TicketStep::Issued, later)
            .is_ok());
        let expired = ticket.created_at + Duration::seconds(120);
        assert!(gate
            .check_at(&ticket.ticket, "token", TicketStep::Issued, expired)
            .is_err());
    }

    #[test]
    fn reissue_resets_the_live_ticket() {
        let (_, gate) = gate();
        let first = gate.issue("token", "dev").unwrap();
        gate.advance(&first.ticket, "token", TicketStep::Issued).unwrap();

        let second = gate.issue("token", "dev").unwrap();
        assert_eq!(first.ticket, second.ticket);
        assert_eq!(second.step, TicketStep::Issued);
        assert!(gate.check(&first.ticket, "token", TicketStep::Issued).is_ok());
    }

    fn aged_ticket(id: &str, step: TicketStep, age_secs: i64) -> TransferTicket {
        TransferTicket {
            ticket: id.into(),
            access_token: "token".into(),
            user_name: "dev".into(),
            step,
            created_at: Utc::now() - Duration::seconds(age_secs),
        }
    }

    #[test]
    fn live_ticket_is_reused_for_its_whole_ttl() {
        let (store, gate) = gate();
        store
            .insert_ticket(aged_ticket("older", TicketStep::Chunking, 30))
            .unwrap();

        let again = gate.issue("token", "dev").unwrap();
        assert_eq!(again.ticket, "older");
        assert_eq!(again.step, TicketStep::Issued);
        assert!(gate.check("older", "token", TicketStep::Issued).is_ok());
    }

    #[test]
    fn expired_ticket_is_replaced() {
        let (store, gate) = gate();
        store
            .insert_ticket(aged_ticket("expired", TicketStep::Issued, 120))
            .unwrap();

        let fresh = gate.issue("token", "dev").unwrap();
        assert_ne!(fresh.ticket, "expired");
        assert_eq!(fresh.ticket.len(), 32);
        assert!(gate.check("expired", "token", TicketStep::Issued).is_err());
    }

    #[test]
    fn reissue_at_ttl_boundary_does_not_revive() {
        let (_, gate) = gate();
        let first = gate.issue("token", "dev").unwrap();

        let almost = gate
            .issue_at("token", "dev", first.created_at + Duration::seconds(119))
            .unwrap();
        assert_eq!(almost.ticket, first.ticket);

        let after = gate
            .issue_at("token", "dev", first.created_at + Duration::seconds(120))
            .unwrap();
        assert_ne!(after.ticket, first.ticket);
    }
}
