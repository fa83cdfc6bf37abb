use runway_core::pii::Masked;
use runway_core::repository::{AudienceDirectory, StoreResult};
use std::collections::HashSet;
use std::sync::Arc;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq)]
pub struct EmailTarget {
    pub user_id: Uuid,
    pub email: Masked<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PushTarget {
    pub device_id: Uuid,
    pub user_id: Uuid,
    pub token: String,
}

/// Distinct notification endpoints affected by one flight's status change.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Audience {
    pub emails: Vec<EmailTarget>,
    pub devices: Vec<PushTarget>,
}

impl Audience {
    pub fn is_empty(&self) -> bool {
        self.emails.is_empty() && self.devices.is_empty()
    }
}

pub struct AudienceResolver {
    directory: Arc<dyn AudienceDirectory>,
}

impl AudienceResolver {
    pub fn new(directory: Arc<dyn AudienceDirectory>) -> Self {
        Self { directory }
    }

    /// One booking lookup for the flight and one device lookup for all of its
    /// passengers' accounts. Passengers without endpoints are left out.
    pub async fn resolve(&self, flight_id: Uuid) -> StoreResult<Audience> {
        let contacts = self.directory.passengers_on_flight(flight_id).await?;

        let mut user_ids = Vec::new();
        let mut seen_users = HashSet::new();
        let mut emails = Vec::new();
        for contact in contacts {
            if !seen_users.insert(contact.user_id) {
                continue;
            }
            user_ids.push(contact.user_id);
            if let Some(email) = contact.email.filter(|e| !e.trim().is_empty()) {
                emails.push(EmailTarget { user_id: contact.user_id, email: Masked(email) });
            }
        }

        if user_ids.is_empty() {
            return Ok(Audience::default());
        }

        let mut seen_tokens = HashSet::new();
        let devices = self
            .directory
            .push_devices_for_users(&user_ids)
            .await?
            .into_iter()
            .filter(|d| seen_tokens.insert(d.token.clone()))
            .map(|d| PushTarget { device_id: d.id, user_id: d.user_id, token: d.token })
            .collect();

        Ok(Audience { emails, devices })
    }
}
