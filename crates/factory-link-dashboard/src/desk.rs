//! The command desk: the one place submissions go through.

use crate::Rejection;
use crate::ledger::{CommandLedger, LedgerEntry, RateLimit};
use factory_link_client::{ClientError, CommandClient};
use factory_link_core::{Capabilities, Clock, CommandSnapshot, CommandType};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Owns a [`CommandClient`], the current capability descriptor and the
/// ledger. Status events reach it through [`CommandDesk::apply_event`], called
/// by whoever owns the desk.
pub struct CommandDesk {
    client: CommandClient,
    ledger: CommandLedger,
    capabilities: Option<Capabilities>,
    /// Stream link count when the descriptor was fetched.
    fetched_at_link: Option<u64>,
    clock: Arc<dyn Clock>,
}

impl CommandDesk {
    pub fn new(client: CommandClient, clock: Arc<dyn Clock>) -> Self {
        Self {
            client,
            ledger: CommandLedger::new(),
            capabilities: None,
            fetched_at_link: None,
            clock,
        }
    }

    pub fn client(&self) -> &CommandClient {
        &self.client
    }

    /// Fetch the descriptor; call once per connection.
    pub async fn refresh_capabilities(&mut self) -> Result<&Capabilities, ClientError> {
        let link = self.client.connections();
        let caps = self.client.capabilities().await?;
        self.fetched_at_link = Some(link);
        info!(
            version = %caps.version,
            ceiling = caps.limits.commands_per_second,
            "capabilities loaded"
        );
        Ok(self.capabilities.insert(caps))
    }

    /// Refetch the descriptor if the status stream has opened a new link
    /// since the last fetch. Returns whether a fetch happened.
    pub async fn sync_capabilities(&mut self) -> Result<bool, ClientError> {
        let link = self.client.connections();
        if link == 0 || self.fetched_at_link == Some(link) {
            return Ok(false);
        }
        self.refresh_capabilities().await?;
        Ok(true)
    }

    pub fn capabilities(&self) -> Option<&Capabilities> {
        self.capabilities.as_ref()
    }

    pub fn is_enabled(&self, command_type: CommandType) -> bool {
        self.capabilities
            .as_ref()
            .is_some_and(|caps| caps.allows(command_type))
    }

    pub fn rate_limit(&self) -> RateLimit {
        RateLimit::for_capabilities(self.capabilities.as_ref())
    }

    /// Submit through the local checks and the client; returns the command
    /// id. Nothing is sent when a local check fails.
    pub async fn try_submit(
        &mut self,
        command_type: CommandType,
        payload: Value,
        key: Option<String>,
    ) -> Result<String, Rejection> {
        let now = self.clock.now_ms();
        self.ledger
            .admit(command_type, &payload, self.capabilities.as_ref(), now)?;

        let submitted = self
            .client
            .submit(command_type, payload.clone(), key)
            .await?;
        let command_id = submitted.command.command_id.clone();
        let entry = LedgerEntry::accepted(
            submitted.command,
            submitted.idempotency_key,
            command_type,
            payload,
            now,
        );
        if !self.ledger.record(entry) {
            debug!(command = %command_id, "replayed submission, keeping existing entry");
        }
        Ok(command_id)
    }

    /// [`CommandDesk::try_submit`] with every failure collapsed to `None`
    /// after logging its cause.
    pub async fn submit(
        &mut self,
        command_type: CommandType,
        payload: Value,
        key: Option<String>,
    ) -> Option<String> {
        match self.try_submit(command_type, payload, key).await {
            Ok(command_id) => Some(command_id),
            Err(rejection) => {
                warn!(%command_type, reason = %rejection, "submission rejected");
                None
            }
        }
    }

    /// Apply a status event from the control stream. Returns whether the
    /// ledger changed.
    pub fn apply_event(&mut self, event: &CommandSnapshot) -> bool {
        self.ledger.apply(event, self.clock.now_ms())
    }

    /// Ledger entries, oldest first.
    pub fn history(&self) -> impl Iterator<Item = &LedgerEntry> {
        self.ledger.entries()
    }

    pub fn entry(&self, command_id: &str) -> Option<&LedgerEntry> {
        self.ledger.get(command_id)
    }
}
