//! Shared fixtures for integration tests.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use warden_core::{
    Authority, AuthorityDirective, DeviceIdentity, HeartbeatRequest, QueuedCommand, WardenError,
};

/// Authority scripted with a fixed queue of directives.
///
/// An empty queue answers as if the network were down; delivered alerts
/// are recorded for assertions.
pub struct ScriptedAuthority {
    directives: Mutex<Vec<AuthorityDirective>>,
    pub requests: Mutex<Vec<HeartbeatRequest>>,
    pub delivered: Mutex<Vec<QueuedCommand>>,
    pub online: Mutex<bool>,
}

impl ScriptedAuthority {
    pub fn new(directives: Vec<AuthorityDirective>) -> Arc<Self> {
        Arc::new(Self {
            directives: Mutex::new(directives),
            requests: Mutex::new(Vec::new()),
            delivered: Mutex::new(Vec::new()),
            online: Mutex::new(true),
        })
    }

    pub fn offline() -> Arc<Self> {
        let authority = Self::new(Vec::new());
        *authority.online.lock().unwrap() = false;
        authority
    }

    pub fn set_online(&self, online: bool) {
        *self.online.lock().unwrap() = online;
    }
}

#[async_trait]
impl Authority for ScriptedAuthority {
    async fn heartbeat(
        &self,
        request: &HeartbeatRequest,
    ) -> Result<AuthorityDirective, WardenError> {
        if !*self.online.lock().unwrap() {
            return Err(WardenError::Transport {
                message: "offline".into(),
            });
        }
        self.requests.lock().unwrap().push(request.clone());

        let mut directives = self.directives.lock().unwrap();
        if directives.is_empty() {
            Ok(AuthorityDirective::default())
        } else {
            Ok(directives.remove(0))
        }
    }

    async fn deliver(&self, command: &QueuedCommand) -> Result<(), WardenError> {
        if !*self.online.lock().unwrap() {
            return Err(WardenError::Transport {
                message: "offline".into(),
            });
        }
        self.delivered.lock().unwrap().push(command.clone());
        Ok(())
    }
}

/// Identity used across the scenarios.
pub fn test_identity() -> DeviceIdentity {
    DeviceIdentity {
        device_id: "device-1".into(),
        serial_number: "SN123".into(),
        imeis: vec!["352099001761481".into()],
        manufacturer: "acme".into(),
        model: "tab-10".into(),
        os_version: "14".into(),
        fingerprint: "acme/tab10/14:user".into(),
    }
}
