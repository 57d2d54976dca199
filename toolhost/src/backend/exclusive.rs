//! One active backend at a time

use super::controller::ServerController;
use super::error::{BackendError, BackendResult};

/// Named controllers of which at most one is kept running
#[derive(Default)]
pub struct BackendSet {
    controllers: Vec<(String, Box<dyn ServerController>)>,
    active: Option<String>,
}

impl BackendSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `controller` under `name`, replacing any previous one
    pub fn insert(&mut self, name: impl Into<String>, controller: Box<dyn ServerController>) {
        let name = name.into();
        match self.controllers.iter_mut().find(|(n, _)| *n == name) {
            Some(slot) => slot.1 = controller,
            None => self.controllers.push((name, controller)),
        }
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.controllers.iter().map(|(n, _)| n.as_str())
    }

    pub fn get(&self, name: &str) -> Option<&dyn ServerController> {
        self.controllers
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, c)| c.as_ref())
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut (dyn ServerController + 'static)> {
        self.controllers
            .iter_mut()
            .find(|(n, _)| n == name)
            .map(|(_, c)| c.as_mut())
    }

    /// Name of the backend made active by the last successful [`activate`](Self::activate)
    pub fn active(&self) -> Option<&str> {
        self.active.as_deref()
    }

    /// Stop every other backend, then bring `name` up.
    pub async fn activate(&mut self, name: &str) -> BackendResult<bool> {
        if self.get(name).is_none() {
            return Err(BackendError::UnknownBackend(name.to_string()));
        }

        self.active = None;
        for (other, controller) in self.controllers.iter_mut() {
            if other.as_str() != name && !controller.stop_server().await {
                tracing::warn!("Backend {} may still be running", other);
            }
        }

        let ready = match self.get_mut(name) {
            Some(target) => target.ensure_server_running().await?,
            None => false,
        };
        if ready {
            tracing::info!("Backend {} is active", name);
            self.active = Some(name.to_string());
        }
        Ok(ready)
    }

    /// Stop every backend; true when all stopped cleanly
    pub async fn shutdown_all(&mut self) -> bool {
        let mut clean = true;
        for (name, controller) in self.controllers.iter_mut() {
            if !controller.stop_server().await {
                tracing::warn!("Backend {} may still be running", name);
                clean = false;
            }
        }
        self.active = None;
        clean
    }
}
