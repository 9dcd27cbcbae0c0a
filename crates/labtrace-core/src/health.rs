//! Health check system for monitoring collector components.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::fmt;
use std::time::Instant;

/// Collector component tracked by the health check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Component {
    /// Broker connection and subscription
    Transport,
    /// Reorder buffer
    Buffer,
    /// Output file
    Sink,
}

impl Component {
    /// Every tracked component.
    pub const ALL: [Component; 3] = [Component::Transport, Component::Buffer, Component::Sink];

    /// Component name as reported over HTTP.
    pub fn as_str(&self) -> &'static str {
        match self {
            Component::Transport => "transport",
            Component::Buffer => "buffer",
            Component::Sink => "sink",
        }
    }
}

impl fmt::Display for Component {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Health status of a component.
#[derive(Debug, Clone, PartialEq)]
pub enum ComponentStatus {
    /// Component is healthy
    Healthy,
    /// Component is degraded but operational
    Degraded(String),
    /// Component is unhealthy
    Unhealthy(String),
    /// Component status is unknown
    Unknown,
}

/// Overall collector health status.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum HealthStatus {
    /// All components healthy
    Healthy,
    /// Some components degraded
    Degraded,
    /// Collector is unhealthy
    Unhealthy,
}

impl HealthStatus {
    /// Lowercase status name.
    pub fn as_str(&self) -> &'static str {
        match self {
            HealthStatus::Healthy => "healthy",
            HealthStatus::Degraded => "degraded",
            HealthStatus::Unhealthy => "unhealthy",
        }
    }
}

/// Tracks component health and whether a collector is running.
pub struct HealthCheck {
    components: RwLock<HashMap<Component, ComponentStatus>>,
    started_at: RwLock<Option<Instant>>,
    running: RwLock<bool>,
}

impl HealthCheck {
    /// Create a health check with every component in `Unknown` state.
    pub fn new() -> Self {
        let components = Component::ALL
            .iter()
            .map(|c| (*c, ComponentStatus::Unknown))
            .collect();
        Self {
            components: RwLock::new(components),
            started_at: RwLock::new(None),
            running: RwLock::new(false),
        }
    }

    /// Mark a component as healthy.
    pub fn mark_healthy(&self, component: Component) {
        self.components
            .write()
            .insert(component, ComponentStatus::Healthy);
    }

    /// Mark a component as degraded.
    pub fn mark_degraded(&self, component: Component, reason: &str) {
        self.components
            .write()
            .insert(component, ComponentStatus::Degraded(reason.to_string()));
    }

    /// Mark a component as unhealthy.
    pub fn mark_unhealthy(&self, component: Component, reason: &str) {
        self.components
            .write()
            .insert(component, ComponentStatus::Unhealthy(reason.to_string()));
    }

    /// Get the status of a component.
    pub fn component_status(&self, component: Component) -> ComponentStatus {
        self.components
            .read()
            .get(&component)
            .cloned()
            .unwrap_or(ComponentStatus::Unknown)
    }

    /// Get all component statuses.
    pub fn all_statuses(&self) -> HashMap<Component, ComponentStatus> {
        self.components.read().clone()
    }

    /// Get overall health status.
    pub fn overall_status(&self) -> HealthStatus {
        let components = self.components.read();

        let mut has_degraded = false;
        for status in components.values() {
            match status {
                ComponentStatus::Unhealthy(_) => return HealthStatus::Unhealthy,
                ComponentStatus::Degraded(_) => has_degraded = true,
                _ => {}
            }
        }

        if has_degraded {
            HealthStatus::Degraded
        } else {
            HealthStatus::Healthy
        }
    }

    /// Check if the collector is operational (healthy or degraded).
    pub fn is_operational(&self) -> bool {
        matches!(
            self.overall_status(),
            HealthStatus::Healthy | HealthStatus::Degraded
        )
    }

    /// Mark the collector as started.
    pub fn collector_started(&self) {
        *self.started_at.write() = Some(Instant::now());
        *self.running.write() = true;
    }

    /// Mark the collector as stopped.
    pub fn collector_stopped(&self) {
        *self.running.write() = false;
    }

    /// Check if the collector is running.
    pub fn is_running(&self) -> bool {
        *self.running.read()
    }

    /// Seconds since the collector started, zero if it never did.
    pub fn uptime_seconds(&self) -> u64 {
        self.started_at
            .read()
            .map(|t| t.elapsed().as_secs())
            .unwrap_or(0)
    }
}

impl Default for HealthCheck {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_health_check_lifecycle() {
        let health = HealthCheck::new();

        assert_eq!(
            health.component_status(Component::Transport),
            ComponentStatus::Unknown
        );

        health.mark_healthy(Component::Transport);
        health.mark_healthy(Component::Buffer);
        health.mark_healthy(Component::Sink);
        assert_eq!(health.overall_status(), HealthStatus::Healthy);

        health.mark_degraded(Component::Buffer, "postponement storm");
        assert_eq!(health.overall_status(), HealthStatus::Degraded);
        assert!(health.is_operational());

        health.mark_unhealthy(Component::Transport, "connection lost");
        assert_eq!(health.overall_status(), HealthStatus::Unhealthy);
        assert!(!health.is_operational());
    }

    #[test]
    fn test_unknown_components_count_as_healthy() {
        let health = HealthCheck::default();
        assert_eq!(health.overall_status(), HealthStatus::Healthy);
        assert_eq!(health.all_statuses().len(), 3);
    }

    #[test]
    fn test_recovery_transition() {
        let health = HealthCheck::new();
        health.mark_unhealthy(Component::Sink, "disk full");
        assert_eq!(
            health.component_status(Component::Sink),
            ComponentStatus::Unhealthy("disk full".to_string())
        );
        health.mark_healthy(Component::Sink);
        assert_eq!(
            health.component_status(Component::Sink),
            ComponentStatus::Healthy
        );
    }

    #[test]
    fn test_running_flag() {
        let health = HealthCheck::new();
        assert!(!health.is_running());
        assert_eq!(health.uptime_seconds(), 0);

        health.collector_started();
        assert!(health.is_running());

        health.collector_stopped();
        assert!(!health.is_running());
    }

    #[test]
    fn test_component_names() {
        assert_eq!(Component::Transport.to_string(), "transport");
        assert_eq!(HealthStatus::Degraded.as_str(), "degraded");
    }
}
