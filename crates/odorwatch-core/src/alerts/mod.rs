//! Rule-based alert engine.
//!
//! Every classified event is checked against the configured rules, highest
//! priority first. A rule fires when the event's class is in its class set,
//! the severity rank reaches the rule's minimum and the rule's own cooldown
//! has elapsed. Firing produces an [`Alert`] that is recorded and dispatched
//! to the handlers registered for each of the rule's actions.

pub mod handlers;
mod rule;

pub use handlers::{AlertHandler, ConsoleHandler, LogHandler, hvac_handler, hvac_level};
pub use rule::{AlertAction, AlertRule, DEFAULT_TEMPLATE, render_message};

use std::collections::{BTreeMap, HashMap, VecDeque};

use serde::Serialize;
use serde_json::{Value, json};
use tracing::{debug, error};

use crate::error::{ConfigError, ConfigResult};
use crate::model::OdorEvent;

const HISTORY_CAPACITY: usize = 1000;

/// A fired alert. Immutable apart from the acknowledgement flag.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Alert {
    pub id: u64,
    pub rule_name: String,
    pub event: OdorEvent,
    pub actions: Vec<AlertAction>,
    pub message: String,
    pub priority: i32,
    /// Unix seconds at which the rule fired.
    pub timestamp: f64,
    pub acknowledged: bool,
}

impl Alert {
    /// Payload handed to external consumers (display, fleet backend).
    pub fn to_payload(&self) -> Value {
        json!({
            "rule_name": self.rule_name,
            "event": self.event.to_payload(),
            "actions": self.actions.iter().map(|a| a.name()).collect::<Vec<_>>(),
            "message": self.message,
            "priority": self.priority,
            "timestamp": self.timestamp,
            "acknowledged": self.acknowledged,
        })
    }
}

/// Counters derived from alert history.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AlertStats {
    pub total_alerts: usize,
    pub active_alerts: usize,
    pub rules_configured: usize,
    pub by_rule: BTreeMap<String, usize>,
    pub by_severity: BTreeMap<String, usize>,
    pub handler_errors: u64,
}

pub struct AlertManager {
    /// Insertion order; dispatch order is derived by priority.
    rules: Vec<AlertRule>,
    last_fired: HashMap<String, f64>,
    history: VecDeque<Alert>,
    active: Vec<Alert>,
    handlers: HashMap<AlertAction, Vec<Box<dyn AlertHandler>>>,
    next_id: u64,
    handler_errors: u64,
}

impl Default for AlertManager {
    fn default() -> Self {
        Self::new()
    }
}

impl AlertManager {
    /// A manager without rules or handlers.
    pub fn new() -> Self {
        Self {
            rules: Vec::new(),
            last_fired: HashMap::new(),
            history: VecDeque::with_capacity(HISTORY_CAPACITY),
            active: Vec::new(),
            handlers: HashMap::new(),
            next_id: 1,
            handler_errors: 0,
        }
    }

    pub fn with_default_rules() -> Self {
        let mut manager = Self::new();
        manager.rules = AlertRule::defaults();
        manager
    }

    /// Builds a manager from configured rules, rejecting invalid or duplicate ones.
    pub fn from_rules(rules: Vec<AlertRule>) -> ConfigResult<Self> {
        let mut manager = Self::new();
        for rule in rules {
            if manager.rules.iter().any(|r| r.name == rule.name) {
                return Err(ConfigError::DuplicateRule(rule.name));
            }
            manager.add_rule(rule)?;
        }
        Ok(manager)
    }

    /// Adds `rule`, replacing any rule with the same name.
    pub fn add_rule(&mut self, rule: AlertRule) -> ConfigResult<()> {
        rule.validate()?;
        debug!(rule = %rule.name, priority = rule.priority, "Alert rule added");
        match self.rules.iter_mut().find(|r| r.name == rule.name) {
            Some(existing) => *existing = rule,
            None => self.rules.push(rule),
        }
        Ok(())
    }

    /// Removes the named rule. Returns whether it existed.
    pub fn remove_rule(&mut self, name: &str) -> bool {
        let before = self.rules.len();
        self.rules.retain(|r| r.name != name);
        self.last_fired.remove(name);
        self.rules.len() != before
    }

    pub fn rules(&self) -> &[AlertRule] {
        &self.rules
    }

    pub fn register_handler(&mut self, action: AlertAction, handler: impl AlertHandler + 'static) {
        self.handlers
            .entry(action)
            .or_default()
            .push(Box::new(handler));
    }

    /// Checks `event` against all rules using the current wall-clock time.
    pub fn process_event(&mut self, event: &OdorEvent) -> Vec<Alert> {
        self.process_event_at(event, now_seconds())
    }

    /// Checks `event` against all rules as of `now` (unix seconds).
    pub fn process_event_at(&mut self, event: &OdorEvent, now: f64) -> Vec<Alert> {
        let mut order: Vec<usize> = (0..self.rules.len()).collect();
        order.sort_by_key(|&i| std::cmp::Reverse(self.rules[i].priority));

        let mut fired = Vec::new();
        for i in order {
            let rule = &self.rules[i];
            if !rule.matches(event) {
                continue;
            }
            if let Some(last) = self.last_fired.get(&rule.name)
                && now - last < rule.cooldown_seconds
            {
                continue;
            }

            let alert = Alert {
                id: self.next_id,
                rule_name: rule.name.clone(),
                event: *event,
                actions: rule.actions.clone(),
                message: rule.render_message(event),
                priority: rule.priority,
                timestamp: now,
                acknowledged: false,
            };
            self.next_id += 1;
            self.last_fired.insert(rule.name.clone(), now);

            if self.history.len() == HISTORY_CAPACITY {
                self.history.pop_front();
            }
            self.history.push_back(alert.clone());
            self.active.push(alert.clone());

            self.dispatch(&alert);
            fired.push(alert);
        }
        fired
    }

    fn dispatch(&mut self, alert: &Alert) {
        for action in &alert.actions {
            let Some(handlers) = self.handlers.get_mut(action) else {
                continue;
            };
            for handler in handlers.iter_mut() {
                if let Err(e) = handler.handle(alert) {
                    self.handler_errors += 1;
                    error!(
                        rule = %alert.rule_name,
                        action = %action,
                        error = %e,
                        "Alert handler failed"
                    );
                }
            }
        }
    }

    /// Removes the alert from the active list and marks it acknowledged.
    /// Returns `false` if it was not active.
    pub fn acknowledge(&mut self, alert: &Alert) -> bool {
        let Some(pos) = self.active.iter().position(|a| a.id == alert.id) else {
            return false;
        };
        self.active.remove(pos);
        if let Some(entry) = self.history.iter_mut().find(|a| a.id == alert.id) {
            entry.acknowledged = true;
        }
        true
    }

    /// Acknowledges every active alert and returns how many there were.
    pub fn acknowledge_all(&mut self) -> usize {
        let count = self.active.len();
        for alert in self.active.drain(..) {
            if let Some(entry) = self.history.iter_mut().find(|a| a.id == alert.id) {
                entry.acknowledged = true;
            }
        }
        count
    }

    pub fn active_alerts(&self) -> &[Alert] {
        &self.active
    }

    /// The `count` most recent alerts, oldest first.
    pub fn alert_history(&self, count: usize) -> Vec<Alert> {
        let skip = self.history.len().saturating_sub(count);
        self.history.iter().skip(skip).cloned().collect()
    }

    pub fn handler_errors(&self) -> u64 {
        self.handler_errors
    }

    pub fn get_statistics(&self) -> AlertStats {
        let mut by_rule = BTreeMap::new();
        let mut by_severity = BTreeMap::new();
        for alert in &self.history {
            *by_rule.entry(alert.rule_name.clone()).or_insert(0) += 1;
            *by_severity
                .entry(alert.event.severity.name().to_string())
                .or_insert(0) += 1;
        }

        AlertStats {
            total_alerts: self.history.len(),
            active_alerts: self.active.len(),
            rules_configured: self.rules.len(),
            by_rule,
            by_severity,
            handler_errors: self.handler_errors,
        }
    }
}

fn now_seconds() -> f64 {
    chrono::Utc::now().timestamp_micros() as f64 / 1_000_000.0
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use super::*;
    use crate::error::{AlertError, AlertResult};
    use crate::model::{OdorClass, SeverityLevel};

    fn event(class: OdorClass, severity: SeverityLevel) -> OdorEvent {
        OdorEvent {
            odor_class: class,
            severity,
            confidence: 0.8,
            gas_resistance: 20_000.0,
            timestamp: 0.0,
            temperature: 25.0,
            humidity: 40.0,
        }
    }

    fn smoke_rule() -> AlertRule {
        AlertRule {
            name: "smoke".to_string(),
            odor_classes: vec![OdorClass::Smoke],
            min_severity: SeverityLevel::Low,
            actions: vec![AlertAction::ActivateHvac],
            cooldown_seconds: 30.0,
            ..AlertRule::default()
        }
    }

    #[test]
    fn test_initialization() {
        let manager = AlertManager::with_default_rules();
        assert_eq!(manager.rules().len(), 5);
        assert!(manager.active_alerts().is_empty());
        assert_eq!(manager.get_statistics().total_alerts, 0);
    }

    #[test]
    fn test_cooldown_same_event_twice() {
        let mut manager = AlertManager::from_rules(vec![smoke_rule()]).unwrap();
        let e = event(OdorClass::Smoke, SeverityLevel::Moderate);
        assert_eq!(manager.process_event(&e).len(), 1);
        assert_eq!(manager.process_event(&e).len(), 0);
    }

    #[test]
    fn test_smoke_events_within_cooldown_raise_one_alert() {
        let mut manager = AlertManager::from_rules(vec![smoke_rule()]).unwrap();
        let e = event(OdorClass::Smoke, SeverityLevel::Low);
        let total: usize = (0..300)
            .map(|i| manager.process_event_at(&e, 1000.0 + i as f64 * 0.1).len())
            .sum();
        assert_eq!(total, 1);

        // Cooldown elapsed.
        assert_eq!(manager.process_event_at(&e, 1030.0).len(), 1);
    }

    #[test]
    fn test_rule_gates() {
        let mut manager = AlertManager::from_rules(vec![AlertRule {
            min_severity: SeverityLevel::High,
            ..smoke_rule()
        }])
        .unwrap();
        assert!(
            manager
                .process_event_at(&event(OdorClass::Smoke, SeverityLevel::Moderate), 0.0)
                .is_empty()
        );
        assert!(
            manager
                .process_event_at(&event(OdorClass::Illness, SeverityLevel::Severe), 0.0)
                .is_empty()
        );
        assert_eq!(
            manager
                .process_event_at(&event(OdorClass::Smoke, SeverityLevel::High), 0.0)
                .len(),
            1
        );
    }

    #[test]
    fn test_multiple_rules_fire_in_priority_order() {
        let mut manager = AlertManager::with_default_rules();
        let alerts = manager.process_event_at(&event(OdorClass::Smoke, SeverityLevel::High), 0.0);
        let names: Vec<&str> = alerts.iter().map(|a| a.rule_name.as_str()).collect();
        // high_odor and smoke_detected share priority 3 and keep insertion order.
        assert_eq!(names, vec!["high_odor", "smoke_detected", "moderate_odor"]);

        let stats = manager.get_statistics();
        assert_eq!(stats.total_alerts, 3);
        assert_eq!(stats.active_alerts, 3);
        assert_eq!(stats.by_severity.get("HIGH"), Some(&3));
        assert_eq!(stats.by_rule.get("smoke_detected"), Some(&1));
    }

    #[test]
    fn test_cooldown_is_per_rule() {
        let mut manager = AlertManager::with_default_rules();
        let high = event(OdorClass::Smoke, SeverityLevel::High);
        assert_eq!(manager.process_event_at(&high, 0.0).len(), 3);
        // 15 s later only high_odor (cooldown 15 s) is ready again.
        let again = manager.process_event_at(&high, 15.0);
        assert_eq!(again.len(), 1);
        assert_eq!(again[0].rule_name, "high_odor");
    }

    #[test]
    fn test_message_rendering() {
        let mut manager = AlertManager::with_default_rules();
        let alerts =
            manager.process_event_at(&event(OdorClass::BodyOdor, SeverityLevel::Low), 0.0);
        assert_eq!(alerts.len(), 1);
        assert_eq!(
            alerts[0].message,
            "Mild Body Odor detected - activating ventilation"
        );
    }

    #[test]
    fn test_handler_errors_are_isolated() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let mut manager = AlertManager::from_rules(vec![
            AlertRule {
                priority: 2,
                ..smoke_rule()
            },
            AlertRule {
                name: "smoke_low".to_string(),
                ..smoke_rule()
            },
        ])
        .unwrap();

        manager.register_handler(AlertAction::ActivateHvac, |_: &Alert| -> AlertResult<()> {
            Err(AlertError::Handler("fan offline".to_string()))
        });
        let seen = Arc::clone(&calls);
        manager.register_handler(AlertAction::ActivateHvac, move |alert: &Alert| -> AlertResult<()> {
            seen.lock().unwrap().push(alert.rule_name.clone());
            Ok(())
        });

        let alerts = manager.process_event_at(&event(OdorClass::Smoke, SeverityLevel::Low), 0.0);
        assert_eq!(alerts.len(), 2);
        assert_eq!(*calls.lock().unwrap(), vec!["smoke", "smoke_low"]);
        assert_eq!(manager.handler_errors(), 2);
        assert_eq!(manager.get_statistics().handler_errors, 2);
    }

    #[test]
    fn test_acknowledge() {
        let mut manager = AlertManager::with_default_rules();
        let alerts = manager.process_event_at(&event(OdorClass::Smoke, SeverityLevel::High), 0.0);
        assert!(manager.acknowledge(&alerts[0]));
        assert!(!manager.acknowledge(&alerts[0]));
        assert_eq!(manager.active_alerts().len(), 2);
        assert!(manager.alert_history(10)[0].acknowledged);

        assert_eq!(manager.acknowledge_all(), 2);
        assert!(manager.active_alerts().is_empty());
        assert!(manager.alert_history(10).iter().all(|a| a.acknowledged));
    }

    #[test]
    fn test_add_and_remove_rule() {
        let mut manager = AlertManager::new();
        manager.add_rule(smoke_rule()).unwrap();
        manager
            .add_rule(AlertRule {
                cooldown_seconds: 5.0,
                ..smoke_rule()
            })
            .unwrap();
        assert_eq!(manager.rules().len(), 1);
        assert_eq!(manager.rules()[0].cooldown_seconds, 5.0);

        assert!(manager.remove_rule("smoke"));
        assert!(!manager.remove_rule("smoke"));
        assert!(
            manager
                .process_event_at(&event(OdorClass::Smoke, SeverityLevel::Severe), 0.0)
                .is_empty()
        );
    }

    #[test]
    fn test_duplicate_rules_rejected() {
        let result = AlertManager::from_rules(vec![smoke_rule(), smoke_rule()]);
        assert!(matches!(result, Err(ConfigError::DuplicateRule(name)) if name == "smoke"));
    }

    #[test]
    fn test_alert_payload() {
        let mut manager = AlertManager::from_rules(vec![smoke_rule()]).unwrap();
        let alerts =
            manager.process_event_at(&event(OdorClass::Smoke, SeverityLevel::Moderate), 42.0);
        let payload = alerts[0].to_payload();
        assert_eq!(payload["rule_name"], "smoke");
        assert_eq!(payload["event"]["odor_class"], "SMOKE");
        assert_eq!(payload["actions"][0], "ACTIVATE_HVAC");
        assert_eq!(payload["timestamp"], 42.0);
        assert_eq!(payload["acknowledged"], false);
    }

    #[test]
    fn test_history_is_bounded() {
        let mut manager = AlertManager::from_rules(vec![AlertRule {
            cooldown_seconds: 0.0,
            ..smoke_rule()
        }])
        .unwrap();
        let e = event(OdorClass::Smoke, SeverityLevel::Low);
        for i in 0..1100 {
            manager.process_event_at(&e, i as f64);
        }
        assert_eq!(manager.get_statistics().total_alerts, HISTORY_CAPACITY);
        assert_eq!(manager.alert_history(1)[0].id, 1100);
    }
}
