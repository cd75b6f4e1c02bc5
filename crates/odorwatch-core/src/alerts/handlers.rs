//! Alert handlers.
//!
//! A handler is anything that can react to an [`Alert`]. Closures of the form
//! `FnMut(&Alert) -> AlertResult<()>` are handlers too, which is how the
//! daemon wires display and fleet integrations.

use std::io::Write;

use tracing::{error, info, warn};

use super::Alert;
use crate::error::{AlertError, AlertResult};
use crate::model::SeverityLevel;

/// Reacts to alerts dispatched for one [`AlertAction`](super::AlertAction).
///
/// Handlers run inline on the sampling thread, so a slow handler delays the
/// next tick. Failures are reported through the returned `Result`; the
/// manager logs and counts them and keeps dispatching.
pub trait AlertHandler: Send {
    fn handle(&mut self, alert: &Alert) -> AlertResult<()>;
}

impl<F> AlertHandler for F
where
    F: FnMut(&Alert) -> AlertResult<()> + Send,
{
    fn handle(&mut self, alert: &Alert) -> AlertResult<()> {
        self(alert)
    }
}

/// Writes alerts to the diagnostic log, level chosen by severity.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogHandler;

impl AlertHandler for LogHandler {
    fn handle(&mut self, alert: &Alert) -> AlertResult<()> {
        let severity = alert.event.severity;
        match severity {
            SeverityLevel::Severe | SeverityLevel::High => {
                error!(rule = %alert.rule_name, severity = %severity, "ALERT: {}", alert.message)
            }
            SeverityLevel::Moderate => {
                warn!(rule = %alert.rule_name, severity = %severity, "ALERT: {}", alert.message)
            }
            SeverityLevel::Low | SeverityLevel::None => {
                info!(rule = %alert.rule_name, severity = %severity, "ALERT: {}", alert.message)
            }
        }
        Ok(())
    }
}

/// Prints one line per alert to a writer (stdout in the daemon).
pub struct ConsoleHandler<W: Write + Send> {
    out: W,
}

impl<W: Write + Send> ConsoleHandler<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

impl ConsoleHandler<std::io::Stdout> {
    pub fn stdout() -> Self {
        Self::new(std::io::stdout())
    }
}

impl<W: Write + Send> AlertHandler for ConsoleHandler<W> {
    fn handle(&mut self, alert: &Alert) -> AlertResult<()> {
        writeln!(
            self.out,
            "[{}] {} ({})",
            alert.event.severity, alert.message, alert.rule_name
        )?;
        self.out.flush()?;
        Ok(())
    }
}

/// Ventilation level in percent requested for an alert of `severity`.
pub fn hvac_level(severity: SeverityLevel) -> u8 {
    match severity {
        SeverityLevel::Low => 50,
        SeverityLevel::Moderate => 75,
        SeverityLevel::High | SeverityLevel::Severe => 100,
        SeverityLevel::None => 50,
    }
}

/// Builds a handler that translates alerts into ventilation requests.
///
/// `set_level` receives the fan level in percent; its error is surfaced as a
/// handler failure.
pub fn hvac_handler<F, E>(mut set_level: F) -> impl AlertHandler
where
    F: FnMut(u8) -> Result<(), E> + Send,
    E: std::fmt::Display,
{
    move |alert: &Alert| -> AlertResult<()> {
        let level = hvac_level(alert.event.severity);
        set_level(level).map_err(|e| AlertError::Handler(format!("HVAC level {level}%: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alerts::AlertAction;
    use crate::model::{OdorClass, OdorEvent};

    fn alert(severity: SeverityLevel) -> Alert {
        Alert {
            id: 1,
            rule_name: "moderate_odor".to_string(),
            event: OdorEvent {
                odor_class: OdorClass::BodyOdor,
                severity,
                confidence: 0.7,
                gas_resistance: 30_000.0,
                timestamp: 10.0,
                temperature: 22.0,
                humidity: 45.0,
            },
            actions: vec![AlertAction::ActivateHvac],
            message: "Moderate Body Odor detected".to_string(),
            priority: 2,
            timestamp: 10.0,
            acknowledged: false,
        }
    }

    #[test]
    fn test_hvac_levels() {
        assert_eq!(hvac_level(SeverityLevel::Low), 50);
        assert_eq!(hvac_level(SeverityLevel::Moderate), 75);
        assert_eq!(hvac_level(SeverityLevel::High), 100);
        assert_eq!(hvac_level(SeverityLevel::Severe), 100);
        assert_eq!(hvac_level(SeverityLevel::None), 50);
    }

    #[test]
    fn test_hvac_handler_passes_level() {
        let mut seen = Vec::new();
        {
            let mut handler = hvac_handler(|level| {
                seen.push(level);
                Ok::<(), String>(())
            });
            handler.handle(&alert(SeverityLevel::Moderate)).unwrap();
            handler.handle(&alert(SeverityLevel::Severe)).unwrap();
        }
        assert_eq!(seen, vec![75, 100]);
    }

    #[test]
    fn test_hvac_handler_error_is_handler_error() {
        let mut handler = hvac_handler(|_| Err("fan stalled"));
        let err = handler.handle(&alert(SeverityLevel::High)).unwrap_err();
        assert!(matches!(err, AlertError::Handler(_)));
        assert!(err.to_string().contains("fan stalled"));
    }

    #[test]
    fn test_console_handler_line() {
        let mut handler = ConsoleHandler::new(Vec::new());
        handler.handle(&alert(SeverityLevel::Moderate)).unwrap();
        let out = String::from_utf8(handler.into_inner()).unwrap();
        assert_eq!(
            out,
            "[MODERATE] Moderate Body Odor detected (moderate_odor)\n"
        );
    }
}
