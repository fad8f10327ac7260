use std::{collections::BTreeMap, sync::Arc};

use crate::alerts::alert::Alert;

/// Alerts waiting for their time, ordered by scheduled time then token.
///
/// The key is taken when an alert is inserted. An alert whose time changes
/// must be removed before the change and inserted again after it.
#[derive(Default)]
pub(crate) struct ScheduledAlerts {
    alerts: BTreeMap<(i64, String), Arc<Alert>>,
}

impl ScheduledAlerts {
    fn key_of(&self, token: &str) -> Option<(i64, String)> {
        self.alerts.keys().find(|(_, key_token)| key_token == token).cloned()
    }

    /// Inserts `alert`, replacing any alert with the same token.
    pub(crate) fn insert(&mut self, alert: Arc<Alert>) {
        self.remove(alert.token());
        let key = (alert.scheduled_time_unix(), alert.token().to_owned());
        self.alerts.insert(key, alert);
    }

    pub(crate) fn remove(&mut self, token: &str) -> Option<Arc<Alert>> {
        let key = self.key_of(token)?;
        self.alerts.remove(&key)
    }

    pub(crate) fn get(&self, token: &str) -> Option<Arc<Alert>> {
        self.alerts
            .iter()
            .find(|((_, key_token), _)| key_token == token)
            .map(|(_, alert)| alert.clone())
    }

    /// The alert due first.
    pub(crate) fn first(&self) -> Option<Arc<Alert>> {
        self.alerts.values().next().cloned()
    }

    pub(crate) fn pop_first(&mut self) -> Option<Arc<Alert>> {
        self.alerts.pop_first().map(|(_, alert)| alert)
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = &Arc<Alert>> {
        self.alerts.values()
    }

    pub(crate) fn len(&self) -> usize {
        self.alerts.len()
    }

    pub(crate) fn clear(&mut self) {
        self.alerts.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{alerts::AlertType, time::ScheduledTime};

    fn alert(token: &str, unix: i64) -> Arc<Alert> {
        Arc::new(Alert::new(
            token,
            AlertType::Timer,
            ScheduledTime::from_unix(unix).unwrap(),
        ))
    }

    #[test]
    fn test_ordered_by_time_then_token() {
        let mut alerts = ScheduledAlerts::default();
        alerts.insert(alert("b", 20));
        alerts.insert(alert("c", 10));
        alerts.insert(alert("a", 20));

        let tokens: Vec<&str> = alerts.iter().map(|alert| alert.token()).collect();
        assert_eq!(tokens, vec!["c", "a", "b"]);
        assert_eq!(alerts.first().unwrap().token(), "c");
    }

    #[test]
    fn test_insert_replaces_same_token() {
        let mut alerts = ScheduledAlerts::default();
        alerts.insert(alert("a", 20));
        alerts.insert(alert("a", 5));

        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts.get("a").unwrap().scheduled_time_unix(), 5);
    }

    #[test]
    fn test_remove_and_pop() {
        let mut alerts = ScheduledAlerts::default();
        alerts.insert(alert("a", 20));
        alerts.insert(alert("b", 10));

        assert!(alerts.remove("missing").is_none());
        assert_eq!(alerts.remove("a").unwrap().token(), "a");
        assert_eq!(alerts.pop_first().unwrap().token(), "b");
        assert!(alerts.pop_first().is_none());
    }
}
