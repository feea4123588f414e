use chrono::{DateTime, Utc};

/// Separator between values of a multi-value cell.
pub const LIST_DELIMITER: &str = "; ";

/// One Copilot interaction, as written to the events CSV.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    pub timestamp: DateTime<Utc>,
    pub user: String,
    pub app: String,
    pub location: String,
    pub app_context: String,
    pub accessed_resources: Vec<String>,
    pub accessed_resource_locations: Vec<String>,
    pub action: String,
    pub agent_name: String,
}

impl Event {
    /// First accessed resource as it reads back from the persisted cell, or ""
    /// when the interaction touched none. A name containing the list delimiter
    /// is cut at the delimiter on both the write and the read side.
    pub fn primary_resource(&self) -> String {
        primary_of_list(&self.accessed_resources.join(LIST_DELIMITER))
    }

    pub fn key(&self) -> EventKey {
        EventKey::new(self.timestamp, &self.user, &self.action, &self.primary_resource())
    }
}

/// Identity used to recognise an event that is already persisted.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EventKey {
    pub timestamp: DateTime<Utc>,
    pub user: String,
    pub action: String,
    pub primary_resource: String,
}

impl EventKey {
    pub fn new(timestamp: DateTime<Utc>, user: &str, action: &str, primary_resource: &str) -> Self {
        Self {
            timestamp,
            user: user.to_string(),
            action: action.to_string(),
            primary_resource: primary_resource.to_string(),
        }
    }
}

/// First non-empty value of a multi-value cell, or "".
pub fn primary_of_list(cell: &str) -> String {
    cell.split(LIST_DELIMITER)
        .map(str::trim)
        .find(|v| !v.is_empty())
        .unwrap_or_default()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn event(resources: &[&str]) -> Event {
        Event {
            timestamp: Utc.with_ymd_and_hms(2024, 1, 1, 10, 0, 0).unwrap(),
            user: "alice@example.com".to_string(),
            app: "Word".to_string(),
            location: String::new(),
            app_context: String::new(),
            accessed_resources: resources.iter().map(|s| s.to_string()).collect(),
            accessed_resource_locations: Vec::new(),
            action: "Read".to_string(),
            agent_name: String::new(),
        }
    }

    #[test]
    fn test_key_uses_first_resource() {
        let key = event(&["Plan.docx", "Budget.xlsx"]).key();
        assert_eq!(key.primary_resource, "Plan.docx");
        assert_eq!(key.user, "alice@example.com");
    }

    #[test]
    fn test_key_without_resources() {
        assert_eq!(event(&[]).key().primary_resource, "");
    }

    #[test]
    fn test_secondary_resources_do_not_change_identity() {
        assert_eq!(event(&["Plan.docx"]).key(), event(&["Plan.docx", "Other.pptx"]).key());
        assert_ne!(event(&["Plan.docx"]).key(), event(&["Other.pptx"]).key());
    }

    #[test]
    fn test_key_matches_joined_cell() {
        let ev = event(&["Q1; Q2 plan.docx", "Budget.xlsx"]);
        assert_eq!(ev.key().primary_resource, "Q1");
        assert_eq!(primary_of_list(&ev.accessed_resources.join(LIST_DELIMITER)), "Q1");
        assert_eq!(event(&[" ; Plan.docx"]).key().primary_resource, "Plan.docx");
    }
}
