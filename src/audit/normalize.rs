use super::record::{AccessedResource, RawAuditRecord};
use crate::event::Event;
use chrono::{DateTime, NaiveDateTime, SubsecRound, Utc};
use std::collections::HashSet;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum NormalizeError {
    #[error("record is missing required field '{0}'")]
    MissingField(&'static str),

    #[error("record has unparseable timestamp '{0}'")]
    InvalidTimestamp(String),
}

const DEFAULT_APP: &str = "Copilot for M365";
const COPILOT_STUDIO_APP: &str = "Copilot Studio Agent";
const TEAMS_URL_PREFIX: &str = "https://teams.microsoft.com/";

/// Maps raw audit records onto [`Event`]s, keeping only allow-listed record types.
#[derive(Debug, Clone)]
pub struct Normalizer {
    record_types: HashSet<u32>,
}

impl Normalizer {
    pub fn new(record_types: impl IntoIterator<Item = u32>) -> Self {
        Self {
            record_types: record_types.into_iter().collect(),
        }
    }

    /// `Ok(None)` when the record type is not a Copilot type.
    pub fn normalize(&self, record: &RawAuditRecord) -> Result<Option<Event>, NormalizeError> {
        match record.record_type {
            Some(record_type) if self.record_types.contains(&record_type) => {}
            _ => return Ok(None),
        }

        let creation_time = non_empty(record.creation_time.as_deref())
            .ok_or(NormalizeError::MissingField("CreationTime"))?;
        let user = non_empty(record.user_id.as_deref()).ok_or(NormalizeError::MissingField("UserId"))?;
        let timestamp = parse_timestamp(creation_time)?;

        let data = record.copilot_event_data.clone().unwrap_or_default();
        let first_context = data.contexts.first();
        let context_type = first_context
            .and_then(|c| c.context_type.as_deref())
            .unwrap_or("");
        let context_id = first_context.and_then(|c| c.id.as_deref()).unwrap_or("");
        let app_host = data.app_host.as_deref().unwrap_or("");

        let app = resolve_app(context_type, context_id, app_host);
        let location = resolve_location(context_type, context_id);

        let app_context = if context_id.is_empty() {
            data.thread_id.clone().unwrap_or_default()
        } else {
            context_id.to_string()
        };

        let agent_name = if app == COPILOT_STUDIO_APP {
            agent_name_from_identity(record.app_identity.as_deref().unwrap_or(""))
        } else {
            String::new()
        };

        let accessed_resources = distinct(&data.accessed_resources, |r| r.name.as_deref());
        let accessed_resource_locations = distinct(&data.accessed_resources, |r| r.id.as_deref());
        let actions = distinct(&data.accessed_resources, |r| r.action.as_deref());
        let action = if actions.is_empty() {
            record.operation.clone().unwrap_or_default()
        } else {
            actions.join("; ")
        };

        Ok(Some(Event {
            timestamp,
            user: user.to_string(),
            app: app.to_string(),
            location: location.to_string(),
            app_context,
            accessed_resources,
            accessed_resource_locations,
            action,
            agent_name,
        }))
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

/// RFC 3339, or a naive ISO-8601 timestamp taken as UTC. Sub-second precision
/// is dropped so that timestamps compare equal after a CSV round trip.
pub fn parse_timestamp(value: &str) -> Result<DateTime<Utc>, NormalizeError> {
    let parsed = DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .or_else(|_| {
            NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S%.f").map(|dt| dt.and_utc())
        })
        .map_err(|_| NormalizeError::InvalidTimestamp(value.to_string()))?;

    Ok(parsed.trunc_subsecs(0))
}

fn resolve_app(context_type: &str, context_id: &str, app_host: &str) -> &'static str {
    if context_id.starts_with(TEAMS_URL_PREFIX) {
        return "Teams";
    }

    match app_host {
        "bizchat" => return "Copilot for M365 Chat",
        "Outlook" => return "Outlook",
        "Copilot Studio" => return COPILOT_STUDIO_APP,
        _ => {}
    }

    match context_type {
        "xlsx" => "Excel",
        "docx" => "Word",
        "pptx" => "PowerPoint",
        "TeamsMeeting" => "Teams",
        "whiteboard" => "Whiteboard",
        "loop" => "Loop",
        "StreamVideo" => "Stream",
        _ => DEFAULT_APP,
    }
}

fn resolve_location(context_type: &str, context_id: &str) -> &'static str {
    if context_id.contains("/sites/") {
        "SharePoint Online"
    } else if context_id.starts_with(TEAMS_URL_PREFIX) {
        if context_id.contains("ctx=channel") {
            "Teams Channel"
        } else {
            "Teams Chat"
        }
    } else if context_id.contains("/personal/") {
        "OneDrive for Business"
    } else {
        match context_type {
            "TeamsMeeting" => "Teams meeting",
            "StreamVideo" => "Stream video player",
            _ => "",
        }
    }
}

fn agent_name_from_identity(app_identity: &str) -> String {
    if let Some((_, name)) = app_identity.rsplit_once('_') {
        name.to_string()
    } else if let Some((_, name)) = app_identity.rsplit_once('-') {
        name.to_string()
    } else {
        String::new()
    }
}

/// Non-empty values in provider order, first occurrence wins.
fn distinct<F>(resources: &[AccessedResource], field: F) -> Vec<String>
where
    F: Fn(&AccessedResource) -> Option<&str>,
{
    let mut seen = HashSet::new();
    resources
        .iter()
        .filter_map(|r| field(r))
        .map(str::trim)
        .filter(|v| !v.is_empty() && seen.insert(*v))
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::types::COPILOT_INTERACTION_RECORD_TYPE;
    use chrono::TimeZone;
    use serde_json::{json, Value};

    fn normalizer() -> Normalizer {
        Normalizer::new([COPILOT_INTERACTION_RECORD_TYPE])
    }

    fn record(value: Value) -> RawAuditRecord {
        RawAuditRecord::from_value(value).unwrap()
    }

    fn copilot(data: Value) -> RawAuditRecord {
        record(json!({
            "RecordType": 91,
            "CreationTime": "2024-01-01T10:00:00",
            "UserId": "alice@example.com",
            "Operation": "CopilotInteraction",
            "AppIdentity": "Copilot.Studio.12ab_HR Helper",
            "CopilotEventData": data
        }))
    }

    #[test]
    fn test_word_document_interaction() {
        let event = normalizer()
            .normalize(&copilot(json!({
                "AppHost": "Word",
                "Contexts": [{"Id": "https://contoso.sharepoint.com/sites/Finance/Plan.docx", "Type": "docx"}],
                "AccessedResources": [
                    {"Id": "https://contoso.sharepoint.com/sites/Finance/Plan.docx", "Name": "Plan.docx", "Action": "Read"},
                    {"Id": "https://contoso.sharepoint.com/sites/Finance/Budget.xlsx", "Name": "Budget.xlsx", "Action": "Read"}
                ]
            })))
            .unwrap()
            .unwrap();

        assert_eq!(event.timestamp, Utc.with_ymd_and_hms(2024, 1, 1, 10, 0, 0).unwrap());
        assert_eq!(event.user, "alice@example.com");
        assert_eq!(event.app, "Word");
        assert_eq!(event.location, "SharePoint Online");
        assert_eq!(event.app_context, "https://contoso.sharepoint.com/sites/Finance/Plan.docx");
        assert_eq!(event.accessed_resources, vec!["Plan.docx", "Budget.xlsx"]);
        assert_eq!(event.accessed_resource_locations.len(), 2);
        assert_eq!(event.action, "Read");
        assert_eq!(event.agent_name, "");
    }

    #[test]
    fn test_resources_keep_provider_order() {
        let event = normalizer()
            .normalize(&copilot(json!({
                "AccessedResources": [
                    {"Name": "Zeta.docx", "Action": "Write"},
                    {"Name": "", "Action": "Read"},
                    {"Name": "Alpha.docx"},
                    {"Name": "Zeta.docx", "Action": "Write"}
                ]
            })))
            .unwrap()
            .unwrap();

        assert_eq!(event.accessed_resources, vec!["Zeta.docx", "Alpha.docx"]);
        assert_eq!(event.action, "Write; Read");
        assert!(event.accessed_resource_locations.is_empty());
    }

    #[test]
    fn test_teams_channel_context() {
        let event = normalizer()
            .normalize(&copilot(json!({
                "AppHost": "Teams",
                "Contexts": [{"Id": "https://teams.microsoft.com/l/message/19:abc?ctx=channel", "Type": "TeamsChannel"}]
            })))
            .unwrap()
            .unwrap();

        assert_eq!(event.app, "Teams");
        assert_eq!(event.location, "Teams Channel");
    }

    #[test]
    fn test_teams_meeting_context_type() {
        let event = normalizer()
            .normalize(&copilot(json!({
                "Contexts": [{"Id": "meeting-123", "Type": "TeamsMeeting"}]
            })))
            .unwrap()
            .unwrap();

        assert_eq!(event.app, "Teams");
        assert_eq!(event.location, "Teams meeting");
    }

    #[test]
    fn test_bizchat_uses_thread_id_and_operation() {
        let event = normalizer()
            .normalize(&copilot(json!({"AppHost": "bizchat", "ThreadId": "19:thread"})))
            .unwrap()
            .unwrap();

        assert_eq!(event.app, "Copilot for M365 Chat");
        assert_eq!(event.location, "");
        assert_eq!(event.app_context, "19:thread");
        assert_eq!(event.action, "CopilotInteraction");
    }

    #[test]
    fn test_copilot_studio_agent_name() {
        let event = normalizer()
            .normalize(&copilot(json!({"AppHost": "Copilot Studio"})))
            .unwrap()
            .unwrap();

        assert_eq!(event.app, "Copilot Studio Agent");
        assert_eq!(event.agent_name, "HR Helper");
    }

    #[test]
    fn test_agent_name_dash_fallback() {
        assert_eq!(agent_name_from_identity("agent-Benefits"), "Benefits");
        assert_eq!(agent_name_from_identity("plainname"), "");
    }

    #[test]
    fn test_missing_optional_fields_are_empty() {
        let event = normalizer()
            .normalize(&record(json!({
                "RecordType": 91,
                "CreationTime": "2024-01-01T10:00:00Z",
                "UserId": "alice@example.com"
            })))
            .unwrap()
            .unwrap();

        assert_eq!(event.app, "Copilot for M365");
        assert_eq!(event.location, "");
        assert_eq!(event.app_context, "");
        assert_eq!(event.action, "");
        assert!(event.accessed_resources.is_empty());
    }

    #[test]
    fn test_other_record_types_are_filtered() {
        let result = normalizer().normalize(&record(json!({
            "RecordType": 15,
            "CreationTime": "2024-01-01T10:00:00",
            "UserId": "alice@example.com"
        })));
        assert_eq!(result, Ok(None));
    }

    #[test]
    fn test_missing_user_is_rejected() {
        let result = normalizer().normalize(&record(json!({
            "RecordType": 91,
            "CreationTime": "2024-01-01T10:00:00"
        })));
        assert_eq!(result, Err(NormalizeError::MissingField("UserId")));
    }

    #[test]
    fn test_missing_timestamp_is_rejected() {
        let result = normalizer().normalize(&record(json!({
            "RecordType": 91,
            "UserId": "alice@example.com",
            "CreationTime": "  "
        })));
        assert_eq!(result, Err(NormalizeError::MissingField("CreationTime")));
    }

    #[test]
    fn test_garbage_timestamp_is_rejected() {
        let result = normalizer().normalize(&record(json!({
            "RecordType": 91,
            "UserId": "alice@example.com",
            "CreationTime": "yesterday"
        })));
        assert!(matches!(result, Err(NormalizeError::InvalidTimestamp(_))));
    }

    #[test]
    fn test_timestamps_normalize_to_utc_seconds() {
        let expected = Utc.with_ymd_and_hms(2024, 1, 1, 8, 0, 0).unwrap();
        assert_eq!(parse_timestamp("2024-01-01T10:00:00.750+02:00").unwrap(), expected);
        assert_eq!(parse_timestamp("2024-01-01T08:00:00.1234567").unwrap(), expected);
        assert_eq!(parse_timestamp("2024-01-01T08:00:00Z").unwrap(), expected);
    }
}
