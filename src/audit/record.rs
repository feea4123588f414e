use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::config::types::COPILOT_INTERACTION_RECORD_TYPE;

/// Reference to one content blob listed by the Management Activity API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContentBlobRef {
    pub content_id: String,
    pub content_uri: String,
    #[serde(default)]
    pub content_type: String,
    #[serde(default)]
    pub content_created: Option<String>,
    #[serde(default)]
    pub content_expiration: Option<String>,
}

/// One audit entry as delivered by the provider.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct RawAuditRecord {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default, deserialize_with = "deserialize_record_type")]
    pub record_type: Option<u32>,
    #[serde(default, alias = "CreationDate")]
    pub creation_time: Option<String>,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub operation: Option<String>,
    #[serde(default)]
    pub workload: Option<String>,
    #[serde(default)]
    pub app_identity: Option<String>,
    #[serde(default)]
    pub copilot_event_data: Option<CopilotEventData>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct CopilotEventData {
    #[serde(default)]
    pub app_host: Option<String>,
    #[serde(default)]
    pub thread_id: Option<String>,
    #[serde(default)]
    pub contexts: Vec<CopilotContext>,
    #[serde(default)]
    pub accessed_resources: Vec<AccessedResource>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct CopilotContext {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default, rename = "Type")]
    pub context_type: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct AccessedResource {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub action: Option<String>,
    #[serde(default, rename = "Type")]
    pub resource_type: Option<String>,
}

impl RawAuditRecord {
    /// Decode one element of a content blob.
    ///
    /// Records exported by the unified audit log search nest the payload in
    /// `AuditData` (an object or a JSON-encoded string); its fields are lifted
    /// to the top level without overwriting fields already present there.
    pub fn from_value(value: Value) -> Result<Self, serde_json::Error> {
        let Value::Object(mut fields) = value else {
            return serde_json::from_value(value);
        };

        if let Some(audit_data) = fields.remove("AuditData") {
            let nested = match audit_data {
                Value::String(raw) => serde_json::from_str::<Value>(&raw)?,
                other => other,
            };
            if let Value::Object(nested) = nested {
                for (key, value) in nested {
                    fields.entry(key).or_insert(value);
                }
            }
        }

        serde_json::from_value(Value::Object(fields))
    }
}

/// Accepts the numeric record type, a numeric string, or the
/// `CopilotInteraction` enum name used by the search API export.
fn deserialize_record_type<'de, D>(deserializer: D) -> Result<Option<u32>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(Value::Number(n)) => n.as_u64().and_then(|n| u32::try_from(n).ok()),
        Some(Value::String(s)) => match s.trim() {
            "CopilotInteraction" => Some(COPILOT_INTERACTION_RECORD_TYPE),
            other => other.parse().ok(),
        },
        _ => None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_management_api_record() {
        let record = RawAuditRecord::from_value(json!({
            "Id": "a1",
            "RecordType": 91,
            "CreationTime": "2024-01-01T10:00:00",
            "UserId": "alice@example.com",
            "Operation": "CopilotInteraction",
            "Workload": "Copilot",
            "CopilotEventData": {
                "AppHost": "Word",
                "Contexts": [{"Id": "https://contoso.sharepoint.com/sites/x/Plan.docx", "Type": "docx"}],
                "AccessedResources": [{"Id": "r1", "Name": "Plan.docx", "Action": "Read"}]
            }
        }))
        .unwrap();

        assert_eq!(record.record_type, Some(91));
        assert_eq!(record.user_id.as_deref(), Some("alice@example.com"));
        let data = record.copilot_event_data.unwrap();
        assert_eq!(data.contexts[0].context_type.as_deref(), Some("docx"));
        assert_eq!(data.accessed_resources[0].name.as_deref(), Some("Plan.docx"));
    }

    #[test]
    fn test_search_export_record_with_string_audit_data() {
        let audit_data = json!({
            "RecordType": 91,
            "UserId": "bob@example.com",
            "CopilotEventData": {"AppHost": "bizchat"}
        })
        .to_string();

        let record = RawAuditRecord::from_value(json!({
            "CreationDate": "2024-02-01T08:30:00Z",
            "RecordType": "CopilotInteraction",
            "AuditData": audit_data
        }))
        .unwrap();

        assert_eq!(record.record_type, Some(COPILOT_INTERACTION_RECORD_TYPE));
        assert_eq!(record.creation_time.as_deref(), Some("2024-02-01T08:30:00Z"));
        assert_eq!(record.user_id.as_deref(), Some("bob@example.com"));
        assert_eq!(
            record.copilot_event_data.unwrap().app_host.as_deref(),
            Some("bizchat")
        );
    }

    #[test]
    fn test_unknown_record_type_name() {
        let record = RawAuditRecord::from_value(json!({"RecordType": "ExchangeAdmin"})).unwrap();
        assert_eq!(record.record_type, None);
    }

    #[test]
    fn test_non_object_is_rejected() {
        assert!(RawAuditRecord::from_value(json!("not a record")).is_err());
        assert!(RawAuditRecord::from_value(json!({"UserId": 42})).is_err());
    }

    #[test]
    fn test_content_blob_ref() {
        let blob: ContentBlobRef = serde_json::from_value(json!({
            "contentType": "Audit.General",
            "contentId": "20240101-abc",
            "contentUri": "https://manage.office.com/api/v1.0/t/activity/feed/audit/20240101-abc",
            "contentCreated": "2024-01-01T10:05:00.000Z",
            "contentExpiration": "2024-01-08T10:05:00.000Z"
        }))
        .unwrap();
        assert_eq!(blob.content_id, "20240101-abc");
        assert_eq!(blob.content_type, "Audit.General");
    }
}
