pub fn generate_starter_config() -> String {
    r#"# =============================================================================
# COPILOT-AUDIT CONFIGURATION
# =============================================================================
# Collects the Microsoft 365 Copilot user roster (Microsoft Graph) and Copilot
# interaction events (Office 365 Management Activity API) into CSV files.
#
# Config file locations (in order of precedence):
#   1. Path specified via --config argument
#   2. ~/.config/copilot-audit/config.yml
#   3. /etc/copilot-audit/config.yml
#
# Without a config file every setting falls back to its default, and the
# credentials are read from the environment (or a .env file):
#   AZURE_TENANT_ID, AZURE_CLIENT_ID, AZURE_CLIENT_SECRET, AZURE_CLOUD
# Environment variables always override values from this file.

# =============================================================================
# TENANT
# =============================================================================
# App registration used for the client-credentials flow. Values may reference
# environment variables with $env{NAME}.

tenant:
  tenant_id: $env{AZURE_TENANT_ID}
  client_id: $env{AZURE_CLIENT_ID}
  client_secret: $env{AZURE_CLIENT_SECRET}
  # commercial, gcc, gcc_high, or dod
  cloud: commercial

# =============================================================================
# EVENT SYNC
# =============================================================================
# On the first run events are fetched from now - lookback_days. Later runs resume
# from the committed watermark stored next to the events CSV.

sync:
  # Override with AUDIT_LOOKBACK_DAYS
  lookback_days: 90
  # Width of each content listing request; the API allows at most 1440 (24h).
  # Override with AUDIT_INTERVAL_MINUTES
  max_window_minutes: 1440
  # Audit record types kept as Copilot events (91 = CopilotInteraction)
  record_types: [91]
  # Start the Audit.General subscription before listing content
  subscribe: true

# =============================================================================
# HTTP
# =============================================================================
# Timeouts, HTTP 429, and 5xx responses are retried with exponential backoff.

http:
  timeout: 30s
  max_attempts: 5
  initial_backoff: 2s
  max_backoff: 60s

# =============================================================================
# OUTPUT
# =============================================================================
# Copilot_Users.csv, Copilot_Events.csv, and AuditScriptLog.txt land here.
# Override with AUDIT_OUTPUT_DIR or --output-dir.

output:
  dir: ./output

# =============================================================================
# USER ROSTER
# =============================================================================
# Users holding any of these SKUs are reported with HasCopilotLicense = true.
# Override with COPILOT_SKU_IDS (comma-separated).

roster:
  copilot_sku_ids:
    - 639dec6b-bb19-468b-871c-c5c441c4b0cb
"#
    .to_string()
}
