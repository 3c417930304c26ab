pub fn generate_starter_config() -> String {
    r#"# =============================================================================
# LOGSHIP CONFIGURATION
# =============================================================================
# Config file locations (in order of precedence):
#   1. Path specified via --config argument
#   2. ~/.config/logship/config.yml
#   3. /etc/logship/config.yml
#
# Values may reference environment variables with $env{VAR_NAME}.

client:
  # Loki push endpoint
  url: http://localhost:3100/loki/api/v1/push

  # Optional tenant, sent as the X-Scope-OrgID header
  # tenant_id: team-a

  # Flush a batch once it is older than this
  batch_wait: 1s

  # Flush a batch before it would grow beyond this many bytes of log text
  batch_size: 1048576

  # HTTP request timeout
  timeout: 10s

  # Retry policy for failed pushes (5xx, 429 and connection errors)
  backoff:
    min_period: 500ms
    max_period: 5m
    max_retries: 10

  # Labels added to every stream
  external_labels: {}

  # Sort entries by timestamp within each stream before sending
  sort_by_timestamp: true

  # Batch ids rotate through 0..number_of_batch_ids
  number_of_batch_ids: 10

  # Queue entries in memory so producers never wait on delivery
  buffer:
    enabled: false
    type: memory

input:
  # Labels attached to every line read from stdin
  labels:
    job: logship
"#
    .to_string()
}
