pub const EVENTS_RECEIVED: &str = "breadcrumb_events_received";
pub const EVENT_PARSE_ERROR: &str = "breadcrumb_event_parse_error";
pub const FIRST_SIGHTINGS: &str = "breadcrumb_first_sightings";
pub const PAIRS_EMITTED: &str = "breadcrumb_pairs_emitted";
pub const PAIRS_REJECTED: &str = "breadcrumb_pairs_rejected";
pub const PENDING_KEYS: &str = "breadcrumb_pending_keys";
pub const RECORDS_VALIDATED: &str = "breadcrumb_records_validated";
pub const ROWS_STAGED: &str = "breadcrumb_rows_staged";
pub const ROWS_DROPPED: &str = "breadcrumb_rows_dropped";
pub const TRIPS_DEDUPLICATED: &str = "breadcrumb_trips_deduplicated";
pub const FLUSH_ATTEMPT: &str = "breadcrumb_flush_attempt";
pub const FLUSH_TIME: &str = "breadcrumb_flush_time_ms";
pub const ROWS_WRITTEN: &str = "breadcrumb_rows_written";
pub const STORE_RECONNECT: &str = "breadcrumb_store_reconnect";
pub const IDLE_SECONDS: &str = "breadcrumb_idle_seconds";
pub const ACK_FAILED: &str = "breadcrumb_ack_failed";
