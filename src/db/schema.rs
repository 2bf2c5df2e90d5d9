//! SQL DDL for initializing the database schema.
//! SQLite-first design; can be adapted for other RDBMS.

/// SQLite schema includes:
/// - `credentials` (the live pool, all providers in one table)
/// - `credential_errors` (quarantine; a credential is in exactly one of the two)
/// - `api_keys` (downstream callers, hashed secrets, per-key ceilings)
/// - `request_logs` (one row per completed request)
/// - `health_records` (persisted health/bucket state per credential)
/// - `pricing` (per-model price overrides, highest cascade tier)
pub const SQLITE_INIT: &str = r"
-- ---------------------------------------------------------------------------
-- Credential pool (one row per upstream account, all providers)
-- ---------------------------------------------------------------------------
CREATE TABLE IF NOT EXISTS credentials (
    id INTEGER PRIMARY KEY NOT NULL,
    provider TEXT NOT NULL,
    auth_method TEXT NOT NULL DEFAULT 'none',
    access_token TEXT NULL,
    refresh_token TEXT NULL,
    expires_at TEXT NULL, -- RFC3339, NULL = never refreshed
    project_id TEXT NULL,
    region TEXT NULL,
    client_id TEXT NULL,
    client_secret TEXT NULL,
    use_count INTEGER NOT NULL DEFAULT 0,
    error_count INTEGER NOT NULL DEFAULT 0,
    last_error TEXT NULL,
    last_used_at TEXT NULL, -- RFC3339
    is_active INTEGER NOT NULL DEFAULT 1,
    quota_data TEXT NULL, -- JSON: model -> {remaining_fraction, reset_time}
    created_at TEXT NOT NULL, -- RFC3339
    updated_at TEXT NOT NULL -- RFC3339
);

CREATE INDEX IF NOT EXISTS idx_credentials_provider ON credentials(provider, is_active);

-- ---------------------------------------------------------------------------
-- Quarantined credentials (terminal refresh/auth failures)
-- ---------------------------------------------------------------------------
CREATE TABLE IF NOT EXISTS credential_errors (
    id INTEGER PRIMARY KEY NOT NULL,
    provider TEXT NOT NULL,
    auth_method TEXT NOT NULL DEFAULT 'none',
    access_token TEXT NULL,
    refresh_token TEXT NULL,
    expires_at TEXT NULL,
    project_id TEXT NULL,
    region TEXT NULL,
    client_id TEXT NULL,
    client_secret TEXT NULL,
    use_count INTEGER NOT NULL DEFAULT 0,
    error_count INTEGER NOT NULL DEFAULT 0,
    last_error TEXT NULL,
    error_class TEXT NOT NULL DEFAULT 'auth',
    quarantined_at TEXT NOT NULL, -- RFC3339
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_credential_errors_provider ON credential_errors(provider);

-- ---------------------------------------------------------------------------
-- Downstream API keys
-- ---------------------------------------------------------------------------
CREATE TABLE IF NOT EXISTS api_keys (
    id INTEGER PRIMARY KEY NOT NULL,
    key_hash TEXT NOT NULL UNIQUE,
    key_prefix TEXT NOT NULL,
    name TEXT NULL,
    daily_limit INTEGER NOT NULL DEFAULT 0, -- 0 = unlimited
    monthly_limit INTEGER NOT NULL DEFAULT 0,
    total_limit INTEGER NOT NULL DEFAULT 0,
    daily_cost_limit REAL NOT NULL DEFAULT 0,
    monthly_cost_limit REAL NOT NULL DEFAULT 0,
    total_cost_limit REAL NOT NULL DEFAULT 0,
    concurrent_limit INTEGER NOT NULL DEFAULT 0,
    rate_limit INTEGER NOT NULL DEFAULT 0, -- requests per minute
    expires_in_days INTEGER NOT NULL DEFAULT 0, -- 0 = never
    is_active INTEGER NOT NULL DEFAULT 1,
    created_at TEXT NOT NULL -- RFC3339
);

CREATE INDEX IF NOT EXISTS idx_api_keys_hash ON api_keys(key_hash);

-- ---------------------------------------------------------------------------
-- Request log (one row per completed request)
-- ---------------------------------------------------------------------------
CREATE TABLE IF NOT EXISTS request_logs (
    id INTEGER PRIMARY KEY NOT NULL,
    request_id TEXT NOT NULL,
    api_key_id INTEGER NOT NULL,
    ip_address TEXT NULL,
    provider TEXT NOT NULL,
    credential_id INTEGER NULL,
    model TEXT NOT NULL,
    stream INTEGER NOT NULL DEFAULT 0,
    input_tokens INTEGER NOT NULL DEFAULT 0,
    output_tokens INTEGER NOT NULL DEFAULT 0,
    status_code INTEGER NOT NULL,
    error_message TEXT NULL,
    duration_ms INTEGER NOT NULL DEFAULT 0,
    cost REAL NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL -- RFC3339
);

CREATE INDEX IF NOT EXISTS idx_request_logs_key_time ON request_logs(api_key_id, created_at);

-- ---------------------------------------------------------------------------
-- Persisted health / admission-bucket state
-- ---------------------------------------------------------------------------
CREATE TABLE IF NOT EXISTS health_records (
    provider TEXT NOT NULL,
    credential_id INTEGER NOT NULL,
    score INTEGER NOT NULL DEFAULT 70,
    bucket_tokens REAL NOT NULL DEFAULT 50,
    bucket_refilled_at TEXT NOT NULL,
    paused_until TEXT NULL,
    rate_limit_hits INTEGER NOT NULL DEFAULT 0,
    last_rate_limit_at TEXT NULL,
    last_error_class TEXT NULL,
    last_failure_at TEXT NULL,
    updated_at TEXT NOT NULL,
    PRIMARY KEY (provider, credential_id)
);

-- ---------------------------------------------------------------------------
-- Per-model price overrides (USD per million tokens)
-- ---------------------------------------------------------------------------
CREATE TABLE IF NOT EXISTS pricing (
    model TEXT PRIMARY KEY NOT NULL,
    input_price REAL NOT NULL,
    output_price REAL NOT NULL,
    updated_at TEXT NOT NULL
);
";
