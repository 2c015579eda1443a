//! Ledger schema
//!
//! Every statement is idempotent so `ensure_schema` can run on each start.

pub const CREATE_USERS: &str = "CREATE TABLE IF NOT EXISTS users_tb (
    id          BIGSERIAL PRIMARY KEY,
    created_at  TIMESTAMPTZ NOT NULL DEFAULT NOW()
)";

pub const CREATE_WALLETS: &str = "CREATE TABLE IF NOT EXISTS wallets_tb (
    id       BIGSERIAL PRIMARY KEY,
    balance  NUMERIC(12, 2) NOT NULL DEFAULT 0,
    user_id  BIGINT NOT NULL REFERENCES users_tb (id),
    CONSTRAINT wallets_tb_user_id_key UNIQUE (user_id)
)";

pub const CREATE_TRANSFERS: &str = "CREATE TABLE IF NOT EXISTS transfers_tb (
    id               BIGSERIAL PRIMARY KEY,
    from_wallet_id   BIGINT NOT NULL REFERENCES wallets_tb (id),
    to_wallet_id     BIGINT NOT NULL REFERENCES wallets_tb (id),
    amount           NUMERIC(12, 2) NOT NULL,
    created_at       TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    idempotency_key  VARCHAR(255) NULL,
    request_hash     VARCHAR(64) NULL,
    CONSTRAINT transfers_tb_idempotency_key_key UNIQUE (idempotency_key),
    CONSTRAINT transfers_tb_distinct_wallets CHECK (from_wallet_id <> to_wallet_id),
    CONSTRAINT transfers_tb_positive_amount CHECK (amount > 0)
)";

pub const CREATE_TRANSFERS_FROM_INDEX: &str = "CREATE INDEX IF NOT EXISTS idx_transfers_from \
     ON transfers_tb (from_wallet_id, created_at DESC)";

pub const CREATE_TRANSFERS_TO_INDEX: &str = "CREATE INDEX IF NOT EXISTS idx_transfers_to \
     ON transfers_tb (to_wallet_id, created_at DESC)";

pub const CREATE_IDEMPOTENCY_KEYS: &str = "CREATE TABLE IF NOT EXISTS idempotency_keys_tb (
    key         VARCHAR(512) PRIMARY KEY,
    value       TEXT NOT NULL,
    expires_at  TIMESTAMPTZ NOT NULL
)";

/// Statements in dependency order
pub const ALL: &[&str] = &[
    CREATE_USERS,
    CREATE_WALLETS,
    CREATE_TRANSFERS,
    CREATE_TRANSFERS_FROM_INDEX,
    CREATE_TRANSFERS_TO_INDEX,
    CREATE_IDEMPOTENCY_KEYS,
];
