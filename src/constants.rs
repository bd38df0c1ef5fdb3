//! System-wide constants.

/// Default queue names for the pipeline stages
pub mod queues {
    pub const TRANSACTION_REQUESTS: &str = "fetchflow_transaction_requests";
    pub const TOKEN_TASKS: &str = "fetchflow_token_tasks";
    pub const FINALIZE_TASKS: &str = "fetchflow_finalize_tasks";
    pub const REPLY_PREFIX: &str = "fetchflow_reply";
}

/// Token names upstream providers hand out when they have nothing better
pub mod placeholders {
    pub const DEFAULT_NAMES: &[&str] = &["Unknown Token", "Unknown", "Token", "SPL Token"];
    pub const DEFAULT_PREFIXES: &[&str] = &["Unnamed", "Unknown Token #"];
}

/// Priority conventions (higher is delivered sooner)
pub mod priority {
    pub const INTERACTIVE: u8 = 200;
    pub const DEFAULT: u8 = 100;
    pub const SUB_FETCH: u8 = 50;
    pub const BATCH: u8 = 10;
}

/// JSON-RPC method names used against primary endpoints
pub mod rpc_methods {
    pub const GET_TRANSACTION: &str = "getTransaction";
    pub const GET_ASSET: &str = "getAsset";
    pub const GET_SIGNATURES_FOR_ADDRESS: &str = "getSignaturesForAddress";
}

/// Well-known program ids that are never treated as entity keys
pub mod programs {
    pub const SYSTEM: &str = "11111111111111111111111111111111";
    pub const TOKEN: &str = "TokenkegQfeZyiNwAJbNbGKPFXCWuBvf9Ss623VQ5DA";
    pub const TOKEN_2022: &str = "TokenzQdBNbLqP5VEhdkAS6EPFLC1PHnBqCXEpPxuEb";
    pub const ASSOCIATED_TOKEN: &str = "ATokenGPvbdGVxr1b2hvZbsiqW5xWH25efTNsLJA8knL";
    pub const COMPUTE_BUDGET: &str = "ComputeBudget111111111111111111111111111111";

    pub fn is_well_known(key: &str) -> bool {
        matches!(
            key,
            SYSTEM | TOKEN | TOKEN_2022 | ASSOCIATED_TOKEN | COMPUTE_BUDGET
        )
    }
}

/// Native SOL wrapped mint; always known, never sub-fetched
pub const WRAPPED_SOL_MINT: &str = "So11111111111111111111111111111111111111112";

/// Per-request timeout for upstream HTTP calls
pub const HTTP_REQUEST_TIMEOUT_SECS: u64 = 30;
