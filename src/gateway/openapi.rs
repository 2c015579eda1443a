//! OpenAPI / Swagger UI Documentation
//!
//! - Swagger UI: `http://localhost:8080/docs`
//! - OpenAPI JSON: `http://localhost:8080/api-docs/openapi.json`

use utoipa::OpenApi;

use crate::gateway::types::{
    CreateTransferRequest, HealthResponse, TransferResponse, UserResponse, WalletResponse,
};

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Wallet Transfer API",
        version = "0.1.0",
        description = "Exactly-once wallet-to-wallet transfers. Every POST /transfers carries an Idempotency-Key.",
        license(name = "MIT")
    ),
    servers(
        (url = "http://localhost:8080", description = "Development"),
    ),
    paths(
        crate::gateway::handlers::health_check,
        crate::gateway::handlers::create_transfer,
        crate::gateway::handlers::get_transfer,
        crate::gateway::handlers::get_wallet,
        crate::gateway::handlers::get_wallet_transfers,
        crate::gateway::handlers::create_user,
        crate::gateway::handlers::get_user,
    ),
    components(
        schemas(
            HealthResponse,
            CreateTransferRequest,
            TransferResponse,
            WalletResponse,
            UserResponse,
        )
    ),
    tags(
        (name = "System", description = "Health"),
        (name = "Transfers", description = "Money movement"),
        (name = "Wallets", description = "Balances and history"),
        (name = "Users", description = "User and wallet creation"),
    )
)]
pub struct ApiDoc;
