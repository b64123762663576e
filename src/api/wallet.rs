use actix_web::{HttpResponse, Responder, post};
use serde::Serialize;

use crate::wallet::generate_keypair_hex;

#[derive(Serialize)]
struct NewWalletResponse {
    secret_key: String,
    public_key: String,
}

/// Fresh Ed25519 keypair; the secret is the 32-byte seed in hex.
#[post("/wallet/new/")]
pub async fn create_wallet() -> impl Responder {
    let (sk, pk) = generate_keypair_hex();
    HttpResponse::Ok().json(NewWalletResponse {
        secret_key: sk,
        public_key: pk,
    })
}
