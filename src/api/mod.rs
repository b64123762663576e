mod blocks;
mod chains;
mod health;
pub mod models;
mod wallet;

use actix_web::web::{self, ServiceConfig};

pub use models::AppState;

pub fn init_routes(cfg: &mut ServiceConfig) {
    cfg.service(
        web::scope("/api/v1")
            .service(health::health_check)
            .service(chains::list_chains)
            .service(chains::create_chain)
            .service(chains::get_tip)
            .service(chains::get_tail)
            .service(chains::get_block_range)
            .service(chains::get_account)
            .service(chains::get_stats)
            .service(chains::mine_block)
            .service(blocks::get_block)
            .service(blocks::submit_block)
            .service(wallet::create_wallet),
    );
}

#[cfg(test)]
mod tests {
    use actix_web::{App, test, web};
    use serde_json::{Value, json};

    use super::{AppState, init_routes};
    use crate::repository::RepositoryImpl;

    const SECRET: &str = "0909090909090909090909090909090909090909090909090909090909090909";
    const CHAIN: &str = "746573742d636861696e";

    #[actix_web::test]
    async fn genesis_mining_and_resubmission() {
        let state = web::Data::new(AppState::new(RepositoryImpl::temporary().unwrap()));
        let app = test::init_service(App::new().app_data(state.clone()).configure(init_routes)).await;

        let req = test::TestRequest::post()
            .uri("/api/v1/chains/")
            .set_json(json!({
                "chain_id": CHAIN,
                "secret_key": SECRET,
                "initial_balance": 1000,
                "timestamp": 1000
            }))
            .to_request();
        let genesis: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(genesis["block_number"], 0);
        assert_eq!(genesis["miner_balance"], 1000);

        let req = test::TestRequest::post()
            .uri(&format!("/api/v1/chains/{CHAIN}/mine/"))
            .set_json(json!({ "secret_key": SECRET, "note": "hello" }))
            .to_request();
        let mined: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(mined["block_number"], 1);
        assert_eq!(mined["previous_block_root"], genesis["hash"]);

        let req = test::TestRequest::get()
            .uri(&format!("/api/v1/chains/{CHAIN}/tip/"))
            .to_request();
        let tip: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(tip["hash"], mined["hash"]);

        let req = test::TestRequest::post()
            .uri("/api/v1/blocks/")
            .set_json(json!({ "block": mined["encoded"] }))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), 409);

        let miner = genesis["miner"].as_str().unwrap();
        let req = test::TestRequest::get()
            .uri(&format!("/api/v1/chains/{CHAIN}/accounts/{miner}/"))
            .to_request();
        let account: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(account["balance"], 1000);
        assert_eq!(account["effective_power"], 2);
    }

    #[actix_web::test]
    async fn bad_input_is_rejected() {
        let state = web::Data::new(AppState::new(RepositoryImpl::temporary().unwrap()));
        let app = test::init_service(App::new().app_data(state).configure(init_routes)).await;

        let req = test::TestRequest::get().uri("/api/v1/chains/zz/tip/").to_request();
        assert_eq!(test::call_service(&app, req).await.status(), 400);

        let req = test::TestRequest::get()
            .uri(&format!("/api/v1/chains/{CHAIN}/tip/"))
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), 404);

        let req = test::TestRequest::post()
            .uri("/api/v1/blocks/")
            .set_json(json!({ "block": "not-hex" }))
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), 400);
    }
}
