//! HTTP surface.
//!
//! One serving endpoint plus a health probe. The response carries its own
//! status code in the body: 200 for a full result, 299 when fewer items than
//! requested could be served. Degraded upstream stages never surface as
//! HTTP errors.

use std::sync::Arc;

use actix_web::{get, post, web, HttpResponse};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::info;
use uuid::Uuid;

use crate::services::RecommendService;

const DEFAULT_SIZE: usize = 10;
const DEFAULT_SCENE: &str = "default_scene";
const DEFAULT_CATEGORY: &str = "default";

const CODE_SUCCESS: u16 = 200;
const CODE_SIZE_NOT_ENOUGH: u16 = 299;
const CODE_BAD_PARAMETER: u16 = 400;

pub struct AppState {
    pub service: Arc<RecommendService>,
}

#[derive(Debug, Deserialize)]
pub struct RecommendRequest {
    #[serde(default)]
    pub scene_id: String,
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub uid: String,
    #[serde(default)]
    pub size: i64,
    #[serde(default)]
    pub debug: bool,
    #[serde(default)]
    pub features: Map<String, Value>,
}

#[derive(Debug, Serialize)]
pub struct ItemData {
    pub item_id: String,
    pub item_type: String,
    pub retrieve_id: String,
}

#[derive(Debug, Serialize)]
pub struct RecommendResponse {
    pub request_id: String,
    pub code: u16,
    pub message: String,
    pub size: usize,
    pub items: Vec<ItemData>,
}

#[post("/api/v1/recommend")]
pub async fn recommend(
    state: web::Data<AppState>,
    body: web::Json<RecommendRequest>,
) -> HttpResponse {
    let request_id = Uuid::new_v4().to_string();
    let mut param = body.into_inner();
    info!(request_id = %request_id, scene = %param.scene_id, uid = %param.uid, "recommend request begin");

    if param.uid.is_empty() {
        return HttpResponse::BadRequest().json(RecommendResponse {
            request_id,
            code: CODE_BAD_PARAMETER,
            message: "uid must not be empty".to_string(),
            size: 0,
            items: Vec::new(),
        });
    }
    if param.scene_id.is_empty() {
        param.scene_id = DEFAULT_SCENE.to_string();
    }
    if param.category.is_empty() {
        param.category = DEFAULT_CATEGORY.to_string();
    }
    let size = if param.size <= 0 {
        DEFAULT_SIZE
    } else {
        param.size as usize
    };

    let mut features = param.features;
    features.insert("category".to_string(), Value::String(param.category));

    let ctx = state.service.make_context(
        &request_id,
        &param.scene_id,
        &param.uid,
        size,
        param.debug,
        features,
    );
    let items = state.service.recommend(&ctx).await;

    let data: Vec<ItemData> = items
        .into_iter()
        .map(|item| ItemData {
            item_id: item.id,
            item_type: item.item_type,
            retrieve_id: item.retrieve_id,
        })
        .collect();

    let (code, message) = if data.len() < size {
        (CODE_SIZE_NOT_ENOUGH, "items size not enough")
    } else {
        (CODE_SUCCESS, "success")
    };
    info!(request_id = %request_id, code, count = data.len(), "recommend request end");

    HttpResponse::Ok().json(RecommendResponse {
        request_id,
        code,
        message: message.to_string(),
        size: data.len(),
        items: data,
    })
}

#[get("/health")]
pub async fn health() -> HttpResponse {
    HttpResponse::Ok().body("OK")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::experiment::provider::native::{NativeProvider, StaticSceneSource};
    use crate::experiment::provider::DEFAULT_REFRESH_INTERVAL;
    use crate::experiment::ExperimentService;
    use crate::models::Item;
    use crate::services::StaticCandidateSource;
    use actix_web::{test, App};

    fn app_state(items: Vec<Item>) -> web::Data<AppState> {
        let experiments = Arc::new(ExperimentService::new(
            Arc::new(NativeProvider::new(Arc::new(StaticSceneSource::new(vec![])))),
            DEFAULT_REFRESH_INTERVAL,
        ));
        let service = RecommendService::new(
            experiments,
            Arc::new(StaticCandidateSource::new(items)),
            None,
            None,
        );
        web::Data::new(AppState {
            service: Arc::new(service),
        })
    }

    #[actix_web::test]
    async fn test_recommend_success_code() {
        let items = (0..10)
            .map(|i| Item::with_score(&format!("i{}", i), "static", 1.0 - 0.01 * i as f64))
            .collect();
        let app = test::init_service(
            App::new().app_data(app_state(items)).service(recommend),
        )
        .await;

        let req = test::TestRequest::post()
            .uri("/api/v1/recommend")
            .set_json(serde_json::json!({"scene_id": "home", "uid": "u1", "size": 5}))
            .to_request();
        let body: RecommendResponseProbe = test::call_and_read_body_json(&app, req).await;

        assert_eq!(body.code, 200);
        assert_eq!(body.size, 5);
        assert_eq!(body.items.len(), 5);
    }

    #[actix_web::test]
    async fn test_recommend_insufficient_items_code() {
        let items = vec![Item::with_score("only", "static", 1.0)];
        let app = test::init_service(
            App::new().app_data(app_state(items)).service(recommend),
        )
        .await;

        let req = test::TestRequest::post()
            .uri("/api/v1/recommend")
            .set_json(serde_json::json!({"scene_id": "home", "uid": "u1", "size": 5}))
            .to_request();
        let body: RecommendResponseProbe = test::call_and_read_body_json(&app, req).await;

        assert_eq!(body.code, 299);
        assert_eq!(body.size, 1);
    }

    #[actix_web::test]
    async fn test_recommend_empty_uid_rejected() {
        let app = test::init_service(
            App::new().app_data(app_state(vec![])).service(recommend),
        )
        .await;

        let req = test::TestRequest::post()
            .uri("/api/v1/recommend")
            .set_json(serde_json::json!({"scene_id": "home", "uid": ""}))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), actix_web::http::StatusCode::BAD_REQUEST);
    }

    #[derive(Debug, Deserialize)]
    struct ItemDataProbe {
        item_id: String,
    }

    #[derive(Debug, Deserialize)]
    struct RecommendResponseProbe {
        code: u16,
        size: usize,
        items: Vec<ItemDataProbe>,
    }

    #[actix_web::test]
    async fn test_recommend_defaults_applied() {
        let items = (0..12)
            .map(|i| Item::with_score(&format!("i{}", i), "static", 1.0 - 0.01 * i as f64))
            .collect();
        let app = test::init_service(
            App::new().app_data(app_state(items)).service(recommend),
        )
        .await;

        // No size and no scene: size defaults to 10, scene to default_scene.
        let req = test::TestRequest::post()
            .uri("/api/v1/recommend")
            .set_json(serde_json::json!({"uid": "u1"}))
            .to_request();
        let body: RecommendResponseProbe = test::call_and_read_body_json(&app, req).await;

        assert_eq!(body.code, 200);
        assert_eq!(body.size, 10);
        assert_eq!(body.items[0].item_id, "i0");
    }
}
